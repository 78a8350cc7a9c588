//! Встроенные ядра, которые эмулятор умеет исполнять

use crate::error::{ApiError, ApiResult};
use crate::matrix::kernels::{
    ADD_MATRIX_ENTRY, ADD_MATRIX_KERNEL, COPY_MATRIX_ENTRY, COPY_MATRIX_KERNEL, MULTIPLY_MATRIX_ENTRY,
    MULTIPLY_MATRIX_KERNEL,
};
use crate::opencl::types::*;

/// Вид параметра ядра в сигнатуре
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamKind {
    Scalar,
    Global,
    Local,
}

impl ParamKind {
    fn describe(self) -> &'static str {
        match self {
            ParamKind::Scalar => "scalar",
            ParamKind::Global => "__global pointer",
            ParamKind::Local => "__local pointer",
        }
    }
}

/// Связанное значение аргумента внутри эмулятора
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ArgValue {
    Int(i32),
    Mem(u64),
    Local(usize),
}

/// Доступ ядра к памяти устройства во время исполнения
pub(crate) trait DeviceMemory {
    fn load(&self, mem: u64) -> ApiResult<&[f32]>;
    fn store(&mut self, mem: u64) -> ApiResult<&mut [f32]>;
}

type Body = fn(&Launch<'_>, &mut dyn DeviceMemory) -> ApiResult<()>;

pub(crate) struct Builtin {
    pub name: &'static str,
    pub params: &'static [ParamKind],
    body: Body,
}

impl Builtin {
    pub fn signature(&self) -> String {
        self.params
            .iter()
            .map(|p| p.describe())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn run(&self, launch: &Launch<'_>, memory: &mut dyn DeviceMemory) -> ApiResult<()> {
        (self.body)(launch, memory)
    }

    /// Исходник, поведение которого воспроизводит `body`
    pub fn reference_source(&self) -> Option<&'static str> {
        match self.name {
            MULTIPLY_MATRIX_ENTRY => Some(MULTIPLY_MATRIX_KERNEL),
            ADD_MATRIX_ENTRY => Some(ADD_MATRIX_KERNEL),
            COPY_MATRIX_ENTRY => Some(COPY_MATRIX_KERNEL),
            _ => None,
        }
    }
}

/// Параметры одного запуска ядра
pub(crate) struct Launch<'a> {
    pub global: [usize; 2],
    pub args: &'a [ArgValue],
}

impl Launch<'_> {
    fn int(&self, index: usize) -> ApiResult<usize> {
        match self.args.get(index) {
            Some(ArgValue::Int(v)) if *v >= 0 => Ok(*v as usize),
            _ => Err(ApiError::new(CL_INVALID_ARG_VALUE)),
        }
    }

    fn mem(&self, index: usize) -> ApiResult<u64> {
        match self.args.get(index) {
            Some(ArgValue::Mem(id)) => Ok(*id),
            _ => Err(ApiError::new(CL_INVALID_MEM_OBJECT)),
        }
    }
}

const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "multiply_matrix",
        params: &[
            ParamKind::Scalar,
            ParamKind::Scalar,
            ParamKind::Scalar,
            ParamKind::Global,
            ParamKind::Global,
            ParamKind::Global,
        ],
        body: multiply_matrix,
    },
    Builtin {
        name: "add_matrix",
        params: &[ParamKind::Global, ParamKind::Global, ParamKind::Global],
        body: add_matrix,
    },
    Builtin {
        name: "copy_matrix",
        params: &[ParamKind::Global, ParamKind::Global],
        body: copy_matrix,
    },
];

pub(crate) fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

fn ensure_len(data: &[f32], needed: usize) -> ApiResult<()> {
    if data.len() < needed {
        // Выход за границы буфера на реальном устройстве
        return Err(ApiError::new(CL_OUT_OF_RESOURCES));
    }
    Ok(())
}

fn multiply_matrix(launch: &Launch<'_>, memory: &mut dyn DeviceMemory) -> ApiResult<()> {
    let rows_a = launch.int(0)?;
    let cols_a = launch.int(1)?;
    let cols_b = launch.int(2)?;
    let a = memory.load(launch.mem(3)?)?.to_vec();
    let b = memory.load(launch.mem(4)?)?.to_vec();
    ensure_len(&a, rows_a * cols_a)?;
    ensure_len(&b, cols_a * cols_b)?;

    let c = memory.store(launch.mem(5)?)?;
    ensure_len(c, rows_a * cols_b)?;

    let [global_rows, global_cols] = launch.global;
    for row in 0..global_rows {
        for col in 0..global_cols {
            if row < rows_a && col < cols_b {
                let mut sum = 0.0f32;
                for k in 0..cols_a {
                    sum += a[row * cols_a + k] * b[k * cols_b + col];
                }
                c[row * cols_b + col] = sum;
            }
        }
    }
    Ok(())
}

fn add_matrix(launch: &Launch<'_>, memory: &mut dyn DeviceMemory) -> ApiResult<()> {
    let [rows, cols] = launch.global;
    let len = rows * cols;
    let a = memory.load(launch.mem(0)?)?.to_vec();
    let b = memory.load(launch.mem(1)?)?.to_vec();
    ensure_len(&a, len)?;
    ensure_len(&b, len)?;

    let c = memory.store(launch.mem(2)?)?;
    ensure_len(c, len)?;
    for ((out, x), y) in c[..len].iter_mut().zip(&a).zip(&b) {
        *out = x + y;
    }
    Ok(())
}

fn copy_matrix(launch: &Launch<'_>, memory: &mut dyn DeviceMemory) -> ApiResult<()> {
    let [rows, cols] = launch.global;
    let len = rows * cols;
    let src = memory.load(launch.mem(0)?)?.to_vec();
    ensure_len(&src, len)?;

    let dst = memory.store(launch.mem(1)?)?;
    ensure_len(dst, len)?;
    dst[..len].copy_from_slice(&src[..len]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Memory(HashMap<u64, Vec<f32>>);

    impl DeviceMemory for Memory {
        fn load(&self, mem: u64) -> ApiResult<&[f32]> {
            self.0
                .get(&mem)
                .map(Vec::as_slice)
                .ok_or(ApiError::new(CL_INVALID_MEM_OBJECT))
        }

        fn store(&mut self, mem: u64) -> ApiResult<&mut [f32]> {
            self.0
                .get_mut(&mem)
                .map(Vec::as_mut_slice)
                .ok_or(ApiError::new(CL_INVALID_MEM_OBJECT))
        }
    }

    #[test]
    fn multiply_matches_hand_computed_values() {
        // [1 2] x [5 6] = [19 22]
        // [3 4]   [7 8]   [43 50]
        let mut memory = Memory(HashMap::from([
            (1, vec![1.0, 2.0, 3.0, 4.0]),
            (2, vec![5.0, 6.0, 7.0, 8.0]),
            (3, vec![0.0; 4]),
        ]));
        let args = [
            ArgValue::Int(2),
            ArgValue::Int(2),
            ArgValue::Int(2),
            ArgValue::Mem(1),
            ArgValue::Mem(2),
            ArgValue::Mem(3),
        ];
        let launch = Launch { global: [2, 2], args: &args };
        lookup("multiply_matrix").unwrap().run(&launch, &mut memory).unwrap();
        assert_eq!(memory.0[&3], vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn short_buffer_is_reported_as_device_fault() {
        let mut memory = Memory(HashMap::from([(1, vec![1.0; 3]), (2, vec![0.0; 4])]));
        let args = [ArgValue::Mem(1), ArgValue::Mem(2)];
        let launch = Launch { global: [2, 2], args: &args };
        let err = lookup("copy_matrix").unwrap().run(&launch, &mut memory).unwrap_err();
        assert_eq!(err.code, CL_OUT_OF_RESOURCES);
    }

    #[test]
    fn unknown_kernel_has_no_builtin() {
        assert!(lookup("conv2d").is_none());
        assert_eq!(lookup("add_matrix").unwrap().params.len(), 3);
    }

    #[test]
    fn every_builtin_has_a_reference_source() {
        for builtin in BUILTINS {
            let source = builtin.reference_source().unwrap();
            assert!(source.contains(builtin.name));
        }
    }
}
