//! Матричные операции поверх конвейера

use crate::compute::ComputeApi;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::matrix::kernels::{
    ADD_MATRIX_ENTRY, ADD_MATRIX_KERNEL, COPY_MATRIX_ENTRY, COPY_MATRIX_KERNEL, MULTIPLY_MATRIX_ENTRY,
    MULTIPLY_MATRIX_KERNEL,
};
use crate::matrix::Matrix;
use crate::pipeline::{run_job, JobArg, KernelJob, RunOutput};
use std::fmt;

/// Операция, выполняемая на устройстве
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Multiply,
    Add,
    Copy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Multiply => f.write_str("multiply"),
            Operation::Add => f.write_str("add"),
            Operation::Copy => f.write_str("copy"),
        }
    }
}

impl Operation {
    /// Запускает операцию; `copy` использует только `a`
    pub fn run<A: ComputeApi>(self, api: A, config: &PipelineConfig, a: &Matrix, b: &Matrix) -> Result<RunOutput> {
        match self {
            Operation::Multiply => multiply(api, config, a, b),
            Operation::Add => add(api, config, a, b),
            Operation::Copy => copy(api, config, a),
        }
    }

    pub fn entry_point(self) -> &'static str {
        match self {
            Operation::Multiply => MULTIPLY_MATRIX_ENTRY,
            Operation::Add => ADD_MATRIX_ENTRY,
            Operation::Copy => COPY_MATRIX_ENTRY,
        }
    }
}

fn dim(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| PipelineError::invalid_matrix(format!("dimension {} does not fit in int", value)))
}

/// `C = A x B`; аргументы ядра `(rowsA, colsA, colsB, A, B, C)`
pub fn multiply<A: ComputeApi>(api: A, config: &PipelineConfig, a: &Matrix, b: &Matrix) -> Result<RunOutput> {
    a.ensure_multipliable(b)?;
    let job = KernelJob {
        source: config.source_or(MULTIPLY_MATRIX_KERNEL),
        entry: MULTIPLY_MATRIX_ENTRY,
        inputs: vec![("A", a), ("B", b)],
        output_name: "C",
        output_shape: (a.rows(), b.cols()),
        args: vec![
            JobArg::Int(dim(a.rows())?),
            JobArg::Int(dim(a.cols())?),
            JobArg::Int(dim(b.cols())?),
            JobArg::Input(0),
            JobArg::Input(1),
            JobArg::Output,
        ],
    };
    run_job(api, config, &job)
}

/// `C = A + B`; аргументы ядра `(A, B, C)`
pub fn add<A: ComputeApi>(api: A, config: &PipelineConfig, a: &Matrix, b: &Matrix) -> Result<RunOutput> {
    a.ensure_same_shape(b)?;
    let job = KernelJob {
        source: config.source_or(ADD_MATRIX_KERNEL),
        entry: ADD_MATRIX_ENTRY,
        inputs: vec![("A", a), ("B", b)],
        output_name: "C",
        output_shape: a.shape(),
        args: vec![JobArg::Input(0), JobArg::Input(1), JobArg::Output],
    };
    run_job(api, config, &job)
}

/// Тождественное ядро: результат совпадает со входом
pub fn copy<A: ComputeApi>(api: A, config: &PipelineConfig, src: &Matrix) -> Result<RunOutput> {
    let job = KernelJob {
        source: config.source_or(COPY_MATRIX_KERNEL),
        entry: COPY_MATRIX_ENTRY,
        inputs: vec![("src", src)],
        output_name: "dst",
        output_shape: src.shape(),
        args: vec![JobArg::Input(0), JobArg::Output],
    };
    run_job(api, config, &job)
}
