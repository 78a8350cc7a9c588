//! Сборка программ OpenCL из исходного кода

use super::context::{log_release, ExecutionContext};
use super::kernel::Kernel;
use crate::compute::ComputeApi;
use crate::error::{PipelineError, Result};
use tracing::{debug, warn};

/// Предел длины лога сборки, байт
pub const MAX_BUILD_LOG: usize = 16 * 1024;

/// Собранная программа; неизменяема и выдает ядра по имени точки входа
pub struct CompiledProgram<'c, A: ComputeApi> {
    ctx: &'c ExecutionContext<A>,
    program: A::Program,
    build_log: String,
}

impl<'c, A: ComputeApi> CompiledProgram<'c, A> {
    /// Компилирует `source` для устройства контекста
    ///
    /// При ошибке возвращает `BuildFailed` с логом компилятора без изменений
    /// (не длиннее [`MAX_BUILD_LOG`]); объект программы освобождается.
    pub fn build(ctx: &'c ExecutionContext<A>, source: &str, options: &str) -> Result<Self> {
        let api = ctx.api();
        let program = api.create_program(ctx.context(), source).map_err(|code| {
            PipelineError::BuildFailed {
                code,
                log: format!("clCreateProgramWithSource failed: {}", code),
            }
        })?;
        let mut compiled = Self {
            ctx,
            program,
            build_log: String::new(),
        };

        let built = api.build_program(program, ctx.device(), options);
        let log = match api.build_log(program, ctx.device(), MAX_BUILD_LOG) {
            Ok(log) => log,
            Err(e) => {
                warn!("не удалось получить лог сборки: {}", e);
                String::new()
            }
        };

        if let Err(code) = built {
            let log = if log.trim().is_empty() {
                format!("build failed with {} and an empty build log", code)
            } else {
                log
            };
            return Err(PipelineError::BuildFailed { code, log });
        }

        if !log.trim().is_empty() {
            debug!("build log:\n{}", log);
        }
        compiled.build_log = log;
        Ok(compiled)
    }

    /// Создает ядро по имени точки входа с `arity` аргументами
    pub fn kernel(&self, name: &str, arity: usize) -> Result<Kernel<'_, A>> {
        let kernel = self
            .ctx
            .api()
            .create_kernel(self.program, name)
            .map_err(|source| PipelineError::EntryPointNotFound {
                name: name.to_owned(),
                source,
            })?;
        Ok(Kernel::new(self, kernel, name, arity))
    }

    pub(crate) fn context(&self) -> &'c ExecutionContext<A> {
        self.ctx
    }

    /// Предупреждения компилятора успешной сборки
    pub fn build_log(&self) -> &str {
        &self.build_log
    }
}

impl<A: ComputeApi> Drop for CompiledProgram<'_, A> {
    fn drop(&mut self) {
        log_release("program", self.ctx.api().release_program(self.program));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{DeviceClass, HostDevice, ResourceKind};
    use crate::matrix::{MULTIPLY_MATRIX_KERNEL, kernels::MULTIPLY_MATRIX_ENTRY};
    use crate::pipeline::device::select_device;

    fn context(device: &HostDevice) -> ExecutionContext<&HostDevice> {
        let selection = select_device(&device, DeviceClass::Any).unwrap();
        ExecutionContext::create(device, &selection, true).unwrap()
    }

    #[test]
    fn builtin_source_builds() {
        let device = HostDevice::new();
        let ctx = context(&device);
        let program = CompiledProgram::build(&ctx, MULTIPLY_MATRIX_KERNEL, "").unwrap();
        assert!(program.build_log().is_empty());
        assert!(program.kernel(MULTIPLY_MATRIX_ENTRY, 6).is_ok());
    }

    #[test]
    fn syntax_error_returns_log_and_releases_program() {
        let device = HostDevice::new();
        {
            let ctx = context(&device);
            let err = CompiledProgram::build(&ctx, "__kernel void multiply_matrix( {", "")
                .err()
                .unwrap();
            let log = err.build_log().unwrap();
            assert!(log.contains("error"));
        }
        let ledger = device.ledger();
        assert_eq!(ledger.count_created(ResourceKind::Program), 1);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn unknown_entry_point() {
        let device = HostDevice::new();
        let ctx = context(&device);
        let program = CompiledProgram::build(&ctx, MULTIPLY_MATRIX_KERNEL, "").unwrap();
        let err = program.kernel("multiply", 6).err().unwrap();
        assert!(matches!(err, PipelineError::EntryPointNotFound { ref name, .. } if name == "multiply"));
    }

    #[test]
    fn bad_options_fail_the_build() {
        let device = HostDevice::new();
        let ctx = context(&device);
        let err = CompiledProgram::build(&ctx, MULTIPLY_MATRIX_KERNEL, "--fast").err().unwrap();
        assert!(err.build_log().unwrap().contains("--fast"));
    }
}
