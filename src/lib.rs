//! Конвейер запуска матричных ядер OpenCL
//!
//! Выбор устройства, контекст и очередь с профилированием, загрузка буферов,
//! сборка ядра с логом компилятора, двумерный запуск с тайлами, замер
//! времени по событию и чтение результата. Объекты устройства освобождаются
//! в обратном порядке ровно один раз.

pub mod compute;
pub mod config;
pub mod error;
pub mod matrix;
pub mod opencl;
pub mod ops;
pub mod pipeline;
pub mod utils;

// Реэкспортируем макросы на уровень крейта
#[macro_use]
mod macros {
    /// Проверяет код возврата вызова OpenCL
    #[macro_export]
    macro_rules! cl_check {
        ($expr:expr) => {{
            let code: $crate::opencl::types::cl_int = unsafe { $expr };
            if code == $crate::opencl::types::CL_SUCCESS {
                Ok(())
            } else {
                Err($crate::error::ApiError::new(code))
            }
        }};
    }

    /// Вызывает функцию создания объекта OpenCL; код ошибки передается
    /// последним аргументом автоматически
    #[macro_export]
    macro_rules! cl_create {
        ($func:ident($($arg:expr),* $(,)?)) => {{
            let mut code: $crate::opencl::types::cl_int = $crate::opencl::types::CL_SUCCESS;
            let obj = unsafe { $func($($arg,)* &mut code) };
            if code != $crate::opencl::types::CL_SUCCESS {
                Err($crate::error::ApiError::new(code))
            } else if obj.is_null() {
                Err($crate::error::ApiError::new($crate::opencl::types::CL_OUT_OF_RESOURCES))
            } else {
                Ok(obj)
            }
        }};
    }
}

// Реэкспорт основных типов для удобства
pub use compute::{ComputeApi, DeviceClass, HostDevice};
pub use config::PipelineConfig;
pub use error::{ApiError, PipelineError, Result, Stage};
pub use matrix::{Matrix, MatrixType};
pub use ops::{add, copy, multiply, Operation};
pub use pipeline::{run_job, KernelJob, PipelineState, RunOutput, RunReport};

#[cfg(feature = "opencl")]
pub use opencl::OpenClApi;
