//! Модуль для работы с OpenCL
//!
//! Содержит низкоуровневые привязки и нативный бэкенд поверх них.
//! Привязки линкуются с libOpenCL только при включенной фиче `opencl`.

pub mod types;
pub mod utils;

#[cfg(feature = "opencl")]
pub mod bindings;
#[cfg(feature = "opencl")]
pub mod callbacks;
#[cfg(feature = "opencl")]
mod native;

#[cfg(feature = "opencl")]
pub use native::OpenClApi;
