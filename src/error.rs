//! Ошибки конвейера

use crate::compute::DeviceClass;
use crate::opencl::types::cl_int;
use crate::opencl::utils::error_name;
use std::fmt;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Код возврата вызова OpenCL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiError {
    pub code: cl_int,
}

impl ApiError {
    pub const fn new(code: cl_int) -> Self {
        Self { code }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", error_name(self.code), self.code)
    }
}

impl std::error::Error for ApiError {}

/// Результат отдельного вызова API
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Этап конвейера; ошибка всегда привязана к этапу, на котором она возникла
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Discovery,
    Context,
    Staging,
    Build,
    Binding,
    Dispatch,
    Sync,
    Profiling,
    Retrieval,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validation => "validation",
            Stage::Discovery => "device discovery",
            Stage::Context => "context setup",
            Stage::Staging => "buffer staging",
            Stage::Build => "program build",
            Stage::Binding => "argument binding",
            Stage::Dispatch => "dispatch",
            Stage::Sync => "synchronization",
            Stage::Profiling => "profiling",
            Stage::Retrieval => "retrieval",
        };
        f.write_str(name)
    }
}

/// Направление блокирующего копирования
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::HostToDevice => f.write_str("host-to-device"),
            TransferDirection::DeviceToHost => f.write_str("device-to-host"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no OpenCL platform found")]
    NoPlatformFound,

    #[error("no {class} device found on platform")]
    NoDeviceFound { class: DeviceClass },

    #[error("failed to create context: {0}")]
    ContextCreationFailed(#[source] ApiError),

    #[error("failed to create command queue: {0}")]
    QueueCreationFailed(#[source] ApiError),

    #[error("failed to allocate {bytes}-byte buffer '{name}': {source}")]
    AllocationFailed {
        name: String,
        bytes: usize,
        source: ApiError,
    },

    #[error("{direction} transfer of buffer '{name}' failed: {source}")]
    TransferFailed {
        name: String,
        direction: TransferDirection,
        source: ApiError,
    },

    #[error("kernel build failed with {code}:\n{log}")]
    BuildFailed { code: ApiError, log: String },

    #[error("kernel entry point '{name}' not found: {source}")]
    EntryPointNotFound { name: String, source: ApiError },

    #[error("failed to bind kernel argument {index}: {reason}")]
    ArgumentBindFailed { index: u32, reason: String },

    #[error("dispatch failed: {reason}")]
    DispatchFailed {
        reason: String,
        source: Option<ApiError>,
    },

    #[error("failed to wait for kernel completion: {0}")]
    SyncFailed(#[source] ApiError),

    #[error("profiling info unavailable: {0}")]
    ProfilingUnavailable(#[source] ApiError),

    #[error("dimension mismatch: {left} x {right}")]
    DimensionMismatch { left: String, right: String },

    #[error("invalid matrix: {0}")]
    InvalidMatrix(String),
}

impl PipelineError {
    pub fn dispatch<S: Into<String>>(reason: S) -> Self {
        PipelineError::DispatchFailed {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn invalid_matrix<S: Into<String>>(msg: S) -> Self {
        PipelineError::InvalidMatrix(msg.into())
    }

    /// Этап, на котором произошла ошибка
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::NoPlatformFound | PipelineError::NoDeviceFound { .. } => Stage::Discovery,
            PipelineError::ContextCreationFailed(_) | PipelineError::QueueCreationFailed(_) => {
                Stage::Context
            }
            PipelineError::AllocationFailed { .. } => Stage::Staging,
            PipelineError::TransferFailed { direction, .. } => match direction {
                TransferDirection::HostToDevice => Stage::Staging,
                TransferDirection::DeviceToHost => Stage::Retrieval,
            },
            PipelineError::BuildFailed { .. } | PipelineError::EntryPointNotFound { .. } => {
                Stage::Build
            }
            PipelineError::ArgumentBindFailed { .. } => Stage::Binding,
            PipelineError::DispatchFailed { .. } => Stage::Dispatch,
            PipelineError::SyncFailed(_) => Stage::Sync,
            PipelineError::ProfilingUnavailable(_) => Stage::Profiling,
            PipelineError::DimensionMismatch { .. } | PipelineError::InvalidMatrix(_) => {
                Stage::Validation
            }
        }
    }

    /// Код завершения процесса; у каждого этапа свой
    pub fn exit_code(&self) -> u8 {
        match self.stage() {
            Stage::Validation => 2,
            Stage::Discovery => 3,
            Stage::Context => 4,
            Stage::Staging => 5,
            Stage::Build => 6,
            Stage::Binding => 7,
            Stage::Dispatch => 8,
            Stage::Sync => 9,
            Stage::Profiling => 10,
            Stage::Retrieval => 11,
        }
    }

    /// Лог компилятора, если ошибка произошла при сборке
    pub fn build_log(&self) -> Option<&str> {
        match self {
            PipelineError::BuildFailed { log, .. } => Some(log),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opencl::types::*;

    #[test]
    fn api_error_display_includes_symbolic_name() {
        let err = ApiError::new(CL_INVALID_WORK_GROUP_SIZE);
        assert_eq!(err.to_string(), "CL_INVALID_WORK_GROUP_SIZE (-54)");
    }

    #[test]
    fn build_failure_carries_log() {
        let err = PipelineError::BuildFailed {
            code: ApiError::new(CL_BUILD_PROGRAM_FAILURE),
            log: "1:5: error: expected ';'".into(),
        };
        assert_eq!(err.stage(), Stage::Build);
        assert_eq!(err.build_log(), Some("1:5: error: expected ';'"));
        assert!(err.to_string().contains("expected ';'"));
    }

    #[test]
    fn read_back_failure_is_a_retrieval_failure() {
        let staging = PipelineError::TransferFailed {
            name: "a".into(),
            direction: TransferDirection::HostToDevice,
            source: ApiError::new(CL_OUT_OF_RESOURCES),
        };
        let retrieval = PipelineError::TransferFailed {
            name: "c".into(),
            direction: TransferDirection::DeviceToHost,
            source: ApiError::new(CL_OUT_OF_RESOURCES),
        };
        assert_eq!(staging.stage(), Stage::Staging);
        assert_eq!(retrieval.stage(), Stage::Retrieval);
        assert_ne!(staging.exit_code(), retrieval.exit_code());
    }
}
