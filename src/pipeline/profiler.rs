//! Синхронизация, профилирование и чтение результата

use super::buffer::DeviceBuffer;
use super::context::{log_release, ExecutionContext};
use crate::compute::ComputeApi;
use crate::error::{ApiError, PipelineError, Result};
use crate::matrix::Matrix;
use crate::opencl::types::CL_PROFILING_INFO_NOT_AVAILABLE;
use serde::Serialize;
use tracing::debug;

struct EventHandle<'c, A: ComputeApi> {
    ctx: &'c ExecutionContext<A>,
    event: A::Event,
}

impl<A: ComputeApi> Drop for EventHandle<'_, A> {
    fn drop(&mut self) {
        log_release("event", self.ctx.api().release_event(self.event));
    }
}

/// Событие поставленного в очередь ядра
pub struct ProfilingEvent<'c, A: ComputeApi> {
    handle: EventHandle<'c, A>,
}

impl<'c, A: ComputeApi> ProfilingEvent<'c, A> {
    pub(crate) fn new(ctx: &'c ExecutionContext<A>, event: A::Event) -> Self {
        Self {
            handle: EventHandle { ctx, event },
        }
    }

    /// Единственная точка блокировки: завершение очереди и ожидание события
    pub fn synchronize(self) -> Result<CompletedEvent<'c, A>> {
        let EventHandle { ctx, event } = &self.handle;
        ctx.api().finish(ctx.queue()).map_err(PipelineError::SyncFailed)?;
        ctx.api().wait_for_event(*event).map_err(PipelineError::SyncFailed)?;
        Ok(CompletedEvent { handle: self.handle })
    }
}

/// Событие завершенного ядра
pub struct CompletedEvent<'c, A: ComputeApi> {
    handle: EventHandle<'c, A>,
}

impl<A: ComputeApi> CompletedEvent<'_, A> {
    /// Отметки начала и конца выполнения ядра
    pub fn timing(&self) -> Result<KernelTiming> {
        let EventHandle { ctx, event } = &self.handle;
        let stamps = ctx
            .api()
            .event_timestamps(*event)
            .map_err(PipelineError::ProfilingUnavailable)?;
        if stamps.end < stamps.start {
            return Err(PipelineError::ProfilingUnavailable(ApiError::new(
                CL_PROFILING_INFO_NOT_AVAILABLE,
            )));
        }
        let timing = KernelTiming {
            start_ns: stamps.start,
            end_ns: stamps.end,
        };
        debug!(elapsed_ms = timing.elapsed_ms(), "время выполнения ядра");
        Ok(timing)
    }
}

/// Время выполнения ядра по часам устройства
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KernelTiming {
    pub start_ns: u64,
    pub end_ns: u64,
}

impl KernelTiming {
    /// Конец раньше начала дает ноль
    pub fn elapsed_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ns() as f64 / 1e6
    }
}

/// Блокирующее чтение буфера результата в матрицу хоста
pub fn retrieve<A: ComputeApi>(buffer: &DeviceBuffer<'_, A>) -> Result<Matrix> {
    buffer.read()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn elapsed_is_converted_to_milliseconds() {
        let timing = KernelTiming {
            start_ns: 1_000,
            end_ns: 2_501_000,
        };
        assert_eq!(timing.elapsed_ns(), 2_500_000);
        assert_relative_eq!(timing.elapsed_ms(), 2.5);
    }

    #[test]
    fn reversed_timestamps_do_not_underflow() {
        let timing = KernelTiming {
            start_ns: 5_000,
            end_ns: 4_000,
        };
        assert_eq!(timing.elapsed_ns(), 0);
        assert_relative_eq!(timing.elapsed_ms(), 0.0);
    }
}
