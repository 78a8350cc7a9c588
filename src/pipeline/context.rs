//! Контекст выполнения: контекст устройства и очередь команд

use super::device::{DeviceDescription, DeviceSelection};
use crate::compute::{ComputeApi, DeviceInfo};
use crate::error::{ApiResult, PipelineError, Result};
use tracing::{debug, warn};

/// Логирует неудачное освобождение; паники при очистке недопустимы
pub(crate) fn log_release(what: &str, result: ApiResult<()>) {
    match result {
        Ok(()) => debug!("{} released", what),
        Err(e) => warn!("failed to release {}: {}", what, e),
    }
}

/// Контекст устройства; освобождается последним
struct ContextHandle<A: ComputeApi> {
    api: A,
    context: A::Context,
}

impl<A: ComputeApi> Drop for ContextHandle<A> {
    fn drop(&mut self) {
        log_release("context", self.api.release_context(self.context));
    }
}

/// Контекст и упорядоченная очередь с профилированием
///
/// Буферы, программы, ядра и события заимствуют контекст, поэтому не могут
/// его пережить. Очередь освобождается до контекста.
pub struct ExecutionContext<A: ComputeApi> {
    queue: A::Queue,
    device: A::Device,
    description: DeviceDescription,
    profiling: bool,
    inner: ContextHandle<A>,
}

impl<A: ComputeApi> ExecutionContext<A> {
    pub fn create(api: A, selection: &DeviceSelection<A>, profiling: bool) -> Result<Self> {
        let context = api
            .create_context(selection.device)
            .map_err(PipelineError::ContextCreationFailed)?;
        let inner = ContextHandle { api, context };

        // При ошибке inner освобождает уже созданный контекст
        let queue = inner
            .api
            .create_queue(context, selection.device, profiling)
            .map_err(PipelineError::QueueCreationFailed)?;
        debug!(?context, ?queue, profiling, "контекст и очередь созданы");

        Ok(Self {
            queue,
            device: selection.device,
            description: selection.description.clone(),
            profiling,
            inner,
        })
    }

    pub fn api(&self) -> &A {
        &self.inner.api
    }

    pub fn context(&self) -> A::Context {
        self.inner.context
    }

    pub fn queue(&self) -> A::Queue {
        self.queue
    }

    pub fn device(&self) -> A::Device {
        self.device
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.description.device
    }

    /// Платформа и устройство, на которых создан контекст
    pub fn device_description(&self) -> &DeviceDescription {
        &self.description
    }

    pub fn max_work_group_size(&self) -> usize {
        self.description.device.max_work_group_size
    }

    pub fn profiling(&self) -> bool {
        self.profiling
    }
}

impl<A: ComputeApi> Drop for ExecutionContext<A> {
    fn drop(&mut self) {
        log_release("command queue", self.inner.api.release_queue(self.queue));
    }
}
