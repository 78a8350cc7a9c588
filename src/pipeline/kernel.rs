//! Привязка аргументов и постановка ядра в очередь

use super::buffer::DeviceBuffer;
use super::context::log_release;
use super::dispatch::DispatchDescriptor;
use super::profiler::ProfilingEvent;
use super::program::CompiledProgram;
use crate::compute::{ComputeApi, KernelArg};
use crate::error::{PipelineError, Result};
use tracing::debug;

/// Аргумент ядра на стороне хоста
pub enum Arg<'k, A: ComputeApi> {
    Int(i32),
    Buffer(&'k DeviceBuffer<'k, A>),
    /// Локальная память рабочей группы, байт
    Local(usize),
}

impl<A: ComputeApi> Clone for Arg<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: ComputeApi> Copy for Arg<'_, A> {}

impl<A: ComputeApi> Arg<'_, A> {
    fn to_api(self) -> KernelArg<A::Mem> {
        match self {
            Arg::Int(v) => KernelArg::Int(v),
            Arg::Buffer(buffer) => KernelArg::Mem(buffer.mem()),
            Arg::Local(bytes) => KernelArg::Local(bytes),
        }
    }
}

/// Ядро с упорядоченными слотами аргументов
///
/// Заимствует программу и привязанные буферы, поэтому освобождается раньше них.
pub struct Kernel<'k, A: ComputeApi> {
    program: &'k CompiledProgram<'k, A>,
    kernel: A::Kernel,
    name: String,
    slots: Vec<Option<Arg<'k, A>>>,
}

impl<'k, A: ComputeApi> Kernel<'k, A> {
    pub(crate) fn new(program: &'k CompiledProgram<'k, A>, kernel: A::Kernel, name: &str, arity: usize) -> Self {
        Self {
            program,
            kernel,
            name: name.to_owned(),
            slots: (0..arity).map(|_| None).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    /// Привязывает аргумент к слоту `index`
    pub fn bind(&mut self, index: u32, arg: Arg<'k, A>) -> Result<()> {
        let arity = self.slots.len();
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or_else(|| PipelineError::ArgumentBindFailed {
                index,
                reason: format!("kernel '{}' takes {} arguments", self.name, arity),
            })?;

        self.program
            .context()
            .api()
            .set_kernel_arg(self.kernel, index, arg.to_api())
            .map_err(|e| PipelineError::ArgumentBindFailed {
                index,
                reason: e.to_string(),
            })?;
        *slot = Some(arg);
        Ok(())
    }

    /// Привязывает аргументы по порядку объявления
    pub fn bind_all<I>(&mut self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = Arg<'k, A>>,
    {
        for (index, arg) in args.into_iter().enumerate() {
            self.bind(index as u32, arg)?;
        }
        Ok(())
    }

    /// Ставит ядро в очередь и сразу возвращает событие завершения
    pub fn dispatch(&self, descriptor: &DispatchDescriptor) -> Result<ProfilingEvent<'k, A>> {
        if let Some(index) = self.slots.iter().position(Option::is_none) {
            return Err(PipelineError::ArgumentBindFailed {
                index: index as u32,
                reason: format!("argument of kernel '{}' is not bound", self.name),
            });
        }
        let ctx = self.program.context();
        descriptor.check_limits(ctx.max_work_group_size())?;

        debug!(
            kernel = %self.name,
            global = ?descriptor.global(),
            local = ?descriptor.local(),
            "постановка ядра в очередь"
        );
        let event = ctx
            .api()
            .enqueue_kernel(ctx.queue(), self.kernel, descriptor.global(), descriptor.local())
            .map_err(|e| PipelineError::DispatchFailed {
                reason: format!("device rejected kernel '{}'", self.name),
                source: Some(e),
            })?;
        Ok(ProfilingEvent::new(ctx, event))
    }
}

impl<A: ComputeApi> Drop for Kernel<'_, A> {
    fn drop(&mut self) {
        log_release(
            &format!("kernel '{}'", self.name),
            self.program.context().api().release_kernel(self.kernel),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{DeviceClass, HostDevice, MemAccess, ResourceKind};
    use crate::matrix::kernels::{COPY_MATRIX_ENTRY, COPY_MATRIX_KERNEL};
    use crate::matrix::Matrix;
    use crate::pipeline::context::ExecutionContext;
    use crate::pipeline::device::select_device;

    fn context(device: &HostDevice) -> ExecutionContext<&HostDevice> {
        let selection = select_device(&device, DeviceClass::Any).unwrap();
        ExecutionContext::create(device, &selection, true).unwrap()
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let device = HostDevice::new();
        let ctx = context(&device);
        let program = CompiledProgram::build(&ctx, COPY_MATRIX_KERNEL, "").unwrap();
        let mut kernel = program.kernel(COPY_MATRIX_ENTRY, 2).unwrap();
        let err = kernel.bind(2, Arg::Int(1)).unwrap_err();
        assert!(matches!(err, PipelineError::ArgumentBindFailed { index: 2, .. }));
    }

    #[test]
    fn wrong_kind_is_rejected_by_device() {
        let device = HostDevice::new();
        let ctx = context(&device);
        let program = CompiledProgram::build(&ctx, COPY_MATRIX_KERNEL, "").unwrap();
        let mut kernel = program.kernel(COPY_MATRIX_ENTRY, 2).unwrap();
        let err = kernel.bind(0, Arg::Int(7)).unwrap_err();
        assert!(matches!(err, PipelineError::ArgumentBindFailed { index: 0, .. }));
    }

    #[test]
    fn unbound_slot_blocks_dispatch() {
        let device = HostDevice::new();
        let ctx = context(&device);
        let src = DeviceBuffer::stage(&ctx, "src", MemAccess::ReadOnly, &Matrix::zeros(2, 2).unwrap()).unwrap();
        let program = CompiledProgram::build(&ctx, COPY_MATRIX_KERNEL, "").unwrap();
        let mut kernel = program.kernel(COPY_MATRIX_ENTRY, 2).unwrap();
        kernel.bind(0, Arg::Buffer(&src)).unwrap();

        let descriptor = DispatchDescriptor::for_output(2, 2, None).unwrap();
        let err = kernel.dispatch(&descriptor).err().unwrap();
        assert!(matches!(err, PipelineError::ArgumentBindFailed { index: 1, .. }));
        assert_eq!(device.ledger().count_created(ResourceKind::Event), 0);
    }

    #[test]
    fn oversized_tile_is_rejected_before_enqueue() {
        let device = HostDevice::builder().max_work_group_size(16).cpu("small").build();
        let ctx = context(&device);
        let m = Matrix::zeros(8, 8).unwrap();
        let src = DeviceBuffer::stage(&ctx, "src", MemAccess::ReadOnly, &m).unwrap();
        let dst = DeviceBuffer::allocate(&ctx, "dst", MemAccess::WriteOnly, 8, 8).unwrap();
        let program = CompiledProgram::build(&ctx, COPY_MATRIX_KERNEL, "").unwrap();
        let mut kernel = program.kernel(COPY_MATRIX_ENTRY, 2).unwrap();
        kernel.bind_all([Arg::Buffer(&src), Arg::Buffer(&dst)]).unwrap();

        let descriptor = DispatchDescriptor::for_output(8, 8, Some((8, 8))).unwrap();
        let err = kernel.dispatch(&descriptor).err().unwrap();
        assert!(matches!(err, PipelineError::DispatchFailed { .. }));
    }
}
