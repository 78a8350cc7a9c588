//! Буферы устройства

use super::context::{log_release, ExecutionContext};
use crate::compute::{ComputeApi, MemAccess};
use crate::error::{ApiError, PipelineError, Result, TransferDirection};
use crate::matrix::Matrix;
use crate::opencl::types::{CL_INVALID_OPERATION, CL_INVALID_VALUE};
use tracing::debug;

/// Буфер под матрицу `rows x cols` на устройстве
///
/// Размер фиксируется при создании. Освобождается ровно один раз при drop.
pub struct DeviceBuffer<'c, A: ComputeApi> {
    ctx: &'c ExecutionContext<A>,
    mem: A::Mem,
    name: String,
    access: MemAccess,
    rows: usize,
    cols: usize,
}

impl<'c, A: ComputeApi> DeviceBuffer<'c, A> {
    /// Выделяет неинициализированный буфер
    pub fn allocate(
        ctx: &'c ExecutionContext<A>,
        name: &str,
        access: MemAccess,
        rows: usize,
        cols: usize,
    ) -> Result<Self> {
        let bytes = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()))
            .filter(|bytes| *bytes > 0)
            .ok_or_else(|| PipelineError::AllocationFailed {
                name: name.to_owned(),
                bytes: 0,
                source: ApiError::new(CL_INVALID_VALUE),
            })?;

        let mem = ctx
            .api()
            .create_buffer(ctx.context(), access, bytes)
            .map_err(|source| PipelineError::AllocationFailed {
                name: name.to_owned(),
                bytes,
                source,
            })?;
        debug!(name, bytes, ?access, ?mem, "буфер выделен");

        Ok(Self {
            ctx,
            mem,
            name: name.to_owned(),
            access,
            rows,
            cols,
        })
    }

    /// Выделяет буфер под матрицу и загружает ее блокирующей записью
    pub fn stage(ctx: &'c ExecutionContext<A>, name: &str, access: MemAccess, host: &Matrix) -> Result<Self> {
        let buffer = Self::allocate(ctx, name, access, host.rows(), host.cols())?;
        buffer.write(host)?;
        Ok(buffer)
    }

    /// Блокирующая запись; по возвращении данные хоста можно менять
    pub fn write(&self, host: &Matrix) -> Result<()> {
        if host.shape() != self.shape() {
            return Err(PipelineError::DimensionMismatch {
                left: format!("buffer '{}' {}x{}", self.name, self.rows, self.cols),
                right: format!("{}x{}", host.rows(), host.cols()),
            });
        }
        if !self.access.accepts_host_data() {
            return Err(self.transfer_error(TransferDirection::HostToDevice, ApiError::new(CL_INVALID_OPERATION)));
        }
        self.ctx
            .api()
            .write_buffer(self.ctx.queue(), self.mem, host.as_slice())
            .map_err(|e| self.transfer_error(TransferDirection::HostToDevice, e))
    }

    /// Блокирующее чтение всего буфера в новую матрицу
    pub fn read(&self) -> Result<Matrix> {
        let mut data = vec![0.0f32; self.rows * self.cols];
        self.ctx
            .api()
            .read_buffer(self.ctx.queue(), self.mem, &mut data)
            .map_err(|e| self.transfer_error(TransferDirection::DeviceToHost, e))?;
        Matrix::from_vec(self.rows, self.cols, data)
    }

    fn transfer_error(&self, direction: TransferDirection, source: ApiError) -> PipelineError {
        PipelineError::TransferFailed {
            name: self.name.clone(),
            direction,
            source,
        }
    }

    pub fn mem(&self) -> A::Mem {
        self.mem
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self) -> MemAccess {
        self.access
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn byte_len(&self) -> usize {
        self.rows * self.cols * std::mem::size_of::<f32>()
    }
}

impl<A: ComputeApi> Drop for DeviceBuffer<'_, A> {
    fn drop(&mut self) {
        log_release(&format!("buffer '{}'", self.name), self.ctx.api().release_mem(self.mem));
    }
}

/// Входные буферы; освобождаются в порядке, обратном созданию
pub struct StagedBuffers<'c, A: ComputeApi> {
    buffers: Vec<DeviceBuffer<'c, A>>,
}

impl<'c, A: ComputeApi> StagedBuffers<'c, A> {
    pub fn new() -> Self {
        Self { buffers: Vec::new() }
    }

    pub fn push(&mut self, buffer: DeviceBuffer<'c, A>) {
        self.buffers.push(buffer);
    }

    pub fn get(&self, index: usize) -> Option<&DeviceBuffer<'c, A>> {
        self.buffers.get(index)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl<A: ComputeApi> Default for StagedBuffers<'_, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ComputeApi> Drop for StagedBuffers<'_, A> {
    fn drop(&mut self) {
        while let Some(buffer) = self.buffers.pop() {
            drop(buffer);
        }
    }
}
