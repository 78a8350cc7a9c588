//! Граница между конвейером и реализацией вычислительного API
//!
//! Трейт [`ComputeApi`] повторяет те вызовы OpenCL C, которые нужны
//! конвейеру. Нативная реализация живет в [`crate::opencl`], эмулятор
//! устройства в памяти процесса в [`host`].

pub mod host;

use crate::error::ApiResult;
use crate::opencl::types::*;
use serde::Serialize;
use std::fmt;

pub use host::{Fault, HostDevice, HostDeviceBuilder, HostHandle, Ledger, ResourceKind};

/// Класс запрашиваемого устройства
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Any,
    Gpu,
    Cpu,
}

impl DeviceClass {
    pub fn as_cl(self) -> cl_device_type {
        match self {
            DeviceClass::Any => CL_DEVICE_TYPE_ALL,
            DeviceClass::Gpu => CL_DEVICE_TYPE_GPU,
            DeviceClass::Cpu => CL_DEVICE_TYPE_CPU,
        }
    }

    /// Подходит ли устройство с битовой маской типа `device_type`
    pub fn matches(self, device_type: cl_device_type) -> bool {
        device_type & self.as_cl() != 0
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Any => f.write_str("any"),
            DeviceClass::Gpu => f.write_str("GPU"),
            DeviceClass::Cpu => f.write_str("CPU"),
        }
    }
}

/// Режим доступа ядра к буферу
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl MemAccess {
    pub fn as_cl(self) -> cl_mem_flags {
        match self {
            MemAccess::ReadOnly => CL_MEM_READ_ONLY,
            MemAccess::WriteOnly => CL_MEM_WRITE_ONLY,
            MemAccess::ReadWrite => CL_MEM_READ_WRITE,
        }
    }

    /// Можно ли загружать в буфер данные хоста
    pub fn accepts_host_data(self) -> bool {
        !matches!(self, MemAccess::WriteOnly)
    }
}

/// Значение аргумента ядра
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg<M> {
    Int(i32),
    Mem(M),
    /// Локальная память рабочей группы указанного размера в байтах
    Local(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformInfo {
    pub name: String,
    pub version: String,
}

/// Сведения об устройстве, которые печатают все точки вызова
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub version: String,
    #[serde(skip)]
    pub device_type: cl_device_type,
    pub compute_units: u32,
    pub max_work_group_size: usize,
    pub global_mem_bytes: u64,
}

/// Отметки времени события профилирования, наносекунды устройства
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    pub start: u64,
    pub end: u64,
}

/// Низкоуровневый вычислительный API
///
/// Все вызовы синхронны для хоста, кроме `enqueue_kernel`: ядро ставится в
/// очередь и выполняется устройством независимо от хоста.
pub trait ComputeApi {
    type Platform: Copy + fmt::Debug;
    type Device: Copy + fmt::Debug;
    type Context: Copy + fmt::Debug;
    type Queue: Copy + fmt::Debug;
    type Mem: Copy + fmt::Debug;
    type Program: Copy + fmt::Debug;
    type Kernel: Copy + fmt::Debug;
    type Event: Copy + fmt::Debug;

    /// Устройство эмулируется на хосте; время ядра не отражает реальное железо
    fn is_emulated(&self) -> bool {
        false
    }

    fn platforms(&self) -> ApiResult<Vec<Self::Platform>>;
    fn platform_info(&self, platform: Self::Platform) -> ApiResult<PlatformInfo>;
    fn devices(&self, platform: Self::Platform, class: DeviceClass) -> ApiResult<Vec<Self::Device>>;
    fn device_info(&self, device: Self::Device) -> ApiResult<DeviceInfo>;

    fn create_context(&self, device: Self::Device) -> ApiResult<Self::Context>;
    fn create_queue(
        &self,
        context: Self::Context,
        device: Self::Device,
        profiling: bool,
    ) -> ApiResult<Self::Queue>;

    fn create_buffer(&self, context: Self::Context, access: MemAccess, bytes: usize) -> ApiResult<Self::Mem>;
    /// Блокирующая запись с хоста
    fn write_buffer(&self, queue: Self::Queue, mem: Self::Mem, data: &[f32]) -> ApiResult<()>;
    /// Блокирующее чтение на хост
    fn read_buffer(&self, queue: Self::Queue, mem: Self::Mem, out: &mut [f32]) -> ApiResult<()>;

    fn create_program(&self, context: Self::Context, source: &str) -> ApiResult<Self::Program>;
    fn build_program(&self, program: Self::Program, device: Self::Device, options: &str) -> ApiResult<()>;
    /// Лог сборки, не длиннее `limit` байт
    fn build_log(&self, program: Self::Program, device: Self::Device, limit: usize) -> ApiResult<String>;
    fn create_kernel(&self, program: Self::Program, name: &str) -> ApiResult<Self::Kernel>;
    fn set_kernel_arg(&self, kernel: Self::Kernel, index: u32, arg: KernelArg<Self::Mem>) -> ApiResult<()>;

    fn enqueue_kernel(
        &self,
        queue: Self::Queue,
        kernel: Self::Kernel,
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> ApiResult<Self::Event>;
    fn finish(&self, queue: Self::Queue) -> ApiResult<()>;
    fn wait_for_event(&self, event: Self::Event) -> ApiResult<()>;
    fn event_timestamps(&self, event: Self::Event) -> ApiResult<Timestamps>;

    fn release_event(&self, event: Self::Event) -> ApiResult<()>;
    fn release_kernel(&self, kernel: Self::Kernel) -> ApiResult<()>;
    fn release_program(&self, program: Self::Program) -> ApiResult<()>;
    fn release_mem(&self, mem: Self::Mem) -> ApiResult<()>;
    fn release_queue(&self, queue: Self::Queue) -> ApiResult<()>;
    fn release_context(&self, context: Self::Context) -> ApiResult<()>;
}

/// Делегирует вызовы по ссылке, чтобы владелец устройства мог
/// проверить его состояние после завершения конвейера
impl<T: ComputeApi + ?Sized> ComputeApi for &T {
    type Platform = T::Platform;
    type Device = T::Device;
    type Context = T::Context;
    type Queue = T::Queue;
    type Mem = T::Mem;
    type Program = T::Program;
    type Kernel = T::Kernel;
    type Event = T::Event;

    fn is_emulated(&self) -> bool {
        (**self).is_emulated()
    }
    fn platforms(&self) -> ApiResult<Vec<Self::Platform>> {
        (**self).platforms()
    }
    fn platform_info(&self, platform: Self::Platform) -> ApiResult<PlatformInfo> {
        (**self).platform_info(platform)
    }
    fn devices(&self, platform: Self::Platform, class: DeviceClass) -> ApiResult<Vec<Self::Device>> {
        (**self).devices(platform, class)
    }
    fn device_info(&self, device: Self::Device) -> ApiResult<DeviceInfo> {
        (**self).device_info(device)
    }
    fn create_context(&self, device: Self::Device) -> ApiResult<Self::Context> {
        (**self).create_context(device)
    }
    fn create_queue(
        &self,
        context: Self::Context,
        device: Self::Device,
        profiling: bool,
    ) -> ApiResult<Self::Queue> {
        (**self).create_queue(context, device, profiling)
    }
    fn create_buffer(&self, context: Self::Context, access: MemAccess, bytes: usize) -> ApiResult<Self::Mem> {
        (**self).create_buffer(context, access, bytes)
    }
    fn write_buffer(&self, queue: Self::Queue, mem: Self::Mem, data: &[f32]) -> ApiResult<()> {
        (**self).write_buffer(queue, mem, data)
    }
    fn read_buffer(&self, queue: Self::Queue, mem: Self::Mem, out: &mut [f32]) -> ApiResult<()> {
        (**self).read_buffer(queue, mem, out)
    }
    fn create_program(&self, context: Self::Context, source: &str) -> ApiResult<Self::Program> {
        (**self).create_program(context, source)
    }
    fn build_program(&self, program: Self::Program, device: Self::Device, options: &str) -> ApiResult<()> {
        (**self).build_program(program, device, options)
    }
    fn build_log(&self, program: Self::Program, device: Self::Device, limit: usize) -> ApiResult<String> {
        (**self).build_log(program, device, limit)
    }
    fn create_kernel(&self, program: Self::Program, name: &str) -> ApiResult<Self::Kernel> {
        (**self).create_kernel(program, name)
    }
    fn set_kernel_arg(&self, kernel: Self::Kernel, index: u32, arg: KernelArg<Self::Mem>) -> ApiResult<()> {
        (**self).set_kernel_arg(kernel, index, arg)
    }
    fn enqueue_kernel(
        &self,
        queue: Self::Queue,
        kernel: Self::Kernel,
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> ApiResult<Self::Event> {
        (**self).enqueue_kernel(queue, kernel, global, local)
    }
    fn finish(&self, queue: Self::Queue) -> ApiResult<()> {
        (**self).finish(queue)
    }
    fn wait_for_event(&self, event: Self::Event) -> ApiResult<()> {
        (**self).wait_for_event(event)
    }
    fn event_timestamps(&self, event: Self::Event) -> ApiResult<Timestamps> {
        (**self).event_timestamps(event)
    }
    fn release_event(&self, event: Self::Event) -> ApiResult<()> {
        (**self).release_event(event)
    }
    fn release_kernel(&self, kernel: Self::Kernel) -> ApiResult<()> {
        (**self).release_kernel(kernel)
    }
    fn release_program(&self, program: Self::Program) -> ApiResult<()> {
        (**self).release_program(program)
    }
    fn release_mem(&self, mem: Self::Mem) -> ApiResult<()> {
        (**self).release_mem(mem)
    }
    fn release_queue(&self, queue: Self::Queue) -> ApiResult<()> {
        (**self).release_queue(queue)
    }
    fn release_context(&self, context: Self::Context) -> ApiResult<()> {
        (**self).release_context(context)
    }
}

/// Обрезает лог по границе символа, не превышая `limit` байт
pub(crate) fn truncate_log(mut log: String, limit: usize) -> String {
    if log.len() > limit {
        let mut end = limit;
        while !log.is_char_boundary(end) {
            end -= 1;
        }
        log.truncate(end);
    }
    log
}
