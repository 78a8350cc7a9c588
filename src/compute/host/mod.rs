//! Эмулятор OpenCL-устройства в памяти процесса
//!
//! Ведет себя как драйвер с одной платформой: проверяет дескрипторы,
//! собирает программы (см. [`compiler`]), исполняет встроенные ядра по
//! двумерному пространству индексов и ставит отметки времени на события.
//! Все создания и освобождения объектов записываются в [`Ledger`], что
//! позволяет проверять порядок и однократность освобождения без GPU.

mod compiler;
mod kernels;

use super::{truncate_log, ComputeApi, DeviceClass, DeviceInfo, KernelArg, MemAccess, PlatformInfo, Timestamps};
use crate::error::{ApiError, ApiResult};
use crate::opencl::types::*;
use compiler::KernelDecl;
use kernels::{ArgValue, DeviceMemory, Launch, ParamKind};
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Instant;

/// Дескриптор объекта эмулятора
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Context,
    Queue,
    Mem,
    Program,
    Kernel,
    Event,
}

/// Внедряемые отказы
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    ContextCreation,
    QueueCreation,
    /// Отказ выделения памяти после `after` успешных выделений
    Allocation { after: usize },
    /// Отказ записи на устройство после `after` успешных записей
    Write { after: usize },
    Read,
    Finish,
}

/// Журнал создания и освобождения объектов
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    created: Vec<(ResourceKind, HostHandle)>,
    released: Vec<(ResourceKind, HostHandle)>,
    invalid_releases: Vec<(ResourceKind, HostHandle)>,
}

impl Ledger {
    pub fn created(&self) -> &[(ResourceKind, HostHandle)] {
        &self.created
    }

    /// Освобождения в порядке их выполнения
    pub fn released(&self) -> &[(ResourceKind, HostHandle)] {
        &self.released
    }

    pub fn released_kinds(&self) -> Vec<ResourceKind> {
        self.released.iter().map(|(kind, _)| *kind).collect()
    }

    /// Объекты, созданные и еще не освобожденные
    pub fn live(&self) -> Vec<(ResourceKind, HostHandle)> {
        self.created
            .iter()
            .filter(|entry| !self.released.contains(entry))
            .copied()
            .collect()
    }

    /// Повторные освобождения и освобождения неизвестных дескрипторов
    pub fn invalid_releases(&self) -> &[(ResourceKind, HostHandle)] {
        &self.invalid_releases
    }

    /// Все созданное освобождено, и ровно один раз
    pub fn is_balanced(&self) -> bool {
        self.live().is_empty() && self.invalid_releases.is_empty()
    }

    pub fn count_created(&self, kind: ResourceKind) -> usize {
        self.created.iter().filter(|(k, _)| *k == kind).count()
    }
}

struct HostDeviceSpec {
    name: String,
    device_type: cl_device_type,
    compute_units: u32,
    max_work_group_size: usize,
    global_mem_bytes: u64,
}

/// Индексы в `HostDevice::devices` хранятся вместе с объектами, чтобы
/// лимиты брались с устройства, которому объект принадлежит
struct Queue {
    device: usize,
    profiling: bool,
}

struct Buffer {
    device: usize,
    data: Vec<f32>,
}

enum BuildState {
    Source,
    Built(Vec<KernelDecl>),
    Failed(String),
}

struct Program {
    source: String,
    state: BuildState,
}

struct Kernel {
    builtin: &'static kernels::Builtin,
    params: Vec<ParamKind>,
    args: Vec<Option<ArgValue>>,
}

struct Event {
    timestamps: Timestamps,
    profiling: bool,
}

#[derive(Default)]
struct State {
    next_id: u64,
    clock_ns: u64,
    allocations: usize,
    writes: usize,
    contexts: HashMap<u64, usize>,
    queues: HashMap<u64, Queue>,
    buffers: HashMap<u64, Buffer>,
    programs: HashMap<u64, Program>,
    kernels: HashMap<u64, Kernel>,
    events: HashMap<u64, Event>,
    ledger: Ledger,
}

impl State {
    fn allocate_id(&mut self, kind: ResourceKind) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.ledger.created.push((kind, HostHandle(id)));
        id
    }

    fn record_release(&mut self, kind: ResourceKind, handle: HostHandle, existed: bool) -> ApiResult<()> {
        if existed {
            self.ledger.released.push((kind, handle));
            Ok(())
        } else {
            self.ledger.invalid_releases.push((kind, handle));
            let code = match kind {
                ResourceKind::Context => CL_INVALID_CONTEXT,
                ResourceKind::Queue => CL_INVALID_COMMAND_QUEUE,
                ResourceKind::Mem => CL_INVALID_MEM_OBJECT,
                ResourceKind::Program => CL_INVALID_PROGRAM,
                ResourceKind::Kernel => CL_INVALID_KERNEL,
                ResourceKind::Event => CL_INVALID_EVENT,
            };
            Err(ApiError::new(code))
        }
    }
}

impl DeviceMemory for HashMap<u64, Buffer> {
    fn load(&self, mem: u64) -> ApiResult<&[f32]> {
        self.get(&mem)
            .map(|b| b.data.as_slice())
            .ok_or(ApiError::new(CL_INVALID_MEM_OBJECT))
    }

    fn store(&mut self, mem: u64) -> ApiResult<&mut [f32]> {
        self.get_mut(&mem)
            .map(|b| b.data.as_mut_slice())
            .ok_or(ApiError::new(CL_INVALID_MEM_OBJECT))
    }
}

const PLATFORM: HostHandle = HostHandle(0);

/// Эмулируемое устройство
pub struct HostDevice {
    platform_name: Option<String>,
    devices: Vec<HostDeviceSpec>,
    faults: Vec<Fault>,
    started: Instant,
    state: RefCell<State>,
}

impl Default for HostDevice {
    fn default() -> Self {
        HostDevice::builder().build()
    }
}

impl HostDevice {
    /// Платформа с одним CPU-устройством
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> HostDeviceBuilder {
        HostDeviceBuilder::default()
    }

    /// Снимок журнала объектов
    pub fn ledger(&self) -> Ledger {
        self.state.borrow().ledger.clone()
    }

    fn has_fault(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }

    fn device_index(&self, device: HostHandle) -> ApiResult<usize> {
        let index = device.0.checked_sub(1).ok_or(ApiError::new(CL_INVALID_DEVICE))? as usize;
        if index < self.devices.len() {
            Ok(index)
        } else {
            Err(ApiError::new(CL_INVALID_DEVICE))
        }
    }

    /// Устройство, на котором создан контекст
    fn context_device(state: &State, context: HostHandle) -> ApiResult<usize> {
        state
            .contexts
            .get(&context.0)
            .copied()
            .ok_or(ApiError::new(CL_INVALID_CONTEXT))
    }

    fn check_queue(state: &State, queue: HostHandle) -> ApiResult<&Queue> {
        state
            .queues
            .get(&queue.0)
            .ok_or(ApiError::new(CL_INVALID_COMMAND_QUEUE))
    }

    /// Текущее время устройства; монотонно для каждого события
    fn tick(&self, state: &mut State) -> u64 {
        let now = self.started.elapsed().as_nanos() as u64;
        state.clock_ns = state.clock_ns.max(now) + 1;
        state.clock_ns
    }
}

/// Построитель эмулятора
pub struct HostDeviceBuilder {
    platform_name: Option<String>,
    devices: Vec<HostDeviceSpec>,
    faults: Vec<Fault>,
    max_work_group_size: usize,
    global_mem_bytes: u64,
}

impl Default for HostDeviceBuilder {
    fn default() -> Self {
        Self {
            platform_name: Some("Host OpenCL Emulation".into()),
            devices: Vec::new(),
            faults: Vec::new(),
            max_work_group_size: 256,
            global_mem_bytes: 256 * 1024 * 1024,
        }
    }
}

impl HostDeviceBuilder {
    /// Платформ нет вовсе
    pub fn without_platform(mut self) -> Self {
        self.platform_name = None;
        self
    }

    pub fn cpu(self, name: &str) -> Self {
        self.device(name, CL_DEVICE_TYPE_CPU)
    }

    pub fn gpu(self, name: &str) -> Self {
        self.device(name, CL_DEVICE_TYPE_GPU)
    }

    fn device(mut self, name: &str, device_type: cl_device_type) -> Self {
        self.devices.push(HostDeviceSpec {
            name: name.into(),
            device_type,
            compute_units: 4,
            max_work_group_size: self.max_work_group_size,
            global_mem_bytes: self.global_mem_bytes,
        });
        self
    }

    /// Действует на устройства, добавленные после вызова
    pub fn max_work_group_size(mut self, size: usize) -> Self {
        self.max_work_group_size = size;
        self
    }

    /// Действует на устройства, добавленные после вызова
    pub fn global_mem_bytes(mut self, bytes: u64) -> Self {
        self.global_mem_bytes = bytes;
        self
    }

    pub fn fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn build(mut self) -> HostDevice {
        if self.devices.is_empty() && self.platform_name.is_some() {
            self = self.cpu("Host CPU");
        }
        HostDevice {
            platform_name: self.platform_name,
            devices: self.devices,
            faults: self.faults,
            started: Instant::now(),
            state: RefCell::new(State::default()),
        }
    }
}

impl ComputeApi for HostDevice {
    type Platform = HostHandle;
    type Device = HostHandle;
    type Context = HostHandle;
    type Queue = HostHandle;
    type Mem = HostHandle;
    type Program = HostHandle;
    type Kernel = HostHandle;
    type Event = HostHandle;

    fn is_emulated(&self) -> bool {
        true
    }

    fn platforms(&self) -> ApiResult<Vec<HostHandle>> {
        match self.platform_name {
            Some(_) => Ok(vec![PLATFORM]),
            None => Err(ApiError::new(CL_PLATFORM_NOT_FOUND_KHR)),
        }
    }

    fn platform_info(&self, platform: HostHandle) -> ApiResult<PlatformInfo> {
        match (&self.platform_name, platform) {
            (Some(name), PLATFORM) => Ok(PlatformInfo {
                name: name.clone(),
                version: "OpenCL 1.2 host".into(),
            }),
            _ => Err(ApiError::new(CL_INVALID_PLATFORM)),
        }
    }

    fn devices(&self, platform: HostHandle, class: DeviceClass) -> ApiResult<Vec<HostHandle>> {
        if self.platform_name.is_none() || platform != PLATFORM {
            return Err(ApiError::new(CL_INVALID_PLATFORM));
        }
        let found: Vec<HostHandle> = self
            .devices
            .iter()
            .enumerate()
            .filter(|(_, spec)| class.matches(spec.device_type))
            .map(|(i, _)| HostHandle(i as u64 + 1))
            .collect();
        if found.is_empty() {
            return Err(ApiError::new(CL_DEVICE_NOT_FOUND));
        }
        Ok(found)
    }

    fn device_info(&self, device: HostHandle) -> ApiResult<DeviceInfo> {
        let spec = &self.devices[self.device_index(device)?];
        Ok(DeviceInfo {
            name: spec.name.clone(),
            version: "OpenCL 1.2 host".into(),
            device_type: spec.device_type,
            compute_units: spec.compute_units,
            max_work_group_size: spec.max_work_group_size,
            global_mem_bytes: spec.global_mem_bytes,
        })
    }

    fn create_context(&self, device: HostHandle) -> ApiResult<HostHandle> {
        let index = self.device_index(device)?;
        if self.has_fault(Fault::ContextCreation) {
            return Err(ApiError::new(CL_DEVICE_NOT_AVAILABLE));
        }
        let mut state = self.state.borrow_mut();
        let id = state.allocate_id(ResourceKind::Context);
        state.contexts.insert(id, index);
        Ok(HostHandle(id))
    }

    fn create_queue(&self, context: HostHandle, device: HostHandle, profiling: bool) -> ApiResult<HostHandle> {
        let index = self.device_index(device)?;
        let mut state = self.state.borrow_mut();
        if Self::context_device(&state, context)? != index {
            return Err(ApiError::new(CL_INVALID_DEVICE));
        }
        if self.has_fault(Fault::QueueCreation) {
            return Err(ApiError::new(CL_INVALID_QUEUE_PROPERTIES));
        }
        let id = state.allocate_id(ResourceKind::Queue);
        state.queues.insert(id, Queue { device: index, profiling });
        Ok(HostHandle(id))
    }

    fn create_buffer(&self, context: HostHandle, _access: MemAccess, bytes: usize) -> ApiResult<HostHandle> {
        let mut state = self.state.borrow_mut();
        let device = Self::context_device(&state, context)?;
        if bytes == 0 {
            return Err(ApiError::new(CL_INVALID_BUFFER_SIZE));
        }
        let limit = self.devices[device].global_mem_bytes;
        if bytes as u64 > limit {
            return Err(ApiError::new(CL_INVALID_BUFFER_SIZE));
        }
        let in_use: usize = state
            .buffers
            .values()
            .filter(|b| b.device == device)
            .map(|b| b.data.len() * std::mem::size_of::<f32>())
            .sum();
        if (in_use + bytes) as u64 > limit {
            return Err(ApiError::new(CL_MEM_OBJECT_ALLOCATION_FAILURE));
        }
        let failing = self.faults.iter().any(|f| {
            matches!(f, Fault::Allocation { after } if state.allocations >= *after)
        });
        if failing {
            return Err(ApiError::new(CL_MEM_OBJECT_ALLOCATION_FAILURE));
        }
        state.allocations += 1;

        let id = state.allocate_id(ResourceKind::Mem);
        let len = bytes.div_ceil(std::mem::size_of::<f32>());
        state.buffers.insert(
            id,
            Buffer {
                device,
                data: vec![0.0; len],
            },
        );
        Ok(HostHandle(id))
    }

    fn write_buffer(&self, queue: HostHandle, mem: HostHandle, data: &[f32]) -> ApiResult<()> {
        let mut state = self.state.borrow_mut();
        Self::check_queue(&state, queue)?;
        let failing = self.faults.iter().any(|f| {
            matches!(f, Fault::Write { after } if state.writes >= *after)
        });
        if failing {
            return Err(ApiError::new(CL_OUT_OF_RESOURCES));
        }
        state.writes += 1;

        let buffer = state.buffers.get_mut(&mem.0).ok_or(ApiError::new(CL_INVALID_MEM_OBJECT))?;
        if data.len() > buffer.data.len() {
            return Err(ApiError::new(CL_INVALID_VALUE));
        }
        buffer.data[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, queue: HostHandle, mem: HostHandle, out: &mut [f32]) -> ApiResult<()> {
        let state = self.state.borrow();
        Self::check_queue(&state, queue)?;
        if self.has_fault(Fault::Read) {
            return Err(ApiError::new(CL_OUT_OF_RESOURCES));
        }
        let buffer = state.buffers.get(&mem.0).ok_or(ApiError::new(CL_INVALID_MEM_OBJECT))?;
        if out.len() > buffer.data.len() {
            return Err(ApiError::new(CL_INVALID_VALUE));
        }
        out.copy_from_slice(&buffer.data[..out.len()]);
        Ok(())
    }

    fn create_program(&self, context: HostHandle, source: &str) -> ApiResult<HostHandle> {
        let mut state = self.state.borrow_mut();
        Self::context_device(&state, context)?;
        if source.is_empty() {
            return Err(ApiError::new(CL_INVALID_VALUE));
        }
        let id = state.allocate_id(ResourceKind::Program);
        state.programs.insert(
            id,
            Program {
                source: source.to_owned(),
                state: BuildState::Source,
            },
        );
        Ok(HostHandle(id))
    }

    fn build_program(&self, program: HostHandle, device: HostHandle, options: &str) -> ApiResult<()> {
        self.device_index(device)?;
        let mut state = self.state.borrow_mut();
        let program = state.programs.get_mut(&program.0).ok_or(ApiError::new(CL_INVALID_PROGRAM))?;

        if let Some(bad) = options.split_whitespace().find(|opt| !is_known_option(opt)) {
            program.state = BuildState::Failed(format!("error: unknown build option '{}'\n", bad));
            return Err(ApiError::new(CL_INVALID_BUILD_OPTIONS));
        }
        match compiler::compile(&program.source) {
            Ok(decls) => {
                program.state = BuildState::Built(decls);
                Ok(())
            }
            Err(log) => {
                program.state = BuildState::Failed(log);
                Err(ApiError::new(CL_BUILD_PROGRAM_FAILURE))
            }
        }
    }

    fn build_log(&self, program: HostHandle, device: HostHandle, limit: usize) -> ApiResult<String> {
        self.device_index(device)?;
        let state = self.state.borrow();
        let program = state.programs.get(&program.0).ok_or(ApiError::new(CL_INVALID_PROGRAM))?;
        let log = match &program.state {
            BuildState::Failed(log) => log.clone(),
            BuildState::Source | BuildState::Built(_) => String::new(),
        };
        Ok(truncate_log(log, limit))
    }

    fn create_kernel(&self, program: HostHandle, name: &str) -> ApiResult<HostHandle> {
        let mut state = self.state.borrow_mut();
        let program = state.programs.get(&program.0).ok_or(ApiError::new(CL_INVALID_PROGRAM))?;
        let BuildState::Built(decls) = &program.state else {
            return Err(ApiError::new(CL_INVALID_PROGRAM_EXECUTABLE));
        };
        let decl = decls
            .iter()
            .find(|d| d.name == name)
            .ok_or(ApiError::new(CL_INVALID_KERNEL_NAME))?;
        let builtin = kernels::lookup(&decl.name).ok_or(ApiError::new(CL_INVALID_KERNEL_NAME))?;
        let params = decl.params.clone();

        let id = state.allocate_id(ResourceKind::Kernel);
        state.kernels.insert(
            id,
            Kernel {
                builtin,
                args: vec![None; params.len()],
                params,
            },
        );
        Ok(HostHandle(id))
    }

    fn set_kernel_arg(&self, kernel: HostHandle, index: u32, arg: KernelArg<HostHandle>) -> ApiResult<()> {
        let mut state = self.state.borrow_mut();
        let mem_exists = match arg {
            KernelArg::Mem(mem) => state.buffers.contains_key(&mem.0),
            _ => true,
        };
        let kernel = state.kernels.get_mut(&kernel.0).ok_or(ApiError::new(CL_INVALID_KERNEL))?;
        let slot = index as usize;
        let kind = *kernel.params.get(slot).ok_or(ApiError::new(CL_INVALID_ARG_INDEX))?;
        let value = match (kind, arg) {
            (ParamKind::Scalar, KernelArg::Int(v)) => ArgValue::Int(v),
            (ParamKind::Global, KernelArg::Mem(mem)) if mem_exists => ArgValue::Mem(mem.0),
            (ParamKind::Global, KernelArg::Mem(_)) => return Err(ApiError::new(CL_INVALID_MEM_OBJECT)),
            (ParamKind::Local, KernelArg::Local(bytes)) if bytes > 0 => ArgValue::Local(bytes),
            (ParamKind::Local, KernelArg::Local(_)) => return Err(ApiError::new(CL_INVALID_ARG_SIZE)),
            _ => return Err(ApiError::new(CL_INVALID_ARG_VALUE)),
        };
        kernel.args[slot] = Some(value);
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: HostHandle,
        kernel: HostHandle,
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> ApiResult<HostHandle> {
        let mut state = self.state.borrow_mut();
        let (device, profiling) = {
            let queue = Self::check_queue(&state, queue)?;
            (queue.device, queue.profiling)
        };
        let kernel = state.kernels.get(&kernel.0).ok_or(ApiError::new(CL_INVALID_KERNEL))?;
        let args: Vec<ArgValue> = kernel
            .args
            .iter()
            .copied()
            .collect::<Option<_>>()
            .ok_or(ApiError::new(CL_INVALID_KERNEL_ARGS))?;
        let builtin = kernel.builtin;

        if global.contains(&0) {
            return Err(ApiError::new(CL_INVALID_GLOBAL_WORK_SIZE));
        }
        if let Some(local) = local {
            let max = self.devices[device].max_work_group_size;
            let divides = local.iter().zip(&global).all(|(l, g)| *l != 0 && g % l == 0);
            if !divides || local[0] * local[1] > max {
                return Err(ApiError::new(CL_INVALID_WORK_GROUP_SIZE));
            }
        }

        let start = self.tick(&mut state);
        let launch = Launch { global, args: &args };
        builtin.run(&launch, &mut state.buffers)?;
        let end = self.tick(&mut state);

        let id = state.allocate_id(ResourceKind::Event);
        state.events.insert(
            id,
            Event {
                timestamps: Timestamps { start, end },
                profiling,
            },
        );
        Ok(HostHandle(id))
    }

    fn finish(&self, queue: HostHandle) -> ApiResult<()> {
        let state = self.state.borrow();
        Self::check_queue(&state, queue)?;
        if self.has_fault(Fault::Finish) {
            return Err(ApiError::new(CL_OUT_OF_RESOURCES));
        }
        Ok(())
    }

    fn wait_for_event(&self, event: HostHandle) -> ApiResult<()> {
        let state = self.state.borrow();
        state
            .events
            .get(&event.0)
            .map(|_| ())
            .ok_or(ApiError::new(CL_INVALID_EVENT))
    }

    fn event_timestamps(&self, event: HostHandle) -> ApiResult<Timestamps> {
        let state = self.state.borrow();
        let event = state.events.get(&event.0).ok_or(ApiError::new(CL_INVALID_EVENT))?;
        if !event.profiling {
            return Err(ApiError::new(CL_PROFILING_INFO_NOT_AVAILABLE));
        }
        Ok(event.timestamps)
    }

    fn release_event(&self, event: HostHandle) -> ApiResult<()> {
        let mut state = self.state.borrow_mut();
        let existed = state.events.remove(&event.0).is_some();
        state.record_release(ResourceKind::Event, event, existed)
    }

    fn release_kernel(&self, kernel: HostHandle) -> ApiResult<()> {
        let mut state = self.state.borrow_mut();
        let existed = state.kernels.remove(&kernel.0).is_some();
        state.record_release(ResourceKind::Kernel, kernel, existed)
    }

    fn release_program(&self, program: HostHandle) -> ApiResult<()> {
        let mut state = self.state.borrow_mut();
        let existed = state.programs.remove(&program.0).is_some();
        state.record_release(ResourceKind::Program, program, existed)
    }

    fn release_mem(&self, mem: HostHandle) -> ApiResult<()> {
        let mut state = self.state.borrow_mut();
        let existed = state.buffers.remove(&mem.0).is_some();
        state.record_release(ResourceKind::Mem, mem, existed)
    }

    fn release_queue(&self, queue: HostHandle) -> ApiResult<()> {
        let mut state = self.state.borrow_mut();
        let existed = state.queues.remove(&queue.0).is_some();
        state.record_release(ResourceKind::Queue, queue, existed)
    }

    fn release_context(&self, context: HostHandle) -> ApiResult<()> {
        let mut state = self.state.borrow_mut();
        let existed = state.contexts.remove(&context.0).is_some();
        state.record_release(ResourceKind::Context, context, existed)
    }
}

fn is_known_option(option: &str) -> bool {
    option.starts_with("-D")
        || option.starts_with("-I")
        || option.starts_with("-cl-")
        || option == "-w"
        || option == "-Werror"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_device_is_a_single_cpu() {
        let device = HostDevice::new();
        let platforms = device.platforms().unwrap();
        assert_eq!(platforms.len(), 1);
        let cpus = device.devices(platforms[0], DeviceClass::Cpu).unwrap();
        assert_eq!(cpus.len(), 1);
        let err = device.devices(platforms[0], DeviceClass::Gpu).unwrap_err();
        assert_eq!(err.code, CL_DEVICE_NOT_FOUND);
    }

    #[test]
    fn double_release_is_recorded() {
        let device = HostDevice::new();
        let dev = device.devices(PLATFORM, DeviceClass::Any).unwrap()[0];
        let ctx = device.create_context(dev).unwrap();
        device.release_context(ctx).unwrap();
        let err = device.release_context(ctx).unwrap_err();
        assert_eq!(err.code, CL_INVALID_CONTEXT);
        let ledger = device.ledger();
        assert_eq!(ledger.invalid_releases().len(), 1);
        assert!(!ledger.is_balanced());
    }

    #[test]
    fn allocation_fault_triggers_after_budget() {
        let device = HostDevice::builder().fault(Fault::Allocation { after: 1 }).build();
        let dev = device.devices(PLATFORM, DeviceClass::Any).unwrap()[0];
        let ctx = device.create_context(dev).unwrap();
        assert!(device.create_buffer(ctx, MemAccess::ReadOnly, 16).is_ok());
        let err = device.create_buffer(ctx, MemAccess::ReadOnly, 16).unwrap_err();
        assert_eq!(err.code, CL_MEM_OBJECT_ALLOCATION_FAILURE);
    }

    #[test]
    fn oversized_buffer_is_rejected() {
        let device = HostDevice::builder().global_mem_bytes(64).cpu("tiny").build();
        let dev = device.devices(PLATFORM, DeviceClass::Any).unwrap()[0];
        let ctx = device.create_context(dev).unwrap();
        let err = device.create_buffer(ctx, MemAccess::ReadOnly, 128).unwrap_err();
        assert_eq!(err.code, CL_INVALID_BUFFER_SIZE);
    }

    #[test]
    fn unknown_build_option_fails_with_log() {
        let device = HostDevice::new();
        let dev = device.devices(PLATFORM, DeviceClass::Any).unwrap()[0];
        let ctx = device.create_context(dev).unwrap();
        let program = device
            .create_program(ctx, crate::matrix::kernels::COPY_MATRIX_KERNEL)
            .unwrap();
        let err = device.build_program(program, dev, "--bogus").unwrap_err();
        assert_eq!(err.code, CL_INVALID_BUILD_OPTIONS);
        let log = device.build_log(program, dev, 1024).unwrap();
        assert!(log.contains("--bogus"));
    }

    /// Ядро копирования 8x8 с привязанными буферами на устройстве `dev`
    fn bound_copy(device: &HostDevice, dev: HostHandle) -> (HostHandle, HostHandle) {
        let ctx = device.create_context(dev).unwrap();
        let queue = device.create_queue(ctx, dev, true).unwrap();
        let src = device.create_buffer(ctx, MemAccess::ReadOnly, 256).unwrap();
        let dst = device.create_buffer(ctx, MemAccess::WriteOnly, 256).unwrap();
        let program = device
            .create_program(ctx, crate::matrix::kernels::COPY_MATRIX_KERNEL)
            .unwrap();
        device.build_program(program, dev, "").unwrap();
        let kernel = device.create_kernel(program, "copy_matrix").unwrap();
        device.set_kernel_arg(kernel, 0, KernelArg::Mem(src)).unwrap();
        device.set_kernel_arg(kernel, 1, KernelArg::Mem(dst)).unwrap();
        (queue, kernel)
    }

    #[test]
    fn work_group_limit_comes_from_queue_device() {
        let device = HostDevice::builder().cpu("cpu0").max_work_group_size(16).gpu("gpu0").build();
        let cpu = device.devices(PLATFORM, DeviceClass::Cpu).unwrap()[0];
        let gpu = device.devices(PLATFORM, DeviceClass::Gpu).unwrap()[0];

        let (queue, kernel) = bound_copy(&device, cpu);
        assert!(device.enqueue_kernel(queue, kernel, [8, 8], Some([8, 8])).is_ok());

        let (queue, kernel) = bound_copy(&device, gpu);
        let err = device.enqueue_kernel(queue, kernel, [8, 8], Some([8, 8])).unwrap_err();
        assert_eq!(err.code, CL_INVALID_WORK_GROUP_SIZE);
    }

    #[test]
    fn memory_limit_comes_from_context_device() {
        let device = HostDevice::builder().cpu("cpu0").global_mem_bytes(64).gpu("gpu0").build();
        let gpu = device.devices(PLATFORM, DeviceClass::Gpu).unwrap()[0];
        let ctx = device.create_context(gpu).unwrap();
        let err = device.create_buffer(ctx, MemAccess::ReadOnly, 128).unwrap_err();
        assert_eq!(err.code, CL_INVALID_BUFFER_SIZE);

        let cpu = device.devices(PLATFORM, DeviceClass::Cpu).unwrap()[0];
        let ctx = device.create_context(cpu).unwrap();
        assert!(device.create_buffer(ctx, MemAccess::ReadOnly, 128).is_ok());
    }

    #[test]
    fn queue_device_must_match_context() {
        let device = HostDevice::builder().cpu("cpu0").gpu("gpu0").build();
        let cpu = device.devices(PLATFORM, DeviceClass::Cpu).unwrap()[0];
        let gpu = device.devices(PLATFORM, DeviceClass::Gpu).unwrap()[0];
        let ctx = device.create_context(cpu).unwrap();
        let err = device.create_queue(ctx, gpu, true).unwrap_err();
        assert_eq!(err.code, CL_INVALID_DEVICE);
    }

    #[test]
    fn event_clock_is_monotonic() {
        let device = HostDevice::new();
        let mut state = device.state.borrow_mut();
        let a = device.tick(&mut state);
        let b = device.tick(&mut state);
        assert!(b > a);
    }
}
