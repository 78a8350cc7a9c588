//! Однопроходный конвейер запуска ядра на устройстве
//!
//! Этапы выполняются строго по порядку:
//! - выбор платформы и устройства
//! - создание контекста и очереди с профилированием
//! - выделение буферов и загрузка данных
//! - сборка программы и привязка аргументов
//! - запуск, синхронизация, профилирование, чтение результата
//!
//! Объекты устройства освобождаются при выходе из области видимости в
//! порядке, обратном созданию, на любом пути выполнения.

pub mod buffer;
pub mod context;
pub mod device;
pub mod dispatch;
pub mod kernel;
pub mod profiler;
pub mod program;

pub use buffer::{DeviceBuffer, StagedBuffers};
pub use context::ExecutionContext;
pub use device::{describe_device, list_devices, select_device, select_device_on, select_platform, DeviceDescription, DeviceSelection};
pub use dispatch::DispatchDescriptor;
pub use kernel::{Arg, Kernel};
pub use profiler::{retrieve, CompletedEvent, KernelTiming, ProfilingEvent};
pub use program::{CompiledProgram, MAX_BUILD_LOG};

use crate::compute::{ComputeApi, MemAccess};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::matrix::Matrix;
use serde::Serialize;
use tracing::{info, warn};

/// Состояние конвейера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    PlatformSelected,
    DeviceSelected,
    ContextReady,
    BuffersStaged,
    ProgramBuilt,
    KernelBound,
    Dispatched,
    Synced,
    Retrieved,
    Released,
}

/// История переходов конвейера
#[derive(Debug, Clone)]
pub struct StateTracker {
    history: Vec<PipelineState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            history: vec![PipelineState::Idle],
        }
    }

    pub fn current(&self) -> PipelineState {
        self.history.last().copied().unwrap_or(PipelineState::Idle)
    }

    pub fn advance(&mut self, next: PipelineState) {
        info!(from = ?self.current(), to = ?next, "переход конвейера");
        self.history.push(next);
    }

    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn into_history(self) -> Vec<PipelineState> {
        self.history
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Источник значения для слота аргумента ядра
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobArg {
    Int(i32),
    /// Входной буфер по индексу в [`KernelJob::inputs`]
    Input(usize),
    Output,
    Local(usize),
}

/// Описание одного запуска: ядро, операнды и порядок аргументов
#[derive(Debug, Clone)]
pub struct KernelJob<'a> {
    pub source: &'a str,
    pub entry: &'a str,
    pub inputs: Vec<(&'a str, &'a Matrix)>,
    pub output_name: &'a str,
    pub output_shape: (usize, usize),
    pub args: Vec<JobArg>,
}

/// Результат успешного запуска
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub result: Matrix,
    pub timing: KernelTiming,
    pub dispatch: DispatchDescriptor,
    pub device: DeviceDescription,
    pub build_log: String,
    /// Время получено на эмуляторе, а не на устройстве OpenCL
    pub emulated: bool,
    pub states: Vec<PipelineState>,
}

impl RunOutput {
    pub fn elapsed_ms(&self) -> f64 {
        self.timing.elapsed_ms()
    }

    pub fn report(&self, operation: &str) -> RunReport {
        RunReport {
            operation: operation.to_owned(),
            device: self.device.clone(),
            rows: self.result.rows(),
            cols: self.result.cols(),
            dispatch: self.dispatch,
            elapsed_ms: self.elapsed_ms(),
            timing: self.timing,
            emulated: self.emulated,
            states: self.states.clone(),
        }
    }
}

/// Отчет о запуске для вывода в JSON
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub operation: String,
    pub device: DeviceDescription,
    pub rows: usize,
    pub cols: usize,
    pub dispatch: DispatchDescriptor,
    pub elapsed_ms: f64,
    pub timing: KernelTiming,
    pub emulated: bool,
    pub states: Vec<PipelineState>,
}

/// Выполняет задание от выбора устройства до чтения результата
///
/// При ошибке любого этапа уже созданные объекты освобождаются, результат
/// не возвращается.
pub fn run_job<A: ComputeApi>(api: A, config: &PipelineConfig, job: &KernelJob<'_>) -> Result<RunOutput> {
    config.validate()?;
    let mut tracker = StateTracker::new();
    let outcome = execute(api, config, job, &mut tracker);

    // К этому моменту все объекты устройства освобождены
    if let Err(e) = &outcome {
        warn!(stage = %e.stage(), state = ?tracker.current(), "конвейер прерван: {}", e);
    }
    tracker.advance(PipelineState::Released);

    outcome.map(|mut output| {
        output.states = tracker.into_history();
        output
    })
}

fn execute<A: ComputeApi>(
    api: A,
    config: &PipelineConfig,
    job: &KernelJob<'_>,
    tracker: &mut StateTracker,
) -> Result<RunOutput> {
    let emulated = api.is_emulated();
    if emulated {
        warn!("устройство эмулируется на хосте: время ядра не отражает устройство OpenCL");
    }
    let platform = select_platform(&api)?;
    tracker.advance(PipelineState::PlatformSelected);
    let selection = select_device_on(&api, platform, config.device_class)?;
    tracker.advance(PipelineState::DeviceSelected);

    let ctx = ExecutionContext::create(api, &selection, config.profiling)?;
    tracker.advance(PipelineState::ContextReady);

    let mut inputs = StagedBuffers::new();
    for (name, matrix) in &job.inputs {
        inputs.push(DeviceBuffer::stage(&ctx, name, MemAccess::ReadOnly, matrix)?);
    }
    let (rows, cols) = job.output_shape;
    let output = DeviceBuffer::allocate(&ctx, job.output_name, MemAccess::WriteOnly, rows, cols)?;
    tracker.advance(PipelineState::BuffersStaged);

    let program = CompiledProgram::build(&ctx, job.source, &config.build_options)?;
    tracker.advance(PipelineState::ProgramBuilt);

    let mut kernel = program.kernel(job.entry, job.args.len())?;
    for (index, arg) in job.args.iter().enumerate() {
        let index = index as u32;
        let arg = match *arg {
            JobArg::Int(value) => Arg::Int(value),
            JobArg::Input(input) => Arg::Buffer(inputs.get(input).ok_or_else(|| {
                PipelineError::ArgumentBindFailed {
                    index,
                    reason: format!("no input buffer #{}", input),
                }
            })?),
            JobArg::Output => Arg::Buffer(&output),
            JobArg::Local(bytes) => Arg::Local(bytes),
        };
        kernel.bind(index, arg)?;
    }
    tracker.advance(PipelineState::KernelBound);

    let dispatch = DispatchDescriptor::for_output(rows, cols, config.tile)?;
    let event = kernel.dispatch(&dispatch)?;
    tracker.advance(PipelineState::Dispatched);

    let completed = event.synchronize()?;
    tracker.advance(PipelineState::Synced);

    let timing = completed.timing()?;
    let result = retrieve(&output)?;
    tracker.advance(PipelineState::Retrieved);
    info!(elapsed_ms = timing.elapsed_ms(), "ядро '{}' выполнено", job.entry);

    Ok(RunOutput {
        result,
        timing,
        dispatch,
        device: ctx.device_description().clone(),
        build_log: program.build_log().to_owned(),
        emulated,
        states: Vec::new(),
    })
}
