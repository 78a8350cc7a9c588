//! Запуск матричной операции на OpenCL-устройстве

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use opencl_dispatch::{
    compute::{ComputeApi, DeviceClass, HostDevice},
    config::PipelineConfig,
    matrix::{
        compare_results, cpu_matrix_add, cpu_matrix_multiply, initialize_matrices, initialize_same_shape, Comparison,
        Matrix, MatrixType,
    },
    ops::Operation,
    pipeline::{DeviceDescription, RunOutput, RunReport},
    utils::{format_bytes, measure_time, parse_tile},
    PipelineError,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Допустимое относительное расхождение с CPU
const EPSILON: f32 = 1e-4;
/// Сколько строк и столбцов результата печатать
const PREVIEW_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OpChoice {
    Multiply,
    Add,
    Copy,
}

impl From<OpChoice> for Operation {
    fn from(choice: OpChoice) -> Self {
        match choice {
            OpChoice::Multiply => Operation::Multiply,
            OpChoice::Add => Operation::Add,
            OpChoice::Copy => Operation::Copy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DeviceChoice {
    Any,
    Gpu,
    Cpu,
}

impl From<DeviceChoice> for DeviceClass {
    fn from(choice: DeviceChoice) -> Self {
        match choice {
            DeviceChoice::Any => DeviceClass::Any,
            DeviceChoice::Gpu => DeviceClass::Gpu,
            DeviceChoice::Cpu => DeviceClass::Cpu,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    /// Эмулятор устройства в памяти процесса
    Host,
    /// Установленный драйвер OpenCL (сборка с фичей `opencl`)
    Opencl,
}

impl Default for BackendChoice {
    fn default() -> Self {
        if cfg!(feature = "opencl") {
            BackendChoice::Opencl
        } else {
            BackendChoice::Host
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MatrixChoice {
    OnesAndTwos,
    ThreesAndFours,
    Random,
}

impl From<MatrixChoice> for MatrixType {
    fn from(choice: MatrixChoice) -> Self {
        match choice {
            MatrixChoice::OnesAndTwos => MatrixType::OnesAndTwos,
            MatrixChoice::ThreesAndFours => MatrixType::ThreesAndFours,
            MatrixChoice::Random => MatrixType::Random,
        }
    }
}

fn tile_arg(text: &str) -> std::result::Result<(usize, usize), String> {
    parse_tile(text).ok_or_else(|| format!("expected ROWSxCOLS, got '{}'", text))
}

#[derive(Debug, Parser)]
#[command(name = "opencl_dispatch")]
#[command(about = "Runs a dense matrix kernel on an OpenCL device and reports kernel time", long_about = None)]
struct Cli {
    /// Operation to run
    #[arg(long, value_enum, default_value_t = OpChoice::Multiply)]
    op: OpChoice,

    /// Rows of A and of the result
    #[arg(long, default_value_t = 1024)]
    rows: usize,

    /// Columns of A / rows of B (defaults to --rows)
    #[arg(long)]
    inner: Option<usize>,

    /// Columns of B and of the result (defaults to --inner)
    #[arg(long)]
    cols: Option<usize>,

    /// Work-group tile, e.g. 16x16; must divide the result dimensions
    #[arg(long, value_parser = tile_arg, value_name = "ROWSxCOLS")]
    tile: Option<(usize, usize)>,

    /// Device class to request; there is no fallback to another class
    #[arg(long, value_enum, default_value_t = DeviceChoice::Any)]
    device: DeviceChoice,

    /// Compute backend
    #[arg(long, value_enum, default_value_t = BackendChoice::default())]
    backend: BackendChoice,

    /// How to fill the input matrices
    #[arg(long, value_enum, default_value_t = MatrixChoice::OnesAndTwos)]
    matrix_type: MatrixChoice,

    /// Read kernel source from a file instead of the built-in one
    #[arg(long, value_name = "PATH")]
    kernel_file: Option<PathBuf>,

    /// Options passed to the kernel compiler
    #[arg(long, default_value = "")]
    build_options: String,

    /// Create the queue without profiling (the run then fails at the profiling stage)
    #[arg(long)]
    no_profiling: bool,

    /// Print a JSON report instead of text
    #[arg(long)]
    json: bool,

    /// Compare the result with a CPU reference
    #[arg(long)]
    verify: bool,

    /// Enable verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Serialize)]
struct JsonReport {
    #[serde(flatten)]
    run: RunReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    verification: Option<Comparison>,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .device_class(cli.device.into())
        .build_options(cli.build_options.clone())
        .profiling(!cli.no_profiling);
    if let Some((rows, cols)) = cli.tile {
        builder = builder.tile(rows, cols);
    }
    if let Some(path) = &cli.kernel_file {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Не удалось прочитать файл ядра {}", path.display()))?;
        builder = builder.kernel_source(source);
    }
    Ok(builder.build()?)
}

/// Входные матрицы нужной формы для операции
///
/// Для сложения и копирования обе матрицы имеют форму `rows x inner`.
fn operands(op: Operation, matrix_type: MatrixType, rows: usize, inner: usize, cols: usize) -> Result<(Matrix, Matrix)> {
    let pair = match op {
        Operation::Multiply => initialize_matrices(matrix_type, rows, inner, cols)?,
        Operation::Add | Operation::Copy => initialize_same_shape(matrix_type, rows, inner)?,
    };
    Ok(pair)
}

fn cpu_reference(op: Operation, a: &Matrix, b: &Matrix) -> Result<Matrix> {
    let reference = match op {
        Operation::Multiply => cpu_matrix_multiply(a, b)?,
        Operation::Add => cpu_matrix_add(a, b)?,
        Operation::Copy => a.clone(),
    };
    Ok(reference)
}

fn print_device(description: &DeviceDescription) {
    let DeviceDescription { platform, device } = description;
    println!("Платформа OpenCL: {}", platform.name);
    println!("Версия платформы: {}", platform.version);
    println!("Устройство OpenCL: {}", device.name);
    println!("Версия устройства: {}", device.version);
    println!("Вычислительных блоков: {}", device.compute_units);
    println!("Макс. рабочая группа: {}", device.max_work_group_size);
    println!("Глобальная память: {}", format_bytes(device.global_mem_bytes));
}

fn print_text(op: Operation, a: &Matrix, output: &RunOutput) {
    print_device(&output.device);
    println!();
    println!("Операция: {} ({}x{})", op, output.result.rows(), output.result.cols());
    let [rows, cols] = output.dispatch.global();
    match output.dispatch.local() {
        Some([tr, tc]) => println!("Глобальный размер: {}x{}, рабочая группа: {}x{}", rows, cols, tr, tc),
        None => println!("Глобальный размер: {}x{}, рабочая группа: выбор драйвера", rows, cols),
    }
    if !output.build_log.trim().is_empty() {
        println!("\nЛог сборки:\n{}", output.build_log);
    }

    println!("\nВходная матрица A ({}x{}):", a.rows(), a.cols());
    print!("{}", a.preview(PREVIEW_SIZE));
    println!("\nРезультат ({}x{}):", output.result.rows(), output.result.cols());
    print!("{}", output.result.preview(PREVIEW_SIZE));
    if output.emulated {
        println!("\nВремя выполнения ядра: {:.3} мс (эмулятор, не время устройства)", output.elapsed_ms());
    } else {
        println!("\nВремя выполнения ядра: {:.3} мс", output.elapsed_ms());
    }
}

fn execute<A: ComputeApi>(api: A, cli: &Cli, config: &PipelineConfig) -> Result<()> {
    let op = Operation::from(cli.op);
    let inner = cli.inner.unwrap_or(cli.rows);
    let cols = cli.cols.unwrap_or(inner);
    let (a, b) = operands(op, cli.matrix_type.into(), cli.rows, inner, cols)?;

    let output = op.run(api, config, &a, &b)?;

    let verification = if cli.verify {
        let (reference, cpu_time) = measure_time(|| cpu_reference(op, &a, &b));
        let reference = reference?;
        let comparison = compare_results(&output.result, &reference, EPSILON);
        if !cli.json {
            println!("Время на CPU: {:.3} мс", cpu_time.as_secs_f64() * 1000.0);
        }
        Some(comparison)
    } else {
        None
    };

    if cli.json {
        let report = JsonReport {
            run: output.report(&op.to_string()),
            verification,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(op, &a, &output);
        if let Some(comparison) = verification {
            if comparison.matches() {
                println!("Результаты совпадают с CPU");
            } else {
                println!(
                    "Расхождений с CPU: {} (максимальное {:.6})",
                    comparison.diff_count, comparison.max_diff
                );
            }
        }
    }

    if let Some(comparison) = verification {
        if !comparison.matches() {
            bail!("результат расходится с CPU в {} элементах", comparison.diff_count);
        }
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;
    match cli.backend {
        BackendChoice::Host => execute(HostDevice::new(), cli, &config),
        #[cfg(feature = "opencl")]
        BackendChoice::Opencl => execute(opencl_dispatch::OpenClApi::new(), cli, &config),
        #[cfg(not(feature = "opencl"))]
        BackendChoice::Opencl => bail!("собрано без фичи `opencl`; используйте --backend host"),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Ошибка: {:#}", err);
            let code = err
                .downcast_ref::<PipelineError>()
                .map(PipelineError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
