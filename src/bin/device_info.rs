//! Сведения о платформах и устройствах OpenCL
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use opencl_dispatch::{
    compute::{ComputeApi, HostDevice},
    pipeline::{list_devices, DeviceDescription},
    utils::format_bytes,
};
use prettytable::{row, Table};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    Host,
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

#[derive(Debug, Parser)]
#[command(name = "device_info")]
#[command(about = "Lists OpenCL platforms and devices", long_about = None)]
struct Cli {
    /// Compute backend
    #[arg(long, value_enum, default_value_t = BackendChoice::default())]
    backend: BackendChoice,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn device_type_name(device_type: u64) -> &'static str {
    use opencl_dispatch::opencl::types::{CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU};
    if device_type & CL_DEVICE_TYPE_GPU != 0 {
        "GPU"
    } else if device_type & CL_DEVICE_TYPE_CPU != 0 {
        "CPU"
    } else {
        "другое"
    }
}

fn print_table(devices: &[DeviceDescription]) {
    let mut table = Table::new();
    table.add_row(row![
        "Платформа",
        "Версия платформы",
        "Устройство",
        "Тип",
        "Версия",
        "Вычислительные блоки",
        "Макс. рабочая группа",
        "Глобальная память"
    ]);
    for d in devices {
        table.add_row(row![
            d.platform.name,
            d.platform.version,
            d.device.name,
            device_type_name(d.device.device_type),
            d.device.version,
            d.device.compute_units,
            d.device.max_work_group_size,
            format_bytes(d.device.global_mem_bytes)
        ]);
    }
    table.printstd();
}

fn show<A: ComputeApi>(api: A, json: bool) -> Result<()> {
    if api.is_emulated() {
        warn!("выбран эмулятор устройства: показаны эмулируемые, а не установленные устройства OpenCL");
    }
    let devices = list_devices(&api).context("Не удалось получить список устройств")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else if devices.is_empty() {
        println!("Устройства OpenCL не найдены");
    } else {
        print_table(&devices);
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.backend {
        BackendChoice::Host => show(HostDevice::new(), cli.json),
        #[cfg(feature = "opencl")]
        BackendChoice::Opencl => show(opencl_dispatch::OpenClApi::new(), cli.json),
        #[cfg(not(feature = "opencl"))]
        BackendChoice::Opencl => anyhow::bail!("собрано без фичи `opencl`; используйте --backend host"),
    }
}
