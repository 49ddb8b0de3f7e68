use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use vram_config::{ConfigDiagnostics, VramConfig};
use vram_reserve::{
    checked_decide, render_device_info, AtomicReservationSlot, BatchReclaimReport, DeviceInfo,
    MemorySnapshot, NoopRuntime, Reclaimer, ReservationMode, ReservationOutcome,
    ReservationRequest, ReservationResult, ReservationService, TelemetryKind, TelemetryProvider,
    DEFAULT_MIN_SAFE_GB, DEFAULT_TARGET_GB,
};

#[derive(Parser)]
#[command(
    name = "vram",
    version,
    about = "GPU memory reservation sizing (reserve, decide, monitor, clean)"
)]
struct Cli {
    /// Config file (defaults to `vram.toml` / `.vram.toml` in the current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Telemetry backend, overriding `telemetry.backend`
    #[arg(long, global = true, value_enum)]
    telemetry: Option<TelemetryArg>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum TelemetryArg {
    Auto,
    Nvml,
    Sysfs,
    #[value(name = "none")]
    Disabled,
}

impl From<TelemetryArg> for TelemetryKind {
    fn from(value: TelemetryArg) -> Self {
        match value {
            TelemetryArg::Auto => TelemetryKind::Auto,
            TelemetryArg::Nvml => TelemetryKind::Nvml,
            TelemetryArg::Sysfs => TelemetryKind::Sysfs,
            TelemetryArg::Disabled => TelemetryKind::None,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Size the reservation for a device and report it
    Reserve(ReserveArgs),
    /// Evaluate a sizing policy against a hand-supplied snapshot (no device access)
    Decide(DecideArgs),
    /// Print name, memory, temperature and utilization for a device
    Monitor(MonitorArgs),
    /// Release cached device memory and report how much was freed
    Clean(CleanArgs),
}

#[derive(Args)]
struct ReserveArgs {
    /// Reservation (manual) or buffer on top of current usage (auto/smart), in GB
    #[arg(long)]
    target_gb: Option<f64>,
    /// Sizing policy: smart, auto or manual
    #[arg(long)]
    mode: Option<String>,
    /// Lower bound on the reservation, in GB
    #[arg(long)]
    min_safe_gb: Option<f64>,
    /// Device index
    #[arg(long)]
    device: Option<u32>,
    /// Release cached allocator memory before measuring
    #[arg(long)]
    reclaim: bool,
    /// Skip collecting device information
    #[arg(long)]
    quiet_info: bool,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct DecideArgs {
    /// Sizing policy: smart, auto or manual
    #[arg(long, default_value = "smart")]
    mode: String,
    /// Reservation (manual) or buffer (auto/smart), in GB
    #[arg(long, default_value_t = DEFAULT_TARGET_GB)]
    target_gb: f64,
    /// Lower bound on the reservation, in GB
    #[arg(long, default_value_t = DEFAULT_MIN_SAFE_GB)]
    min_safe_gb: f64,
    /// Total device memory, in GB
    #[arg(long, requires = "used")]
    total: Option<f64>,
    /// Device memory in use, in GB
    #[arg(long, requires = "total")]
    used: Option<f64>,
    /// Free device memory, in GB (defaults to total - used)
    #[arg(long, requires = "total")]
    free: Option<f64>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct MonitorArgs {
    /// Device index (defaults to `reservation.device_index`)
    #[arg(long)]
    device: Option<u32>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CleanArgs {
    /// Reclaim on every enumerated device
    #[arg(long, conflicts_with = "device")]
    all_devices: bool,
    /// Device index (defaults to `reservation.device_index`)
    #[arg(long)]
    device: Option<u32>,
    /// Also drop weights held by the model cache
    #[arg(long)]
    aggressive: bool,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_ref())?;
    let kind = cli
        .telemetry
        .map(TelemetryKind::from)
        .unwrap_or_else(|| config.telemetry.kind());

    match cli.command {
        Command::Reserve(args) => {
            let mut reservation = config.reservation.clone();
            if let Some(target_gb) = args.target_gb {
                reservation.target_gb = target_gb;
            }
            if let Some(mode) = args.mode {
                reservation.mode = mode;
            }
            if let Some(min_safe_gb) = args.min_safe_gb {
                reservation.min_safe_gb = min_safe_gb;
            }
            if let Some(device) = args.device {
                reservation.device_index = device;
            }
            reservation.reclaim_before |= args.reclaim;
            if args.quiet_info {
                reservation.show_device_info = false;
            }

            let telemetry = Arc::new(TelemetryProvider::detect(kind));
            let service = ReservationService::new(
                telemetry.clone(),
                Arc::new(NoopRuntime),
                Arc::new(AtomicReservationSlot::new()),
            )
            .with_default_gb(reservation.default_gb);
            let outcome = service.apply(&reservation.apply_options());
            telemetry.shutdown();

            print_output(&outcome, args.json)?;
            Ok(0)
        }
        Command::Decide(args) => {
            let snapshot = match (args.total, args.used) {
                (Some(total), Some(used)) => Some(MemorySnapshot::new(
                    total,
                    used,
                    args.free.unwrap_or(total - used),
                )),
                _ => None,
            };
            let request = ReservationRequest::new(
                ReservationMode::from_name(&args.mode),
                args.target_gb,
                args.min_safe_gb,
            );
            let result = checked_decide(&request, snapshot)?;
            print_output(&result, args.json)?;
            Ok(0)
        }
        Command::Monitor(args) => {
            let device = args.device.unwrap_or(config.reservation.device_index);
            let telemetry = TelemetryProvider::detect(kind);
            let info = telemetry.device_info(device);
            telemetry.shutdown();

            print_output(&info, args.json)?;
            Ok(0)
        }
        Command::Clean(args) => {
            let telemetry = Arc::new(TelemetryProvider::detect(kind));
            let reclaimer = Reclaimer::new(telemetry.clone(), Arc::new(NoopRuntime));
            let report = if args.all_devices {
                reclaimer.reclaim_all(args.aggressive)
            } else {
                let device = args.device.unwrap_or(config.reservation.device_index);
                reclaimer.reclaim_batch([device], args.aggressive)
            };
            telemetry.shutdown();

            print_output(&report, args.json)?;
            Ok(0)
        }
    }
}

fn load_config(explicit: Option<&PathBuf>) -> Result<VramConfig> {
    let (config, path, diagnostics) = match explicit {
        Some(path) => {
            let (config, diagnostics) = VramConfig::load_from_path_with_diagnostics(path)
                .with_context(|| format!("loading {}", path.display()))?;
            (config, Some(path.clone()), diagnostics)
        }
        None => {
            let cwd = std::env::current_dir().context("reading current directory")?;
            vram_config::load_for_dir_with_diagnostics(&cwd)?
        }
    };

    vram_config::init_tracing(&config.logging);
    if let Some(path) = &path {
        tracing::debug!(target: "vram.config", path = %path.display(), "loaded config");
    }
    report_diagnostics(&diagnostics)?;
    Ok(config)
}

fn report_diagnostics(diagnostics: &ConfigDiagnostics) -> Result<()> {
    for key in &diagnostics.unknown_keys {
        tracing::warn!(target: "vram.config", key = %key, "unknown config key");
    }
    for warning in &diagnostics.warnings {
        tracing::warn!(target: "vram.config", "{warning}");
    }
    if !diagnostics.is_ok() {
        let errors: Vec<String> = diagnostics.errors.iter().map(ToString::to_string).collect();
        bail!("invalid config: {}", errors.join("; "));
    }
    Ok(())
}

fn print_output<T: Serialize + 'static>(value: &T, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
        return Ok(());
    }

    // Human output for key types. Everything else falls back to pretty JSON.
    let any = value as &dyn std::any::Any;
    if let Some(outcome) = any.downcast_ref::<ReservationOutcome>() {
        print_outcome(outcome);
    } else if let Some(result) = any.downcast_ref::<ReservationResult>() {
        print_result(result);
    } else if let Some(info) = any.downcast_ref::<DeviceInfo>() {
        println!("{}", render_device_info(info));
    } else if let Some(report) = any.downcast_ref::<BatchReclaimReport>() {
        println!("{}", report.render());
    } else {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
    }
    Ok(())
}

fn print_result(result: &ReservationResult) {
    println!("reserved: {:.2}GB ({:.0}MB)", result.gb(), result.mb());
    println!("  mode: {}", result.mode);
    if let Some(band) = result.band {
        println!("  band: {band}");
    }
    println!("  {}", result.explanation);
}

fn print_outcome(outcome: &ReservationOutcome) {
    if let Some(info) = &outcome.device_info {
        println!("{}", render_device_info(info));
    }
    if let Some(reclaim) = &outcome.reclaim {
        if !reclaim.attempted {
            println!("reclaimed: skipped");
        } else if reclaim.measured() {
            println!(
                "reclaimed: {:.2}GB ({:.0}MB)",
                reclaim.freed_gb,
                reclaim.freed_mb()
            );
        } else {
            println!("reclaimed: not measured");
        }
    }
    if outcome.device_index != outcome.requested_device_index {
        println!(
            "device {} is not available; measured device {}",
            outcome.requested_device_index, outcome.device_index
        );
    }
    print_result(&outcome.result);
    if outcome.fell_back {
        println!("  (safe default)");
    }
}
