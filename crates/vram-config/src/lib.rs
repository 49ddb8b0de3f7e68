use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once, OnceLock};

use parking_lot::{Mutex, ReentrantMutex};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use vram_reserve::{
    ApplyOptions, ReservationMode, ReservationRequest, TelemetryKind, DEFAULT_MIN_SAFE_GB,
    DEFAULT_TARGET_GB, MAX_TARGET_GB, MIN_TARGET_GB,
};

mod diagnostics;
mod schema;
mod validation;

pub use diagnostics::{
    ConfigDiagnostics, ConfigValidationError, ConfigWarning, ValidationDiagnostics,
};
pub use schema::json_schema;

/// Smallest accepted `reservation.min_safe_gb`.
pub const MIN_SAFETY_FLOOR_GB: f64 = 0.5;
/// Largest accepted `reservation.min_safe_gb`.
pub const MAX_SAFETY_FLOOR_GB: f64 = 8.0;
/// Largest accepted `reservation.device_index`.
pub const MAX_DEVICE_INDEX: u32 = 7;

/// Top-level `vram.toml` document.
///
/// Every section is optional; a missing file or an empty document yields the defaults.
///
/// ```toml
/// [reservation]
/// target_gb = 1.5
/// mode = "auto"
/// min_safe_gb = 2.0
///
/// [telemetry]
/// backend = "sysfs"
///
/// [logging]
/// level = "vram.strategy=debug,info"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct VramConfig {
    /// Reservation sizing inputs.
    #[serde(default)]
    pub reservation: ReservationConfig,

    /// Device telemetry backend selection.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Log filtering and sinks.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct ReservationConfig {
    /// Requested reservation or buffer, in GB.
    #[serde(default = "ReservationConfig::default_target_gb")]
    #[schemars(range(min = 0.6, max = 32.0))]
    pub target_gb: f64,

    /// Sizing policy: `smart`, `auto` or `manual`. Other names fall back to manual sizing.
    #[serde(default = "ReservationConfig::default_mode")]
    pub mode: String,

    /// Lower bound on any computed reservation, in GB.
    #[serde(default = "ReservationConfig::default_min_safe_gb")]
    #[schemars(range(min = 0.5, max = 8.0))]
    pub min_safe_gb: f64,

    /// Device to measure.
    #[serde(default)]
    #[schemars(range(max = 7))]
    pub device_index: u32,

    /// Reservation stored when sizing fails outright; the safety floor still applies.
    #[serde(default = "ReservationConfig::default_target_gb")]
    pub default_gb: f64,

    /// Release cached allocator memory before measuring.
    #[serde(default)]
    pub reclaim_before: bool,

    /// Log name, memory, temperature and utilization of the device before sizing.
    #[serde(default = "ReservationConfig::default_show_device_info")]
    pub show_device_info: bool,
}

impl ReservationConfig {
    fn default_target_gb() -> f64 {
        DEFAULT_TARGET_GB
    }

    fn default_mode() -> String {
        ReservationMode::Smart.name().to_owned()
    }

    fn default_min_safe_gb() -> f64 {
        DEFAULT_MIN_SAFE_GB
    }

    fn default_show_device_info() -> bool {
        true
    }

    pub fn mode(&self) -> ReservationMode {
        ReservationMode::from_name(&self.mode)
    }

    /// The request this config describes, with out-of-range values clamped into range.
    ///
    /// A device index above [`MAX_DEVICE_INDEX`] becomes device 0. Non-finite numbers are
    /// passed through untouched so the service can fall back to its safe default.
    pub fn effective_request(&self) -> ReservationRequest {
        let device_index = if self.device_index > MAX_DEVICE_INDEX {
            0
        } else {
            self.device_index
        };
        ReservationRequest::new(
            self.mode(),
            clamp_finite(self.target_gb, MIN_TARGET_GB, MAX_TARGET_GB),
            clamp_finite(self.min_safe_gb, MIN_SAFETY_FLOOR_GB, MAX_SAFETY_FLOOR_GB),
        )
        .on_device(device_index)
    }

    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            request: self.effective_request(),
            reclaim_before: self.reclaim_before,
            collect_device_info: self.show_device_info,
        }
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            target_gb: Self::default_target_gb(),
            mode: Self::default_mode(),
            min_safe_gb: Self::default_min_safe_gb(),
            device_index: 0,
            default_gb: Self::default_target_gb(),
            reclaim_before: false,
            show_device_info: Self::default_show_device_info(),
        }
    }
}

fn clamp_finite(value: f64, min: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        value
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryBackendConfig {
    /// NVML when available, then the Linux DRM sysfs interface, then nothing.
    #[default]
    Auto,
    Nvml,
    Sysfs,
    /// Never query the device; every mode uses its no-data fallback.
    None,
}

impl From<TelemetryBackendConfig> for TelemetryKind {
    fn from(value: TelemetryBackendConfig) -> Self {
        match value {
            TelemetryBackendConfig::Auto => TelemetryKind::Auto,
            TelemetryBackendConfig::Nvml => TelemetryKind::Nvml,
            TelemetryBackendConfig::Sysfs => TelemetryKind::Sysfs,
            TelemetryBackendConfig::None => TelemetryKind::None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub backend: TelemetryBackendConfig,
}

impl TelemetryConfig {
    pub fn kind(&self) -> TelemetryKind {
        self.backend.into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level for all vram crates.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Write logs to stderr.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to the given file path.
    ///
    /// If the file cannot be opened, file logging is disabled while stderr logging
    /// remains active.
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            // Anything else is treated as an `EnvFilter` directive string.
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Create the effective `EnvFilter`.
    ///
    /// `level` may be either a simple level (`info`, `debug`, ...) or a full
    /// `tracing_subscriber::EnvFilter` directive string. If `RUST_LOG` is set, it is merged
    /// into the resulting filter.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` embeds a source snippet; keep just the message.
        ConfigError::Toml(err.message().to_owned())
    }
}

impl VramConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = read_config(path.as_ref())?;
        Ok(toml::from_str(&text)?)
    }

    /// Load a config file from TOML and return diagnostics (unknown keys and semantic
    /// validation failures).
    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let text = read_config(path.as_ref())?;
        Self::load_from_str_with_diagnostics(&text)
    }

    /// Load a config from a TOML string and return diagnostics.
    pub fn load_from_str_with_diagnostics(
        text: &str,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let (config, unknown_keys) =
            diagnostics::deserialize_toml_with_unknown_keys::<VramConfig>(text)?;

        let mut diagnostics = ConfigDiagnostics {
            unknown_keys,
            ..ConfigDiagnostics::default()
        };
        diagnostics.extend_validation(config.validate());

        Ok((config, diagnostics))
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub const VRAM_CONFIG_ENV_VAR: &str = "VRAM_CONFIG_PATH";

static CONFIG_ENV_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();

fn config_env_lock() -> &'static ReentrantMutex<()> {
    CONFIG_ENV_LOCK.get_or_init(|| ReentrantMutex::new(()))
}

/// Run `f` while holding the config environment lock.
///
/// Environment variables are process-global; tests that temporarily set
/// [`VRAM_CONFIG_ENV_VAR`] wrap the mutation and the discovery call in this helper.
pub fn with_config_env_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = config_env_lock().lock();
    f()
}

/// Discover the configuration file for `base_dir`.
///
/// Search order:
/// 1) `VRAM_CONFIG_PATH` (absolute or relative to `base_dir`)
/// 2) `vram.toml` in `base_dir`
/// 3) `.vram.toml` in `base_dir`
pub fn discover_config_path(base_dir: &Path) -> Option<PathBuf> {
    let _guard = config_env_lock().lock();
    if let Some(value) = std::env::var_os(VRAM_CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(value);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            base_dir.join(candidate)
        };
        return Some(path.canonicalize().unwrap_or(path));
    }

    ["vram.toml", ".vram.toml"]
        .into_iter()
        .map(|name| base_dir.join(name))
        .find(|path| path.is_file())
        .map(|path| path.canonicalize().unwrap_or(path))
}

/// Load the configuration for `base_dir`.
///
/// If no config is present, returns [`VramConfig::default`] and `None`.
pub fn load_for_dir(base_dir: &Path) -> Result<(VramConfig, Option<PathBuf>), ConfigError> {
    let Some(path) = discover_config_path(base_dir) else {
        return Ok((VramConfig::default(), None));
    };

    let config = VramConfig::load_from_path(&path)?;
    Ok((config, Some(path)))
}

/// Load the configuration for `base_dir` with diagnostics.
///
/// If no config is present, returns [`VramConfig::default`], `None`, and empty diagnostics.
pub fn load_for_dir_with_diagnostics(
    base_dir: &Path,
) -> Result<(VramConfig, Option<PathBuf>, ConfigDiagnostics), ConfigError> {
    let Some(path) = discover_config_path(base_dir) else {
        return Ok((VramConfig::default(), None, ConfigDiagnostics::default()));
    };

    let (config, diagnostics) = VramConfig::load_from_path_with_diagnostics(&path)?;
    Ok((config, Some(path), diagnostics))
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        MutexFileWriter {
            guard: self.file.lock(),
        }
    }
}

struct MutexFileWriter<'a> {
    guard: parking_lot::MutexGuard<'a, std::fs::File>,
}

impl Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global tracing subscriber. Only the first call has an effect.
pub fn init_tracing(logging: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = logging.env_filter();

        let file = logging.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_open_failed = logging.file.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if logging.stderr {
            // `cargo test` output capture only works for the stdlib's `print!/eprint!`
            // macros; `TestWriter` keeps debug-build tests quiet.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
            }
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter {
                file: Arc::new(Mutex::new(file)),
            }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_open_failed {
            if let Some(path) = logging.file.as_ref() {
                tracing::warn!(
                    target: "vram.config",
                    path = %path.display(),
                    "failed to open log file; file logging disabled"
                );
            }
        }
    });
}
