//! amdgpu telemetry read from the DRM sysfs tree.
//!
//! Each `cardN/device` directory that exposes `mem_info_vram_total` is treated as one
//! device, ordered by card number. Every file read is best-effort.

use super::{TelemetryBackend, TelemetryError};
use crate::types::MemorySnapshot;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

#[cfg(target_os = "linux")]
const DEFAULT_DRM_ROOT: &str = "/sys/class/drm";

#[derive(Debug, Clone, Default)]
pub struct SysfsBackend {
    devices: Vec<PathBuf>,
}

impl SysfsBackend {
    /// Enumerate devices under `/sys/class/drm`. Empty on non-Linux hosts.
    pub fn discover() -> Self {
        #[cfg(target_os = "linux")]
        {
            Self::with_root(DEFAULT_DRM_ROOT)
        }

        #[cfg(not(target_os = "linux"))]
        {
            Self::default()
        }
    }

    /// Enumerate devices under an arbitrary DRM class directory.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::debug!(
                        target: "vram.telemetry",
                        path = %root.display(),
                        error = %err,
                        "failed to list DRM devices"
                    );
                }
                return Self::default();
            }
        };

        let mut cards: Vec<(u32, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let number = parse_card_number(name.to_str()?)?;
                let device = entry.path().join("device");
                device
                    .join("mem_info_vram_total")
                    .is_file()
                    .then_some((number, device))
            })
            .collect();
        cards.sort_by_key(|(number, _)| *number);

        Self {
            devices: cards.into_iter().map(|(_, device)| device).collect(),
        }
    }

    fn device_dir(&self, index: u32) -> Option<&Path> {
        self.devices.get(index as usize).map(PathBuf::as_path)
    }

    fn read_u64(&self, index: u32, file: &str) -> Option<u64> {
        let path = self.device_dir(index)?.join(file);
        read_u64(&path).map_err(report_read_error).ok()
    }
}

/// `card0` → `Some(0)`; connector entries such as `card0-DP-1` are skipped.
pub(crate) fn parse_card_number(name: &str) -> Option<u32> {
    name.strip_prefix("card")?.parse().ok()
}

fn read_u64(path: &Path) -> Result<u64, TelemetryError> {
    let text = std::fs::read_to_string(path).map_err(|source| TelemetryError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let value = text.trim();
    value.parse().map_err(|_| TelemetryError::Parse {
        path: path.display().to_string(),
        value: value.to_owned(),
    })
}

fn report_read_error(err: TelemetryError) -> TelemetryError {
    // Optional attributes are routinely missing; only surface the first unexpected failure.
    let expected = matches!(&err, TelemetryError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound);
    static REPORTED: OnceLock<()> = OnceLock::new();
    if !expected && REPORTED.set(()).is_ok() {
        tracing::debug!(target: "vram.telemetry", error = %err, "failed to read sysfs attribute");
    }
    err
}

impl TelemetryBackend for SysfsBackend {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn device_count(&self) -> u32 {
        self.devices.len() as u32
    }

    fn memory_snapshot(&self, index: u32) -> Option<MemorySnapshot> {
        let total = self.read_u64(index, "mem_info_vram_total")?;
        let used = self.read_u64(index, "mem_info_vram_used")?;
        Some(MemorySnapshot::from_bytes(
            total,
            used,
            total.saturating_sub(used),
        ))
    }

    fn device_name(&self, index: u32) -> Option<String> {
        let path = self.device_dir(index)?.join("product_name");
        let name = std::fs::read_to_string(path).ok()?;
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_owned())
    }

    fn temperature(&self, index: u32) -> Option<u32> {
        let hwmon = self.device_dir(index)?.join("hwmon");
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(hwmon)
            .ok()?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect();
        dirs.sort();
        dirs.into_iter().find_map(|dir| {
            read_u64(&dir.join("temp1_input"))
                .ok()
                .map(|millidegrees| (millidegrees / 1000) as u32)
        })
    }

    fn utilization(&self, index: u32) -> Option<u32> {
        self.read_u64(index, "gpu_busy_percent")
            .map(|value| value.min(100) as u32)
    }
}
