use crate::reclaim::BatchReclaimReport;
use crate::types::DeviceInfo;
use std::fmt::Write as _;

/// Multi-line status block for a device, as shown by the monitor.
pub fn render_device_info(info: &DeviceInfo) -> String {
    if !info.available {
        return format!("device {} unavailable", info.index);
    }

    let mut out = format!("=== device {} ===\n", info.index);
    let _ = writeln!(out, "name: {}", info.name.as_deref().unwrap_or("unknown"));
    if let Some(memory) = info.memory {
        let _ = writeln!(out, "total: {:.2} GB", memory.total_gb);
        let _ = writeln!(
            out,
            "used: {:.2} GB ({:.1}%)",
            memory.used_gb,
            memory.usage_percent()
        );
        let _ = writeln!(out, "free: {:.2} GB", memory.free_gb);
    }
    if let Some(temperature) = info.temperature_c {
        let _ = writeln!(out, "temperature: {temperature}°C");
    }
    if let Some(utilization) = info.utilization_percent {
        let _ = writeln!(out, "utilization: {utilization}%");
    }
    out.truncate(out.trim_end().len());
    out
}

/// Single-line device summary for logs.
pub fn summarize_device_info(info: &DeviceInfo) -> String {
    let mut parts = vec![format!("device {}", info.index)];
    if !info.available {
        parts.push("unavailable".to_owned());
        return parts.join(" | ");
    }
    if let Some(name) = &info.name {
        parts.push(format!("model: {name}"));
    }
    if let Some(memory) = info.memory {
        parts.push(format!(
            "memory: {:.2}GB/{:.2}GB ({:.1}% used, {:.2}GB free)",
            memory.used_gb,
            memory.total_gb,
            memory.usage_percent(),
            memory.free_gb
        ));
    }
    if let Some(temperature) = info.temperature_c {
        parts.push(format!("temperature: {temperature}°C"));
    }
    if let Some(utilization) = info.utilization_percent {
        parts.push(format!("utilization: {utilization}%"));
    }
    parts.join(" | ")
}

impl BatchReclaimReport {
    /// Human-readable report of a batch reclaim.
    pub fn render(&self) -> String {
        let mut lines = vec!["=== reclaim report ===".to_owned()];
        for report in &self.devices {
            if !report.attempted {
                lines.push(format!(
                    "device {}: skipped (no such device)",
                    report.device_index
                ));
            } else if report.measured() {
                lines.push(format!(
                    "device {}: freed {:.2}GB ({:.0}MB)",
                    report.device_index,
                    report.freed_gb,
                    report.freed_mb()
                ));
            } else {
                lines.push(format!(
                    "device {}: reclaimed (not measured)",
                    report.device_index
                ));
            }
        }
        if self.devices.len() != 1 {
            lines.push(format!("total freed: {:.2}GB", self.total_freed_gb));
        }
        if self.aggressive {
            let released = self
                .devices
                .iter()
                .any(|report| report.model_cache_released == Some(true));
            lines.push(if released {
                "aggressive reclaim: model cache released".to_owned()
            } else {
                "aggressive reclaim: model cache not released".to_owned()
            });
        }
        lines.push("done".to_owned());
        lines.join("\n")
    }
}
