use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse device memory pressure bands used by smart mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureBand {
    /// Little free memory left; reserve a large fixed fraction.
    Tight,
    /// Trust the buffer-based estimate.
    Medium,
    /// Ample headroom; only the safety floor matters.
    Loose,
}

impl PressureBand {
    pub fn as_str(self) -> &'static str {
        match self {
            PressureBand::Tight => "tight",
            PressureBand::Medium => "medium",
            PressureBand::Loose => "loose",
        }
    }
}

impl fmt::Display for PressureBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for computing [`PressureBand`] from the free/total ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureBandThresholds {
    /// `Tight` when `free / total < tight`.
    pub tight: f64,
    /// `Medium` when `tight <= free / total < medium`, `Loose` above.
    pub medium: f64,
}

impl Default for PressureBandThresholds {
    fn default() -> Self {
        Self {
            tight: 0.20,
            medium: 0.40,
        }
    }
}

impl PressureBandThresholds {
    pub fn band_for_ratio(self, available_ratio: f64) -> PressureBand {
        if available_ratio < self.tight {
            PressureBand::Tight
        } else if available_ratio < self.medium {
            PressureBand::Medium
        } else {
            PressureBand::Loose
        }
    }
}
