//! Which intermediate image the orchestrator presents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::util::Error;

/// Selects the image returned by `ShadowPipeline::presented_texture`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DebugView {
    /// Per-pixel attenuation from the camera
    #[default]
    Final,
    /// Raw (d, d²) capture from the light
    Variance,
    /// SAT image A: row prefix sums only
    SatRows,
    /// SAT image B: the finished table
    Sat,
}

impl DebugView {
    pub const ALL: [DebugView; 4] = [
        DebugView::Final,
        DebugView::Variance,
        DebugView::SatRows,
        DebugView::Sat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Final => "final",
            Self::Variance => "variance",
            Self::SatRows => "sat-rows",
            Self::Sat => "sat",
        }
    }
}

impl fmt::Display for DebugView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DebugView {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                Error::invalid(format!(
                    "unknown debug view '{s}' (expected final, variance, sat-rows or sat)"
                ))
            })
    }
}
