// Deployment-instance configuration. Every field has a serde default so a
// host can supply a partial JSON document (or none at all).

use crate::oracle::Aggregation;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Fold rule for multi-party reveals.
    #[serde(default)]
    pub aggregation: Aggregation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawConfig {
    /// Commit/reveal window length for oracle requests opened by draws.
    #[serde(default = "default_draw_window_secs")]
    pub draw_window_secs: u64,
    /// Rejection-resample until all winners are distinct entries.
    #[serde(default)]
    pub distinct_winners: bool,
    /// Per-winner resample bound in distinct mode.
    #[serde(default = "default_max_resample_attempts")]
    pub max_resample_attempts: u32,
}

fn default_draw_window_secs() -> u64 {
    300
}

fn default_max_resample_attempts() -> u32 {
    64
}

impl Default for DrawConfig {
    fn default() -> Self {
        Self {
            draw_window_secs: default_draw_window_secs(),
            distinct_winners: false,
            max_resample_attempts: default_max_resample_attempts(),
        }
    }
}

/// One logical deployment instance worth of configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub draw: DrawConfig,
}

impl DeploymentConfig {
    pub fn from_json_str(data: &str) -> Result<Self, String> {
        serde_json::from_str(data).map_err(|e| format!("{}", e))
    }
}
