//! Configuration schema for the installation server.
//!
//! Every field is optional in YAML; omitted fields take the defaults that
//! the installation was tuned with.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::session::phase::PhaseThresholds;

/// Default listen address.
pub const DEFAULT_BIND: &str = "0.0.0.0:3000";

/// Default maximum inbound WebSocket message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default capacity of the snapshot broadcast channel.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallationConfig {
    /// Network settings.
    pub server: ServerSettings,
    /// Session tuning.
    pub session: SessionConfig,
}

/// Network-facing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    /// Listen address in `[host:]port` form.
    pub bind: String,
    /// Largest accepted inbound message in bytes.
    pub max_message_size: usize,
    /// Snapshots buffered per subscriber before it is considered lagging.
    pub broadcast_capacity: usize,
    /// Directory of static client assets, served for non-API paths.
    pub public_dir: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            public_dir: None,
        }
    }
}

/// Tunables for the shared session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Pressure added when an audience member starts gazing.
    pub gaze_start_pressure: f64,
    /// Pressure added per sustained-gaze tick.
    pub gaze_hold_pressure: f64,
    /// Intensity of a freshly started gaze.
    pub base_intensity: f64,
    /// Intensity added per sustained-gaze tick.
    pub intensity_step: f64,
    /// Intensity ceiling.
    pub max_intensity: f64,
    /// Pressure thresholds for phase derivation.
    pub thresholds: PhaseThresholds,
    /// Delay between rupture and automatic transmutation.
    #[serde(with = "duration_str")]
    pub rupture_delay: Duration,
    /// Delay between transmutation and the automatic reset.
    #[serde(with = "duration_str")]
    pub transmutation_delay: Duration,
    /// Only experiencer-role clients may trigger transmutation or reset.
    pub experiencer_controls_only: bool,
    /// Seed for gaze angles; random when absent.
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gaze_start_pressure: 0.5,
            gaze_hold_pressure: 0.15,
            base_intensity: 0.5,
            intensity_step: 0.1,
            max_intensity: 2.0,
            thresholds: PhaseThresholds::default(),
            rupture_delay: Duration::from_secs(3),
            transmutation_delay: Duration::from_secs(10),
            experiencer_controls_only: false,
            seed: None,
        }
    }
}

/// Serde adapter for human-readable durations (`"3s"`, `"250ms"`, `"1m 30s"`).
mod duration_str {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim())
            .map_err(|e| serde::de::Error::custom(format!("invalid duration '{raw}': {e}")))
    }
}
