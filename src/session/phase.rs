//! Installation phases and the pressure → phase deriver.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Publicly visible stage of the installation narrative.
///
/// Serialized lowercase (`"waiting"`, `"rupture"`, ...) because clients
/// switch on the string directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No gaze activity since start or the last reset.
    #[default]
    Waiting,
    /// Pressure below the unstable threshold.
    Stable,
    /// Pressure between the unstable and critical thresholds.
    Unstable,
    /// Pressure between the critical and rupture thresholds.
    Critical,
    /// Pressure reached the rupture threshold; transmutation is scheduled.
    Rupture,
    /// Entered by timer or manual trigger; a reset is scheduled.
    Transmutation,
}

impl Phase {
    /// All phases in narrative order.
    pub const ALL: [Self; 6] = [
        Self::Waiting,
        Self::Stable,
        Self::Unstable,
        Self::Critical,
        Self::Rupture,
        Self::Transmutation,
    ];

    /// Wire name of the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Stable => "stable",
            Self::Unstable => "unstable",
            Self::Critical => "critical",
            Self::Rupture => "rupture",
            Self::Transmutation => "transmutation",
        }
    }

    /// Whether this phase belongs to the timer-driven sequence.
    ///
    /// While in one of these phases pressure changes do not re-derive the
    /// phase.
    #[must_use]
    pub const fn is_timed(self) -> bool {
        matches!(self, Self::Rupture | Self::Transmutation)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds (inclusive) of the pressure-derived phases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhaseThresholds {
    /// Pressure at which the object becomes unstable.
    pub unstable: f64,
    /// Pressure at which the object becomes critical.
    pub critical: f64,
    /// Pressure at which the object ruptures.
    pub rupture: f64,
}

impl Default for PhaseThresholds {
    fn default() -> Self {
        Self {
            unstable: 10.0,
            critical: 30.0,
            rupture: 60.0,
        }
    }
}

impl PhaseThresholds {
    /// Maps pressure to a phase. Never yields `Waiting` or `Transmutation`.
    #[must_use]
    pub fn derive(&self, pressure: f64) -> Phase {
        if pressure >= self.rupture {
            Phase::Rupture
        } else if pressure >= self.critical {
            Phase::Critical
        } else if pressure >= self.unstable {
            Phase::Unstable
        } else {
            Phase::Stable
        }
    }
}

/// Derives the phase for `pressure` using the default thresholds.
#[must_use]
pub fn derive_phase(pressure: f64) -> Phase {
    PhaseThresholds::default().derive(pressure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn below_unstable_is_stable() {
        assert_eq!(derive_phase(0.0), Phase::Stable);
        assert_eq!(derive_phase(9.999), Phase::Stable);
    }

    #[test]
    fn boundaries_are_inclusive_lower_bounds() {
        assert_eq!(derive_phase(10.0), Phase::Unstable);
        assert_eq!(derive_phase(29.999), Phase::Unstable);
        assert_eq!(derive_phase(30.0), Phase::Critical);
        assert_eq!(derive_phase(59.999), Phase::Critical);
        assert_eq!(derive_phase(60.0), Phase::Rupture);
        assert_eq!(derive_phase(1.0e9), Phase::Rupture);
    }

    #[test]
    fn custom_thresholds() {
        let t = PhaseThresholds {
            unstable: 1.0,
            critical: 2.0,
            rupture: 3.0,
        };
        assert_eq!(t.derive(0.5), Phase::Stable);
        assert_eq!(t.derive(1.0), Phase::Unstable);
        assert_eq!(t.derive(2.5), Phase::Critical);
        assert_eq!(t.derive(3.0), Phase::Rupture);
    }

    #[test]
    fn phase_serializes_lowercase() {
        for phase in Phase::ALL {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{}\"", phase.as_str()));
        }
    }

    #[test]
    fn only_rupture_and_transmutation_are_timed() {
        let timed: Vec<Phase> = Phase::ALL.into_iter().filter(|p| p.is_timed()).collect();
        assert_eq!(timed, vec![Phase::Rupture, Phase::Transmutation]);
    }

    proptest! {
        #[test]
        fn deriver_matches_threshold_table(p in 0.0f64..200.0) {
            let expected = if p < 10.0 {
                Phase::Stable
            } else if p < 30.0 {
                Phase::Unstable
            } else if p < 60.0 {
                Phase::Critical
            } else {
                Phase::Rupture
            };
            prop_assert_eq!(derive_phase(p), expected);
            prop_assert_eq!(derive_phase(p), derive_phase(p));
        }

        #[test]
        fn deriver_never_yields_waiting_or_transmutation(p in 0.0f64..1.0e12) {
            let phase = derive_phase(p);
            prop_assert_ne!(phase, Phase::Waiting);
            prop_assert_ne!(phase, Phase::Transmutation);
        }
    }
}
