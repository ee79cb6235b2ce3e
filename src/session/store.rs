//! Session state store.
//!
//! [`SessionStore`] is the single source of truth for watchers, pressure,
//! phase, and gaze contributions. It is a plain owned value with no interior
//! locking: the hub task owns it and applies events one at a time, so every
//! operation runs to completion before the next one starts.
//!
//! Operations never fail. Protocol misuse (holding a gaze that was never
//! started, a non-audience client gazing, timers that lost a race) comes
//! back as [`Outcome::ignored`] and leaves the state untouched.

use std::collections::HashSet;
use std::f64::consts::TAU;
use std::fmt;

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::schema::SessionConfig;

use super::phase::Phase;
use super::scheduler::{ScheduledStep, TimerRequest};

/// Transport-assigned identifier of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw connection number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw connection number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Role a client declares with `join-as`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Counted watcher who contributes gaze pressure.
    Audience,
    /// Person inside the installation, holding the manual controls.
    Experiencer,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audience => "audience",
            Self::Experiencer => "experiencer",
        }
    }
}

/// One client's live gaze contribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeRecord {
    /// Position around the object, in `[0, 2π)`.
    pub angle: f64,
    /// Current intensity, in `[0, max_intensity]`.
    pub intensity: f64,
}

/// Gaze contribution as it appears in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazePoint {
    /// Connection that owns the gaze.
    pub id: ConnectionId,
    /// Position around the object, in radians.
    pub angle: f64,
    /// Current intensity.
    pub intensity: f64,
}

/// Full session state as sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Connected audience clients.
    pub watchers: usize,
    /// Accumulated pressure.
    pub total_pressure: f64,
    /// Current phase.
    pub phase: Phase,
    /// Active gazes in the order they started.
    pub gaze_points: Vec<GazePoint>,
}

/// What caused a phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionCause {
    /// Pressure crossed a threshold.
    Pressure,
    /// A scheduled timer fired.
    Timer,
    /// A client sent `trigger-transmutation`.
    Trigger,
    /// A client sent `reset-experience`.
    Reset,
}

impl TransitionCause {
    /// Label used in logs, metrics, and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pressure => "pressure",
            Self::Timer => "timer",
            Self::Trigger => "trigger",
            Self::Reset => "reset",
        }
    }
}

/// A phase change produced by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    /// Phase before the operation.
    pub from: Phase,
    /// Phase after the operation.
    pub to: Phase,
    /// Why the phase changed.
    pub cause: TransitionCause,
}

/// Result of applying one operation to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[must_use]
pub struct Outcome {
    /// Whether any observable state changed. Callers broadcast iff `true`.
    pub changed: bool,
    /// Phase change, if the operation moved the phase.
    pub transition: Option<PhaseChange>,
    /// Timer the caller must arm, if the operation entered a timed phase.
    pub schedule: Option<TimerRequest>,
}

impl Outcome {
    /// Operation was rejected or had nothing to do.
    pub const fn ignored() -> Self {
        Self {
            changed: false,
            transition: None,
            schedule: None,
        }
    }

    const fn applied() -> Self {
        Self {
            changed: true,
            transition: None,
            schedule: None,
        }
    }
}

/// Authoritative shared session.
pub struct SessionStore {
    config: SessionConfig,
    audience: HashSet<ConnectionId>,
    total_pressure: f64,
    phase: Phase,
    gaze_points: IndexMap<ConnectionId, GazeRecord>,
    /// Bumped whenever a timed sequence starts or is superseded; pending
    /// timers carry the value they were armed with.
    generation: u64,
    rng: StdRng,
}

impl SessionStore {
    /// Creates a store in the waiting phase with no watchers.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self {
            config,
            audience: HashSet::new(),
            total_pressure: 0.0,
            phase: Phase::Waiting,
            gaze_points: IndexMap::new(),
            generation: 0,
            rng,
        }
    }

    /// Number of counted audience clients.
    #[must_use]
    pub fn watchers(&self) -> usize {
        self.audience.len()
    }

    /// Accumulated pressure.
    #[must_use]
    pub const fn total_pressure(&self) -> f64 {
        self.total_pressure
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Current timer generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Gaze record for `id`, if that client is gazing.
    #[must_use]
    pub fn gaze(&self, id: ConnectionId) -> Option<&GazeRecord> {
        self.gaze_points.get(&id)
    }

    /// Whether `id` is a counted watcher.
    #[must_use]
    pub fn is_watcher(&self, id: ConnectionId) -> bool {
        self.audience.contains(&id)
    }

    /// Session tunables.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read-only copy of the full state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            watchers: self.watchers(),
            total_pressure: self.total_pressure,
            phase: self.phase,
            gaze_points: self
                .gaze_points
                .iter()
                .map(|(id, g)| GazePoint {
                    id: *id,
                    angle: g.angle,
                    intensity: g.intensity,
                })
                .collect(),
        }
    }

    /// Counts `id` as a watcher. Counting the same client twice is a no-op.
    pub fn register_watcher(&mut self, id: ConnectionId) -> Outcome {
        if self.audience.insert(id) {
            Outcome::applied()
        } else {
            Outcome::ignored()
        }
    }

    /// Uncounts `id` and drops its gaze. Unknown clients are a no-op, so the
    /// watcher count cannot go below zero.
    pub fn unregister_watcher(&mut self, id: ConnectionId) -> Outcome {
        let uncounted = self.audience.remove(&id);
        let gaze_dropped = self.gaze_points.shift_remove(&id).is_some();
        if uncounted || gaze_dropped {
            Outcome::applied()
        } else {
            Outcome::ignored()
        }
    }

    /// Starts a gaze for a watcher that is not already gazing.
    pub fn start_gaze(&mut self, id: ConnectionId) -> Outcome {
        if !self.audience.contains(&id) || self.gaze_points.contains_key(&id) {
            return Outcome::ignored();
        }
        let angle = self.rng.random_range(0.0..TAU);
        self.gaze_points.insert(
            id,
            GazeRecord {
                angle,
                intensity: self.config.base_intensity.min(self.config.max_intensity),
            },
        );
        self.add_pressure(self.config.gaze_start_pressure)
    }

    /// Sustains an active gaze: adds pressure and raises intensity up to the cap.
    pub fn hold_gaze(&mut self, id: ConnectionId) -> Outcome {
        let Some(record) = self.gaze_points.get_mut(&id) else {
            return Outcome::ignored();
        };
        record.intensity = (record.intensity + self.config.intensity_step)
            .clamp(0.0, self.config.max_intensity);
        self.add_pressure(self.config.gaze_hold_pressure)
    }

    /// Ends a gaze. Ending a gaze that does not exist is a no-op.
    pub fn end_gaze(&mut self, id: ConnectionId) -> Outcome {
        if self.gaze_points.shift_remove(&id).is_some() {
            Outcome::applied()
        } else {
            Outcome::ignored()
        }
    }

    /// Forces the transmutation phase and zeroes pressure, superseding any
    /// pending timer. Arms the reset timer.
    pub fn trigger_transmutation(&mut self) -> Outcome {
        self.enter_transmutation(TransitionCause::Trigger)
    }

    /// Returns to zero pressure and the waiting phase, clearing every gaze.
    /// Watchers are kept. Any pending timer is superseded.
    pub fn reset_experience(&mut self) -> Outcome {
        self.reset(TransitionCause::Reset)
    }

    /// Applies a fired timer. Stale timers (wrong generation, or the phase
    /// moved on) are ignored.
    pub fn fire(&mut self, step: ScheduledStep, generation: u64) -> Outcome {
        if generation != self.generation || self.phase != step.armed_in() {
            return Outcome::ignored();
        }
        match step {
            ScheduledStep::Transmute => self.enter_transmutation(TransitionCause::Timer),
            ScheduledStep::Reset => self.reset(TransitionCause::Timer),
        }
    }

    fn add_pressure(&mut self, amount: f64) -> Outcome {
        self.total_pressure += amount.max(0.0);
        let mut outcome = Outcome::applied();

        // Timer-driven phases win over pressure until the sequence ends.
        if self.phase.is_timed() {
            return outcome;
        }

        let derived = self.config.thresholds.derive(self.total_pressure);
        if derived == self.phase {
            return outcome;
        }

        outcome.transition = Some(PhaseChange {
            from: self.phase,
            to: derived,
            cause: TransitionCause::Pressure,
        });
        self.phase = derived;

        if derived == Phase::Rupture {
            self.generation += 1;
            outcome.schedule = Some(TimerRequest {
                step: ScheduledStep::Transmute,
                generation: self.generation,
                delay: self.config.rupture_delay,
            });
        }
        outcome
    }

    fn enter_transmutation(&mut self, cause: TransitionCause) -> Outcome {
        let from = self.phase;
        self.phase = Phase::Transmutation;
        self.total_pressure = 0.0;
        self.generation += 1;
        Outcome {
            changed: true,
            transition: Some(PhaseChange {
                from,
                to: Phase::Transmutation,
                cause,
            }),
            schedule: Some(TimerRequest {
                step: ScheduledStep::Reset,
                generation: self.generation,
                delay: self.config.transmutation_delay,
            }),
        }
    }

    fn reset(&mut self, cause: TransitionCause) -> Outcome {
        let from = self.phase;
        self.phase = Phase::Waiting;
        self.total_pressure = 0.0;
        self.gaze_points.clear();
        self.generation += 1;
        Outcome {
            changed: true,
            transition: (from != Phase::Waiting).then_some(PhaseChange {
                from,
                to: Phase::Waiting,
                cause,
            }),
            schedule: None,
        }
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("watchers", &self.watchers())
            .field("total_pressure", &self.total_pressure)
            .field("phase", &self.phase)
            .field("gazing", &self.gaze_points.len())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
