//! Shared session: state store, phase deriver, and transition scheduler.

pub mod phase;
pub mod scheduler;
pub mod store;

pub use phase::{Phase, PhaseThresholds, derive_phase};
pub use scheduler::{ScheduledStep, TimerFired, TimerRequest, TransitionScheduler};
pub use store::{
    ConnectionId, GazePoint, Outcome, PhaseChange, Role, SessionStore, Snapshot, TransitionCause,
};
