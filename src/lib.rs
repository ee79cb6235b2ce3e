//! `rupture` - shared-gaze installation server
//!
//! Audience members gaze at a shared virtual object. Their pooled pressure
//! drives the object through a sequence of phases, which the server
//! broadcasts to every connected client over WebSocket. A rupture is
//! followed by timed transmutation and reset.

pub mod cli;
pub mod config;
pub mod error;
pub mod hub;
pub mod observability;
pub mod session;
pub mod transport;
