//! Prometheus metrics for `rupture`.
//!
//! Every label value is drawn from a closed set (phase names, protocol
//! event names, transition causes). Anything else a client sends is
//! bucketed as `"__unknown__"`.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::RuptureError;
use crate::session::Phase;
use crate::transport::protocol::CLIENT_EVENTS;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Returns `event` when it is a protocol event name, `"__unknown__"` otherwise.
#[must_use]
pub fn sanitize_event_label(event: &str) -> &str {
    if CLIENT_EVENTS.contains(&event) {
        event
    } else {
        "__unknown__"
    }
}

/// Initializes the global metrics recorder.
///
/// With `Some(port)` a Prometheus scrape endpoint is served on
/// `127.0.0.1:<port>`. With `None` the recorder is installed without an
/// endpoint.
///
/// # Errors
///
/// Returns `RuptureError::Io` if the recorder or listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), RuptureError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| RuptureError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "rupture_client_messages_total",
        "Client messages received, by event"
    );
    describe_counter!(
        "rupture_ignored_messages_total",
        "Client messages that changed nothing, by event"
    );
    describe_counter!(
        "rupture_malformed_frames_total",
        "Inbound frames that failed to decode"
    );
    describe_counter!("rupture_broadcasts_total", "State updates broadcast");
    describe_counter!(
        "rupture_phase_transitions_total",
        "Phase transitions, by from/to/cause"
    );
    describe_gauge!("rupture_current_phase", "Current phase (1 = active)");
    describe_gauge!("rupture_watchers", "Counted audience watchers");
    describe_gauge!("rupture_pressure", "Accumulated gaze pressure");
    describe_gauge!(
        "rupture_connections_active",
        "Open WebSocket connections"
    );
}

/// Records a decoded client message.
pub fn record_client_message(event: &str) {
    counter!(
        "rupture_client_messages_total",
        "event" => sanitize_event_label(event).to_owned()
    )
    .increment(1);
}

/// Records a client message the session ignored.
pub fn record_ignored_message(event: &str) {
    counter!(
        "rupture_ignored_messages_total",
        "event" => sanitize_event_label(event).to_owned()
    )
    .increment(1);
}

/// Records a frame that could not be decoded.
pub fn record_malformed_frame() {
    counter!("rupture_malformed_frames_total").increment(1);
}

/// Records one state-update broadcast.
pub fn record_broadcast() {
    counter!("rupture_broadcasts_total").increment(1);
}

/// Records a phase transition and moves the current-phase gauge.
pub fn record_phase_transition(from: Phase, to: Phase, cause: &'static str) {
    counter!(
        "rupture_phase_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str(),
        "cause" => cause,
    )
    .increment(1);
    set_current_phase(to, Some(from));
}

/// Sets the current-phase gauge, zeroing the previous phase label.
pub fn set_current_phase(phase: Phase, previous: Option<Phase>) {
    if let Some(prev) = previous {
        gauge!("rupture_current_phase", "phase" => prev.as_str()).set(0.0);
    }
    gauge!("rupture_current_phase", "phase" => phase.as_str()).set(1.0);
}

/// Publishes the watcher count and pressure gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_session_gauges(watchers: usize, pressure: f64) {
    gauge!("rupture_watchers").set(watchers as f64);
    gauge!("rupture_pressure").set(pressure);
}

/// Sets the number of open connections.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections_active(count: usize) {
    gauge!("rupture_connections_active").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_events_pass_through() {
        for event in CLIENT_EVENTS {
            assert_eq!(sanitize_event_label(event), event);
        }
    }

    #[test]
    fn unknown_events_are_bucketed() {
        assert_eq!(sanitize_event_label("gaze-strat"), "__unknown__");
        assert_eq!(sanitize_event_label(""), "__unknown__");
        assert_eq!(sanitize_event_label(&"x".repeat(10_000)), "__unknown__");
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_client_message("gaze-start");
        record_ignored_message("gaze-hold");
        record_malformed_frame();
        record_broadcast();
        record_phase_transition(Phase::Critical, Phase::Rupture, "pressure");
        set_current_phase(Phase::Waiting, None);
        set_session_gauges(3, 12.5);
        set_connections_active(4);
    }
}
