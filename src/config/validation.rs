//! Configuration validation.
//!
//! Runs on the fully deserialized [`InstallationConfig`] and collects every
//! issue instead of stopping at the first, so an operator fixing a config
//! on site sees everything wrong in one pass.

use std::time::Duration;

use crate::config::schema::{InstallationConfig, ServerSettings, SessionConfig};
use crate::error::{Severity, ValidationIssue};
use crate::transport::ws::parse_bind_addr;

/// Smallest accepted `server.max_message_size`.
pub const MIN_MESSAGE_SIZE: usize = 64;

/// Largest accepted intensity value.
pub const INTENSITY_CEILING: f64 = 2.0;

/// Largest accepted `server.broadcast_capacity`.
pub const MAX_BROADCAST_CAPACITY: usize = 65_536;

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Issues that prevent loading.
    pub errors: Vec<ValidationIssue>,

    /// Informational issues.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &InstallationConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_server(&config.server);
        self.validate_pressure(&config.session);
        self.validate_intensity(&config.session);
        self.validate_thresholds(&config.session);
        self.validate_delays(&config.session);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Server
    // ========================================================================

    fn validate_server(&mut self, server: &ServerSettings) {
        if let Err(e) = parse_bind_addr(&server.bind) {
            self.add_error("server.bind", &e.to_string());
        }

        if server.max_message_size < MIN_MESSAGE_SIZE {
            self.add_error(
                "server.max_message_size",
                &format!("must be at least {MIN_MESSAGE_SIZE} bytes"),
            );
        }

        if server.broadcast_capacity == 0 {
            self.add_error("server.broadcast_capacity", "must be at least 1");
        } else if server.broadcast_capacity > MAX_BROADCAST_CAPACITY {
            self.add_error(
                "server.broadcast_capacity",
                &format!("must be at most {MAX_BROADCAST_CAPACITY}"),
            );
        }

        if let Some(dir) = &server.public_dir
            && !dir.is_dir()
        {
            self.add_warning(
                "server.public_dir",
                &format!("'{}' is not a directory; static assets will 404", dir.display()),
            );
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    fn validate_pressure(&mut self, session: &SessionConfig) {
        self.require_non_negative("session.gaze_start_pressure", session.gaze_start_pressure);
        self.require_non_negative("session.gaze_hold_pressure", session.gaze_hold_pressure);

        if session.gaze_start_pressure == 0.0 && session.gaze_hold_pressure == 0.0 {
            self.add_warning(
                "session.gaze_hold_pressure",
                "both pressure increments are zero; the object can never rupture",
            );
        }
    }

    fn validate_intensity(&mut self, session: &SessionConfig) {
        self.require_non_negative("session.intensity_step", session.intensity_step);

        for (path, value) in [
            ("session.base_intensity", session.base_intensity),
            ("session.max_intensity", session.max_intensity),
        ] {
            if !value.is_finite() || !(0.0..=INTENSITY_CEILING).contains(&value) {
                self.add_error(path, &format!("must be between 0 and {INTENSITY_CEILING}"));
            }
        }

        if session.base_intensity > session.max_intensity {
            self.add_error(
                "session.base_intensity",
                "must not exceed session.max_intensity",
            );
        }
    }

    fn validate_thresholds(&mut self, session: &SessionConfig) {
        let t = &session.thresholds;
        let named = [
            ("session.thresholds.unstable", t.unstable),
            ("session.thresholds.critical", t.critical),
            ("session.thresholds.rupture", t.rupture),
        ];

        let mut all_valid = true;
        for (path, value) in named {
            if !value.is_finite() || value <= 0.0 {
                self.add_error(path, "must be a finite number greater than zero");
                all_valid = false;
            }
        }
        if !all_valid {
            return;
        }

        if t.critical <= t.unstable {
            self.add_error(
                "session.thresholds.critical",
                "must be greater than session.thresholds.unstable",
            );
        }
        if t.rupture <= t.critical {
            self.add_error(
                "session.thresholds.rupture",
                "must be greater than session.thresholds.critical",
            );
        }
    }

    fn validate_delays(&mut self, session: &SessionConfig) {
        for (path, delay) in [
            ("session.rupture_delay", session.rupture_delay),
            ("session.transmutation_delay", session.transmutation_delay),
        ] {
            if delay.is_zero() {
                self.add_error(path, "must be greater than zero");
            } else if delay > Duration::from_secs(3600) {
                self.add_warning(path, "is longer than an hour");
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn require_non_negative(&mut self, path: &str, value: f64) {
        if !value.is_finite() || value < 0.0 {
            self.add_error(path, "must be a finite number >= 0");
        }
    }

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}
