//! Collaborator the controller calls out to.
//!
//! The controller owns no operator-facing state. It asks its [`SessionHost`] for the
//! port, parameters and file location, and reports state changes, counters and
//! errors back to it. A GUI, a CLI or a test harness can each be a host.

use super::state::{CapabilityBoard, SessionState};
use crate::config::RigConfig;
use crate::data::record::SessionSummary;
use crate::data::tally::TrialTally;
use crate::error::DaqError;
use crate::protocol::parameters::ParameterSet;
use crate::protocol::rig::EventKind;
use chrono::Local;
use std::path::PathBuf;
use tracing::{debug, error, info};

/// Operator-side collaborator of a [`super::controller::SessionController`].
pub trait SessionHost: Send {
    /// Port to open.
    fn port(&self) -> Option<String>;

    /// Parameters to upload, in upload order.
    fn parameters(&self) -> ParameterSet;

    /// Session file; `None` lets the controller generate a name.
    fn save_path(&self) -> Option<PathBuf> {
        None
    }

    /// Subject identifier.
    fn subject(&self) -> String {
        String::new()
    }

    /// Subject weight in grams.
    fn weight(&self) -> Option<f64> {
        None
    }

    /// Operator notes, read at start and again at the end.
    fn notes(&self) -> String {
        String::new()
    }

    /// The controller entered `state`.
    fn state_changed(&mut self, _state: SessionState, _capabilities: &CapabilityBoard) {}

    /// The counter of `kind` changed.
    fn counter_changed(&mut self, _kind: EventKind, _count: usize) {}

    /// The go/no-go tally changed.
    fn tally_changed(&mut self, _tally: &TrialTally) {}

    /// The device announced the next trial.
    fn next_trial_preview(&mut self, _timestamp: i64, _payload: i64) {}

    /// A session was finalized.
    fn session_ended(&mut self, _summary: &SessionSummary) {}

    /// An operation failed. Called once per failure.
    fn report_error(&mut self, _error: &DaqError) {}
}

/// Host backed by a configuration snapshot, reporting through `tracing`.
#[derive(Debug, Clone)]
pub struct ConfigHost {
    config: RigConfig,
    summaries: Vec<SessionSummary>,
    errors: Vec<String>,
}

impl ConfigHost {
    /// Host for `config`.
    pub fn new(config: RigConfig) -> Self {
        Self {
            config,
            summaries: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    /// Mutable configuration; changes apply to the next open or start.
    pub fn config_mut(&mut self) -> &mut RigConfig {
        &mut self.config
    }

    /// Summaries of every finished session.
    pub fn summaries(&self) -> &[SessionSummary] {
        &self.summaries
    }

    /// Every reported error, as text.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

impl SessionHost for ConfigHost {
    fn port(&self) -> Option<String> {
        self.config.serial.port.clone()
    }

    fn parameters(&self) -> ParameterSet {
        self.config.parameter_set()
    }

    fn save_path(&self) -> Option<PathBuf> {
        Some(self.config.save_path_at(Local::now()))
    }

    fn subject(&self) -> String {
        self.config.session.subject.clone()
    }

    fn weight(&self) -> Option<f64> {
        self.config.session.weight
    }

    fn notes(&self) -> String {
        self.config.session.notes.clone()
    }

    fn state_changed(&mut self, state: SessionState, _capabilities: &CapabilityBoard) {
        debug!("Session state: {}", state);
    }

    fn counter_changed(&mut self, kind: EventKind, count: usize) {
        debug!(kind = kind.name(), count, "counter");
    }

    fn tally_changed(&mut self, tally: &TrialTally) {
        debug!(
            licks = tally.lick_onsets,
            cs0 = tally.cs_trials[0],
            cs1 = tally.cs_trials[1],
            cs2 = tally.cs_trials[2],
            "tally"
        );
    }

    fn next_trial_preview(&mut self, timestamp: i64, payload: i64) {
        info!("Next trial (type {}) at {} ms", payload, timestamp);
    }

    fn session_ended(&mut self, summary: &SessionSummary) {
        info!(
            "Session '{}' saved to '{}'{}",
            summary.group,
            summary.file.display(),
            if summary.truncated { " (truncated)" } else { "" }
        );
        self.summaries.push(summary.clone());
    }

    fn report_error(&mut self, err: &DaqError) {
        error!("{}", err);
        self.errors.push(err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::rig::Rig;

    #[test]
    fn config_host_reads_snapshot() {
        let mut config = RigConfig::default();
        config.serial.port = Some("/dev/ttyACM0".into());
        config.session.rig = Rig::Wheel;
        config.session.subject = "w3".into();
        config.storage.save_path = Some(PathBuf::from("out/w3.json"));

        let host = ConfigHost::new(config);
        assert_eq!(host.port().as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(host.parameters().len(), 2);
        assert_eq!(host.subject(), "w3");
        assert_eq!(host.save_path(), Some(PathBuf::from("out/w3.json")));
    }

    #[test]
    fn errors_are_kept() {
        let mut host = ConfigHost::new(RigConfig::default());
        host.report_error(&DaqError::SerialPortNotConnected);
        assert_eq!(host.errors(), ["Serial port not connected"]);
    }
}
