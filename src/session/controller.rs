//! Session controller.
//!
//! Drives one rig through its lifecycle:
//!
//! 1. `open` opens the port, waits for the device to settle, uploads the parameters
//!    and waits for any reply.
//! 2. `start` claims a session group, starts the scanner and sends the start byte.
//! 3. `poll` (or `run_until_closed`) drains the event queue into the recorder.
//! 4. The device's end event, or a fatal error, finalizes the session file and closes
//!    the port.
//!
//! The controller never blocks on the device. All waiting happens on tokio timers,
//! and the only blocking reader is the scanner's thread.

use super::host::SessionHost;
use super::queue::EventQueue;
use super::recorder::{EventRecorder, RecordOutcome};
use super::scanner::{EventScanner, ScannerConfig, DEVICE_TARGET};
use super::state::{Capability, CapabilityBoard, SessionState};
use crate::adapters::{Connector, Transport};
use crate::config::{default_save_path, RigConfig};
use crate::data::capacity::CapacityPolicy;
use crate::data::record::{SessionEnd, SessionHeader, SessionRecord, SessionSummary};
use crate::data::storage::{open_storage, StorageFormat};
use crate::data::tally::TrialTally;
use crate::error::{AppResult, DaqError};
use crate::protocol::codec::encode_upload;
use crate::protocol::parameters::ParameterSet;
use crate::protocol::rig::{EventKind, ManualCommand, Rig, END_CODE};
use chrono::Local;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Interval between `bytes_available` checks during the handshake.
const HANDSHAKE_POLL: Duration = Duration::from_millis(10);

/// Controller timing and policies.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Rig variant.
    pub rig: Rig,
    /// Timeout of each scanner read.
    pub read_timeout: Duration,
    /// Wait after opening the port.
    pub settle_delay: Duration,
    /// Wait for the device to acknowledge the upload.
    pub handshake_timeout: Duration,
    /// Interval of `run_until_closed`.
    pub refresh_interval: Duration,
    /// Log device output.
    pub echo: bool,
    /// Event codes never logged.
    pub suppress_echo: BTreeSet<i64>,
    /// Force-close after an unanswered stop request.
    pub stop_confirm_timeout: Option<Duration>,
    /// Store pre-sizing.
    pub capacity: CapacityPolicy,
    /// Session file format.
    pub storage_format: StorageFormat,
    /// Directory for generated file names.
    pub output_dir: PathBuf,
    /// Periodic flush of the session file while running.
    pub auto_flush: Option<Duration>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&RigConfig::default())
    }
}

impl From<&RigConfig> for ControllerSettings {
    fn from(config: &RigConfig) -> Self {
        Self {
            rig: config.session.rig,
            read_timeout: Duration::from_millis(config.serial.read_timeout_ms),
            settle_delay: Duration::from_millis(config.serial.settle_delay_ms),
            handshake_timeout: Duration::from_millis(config.serial.handshake_timeout_ms),
            refresh_interval: Duration::from_millis(config.session.refresh_interval_ms.max(1)),
            echo: config.session.echo_device_output,
            suppress_echo: config.session.suppress_echo_codes.iter().copied().collect(),
            stop_confirm_timeout: config
                .session
                .stop_confirm_timeout_ms
                .map(Duration::from_millis),
            capacity: CapacityPolicy::Estimate {
                padding: config.session.capacity_padding,
            },
            storage_format: config.storage.format,
            output_dir: config.storage.output_dir.clone(),
            auto_flush: (config.storage.auto_flush_interval_secs > 0)
                .then(|| Duration::from_secs(config.storage.auto_flush_interval_secs)),
        }
    }
}

/// Result of one [`SessionController::poll`].
#[derive(Debug, Clone)]
pub enum PollStatus {
    /// No session is running.
    Idle,
    /// Session still running.
    Running,
    /// Session finalized during this poll.
    Finished(SessionSummary),
}

struct ActiveSession {
    record: SessionRecord,
    recorder: EventRecorder,
    scanner: Option<EventScanner>,
    stop_requested_at: Option<Instant>,
    last_flush: Instant,
}

/// How a session came to an end.
struct Ending {
    arduino_end: Option<i64>,
    error: Option<String>,
}

impl Ending {
    fn device(timestamp: i64) -> Self {
        Self {
            arduino_end: Some(timestamp),
            error: None,
        }
    }

    fn aborted(reason: impl ToString) -> Self {
        Self {
            arduino_end: None,
            error: Some(reason.to_string()),
        }
    }
}

/// Drives one rig through open, start, record and finalize.
pub struct SessionController<H: SessionHost> {
    settings: ControllerSettings,
    connector: Arc<dyn Connector>,
    host: H,
    state: SessionState,
    capabilities: CapabilityBoard,
    transport: Option<Box<dyn Transport>>,
    parameters: ParameterSet,
    queue: EventQueue,
    active: Option<ActiveSession>,
}

impl<H: SessionHost> SessionController<H> {
    /// Closed controller.
    pub fn new(settings: ControllerSettings, connector: Arc<dyn Connector>, host: H) -> Self {
        Self {
            settings,
            connector,
            host,
            state: SessionState::Closed,
            capabilities: CapabilityBoard::new(),
            transport: None,
            parameters: ParameterSet::new(),
            queue: EventQueue::new(),
            active: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Capability groups.
    pub fn capabilities(&self) -> &CapabilityBoard {
        &self.capabilities
    }

    /// Capability groups, for setting the host's own flags.
    pub fn capabilities_mut(&mut self) -> &mut CapabilityBoard {
        &mut self.capabilities
    }

    /// Settings in use.
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// The host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The host, mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Parameters uploaded to the open device; empty when closed.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Counter per persisted kind of the running session; empty when none runs.
    pub fn counters(&self) -> BTreeMap<EventKind, usize> {
        self.active
            .as_ref()
            .map(|active| active.recorder.counters())
            .unwrap_or_default()
    }

    /// Go/no-go tally of the running session.
    pub fn tally(&self) -> TrialTally {
        self.active
            .as_ref()
            .map(|active| active.recorder.tally())
            .unwrap_or_default()
    }

    fn set_state(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!("Unexpected transition {} -> {}", self.state, next);
        }
        debug!("{} -> {}", self.state, next);
        self.state = next;
        self.capabilities.set_state(next);
        self.host.state_changed(next, &self.capabilities);
    }

    /// Check the state and capability guarding `action`, reporting a refusal.
    fn admit(
        &mut self,
        expected: SessionState,
        action: &'static str,
        capability: Option<Capability>,
    ) -> AppResult<()> {
        if self.state != expected {
            return self.fail(DaqError::InvalidTransition {
                state: self.state,
                action,
            });
        }
        match capability.map(|c| self.capabilities.require(c)) {
            Some(Err(e)) => self.fail(e),
            _ => Ok(()),
        }
    }

    fn fail<T>(&mut self, err: DaqError) -> AppResult<T> {
        self.host.report_error(&err);
        Err(err)
    }

    fn transport(&mut self) -> AppResult<&mut Box<dyn Transport>> {
        self.transport
            .as_mut()
            .ok_or(DaqError::SerialPortNotConnected)
    }

    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!("Closing '{}' failed: {}", transport.port_name(), e);
            }
        }
    }

    /// Open the port and upload the parameters.
    ///
    /// On any failure the port is closed, the state returns to `Closed` and the error
    /// is reported to the host once.
    pub async fn open(&mut self) -> AppResult<()> {
        self.admit(SessionState::Closed, "open", Some(Capability::Connect))?;

        let Some(port) = self.host.port() else {
            return self.fail(DaqError::Configuration("No serial port selected".into()));
        };

        self.set_state(SessionState::Opening);
        match self.connect_and_upload(&port).await {
            Ok(()) => {
                self.set_state(SessionState::Open);
                info!("Parameters uploaded to '{}'; ready to start", port);
                Ok(())
            }
            Err(e) => {
                self.close_transport();
                self.parameters.clear();
                self.set_state(SessionState::Closed);
                self.fail(e)
            }
        }
    }

    async fn connect_and_upload(&mut self, port: &str) -> AppResult<()> {
        let transport = self.connector.open(port)?;
        self.transport = Some(transport);
        info!("Connection to '{}' opened", port);

        tokio::time::sleep(self.settings.settle_delay).await;
        self.drain_input("banner")?;

        self.parameters = self.host.parameters();
        let message = encode_upload(self.settings.rig.upload_prefix(), &self.parameters);
        debug!(
            "Sending {} parameters: {}",
            self.parameters.len(),
            String::from_utf8_lossy(&message)
        );
        self.transport()?.write(&message)?;

        let deadline = Instant::now() + self.settings.handshake_timeout;
        loop {
            if self.transport()?.bytes_available()? > 0 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(DaqError::HandshakeTimeout(self.settings.handshake_timeout));
            }
            tokio::time::sleep(HANDSHAKE_POLL).await;
        }

        if self.settings.echo {
            self.drain_input("upload reply")?;
        }
        Ok(())
    }

    /// Echo or discard whatever the device has sent so far.
    fn drain_input(&mut self, what: &str) -> AppResult<()> {
        let echo = self.settings.echo;
        let transport = self.transport()?;
        if !echo {
            return transport.flush_input();
        }
        while transport.bytes_available()? > 0 {
            match transport.read_line(Duration::ZERO)? {
                Some(line) => info!(target: DEVICE_TARGET, "{}", line),
                None => break,
            }
        }
        debug!("Drained device {}", what);
        Ok(())
    }

    /// Close the port of an idle, open device.
    pub async fn close(&mut self) -> AppResult<()> {
        self.admit(SessionState::Open, "close", Some(Capability::Disconnect))?;

        self.close_transport();
        self.parameters.clear();
        self.set_state(SessionState::Closed);
        info!("Connection closed");
        Ok(())
    }

    /// Start a session.
    ///
    /// Stores are allocated and the session group is claimed before the device is
    /// told to start; when either fails the controller stays `Open`.
    pub async fn start(&mut self) -> AppResult<()> {
        self.admit(SessionState::Open, "start", Some(Capability::Start))?;

        let start_time = Local::now();
        let path = self.host.save_path().unwrap_or_else(|| {
            default_save_path(
                &self.settings.output_dir,
                self.settings.storage_format,
                start_time,
            )
        });
        let header = SessionHeader {
            subject: self.host.subject(),
            weight: self.host.weight(),
            notes: self.host.notes(),
            parameters: self.parameters.clone(),
            start_time,
        };
        let recorder =
            match EventRecorder::new(self.settings.rig, &self.parameters, self.settings.capacity) {
                Ok(recorder) => recorder,
                Err(e) => return self.fail(e),
            };
        let record = match open_storage(self.settings.storage_format, &path)
            .and_then(|storage| SessionRecord::create(storage, header))
        {
            Ok(record) => record,
            Err(e) => return self.fail(e),
        };

        for kind in self.settings.rig.persisted_kinds() {
            self.host.counter_changed(*kind, 0);
        }
        self.host.tally_changed(&recorder.tally());

        let stale = self.queue.clear();
        if stale > 0 {
            debug!("Dropped {} stale events", stale);
        }

        self.active = Some(ActiveSession {
            record,
            recorder,
            scanner: None,
            stop_requested_at: None,
            last_flush: Instant::now(),
        });
        self.set_state(SessionState::Running);

        if let Err(e) = self.launch() {
            self.finalize(Ending::aborted(&e)).await.ok();
            return self.fail(e);
        }
        info!("Session started at {}", start_time.format("%H:%M:%S"));
        Ok(())
    }

    fn launch(&mut self) -> AppResult<()> {
        let start_byte = self.settings.rig.start_byte();
        let config = ScannerConfig {
            end_code: END_CODE,
            read_timeout: self.settings.read_timeout,
            echo: self.settings.echo,
            suppress: self.settings.suppress_echo.clone(),
        };

        let transport = self.transport()?;
        let reader = transport.try_clone_reader()?;
        transport.flush_input()?;
        transport.write(&[start_byte])?;

        let scanner = EventScanner::spawn(reader, self.queue.sender(), config);
        if let Some(active) = self.active.as_mut() {
            active.scanner = Some(scanner);
        }
        Ok(())
    }

    /// Ask the device to end the session.
    ///
    /// The session keeps running until the device answers with its end event, or
    /// until the configured stop timeout expires.
    pub async fn stop(&mut self) -> AppResult<()> {
        self.admit(SessionState::Running, "stop", Some(Capability::Stop))?;

        let stop_byte = self.settings.rig.stop_byte();
        if let Err(e) = self.transport().and_then(|t| t.write(&[stop_byte])) {
            self.finalize(Ending::aborted(&e)).await.ok();
            return self.fail(e);
        }
        if let Some(active) = self.active.as_mut() {
            active.stop_requested_at.get_or_insert_with(Instant::now);
        }
        info!("Stop requested; waiting for the device to end the session");
        Ok(())
    }

    /// End the running session without waiting for the device.
    ///
    /// The session is recorded as truncated.
    pub async fn abort(&mut self) -> AppResult<SessionSummary> {
        self.admit(SessionState::Running, "abort", None)?;
        warn!("Session aborted by operator");
        self.finalize(Ending::aborted("aborted by operator")).await
    }

    /// Send a manual hardware command.
    pub async fn trigger(&mut self, command: ManualCommand) -> AppResult<()> {
        if let Err(e) = self.capabilities.require(Capability::ManualTriggers) {
            return self.fail(e);
        }
        if !self.settings.rig.manual_commands().contains(&command) {
            return self.fail(DaqError::Configuration(format!(
                "{:?} is not available on rig '{}'",
                command, self.settings.rig
            )));
        }
        if let Err(e) = self.transport().and_then(|t| t.write(&[command.byte()])) {
            return self.fail(e);
        }
        debug!("Manual command {:?} sent", command);
        Ok(())
    }

    /// Drain the event queue once.
    ///
    /// Returns `Finished` when the session ended during this call. Fatal errors
    /// finalize the session as truncated, are reported to the host and returned.
    pub async fn poll(&mut self) -> AppResult<PollStatus> {
        if self.state != SessionState::Running {
            return Ok(PollStatus::Idle);
        }

        // Sampled before draining: anything the scanner queued before finishing is
        // drained below.
        let scanner_done = self
            .active
            .as_ref()
            .and_then(|active| active.scanner.as_ref())
            .map_or(false, EventScanner::is_finished);

        while let Some(event) = self.queue.try_pop() {
            let Some(active) = self.active.as_mut() else {
                break;
            };
            let tally_before = active.recorder.tally();
            let outcome = active.recorder.record(event);
            let tally_after = active.recorder.tally();

            match outcome {
                Ok(RecordOutcome::Stored { kind, count }) => {
                    self.host.counter_changed(kind, count);
                    if tally_after != tally_before {
                        self.host.tally_changed(&tally_after);
                    }
                }
                Ok(RecordOutcome::Preview { timestamp, payload }) => {
                    self.host.next_trial_preview(timestamp, payload);
                }
                Ok(RecordOutcome::End { timestamp }) => {
                    info!("Device ended the session at {} ms", timestamp);
                    let summary = self.finalize(Ending::device(timestamp)).await?;
                    return Ok(PollStatus::Finished(summary));
                }
                Ok(RecordOutcome::Ignored(_) | RecordOutcome::AfterEnd) => {}
                Err(e) => {
                    warn!("{}", e);
                    self.finalize(Ending::aborted(&e)).await?;
                    return self.fail(e);
                }
            }
        }

        if scanner_done {
            let scanner = self
                .active
                .as_mut()
                .and_then(|active| active.scanner.take());
            let err = match scanner {
                Some(scanner) => match scanner.join().await {
                    Ok(_) => DaqError::ScannerFailed("scanner ended without end event".into()),
                    Err(e) => e,
                },
                None => DaqError::ScannerFailed("scanner missing".into()),
            };
            warn!("Connection lost during session: {}", err);
            self.finalize(Ending::aborted(&err)).await?;
            return self.fail(err);
        }

        if let (Some(timeout), Some(requested)) = (
            self.settings.stop_confirm_timeout,
            self.active.as_ref().and_then(|a| a.stop_requested_at),
        ) {
            if requested.elapsed() >= timeout {
                warn!("Device did not confirm stop within {:?}", timeout);
                let reason = format!("device did not confirm stop within {timeout:?}");
                let summary = self.finalize(Ending::aborted(reason)).await?;
                return Ok(PollStatus::Finished(summary));
            }
        }

        if let Some(interval) = self.settings.auto_flush {
            if let Some(active) = self.active.as_mut() {
                if active.last_flush.elapsed() >= interval {
                    active.last_flush = Instant::now();
                    if let Err(e) = active.record.flush(active.recorder.stores()) {
                        warn!("Auto-flush failed: {}", e);
                        self.host.report_error(&e);
                    }
                }
            }
        }

        Ok(PollStatus::Running)
    }

    /// Poll every refresh interval until no session is running.
    ///
    /// Returns the summary of the session that finished, or `None` when none was
    /// running.
    pub async fn run_until_closed(&mut self) -> AppResult<Option<SessionSummary>> {
        let mut ticker = tokio::time::interval(self.settings.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.poll().await? {
                PollStatus::Idle => return Ok(None),
                PollStatus::Running => {}
                PollStatus::Finished(summary) => return Ok(Some(summary)),
            }
        }
    }

    async fn finalize(&mut self, ending: Ending) -> AppResult<SessionSummary> {
        self.set_state(SessionState::Stopping);
        self.close_transport();
        self.parameters.clear();

        let Some(mut active) = self.active.take() else {
            self.set_state(SessionState::Closed);
            return self.fail(DaqError::InvalidTransition {
                state: SessionState::Stopping,
                action: "finalize",
            });
        };
        // the scanner sees the closed transport on its next read
        drop(active.scanner.take());

        active.recorder.trim_all();
        let end = SessionEnd {
            end_time: Local::now(),
            arduino_end: ending.arduino_end,
            notes: self.host.notes(),
            subject: self.host.subject(),
            truncated: ending.error.is_some(),
            error: ending.error,
        };
        let tally = active.recorder.tally();
        let result = active.record.seal(active.recorder.stores(), end, tally);
        self.set_state(SessionState::Closed);

        match result {
            Ok(summary) => {
                info!(
                    "Session ended at {}; data written to '{}' ({})",
                    summary.end_time.format("%H:%M:%S"),
                    summary.file.display(),
                    summary.group
                );
                self.host.session_ended(&summary);
                Ok(summary)
            }
            Err(e) => self.fail(e),
        }
    }
}

impl<H: SessionHost> Drop for SessionController<H> {
    fn drop(&mut self) {
        if self.state.holds_transport() {
            self.close_transport();
        }
    }
}
