//! Scripted device for testing without hardware.
//!
//! [`MockDevice`] plays the firmware side of the protocol:
//! - on open it queues an optional banner,
//! - on the parameter upload it answers with one acknowledgement line,
//! - on the start byte it queues its script,
//! - on the stop byte it answers with an end event.
//!
//! Each behaviour can be switched off to inject failures. Every write is logged
//! for verification.

use super::{Connector, Transport};
use crate::error::{AppResult, DaqError};
use crate::protocol::codec::{decode_line, DecodedLine};
use crate::protocol::rig::{Rig, END_CODE, START_BYTE, STOP_BYTE, UPLOAD_PREFIX};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Line the mock sends after a parameter upload.
pub const UPLOAD_ACK: &str = "Parameters received";

#[derive(Debug, Default)]
struct DeviceState {
    /// Lines waiting to be read by the host.
    inbound: VecDeque<String>,
    written: Vec<Vec<u8>>,
    open: bool,
    disconnected: bool,
    banner: Vec<String>,
    script: Vec<String>,
    /// Last timestamp the device reported.
    clock: i64,
    silent_on_upload: bool,
    ignore_stop: bool,
    disconnect_after_script: bool,
    connect_error: Option<String>,
}

impl DeviceState {
    fn queue(&mut self, line: String) {
        if let DecodedLine::Event(event) = decode_line(&line) {
            self.clock = self.clock.max(event.timestamp);
        }
        self.inbound.push_back(line);
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<DeviceState>,
    ready: Condvar,
}

/// Simulated rig firmware.
///
/// Cloning yields another handle to the same device.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    shared: Arc<Shared>,
}

impl MockDevice {
    /// A device that acknowledges uploads, has no script and confirms stops.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Lines queued as soon as the port opens.
    pub fn with_banner<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().banner = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Lines queued when the start byte arrives.
    pub fn with_script<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().script = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Never acknowledge the parameter upload.
    pub fn silent_on_upload(self) -> Self {
        self.state().silent_on_upload = true;
        self
    }

    /// Never answer the stop byte.
    pub fn ignore_stop(self) -> Self {
        self.state().ignore_stop = true;
        self
    }

    /// Refuse every open with `message`.
    pub fn fail_connect(self, message: impl Into<String>) -> Self {
        self.state().connect_error = Some(message.into());
        self
    }

    /// Drop off the bus once the script has been read.
    pub fn disconnect_after_script(self) -> Self {
        self.state().disconnect_after_script = true;
        self
    }

    /// Connector opening this device under any port name.
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            device: self.clone(),
        }
    }

    /// Queue one line for the host right now.
    pub fn push_line(&self, line: impl Into<String>) {
        self.state().queue(line.into());
        self.shared.ready.notify_all();
    }

    /// Every write the host made, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    /// Whether a host currently holds the port open.
    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Lines not yet read by the host.
    pub fn pending_lines(&self) -> usize {
        self.state().inbound.len()
    }

    fn receive(&self, bytes: &[u8]) {
        let mut state = self.state();
        state.written.push(bytes.to_vec());

        match bytes.first().copied() {
            Some(UPLOAD_PREFIX) if !state.silent_on_upload => {
                state.queue(UPLOAD_ACK.to_string());
            }
            Some(START_BYTE) if bytes.len() == 1 => {
                let script = state.script.clone();
                for line in script {
                    state.queue(line);
                }
                if state.disconnect_after_script {
                    state.disconnected = true;
                }
            }
            Some(STOP_BYTE) if bytes.len() == 1 && !state.ignore_stop => {
                let timestamp = state.clock + 1;
                state.queue(format!("{END_CODE},{timestamp}"));
            }
            _ => {}
        }
        drop(state);
        self.shared.ready.notify_all();
    }
}

/// [`Connector`] handing out transports onto one [`MockDevice`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    device: MockDevice,
}

impl MockConnector {
    /// Connector for `device`.
    pub fn new(device: MockDevice) -> Self {
        Self { device }
    }

    /// The simulated device.
    pub fn device(&self) -> &MockDevice {
        &self.device
    }
}

impl Connector for MockConnector {
    fn open(&self, port: &str) -> AppResult<Box<dyn Transport>> {
        let mut state = self.device.state();
        if let Some(message) = state.connect_error.clone() {
            return Err(DaqError::Connect {
                port: port.to_string(),
                message,
            });
        }
        if state.open {
            return Err(DaqError::Connect {
                port: port.to_string(),
                message: "Device or resource busy".to_string(),
            });
        }

        state.open = true;
        state.disconnected = false;
        state.inbound.clear();
        let banner = state.banner.clone();
        for line in banner {
            state.queue(line);
        }
        drop(state);

        Ok(Box::new(MockTransport {
            port_name: port.to_string(),
            device: self.device.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// Host-side handle onto a [`MockDevice`].
#[derive(Debug)]
pub struct MockTransport {
    port_name: String,
    device: MockDevice,
    closed: Arc<AtomicBool>,
}

impl MockTransport {
    fn ensure_open(&self) -> AppResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DaqError::Transport(format!("port '{}' is closed", self.port_name)))
        } else {
            Ok(())
        }
    }
}

impl Transport for MockTransport {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.ensure_open()?;
        if self.device.state().disconnected {
            return Err(DaqError::Transport("device disconnected".to_string()));
        }
        self.device.receive(bytes);
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> AppResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.device.state();
        loop {
            self.ensure_open()?;
            if let Some(line) = state.inbound.pop_front() {
                return Ok(Some(line));
            }
            if state.disconnected {
                return Err(DaqError::Transport("device disconnected".to_string()));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self
                .device
                .shared
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn bytes_available(&mut self) -> AppResult<usize> {
        self.ensure_open()?;
        Ok(self
            .device
            .state()
            .inbound
            .iter()
            .map(|line| line.len() + 1)
            .sum())
    }

    fn flush_input(&mut self) -> AppResult<()> {
        self.ensure_open()?;
        self.device.state().inbound.clear();
        Ok(())
    }

    fn try_clone_reader(&self) -> AppResult<Box<dyn Transport>> {
        self.ensure_open()?;
        Ok(Box::new(MockTransport {
            port_name: self.port_name.clone(),
            device: self.device.clone(),
            closed: Arc::clone(&self.closed),
        }))
    }

    fn close(&mut self) -> AppResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.device.state().open = false;
            self.device.shared.ready.notify_all();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// Plausible device output for a whole session on `rig`, ending with the end event.
///
/// Go/no-go trials alternate between CS0 and CS1, with a lick bout and a response in
/// each. Conveyor trials walk the belt out and back. The wheel rig only reports
/// rotation samples.
pub fn synthetic_session(rig: Rig, trials: usize, track_period: i64) -> Vec<String> {
    let track_period = track_period.max(1);
    let trial_length = 1000;
    let mut lines = Vec::new();

    for trial in 0..trials as i64 {
        let t = trial * trial_length;
        match rig {
            Rig::GoNoGo => {
                let cs = trial % 2;
                lines.push(format!("8,{t},{cs}"));
                lines.push(format!("3,{}", t + 10));
                lines.push(format!("4,{}", t + 20));
                lines.push(format!("5,{},{cs}", t + 100));
                lines.push(format!("1,{},1", t + 200));
                lines.push(format!("9,{},1", t + 200));
                lines.push(format!("1,{},0", t + 260));
                lines.push(format!("6,{}", t + 300));
                lines.push(format!("7,{},{}", t + 400, 2 * cs + 1));
            }
            Rig::Conveyor => {
                lines.push(format!("8,{t},{trial}"));
                lines.push(format!("1,{}", t + 10));
                lines.push(format!("5,{}", t + 100));
                lines.push(format!("3,{}", t + 400));
                lines.push(format!("6,{}", t + 800));
                lines.push(format!("2,{}", t + 900));
            }
            Rig::Wheel => {}
        }

        let mut sample = t + track_period;
        while sample < t + trial_length {
            let steps = (sample / track_period) % 7 - 3;
            let code = if rig == Rig::GoNoGo { 2 } else { 7 };
            lines.push(format!("{code},{sample},{steps}"));
            sample += track_period;
        }
    }

    lines.push(format!("{END_CODE},{}", trials as i64 * trial_length));
    lines
}
