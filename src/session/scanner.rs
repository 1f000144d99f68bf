//! Background reader turning device output into queued events.
//!
//! The scanner owns the reader half of the transport and runs on a blocking thread.
//! Every well-formed event is queued, in arrival order. Raw text and events can be
//! echoed to the `behavior_daq::device` log target; echo suppression only affects
//! logging. The scanner returns after queuing the end event, or with an error when
//! the transport fails.

use crate::adapters::Transport;
use crate::error::{AppResult, DaqError};
use crate::protocol::codec::{decode_line, DecodedLine, Event};
use crate::protocol::rig::END_CODE;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Log target for lines echoed from the device.
pub const DEVICE_TARGET: &str = "behavior_daq::device";

/// Scanner behaviour.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Code that ends the session.
    pub end_code: i64,
    /// Timeout of each blocking read.
    pub read_timeout: Duration,
    /// Echo device output to the log.
    pub echo: bool,
    /// Event codes never echoed.
    pub suppress: BTreeSet<i64>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            end_code: END_CODE,
            read_timeout: Duration::from_secs(1),
            echo: false,
            suppress: BTreeSet::new(),
        }
    }
}

/// What a finished scan saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Events queued, including the end event.
    pub events: usize,
    /// Lines that were not events.
    pub raw_lines: usize,
}

/// Read `reader` until the end event, queuing every event on `tx`.
pub fn scan(
    reader: &mut dyn Transport,
    tx: &UnboundedSender<Event>,
    config: &ScannerConfig,
) -> AppResult<ScanReport> {
    let mut report = ScanReport::default();
    loop {
        let Some(line) = reader.read_line(config.read_timeout)? else {
            continue;
        };

        match decode_line(&line) {
            DecodedLine::RawText(text) => {
                report.raw_lines += 1;
                if config.echo && !text.is_empty() {
                    info!(target: DEVICE_TARGET, "{}", text);
                }
            }
            DecodedLine::Event(event) => {
                if config.echo && !config.suppress.contains(&event.code) {
                    info!(target: DEVICE_TARGET, "{}", line.trim_end());
                }
                tx.send(event)
                    .map_err(|_| DaqError::ScannerFailed("event queue closed".to_string()))?;
                report.events += 1;

                if event.code == config.end_code {
                    debug!(
                        "End event received after {} events, {} raw lines",
                        report.events, report.raw_lines
                    );
                    return Ok(report);
                }
            }
        }
    }
}

/// Handle to a scanner running on the blocking pool.
#[derive(Debug)]
pub struct EventScanner {
    handle: JoinHandle<AppResult<ScanReport>>,
}

impl EventScanner {
    /// Start scanning `reader` in the background.
    pub fn spawn(
        mut reader: Box<dyn Transport>,
        tx: UnboundedSender<Event>,
        config: ScannerConfig,
    ) -> Self {
        let handle = tokio::task::spawn_blocking(move || {
            let result = scan(reader.as_mut(), &tx, &config);
            if let Err(e) = &result {
                debug!("Scanner on '{}' stopped: {}", reader.port_name(), e);
            }
            result
        });
        Self { handle }
    }

    /// Whether the scanner has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the scanner and return its outcome.
    pub async fn join(self) -> AppResult<ScanReport> {
        self.handle
            .await
            .map_err(|e| DaqError::ScannerFailed(format!("scanner task panicked: {e}")))?
    }
}
