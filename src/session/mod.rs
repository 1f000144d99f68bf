//! Session lifecycle: state machine, event scanning and recording.
//!
//! [`controller::SessionController`] ties the pieces together. The scanner runs on a
//! blocking thread and feeds an [`queue::EventQueue`]; the controller drains the
//! queue into an [`recorder::EventRecorder`] and reports progress to its
//! [`host::SessionHost`].

pub mod controller;
pub mod host;
pub mod queue;
pub mod recorder;
pub mod scanner;
pub mod state;

pub use controller::{ControllerSettings, PollStatus, SessionController};
pub use host::{ConfigHost, SessionHost};
pub use queue::EventQueue;
pub use recorder::{EventRecorder, RecordOutcome};
pub use scanner::{EventScanner, ScanReport, ScannerConfig};
pub use state::{Capability, CapabilityBoard, SessionState};
