//! # Behavior DAQ Core Library
//!
//! Host-side controller for microcontroller-driven behavioural rigs. A session goes
//! through four steps:
//!
//! 1. Open the serial port and upload the rig's parameters.
//! 2. Tell the device to start, then scan its event stream on a background thread.
//! 3. Demultiplex events into pre-sized per-kind stores.
//! 4. Write everything, with session metadata, into a hierarchical session file.
//!
//! ## Crate Structure
//!
//! - **`adapters`**: byte transports to the device: a serial port, or a scripted mock.
//! - **`config`**: layered configuration (defaults, TOML file, environment) via `figment`.
//! - **`data`**: event stores, capacity estimates, the go/no-go tally and session files
//!   (JSON, or HDF5 with the `storage_hdf5` feature).
//! - **`error`**: the crate-wide `DaqError`.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`protocol`**: rig tables, ordered parameters and the line codec.
//! - **`session`**: state machine, capability groups, event scanner, recorder and the
//!   session controller tying them together.

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod session;

pub use config::RigConfig;
pub use error::{AppResult, DaqError};
pub use protocol::{Event, EventKind, ParameterSet, Rig};
pub use session::{ConfigHost, ControllerSettings, SessionController, SessionHost, SessionState};
