//! Session lifecycle and capability groups.
//!
//! ```text
//! Closed ──open──> Opening ──handshake ok──> Open ──start──> Running
//!   ▲                 │                       │                 │
//!   │             failure                   close        end event / stop
//!   │                 │                       │            transport error
//!   │                 ▼                       ▼                 ▼
//!   └─────────────────┴───────────────────────┴────────────── Stopping
//! ```
//!
//! Operator-facing controls are grouped into [`Capability`] groups. Whether a group is
//! enabled depends on two things: the state's policy ([`Capability::allowed_in`]) and
//! an external flag the host can clear for its own reasons. Only the policy changes
//! with the state, so a group the host disabled stays disabled across an
//! open/close round trip.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// No transport open.
    #[default]
    Closed,
    /// Transport open, settling and uploading parameters.
    Opening,
    /// Parameters accepted; ready to start.
    Open,
    /// Session recording.
    Running,
    /// Finalizing the session file.
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Closed => write!(f, "Closed"),
            SessionState::Opening => write!(f, "Opening"),
            SessionState::Open => write!(f, "Open"),
            SessionState::Running => write!(f, "Running"),
            SessionState::Stopping => write!(f, "Stopping"),
        }
    }
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Closed, Opening)
                | (Opening, Open)
                | (Opening, Closed)
                | (Open, Running)
                | (Open, Closed)
                | (Running, Stopping)
                | (Stopping, Closed)
        )
    }

    /// Whether a transport is held in this state.
    pub fn holds_transport(&self) -> bool {
        !matches!(self, SessionState::Closed)
    }
}

/// Named group of operator controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Editing session parameters.
    Configuration,
    /// Choosing the serial port.
    PortSelection,
    /// Opening the port.
    Connect,
    /// Closing the port.
    Disconnect,
    /// Starting a session.
    Start,
    /// Requesting the end of a session.
    Stop,
    /// Choosing the session file.
    SaveFile,
    /// Configuring end-of-session notifications.
    Notify,
    /// Manual hardware triggers.
    ManualTriggers,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Capability::Configuration => "configuration",
            Capability::PortSelection => "port selection",
            Capability::Connect => "connect",
            Capability::Disconnect => "disconnect",
            Capability::Start => "start",
            Capability::Stop => "stop",
            Capability::SaveFile => "save file",
            Capability::Notify => "notify",
            Capability::ManualTriggers => "manual triggers",
        };
        f.write_str(name)
    }
}

impl Capability {
    /// Every capability group.
    pub const ALL: [Capability; 9] = [
        Capability::Configuration,
        Capability::PortSelection,
        Capability::Connect,
        Capability::Disconnect,
        Capability::Start,
        Capability::Stop,
        Capability::SaveFile,
        Capability::Notify,
        Capability::ManualTriggers,
    ];

    /// Whether the lifecycle allows this group in `state`.
    pub fn allowed_in(&self, state: SessionState) -> bool {
        use SessionState::*;
        match self {
            Capability::Configuration | Capability::PortSelection | Capability::Connect => {
                state == Closed
            }
            Capability::Disconnect | Capability::Start => state == Open,
            Capability::Stop => state == Running,
            Capability::SaveFile | Capability::Notify => {
                matches!(state, Closed | Opening | Open)
            }
            Capability::ManualTriggers => matches!(state, Open | Running),
        }
    }
}

/// Enabled/disabled view of every capability group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityBoard {
    state: SessionState,
    external: BTreeMap<Capability, bool>,
}

impl Default for CapabilityBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityBoard {
    /// Board for a closed session with every external flag set.
    pub fn new() -> Self {
        Self {
            state: SessionState::Closed,
            external: Capability::ALL.iter().map(|c| (*c, true)).collect(),
        }
    }

    /// Apply the policy of `state`.
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// State the board currently reflects.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Set the host's own flag for `capability`.
    pub fn set_external(&mut self, capability: Capability, enabled: bool) {
        self.external.insert(capability, enabled);
    }

    /// Whether `capability` is usable right now.
    pub fn is_enabled(&self, capability: Capability) -> bool {
        self.external.get(&capability).copied().unwrap_or(true)
            && capability.allowed_in(self.state)
    }

    /// Fail with [`DaqError::CapabilityDisabled`] unless `capability` is usable.
    pub fn require(&self, capability: Capability) -> AppResult<()> {
        if self.is_enabled(capability) {
            Ok(())
        } else {
            Err(DaqError::CapabilityDisabled(capability))
        }
    }

    /// Effective flag of every group.
    pub fn snapshot(&self) -> BTreeMap<Capability, bool> {
        Capability::ALL
            .iter()
            .map(|c| (*c, self.is_enabled(*c)))
            .collect()
    }
}
