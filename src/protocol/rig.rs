//! Supported rigs and their fixed protocol tables.
//!
//! Each rig's firmware defines:
//! - the event codes it emits and which of them are persisted,
//! - the parameter schema it expects after the upload prefix,
//! - the single-byte start, stop and manual hardware commands.
//!
//! Code `0` is the end-of-session code on every rig and is never persisted.

use super::parameters::ParameterSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event code that ends a session on every rig.
pub const END_CODE: i64 = 0;

/// Byte prefixed to the parameter upload.
pub const UPLOAD_PREFIX: u8 = b'D';

/// Byte that starts the trial sequence.
pub const START_BYTE: u8 = b'E';

/// Byte that asks the device to end the session.
pub const STOP_BYTE: u8 = b'0';

/// Behavioural rig variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rig {
    /// Go/no-go and classical conditioning with lick, movement and CS/US events.
    #[default]
    GoNoGo,
    /// Conveyor belt delivering a stimulus to the mouse.
    Conveyor,
    /// Running wheel tracking only.
    Wheel,
}

/// Semantic type of a device event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// Device finished the session.
    End,
    /// Lick sensor changed (payload 1 = onset, 0 = offset).
    Lick,
    /// Lick sensor raw form.
    LickForm,
    /// Movement tracking sample (payload = steps).
    Movement,
    /// Trial started.
    TrialStart,
    /// Trial cue signal.
    TrialSignal,
    /// Trial ended.
    TrialEnd,
    /// Conditioned stimulus onset (payload = CS index).
    Cs,
    /// Unconditioned stimulus onset.
    Us,
    /// Response outcome (payload encodes CS and hit/miss).
    Response,
    /// Conveyor reached the mouse.
    AtMouse,
    /// Conveyor moving to the mouse.
    ToMouse,
    /// Conveyor back at home position.
    AtHome,
    /// Wheel rotation sample.
    Wheel,
    /// Preview of the next trial (presentation only, never persisted).
    NextTrial,
    /// Code not present in the rig's table.
    Unknown(i64),
}

impl EventKind {
    /// Dataset name used in the session file.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::End => "end",
            EventKind::Lick => "lick",
            EventKind::LickForm => "lick_form",
            EventKind::Movement => "movement",
            EventKind::TrialStart => "trial_start",
            EventKind::TrialSignal => "trial_signal",
            EventKind::TrialEnd => "trial_end",
            EventKind::Cs => "cs",
            EventKind::Us => "us",
            EventKind::Response => "response",
            EventKind::AtMouse => "at_mouse",
            EventKind::ToMouse => "to_mouse",
            EventKind::AtHome => "at_home",
            EventKind::Wheel => "wheel",
            EventKind::NextTrial => "next_trial",
            EventKind::Unknown(_) => "unknown",
        }
    }

    /// Whether the expected count of this event scales with trials rather than
    /// with session duration.
    pub fn scales_with_trials(&self) -> bool {
        matches!(
            self,
            EventKind::TrialStart
                | EventKind::TrialSignal
                | EventKind::TrialEnd
                | EventKind::Cs
                | EventKind::Response
                | EventKind::AtMouse
                | EventKind::ToMouse
                | EventKind::AtHome
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Unknown(code) => write!(f, "unknown({code})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Where the recorder sends an event of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Append to the kind's event store.
    Persist,
    /// Hand to the presentation side channel only.
    Preview,
    /// End of session.
    End,
    /// Not part of the rig's table; dropped with a warning.
    Ignore,
}

/// Single-byte hardware commands the operator can send while the port is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManualCommand {
    /// Vacuum on.
    VacuumOn,
    /// Vacuum off.
    VacuumOff,
    /// Vacuum pulse.
    VacuumTrigger,
    /// Solenoid 0 on.
    Solenoid0On,
    /// Solenoid 0 off.
    Solenoid0Off,
    /// Solenoid 0 pulse.
    Solenoid0Trigger,
    /// Solenoid 1 on.
    Solenoid1On,
    /// Solenoid 1 off.
    Solenoid1Off,
    /// Solenoid 1 pulse.
    Solenoid1Trigger,
    /// Solenoid 2 on.
    Solenoid2On,
    /// Solenoid 2 off.
    Solenoid2Off,
    /// Solenoid 2 pulse.
    Solenoid2Trigger,
    /// Play CS0.
    Cs0,
    /// Play CS1.
    Cs1,
    /// Play CS2.
    Cs2,
    /// Step the conveyor forward.
    StepForward,
    /// Step the conveyor backward.
    StepBackward,
}

impl ManualCommand {
    /// Byte written to the transport.
    pub fn byte(&self) -> u8 {
        match self {
            ManualCommand::VacuumOn => b'1',
            ManualCommand::VacuumOff => b'2',
            ManualCommand::VacuumTrigger => b'3',
            ManualCommand::Solenoid0On => b'4',
            ManualCommand::Solenoid0Off => b'5',
            ManualCommand::Solenoid0Trigger => b'6',
            ManualCommand::Solenoid1On => b'7',
            ManualCommand::Solenoid1Off => b'8',
            ManualCommand::Solenoid1Trigger => b'9',
            ManualCommand::Solenoid2On => b':',
            ManualCommand::Solenoid2Off => b';',
            ManualCommand::Solenoid2Trigger => b'<',
            ManualCommand::Cs0 => b'=',
            ManualCommand::Cs1 => b'>',
            ManualCommand::Cs2 => b'?',
            ManualCommand::StepForward => b'3',
            ManualCommand::StepBackward => b'4',
        }
    }
}

const GO_NO_GO_PERSISTED: &[EventKind] = &[
    EventKind::Lick,
    EventKind::LickForm,
    EventKind::Movement,
    EventKind::TrialStart,
    EventKind::TrialSignal,
    EventKind::Cs,
    EventKind::Us,
    EventKind::Response,
];

const CONVEYOR_PERSISTED: &[EventKind] = &[
    EventKind::TrialStart,
    EventKind::TrialEnd,
    EventKind::AtMouse,
    EventKind::ToMouse,
    EventKind::AtHome,
    EventKind::Movement,
];

const WHEEL_PERSISTED: &[EventKind] = &[EventKind::Wheel];

const GO_NO_GO_SCHEMA: &[(&str, i64)] = &[
    ("session_type", 0),
    ("pre_session", 0),
    ("post_session", 0),
    ("session_dur", 1_200_000),
    ("cs0_num", 100),
    ("cs1_num", 0),
    ("cs2_num", 0),
    ("iti_distro", 1),
    ("mean_iti", 8000),
    ("min_iti", 8000),
    ("max_iti", 12000),
    ("pre_stim", 0),
    ("post_stim", 8000),
    ("cs0_dur", 2000),
    ("cs0_freq", 6000),
    ("cs0_pulse", 100),
    ("cr0_min", 0),
    ("cr0_max", 0),
    ("cr0_dur", 0),
    ("us0_dur", 50),
    ("us0_delay", 3000),
    ("cs1_dur", 2000),
    ("cs1_freq", 6000),
    ("cs1_pulse", 0),
    ("us1_dur", 50),
    ("us1_delay", 3000),
    ("cs2_dur", 2000),
    ("cs2_freq", 12000),
    ("cs2_pulse", 0),
    ("us2_dur", 50),
    ("us2_delay", 3000),
    ("consumption_dur", 0),
    ("vac_dur", 25),
    ("trial_signal_offset", 2000),
    ("trial_signal_dur", 1000),
    ("trial_signal_freq", 0),
    ("grace_dur", 2000),
    ("response_dur", 2000),
    ("timeout_dur", 8000),
    ("image_all", 0),
    ("image_ttl_dur", 100),
    ("track_period", 50),
];

const CONVEYOR_SCHEMA: &[(&str, i64)] = &[
    ("pre_session", 30000),
    ("post_session", 30000),
    ("trial_num", 15),
    ("stim_duration", 10000),
    ("iti", 60000),
    ("img_all", 0),
    ("img_ttl_dur", 100),
    ("track_period", 50),
];

const WHEEL_SCHEMA: &[(&str, i64)] = &[("session_dur", 10000), ("track_period", 50)];

const GO_NO_GO_MANUAL: &[ManualCommand] = &[
    ManualCommand::VacuumOn,
    ManualCommand::VacuumOff,
    ManualCommand::VacuumTrigger,
    ManualCommand::Solenoid0On,
    ManualCommand::Solenoid0Off,
    ManualCommand::Solenoid0Trigger,
    ManualCommand::Solenoid1On,
    ManualCommand::Solenoid1Off,
    ManualCommand::Solenoid1Trigger,
    ManualCommand::Solenoid2On,
    ManualCommand::Solenoid2Off,
    ManualCommand::Solenoid2Trigger,
    ManualCommand::Cs0,
    ManualCommand::Cs1,
    ManualCommand::Cs2,
];

const CONVEYOR_MANUAL: &[ManualCommand] =
    &[ManualCommand::StepForward, ManualCommand::StepBackward];

impl Rig {
    /// Map a device code to its event kind.
    pub fn classify(self, code: i64) -> EventKind {
        match (self, code) {
            (_, END_CODE) => EventKind::End,

            (Rig::GoNoGo, 1) => EventKind::Lick,
            (Rig::GoNoGo, 2) => EventKind::Movement,
            (Rig::GoNoGo, 3) => EventKind::TrialStart,
            (Rig::GoNoGo, 4) => EventKind::TrialSignal,
            (Rig::GoNoGo, 5) => EventKind::Cs,
            (Rig::GoNoGo, 6) => EventKind::Us,
            (Rig::GoNoGo, 7) => EventKind::Response,
            (Rig::GoNoGo, 8) => EventKind::NextTrial,
            (Rig::GoNoGo, 9) => EventKind::LickForm,

            (Rig::Conveyor, 1) => EventKind::TrialStart,
            (Rig::Conveyor, 2) => EventKind::TrialEnd,
            (Rig::Conveyor, 3) => EventKind::AtMouse,
            (Rig::Conveyor, 5) => EventKind::ToMouse,
            (Rig::Conveyor, 6) => EventKind::AtHome,
            (Rig::Conveyor, 7) => EventKind::Movement,
            (Rig::Conveyor, 8) => EventKind::NextTrial,

            (Rig::Wheel, 7) => EventKind::Wheel,

            (_, other) => EventKind::Unknown(other),
        }
    }

    /// Device code of `kind` on this rig, if the rig emits it.
    pub fn code_of(self, kind: EventKind) -> Option<i64> {
        match (self, kind) {
            (_, EventKind::End) => Some(END_CODE),

            (Rig::GoNoGo, EventKind::Lick) => Some(1),
            (Rig::GoNoGo, EventKind::Movement) => Some(2),
            (Rig::GoNoGo, EventKind::TrialStart) => Some(3),
            (Rig::GoNoGo, EventKind::TrialSignal) => Some(4),
            (Rig::GoNoGo, EventKind::Cs) => Some(5),
            (Rig::GoNoGo, EventKind::Us) => Some(6),
            (Rig::GoNoGo, EventKind::Response) => Some(7),
            (Rig::GoNoGo, EventKind::NextTrial) => Some(8),
            (Rig::GoNoGo, EventKind::LickForm) => Some(9),

            (Rig::Conveyor, EventKind::TrialStart) => Some(1),
            (Rig::Conveyor, EventKind::TrialEnd) => Some(2),
            (Rig::Conveyor, EventKind::AtMouse) => Some(3),
            (Rig::Conveyor, EventKind::ToMouse) => Some(5),
            (Rig::Conveyor, EventKind::AtHome) => Some(6),
            (Rig::Conveyor, EventKind::Movement) => Some(7),
            (Rig::Conveyor, EventKind::NextTrial) => Some(8),

            (Rig::Wheel, EventKind::Wheel) => Some(7),

            _ => None,
        }
    }

    /// Event kinds that get an event store.
    pub fn persisted_kinds(self) -> &'static [EventKind] {
        match self {
            Rig::GoNoGo => GO_NO_GO_PERSISTED,
            Rig::Conveyor => CONVEYOR_PERSISTED,
            Rig::Wheel => WHEEL_PERSISTED,
        }
    }

    /// How the recorder treats `kind` on this rig.
    pub fn route(self, kind: EventKind) -> Routing {
        match kind {
            EventKind::End => Routing::End,
            EventKind::NextTrial => Routing::Preview,
            EventKind::Unknown(_) => Routing::Ignore,
            other if self.persisted_kinds().contains(&other) => Routing::Persist,
            _ => Routing::Ignore,
        }
    }

    /// Parameter names and default values, in upload order.
    pub fn parameter_schema(self) -> &'static [(&'static str, i64)] {
        match self {
            Rig::GoNoGo => GO_NO_GO_SCHEMA,
            Rig::Conveyor => CONVEYOR_SCHEMA,
            Rig::Wheel => WHEEL_SCHEMA,
        }
    }

    /// Parameter set populated with the schema defaults.
    pub fn default_parameters(self) -> ParameterSet {
        self.parameter_schema().iter().copied().collect()
    }

    /// Whether `name` is part of this rig's upload schema.
    pub fn has_parameter(self, name: &str) -> bool {
        self.parameter_schema().iter().any(|(key, _)| *key == name)
    }

    /// Manual hardware commands the rig firmware understands.
    pub fn manual_commands(self) -> &'static [ManualCommand] {
        match self {
            Rig::GoNoGo => GO_NO_GO_MANUAL,
            Rig::Conveyor => CONVEYOR_MANUAL,
            Rig::Wheel => &[],
        }
    }

    /// Byte prefixed to the parameter upload.
    pub fn upload_prefix(self) -> u8 {
        UPLOAD_PREFIX
    }

    /// Byte that starts the session.
    pub fn start_byte(self) -> u8 {
        START_BYTE
    }

    /// Byte that requests the end of the session.
    pub fn stop_byte(self) -> u8 {
        STOP_BYTE
    }
}

impl fmt::Display for Rig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rig::GoNoGo => f.write_str("go_no_go"),
            Rig::Conveyor => f.write_str("conveyor"),
            Rig::Wheel => f.write_str("wheel"),
        }
    }
}

impl std::str::FromStr for Rig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "go_no_go" | "gonogo" => Ok(Rig::GoNoGo),
            "conveyor" => Ok(Rig::Conveyor),
            "wheel" => Ok(Rig::Wheel),
            other => Err(format!(
                "Unknown rig '{other}'. Must be one of: go_no_go, conveyor, wheel"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rig_names_round_trip_through_display() {
        for rig in [Rig::GoNoGo, Rig::Conveyor, Rig::Wheel] {
            assert_eq!(rig.to_string().parse::<Rig>(), Ok(rig));
        }
        assert_eq!("go-no-go".parse::<Rig>(), Ok(Rig::GoNoGo));
        assert!("treadmill".parse::<Rig>().is_err());
    }

    const ALL_RIGS: [Rig; 3] = [Rig::GoNoGo, Rig::Conveyor, Rig::Wheel];

    #[test]
    fn end_code_is_never_persisted() {
        for rig in ALL_RIGS {
            assert_eq!(rig.classify(END_CODE), EventKind::End);
            assert_eq!(rig.route(EventKind::End), Routing::End);
            assert!(!rig.persisted_kinds().contains(&EventKind::End));
        }
    }

    #[test]
    fn classify_and_code_of_agree() {
        for rig in ALL_RIGS {
            for code in 0..16 {
                match rig.classify(code) {
                    EventKind::Unknown(c) => assert_eq!(c, code),
                    kind => assert_eq!(rig.code_of(kind), Some(code), "{rig} {kind}"),
                }
            }
        }
    }

    #[test]
    fn next_trial_goes_to_preview() {
        assert_eq!(Rig::GoNoGo.classify(8), EventKind::NextTrial);
        assert_eq!(Rig::GoNoGo.route(EventKind::NextTrial), Routing::Preview);
        assert_eq!(Rig::Conveyor.route(EventKind::NextTrial), Routing::Preview);
    }

    #[test]
    fn same_code_means_different_things_per_rig() {
        assert_eq!(Rig::GoNoGo.classify(1), EventKind::Lick);
        assert_eq!(Rig::Conveyor.classify(1), EventKind::TrialStart);
        assert_eq!(Rig::Wheel.classify(1), EventKind::Unknown(1));
    }

    #[test]
    fn kinds_outside_the_table_are_ignored() {
        assert_eq!(Rig::Wheel.route(EventKind::Lick), Routing::Ignore);
        assert_eq!(Rig::GoNoGo.route(EventKind::Unknown(42)), Routing::Ignore);
    }

    #[test]
    fn schemas_have_unique_names() {
        for rig in ALL_RIGS {
            let schema = rig.parameter_schema();
            let params = rig.default_parameters();
            assert_eq!(params.len(), schema.len(), "{rig} schema lists a name twice");
            assert!(rig.has_parameter("track_period"));
        }
    }
}
