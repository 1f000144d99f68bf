//! Device protocol: rig tables, ordered parameters and the line codec.

pub mod codec;
pub mod parameters;
pub mod rig;

pub use codec::{decode_line, encode_upload, DecodedLine, Event};
pub use parameters::ParameterSet;
pub use rig::{EventKind, ManualCommand, Rig, Routing, END_CODE};
