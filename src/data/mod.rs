//! Event storage and session files.
pub mod capacity;
pub mod event_store;
pub mod record;
pub mod session_file;
pub mod storage;
pub mod tally;

pub use capacity::{CapacityPolicy, SessionEstimate, MAX_STORE_COLUMNS};
pub use event_store::EventStore;
pub use record::{SessionEnd, SessionHeader, SessionRecord, SessionSummary};
pub use session_file::{AttrValue, Dataset, Group};
pub use storage::{open_storage, JsonStorage, SessionStorage, StorageFormat};
pub use tally::TrialTally;
