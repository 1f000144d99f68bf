//! Per-session record inside a session file.
//!
//! Layout:
//!
//! ```text
//! <subject>/<YYYY-MM-DD>[-n]          weight
//!     behavior/                       start_time, end_time, arduino_end, notes,
//!                                     subject, truncated, error, <parameters...>
//!         <event kind>                2×N i64 (timestamps, payloads)
//! ```
//!
//! The group is claimed when the session starts, so a file that cannot be written is
//! reported before the device is told to begin.

use super::event_store::EventStore;
use super::session_file::{AttrValue, Group};
use super::storage::SessionStorage;
use super::tally::TrialTally;
use crate::error::AppResult;
use crate::protocol::parameters::ParameterSet;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Name of the child group holding behavioural data.
pub const BEHAVIOR_GROUP: &str = "behavior";

/// Wall-clock format of `start_time` and `end_time`; the date is in the group name.
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Subject used when the host supplies none.
pub const UNKNOWN_SUBJECT: &str = "?";

/// What is known about a session when it starts.
#[derive(Debug, Clone)]
pub struct SessionHeader {
    /// Subject identifier; empty means unknown.
    pub subject: String,
    /// Subject weight in grams.
    pub weight: Option<f64>,
    /// Operator notes at start.
    pub notes: String,
    /// Parameters uploaded to the device.
    pub parameters: ParameterSet,
    /// Wall-clock start.
    pub start_time: DateTime<Local>,
}

/// What is known about a session when it ends.
#[derive(Debug, Clone)]
pub struct SessionEnd {
    /// Wall-clock end.
    pub end_time: DateTime<Local>,
    /// Device clock at the end event; `None` when the device never sent one.
    pub arduino_end: Option<i64>,
    /// Operator notes at the end of the session.
    pub notes: String,
    /// Subject at the end of the session.
    pub subject: String,
    /// Whether recording stopped before the device ended the session.
    pub truncated: bool,
    /// Error that aborted the session.
    pub error: Option<String>,
}

/// Outcome of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Session file.
    pub file: PathBuf,
    /// Session group inside the file.
    pub group: String,
    /// Wall-clock start.
    pub start_time: DateTime<Local>,
    /// Wall-clock end.
    pub end_time: DateTime<Local>,
    /// Device clock at the end event.
    pub arduino_end: Option<i64>,
    /// Final event count per persisted kind.
    pub counters: BTreeMap<String, usize>,
    /// Final go/no-go tally.
    pub tally: TrialTally,
    /// Whether recording stopped before the device ended the session.
    pub truncated: bool,
    /// Error that aborted the session.
    pub error: Option<String>,
}

/// Open session group in a session file.
pub struct SessionRecord {
    storage: Box<dyn SessionStorage>,
    group: String,
    header: SessionHeader,
}

impl SessionRecord {
    /// Claim `subject/date[-n]` in `storage` and write the start attributes.
    ///
    /// Group names already present get the next free `-n` suffix. A `/` in the
    /// subject becomes `_` in the group name.
    pub fn create(mut storage: Box<dyn SessionStorage>, header: SessionHeader) -> AppResult<Self> {
        let subject = match header.subject.trim() {
            "" => UNKNOWN_SUBJECT.to_string(),
            // one path level per subject
            subject => subject.replace('/', "_"),
        };
        let base = format!("{}/{}", subject, header.start_time.format("%Y-%m-%d"));

        let mut group = base.clone();
        let mut index = 0;
        while storage.group_exists(&group)? {
            index += 1;
            group = format!("{base}-{index}");
        }

        let mut record = Self {
            storage,
            group,
            header,
        };
        record.write(&[], None)?;
        info!(
            "Session group '{}' created in '{}'",
            record.group,
            record.storage.path().display()
        );
        Ok(record)
    }

    /// Session group path.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Session file path.
    pub fn file(&self) -> PathBuf {
        self.storage.path().to_path_buf()
    }

    /// Wall-clock start.
    pub fn start_time(&self) -> DateTime<Local> {
        self.header.start_time
    }

    /// Persist the events recorded so far.
    pub fn flush(&mut self, stores: &[EventStore]) -> AppResult<()> {
        self.write(stores, None)?;
        debug!("Session group '{}' flushed", self.group);
        Ok(())
    }

    /// Write the final data and end attributes, then close the file.
    pub fn seal(
        mut self,
        stores: &[EventStore],
        end: SessionEnd,
        tally: TrialTally,
    ) -> AppResult<SessionSummary> {
        self.write(stores, Some(&end))?;
        self.storage.close()?;

        Ok(SessionSummary {
            file: self.file(),
            group: self.group,
            start_time: self.header.start_time,
            end_time: end.end_time,
            arduino_end: end.arduino_end,
            counters: stores
                .iter()
                .map(|store| (store.kind().name().to_string(), store.counter()))
                .collect(),
            tally,
            truncated: end.truncated,
            error: end.error,
        })
    }

    fn write(&mut self, stores: &[EventStore], end: Option<&SessionEnd>) -> AppResult<()> {
        let mut session = Group::new();
        if let Some(weight) = self.header.weight {
            session.set_attr("weight", weight);
        }

        let behavior = session.get_or_create(BEHAVIOR_GROUP);
        behavior.set_attr(
            "start_time",
            self.header.start_time.format(TIME_FORMAT).to_string(),
        );
        for (name, value) in self.header.parameters.iter() {
            behavior.set_attr(name, value);
        }
        for store in stores {
            behavior.set_dataset(store.kind().name(), store.to_dataset());
        }

        match end {
            Some(end) => {
                behavior.set_attr("end_time", end.end_time.format(TIME_FORMAT).to_string());
                behavior.set_attr("arduino_end", end.arduino_end);
                behavior.set_attr("notes", end.notes.as_str());
                behavior.set_attr("subject", end.subject.as_str());
                behavior.set_attr("truncated", end.truncated);
                behavior.set_attr("error", AttrValue::from(end.error.clone()));
            }
            None => {
                behavior.set_attr("notes", self.header.notes.as_str());
                behavior.set_attr("subject", self.header.subject.as_str());
            }
        }

        self.storage.write_group(&self.group, &session)?;
        self.storage.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::storage::JsonStorage;
    use crate::protocol::rig::EventKind;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn header(subject: &str) -> SessionHeader {
        SessionHeader {
            subject: subject.to_string(),
            weight: Some(21.5),
            notes: String::new(),
            parameters: [("session_dur", 1000), ("track_period", 50)]
                .into_iter()
                .collect(),
            start_time: Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        }
    }

    fn end() -> SessionEnd {
        SessionEnd {
            end_time: Local.with_ymd_and_hms(2024, 5, 1, 9, 50, 0).unwrap(),
            arduino_end: None,
            notes: "quiet mouse".to_string(),
            subject: "m7".to_string(),
            truncated: false,
            error: None,
        }
    }

    #[test]
    fn groups_get_suffixes_on_collision() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.json");

        let mut groups = Vec::new();
        for _ in 0..3 {
            let storage = Box::new(JsonStorage::open(&path).unwrap());
            let record = SessionRecord::create(storage, header("m7")).unwrap();
            groups.push(record.group().to_string());
            record.seal(&[], end(), TrialTally::default()).unwrap();
        }
        assert_eq!(groups, ["m7/2024-05-01", "m7/2024-05-01-1", "m7/2024-05-01-2"]);
    }

    #[test]
    fn blank_subject_becomes_question_mark() {
        let dir = tempdir().unwrap();
        let storage = Box::new(JsonStorage::open(&dir.path().join("s.json")).unwrap());
        let record = SessionRecord::create(storage, header("  ")).unwrap();
        assert_eq!(record.group(), "?/2024-05-01");
    }

    #[test]
    fn slash_in_subject_stays_one_group_level() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.json");
        let storage = Box::new(JsonStorage::open(&path).unwrap());
        let record = SessionRecord::create(storage, header("cage3/m7")).unwrap();
        assert_eq!(record.group(), "cage3_m7/2024-05-01");
        record.seal(&[], end(), TrialTally::default()).unwrap();

        let root = JsonStorage::read(&path).unwrap();
        assert!(root.contains("cage3_m7/2024-05-01/behavior"));
        assert!(!root.contains("cage3"));
    }

    #[test]
    fn flush_writes_recorded_columns_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.json");
        let storage = Box::new(JsonStorage::open(&path).unwrap());
        let mut record = SessionRecord::create(storage, header("m7")).unwrap();

        let mut lick = EventStore::with_capacity(EventKind::Lick, 10).unwrap();
        lick.push(100, 1).unwrap();
        record.flush(std::slice::from_ref(&lick)).unwrap();

        let root = JsonStorage::read(&path).unwrap();
        let behavior = root.get("m7/2024-05-01/behavior").unwrap();
        assert_eq!(behavior.dataset("lick").unwrap().shape, [2, 1]);
        assert_eq!(behavior.attr("start_time"), Some(&AttrValue::Text("09:30:00".into())));
        assert!(behavior.attr("end_time").is_none());
    }

    #[test]
    fn seal_writes_trimmed_data_and_end_attributes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.json");
        let storage = Box::new(JsonStorage::open(&path).unwrap());
        let record = SessionRecord::create(storage, header("m7")).unwrap();

        let mut lick = EventStore::with_capacity(EventKind::Lick, 10).unwrap();
        lick.push(100, 1).unwrap();
        lick.push(150, 0).unwrap();
        let summary = record.seal(&[lick], end(), TrialTally::default()).unwrap();
        assert_eq!(summary.counters.get("lick"), Some(&2));

        let root = JsonStorage::read(&path).unwrap();
        let session = root.get("m7/2024-05-01").unwrap();
        assert_eq!(session.attr("weight"), Some(&AttrValue::Float(21.5)));

        let behavior = session.get(BEHAVIOR_GROUP).unwrap();
        assert_eq!(behavior.attr("arduino_end"), Some(&AttrValue::Null));
        assert_eq!(behavior.attr("start_time"), Some(&AttrValue::Text("09:30:00".into())));
        assert_eq!(behavior.attr("end_time"), Some(&AttrValue::Text("09:50:00".into())));
        assert_eq!(behavior.attr("notes"), Some(&AttrValue::Text("quiet mouse".into())));
        assert_eq!(behavior.attr("session_dur"), Some(&AttrValue::Int(1000)));
        assert_eq!(behavior.attr("truncated"), Some(&AttrValue::Bool(false)));

        let data = behavior.dataset("lick").unwrap();
        assert_eq!(data.shape, [2, 2]);
        assert_eq!(data.data, [vec![100, 150], vec![1, 0]]);
    }
}
