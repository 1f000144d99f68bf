//! Single consumer demultiplexing events into per-kind stores.

use crate::data::capacity::{CapacityPolicy, SessionEstimate};
use crate::data::event_store::EventStore;
use crate::data::tally::TrialTally;
use crate::error::AppResult;
use crate::protocol::codec::Event;
use crate::protocol::parameters::ParameterSet;
use crate::protocol::rig::{EventKind, Rig, Routing};
use std::collections::BTreeMap;
use tracing::warn;

/// What the recorder did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Written to the store of `kind`, whose counter is now `count`.
    Stored {
        /// Kind of the stored event.
        kind: EventKind,
        /// Counter after the write.
        count: usize,
    },
    /// Next-trial preview for the presentation side channel.
    Preview {
        /// Device timestamp of the preview.
        timestamp: i64,
        /// Preview payload (trial type).
        payload: i64,
    },
    /// Kind outside the rig's persisted set.
    Ignored(EventKind),
    /// End of session.
    End {
        /// Device timestamp of the end event.
        timestamp: i64,
    },
    /// Arrived after the end event; dropped.
    AfterEnd,
}

/// Writes events into the stores of one session.
#[derive(Debug, Clone)]
pub struct EventRecorder {
    rig: Rig,
    stores: Vec<EventStore>,
    tally: TrialTally,
    ended: Option<i64>,
}

impl EventRecorder {
    /// Recorder with one store per persisted kind of `rig`, sized by `policy`.
    ///
    /// Fails when a store cannot be allocated.
    pub fn new(rig: Rig, params: &ParameterSet, policy: CapacityPolicy) -> AppResult<Self> {
        let estimate = SessionEstimate::for_rig(rig, params);
        let stores = rig
            .persisted_kinds()
            .iter()
            .map(|kind| EventStore::with_capacity(*kind, policy.capacity_for(*kind, &estimate)))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self {
            rig,
            stores,
            tally: TrialTally::default(),
            ended: None,
        })
    }

    /// Route one event.
    ///
    /// Fails only when the target store is full.
    pub fn record(&mut self, event: Event) -> AppResult<RecordOutcome> {
        if self.ended.is_some() {
            return Ok(RecordOutcome::AfterEnd);
        }

        let kind = self.rig.classify(event.code);
        match self.rig.route(kind) {
            Routing::End => {
                self.ended = Some(event.timestamp);
                Ok(RecordOutcome::End {
                    timestamp: event.timestamp,
                })
            }
            Routing::Preview => Ok(RecordOutcome::Preview {
                timestamp: event.timestamp,
                payload: event.payload_or_zero(),
            }),
            Routing::Ignore => {
                warn!(
                    "Ignoring event code {} ({}) at {} ms",
                    event.code, kind, event.timestamp
                );
                Ok(RecordOutcome::Ignored(kind))
            }
            Routing::Persist => {
                let count = match self.stores.iter_mut().find(|s| s.kind() == kind) {
                    Some(store) => store.push(event.timestamp, event.payload_or_zero())?,
                    None => return Ok(RecordOutcome::Ignored(kind)),
                };
                if self.rig == Rig::GoNoGo {
                    self.tally.observe(kind, event.payload_or_zero());
                }
                Ok(RecordOutcome::Stored { kind, count })
            }
        }
    }

    /// Device timestamp of the end event, once seen.
    pub fn ended_at(&self) -> Option<i64> {
        self.ended
    }

    /// Drop unwritten columns from every store.
    pub fn trim_all(&mut self) {
        for store in &mut self.stores {
            store.trim();
        }
    }

    /// Store of `kind`, if the rig persists it.
    pub fn store(&self, kind: EventKind) -> Option<&EventStore> {
        self.stores.iter().find(|s| s.kind() == kind)
    }

    /// Every store, in the rig's persisted order.
    pub fn stores(&self) -> &[EventStore] {
        &self.stores
    }

    /// Counter per persisted kind.
    pub fn counters(&self) -> BTreeMap<EventKind, usize> {
        self.stores.iter().map(|s| (s.kind(), s.counter())).collect()
    }

    /// Live go/no-go tally.
    pub fn tally(&self) -> TrialTally {
        self.tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(rig: Rig, columns: usize) -> EventRecorder {
        EventRecorder::new(rig, &rig.default_parameters(), CapacityPolicy::Fixed { columns }).unwrap()
    }

    #[test]
    fn trial_starts_then_end() {
        let mut rec = recorder(Rig::GoNoGo, 8);
        rec.record(Event::new(3, 10, None)).unwrap();
        rec.record(Event::new(3, 20, None)).unwrap();
        assert_eq!(
            rec.record(Event::new(0, 30, None)).unwrap(),
            RecordOutcome::End { timestamp: 30 }
        );

        let store = rec.store(EventKind::TrialStart).unwrap();
        assert_eq!(store.counter(), 2);
        assert_eq!(&store.rows()[0][..2], &[10, 20]);
        assert_eq!(&store.rows()[1][..2], &[0, 0]);

        rec.trim_all();
        assert_eq!(rec.store(EventKind::TrialStart).unwrap().width(), 2);
    }

    #[test]
    fn nothing_is_written_after_end() {
        let mut rec = recorder(Rig::GoNoGo, 8);
        rec.record(Event::new(0, 5, None)).unwrap();
        assert_eq!(
            rec.record(Event::new(1, 6, Some(1))).unwrap(),
            RecordOutcome::AfterEnd
        );
        assert!(rec.counters().values().all(|count| *count == 0));
    }

    #[test]
    fn kinds_do_not_interfere() {
        let mut rec = recorder(Rig::GoNoGo, 8);
        rec.record(Event::new(1, 10, Some(1))).unwrap();
        rec.record(Event::new(2, 11, Some(-4))).unwrap();
        rec.record(Event::new(1, 12, Some(0))).unwrap();

        let counters = rec.counters();
        assert_eq!(counters[&EventKind::Lick], 2);
        assert_eq!(counters[&EventKind::Movement], 1);
        assert_eq!(counters[&EventKind::Cs], 0);
        assert_eq!(rec.store(EventKind::Movement).unwrap().rows()[1][0], -4);
    }

    #[test]
    fn preview_and_unknown_codes_leave_stores_alone() {
        let mut rec = recorder(Rig::GoNoGo, 8);
        assert_eq!(
            rec.record(Event::new(8, 100, Some(2))).unwrap(),
            RecordOutcome::Preview {
                timestamp: 100,
                payload: 2
            }
        );
        assert_eq!(
            rec.record(Event::new(42, 101, None)).unwrap(),
            RecordOutcome::Ignored(EventKind::Unknown(42))
        );
        assert!(rec.counters().values().all(|count| *count == 0));
    }

    #[test]
    fn overflow_propagates() {
        let mut rec = recorder(Rig::Wheel, 1);
        rec.record(Event::new(7, 1, Some(3))).unwrap();
        assert!(rec.record(Event::new(7, 2, Some(3))).is_err());
        assert_eq!(rec.store(EventKind::Wheel).unwrap().counter(), 1);
    }

    #[test]
    fn tally_tracks_go_no_go_payloads() {
        let mut rec = recorder(Rig::GoNoGo, 8);
        rec.record(Event::new(5, 1, Some(1))).unwrap();
        rec.record(Event::new(7, 2, Some(3))).unwrap();
        rec.record(Event::new(1, 3, Some(1))).unwrap();
        let tally = rec.tally();
        assert_eq!(tally.cs_trials, [0, 1, 0]);
        assert_eq!(tally.cs_responses, [0, 1, 0]);
        assert_eq!(tally.lick_onsets, 1);
    }

    #[test]
    fn default_capacity_comes_from_parameters() {
        let rec = EventRecorder::new(
            Rig::GoNoGo,
            &Rig::GoNoGo.default_parameters(),
            CapacityPolicy::default(),
        )
        .unwrap();
        assert_eq!(rec.store(EventKind::Cs).unwrap().width(), 110);
    }

    #[test]
    fn oversized_fixed_policy_is_clamped() {
        let rec = recorder(Rig::Wheel, usize::MAX);
        assert_eq!(
            rec.store(EventKind::Wheel).unwrap().width(),
            crate::data::capacity::MAX_STORE_COLUMNS
        );
    }
}
