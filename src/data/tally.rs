//! Live trial tally derived from go/no-go event payloads.

use crate::protocol::rig::EventKind;
use serde::Serialize;

/// Running counts shown to the operator during a go/no-go session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrialTally {
    /// Lick events with payload 1.
    pub lick_onsets: u32,
    /// Trials presented per CS index.
    pub cs_trials: [u32; 3],
    /// Responses per CS index.
    pub cs_responses: [u32; 3],
}

impl TrialTally {
    /// Fold one event into the tally. Returns whether anything changed.
    ///
    /// Response payloads encode the CS as `2 * cs + 1`; even payloads are misses.
    pub fn observe(&mut self, kind: EventKind, payload: i64) -> bool {
        match (kind, payload) {
            (EventKind::Lick, 1) => self.lick_onsets += 1,
            (EventKind::Cs, cs @ 0..=2) => self.cs_trials[cs as usize] += 1,
            (EventKind::Response, code @ (1 | 3 | 5)) => {
                self.cs_responses[(code as usize - 1) / 2] += 1
            }
            _ => return false,
        }
        true
    }

    /// Responses divided by trials for CS `index`, or `None` before its first trial.
    pub fn response_rate(&self, index: usize) -> Option<f64> {
        let trials = *self.cs_trials.get(index)?;
        (trials > 0).then(|| f64::from(self.cs_responses[index]) / f64::from(trials))
    }
}
