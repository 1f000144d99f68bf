//! Event store pre-sizing.
//!
//! Stores are allocated once per session from the uploaded parameters. Trial-scale
//! kinds get room for the planned trial count; everything else gets room for one
//! event per tracking half-period over the planned session length. Both are padded
//! and clamped to [`MAX_STORE_COLUMNS`].

use crate::protocol::parameters::ParameterSet;
use crate::protocol::rig::{EventKind, Rig};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default headroom applied to estimated counts.
pub const DEFAULT_PADDING: f64 = 1.1;

/// Largest padding accepted by configuration validation.
pub const MAX_PADDING: f64 = 10.0;

/// Upper bound on the columns of one store (16 bytes each).
pub const MAX_STORE_COLUMNS: usize = 4_000_000;

/// How store capacity is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Estimate from session parameters, multiplied by `padding`.
    Estimate {
        /// Multiplier applied to the estimated count (≥ 1.0).
        padding: f64,
    },
    /// Same capacity for every kind.
    Fixed {
        /// Columns per store.
        columns: usize,
    },
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        CapacityPolicy::Estimate {
            padding: DEFAULT_PADDING,
        }
    }
}

/// Planned size of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEstimate {
    /// Planned number of trials.
    pub trials: u64,
    /// Tracking frames over the whole session, including pre/post periods.
    pub frames: u64,
}

fn non_negative(value: i64) -> u64 {
    value.max(0) as u64
}

impl SessionEstimate {
    /// Estimate from the parameters uploaded to `rig`.
    pub fn for_rig(rig: Rig, params: &ParameterSet) -> Self {
        let track_period = non_negative(params.get_or_zero("track_period")).max(1);
        let frames_over =
            |duration_ms: u64| (duration_ms.saturating_mul(2) / track_period).max(1);

        match rig {
            Rig::GoNoGo => {
                let planned = ["cs0_num", "cs1_num", "cs2_num"]
                    .iter()
                    .map(|name| non_negative(params.get_or_zero(name)))
                    .fold(0u64, u64::saturating_add);
                let (trials, session_time) = if planned == 0 {
                    (1, non_negative(params.get_or_zero("session_dur")))
                } else {
                    (
                        planned,
                        planned.saturating_mul(non_negative(params.get_or_zero("mean_iti"))),
                    )
                };
                let total = session_time
                    .saturating_add(non_negative(params.get_or_zero("pre_session")))
                    .saturating_add(non_negative(params.get_or_zero("post_session")));
                Self {
                    trials,
                    frames: frames_over(total),
                }
            }
            Rig::Conveyor => {
                let trials = non_negative(params.get_or_zero("trial_num")).max(1);
                let total = non_negative(params.get_or_zero("pre_session"))
                    .saturating_add(non_negative(params.get_or_zero("post_session")))
                    .saturating_add(trials.saturating_mul(non_negative(params.get_or_zero("iti"))));
                Self {
                    trials,
                    frames: frames_over(total),
                }
            }
            Rig::Wheel => Self {
                trials: 1,
                frames: frames_over(non_negative(params.get_or_zero("session_dur"))),
            },
        }
    }
}

impl CapacityPolicy {
    /// Capacity for the store of `kind`, never above [`MAX_STORE_COLUMNS`].
    pub fn capacity_for(&self, kind: EventKind, estimate: &SessionEstimate) -> usize {
        let columns = match *self {
            CapacityPolicy::Fixed { columns } => columns,
            CapacityPolicy::Estimate { padding } => {
                let base = if kind.scales_with_trials() {
                    estimate.trials
                } else {
                    estimate.frames
                };
                // padding is applied in thousandths so 100 × 1.1 stays 110
                let permille = (padding.max(1.0).min(MAX_PADDING) * 1000.0).round() as u64;
                let padded = base.saturating_mul(permille).div_ceil(1000).max(1);
                usize::try_from(padded).unwrap_or(usize::MAX)
            }
        };
        if columns > MAX_STORE_COLUMNS {
            warn!(
                "Store '{}' would need {} columns; clamping to {}",
                kind, columns, MAX_STORE_COLUMNS
            );
        }
        columns.min(MAX_STORE_COLUMNS)
    }
}
