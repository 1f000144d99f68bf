//! Pre-sized 2×N store for one event kind.
//!
//! Row 0 holds device timestamps, row 1 payloads (0 when the device sent none).
//! Columns past the cursor are zero until written. [`EventStore::trim`] drops them so
//! the stored width equals the number of events recorded.

use super::session_file::Dataset;
use crate::error::{AppResult, DaqError};
use crate::protocol::rig::EventKind;

fn zeroed(kind: EventKind, capacity: usize) -> AppResult<Vec<i64>> {
    let mut row = Vec::new();
    row.try_reserve_exact(capacity)
        .map_err(|_| DaqError::StoreAllocation {
            kind: kind.name().to_string(),
            capacity,
        })?;
    row.resize(capacity, 0);
    Ok(row)
}

/// Indexed storage for every event of one kind in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStore {
    kind: EventKind,
    timestamps: Vec<i64>,
    payloads: Vec<i64>,
    cursor: usize,
}

impl EventStore {
    /// Zero-filled store with room for `capacity` events.
    ///
    /// Fails with [`DaqError::StoreAllocation`] instead of aborting when the memory
    /// cannot be reserved.
    pub fn with_capacity(kind: EventKind, capacity: usize) -> AppResult<Self> {
        Ok(Self {
            kind,
            timestamps: zeroed(kind, capacity)?,
            payloads: zeroed(kind, capacity)?,
            cursor: 0,
        })
    }

    /// Event kind held by this store.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Number of columns currently allocated.
    pub fn width(&self) -> usize {
        self.timestamps.len()
    }

    /// Number of events recorded.
    pub fn counter(&self) -> usize {
        self.cursor
    }

    /// Whether the next push would overflow.
    pub fn is_full(&self) -> bool {
        self.cursor >= self.width()
    }

    /// Write one event at the cursor and advance it.
    ///
    /// Returns the new counter. Fails with [`DaqError::StoreOverflow`] when the store
    /// is full; nothing is written in that case.
    pub fn push(&mut self, timestamp: i64, payload: i64) -> AppResult<usize> {
        if self.is_full() {
            return Err(DaqError::StoreOverflow {
                kind: self.kind.name().to_string(),
                capacity: self.width(),
            });
        }
        self.timestamps[self.cursor] = timestamp;
        self.payloads[self.cursor] = payload;
        self.cursor += 1;
        Ok(self.cursor)
    }

    /// Drop every column past the cursor.
    pub fn trim(&mut self) {
        self.timestamps.truncate(self.cursor);
        self.payloads.truncate(self.cursor);
        self.timestamps.shrink_to_fit();
        self.payloads.shrink_to_fit();
    }

    /// Timestamp and payload rows, full width.
    pub fn rows(&self) -> [&[i64]; 2] {
        [&self.timestamps, &self.payloads]
    }

    /// Recorded columns only, as a dataset.
    pub fn to_dataset(&self) -> Dataset {
        Dataset::from_rows(
            self.timestamps[..self.cursor].to_vec(),
            self.payloads[..self.cursor].to_vec(),
        )
    }
}
