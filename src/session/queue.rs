//! FIFO hand-off from the scanner to the recorder.

use crate::protocol::codec::Event;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// Unbounded event queue with a single consumer.
///
/// Producers get an [`UnboundedSender`] through [`EventQueue::sender`]; pushing never
/// blocks, so the scanner can run on a blocking thread.
#[derive(Debug)]
pub struct EventQueue {
    tx: UnboundedSender<Event>,
    rx: UnboundedReceiver<Event>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    /// Empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Producer handle.
    pub fn sender(&self) -> UnboundedSender<Event> {
        self.tx.clone()
    }

    /// Next event, without waiting.
    pub fn try_pop(&mut self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Discard every queued event. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        while self.try_pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}
