//! Per-session ordered work queue.

use std::collections::VecDeque;

use courier_common::types::Context;

/// Double-ended FIFO of contexts waiting for a gate permit.
///
/// Normal contexts enter at the back, admin commands at the front. Not
/// synchronized on its own: the session table mutex guards every access.
#[derive(Debug, Default)]
pub struct OrderedQueue {
    items: VecDeque<Context>,
}

impl OrderedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, context: Context) {
        self.items.push_back(context);
    }

    /// Put `context` ahead of everything already queued.
    pub fn push_front(&mut self, context: Context) {
        self.items.push_front(context);
    }

    pub fn pop_front(&mut self) -> Option<Context> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every queued context, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.items.len();
        self.items = VecDeque::new();
        discarded
    }
}
