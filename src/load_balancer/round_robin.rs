//! Round-robin load balancing strategy.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::load_balancer::backend::Backend;

/// Round-robin selector.
///
/// The cursor lives behind a lock so that selection (scan for an eligible
/// backend, then advance past it) is one step: concurrent callers each see
/// a distinct successor.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: Mutex<usize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next backend, starting at the cursor, for which `eligible`
    /// holds. The cursor moves just past the chosen backend and wraps.
    pub fn next_server<F>(&self, backends: &[Arc<Backend>], eligible: F) -> Option<Arc<Backend>>
    where
        F: Fn(&Backend) -> bool,
    {
        if backends.is_empty() {
            return None;
        }

        let len = backends.len();
        let mut cursor = self.cursor.lock();
        for i in 0..len {
            let index = (*cursor + i) % len;
            let backend = &backends[index];
            if eligible(backend) {
                *cursor = (index + 1) % len;
                return Some(Arc::clone(backend));
            }
        }
        None
    }
}
