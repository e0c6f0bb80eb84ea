//! Default instance-id allocator.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::traits::InstanceIdAllocator;

/// In-process allocator: one counter per element, starting at 1.
#[derive(Default)]
pub struct MonotonicIdAllocator {
    counters: Mutex<HashMap<String, u64>>,
}

impl MonotonicIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstanceIdAllocator for MonotonicIdAllocator {
    fn next(&self, element: &str) -> u64 {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let counter = counters.entry(element.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}
