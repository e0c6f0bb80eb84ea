//! Pending queue — the retry backlog for elastic elements.

use std::collections::VecDeque;

use tracing::debug;

use gridplane_model::{PlacementRequest, ServiceElement};

struct PendingEntry {
    request: PlacementRequest,
    /// Monotonic insertion index; higher means queued more recently.
    index: u64,
}

/// FIFO-ish bag of placement requests keyed by element identity.
///
/// Requests land here when no node qualified; they are replayed whenever
/// capacity appears. `drain` removes every entry before re-dispatch so a
/// repeat failure re-queues cleanly instead of duplicating.
#[derive(Default)]
pub struct PendingQueue {
    entries: VecDeque<PendingEntry>,
    seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, request: PlacementRequest) {
        self.seq += 1;
        debug!(
            element = %request.element.name,
            index = self.seq,
            "request queued for retry"
        );
        self.entries.push_back(PendingEntry {
            request,
            index: self.seq,
        });
    }

    /// Queued request count for one element.
    pub fn count(&self, element: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.request.element.name == element)
            .count()
    }

    /// Remove up to `n` requests for the element, most recently queued
    /// first. Used by trim/decrement to shed backlog before touching
    /// placed instances.
    pub fn remove_up_to(&mut self, element: &str, n: usize) -> Vec<PlacementRequest> {
        let mut indices: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| e.request.element.name == element)
            .map(|e| e.index)
            .collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices.truncate(n);

        let mut removed = Vec::new();
        for idx in indices {
            if let Some(pos) = self.entries.iter().position(|e| e.index == idx) {
                if let Some(entry) = self.entries.remove(pos) {
                    removed.push(entry.request);
                }
            }
        }
        removed
    }

    /// Replace the stale element snapshot inside queued requests,
    /// preserving queue positions and accumulated reasons.
    pub fn update_snapshot(&mut self, element: &ServiceElement) {
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.request.element.name == element.name)
        {
            entry.request.set_element(element.clone());
        }
    }

    /// Remove every request for the element, e.g. when it is declared
    /// uninstantiable. Returns how many were dropped.
    pub fn remove_element(&mut self, element: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.request.element.name != element);
        before - self.entries.len()
    }

    /// Take everything, oldest first. The caller re-dispatches each
    /// request; failures re-queue through the normal path.
    pub fn drain(&mut self) -> Vec<PlacementRequest> {
        self.entries.drain(..).map(|e| e.request).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridplane_model::RequestKind;

    fn req(element: &str, planned: u32) -> PlacementRequest {
        PlacementRequest::new(ServiceElement::dynamic(element, planned), RequestKind::Place)
    }

    #[test]
    fn count_is_per_element() {
        let mut q = PendingQueue::new();
        q.add(req("web", 1));
        q.add(req("web", 1));
        q.add(req("cache", 1));

        assert_eq!(q.count("web"), 2);
        assert_eq!(q.count("cache"), 1);
        assert_eq!(q.count("ghost"), 0);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn remove_up_to_takes_newest_first() {
        let mut q = PendingQueue::new();
        let mut first = req("web", 1);
        first.add_reason("first");
        let mut second = req("web", 1);
        second.add_reason("second");
        q.add(first);
        q.add(second);

        let removed = q.remove_up_to("web", 1);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].failure_reasons, vec!["second".to_string()]);
        assert_eq!(q.count("web"), 1);
    }

    #[test]
    fn remove_up_to_caps_at_available() {
        let mut q = PendingQueue::new();
        q.add(req("web", 1));
        assert_eq!(q.remove_up_to("web", 5).len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn update_snapshot_preserves_position() {
        let mut q = PendingQueue::new();
        q.add(req("web", 1));
        q.add(req("cache", 1));

        let updated = ServiceElement::dynamic("web", 9);
        q.update_snapshot(&updated);

        let drained = q.drain();
        assert_eq!(drained[0].element.name, "web");
        assert_eq!(drained[0].element.planned, 9);
        assert_eq!(drained[1].element.name, "cache");
    }

    #[test]
    fn drain_empties_oldest_first() {
        let mut q = PendingQueue::new();
        q.add(req("a", 1));
        q.add(req("b", 1));

        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].element.name, "a");
        assert!(q.is_empty());
    }

    #[test]
    fn remove_element_drops_all_entries() {
        let mut q = PendingQueue::new();
        q.add(req("web", 1));
        q.add(req("web", 1));
        q.add(req("cache", 1));

        assert_eq!(q.remove_element("web"), 2);
        assert_eq!(q.len(), 1);
    }
}
