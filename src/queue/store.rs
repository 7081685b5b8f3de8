//! Stand-in for the out-of-scope external per-node list store (spec §1,
//! §6 "Persisted state layout"). The real system delegates durable queue
//! payloads to a third-party in-memory key/list store reachable over the
//! network; here that collaborator is represented by an in-process
//! `dashmap`-backed queue table offering the same four operations (push
//! tail, pop head, push head, length) the core actually calls.

use std::collections::VecDeque;

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct QueueStore {
    lists: DashMap<String, VecDeque<String>>,
}

impl QueueStore {
    pub fn new() -> Self {
        QueueStore::default()
    }

    pub fn push_tail(&self, queue: &str, payload: String) {
        self.lists.entry(queue.to_string()).or_default().push_back(payload);
    }

    pub fn pop_head(&self, queue: &str) -> Option<String> {
        let mut entry = self.lists.get_mut(queue)?;
        entry.pop_front()
    }

    /// Used by redelivery: the requeued payload must land ahead of anything
    /// produced after the redelivery event (spec §4.5, testable property 6).
    pub fn push_head(&self, queue: &str, payload: String) {
        self.lists.entry(queue.to_string()).or_default().push_front(payload);
    }

    pub fn lengths(&self) -> std::collections::HashMap<String, usize> {
        self.lists.iter().map(|entry| (entry.key().clone(), entry.value().len())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let store = QueueStore::new();
        store.push_tail("q", "a".into());
        store.push_tail("q", "b".into());
        assert_eq!(store.pop_head("q"), Some("a".to_string()));
        assert_eq!(store.pop_head("q"), Some("b".to_string()));
        assert_eq!(store.pop_head("q"), None);
    }

    #[test]
    fn requeue_goes_ahead_of_newer_writes() {
        let store = QueueStore::new();
        store.push_tail("q", "first".into());
        let popped = store.pop_head("q").unwrap();
        store.push_tail("q", "second".into());
        store.push_head("q", popped); // redelivery of "first"
        assert_eq!(store.pop_head("q"), Some("first".to_string()));
        assert_eq!(store.pop_head("q"), Some("second".to_string()));
    }
}
