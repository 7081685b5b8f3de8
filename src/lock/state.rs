//! The lock state machine (spec §4.4): exclusive/shared locks with FIFO
//! waiter queues and wait-for-graph deadlock detection. Authoritative only
//! on the Raft leader -- followers hold no lock data in this design (§3).

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockEntry {
    pub mode: LockMode,
    pub holders: Vec<String>,
    pub waiters: VecDeque<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientDeps {
    pub waiting_for: Option<String>,
    pub holding: HashSet<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted,
    AlreadyHeld,
    Waiting,
    DeadlockRejected,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReleaseError {
    UnknownKey,
    NotHolder,
}

/// The leader-local lock table. Not `Sync` by itself -- the owning
/// `LockNode` guards it with a single mutex, per the "single owning
/// component" design note in spec §9.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: HashMap<String, LockEntry>,
    dependencies: HashMap<String, ClientDeps>,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager::default()
    }

    pub fn acquire(&mut self, key: &str, client: &str, mode: LockMode) -> AcquireOutcome {
        {
            let entry = self.locks.get(key);
            if let Some(entry) = entry {
                if entry.holders.iter().any(|h| h == client) {
                    return AcquireOutcome::AlreadyHeld;
                }
            }
        }

        let entry = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| LockEntry { mode, holders: Vec::new(), waiters: VecDeque::new() });

        if entry.holders.is_empty() {
            entry.mode = mode;
            entry.holders.push(client.to_string());
            self.grant_holding(client, key);
            return AcquireOutcome::Granted;
        }

        if mode == LockMode::Shared && entry.mode == LockMode::Shared {
            entry.holders.push(client.to_string());
            self.grant_holding(client, key);
            return AcquireOutcome::Granted;
        }

        if self.would_deadlock(client, key) {
            return AcquireOutcome::DeadlockRejected;
        }

        let entry = self.locks.get_mut(key).expect("entry inserted above");
        if !entry.waiters.iter().any(|w| w == client) {
            entry.waiters.push_back(client.to_string());
        }
        self.dependencies.entry(client.to_string()).or_default().waiting_for = Some(key.to_string());
        AcquireOutcome::Waiting
    }

    pub fn release(&mut self, key: &str, client: &str) -> Result<ReleaseOutcome, ReleaseError> {
        let entry = self.locks.get_mut(key).ok_or(ReleaseError::UnknownKey)?;
        let pos = entry.holders.iter().position(|h| h == client).ok_or(ReleaseError::NotHolder)?;
        entry.holders.remove(pos);
        if let Some(deps) = self.dependencies.get_mut(client) {
            deps.holding.remove(key);
        }

        if entry.holders.is_empty() {
            if let Some(next) = entry.waiters.pop_front() {
                // Documented simplification (spec §9): the dequeued waiter
                // is always granted exclusive, regardless of the mode it
                // originally requested.
                entry.mode = LockMode::Exclusive;
                entry.holders.push(next.clone());
                if let Some(deps) = self.dependencies.get_mut(&next) {
                    deps.waiting_for = None;
                }
                self.dependencies.entry(next).or_default().holding.insert(key.to_string());
            }
        }

        Ok(ReleaseOutcome::Released)
    }

    fn grant_holding(&mut self, client: &str, key: &str) {
        self.dependencies.entry(client.to_string()).or_default().holding.insert(key.to_string());
    }

    /// DFS over the wait-for graph (spec §4.4): `client` wants to wait on
    /// `key`. Traverses from `key`'s current holders, following each
    /// encountered client's own `waiting_for` edge, looking for a path back
    /// to `client` -- i.e. whether granting the prospective wait edge would
    /// close a cycle.
    fn would_deadlock(&self, client: &str, key: &str) -> bool {
        let Some(entry) = self.locks.get(key) else { return false };
        let mut stack: Vec<String> = entry.holders.clone();
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(node) = stack.pop() {
            if node == client {
                return true;
            }
            if !visited.insert(node.clone()) {
                continue;
            }
            if let Some(deps) = self.dependencies.get(&node) {
                if let Some(waiting_for) = &deps.waiting_for {
                    if let Some(holders_entry) = self.locks.get(waiting_for) {
                        stack.extend(holders_entry.holders.iter().cloned());
                    }
                }
            }
        }
        false
    }

    pub fn locks_snapshot(&self) -> &HashMap<String, LockEntry> {
        &self.locks
    }

    pub fn dependencies_snapshot(&self) -> &HashMap<String, ClientDeps> {
        &self.dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_acquire_then_conflicting_waits() {
        let mut mgr = LockManager::new();
        assert_eq!(mgr.acquire("r1", "c1", LockMode::Exclusive), AcquireOutcome::Granted);
        assert_eq!(mgr.acquire("r1", "c2", LockMode::Exclusive), AcquireOutcome::Waiting);
        assert_eq!(mgr.release("r1", "c1"), Ok(ReleaseOutcome::Released));
        assert!(mgr.locks_snapshot()["r1"].holders.contains(&"c2".to_string()));
        assert_eq!(mgr.locks_snapshot()["r1"].mode, LockMode::Exclusive);
    }

    #[test]
    fn shared_locks_are_compatible() {
        let mut mgr = LockManager::new();
        assert_eq!(mgr.acquire("r1", "c1", LockMode::Shared), AcquireOutcome::Granted);
        assert_eq!(mgr.acquire("r1", "c2", LockMode::Shared), AcquireOutcome::Granted);
        assert_eq!(mgr.locks_snapshot()["r1"].holders.len(), 2);
    }

    #[test]
    fn rerequest_by_current_holder_is_already_held() {
        let mut mgr = LockManager::new();
        mgr.acquire("r1", "c1", LockMode::Exclusive);
        assert_eq!(mgr.acquire("r1", "c1", LockMode::Exclusive), AcquireOutcome::AlreadyHeld);
    }

    #[test]
    fn release_by_non_holder_errors() {
        let mut mgr = LockManager::new();
        mgr.acquire("r1", "c1", LockMode::Exclusive);
        assert_eq!(mgr.release("r1", "c2"), Err(ReleaseError::NotHolder));
    }

    #[test]
    fn release_unknown_key_errors() {
        let mut mgr = LockManager::new();
        assert_eq!(mgr.release("nope", "c1"), Err(ReleaseError::UnknownKey));
    }

    #[test]
    fn deadlock_cycle_is_rejected() {
        let mut mgr = LockManager::new();
        assert_eq!(mgr.acquire("r1", "c1", LockMode::Exclusive), AcquireOutcome::Granted);
        assert_eq!(mgr.acquire("r2", "c2", LockMode::Exclusive), AcquireOutcome::Granted);

        // c1 waits on r2 (held by c2) -- fine, no cycle yet.
        assert_eq!(mgr.acquire("r2", "c1", LockMode::Exclusive), AcquireOutcome::Waiting);

        // c2 waits on r1 (held by c1, who is waiting on c2's r2) -- cycle.
        assert_eq!(mgr.acquire("r1", "c2", LockMode::Exclusive), AcquireOutcome::DeadlockRejected);
        assert!(!mgr.locks_snapshot()["r1"].waiters.contains(&"c2".to_string()));
    }

    #[test]
    fn dependency_coherence_holds_after_operations() {
        let mut mgr = LockManager::new();
        mgr.acquire("r1", "c1", LockMode::Exclusive);
        mgr.acquire("r1", "c2", LockMode::Exclusive);

        for (key, entry) in mgr.locks_snapshot() {
            for waiter in &entry.waiters {
                assert_eq!(mgr.dependencies_snapshot()[waiter].waiting_for.as_deref(), Some(key.as_str()));
            }
            for holder in &entry.holders {
                assert!(mgr.dependencies_snapshot()[holder].holding.contains(key));
            }
        }
    }
}
