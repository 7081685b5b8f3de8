#![allow(dead_code)]

//! Raft leader election + heartbeat (spec §4.3). Log replication is
//! explicitly out of scope (§1 Non-goals): this engine only ever decides
//! who the leader is and keeps followers' election timers fed. State-machine
//! mutations (the lock manager's `locks`/`dependencies`) live entirely on
//! the leader and are lost on leader change -- see the design note in §9.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::transport::{PeerReply, PeerTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Follower => "follower",
            Role::Candidate => "candidate",
            Role::Leader => "leader",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
}

struct Inner {
    role: Role,
    current_term: u64,
    voted_for: Option<String>,
    votes_received: HashSet<String>,
}

pub struct Timing {
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
}

/// A single Raft node's election state machine. Owned by the lock-manager
/// node; the HTTP handlers for `/request-vote` and `/append-entries`
/// delegate straight into this struct's methods.
pub struct RaftElector {
    node_id: String,
    peer_urls: HashMap<String, String>,
    cluster_size: usize,
    transport: PeerTransport,
    timing: Timing,

    inner: Mutex<Inner>,
    election_timer: Mutex<Option<JoinHandle<()>>>,
    heartbeat_timer: Mutex<Option<JoinHandle<()>>>,
}

impl RaftElector {
    pub fn new(
        node_id: String,
        peer_urls: HashMap<String, String>,
        transport: PeerTransport,
        timing: Timing,
    ) -> Arc<Self> {
        let cluster_size = peer_urls.len() + 1;
        Arc::new(RaftElector {
            node_id,
            peer_urls,
            cluster_size,
            transport,
            timing,
            inner: Mutex::new(Inner {
                role: Role::Follower,
                current_term: 0,
                voted_for: None,
                votes_received: HashSet::new(),
            }),
            election_timer: Mutex::new(None),
            heartbeat_timer: Mutex::new(None),
        })
    }

    /// Starts the node's first election timer. Call once at process startup.
    pub async fn start(self: &Arc<Self>) {
        self.reset_election_timer().await;
    }

    pub async fn role(&self) -> Role {
        self.inner.lock().await.role
    }

    pub async fn is_leader(&self) -> bool {
        self.inner.lock().await.role == Role::Leader
    }

    pub async fn current_term(&self) -> u64 {
        self.inner.lock().await.current_term
    }

    fn majority(&self) -> usize {
        self.cluster_size / 2 + 1
    }

    fn election_timeout(&self) -> Duration {
        let min = self.timing.election_timeout_min.as_millis() as u64;
        let max = self.timing.election_timeout_max.as_millis() as u64;
        let millis = rand::thread_rng().gen_range(min..max);
        Duration::from_millis(millis)
    }

    /// Cancels any running election timer and starts a fresh one. Required
    /// to be synchronous with the state change that invalidates the old
    /// timer (reset, step-down, heartbeat receipt); `JoinHandle::abort` is
    /// immediate, so there is no window where a stale timer can fire.
    async fn reset_election_timer(self: &Arc<Self>) {
        let mut slot = self.election_timer.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        let timeout = self.election_timeout();
        let this = self.clone();
        *slot = Some(tokio::spawn(async move {
            sleep(timeout).await;
            this.on_election_timeout().await;
        }));
    }

    async fn cancel_heartbeat(&self) {
        let mut slot = self.heartbeat_timer.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    async fn on_election_timeout(self: &Arc<Self>) {
        let should_start = {
            let inner = self.inner.lock().await;
            inner.role != Role::Leader
        };
        if should_start {
            self.start_election().await;
        }
    }

    async fn start_election(self: &Arc<Self>) {
        let term = {
            let mut inner = self.inner.lock().await;
            inner.role = Role::Candidate;
            inner.current_term += 1;
            inner.voted_for = Some(self.node_id.clone());
            inner.votes_received = HashSet::from([self.node_id.clone()]);
            info!("[{}] became candidate for term {}", self.node_id, inner.current_term);
            inner.current_term
        };

        // A candidate still needs its own timeout in case this election
        // stalls (split vote) -- restart the clock before the network call.
        self.reset_election_timer().await;

        let args = RequestVoteArgs { term, candidate_id: self.node_id.clone() };
        let replies = self.transport.broadcast("/request-vote", &self.peer_urls, &args).await;

        for (peer_id, reply) in replies {
            let parsed: Option<RequestVoteReply> = match reply {
                PeerReply::Ok(value) => serde_json::from_value(value).ok(),
                _ => None,
            };
            let Some(reply) = parsed else { continue };

            if reply.term > term {
                self.step_down(reply.term).await;
                return;
            }
            if reply.vote_granted {
                let mut inner = self.inner.lock().await;
                if inner.role != Role::Candidate || inner.current_term != term {
                    return;
                }
                inner.votes_received.insert(peer_id);
                if inner.votes_received.len() >= self.majority() {
                    drop(inner);
                    self.become_leader(term).await;
                    return;
                }
            }
        }
    }

    async fn become_leader(self: &Arc<Self>, expected_term: u64) {
        {
            let mut inner = self.inner.lock().await;
            if inner.role != Role::Candidate || inner.current_term != expected_term {
                return;
            }
            inner.role = Role::Leader;
            info!("[{}] became leader for term {}", self.node_id, inner.current_term);
        }

        {
            let mut slot = self.election_timer.lock().await;
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.run_heartbeats(expected_term).await;
        });
        *self.heartbeat_timer.lock().await = Some(handle);
    }

    async fn run_heartbeats(self: &Arc<Self>, term: u64) {
        loop {
            {
                let inner = self.inner.lock().await;
                if inner.role != Role::Leader || inner.current_term != term {
                    return;
                }
            }
            let args = AppendEntriesArgs { term, leader_id: self.node_id.clone() };
            let this = self.clone();
            let peer_urls = self.peer_urls.clone();
            // Fire-and-forget, per spec: the leader does not wait for or
            // retry heartbeat replies.
            tokio::spawn(async move {
                let replies = this.transport.broadcast("/append-entries", &peer_urls, &args).await;
                for (_peer, reply) in replies {
                    if let PeerReply::Ok(value) = reply {
                        if let Ok(reply) = serde_json::from_value::<AppendEntriesReply>(value) {
                            if reply.term > term {
                                this.step_down(reply.term).await;
                            }
                        }
                    }
                }
            });
            sleep(self.timing.heartbeat_interval).await;
        }
    }

    /// Step-down on observing a strictly greater term, from any message.
    async fn step_down(self: &Arc<Self>, new_term: u64) {
        {
            let mut inner = self.inner.lock().await;
            if new_term < inner.current_term {
                return;
            }
            warn!("[{}] stepping down, new term {}", self.node_id, new_term);
            inner.role = Role::Follower;
            inner.current_term = new_term;
            inner.voted_for = None;
            inner.votes_received.clear();
        }
        self.cancel_heartbeat().await;
        self.reset_election_timer().await;
    }

    pub async fn handle_request_vote(self: &Arc<Self>, args: RequestVoteArgs) -> RequestVoteReply {
        if args.term > self.current_term().await {
            self.step_down(args.term).await;
        }

        let mut inner = self.inner.lock().await;
        if args.term < inner.current_term {
            return RequestVoteReply { term: inner.current_term, vote_granted: false };
        }

        let can_vote = match &inner.voted_for {
            None => true,
            Some(candidate) => candidate == &args.candidate_id,
        };

        if can_vote {
            inner.voted_for = Some(args.candidate_id.clone());
            let term = inner.current_term;
            drop(inner);
            self.reset_election_timer().await;
            RequestVoteReply { term, vote_granted: true }
        } else {
            RequestVoteReply { term: inner.current_term, vote_granted: false }
        }
    }

    pub async fn handle_append_entries(
        self: &Arc<Self>,
        args: AppendEntriesArgs,
    ) -> AppendEntriesReply {
        let current = self.current_term().await;
        if args.term < current {
            return AppendEntriesReply { term: current, success: false };
        }

        {
            let mut inner = self.inner.lock().await;
            inner.role = Role::Follower;
            if args.term > inner.current_term {
                inner.current_term = args.term;
                inner.voted_for = None;
                inner.votes_received.clear();
            }
        }
        self.cancel_heartbeat().await;
        self.reset_election_timer().await;

        AppendEntriesReply { term: self.current_term().await, success: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timing() -> Timing {
        Timing {
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn starts_as_follower_at_term_zero() {
        let elector = RaftElector::new(
            "a".into(),
            HashMap::new(),
            PeerTransport::new(Duration::from_millis(50)),
            timing(),
        );
        assert_eq!(elector.role().await, Role::Follower);
        assert_eq!(elector.current_term().await, 0);
    }

    #[tokio::test]
    async fn lone_node_elects_itself_leader() {
        // With zero peers, a single node's election timer fires and it
        // wins unanimously (majority of 1 is 1, counting itself).
        let elector = RaftElector::new(
            "solo".into(),
            HashMap::new(),
            PeerTransport::new(Duration::from_millis(50)),
            timing(),
        );
        elector.start_election().await;
        assert_eq!(elector.role().await, Role::Leader);
        assert_eq!(elector.current_term().await, 1);
        elector.cancel_heartbeat().await;
    }

    #[tokio::test]
    async fn higher_term_forces_step_down() {
        let elector = RaftElector::new(
            "a".into(),
            HashMap::new(),
            PeerTransport::new(Duration::from_millis(50)),
            timing(),
        );
        elector.start_election().await; // becomes leader at term 1
        assert!(elector.is_leader().await);

        let reply = elector.handle_append_entries(AppendEntriesArgs { term: 5, leader_id: "b".into() }).await;
        assert!(reply.success);
        assert_eq!(elector.role().await, Role::Follower);
        assert_eq!(elector.current_term().await, 5);
    }

    #[tokio::test]
    async fn stale_append_entries_is_rejected() {
        let elector = RaftElector::new(
            "a".into(),
            HashMap::new(),
            PeerTransport::new(Duration::from_millis(50)),
            timing(),
        );
        elector.step_down(10).await;
        let reply = elector.handle_append_entries(AppendEntriesArgs { term: 3, leader_id: "stale".into() }).await;
        assert!(!reply.success);
        assert_eq!(reply.term, 10);
    }

    #[tokio::test]
    async fn vote_not_granted_twice_in_same_term() {
        let elector = RaftElector::new(
            "a".into(),
            HashMap::new(),
            PeerTransport::new(Duration::from_millis(50)),
            timing(),
        );
        elector.step_down(1).await;
        let first = elector.handle_request_vote(RequestVoteArgs { term: 1, candidate_id: "x".into() }).await;
        assert!(first.vote_granted);
        let second = elector.handle_request_vote(RequestVoteArgs { term: 1, candidate_id: "y".into() }).await;
        assert!(!second.vote_granted);
    }
}
