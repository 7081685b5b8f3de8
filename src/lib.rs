//! meshcore: three independently deployable coordination primitives --
//! Raft-backed distributed locking, a consistent-hash message queue, and a
//! MESI-coherent cache -- sharing one ambient stack (config, errors,
//! transport, HTTP serving).

pub mod cache;
pub mod config;
pub mod error;
pub mod hashing;
pub mod http;
pub mod lock;
pub mod queue;
pub mod raft;
pub mod transport;
