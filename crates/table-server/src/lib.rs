//! Table Server Library
//!
//! Session assembly and lifecycle core of a multiplayer card table server:
//!
//! - Accepts anonymous participants over WebSocket
//! - Holds them in a shared waiting room
//! - Groups them into fixed-size cohorts
//! - Runs each cohort through an isolated session
//! - Returns surviving participants to the waiting room afterward
//!
//! Participants may disconnect at any moment. The transport sets the
//! participant's closed flag and then publishes the id through the
//! [`closure::ClosureHub`]; every component that can hold a participant
//! (waiting room, matchmaker buffer) subscribes and purges it.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator (root, owns everything)
//! ├── ClosureHub          disconnect fan-out
//! ├── WaitingRoom         FIFO of unseated participants
//! ├── SessionRegistry     live sessions, one task each
//! │   └── Session         roster + rules engine
//! ├── Matchmaker          worker task: waiting room -> cohort -> registry
//! └── WebSocketTransport  /ws, /health, /ready, /metrics
//! ```
//!
//! Components start in that order and end in reverse.

pub mod closure;
pub mod config;
pub mod errors;
pub mod invariant;
pub mod lifecycle;
pub mod matchmaker;
pub mod observability;
pub mod orchestrator;
pub mod participant;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod shutdown;
pub mod transport;
pub mod waiting_room;

mod sync;
