//! `udp-probe` — locate the largest datagram payload a UDP path carries.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  /probe/data + /probe/size  ┌──────────┐
//!  │  Prober  │────────────────────────────▶│   Echo   │
//!  └────┬─────┘                             └─────┬────┘
//!       │                                         │
//!       │   /probe/success | failed | stop        │
//!       │◀────────────────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │           Orchestrator            │
//!  │  (owns both sessions, polls them) │
//!  └────┬──────────────────────────────┘
//!       │ raw UDP datagrams
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! The prober grows its payload by a coarse step until a probe goes missing,
//! then backs off and retries with a step ten times finer, down to one byte.
//! The receiver judges every probe and reports the largest size it saw intact.
//!
//! Each module has a single responsibility:
//! - [`protocol`]      — addresses, signals and wire format
//! - [`state`]         — role and outbound-action types
//! - [`prober`]        — probe-size ladder state machine
//! - [`echo`]          — probe-judging state machine
//! - [`session`]       — per-session event loop and shared state
//! - [`orchestrator`]  — socket binding, polling loop, final report
//! - [`config`]        — run parameters and defaults
//! - [`simulator`]     — fault injection and lock-step offline runs
//! - [`socket`]        — async UDP socket abstraction

pub mod config;
pub mod echo;
pub mod orchestrator;
pub mod prober;
pub mod protocol;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;

pub use config::ProbeConfig;
pub use orchestrator::{Orchestrator, OrchestratorError, ProbeReport};
pub use protocol::Signal;
pub use state::{Role, RoleSet};
