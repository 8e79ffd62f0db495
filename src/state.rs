//! Role and action types shared by both probe sessions.
//!
//! A run consists of up to two sessions: a **prober** that emits growing
//! payloads and an **echo receiver** that judges them.  Neither state machine
//! touches a socket; each handler returns an [`Outbound`] action that
//! [`crate::session`] turns into datagrams.

use crate::protocol::Signal;

/// Which side of the protocol a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends `/probe/data` + `/probe/size`, consumes feedback signals.
    Prober,
    /// Consumes probes, sends `/probe/success|failed|stop`.
    Receiver,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Prober => f.write_str("prober"),
            Role::Receiver => f.write_str("receiver"),
        }
    }
}

/// The roles requested for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleSet {
    /// Prober only; the echo receiver runs on another host.
    Send,
    /// Echo receiver only; the prober runs on another host.
    Receive,
    /// Both roles in one process (same-host loopback mode).
    #[default]
    Both,
}

impl RoleSet {
    pub fn includes(self, role: Role) -> bool {
        matches!(
            (self, role),
            (RoleSet::Both, _) | (RoleSet::Send, Role::Prober) | (RoleSet::Receive, Role::Receiver)
        )
    }
}

/// Something a session wants put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    /// One probe: a payload of `size` bytes and its size announcement.
    Probe { size: u32 },
    /// A feedback signal back to the prober.
    Signal(Signal),
}
