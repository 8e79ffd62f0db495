//! Session abstraction and its per-session event loop.
//!
//! # Architecture
//!
//! ```text
//!  Orchestrator ── is_running() / final_size() ──┐
//!                                                 │  Arc<Mutex<S>>
//!  SessionHandle<S> ─────────────────────────────┤
//!                                                 │
//!  event_loop task  (one per session)            ▼
//!    select! { ticker.tick()      → S::on_tick()
//!              transport.recv()   → S::handle(msg) }
//!        │
//!        └─ Outbound → payload + announcement, or feedback signal
//! ```
//!
//! Every tick and every message handler runs on the session's own task with
//! the state mutex held for the duration of the (synchronous) handler, so the
//! state is never mutated concurrently.  The orchestrator only reads it.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::echo::EchoReceiver;
use crate::prober::Prober;
use crate::protocol::{Message, ProtocolMessage, Signal};
use crate::socket::{SocketError, Transport};
use crate::state::{Outbound, Role};

/// Ticker period used by sessions that never tick; the branch is disabled.
const IDLE_PERIOD: Duration = Duration::from_secs(3600);

/// Fatal errors that end a session's event loop.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A probe or signal could not be sent, or the socket failed.
    #[error("{role} transport failure: {source}")]
    Transport {
        role: Role,
        #[source]
        source: SocketError,
    },
    #[error("{0} task panicked")]
    Panicked(Role),
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One side of the protocol, driven by ticks and arriving messages.
///
/// Implemented by [`Prober`] and [`EchoReceiver`].  Handlers never block and
/// never perform I/O; they return what should go on the wire.
pub trait Session: Send + 'static {
    const ROLE: Role;

    fn on_tick(&mut self) -> Option<Outbound>;
    fn on_signal(&mut self, signal: Signal) -> Option<Outbound>;
    fn on_announcement(&mut self, size: u32) -> Option<Outbound>;
    fn on_payload(&mut self, len: usize) -> Option<Outbound>;

    fn is_running(&self) -> bool;
    fn final_size(&self) -> Option<u32>;

    /// Interpret a decoded message and dispatch it to the matching handler.
    ///
    /// Messages that break their address contract are logged and discarded
    /// without touching the session state.
    fn handle(&mut self, msg: Message) -> Option<Outbound> {
        match ProtocolMessage::try_from(msg) {
            Ok(ProtocolMessage::Announcement(size)) => self.on_announcement(size),
            Ok(ProtocolMessage::Payload { len }) => self.on_payload(len),
            Ok(ProtocolMessage::Signal(signal)) => self.on_signal(signal),
            Err(e) => {
                log::warn!("[session] {} discarding malformed message: {e}", Self::ROLE);
                None
            }
        }
    }
}

impl Session for Prober {
    const ROLE: Role = Role::Prober;

    fn on_tick(&mut self) -> Option<Outbound> {
        self.tick()
    }

    fn on_signal(&mut self, signal: Signal) -> Option<Outbound> {
        Prober::on_signal(self, signal);
        None
    }

    fn on_announcement(&mut self, size: u32) -> Option<Outbound> {
        log::warn!("[session] prober ignoring announcement {size}: receiver-bound message");
        None
    }

    fn on_payload(&mut self, len: usize) -> Option<Outbound> {
        log::warn!("[session] prober ignoring {len}-byte payload: receiver-bound message");
        None
    }

    fn is_running(&self) -> bool {
        Prober::is_running(self)
    }

    fn final_size(&self) -> Option<u32> {
        Prober::final_size(self)
    }
}

impl Session for EchoReceiver {
    const ROLE: Role = Role::Receiver;

    fn on_tick(&mut self) -> Option<Outbound> {
        None
    }

    fn on_signal(&mut self, signal: Signal) -> Option<Outbound> {
        log::warn!("[session] receiver ignoring {signal}: prober-bound message");
        None
    }

    fn on_announcement(&mut self, size: u32) -> Option<Outbound> {
        EchoReceiver::on_announcement(self, size)
    }

    fn on_payload(&mut self, len: usize) -> Option<Outbound> {
        EchoReceiver::on_payload(self, len)
    }

    fn is_running(&self) -> bool {
        EchoReceiver::is_running(self)
    }

    fn final_size(&self) -> Option<u32> {
        EchoReceiver::final_size(self)
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Owner of a running session: shared state plus its event-loop task.
pub struct SessionHandle<S> {
    state: Arc<Mutex<S>>,
    task: JoinHandle<Result<(), SessionError>>,
}

impl<S: Session> SessionHandle<S> {
    /// Spawn the event loop for `session` on the current tokio runtime.
    ///
    /// `peer` receives everything the session emits.  `tick` is the probe
    /// cadence; `None` for sessions driven by messages only.
    pub fn spawn<T: Transport>(
        session: S,
        transport: T,
        peer: SocketAddr,
        tick: Option<Duration>,
    ) -> Self {
        let state = Arc::new(Mutex::new(session));
        let task = tokio::spawn(event_loop(Arc::clone(&state), transport, peer, tick));
        Self { state, task }
    }

    /// `true` while the session has not stopped and its task is alive.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished() && lock(&self.state).is_running()
    }

    /// The session's final answer, once it has one.
    pub fn final_size(&self) -> Option<u32> {
        lock(&self.state).final_size()
    }

    /// Run `f` against the current state under the session lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&lock(&self.state))
    }

    /// Stop the event loop and report how it ended.
    ///
    /// A loop still running is aborted and counts as a clean end; a loop that
    /// already exited returns its own result.
    pub async fn shutdown(self) -> Result<(), SessionError> {
        if !self.task.is_finished() {
            self.task.abort();
        }
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(_) => Err(SessionError::Panicked(S::ROLE)),
        }
    }
}

/// Lock session state, recovering it if a handler panicked while holding it.
fn lock<S>(state: &Mutex<S>) -> MutexGuard<'_, S> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Apply one handler under the lock; the guard never lives across an await.
fn apply<S, R>(state: &Mutex<S>, f: impl FnOnce(&mut S) -> R) -> R {
    f(&mut lock(state))
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

async fn event_loop<S: Session, T: Transport>(
    state: Arc<Mutex<S>>,
    transport: T,
    peer: SocketAddr,
    tick: Option<Duration>,
) -> Result<(), SessionError> {
    let role = S::ROLE;
    let ticking = tick.is_some();
    let mut ticker = tokio::time::interval(tick.unwrap_or(IDLE_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log::info!(
        "[session] {role} listening on {}, sending to {peer}",
        transport.local_addr()
    );

    loop {
        let outbound = tokio::select! {
            _ = ticker.tick(), if ticking => apply(&state, S::on_tick),

            result = transport.recv_from() => match result {
                Ok((msg, from)) => {
                    log::trace!("[session] {role} ← {} from {from}", msg.address);
                    apply(&state, |s| s.handle(msg))
                }
                Err(e) if e.is_transient() => {
                    log::warn!("[session] {role} discarding datagram: {e}");
                    None
                }
                Err(source) => return Err(SessionError::Transport { role, source }),
            },
        };

        if let Some(out) = outbound {
            emit(&transport, peer, out)
                .await
                .map_err(|source| SessionError::Transport { role, source })?;
        }

        if !apply(&state, |s| s.is_running()) {
            log::info!("[session] {role} finished");
            return Ok(());
        }
    }
}

/// Put one outbound action on the wire.
///
/// A probe is the payload followed immediately by its size announcement, so
/// the receiver judges the announcement against this very payload.  A payload
/// the OS refuses as too large counts as lost on the path: the announcement
/// still goes out and the receiver reports the loss.
async fn emit<T: Transport>(
    transport: &T,
    peer: SocketAddr,
    out: Outbound,
) -> Result<(), SocketError> {
    match out {
        Outbound::Probe { size } => {
            let announcement = Message::announcement(size)?;
            match transport.send_to(&Message::payload(size as usize), peer).await {
                Err(e) if e.is_oversized() => {
                    log::debug!("[session] payload of {size} bytes refused locally: {e}");
                }
                other => other?,
            }
            transport.send_to(&announcement, peer).await
        }
        Outbound::Signal(signal) => transport.send_to(&Message::signal(signal), peer).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{address, Arg};

    #[test]
    fn malformed_size_leaves_receiver_untouched() {
        let mut echo = EchoReceiver::new();
        echo.on_payload(1_000);
        EchoReceiver::on_announcement(&mut echo, 1_000);
        let before = echo.clone();

        let bogus = Message {
            address: address::SIZE.to_owned(),
            args: vec![Arg::Blob(vec![0; 4])],
        };
        assert_eq!(echo.handle(bogus), None);
        assert_eq!(echo, before);
    }

    #[test]
    fn malformed_size_leaves_prober_untouched() {
        let mut prober = Prober::new(1, 100);
        prober.tick();
        let before = prober.clone();

        let bogus = Message {
            address: address::SIZE.to_owned(),
            args: vec![Arg::Int(1), Arg::Int(2)],
        };
        assert_eq!(prober.handle(bogus), None);
        assert_eq!(prober, before);
    }

    #[test]
    fn prober_ignores_receiver_bound_messages() {
        let mut prober = Prober::new(1, 100);
        let before = prober.clone();
        assert_eq!(prober.handle(Message::payload(1)), None);
        assert_eq!(prober.handle(Message::announcement(1).unwrap()), None);
        assert_eq!(prober, before);
    }

    #[test]
    fn handle_dispatches_signals_to_prober() {
        let mut prober = Prober::new(1, 100);
        prober.tick();
        assert!(!prober.is_ready());
        prober.handle(Message::signal(Signal::Success));
        assert!(prober.is_ready());
    }

    #[test]
    fn handle_dispatches_probe_to_receiver() {
        let mut echo = EchoReceiver::new();
        assert_eq!(echo.handle(Message::payload(1)), None);
        assert_eq!(
            echo.handle(Message::announcement(1).unwrap()),
            Some(Outbound::Signal(Signal::Success))
        );
    }
}
