//! Network simulator for deterministic testing and offline runs.
//!
//! Real paths drop large datagrams, and sometimes small ones too.  To exercise
//! the ladder without depending on actual network conditions, this module
//! provides:
//!
//! | Piece         | Description                                              |
//! |---------------|----------------------------------------------------------|
//! | [`Simulator`] | wraps any [`Transport`] and applies [`FaultConfig`] on   |
//! |               | every send                                               |
//! | [`Lockstep`]  | drives a [`Prober`] and an [`EchoReceiver`] tick by tick |
//! |               | through the codec and the fault model, no sockets        |
//!
//! | Fault         | Description                                              |
//! |---------------|----------------------------------------------------------|
//! | Size boundary | Payload blobs of `drop_from` bytes or more never arrive. |
//! | Random loss   | Any datagram is dropped with probability `loss_rate`.    |
//! | Duplication   | A datagram is delivered twice with `duplicate_rate`.     |
//! | Reordering    | With `reorder_rate`, a datagram is held back and goes    |
//! |               | out right after the next one, so a probe's announcement  |
//! |               | overtakes its payload.                                   |
//!
//! All randomness comes from a seeded `StdRng`, so failures are reproducible.

use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::echo::EchoReceiver;
use crate::prober::Prober;
use crate::protocol::{Arg, Message};
use crate::session::Session;
use crate::socket::{SocketError, Transport};
use crate::state::Outbound;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Payload blobs at least this long are always dropped.
    pub drop_from: Option<usize>,
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram is overtaken by the one sent after it.
    pub reorder_rate: f64,
    pub seed: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        // No faults by default — simulator is a transparent pass-through.
        Self {
            drop_from: None,
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }
}

impl FaultConfig {
    /// A path whose boundary sits just below `drop_from` bytes.
    pub fn boundary(drop_from: usize) -> Self {
        Self {
            drop_from: Some(drop_from),
            ..Self::default()
        }
    }
}

/// How many copies of a datagram the fault model lets through.
#[derive(Debug)]
struct FaultModel {
    config: FaultConfig,
    rng: StdRng,
}

impl FaultModel {
    fn new(config: FaultConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    fn copies(&mut self, msg: &Message) -> usize {
        let oversized = match (self.config.drop_from, msg.args.as_slice()) {
            (Some(limit), [Arg::Blob(blob)]) => blob.len() >= limit,
            _ => false,
        };
        if oversized {
            return 0;
        }
        if self.config.loss_rate > 0.0 && self.rng.random_bool(self.config.loss_rate.min(1.0)) {
            return 0;
        }
        if self.config.duplicate_rate > 0.0
            && self.rng.random_bool(self.config.duplicate_rate.min(1.0))
        {
            return 2;
        }
        1
    }

    fn reorders(&mut self) -> bool {
        self.config.reorder_rate > 0.0 && self.rng.random_bool(self.config.reorder_rate.min(1.0))
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// A fault-injecting wrapper around a [`Transport`].
pub struct Simulator<T> {
    inner: T,
    faults: Mutex<FaultModel>,
    /// Datagrams waiting to go out behind the next delivered send.
    held: Mutex<Vec<(Message, SocketAddr)>>,
}

impl<T: Transport> Simulator<T> {
    pub fn new(inner: T, config: FaultConfig) -> Self {
        Self {
            inner,
            faults: Mutex::new(FaultModel::new(config)),
            held: Mutex::new(Vec::new()),
        }
    }

    /// Decide which datagrams actually go out for one send, in wire order.
    ///
    /// At most one datagram is held back at a time; it leaves right after the
    /// next datagram that is not dropped.
    fn schedule(&self, msg: &Message, dest: SocketAddr) -> Vec<(Message, SocketAddr)> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        let copies = faults.copies(msg);
        if copies == 0 {
            log::debug!("[sim] dropping {} ({} bytes)", msg.address, msg.encoded_len());
            return Vec::new();
        }
        let copies = std::iter::repeat((msg.clone(), dest)).take(copies);
        if held.is_empty() && faults.reorders() {
            log::debug!("[sim] holding back {}", msg.address);
            held.extend(copies);
            return Vec::new();
        }
        let wire: Vec<_> = copies.chain(held.drain(..)).collect();
        wire
    }
}

impl<T: Transport> Transport for Simulator<T> {
    /// Applies loss, duplication and reorder faults before handing to the
    /// real transport.
    async fn send_to(&self, msg: &Message, dest: SocketAddr) -> Result<(), SocketError> {
        for (msg, dest) in self.schedule(msg, dest) {
            self.inner.send_to(&msg, dest).await?;
        }
        Ok(())
    }

    async fn recv_from(&self) -> Result<(Message, SocketAddr), SocketError> {
        self.inner.recv_from().await
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}

// ---------------------------------------------------------------------------
// Lockstep
// ---------------------------------------------------------------------------

/// Outcome of a finished lock-step run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockstepOutcome {
    /// Receiver's confirmed maximum (the authoritative answer).
    pub receiver_size: u32,
    /// Prober's rollback estimate, if the stop signal reached it.
    pub prober_size: Option<u32>,
    /// Ticks taken to converge.
    pub ticks: u64,
}

/// Both sessions wired back to back through the codec and a fault model.
///
/// Each tick the prober's output crosses the simulated path to the receiver,
/// and every verdict crosses back before the next tick, like a loopback run
/// whose round trip is shorter than the tick interval.
#[derive(Debug)]
pub struct Lockstep {
    pub prober: Prober,
    pub receiver: EchoReceiver,
    forward: FaultModel,
    feedback: FaultModel,
    ticks: u64,
}

impl Lockstep {
    /// `faults` applies to the probe direction; feedback is lossless.
    pub fn new(prober: Prober, receiver: EchoReceiver, faults: FaultConfig) -> Self {
        Self::with_feedback_faults(prober, receiver, faults, FaultConfig::default())
    }

    pub fn with_feedback_faults(
        prober: Prober,
        receiver: EchoReceiver,
        forward: FaultConfig,
        feedback: FaultConfig,
    ) -> Self {
        Self {
            prober,
            receiver,
            forward: FaultModel::new(forward),
            feedback: FaultModel::new(feedback),
            ticks: 0,
        }
    }

    /// Advance one tick.
    pub fn step(&mut self) {
        self.ticks += 1;
        let Some(Outbound::Probe { size }) = self.prober.on_tick() else {
            return;
        };

        let mut wire = vec![Message::payload(size as usize)];
        match Message::announcement(size) {
            Ok(msg) => wire.push(msg),
            Err(e) => {
                log::warn!("[sim] cannot frame probe: {e}");
                return;
            }
        }
        if self.forward.reorders() {
            log::debug!("[sim] announcement of {size} overtakes its payload");
            wire.reverse();
        }

        let mut verdicts = Vec::new();
        for msg in wire {
            for _ in 0..self.forward.copies(&msg) {
                if let Some(Outbound::Signal(signal)) = self.receiver.handle(transit(&msg)) {
                    verdicts.push(Message::signal(signal));
                }
            }
        }
        for msg in verdicts {
            for _ in 0..self.feedback.copies(&msg) {
                self.prober.handle(transit(&msg));
            }
        }
    }

    /// Run until the receiver stops or `max_ticks` elapse.
    pub fn run(&mut self, max_ticks: u64) -> Option<LockstepOutcome> {
        while self.ticks < max_ticks {
            self.step();
            if let Some(receiver_size) = self.receiver.final_size() {
                log::info!(
                    "[sim] converged on {receiver_size} bytes after {} ticks",
                    self.ticks
                );
                return Some(LockstepOutcome {
                    receiver_size,
                    prober_size: self.prober.final_size(),
                    ticks: self.ticks,
                });
            }
        }
        log::warn!("[sim] no convergence after {max_ticks} ticks");
        None
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Encode and decode `msg`, as a real datagram would be.
fn transit(msg: &Message) -> Message {
    msg.encode()
        .ok()
        .and_then(|bytes| Message::decode(&bytes).ok())
        .unwrap_or_else(|| msg.clone())
}
