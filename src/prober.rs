//! Probe session: grows the payload size until the path starts losing it.
//!
//! [`Prober`] tracks the current probe size, the step between probes and the
//! ready-to-advance gate.  It does **not** touch the socket;
//! [`crate::session`] calls these methods and owns the actual send loop.
//!
//! # Ladder contract
//! - At most **one** probe is awaiting feedback at any moment.
//! - `tick()` emits a probe of `current_size` bytes only while the gate is
//!   open, then advances `current_size += step` and closes the gate.
//! - `Success`: re-open the gate.
//! - `Failed`: roll back `2 * step` (undo the advance and aim at the last good
//!   size), shrink the step tenfold and start one byte above the last good size.
//! - `Stop`: roll back `2 * step`; the result is final.

use crate::protocol::Signal;
use crate::state::Outbound;

/// Consecutive skipped ticks between two stall warnings (5 s at 10 Hz).
const STALL_WARN_TICKS: u32 = 50;

/// Step shrink factor applied on every `Failed`.
const STEP_DIVISOR: u32 = 10;

/// Send-side ladder state for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prober {
    /// Size of the **next** probe to send.
    current_size: u32,
    /// Growth between consecutive probes.  Never below 1.
    step: u32,
    /// `false` once `Stop` was handled; the state is frozen afterwards.
    running: bool,
    /// Open when the last probe's feedback has been incorporated.
    ready: bool,
    /// Size of the probe currently awaiting feedback.
    in_flight: Option<u32>,
    /// Ticks skipped in a row because feedback is outstanding.
    stalled_ticks: u32,
}

impl Prober {
    /// Start a ladder at `initial_size` with `initial_step`.
    ///
    /// Both values are validated by [`crate::config::ProbeConfig`]; a zero
    /// step is clamped to 1.
    pub fn new(initial_size: u32, initial_step: u32) -> Self {
        Self {
            current_size: initial_size,
            step: initial_step.max(1),
            running: true,
            ready: true,
            in_flight: None,
            stalled_ticks: 0,
        }
    }

    /// Periodic tick.  Returns the probe to send, or `None` while feedback
    /// for the previous probe is outstanding or after `Stop`.
    pub fn tick(&mut self) -> Option<Outbound> {
        if !self.running {
            return None;
        }
        if !self.ready {
            self.stalled_ticks += 1;
            if self.stalled_ticks % STALL_WARN_TICKS == 0 {
                log::warn!(
                    "[probe] no feedback for {} bytes after {} ticks",
                    self.in_flight.unwrap_or(self.current_size),
                    self.stalled_ticks
                );
            }
            return None;
        }

        let size = self.current_size;
        self.current_size = self.current_size.saturating_add(self.step);
        self.ready = false;
        self.in_flight = Some(size);
        self.stalled_ticks = 0;
        log::debug!("[probe] → probe size={size} step={}", self.step);
        Some(Outbound::Probe { size })
    }

    /// Incorporate one feedback signal.
    pub fn on_signal(&mut self, signal: Signal) {
        if !self.running {
            log::debug!("[probe] ignoring {signal} after stop");
            return;
        }
        let probed = self.in_flight.take();

        match signal {
            Signal::Success => {
                log::debug!("[probe] ← success size={probed:?}");
            }
            Signal::Failed => {
                self.current_size = self.current_size.saturating_sub(self.step.saturating_mul(2));
                if self.step > 1 {
                    self.step = (self.step / STEP_DIVISOR).max(1);
                    self.current_size = self.current_size.saturating_add(1);
                }
                log::info!(
                    "[probe] ← failed size={probed:?}; retrying from {} with step {}",
                    self.current_size,
                    self.step
                );
            }
            Signal::Stop => {
                self.current_size = self.current_size.saturating_sub(self.step.saturating_mul(2));
                self.running = false;
                log::info!("[probe] ← stop; last good size {}", self.current_size);
            }
        }
        self.ready = true;
    }

    pub fn current_size(&self) -> u32 {
        self.current_size
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// `true` when the next tick will emit a probe.
    pub fn is_ready(&self) -> bool {
        self.running && self.ready
    }

    /// Final known-good size; `None` until `Stop` has been handled.
    pub fn final_size(&self) -> Option<u32> {
        (!self.running).then_some(self.current_size)
    }
}
