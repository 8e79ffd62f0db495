//! Echo session: judges each probe and feeds the verdict back to the prober.
//!
//! The [`EchoReceiver`] keeps the last announced size and the length of the
//! last payload it saw.  A payload only records its length; the verdict is
//! always driven by the announcement that closes a probe:
//!
//! | condition                                     | verdict   |
//! |-----------------------------------------------|-----------|
//! | `expected == last_received`                   | `Success` |
//! | mismatch and `announced - previous > 1`       | `Failed`  |
//! | mismatch and `announced - previous <= 1`      | `Stop`    |
//!
//! `Stop` is terminal: the boundary has been found to single-byte precision
//! and the last size judged `Success` is the answer.

use crate::protocol::Signal;
use crate::state::Outbound;

/// Receive-side judging state for one run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EchoReceiver {
    /// Size named by the most recent announcement.
    expected_size: u32,
    /// Length of the most recently received payload.
    last_received_size: u32,
    /// Largest size confirmed by a `Success` verdict so far.
    last_good: Option<u32>,
    /// Set once `Stop` has been emitted.
    stopped: bool,
    probes_seen: u64,
    payloads_seen: u64,
}

impl EchoReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `/probe/size`.  Returns the verdict for the probe it closes.
    pub fn on_announcement(&mut self, size: u32) -> Option<Outbound> {
        if self.stopped {
            log::debug!("[echo] ignoring announcement {size} after stop");
            return None;
        }
        self.probes_seen += 1;

        let last_increment = i64::from(size) - i64::from(self.expected_size);
        self.expected_size = size;

        let signal = if self.expected_size == self.last_received_size {
            self.last_good = Some(size);
            Signal::Success
        } else if last_increment > 1 {
            Signal::Failed
        } else {
            self.stopped = true;
            Signal::Stop
        };

        match signal {
            Signal::Success => log::debug!("[echo] ← size={size} arrived; → success"),
            Signal::Failed => log::info!(
                "[echo] ← size={size} but last payload was {} bytes; → failed",
                self.last_received_size
            ),
            Signal::Stop => log::info!(
                "[echo] ← size={size} lost at single-byte resolution; → stop (max {})",
                self.final_size().unwrap_or(0)
            ),
        }
        Some(Outbound::Signal(signal))
    }

    /// Handle `/probe/data`.  Records the length; never emits a signal.
    pub fn on_payload(&mut self, len: usize) -> Option<Outbound> {
        if self.stopped {
            return None;
        }
        self.payloads_seen += 1;
        self.last_received_size = u32::try_from(len).unwrap_or(u32::MAX);
        log::trace!("[echo] ← data len={len}");
        None
    }

    pub fn expected_size(&self) -> u32 {
        self.expected_size
    }

    pub fn last_received_size(&self) -> u32 {
        self.last_received_size
    }

    pub fn is_running(&self) -> bool {
        !self.stopped
    }

    /// Largest confirmed size; `None` until `Stop` has been emitted.
    pub fn final_size(&self) -> Option<u32> {
        self.stopped.then(|| self.last_good.unwrap_or(0))
    }

    /// `(announcements, payloads)` seen so far.
    pub fn counters(&self) -> (u64, u64) {
        (self.probes_seen, self.payloads_seen)
    }
}
