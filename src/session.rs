//! Session State Machine
//!
//! ```text
//!            open (gate acquired)
//!   Closed ─────────────────────────▶ Open ──┐ read / write
//!     ▲                                │  ◀──┘
//!     └──────────── release ───────────┘
//! ```
//!
//! An open that loses the gate leaves the machine `Closed` and reports
//! `Busy`. The open counter only moves on a successful open, and its value
//! doubles as the generation of the session that holds the gate.

use crate::error::{ChardevError, Result};
use crate::gate::ExclusivityGate;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Whether a session currently holds the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
        }
    }
}

/// Open/release bookkeeping for one device
#[derive(Debug, Default)]
pub struct SessionMachine {
    gate: ExclusivityGate,
    opens: AtomicU64,
    // Generation of the current holder, 0 when closed
    holder: AtomicU64,
}

impl SessionMachine {
    pub const fn new() -> Self {
        Self {
            gate: ExclusivityGate::new(),
            opens: AtomicU64::new(0),
            holder: AtomicU64::new(0),
        }
    }

    /// `Closed -> Open`
    ///
    /// Returns the open count including this open, which is also the
    /// generation of the new session, or `Busy` if another session holds
    /// the gate.
    pub fn open(&self) -> Result<u64> {
        if !self.gate.try_acquire() {
            return Err(ChardevError::Busy);
        }
        let generation = self.opens.fetch_add(1, Ordering::Relaxed) + 1;
        self.holder.store(generation, Ordering::Release);
        Ok(generation)
    }

    /// `Open -> Closed`, whoever holds the gate
    ///
    /// Returns the state the machine was in.
    pub fn release(&self) -> SessionState {
        loop {
            let generation = self.holder.load(Ordering::Acquire);
            if generation == 0 {
                return SessionState::Closed;
            }
            if self.release_generation(generation) {
                return SessionState::Open;
            }
        }
    }

    /// `Open -> Closed`, only if `generation` still holds the gate
    ///
    /// Returns `false` and leaves the machine alone if the session was
    /// already released and possibly replaced by a newer one. Only the
    /// caller that clears the holder releases the gate.
    pub fn release_generation(&self, generation: u64) -> bool {
        if self
            .holder
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.gate.release()
    }

    /// Whether `generation` is the session holding the gate
    pub fn is_current(&self, generation: u64) -> bool {
        generation != 0 && self.holder.load(Ordering::Acquire) == generation
    }

    pub fn state(&self) -> SessionState {
        if self.gate.is_held() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    /// Successful opens over the device's lifetime
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }
}
