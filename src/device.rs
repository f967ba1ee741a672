//! Device context and session I/O
//!
//! [`CharDevice`] owns everything a live device needs: its configuration,
//! the session machine (gate + open counter) and the message buffer. Hosts
//! drive it through the `on_*` entry points; Rust callers can instead hold a
//! [`Session`], which releases the device when dropped.

use crate::buffer::BufferStore;
use crate::config::DeviceConfig;
use crate::error::{ChardevError, Result};
use crate::session::{SessionMachine, SessionState};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Exclusive-access, single-buffer byte device
pub struct CharDevice {
    config: DeviceConfig,
    session: SessionMachine,
    // Only locked while the gate is held, so never contended
    buffer: Mutex<BufferStore>,
}

impl CharDevice {
    /// Create a closed device with an empty buffer
    pub fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let buffer = BufferStore::new(config.capacity, config.overflow);
        Ok(Self {
            config,
            session: SessionMachine::new(),
            buffer: Mutex::new(buffer),
        })
    }

    /// Open the device, returning a session that releases it on drop
    pub fn open(&self) -> Result<Session<'_>> {
        let generation = self.acquire()?;
        Ok(Session {
            device: self,
            generation,
        })
    }

    /// Host entry point: take the device for one session
    pub fn on_open(&self) -> Result<()> {
        self.acquire().map(|_| ())
    }

    /// Host entry point: copy the stored message into `dest`
    ///
    /// Returns the number of bytes copied. The stored message is consumed,
    /// so a second read without a write in between returns 0.
    pub fn on_read(&self, dest: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        self.read_locked(dest)
    }

    /// Host entry point: store `src` annotated with its length
    ///
    /// Returns `src.len()`, the number of bytes accepted.
    pub fn on_write(&self, src: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        self.write_locked(src)
    }

    /// Host entry point: end the current session
    pub fn on_release(&self) {
        match self.session.release() {
            SessionState::Open => tracing::info!(device = %self.name(), "device closed"),
            SessionState::Closed => {
                tracing::warn!(device = %self.name(), "release without a matching open")
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Successful opens since the device was created
    pub fn open_count(&self) -> u64 {
        self.session.open_count()
    }

    /// Length of the message waiting to be read
    pub fn pending_len(&self) -> usize {
        self.buffer().len()
    }

    pub fn name(&self) -> &str {
        &self.config.device_name
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn acquire(&self) -> Result<u64> {
        match self.session.open() {
            Ok(generation) => {
                tracing::info!(device = %self.name(), opens = generation, "device opened");
                Ok(generation)
            }
            Err(e) => {
                tracing::warn!(device = %self.name(), "open rejected, device busy");
                Err(e)
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.session.state() {
            SessionState::Open => Ok(()),
            SessionState::Closed => Err(ChardevError::NotOpen),
        }
    }

    fn read_locked(&self, dest: &mut [u8]) -> Result<usize> {
        match self.buffer().read_into(dest) {
            Ok(n) => {
                tracing::info!(device = %self.name(), bytes = n, "sent message to reader");
                Ok(n)
            }
            Err(e) => {
                tracing::info!(device = %self.name(), error = %e, "failed to send message");
                Err(e)
            }
        }
    }

    fn write_locked(&self, src: &[u8]) -> Result<usize> {
        self.buffer().write(src, src.len())?;
        tracing::info!(device = %self.name(), bytes = src.len(), "received message from writer");
        Ok(src.len())
    }

    fn buffer(&self) -> MutexGuard<'_, BufferStore> {
        // A panic mid-copy cannot leave the length beyond capacity
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An open session on a [`CharDevice`]
///
/// Dropping the token releases the device. If the session was already ended
/// through [`CharDevice::on_release`], the token goes stale: reads and writes
/// fail with `NotOpen` and dropping it leaves any newer session alone.
pub struct Session<'a> {
    device: &'a CharDevice,
    generation: u64,
}

impl Session<'_> {
    pub fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        self.ensure_current()?;
        self.device.read_locked(dest)
    }

    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        self.ensure_current()?;
        self.device.write_locked(src)
    }

    /// Whether this token still holds the device
    pub fn is_active(&self) -> bool {
        self.device.session.is_current(self.generation)
    }

    pub fn device(&self) -> &CharDevice {
        self.device
    }

    fn ensure_current(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ChardevError::NotOpen)
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.device.session.release_generation(self.generation) {
            tracing::info!(device = %self.device.name(), "device closed");
        } else {
            tracing::warn!(
                device = %self.device.name(),
                generation = self.generation,
                "dropped a session that was already released"
            );
        }
    }
}
