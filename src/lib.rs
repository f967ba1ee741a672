//! chardev - exclusive-access, single-buffer character device
//!
//! A device that at most one session holds at a time. A session writes a
//! message, the device stores it annotated with its length
//! (`"<payload>(<N> letters)"`), and the next read hands it over once.
//!
//! # Architecture
//!
//! - **Buffer Store**: the single message slot, no locking of its own
//! - **Exclusivity Gate**: atomic flag, non-blocking acquisition
//! - **Session State Machine**: `Closed -> Open -> Closed`, counts opens
//! - **Resource Registrar**: ordered bring-up on a [`DeviceHost`] with
//!   reverse-order unwind on failure and at teardown
//!
//! ```no_run
//! use std::sync::Arc;
//! use chardev::{bring_up, DeviceConfig, MemoryHost};
//!
//! let registered = bring_up(Arc::new(MemoryHost::new()), DeviceConfig::default())?;
//! let mut session = registered.device().open()?;
//! session.write(b"hi")?;
//! let mut buf = [0u8; 256];
//! let n = session.read(&mut buf)?;
//! assert_eq!(&buf[..n], b"hi(2 letters)");
//! drop(session);
//! registered.teardown()?;
//! # Ok::<(), chardev::ChardevError>(())
//! ```

pub mod error;
pub mod config;
pub mod buffer;
pub mod gate;
pub mod session;
pub mod device;
pub mod identity;
pub mod host;
pub mod registrar;
pub mod bindings;

pub use error::{ChardevError, Result};
pub use config::{DeviceConfig, OverflowPolicy};
pub use device::{CharDevice, Session};
pub use session::SessionState;
pub use identity::DeviceIdentity;
pub use host::{DeviceHost, FsHost, HostError, MemoryHost};
pub use registrar::{bring_up, RegisteredDevice, RegistrationStep};
