//! C Bindings for chardev
//!
//! Exposes bring-up, the session entry points and teardown to non-Rust
//! hosts. Devices created here live on their own [`MemoryHost`].
//!
//! Return values follow kernel convention: `>= 0` on success, a negative
//! errno on failure (`-EBUSY` for a busy device, `-EFAULT` for a null
//! buffer).

use crate::config::{DeviceConfig, OverflowPolicy};
use crate::error::ChardevError;
use crate::host::MemoryHost;
use crate::registrar::{bring_up, RegisteredDevice};
use rustix::io::Errno;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::slice;
use std::sync::Arc;

// Opaque handle
pub struct ChardevHandle(RegisteredDevice<MemoryHost>);

#[repr(C)]
pub struct ChardevConfig {
    /// Message buffer size in bytes; 0 selects the default
    pub capacity: usize,
    /// Truncate oversize writes instead of rejecting them
    pub truncate: bool,
}

fn neg(errno: Errno) -> c_int {
    -errno.raw_os_error()
}

unsafe fn handle_ref<'a>(handle: *const ChardevHandle) -> Option<&'a ChardevHandle> {
    handle.as_ref()
}

/// Bring up a device called `name` (used for both node and class)
///
/// Returns null if the name is invalid or bring-up fails.
///
/// # Safety
/// name must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn chardev_create(
    name: *const c_char,
    config: ChardevConfig,
) -> *mut ChardevHandle {
    if name.is_null() {
        return ptr::null_mut();
    }

    let c_str = CStr::from_ptr(name);
    let str_slice = match c_str.to_str() {
        Ok(s) => s,
        Err(_) => return ptr::null_mut(),
    };

    let defaults = DeviceConfig::default();
    let rust_config = DeviceConfig {
        device_name: str_slice.to_string(),
        class_name: str_slice.to_string(),
        capacity: if config.capacity == 0 {
            defaults.capacity
        } else {
            config.capacity
        },
        overflow: if config.truncate {
            OverflowPolicy::Truncate
        } else {
            OverflowPolicy::Reject
        },
    };

    match bring_up(Arc::new(MemoryHost::new()), rust_config) {
        Ok(registered) => Box::into_raw(Box::new(ChardevHandle(registered))),
        Err(_) => ptr::null_mut(),
    }
}

/// Tear down a device and free its handle
///
/// Returns 0, or the negative errno of the first failed teardown step.
///
/// # Safety
/// handle must come from `chardev_create` and not be used afterwards
#[no_mangle]
pub unsafe extern "C" fn chardev_destroy(handle: *mut ChardevHandle) -> c_int {
    if handle.is_null() {
        return neg(Errno::INVAL);
    }
    let ChardevHandle(registered) = *Box::from_raw(handle);
    match registered.teardown() {
        Ok(()) => 0,
        Err(e) => e.to_neg_errno(),
    }
}

/// Open the device. Returns 0 or `-EBUSY`.
///
/// # Safety
/// handle must be null or a live handle from `chardev_create`
#[no_mangle]
pub unsafe extern "C" fn chardev_open(handle: *const ChardevHandle) -> c_int {
    let Some(h) = handle_ref(handle) else {
        return neg(Errno::INVAL);
    };
    match h.0.device().on_open() {
        Ok(()) => 0,
        Err(e) => e.to_neg_errno(),
    }
}

/// Read the stored message into `buf`
///
/// Returns the number of bytes copied, or a negative errno.
///
/// # Safety
/// buf must be null or valid for `max_len` bytes of writes
#[no_mangle]
pub unsafe extern "C" fn chardev_read(
    handle: *const ChardevHandle,
    buf: *mut u8,
    max_len: usize,
) -> isize {
    let Some(h) = handle_ref(handle) else {
        return neg(Errno::INVAL) as isize;
    };
    if buf.is_null() {
        return fault("null read buffer") as isize;
    }
    let slice = slice::from_raw_parts_mut(buf, max_len);
    match h.0.device().on_read(slice) {
        Ok(n) => n as isize,
        Err(e) => e.to_neg_errno() as isize,
    }
}

/// Write `len` bytes from `buf` as the new message
///
/// Returns the number of bytes accepted, or a negative errno.
///
/// # Safety
/// buf must be null or valid for `len` bytes of reads
#[no_mangle]
pub unsafe extern "C" fn chardev_write(
    handle: *const ChardevHandle,
    buf: *const u8,
    len: usize,
) -> isize {
    let Some(h) = handle_ref(handle) else {
        return neg(Errno::INVAL) as isize;
    };
    if buf.is_null() {
        return fault("null write buffer") as isize;
    }
    let slice = slice::from_raw_parts(buf, len);
    match h.0.device().on_write(slice) {
        Ok(n) => n as isize,
        Err(e) => e.to_neg_errno() as isize,
    }
}

/// Release the device
///
/// # Safety
/// handle must be null or a live handle from `chardev_create`
#[no_mangle]
pub unsafe extern "C" fn chardev_release(handle: *const ChardevHandle) -> c_int {
    let Some(h) = handle_ref(handle) else {
        return neg(Errno::INVAL);
    };
    h.0.device().on_release();
    0
}

/// Successful opens so far
///
/// # Safety
/// handle must be null or a live handle from `chardev_create`
#[no_mangle]
pub unsafe extern "C" fn chardev_open_count(handle: *const ChardevHandle) -> u64 {
    handle_ref(handle).map_or(0, |h| h.0.device().open_count())
}

/// Device number in Linux `makedev` form, 0 for a null handle
///
/// # Safety
/// handle must be null or a live handle from `chardev_create`
#[no_mangle]
pub unsafe extern "C" fn chardev_rdev(handle: *const ChardevHandle) -> u64 {
    handle_ref(handle).map_or(0, |h| h.0.identity().rdev())
}

fn fault(reason: &'static str) -> c_int {
    let err = ChardevError::Fault { reason };
    tracing::info!(error = %err, "rejected session call");
    err.to_neg_errno()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn create(name: &str) -> *mut ChardevHandle {
        let name = CString::new(name).unwrap();
        let config = ChardevConfig {
            capacity: 0,
            truncate: false,
        };
        unsafe { chardev_create(name.as_ptr(), config) }
    }

    #[test]
    fn test_c_round_trip() {
        let handle = create("chardev");
        assert!(!handle.is_null());

        unsafe {
            assert_eq!(chardev_open(handle), 0);
            assert_eq!(chardev_open(handle), neg(Errno::BUSY));

            let msg = b"test";
            assert_eq!(chardev_write(handle, msg.as_ptr(), msg.len()), 4);

            let mut buf = [0u8; 256];
            let n = chardev_read(handle, buf.as_mut_ptr(), buf.len());
            assert_eq!(&buf[..n as usize], b"test(4 letters)");

            assert_eq!(chardev_release(handle), 0);
            assert_eq!(chardev_open_count(handle), 1);
            assert_eq!(chardev_rdev(handle) >> 8, 254);
            assert_eq!(chardev_destroy(handle), 0);
        }
    }

    #[test]
    fn test_null_buffers_fault() {
        let handle = create("chardev");
        unsafe {
            assert_eq!(chardev_open(handle), 0);
            assert_eq!(
                chardev_read(handle, ptr::null_mut(), 16),
                neg(Errno::FAULT) as isize
            );
            assert_eq!(
                chardev_write(handle, ptr::null(), 16),
                neg(Errno::FAULT) as isize
            );
            chardev_release(handle);
            chardev_destroy(handle);
        }
    }

    #[test]
    fn test_bad_name_returns_null() {
        assert!(create("a/b").is_null());
        unsafe {
            let config = ChardevConfig {
                capacity: 0,
                truncate: false,
            };
            assert!(chardev_create(ptr::null(), config).is_null());
            assert_eq!(chardev_open(ptr::null()), neg(Errno::INVAL));
        }
    }
}
