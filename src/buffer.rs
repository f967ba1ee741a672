//! Buffer Store - the device's single message slot
//!
//! Holds the last written message, annotated with the length the writer
//! declared: `"<payload>(<N> letters)"`. A successful read hands the whole
//! message over and empties the slot.
//!
//! No locking here. Callers must hold the exclusivity gate.

use crate::config::OverflowPolicy;
use crate::error::{ChardevError, Result};

/// Fixed-capacity message buffer plus its current length
pub struct BufferStore {
    data: Box<[u8]>,
    len: usize,
    overflow: OverflowPolicy,
}

impl BufferStore {
    /// Create an empty buffer of `capacity` bytes
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            overflow,
        }
    }

    /// Buffer size in bytes
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Length of the stored message
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The stored message
    pub fn contents(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Store `payload` followed by `(<declared_length> letters)`
    ///
    /// The payload is taken as a C string: bytes from the first NUL onwards
    /// are not stored, while the annotation still carries the caller's
    /// `declared_length`.
    ///
    /// Returns the stored message length. Under [`OverflowPolicy::Reject`] a
    /// message longer than the capacity fails with `BufferOverflow` and the
    /// previous message is kept.
    pub fn write(&mut self, payload: &[u8], declared_length: usize) -> Result<usize> {
        let text_len = payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(payload.len());
        let annotation = format!("({} letters)", declared_length);
        let total = text_len + annotation.len();
        let capacity = self.capacity();

        if total > capacity && self.overflow == OverflowPolicy::Reject {
            return Err(ChardevError::BufferOverflow {
                max: capacity,
                got: total,
            });
        }

        let head = text_len.min(capacity);
        self.data[..head].copy_from_slice(&payload[..head]);
        let tail = (capacity - head).min(annotation.len());
        self.data[head..head + tail].copy_from_slice(&annotation.as_bytes()[..tail]);
        self.len = head + tail;

        Ok(self.len)
    }

    /// Copy the stored message into `dest` and empty the slot
    ///
    /// Fails with `Fault` if `dest` cannot hold the whole message; nothing
    /// is consumed in that case.
    pub fn read_into(&mut self, dest: &mut [u8]) -> Result<usize> {
        let len = self.len;
        if dest.len() < len {
            return Err(ChardevError::Fault {
                reason: "destination shorter than stored message",
            });
        }

        dest[..len].copy_from_slice(&self.data[..len]);
        self.len = 0;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_annotates_length() {
        let mut store = BufferStore::new(256, OverflowPolicy::Reject);
        let len = store.write(b"hi", 2).unwrap();

        assert_eq!(len, 13);
        assert_eq!(store.contents(), b"hi(2 letters)");
    }

    #[test]
    fn test_read_consumes_message() {
        let mut store = BufferStore::new(256, OverflowPolicy::Reject);
        store.write(b"hi", 2).unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(store.read_into(&mut buf).unwrap(), 13);
        assert_eq!(&buf[..13], b"hi(2 letters)");

        // Consume-once: second read sees nothing
        assert_eq!(store.read_into(&mut buf).unwrap(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = BufferStore::new(256, OverflowPolicy::Reject);
        store.write(b"first message", 13).unwrap();
        store.write(b"ok", 2).unwrap();

        assert_eq!(store.contents(), b"ok(2 letters)");
    }

    #[test]
    fn test_payload_stops_at_nul() {
        let mut store = BufferStore::new(256, OverflowPolicy::Reject);
        store.write(b"ab\0cd", 5).unwrap();

        assert_eq!(store.contents(), b"ab(5 letters)");
    }

    #[test]
    fn test_short_destination_faults_without_consuming() {
        let mut store = BufferStore::new(256, OverflowPolicy::Reject);
        store.write(b"hello", 5).unwrap();

        let mut small = [0u8; 4];
        assert!(matches!(
            store.read_into(&mut small),
            Err(ChardevError::Fault { .. })
        ));
        assert_eq!(store.len(), 16);
        assert_eq!(small, [0u8; 4]);
    }

    #[test]
    fn test_reject_keeps_previous_message() {
        let mut store = BufferStore::new(16, OverflowPolicy::Reject);
        store.write(b"ok", 2).unwrap();

        let err = store.write(b"far too long for it", 19).unwrap_err();
        assert!(matches!(
            err,
            ChardevError::BufferOverflow { max: 16, got: 31 }
        ));
        assert_eq!(store.contents(), b"ok(2 letters)");
    }

    #[test]
    fn test_truncate_fills_to_capacity() {
        let mut store = BufferStore::new(8, OverflowPolicy::Truncate);
        assert_eq!(store.write(b"abc", 3).unwrap(), 8);
        assert_eq!(store.contents(), b"abc(3 le");

        assert_eq!(store.write(b"0123456789", 10).unwrap(), 8);
        assert_eq!(store.contents(), b"01234567");
    }
}
