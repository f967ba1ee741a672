//! Exclusivity Gate - single-holder, never-blocking lock
//!
//! One atomic flag. Acquisition is a compare-exchange free -> held, so a
//! losing caller returns immediately instead of waiting.

use std::sync::atomic::{AtomicBool, Ordering};

const FREE: bool = false;
const HELD: bool = true;

/// Binary lock granting at most one active session
#[derive(Debug, Default)]
pub struct ExclusivityGate {
    held: AtomicBool,
}

impl ExclusivityGate {
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(FREE),
        }
    }

    /// Try to take the gate without blocking
    ///
    /// Returns `true` if the caller now holds the gate, `false` if someone
    /// else already does. A failed attempt changes nothing.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(FREE, HELD, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Hand the gate back
    ///
    /// Returns whether the gate was held. Releasing a free gate is a
    /// pairing error on the caller's side and leaves it free.
    #[inline]
    pub fn release(&self) -> bool {
        self.held.swap(FREE, Ordering::Release)
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_second_acquire_fails() {
        let gate = ExclusivityGate::new();
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
        assert!(gate.is_held());

        assert!(gate.release());
        assert!(!gate.is_held());
        assert!(gate.try_acquire());
    }

    #[test]
    fn test_release_when_free_is_reported() {
        let gate = ExclusivityGate::new();
        assert!(!gate.release());
        assert!(!gate.is_held());
    }

    #[test]
    fn test_contended_acquire_has_one_winner() {
        const THREADS: usize = 8;
        let gate = Arc::new(ExclusivityGate::new());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    gate.try_acquire()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
    }
}
