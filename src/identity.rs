//! Device identity: major/minor numbers and their allocation

use std::collections::BTreeSet;
use std::fmt;

/// Highest major handed out by dynamic allocation
pub const DYNAMIC_MAJOR_MAX: u32 = 254;

/// Lowest major handed out by dynamic allocation
pub const DYNAMIC_MAJOR_MIN: u32 = 234;

/// Encode major:minor into rdev (Linux makedev format)
#[inline]
pub const fn makedev(major: u32, minor: u32) -> u64 {
    ((major as u64) << 8) | (minor as u64 & 0xff)
}

/// Extract major number from rdev
#[inline]
pub const fn major(rdev: u64) -> u32 {
    ((rdev >> 8) & 0xfff) as u32
}

/// Extract minor number from rdev
#[inline]
pub const fn minor(rdev: u64) -> u32 {
    (rdev & 0xff) as u32
}

/// Numeric identity a host routes calls by. Fixed once allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIdentity {
    major: u32,
    minor: u32,
}

impl DeviceIdentity {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub const fn from_rdev(rdev: u64) -> Self {
        Self::new(major(rdev), minor(rdev))
    }

    #[inline(always)]
    pub const fn major(&self) -> u32 {
        self.major
    }

    #[inline(always)]
    pub const fn minor(&self) -> u32 {
        self.minor
    }

    #[inline(always)]
    pub const fn rdev(&self) -> u64 {
        makedev(self.major, self.minor)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// Hands out majors from the dynamic range, highest first
#[derive(Debug, Default)]
pub struct MajorAllocator {
    in_use: BTreeSet<u32>,
}

impl MajorAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the highest free major, or `None` if the range is exhausted
    pub fn allocate(&mut self) -> Option<u32> {
        let major = (DYNAMIC_MAJOR_MIN..=DYNAMIC_MAJOR_MAX)
            .rev()
            .find(|m| !self.in_use.contains(m))?;
        self.in_use.insert(major);
        Some(major)
    }

    /// Mark a major from the dynamic range as taken by someone else
    ///
    /// Returns `false` if it is outside the range or already claimed.
    pub fn reserve(&mut self, major: u32) -> bool {
        (DYNAMIC_MAJOR_MIN..=DYNAMIC_MAJOR_MAX).contains(&major) && self.in_use.insert(major)
    }

    /// Return a major to the pool. Returns `false` if it was not claimed.
    pub fn release(&mut self, major: u32) -> bool {
        self.in_use.remove(&major)
    }

    pub fn in_use(&self) -> usize {
        self.in_use.len()
    }
}
