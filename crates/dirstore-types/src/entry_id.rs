use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Stable numeric surrogate key for a directory entry.
///
/// Every index refers to entries by `EntryId` rather than by DN. Zero is never
/// a valid identifier; absence of a mapping is expressed with `Option`.
///
/// The on-disk form is 8 bytes big-endian, so byte order equals numeric order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct EntryId(NonZeroU64);

impl EntryId {
    /// Width of the encoded form in bytes.
    pub const ENCODED_LEN: usize = 8;

    /// Create an identifier, rejecting zero.
    pub fn new(id: u64) -> Result<Self, TypeError> {
        NonZeroU64::new(id).map(Self).ok_or(TypeError::ZeroEntryId)
    }

    /// The raw numeric value.
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Fixed-width big-endian encoding.
    pub fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        self.0.get().to_be_bytes()
    }

    /// Decode the fixed-width encoding produced by [`EntryId::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; Self::ENCODED_LEN] = bytes
            .try_into()
            .map_err(|_| TypeError::InvalidEntryIdLength(bytes.len()))?;
        Self::new(u64::from_be_bytes(arr))
    }

    /// The identifier following this one.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl TryFrom<u64> for EntryId {
    type Error = TypeError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntryId> for u64 {
    fn from(id: EntryId) -> Self {
        id.get()
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out strictly increasing [`EntryId`]s.
///
/// Safe to share between threads. Seed it with the highest identifier already
/// in use so freshly allocated identifiers never collide with stored ones.
#[derive(Debug)]
pub struct EntryIdAllocator {
    last: AtomicU64,
}

impl EntryIdAllocator {
    /// Allocator whose first identifier is 1.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Allocator whose first identifier follows `highest`.
    pub fn starting_after(highest: EntryId) -> Self {
        Self {
            last: AtomicU64::new(highest.get()),
        }
    }

    /// Allocate the next identifier. Returns `None` once `u64` is exhausted.
    pub fn allocate(&self) -> Option<EntryId> {
        self.last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| last.checked_add(1))
            .ok()
            .and_then(|prev| EntryId::new(prev + 1).ok())
    }

    /// The most recently allocated identifier, if any.
    pub fn last(&self) -> Option<EntryId> {
        EntryId::new(self.last.load(Ordering::Acquire)).ok()
    }
}

impl Default for EntryIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert_eq!(EntryId::new(0), Err(TypeError::ZeroEntryId));
        assert!(EntryId::new(1).is_ok());
    }

    #[test]
    fn bytes_roundtrip() {
        let id = EntryId::new(0x0102_0304_0506_0708).unwrap();
        assert_eq!(id.to_bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(EntryId::from_bytes(&id.to_bytes()).unwrap(), id);
    }

    #[test]
    fn byte_order_matches_numeric_order() {
        let small = EntryId::new(255).unwrap();
        let large = EntryId::new(256).unwrap();
        assert!(small < large);
        assert!(small.to_bytes() < large.to_bytes());
    }

    #[test]
    fn wrong_width_is_rejected() {
        assert_eq!(
            EntryId::from_bytes(&[0, 1]),
            Err(TypeError::InvalidEntryIdLength(2))
        );
        assert_eq!(EntryId::from_bytes(&[0; 8]), Err(TypeError::ZeroEntryId));
    }

    #[test]
    fn serde_is_transparent_and_rejects_zero() {
        let id = EntryId::new(42).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        assert_eq!(serde_json::from_str::<EntryId>("42").unwrap(), id);
        assert!(serde_json::from_str::<EntryId>("0").is_err());
    }

    #[test]
    fn allocator_is_monotonic() {
        let alloc = EntryIdAllocator::new();
        assert_eq!(alloc.last(), None);
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert_eq!(alloc.last(), Some(b));
    }

    #[test]
    fn allocator_resumes_after_seed() {
        let alloc = EntryIdAllocator::starting_after(EntryId::new(10).unwrap());
        assert_eq!(alloc.allocate().unwrap().get(), 11);
    }

    #[test]
    fn allocator_exhaustion() {
        let alloc = EntryIdAllocator::starting_after(EntryId::new(u64::MAX).unwrap());
        assert_eq!(alloc.allocate(), None);
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let alloc = Arc::new(EntryIdAllocator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || {
                    (0..250)
                        .map(|_| alloc.allocate().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().expect("thread should not panic") {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
