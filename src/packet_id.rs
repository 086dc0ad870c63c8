//! Packet identifier allocation.

use crate::error::{MqttError, Result};
use std::collections::HashSet;
use std::sync::Mutex;

/// Allocates packet identifiers in `1..=65535`.
///
/// Hands out the lowest free id after the last allocated one (wrapping to 1
/// past 65535) so ids spread evenly instead of churning on 1. An id stays
/// reserved until [`release`](Self::release) is called on the terminal
/// acknowledgement of its exchange.
#[derive(Debug)]
pub struct PacketIdAllocator {
    state: Mutex<AllocatorState>,
}

#[derive(Debug)]
struct AllocatorState {
    last: u16,
    in_use: HashSet<u16>,
}

impl PacketIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AllocatorState {
                last: 0,
                in_use: HashSet::new(),
            }),
        }
    }

    /// Reserves the next free packet identifier.
    ///
    /// # Errors
    ///
    /// Returns `NoPacketIdsAvailable` when all 65535 ids are outstanding.
    pub fn acquire(&self) -> Result<u16> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.in_use.len() == usize::from(u16::MAX) {
            return Err(MqttError::NoPacketIdsAvailable);
        }

        let mut candidate = state.last;
        loop {
            candidate = if candidate == u16::MAX { 1 } else { candidate + 1 };
            if !state.in_use.contains(&candidate) {
                state.in_use.insert(candidate);
                state.last = candidate;
                return Ok(candidate);
            }
        }
    }

    /// Marks a specific id as outstanding (session restore). Returns `false`
    /// if it was already reserved.
    pub fn reserve(&self, id: u16) -> bool {
        if id == 0 {
            return false;
        }
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .in_use
            .insert(id)
    }

    /// Returns an id to the pool. Returns `false` if it was not outstanding.
    pub fn release(&self, id: u16) -> bool {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .in_use
            .remove(&id)
    }

    /// Number of outstanding ids.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .in_use
            .len()
    }

    /// Drops every reservation; the next id restarts after the last one
    /// handed out.
    pub fn clear(&self) {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .in_use
            .clear();
    }
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_from_one() {
        let alloc = PacketIdAllocator::new();
        assert_eq!(alloc.acquire().unwrap(), 1);
        assert_eq!(alloc.acquire().unwrap(), 2);
        assert_eq!(alloc.acquire().unwrap(), 3);
        assert_eq!(alloc.outstanding(), 3);
    }

    #[test]
    fn released_ids_are_reused_after_wrap() {
        let alloc = PacketIdAllocator::new();
        let a = alloc.acquire().unwrap();
        let b = alloc.acquire().unwrap();
        assert!(alloc.release(a));

        // The allocator keeps moving forward before reusing a.
        let c = alloc.acquire().unwrap();
        assert_ne!(c, a);
        assert_ne!(c, b);
        assert_eq!(c, 3);
    }

    #[test]
    fn never_hands_out_zero_or_duplicates() {
        let alloc = PacketIdAllocator::new();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = alloc.acquire().unwrap();
            assert_ne!(id, 0);
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn wraps_past_65535() {
        let alloc = PacketIdAllocator::new();
        {
            let mut state = alloc.state.lock().unwrap();
            state.last = u16::MAX - 1;
        }
        assert_eq!(alloc.acquire().unwrap(), u16::MAX);
        assert_eq!(alloc.acquire().unwrap(), 1);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let alloc = PacketIdAllocator::new();
        {
            let mut state = alloc.state.lock().unwrap();
            state.in_use = (1..=u16::MAX).collect();
        }
        assert!(matches!(
            alloc.acquire(),
            Err(MqttError::NoPacketIdsAvailable)
        ));

        alloc.release(42);
        assert_eq!(alloc.acquire().unwrap(), 42);
    }

    #[test]
    fn release_unknown_id_is_noop() {
        let alloc = PacketIdAllocator::new();
        assert!(!alloc.release(9));
        assert_eq!(alloc.outstanding(), 0);
    }
}
