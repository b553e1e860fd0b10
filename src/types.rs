//! Common types used across the IPC core
//!
//! Identifiers are plain newtypes so they can cross the syscall boundary
//! without conversion and never alias each other.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pid(pub u32);

impl Pid {
    /// The kernel itself (also used for interrupt-context senders)
    pub const KERNEL: Self = Self(0);

    pub fn is_kernel(&self) -> bool {
        *self == Self::KERNEL
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

/// Execution context (thread) identifier, as handed out by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContextId(pub u64);

/// Unique port identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PortId(pub u64);

/// Unique channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChannelId(pub u64);

/// Unique shared region identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RegionId(pub u64);

/// Identity of a message queue, used to key waiters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct QueueId(pub u64);

/// Message identifier, unique per sender. Zero is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MessageId(pub u64);

impl MessageId {
    /// "Not a reply"
    pub const NONE: Self = Self(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

/// Object id generator shared by every table of one IPC system.
///
/// Ids are never reused while the system lives, so a stale id held by a
/// process can only ever resolve to "not found".
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_raw(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn port(&self) -> PortId {
        PortId(self.next_raw())
    }

    pub fn channel(&self) -> ChannelId {
        ChannelId(self.next_raw())
    }

    pub fn region(&self) -> RegionId {
        RegionId(self.next_raw())
    }

    pub fn queue(&self) -> QueueId {
        QueueId(self.next_raw())
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_across_kinds() {
        let ids = IdAllocator::new();
        let p = ids.port();
        let c = ids.channel();
        let r = ids.region();
        assert_ne!(p.0, c.0);
        assert_ne!(c.0, r.0);
    }

    #[test]
    fn test_message_id_none() {
        assert!(MessageId::NONE.is_none());
        assert!(!MessageId(7).is_none());
        assert!(Pid::KERNEL.is_kernel());
    }
}
