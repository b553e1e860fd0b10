//! Deadlines and timeouts
//!
//! Time is measured in scheduler ticks. Every blocking IPC operation turns
//! its relative [`Timeout`] into one absolute [`Deadline`] at entry and
//! never re-derives it, so a multi-phase operation (`call`) shares a single
//! budget across its phases.

/// Time value in scheduler ticks
pub type Ticks = u64;

// ============================================================================
// Deadline
// ============================================================================

/// Absolute wake-up deadline.
///
/// `At(_)` orders before `Never`, so the earliest deadline sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Deadline {
    /// Wake no later than this tick
    At(Ticks),
    /// Wait until woken
    Never,
}

impl Deadline {
    /// Has the deadline been reached at `now`?
    pub fn has_passed(&self, now: Ticks) -> bool {
        match self {
            Self::At(t) => now >= *t,
            Self::Never => false,
        }
    }

    pub fn as_ticks(&self) -> Option<Ticks> {
        match self {
            Self::At(t) => Some(*t),
            Self::Never => None,
        }
    }

    /// Ticks left before the deadline (`None` for `Never`).
    pub fn remaining(&self, now: Ticks) -> Option<Ticks> {
        self.as_ticks().map(|t| t.saturating_sub(now))
    }

    /// Encoding used in message headers: zero means "no deadline".
    pub fn to_raw(&self) -> Ticks {
        self.as_ticks().unwrap_or(0)
    }
}

// ============================================================================
// Timeout
// ============================================================================

/// Relative timeout supplied by the caller of a blocking operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Never suspend, not even transiently
    NoWait,
    /// Block until the operation completes or the object is torn down
    Forever,
    /// Block for at most this many ticks
    Ticks(Ticks),
}

impl Timeout {
    pub const NO_WAIT: Self = Self::NoWait;
    pub const NO_TIMEOUT: Self = Self::Forever;

    /// Resolve to an absolute deadline. `None` means the caller must not
    /// suspend at all.
    pub fn deadline(self, now: Ticks) -> Option<Deadline> {
        match self {
            Self::NoWait => None,
            Self::Forever => Some(Deadline::Never),
            Self::Ticks(t) => Some(Deadline::At(now.saturating_add(t))),
        }
    }
}
