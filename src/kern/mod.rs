//! Kern subsystem - collaborators of the IPC core
//!
//! Time, scheduling and memory are owned by other kernel subsystems. The
//! IPC core sees them only through the traits defined here.

pub mod sched_prim;
pub mod timer;
pub mod vm;

pub use sched_prim::{Scheduler, WakeReason};
pub use timer::{Deadline, Ticks, Timeout};
pub use vm::{FrameHandle, FrameRange, MemoryError, MemoryManager, VirtAddr, VmProt};
