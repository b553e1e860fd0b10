//! Quantum IPC - the inter-process communication core of a microkernel
//!
//! Message passing between isolated processes through private queues, named
//! ports and point-to-point channels, synchronous call/reply on top of
//! them, and zero-copy shared regions for bulk data.
//!
//! The whole subsystem is one [`IpcSystem`] value. The kernel builds it at
//! startup with its scheduler and memory manager, then calls the
//! operations on it from the syscall layer:
//!
//! ```ignore
//! let ipc = IpcSystem::new(IpcConfig::new(), scheduler, memory);
//! ipc.process_init(Pid(1))?;
//! ipc.process_init(Pid(2))?;
//! ipc.send(Pid(1), Pid(2), Message::new(b"hello")?, Timeout::NO_WAIT)?;
//! let msg = ipc.receive(Pid(2), SenderFilter::Any, Timeout::NO_TIMEOUT)?;
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]
// Test doubles are built through explicit constructors
#![allow(clippy::new_without_default)]

extern crate alloc;

pub mod config;
pub mod ipc;
pub mod kern;
pub mod klog;
pub mod system;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::IpcConfig;
pub use ipc::{IpcError, IpcResult, Message, MessageFlags, SenderFilter};
pub use kern::{Deadline, MemoryManager, Scheduler, Timeout, VmProt};
pub use system::IpcSystem;
pub use types::{ChannelId, ContextId, MessageId, Pid, PortId, RegionId};
