//! Inter-Process Communication
//!
//! Processes talk through three kinds of endpoint, all built on the same
//! bounded [`mqueue::MessageQueue`]:
//!
//! - the private queue every process gets at init (`send` / `receive`)
//! - named ports owned by one process (`port_*`)
//! - two-endpoint channels (`channel_*`)
//!
//! Bulk data moves through shared regions (`share_*`) instead of message
//! payloads.

pub mod call;
pub mod channel;
pub mod error;
pub mod message;
pub mod mqueue;
pub mod notify;
pub mod port;
pub mod process;
pub mod shmem;
pub mod transport;
pub mod waiter;

pub use error::{ErrorCategory, IpcError, IpcResult};
pub use message::{Message, MessageFlags, MessageHeader, Payload};
pub use mqueue::{QueueInfo, QueueState, ReceiveFilter, SenderFilter};
pub use notify::{CircuitHandoff, MeasurementResult};
pub use port::{PortInfo, PortName};
pub use process::{CleanupSummary, StatsSnapshot};
pub use shmem::{RegionGrant, RegionInfo};
