//! IPC configuration
//!
//! Compile-time limits live here as constants; the runtime-tunable subset
//! is collected in [`IpcConfig`], which the kernel hands to
//! [`IpcSystem::new`](crate::IpcSystem::new) at subsystem startup.

/// Maximum inline payload of a single message, in bytes.
pub const MAX_PAYLOAD: usize = 4096;

/// Maximum length of a port name, in bytes.
pub const MAX_PORT_NAME: usize = 64;

/// Page size used to round shared regions (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Default depth of a process's private queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Default depth of a port queue.
pub const DEFAULT_PORT_CAPACITY: usize = 64;

/// Default depth of each direction of a channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Hard ceiling for any queue depth.
pub const MAX_QUEUE_CAPACITY: usize = 1024;

/// Received requests per process that may still be answered; the oldest
/// is forgotten first.
pub const MAX_PENDING_REPLIES: usize = 64;

/// Default number of live ports.
pub const DEFAULT_MAX_PORTS: usize = 256;

/// Default number of live channels.
pub const DEFAULT_MAX_CHANNELS: usize = 256;

/// Default number of live shared regions.
pub const DEFAULT_MAX_REGIONS: usize = 128;

/// Runtime limits of one IPC system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcConfig {
    pub queue_capacity: usize,
    pub port_capacity: usize,
    pub channel_capacity: usize,
    pub max_ports: usize,
    pub max_channels: usize,
    pub max_regions: usize,
    pub page_size: usize,
}

impl IpcConfig {
    pub const fn new() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            port_capacity: DEFAULT_PORT_CAPACITY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_ports: DEFAULT_MAX_PORTS,
            max_channels: DEFAULT_MAX_CHANNELS,
            max_regions: DEFAULT_MAX_REGIONS,
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = clamp_capacity(capacity);
        self
    }

    pub fn with_port_capacity(mut self, capacity: usize) -> Self {
        self.port_capacity = clamp_capacity(capacity);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = clamp_capacity(capacity);
        self
    }

    pub fn with_max_ports(mut self, max: usize) -> Self {
        self.max_ports = max;
        self
    }

    pub fn with_max_channels(mut self, max: usize) -> Self {
        self.max_channels = max;
        self
    }

    pub fn with_max_regions(mut self, max: usize) -> Self {
        self.max_regions = max;
        self
    }

    /// Round `size` up to a whole number of pages.
    pub fn round_to_pages(&self, size: usize) -> Option<usize> {
        let pages = size.checked_add(self.page_size - 1)? / self.page_size;
        pages.checked_mul(self.page_size)
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue depths are always in `1..=MAX_QUEUE_CAPACITY`.
pub(crate) fn clamp_capacity(capacity: usize) -> usize {
    capacity.clamp(1, MAX_QUEUE_CAPACITY)
}
