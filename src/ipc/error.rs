//! IPC error taxonomy
//!
//! Every fallible IPC operation returns [`IpcResult`]. Nothing in the core
//! panics on a bad request; the caller always gets one of these back.

use thiserror::Error;

/// IPC error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IpcError {
    #[error("receiver is not a live process with an IPC queue")]
    InvalidReceiver,
    #[error("no such port")]
    InvalidPort,
    #[error("no such channel")]
    InvalidChannel,
    #[error("no such shared region")]
    InvalidRegion,
    #[error("process has no IPC state")]
    InvalidProcess,
    #[error("payload exceeds the maximum message size")]
    MessageTooLarge,
    #[error("destination queue is full")]
    BufferFull,
    #[error("deadline expired")]
    Timeout,
    #[error("no message available")]
    NoMessage,
    #[error("permission denied")]
    PermissionDenied,
    #[error("object already exists")]
    AlreadyExists,
    #[error("object not found")]
    NotFound,
    #[error("port is closed")]
    PortClosed,
    #[error("channel is closed")]
    ChannelClosed,
    #[error("process terminated")]
    ProcessTerminated,
    #[error("shared region still has active grants")]
    RegionBusy,
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("wait cancelled")]
    Interrupted,
}

/// Coarse classification of an [`IpcError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Addressing,
    Capacity,
    Timing,
    Permission,
    Lifecycle,
    Resource,
    Argument,
}

impl IpcError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidReceiver
            | Self::InvalidPort
            | Self::InvalidChannel
            | Self::InvalidRegion
            | Self::InvalidProcess => ErrorCategory::Addressing,
            Self::MessageTooLarge | Self::BufferFull => ErrorCategory::Capacity,
            Self::Timeout | Self::NoMessage | Self::Interrupted => ErrorCategory::Timing,
            Self::PermissionDenied => ErrorCategory::Permission,
            Self::AlreadyExists
            | Self::NotFound
            | Self::PortClosed
            | Self::ChannelClosed
            | Self::ProcessTerminated
            | Self::RegionBusy => ErrorCategory::Lifecycle,
            Self::OutOfMemory => ErrorCategory::Resource,
            Self::InvalidArgument => ErrorCategory::Argument,
        }
    }

    /// Stable code returned to user space by the syscall layer.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidReceiver => -1,
            Self::InvalidPort => -2,
            Self::InvalidChannel => -3,
            Self::InvalidRegion => -4,
            Self::InvalidProcess => -5,
            Self::MessageTooLarge => -6,
            Self::BufferFull => -7,
            Self::Timeout => -8,
            Self::NoMessage => -9,
            Self::PermissionDenied => -10,
            Self::AlreadyExists => -11,
            Self::NotFound => -12,
            Self::PortClosed => -13,
            Self::ChannelClosed => -14,
            Self::ProcessTerminated => -15,
            Self::RegionBusy => -16,
            Self::OutOfMemory => -17,
            Self::InvalidArgument => -18,
            Self::Interrupted => -19,
        }
    }
}

/// Result type for IPC operations
pub type IpcResult<T> = Result<T, IpcError>;
