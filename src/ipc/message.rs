//! Message structure
//!
//! A message is a small header plus an inline payload of at most
//! [`MAX_PAYLOAD`] bytes. The payload lives in a fixed-capacity buffer, so
//! building or copying a message never touches the heap.

use bitflags::bitflags;

use super::{IpcError, IpcResult};
use crate::config::MAX_PAYLOAD;
use crate::kern::timer::{Deadline, Ticks};
use crate::types::{MessageId, Pid};

/// Inline payload buffer
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD>;

bitflags! {
    /// Message type flags. The empty set is a normal message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MessageFlags: u32 {
        const URGENT = 1 << 0;
        const REPLY = 1 << 1;
        const NOTIFICATION = 1 << 2;

        // Domain extensions
        const CIRCUIT_HANDOFF = 1 << 8;
        const MEASUREMENT_RESULT = 1 << 9;
    }
}

impl MessageFlags {
    pub const NORMAL: Self = Self::empty();
}

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub sender: Pid,
    pub receiver: Pid,
    pub flags: MessageFlags,
    /// Unique per sender, stamped at send time
    pub id: MessageId,
    /// Id of the request this answers, `MessageId::NONE` otherwise
    pub reply_to: MessageId,
    /// Tick at which the message was sent
    pub timestamp: Ticks,
    /// Absolute deadline of the send, zero if none
    pub deadline: Ticks,
}

impl MessageHeader {
    const fn empty(flags: MessageFlags) -> Self {
        Self {
            sender: Pid::KERNEL,
            receiver: Pid::KERNEL,
            flags,
            id: MessageId::NONE,
            reply_to: MessageId::NONE,
            timestamp: 0,
            deadline: 0,
        }
    }

    pub fn is_urgent(&self) -> bool {
        self.flags.contains(MessageFlags::URGENT)
    }

    pub fn is_reply(&self) -> bool {
        self.flags.contains(MessageFlags::REPLY) && !self.reply_to.is_none()
    }
}

/// Complete message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: MessageHeader,
    payload: Payload,
}

impl Message {
    /// Normal message carrying a copy of `data`
    pub fn new(data: &[u8]) -> IpcResult<Self> {
        Self::with_flags(MessageFlags::NORMAL, data)
    }

    /// Urgent message carrying a copy of `data`
    pub fn urgent(data: &[u8]) -> IpcResult<Self> {
        Self::with_flags(MessageFlags::URGENT, data)
    }

    pub fn with_flags(flags: MessageFlags, data: &[u8]) -> IpcResult<Self> {
        let payload = Payload::from_slice(data).map_err(|_| IpcError::MessageTooLarge)?;
        Ok(Self {
            header: MessageHeader::empty(flags),
            payload,
        })
    }

    /// Empty notification message
    pub fn notification() -> Self {
        Self {
            header: MessageHeader::empty(MessageFlags::NOTIFICATION),
            payload: Payload::new(),
        }
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn flags(&self) -> MessageFlags {
        self.header.flags
    }

    pub fn id(&self) -> MessageId {
        self.header.id
    }

    pub fn sender(&self) -> Pid {
        self.header.sender
    }

    pub fn is_urgent(&self) -> bool {
        self.header.is_urgent()
    }

    pub fn is_reply(&self) -> bool {
        self.header.is_reply()
    }

    /// Mark (or unmark) the message urgent before sending
    pub fn set_urgent(&mut self, urgent: bool) {
        self.header.flags.set(MessageFlags::URGENT, urgent);
    }

    /// Append bytes to the payload
    pub fn extend(&mut self, data: &[u8]) -> IpcResult<()> {
        self.payload
            .extend_from_slice(data)
            .map_err(|_| IpcError::MessageTooLarge)
    }

    /// Whether the send deadline carried by this message has passed
    pub fn is_expired(&self, now: Ticks) -> bool {
        self.header.deadline != 0 && now >= self.header.deadline
    }

    pub(crate) fn add_flags(&mut self, flags: MessageFlags) {
        self.header.flags |= flags;
    }

    pub(crate) fn set_reply_to(&mut self, id: MessageId) {
        self.header.reply_to = id;
    }

    /// Fill in the transport fields. Called exactly once, on the send path.
    pub(crate) fn stamp(
        &mut self,
        sender: Pid,
        receiver: Pid,
        id: MessageId,
        now: Ticks,
        deadline: Option<Deadline>,
    ) {
        self.header.sender = sender;
        self.header.receiver = receiver;
        self.header.id = id;
        self.header.timestamp = now;
        self.header.deadline = deadline.map_or(0, |d| d.to_raw());
    }
}
