//! IPC Message Queue - bounded per-owner message storage
//!
//! Each process, port and channel direction owns exactly one queue.
//! Ordering is FIFO except for urgent messages, which are kept as a
//! contiguous prefix: an urgent message goes behind every queued urgent
//! message and ahead of every queued normal one.

use alloc::collections::{BTreeSet, VecDeque};
use alloc::sync::Arc;
use spin::Mutex;

use super::message::{Message, MessageHeader};
use super::{IpcError, IpcResult};
use crate::config::clamp_capacity;
use crate::types::{ChannelId, MessageId, Pid, PortId, QueueId};

// ============================================================================
// Queue State
// ============================================================================

/// Message queue state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Torn down; no further sends or receives
    Closed,
    /// Accepting messages, nobody blocked in receive
    Open,
    /// Accepting messages, at least one receiver blocked on it
    Listening,
}

/// Who a queue belongs to. Decides which error a closed queue reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOwner {
    Process(Pid),
    Port(PortId),
    Channel(ChannelId),
}

// ============================================================================
// Receive Filters
// ============================================================================

/// Which senders a receive accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderFilter {
    Any,
    Only(Pid),
}

impl SenderFilter {
    pub fn matches(&self, sender: Pid) -> bool {
        match self {
            Self::Any => true,
            Self::Only(pid) => *pid == sender,
        }
    }
}

/// Full match criteria of a receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveFilter {
    pub sender: SenderFilter,
    /// When set, only the reply to this request id matches
    pub reply_to: Option<MessageId>,
}

impl ReceiveFilter {
    pub const ANY: Self = Self {
        sender: SenderFilter::Any,
        reply_to: None,
    };

    pub fn from_sender(pid: Pid) -> Self {
        Self {
            sender: SenderFilter::Only(pid),
            reply_to: None,
        }
    }

    /// Reply to `request` coming from `from`
    pub fn reply(from: Pid, request: MessageId) -> Self {
        Self {
            sender: SenderFilter::Only(from),
            reply_to: Some(request),
        }
    }
}

impl From<SenderFilter> for ReceiveFilter {
    fn from(sender: SenderFilter) -> Self {
        Self {
            sender,
            reply_to: None,
        }
    }
}

// ============================================================================
// Queue Snapshot
// ============================================================================

/// Read-only view of a queue for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    pub count: usize,
    pub capacity: usize,
    pub dropped: u64,
    pub state: QueueState,
}

// ============================================================================
// Message Queue
// ============================================================================

/// Bounded message queue
#[derive(Debug)]
pub struct MessageQueue {
    id: QueueId,
    owner: QueueOwner,
    state: QueueState,
    messages: VecDeque<Message>,
    capacity: usize,
    /// Messages refused for lack of space
    dropped: u64,
    /// Length of the urgent prefix
    urgent: usize,
    /// Receivers currently blocked on this queue
    listeners: usize,
    /// Request ids whose replies belong to an in-flight call
    reserved: BTreeSet<MessageId>,
}

/// Queue shared between the owning table and blocked contexts
pub type SharedQueue = Arc<Mutex<MessageQueue>>;

impl MessageQueue {
    pub fn new(id: QueueId, owner: QueueOwner, capacity: usize) -> Self {
        let capacity = clamp_capacity(capacity);
        Self {
            id,
            owner,
            state: QueueState::Open,
            messages: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
            urgent: 0,
            listeners: 0,
            reserved: BTreeSet::new(),
        }
    }

    pub fn shared(id: QueueId, owner: QueueOwner, capacity: usize) -> SharedQueue {
        Arc::new(Mutex::new(Self::new(id, owner, capacity)))
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn owner(&self) -> QueueOwner {
        self.owner
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state == QueueState::Closed
    }

    pub fn info(&self) -> QueueInfo {
        QueueInfo {
            count: self.count(),
            capacity: self.capacity,
            dropped: self.dropped,
            state: self.state,
        }
    }

    /// Error reported to anyone touching this queue after teardown
    pub fn closed_error(&self) -> IpcError {
        match self.owner {
            QueueOwner::Process(_) => IpcError::ProcessTerminated,
            QueueOwner::Port(_) => IpcError::PortClosed,
            QueueOwner::Channel(_) => IpcError::ChannelClosed,
        }
    }

    pub fn ensure_open(&self) -> IpcResult<()> {
        if self.is_closed() {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Send Side
    // ========================================================================

    /// Insert a message, honoring the urgent prefix.
    ///
    /// Hands the message back untouched when the queue is full. The caller
    /// decides whether that counts as a drop.
    pub fn try_enqueue(&mut self, msg: Message) -> Result<(), Message> {
        debug_assert!(!self.is_closed());
        if self.is_full() {
            return Err(msg);
        }
        if msg.is_urgent() {
            self.messages.insert(self.urgent, msg);
            self.urgent += 1;
        } else {
            self.messages.push_back(msg);
        }
        Ok(())
    }

    pub fn record_drop(&mut self) {
        self.dropped = self.dropped.saturating_add(1);
    }

    // ========================================================================
    // Receive Side
    // ========================================================================

    /// Would a receive with `filter` accept a message with this header?
    pub fn accepts(&self, filter: &ReceiveFilter, header: &MessageHeader) -> bool {
        if !filter.sender.matches(header.sender) {
            return false;
        }
        match filter.reply_to {
            Some(request) => header.is_reply() && header.reply_to == request,
            // Replies reserved by an in-flight call are invisible to
            // everyone else.
            None => !(header.is_reply() && self.reserved.contains(&header.reply_to)),
        }
    }

    /// Remove and return the first message accepted by `filter`
    pub fn dequeue_matching(&mut self, filter: &ReceiveFilter) -> Option<Message> {
        let index = self
            .messages
            .iter()
            .position(|m| self.accepts(filter, m.header()))?;
        if index < self.urgent {
            self.urgent -= 1;
        }
        self.messages.remove(index)
    }

    pub fn peek(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn reserve_reply(&mut self, request: MessageId) {
        self.reserved.insert(request);
    }

    pub fn release_reply(&mut self, request: MessageId) {
        self.reserved.remove(&request);
    }

    pub fn add_listener(&mut self) {
        self.listeners += 1;
        if self.state == QueueState::Open {
            self.state = QueueState::Listening;
        }
    }

    pub fn remove_listener(&mut self) {
        self.listeners = self.listeners.saturating_sub(1);
        if self.listeners == 0 && self.state == QueueState::Listening {
            self.state = QueueState::Open;
        }
    }

    // ========================================================================
    // Limits and Lifecycle
    // ========================================================================

    /// Change the depth. The queue never shrinks below its current count.
    pub fn set_capacity(&mut self, capacity: usize) -> IpcResult<()> {
        self.ensure_open()?;
        if capacity == 0 || capacity < self.messages.len() {
            return Err(IpcError::InvalidArgument);
        }
        let capacity = clamp_capacity(capacity);
        if capacity > self.messages.capacity() {
            self.messages.reserve_exact(capacity - self.messages.len());
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Tear the queue down, discarding everything queued.
    ///
    /// Returns the number of discarded messages.
    pub fn close(&mut self) -> usize {
        let discarded = self.messages.len();
        self.state = QueueState::Closed;
        self.messages.clear();
        self.urgent = 0;
        self.listeners = 0;
        self.reserved.clear();
        discarded
    }
}
