//! Channels - dedicated bidirectional links between two processes
//!
//! A channel is a pair of independent queues, one per direction. The
//! direction of a send or receive is implied by which endpoint calls.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use log::debug;

use super::message::Message;
use super::mqueue::{MessageQueue, QueueOwner, ReceiveFilter, SharedQueue};
use super::{IpcError, IpcResult};
use crate::kern::sched_prim::Scheduler;
use crate::kern::timer::Timeout;
use crate::kern::vm::MemoryManager;
use crate::system::IpcSystem;
use crate::types::{ChannelId, MessageId, Pid};

/// Two-endpoint message link
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    a: Pid,
    b: Pid,
    a_to_b: SharedQueue,
    b_to_a: SharedQueue,
    active: AtomicBool,
}

impl Channel {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn endpoints(&self) -> (Pid, Pid) {
        (self.a, self.b)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn names(&self, pid: Pid) -> bool {
        self.a == pid || self.b == pid
    }

    /// The endpoint opposite to `pid`
    pub fn peer_of(&self, pid: Pid) -> Option<Pid> {
        if pid == self.a {
            Some(self.b)
        } else if pid == self.b {
            Some(self.a)
        } else {
            None
        }
    }

    /// Queue `pid` sends into
    fn outbound(&self, pid: Pid) -> Option<&SharedQueue> {
        if pid == self.a {
            Some(&self.a_to_b)
        } else if pid == self.b {
            Some(&self.b_to_a)
        } else {
            None
        }
    }

    /// Queue `pid` receives from
    fn inbound(&self, pid: Pid) -> Option<&SharedQueue> {
        if pid == self.a {
            Some(&self.b_to_a)
        } else if pid == self.b {
            Some(&self.a_to_b)
        } else {
            None
        }
    }
}

/// Live channels
#[derive(Debug, Default)]
pub struct ChannelTable {
    channels: BTreeMap<ChannelId, Arc<Channel>>,
}

impl ChannelTable {
    pub const fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.channels.get(&id).cloned()
    }

    pub fn remove(&mut self, id: ChannelId) -> Option<Arc<Channel>> {
        self.channels.remove(&id)
    }

    /// Unregister every channel with `pid` as an endpoint
    pub fn remove_naming(&mut self, pid: Pid) -> Vec<Arc<Channel>> {
        let naming: Vec<ChannelId> = self
            .channels
            .values()
            .filter(|c| c.names(pid))
            .map(|c| c.id)
            .collect();
        naming.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

impl<S: Scheduler, M: MemoryManager> IpcSystem<S, M> {
    fn channel(&self, id: ChannelId) -> IpcResult<Arc<Channel>> {
        self.channels.lock().get(id).ok_or(IpcError::InvalidChannel)
    }

    /// Close both directions of an unregistered channel
    pub(crate) fn shut_down_channel(&self, channel: &Channel) -> (usize, usize) {
        channel.active.store(false, Ordering::Release);
        let (d1, w1) = self.close_queue(&channel.a_to_b);
        let (d2, w2) = self.close_queue(&channel.b_to_a);
        (d1 + d2, w1 + w2)
    }

    /// Open a channel between `a` and `b`
    pub fn channel_create(&self, caller: Pid, a: Pid, b: Pid) -> IpcResult<ChannelId> {
        if a == b {
            return Err(IpcError::InvalidArgument);
        }
        let (Some(end_a), Some(end_b)) = (self.process(a), self.process(b)) else {
            return Err(IpcError::InvalidProcess);
        };
        if caller != a && caller != b && !caller.is_kernel() {
            return Err(IpcError::PermissionDenied);
        }

        let mut channels = self.channels.lock();
        if !end_a.is_alive() || !end_b.is_alive() {
            return Err(IpcError::InvalidProcess);
        }
        if channels.len() >= self.config.max_channels {
            return Err(IpcError::OutOfMemory);
        }
        let id = self.ids.channel();
        let capacity = self.config.channel_capacity;
        let channel = Channel {
            id,
            a,
            b,
            a_to_b: MessageQueue::shared(self.ids.queue(), QueueOwner::Channel(id), capacity),
            b_to_a: MessageQueue::shared(self.ids.queue(), QueueOwner::Channel(id), capacity),
            active: AtomicBool::new(true),
        };
        channels.channels.insert(id, Arc::new(channel));
        drop(channels);

        debug!("ipc: channel {:?} {} <-> {}", id, a, b);
        Ok(id)
    }

    /// Send to the other endpoint of `channel`
    pub fn channel_send(
        &self,
        caller: Pid,
        channel: ChannelId,
        msg: Message,
        timeout: Timeout,
    ) -> IpcResult<MessageId> {
        let sender = self.caller(caller)?;
        let channel = self.channel(channel)?;
        let (Some(queue), Some(peer)) = (channel.outbound(caller), channel.peer_of(caller)) else {
            return Err(IpcError::PermissionDenied);
        };
        let now = self.scheduler.now();
        let deadline = timeout.deadline(now);
        let msg = self.stamp(&sender, peer, msg, now, deadline);
        self.deliver(&sender, queue, msg, deadline)
    }

    /// Receive what the other endpoint sent
    pub fn channel_receive(
        &self,
        caller: Pid,
        channel: ChannelId,
        timeout: Timeout,
    ) -> IpcResult<Message> {
        let receiver = self.caller(caller)?;
        let channel = self.channel(channel)?;
        let queue = channel.inbound(caller).ok_or(IpcError::PermissionDenied)?;
        let deadline = timeout.deadline(self.scheduler.now());
        self.await_message(&receiver, queue, ReceiveFilter::ANY, deadline)
    }

    /// Tear a channel down. Either endpoint or the kernel may.
    pub fn channel_destroy(&self, caller: Pid, channel: ChannelId) -> IpcResult<()> {
        let removed = {
            let mut channels = self.channels.lock();
            let target = channels.get(channel).ok_or(IpcError::InvalidChannel)?;
            if !target.names(caller) && !caller.is_kernel() {
                return Err(IpcError::PermissionDenied);
            }
            channels.remove(channel).ok_or(IpcError::InvalidChannel)?
        };
        let (discarded, woken) = self.shut_down_channel(&removed);
        debug!(
            "ipc: channel {:?} destroyed by {}, {} discarded, {} woken",
            channel, caller, discarded, woken
        );
        Ok(())
    }

    pub fn channel_peer(&self, caller: Pid, channel: ChannelId) -> IpcResult<Pid> {
        self.channel(channel)?
            .peer_of(caller)
            .ok_or(IpcError::PermissionDenied)
    }
}
