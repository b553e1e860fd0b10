//! Waiter registry - contexts blocked on message queues
//!
//! One registry serves the whole IPC system. Entries are indexed by context
//! (a context waits on at most one queue at a time) and by deadline, so the
//! timer path can find expired waiters without scanning every queue.
//!
//! Removing an entry is the act of waking: whoever removes it is the one
//! that calls into the scheduler.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use super::message::MessageHeader;
use super::mqueue::ReceiveFilter;
use super::{IpcError, IpcResult};
use crate::kern::timer::{Deadline, Ticks};
use crate::types::{ContextId, Pid, QueueId};

/// What a blocked context is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// A message accepted by the filter
    Receive(ReceiveFilter),
    /// Free space to enqueue into
    Space,
}

/// One blocked context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub context: ContextId,
    /// Process the context belongs to
    pub pid: Pid,
    pub queue: QueueId,
    pub kind: WaitKind,
    pub deadline: Deadline,
    /// Registration order, for FIFO wakeups among equals
    seq: u64,
}

impl Waiter {
    pub fn receive(
        context: ContextId,
        pid: Pid,
        queue: QueueId,
        filter: ReceiveFilter,
        deadline: Deadline,
    ) -> Self {
        Self {
            context,
            pid,
            queue,
            kind: WaitKind::Receive(filter),
            deadline,
            seq: 0,
        }
    }

    pub fn space(context: ContextId, pid: Pid, queue: QueueId, deadline: Deadline) -> Self {
        Self {
            context,
            pid,
            queue,
            kind: WaitKind::Space,
            deadline,
            seq: 0,
        }
    }
}

/// Registry of blocked contexts
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    by_context: BTreeMap<ContextId, Waiter>,
    by_deadline: BTreeSet<(Ticks, ContextId)>,
    next_seq: u64,
}

impl WaiterRegistry {
    pub const fn new() -> Self {
        Self {
            by_context: BTreeMap::new(),
            by_deadline: BTreeSet::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.by_context.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_context.is_empty()
    }

    pub fn get(&self, context: ContextId) -> Option<&Waiter> {
        self.by_context.get(&context)
    }

    /// Add an entry. A context already waiting somewhere is refused.
    pub fn register(&mut self, mut waiter: Waiter) -> IpcResult<()> {
        if self.by_context.contains_key(&waiter.context) {
            return Err(IpcError::InvalidArgument);
        }
        waiter.seq = self.next_seq;
        self.next_seq += 1;
        if let Deadline::At(t) = waiter.deadline {
            self.by_deadline.insert((t, waiter.context));
        }
        self.by_context.insert(waiter.context, waiter);
        Ok(())
    }

    pub fn remove(&mut self, context: ContextId) -> Option<Waiter> {
        let waiter = self.by_context.remove(&context)?;
        if let Deadline::At(t) = waiter.deadline {
            self.by_deadline.remove(&(t, context));
        }
        Some(waiter)
    }

    /// Oldest waiter on `queue` satisfying `pred`
    fn oldest_on(&self, queue: QueueId, mut pred: impl FnMut(&Waiter) -> bool) -> Option<ContextId> {
        self.by_context
            .values()
            .filter(|w| w.queue == queue && pred(*w))
            .min_by_key(|w| w.seq)
            .map(|w| w.context)
    }

    /// Take the oldest receiver on `queue` whose filter `accepts` the header
    pub fn take_receiver(
        &mut self,
        queue: QueueId,
        header: &MessageHeader,
        mut accepts: impl FnMut(&ReceiveFilter, &MessageHeader) -> bool,
    ) -> Option<Waiter> {
        let context = self.oldest_on(queue, |w| match &w.kind {
            WaitKind::Receive(filter) => accepts(filter, header),
            WaitKind::Space => false,
        })?;
        self.remove(context)
    }

    /// Take the oldest sender waiting for space on `queue`
    pub fn take_space_waiter(&mut self, queue: QueueId) -> Option<Waiter> {
        let context = self.oldest_on(queue, |w| w.kind == WaitKind::Space)?;
        self.remove(context)
    }

    /// Take every waiter on `queue` (teardown)
    pub fn take_all_on(&mut self, queue: QueueId) -> Vec<Waiter> {
        self.take_where(|w| w.queue == queue)
    }

    /// Take every waiter belonging to `pid` (process teardown)
    pub fn take_all_of(&mut self, pid: Pid) -> Vec<Waiter> {
        self.take_where(|w| w.pid == pid)
    }

    fn take_where(&mut self, pred: impl Fn(&Waiter) -> bool) -> Vec<Waiter> {
        let contexts: Vec<ContextId> = self
            .by_context
            .values()
            .filter(|w| pred(*w))
            .map(|w| w.context)
            .collect();
        contexts
            .into_iter()
            .filter_map(|c| self.remove(c))
            .collect()
    }

    /// Take every waiter whose deadline is at or before `now`
    pub fn expire(&mut self, now: Ticks) -> Vec<Waiter> {
        let due: Vec<ContextId> = self
            .by_deadline
            .iter()
            .take_while(|(t, _)| *t <= now)
            .map(|(_, c)| *c)
            .collect();
        due.into_iter().filter_map(|c| self.remove(c)).collect()
    }

    /// Earliest pending deadline, for programming the timer
    pub fn next_deadline(&self) -> Option<Ticks> {
        self.by_deadline.iter().next().map(|(t, _)| *t)
    }
}
