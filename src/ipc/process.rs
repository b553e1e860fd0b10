//! Per-process IPC state and lifecycle hooks
//!
//! The process manager calls [`IpcSystem::process_init`] when a process is
//! created and [`IpcSystem::process_cleanup`] when it exits. Between the
//! two the process owns a private queue, a message id counter and its
//! traffic counters.

use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use log::{debug, warn};
use spin::Mutex;

use super::message::{MessageFlags, MessageHeader};
use super::mqueue::{QueueInfo, SharedQueue};
use super::{IpcError, IpcResult};
use crate::config::MAX_PENDING_REPLIES;
use crate::kern::sched_prim::{Scheduler, WakeReason};
use crate::kern::vm::MemoryManager;
use crate::system::IpcSystem;
use crate::types::{MessageId, Pid};

// ============================================================================
// Statistics
// ============================================================================

/// Traffic counters of one process
#[derive(Debug, Default)]
pub struct IpcStats {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl IpcStats {
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// A message this process sent was refused for lack of space
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`IpcStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
}

// ============================================================================
// Process State
// ============================================================================

/// IPC state of one process
#[derive(Debug)]
pub struct ProcessIpc {
    pid: Pid,
    queue: SharedQueue,
    next_message_id: AtomicU64,
    alive: AtomicBool,
    stats: IpcStats,
    /// `(sender, id)` of received requests not yet answered
    requests: Mutex<VecDeque<(Pid, MessageId)>>,
}

impl ProcessIpc {
    pub(crate) fn new(pid: Pid, queue: SharedQueue) -> Self {
        Self {
            pid,
            queue,
            next_message_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            stats: IpcStats::default(),
            requests: Mutex::new(VecDeque::new()),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn stats(&self) -> &IpcStats {
        &self.stats
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Fresh id for a message sent by this process. Never zero.
    pub fn next_message_id(&self) -> MessageId {
        MessageId(self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Remember a dequeued request so [`IpcSystem::reply`] can answer it.
    /// Replies and notifications are not answerable.
    pub(crate) fn note_request(&self, header: &MessageHeader) {
        if header.is_reply() || header.flags.contains(MessageFlags::NOTIFICATION) {
            return;
        }
        let mut requests = self.requests.lock();
        if requests.len() >= MAX_PENDING_REPLIES {
            requests.pop_front();
        }
        requests.push_back((header.sender, header.id));
    }

    /// Forget a received request, reporting whether it was outstanding
    pub(crate) fn take_request(&self, sender: Pid, id: MessageId) -> bool {
        let mut requests = self.requests.lock();
        match requests.iter().position(|&entry| entry == (sender, id)) {
            Some(at) => requests.remove(at).is_some(),
            None => false,
        }
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// What [`IpcSystem::process_cleanup`] tore down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupSummary {
    pub discarded_messages: usize,
    pub woken_waiters: usize,
    pub ports: usize,
    pub channels: usize,
    pub regions: usize,
    pub grants: usize,
}

// ============================================================================
// Lifecycle Hooks
// ============================================================================

impl<S: Scheduler, M: MemoryManager> IpcSystem<S, M> {
    /// Create the IPC state of a new process
    pub fn process_init(&self, pid: Pid) -> IpcResult<()> {
        let mut processes = self.processes.lock();
        if processes.contains_key(&pid) {
            return Err(IpcError::AlreadyExists);
        }
        processes.insert(pid, self.new_process_state(pid));
        debug!("ipc: {} initialized", pid);
        Ok(())
    }

    /// Release everything `pid` holds. Never fails; individual problems
    /// are logged and skipped.
    pub fn process_cleanup(&self, pid: Pid) -> CleanupSummary {
        let mut summary = CleanupSummary::default();

        if pid.is_kernel() {
            warn!("ipc: refusing to clean up the kernel IPC state");
            return summary;
        }

        // Private queue
        let removed = self.processes.lock().remove(&pid);
        match removed {
            Some(state) => {
                state.mark_dead();
                let (discarded, woken) = self.close_queue(&state.queue);
                summary.discarded_messages += discarded;
                summary.woken_waiters += woken;
            }
            None => warn!("ipc: cleanup of {} without IPC state", pid),
        }

        // Ports owned by the process
        let ports = self.ports.lock().remove_owned_by(pid);
        for port in &ports {
            let (discarded, woken) = self.close_queue(port.queue());
            summary.discarded_messages += discarded;
            summary.woken_waiters += woken;
        }
        summary.ports = ports.len();

        // Channels naming the process
        let channels = self.channels.lock().remove_naming(pid);
        for channel in &channels {
            let (discarded, woken) = self.shut_down_channel(channel);
            summary.discarded_messages += discarded;
            summary.woken_waiters += woken;
        }
        summary.channels = channels.len();

        // Shared memory
        let (regions, grants) = self.release_regions_of(pid);
        summary.regions = regions;
        summary.grants = grants;

        // Contexts of the process blocked on someone else's queue
        let orphans = self.waiters.lock().take_all_of(pid);
        for waiter in &orphans {
            self.scheduler.wake(waiter.context, WakeReason::Closed);
        }
        summary.woken_waiters += orphans.len();

        debug!("ipc: {} cleaned up: {:?}", pid, summary);
        summary
    }

    /// Counters of `pid`
    pub fn stats(&self, pid: Pid) -> IpcResult<StatsSnapshot> {
        let state = self.process(pid).ok_or(IpcError::InvalidProcess)?;
        Ok(state.stats.snapshot())
    }

    /// Messages waiting in `pid`'s private queue
    pub fn queue_depth(&self, pid: Pid) -> IpcResult<usize> {
        Ok(self.queue_info(pid)?.count)
    }

    pub fn queue_info(&self, pid: Pid) -> IpcResult<QueueInfo> {
        let state = self.process(pid).ok_or(IpcError::InvalidProcess)?;
        let info = state.queue.lock().info();
        Ok(info)
    }

    pub fn is_registered(&self, pid: Pid) -> bool {
        self.processes.lock().contains_key(&pid)
    }
}
