//! The IPC subsystem instance
//!
//! All IPC state lives in one [`IpcSystem`] value that the kernel creates at
//! startup and shares between execution contexts. Each table has its own
//! spin lock. Lock order is table -> queue -> waiter registry; table locks
//! are released as soon as the `Arc` of the object is cloned out.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use log::{debug, trace};
use spin::Mutex;

use crate::config::IpcConfig;
use crate::ipc::channel::ChannelTable;
use crate::ipc::mqueue::{MessageQueue, QueueOwner, SharedQueue};
use crate::ipc::port::PortRegistry;
use crate::ipc::process::ProcessIpc;
use crate::ipc::shmem::RegionTable;
use crate::ipc::waiter::{Waiter, WaiterRegistry};
use crate::ipc::{IpcError, IpcResult};
use crate::kern::sched_prim::{Scheduler, WakeReason};
use crate::kern::timer::Ticks;
use crate::kern::vm::MemoryManager;
use crate::types::{ContextId, IdAllocator, Pid};

/// IPC subsystem
pub struct IpcSystem<S: Scheduler, M: MemoryManager> {
    pub(crate) config: IpcConfig,
    pub(crate) scheduler: S,
    pub(crate) memory: M,
    pub(crate) ids: IdAllocator,
    pub(crate) processes: Mutex<BTreeMap<Pid, Arc<ProcessIpc>>>,
    pub(crate) ports: Mutex<PortRegistry>,
    pub(crate) channels: Mutex<ChannelTable>,
    pub(crate) regions: Mutex<RegionTable>,
    pub(crate) waiters: Mutex<WaiterRegistry>,
}

impl<S: Scheduler, M: MemoryManager> IpcSystem<S, M> {
    /// Bring the subsystem up. The kernel gets an IPC identity of its own
    /// so interrupt handlers and kernel services can send.
    pub fn new(config: IpcConfig, scheduler: S, memory: M) -> Self {
        let system = Self {
            config,
            scheduler,
            memory,
            ids: IdAllocator::new(),
            processes: Mutex::new(BTreeMap::new()),
            ports: Mutex::new(PortRegistry::new()),
            channels: Mutex::new(ChannelTable::new()),
            regions: Mutex::new(RegionTable::new()),
            waiters: Mutex::new(WaiterRegistry::new()),
        };
        let kernel = system.new_process_state(Pid::KERNEL);
        system.processes.lock().insert(Pid::KERNEL, kernel);
        debug!("ipc: subsystem up, {:?}", system.config);
        system
    }

    pub fn config(&self) -> &IpcConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    // ========================================================================
    // Lookup helpers
    // ========================================================================

    pub(crate) fn new_process_state(&self, pid: Pid) -> Arc<ProcessIpc> {
        let queue = MessageQueue::shared(
            self.ids.queue(),
            QueueOwner::Process(pid),
            self.config.queue_capacity,
        );
        Arc::new(ProcessIpc::new(pid, queue))
    }

    pub(crate) fn process(&self, pid: Pid) -> Option<Arc<ProcessIpc>> {
        self.processes.lock().get(&pid).cloned()
    }

    /// IPC state of the calling process
    pub(crate) fn caller(&self, pid: Pid) -> IpcResult<Arc<ProcessIpc>> {
        self.process(pid).ok_or(IpcError::InvalidProcess)
    }

    // ========================================================================
    // Waiter plumbing
    // ========================================================================

    /// Register a waiter for a context of `owner`.
    ///
    /// The liveness check happens under the registry lock, so process
    /// teardown either sees this entry or this call sees the process dead.
    pub(crate) fn park(&self, owner: &ProcessIpc, waiter: Waiter) -> IpcResult<()> {
        let mut registry = self.waiters.lock();
        if !owner.is_alive() {
            return Err(IpcError::ProcessTerminated);
        }
        registry.register(waiter)
    }

    pub(crate) fn unpark(&self, context: ContextId) {
        self.waiters.lock().remove(context);
    }

    /// Wake the oldest sender blocked for space on `queue`
    pub(crate) fn wake_space_waiter(&self, queue: &MessageQueue) {
        let woken = self.waiters.lock().take_space_waiter(queue.id());
        if let Some(waiter) = woken {
            trace!("ipc: space on {:?}, waking {:?}", queue.id(), waiter.context);
            self.scheduler.wake(waiter.context, WakeReason::Notified);
        }
    }

    /// Close `queue`, discarding its messages and waking everyone on it.
    ///
    /// Returns (discarded messages, woken waiters).
    pub(crate) fn close_queue(&self, queue: &SharedQueue) -> (usize, usize) {
        let mut q = queue.lock();
        let discarded = q.close();
        let woken = self.waiters.lock().take_all_on(q.id());
        for waiter in &woken {
            self.scheduler.wake(waiter.context, WakeReason::Closed);
        }
        (discarded, woken.len())
    }

    /// Explicitly cancel the wait of `context`. Its blocked operation fails
    /// with [`IpcError::Interrupted`]. Returns false if it was not waiting.
    pub fn cancel_wait(&self, context: ContextId) -> bool {
        let removed = self.waiters.lock().remove(context);
        match removed {
            Some(waiter) => {
                debug!("ipc: cancelling wait of {:?} on {:?}", context, waiter.queue);
                self.scheduler.wake(context, WakeReason::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Timer hook: wake every waiter whose deadline has passed.
    pub fn expire_waiters(&self) -> usize {
        let now = self.scheduler.now();
        let expired = self.waiters.lock().expire(now);
        for waiter in &expired {
            self.scheduler.wake(waiter.context, WakeReason::TimedOut);
        }
        expired.len()
    }

    /// Earliest pending waiter deadline
    pub fn next_deadline(&self) -> Option<Ticks> {
        self.waiters.lock().next_deadline()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_waiting(&self, context: ContextId) -> bool {
        self.waiters.lock().get(context).is_some()
    }
}
