//! Port implementation - named IPC endpoints
//!
//! A port is a queue with a unique name and an owner. Any live process may
//! send to it; only the owner receives from it. Names are released when the
//! port is destroyed and may then be reused.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::debug;

use super::message::Message;
use super::mqueue::{MessageQueue, QueueInfo, QueueOwner, QueueState, SenderFilter, SharedQueue};
use super::{IpcError, IpcResult};
use crate::config::MAX_PORT_NAME;
use crate::kern::sched_prim::Scheduler;
use crate::kern::timer::Timeout;
use crate::kern::vm::MemoryManager;
use crate::system::IpcSystem;
use crate::types::{MessageId, Pid, PortId};

/// Bounded port name
pub type PortName = heapless::String<MAX_PORT_NAME>;

fn port_name(name: &str) -> IpcResult<PortName> {
    if name.is_empty() {
        return Err(IpcError::InvalidArgument);
    }
    let mut bounded = PortName::new();
    bounded
        .push_str(name)
        .map_err(|_| IpcError::InvalidArgument)?;
    Ok(bounded)
}

// ============================================================================
// Port
// ============================================================================

/// A named endpoint
#[derive(Debug)]
pub struct Port {
    id: PortId,
    owner: Pid,
    name: PortName,
    queue: SharedQueue,
}

impl Port {
    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn owner(&self) -> Pid {
        self.owner
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    /// State of the port, which is the state of its queue
    pub fn state(&self) -> QueueState {
        self.queue.lock().state()
    }

    pub fn info(&self) -> PortInfo {
        PortInfo {
            id: self.id,
            owner: self.owner,
            queue: self.queue.lock().info(),
        }
    }
}

/// Snapshot of a port for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortInfo {
    pub id: PortId,
    pub owner: Pid,
    pub queue: QueueInfo,
}

// ============================================================================
// Port Registry
// ============================================================================

/// Live ports, by id and by name
#[derive(Debug, Default)]
pub struct PortRegistry {
    by_id: BTreeMap<PortId, Arc<Port>>,
    by_name: BTreeMap<PortName, PortId>,
}

impl PortRegistry {
    pub const fn new() -> Self {
        Self {
            by_id: BTreeMap::new(),
            by_name: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: PortId) -> Option<Arc<Port>> {
        self.by_id.get(&id).cloned()
    }

    pub fn lookup(&self, name: &PortName) -> Option<PortId> {
        self.by_name.get(name).copied()
    }

    fn insert(&mut self, port: Port) -> IpcResult<()> {
        if self.by_name.contains_key(&port.name) {
            return Err(IpcError::AlreadyExists);
        }
        self.by_name.insert(port.name.clone(), port.id);
        self.by_id.insert(port.id, Arc::new(port));
        Ok(())
    }

    pub fn remove(&mut self, id: PortId) -> Option<Arc<Port>> {
        let port = self.by_id.remove(&id)?;
        self.by_name.remove(&port.name);
        Some(port)
    }

    /// Unregister every port owned by `pid`
    pub fn remove_owned_by(&mut self, pid: Pid) -> Vec<Arc<Port>> {
        let owned: Vec<PortId> = self
            .by_id
            .values()
            .filter(|p| p.owner == pid)
            .map(|p| p.id)
            .collect();
        owned.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

// ============================================================================
// Port Operations
// ============================================================================

impl<S: Scheduler, M: MemoryManager> IpcSystem<S, M> {
    pub(crate) fn port(&self, id: PortId) -> IpcResult<Arc<Port>> {
        self.ports.lock().get(id).ok_or(IpcError::InvalidPort)
    }

    /// Create a port named `name` owned by `caller`
    pub fn port_create(&self, caller: Pid, name: &str) -> IpcResult<PortId> {
        let owner = self.caller(caller)?;
        let name = port_name(name)?;

        let mut ports = self.ports.lock();
        // Cleanup marks the owner dead before it sweeps this table
        if !owner.is_alive() {
            return Err(IpcError::InvalidProcess);
        }
        if ports.len() >= self.config.max_ports {
            return Err(IpcError::OutOfMemory);
        }
        let id = self.ids.port();
        let queue = MessageQueue::shared(self.ids.queue(), QueueOwner::Port(id), self.config.port_capacity);
        ports.insert(Port {
            id,
            owner: caller,
            name,
            queue,
        })?;
        drop(ports);

        debug!("ipc: {} created port {:?}", caller, id);
        Ok(id)
    }

    /// Destroy a port. Queued messages are discarded and blocked contexts
    /// fail with [`IpcError::PortClosed`].
    pub fn port_destroy(&self, caller: Pid, port: PortId) -> IpcResult<()> {
        let removed = {
            let mut ports = self.ports.lock();
            let target = ports.get(port).ok_or(IpcError::InvalidPort)?;
            if target.owner != caller && !caller.is_kernel() {
                return Err(IpcError::PermissionDenied);
            }
            ports.remove(port).ok_or(IpcError::InvalidPort)?
        };
        let (discarded, woken) = self.close_queue(&removed.queue);
        debug!(
            "ipc: port {:?} '{}' destroyed, {} discarded, {} woken",
            port,
            removed.name(),
            discarded,
            woken
        );
        Ok(())
    }

    pub fn port_lookup(&self, name: &str) -> IpcResult<PortId> {
        let name = port_name(name).map_err(|_| IpcError::NotFound)?;
        self.ports.lock().lookup(&name).ok_or(IpcError::NotFound)
    }

    pub fn port_send(
        &self,
        caller: Pid,
        port: PortId,
        msg: Message,
        timeout: Timeout,
    ) -> IpcResult<MessageId> {
        let sender = self.caller(caller)?;
        let port = self.port(port)?;
        let now = self.scheduler.now();
        let deadline = timeout.deadline(now);
        let msg = self.stamp(&sender, port.owner, msg, now, deadline);
        self.deliver(&sender, &port.queue, msg, deadline)
    }

    /// Receive from a port. Only the owner may.
    pub fn port_receive(
        &self,
        caller: Pid,
        port: PortId,
        from: SenderFilter,
        timeout: Timeout,
    ) -> IpcResult<Message> {
        let receiver = self.caller(caller)?;
        let port = self.port(port)?;
        if port.owner != caller {
            return Err(IpcError::PermissionDenied);
        }
        let deadline = timeout.deadline(self.scheduler.now());
        self.await_message(&receiver, &port.queue, from.into(), deadline)
    }

    /// Resize a port's queue. Growing it lets blocked senders in.
    pub fn port_set_capacity(&self, caller: Pid, port: PortId, capacity: usize) -> IpcResult<()> {
        let port = self.port(port)?;
        if port.owner != caller {
            return Err(IpcError::PermissionDenied);
        }
        let mut q = port.queue.lock();
        let before = q.capacity();
        q.set_capacity(capacity)?;
        for _ in before..q.capacity() {
            self.wake_space_waiter(&q);
        }
        Ok(())
    }

    pub fn port_info(&self, port: PortId) -> IpcResult<PortInfo> {
        Ok(self.port(port)?.info())
    }

    pub fn live_ports(&self) -> usize {
        self.ports.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpcConfig;
    use crate::testing::{create_during_cleanup, spawn_blocked, system, system_with};

    fn payloads(ipc: &crate::testing::TestIpc, owner: Pid, port: PortId) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(m) = ipc.port_receive(owner, port, SenderFilter::Any, Timeout::NO_WAIT) {
            out.push(m.payload().to_vec());
        }
        out
    }

    #[test]
    fn test_urgent_overtakes_normal() {
        let ipc = system();
        ipc.process_init(Pid(1)).unwrap();
        ipc.process_init(Pid(2)).unwrap();
        let port = ipc.port_create(Pid(1), "svc.time").unwrap();
        assert_eq!(ipc.port_lookup("svc.time"), Ok(port));

        for tag in [b"n1", b"n2", b"n3"] {
            ipc.port_send(Pid(2), port, Message::new(tag).unwrap(), Timeout::NO_WAIT)
                .unwrap();
        }
        ipc.port_send(Pid(2), port, Message::urgent(b"u1").unwrap(), Timeout::NO_WAIT)
            .unwrap();

        assert_eq!(
            payloads(&ipc, Pid(1), port),
            [b"u1".to_vec(), b"n1".to_vec(), b"n2".to_vec(), b"n3".to_vec()]
        );
    }

    #[test]
    fn test_name_rules() {
        let ipc = system();
        ipc.process_init(Pid(1)).unwrap();
        assert_eq!(ipc.port_create(Pid(1), ""), Err(IpcError::InvalidArgument));
        let long = "x".repeat(MAX_PORT_NAME + 1);
        assert_eq!(ipc.port_create(Pid(1), &long), Err(IpcError::InvalidArgument));
        let exact = "y".repeat(MAX_PORT_NAME);
        ipc.port_create(Pid(1), &exact).unwrap();

        ipc.port_create(Pid(1), "dup").unwrap();
        assert_eq!(ipc.port_create(Pid(1), "dup"), Err(IpcError::AlreadyExists));
        assert_eq!(ipc.port_lookup("missing"), Err(IpcError::NotFound));
        assert_eq!(ipc.port_create(Pid(7), "ghost"), Err(IpcError::InvalidProcess));
    }

    #[test]
    fn test_port_limit() {
        let ipc = system_with(IpcConfig::new().with_max_ports(2));
        ipc.process_init(Pid(1)).unwrap();
        ipc.port_create(Pid(1), "a").unwrap();
        ipc.port_create(Pid(1), "b").unwrap();
        assert_eq!(ipc.port_create(Pid(1), "c"), Err(IpcError::OutOfMemory));
        assert_eq!(ipc.live_ports(), 2);
    }

    #[test]
    fn test_only_owner_receives_and_destroys() {
        let ipc = system();
        ipc.process_init(Pid(1)).unwrap();
        ipc.process_init(Pid(2)).unwrap();
        let port = ipc.port_create(Pid(1), "svc.fs").unwrap();
        assert_eq!(
            ipc.port_receive(Pid(2), port, SenderFilter::Any, Timeout::NO_WAIT),
            Err(IpcError::PermissionDenied)
        );
        assert_eq!(ipc.port_destroy(Pid(2), port), Err(IpcError::PermissionDenied));
        assert_eq!(ipc.port_set_capacity(Pid(2), port, 4), Err(IpcError::PermissionDenied));

        // The kernel may destroy any port
        ipc.port_destroy(Pid::KERNEL, port).unwrap();
        assert_eq!(ipc.port_destroy(Pid(1), port), Err(IpcError::InvalidPort));
        // Name is free again
        ipc.port_create(Pid(2), "svc.fs").unwrap();
    }

    #[test]
    fn test_destroy_discards_and_wakes_with_port_closed() {
        let ipc = system();
        ipc.process_init(Pid(1)).unwrap();
        ipc.process_init(Pid(2)).unwrap();
        let port = ipc.port_create(Pid(1), "svc.net").unwrap();

        let blocked = spawn_blocked(&ipc, move |ipc| {
            ipc.port_receive(Pid(1), port, SenderFilter::Any, Timeout::NO_TIMEOUT)
        });
        let handle = ipc.port(port).unwrap();
        assert_eq!(handle.name(), "svc.net");
        assert_eq!(handle.state(), QueueState::Listening);
        ipc.port_destroy(Pid(1), port).unwrap();
        assert_eq!(blocked.join().unwrap(), Err(IpcError::PortClosed));
        assert_eq!(handle.state(), QueueState::Closed);
        assert_eq!(
            ipc.port_send(Pid(2), port, Message::new(b"x").unwrap(), Timeout::NO_WAIT),
            Err(IpcError::InvalidPort)
        );
    }

    #[test]
    fn test_set_capacity_wakes_blocked_sender() {
        let ipc = system_with(IpcConfig::new().with_port_capacity(1));
        ipc.process_init(Pid(1)).unwrap();
        ipc.process_init(Pid(2)).unwrap();
        let port = ipc.port_create(Pid(1), "svc.log").unwrap();
        ipc.port_send(Pid(2), port, Message::new(b"1").unwrap(), Timeout::NO_WAIT)
            .unwrap();
        assert_eq!(
            ipc.port_send(Pid(2), port, Message::new(b"2").unwrap(), Timeout::NO_WAIT),
            Err(IpcError::BufferFull)
        );

        let blocked = spawn_blocked(&ipc, move |ipc| {
            ipc.port_send(Pid(2), port, Message::new(b"3").unwrap(), Timeout::NO_TIMEOUT)
        });
        assert_eq!(ipc.port_set_capacity(Pid(1), port, 0), Err(IpcError::InvalidArgument));
        ipc.port_set_capacity(Pid(1), port, 4).unwrap();
        assert!(blocked.join().unwrap().is_ok());

        let info = ipc.port_info(port).unwrap();
        assert_eq!(info.owner, Pid(1));
        assert_eq!(info.queue.count, 2);
        assert_eq!(info.queue.capacity, 4);
        assert_eq!(info.queue.dropped, 1);
    }

    #[test]
    fn test_create_racing_owner_cleanup_is_refused() {
        let ipc = system();
        ipc.process_init(Pid(1)).unwrap();
        let created = create_during_cleanup(
            &ipc,
            Pid(1),
            |ipc| ipc.ports.lock(),
            |ipc| ipc.port_create(Pid(1), "svc.race"),
        );
        assert_eq!(created, Err(IpcError::InvalidProcess));
        assert_eq!(ipc.live_ports(), 0);
        assert_eq!(ipc.port_lookup("svc.race"), Err(IpcError::NotFound));
    }
}
