//! Synchronous request/response
//!
//! A call is a send followed by a receive of the matching reply, both
//! bounded by one absolute deadline computed at entry. The request id is
//! reserved on the caller's queue before the request leaves, so the reply
//! is invisible to every other receive on that queue and can only satisfy
//! this call.

use log::debug;

use super::message::Message;
use super::mqueue::{ReceiveFilter, SharedQueue};
use super::process::ProcessIpc;
use super::{IpcError, IpcResult};
use crate::kern::sched_prim::Scheduler;
use crate::kern::timer::{Deadline, Timeout};
use crate::kern::vm::MemoryManager;
use crate::system::IpcSystem;
use crate::types::{Pid, PortId};

impl<S: Scheduler, M: MemoryManager> IpcSystem<S, M> {
    /// Send `request` to `receiver` and wait for its reply
    pub fn call(
        &self,
        caller: Pid,
        receiver: Pid,
        request: Message,
        timeout: Timeout,
    ) -> IpcResult<Message> {
        let client = self.caller(caller)?;
        let server = self.process(receiver).ok_or(IpcError::InvalidReceiver)?;
        let now = self.scheduler.now();
        let deadline = timeout.deadline(now);
        let request = self.stamp(&client, receiver, request, now, deadline);
        self.transact(&client, server.queue(), receiver, request, deadline)
    }

    /// Send `request` to a port and wait for the port owner's reply
    pub fn port_call(
        &self,
        caller: Pid,
        port: PortId,
        request: Message,
        timeout: Timeout,
    ) -> IpcResult<Message> {
        let client = self.caller(caller)?;
        let port = self.port(port)?;
        let now = self.scheduler.now();
        let deadline = timeout.deadline(now);
        let request = self.stamp(&client, port.owner(), request, now, deadline);
        self.transact(&client, port.queue(), port.owner(), request, deadline)
    }

    fn transact(
        &self,
        client: &ProcessIpc,
        target: &SharedQueue,
        replier: Pid,
        request: Message,
        deadline: Option<Deadline>,
    ) -> IpcResult<Message> {
        let id = request.id();
        {
            let mut own = client.queue().lock();
            own.ensure_open()?;
            own.reserve_reply(id);
        }

        let result = self
            .deliver(client, target, request, deadline)
            .and_then(|_| {
                self.await_message(client, client.queue(), ReceiveFilter::reply(replier, id), deadline)
            })
            .map_err(|err| match (err, deadline) {
                (IpcError::NoMessage, None) => IpcError::Timeout,
                (err, _) => err,
            });

        client.queue().lock().release_reply(id);
        if let Err(err) = result {
            debug!("ipc: call {} -> {} id={} failed: {}", client.pid(), replier, id.0, err);
        }
        result
    }
}
