//! Message transport - the send/receive loops every IPC flavor is built on
//!
//! [`IpcSystem::deliver`] and [`IpcSystem::await_message`] work on any
//! queue. Process, port and channel operations only differ in which queue
//! they resolve and who is allowed to touch it.
//!
//! Blocking follows one pattern on both sides: the check that fails and the
//! waiter registration happen under the same queue lock, the lock is
//! dropped, the context suspends, and on wake it re-takes the lock and
//! retries before looking at the clock. A message that races the deadline
//! is therefore delivered, not reported as a timeout.

use log::{trace, warn};

use super::message::{Message, MessageFlags, MessageHeader};
use super::mqueue::{ReceiveFilter, SenderFilter, SharedQueue};
use super::process::ProcessIpc;
use super::waiter::Waiter;
use super::{IpcError, IpcResult};
use crate::kern::sched_prim::{Scheduler, WakeReason};
use crate::kern::timer::{Deadline, Ticks, Timeout};
use crate::kern::vm::MemoryManager;
use crate::system::IpcSystem;
use crate::types::{MessageId, Pid};

impl<S: Scheduler, M: MemoryManager> IpcSystem<S, M> {
    // ========================================================================
    // Core Loops
    // ========================================================================

    /// Fill in the transport header of an outgoing message
    pub(crate) fn stamp(
        &self,
        sender: &ProcessIpc,
        receiver: Pid,
        mut msg: Message,
        now: Ticks,
        deadline: Option<Deadline>,
    ) -> Message {
        msg.stamp(sender.pid(), receiver, sender.next_message_id(), now, deadline);
        msg
    }

    /// Enqueue `msg` on `queue`, blocking for space until `deadline`.
    ///
    /// `None` as deadline means deliver-or-fail.
    pub(crate) fn deliver(
        &self,
        sender: &ProcessIpc,
        queue: &SharedQueue,
        mut msg: Message,
        deadline: Option<Deadline>,
    ) -> IpcResult<MessageId> {
        let header = *msg.header();
        let len = msg.len();
        loop {
            if !sender.is_alive() {
                return Err(IpcError::ProcessTerminated);
            }
            let mut q = queue.lock();
            q.ensure_open()?;

            match q.try_enqueue(msg) {
                Ok(()) => {
                    let woken =
                        self.waiters
                            .lock()
                            .take_receiver(q.id(), &header, |f, h| q.accepts(f, h));
                    if let Some(waiter) = woken {
                        self.scheduler.wake(waiter.context, WakeReason::Notified);
                    }
                    drop(q);
                    sender.stats().record_sent();
                    trace!(
                        "ipc: {} -> {} id={} len={} flags={:?}",
                        header.sender,
                        header.receiver,
                        header.id.0,
                        len,
                        header.flags
                    );
                    return Ok(header.id);
                }
                Err(back) => msg = back,
            }

            let now = self.scheduler.now();
            let deadline = match deadline {
                Some(d) if !d.has_passed(now) => d,
                _ => {
                    q.record_drop();
                    sender.stats().record_dropped();
                    warn!(
                        "ipc: dropped {} -> {} id={}, queue full",
                        header.sender, header.receiver, header.id.0
                    );
                    return Err(if deadline.is_none() {
                        IpcError::BufferFull
                    } else {
                        IpcError::Timeout
                    });
                }
            };

            let context = self.scheduler.current_context();
            self.park(sender, Waiter::space(context, sender.pid(), q.id(), deadline))?;
            drop(q);

            let reason = self.scheduler.suspend_current(deadline);
            self.unpark(context);
            if reason == WakeReason::Cancelled {
                queue.lock().record_drop();
                sender.stats().record_dropped();
                return Err(IpcError::Interrupted);
            }
        }
    }

    /// Dequeue the first message on `queue` accepted by `filter`, blocking
    /// until `deadline`.
    ///
    /// `None` as deadline means "only what is already queued".
    pub(crate) fn await_message(
        &self,
        receiver: &ProcessIpc,
        queue: &SharedQueue,
        filter: ReceiveFilter,
        deadline: Option<Deadline>,
    ) -> IpcResult<Message> {
        let mut cancelled = false;
        loop {
            let mut q = queue.lock();
            if let Some(msg) = q.dequeue_matching(&filter) {
                self.wake_space_waiter(&q);
                drop(q);
                receiver.note_request(msg.header());
                receiver.stats().record_received();
                trace!(
                    "ipc: {} received id={} from {}",
                    receiver.pid(),
                    msg.id().0,
                    msg.sender()
                );
                return Ok(msg);
            }
            q.ensure_open()?;
            if !receiver.is_alive() {
                return Err(IpcError::ProcessTerminated);
            }
            if cancelled {
                return Err(IpcError::Interrupted);
            }
            let Some(deadline) = deadline else {
                return Err(IpcError::NoMessage);
            };
            if deadline.has_passed(self.scheduler.now()) {
                return Err(IpcError::Timeout);
            }

            let context = self.scheduler.current_context();
            self.park(
                receiver,
                Waiter::receive(context, receiver.pid(), q.id(), filter, deadline),
            )?;
            q.add_listener();
            drop(q);

            let reason = self.scheduler.suspend_current(deadline);

            let mut q = queue.lock();
            q.remove_listener();
            self.unpark(context);
            drop(q);
            cancelled = reason == WakeReason::Cancelled;
        }
    }

    // ========================================================================
    // Process-Addressed Messaging
    // ========================================================================

    /// Send `msg` to the private queue of `receiver`. Returns the id the
    /// message was stamped with.
    pub fn send(
        &self,
        caller: Pid,
        receiver: Pid,
        msg: Message,
        timeout: Timeout,
    ) -> IpcResult<MessageId> {
        let sender = self.caller(caller)?;
        let target = self.process(receiver).ok_or(IpcError::InvalidReceiver)?;
        let now = self.scheduler.now();
        let deadline = timeout.deadline(now);
        let msg = self.stamp(&sender, receiver, msg, now, deadline);
        self.deliver(&sender, target.queue(), msg, deadline)
    }

    /// Receive from the caller's private queue
    pub fn receive(&self, caller: Pid, from: SenderFilter, timeout: Timeout) -> IpcResult<Message> {
        let state = self.caller(caller)?;
        let deadline = timeout.deadline(self.scheduler.now());
        self.await_message(&state, state.queue(), from.into(), deadline)
    }

    /// Answer `original`, a request the caller received and has not yet
    /// answered. Never blocks: a full destination fails with
    /// [`IpcError::BufferFull`] and the request stays answerable.
    pub fn reply(
        &self,
        caller: Pid,
        original: &MessageHeader,
        mut reply: Message,
    ) -> IpcResult<MessageId> {
        if original.id.is_none() {
            return Err(IpcError::InvalidArgument);
        }
        if original.receiver != caller {
            return Err(IpcError::PermissionDenied);
        }
        let state = self.caller(caller)?;
        if !state.take_request(original.sender, original.id) {
            return Err(IpcError::NotFound);
        }
        reply.set_reply_to(original.id);
        reply.add_flags(MessageFlags::REPLY);
        let result = self.send(caller, original.sender, reply, Timeout::NO_WAIT);
        if result == Err(IpcError::BufferFull) {
            state.note_request(original);
        }
        result
    }
}
