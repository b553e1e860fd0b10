//! Domain notifications: circuit handoff and measurement results
//!
//! Both travel as ordinary non-blocking sends carrying a fixed little-endian
//! payload, tagged with the notification flag plus their domain flag.
//!
//! Circuit handoff (28 bytes):
//! ```text
//! 0   u64  circuit id
//! 8   u32  qubit count
//! 12  u32  gate count
//! 16  u32  shots
//! 20  u64  region holding the compiled circuit, 0 if inline
//! ```
//!
//! Measurement result (24 bytes):
//! ```text
//! 0   u64  circuit id
//! 8   u32  shot index
//! 12  u32  qubit count
//! 16  u64  outcome bits, qubit n in bit n
//! ```

use super::message::{Message, MessageFlags};
use super::{IpcError, IpcResult};
use crate::kern::sched_prim::Scheduler;
use crate::kern::timer::Timeout;
use crate::kern::vm::MemoryManager;
use crate::system::IpcSystem;
use crate::types::{MessageId, Pid, RegionId};

/// A compiled circuit handed from the scheduler to a device driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitHandoff {
    pub circuit_id: u64,
    pub qubit_count: u32,
    pub gate_count: u32,
    pub shots: u32,
    /// Shared region with the circuit body, for circuits too big to inline
    pub region: Option<RegionId>,
}

impl CircuitHandoff {
    pub const ENCODED_LEN: usize = 28;
    const FLAGS: MessageFlags = MessageFlags::NOTIFICATION.union(MessageFlags::CIRCUIT_HANDOFF);

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..8].copy_from_slice(&self.circuit_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.qubit_count.to_le_bytes());
        out[12..16].copy_from_slice(&self.gate_count.to_le_bytes());
        out[16..20].copy_from_slice(&self.shots.to_le_bytes());
        out[20..28].copy_from_slice(&self.region.map_or(0, |r| r.0).to_le_bytes());
        out
    }

    pub fn to_message(&self) -> IpcResult<Message> {
        Message::with_flags(Self::FLAGS, &self.encode())
    }

    pub fn from_message(msg: &Message) -> IpcResult<Self> {
        let bytes = fixed_payload(msg, MessageFlags::CIRCUIT_HANDOFF, Self::ENCODED_LEN)?;
        let region = le_u64(bytes, 20);
        Ok(Self {
            circuit_id: le_u64(bytes, 0),
            qubit_count: le_u32(bytes, 8),
            gate_count: le_u32(bytes, 12),
            shots: le_u32(bytes, 16),
            region: (region != 0).then_some(RegionId(region)),
        })
    }
}

/// Outcome of one shot of a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementResult {
    pub circuit_id: u64,
    pub shot: u32,
    pub qubit_count: u32,
    pub outcome: u64,
}

impl MeasurementResult {
    pub const ENCODED_LEN: usize = 24;
    const FLAGS: MessageFlags = MessageFlags::NOTIFICATION.union(MessageFlags::MEASUREMENT_RESULT);

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..8].copy_from_slice(&self.circuit_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.shot.to_le_bytes());
        out[12..16].copy_from_slice(&self.qubit_count.to_le_bytes());
        out[16..24].copy_from_slice(&self.outcome.to_le_bytes());
        out
    }

    pub fn to_message(&self) -> IpcResult<Message> {
        Message::with_flags(Self::FLAGS, &self.encode())
    }

    pub fn from_message(msg: &Message) -> IpcResult<Self> {
        let bytes = fixed_payload(msg, MessageFlags::MEASUREMENT_RESULT, Self::ENCODED_LEN)?;
        Ok(Self {
            circuit_id: le_u64(bytes, 0),
            shot: le_u32(bytes, 8),
            qubit_count: le_u32(bytes, 12),
            outcome: le_u64(bytes, 16),
        })
    }

    /// Value measured on `qubit`
    pub fn bit(&self, qubit: u32) -> Option<bool> {
        (qubit < self.qubit_count && qubit < 64).then(|| self.outcome & (1 << qubit) != 0)
    }
}

fn fixed_payload(msg: &Message, kind: MessageFlags, len: usize) -> IpcResult<&[u8]> {
    if !msg.flags().contains(MessageFlags::NOTIFICATION | kind) || msg.len() != len {
        return Err(IpcError::InvalidArgument);
    }
    Ok(msg.payload())
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn le_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

impl<S: Scheduler, M: MemoryManager> IpcSystem<S, M> {
    pub fn notify_circuit_handoff(
        &self,
        caller: Pid,
        receiver: Pid,
        handoff: &CircuitHandoff,
    ) -> IpcResult<MessageId> {
        self.send(caller, receiver, handoff.to_message()?, Timeout::NO_WAIT)
    }

    pub fn notify_measurement_result(
        &self,
        caller: Pid,
        receiver: Pid,
        result: &MeasurementResult,
    ) -> IpcResult<MessageId> {
        self.send(caller, receiver, result.to_message()?, Timeout::NO_WAIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::mqueue::SenderFilter;
    use crate::testing::system;

    #[test]
    fn test_handoff_layout() {
        let handoff = CircuitHandoff {
            circuit_id: 0x0102_0304_0506_0708,
            qubit_count: 5,
            gate_count: 40,
            shots: 1000,
            region: Some(RegionId(3)),
        };
        let bytes = handoff.encode();
        assert_eq!(&bytes[0..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[8..12], &[5, 0, 0, 0]);
        assert_eq!(&bytes[20..28], &[3, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_notifications_delivered_without_blocking() {
        let ipc = system();
        ipc.process_init(Pid(1)).unwrap();
        ipc.process_init(Pid(2)).unwrap();

        let handoff = CircuitHandoff {
            circuit_id: 42,
            qubit_count: 3,
            gate_count: 12,
            shots: 100,
            region: None,
        };
        ipc.notify_circuit_handoff(Pid(1), Pid(2), &handoff).unwrap();
        let result = MeasurementResult {
            circuit_id: 42,
            shot: 7,
            qubit_count: 3,
            outcome: 0b101,
        };
        ipc.notify_measurement_result(Pid::KERNEL, Pid(2), &result)
            .unwrap();

        let first = ipc.receive(Pid(2), SenderFilter::Any, Timeout::NO_WAIT).unwrap();
        assert!(first.flags().contains(MessageFlags::NOTIFICATION));
        assert_eq!(CircuitHandoff::from_message(&first), Ok(handoff));
        assert_eq!(
            MeasurementResult::from_message(&first),
            Err(IpcError::InvalidArgument)
        );

        let second = ipc.receive(Pid(2), SenderFilter::Any, Timeout::NO_WAIT).unwrap();
        assert_eq!(second.sender(), Pid::KERNEL);
        let decoded = MeasurementResult::from_message(&second).unwrap();
        assert_eq!(decoded, result);
        assert_eq!(decoded.bit(0), Some(true));
        assert_eq!(decoded.bit(1), Some(false));
        assert_eq!(decoded.bit(3), None);
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let msg = Message::with_flags(
            MessageFlags::NOTIFICATION | MessageFlags::CIRCUIT_HANDOFF,
            &[0u8; 5],
        )
        .unwrap();
        assert_eq!(CircuitHandoff::from_message(&msg), Err(IpcError::InvalidArgument));
    }

    #[test]
    fn test_notify_full_queue_fails_fast() {
        let ipc = system();
        ipc.process_init(Pid(1)).unwrap();
        let capacity = ipc.queue_info(Pid(1)).unwrap().capacity;
        let result = MeasurementResult {
            circuit_id: 1,
            shot: 0,
            qubit_count: 1,
            outcome: 1,
        };
        for _ in 0..capacity {
            ipc.notify_measurement_result(Pid::KERNEL, Pid(1), &result)
                .unwrap();
        }
        assert_eq!(
            ipc.notify_measurement_result(Pid::KERNEL, Pid(1), &result),
            Err(IpcError::BufferFull)
        );
    }
}
