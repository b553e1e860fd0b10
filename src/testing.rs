//! Host-side collaborators for unit tests
//!
//! [`TestScheduler`] maps every OS thread to one execution context and
//! parks it on a condvar; ticks are milliseconds since the scheduler was
//! created. [`TestMemory`] keeps frames as byte vectors and checks every
//! access through a mapping against the mapping's protection.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{IpcConfig, PAGE_SIZE};
use crate::kern::sched_prim::{Scheduler, WakeReason};
use crate::kern::timer::{Deadline, Ticks};
use crate::kern::vm::{FrameHandle, FrameRange, MemoryError, MemoryManager, VirtAddr, VmProt};
use crate::system::IpcSystem;
use crate::types::{ContextId, Pid};

pub type TestIpc = IpcSystem<TestScheduler, TestMemory>;

pub fn system() -> Arc<TestIpc> {
    system_with(IpcConfig::new())
}

pub fn system_with(config: IpcConfig) -> Arc<TestIpc> {
    Arc::new(IpcSystem::new(config, TestScheduler::new(), TestMemory::new()))
}

/// Run `op` on a new thread and return once it is suspended (or done).
pub fn spawn_blocked<T, F>(ipc: &Arc<TestIpc>, op: F) -> JoinHandle<T>
where
    F: FnOnce(&TestIpc) -> T + Send + 'static,
    T: Send + 'static,
{
    let before = ipc.scheduler().suspended_count();
    let handle = {
        let ipc = Arc::clone(ipc);
        thread::spawn(move || op(&*ipc))
    };
    let start = Instant::now();
    while ipc.scheduler().suspended_count() <= before && !handle.is_finished() {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "operation never blocked"
        );
        thread::sleep(Duration::from_millis(1));
    }
    handle
}

/// Run a create operation `op` for `pid` so that it resolves the live
/// process, then has to wait for the table lock taken by `hold` while
/// `process_cleanup(pid)` marks the process dead. The lock is released
/// only after that, and the result of `op` is returned.
pub fn create_during_cleanup<'a, G, T, H, F>(ipc: &'a Arc<TestIpc>, pid: Pid, hold: H, op: F) -> T
where
    H: FnOnce(&'a TestIpc) -> G,
    F: FnOnce(&TestIpc) -> T + Send + 'static,
    T: Send + 'static,
{
    let state = ipc.process(pid).expect("live process");
    let guard = hold(&**ipc);
    let creator = {
        let ipc = Arc::clone(ipc);
        thread::spawn(move || op(&*ipc))
    };
    // Let the creator get past its process lookup
    thread::sleep(Duration::from_millis(50));
    let cleaner = {
        let ipc = Arc::clone(ipc);
        thread::spawn(move || ipc.process_cleanup(pid))
    };
    let start = Instant::now();
    while state.is_alive() {
        assert!(start.elapsed() < Duration::from_secs(5), "cleanup never started");
        thread::yield_now();
    }
    drop(guard);
    cleaner.join().unwrap();
    creator.join().unwrap()
}

// ============================================================================
// Scheduler
// ============================================================================

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CONTEXT: Cell<Option<ContextId>> = const { Cell::new(None) };
}

#[derive(Default)]
struct Parking {
    /// Wakes delivered and not yet consumed by a suspend
    permits: BTreeMap<ContextId, WakeReason>,
    suspended: BTreeSet<ContextId>,
}

pub struct TestScheduler {
    epoch: Instant,
    parking: Mutex<Parking>,
    wakeup: Condvar,
}

impl TestScheduler {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            parking: Mutex::new(Parking::default()),
            wakeup: Condvar::new(),
        }
    }

    pub fn suspended_count(&self) -> usize {
        self.parking.lock().unwrap().suspended.len()
    }

    pub fn blocked_contexts(&self) -> Vec<ContextId> {
        self.parking.lock().unwrap().suspended.iter().copied().collect()
    }
}

impl Scheduler for TestScheduler {
    fn now(&self) -> Ticks {
        self.epoch.elapsed().as_millis() as Ticks
    }

    fn current_context(&self) -> ContextId {
        CONTEXT.with(|slot| match slot.get() {
            Some(id) => id,
            None => {
                let id = ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed));
                slot.set(Some(id));
                id
            }
        })
    }

    fn suspend_current(&self, deadline: Deadline) -> WakeReason {
        let me = self.current_context();
        let mut parking = self.parking.lock().unwrap();
        parking.suspended.insert(me);
        let reason = loop {
            if let Some(reason) = parking.permits.remove(&me) {
                break reason;
            }
            match deadline {
                Deadline::Never => parking = self.wakeup.wait(parking).unwrap(),
                Deadline::At(t) => {
                    let now = self.now();
                    if now >= t {
                        break WakeReason::TimedOut;
                    }
                    let wait = Duration::from_millis(t - now);
                    parking = self.wakeup.wait_timeout(parking, wait).unwrap().0;
                }
            }
        };
        parking.suspended.remove(&me);
        reason
    }

    fn wake(&self, context: ContextId, reason: WakeReason) {
        self.parking.lock().unwrap().permits.insert(context, reason);
        self.wakeup.notify_all();
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Fault raised by an access through a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFault {
    Unmapped,
    Protection,
    OutOfBounds,
}

struct Mapping {
    range: FrameRange,
    prot: VmProt,
}

#[derive(Default)]
struct MemoryState {
    next_frame: u64,
    next_addr: u64,
    in_use: usize,
    budget: Option<usize>,
    frames: BTreeMap<FrameHandle, Vec<u8>>,
    mappings: BTreeMap<(Pid, VirtAddr), Mapping>,
}

pub struct TestMemory {
    state: Mutex<MemoryState>,
}

impl TestMemory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_addr: 0x1000_0000,
                ..MemoryState::default()
            }),
        }
    }

    /// Cap the number of frames that may be allocated at once
    pub fn set_frame_budget(&self, frames: usize) {
        self.state.lock().unwrap().budget = Some(frames);
    }

    pub fn frames_in_use(&self) -> usize {
        self.state.lock().unwrap().in_use
    }

    pub fn mapping_count(&self) -> usize {
        self.state.lock().unwrap().mappings.len()
    }

    pub fn read(&self, pid: Pid, addr: VirtAddr, offset: usize, buf: &mut [u8]) -> Result<(), MemoryFault> {
        let state = self.state.lock().unwrap();
        let mapping = state.mappings.get(&(pid, addr)).ok_or(MemoryFault::Unmapped)?;
        if !mapping.prot.can_read() {
            return Err(MemoryFault::Protection);
        }
        let bytes = state.frames.get(&mapping.range.start).ok_or(MemoryFault::Unmapped)?;
        let end = offset.checked_add(buf.len()).ok_or(MemoryFault::OutOfBounds)?;
        let src = bytes.get(offset..end).ok_or(MemoryFault::OutOfBounds)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    pub fn write(&self, pid: Pid, addr: VirtAddr, offset: usize, data: &[u8]) -> Result<(), MemoryFault> {
        let mut state = self.state.lock().unwrap();
        let (start, prot) = {
            let mapping = state.mappings.get(&(pid, addr)).ok_or(MemoryFault::Unmapped)?;
            (mapping.range.start, mapping.prot)
        };
        if !prot.can_write() {
            return Err(MemoryFault::Protection);
        }
        let bytes = state.frames.get_mut(&start).ok_or(MemoryFault::Unmapped)?;
        let end = offset.checked_add(data.len()).ok_or(MemoryFault::OutOfBounds)?;
        let dst = bytes.get_mut(offset..end).ok_or(MemoryFault::OutOfBounds)?;
        dst.copy_from_slice(data);
        Ok(())
    }
}

impl MemoryManager for TestMemory {
    fn allocate_frames(&self, count: usize) -> Result<FrameRange, MemoryError> {
        if count == 0 {
            return Err(MemoryError::InvalidRange);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(budget) = state.budget {
            if state.in_use + count > budget {
                return Err(MemoryError::OutOfFrames);
            }
        }
        let start = FrameHandle(state.next_frame);
        state.next_frame += count as u64;
        state.in_use += count;
        state.frames.insert(start, vec![0u8; count * PAGE_SIZE]);
        Ok(FrameRange { start, count })
    }

    fn free_frames(&self, range: FrameRange) {
        let mut state = self.state.lock().unwrap();
        if state.frames.remove(&range.start).is_some() {
            state.in_use -= range.count;
        }
    }

    fn map_into_address_space(
        &self,
        pid: Pid,
        range: FrameRange,
        prot: VmProt,
    ) -> Result<VirtAddr, MemoryError> {
        let mut state = self.state.lock().unwrap();
        if !state.frames.contains_key(&range.start) {
            return Err(MemoryError::InvalidRange);
        }
        let addr = VirtAddr(state.next_addr);
        state.next_addr += ((range.count + 1) * PAGE_SIZE) as u64;
        state.mappings.insert((pid, addr), Mapping { range, prot });
        Ok(addr)
    }

    fn unmap_from_address_space(&self, pid: Pid, addr: VirtAddr) -> Result<(), MemoryError> {
        self.state
            .lock()
            .unwrap()
            .mappings
            .remove(&(pid, addr))
            .map(|_| ())
            .ok_or(MemoryError::NoSuchMapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permit_before_suspend() {
        let sched = TestScheduler::new();
        let me = sched.current_context();
        sched.wake(me, WakeReason::Notified);
        assert_eq!(sched.suspend_current(Deadline::Never), WakeReason::Notified);
        assert_eq!(sched.suspend_current(Deadline::At(0)), WakeReason::TimedOut);
    }

    #[test]
    fn test_contexts_per_thread() {
        let sched = Arc::new(TestScheduler::new());
        let here = sched.current_context();
        assert_eq!(sched.current_context(), here);
        let there = {
            let sched = Arc::clone(&sched);
            thread::spawn(move || sched.current_context()).join().unwrap()
        };
        assert_ne!(here, there);
    }

    #[test]
    fn test_memory_faults() {
        let mem = TestMemory::new();
        let range = mem.allocate_frames(1).unwrap();
        let addr = mem.map_into_address_space(Pid(1), range, VmProt::READ).unwrap();
        assert_eq!(mem.write(Pid(1), addr, 0, b"x"), Err(MemoryFault::Protection));
        assert_eq!(mem.read(Pid(2), addr, 0, &mut [0u8; 1]), Err(MemoryFault::Unmapped));
        assert_eq!(
            mem.read(Pid(1), addr, PAGE_SIZE, &mut [0u8; 1]),
            Err(MemoryFault::OutOfBounds)
        );
        mem.unmap_from_address_space(Pid(1), addr).unwrap();
        mem.free_frames(range);
        assert_eq!(mem.frames_in_use(), 0);
    }
}
