//! Memory subsystem interface consumed by the shared-region code
//!
//! The IPC core never touches a physical or virtual address directly. Frames
//! are named by opaque [`FrameRange`] handles issued by the memory
//! subsystem, and mappings by the [`VirtAddr`] value it returns.

use alloc::sync::Arc;
use bitflags::bitflags;

use crate::ipc::IpcError;
use crate::types::Pid;

bitflags! {
    /// Memory protection flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VmProt: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl VmProt {
    /// Read/write, the usual data-sharing grant
    pub const DEFAULT: Self = Self::READ.union(Self::WRITE);

    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn can_execute(&self) -> bool {
        self.contains(Self::EXECUTE)
    }
}

/// Opaque handle to the first frame of a contiguous physical allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameHandle(pub u64);

/// A contiguous run of physical frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRange {
    pub start: FrameHandle,
    pub count: usize,
}

/// Virtual address of a mapping in some process, as returned by the
/// memory subsystem. Only meaningful to that subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub u64);

/// Failures reported by the memory subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    OutOfFrames,
    AddressSpaceFull,
    NoSuchMapping,
    InvalidRange,
}

impl From<MemoryError> for IpcError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::OutOfFrames | MemoryError::AddressSpaceFull => IpcError::OutOfMemory,
            MemoryError::NoSuchMapping => IpcError::NotFound,
            MemoryError::InvalidRange => IpcError::InvalidArgument,
        }
    }
}

/// Frame allocation and address-space mapping capability
pub trait MemoryManager: Send + Sync {
    fn allocate_frames(&self, count: usize) -> Result<FrameRange, MemoryError>;

    fn free_frames(&self, range: FrameRange);

    /// Map `range` into `pid`'s address space. The mapping must enforce
    /// `prot` in hardware; the IPC core passes exactly the granted subset.
    fn map_into_address_space(
        &self,
        pid: Pid,
        range: FrameRange,
        prot: VmProt,
    ) -> Result<VirtAddr, MemoryError>;

    fn unmap_from_address_space(&self, pid: Pid, addr: VirtAddr) -> Result<(), MemoryError>;
}

impl<T: MemoryManager + ?Sized> MemoryManager for Arc<T> {
    fn allocate_frames(&self, count: usize) -> Result<FrameRange, MemoryError> {
        (**self).allocate_frames(count)
    }

    fn free_frames(&self, range: FrameRange) {
        (**self).free_frames(range)
    }

    fn map_into_address_space(
        &self,
        pid: Pid,
        range: FrameRange,
        prot: VmProt,
    ) -> Result<VirtAddr, MemoryError> {
        (**self).map_into_address_space(pid, range, prot)
    }

    fn unmap_from_address_space(&self, pid: Pid, addr: VirtAddr) -> Result<(), MemoryError> {
        (**self).unmap_from_address_space(pid, addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vmprot_subset() {
        let rw = VmProt::DEFAULT;
        assert!(rw.contains(VmProt::READ));
        assert!(rw.can_write());
        assert!(!rw.can_execute());
        assert!(VmProt::all().contains(rw));
        assert!(!VmProt::READ.contains(rw));
    }

    #[test]
    fn test_memory_error_mapping() {
        assert_eq!(IpcError::from(MemoryError::OutOfFrames), IpcError::OutOfMemory);
        assert_eq!(IpcError::from(MemoryError::InvalidRange), IpcError::InvalidArgument);
    }
}
