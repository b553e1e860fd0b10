//! Zero-copy shared memory regions
//!
//! A region is a page-rounded run of frames owned by one process. The owner
//! grants other processes (or itself) a subset of the region's permissions;
//! a grantee then maps the frames into its own address space with exactly
//! the granted permissions. The region lives until its owner destroys it
//! after every grant is gone, or until the owner exits.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use log::{debug, warn};

use super::{IpcError, IpcResult};
use crate::kern::sched_prim::Scheduler;
use crate::kern::vm::{FrameRange, MemoryManager, VirtAddr, VmProt};
use crate::system::IpcSystem;
use crate::types::{Pid, RegionId};

// ============================================================================
// Region and Grant
// ============================================================================

/// Access of one grantee to a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionGrant {
    pub grantee: Pid,
    pub prot: VmProt,
    /// Where the grantee has the region mapped, if it does
    pub mapped_at: Option<VirtAddr>,
}

impl RegionGrant {
    pub fn is_mapped(&self) -> bool {
        self.mapped_at.is_some()
    }
}

/// A shared memory object
#[derive(Debug)]
pub struct SharedRegion {
    id: RegionId,
    owner: Pid,
    frames: FrameRange,
    size: usize,
    prot: VmProt,
    grants: BTreeMap<Pid, RegionGrant>,
}

impl SharedRegion {
    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn owner(&self) -> Pid {
        self.owner
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of live grants
    pub fn ref_count(&self) -> usize {
        self.grants.len()
    }

    pub fn grant(&self, grantee: Pid) -> Option<&RegionGrant> {
        self.grants.get(&grantee)
    }

    pub fn info(&self) -> RegionInfo {
        RegionInfo {
            id: self.id,
            owner: self.owner,
            size: self.size,
            prot: self.prot,
            ref_count: self.ref_count(),
            mapped: self.grants.values().filter(|g| g.is_mapped()).count(),
        }
    }
}

/// Snapshot of a region for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    pub id: RegionId,
    pub owner: Pid,
    pub size: usize,
    pub prot: VmProt,
    pub ref_count: usize,
    pub mapped: usize,
}

/// Live regions
#[derive(Debug, Default)]
pub struct RegionTable {
    regions: BTreeMap<RegionId, SharedRegion>,
}

impl RegionTable {
    pub const fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    fn get_mut(&mut self, id: RegionId) -> IpcResult<&mut SharedRegion> {
        self.regions.get_mut(&id).ok_or(IpcError::InvalidRegion)
    }

    /// Region `id`, provided `caller` owns it
    fn owned_mut(&mut self, id: RegionId, caller: Pid) -> IpcResult<&mut SharedRegion> {
        let region = self.get_mut(id)?;
        if region.owner != caller {
            return Err(IpcError::PermissionDenied);
        }
        Ok(region)
    }
}

// ============================================================================
// Shared Memory Operations
// ============================================================================

impl<S: Scheduler, M: MemoryManager> IpcSystem<S, M> {
    /// Allocate a region of at least `size` bytes owned by `caller`
    pub fn share_create(&self, caller: Pid, size: usize) -> IpcResult<RegionId> {
        let owner = self.caller(caller)?;
        if size == 0 {
            return Err(IpcError::InvalidArgument);
        }
        let size = self
            .config
            .round_to_pages(size)
            .ok_or(IpcError::InvalidArgument)?;

        let mut regions = self.regions.lock();
        if !owner.is_alive() {
            return Err(IpcError::InvalidProcess);
        }
        if regions.len() >= self.config.max_regions {
            return Err(IpcError::OutOfMemory);
        }
        let frames = self.memory.allocate_frames(size / self.config.page_size)?;
        let id = self.ids.region();
        regions.regions.insert(
            id,
            SharedRegion {
                id,
                owner: caller,
                frames,
                size,
                prot: VmProt::all(),
                grants: BTreeMap::new(),
            },
        );
        drop(regions);

        debug!("ipc: {} created region {:?}, {} bytes", caller, id, size);
        Ok(id)
    }

    /// Give `grantee` access to a region with permissions `prot`
    pub fn share_grant(
        &self,
        caller: Pid,
        region: RegionId,
        grantee: Pid,
        prot: VmProt,
    ) -> IpcResult<()> {
        if prot.is_empty() {
            return Err(IpcError::InvalidArgument);
        }
        let mut regions = self.regions.lock();
        let target = regions.owned_mut(region, caller)?;
        if !target.prot.contains(prot) {
            return Err(IpcError::PermissionDenied);
        }
        if !self.is_registered(grantee) {
            return Err(IpcError::InvalidProcess);
        }
        if target.grants.contains_key(&grantee) {
            return Err(IpcError::AlreadyExists);
        }
        target.grants.insert(
            grantee,
            RegionGrant {
                grantee,
                prot,
                mapped_at: None,
            },
        );
        debug!("ipc: region {:?} granted to {} as {:?}", region, grantee, prot);
        Ok(())
    }

    /// Map a granted region into the caller's address space
    pub fn share_map(&self, caller: Pid, region: RegionId) -> IpcResult<VirtAddr> {
        let mut regions = self.regions.lock();
        let target = regions.get_mut(region)?;
        let frames = target.frames;
        let grant = target
            .grants
            .get_mut(&caller)
            .ok_or(IpcError::PermissionDenied)?;
        if grant.is_mapped() {
            return Err(IpcError::AlreadyExists);
        }
        let addr = self
            .memory
            .map_into_address_space(caller, frames, grant.prot)?;
        grant.mapped_at = Some(addr);
        Ok(addr)
    }

    /// Remove the caller's mapping. The grant stays.
    pub fn share_unmap(&self, caller: Pid, region: RegionId) -> IpcResult<()> {
        let mut regions = self.regions.lock();
        let grant = regions
            .get_mut(region)?
            .grants
            .get_mut(&caller)
            .ok_or(IpcError::PermissionDenied)?;
        let addr = grant.mapped_at.ok_or(IpcError::NotFound)?;
        self.memory.unmap_from_address_space(caller, addr)?;
        grant.mapped_at = None;
        Ok(())
    }

    /// Withdraw `grantee`'s access, unmapping it if needed
    pub fn share_revoke(&self, caller: Pid, region: RegionId, grantee: Pid) -> IpcResult<()> {
        let mut regions = self.regions.lock();
        let target = regions.owned_mut(region, caller)?;
        let grant = target.grants.remove(&grantee).ok_or(IpcError::NotFound)?;
        self.drop_mapping(region, &grant);
        debug!("ipc: region {:?} revoked from {}", region, grantee);
        Ok(())
    }

    /// Free a region. Refused while any grant is live.
    pub fn share_destroy(&self, caller: Pid, region: RegionId) -> IpcResult<()> {
        let mut regions = self.regions.lock();
        let target = regions.owned_mut(region, caller)?;
        if target.ref_count() > 0 {
            return Err(IpcError::RegionBusy);
        }
        let frames = target.frames;
        regions.regions.remove(&region);
        drop(regions);
        self.memory.free_frames(frames);
        debug!("ipc: region {:?} destroyed", region);
        Ok(())
    }

    pub fn share_info(&self, region: RegionId) -> IpcResult<RegionInfo> {
        let mut regions = self.regions.lock();
        Ok(regions.get_mut(region)?.info())
    }

    fn drop_mapping(&self, region: RegionId, grant: &RegionGrant) {
        if let Some(addr) = grant.mapped_at {
            if let Err(err) = self.memory.unmap_from_address_space(grant.grantee, addr) {
                warn!(
                    "ipc: unmapping region {:?} from {} failed: {:?}",
                    region, grant.grantee, err
                );
            }
        }
    }

    /// Process teardown: destroy the regions `pid` owns and the grants it
    /// holds elsewhere. Returns (regions, grants) released.
    pub(crate) fn release_regions_of(&self, pid: Pid) -> (usize, usize) {
        let mut regions = self.regions.lock();
        let mut grants = 0;

        let owned: Vec<RegionId> = regions
            .regions
            .values()
            .filter(|r| r.owner == pid)
            .map(|r| r.id)
            .collect();
        for id in &owned {
            if let Some(region) = regions.regions.remove(id) {
                for grant in region.grants.values() {
                    self.drop_mapping(*id, grant);
                }
                grants += region.grants.len();
                self.memory.free_frames(region.frames);
            }
        }

        for region in regions.regions.values_mut() {
            if let Some(grant) = region.grants.remove(&pid) {
                self.drop_mapping(region.id, &grant);
                grants += 1;
            }
        }

        (owned.len(), grants)
    }
}
