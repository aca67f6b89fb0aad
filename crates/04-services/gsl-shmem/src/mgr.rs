use std::collections::HashMap;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::config::{frame_align, BIN0_SCRATCH_BYTES, DEDICATED_PAGE_THRESHOLD_BYTES};
use crate::error::{ShmemError, ShmemResult};
use crate::page::ShmemPage;
use crate::provider::{ShmemFlags, ShmemProvider};

const BIN_SCRATCH_PREALLOC: usize = 0;
const BIN_SCRATCH_GROWTH: usize = 1;
const BIN_DEDICATED: usize = 2;
const NUM_BINS: usize = 3;

/// Maps a newly allocated page into one or more SPF subsystems and tears
/// the mapping back down, the narrow slice of the GPR transport facade (D)
/// the allocator needs; kept as a trait so this crate does not have to
/// depend on the transport stack to be tested.
pub trait SpfMapper: Send + Sync {
    fn map_page(&self, size_bytes: usize, ss_mask: u32, master: u32) -> ShmemResult<u32>;
    fn unmap_page(&self, spf_handle: u32, ss_mask: u32, master: u32) -> ShmemResult<()>;
}

/// A no-op mapper for masters that have no SPF subsystems to map into yet
/// (tests, or a bin-0 scratch page mapped lazily on first real allocation).
pub struct NullMapper;

impl SpfMapper for NullMapper {
    fn map_page(&self, _size_bytes: usize, _ss_mask: u32, _master: u32) -> ShmemResult<u32> {
        Ok(0)
    }
    fn unmap_page(&self, _spf_handle: u32, _ss_mask: u32, _master: u32) -> ShmemResult<()> {
        Ok(())
    }
}

/// Record returned by a successful allocation: the CPU-visible address, the
/// address the DSP sees, and the SPF-assigned mapping handle.
#[derive(Clone, Copy, Debug)]
pub struct AllocRecord {
    pub v_addr: usize,
    pub spf_addr: u64,
    pub spf_mmap_handle: u32,
}

struct Bin {
    pages: Vec<ShmemPage>,
}

impl Bin {
    fn new() -> Self {
        Self { pages: Vec::new() }
    }
}

struct MasterBins {
    bins: [Bin; NUM_BINS],
}

impl MasterBins {
    fn new() -> Self {
        Self {
            bins: [Bin::new(), Bin::new(), Bin::new()],
        }
    }
}

/// Bin/page/block allocator over physically contiguous pages mapped into
/// one or more remote DSPs. One instance is shared process-wide; all
/// mutation happens under a single lock per the mutex hierarchy (shared-
/// memory manager lock, per master).
pub struct ShmemManager {
    provider: Box<dyn ShmemProvider>,
    masters: Mutex<HashMap<u32, MasterBins>>,
}

impl ShmemManager {
    pub fn new(provider: Box<dyn ShmemProvider>) -> Self {
        Self {
            provider,
            masters: Mutex::new(HashMap::new()),
        }
    }

    fn bin_for(size: usize, dedicated: bool, cma: bool, non_master_only: bool) -> usize {
        if dedicated || cma || non_master_only || size >= DEDICATED_PAGE_THRESHOLD_BYTES {
            BIN_DEDICATED
        } else {
            BIN_SCRATCH_PREALLOC
        }
    }

    pub fn alloc(
        &self,
        size: usize,
        master: u32,
        mapper: &dyn SpfMapper,
    ) -> ShmemResult<AllocRecord> {
        self.alloc_ext(size, 1 << master, ShmemFlags::default(), master, mapper)
    }

    pub fn alloc_ext(
        &self,
        size: usize,
        ss_mask: u32,
        flags: ShmemFlags,
        master: u32,
        mapper: &dyn SpfMapper,
    ) -> ShmemResult<AllocRecord> {
        let size = frame_align(size);
        let non_master_only = ss_mask != 0 && ss_mask & (1 << master) == 0;
        let first_choice = Self::bin_for(size, flags.dedicated_page, flags.cma, non_master_only);

        let mut masters = self.masters.lock();
        let master_bins = masters.entry(master).or_insert_with(MasterBins::new);

        // Dedicated-bin allocations always get a fresh page; scratch
        // allocations (bin 0) fall through to bin 1 on overflow.
        let candidates: &[usize] = if first_choice == BIN_DEDICATED {
            &[BIN_DEDICATED]
        } else {
            &[BIN_SCRATCH_PREALLOC, BIN_SCRATCH_GROWTH]
        };

        for &bin_idx in candidates {
            let bin = &mut master_bins.bins[bin_idx];
            for (page_idx, page) in bin.pages.iter_mut().enumerate() {
                if let Some(offset) = page.alloc(size) {
                    if page.stale {
                        match mapper.map_page(page.size_bytes(), page.spf_ss_mask, master) {
                            Ok(handle) => {
                                page.spf_mmap_handle = Some(handle);
                                page.stale = false;
                                debug!(
                                    "shmem: opportunistically re-mapped bin {} page {} for master {:#x} on reuse (handle {})",
                                    bin_idx, page_idx, master, handle
                                );
                            }
                            Err(err) => warn!(
                                "shmem: opportunistic re-map of bin {} page {} for master {:#x} failed: {}",
                                bin_idx, page_idx, master, err
                            ),
                        }
                    }
                    trace!(
                        "shmem: alloc {} bytes from existing bin {} page {} at offset {:#x}",
                        size, bin_idx, page_idx, offset
                    );
                    return Ok(AllocRecord {
                        v_addr: page.raw.v_addr + offset,
                        spf_addr: offset as u64,
                        spf_mmap_handle: page.spf_mmap_handle.unwrap_or(0),
                    });
                }
            }
        }

        // No existing page had room; allocate a fresh one in the last
        // candidate bin (bin 1 growth space, or the dedicated bin).
        let target_bin = *candidates.last().unwrap();
        let page_size = if target_bin == BIN_DEDICATED {
            size
        } else {
            BIN0_SCRATCH_BYTES.max(size)
        };
        let raw = self
            .provider
            .alloc_pages(page_size, flags)
            .map_err(|_| ShmemError::OutOfMemory)?;
        let handle = mapper.map_page(page_size, ss_mask, master)?;

        let mut page = ShmemPage::new(raw, page_size / 32 + 1);
        page.spf_ss_mask = ss_mask;
        page.spf_mmap_handle = Some(handle);
        debug!(
            "shmem: mapped new bin {} page for master {:#x} ({} bytes, ss_mask {:#x}, handle {})",
            target_bin, master, page_size, ss_mask, handle
        );

        let offset = page.alloc(size).ok_or(ShmemError::OutOfMemory)?;
        let record = AllocRecord {
            v_addr: page.raw.v_addr + offset,
            spf_addr: offset as u64,
            spf_mmap_handle: handle,
        };
        master_bins.bins[target_bin].pages.push(page);
        Ok(record)
    }

    /// Frees the allocation described by `v_addr`/`master`, unmapping and
    /// releasing the backing page to the OS allocator once the whole page
    /// (outside bin 0) becomes free.
    pub fn free(
        &self,
        master: u32,
        v_addr: usize,
        mapper: &dyn SpfMapper,
    ) -> ShmemResult<()> {
        let mut masters = self.masters.lock();
        let Some(master_bins) = masters.get_mut(&master) else {
            return Err(ShmemError::UnexpectedReply);
        };

        for (bin_idx, bin) in master_bins.bins.iter_mut().enumerate() {
            for (page_idx, page) in bin.pages.iter_mut().enumerate() {
                if v_addr < page.raw.v_addr || v_addr >= page.raw.v_addr + page.size_bytes() {
                    continue;
                }
                let offset = v_addr - page.raw.v_addr;
                page.free(offset)?;

                if bin_idx != BIN_SCRATCH_PREALLOC && page.is_entirely_free() {
                    let handle = page.spf_mmap_handle.unwrap_or(0);
                    mapper.unmap_page(handle, page.spf_ss_mask, master)?;
                    self.provider
                        .free_pages(page.raw)
                        .map_err(|_| ShmemError::OutOfMemory)?;
                    bin.pages.remove(page_idx);
                    debug!("shmem: released empty bin {} page for master {:#x}", bin_idx, master);
                }
                return Ok(());
            }
        }
        Err(ShmemError::UnexpectedReply)
    }

    /// Imports a client-owned handle as a whole dedicated page instead of
    /// allocating fresh backing memory.
    pub fn map_extern_mem(
        &self,
        hdl: u32,
        size: usize,
        master: u32,
        mapper: &dyn SpfMapper,
    ) -> ShmemResult<AllocRecord> {
        let size = frame_align(size);
        let ss_mask = 1 << master;
        let handle = mapper.map_page(size, ss_mask, master)?;

        let mut page = ShmemPage::new(
            crate::provider::RawPage {
                v_addr: hdl as usize,
                size_bytes: size,
            },
            size / 32 + 1,
        );
        page.spf_ss_mask = ss_mask;
        page.spf_mmap_handle = Some(handle);
        let offset = page.alloc(size).ok_or(ShmemError::OutOfMemory)?;
        let record = AllocRecord {
            v_addr: page.raw.v_addr + offset,
            spf_addr: offset as u64,
            spf_mmap_handle: handle,
        };
        debug!(
            "shmem: imported external handle {:#x} as bin 2 page for master {:#x} ({} bytes, handle {})",
            hdl, master, size, handle
        );

        let mut masters = self.masters.lock();
        let master_bins = masters.entry(master).or_insert_with(MasterBins::new);
        master_bins.bins[BIN_DEDICATED].pages.push(page);
        Ok(record)
    }

    /// Releases a page imported through [`Self::map_extern_mem`], unmapping
    /// it from SPF without freeing the client-owned backing memory.
    pub fn unmap_extern_mem(
        &self,
        master: u32,
        v_addr: usize,
        mapper: &dyn SpfMapper,
    ) -> ShmemResult<()> {
        let mut masters = self.masters.lock();
        let Some(master_bins) = masters.get_mut(&master) else {
            return Err(ShmemError::UnexpectedReply);
        };
        let bin = &mut master_bins.bins[BIN_DEDICATED];
        let page_idx = bin
            .pages
            .iter()
            .position(|p| p.raw.v_addr == v_addr)
            .ok_or(ShmemError::UnexpectedReply)?;
        let page = bin.pages.remove(page_idx);
        mapper.unmap_page(page.spf_mmap_handle.unwrap_or(0), page.spf_ss_mask, master)?;
        debug!(
            "shmem: released external page for master {:#x} without freeing backing memory",
            master
        );
        Ok(())
    }

    /// SSR hook: on subsystem-down, every page mapped into `ss_mask` is
    /// marked stale (its SPF handle retained but no longer trusted); on
    /// subsystem-up, shared scratch pages (bins 0/1) are eagerly re-mapped
    /// since every future allocation for that master multiplexes onto them,
    /// while dedicated (bin 2) pages are left flagged for opportunistic
    /// remap on next use.
    pub fn on_subsystem_change(&self, ss_mask: u32, up: bool, mapper: &dyn SpfMapper) {
        let mut masters = self.masters.lock();
        for (&master, master_bins) in masters.iter_mut() {
            for (bin_idx, bin) in master_bins.bins.iter_mut().enumerate() {
                for page in &mut bin.pages {
                    if page.spf_ss_mask & ss_mask == 0 {
                        continue;
                    }
                    if !up {
                        page.stale = true;
                        debug!(
                            "shmem: marked bin {} page for master {:#x} stale (ss_mask {:#x} went down)",
                            bin_idx, master, ss_mask
                        );
                        continue;
                    }
                    if !page.stale {
                        continue;
                    }
                    if bin_idx != BIN_DEDICATED {
                        match mapper.map_page(page.size_bytes(), page.spf_ss_mask, master) {
                            Ok(handle) => {
                                page.spf_mmap_handle = Some(handle);
                                page.stale = false;
                                debug!(
                                    "shmem: re-mapped bin {} scratch page for master {:#x} after SSR (handle {})",
                                    bin_idx, master, handle
                                );
                            }
                            Err(err) => warn!(
                                "shmem: re-map of bin {} scratch page for master {:#x} failed after SSR: {}",
                                bin_idx, master, err
                            ),
                        }
                    } else {
                        debug!(
                            "shmem: bin {} page for master {:#x} flagged for opportunistic remap on next use",
                            bin_idx, master
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HeapShmemProvider;

    #[test]
    fn alloc_and_free_round_trip() {
        let mgr = ShmemManager::new(Box::new(HeapShmemProvider));
        let record = mgr.alloc(128, 0, &NullMapper).expect("alloc");
        assert_ne!(record.v_addr, 0);
        mgr.free(0, record.v_addr, &NullMapper).expect("free");
    }

    #[test]
    fn dedicated_allocation_gets_its_own_page() {
        let mgr = ShmemManager::new(Box::new(HeapShmemProvider));
        let flags = ShmemFlags {
            dedicated_page: true,
            ..Default::default()
        };
        let a = mgr
            .alloc_ext(4096, 1, flags, 0, &NullMapper)
            .expect("alloc a");
        let b = mgr
            .alloc_ext(4096, 1, flags, 0, &NullMapper)
            .expect("alloc b");
        assert_ne!(a.v_addr, b.v_addr);
    }

    #[test]
    fn map_extern_mem_imports_a_whole_page_and_unmaps_without_freeing() {
        let mgr = ShmemManager::new(Box::new(HeapShmemProvider));
        let record = mgr
            .map_extern_mem(0xCAFE, 128, 0, &NullMapper)
            .expect("map extern mem");
        assert_eq!(record.v_addr, 0xCAFE);

        mgr.unmap_extern_mem(0, record.v_addr, &NullMapper)
            .expect("unmap extern mem");
        assert!(mgr.unmap_extern_mem(0, record.v_addr, &NullMapper).is_err());
    }

    struct CountingMapper {
        maps: Mutex<u32>,
    }

    impl SpfMapper for CountingMapper {
        fn map_page(&self, _size_bytes: usize, _ss_mask: u32, _master: u32) -> ShmemResult<u32> {
            let mut maps = self.maps.lock();
            *maps += 1;
            Ok(*maps)
        }
        fn unmap_page(&self, _spf_handle: u32, _ss_mask: u32, _master: u32) -> ShmemResult<()> {
            Ok(())
        }
    }

    #[test]
    fn subsystem_down_then_up_remaps_scratch_eagerly_and_flags_dedicated() {
        let mapper = CountingMapper {
            maps: Mutex::new(0),
        };
        let mgr = ShmemManager::new(Box::new(HeapShmemProvider));

        // bin 0 scratch page.
        mgr.alloc(128, 0, &mapper).expect("bin0 alloc");
        // dedicated bin 2 page.
        let dedicated = mgr
            .alloc_ext(
                4096,
                1,
                ShmemFlags {
                    dedicated_page: true,
                    ..Default::default()
                },
                0,
                &mapper,
            )
            .expect("bin2 alloc");

        mgr.on_subsystem_change(1, false, &mapper);
        {
            let masters = mgr.masters.lock();
            let master_bins = &masters[&0];
            assert!(master_bins.bins[BIN_SCRATCH_GROWTH].pages[0].stale);
            assert!(master_bins.bins[BIN_DEDICATED].pages[0].stale);
        }

        let maps_before = *mapper.maps.lock();
        mgr.on_subsystem_change(1, true, &mapper);
        let maps_after = *mapper.maps.lock();
        assert_eq!(maps_after, maps_before + 1, "only the shared scratch page is eagerly re-mapped");

        let masters = mgr.masters.lock();
        let master_bins = &masters[&0];
        assert!(!master_bins.bins[BIN_SCRATCH_GROWTH].pages[0].stale);
        assert!(
            master_bins.bins[BIN_DEDICATED].pages[0].stale,
            "bin-2 page stays flagged for opportunistic remap"
        );
        drop(masters);

        mgr.free(0, dedicated.v_addr, &mapper).ok();
    }
}
