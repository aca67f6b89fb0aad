use crate::error::ShmemResult;

/// Bit flags accepted by [`ShmemProvider::alloc_pages`], mirroring
/// `ar_osal_shmem.h`'s allocation property flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShmemFlags {
    pub dedicated_page: bool,
    pub loaned: bool,
    pub cma: bool,
    pub map_uncached: bool,
}

/// A virtual machine identifier used by [`ShmemProvider::hyp_assign`] to
/// move ownership of CMA pages between the application processor and a
/// hardware-accelerator DSP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmId(pub u32);

/// A page allocation handed back by the platform OSAL collaborator: a
/// CPU-visible address and, once mapped, the SPF-assigned handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawPage {
    pub v_addr: usize,
    pub size_bytes: usize,
}

/// Platform shared-memory allocation boundary, matching `ar_osal_shmem.h`.
/// ION/dma-buf mechanics are a non-goal; this is the narrow interface the
/// allocator calls through.
pub trait ShmemProvider: Send + Sync {
    fn alloc_pages(&self, size: usize, flags: ShmemFlags) -> ShmemResult<RawPage>;
    fn free_pages(&self, page: RawPage) -> ShmemResult<()>;
    fn hyp_assign(&self, page: &RawPage, from_vm: VmId, to_vm: VmId) -> ShmemResult<()>;
}

/// Heap-backed [`ShmemProvider`] used by tests and by the mock SPF app: the
/// "physically contiguous page" is just a boxed byte buffer.
pub struct HeapShmemProvider;

impl ShmemProvider for HeapShmemProvider {
    fn alloc_pages(&self, size: usize, _flags: ShmemFlags) -> ShmemResult<RawPage> {
        let buf = vec![0u8; size].into_boxed_slice();
        let v_addr = Box::into_raw(buf) as *mut u8 as usize;
        Ok(RawPage {
            v_addr,
            size_bytes: size,
        })
    }

    fn free_pages(&self, page: RawPage) -> ShmemResult<()> {
        // SAFETY: `v_addr` was produced by `Box::into_raw` above with the
        // same `size_bytes`, and is freed at most once (the allocator never
        // hands the same page back twice).
        unsafe {
            let slice = std::slice::from_raw_parts_mut(page.v_addr as *mut u8, page.size_bytes);
            drop(Box::from_raw(slice as *mut [u8]));
        }
        Ok(())
    }

    fn hyp_assign(&self, _page: &RawPage, _from_vm: VmId, _to_vm: VmId) -> ShmemResult<()> {
        Ok(())
    }
}
