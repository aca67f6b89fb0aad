/// Frame size every block size is aligned to; sizes in the block list are
/// always a multiple of this, which is what lets the LSB double as the
/// used/free flag.
pub const FRAME_SIZE_BYTES: usize = 32;

/// Size of the pre-allocated bin-0 scratch page, held for the life of the
/// process.
pub const BIN0_SCRATCH_BYTES: usize = 32 * 1024;

/// Allocations at or above this size (and anything dedicated, CMA, or
/// targeting a non-master-only processor set) go to bin 2 as their own
/// dedicated page instead of sharing bin 0/1 scratch space.
pub const DEDICATED_PAGE_THRESHOLD_BYTES: usize = 16 * 1024;

pub fn frame_align(size: usize) -> usize {
    size.div_ceil(FRAME_SIZE_BYTES) * FRAME_SIZE_BYTES
}
