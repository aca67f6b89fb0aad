use crate::config::frame_align;
use crate::error::{ShmemError, ShmemResult};
use crate::provider::RawPage;

const USED_BIT: usize = 1;

#[derive(Clone, Copy, Debug)]
struct Block {
    /// Offset from the page's base address; `None` marks a free list slot.
    offset: Option<usize>,
    /// Frame-aligned size with the used/free flag packed in the LSB,
    /// matching the upstream layout.
    size_word: usize,
    predecessor: Option<usize>,
    successor: Option<usize>,
}

impl Block {
    fn size(&self) -> usize {
        self.size_word & !USED_BIT
    }

    fn is_used(&self) -> bool {
        self.size_word & USED_BIT != 0
    }
}

/// One physically-contiguous allocation, subdivided into an intrusive
/// doubly-linked block list by index, exactly as the upstream allocator
/// lays it out (the index-based links exist so coalescing never needs to
/// relocate blocks).
pub struct ShmemPage {
    pub raw: RawPage,
    pub spf_ss_mask: u32,
    pub spf_mmap_handle: Option<u32>,
    /// Set on a subsystem-down notification for a mask this page is mapped
    /// into; the existing `spf_mmap_handle` may no longer be valid until
    /// the page is re-mapped.
    pub stale: bool,
    blocks: Vec<Block>,
}

impl ShmemPage {
    pub fn new(raw: RawPage, max_blocks: usize) -> Self {
        let mut blocks = vec![
            Block {
                offset: None,
                size_word: 0,
                predecessor: None,
                successor: None,
            };
            max_blocks.max(1)
        ];
        blocks[0] = Block {
            offset: Some(0),
            size_word: raw.size_bytes,
            predecessor: None,
            successor: None,
        };
        Self {
            raw,
            spf_ss_mask: 0,
            spf_mmap_handle: None,
            stale: false,
            blocks,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.raw.size_bytes
    }

    pub fn is_entirely_free(&self) -> bool {
        self.blocks
            .iter()
            .filter(|b| b.offset.is_some())
            .all(|b| !b.is_used())
    }

    /// First-fit scan for a free block able to hold `size`, splitting the
    /// remainder into a new free block when it is at least one frame.
    pub fn alloc(&mut self, size: usize) -> Option<usize> {
        let size = frame_align(size);
        let found = self
            .blocks
            .iter()
            .position(|b| b.offset.is_some() && !b.is_used() && b.size() >= size)?;

        let successor = self.blocks[found].successor;
        if self.blocks[found].size() > size {
            if let Some(new_idx) = self.blocks.iter().position(|b| b.offset.is_none()) {
                let base = self.blocks[found].offset.unwrap() + size;
                let remainder = self.blocks[found].size() - size;
                self.blocks[new_idx] = Block {
                    offset: Some(base),
                    size_word: remainder,
                    predecessor: Some(found),
                    successor,
                };
                if let Some(succ) = successor {
                    self.blocks[succ].predecessor = Some(new_idx);
                }
                self.blocks[found].successor = Some(new_idx);
            }
        }

        self.blocks[found].size_word = size | USED_BIT;
        self.blocks[found].offset
    }

    /// Frees the block at `offset`, merging with a free successor then a
    /// free predecessor, and returns the resulting free block's size.
    pub fn free(&mut self, offset: usize) -> ShmemResult<usize> {
        let idx = self
            .blocks
            .iter()
            .position(|b| b.offset == Some(offset))
            .ok_or(ShmemError::UnexpectedReply)?;

        self.blocks[idx].size_word &= !USED_BIT;

        if let Some(succ) = self.blocks[idx].successor {
            if !self.blocks[succ].is_used() {
                let succ_succ = self.blocks[succ].successor;
                self.blocks[idx].size_word += self.blocks[succ].size();
                self.blocks[idx].successor = succ_succ;
                if let Some(ss) = succ_succ {
                    self.blocks[ss].predecessor = Some(idx);
                }
                self.blocks[succ] = Block {
                    offset: None,
                    size_word: 0,
                    predecessor: None,
                    successor: None,
                };
            }
        }

        let mut resulting_idx = idx;
        if let Some(pred) = self.blocks[idx].predecessor {
            if !self.blocks[pred].is_used() {
                let idx_successor = self.blocks[idx].successor;
                self.blocks[pred].size_word += self.blocks[idx].size();
                self.blocks[pred].successor = idx_successor;
                if let Some(s) = idx_successor {
                    self.blocks[s].predecessor = Some(pred);
                }
                self.blocks[idx] = Block {
                    offset: None,
                    size_word: 0,
                    predecessor: None,
                    successor: None,
                };
                resulting_idx = pred;
            }
        }

        Ok(self.blocks[resulting_idx].size())
    }

    /// Sum of used + free block sizes; always equals `size_bytes`.
    pub fn accounted_bytes(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.offset.is_some())
            .map(|b| b.size())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(size: usize) -> ShmemPage {
        ShmemPage::new(
            RawPage {
                v_addr: 0x1000,
                size_bytes: size,
            },
            size / 32 + 1,
        )
    }

    #[test]
    fn alloc_splits_remainder_and_conserves_total_size() {
        let mut p = page(1024);
        let off = p.alloc(64).expect("alloc");
        assert_eq!(off, 0);
        assert_eq!(p.accounted_bytes(), p.size_bytes());
    }

    #[test]
    fn free_coalesces_with_both_neighbours() {
        let mut p = page(1024);
        let a = p.alloc(64).unwrap();
        let b = p.alloc(64).unwrap();
        let c = p.alloc(64).unwrap();
        assert!(!p.is_entirely_free());

        p.free(a).unwrap();
        p.free(c).unwrap();
        // b still used, so the page isn't fully free yet.
        assert!(!p.is_entirely_free());

        let merged = p.free(b).unwrap();
        assert!(p.is_entirely_free());
        assert_eq!(merged, p.size_bytes());
        assert_eq!(p.accounted_bytes(), p.size_bytes());
    }
}
