use std::collections::HashMap;

use gsl_common::{RefCountPool, RemoveOutcome};
use gsl_types::{ProcId, SgId};
use log::debug;
use parking_lot::Mutex;

/// Cached per-SG shared-memory-backed calibration blobs. Modeled as owned
/// bytes here rather than a live shared-memory handle: the pool only needs
/// to know whether a blob is already registered and reuse it, so the
/// allocation/mapping mechanics live entirely in the shared-memory manager
/// the graph instance drives directly.
#[derive(Clone, Debug, Default)]
pub struct CachedCal {
    pub per_proc_persist: HashMap<u32, Vec<u8>>,
    pub cma_persist: Option<Vec<u8>>,
    pub user_override_persist: Option<Vec<u8>>,
}

/// A process-wide subgraph record: refcounts, child-edge adjacency, driver
/// properties, and cached persistent-calibration allocations.
#[derive(Clone, Debug)]
pub struct SubgraphRecord {
    pub sg_id: SgId,
    pub proc_id: ProcId,
    pub perf_mode: u32,
    pub direction: u32,
    pub start_ref_cnt: u32,
    pub stop_ref_cnt: u32,
    pub children: HashMap<SgId, u32>,
    pub cal: CachedCal,
}

impl SubgraphRecord {
    pub fn new(sg_id: SgId, proc_id: ProcId, perf_mode: u32, direction: u32) -> Self {
        Self {
            sg_id,
            proc_id,
            perf_mode,
            direction,
            start_ref_cnt: 0,
            stop_ref_cnt: 0,
            children: HashMap::new(),
            cal: CachedCal::default(),
        }
    }
}

/// Global map keyed by SG-ID; `open_ref_cnt` lives in the underlying
/// [`RefCountPool`], everything else is the record's own fields.
#[derive(Default)]
pub struct SubgraphPool {
    pool: RefCountPool<SgId, Mutex<SubgraphRecord>>,
}

impl SubgraphPool {
    pub fn new() -> Self {
        Self {
            pool: RefCountPool::new(),
        }
    }

    /// Adds `sgid`, allocating a fresh record via `make` on the 0->1
    /// transition. Returns whether this call created the record.
    pub fn add(&self, sgid: SgId, make: impl FnOnce() -> SubgraphRecord) -> bool {
        let (created, refcount) = self.pool.add(sgid, || Mutex::new(make()));
        debug!("subgraph_pool: add {:?} -> open_ref_cnt={}", sgid, refcount);
        created
    }

    /// Decrements `sgid`'s open refcount, freeing the record on 1->0.
    pub fn remove(&self, sgid: &SgId) -> bool {
        match self.pool.remove(sgid) {
            RemoveOutcome::Freed(_) => {
                debug!("subgraph_pool: remove {:?} -> freed", sgid);
                true
            }
            RemoveOutcome::StillReferenced => false,
            RemoveOutcome::NotFound => false,
        }
    }

    pub fn open_ref_cnt(&self, sgid: &SgId) -> u32 {
        self.pool.refcount(sgid).unwrap_or(0)
    }

    pub fn with<R>(&self, sgid: &SgId, f: impl FnOnce(&mut SubgraphRecord) -> R) -> Option<R> {
        self.pool.with(sgid, |record| f(&mut record.lock()))
    }

    pub fn find(&self, sgid: &SgId) -> Option<SubgraphRecord> {
        self.with(sgid, |r| r.clone())
    }

    pub fn contains(&self, sgid: &SgId) -> bool {
        self.pool.contains(sgid)
    }

    /// Increments edge refcounts from `sg` to each of `children`, splitting
    /// newly-created edges (0->1) from already-existing ones.
    pub fn add_children(&self, sg: SgId, children: &[SgId]) -> (Vec<SgId>, Vec<SgId>) {
        let mut new = Vec::new();
        let mut existing = Vec::new();
        self.with(&sg, |record| {
            for &child in children {
                let count = record.children.entry(child).or_insert(0);
                if *count == 0 {
                    new.push(child);
                } else {
                    existing.push(child);
                }
                *count += 1;
            }
        });
        (new, existing)
    }

    /// Decrements edge refcounts from `sg` to each of `children`, returning
    /// the edges whose refcount reached zero (to be torn down on SPF).
    pub fn remove_children(&self, sg: SgId, children: &[SgId]) -> Vec<SgId> {
        let mut removed = Vec::new();
        self.with(&sg, |record| {
            for &child in children {
                if let Some(count) = record.children.get_mut(&child) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        record.children.remove(&child);
                        removed.push(child);
                    }
                }
            }
        });
        removed
    }

    /// Finalizes refcounts after a batch of `add`/`add_children` calls: a
    /// no-op today since both already mutate their counts immediately, kept
    /// as the single call site a batch-open finishes through so the pool's
    /// bookkeeping can grow a deferred-commit step without every caller
    /// having to change.
    pub fn update_child_refs(&self) {}

    /// Separates `sg_ids` into those whose open refcount just became 1
    /// (must be sent to SPF) and those already open elsewhere.
    pub fn prune_sg_list(&self, sg_ids: &[SgId]) -> (Vec<SgId>, Vec<SgId>) {
        let mut pruned = Vec::new();
        let mut existing = Vec::new();
        for &id in sg_ids {
            if self.open_ref_cnt(&id) == 1 {
                pruned.push(id);
            } else {
                existing.push(id);
            }
        }
        (pruned, existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_tracks_open_ref_cnt() {
        let pool = SubgraphPool::new();
        let sg = SgId(0xA);
        assert!(pool.add(sg, || SubgraphRecord::new(sg, ProcId(0), 0, 0)));
        assert_eq!(pool.open_ref_cnt(&sg), 1);
        assert!(!pool.add(sg, || unreachable!()));
        assert_eq!(pool.open_ref_cnt(&sg), 2);

        assert!(!pool.remove(&sg));
        assert_eq!(pool.open_ref_cnt(&sg), 1);
        assert!(pool.remove(&sg));
        assert!(!pool.contains(&sg));
    }

    #[test]
    fn prune_sg_list_separates_new_from_existing() {
        let pool = SubgraphPool::new();
        let a = SgId(0xA);
        let b = SgId(0xB);
        pool.add(a, || SubgraphRecord::new(a, ProcId(0), 0, 0));
        pool.add(b, || SubgraphRecord::new(b, ProcId(0), 0, 0));
        pool.add(b, || unreachable!());

        let (pruned, existing) = pool.prune_sg_list(&[a, b]);
        assert_eq!(pruned, vec![a]);
        assert_eq!(existing, vec![b]);
    }

    #[test]
    fn add_children_splits_new_and_existing_edges() {
        let pool = SubgraphPool::new();
        let a = SgId(0xA);
        let b = SgId(0xB);
        pool.add(a, || SubgraphRecord::new(a, ProcId(0), 0, 0));

        let (new, existing) = pool.add_children(a, &[b]);
        assert_eq!(new, vec![b]);
        assert!(existing.is_empty());

        let (new, existing) = pool.add_children(a, &[b]);
        assert!(new.is_empty());
        assert_eq!(existing, vec![b]);

        let removed = pool.remove_children(a, &[b]);
        assert!(removed.is_empty());
        let removed = pool.remove_children(a, &[b]);
        assert_eq!(removed, vec![b]);
    }

    #[test]
    fn update_child_refs_leaves_counts_as_add_children_left_them() {
        let pool = SubgraphPool::new();
        let a = SgId(0xA);
        let b = SgId(0xB);
        pool.add(a, || SubgraphRecord::new(a, ProcId(0), 0, 0));
        pool.add_children(a, &[b]);
        pool.update_child_refs();
        let removed = pool.remove_children(a, &[b]);
        assert_eq!(removed, vec![b]);
    }
}
