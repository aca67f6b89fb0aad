use std::collections::HashSet;

use gsl_types::{KeyVector, SgId};

/// One (GKV, CKV) opened within a graph instance: the subgraphs and edges
/// ACDB resolved it to, plus the per-instance bitmasks tracking which of
/// those subgraphs this node has contributed the start/stop refcount on.
#[derive(Clone, Debug)]
pub struct GkvNode {
    pub gkv: KeyVector,
    pub ckv: KeyVector,
    pub sg_ids: Vec<SgId>,
    pub edges: Vec<(SgId, SgId)>,
    pub sg_start_mask: HashSet<SgId>,
    pub sg_stop_mask: HashSet<SgId>,
    pub glb_persist_cal_ids: Vec<u32>,
    /// The processor mask this node registered a dynamic-PD for on open,
    /// if any; released through the same mask on close.
    pub dyn_ss_mask: Option<u32>,
}

impl GkvNode {
    pub fn new(gkv: KeyVector, ckv: KeyVector, sg_ids: Vec<SgId>, edges: Vec<(SgId, SgId)>) -> Self {
        Self {
            gkv,
            ckv,
            sg_ids,
            edges,
            sg_start_mask: HashSet::new(),
            sg_stop_mask: HashSet::new(),
            glb_persist_cal_ids: Vec::new(),
            dyn_ss_mask: None,
        }
    }

    /// `sg_start_mask` and `sg_stop_mask` must partition: a subgraph is
    /// either started or stopped by this node, never both.
    pub fn masks_partition(&self) -> bool {
        self.sg_start_mask.is_disjoint(&self.sg_stop_mask)
    }
}
