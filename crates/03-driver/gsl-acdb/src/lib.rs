//! Narrow query interface onto the ACDB collaborator.
//!
//! ACDB file-format internals are a non-goal; this crate only states the
//! trait boundary the graph service core calls through, grounded on
//! `acdb/inc/acdb_command.h`'s query surface and the two-call
//! size-then-buffer convention every real implementation follows.

mod owned_call;

pub use owned_call::acdb_call_owned;

use gsl_types::{
    AResult, DriverProps, Edge, GlbPersistEntry, GraphData, KeyVector, MemType, ModuleInstanceId,
    ProcId, SgId, SubgraphProps, TagId,
};

/// Everything the graph service core needs from the ACDB collaborator.
pub trait AcdbQuery: Send + Sync {
    fn get_graph(&self, gkv: &KeyVector) -> AResult<GraphData>;
    fn get_subgraph_data(&self, sg_ids: &[SgId]) -> AResult<Vec<SubgraphProps>>;
    fn get_subgraph_connections(&self, sg_ids: &[SgId]) -> AResult<Vec<Edge>>;
    fn get_subgraph_cal_nonpersist(&self, sg_id: SgId, ckv: &KeyVector) -> AResult<Vec<u8>>;
    fn get_subgraph_cal_persist(
        &self,
        sg_id: SgId,
        ckv: &KeyVector,
        mem_type: MemType,
        proc_idx: u32,
    ) -> AResult<Vec<u8>>;
    fn get_subgraph_glb_persist_ids(
        &self,
        sg_id: SgId,
        ckv: &KeyVector,
    ) -> AResult<Vec<GlbPersistEntry>>;
    fn get_subgraph_glb_persist_caldata(&self, cal_id: u32) -> AResult<Vec<u8>>;
    fn get_module_tag_data(&self, tag: TagId, tkv: &KeyVector) -> AResult<Vec<u8>>;
    fn get_tagged_modules(&self, tag: TagId) -> AResult<Vec<ModuleInstanceId>>;
    fn get_driver_data(&self, sg_id: SgId) -> AResult<DriverProps>;
    fn get_subgraph_procids(&self, sg_id: SgId) -> AResult<Vec<ProcId>>;
    fn save_delta(&self) -> AResult<()>;
}
