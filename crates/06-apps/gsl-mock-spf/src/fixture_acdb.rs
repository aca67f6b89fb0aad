use gsl_acdb::AcdbQuery;
use gsl_types::{
    AResult, DriverProps, Edge, GlbPersistEntry, GraphData, KeyVector, MemType, ModuleInstanceId,
    ProcId, SgId, SubgraphProps, TagId,
};
use testdata::Scenario;

/// An `AcdbQuery` backed by a fixed `testdata::Scenario`, for running the
/// S1-S6 scenarios as ordinary `cargo test` integration tests without a real
/// DSP or ACDB file.
pub struct FixtureAcdb {
    scenario: Scenario,
}

impl FixtureAcdb {
    pub fn new(scenario: Scenario) -> Self {
        Self { scenario }
    }
}

impl AcdbQuery for FixtureAcdb {
    fn get_graph(&self, gkv: &KeyVector) -> AResult<GraphData> {
        if *gkv == self.scenario.gkv {
            Ok(GraphData {
                sg_ids: self.scenario.sg_ids.clone(),
            })
        } else {
            Ok(GraphData::default())
        }
    }

    fn get_subgraph_data(&self, sg_ids: &[SgId]) -> AResult<Vec<SubgraphProps>> {
        Ok(sg_ids
            .iter()
            .map(|&sg_id| {
                let proc_id = self
                    .scenario
                    .sg_ids
                    .iter()
                    .position(|&id| id == sg_id)
                    .and_then(|idx| self.scenario.proc_ids.get(idx))
                    .copied()
                    .unwrap_or(ProcId(0));
                SubgraphProps {
                    sg_id,
                    proc_id,
                    perf_mode: 0,
                    direction: 0,
                }
            })
            .collect())
    }

    fn get_subgraph_connections(&self, sg_ids: &[SgId]) -> AResult<Vec<Edge>> {
        Ok(self
            .scenario
            .edges
            .iter()
            .filter(|e| sg_ids.contains(&e.src_sg))
            .copied()
            .collect())
    }

    fn get_subgraph_cal_nonpersist(&self, _sg_id: SgId, _ckv: &KeyVector) -> AResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn get_subgraph_cal_persist(
        &self,
        _sg_id: SgId,
        _ckv: &KeyVector,
        _mem_type: MemType,
        _proc_idx: u32,
    ) -> AResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn get_subgraph_glb_persist_ids(
        &self,
        _sg_id: SgId,
        _ckv: &KeyVector,
    ) -> AResult<Vec<GlbPersistEntry>> {
        Ok(Vec::new())
    }

    fn get_subgraph_glb_persist_caldata(&self, _cal_id: u32) -> AResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn get_module_tag_data(&self, _tag: TagId, _tkv: &KeyVector) -> AResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn get_tagged_modules(&self, _tag: TagId) -> AResult<Vec<ModuleInstanceId>> {
        Ok(vec![ModuleInstanceId(1)])
    }

    fn get_driver_data(&self, _sg_id: SgId) -> AResult<DriverProps> {
        Ok(DriverProps::default())
    }

    fn get_subgraph_procids(&self, _sg_id: SgId) -> AResult<Vec<ProcId>> {
        Ok(self.scenario.proc_ids.clone())
    }

    fn save_delta(&self) -> AResult<()> {
        Ok(())
    }
}
