//! Initialization façade: owns process-wide construction of every
//! singleton collaborator (subsystem tracker registry, shared-memory
//! manager, subgraph pool, global-persist-cal pool, MDF registry) behind a
//! single `Gsl::new(config)` entry point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use gsl_acdb::AcdbQuery;
use gsl_gpr::{GprTransport, SpfSink};
use gsl_graph::{GraphInstance, GraphInstanceConfig};
use gsl_mdf::{DynamicPdTracker, MdfRegistry, ProcGroup};
use gsl_pool::{GlbPersistPool, SubgraphPool};
use gsl_shmem::{NullMapper, ShmemManager, ShmemProvider};
use gsl_subsystem::SubsystemTracker;
use parking_lot::Mutex;

/// Everything `Gsl::new` needs to wire up the process-wide singletons: the
/// ACDB and platform-OSAL collaborator handles, per-command timeout, the
/// set of supported master processors, and their MDF processor-group
/// layout.
pub struct GslConfig {
    pub acdb: Arc<dyn AcdbQuery>,
    pub shmem_provider: Box<dyn ShmemProvider>,
    pub masters: Vec<u32>,
    pub proc_groups: Vec<ProcGroup>,
    pub cmd_timeout: Duration,
}

/// Process-wide handle aggregating every singleton collaborator; graph
/// instances are opened through [`Gsl::open_graph`].
pub struct Gsl {
    acdb: Arc<dyn AcdbQuery>,
    transport: Arc<GprTransport>,
    sg_pool: Arc<SubgraphPool>,
    glb_pool: Arc<GlbPersistPool>,
    shmem: Arc<ShmemManager>,
    subsystems: HashMap<u32, Arc<SubsystemTracker>>,
    dyn_pd: Arc<DynamicPdTracker>,
    cmd_timeout: Duration,
    next_port: AtomicU32,
    graphs: Arc<Mutex<HashMap<u32, Arc<GraphInstance>>>>,
    next_graph_id: AtomicU32,
}

impl Gsl {
    pub fn new(config: GslConfig) -> Result<Self> {
        let subsystems: HashMap<u32, Arc<SubsystemTracker>> = config
            .masters
            .iter()
            .map(|&m| (m, Arc::new(SubsystemTracker::new(m))))
            .collect();
        let shmem = Arc::new(ShmemManager::new(config.shmem_provider));
        let dyn_pd = Arc::new(DynamicPdTracker::new(MdfRegistry::new(config.proc_groups)));
        let graphs: Arc<Mutex<HashMap<u32, Arc<GraphInstance>>>> = Arc::new(Mutex::new(HashMap::new()));

        // Wire subsystem-restart notifications through to every collaborator
        // that remembers per-processor state: the shmem manager flags pages
        // stale on the way down and eagerly re-maps them on the way up, the
        // dynamic-PD tracker re-maps loaned memory on the way up, and every
        // open graph touching the affected processors is forced into ERROR.
        for tracker in subsystems.values() {
            let shmem = Arc::clone(&shmem);
            let dyn_pd = Arc::clone(&dyn_pd);
            let graphs = Arc::clone(&graphs);
            tracker.on_change(move |new_mask, previous_mask| {
                let went_down = previous_mask & !new_mask;
                let came_up = new_mask & !previous_mask;
                if went_down != 0 {
                    shmem.on_subsystem_change(went_down, false, &NullMapper);
                    for graph in graphs.lock().values() {
                        graph.notify_ssr(true);
                    }
                }
                if came_up != 0 {
                    shmem.on_subsystem_change(came_up, true, &NullMapper);
                    dyn_pd.notify_ss_restarted(came_up);
                }
            });
        }

        Ok(Self {
            acdb: config.acdb,
            transport: Arc::new(GprTransport::new()),
            sg_pool: Arc::new(SubgraphPool::new()),
            glb_pool: Arc::new(GlbPersistPool::new()),
            shmem,
            subsystems,
            dyn_pd,
            cmd_timeout: config.cmd_timeout,
            next_port: AtomicU32::new(0x1000),
            graphs,
            next_graph_id: AtomicU32::new(1),
        })
    }

    pub fn transport(&self) -> &Arc<GprTransport> {
        &self.transport
    }

    pub fn subgraph_pool(&self) -> &Arc<SubgraphPool> {
        &self.sg_pool
    }

    pub fn glb_persist_pool(&self) -> &Arc<GlbPersistPool> {
        &self.glb_pool
    }

    pub fn shmem(&self) -> &Arc<ShmemManager> {
        &self.shmem
    }

    pub fn subsystem(&self, master: u32) -> Option<&Arc<SubsystemTracker>> {
        self.subsystems.get(&master)
    }

    /// Constructs a new graph instance addressed by a fresh source port, per
    /// `gsl_graph_init`. The caller supplies the `SpfSink` the transport
    /// should write through (a real transport adapter or `gsl-mock-spf`'s
    /// `MockSpf` in tests).
    pub fn open_graph(&self, sink: Arc<dyn SpfSink>, apm_dst_port: u32) -> Arc<GraphInstance> {
        let graph_id = self.next_graph_id.fetch_add(1, Ordering::Relaxed);
        let src_port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let cfg = GraphInstanceConfig {
            graph_id,
            src_port,
            dst_port: apm_dst_port,
            cmd_timeout: self.cmd_timeout,
        };
        let instance = Arc::new(GraphInstance::new(
            cfg,
            Arc::clone(&self.acdb),
            Arc::clone(&self.transport),
            sink,
            Arc::clone(&self.sg_pool),
            Arc::clone(&self.glb_pool),
            Arc::clone(&self.dyn_pd),
        ));
        self.graphs.lock().insert(graph_id, Arc::clone(&instance));
        instance
    }

    pub fn graph(&self, graph_id: u32) -> Option<Arc<GraphInstance>> {
        self.graphs.lock().get(&graph_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsl_mock_spf::{FixtureAcdb, MockSpf};
    use gsl_shmem::HeapShmemProvider;
    use gsl_types::KeyVector;

    #[test]
    fn new_gsl_opens_and_closes_a_graph_through_one_transport() {
        let scenario = testdata::scenario_s1();
        let gsl = Gsl::new(GslConfig {
            acdb: Arc::new(FixtureAcdb::new(scenario.clone())),
            shmem_provider: Box::new(HeapShmemProvider),
            masters: vec![0],
            proc_groups: Vec::new(),
            cmd_timeout: Duration::from_secs(1),
        })
        .expect("gsl init");

        let sink = MockSpf::new(gsl.transport());
        let graph = gsl.open_graph(sink, 0x2000);

        graph.open(scenario.gkv.clone(), KeyVector::new()).expect("open");
        assert_eq!(graph.state(), gsl_types::GraphState::Opened);
        graph.close().expect("close");
        assert_eq!(graph.state(), gsl_types::GraphState::Idle);
    }

    #[test]
    fn subsystem_down_forces_open_graphs_into_a_closeable_error_state() {
        let scenario = testdata::scenario_s1();
        let gsl = Gsl::new(GslConfig {
            acdb: Arc::new(FixtureAcdb::new(scenario.clone())),
            shmem_provider: Box::new(HeapShmemProvider),
            masters: vec![0],
            proc_groups: Vec::new(),
            cmd_timeout: Duration::from_secs(1),
        })
        .expect("gsl init");

        let sink = MockSpf::new(gsl.transport());
        let graph = gsl.open_graph(sink, 0x2000);
        graph.open(scenario.gkv.clone(), KeyVector::new()).expect("open");
        graph.start().expect("start");

        gsl.subsystem(0).expect("master 0 tracked").set(1, true);
        gsl.subsystem(0).expect("master 0 tracked").set(1, false);

        assert!(graph.state().is_error());
        graph.close().expect("close remains legal during SSR");
        assert_eq!(graph.state(), gsl_types::GraphState::Idle);
    }
}
