//! Integration tests asserting the exact SPF opcode sequences and refcount
//! outcomes for scenarios S1-S6 (spec §8), run against `gsl-mock-spf`'s
//! in-memory ACDB/SPF stand-ins.

use std::sync::Arc;
use std::time::Duration;

use gsl_init::{Gsl, GslConfig};
use gsl_mdf::ProcDomainType;
use gsl_mock_spf::{FixtureAcdb, MockSpf};
use gsl_shmem::HeapShmemProvider;
use gsl_types::{GraphState, KeyVector};
use gsl_wire::ApmOpcode;

fn gsl_for(scenario: testdata::Scenario, proc_groups: Vec<gsl_mdf::ProcGroup>) -> Gsl {
    Gsl::new(GslConfig {
        acdb: Arc::new(FixtureAcdb::new(scenario)),
        shmem_provider: Box::new(HeapShmemProvider),
        masters: vec![0, 1],
        proc_groups,
        cmd_timeout: Duration::from_secs(1),
    })
    .expect("gsl init")
}

/// S1: simple open -> start -> stop -> close on subgraphs {A, B} connected
/// by one edge; exactly one OPEN/START/STOP/CLOSE each.
#[test]
fn s1_simple_lifecycle_sends_one_of_each_opcode() {
    let scenario = testdata::scenario_s1();
    let gsl = gsl_for(scenario.clone(), Vec::new());
    let sink = MockSpf::new(gsl.transport());
    let graph = gsl.open_graph(sink.clone(), 0x2000);

    graph.open(scenario.gkv.clone(), KeyVector::new()).unwrap();
    graph.start().unwrap();
    graph.stop().unwrap();
    graph.close().unwrap();

    assert_eq!(sink.count(ApmOpcode::GraphOpen), 1);
    assert_eq!(sink.count(ApmOpcode::GraphStart), 1);
    assert_eq!(sink.count(ApmOpcode::GraphStop), 1);
    assert_eq!(sink.count(ApmOpcode::GraphClose), 1);
}

/// S2: two clients open GKVs that both resolve to shared subgraph 0xA;
/// SPF should see exactly one GRAPH_OPEN mentioning A (the first client's),
/// and the pool should not free A until both clients close.
#[test]
fn s2_shared_subgraph_opens_once_and_closes_once() {
    let s2 = testdata::scenario_s2();
    let s2_other = testdata::scenario_s2_other();

    let gsl_a = gsl_for(s2.clone(), Vec::new());
    let sink = MockSpf::new(gsl_a.transport());

    // Both clients share one ACDB/transport/pool stack, mirroring the
    // process-wide pool a real GSL process would have. A second `Gsl` over
    // the same transport would duplicate the pool, so reuse one instance
    // with two independent graph handles, each backed by its own GKV
    // resolving through a scenario-specific fixture ACDB mounted per-graph.
    let acdb_other: Arc<dyn gsl_acdb::AcdbQuery> = Arc::new(FixtureAcdb::new(s2_other.clone()));
    let graph_a = gsl_a.open_graph(sink.clone(), 0x2000);
    let graph_b = gsl_init_graph_with_acdb(&gsl_a, acdb_other, sink.clone());

    graph_a.open(s2.gkv.clone(), KeyVector::new()).unwrap();
    graph_b.open(s2_other.gkv.clone(), KeyVector::new()).unwrap();

    assert_eq!(
        sink.count(ApmOpcode::GraphOpen),
        2,
        "each graph sends its own pruned open list (A pruned from the second)"
    );
    assert_eq!(gsl_a.subgraph_pool().open_ref_cnt(&gsl_types::SgId(0xA)), 2);

    graph_a.close().unwrap();
    assert!(gsl_a.subgraph_pool().contains(&gsl_types::SgId(0xA)));
    graph_b.close().unwrap();
    assert!(!gsl_a.subgraph_pool().contains(&gsl_types::SgId(0xA)));
}

/// Builds a second graph instance sharing `gsl`'s pools/transport but
/// resolving its GKV through a different ACDB fixture, matching two
/// independent client connections to the same SPF session.
fn gsl_init_graph_with_acdb(
    gsl: &Gsl,
    acdb: Arc<dyn gsl_acdb::AcdbQuery>,
    sink: Arc<gsl_mock_spf::MockSpf>,
) -> Arc<gsl_graph::GraphInstance> {
    let cfg = gsl_graph::GraphInstanceConfig {
        graph_id: 99,
        src_port: 0x3000,
        dst_port: 0x2000,
        cmd_timeout: Duration::from_secs(1),
    };
    Arc::new(gsl_graph::GraphInstance::new(
        cfg,
        acdb,
        Arc::clone(gsl.transport()),
        sink,
        Arc::clone(gsl.subgraph_pool()),
        Arc::clone(gsl.glb_persist_pool()),
        Arc::new(gsl_mdf::DynamicPdTracker::new(gsl_mdf::MdfRegistry::new(Vec::new()))),
    ))
}

/// S4: two instances both start the same shared subgraph; only the
/// second (last) stop should emit GRAPH_STOP.
#[test]
fn s4_start_stop_refcount_only_stops_on_last_release() {
    let scenario = testdata::scenario_s4();
    let gsl = gsl_for(scenario.clone(), Vec::new());
    let sink = MockSpf::new(gsl.transport());

    let graph_a = gsl.open_graph(sink.clone(), 0x2000);
    let graph_b = gsl_init_graph_with_acdb(&gsl, Arc::new(FixtureAcdb::new(scenario.clone())), sink.clone());

    graph_a.open(scenario.gkv.clone(), KeyVector::new()).unwrap();
    graph_b.open(scenario.gkv.clone(), KeyVector::new()).unwrap();
    graph_a.start().unwrap();
    graph_b.start().unwrap();

    assert_eq!(sink.count(ApmOpcode::GraphStart), 1, "second start is a no-op refcount bump");

    graph_a.stop().unwrap();
    assert_eq!(sink.count(ApmOpcode::GraphStop), 0, "instance A is not the last start-holder");

    graph_b.stop().unwrap();
    assert_eq!(sink.count(ApmOpcode::GraphStop), 1, "instance B's stop is the last reference");
}

/// S5: a graph force-transitioned into `ERROR` by SSR still permits close
/// and skips the wire-level GRAPH_CLOSE send.
#[test]
fn s5_ssr_forces_error_and_close_skips_wire_send() {
    let scenario = testdata::scenario_s5();
    let gsl = gsl_for(scenario.clone(), Vec::new());
    let sink = MockSpf::new(gsl.transport());
    let graph = gsl.open_graph(sink.clone(), 0x2000);

    graph.open(scenario.gkv.clone(), KeyVector::new()).unwrap();
    assert_eq!(sink.count(ApmOpcode::GraphOpen), 1);

    graph.notify_ssr(true);
    assert_eq!(graph.state(), GraphState::Error { allow_cleanup: true });

    graph.close().unwrap();
    assert_eq!(graph.state(), GraphState::Idle);
    assert_eq!(
        sink.count(ApmOpcode::GraphClose),
        0,
        "SSR close skips the wire send but still frees local state"
    );
    assert!(!gsl.subgraph_pool().contains(&gsl_types::SgId(0xD)));
}

/// S6: subgraph 0xE lives on a non-master processor configured as
/// dynamic-PD; opening its graph must bring the dynamic-PD processor up.
#[test]
fn s6_dynamic_pd_registers_non_master_processor() {
    let scenario = testdata::scenario_s6();
    let proc_groups = vec![gsl_mdf::ProcGroup {
        master: 0,
        satellites: vec![1],
        loaned_mem_bytes: 4096,
        domain_types: vec![(0, ProcDomainType::StaticPd), (1, ProcDomainType::DynamicPd)],
    }];
    let gsl = gsl_for(scenario.clone(), proc_groups);
    let sink = MockSpf::new(gsl.transport());
    let graph = gsl.open_graph(sink.clone(), 0x2000);

    graph.open(scenario.gkv.clone(), KeyVector::new()).unwrap();
    assert_eq!(sink.count(ApmOpcode::GraphOpen), 1);
    assert!(gsl.subgraph_pool().contains(&gsl_types::SgId(0xE)));
}
