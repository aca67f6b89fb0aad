use gsl_types::{Edge, KeyVector, ProcId, SgId};

/// A fixed topology fixture: the GKV a client opens, the subgraphs ACDB
/// would resolve it to, their processor assignment, and the edges between
/// them — literal values chosen to exercise the scenarios in spec.md §8.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub name: &'static str,
    pub gkv: KeyVector,
    pub sg_ids: Vec<SgId>,
    pub proc_ids: Vec<ProcId>,
    pub edges: Vec<Edge>,
}

/// S1: simple open-start-stop-close. Two subgraphs {0xA, 0xB}, one edge
/// A->B, both on the master processor.
pub fn scenario_s1() -> Scenario {
    Scenario {
        name: "s1",
        gkv: KeyVector::from_pairs(vec![(0x1, 0x1)]),
        sg_ids: vec![SgId(0xA), SgId(0xB)],
        proc_ids: vec![ProcId(0), ProcId(0)],
        edges: vec![Edge {
            src_sg: SgId(0xA),
            dst_sg: SgId(0xB),
        }],
    }
}

/// S2: first of two clients sharing SG 0xA; `scenario_s2_other` is the
/// second client's GKV, resolving to a disjoint SG plus the shared 0xA.
pub fn scenario_s2() -> Scenario {
    Scenario {
        name: "s2",
        gkv: KeyVector::from_pairs(vec![(0x1, 0x1)]),
        sg_ids: vec![SgId(0xA)],
        proc_ids: vec![ProcId(0)],
        edges: vec![],
    }
}

pub fn scenario_s2_other() -> Scenario {
    Scenario {
        name: "s2-other",
        gkv: KeyVector::from_pairs(vec![(0x1, 0x2)]),
        sg_ids: vec![SgId(0xA), SgId(0xC)],
        proc_ids: vec![ProcId(0), ProcId(0)],
        edges: vec![],
    }
}

/// S4: start/stop refcount on a single shared subgraph; reuses S2's
/// topology since the scenario only cares about start/stop, not open.
pub fn scenario_s4() -> Scenario {
    scenario_s2()
}

/// S5: SSR mid-write. A single subgraph with a datapath endpoint.
pub fn scenario_s5() -> Scenario {
    Scenario {
        name: "s5",
        gkv: KeyVector::from_pairs(vec![(0x1, 0x3)]),
        sg_ids: vec![SgId(0xD)],
        proc_ids: vec![ProcId(1)],
        edges: vec![],
    }
}

/// S6: dynamic-PD registration. SG 0xE lives on processor 1, configured as
/// DYNAMIC_PD by the fixture MDF registry.
pub fn scenario_s6() -> Scenario {
    Scenario {
        name: "s6",
        gkv: KeyVector::from_pairs(vec![(0x1, 0x4)]),
        sg_ids: vec![SgId(0xE)],
        proc_ids: vec![ProcId(1)],
        edges: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_and_s2_other_share_sg_a() {
        let s2 = scenario_s2();
        let other = scenario_s2_other();
        assert!(s2.sg_ids.contains(&SgId(0xA)));
        assert!(other.sg_ids.contains(&SgId(0xA)));
    }
}
