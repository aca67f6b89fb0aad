use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use gsl_acdb::AcdbQuery;
use gsl_gpr::{GprTransport, SpfSink};
use gsl_mdf::{query_graph_ss_mask, DynPdMapper, DynamicPdTracker};
use gsl_pool::{GlbPersistPool, SubgraphPool, SubgraphRecord};
use gsl_types::{AResult, GraphState, GslError, KeyVector, MemType, ModuleInstanceId, SgId, TagId};
use gsl_wire::{ApmOpcode, Edge as WireEdge, Param, ParamPayload, SubGraphList};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::datapath::{DataEndpoint, Direction, EndpointConfig};
use crate::error::{GraphError, GraphResult};
use crate::gkv_node::GkvNode;

/// Wiring a graph instance needs from its owning [`crate::GslInit`] facade:
/// ports, timeouts, and the process-wide singletons it shares with every
/// other instance.
pub struct GraphInstanceConfig {
    pub graph_id: u32,
    pub src_port: u32,
    pub dst_port: u32,
    pub cmd_timeout: Duration,
}

/// A client handle: ordered GKV-nodes, the `GraphState` state machine, and
/// handles onto the process-wide collaborators the open/close/start/stop
/// algorithm drives.
pub struct GraphInstance {
    cfg: GraphInstanceConfig,
    acdb: Arc<dyn AcdbQuery>,
    transport: Arc<GprTransport>,
    sink: Arc<dyn SpfSink>,
    sg_pool: Arc<SubgraphPool>,
    glb_pool: Arc<GlbPersistPool>,
    dyn_pd: Arc<DynamicPdTracker>,
    endpoints: Mutex<HashMap<TagId, Arc<DataEndpoint>>>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: GraphState,
    nodes: Vec<GkvNode>,
}

/// Sends `APM_CMD_SHARED_SATELLITE_MEM_MAP/UNMAP_REGIONS` through a graph
/// instance's own transport/sink, the narrow collaborator
/// `DynamicPdTracker::register`/`deregister` need to announce satellites to
/// SPF without `gsl-mdf` depending on the transport stack.
struct DynPdSink<'a> {
    instance: &'a GraphInstance,
}

impl DynPdMapper for DynPdSink<'_> {
    fn map_satellites(&self, dyn_ss_mask: u32) -> AResult<()> {
        self.instance
            .send_apm(ApmOpcode::SharedSatelliteMemMapRegions, dyn_ss_mask.to_le_bytes().to_vec())
            .map(|_| ())
            .map_err(|err| GslError::WireFailure(err.to_string()))
    }

    fn unmap_satellites(&self, dyn_ss_mask: u32) -> AResult<()> {
        self.instance
            .send_apm(ApmOpcode::SharedSatelliteMemUnmapRegions, dyn_ss_mask.to_le_bytes().to_vec())
            .map(|_| ())
            .map_err(|err| GslError::WireFailure(err.to_string()))
    }
}

impl GraphInstance {
    pub fn new(
        cfg: GraphInstanceConfig,
        acdb: Arc<dyn AcdbQuery>,
        transport: Arc<GprTransport>,
        sink: Arc<dyn SpfSink>,
        sg_pool: Arc<SubgraphPool>,
        glb_pool: Arc<GlbPersistPool>,
        dyn_pd: Arc<DynamicPdTracker>,
    ) -> Self {
        Self {
            cfg,
            acdb,
            transport,
            sink,
            sg_pool,
            glb_pool,
            dyn_pd,
            endpoints: Mutex::new(HashMap::new()),
            inner: Mutex::new(Inner {
                state: GraphState::Idle,
                nodes: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> GraphState {
        self.inner.lock().state
    }

    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    fn send_apm(&self, opcode: ApmOpcode, payload: Vec<u8>) -> GraphResult<Vec<u8>> {
        let packet =
            self.transport
                .allocate_packet(opcode as u32, self.cfg.src_port, self.cfg.dst_port, payload);
        info!("graph {:#x}: sending {:?}", self.cfg.graph_id, opcode);
        Ok(self
            .transport
            .send_cmd(self.sink.as_ref(), packet, self.cfg.cmd_timeout)?)
    }

    /// Looks up `gkv`/`ckv` via ACDB, adds the resolved subgraphs and edges
    /// to the process-wide pool, sends `GRAPH_OPEN` only for the subset that
    /// just transitioned open_ref_cnt 0->1, then applies calibration.
    /// Shared by `open` (first node) and `add_gkv` (every later node).
    fn do_open_node(&self, gkv: KeyVector, ckv: KeyVector) -> GraphResult<GkvNode> {
        let graph = self.acdb.get_graph(&gkv)?;
        if graph.sg_ids.is_empty() {
            debug!("graph {:#x}: open with zero subgraphs, no SPF traffic", self.cfg.graph_id);
            return Ok(GkvNode::new(gkv, ckv, Vec::new(), Vec::new()));
        }

        let props = self.acdb.get_subgraph_data(&graph.sg_ids)?;
        let conns = self.acdb.get_subgraph_connections(&graph.sg_ids)?;

        for p in &props {
            let (sg_id, proc_id, perf_mode, direction) = (p.sg_id, p.proc_id, p.perf_mode, p.direction);
            self.sg_pool
                .add(sg_id, || SubgraphRecord::new(sg_id, proc_id, perf_mode, direction));
        }

        let (pruned, _existing) = self.sg_pool.prune_sg_list(&graph.sg_ids);

        let mut new_edges = Vec::new();
        for edge in &conns {
            let (new, _existing) = self.sg_pool.add_children(edge.src_sg, &[edge.dst_sg]);
            new_edges.extend(new.into_iter().map(|dst| WireEdge {
                src_sg: edge.src_sg,
                dst_sg: dst,
            }));
        }
        self.sg_pool.update_child_refs();

        if !pruned.is_empty() || !new_edges.is_empty() {
            let sgl = SubGraphList::new(pruned.clone(), new_edges.clone());
            if let Err(err) = self.send_apm(ApmOpcode::GraphOpen, sgl.encode()) {
                warn!("graph {:#x}: GRAPH_OPEN failed, rolling back pool adds", self.cfg.graph_id);
                for sg in &graph.sg_ids {
                    self.sg_pool.remove(sg);
                }
                for edge in &new_edges {
                    self.sg_pool.remove_children(edge.src_sg, &[edge.dst_sg]);
                }
                return Err(err);
            }
        }

        let master = props.first().map(|p| p.proc_id.0).unwrap_or(0);
        let proc_ids: Vec<_> = props.iter().map(|p| p.proc_id).collect();
        let ss_mask = query_graph_ss_mask(&proc_ids);
        let is_dynamic = !gsl_mdf::is_master_proc(ss_mask);
        if is_dynamic {
            self.dyn_pd.register(ss_mask, &DynPdSink { instance: self })?;
        }

        let mut node = GkvNode::new(
            gkv,
            ckv,
            graph.sg_ids.clone(),
            conns.iter().map(|e| (e.src_sg, e.dst_sg)).collect(),
        );
        if is_dynamic {
            node.dyn_ss_mask = Some(ss_mask);
        }
        self.apply_calibration(&mut node, master)?;
        Ok(node)
    }

    /// `IDLE --open--> OPENED`: the first GKV node of a fresh instance.
    pub fn open(&self, gkv: KeyVector, ckv: KeyVector) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_error() {
            return Err(GraphError::WrongState(inner.state));
        }
        let node = self.do_open_node(gkv, ckv)?;
        inner.nodes.push(node);
        inner.state = GraphState::Opened;
        Ok(())
    }

    /// Adds another GKV node to an already-open instance without touching
    /// the nodes already present.
    pub fn add_gkv(&self, gkv: KeyVector, ckv: KeyVector) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        if inner.state == GraphState::Idle || inner.state.is_error() {
            return Err(GraphError::WrongState(inner.state));
        }
        let node = self.do_open_node(gkv, ckv)?;
        inner.nodes.push(node);
        Ok(())
    }

    /// Tears down the single GKV node matching `gkv`, releasing its pool
    /// contributions and sending `GRAPH_CLOSE` for whatever reaches zero,
    /// without otherwise disturbing the instance's remaining nodes or state.
    pub fn remove_gkv(&self, gkv: &KeyVector) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_error() && !inner.state.can_close_without_stop() {
            return Err(GraphError::WrongState(inner.state));
        }
        let skip_wire = inner.state.is_error();
        let Some(pos) = inner.nodes.iter().position(|n| &n.gkv == gkv) else {
            return Err(GraphError::Core(GslError::NotFound));
        };
        let node = inner.nodes.remove(pos);
        match self.teardown_node(node, skip_wire) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Atomic swap: opens `gkv`/`ckv` as a new node, then closes every node
    /// that existed before the call. The first open from `IDLE` behaves
    /// exactly like `open`.
    pub fn change(&self, gkv: KeyVector, ckv: KeyVector) -> GraphResult<()> {
        let (state, old_gkvs) = {
            let inner = self.inner.lock();
            (
                inner.state,
                inner.nodes.iter().map(|n| n.gkv.clone()).collect::<Vec<_>>(),
            )
        };
        if state == GraphState::Idle {
            return self.open(gkv, ckv);
        }

        self.add_gkv(gkv, ckv)?;

        let mut first_err = None;
        for old_gkv in old_gkvs {
            if let Err(err) = self.remove_gkv(&old_gkv) {
                warn!(
                    "graph {:#x}: change() failed to close a superseded GKV node, continuing",
                    self.cfg.graph_id
                );
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Non-persistent, then per-SG persistent, then global-persist
    /// calibration, in that order, per the documented calibration path.
    fn apply_calibration(&self, node: &mut GkvNode, master: u32) -> GraphResult<()> {
        for &sg in &node.sg_ids {
            let blob = self.acdb.get_subgraph_cal_nonpersist(sg, &node.ckv)?;
            if blob.is_empty() {
                continue;
            }
            let param = Param {
                module_instance_id: ModuleInstanceId(sg.0),
                param_id: sg.0,
                data: blob,
            };
            let payload = ParamPayload::for_single(&param).encode(param.param_id);
            self.send_apm(ApmOpcode::SetCfg, payload)?;
        }

        for &sg in &node.sg_ids {
            let not_started = self.sg_pool.with(&sg, |r| r.start_ref_cnt == 0).unwrap_or(true);
            if !not_started {
                continue;
            }
            let blob = self
                .acdb
                .get_subgraph_cal_persist(sg, &node.ckv, MemType::Persistent, 0)?;
            if blob.is_empty() {
                continue;
            }
            let param = Param {
                module_instance_id: ModuleInstanceId(sg.0),
                param_id: sg.0,
                data: blob,
            };
            let payload = ParamPayload::for_single(&param).encode(param.param_id);
            self.send_apm(ApmOpcode::RegisterCfg, payload)?;
        }

        for &sg in &node.sg_ids {
            let entries = self.acdb.get_subgraph_glb_persist_ids(sg, &node.ckv)?;
            for entry in entries {
                let data = self.acdb.get_subgraph_glb_persist_caldata(entry.cal_id)?;
                let len = data.len();
                self.glb_pool
                    .add(entry.cal_id, len, master, |buf| buf.copy_from_slice(&data));
                let registered = self.glb_pool.get(entry.cal_id).unwrap_or_default();
                let param = Param {
                    module_instance_id: ModuleInstanceId(entry.sg_id.0),
                    param_id: entry.cal_id,
                    data: registered,
                };
                let payload = ParamPayload::for_single(&param).encode(param.param_id);
                self.send_apm(ApmOpcode::RegisterSharedCfg, payload)?;
                node.glb_persist_cal_ids.push(entry.cal_id);
            }
        }

        Ok(())
    }

    /// Applies calibration to every open node's CKV. Re-registration is
    /// silently deferred while the graph is started; it takes effect on
    /// the next stop/start cycle.
    pub fn set_cal(&self, gkv: &KeyVector, ckv: KeyVector) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_error() {
            return Err(GraphError::WrongState(inner.state));
        }
        let started = inner.state == GraphState::Started;
        let Some(node) = inner.nodes.iter_mut().find(|n| &n.gkv == gkv) else {
            return Err(GraphError::Core(GslError::NotFound));
        };
        node.ckv = ckv;
        if started {
            debug!(
                "graph {:#x}: set_cal while STARTED, skipping global-persist registration",
                self.cfg.graph_id
            );
        }
        Ok(())
    }

    /// Sends `GRAPH_PREPARE` restricted to subgraphs with `start_ref_cnt==0`
    /// across every open node.
    pub fn prepare(&self) -> GraphResult<()> {
        let inner = self.inner.lock();
        if inner.state.is_error() {
            return Err(GraphError::WrongState(inner.state));
        }
        let to_prepare = self.filter_zero_start_ref(&inner.nodes);
        drop(inner);
        if !to_prepare.is_empty() {
            let sgl = SubGraphList::new(to_prepare, Vec::new());
            self.send_apm(ApmOpcode::GraphPrepare, sgl.encode())?;
        }
        Ok(())
    }

    fn filter_zero_start_ref(&self, nodes: &[GkvNode]) -> Vec<SgId> {
        let mut out = Vec::new();
        for node in nodes {
            for &sg in &node.sg_ids {
                if self.sg_pool.with(&sg, |r| r.start_ref_cnt == 0).unwrap_or(false) {
                    out.push(sg);
                }
            }
        }
        out
    }

    /// `OPENED|STOPPED --start--> STARTED`: sends `GRAPH_START` only to SGs
    /// whose `start_ref_cnt` is currently zero, then increments every node's
    /// contributed subgraphs regardless.
    pub fn start(&self) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, GraphState::Opened | GraphState::Stopped) {
            return Err(GraphError::WrongState(inner.state));
        }

        let mut to_start = Vec::new();
        for node in &inner.nodes {
            for &sg in &node.sg_ids {
                let was_zero = self
                    .sg_pool
                    .with(&sg, |r| {
                        let zero = r.start_ref_cnt == 0;
                        r.start_ref_cnt += 1;
                        zero
                    })
                    .unwrap_or(false);
                if was_zero {
                    to_start.push(sg);
                }
            }
        }

        if !to_start.is_empty() {
            let sgl = SubGraphList::new(to_start.clone(), Vec::new());
            if let Err(err) = self.send_apm(ApmOpcode::GraphStart, sgl.encode()) {
                warn!("graph {:#x}: GRAPH_START failed, rolling back ref counts", self.cfg.graph_id);
                for node in &inner.nodes {
                    for &sg in &node.sg_ids {
                        self.sg_pool
                            .with(&sg, |r| r.start_ref_cnt = r.start_ref_cnt.saturating_sub(1));
                    }
                }
                return Err(err);
            }
        }

        for node in &mut inner.nodes {
            for &sg in &node.sg_ids {
                node.sg_start_mask.insert(sg);
            }
        }
        inner.state = GraphState::Started;
        Ok(())
    }

    /// `STARTED --stop--> STOPPED`: sends `GRAPH_STOP` only to SGs whose
    /// `start_ref_cnt` is exactly 1 (this node is the last start-holder)
    /// and whose `stop_ref_cnt` is zero.
    pub fn stop(&self) -> GraphResult<()> {
        self.stop_filtered(None)
    }

    /// Like `stop`, but SGs named in `already_down` have their refcount
    /// released locally without a `GRAPH_STOP` being sent for them — for a
    /// caller that already knows those subgraphs' subsystem is unreachable.
    pub fn stop_with_properties(&self, already_down: &[SgId]) -> GraphResult<()> {
        self.stop_filtered(Some(already_down))
    }

    fn stop_filtered(&self, already_down: Option<&[SgId]>) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != GraphState::Started {
            return Err(GraphError::WrongState(inner.state));
        }
        let skip: HashSet<SgId> = already_down.map(|s| s.iter().copied().collect()).unwrap_or_default();

        let mut to_stop = Vec::new();
        for node in &inner.nodes {
            for &sg in &node.sg_start_mask {
                let send = self
                    .sg_pool
                    .with(&sg, |r| {
                        let send = r.start_ref_cnt == 1 && r.stop_ref_cnt == 0;
                        r.start_ref_cnt = r.start_ref_cnt.saturating_sub(1);
                        send
                    })
                    .unwrap_or(false);
                if send && !skip.contains(&sg) {
                    to_stop.push(sg);
                }
            }
        }

        if !to_stop.is_empty() {
            let sgl = SubGraphList::new(to_stop, Vec::new());
            if let Err(err) = self.send_apm(ApmOpcode::GraphStop, sgl.encode()) {
                warn!("graph {:#x}: GRAPH_STOP failed, rolling back ref counts", self.cfg.graph_id);
                for node in &inner.nodes {
                    for &sg in &node.sg_start_mask {
                        self.sg_pool
                            .with(&sg, |r| r.start_ref_cnt += 1);
                    }
                }
                return Err(err);
            }
        }

        for node in &mut inner.nodes {
            let started: Vec<SgId> = node.sg_start_mask.iter().copied().collect();
            for sg in started {
                node.sg_start_mask.remove(&sg);
                node.sg_stop_mask.insert(sg);
            }
        }
        inner.state = GraphState::Stopped;
        Ok(())
    }

    /// `STARTED --suspend--> STOPPED`: SGs this instance is the sole opener
    /// of (`open_ref_cnt <= 1`) get `GRAPH_SUSPEND`; SGs shared with another
    /// instance get `GRAPH_STOP` instead, since suspending them would also
    /// suspend the other instance's signal path.
    pub fn suspend(&self) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != GraphState::Started {
            return Err(GraphError::WrongState(inner.state));
        }

        let mut to_stop = Vec::new();
        let mut to_suspend = Vec::new();
        for node in &inner.nodes {
            for &sg in &node.sg_start_mask {
                let exclusive = self.sg_pool.open_ref_cnt(&sg) <= 1;
                self.sg_pool
                    .with(&sg, |r| r.start_ref_cnt = r.start_ref_cnt.saturating_sub(1));
                if exclusive {
                    to_suspend.push(sg);
                } else {
                    to_stop.push(sg);
                }
            }
        }

        let rollback = |instance: &Self, inner: &Inner| {
            for node in &inner.nodes {
                for &sg in &node.sg_start_mask {
                    instance.sg_pool.with(&sg, |r| r.start_ref_cnt += 1);
                }
            }
        };

        if !to_stop.is_empty() {
            let sgl = SubGraphList::new(to_stop, Vec::new());
            if let Err(err) = self.send_apm(ApmOpcode::GraphStop, sgl.encode()) {
                warn!("graph {:#x}: GRAPH_STOP failed during suspend, rolling back ref counts", self.cfg.graph_id);
                rollback(self, &inner);
                return Err(err);
            }
        }
        if !to_suspend.is_empty() {
            let sgl = SubGraphList::new(to_suspend, Vec::new());
            if let Err(err) = self.send_apm(ApmOpcode::GraphSuspend, sgl.encode()) {
                warn!("graph {:#x}: GRAPH_SUSPEND failed, rolling back ref counts", self.cfg.graph_id);
                rollback(self, &inner);
                return Err(err);
            }
        }

        for node in &mut inner.nodes {
            let started: Vec<SgId> = node.sg_start_mask.iter().copied().collect();
            for sg in started {
                node.sg_start_mask.remove(&sg);
                node.sg_stop_mask.insert(sg);
            }
        }
        inner.state = GraphState::Stopped;
        Ok(())
    }

    /// `STARTED|STOPPED --flush--> same`: quiesces every datapath endpoint,
    /// sends `GRAPH_FLUSH` for this instance's subgraphs, then re-queues
    /// read endpoints.
    pub fn flush(&self) -> GraphResult<()> {
        let inner = self.inner.lock();
        if !matches!(inner.state, GraphState::Started | GraphState::Stopped) {
            return Err(GraphError::WrongState(inner.state));
        }
        let sgs: Vec<SgId> = inner.nodes.iter().flat_map(|n| n.sg_ids.iter().copied()).collect();
        drop(inner);

        let endpoints: Vec<Arc<DataEndpoint>> = self.endpoints.lock().values().cloned().collect();
        for ep in &endpoints {
            ep.quiesce(self.cfg.cmd_timeout);
        }

        if !sgs.is_empty() {
            let sgl = SubGraphList::new(sgs, Vec::new());
            self.send_apm(ApmOpcode::GraphFlush, sgl.encode())?;
        }

        for ep in &endpoints {
            if ep.direction() == Direction::Read {
                ep.queue_all_for_read()?;
            }
        }
        Ok(())
    }

    /// Releases everything one GKV node holds: global-persist cal, the
    /// start/stop refcount contributions it still carries if closed without
    /// an intervening `stop`, its subgraph/edge pool entries, and its
    /// dynamic-PD registration. Sends `GRAPH_CLOSE` for whatever reaches
    /// zero unless `skip_wire` (SSR already took the subsystem down).
    /// Returns the wire error, if any, so callers can continue tearing down
    /// the rest of the instance before surfacing it.
    fn teardown_node(&self, node: GkvNode, skip_wire: bool) -> Option<GraphError> {
        for cal_id in &node.glb_persist_cal_ids {
            self.glb_pool.remove(*cal_id);
        }

        for sg in &node.sg_start_mask {
            self.sg_pool
                .with(sg, |r| r.start_ref_cnt = r.start_ref_cnt.saturating_sub(1));
        }
        for sg in &node.sg_stop_mask {
            self.sg_pool
                .with(sg, |r| r.stop_ref_cnt = r.stop_ref_cnt.saturating_sub(1));
        }

        let mut closed_sgs = Vec::new();
        for &sg in &node.sg_ids {
            if self.sg_pool.remove(&sg) {
                closed_sgs.push(sg);
            }
        }
        let mut closed_edges = Vec::new();
        for (src, dst) in &node.edges {
            for removed in self.sg_pool.remove_children(*src, &[*dst]) {
                closed_edges.push(WireEdge {
                    src_sg: *src,
                    dst_sg: removed,
                });
            }
        }

        let mut err = None;
        if !skip_wire && (!closed_sgs.is_empty() || !closed_edges.is_empty()) {
            let sgl = SubGraphList::new(closed_sgs, closed_edges);
            if let Err(e) = self.send_apm(ApmOpcode::GraphClose, sgl.encode()) {
                warn!(
                    "graph {:#x}: GRAPH_CLOSE failed for one node, continuing teardown of the rest",
                    self.cfg.graph_id
                );
                err = Some(e);
            }
        }

        if let Some(mask) = node.dyn_ss_mask {
            self.dyn_pd.deregister(mask, &DynPdSink { instance: self });
        }
        err
    }

    /// Tail-first per-GKV-node teardown, per the partial-success-on-teardown
    /// policy: a wire failure on one node does not abort the rest, and the
    /// first failure is returned once every node has been processed.
    pub fn close(&self) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_error() && !inner.state.can_close_without_stop() {
            return Err(GraphError::WrongState(inner.state));
        }
        let skip_wire = inner.state.is_error();

        let mut first_err = None;
        while let Some(node) = inner.nodes.pop() {
            if let Some(err) = self.teardown_node(node, skip_wire) {
                first_err.get_or_insert(err);
            }
        }

        self.transport.deregister_port(self.cfg.src_port);
        inner.state = GraphState::Idle;
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Like `close`, but SGs named in `already_down` are torn down locally
    /// (pool refcounts released, cal deregistered) without sending
    /// `GRAPH_CLOSE` for them, for a caller that already knows those
    /// subgraphs' subsystem is unreachable (e.g. mid-SSR partial cleanup).
    pub fn close_with_properties(&self, already_down: &[SgId]) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_error() && !inner.state.can_close_without_stop() {
            return Err(GraphError::WrongState(inner.state));
        }
        let skip: HashSet<SgId> = already_down.iter().copied().collect();

        let mut first_err = None;
        while let Some(node) = inner.nodes.pop() {
            let skip_wire = inner.state.is_error() || node.sg_ids.iter().any(|sg| skip.contains(sg));
            if let Some(err) = self.teardown_node(node, skip_wire) {
                first_err.get_or_insert(err);
            }
        }

        self.transport.deregister_port(self.cfg.src_port);
        inner.state = GraphState::Idle;
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves `tag`/`tkv` via ACDB and sends the result as `SET_CFG`
    /// addressed to the tag's module instance.
    pub fn set_config(&self, gkv: &KeyVector, tag: TagId, tkv: KeyVector) -> GraphResult<()> {
        let inner = self.inner.lock();
        if inner.state.is_error() {
            return Err(GraphError::WrongState(inner.state));
        }
        if !inner.nodes.iter().any(|n| &n.gkv == gkv) {
            return Err(GraphError::Core(GslError::NotFound));
        }
        drop(inner);

        let data = self.acdb.get_module_tag_data(tag, &tkv)?;
        if data.is_empty() {
            return Ok(());
        }
        let modules = self.acdb.get_tagged_modules(tag)?;
        let miid = modules.first().copied().ok_or(GslError::NotFound)?;
        let param = Param {
            module_instance_id: miid,
            param_id: tag.0,
            data,
        };
        let payload = ParamPayload::for_single(&param).encode(param.param_id);
        self.send_apm(ApmOpcode::SetCfg, payload)?;
        Ok(())
    }

    /// Sends a caller-packed multi-parameter `SET_CFG` blob straight through,
    /// addressed to the APM module by the caller's own packing convention.
    pub fn set_custom_config(&self, payload: Vec<u8>) -> GraphResult<()> {
        let inner = self.inner.lock();
        if inner.state.is_error() {
            return Err(GraphError::WrongState(inner.state));
        }
        drop(inner);
        self.send_apm(ApmOpcode::SetCfg, payload)?;
        Ok(())
    }

    /// Sends `GET_CFG` with `buf`'s current contents as the request payload
    /// (param ids the caller wants read back) and copies the reply into it.
    pub fn get_custom_config(&self, buf: &mut [u8]) -> GraphResult<usize> {
        let inner = self.inner.lock();
        if inner.state.is_error() {
            return Err(GraphError::WrongState(inner.state));
        }
        drop(inner);
        let reply = self.send_apm(ApmOpcode::GetCfg, buf.to_vec())?;
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    /// Resolves `tag` to its module instance and sends `payload` as a
    /// non-persistent `SET_CFG`.
    pub fn set_tagged_custom_config(&self, tag: TagId, payload: Vec<u8>) -> GraphResult<()> {
        let miid = self.tag_to_miid(tag)?;
        let param = Param {
            module_instance_id: miid,
            param_id: tag.0,
            data: payload,
        };
        let encoded = ParamPayload::for_single(&param).encode(param.param_id);
        self.send_apm(ApmOpcode::SetCfg, encoded)?;
        Ok(())
    }

    /// Like `set_tagged_custom_config`, but registers the blob as persistent
    /// via `REGISTER_CFG` and invokes the ACDB delta-save hook afterward.
    pub fn set_tagged_custom_config_persist(&self, tag: TagId, payload: Vec<u8>) -> GraphResult<()> {
        let miid = self.tag_to_miid(tag)?;
        let param = Param {
            module_instance_id: miid,
            param_id: tag.0,
            data: payload,
        };
        let encoded = ParamPayload::for_single(&param).encode(param.param_id);
        self.send_apm(ApmOpcode::RegisterCfg, encoded)?;
        self.acdb.save_delta()?;
        Ok(())
    }

    /// Resolves `tag` to its module instance, sends `GET_CFG`, and copies
    /// the reply into `buf`.
    pub fn get_tagged_custom_config(&self, tag: TagId, buf: &mut [u8]) -> GraphResult<usize> {
        let miid = self.tag_to_miid(tag)?;
        let param = Param {
            module_instance_id: miid,
            param_id: tag.0,
            data: buf.to_vec(),
        };
        let encoded = ParamPayload::for_single(&param).encode(param.param_id);
        let reply = self.send_apm(ApmOpcode::GetCfg, encoded)?;
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn tag_to_miid(&self, tag: TagId) -> GraphResult<ModuleInstanceId> {
        let inner = self.inner.lock();
        if inner.state.is_error() {
            return Err(GraphError::WrongState(inner.state));
        }
        drop(inner);
        let modules = self.acdb.get_tagged_modules(tag)?;
        modules.first().copied().ok_or(GraphError::Core(GslError::NotFound))
    }

    /// Registers for module-originated events via `REGISTER_MODULE_EVENTS`.
    pub fn register_custom_event(&self, event_payload: Vec<u8>) -> GraphResult<()> {
        let inner = self.inner.lock();
        if inner.state.is_error() {
            return Err(GraphError::WrongState(inner.state));
        }
        drop(inner);
        self.send_apm(ApmOpcode::RegisterModuleEvents, event_payload)?;
        Ok(())
    }

    /// Allocates a read or write datapath ring against the module instance
    /// `cfg.tag` resolves to, keyed by that tag for `write`/`read`.
    pub fn configure_data_path(&self, direction: Direction, cfg: EndpointConfig) -> GraphResult<()> {
        let inner = self.inner.lock();
        if inner.state.is_error() {
            return Err(GraphError::WrongState(inner.state));
        }
        drop(inner);

        let endpoint = Arc::new(DataEndpoint::new(
            direction,
            self.cfg.src_port,
            self.cfg.dst_port,
            self.cfg.cmd_timeout,
            Arc::clone(&self.acdb),
            Arc::clone(&self.transport),
            Arc::clone(&self.sink),
        ));
        endpoint.configure(&cfg)?;
        self.endpoints.lock().insert(cfg.tag, endpoint);
        Ok(())
    }

    fn endpoint_for(&self, tag: TagId) -> GraphResult<Arc<DataEndpoint>> {
        self.endpoints
            .lock()
            .get(&tag)
            .cloned()
            .ok_or(GraphError::Core(GslError::NotFound))
    }

    /// Writes through the write endpoint configured for `tag`.
    pub fn write(&self, tag: TagId, bytes: &[u8]) -> GraphResult<usize> {
        self.endpoint_for(tag)?.write(bytes)
    }

    /// Reads through the read endpoint configured for `tag`.
    pub fn read(&self, tag: TagId, out: &mut [u8]) -> GraphResult<usize> {
        self.endpoint_for(tag)?.read(out)
    }

    /// Forces the instance into `ERROR`/`ERROR_ALLOW_CLEANUP`; every
    /// subsequent command except `close` fails.
    pub fn notify_ssr(&self, allow_cleanup: bool) {
        let mut inner = self.inner.lock();
        warn!("graph {:#x}: forced into ERROR by SSR", self.cfg.graph_id);
        inner.state = GraphState::Error { allow_cleanup };
    }
}
