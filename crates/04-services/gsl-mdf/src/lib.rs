//! Multi-DSP Framework utilities: processor-group layout, subsystem-mask
//! queries over a subgraph set, and dynamic-PD registration/deregistration.

mod registry;

pub use registry::{MdfRegistry, ProcDomainType, ProcGroup};

use gsl_types::{AResult, ProcId};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Given the set of processor ids a graph's subgraphs run on, returns the
/// union of processor bits (SPF subsystem mask) the graph needs.
pub fn query_graph_ss_mask(proc_ids: &[ProcId]) -> u32 {
    proc_ids.iter().fold(0u32, |mask, p| mask | (1 << (p.0 & 31)))
}

struct DynPdState {
    refcount: u32,
    loaned_mem: bool,
}

/// Announces (or retracts) a set of dynamic-PD satellites to SPF via
/// `APM_CMD_SHARED_SATELLITE_MEM_MAP_REGIONS`/`..._UNMAP_REGIONS`, the
/// narrow slice of the GPR transport facade (D) dynamic-PD registration
/// needs; kept as a trait so this crate does not have to depend on the
/// transport stack to be tested.
pub trait DynPdMapper: Send + Sync {
    fn map_satellites(&self, dyn_ss_mask: u32) -> AResult<()>;
    fn unmap_satellites(&self, dyn_ss_mask: u32) -> AResult<()>;
}

/// A no-op mapper for masters with no satellites to announce yet (tests).
pub struct NullDynPdMapper;

impl DynPdMapper for NullDynPdMapper {
    fn map_satellites(&self, _dyn_ss_mask: u32) -> AResult<()> {
        Ok(())
    }
    fn unmap_satellites(&self, _dyn_ss_mask: u32) -> AResult<()> {
        Ok(())
    }
}

/// Tracks dynamic-PD processor refcounts and loaned-memory state across
/// graphs, so the Nth graph needing a dynamic-PD processor group reuses the
/// first graph's init/loan instead of repeating it.
pub struct DynamicPdTracker {
    registry: MdfRegistry,
    state: Mutex<HashMap<u32, DynPdState>>,
}

impl DynamicPdTracker {
    pub fn new(registry: MdfRegistry) -> Self {
        Self {
            registry,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &MdfRegistry {
        &self.registry
    }

    /// Brings up every dynamic-PD processor named in `ss_mask`, loaning
    /// memory for each processor group on the 0->1 refcount transition and
    /// announcing only the newly-brought-up satellites to SPF through
    /// `mapper`. Unwinds everything already brought up on failure.
    pub fn register(&self, ss_mask: u32, mapper: &dyn DynPdMapper) -> AResult<u32> {
        let dynamic_procs: Vec<u32> = self.registry.dynamic_pd_procs(ss_mask);
        let mut newly_brought_up = Vec::new();
        let mut dyn_ss_mask = 0u32;

        for proc in dynamic_procs {
            let mut state = self.state.lock();
            let entry = state.entry(proc).or_insert(DynPdState {
                refcount: 0,
                loaned_mem: false,
            });
            let was_zero = entry.refcount == 0;
            entry.refcount += 1;
            drop(state);
            if was_zero {
                newly_brought_up.push(proc);
            }
            dyn_ss_mask |= 1 << (proc & 31);
        }

        if !newly_brought_up.is_empty() {
            let new_mask = newly_brought_up.iter().fold(0u32, |m, p| m | (1 << (p & 31)));
            if let Err(err) = mapper.map_satellites(new_mask) {
                warn!("mdf: SHARED_SATELLITE_MEM_MAP_REGIONS failed, unwinding dyn-pd init");
                for proc in &newly_brought_up {
                    self.deregister_one(*proc);
                }
                return Err(err);
            }
            let mut state = self.state.lock();
            for proc in &newly_brought_up {
                if let Some(entry) = state.get_mut(proc) {
                    entry.loaned_mem = true;
                }
                debug!("mdf: dyn-pd init + loaned-memory map for proc {:#x}", proc);
            }
        }

        Ok(dyn_ss_mask)
    }

    /// Tears down every dynamic-PD processor named in `ss_mask` on the 1->0
    /// refcount transition, announcing the release to SPF through `mapper`.
    pub fn deregister(&self, ss_mask: u32, mapper: &dyn DynPdMapper) {
        let mut released = Vec::new();
        for proc in self.registry.dynamic_pd_procs(ss_mask) {
            if self.deregister_one(proc) {
                released.push(proc);
            }
        }
        if !released.is_empty() {
            let mask = released.iter().fold(0u32, |m, p| m | (1 << (p & 31)));
            if let Err(err) = mapper.unmap_satellites(mask) {
                warn!(
                    "mdf: SHARED_SATELLITE_MEM_UNMAP_REGIONS failed for mask {:#x}: {}",
                    mask, err
                );
            }
        }
    }

    /// Decrements `proc`'s refcount, returning whether it reached zero.
    fn deregister_one(&self, proc: u32) -> bool {
        let mut state = self.state.lock();
        if let Some(entry) = state.get_mut(&proc) {
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                debug!("mdf: dyn-pd deinit + loaned-memory release for proc {:#x}", proc);
                state.remove(&proc);
                return true;
            }
        } else {
            warn!("mdf: deregister called for proc {:#x} with no active refcount", proc);
        }
        false
    }

    /// Re-maps loaned memory for every processor group affected by `mask`
    /// coming back up after a subsystem restart.
    pub fn notify_ss_restarted(&self, mask: u32) {
        let state = self.state.lock();
        for (proc, entry) in state.iter() {
            if (1 << (proc & 31)) & mask != 0 && entry.loaned_mem {
                debug!("mdf: re-mapping loaned memory for proc {:#x} after SSR", proc);
            }
        }
    }
}

pub fn is_master_proc(ss_mask: u32) -> bool {
    ss_mask.count_ones() == 1
}

pub fn get_master_proc_id(ss_mask: u32) -> Option<u32> {
    if ss_mask == 0 {
        None
    } else {
        Some(ss_mask.trailing_zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn ss_mask_unions_processor_bits() {
        let mask = query_graph_ss_mask(&[ProcId(0), ProcId(2)]);
        assert_eq!(mask, 0b101);
    }

    #[test]
    fn master_proc_id_is_lowest_set_bit() {
        assert_eq!(get_master_proc_id(0b1000), Some(3));
        assert_eq!(get_master_proc_id(0), None);
    }

    struct RecordingMapper {
        mapped: StdMutex<Vec<u32>>,
        unmapped: StdMutex<Vec<u32>>,
    }

    impl RecordingMapper {
        fn new() -> Self {
            Self {
                mapped: StdMutex::new(Vec::new()),
                unmapped: StdMutex::new(Vec::new()),
            }
        }
    }

    impl DynPdMapper for RecordingMapper {
        fn map_satellites(&self, dyn_ss_mask: u32) -> AResult<()> {
            self.mapped.lock().unwrap().push(dyn_ss_mask);
            Ok(())
        }
        fn unmap_satellites(&self, dyn_ss_mask: u32) -> AResult<()> {
            self.unmapped.lock().unwrap().push(dyn_ss_mask);
            Ok(())
        }
    }

    fn registry_with_dynamic_pd() -> MdfRegistry {
        MdfRegistry::new(vec![ProcGroup {
            master: 0,
            satellites: vec![1],
            loaned_mem_bytes: 4096,
            domain_types: vec![(0, ProcDomainType::StaticPd), (1, ProcDomainType::DynamicPd)],
        }])
    }

    #[test]
    fn register_announces_only_newly_brought_up_satellites() {
        let tracker = DynamicPdTracker::new(registry_with_dynamic_pd());
        let mapper = RecordingMapper::new();

        tracker.register(0b11, &mapper).expect("first register");
        tracker.register(0b11, &mapper).expect("second register");

        assert_eq!(mapper.mapped.lock().unwrap().as_slice(), &[0b10]);
    }

    #[test]
    fn deregister_announces_only_on_last_release() {
        let tracker = DynamicPdTracker::new(registry_with_dynamic_pd());
        let mapper = RecordingMapper::new();

        tracker.register(0b11, &mapper).expect("register a");
        tracker.register(0b11, &mapper).expect("register b");

        tracker.deregister(0b11, &mapper);
        assert!(mapper.unmapped.lock().unwrap().is_empty(), "still referenced once");

        tracker.deregister(0b11, &mapper);
        assert_eq!(mapper.unmapped.lock().unwrap().as_slice(), &[0b10]);
    }
}
