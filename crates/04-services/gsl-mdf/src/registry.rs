/// Whether a processor domain must be brought up on demand (dynamic) or is
/// always resident (static), per `gsl_mdf_utils.h`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcDomainType {
    StaticPd,
    DynamicPd,
}

/// One master + N satellites processor group, as loaded from ACDB at init
/// time and cached for the life of the process.
#[derive(Clone, Debug)]
pub struct ProcGroup {
    pub master: u32,
    pub satellites: Vec<u32>,
    pub loaned_mem_bytes: usize,
    pub domain_types: Vec<(u32, ProcDomainType)>,
}

/// Process-wide cache of processor-group layout, loaded once from ACDB via
/// `query_proc_domain_info`/`query_master_proc_ids` and never mutated
/// afterward (mirrors `gsl_mdf_utils_init`/`_deinit`).
pub struct MdfRegistry {
    groups: Vec<ProcGroup>,
}

impl MdfRegistry {
    pub fn new(groups: Vec<ProcGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[ProcGroup] {
        &self.groups
    }

    pub fn get_master_proc_ids(&self) -> Vec<u32> {
        self.groups.iter().map(|g| g.master).collect()
    }

    pub fn get_proc_domain_info(&self) -> Vec<(u32, ProcDomainType)> {
        self.groups
            .iter()
            .flat_map(|g| g.domain_types.iter().copied())
            .collect()
    }

    pub fn is_dynamic_pd(&self, proc_id: u32) -> bool {
        self.get_dynamic_pd_state(proc_id) == Some(ProcDomainType::DynamicPd)
    }

    pub fn get_dynamic_pd_state(&self, proc_id: u32) -> Option<ProcDomainType> {
        self.groups
            .iter()
            .flat_map(|g| g.domain_types.iter())
            .find(|(id, _)| *id == proc_id)
            .map(|(_, ty)| *ty)
    }

    /// Processors within `ss_mask` configured as dynamic-PD.
    pub fn dynamic_pd_procs(&self, ss_mask: u32) -> Vec<u32> {
        self.groups
            .iter()
            .flat_map(|g| g.domain_types.iter())
            .filter(|(id, ty)| *ty == ProcDomainType::DynamicPd && (ss_mask & (1 << (id & 31))) != 0)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MdfRegistry {
        MdfRegistry::new(vec![ProcGroup {
            master: 0,
            satellites: vec![1, 2],
            loaned_mem_bytes: 4096,
            domain_types: vec![
                (0, ProcDomainType::StaticPd),
                (1, ProcDomainType::DynamicPd),
                (2, ProcDomainType::StaticPd),
            ],
        }])
    }

    #[test]
    fn dynamic_pd_procs_filters_by_mask_and_type() {
        let reg = registry();
        assert_eq!(reg.dynamic_pd_procs(0b111), vec![1]);
        assert_eq!(reg.dynamic_pd_procs(0b100), Vec::<u32>::new());
    }

    #[test]
    fn is_dynamic_pd_reflects_registry() {
        let reg = registry();
        assert!(reg.is_dynamic_pd(1));
        assert!(!reg.is_dynamic_pd(0));
    }
}
