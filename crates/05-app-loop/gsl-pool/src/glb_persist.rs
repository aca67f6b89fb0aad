use gsl_common::{RefCountPool, RemoveOutcome};
use parking_lot::Mutex;

/// A global-persist calibration blob shared across graph instances.
#[derive(Clone, Debug, Default)]
pub struct GlbPersistEntry {
    pub data: Vec<u8>,
    pub master: u32,
}

/// Process-wide map `cal_id -> {refcount, shmem-allocation}`.
#[derive(Default)]
pub struct GlbPersistPool {
    pool: RefCountPool<u32, Mutex<GlbPersistEntry>>,
}

pub enum AddResult {
    /// Newly allocated; the caller should populate `data` through the
    /// returned mutable access before releasing the lock.
    New,
    /// Already registered by another graph; refcount incremented.
    Existing,
}

impl GlbPersistPool {
    pub fn new() -> Self {
        Self {
            pool: RefCountPool::new(),
        }
    }

    /// Registers `cal_id`, allocating a zero-filled `size`-byte blob on the
    /// 0->1 transition. Runs `populate` against the entry only when it was
    /// freshly created, matching "data pointer null" on the existing path.
    pub fn add(&self, cal_id: u32, size: usize, master: u32, populate: impl FnOnce(&mut [u8])) -> AddResult {
        let (created, _refcount) = self.pool.add(cal_id, || {
            Mutex::new(GlbPersistEntry {
                data: vec![0u8; size],
                master,
            })
        });
        if created {
            self.pool.with(&cal_id, |entry| populate(&mut entry.lock().data));
            AddResult::New
        } else {
            AddResult::Existing
        }
    }

    pub fn remove(&self, cal_id: u32) -> bool {
        matches!(self.pool.remove(&cal_id), RemoveOutcome::Freed(_))
    }

    pub fn get(&self, cal_id: u32) -> Option<Vec<u8>> {
        self.pool.with(&cal_id, |entry| entry.lock().data.clone())
    }

    pub fn refcount(&self, cal_id: u32) -> u32 {
        self.pool.refcount(&cal_id).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_is_populated_existing_is_not() {
        let pool = GlbPersistPool::new();
        let mut populated_first = false;
        pool.add(1, 4, 0, |buf| {
            buf.copy_from_slice(&7u32.to_le_bytes());
            populated_first = true;
        });
        assert!(populated_first);
        assert_eq!(pool.get(1).unwrap(), 7u32.to_le_bytes());

        pool.add(1, 4, 0, |_| panic!("should not run for existing entry"));
        assert_eq!(pool.refcount(1), 2);
    }

    #[test]
    fn remove_frees_on_last_reference() {
        let pool = GlbPersistPool::new();
        pool.add(1, 4, 0, |_| {});
        pool.add(1, 4, 0, |_| {});
        assert!(!pool.remove(1));
        assert!(pool.remove(1));
        assert_eq!(pool.get(1), None);
    }
}
