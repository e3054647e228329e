//! RAII handle over a pooled job (§3 `get_ref`/`put_ref`).

use crate::job::{CoreId, JobData};
use crate::pool::JobPool;
use std::sync::Arc;

/// An owned reference to a job living in some core's [`JobPool`].
///
/// Cloning a `JobRef` bumps the job's refcount; dropping one releases it. The core tagged on
/// a given `JobRef` (`releaser_core`) determines whether release takes the pool's local
/// (unlocked) or remote (mutex-protected) path — callers holding a ref on behalf of a core other
/// than the pool's owner must construct it via [`JobRef::retagged_for`] so release is routed
/// correctly.
pub struct JobRef {
    pool: Arc<JobPool>,
    index: usize,
    releaser_core: CoreId,
}

impl JobRef {
    /// Wrap an index already allocated in `pool` as a ref held on behalf of `holder_core`.
    /// Does not bump the refcount — use when you already own the initial reference from
    /// [`JobPool::alloc`].
    #[must_use]
    pub fn from_owned_index(pool: Arc<JobPool>, index: usize, holder_core: CoreId) -> Self {
        Self {
            pool,
            index,
            releaser_core: holder_core,
        }
    }

    /// The slot index within the owning pool.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Shared view of the job's data.
    #[must_use]
    pub fn data(&self) -> &JobData {
        self.pool.get(self.index)
    }

    /// Mutable view; owner-core threads only (see [`JobPool::get_mut`]).
    pub fn data_mut(&self) -> &mut JobData {
        self.pool.get_mut(self.index)
    }

    /// Produce a second handle to the same job, tagged for release on `holder_core`. Used when
    /// handing a completion or migration reference to another core.
    #[must_use]
    pub fn clone_for(&self, holder_core: CoreId) -> Self {
        self.pool.get_ref(self.index);
        Self {
            pool: Arc::clone(&self.pool),
            index: self.index,
            releaser_core: holder_core,
        }
    }

    /// `true` if releasing this handle takes the pool's unlocked local free-list path.
    #[must_use]
    fn releases_locally(&self) -> bool {
        self.releaser_core == self.pool.owner_core()
    }
}

impl Drop for JobRef {
    fn drop(&mut self) {
        self.pool.put_ref(self.index, self.releases_locally());
    }
}

impl std::fmt::Debug for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRef")
            .field("index", &self.index)
            .field("releaser_core", &self.releaser_core)
            .field("pool_owner", &self.pool.owner_core())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_config::MAX_CRITICALITY_LEVELS;

    fn sample_job(pool_origin: CoreId) -> JobData {
        JobData::new(
            rt_config::TaskId(7),
            1,
            0,
            10,
            [10; MAX_CRITICALITY_LEVELS],
            [3; MAX_CRITICALITY_LEVELS],
            3,
            false,
            pool_origin,
            1,
        )
    }

    #[test]
    fn clone_for_other_core_releases_remotely() {
        let pool = Arc::new(JobPool::new(0, 2));
        let idx = pool.alloc(sample_job(0)).unwrap();
        let primary = JobRef::from_owned_index(Arc::clone(&pool), idx, 0);
        let remote = primary.clone_for(1);
        assert_eq!(pool.len_occupied(), 1);
        drop(remote);
        assert_eq!(pool.len_occupied(), 1, "primary ref still alive");
        drop(primary);
        assert_eq!(pool.len_occupied(), 0);
    }
}
