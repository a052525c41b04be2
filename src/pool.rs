//! Worker pools and the idle queue of the active pool.
//!
//! Two pools live side by side for the whole session. Only the active one
//! feeds the idle queue; a worker of the other pool that finishes is marked
//! idle but left out of the queue until its pool is activated again.

use std::collections::VecDeque;
use std::fmt;

use crate::config::ExecutionProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolTag {
    Primary,
    Secondary,
}

impl PoolTag {
    pub fn other(self) -> Self {
        match self {
            PoolTag::Primary => PoolTag::Secondary,
            PoolTag::Secondary => PoolTag::Primary,
        }
    }

    /// Name of the execution mode a pool stands for.
    pub fn mode_name(self) -> &'static str {
        match self {
            PoolTag::Primary => "USER_SPECIFIED",
            PoolTag::Secondary => "MIN_LATENCY",
        }
    }
}

impl fmt::Display for PoolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolTag::Primary => write!(f, "primary"),
            PoolTag::Secondary => write!(f, "secondary"),
        }
    }
}

/// An execution slot, bound to its pool for life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId {
    pool: PoolTag,
    index: usize,
}

impl WorkerId {
    pub fn new(pool: PoolTag, index: usize) -> Self {
        Self { pool, index }
    }

    pub fn pool(self) -> PoolTag {
        self.pool
    }

    pub fn index(self) -> usize {
        self.index
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.pool, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    tag: PoolTag,
    profile: ExecutionProfile,
    states: Vec<WorkerState>,
}

impl WorkerPool {
    pub fn new(tag: PoolTag, size: usize, profile: ExecutionProfile) -> Self {
        Self {
            tag,
            profile,
            states: vec![WorkerState::Idle; size],
        }
    }

    pub fn tag(&self) -> PoolTag {
        self.tag
    }

    pub fn profile(&self) -> &ExecutionProfile {
        &self.profile
    }

    pub fn size(&self) -> usize {
        self.states.len()
    }

    pub fn workers(&self) -> impl Iterator<Item = WorkerId> + '_ {
        let pool = self.tag;
        (0..self.states.len()).map(move |index| WorkerId { pool, index })
    }

    pub fn state(&self, worker: WorkerId) -> Option<WorkerState> {
        if worker.pool != self.tag {
            return None;
        }
        self.states.get(worker.index).copied()
    }

    pub fn busy(&self) -> usize {
        self.states
            .iter()
            .filter(|state| **state == WorkerState::Busy)
            .count()
    }

    fn set_state(&mut self, worker: WorkerId, state: WorkerState) {
        self.states[worker.index] = state;
    }
}

/// Both pools, the active tag and the idle queue of the active pool.
///
/// Keeps `idle + busy(active) == size(active)` across every operation.
#[derive(Debug)]
pub struct PoolSet {
    primary: WorkerPool,
    secondary: WorkerPool,
    active: PoolTag,
    idle: VecDeque<WorkerId>,
}

impl PoolSet {
    /// Starts with the primary pool active and all of its workers idle.
    pub fn new(primary: WorkerPool, secondary: WorkerPool) -> Self {
        let mut pools = Self {
            primary,
            secondary,
            active: PoolTag::Primary,
            idle: VecDeque::new(),
        };
        pools.activate(PoolTag::Primary);
        pools
    }

    pub fn active(&self) -> PoolTag {
        self.active
    }

    pub fn pool(&self, tag: PoolTag) -> &WorkerPool {
        match tag {
            PoolTag::Primary => &self.primary,
            PoolTag::Secondary => &self.secondary,
        }
    }

    fn pool_mut(&mut self, tag: PoolTag) -> &mut WorkerPool {
        match tag {
            PoolTag::Primary => &mut self.primary,
            PoolTag::Secondary => &mut self.secondary,
        }
    }

    pub fn pool_size(&self, tag: PoolTag) -> usize {
        self.pool(tag).size()
    }

    pub fn busy(&self, tag: PoolTag) -> usize {
        self.pool(tag).busy()
    }

    /// Busy workers across both pools.
    pub fn in_flight(&self) -> usize {
        self.primary.busy() + self.secondary.busy()
    }

    pub fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub fn idle_workers(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.idle.iter().copied()
    }

    /// Takes the next idle worker of the active pool and marks it busy.
    pub fn acquire_idle(&mut self) -> Option<WorkerId> {
        let worker = self.idle.pop_front()?;
        self.pool_mut(worker.pool).set_state(worker, WorkerState::Busy);
        Some(worker)
    }

    /// Marks a worker idle again. Returns whether it rejoined the idle queue,
    /// which only happens while its pool is the active one.
    pub fn release(&mut self, worker: WorkerId) -> bool {
        if self.pool(worker.pool).state(worker) != Some(WorkerState::Busy) {
            return false;
        }
        self.pool_mut(worker.pool).set_state(worker, WorkerState::Idle);
        if worker.pool == self.active {
            self.idle.push_back(worker);
            true
        } else {
            false
        }
    }

    /// Makes `tag` the active pool and rebuilds the idle queue from its
    /// workers. Callers drain the outgoing pool first.
    pub fn activate(&mut self, tag: PoolTag) {
        self.active = tag;
        let pool = self.pool(tag);
        let idle: VecDeque<WorkerId> = pool
            .workers()
            .filter(|worker| pool.state(*worker) == Some(WorkerState::Idle))
            .collect();
        self.idle = idle;
    }

    pub fn is_balanced(&self) -> bool {
        self.idle.len() + self.busy(self.active) == self.pool_size(self.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileKind;

    fn pools(primary: usize, secondary: usize) -> PoolSet {
        PoolSet::new(
            WorkerPool::new(
                PoolTag::Primary,
                primary,
                ExecutionProfile::new(ProfileKind::Throughput, "CPU"),
            ),
            WorkerPool::new(
                PoolTag::Secondary,
                secondary,
                ExecutionProfile::new(ProfileKind::Latency, "CPU"),
            ),
        )
    }

    #[test]
    fn starts_with_primary_fully_idle() {
        let pools = pools(3, 1);
        assert_eq!(pools.active(), PoolTag::Primary);
        assert_eq!(pools.idle_len(), 3);
        assert!(pools.idle_workers().all(|w| w.pool() == PoolTag::Primary));
        assert!(pools.is_balanced());
    }

    #[test]
    fn acquire_never_exceeds_pool_size() {
        let mut pools = pools(2, 1);
        let a = pools.acquire_idle().unwrap();
        let b = pools.acquire_idle().unwrap();
        assert_ne!(a, b);
        assert!(pools.acquire_idle().is_none());
        assert_eq!(pools.busy(PoolTag::Primary), 2);
        assert!(pools.is_balanced());

        assert!(pools.release(b));
        assert_eq!(pools.acquire_idle(), Some(b));
        assert!(pools.is_balanced());
    }

    #[test]
    fn release_of_idle_worker_is_ignored() {
        let mut pools = pools(2, 1);
        let worker = pools.acquire_idle().unwrap();
        assert!(pools.release(worker));
        assert!(!pools.release(worker));
        assert_eq!(pools.idle_len(), 2);
    }

    #[test]
    fn workers_of_inactive_pool_are_not_requeued() {
        let mut pools = pools(2, 1);
        let worker = pools.acquire_idle().unwrap();
        pools.activate(PoolTag::Secondary);

        assert!(!pools.release(worker));
        assert_eq!(pools.busy(PoolTag::Primary), 0);
        assert_eq!(pools.idle_workers().collect::<Vec<_>>().len(), 1);
        assert!(pools.idle_workers().all(|w| w.pool() == PoolTag::Secondary));
        assert!(pools.is_balanced());
    }

    #[test]
    fn reactivation_restores_full_worker_set() {
        let mut pools = pools(3, 1);
        pools.activate(PoolTag::Secondary);
        pools.activate(PoolTag::Primary);
        let expected: Vec<_> = pools.pool(PoolTag::Primary).workers().collect();
        assert_eq!(pools.idle_workers().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn pool_tags_flip() {
        assert_eq!(PoolTag::Primary.other(), PoolTag::Secondary);
        assert_eq!(PoolTag::Secondary.other(), PoolTag::Primary);
        assert_eq!(PoolTag::Secondary.mode_name(), "MIN_LATENCY");
    }
}
