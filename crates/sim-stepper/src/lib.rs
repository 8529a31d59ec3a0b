//! Per-tick orchestration: force, integrate, exchange, snapshot.

use std::sync::Arc;

use sim_comm::Comm;
use sim_exchange::ExchangeError;
use sim_integrate::InvariantViolation;
use sim_map::Map;
use sim_partition::Partitioner;
use sim_particle::Particle;
use sim_snapshot::{MinimalRecord, SnapshotError};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Integrate(#[from] InvariantViolation),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Zeroes acceleration on every owned particle, then accumulates pairwise
/// force from every other owned particle and every ghost. This mirrors the
/// source system's full double loop over a rank's local array against the
/// entire visible particle set (local-against-local, local-against-ghost)
/// rather than a literal unordered-pair iteration: each owned particle
/// needs one `apply_force` call per neighbor to pick up that neighbor's
/// contribution, since the kernel only updates its first argument.
pub fn compute_forces(owned: &mut [Particle], ghosts: &[Particle]) {
    let snapshot: Vec<Particle> = owned.to_vec();
    for (i, p) in owned.iter_mut().enumerate() {
        p.reset_acceleration();
        for (j, q) in snapshot.iter().enumerate() {
            if i != j {
                sim_force::apply_force(p, q);
            }
        }
        for g in ghosts {
            sim_force::apply_force(p, g);
        }
    }
}

/// One rank's per-tick state machine. Owns its local particle array, the
/// most recent ghost set (re-derived every tick, dropped before the next
/// force phase would otherwise reuse stale positions), and its `Comm`
/// handle.
pub struct RankState<C: Comm> {
    map: Arc<Map>,
    partitioner: Arc<Partitioner>,
    comm: C,
    owned: Vec<Particle>,
    ghosts: Vec<Particle>,
    step: u64,
}

impl<C: Comm> RankState<C> {
    pub fn new(map: Arc<Map>, partitioner: Arc<Partitioner>, comm: C, owned: Vec<Particle>) -> Self {
        Self {
            map,
            partitioner,
            comm,
            owned,
            ghosts: Vec::new(),
            step: 0,
        }
    }

    pub fn owned(&self) -> &[Particle] {
        &self.owned
    }

    pub fn ghosts(&self) -> &[Particle] {
        &self.ghosts
    }

    pub fn step_index(&self) -> u64 {
        self.step
    }

    /// Runs one tick: force, integrate, migrate, publish ghosts, gather.
    /// Returns the gathered minimal records on the root rank only.
    pub fn tick(&mut self) -> Result<Option<Vec<MinimalRecord>>, StepError> {
        compute_forces(&mut self.owned, &self.ghosts);

        for p in self.owned.iter_mut() {
            sim_integrate::step(p, &self.map)?;
        }

        sim_exchange::migrate(&mut self.owned, &self.partitioner, &self.comm)?;
        self.ghosts = sim_exchange::publish_ghosts(&self.owned, &self.partitioner, &self.comm)?;

        let gathered = sim_snapshot::gather_snapshot(&self.owned, &self.comm)?;

        tracing::debug!(
            target: "sim.step",
            rank = self.comm.rank(),
            step = self.step,
            owned = self.owned.len(),
            ghosts = self.ghosts.len(),
            "tick complete"
        );

        self.step += 1;
        Ok(gathered)
    }
}
