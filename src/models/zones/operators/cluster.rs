//! Grow, shrink and swap moves on a single cluster.

use rand::RngExt;
use rand::rngs::StdRng;

use super::{OperatorContext, Proposal, resample_sources_at};
use crate::input::Adjacency;
use crate::models::zones::sample::Sample;
use crate::models::zones::types::ZonesError;
use crate::utils::{choose, usize_to_f64};

/// Sites a grow step may add: every free site, and the free sites bordering
/// the cluster.
struct AdditionPool {
    free: Vec<usize>,
    neighbours: Vec<usize>,
}

impl AdditionPool {
    fn new(adjacency: &Adjacency, members: &[bool], blocked: &[bool]) -> Self {
        let free = (0..members.len())
            .filter(|site| !members[*site] && !blocked[*site])
            .collect();
        Self {
            free,
            neighbours: adjacency.free_neighbours(members, blocked),
        }
    }

    fn draw(&self, rng: &mut StdRng, p_connected: f64) -> Option<usize> {
        if !self.neighbours.is_empty() && rng.random::<f64>() < p_connected {
            choose(rng, &self.neighbours)
        } else {
            choose(rng, &self.free)
        }
    }

    fn probability(&self, site: usize, p_connected: f64) -> f64 {
        if self.free.binary_search(&site).is_err() {
            return 0.0;
        }
        let uniform = 1.0 / usize_to_f64(self.free.len());
        if self.neighbours.is_empty() {
            return uniform;
        }
        let connected = if self.neighbours.binary_search(&site).is_ok() {
            p_connected / usize_to_f64(self.neighbours.len())
        } else {
            0.0
        };
        (1.0 - p_connected).mul_add(uniform, connected)
    }
}

enum Move {
    Grow,
    Shrink,
    Swap,
}

pub(super) fn propose(
    context: &OperatorContext<'_>,
    sample: &Sample,
    rng: &mut StdRng,
) -> Result<Proposal, ZonesError> {
    if sample.n_clusters() == 0 {
        return Ok(Proposal::Rejected);
    }
    let tuning = context.tuning;
    let draw = rng.random::<f64>();
    let step = if draw < tuning.grow_probability {
        Move::Grow
    } else if draw < tuning.grow_probability + tuning.shrink_probability {
        Move::Shrink
    } else {
        Move::Swap
    };

    let cluster = rng.random_range(0..sample.n_clusters());
    let outcome = match step {
        Move::Grow => grow(context, sample, cluster, rng),
        Move::Shrink => shrink(context, sample, cluster, rng),
        Move::Swap => swap(context, sample, cluster, rng),
    };
    let Some((mut candidate, changed, log_q_forward, log_q_backward)) = outcome else {
        return Ok(Proposal::Rejected);
    };

    let (source_forward, source_backward) =
        resample_sources_at(context.input, sample, &mut candidate, &changed, rng)?;
    Ok(Proposal::candidate(
        candidate,
        log_q_forward + source_forward,
        log_q_backward + source_backward,
    ))
}

type MoveOutcome = Option<(Sample, Vec<usize>, f64, f64)>;

fn grow(
    context: &OperatorContext<'_>,
    sample: &Sample,
    cluster: usize,
    rng: &mut StdRng,
) -> MoveOutcome {
    let size = sample.cluster_size(cluster);
    if size >= context.constraints.max_size {
        return None;
    }
    let p_connected = context.constraints.p_grow_connected;
    let occupied = sample.occupied();
    let pool = AdditionPool::new(&context.input.adjacency, sample.cluster(cluster), &occupied);
    let added = pool.draw(rng, p_connected)?;

    let mut candidate = sample.clone();
    candidate.add_site(cluster, added);
    let log_q_forward = context.tuning.grow_probability.ln() + pool.probability(added, p_connected).ln();
    let log_q_backward =
        context.tuning.shrink_probability.ln() - usize_to_f64(size + 1).ln();
    Some((candidate, vec![added], log_q_forward, log_q_backward))
}

fn shrink(
    context: &OperatorContext<'_>,
    sample: &Sample,
    cluster: usize,
    rng: &mut StdRng,
) -> MoveOutcome {
    let size = sample.cluster_size(cluster);
    if size <= context.model.min_size {
        return None;
    }
    let removed = choose(rng, &sample.cluster_members(cluster))?;

    let mut candidate = sample.clone();
    candidate.remove_site(cluster, removed);
    let pool = AdditionPool::new(
        &context.input.adjacency,
        candidate.cluster(cluster),
        &candidate.occupied(),
    );
    let p_connected = context.constraints.p_grow_connected;
    let log_q_forward = context.tuning.shrink_probability.ln() - usize_to_f64(size).ln();
    let log_q_backward =
        context.tuning.grow_probability.ln() + pool.probability(removed, p_connected).ln();
    Some((candidate, vec![removed], log_q_forward, log_q_backward))
}

fn swap(
    context: &OperatorContext<'_>,
    sample: &Sample,
    cluster: usize,
    rng: &mut StdRng,
) -> MoveOutcome {
    let size = sample.cluster_size(cluster);
    let removed = choose(rng, &sample.cluster_members(cluster))?;
    let p_connected = context.constraints.p_grow_connected;
    let adjacency = &context.input.adjacency;

    let mut base = sample.cluster(cluster).to_vec();
    base[removed] = false;
    // the removed site stays blocked so a swap always moves the cluster
    let occupied = sample.occupied();
    let forward_pool = AdditionPool::new(adjacency, &base, &occupied);
    let added = forward_pool.draw(rng, p_connected)?;

    let mut candidate = sample.clone();
    candidate.remove_site(cluster, removed);
    candidate.add_site(cluster, added);

    let mut reverse_blocked = occupied;
    reverse_blocked[removed] = false;
    reverse_blocked[added] = true;
    let backward_pool = AdditionPool::new(adjacency, &base, &reverse_blocked);

    let pick = context.tuning.swap_probability().ln() - usize_to_f64(size).ln();
    let log_q_forward = pick + forward_pool.probability(added, p_connected).ln();
    let log_q_backward = pick + backward_pool.probability(removed, p_connected).ln();
    Some((candidate, vec![removed, added], log_q_forward, log_q_backward))
}
