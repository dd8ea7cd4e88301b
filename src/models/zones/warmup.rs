//! Annealed per-chain constraints for the warmup phase.
//!
//! During warmup chains explore with looser cluster size bounds spread over a
//! few levels, and with a mix of connected-only and unrestricted grow moves.
//! Once warmup ends every chain returns to the nominal constraints.

use num_traits::ToPrimitive;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use super::sample::Sample;
use super::types::{ChainConstraints, ZoneSamplerConfig};
use crate::utils::{choose, usize_to_f64};

/// Per-chain `max_size` levels, linearly spaced from `start` to `end`.
///
/// Chains are split into `size_groups` consecutive blocks of equal length
/// (the last one possibly shorter), each sharing one level.
#[must_use]
pub fn max_size_schedule(start: usize, end: usize, n_chains: usize, size_groups: usize) -> Vec<usize> {
    let groups = size_groups.max(1);
    let per_group = n_chains.div_ceil(groups).max(1);
    let levels = (0..groups)
        .map(|group| {
            if groups == 1 {
                return start;
            }
            let fraction = usize_to_f64(group) / usize_to_f64(groups - 1);
            let level = (usize_to_f64(end) - usize_to_f64(start)).mul_add(fraction, usize_to_f64(start));
            level.floor().to_usize().unwrap_or(start)
        })
        .collect::<Vec<_>>();
    (0..n_chains)
        .map(|chain| levels[(chain / per_group).min(groups - 1)])
        .collect()
}

/// Per-chain grow connectivity, each chain drawing the disciplined bias or the
/// nominal value with equal probability.
#[must_use]
pub fn connectivity_schedule(
    rng: &mut StdRng,
    n_chains: usize,
    connected_bias: f64,
    p_grow_connected: f64,
) -> Vec<f64> {
    (0..n_chains)
        .map(|_| {
            if rng.random::<bool>() {
                connected_bias
            } else {
                p_grow_connected
            }
        })
        .collect()
}

/// Warmup constraints of every chain, derived deterministically from the seed.
///
/// `max_size` runs from halfway between the initial and nominal size up to
/// one and a half times the nominal size.
#[must_use]
pub fn warmup_constraints(config: &ZoneSamplerConfig) -> Vec<ChainConstraints> {
    let chains = config.warmup.chains;
    let start = (config.init.initial_size + config.model.max_size) / 2;
    let end = config.model.max_size + config.model.max_size / 2;
    let sizes = max_size_schedule(start, end, chains, config.warmup.size_groups);

    let mut rng = StdRng::seed_from_u64(config.mcmc.seed);
    let connectivity = connectivity_schedule(
        &mut rng,
        chains,
        config.warmup.connected_bias,
        config.warmup.p_grow_connected,
    );
    sizes
        .into_iter()
        .zip(connectivity)
        .map(|(max_size, p_grow_connected)| ChainConstraints {
            max_size: max_size.max(config.init.initial_size),
            p_grow_connected,
        })
        .collect()
}

/// Remove random members from clusters larger than `max_size`.
///
/// Returns the removed sites.
pub fn trim_to_max_size(sample: &mut Sample, max_size: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut removed = Vec::new();
    for cluster in 0..sample.n_clusters() {
        while sample.cluster_size(cluster) > max_size {
            let Some(site) = choose(rng, &sample.cluster_members(cluster)) else {
                break;
            };
            sample.remove_site(cluster, site);
            removed.push(site);
        }
    }
    removed
}
