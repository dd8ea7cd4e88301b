//! Redraw one cluster's membership from per-site inclusion probabilities.
//!
//! Candidate sites are the cluster's members plus the unoccupied sites. Once
//! that set grows beyond `max_size`, only a random subsample of unoccupied
//! sites is considered alongside the members. The subsample makes the
//! reverse candidate set differ from the forward one, so the proposal ratio
//! is an approximation traded for bounded cost on large site counts.

use rand::RngExt;
use rand::rngs::StdRng;

use super::{OperatorContext, Proposal, resample_sources_at};
use crate::models::zones::likelihood::{effect_likelihood, effective_weights, log_logistic};
use crate::models::zones::sample::Sample;
use crate::models::zones::types::ZonesError;
use crate::utils::random_subset;

/// Candidate sites for cluster `cluster`, sorted.
fn candidate_sites(
    context: &OperatorContext<'_>,
    sample: &Sample,
    cluster: usize,
    rng: &mut StdRng,
) -> Vec<usize> {
    let members = sample.cluster(cluster);
    let occupied = sample.occupied();
    let free = (0..sample.n_sites())
        .filter(|site| !occupied[*site])
        .collect::<Vec<_>>();
    let available = sample.cluster_size(cluster) + free.len();

    let kept_free = if available > context.constraints.max_size {
        let keep = random_subset(rng, free.len(), context.tuning.candidate_subsample);
        free.into_iter()
            .zip(keep)
            .filter(|(_, kept)| *kept)
            .map(|(site, _)| site)
            .collect()
    } else {
        free
    };

    let mut sites = (0..sample.n_sites())
        .filter(|site| members[*site])
        .chain(kept_free)
        .collect::<Vec<_>>();
    sites.sort_unstable();
    sites
}

/// Log-odds of `site` joining `cluster`: marginal log-likelihood with the
/// cluster component minus without it.
fn inclusion_log_odds(
    context: &OperatorContext<'_>,
    sample: &Sample,
    cluster: usize,
    site: usize,
) -> Result<f64, ZonesError> {
    let input = context.input;
    let effect = sample.cluster_effect(cluster);
    let mut has = Vec::with_capacity(input.n_sources());
    has.push(true);
    has.extend(
        input
            .confounders
            .iter()
            .map(|confounder| confounder.group_of(site).is_some()),
    );
    let mut without = has.clone();
    without[0] = false;

    let mut log_odds = 0.0;
    for feature in 0..input.n_features() {
        if input.features.observed(site, feature).is_none() {
            continue;
        }
        let mut likelihood = Vec::with_capacity(input.n_sources());
        likelihood.push(effect_likelihood(input, effect, site, feature));
        for (index, confounder) in input.confounders.iter().enumerate() {
            likelihood.push(confounder.group_of(site).map_or(0.0, |group| {
                effect_likelihood(input, sample.confounding_effect(index, group), site, feature)
            }));
        }
        let mixture = |weights: &[f64]| {
            weights
                .iter()
                .zip(&likelihood)
                .map(|(weight, value)| weight * value)
                .sum::<f64>()
        };
        let with_cluster = mixture(&effective_weights(sample.weights(), feature, &has)?);
        let without_cluster = mixture(&effective_weights(sample.weights(), feature, &without)?);
        log_odds += with_cluster.ln() - without_cluster.ln();
    }
    if log_odds.is_nan() {
        return Err(ZonesError::NumericAnomaly {
            context: "cluster inclusion odds",
        });
    }
    Ok(log_odds)
}

pub(super) fn propose(
    context: &OperatorContext<'_>,
    sample: &Sample,
    rng: &mut StdRng,
) -> Result<Proposal, ZonesError> {
    if sample.n_clusters() == 0 {
        return Ok(Proposal::Rejected);
    }
    let cluster = rng.random_range(0..sample.n_clusters());
    let sites = candidate_sites(context, sample, cluster, rng);
    if sites.is_empty() {
        return Ok(Proposal::Rejected);
    }

    let current = sample.cluster(cluster);
    let mut members = vec![false; sample.n_sites()];
    let mut log_q_forward = 0.0;
    let mut log_q_backward = 0.0;
    for &site in &sites {
        let log_odds = inclusion_log_odds(context, sample, cluster, site)?;
        let log_in = log_logistic(log_odds);
        let log_out = log_logistic(-log_odds);
        let joins = rng.random::<f64>().ln() < log_in;
        members[site] = joins;
        log_q_forward += if joins { log_in } else { log_out };
        log_q_backward += if current[site] { log_in } else { log_out };
    }

    let size = members.iter().filter(|member| **member).count();
    if size < context.model.min_size || size > context.constraints.max_size {
        return Ok(Proposal::Rejected);
    }
    if !log_q_backward.is_finite() {
        return Ok(Proposal::Rejected);
    }

    let mut candidate = sample.clone();
    candidate.set_cluster(cluster, members);
    let (source_forward, source_backward) =
        resample_sources_at(context.input, sample, &mut candidate, &sites, rng)?;
    Ok(Proposal::candidate(
        candidate,
        log_q_forward + source_forward,
        log_q_backward + source_backward,
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, path_input, path_sample};
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn small_available_sets_are_not_subsampled() {
        let input = path_input();
        let mut ctx = context(&input, false);
        ctx.constraints.max_size = 6;
        let mut rng = StdRng::seed_from_u64(1);
        let sites = candidate_sites(&ctx, &path_sample(false), 0, &mut rng);
        assert_eq!(sites, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn large_available_sets_keep_members_and_a_free_subsample() {
        let input = path_input();
        let mut ctx = context(&input, false);
        ctx.constraints.max_size = 4;
        ctx.tuning.candidate_subsample = 2;
        let mut rng = StdRng::seed_from_u64(5);
        let sites = candidate_sites(&ctx, &path_sample(false), 0, &mut rng);
        assert_eq!(sites.len(), 5);
        for member in [1, 2, 3] {
            assert!(sites.contains(&member));
        }
    }

    #[test]
    fn favourable_sites_have_positive_log_odds() {
        let input = path_input();
        let ctx = context(&input, false);
        let sample = path_sample(false);
        // the cluster effect favours state 0, observed on features 0 and 1 at site 0
        assert!(inclusion_log_odds(&ctx, &sample, 0, 0).expect("odds") > 0.0);
        assert!(inclusion_log_odds(&ctx, &sample, 0, 4).expect("odds") < 0.0);
    }

    #[test]
    fn proposals_respect_size_bounds() {
        let input = path_input();
        let ctx = context(&input, true);
        let sample = path_sample(true);
        let mut rng = StdRng::seed_from_u64(12);
        for _ in 0..100 {
            if let Proposal::Candidate {
                sample: candidate,
                log_q_forward,
                log_q_backward,
            } = propose(&ctx, &sample, &mut rng).expect("proposal")
            {
                let size = candidate.cluster_size(0);
                assert!((1..=4).contains(&size));
                assert!(log_q_forward.is_finite() && log_q_backward.is_finite());
                assert!(candidate.clusters_are_disjoint());
            }
        }
    }
}
