//! Conditional draws of the source attribution and the probability blocks.

use rand::rngs::StdRng;

use super::{OperatorContext, Proposal};
use crate::models::zones::likelihood::SiteLikelihood;
use crate::models::zones::priors::{masked_alpha, matrix_row};
use crate::models::zones::sample::Sample;
use crate::models::zones::types::ZonesError;
use crate::utils::{all_finite, log_dirichlet_density, sample_categorical, sample_dirichlet};

fn degenerate(context: &'static str) -> ZonesError {
    ZonesError::NumericAnomaly { context }
}

/// Redraw every `(site, feature)` attribution from its conditional.
pub(super) fn sources(
    context: &OperatorContext<'_>,
    sample: &Sample,
    rng: &mut StdRng,
) -> Result<Proposal, ZonesError> {
    let input = context.input;
    let n_features = input.n_features();
    let mut drawn = Vec::with_capacity(input.n_sites() * n_features);
    for site in 0..input.n_sites() {
        let terms = SiteLikelihood::evaluate(input, sample, site)?;
        for feature in 0..n_features {
            let posterior = terms.source_posterior(feature)?;
            drawn.push(sample_categorical(rng, &posterior).ok_or_else(|| degenerate("source posterior"))?);
        }
    }
    let mut candidate = sample.clone();
    candidate.set_sources(drawn);
    Ok(Proposal::Exact(candidate))
}

/// Counts of observed states among `(site, feature)` cells attributed to
/// `component` at sites selected by `selected`.
fn attributed_state_counts(
    context: &OperatorContext<'_>,
    sample: &Sample,
    component: usize,
    feature: usize,
    selected: impl Fn(usize) -> bool,
) -> Vec<f64> {
    let input = context.input;
    let mut counts = vec![0.0; input.n_states()];
    for site in (0..input.n_sites()).filter(|site| selected(*site)) {
        if sample.source(site, feature) == Some(component)
            && let Some(state) = input.features.observed(site, feature)
        {
            counts[state] += 1.0;
        }
    }
    counts
}

fn conjugate_row(
    rng: &mut StdRng,
    applicable: &[bool],
    concentration: f64,
    counts: &[f64],
) -> Result<Vec<f64>, ZonesError> {
    let alpha = masked_alpha(applicable, concentration)
        .iter()
        .zip(counts)
        .map(|(prior, count)| if *prior > 0.0 { prior + count } else { 0.0 })
        .collect::<Vec<_>>();
    let row = sample_dirichlet(rng, &alpha);
    if all_finite(&row) {
        Ok(row)
    } else {
        Err(degenerate("effect conditional"))
    }
}

/// Redraw every cluster effect from its Dirichlet conditional.
pub(super) fn cluster_effect(
    context: &OperatorContext<'_>,
    sample: &Sample,
    rng: &mut StdRng,
) -> Result<Proposal, ZonesError> {
    if !sample.has_source() || sample.n_clusters() == 0 {
        return Ok(Proposal::Rejected);
    }
    let input = context.input;
    let mut candidate = sample.clone();
    for cluster in 0..sample.n_clusters() {
        let members = sample.cluster(cluster);
        for feature in 0..input.n_features() {
            let counts = attributed_state_counts(context, sample, 0, feature, |site| members[site]);
            let row = conjugate_row(
                rng,
                input.features.applicable_states(feature),
                context.priors.cluster_effect_concentration,
                &counts,
            )?;
            candidate.set_cluster_effect_row(cluster, feature, &row);
        }
    }
    Ok(Proposal::Exact(candidate))
}

/// Redraw every group effect of one confounder from its Dirichlet conditional.
pub(super) fn confounding_effects(
    context: &OperatorContext<'_>,
    sample: &Sample,
    confounder: usize,
    rng: &mut StdRng,
) -> Result<Proposal, ZonesError> {
    if !sample.has_source() {
        return Ok(Proposal::Rejected);
    }
    let input = context.input;
    let groups = &input.confounders[confounder];
    let mut candidate = sample.clone();
    for group in 0..groups.n_groups() {
        for feature in 0..input.n_features() {
            let counts = attributed_state_counts(context, sample, confounder + 1, feature, |site| {
                groups.group_of(site) == Some(group)
            });
            let row = conjugate_row(
                rng,
                input.features.applicable_states(feature),
                context.priors.confounding_effects_concentration,
                &counts,
            )?;
            candidate.set_confounding_effect_row(confounder, group, feature, &row);
        }
    }
    Ok(Proposal::Exact(candidate))
}

/// Independent proposal of the weights from a Dirichlet over attribution counts.
///
/// Weights are renormalised per site over the applicable components, so this
/// Dirichlet is only the conditional when every component applies everywhere.
/// The draw therefore carries its proposal densities for a Metropolis-Hastings
/// correction.
pub(super) fn weights(
    context: &OperatorContext<'_>,
    sample: &Sample,
    rng: &mut StdRng,
) -> Result<Proposal, ZonesError> {
    if !sample.has_source() {
        return Ok(Proposal::Rejected);
    }
    let input = context.input;
    let n_sources = input.n_sources();
    let mut candidate = sample.clone();
    let mut log_q_forward = 0.0;
    let mut log_q_backward = 0.0;
    for feature in 0..input.n_features() {
        let mut alpha = vec![context.priors.weights_concentration; n_sources];
        for site in 0..input.n_sites() {
            if let Some(component) = sample.source(site, feature) {
                alpha[component] += 1.0;
            }
        }
        let row = sample_dirichlet(rng, &alpha);
        if !all_finite(&row) {
            return Err(degenerate("weights conditional"));
        }
        log_q_forward += log_dirichlet_density(&row, &alpha);
        log_q_backward += log_dirichlet_density(&matrix_row(sample.weights(), feature), &alpha);
        candidate.set_weights_row(feature, &row);
    }
    Ok(Proposal::candidate(candidate, log_q_forward, log_q_backward))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, path_input, path_sample};
    use super::*;
    use crate::input::{Adjacency, Confounder, FeatureTensor, ZoneModelInput};
    use faer::Mat;
    use rand::SeedableRng;

    fn exact(proposal: Proposal) -> Sample {
        match proposal {
            Proposal::Exact(sample) => sample,
            other => panic!("expected an exact draw, got {other:?}"),
        }
    }

    #[test]
    fn source_draws_respect_applicability() {
        let input = path_input();
        let ctx = context(&input, true);
        let sample = path_sample(true);
        let mut rng = StdRng::seed_from_u64(3);
        let Proposal::Exact(candidate) = sources(&ctx, &sample, &mut rng).expect("proposal") else {
            panic!("source draws are exact");
        };
        for feature in 0..3 {
            // site 5 is in no cluster and no family
            assert_eq!(candidate.source(5, feature), Some(1));
            assert_ne!(candidate.source(0, feature), Some(0));
        }
    }

    #[test]
    fn effect_draws_stay_on_the_masked_simplex() {
        let input = path_input();
        let ctx = context(&input, true);
        let sample = path_sample(true);
        let mut rng = StdRng::seed_from_u64(9);
        let Proposal::Exact(candidate) =
            confounding_effects(&ctx, &sample, 1, &mut rng).expect("proposal")
        else {
            panic!("effect draws are exact");
        };
        for group in 0..2 {
            let effect = candidate.confounding_effect(1, group);
            for feature in 0..3 {
                let total = effect[(feature, 0)] + effect[(feature, 1)];
                assert!((total - 1.0).abs() < 1.0e-12);
            }
        }
        assert_ne!(
            candidate.versions().confounding_effects[1],
            sample.versions().confounding_effects[1]
        );
        assert_eq!(
            candidate.versions().confounding_effects[0],
            sample.versions().confounding_effects[0]
        );
    }

    #[test]
    fn attribution_counts_only_include_the_component() {
        let input = path_input();
        let ctx = context(&input, true);
        let mut sample = path_sample(true);
        sample.set_source(1, 0, 0);
        sample.set_source(2, 0, 0);
        let counts = attributed_state_counts(&ctx, &sample, 0, 0, |site| sample.cluster(0)[site]);
        assert_eq!(counts, vec![2.0, 0.0]);
    }

    #[test]
    fn weights_proposal_carries_finite_densities() {
        let input = path_input();
        let ctx = context(&input, true);
        let sample = path_sample(true);
        let mut rng = StdRng::seed_from_u64(21);
        let Proposal::Candidate {
            sample: candidate,
            log_q_forward,
            log_q_backward,
        } = weights(&ctx, &sample, &mut rng).expect("proposal")
        else {
            panic!("weights proposals are corrected");
        };
        assert!(log_q_forward.is_finite() && log_q_backward.is_finite());
        for feature in 0..3 {
            let total = (0..3).map(|source| candidate.weights()[(feature, source)]).sum::<f64>();
            assert!((total - 1.0).abs() < 1.0e-12);
        }
    }

    #[test]
    fn parameter_draws_need_sampled_sources() {
        let input = path_input();
        let ctx = context(&input, false);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            cluster_effect(&ctx, &path_sample(false), &mut rng).expect("proposal"),
            Proposal::Rejected
        ));
    }

    #[test]
    fn confounding_effect_draws_average_to_the_conjugate_mean() {
        let input = path_input();
        let sample = path_sample(true);
        let context = context(&input, true);
        let mut rng = StdRng::seed_from_u64(31);
        let draws = 4_000_u32;
        let (mut universal, mut family) = (0.0, 0.0);
        for _ in 0..draws {
            let next = exact(confounding_effects(&context, &sample, 0, &mut rng).expect("draw"));
            universal += next.confounding_effect(0, 0)[(2, 0)];
            let next = exact(confounding_effects(&context, &sample, 1, &mut rng).expect("draw"));
            family += next.confounding_effect(1, 0)[(2, 0)];
        }
        // Every cell is attributed to the universal group. Feature 2 shows
        // state 0 three times and state 1 twice, so its row is Dirichlet(4, 3).
        assert!((universal / f64::from(draws) - 4.0 / 7.0).abs() < 0.015);
        // Nothing is attributed to the families: the draw is the flat prior.
        assert!((family / f64::from(draws) - 0.5).abs() < 0.02);
    }

    #[test]
    fn source_frequencies_match_the_weighted_component_likelihoods() {
        let features = FeatureTensor::new(2, vec![vec![true, true]], vec![vec![Some(0)]])
            .expect("valid features");
        let adjacency = Adjacency::from_edges(1, &[]).expect("valid graph");
        let universal =
            Confounder::from_assignments("universal", 1, vec![Some(0)]).expect("valid confounder");
        let input = ZoneModelInput::new(features, adjacency, vec![universal]);
        let sample = Sample::new(
            1,
            vec![vec![true]],
            Mat::from_fn(1, 2, |_, source| [0.3, 0.7][source]),
            vec![Mat::from_fn(1, 2, |_, state| [0.8, 0.2][state])],
            vec![vec![Mat::from_fn(1, 2, |_, state| [0.4, 0.6][state])]],
            Some(vec![1]),
        );
        let context = context(&input, true);

        let mut rng = StdRng::seed_from_u64(5);
        let draws = 6_000_u32;
        let mut cluster = 0_u32;
        for _ in 0..draws {
            let next = exact(sources(&context, &sample, &mut rng).expect("draw"));
            if next.source(0, 0) == Some(0) {
                cluster += 1;
            }
        }
        // 0.3 * 0.8 against 0.7 * 0.4.
        let expected = 0.24 / 0.52;
        assert!((f64::from(cluster) / f64::from(draws) - expected).abs() < 0.02);
    }
}
