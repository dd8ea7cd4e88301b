//! Dirichlet random walks on one probability row.

use rand::RngExt;
use rand::rngs::StdRng;

use super::{OperatorContext, Proposal};
use crate::models::zones::priors::matrix_row;
use crate::models::zones::sample::Sample;
use crate::models::zones::types::ZonesError;
use crate::utils::{all_finite, log_dirichlet_density, sample_dirichlet};

struct Step {
    row: Vec<f64>,
    log_q_forward: f64,
    log_q_backward: f64,
}

fn centred_alpha(row: &[f64], applicable: &[bool], step: f64) -> Vec<f64> {
    row.iter()
        .zip(applicable)
        .map(|(value, applies)| if *applies { step.mul_add(*value, 1.0) } else { 0.0 })
        .collect()
}

/// Draw a new row from `Dirichlet(1 + step * current)` over the applicable entries.
fn dirichlet_step(
    rng: &mut StdRng,
    current: &[f64],
    applicable: &[bool],
    step: f64,
) -> Result<Step, ZonesError> {
    let forward_alpha = centred_alpha(current, applicable, step);
    let row = sample_dirichlet(rng, &forward_alpha);
    if !all_finite(&row) {
        return Err(ZonesError::NumericAnomaly {
            context: "dirichlet random walk",
        });
    }
    let backward_alpha = centred_alpha(&row, applicable, step);
    Ok(Step {
        log_q_forward: log_dirichlet_density(&row, &forward_alpha),
        log_q_backward: log_dirichlet_density(current, &backward_alpha),
        row,
    })
}

pub(super) fn weights(
    context: &OperatorContext<'_>,
    sample: &Sample,
    rng: &mut StdRng,
) -> Result<Proposal, ZonesError> {
    let feature = rng.random_range(0..sample.n_features());
    let applicable = vec![true; sample.n_sources()];
    let step = dirichlet_step(
        rng,
        &matrix_row(sample.weights(), feature),
        &applicable,
        context.tuning.weights_step,
    )?;
    let mut candidate = sample.clone();
    candidate.set_weights_row(feature, &step.row);
    Ok(Proposal::candidate(candidate, step.log_q_forward, step.log_q_backward))
}

pub(super) fn cluster_effect(
    context: &OperatorContext<'_>,
    sample: &Sample,
    rng: &mut StdRng,
) -> Result<Proposal, ZonesError> {
    if sample.n_clusters() == 0 {
        return Ok(Proposal::Rejected);
    }
    let cluster = rng.random_range(0..sample.n_clusters());
    let feature = rng.random_range(0..sample.n_features());
    let step = dirichlet_step(
        rng,
        &matrix_row(sample.cluster_effect(cluster), feature),
        context.input.features.applicable_states(feature),
        context.tuning.cluster_effect_step,
    )?;
    let mut candidate = sample.clone();
    candidate.set_cluster_effect_row(cluster, feature, &step.row);
    Ok(Proposal::candidate(candidate, step.log_q_forward, step.log_q_backward))
}

pub(super) fn confounding_effects(
    context: &OperatorContext<'_>,
    sample: &Sample,
    confounder: usize,
    rng: &mut StdRng,
) -> Result<Proposal, ZonesError> {
    let n_groups = sample.n_groups(confounder);
    if n_groups == 0 {
        return Ok(Proposal::Rejected);
    }
    let group = rng.random_range(0..n_groups);
    let feature = rng.random_range(0..sample.n_features());
    let step = dirichlet_step(
        rng,
        &matrix_row(sample.confounding_effect(confounder, group), feature),
        context.input.features.applicable_states(feature),
        context.tuning.confounding_effects_step,
    )?;
    let mut candidate = sample.clone();
    candidate.set_confounding_effect_row(confounder, group, feature, &step.row);
    Ok(Proposal::candidate(candidate, step.log_q_forward, step.log_q_backward))
}
