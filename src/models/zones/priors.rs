//! Dirichlet priors over mixture weights and categorical effects.

use faer::Mat;

use super::sample::Sample;
use crate::input::ZoneModelInput;
use crate::utils::log_dirichlet_density;

/// Symmetric Dirichlet concentrations for every probability row of a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZonePriorConfig {
    /// Concentration of each feature's weights over the mixture components.
    pub weights_concentration: f64,
    /// Concentration of each cluster effect row over applicable states.
    pub cluster_effect_concentration: f64,
    /// Concentration of each confounding effect row over applicable states.
    pub confounding_effects_concentration: f64,
}

impl Default for ZonePriorConfig {
    fn default() -> Self {
        Self {
            weights_concentration: 1.0,
            cluster_effect_concentration: 1.0,
            confounding_effects_concentration: 1.0,
        }
    }
}

impl ZonePriorConfig {
    /// Whether all concentrations are finite and strictly positive.
    #[must_use]
    pub fn is_valid(self) -> bool {
        [
            self.weights_concentration,
            self.cluster_effect_concentration,
            self.confounding_effects_concentration,
        ]
        .iter()
        .all(|value| value.is_finite() && *value > 0.0)
    }
}

/// Concentration vector that is `concentration` on applicable states and `0` elsewhere.
#[must_use]
pub fn masked_alpha(applicable: &[bool], concentration: f64) -> Vec<f64> {
    applicable
        .iter()
        .map(|applies| if *applies { concentration } else { 0.0 })
        .collect()
}

/// Row `row` of a matrix as an owned vector.
#[must_use]
pub fn matrix_row(matrix: &Mat<f64>, row: usize) -> Vec<f64> {
    (0..matrix.ncols()).map(|col| matrix[(row, col)]).collect()
}

fn log_effect_prior(input: &ZoneModelInput, effect: &Mat<f64>, concentration: f64) -> f64 {
    (0..input.n_features())
        .map(|feature| {
            let alpha = masked_alpha(input.features.applicable_states(feature), concentration);
            log_dirichlet_density(&matrix_row(effect, feature), &alpha)
        })
        .sum()
}

/// Log prior density of a sample.
///
/// Cluster membership carries a uniform prior over admissible configurations,
/// which only contributes a constant and is therefore omitted.
#[must_use]
pub fn log_prior(config: ZonePriorConfig, input: &ZoneModelInput, sample: &Sample) -> f64 {
    let weights_alpha = vec![config.weights_concentration; input.n_sources()];
    let mut total = (0..input.n_features())
        .map(|feature| log_dirichlet_density(&matrix_row(sample.weights(), feature), &weights_alpha))
        .sum::<f64>();

    for cluster in 0..sample.n_clusters() {
        total += log_effect_prior(
            input,
            sample.cluster_effect(cluster),
            config.cluster_effect_concentration,
        );
    }
    for (confounder, groups) in input.confounders.iter().enumerate() {
        for group in 0..groups.n_groups() {
            total += log_effect_prior(
                input,
                sample.confounding_effect(confounder, group),
                config.confounding_effects_concentration,
            );
        }
    }
    total
}
