//! Proposal operators and their selection schedule.
//!
//! Operators come in three families. Structural operators move cluster
//! membership, Gibbs operators draw a block from its full conditional (or an
//! independent approximation of it), and random-walk operators perturb one
//! probability row with a Dirichlet centred on its current value. Operators
//! marked exact are accepted without a Metropolis-Hastings test.

mod cluster;
mod gibbs;
mod gibbsish;
mod random_walk;

use rand::rngs::StdRng;

use super::likelihood::evaluate_sites;
use super::priors::ZonePriorConfig;
use super::sample::Sample;
use super::types::{ChainConstraints, OperatorWeights, ProposalTuning, ZoneModelConfig, ZonesError};
use crate::input::ZoneModelInput;
use crate::utils::{sample_categorical, usize_to_f64};

/// Everything an operator may read while proposing.
#[derive(Debug, Clone, Copy)]
pub struct OperatorContext<'a> {
    pub input: &'a ZoneModelInput,
    pub model: ZoneModelConfig,
    pub priors: ZonePriorConfig,
    pub tuning: ProposalTuning,
    pub constraints: ChainConstraints,
}

/// Result of one proposal.
#[derive(Debug, Clone)]
pub enum Proposal {
    /// Candidate subject to a Metropolis-Hastings test with the given log
    /// proposal densities.
    Candidate {
        sample: Sample,
        log_q_forward: f64,
        log_q_backward: f64,
    },
    /// Draw from a full conditional, accepted unconditionally.
    Exact(Sample),
    /// The operator could not produce a valid candidate.
    Rejected,
}

impl Proposal {
    /// Wrap a candidate, rejecting it if either proposal density is degenerate.
    #[must_use]
    pub fn candidate(sample: Sample, log_q_forward: f64, log_q_backward: f64) -> Self {
        if log_q_forward.is_finite() && log_q_backward.is_finite() {
            Self::Candidate {
                sample,
                log_q_forward,
                log_q_backward,
            }
        } else {
            Self::Rejected
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorFamily {
    Structural,
    Gibbs,
    RandomWalk,
}

impl OperatorFamily {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Gibbs => "gibbs",
            Self::RandomWalk => "random-walk",
        }
    }
}

/// A proposal operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Grow, shrink or swap one site of one cluster.
    AlterCluster,
    /// Redraw one cluster's membership from per-site inclusion probabilities.
    GibbsishCluster,
    /// Redraw every source attribution from its conditional.
    GibbsSource,
    /// Independent Dirichlet draw of the weights from source counts.
    GibbsWeights,
    /// Redraw every cluster effect from its conditional.
    GibbsClusterEffect,
    /// Redraw every group effect of one confounder from its conditional.
    GibbsConfoundingEffects { confounder: usize },
    AlterWeights,
    AlterClusterEffect,
    AlterConfoundingEffects { confounder: usize },
}

impl Operator {
    #[must_use]
    pub fn name(self) -> String {
        match self {
            Self::AlterCluster => "alter_cluster".to_owned(),
            Self::GibbsishCluster => "gibbsish_cluster".to_owned(),
            Self::GibbsSource => "gibbs_source".to_owned(),
            Self::GibbsWeights => "gibbs_weights".to_owned(),
            Self::GibbsClusterEffect => "gibbs_cluster_effect".to_owned(),
            Self::GibbsConfoundingEffects { confounder } => {
                format!("gibbs_confounding_effects_{confounder}")
            }
            Self::AlterWeights => "alter_weights".to_owned(),
            Self::AlterClusterEffect => "alter_cluster_effect".to_owned(),
            Self::AlterConfoundingEffects { confounder } => {
                format!("alter_confounding_effects_{confounder}")
            }
        }
    }

    #[must_use]
    pub const fn family(self) -> OperatorFamily {
        match self {
            Self::AlterCluster | Self::GibbsishCluster => OperatorFamily::Structural,
            Self::GibbsSource
            | Self::GibbsWeights
            | Self::GibbsClusterEffect
            | Self::GibbsConfoundingEffects { .. } => OperatorFamily::Gibbs,
            Self::AlterWeights
            | Self::AlterClusterEffect
            | Self::AlterConfoundingEffects { .. } => OperatorFamily::RandomWalk,
        }
    }

    /// Whether proposals are exact conditional draws that skip the acceptance test.
    ///
    /// The weights operator ignores the per-site renormalisation in its
    /// conditional, so it stays under Metropolis-Hastings.
    #[must_use]
    pub const fn is_exact(self) -> bool {
        matches!(
            self,
            Self::GibbsSource | Self::GibbsClusterEffect | Self::GibbsConfoundingEffects { .. }
        )
    }

    /// Draw a proposal from `sample`.
    ///
    /// # Errors
    ///
    /// Returns `ZonesError::NumericAnomaly` if a conditional cannot be normalised.
    pub fn propose(
        self,
        context: &OperatorContext<'_>,
        sample: &Sample,
        rng: &mut StdRng,
    ) -> Result<Proposal, ZonesError> {
        match self {
            Self::AlterCluster => cluster::propose(context, sample, rng),
            Self::GibbsishCluster => gibbsish::propose(context, sample, rng),
            Self::GibbsSource => gibbs::sources(context, sample, rng),
            Self::GibbsWeights => gibbs::weights(context, sample, rng),
            Self::GibbsClusterEffect => gibbs::cluster_effect(context, sample, rng),
            Self::GibbsConfoundingEffects { confounder } => {
                gibbs::confounding_effects(context, sample, confounder, rng)
            }
            Self::AlterWeights => random_walk::weights(context, sample, rng),
            Self::AlterClusterEffect => random_walk::cluster_effect(context, sample, rng),
            Self::AlterConfoundingEffects { confounder } => {
                random_walk::confounding_effects(context, sample, confounder, rng)
            }
        }
    }
}

/// Operator with its normalised selection probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledOperator {
    pub operator: Operator,
    pub weight: f64,
}

/// Operators legal for a model, with weights normalised to sum to one.
#[derive(Debug, Clone)]
pub struct OperatorSchedule {
    entries: Vec<ScheduledOperator>,
}

impl OperatorSchedule {
    /// Build the operator set for a model.
    ///
    /// With sampled sources the parameter blocks use Gibbs updates, otherwise
    /// random walks. The confounding-effects weight is split evenly across
    /// confounders and cluster operators are dropped when there are no clusters.
    ///
    /// # Errors
    ///
    /// Returns `ZonesError::InvalidOperatorWeights` if weights are invalid or
    /// every legal operator has weight zero.
    pub fn for_model(
        model: ZoneModelConfig,
        weights: OperatorWeights,
        n_confounders: usize,
    ) -> Result<Self, ZonesError> {
        if !weights.is_valid() {
            return Err(ZonesError::InvalidOperatorWeights);
        }
        let has_clusters = model.n_clusters > 0;
        let per_confounder = if n_confounders == 0 {
            0.0
        } else {
            weights.confounding_effects / usize_to_f64(n_confounders)
        };

        let mut entries = Vec::new();
        let mut push = |operator, weight| entries.push(ScheduledOperator { operator, weight });
        if has_clusters {
            push(Operator::AlterCluster, weights.clusters);
            push(Operator::GibbsishCluster, weights.gibbsish_clusters);
        }
        if model.sample_source {
            push(Operator::GibbsSource, weights.source);
            push(Operator::GibbsWeights, weights.weights);
            if has_clusters {
                push(Operator::GibbsClusterEffect, weights.cluster_effect);
            }
            for confounder in 0..n_confounders {
                push(Operator::GibbsConfoundingEffects { confounder }, per_confounder);
            }
        } else {
            push(Operator::AlterWeights, weights.weights);
            if has_clusters {
                push(Operator::AlterClusterEffect, weights.cluster_effect);
            }
            for confounder in 0..n_confounders {
                push(Operator::AlterConfoundingEffects { confounder }, per_confounder);
            }
        }

        let total = entries.iter().map(|entry| entry.weight).sum::<f64>();
        if !(total.is_finite() && total > 0.0) {
            return Err(ZonesError::InvalidOperatorWeights);
        }
        for entry in &mut entries {
            entry.weight /= total;
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub fn entries(&self) -> &[ScheduledOperator] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Normalised weight of `operator`, `0` if it is not scheduled.
    #[must_use]
    pub fn weight(&self, operator: Operator) -> f64 {
        self.entries
            .iter()
            .filter(|entry| entry.operator == operator)
            .map(|entry| entry.weight)
            .sum()
    }

    /// Draw the index of the next operator.
    pub fn draw(&self, rng: &mut StdRng) -> Option<usize> {
        let weights = self
            .entries
            .iter()
            .map(|entry| entry.weight)
            .collect::<Vec<_>>();
        sample_categorical(rng, &weights)
    }
}

/// Redraw the sources at `sites` of `candidate` from their conditional.
///
/// Returns the forward log density of the new attributions under `candidate`
/// and the backward log density of `current`'s attributions under `current`.
/// Samples without sources are left untouched.
pub(crate) fn resample_sources_at(
    input: &ZoneModelInput,
    current: &Sample,
    candidate: &mut Sample,
    sites: &[usize],
    rng: &mut StdRng,
) -> Result<(f64, f64), ZonesError> {
    if !current.has_source() || sites.is_empty() {
        return Ok((0.0, 0.0));
    }
    let forward_terms = evaluate_sites(input, candidate, sites)?;
    let backward_terms = evaluate_sites(input, current, sites)?;
    let mut log_q_forward = 0.0;
    let mut log_q_backward = 0.0;
    for (forward, backward) in forward_terms.iter().zip(&backward_terms) {
        for feature in 0..input.n_features() {
            let posterior = forward.source_posterior(feature)?;
            let drawn = sample_categorical(rng, &posterior).ok_or(ZonesError::NumericAnomaly {
                context: "source posterior",
            })?;
            log_q_forward += posterior[drawn].ln();
            candidate.set_source(forward.site, feature, drawn);

            let previous = backward.source_posterior(feature)?;
            if let Some(old) = current.source(backward.site, feature) {
                log_q_backward += previous[old].ln();
            }
        }
    }
    Ok((log_q_forward, log_q_backward))
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn disabling_source_sampling_zeroes_source_weight() {
        let model = ZoneModelConfig {
            sample_source: false,
            ..ZoneModelConfig::default()
        };
        let schedule =
            OperatorSchedule::for_model(model, OperatorWeights::default(), 2).expect("schedule");
        assert_eq!(schedule.weight(Operator::GibbsSource), 0.0);
        assert!(schedule.weight(Operator::AlterWeights) > 0.0);
        let total = schedule.entries().iter().map(|entry| entry.weight).sum::<f64>();
        assert!((total - 1.0).abs() < 1.0e-12);
    }

    #[test]
    fn confounding_weight_is_split_evenly() {
        let schedule = OperatorSchedule::for_model(
            ZoneModelConfig::default(),
            OperatorWeights::default(),
            3,
        )
        .expect("schedule");
        let first = schedule.weight(Operator::GibbsConfoundingEffects { confounder: 0 });
        let last = schedule.weight(Operator::GibbsConfoundingEffects { confounder: 2 });
        assert!(first > 0.0);
        assert!((first - last).abs() < 1.0e-15);
        assert_eq!(schedule.len(), 8);
    }

    #[test]
    fn clusterless_model_schedules_no_cluster_operators() {
        let model = ZoneModelConfig {
            n_clusters: 0,
            ..ZoneModelConfig::default()
        };
        let schedule =
            OperatorSchedule::for_model(model, OperatorWeights::default(), 1).expect("schedule");
        assert_eq!(schedule.weight(Operator::AlterCluster), 0.0);
        assert_eq!(schedule.weight(Operator::GibbsishCluster), 0.0);
        assert_eq!(schedule.weight(Operator::GibbsClusterEffect), 0.0);
    }

    #[test]
    fn all_zero_legal_weights_are_rejected() {
        let weights = OperatorWeights {
            clusters: 0.0,
            gibbsish_clusters: 0.0,
            weights: 0.0,
            cluster_effect: 0.0,
            confounding_effects: 0.0,
            source: 1.0,
        };
        let model = ZoneModelConfig {
            sample_source: false,
            ..ZoneModelConfig::default()
        };
        assert!(matches!(
            OperatorSchedule::for_model(model, weights, 1),
            Err(ZonesError::InvalidOperatorWeights)
        ));
    }

    #[test]
    fn exactness_flags() {
        assert!(Operator::GibbsSource.is_exact());
        assert!(Operator::GibbsConfoundingEffects { confounder: 1 }.is_exact());
        assert!(!Operator::GibbsWeights.is_exact());
        assert!(!Operator::AlterCluster.is_exact());
        assert_eq!(Operator::AlterWeights.family(), OperatorFamily::RandomWalk);
    }

    #[test]
    fn degenerate_backward_density_rejects() {
        let sample = test_support::path_sample(false);
        assert!(matches!(
            Proposal::candidate(sample, 0.0, f64::NEG_INFINITY),
            Proposal::Rejected
        ));
    }

    #[test]
    fn source_resampling_only_touches_requested_sites() {
        let input = test_support::path_input();
        let current = test_support::path_sample(true);
        let mut candidate = current.clone();
        let mut rng = StdRng::seed_from_u64(4);
        let (forward, backward) =
            resample_sources_at(&input, &current, &mut candidate, &[0, 4], &mut rng)
                .expect("resampling");
        assert!(forward.is_finite() && forward <= 0.0);
        assert!(backward.is_finite() && backward <= 0.0);
        for site in [1, 2, 3, 5] {
            for feature in 0..3 {
                assert_eq!(candidate.source(site, feature), current.source(site, feature));
            }
        }
        // site 0 is outside the cluster, so component 0 can never be drawn there
        for feature in 0..3 {
            assert_ne!(candidate.source(0, feature), Some(0));
        }
    }
}
