//! Core public types for the zone sampler.

use thiserror::Error;

use super::operators::OperatorFamily;
use super::posterior::ZoneTrace;
use super::priors::ZonePriorConfig;
use crate::inference::{InferenceError, McmcConfig, ProposalStats};
use crate::input::InputError;

/// Errors returned by zone configuration, initialisation and sampling.
#[derive(Debug, Error)]
pub enum ZonesError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),
    #[error(transparent)]
    InvalidSchedule(#[from] InferenceError),
    #[error("cluster size bounds [{min_size}, {max_size}] are invalid")]
    InvalidSizeBounds { min_size: usize, max_size: usize },
    #[error("initial cluster size {initial_size} must lie in [{min_size}, {max_size}]")]
    InvalidInitialSize {
        initial_size: usize,
        min_size: usize,
        max_size: usize,
    },
    #[error("initialisation needs at least one growth attempt")]
    InvalidAttemptBudget,
    #[error("operator weights must be finite, non-negative and select at least one operator")]
    InvalidOperatorWeights,
    #[error("invalid zone prior configuration")]
    InvalidPriorConfig,
    #[error("invalid proposal tuning configuration")]
    InvalidProposalTuning,
    #[error("invalid warmup configuration")]
    InvalidWarmupConfig,
    #[error("multi-chain workflows require at least {min} chains; found {found}")]
    InvalidChainCount { min: usize, found: usize },
    #[error("multi-chain seed stride must be positive")]
    InvalidSeedStride,
    #[error("resume sample does not match the model: {0}")]
    ResumeMismatch(&'static str),
    #[error(
        "failed to grow cluster {cluster} after {attempts} attempts; reduce the cluster count or the initial size"
    )]
    ClusterInitialization { cluster: usize, attempts: usize },
    #[error("numeric anomaly in {context}")]
    NumericAnomaly { context: &'static str },
    #[error("chain {chain} panicked")]
    ChainPanicked { chain: usize },
    #[error("each chain must retain at least {minimum} draws; minimum found {found}")]
    InsufficientChainDraws { minimum: usize, found: usize },
    #[error("trace dimensions differ across chains")]
    InconsistentTraceDimensions,
}

impl ZonesError {
    /// Whether the error stems from malformed configuration or inputs,
    /// detected before any chain starts.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::InvalidSchedule(_)
                | Self::InvalidSizeBounds { .. }
                | Self::InvalidInitialSize { .. }
                | Self::InvalidAttemptBudget
                | Self::InvalidOperatorWeights
                | Self::InvalidPriorConfig
                | Self::InvalidProposalTuning
                | Self::InvalidWarmupConfig
                | Self::InvalidChainCount { .. }
                | Self::InvalidSeedStride
                | Self::ResumeMismatch(_)
        )
    }
}

/// Structural model settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneModelConfig {
    /// Number of latent clusters.
    pub n_clusters: usize,
    /// Smallest admissible cluster size.
    pub min_size: usize,
    /// Largest admissible cluster size.
    pub max_size: usize,
    /// Sample the source attribution explicitly instead of marginalising it.
    pub sample_source: bool,
}

impl Default for ZoneModelConfig {
    fn default() -> Self {
        Self {
            n_clusters: 1,
            min_size: 3,
            max_size: 50,
            sample_source: true,
        }
    }
}

impl ZoneModelConfig {
    /// # Errors
    ///
    /// Returns `ZonesError::InvalidSizeBounds` if the bounds are empty or inverted.
    pub const fn validate(self) -> Result<(), ZonesError> {
        if self.min_size == 0 || self.min_size > self.max_size {
            return Err(ZonesError::InvalidSizeBounds {
                min_size: self.min_size,
                max_size: self.max_size,
            });
        }
        Ok(())
    }
}

/// Raw operator weights, normalised over the operator set legal for the model.
#[derive(Debug, Clone, Copy)]
pub struct OperatorWeights {
    /// Grow/shrink/swap moves of one cluster.
    pub clusters: f64,
    /// Resampling of one cluster's membership from inclusion posteriors.
    pub gibbsish_clusters: f64,
    pub weights: f64,
    pub cluster_effect: f64,
    /// Total weight, split evenly across confounders.
    pub confounding_effects: f64,
    /// Only used when source attribution is sampled.
    pub source: f64,
}

impl Default for OperatorWeights {
    fn default() -> Self {
        Self {
            clusters: 0.3,
            gibbsish_clusters: 0.15,
            weights: 0.15,
            cluster_effect: 0.1,
            confounding_effects: 0.15,
            source: 0.15,
        }
    }
}

impl OperatorWeights {
    /// Whether every weight is finite and non-negative.
    #[must_use]
    pub fn is_valid(self) -> bool {
        [
            self.clusters,
            self.gibbsish_clusters,
            self.weights,
            self.cluster_effect,
            self.confounding_effects,
            self.source,
        ]
        .iter()
        .all(|weight| weight.is_finite() && *weight >= 0.0)
    }
}

/// Proposal-shape controls for the structural and random-walk operators.
#[derive(Debug, Clone, Copy)]
pub struct ProposalTuning {
    /// Dirichlet concentration scale of the weights random walk.
    pub weights_step: f64,
    /// Dirichlet concentration scale of the cluster-effect random walk.
    pub cluster_effect_step: f64,
    /// Dirichlet concentration scale of the confounding-effect random walk.
    pub confounding_effects_step: f64,
    /// Unoccupied sites kept as candidates once the available set exceeds `max_size`.
    pub candidate_subsample: usize,
    /// Probability of a grow move in the grow/shrink/swap operator.
    pub grow_probability: f64,
    /// Probability of a shrink move; the remainder goes to swaps.
    pub shrink_probability: f64,
}

impl Default for ProposalTuning {
    fn default() -> Self {
        Self {
            weights_step: 10.0,
            cluster_effect_step: 20.0,
            confounding_effects_step: 10.0,
            candidate_subsample: 10,
            grow_probability: 0.4,
            shrink_probability: 0.4,
        }
    }
}

impl ProposalTuning {
    /// Whether tuning settings are numerically valid.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.weights_step > 0.0
            && self.cluster_effect_step > 0.0
            && self.confounding_effects_step > 0.0
            && self.candidate_subsample > 0
            && (0.0..=1.0).contains(&self.grow_probability)
            && (0.0..=1.0).contains(&self.shrink_probability)
            && self.grow_probability + self.shrink_probability <= 1.0
    }

    /// Probability of a swap move.
    #[must_use]
    pub fn swap_probability(self) -> f64 {
        (1.0 - self.grow_probability - self.shrink_probability).max(0.0)
    }
}

/// Initial cluster growth settings.
#[derive(Debug, Clone, Copy)]
pub struct InitConfig {
    /// Size of freshly grown clusters.
    pub initial_size: usize,
    /// Total growth attempts across all clusters before giving up.
    pub max_attempts: usize,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            initial_size: 5,
            max_attempts: 1_000,
        }
    }
}

impl InitConfig {
    /// # Errors
    ///
    /// Returns `ZonesError` if the initial size lies outside the model bounds or
    /// the attempt budget is zero.
    pub const fn validate(self, model: ZoneModelConfig) -> Result<(), ZonesError> {
        if self.initial_size < model.min_size || self.initial_size > model.max_size {
            return Err(ZonesError::InvalidInitialSize {
                initial_size: self.initial_size,
                min_size: model.min_size,
                max_size: model.max_size,
            });
        }
        if self.max_attempts == 0 {
            return Err(ZonesError::InvalidAttemptBudget);
        }
        Ok(())
    }
}

/// Multi-chain warmup settings.
#[derive(Debug, Clone, Copy)]
pub struct WarmupConfig {
    /// Number of independent chains.
    pub chains: usize,
    /// Seed increment between adjacent chains.
    ///
    /// Chain `i` uses `seed + i * seed_stride` with wrapping arithmetic.
    pub seed_stride: u64,
    /// Nominal probability that a grow move only considers cluster neighbours.
    pub p_grow_connected: f64,
    /// Connectivity bias assigned to the disciplined warmup chains.
    pub connected_bias: f64,
    /// Number of distinct warmup `max_size` levels.
    pub size_groups: usize,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            chains: 4,
            seed_stride: 10_000,
            p_grow_connected: 0.85,
            connected_bias: 0.95,
            size_groups: 4,
        }
    }
}

impl WarmupConfig {
    /// # Errors
    ///
    /// Returns `ZonesError` if warmup settings are invalid.
    pub fn validate(self) -> Result<(), ZonesError> {
        if self.chains == 0 {
            return Err(ZonesError::InvalidChainCount {
                min: 1,
                found: self.chains,
            });
        }
        if self.seed_stride == 0 {
            return Err(ZonesError::InvalidSeedStride);
        }
        if !(0.0..=1.0).contains(&self.p_grow_connected)
            || !(0.0..=1.0).contains(&self.connected_bias)
            || self.size_groups == 0
        {
            return Err(ZonesError::InvalidWarmupConfig);
        }
        Ok(())
    }

    /// Seed for chain `index` derived from `base_seed`.
    #[must_use]
    pub fn chain_seed(self, base_seed: u64, index: usize) -> u64 {
        let index_u64 = u64::try_from(index).unwrap_or(u64::MAX);
        base_seed.wrapping_add(index_u64.wrapping_mul(self.seed_stride))
    }
}

/// Full sampler configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZoneSamplerConfig {
    pub mcmc: McmcConfig,
    pub model: ZoneModelConfig,
    pub priors: ZonePriorConfig,
    pub operators: OperatorWeights,
    pub tuning: ProposalTuning,
    pub init: InitConfig,
    pub warmup: WarmupConfig,
}

impl ZoneSamplerConfig {
    /// # Errors
    ///
    /// Returns `ZonesError` if any configuration block is invalid.
    pub fn validate(self) -> Result<(), ZonesError> {
        self.mcmc.validate()?;
        self.model.validate()?;
        self.init.validate(self.model)?;
        if !self.priors.is_valid() {
            return Err(ZonesError::InvalidPriorConfig);
        }
        if !self.operators.is_valid() {
            return Err(ZonesError::InvalidOperatorWeights);
        }
        if !self.tuning.is_valid() {
            return Err(ZonesError::InvalidProposalTuning);
        }
        self.warmup.validate()
    }

    /// Constraints a chain runs under outside of warmup.
    #[must_use]
    pub const fn nominal_constraints(self) -> ChainConstraints {
        ChainConstraints {
            max_size: self.model.max_size,
            p_grow_connected: self.warmup.p_grow_connected,
        }
    }
}

/// Per-chain constraints that the warmup scheduler varies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainConstraints {
    /// Largest cluster size operators may propose.
    pub max_size: usize,
    /// Probability that a grow move only considers cluster neighbours.
    pub p_grow_connected: f64,
}

/// Lifecycle of one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPhase {
    Initializing,
    Warmup,
    Sampling,
    Terminated,
}

/// Acceptance bookkeeping for one scheduled operator.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorSummary {
    pub name: String,
    pub family: OperatorFamily,
    /// Normalised selection probability.
    pub weight: f64,
    pub warmup: ProposalStats,
    pub sampling: ProposalStats,
}

/// Per-chain sampler diagnostics.
#[derive(Debug, Clone)]
pub struct ChainDiagnostics {
    pub chain: usize,
    pub warmup_steps_completed: usize,
    pub iterations_completed: usize,
    pub retained_draws: usize,
    /// Whether the chain stopped early on request.
    pub cancelled: bool,
    pub warmup_constraints: ChainConstraints,
    /// Sites dropped when warmup clusters were trimmed to the nominal bound.
    pub trimmed_sites: usize,
    pub operators: Vec<OperatorSummary>,
}

/// Output of one finished chain.
#[derive(Debug, Clone)]
pub struct ChainRun {
    pub diagnostics: ChainDiagnostics,
    pub trace: ZoneTrace,
}

/// Outcome of one chain in a multi-chain run.
#[derive(Debug)]
pub enum ChainOutcome {
    Completed(ChainRun),
    Failed { chain: usize, error: ZonesError },
}

impl ChainOutcome {
    #[must_use]
    pub const fn run(&self) -> Option<&ChainRun> {
        match self {
            Self::Completed(run) => Some(run),
            Self::Failed { .. } => None,
        }
    }
}

/// Multi-chain split-R-hat diagnostics summary.
#[derive(Debug, Clone, Default)]
pub struct ZoneConvergenceSummary {
    /// Number of chains included.
    pub chain_count: usize,
    /// Draws per chain used after truncation to equal even length.
    pub draws_per_chain_used: usize,
    /// Split-R-hat of the log-likelihood trace.
    pub log_likelihood_split_rhat: Option<f64>,
    /// Split-R-hat of each cluster's size trace.
    pub cluster_size_split_rhat: Vec<f64>,
    /// Effective sample size of each chain's log-likelihood trace.
    pub log_likelihood_ess: Vec<f64>,
    /// Maximum split-R-hat across all tracked scalars.
    pub max_split_rhat: Option<f64>,
}

/// Output report for a multi-chain run.
#[derive(Debug, Default)]
pub struct ZoneMultiChainReport {
    /// Chain outcomes in chain order.
    pub chains: Vec<ChainOutcome>,
    /// Present when at least two chains completed with enough draws.
    pub convergence: Option<ZoneConvergenceSummary>,
}

impl ZoneMultiChainReport {
    /// Completed chains in chain order.
    pub fn completed(&self) -> impl Iterator<Item = &ChainRun> {
        self.chains.iter().filter_map(ChainOutcome::run)
    }

    /// Indices of chains that failed.
    #[must_use]
    pub fn failed_chains(&self) -> Vec<usize> {
        self.chains
            .iter()
            .filter_map(|outcome| match outcome {
                ChainOutcome::Failed { chain, .. } => Some(*chain),
                ChainOutcome::Completed(_) => None,
            })
            .collect()
    }

    /// Operator counters summed over every completed chain.
    ///
    /// Chains share one operator schedule, so summaries are matched by position.
    #[must_use]
    pub fn pooled_operator_stats(&self) -> Vec<OperatorSummary> {
        let mut runs = self.completed();
        let Some(first) = runs.next() else {
            return Vec::new();
        };
        let mut pooled = first.diagnostics.operators.clone();
        for run in runs {
            for (total, summary) in pooled.iter_mut().zip(&run.diagnostics.operators) {
                total.warmup = total.warmup.merged(summary.warmup);
                total.sampling = total.sampling.merged(summary.sampling);
            }
        }
        pooled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sampler_config_is_valid() {
        assert!(ZoneSamplerConfig::default().validate().is_ok());
    }

    #[test]
    fn size_bounds_must_be_ordered() {
        let config = ZoneSamplerConfig {
            model: ZoneModelConfig {
                min_size: 6,
                max_size: 5,
                ..ZoneModelConfig::default()
            },
            ..ZoneSamplerConfig::default()
        };
        let err = config.validate().expect_err("inverted bounds");
        assert!(matches!(
            err,
            ZonesError::InvalidSizeBounds {
                min_size: 6,
                max_size: 5
            }
        ));
        assert!(err.is_configuration());
    }

    #[test]
    fn initial_size_must_respect_bounds() {
        let config = ZoneSamplerConfig {
            init: InitConfig {
                initial_size: 2,
                ..InitConfig::default()
            },
            ..ZoneSamplerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ZonesError::InvalidInitialSize { initial_size: 2, .. })
        ));
    }

    #[test]
    fn negative_operator_weight_is_rejected() {
        let config = ZoneSamplerConfig {
            operators: OperatorWeights {
                source: -0.1,
                ..OperatorWeights::default()
            },
            ..ZoneSamplerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ZonesError::InvalidOperatorWeights)
        ));
    }

    #[test]
    fn tuning_rejects_overfull_move_split() {
        let tuning = ProposalTuning {
            grow_probability: 0.6,
            shrink_probability: 0.6,
            ..ProposalTuning::default()
        };
        assert!(!tuning.is_valid());
        assert!((ProposalTuning::default().swap_probability() - 0.2).abs() < 1.0e-12);
    }

    #[test]
    fn chain_seeds_follow_stride() {
        let warmup = WarmupConfig {
            seed_stride: 7,
            ..WarmupConfig::default()
        };
        assert_eq!(warmup.chain_seed(100, 0), 100);
        assert_eq!(warmup.chain_seed(100, 3), 121);
    }

    fn finished_chain(chain: usize, accepted: usize) -> ChainOutcome {
        ChainOutcome::Completed(ChainRun {
            diagnostics: ChainDiagnostics {
                chain,
                warmup_steps_completed: 4,
                iterations_completed: 10,
                retained_draws: 0,
                cancelled: false,
                warmup_constraints: ZoneSamplerConfig::default().nominal_constraints(),
                trimmed_sites: 0,
                operators: vec![OperatorSummary {
                    name: "gibbs_source".to_owned(),
                    family: OperatorFamily::Gibbs,
                    weight: 1.0,
                    warmup: ProposalStats {
                        proposed: 4,
                        accepted: 4,
                    },
                    sampling: ProposalStats {
                        proposed: 10,
                        accepted,
                    },
                }],
            },
            trace: ZoneTrace::default(),
        })
    }

    #[test]
    fn operator_stats_pool_completed_chains_only() {
        let report = ZoneMultiChainReport {
            chains: vec![
                finished_chain(0, 7),
                ChainOutcome::Failed {
                    chain: 1,
                    error: ZonesError::ChainPanicked { chain: 1 },
                },
                finished_chain(2, 3),
            ],
            convergence: None,
        };
        let pooled = report.pooled_operator_stats();
        assert_eq!(pooled.len(), 1);
        assert_eq!(
            pooled[0].sampling,
            ProposalStats {
                proposed: 20,
                accepted: 10
            }
        );
        assert_eq!(pooled[0].sampling.rejected(), 10);
        assert_eq!(pooled[0].warmup.proposed, 8);
        assert!(ZoneMultiChainReport::default().pooled_operator_stats().is_empty());
    }

    #[test]
    fn numeric_anomaly_is_not_a_configuration_error() {
        let err = ZonesError::NumericAnomaly {
            context: "log-likelihood",
        };
        assert!(!err.is_configuration());
    }
}
