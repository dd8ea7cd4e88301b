//! Contact-zone sampler.
//!
//! Infers clusters of adjacent sites ("zones") whose categorical features are
//! better explained by a shared cluster effect than by the confounder groups
//! (families, areas) each site belongs to. Posterior samples are drawn with a
//! Metropolis-Hastings-within-Gibbs scheme over cluster membership, mixture
//! weights, per-component state distributions and, optionally, per-observation
//! source attributions. Several chains run in parallel, each with its own
//! warmup constraints, before switching to the nominal model.

pub mod diagnostics;
pub mod growth;
pub mod init;
pub mod likelihood;
pub mod operators;
pub mod posterior;
pub mod priors;
pub mod sample;
pub mod sampler;
pub mod types;
pub mod warmup;

pub use diagnostics::{
    SPLIT_RHAT_WARNING, autocorrelation, effective_sample_size, render_convergence_table,
    render_operator_table, summarize_multi_chain_convergence,
};
pub use growth::{ClusterGrowthError, grow_cluster, grow_cluster_from, grow_disjoint_clusters};
pub use init::initialize_sample;
pub use likelihood::{LikelihoodCache, SiteLikelihood, evaluate_sites};
pub use operators::{
    Operator, OperatorContext, OperatorFamily, OperatorSchedule, Proposal, ScheduledOperator,
};
pub use posterior::{
    ParameterSummary, ZoneDraw, ZonePosteriorSummary, ZoneTrace, membership_frequency,
    summarize_posterior,
};
pub use priors::{ZonePriorConfig, log_prior};
pub use sample::{Sample, SampleVersions};
pub use sampler::{
    StepOutcome, ZoneChain, metropolis_log_ratio, sample_zones, sample_zones_from,
    sample_zones_multi_chain,
};
pub use types::{
    ChainConstraints, ChainDiagnostics, ChainOutcome, ChainPhase, ChainRun, InitConfig,
    OperatorSummary, OperatorWeights, ProposalTuning, WarmupConfig, ZoneConvergenceSummary,
    ZoneModelConfig, ZoneMultiChainReport, ZoneSamplerConfig, ZonesError,
};
pub use warmup::{max_size_schedule, trim_to_max_size, warmup_constraints};
