#![forbid(unsafe_code)]

//! # `contact_zones`
//!
//! Bayesian inference of contact zones: spatially connected clusters of sites
//! whose categorical features share a distribution that inheritance from
//! confounder groups does not explain.
//!
//! The crate takes a validated [`ZoneModelInput`] (feature tensor, adjacency
//! graph, confounder groupings) and returns posterior draws of cluster
//! membership and mixture parameters from one or more MCMC chains.

pub mod inference;
pub mod input;
pub mod models;
pub mod utils;

pub use inference::{InferenceError, McmcConfig, ProposalStats};
pub use input::{Adjacency, Confounder, FeatureTensor, InputError, ZoneModelInput};

pub use models::zones::{
    ChainConstraints, ChainDiagnostics, ChainOutcome, ChainPhase, ChainRun, InitConfig,
    LikelihoodCache, Operator, OperatorFamily, OperatorSchedule, OperatorSummary,
    OperatorWeights, ParameterSummary, Proposal, ProposalTuning, SPLIT_RHAT_WARNING, Sample,
    WarmupConfig, ZoneChain, ZoneConvergenceSummary, ZoneDraw, ZoneModelConfig,
    ZoneMultiChainReport, ZonePosteriorSummary, ZonePriorConfig, ZoneSamplerConfig, ZoneTrace,
    ZonesError, effective_sample_size, membership_frequency, render_convergence_table,
    render_operator_table, sample_zones, sample_zones_from, sample_zones_multi_chain,
    summarize_multi_chain_convergence, summarize_posterior,
};
