//! Metropolis-Hastings driver for zone chains.
//!
//! A chain moves through `Initializing -> Warmup -> Sampling -> Terminated`.
//! Each step draws one operator by its normalised weight, asks it for a
//! proposal and either adopts it outright (exact conditional draws) or runs
//! the Metropolis-Hastings test. Operator errors end the chain.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use super::diagnostics::summarize_multi_chain_convergence;
use super::init::initialize_sample;
use super::likelihood::LikelihoodCache;
use super::operators::{Operator, OperatorContext, OperatorSchedule, Proposal};
use super::posterior::{ZoneDraw, ZoneTrace};
use super::priors::log_prior;
use super::sample::Sample;
use super::types::{
    ChainConstraints, ChainDiagnostics, ChainOutcome, ChainPhase, ChainRun, OperatorSummary,
    ZoneMultiChainReport, ZoneSamplerConfig, ZonesError,
};
use super::warmup::{trim_to_max_size, warmup_constraints};
use crate::inference::ProposalStats;
use crate::input::ZoneModelInput;

/// What happened in one chain step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub operator: Operator,
    pub accepted: bool,
}

/// Log Metropolis-Hastings acceptance ratio of a candidate.
#[must_use]
pub fn metropolis_log_ratio(
    current_log_posterior: f64,
    candidate_log_posterior: f64,
    log_q_forward: f64,
    log_q_backward: f64,
) -> f64 {
    candidate_log_posterior - current_log_posterior + log_q_backward - log_q_forward
}

fn should_accept(log_acceptance: f64, rng: &mut StdRng) -> bool {
    log_acceptance >= 0.0 || rng.random::<f64>().ln() < log_acceptance
}

fn stop_requested(stop: Option<&AtomicBool>) -> bool {
    stop.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// One Markov chain over zone samples.
pub struct ZoneChain<'a> {
    index: usize,
    input: &'a ZoneModelInput,
    config: ZoneSamplerConfig,
    schedule: OperatorSchedule,
    warmup_constraints: ChainConstraints,
    constraints: ChainConstraints,
    rng: StdRng,
    sample: Sample,
    cache: LikelihoodCache,
    log_likelihood: f64,
    log_prior: f64,
    warmup_stats: Vec<ProposalStats>,
    sampling_stats: Vec<ProposalStats>,
    phase: ChainPhase,
    warmup_steps_completed: usize,
    iterations_completed: usize,
    trimmed_sites: usize,
    cancelled: bool,
}

impl<'a> ZoneChain<'a> {
    /// Initialise a chain, fresh or from `resume`, ready for warmup.
    ///
    /// # Errors
    ///
    /// Returns `ZonesError` if initialisation fails or the initial sample has
    /// an undefined likelihood.
    pub fn new(
        index: usize,
        input: &'a ZoneModelInput,
        config: ZoneSamplerConfig,
        schedule: OperatorSchedule,
        warmup_constraints: ChainConstraints,
        seed: u64,
        resume: Option<&Sample>,
    ) -> Result<Self, ZonesError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let sample = initialize_sample(input, &config, resume, &mut rng)?;
        let operators = schedule.len();
        let mut chain = Self {
            index,
            input,
            config,
            schedule,
            warmup_constraints,
            constraints: warmup_constraints,
            rng,
            sample,
            cache: LikelihoodCache::new(input),
            log_likelihood: f64::NEG_INFINITY,
            log_prior: f64::NEG_INFINITY,
            warmup_stats: vec![ProposalStats::default(); operators],
            sampling_stats: vec![ProposalStats::default(); operators],
            phase: ChainPhase::Initializing,
            warmup_steps_completed: 0,
            iterations_completed: 0,
            trimmed_sites: 0,
            cancelled: false,
        };
        let current = chain.sample.clone();
        (chain.log_likelihood, chain.log_prior) = chain.evaluate(&current)?;
        chain.phase = ChainPhase::Warmup;
        log::debug!(
            "chain {index} initialised with {} clusters, log-likelihood {:.3}",
            chain.sample.n_clusters(),
            chain.log_likelihood
        );
        Ok(chain)
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn phase(&self) -> ChainPhase {
        self.phase
    }

    #[must_use]
    pub const fn sample(&self) -> &Sample {
        &self.sample
    }

    #[must_use]
    pub const fn constraints(&self) -> ChainConstraints {
        self.constraints
    }

    #[must_use]
    pub const fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    #[must_use]
    pub fn log_posterior(&self) -> f64 {
        self.log_likelihood + self.log_prior
    }

    #[must_use]
    pub const fn schedule(&self) -> &OperatorSchedule {
        &self.schedule
    }

    fn context(&self) -> OperatorContext<'a> {
        OperatorContext {
            input: self.input,
            model: self.config.model,
            priors: self.config.priors,
            tuning: self.config.tuning,
            constraints: self.constraints,
        }
    }

    fn evaluate(&mut self, candidate: &Sample) -> Result<(f64, f64), ZonesError> {
        self.cache.update(self.input, candidate)?;
        let log_likelihood = self.cache.log_likelihood(self.input, candidate)?;
        let prior = log_prior(self.config.priors, self.input, candidate);
        if prior.is_nan() {
            return Err(ZonesError::NumericAnomaly {
                context: "log prior",
            });
        }
        Ok((log_likelihood, prior))
    }

    /// Draw one operator and apply its proposal.
    ///
    /// # Errors
    ///
    /// Returns `ZonesError` if the operator or the likelihood hits a numeric
    /// anomaly.
    pub fn step(&mut self) -> Result<StepOutcome, ZonesError> {
        let slot = self
            .schedule
            .draw(&mut self.rng)
            .ok_or(ZonesError::InvalidOperatorWeights)?;
        let operator = self.schedule.entries()[slot].operator;
        let context = self.context();
        let proposal = operator.propose(&context, &self.sample, &mut self.rng)?;

        let accepted = match proposal {
            Proposal::Rejected => false,
            Proposal::Exact(candidate) => {
                (self.log_likelihood, self.log_prior) = self.evaluate(&candidate)?;
                self.sample = candidate;
                true
            }
            Proposal::Candidate {
                sample: candidate,
                log_q_forward,
                log_q_backward,
            } => {
                let (log_likelihood, prior) = self.evaluate(&candidate)?;
                let log_ratio = metropolis_log_ratio(
                    self.log_posterior(),
                    log_likelihood + prior,
                    log_q_forward,
                    log_q_backward,
                );
                let accepted = should_accept(log_ratio, &mut self.rng);
                if accepted {
                    self.sample = candidate;
                    self.log_likelihood = log_likelihood;
                    self.log_prior = prior;
                }
                accepted
            }
        };

        let stats = if self.phase == ChainPhase::Sampling {
            &mut self.sampling_stats
        } else {
            &mut self.warmup_stats
        };
        stats[slot].record(accepted);
        Ok(StepOutcome { operator, accepted })
    }

    /// Run up to `steps` warmup steps under the warmup constraints.
    ///
    /// # Errors
    ///
    /// Propagates step errors.
    pub fn run_warmup(&mut self, steps: usize, stop: Option<&AtomicBool>) -> Result<(), ZonesError> {
        for _ in 0..steps {
            if stop_requested(stop) {
                self.cancelled = true;
                break;
            }
            self.step()?;
            self.warmup_steps_completed += 1;
            if cfg!(debug_assertions) && self.warmup_steps_completed.is_multiple_of(25) {
                self.debug_check_cache();
            }
        }
        log::debug!(
            "chain {} finished {} warmup steps",
            self.index,
            self.warmup_steps_completed
        );
        Ok(())
    }

    /// Switch to the nominal constraints and start sampling.
    ///
    /// Clusters that outgrew the nominal `max_size` during warmup lose random
    /// members; sampled attributions are then redrawn so none points at a
    /// component a site no longer has.
    ///
    /// # Errors
    ///
    /// Returns `ZonesError` if the redraw or re-evaluation fails.
    pub fn enter_sampling(&mut self, nominal: ChainConstraints) -> Result<(), ZonesError> {
        self.constraints = nominal;
        let removed = trim_to_max_size(&mut self.sample, nominal.max_size, &mut self.rng);
        if !removed.is_empty() {
            log::warn!(
                "chain {}: trimmed {} sites from clusters above max_size {}",
                self.index,
                removed.len(),
                nominal.max_size
            );
            self.trimmed_sites += removed.len();
            if self.sample.has_source() {
                let context = self.context();
                if let Proposal::Exact(redrawn) =
                    Operator::GibbsSource.propose(&context, &self.sample, &mut self.rng)?
                {
                    self.sample = redrawn;
                }
            }
            let current = self.sample.clone();
            (self.log_likelihood, self.log_prior) = self.evaluate(&current)?;
        }
        self.phase = ChainPhase::Sampling;
        Ok(())
    }

    /// Run up to `iterations` sampling steps, retaining every `thin`-th state.
    ///
    /// # Errors
    ///
    /// Propagates step errors.
    pub fn run_sampling(
        &mut self,
        iterations: usize,
        thin: usize,
        stop: Option<&AtomicBool>,
    ) -> Result<ZoneTrace, ZonesError> {
        let thin = thin.max(1);
        let mut trace = ZoneTrace {
            draws: Vec::with_capacity(iterations / thin),
        };
        for step in 0..iterations {
            if stop_requested(stop) {
                self.cancelled = true;
                break;
            }
            self.step()?;
            self.iterations_completed += 1;
            if (step + 1).is_multiple_of(thin) {
                trace.draws.push(ZoneDraw {
                    step,
                    sample: self.sample.clone(),
                    log_likelihood: self.log_likelihood,
                    log_prior: self.log_prior,
                });
            }
        }
        Ok(trace)
    }

    /// Run warmup and sampling with the configured schedule.
    ///
    /// # Errors
    ///
    /// Propagates step errors.
    pub fn run(&mut self, stop: Option<&AtomicBool>) -> Result<ZoneTrace, ZonesError> {
        let mcmc = self.config.mcmc;
        self.run_warmup(mcmc.warmup_steps, stop)?;
        let trace = if self.cancelled {
            ZoneTrace::default()
        } else {
            self.enter_sampling(self.config.nominal_constraints())?;
            self.run_sampling(mcmc.iterations, mcmc.thin, stop)?
        };
        self.terminate();
        Ok(trace)
    }

    /// Run until finished or until `stop` is raised.
    ///
    /// # Errors
    ///
    /// Propagates step errors.
    pub fn run_until(&mut self, stop: &AtomicBool) -> Result<ZoneTrace, ZonesError> {
        self.run(Some(stop))
    }

    pub fn terminate(&mut self) {
        self.phase = ChainPhase::Terminated;
        log::info!(
            "chain {} terminated after {} warmup and {} sampling steps{}",
            self.index,
            self.warmup_steps_completed,
            self.iterations_completed,
            if self.cancelled { " (cancelled)" } else { "" }
        );
    }

    #[must_use]
    pub fn diagnostics(&self, retained_draws: usize) -> ChainDiagnostics {
        let operators = self
            .schedule
            .entries()
            .iter()
            .zip(self.warmup_stats.iter().zip(&self.sampling_stats))
            .map(|(entry, (warmup, sampling))| OperatorSummary {
                name: entry.operator.name(),
                family: entry.operator.family(),
                weight: entry.weight,
                warmup: *warmup,
                sampling: *sampling,
            })
            .collect();
        ChainDiagnostics {
            chain: self.index,
            warmup_steps_completed: self.warmup_steps_completed,
            iterations_completed: self.iterations_completed,
            retained_draws,
            cancelled: self.cancelled,
            warmup_constraints: self.warmup_constraints,
            trimmed_sites: self.trimmed_sites,
            operators,
        }
    }

    fn debug_check_cache(&self) {
        let mut fresh = LikelihoodCache::new(self.input);
        if fresh.update(self.input, &self.sample).is_ok()
            && let Ok(recomputed) = fresh.log_likelihood(self.input, &self.sample)
        {
            debug_assert!(
                (recomputed - self.log_likelihood).abs() < 1.0e-8
                    || (recomputed.is_infinite() && self.log_likelihood.is_infinite())
            );
        }
    }
}

fn prepare(input: &ZoneModelInput, config: &ZoneSamplerConfig) -> Result<OperatorSchedule, ZonesError> {
    config.validate()?;
    input.validate()?;
    OperatorSchedule::for_model(config.model, config.operators, input.confounders.len())
}

#[allow(clippy::too_many_arguments)]
fn run_chain(
    index: usize,
    input: &ZoneModelInput,
    config: ZoneSamplerConfig,
    schedule: OperatorSchedule,
    warmup: ChainConstraints,
    seed: u64,
    resume: Option<&Sample>,
    stop: Option<&AtomicBool>,
) -> Result<ChainRun, ZonesError> {
    let mut chain = ZoneChain::new(index, input, config, schedule, warmup, seed, resume)?;
    let trace = chain.run(stop)?;
    let diagnostics = chain.diagnostics(trace.len());
    for summary in &diagnostics.operators {
        log::debug!(
            "chain {index} {}: {}/{} accepted",
            summary.name,
            summary.sampling.accepted,
            summary.sampling.proposed
        );
    }
    Ok(ChainRun { diagnostics, trace })
}

/// Run one chain with nominal constraints throughout.
///
/// # Errors
///
/// Returns `ZonesError` if inputs or configuration are invalid, or the chain fails.
pub fn sample_zones(
    input: &ZoneModelInput,
    config: ZoneSamplerConfig,
) -> Result<ChainRun, ZonesError> {
    let schedule = prepare(input, &config)?;
    run_chain(
        0,
        input,
        config,
        schedule,
        config.nominal_constraints(),
        config.mcmc.seed,
        None,
        None,
    )
}

/// Run one chain starting from an earlier sample.
///
/// # Errors
///
/// Returns `ZonesError` if the sample does not fit the model or the chain fails.
pub fn sample_zones_from(
    input: &ZoneModelInput,
    config: ZoneSamplerConfig,
    resume: &Sample,
) -> Result<ChainRun, ZonesError> {
    let schedule = prepare(input, &config)?;
    run_chain(
        0,
        input,
        config,
        schedule,
        config.nominal_constraints(),
        config.mcmc.seed,
        Some(resume),
        None,
    )
}

/// Run `config.warmup.chains` chains in parallel with annealed warmup constraints.
///
/// A failing chain is reported in its slot without stopping the others.
/// Convergence diagnostics are computed when at least two chains completed
/// with enough draws.
///
/// # Errors
///
/// Returns `ZonesError` if inputs or configuration are invalid.
pub fn sample_zones_multi_chain(
    input: &ZoneModelInput,
    config: ZoneSamplerConfig,
    resume: Option<&Sample>,
    stop: Option<&AtomicBool>,
) -> Result<ZoneMultiChainReport, ZonesError> {
    let schedule = prepare(input, &config)?;
    let constraints = warmup_constraints(&config);

    let outcomes = std::thread::scope(|scope| {
        let handles = constraints
            .iter()
            .enumerate()
            .map(|(chain_index, warmup)| {
                let seed = config.warmup.chain_seed(config.mcmc.seed, chain_index);
                let schedule = schedule.clone();
                let warmup = *warmup;
                scope.spawn(move || {
                    run_chain(chain_index, input, config, schedule, warmup, seed, resume, stop)
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .enumerate()
            .map(|(chain, handle)| {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(ZonesError::ChainPanicked { chain }));
                match result {
                    Ok(run) => ChainOutcome::Completed(run),
                    Err(error) => {
                        log::warn!("chain {chain} failed: {error}");
                        ChainOutcome::Failed { chain, error }
                    }
                }
            })
            .collect::<Vec<_>>()
    });

    let traces = outcomes
        .iter()
        .filter_map(ChainOutcome::run)
        .map(|run| &run.trace)
        .collect::<Vec<_>>();
    let convergence = if traces.len() >= 2 {
        summarize_multi_chain_convergence(&traces)
            .inspect_err(|error| log::warn!("convergence diagnostics skipped: {error}"))
            .ok()
    } else {
        None
    };

    Ok(ZoneMultiChainReport {
        chains: outcomes,
        convergence,
    })
}
