//! Reusable inference and MCMC utility types.

use thiserror::Error;

use crate::utils::usize_to_f64;

/// Errors for generic MCMC configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InferenceError {
    #[error("iterations must be positive")]
    InvalidIterations,
    #[error("thinning interval must be positive")]
    InvalidThinning,
    #[error("thinning interval ({thin}) exceeds iterations ({iterations})")]
    ThinningExceedsIterations { thin: usize, iterations: usize },
}

/// Generic MCMC schedule.
///
/// Every chain first runs `warmup_steps` unrecorded steps, then `iterations`
/// sampling steps of which every `thin`-th state is retained.
#[derive(Debug, Clone, Copy)]
pub struct McmcConfig {
    pub iterations: usize,
    pub warmup_steps: usize,
    pub thin: usize,
    pub seed: u64,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            warmup_steps: 2_000,
            thin: 10,
            seed: 42,
        }
    }
}

impl McmcConfig {
    /// # Errors
    ///
    /// Returns `InferenceError` if schedule values are invalid.
    pub const fn validate(self) -> Result<(), InferenceError> {
        if self.iterations == 0 {
            return Err(InferenceError::InvalidIterations);
        }
        if self.thin == 0 {
            return Err(InferenceError::InvalidThinning);
        }
        if self.thin > self.iterations {
            return Err(InferenceError::ThinningExceedsIterations {
                thin: self.thin,
                iterations: self.iterations,
            });
        }
        Ok(())
    }

    /// Number of retained draws implied by this configuration.
    #[must_use]
    pub const fn retained_draws(self) -> usize {
        self.iterations / self.thin
    }
}

/// Proposal counters for a single Metropolis-Hastings block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProposalStats {
    pub proposed: usize,
    pub accepted: usize,
}

impl ProposalStats {
    /// Record one proposal and whether it was accepted.
    pub const fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    /// Number of rejected proposals.
    #[must_use]
    pub const fn rejected(self) -> usize {
        self.proposed - self.accepted
    }

    /// Acceptance rate in `[0, 1]`, or `0` if no proposals were made.
    #[must_use]
    pub fn acceptance_rate(self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            usize_to_f64(self.accepted) / usize_to_f64(self.proposed)
        }
    }

    /// Combine counters from two phases or chains.
    #[must_use]
    pub const fn merged(self, other: Self) -> Self {
        Self {
            proposed: self.proposed + other.proposed,
            accepted: self.accepted + other.accepted,
        }
    }
}
