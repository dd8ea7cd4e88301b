//! Posterior traces and summaries for the zone sampler.

use num_traits::ToPrimitive;

use super::sample::Sample;
use crate::utils::usize_to_f64;

/// One retained state of a chain.
#[derive(Debug, Clone)]
pub struct ZoneDraw {
    /// Zero-based sampling iteration at which the state was recorded.
    pub step: usize,
    pub sample: Sample,
    pub log_likelihood: f64,
    pub log_prior: f64,
}

impl ZoneDraw {
    #[must_use]
    pub fn log_posterior(&self) -> f64 {
        self.log_likelihood + self.log_prior
    }
}

/// Thinned trajectory of one chain.
#[derive(Debug, Clone, Default)]
pub struct ZoneTrace {
    pub draws: Vec<ZoneDraw>,
}

impl ZoneTrace {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.draws.len()
    }

    /// Final retained sample, usable to resume a later run.
    #[must_use]
    pub fn last_sample(&self) -> Option<&Sample> {
        self.draws.last().map(|draw| &draw.sample)
    }

    #[must_use]
    pub fn log_likelihood(&self) -> Vec<f64> {
        self.draws.iter().map(|draw| draw.log_likelihood).collect()
    }

    #[must_use]
    pub fn log_posterior(&self) -> Vec<f64> {
        self.draws.iter().map(ZoneDraw::log_posterior).collect()
    }

    /// Size of `cluster` at every retained draw.
    #[must_use]
    pub fn cluster_sizes(&self, cluster: usize) -> Vec<f64> {
        self.draws
            .iter()
            .map(|draw| usize_to_f64(draw.sample.cluster_size(cluster)))
            .collect()
    }

    #[must_use]
    pub fn n_clusters(&self) -> usize {
        self.draws.first().map_or(0, |draw| draw.sample.n_clusters())
    }
}

/// Scalar posterior summary statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub q025: f64,
    pub q50: f64,
    pub q975: f64,
}

/// Posterior summary of a zone trace.
#[derive(Debug, Clone, Default)]
pub struct ZonePosteriorSummary {
    /// Fraction of draws in which each site belongs to each cluster, `(cluster, site)`.
    pub membership: Vec<Vec<f64>>,
    pub cluster_size: Vec<ParameterSummary>,
    /// Per feature, per component.
    pub weights: Vec<Vec<ParameterSummary>>,
    pub log_likelihood: Option<ParameterSummary>,
    pub log_posterior: Option<ParameterSummary>,
    pub draw_count: usize,
}

/// Per-site membership frequency of every cluster.
#[must_use]
pub fn membership_frequency(trace: &ZoneTrace) -> Vec<Vec<f64>> {
    let Some(first) = trace.draws.first() else {
        return Vec::new();
    };
    let n_sites = first.sample.n_sites();
    let draws = usize_to_f64(trace.len());
    (0..first.sample.n_clusters())
        .map(|cluster| {
            let mut counts = vec![0.0; n_sites];
            for draw in &trace.draws {
                for (count, member) in counts.iter_mut().zip(draw.sample.cluster(cluster)) {
                    if *member {
                        *count += 1.0;
                    }
                }
            }
            counts.into_iter().map(|count| count / draws).collect()
        })
        .collect()
}

/// Summaries of cluster membership, sizes, weights and fit.
#[must_use]
pub fn summarize_posterior(trace: &ZoneTrace) -> ZonePosteriorSummary {
    let draw_count = trace.len();
    let Some(first) = trace.draws.first() else {
        return ZonePosteriorSummary::default();
    };

    let cluster_size = (0..trace.n_clusters())
        .map(|cluster| summarize_scalar(&trace.cluster_sizes(cluster)))
        .collect();

    let (n_features, n_sources) = (first.sample.n_features(), first.sample.n_sources());
    let weights = (0..n_features)
        .map(|feature| {
            (0..n_sources)
                .map(|source| {
                    let values: Vec<f64> = trace
                        .draws
                        .iter()
                        .map(|draw| draw.sample.weights()[(feature, source)])
                        .collect();
                    summarize_scalar(&values)
                })
                .collect()
        })
        .collect();

    ZonePosteriorSummary {
        membership: membership_frequency(trace),
        cluster_size,
        weights,
        log_likelihood: Some(summarize_scalar(&trace.log_likelihood())),
        log_posterior: Some(summarize_scalar(&trace.log_posterior())),
        draw_count,
    }
}

#[must_use]
fn summarize_scalar(values: &[f64]) -> ParameterSummary {
    if values.is_empty() {
        return ParameterSummary::default();
    }

    let n = usize_to_f64(values.len());
    let mean = values.iter().sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|value| {
            let centered = value - mean;
            centered * centered
        })
        .sum::<f64>()
        / n.max(1.0);

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    ParameterSummary {
        mean,
        std_dev: variance.sqrt(),
        q025: percentile(&sorted, 0.025),
        q50: percentile(&sorted, 0.5),
        q975: percentile(&sorted, 0.975),
    }
}

#[must_use]
fn percentile(sorted_values: &[f64], probability: f64) -> f64 {
    if sorted_values.is_empty() {
        return f64::NAN;
    }

    let clamped = probability.clamp(0.0, 1.0);
    let last = sorted_values.len() - 1;
    let position = clamped * usize_to_f64(last);
    let lower = position.floor().to_usize().unwrap_or(0);
    let upper = position.ceil().to_usize().unwrap_or(last);

    if lower == upper {
        sorted_values[lower]
    } else {
        let weight = position - usize_to_f64(lower);
        (1.0 - weight).mul_add(sorted_values[lower], weight * sorted_values[upper])
    }
}
