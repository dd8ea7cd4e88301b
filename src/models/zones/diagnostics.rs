//! MCMC convergence diagnostics and operator reports for the zone sampler.

use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use super::posterior::{ZoneDraw, ZoneTrace};
use super::types::{ChainDiagnostics, ZoneConvergenceSummary, ZonesError};
use crate::utils::usize_to_f64;

/// Split-R-hat above which a scalar is flagged as unconverged in reports.
pub const SPLIT_RHAT_WARNING: f64 = 1.1;

/// Lag-`k` autocorrelation for a scalar chain.
#[must_use]
pub fn autocorrelation(series: &[f64], lag: usize) -> f64 {
    if series.is_empty() || lag >= series.len() {
        return 0.0;
    }

    let n = series.len() - lag;
    let mean = series.iter().sum::<f64>() / usize_to_f64(series.len());

    let denominator = series
        .iter()
        .map(|value| {
            let centered = value - mean;
            centered * centered
        })
        .sum::<f64>();
    if denominator <= 0.0 {
        return 0.0;
    }

    let numerator = (0..n)
        .map(|idx| (series[idx] - mean) * (series[idx + lag] - mean))
        .sum::<f64>();
    numerator / denominator
}

/// Heuristic effective sample size using positive autocorrelation truncation.
#[must_use]
pub fn effective_sample_size(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return usize_to_f64(n);
    }

    let mut rho_sum = 0.0;
    for lag in 1..n {
        let rho = autocorrelation(series, lag);
        if rho <= 0.0 {
            break;
        }
        rho_sum += rho;
    }

    usize_to_f64(n) / (2.0f64.mul_add(rho_sum, 1.0)).max(1.0)
}

/// Split-R-hat of the log-likelihood and of every cluster size across chains.
///
/// All chains are truncated to the same minimum even draw count. Cluster
/// labels are compared by index, so label switching between chains inflates
/// the cluster-size statistics.
///
/// # Errors
///
/// Returns `ZonesError` if fewer than two chains are given, a chain retained
/// fewer than four draws, or chains disagree on the number of clusters.
pub fn summarize_multi_chain_convergence(
    chains: &[&ZoneTrace],
) -> Result<ZoneConvergenceSummary, ZonesError> {
    if chains.len() < 2 {
        return Err(ZonesError::InvalidChainCount {
            min: 2,
            found: chains.len(),
        });
    }

    let min_draws = chains.iter().map(|chain| chain.len()).min().unwrap_or(0);
    let draws_per_chain_used = min_draws - (min_draws % 2);
    if draws_per_chain_used < 4 {
        return Err(ZonesError::InsufficientChainDraws {
            minimum: 4,
            found: draws_per_chain_used,
        });
    }

    let n_clusters = chains[0].n_clusters();
    if chains.iter().any(|chain| chain.n_clusters() != n_clusters) {
        return Err(ZonesError::InconsistentTraceDimensions);
    }

    let log_likelihood_split_rhat =
        split_rhat_from_chains(chains, draws_per_chain_used, |draw| draw.log_likelihood).ok();
    let cluster_size_split_rhat = (0..n_clusters)
        .map(|cluster| {
            split_rhat_from_chains(chains, draws_per_chain_used, |draw| {
                usize_to_f64(draw.sample.cluster_size(cluster))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let log_likelihood_ess = chains
        .iter()
        .map(|chain| {
            let values = chain
                .draws
                .iter()
                .take(draws_per_chain_used)
                .map(|draw| draw.log_likelihood)
                .collect::<Vec<_>>();
            effective_sample_size(&values)
        })
        .collect();

    let max_split_rhat = cluster_size_split_rhat
        .iter()
        .copied()
        .chain(log_likelihood_split_rhat)
        .max_by(f64::total_cmp);

    Ok(ZoneConvergenceSummary {
        chain_count: chains.len(),
        draws_per_chain_used,
        log_likelihood_split_rhat,
        cluster_size_split_rhat,
        log_likelihood_ess,
        max_split_rhat,
    })
}

fn split_rhat_from_chains<F>(
    chains: &[&ZoneTrace],
    draws_per_chain_used: usize,
    extractor: F,
) -> Result<f64, ZonesError>
where
    F: Fn(&ZoneDraw) -> f64,
{
    if chains.len() < 2 || draws_per_chain_used < 4 || !draws_per_chain_used.is_multiple_of(2) {
        return Err(ZonesError::InsufficientChainDraws {
            minimum: 4,
            found: draws_per_chain_used,
        });
    }

    let half = draws_per_chain_used / 2;
    let mut split_chains = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        split_chains.push(chain.draws.iter().take(half).map(&extractor).collect::<Vec<_>>());
        split_chains.push(
            chain
                .draws
                .iter()
                .skip(half)
                .take(half)
                .map(&extractor)
                .collect::<Vec<_>>(),
        );
    }

    split_rhat_scalar(&split_chains)
}

fn split_rhat_scalar(chains: &[Vec<f64>]) -> Result<f64, ZonesError> {
    let n = chains.first().map_or(0, Vec::len);
    if chains.iter().any(|chain| chain.len() != n) {
        return Err(ZonesError::InconsistentTraceDimensions);
    }
    if chains.iter().flatten().any(|value| !value.is_finite()) {
        return Err(ZonesError::NumericAnomaly {
            context: "split-R-hat input",
        });
    }

    let chain_means = chains
        .iter()
        .map(|chain| chain.iter().sum::<f64>() / usize_to_f64(n))
        .collect::<Vec<_>>();
    let chain_vars = chains
        .iter()
        .zip(chain_means.iter())
        .map(|(chain, mean)| sample_variance(chain, *mean))
        .collect::<Vec<_>>();

    let m = chains.len();
    let mean_of_means = chain_means.iter().sum::<f64>() / usize_to_f64(m);
    let between = usize_to_f64(n)
        * chain_means
            .iter()
            .map(|mean| {
                let centered = *mean - mean_of_means;
                centered * centered
            })
            .sum::<f64>()
        / usize_to_f64(m - 1);
    let within = chain_vars.iter().sum::<f64>() / usize_to_f64(m);

    if !(within.is_finite() && within > 0.0 && between.is_finite()) {
        return Ok(1.0);
    }

    let n_f64 = usize_to_f64(n);
    let var_plus = ((n_f64 - 1.0) / n_f64).mul_add(within, between / n_f64);
    if !var_plus.is_finite() || var_plus <= 0.0 {
        return Ok(1.0);
    }

    Ok((var_plus / within).sqrt().max(1.0))
}

fn sample_variance(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values
        .iter()
        .map(|value| {
            let centered = *value - mean;
            centered * centered
        })
        .sum::<f64>()
        / usize_to_f64(values.len() - 1)
}

/// Per-operator acceptance table for one chain.
#[must_use]
pub fn render_operator_table(diagnostics: &ChainDiagnostics) -> Table {
    let mut table = make_table(&[
        "operator",
        "family",
        "weight",
        "warmup acc",
        "proposed",
        "accepted",
        "rejected",
        "acc rate",
    ]);
    for summary in &diagnostics.operators {
        table.add_row(vec![
            Cell::new(&summary.name),
            Cell::new(summary.family.label()),
            Cell::new(format!("{:.3}", summary.weight)),
            Cell::new(format!("{:.3}", summary.warmup.acceptance_rate())),
            Cell::new(summary.sampling.proposed),
            Cell::new(summary.sampling.accepted),
            Cell::new(summary.sampling.rejected()),
            Cell::new(format!("{:.3}", summary.sampling.acceptance_rate())),
        ]);
    }
    table
}

/// Convergence table with unconverged scalars highlighted.
#[must_use]
pub fn render_convergence_table(summary: &ZoneConvergenceSummary) -> Table {
    let mut table = make_table(&["scalar", "split-R-hat"]);
    if let Some(rhat) = summary.log_likelihood_split_rhat {
        table.add_row(vec![Cell::new("log-likelihood"), rhat_cell(rhat)]);
    }
    for (cluster, rhat) in summary.cluster_size_split_rhat.iter().enumerate() {
        table.add_row(vec![Cell::new(format!("size of cluster {cluster}")), rhat_cell(*rhat)]);
    }
    table
}

fn rhat_cell(value: f64) -> Cell {
    if value > SPLIT_RHAT_WARNING {
        Cell::new(format!("{value:.3}"))
            .fg(Color::Red)
            .add_attribute(Attribute::Bold)
    } else {
        Cell::new(format!("{value:.3}"))
    }
}

fn make_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h)).collect::<Vec<_>>());
    table
}
