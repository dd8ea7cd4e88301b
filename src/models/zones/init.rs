//! Initial chain state, grown from scratch or resumed from an earlier sample.

use faer::Mat;
use rand::rngs::StdRng;

use super::growth::grow_disjoint_clusters;
use super::operators::{Operator, OperatorContext, Proposal};
use super::sample::Sample;
use super::types::{ZoneSamplerConfig, ZonesError};
use crate::input::ZoneModelInput;
use crate::utils::usize_to_f64;

/// Per-feature state frequencies over `members`, with one pseudo-count added
/// to every applicable state so no row is degenerate.
#[must_use]
pub fn smoothed_state_frequencies(input: &ZoneModelInput, members: &[bool]) -> Mat<f64> {
    let features = &input.features;
    let mut counts = features.state_counts(members);
    for feature in 0..features.n_features() {
        let mut total = 0.0;
        for state in 0..features.n_states() {
            if features.is_applicable(feature, state) {
                counts[(feature, state)] += 1.0;
                total += counts[(feature, state)];
            }
        }
        for state in 0..features.n_states() {
            counts[(feature, state)] /= total;
        }
    }
    counts
}

fn check_resume(
    input: &ZoneModelInput,
    config: &ZoneSamplerConfig,
    resume: &Sample,
) -> Result<(), ZonesError> {
    let (n_sites, n_features, n_states) = (input.n_sites(), input.n_features(), input.n_states());
    let effect_fits = |effect: &Mat<f64>| effect.nrows() == n_features && effect.ncols() == n_states;

    if resume.n_sites() != n_sites {
        return Err(ZonesError::ResumeMismatch("site count"));
    }
    if resume.n_features() != n_features {
        return Err(ZonesError::ResumeMismatch("feature count"));
    }
    if resume.n_sources() != input.n_sources() {
        return Err(ZonesError::ResumeMismatch("component count"));
    }
    if resume.n_clusters() > config.model.n_clusters {
        return Err(ZonesError::ResumeMismatch("more clusters than the model allows"));
    }
    if resume.clusters().iter().any(|members| members.len() != n_sites) {
        return Err(ZonesError::ResumeMismatch("cluster row length"));
    }
    if !resume.clusters_are_disjoint() {
        return Err(ZonesError::ResumeMismatch("overlapping clusters"));
    }
    if (0..resume.n_clusters()).any(|cluster| resume.cluster_size(cluster) > config.model.max_size) {
        return Err(ZonesError::ResumeMismatch("cluster above max_size"));
    }
    if resume.cluster_effects().len() != resume.n_clusters()
        || !resume.cluster_effects().iter().all(effect_fits)
    {
        return Err(ZonesError::ResumeMismatch("cluster effect shape"));
    }
    if resume.n_confounders() != input.confounders.len()
        || input
            .confounders
            .iter()
            .enumerate()
            .any(|(index, confounder)| resume.n_groups(index) != confounder.n_groups())
    {
        return Err(ZonesError::ResumeMismatch("confounder groups"));
    }
    for (index, confounder) in input.confounders.iter().enumerate() {
        if !(0..confounder.n_groups()).all(|group| effect_fits(resume.confounding_effect(index, group))) {
            return Err(ZonesError::ResumeMismatch("confounding effect shape"));
        }
    }
    Ok(())
}

/// Resumed clusters first, then freshly grown ones up to `n_clusters`.
///
/// # Errors
///
/// Returns `ZonesError::ClusterInitialization` if growth exhausts its attempts.
pub fn initial_clusters(
    input: &ZoneModelInput,
    config: &ZoneSamplerConfig,
    resume: Option<&Sample>,
    rng: &mut StdRng,
) -> Result<Vec<Vec<bool>>, ZonesError> {
    let mut clusters = resume.map_or_else(Vec::new, |sample| sample.clusters().to_vec());
    let mut occupied = vec![false; input.n_sites()];
    for members in &clusters {
        for (flag, member) in occupied.iter_mut().zip(members) {
            *flag |= *member;
        }
    }
    let missing = config.model.n_clusters.saturating_sub(clusters.len());
    if missing > 0 {
        clusters.extend(grow_disjoint_clusters(
            &input.adjacency,
            missing,
            config.init.initial_size,
            &occupied,
            config.init.max_attempts,
            clusters.len(),
            rng,
        )?);
    }
    Ok(clusters)
}

/// Uniform weights, or the resumed ones normalised per feature.
///
/// # Errors
///
/// Returns `ZonesError::ResumeMismatch` if a resumed row cannot be normalised.
pub fn initial_weights(
    input: &ZoneModelInput,
    resume: Option<&Sample>,
) -> Result<Mat<f64>, ZonesError> {
    let Some(sample) = resume else {
        let share = 1.0 / usize_to_f64(input.n_sources());
        return Ok(Mat::from_fn(input.n_features(), input.n_sources(), |_, _| share));
    };
    let mut weights = sample.weights().clone();
    for feature in 0..weights.nrows() {
        let total = (0..weights.ncols()).map(|source| weights[(feature, source)]).sum::<f64>();
        if !(total.is_finite() && total > 0.0) {
            return Err(ZonesError::ResumeMismatch("weights"));
        }
        // rows already on the simplex are kept bit for bit
        if (total - 1.0).abs() > 1.0e-12 {
            for source in 0..weights.ncols() {
                weights[(feature, source)] /= total;
            }
        }
    }
    Ok(weights)
}

/// Resumed cluster effects, then smoothed frequencies for the new clusters.
#[must_use]
pub fn initial_cluster_effect(
    input: &ZoneModelInput,
    clusters: &[Vec<bool>],
    resume: Option<&Sample>,
) -> Vec<Mat<f64>> {
    let resumed = resume.map_or(0, Sample::n_clusters);
    clusters
        .iter()
        .enumerate()
        .map(|(cluster, members)| match resume {
            Some(sample) if cluster < resumed => sample.cluster_effect(cluster).clone(),
            _ => smoothed_state_frequencies(input, members),
        })
        .collect()
}

/// Resumed confounding effects, or smoothed frequencies of every group.
#[must_use]
pub fn initial_confounding_effects(
    input: &ZoneModelInput,
    resume: Option<&Sample>,
) -> Vec<Vec<Mat<f64>>> {
    input
        .confounders
        .iter()
        .enumerate()
        .map(|(index, confounder)| {
            (0..confounder.n_groups())
                .map(|group| match resume {
                    Some(sample) => sample.confounding_effect(index, group).clone(),
                    None => smoothed_state_frequencies(input, &confounder.members(group)),
                })
                .collect()
        })
        .collect()
}

/// Build the first sample of a chain.
///
/// With sampled sources the attribution is drawn once from its conditional
/// before the sample is returned.
///
/// # Errors
///
/// Returns `ZonesError` if the resume sample does not fit the model, cluster
/// growth fails, or the initial source draw is degenerate.
pub fn initialize_sample(
    input: &ZoneModelInput,
    config: &ZoneSamplerConfig,
    resume: Option<&Sample>,
    rng: &mut StdRng,
) -> Result<Sample, ZonesError> {
    if let Some(sample) = resume {
        check_resume(input, config, sample)?;
    }
    let clusters = initial_clusters(input, config, resume, rng)?;
    let weights = initial_weights(input, resume)?;
    let cluster_effect = initial_cluster_effect(input, &clusters, resume);
    let confounding_effects = initial_confounding_effects(input, resume);
    let source = config
        .model
        .sample_source
        .then(|| vec![0; input.n_sites() * input.n_features()]);

    let mut sample = Sample::new(
        input.n_sites(),
        clusters,
        weights,
        cluster_effect,
        confounding_effects,
        source,
    );

    if config.model.sample_source {
        let context = OperatorContext {
            input,
            model: config.model,
            priors: config.priors,
            tuning: config.tuning,
            constraints: config.nominal_constraints(),
        };
        if let Proposal::Exact(drawn) = Operator::GibbsSource.propose(&context, &sample, rng)? {
            sample = drawn;
        }
    }
    sample.everything_changed();
    Ok(sample)
}
