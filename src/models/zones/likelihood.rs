//! Mixture likelihood of the observed features given a sample.
//!
//! Each `(site, feature)` observation is drawn from one of `n_sources`
//! components: the effect of the cluster containing the site (component 0) or
//! the effect of the site's group under each confounder (components `1..`).
//! Components that do not apply to a site contribute likelihood `0` and have
//! their weight removed before the weights are renormalised per site.

use faer::Mat;

use super::sample::Sample;
use super::types::ZonesError;
use crate::input::ZoneModelInput;
use crate::utils::normalize_in_place;

/// Stable `ln(logistic(x))`.
#[must_use]
pub fn log_logistic(x: f64) -> f64 {
    if x >= 0.0 {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

/// Which components apply to `site`: the clusters, then each confounder.
#[must_use]
pub fn site_has_components(input: &ZoneModelInput, sample: &Sample, site: usize) -> Vec<bool> {
    let mut has = Vec::with_capacity(input.n_sources());
    has.push(sample.cluster_of(site).is_some());
    has.extend(
        input
            .confounders
            .iter()
            .map(|confounder| confounder.group_of(site).is_some()),
    );
    has
}

/// Weights of one feature restricted to the applicable components and renormalised.
///
/// # Errors
///
/// Returns `ZonesError::NumericAnomaly` when no applicable component carries
/// positive weight.
pub fn effective_weights(
    weights: &Mat<f64>,
    feature: usize,
    has_components: &[bool],
) -> Result<Vec<f64>, ZonesError> {
    let mut values = has_components
        .iter()
        .enumerate()
        .map(|(component, has)| if *has { weights[(feature, component)] } else { 0.0 })
        .collect::<Vec<_>>();
    if normalize_in_place(&mut values) {
        Ok(values)
    } else {
        Err(ZonesError::NumericAnomaly {
            context: "weight normalisation",
        })
    }
}

/// Probability that `effect` emits the observation at `(site, feature)`; `1` when missing.
#[must_use]
pub fn effect_likelihood(
    input: &ZoneModelInput,
    effect: &Mat<f64>,
    site: usize,
    feature: usize,
) -> f64 {
    input
        .features
        .observed(site, feature)
        .map_or(1.0, |state| effect[(feature, state)])
}

/// Likelihood of `(site, feature)` under one component, `0` where it does not apply.
#[must_use]
pub fn component_likelihood(
    input: &ZoneModelInput,
    sample: &Sample,
    site: usize,
    feature: usize,
    component: usize,
) -> f64 {
    let effect = if component == 0 {
        sample
            .cluster_of(site)
            .map(|cluster| sample.cluster_effect(cluster))
    } else {
        input.confounders[component - 1]
            .group_of(site)
            .map(|group| sample.confounding_effect(component - 1, group))
    };
    effect.map_or(0.0, |effect| effect_likelihood(input, effect, site, feature))
}

/// Component likelihoods and effective weights of one site, evaluated directly.
#[derive(Debug, Clone)]
pub struct SiteLikelihood {
    pub site: usize,
    n_sources: usize,
    component: Vec<f64>,
    weights: Vec<f64>,
}

impl SiteLikelihood {
    /// # Errors
    ///
    /// Returns `ZonesError::NumericAnomaly` if the site's weights cannot be normalised.
    pub fn evaluate(
        input: &ZoneModelInput,
        sample: &Sample,
        site: usize,
    ) -> Result<Self, ZonesError> {
        let n_sources = input.n_sources();
        let has = site_has_components(input, sample, site);
        let mut component = Vec::with_capacity(input.n_features() * n_sources);
        let mut weights = Vec::with_capacity(input.n_features() * n_sources);
        for feature in 0..input.n_features() {
            weights.extend(effective_weights(sample.weights(), feature, &has)?);
            for source in 0..n_sources {
                component.push(if has[source] {
                    component_likelihood(input, sample, site, feature, source)
                } else {
                    0.0
                });
            }
        }
        Ok(Self {
            site,
            n_sources,
            component,
            weights,
        })
    }

    #[must_use]
    pub fn component(&self, feature: usize, source: usize) -> f64 {
        self.component[feature * self.n_sources + source]
    }

    #[must_use]
    pub fn weight(&self, feature: usize, source: usize) -> f64 {
        self.weights[feature * self.n_sources + source]
    }

    /// Posterior over the source of `feature` at this site.
    ///
    /// # Errors
    ///
    /// Returns `ZonesError::NumericAnomaly` if no component explains the observation.
    pub fn source_posterior(&self, feature: usize) -> Result<Vec<f64>, ZonesError> {
        let mut posterior = (0..self.n_sources)
            .map(|source| self.weight(feature, source) * self.component(feature, source))
            .collect::<Vec<_>>();
        if normalize_in_place(&mut posterior) {
            Ok(posterior)
        } else {
            Err(ZonesError::NumericAnomaly {
                context: "source posterior",
            })
        }
    }
}

/// Evaluate a subset of sites without touching any cache.
///
/// # Errors
///
/// Returns `ZonesError::NumericAnomaly` if any site's weights cannot be normalised.
pub fn evaluate_sites(
    input: &ZoneModelInput,
    sample: &Sample,
    sites: &[usize],
) -> Result<Vec<SiteLikelihood>, ZonesError> {
    sites
        .iter()
        .map(|site| SiteLikelihood::evaluate(input, sample, *site))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedStamps {
    clusters: u64,
    weights: u64,
    cluster_effect: u64,
    confounding_effects: Vec<u64>,
}

/// Component likelihoods and effective weights for every site, kept in sync
/// with a sample through its version stamps.
///
/// [`LikelihoodCache::update`] recomputes only the blocks whose stamps moved:
/// cluster changes refresh the cluster component and all effective weights,
/// effect changes refresh their own component, weight changes refresh the
/// effective weights.
#[derive(Debug, Clone)]
pub struct LikelihoodCache {
    n_sites: usize,
    n_features: usize,
    n_sources: usize,
    component: Vec<f64>,
    has_components: Vec<bool>,
    weights: Vec<f64>,
    stamps: Option<CachedStamps>,
}

impl LikelihoodCache {
    #[must_use]
    pub fn new(input: &ZoneModelInput) -> Self {
        let n_sites = input.n_sites();
        let n_features = input.n_features();
        let n_sources = input.n_sources();
        let mut has_components = vec![false; n_sites * n_sources];
        for site in 0..n_sites {
            for (confounder, groups) in input.confounders.iter().enumerate() {
                has_components[site * n_sources + confounder + 1] = groups.group_of(site).is_some();
            }
        }
        Self {
            n_sites,
            n_features,
            n_sources,
            component: vec![0.0; n_sites * n_features * n_sources],
            has_components,
            weights: vec![0.0; n_sites * n_features * n_sources],
            stamps: None,
        }
    }

    const fn index(&self, site: usize, feature: usize, source: usize) -> usize {
        (site * self.n_features + feature) * self.n_sources + source
    }

    /// Whether the cache currently reflects `sample`.
    #[must_use]
    pub fn is_synced(&self, sample: &Sample) -> bool {
        self.stamps.as_ref().is_some_and(|stamps| {
            let versions = sample.versions();
            stamps.clusters == versions.clusters
                && stamps.weights == versions.weights
                && stamps.cluster_effect == versions.cluster_effect
                && stamps.confounding_effects == versions.confounding_effects
        })
    }

    /// Bring the cache in line with `sample`, recomputing only stale blocks.
    ///
    /// # Errors
    ///
    /// Returns `ZonesError::NumericAnomaly` if a site's weights cannot be
    /// normalised. The cache is left unsynced in that case.
    pub fn update(&mut self, input: &ZoneModelInput, sample: &Sample) -> Result<(), ZonesError> {
        let versions = sample.versions();
        let previous = self.stamps.take();
        let stale = |old: Option<u64>, new: u64| old != Some(new);

        let clusters_changed = stale(previous.as_ref().map(|s| s.clusters), versions.clusters);
        let effect_changed = stale(
            previous.as_ref().map(|s| s.cluster_effect),
            versions.cluster_effect,
        );
        let weights_changed = stale(previous.as_ref().map(|s| s.weights), versions.weights);

        if clusters_changed {
            for site in 0..self.n_sites {
                self.has_components[site * self.n_sources] = sample.cluster_of(site).is_some();
            }
        }
        if clusters_changed || effect_changed {
            self.refresh_component(input, sample, 0);
        }
        for (confounder, stamp) in versions.confounding_effects.iter().enumerate() {
            let old = previous
                .as_ref()
                .and_then(|s| s.confounding_effects.get(confounder).copied());
            if stale(old, *stamp) {
                self.refresh_component(input, sample, confounder + 1);
            }
        }
        if clusters_changed || weights_changed {
            self.refresh_weights(sample)?;
        }

        self.stamps = Some(CachedStamps {
            clusters: versions.clusters,
            weights: versions.weights,
            cluster_effect: versions.cluster_effect,
            confounding_effects: versions.confounding_effects.clone(),
        });
        Ok(())
    }

    fn refresh_component(&mut self, input: &ZoneModelInput, sample: &Sample, source: usize) {
        for site in 0..self.n_sites {
            let has = self.has_components[site * self.n_sources + source];
            for feature in 0..self.n_features {
                let index = self.index(site, feature, source);
                self.component[index] = if has {
                    component_likelihood(input, sample, site, feature, source)
                } else {
                    0.0
                };
            }
        }
    }

    fn refresh_weights(&mut self, sample: &Sample) -> Result<(), ZonesError> {
        for site in 0..self.n_sites {
            let offset = site * self.n_sources;
            let has = &self.has_components[offset..offset + self.n_sources];
            for feature in 0..self.n_features {
                let normalized = effective_weights(sample.weights(), feature, has)?;
                let start = self.index(site, feature, 0);
                self.weights[start..start + self.n_sources].copy_from_slice(&normalized);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn component(&self, site: usize, feature: usize, source: usize) -> f64 {
        self.component[self.index(site, feature, source)]
    }

    #[must_use]
    pub fn effective_weight(&self, site: usize, feature: usize, source: usize) -> f64 {
        self.weights[self.index(site, feature, source)]
    }

    /// Log-likelihood of the data under `sample`, which must be synced.
    ///
    /// With sampled sources this is the joint likelihood of the observations
    /// and their attributions; otherwise sources are summed out per cell.
    /// Missing observations contribute only through the attribution term.
    ///
    /// # Errors
    ///
    /// Returns `ZonesError::NumericAnomaly` if the result is `NaN`.
    pub fn log_likelihood(
        &self,
        input: &ZoneModelInput,
        sample: &Sample,
    ) -> Result<f64, ZonesError> {
        let mut total = 0.0;
        for site in 0..self.n_sites {
            for feature in 0..self.n_features {
                let observed = input.features.observed(site, feature).is_some();
                if let Some(source) = sample.source(site, feature) {
                    total += self.effective_weight(site, feature, source).ln();
                    if observed {
                        total += self.component(site, feature, source).ln();
                    }
                } else if observed {
                    let mixture = (0..self.n_sources)
                        .map(|source| {
                            self.effective_weight(site, feature, source)
                                * self.component(site, feature, source)
                        })
                        .sum::<f64>();
                    total += mixture.ln();
                }
            }
        }
        if total.is_nan() {
            return Err(ZonesError::NumericAnomaly {
                context: "log-likelihood",
            });
        }
        Ok(total)
    }
}
