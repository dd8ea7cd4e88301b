//! Mutable chain state with per-block version stamps.

use std::sync::atomic::{AtomicU64, Ordering};

use faer::Mat;

static NEXT_STAMP: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique stamp. Two blocks holding equal stamps hold equal values.
fn next_stamp() -> u64 {
    NEXT_STAMP.fetch_add(1, Ordering::Relaxed)
}

/// Version stamps of each parameter block of a [`Sample`].
///
/// Every mutation draws a fresh stamp, so a cache that remembers the stamps it
/// was computed from can tell exactly which blocks changed since, even across
/// clones and rejected candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleVersions {
    pub clusters: u64,
    pub weights: u64,
    pub cluster_effect: u64,
    /// One stamp per confounder.
    pub confounding_effects: Vec<u64>,
    pub source: u64,
}

impl SampleVersions {
    fn fresh(n_confounders: usize) -> Self {
        Self {
            clusters: next_stamp(),
            weights: next_stamp(),
            cluster_effect: next_stamp(),
            confounding_effects: (0..n_confounders).map(|_| next_stamp()).collect(),
            source: next_stamp(),
        }
    }
}

/// One state of the chain.
///
/// - `clusters[i][site]`: membership of `site` in cluster `i`; clusters are disjoint.
/// - `weights`: `(n_features, n_sources)` mixture weights, rows on the simplex.
/// - `cluster_effect[i]`: `(n_features, n_states)` state probabilities of cluster `i`.
/// - `confounding_effects[c][g]`: state probabilities of group `g` of confounder `c`.
/// - `source`: mixture component attributed to each `(site, feature)`, when sampled.
#[derive(Debug, Clone)]
pub struct Sample {
    n_sites: usize,
    clusters: Vec<Vec<bool>>,
    weights: Mat<f64>,
    cluster_effect: Vec<Mat<f64>>,
    confounding_effects: Vec<Vec<Mat<f64>>>,
    source: Option<Vec<usize>>,
    versions: SampleVersions,
}

impl Sample {
    /// Assemble a sample; every block starts with a fresh version stamp.
    ///
    /// `source`, when present, is row-major over `(site, feature)`.
    #[must_use]
    pub fn new(
        n_sites: usize,
        clusters: Vec<Vec<bool>>,
        weights: Mat<f64>,
        cluster_effect: Vec<Mat<f64>>,
        confounding_effects: Vec<Vec<Mat<f64>>>,
        source: Option<Vec<usize>>,
    ) -> Self {
        let versions = SampleVersions::fresh(confounding_effects.len());
        Self {
            n_sites,
            clusters,
            weights,
            cluster_effect,
            confounding_effects,
            source,
            versions,
        }
    }

    #[must_use]
    pub const fn n_sites(&self) -> usize {
        self.n_sites
    }

    #[must_use]
    pub const fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.weights.nrows()
    }

    #[must_use]
    pub fn n_sources(&self) -> usize {
        self.weights.ncols()
    }

    #[must_use]
    pub fn clusters(&self) -> &[Vec<bool>] {
        &self.clusters
    }

    #[must_use]
    pub fn cluster(&self, cluster: usize) -> &[bool] {
        &self.clusters[cluster]
    }

    #[must_use]
    pub fn cluster_size(&self, cluster: usize) -> usize {
        self.clusters[cluster].iter().filter(|member| **member).count()
    }

    /// Sorted member sites of one cluster.
    #[must_use]
    pub fn cluster_members(&self, cluster: usize) -> Vec<usize> {
        self.clusters[cluster]
            .iter()
            .enumerate()
            .filter(|(_, member)| **member)
            .map(|(site, _)| site)
            .collect()
    }

    /// Sites covered by any cluster.
    #[must_use]
    pub fn occupied(&self) -> Vec<bool> {
        let mut occupied = vec![false; self.n_sites];
        for members in &self.clusters {
            for (flag, member) in occupied.iter_mut().zip(members) {
                *flag |= *member;
            }
        }
        occupied
    }

    /// Cluster containing `site`, if any.
    #[must_use]
    pub fn cluster_of(&self, site: usize) -> Option<usize> {
        self.clusters.iter().position(|members| members[site])
    }

    /// Whether no site belongs to two clusters.
    #[must_use]
    pub fn clusters_are_disjoint(&self) -> bool {
        (0..self.n_sites).all(|site| {
            self.clusters
                .iter()
                .filter(|members| members[site])
                .count()
                <= 1
        })
    }

    #[must_use]
    pub const fn weights(&self) -> &Mat<f64> {
        &self.weights
    }

    #[must_use]
    pub fn cluster_effects(&self) -> &[Mat<f64>] {
        &self.cluster_effect
    }

    #[must_use]
    pub fn cluster_effect(&self, cluster: usize) -> &Mat<f64> {
        &self.cluster_effect[cluster]
    }

    #[must_use]
    pub fn confounding_effect(&self, confounder: usize, group: usize) -> &Mat<f64> {
        &self.confounding_effects[confounder][group]
    }

    #[must_use]
    pub const fn n_confounders(&self) -> usize {
        self.confounding_effects.len()
    }

    /// Number of groups of one confounder.
    #[must_use]
    pub fn n_groups(&self, confounder: usize) -> usize {
        self.confounding_effects[confounder].len()
    }

    #[must_use]
    pub const fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Component attributed to `(site, feature)`; `None` when sources are marginalised.
    #[must_use]
    pub fn source(&self, site: usize, feature: usize) -> Option<usize> {
        let n_features = self.n_features();
        self.source
            .as_ref()
            .map(|source| source[site * n_features + feature])
    }

    /// Whether `(site, feature)` is attributed to `component`, as a one-hot lookup.
    #[must_use]
    pub fn is_source(&self, site: usize, feature: usize, component: usize) -> bool {
        self.source(site, feature) == Some(component)
    }

    #[must_use]
    pub const fn versions(&self) -> &SampleVersions {
        &self.versions
    }

    pub fn set_cluster(&mut self, cluster: usize, members: Vec<bool>) {
        self.clusters[cluster] = members;
        self.versions.clusters = next_stamp();
    }

    pub fn add_site(&mut self, cluster: usize, site: usize) {
        self.clusters[cluster][site] = true;
        self.versions.clusters = next_stamp();
    }

    pub fn remove_site(&mut self, cluster: usize, site: usize) {
        self.clusters[cluster][site] = false;
        self.versions.clusters = next_stamp();
    }

    pub fn set_weights_row(&mut self, feature: usize, values: &[f64]) {
        for (component, value) in values.iter().enumerate() {
            self.weights[(feature, component)] = *value;
        }
        self.versions.weights = next_stamp();
    }

    pub fn set_cluster_effect_row(&mut self, cluster: usize, feature: usize, values: &[f64]) {
        let effect = &mut self.cluster_effect[cluster];
        for (state, value) in values.iter().enumerate() {
            effect[(feature, state)] = *value;
        }
        self.versions.cluster_effect = next_stamp();
    }

    pub fn set_confounding_effect_row(
        &mut self,
        confounder: usize,
        group: usize,
        feature: usize,
        values: &[f64],
    ) {
        let effect = &mut self.confounding_effects[confounder][group];
        for (state, value) in values.iter().enumerate() {
            effect[(feature, state)] = *value;
        }
        self.versions.confounding_effects[confounder] = next_stamp();
    }

    /// Set one attribution. A no-op for samples that marginalise the source.
    pub fn set_source(&mut self, site: usize, feature: usize, component: usize) {
        let n_features = self.n_features();
        if let Some(source) = self.source.as_mut() {
            source[site * n_features + feature] = component;
            self.versions.source = next_stamp();
        }
    }

    /// Replace the whole attribution tensor.
    pub fn set_sources(&mut self, source: Vec<usize>) {
        self.source = Some(source);
        self.versions.source = next_stamp();
    }

    /// Mark every block as changed.
    pub fn everything_changed(&mut self) {
        self.versions = SampleVersions::fresh(self.confounding_effects.len());
    }
}
