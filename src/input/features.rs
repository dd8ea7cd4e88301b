//! Categorical feature observations with an applicable-state mask.

use faer::Mat;

use super::InputError;

/// Fixed-width observation tensor of shape `(n_sites, n_features, n_states)`.
///
/// Each `(site, feature)` cell holds at most one observed state, `None` marks a
/// missing value. Features with fewer categories than `n_states` mask the
/// surplus columns through the applicable-state mask, so every per-feature
/// distribution in the model has the same width.
#[derive(Debug, Clone)]
pub struct FeatureTensor {
    n_sites: usize,
    n_features: usize,
    n_states: usize,
    observed: Vec<Option<usize>>,
    applicable: Vec<bool>,
}

impl FeatureTensor {
    /// Build a tensor from per-site observed state indices.
    ///
    /// `applicable[f][s]` marks whether state `s` exists for feature `f`.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if shapes are inconsistent, a feature has no
    /// applicable state, or an observation names a masked or out-of-range state.
    pub fn new(
        n_states: usize,
        applicable: Vec<Vec<bool>>,
        observations: Vec<Vec<Option<usize>>>,
    ) -> Result<Self, InputError> {
        if n_states == 0 {
            return Err(InputError::EmptyStates);
        }
        let n_features = applicable.len();
        if n_features == 0 {
            return Err(InputError::EmptyFeatures);
        }
        let n_sites = observations.len();
        if n_sites == 0 {
            return Err(InputError::EmptySites);
        }

        let mut mask = Vec::with_capacity(n_features * n_states);
        for (feature, row) in applicable.iter().enumerate() {
            if row.len() != n_states {
                return Err(InputError::StateMaskWidth {
                    feature,
                    found: row.len(),
                    expected: n_states,
                });
            }
            if !row.iter().any(|state| *state) {
                return Err(InputError::NoApplicableStates { feature });
            }
            mask.extend_from_slice(row);
        }

        let mut observed = Vec::with_capacity(n_sites * n_features);
        for (site, row) in observations.into_iter().enumerate() {
            if row.len() != n_features {
                return Err(InputError::FeatureCountMismatch {
                    site,
                    found: row.len(),
                    expected: n_features,
                });
            }
            for (feature, value) in row.into_iter().enumerate() {
                if let Some(state) = value
                    && (state >= n_states || !mask[feature * n_states + state])
                {
                    return Err(InputError::InapplicableObservation {
                        site,
                        feature,
                        state,
                    });
                }
                observed.push(value);
            }
        }

        Ok(Self {
            n_sites,
            n_features,
            n_states,
            observed,
            applicable: mask,
        })
    }

    /// Build a tensor from a row-major one-hot boolean tensor.
    ///
    /// A `(site, feature)` cell with no state set is treated as missing.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if the tensor length is wrong, a cell has more than
    /// one state set, or any check of [`FeatureTensor::new`] fails.
    pub fn from_one_hot(
        n_sites: usize,
        n_features: usize,
        n_states: usize,
        values: &[bool],
        applicable: Vec<Vec<bool>>,
    ) -> Result<Self, InputError> {
        let expected = n_sites * n_features * n_states;
        if values.len() != expected {
            return Err(InputError::TensorLength {
                found: values.len(),
                expected,
            });
        }

        let mut observations = Vec::with_capacity(n_sites);
        for site in 0..n_sites {
            let mut row = Vec::with_capacity(n_features);
            for feature in 0..n_features {
                let offset = (site * n_features + feature) * n_states;
                let cell = &values[offset..offset + n_states];
                let mut set = cell
                    .iter()
                    .enumerate()
                    .filter(|(_, value)| **value)
                    .map(|(state, _)| state);
                let first = set.next();
                if set.next().is_some() {
                    return Err(InputError::MultipleObservedStates { site, feature });
                }
                row.push(first);
            }
            observations.push(row);
        }

        Self::new(n_states, applicable, observations)
    }

    #[must_use]
    pub const fn n_sites(&self) -> usize {
        self.n_sites
    }

    #[must_use]
    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Width of the state axis (maximum number of states over all features).
    #[must_use]
    pub const fn n_states(&self) -> usize {
        self.n_states
    }

    /// Observed state of `(site, feature)`, `None` if missing.
    #[must_use]
    pub fn observed(&self, site: usize, feature: usize) -> Option<usize> {
        self.observed[site * self.n_features + feature]
    }

    #[must_use]
    pub fn is_applicable(&self, feature: usize, state: usize) -> bool {
        self.applicable[feature * self.n_states + state]
    }

    /// Applicable-state mask row for one feature.
    #[must_use]
    pub fn applicable_states(&self, feature: usize) -> &[bool] {
        let offset = feature * self.n_states;
        &self.applicable[offset..offset + self.n_states]
    }

    /// Per-feature state counts over the sites selected by `members`.
    ///
    /// Returns a `(n_features, n_states)` matrix; missing observations are skipped.
    #[must_use]
    pub fn state_counts(&self, members: &[bool]) -> Mat<f64> {
        let mut counts = Mat::<f64>::zeros(self.n_features, self.n_states);
        for (site, _) in members.iter().enumerate().filter(|(_, member)| **member) {
            for feature in 0..self.n_features {
                if let Some(state) = self.observed(site, feature) {
                    counts[(feature, state)] += 1.0;
                }
            }
        }
        counts
    }
}
