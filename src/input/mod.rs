//! # Model inputs
//!
//! Defines the validated container handed to the sampler: the categorical
//! feature tensor, the site adjacency graph, and the confounder groupings.
//!
//! # Examples
//!
//! ```
//! use contact_zones::{Adjacency, Confounder, FeatureTensor, ZoneModelInput};
//!
//! let features = FeatureTensor::new(
//!     2,
//!     vec![vec![true, true]],
//!     vec![vec![Some(0)], vec![Some(1)], vec![None]],
//! )
//! .expect("valid features");
//! let adjacency = Adjacency::from_edges(3, &[(0, 1), (1, 2)]).expect("valid graph");
//! let universal = Confounder::from_assignments("universal", 1, vec![Some(0); 3])
//!     .expect("valid confounder");
//! let input = ZoneModelInput::new(features, adjacency, vec![universal]);
//!
//! assert!(input.validate().is_ok());
//! assert_eq!(input.n_sources(), 2);
//! ```
//!
//! ```
//! use contact_zones::{Adjacency, FeatureTensor, ZoneModelInput};
//!
//! let features = FeatureTensor::new(2, vec![vec![true, true]], vec![vec![Some(0)]])
//!     .expect("valid features");
//! let adjacency = Adjacency::from_edges(1, &[]).expect("valid graph");
//! let input = ZoneModelInput::new(features, adjacency, Vec::new());
//!
//! // The only site is not covered by any confounder group.
//! assert!(input.validate().is_err());
//! ```

use thiserror::Error;

pub mod features;
pub mod network;

pub use features::FeatureTensor;
pub use network::Adjacency;

/// Errors returned when validating model inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("feature tensor must have at least one site")]
    EmptySites,
    #[error("feature tensor must have at least one feature")]
    EmptyFeatures,
    #[error("feature tensor must have at least one state")]
    EmptyStates,
    #[error("state mask for feature {feature} has {found} columns; expected {expected}")]
    StateMaskWidth {
        feature: usize,
        found: usize,
        expected: usize,
    },
    #[error("feature {feature} has no applicable states")]
    NoApplicableStates { feature: usize },
    #[error("site {site} has {found} features; expected {expected}")]
    FeatureCountMismatch {
        site: usize,
        found: usize,
        expected: usize,
    },
    #[error("site {site} observes state {state} which is not applicable to feature {feature}")]
    InapplicableObservation {
        site: usize,
        feature: usize,
        state: usize,
    },
    #[error("site {site} has more than one observed state for feature {feature}")]
    MultipleObservedStates { site: usize, feature: usize },
    #[error("one-hot tensor has {found} entries; expected {expected}")]
    TensorLength { found: usize, expected: usize },
    #[error("edge references site {site} but the graph has {n_sites} sites")]
    EdgeOutOfRange { site: usize, n_sites: usize },
    #[error("adjacency row {row} has {found} columns; expected {expected}")]
    AdjacencyNotSquare {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("adjacency matrix is not symmetric at ({a}, {b})")]
    AdjacencyNotSymmetric { a: usize, b: usize },
    #[error("adjacency graph has {graph} sites but features have {features}")]
    SiteCountMismatch { graph: usize, features: usize },
    #[error("confounder `{name}` covers {found} sites; expected {expected}")]
    ConfounderLength {
        name: String,
        found: usize,
        expected: usize,
    },
    #[error("confounder `{name}` assigns site {site} to group {group} of {n_groups}")]
    GroupOutOfRange {
        name: String,
        site: usize,
        group: usize,
        n_groups: usize,
    },
    #[error("confounder `{name}` places site {site} in more than one group")]
    OverlappingGroups { name: String, site: usize },
    #[error("site {site} belongs to no confounder group")]
    UncoveredSite { site: usize },
}

/// A non-spatial grouping of sites (for example a known lineage).
///
/// Every site belongs to at most one group; sites without a group do not
/// have this confounder as an applicable mixture component.
#[derive(Debug, Clone)]
pub struct Confounder {
    pub name: String,
    n_groups: usize,
    group_of_site: Vec<Option<usize>>,
}

impl Confounder {
    /// Build a confounder from per-site group assignments.
    ///
    /// # Errors
    ///
    /// Returns `InputError::GroupOutOfRange` if an assignment exceeds `n_groups`.
    pub fn from_assignments(
        name: impl Into<String>,
        n_groups: usize,
        group_of_site: Vec<Option<usize>>,
    ) -> Result<Self, InputError> {
        let name = name.into();
        for (site, group) in group_of_site.iter().enumerate() {
            if let Some(group) = *group
                && group >= n_groups
            {
                return Err(InputError::GroupOutOfRange {
                    name,
                    site,
                    group,
                    n_groups,
                });
            }
        }
        Ok(Self {
            name,
            n_groups,
            group_of_site,
        })
    }

    /// Build a confounder from a `(n_groups, n_sites)` membership matrix.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if rows differ in length or a site is in two groups.
    pub fn from_membership(
        name: impl Into<String>,
        groups: &[Vec<bool>],
    ) -> Result<Self, InputError> {
        let name = name.into();
        let n_sites = groups.first().map_or(0, Vec::len);
        let mut group_of_site = vec![None; n_sites];
        for (group, members) in groups.iter().enumerate() {
            if members.len() != n_sites {
                return Err(InputError::ConfounderLength {
                    name,
                    found: members.len(),
                    expected: n_sites,
                });
            }
            for (site, _) in members.iter().enumerate().filter(|(_, member)| **member) {
                if group_of_site[site].is_some() {
                    return Err(InputError::OverlappingGroups { name, site });
                }
                group_of_site[site] = Some(group);
            }
        }
        Ok(Self {
            name,
            n_groups: groups.len(),
            group_of_site,
        })
    }

    #[must_use]
    pub const fn n_groups(&self) -> usize {
        self.n_groups
    }

    #[must_use]
    pub const fn n_sites(&self) -> usize {
        self.group_of_site.len()
    }

    /// Group index of `site`, `None` if the site is in no group.
    #[must_use]
    pub fn group_of(&self, site: usize) -> Option<usize> {
        self.group_of_site[site]
    }

    /// Membership mask of one group.
    #[must_use]
    pub fn members(&self, group: usize) -> Vec<bool> {
        self.group_of_site
            .iter()
            .map(|assigned| *assigned == Some(group))
            .collect()
    }
}

/// Read-only inputs shared by every chain.
#[derive(Debug, Clone)]
pub struct ZoneModelInput {
    pub features: FeatureTensor,
    pub adjacency: Adjacency,
    pub confounders: Vec<Confounder>,
}

impl ZoneModelInput {
    #[must_use]
    pub const fn new(
        features: FeatureTensor,
        adjacency: Adjacency,
        confounders: Vec<Confounder>,
    ) -> Self {
        Self {
            features,
            adjacency,
            confounders,
        }
    }

    #[must_use]
    pub const fn n_sites(&self) -> usize {
        self.features.n_sites()
    }

    #[must_use]
    pub const fn n_features(&self) -> usize {
        self.features.n_features()
    }

    #[must_use]
    pub const fn n_states(&self) -> usize {
        self.features.n_states()
    }

    /// Number of mixture components: the cluster effect plus one per confounder.
    #[must_use]
    pub const fn n_sources(&self) -> usize {
        1 + self.confounders.len()
    }

    /// Validate cross-component shapes and coverage.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if the graph, features and confounders disagree on
    /// the number of sites, or a site is covered by no confounder group.
    pub fn validate(&self) -> Result<(), InputError> {
        let n_sites = self.n_sites();
        if self.adjacency.n_sites() != n_sites {
            return Err(InputError::SiteCountMismatch {
                graph: self.adjacency.n_sites(),
                features: n_sites,
            });
        }
        for confounder in &self.confounders {
            if confounder.n_sites() != n_sites {
                return Err(InputError::ConfounderLength {
                    name: confounder.name.clone(),
                    found: confounder.n_sites(),
                    expected: n_sites,
                });
            }
        }
        if let Some(site) = (0..n_sites).find(|site| {
            self.confounders
                .iter()
                .all(|confounder| confounder.group_of(*site).is_none())
        }) {
            return Err(InputError::UncoveredSite { site });
        }
        Ok(())
    }
}
