//! Random growth of contiguous clusters on the adjacency graph.

use rand::rngs::StdRng;
use thiserror::Error;

use super::types::ZonesError;
use crate::input::Adjacency;
use crate::utils::choose;

/// Why a single growth attempt failed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClusterGrowthError {
    #[error("no free site is left to seed a cluster")]
    NoFreeSite,
    #[error("seed site {site} is excluded")]
    SeedExcluded { site: usize },
    #[error("cluster stuck at size {size}: no free neighbour")]
    NoFreeNeighbour { size: usize },
}

/// Grow a connected cluster of `k` sites avoiding `excluded`, seeded at a
/// uniformly chosen free site.
///
/// # Errors
///
/// Returns `ClusterGrowthError` if no site is free or growth gets stuck.
pub fn grow_cluster(
    adjacency: &Adjacency,
    k: usize,
    excluded: &[bool],
    rng: &mut StdRng,
) -> Result<Vec<bool>, ClusterGrowthError> {
    let free = excluded
        .iter()
        .enumerate()
        .filter(|(_, taken)| !**taken)
        .map(|(site, _)| site)
        .collect::<Vec<_>>();
    let seed = choose(rng, &free).ok_or(ClusterGrowthError::NoFreeSite)?;
    grow_cluster_from(adjacency, seed, k, excluded, rng)
}

/// Grow a connected cluster of `k` sites from `seed`, adding one uniformly
/// chosen free neighbour at a time.
///
/// # Errors
///
/// Returns `ClusterGrowthError` if the seed is excluded or growth gets stuck.
pub fn grow_cluster_from(
    adjacency: &Adjacency,
    seed: usize,
    k: usize,
    excluded: &[bool],
    rng: &mut StdRng,
) -> Result<Vec<bool>, ClusterGrowthError> {
    let mut members = vec![false; adjacency.n_sites()];
    if k == 0 {
        return Ok(members);
    }
    if excluded[seed] {
        return Err(ClusterGrowthError::SeedExcluded { site: seed });
    }
    members[seed] = true;
    for size in 1..k {
        let neighbours = adjacency.free_neighbours(&members, excluded);
        let next = choose(rng, &neighbours).ok_or(ClusterGrowthError::NoFreeNeighbour { size })?;
        members[next] = true;
    }
    Ok(members)
}

/// Grow `count` disjoint clusters of size `k` around the already `occupied` sites.
///
/// A stuck cluster is regrown from a fresh seed; earlier clusters are kept.
/// `max_attempts` bounds the total number of failed attempts.
///
/// # Errors
///
/// Returns `ZonesError::ClusterInitialization` once the attempt budget is spent.
pub fn grow_disjoint_clusters(
    adjacency: &Adjacency,
    count: usize,
    k: usize,
    occupied: &[bool],
    max_attempts: usize,
    first_index: usize,
    rng: &mut StdRng,
) -> Result<Vec<Vec<bool>>, ZonesError> {
    let mut occupied = occupied.to_vec();
    let mut clusters = Vec::with_capacity(count);
    let mut failures = 0;
    while clusters.len() < count {
        match grow_cluster(adjacency, k, &occupied, rng) {
            Ok(members) => {
                for (flag, member) in occupied.iter_mut().zip(&members) {
                    *flag |= *member;
                }
                clusters.push(members);
            }
            Err(error) => {
                failures += 1;
                log::debug!(
                    "cluster {} growth attempt {failures} failed: {error}",
                    first_index + clusters.len()
                );
                if failures >= max_attempts {
                    return Err(ZonesError::ClusterInitialization {
                        cluster: first_index + clusters.len(),
                        attempts: failures,
                    });
                }
            }
        }
    }
    Ok(clusters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn path(n: usize) -> Adjacency {
        let edges = (1..n).map(|site| (site - 1, site)).collect::<Vec<_>>();
        Adjacency::from_edges(n, &edges).expect("valid path graph")
    }

    fn grid(side: usize) -> Adjacency {
        let mut edges = Vec::new();
        for row in 0..side {
            for col in 0..side {
                let site = row * side + col;
                if col + 1 < side {
                    edges.push((site, site + 1));
                }
                if row + 1 < side {
                    edges.push((site, site + side));
                }
            }
        }
        Adjacency::from_edges(side * side, &edges).expect("valid grid")
    }

    #[test]
    fn grown_cluster_is_connected_and_sized() {
        let graph = grid(6);
        let excluded = vec![false; 36];
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let members = grow_cluster(&graph, 7, &excluded, &mut rng).expect("growth");
            assert_eq!(members.iter().filter(|member| **member).count(), 7);
            assert!(graph.is_connected(&members));
        }
    }

    #[test]
    fn seeded_growth_on_a_path_is_contiguous() {
        let graph = path(5);
        let excluded = vec![false; 5];
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let members = grow_cluster_from(&graph, 2, 3, &excluded, &mut rng).expect("growth");
            assert!(members[2]);
            let sites = members
                .iter()
                .enumerate()
                .filter(|(_, member)| **member)
                .map(|(site, _)| site)
                .collect::<Vec<_>>();
            assert_eq!(sites.len(), 3);
            assert_eq!(sites[2] - sites[0], 2);
        }
    }

    #[test]
    fn growth_reports_being_stuck() {
        let graph = path(5);
        let excluded = [false, true, false, true, false];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            grow_cluster_from(&graph, 2, 2, &excluded, &mut rng),
            Err(ClusterGrowthError::NoFreeNeighbour { size: 1 })
        );
        assert_eq!(
            grow_cluster_from(&graph, 1, 2, &excluded, &mut rng),
            Err(ClusterGrowthError::SeedExcluded { site: 1 })
        );
    }

    #[test]
    fn disjoint_clusters_do_not_overlap() {
        let graph = grid(8);
        let mut rng = StdRng::seed_from_u64(9);
        let clusters =
            grow_disjoint_clusters(&graph, 4, 5, &[false; 64], 1_000, 0, &mut rng).expect("growth");
        let mut covered = vec![0_usize; 64];
        for members in &clusters {
            assert!(graph.is_connected(members));
            for (count, member) in covered.iter_mut().zip(members) {
                *count += usize::from(*member);
            }
        }
        assert!(covered.iter().all(|count| *count <= 1));
        assert_eq!(covered.iter().sum::<usize>(), 20);
    }

    #[test]
    fn impossible_growth_exhausts_the_budget() {
        let graph = path(4);
        let mut rng = StdRng::seed_from_u64(3);
        let err = grow_disjoint_clusters(&graph, 2, 3, &[false; 4], 25, 1, &mut rng)
            .expect_err("two clusters of three cannot fit in four sites");
        assert!(matches!(
            err,
            ZonesError::ClusterInitialization { attempts: 25, .. }
        ));
    }
}
