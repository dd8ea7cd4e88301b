//! Sparse site adjacency graph.

use std::collections::VecDeque;

use super::InputError;

/// Undirected adjacency between sites, stored as sorted neighbour lists.
#[derive(Debug, Clone)]
pub struct Adjacency {
    neighbours: Vec<Vec<usize>>,
}

impl Adjacency {
    /// Build a graph from an undirected edge list.
    ///
    /// Duplicate edges are merged and self-loops ignored.
    ///
    /// # Errors
    ///
    /// Returns `InputError::EdgeOutOfRange` if an edge names a site `>= n_sites`.
    pub fn from_edges(n_sites: usize, edges: &[(usize, usize)]) -> Result<Self, InputError> {
        let mut neighbours = vec![Vec::new(); n_sites];
        for &(a, b) in edges {
            if a >= n_sites || b >= n_sites {
                return Err(InputError::EdgeOutOfRange {
                    site: a.max(b),
                    n_sites,
                });
            }
            if a == b {
                continue;
            }
            neighbours[a].push(b);
            neighbours[b].push(a);
        }
        for list in &mut neighbours {
            list.sort_unstable();
            list.dedup();
        }
        Ok(Self { neighbours })
    }

    /// Build a graph from a dense boolean adjacency matrix.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if the matrix is not square or not symmetric.
    pub fn from_matrix(matrix: &[Vec<bool>]) -> Result<Self, InputError> {
        let n_sites = matrix.len();
        let mut edges = Vec::new();
        for (row, values) in matrix.iter().enumerate() {
            if values.len() != n_sites {
                return Err(InputError::AdjacencyNotSquare {
                    row,
                    found: values.len(),
                    expected: n_sites,
                });
            }
            for (col, linked) in values.iter().enumerate() {
                if *linked != matrix[col][row] {
                    return Err(InputError::AdjacencyNotSymmetric { a: row, b: col });
                }
                if *linked && row < col {
                    edges.push((row, col));
                }
            }
        }
        Self::from_edges(n_sites, &edges)
    }

    #[must_use]
    pub const fn n_sites(&self) -> usize {
        self.neighbours.len()
    }

    #[must_use]
    pub fn neighbours(&self, site: usize) -> &[usize] {
        &self.neighbours[site]
    }

    #[must_use]
    pub fn are_adjacent(&self, a: usize, b: usize) -> bool {
        self.neighbours[a].binary_search(&b).is_ok()
    }

    /// Sites adjacent to `members` that are neither members nor `occupied`.
    ///
    /// The result is sorted and free of duplicates.
    #[must_use]
    pub fn free_neighbours(&self, members: &[bool], occupied: &[bool]) -> Vec<usize> {
        let mut candidate = vec![false; self.n_sites()];
        for (site, _) in members.iter().enumerate().filter(|(_, member)| **member) {
            for &next in &self.neighbours[site] {
                if !members[next] && !occupied[next] {
                    candidate[next] = true;
                }
            }
        }
        candidate
            .iter()
            .enumerate()
            .filter(|(_, flag)| **flag)
            .map(|(site, _)| site)
            .collect()
    }

    /// Whether the member sites form one connected component.
    ///
    /// The empty set counts as connected.
    #[must_use]
    pub fn is_connected(&self, members: &[bool]) -> bool {
        let Some(start) = members.iter().position(|member| *member) else {
            return true;
        };
        let total = members.iter().filter(|member| **member).count();

        let mut seen = vec![false; members.len()];
        let mut queue = VecDeque::from([start]);
        seen[start] = true;
        let mut reached = 1;
        while let Some(site) = queue.pop_front() {
            for &next in &self.neighbours[site] {
                if members[next] && !seen[next] {
                    seen[next] = true;
                    reached += 1;
                    queue.push_back(next);
                }
            }
        }
        reached == total
    }
}
