//! Vertex-level simulations: region mapping and short-range coupling.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::equations::Gaussian;
use crate::error::{Component, Result, SimError};
use crate::state::State;

/// Sparse vertex-to-vertex coupling in CSR form.
///
/// Row `i` owns entries `offsets[i]..offsets[i + 1]` of `columns` / `values`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocalConnectivity {
    nvertex: usize,
    offsets: Vec<usize>,
    columns: Vec<usize>,
    values: Vec<f64>,
    /// Global gain applied to the operator.
    pub strength: f64,
}

impl LocalConnectivity {
    /// Build from `(row, column, value)` triplets; duplicates are summed.
    pub fn from_triplets(nvertex: usize, triplets: &[(usize, usize, f64)]) -> Result<Self> {
        if let Some(&(r, c, _)) = triplets.iter().find(|(r, c, _)| *r >= nvertex || *c >= nvertex) {
            return Err(SimError::config(
                Component::Surface,
                format!("local connectivity entry ({r}, {c}) outside {nvertex} vertices"),
            ));
        }
        let mut sorted = triplets.to_vec();
        sorted.sort_by_key(|&(r, c, _)| (r, c));

        let mut offsets = vec![0usize; nvertex + 1];
        let mut columns: Vec<usize> = Vec::with_capacity(sorted.len());
        let mut values: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;
        for (r, c, v) in sorted {
            if last == Some((r, c)) {
                if let Some(acc) = values.last_mut() {
                    *acc += v;
                }
                continue;
            }
            columns.push(c);
            values.push(v);
            offsets[r + 1] += 1;
            last = Some((r, c));
        }
        for i in 0..nvertex {
            offsets[i + 1] += offsets[i];
        }
        Ok(Self {
            nvertex,
            offsets,
            columns,
            values,
            strength: 1.0,
        })
    }

    /// Kernel of pairwise distances (row-major `nvertex x nvertex`), keeping
    /// off-diagonal pairs within `cutoff`.
    pub fn from_distances(
        nvertex: usize,
        distances: &[f64],
        kernel: &Gaussian,
        cutoff: f64,
    ) -> Result<Self> {
        if distances.len() != nvertex * nvertex {
            return Err(SimError::config(
                Component::Surface,
                format!(
                    "distance matrix has {} entries, expected {nvertex}x{nvertex}",
                    distances.len()
                ),
            ));
        }
        let triplets: Vec<(usize, usize, f64)> = (0..nvertex)
            .flat_map(|i| (0..nvertex).map(move |j| (i, j)))
            .filter(|&(i, j)| i != j && distances[i * nvertex + j] <= cutoff)
            .map(|(i, j)| (i, j, kernel.evaluate(distances[i * nvertex + j])))
            .collect();
        Self::from_triplets(nvertex, &triplets)
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    #[inline]
    pub fn nvertex(&self) -> usize {
        self.nvertex
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let range = self.offsets[i]..self.offsets[i + 1];
        (&self.columns[range.clone()], &self.values[range])
    }

    /// `out[v] = strength * L @ x[v]` for every state variable and mode.
    pub fn apply(&self, x: &State, out: &mut State) {
        let m = x.nmode();
        for v in 0..x.nvar() {
            for i in 0..self.nvertex {
                let (cols, vals) = self.row(i);
                for mode in 0..m {
                    let acc: f64 = cols
                        .iter()
                        .zip(vals)
                        .map(|(&j, &w)| w * x.get(v, j, mode))
                        .sum();
                    out.set(v, i, mode, self.strength * acc);
                }
            }
        }
    }
}

/// Cortical surface attached to a region-level connectome.
///
/// Simulation nodes are vertices. `region_mapping[vertex]` names the region a
/// vertex belongs to; long-range coupling is computed between region means and
/// broadcast back to every vertex of the target region.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Surface {
    pub region_mapping: Vec<usize>,
    pub local_connectivity: Option<LocalConnectivity>,
    #[cfg_attr(feature = "serde", serde(skip))]
    vertices_per_region: Vec<usize>,
}

impl Surface {
    pub fn new(region_mapping: Vec<usize>) -> Self {
        Self {
            region_mapping,
            local_connectivity: None,
            vertices_per_region: Vec::new(),
        }
    }

    pub fn with_local_connectivity(mut self, local: LocalConnectivity) -> Self {
        self.local_connectivity = Some(local);
        self
    }

    #[inline]
    pub fn number_of_vertices(&self) -> usize {
        self.region_mapping.len()
    }

    /// Check the mapping against the region count and cache vertex counts.
    pub fn configure(&mut self, nregion: usize) -> Result<()> {
        if let Some((v, r)) = self
            .region_mapping
            .iter()
            .enumerate()
            .find(|(_, &r)| r >= nregion)
        {
            return Err(SimError::config(
                Component::Surface,
                format!("vertex {v} maps to region {r}, connectome has {nregion} regions"),
            ));
        }
        let mut counts = vec![0usize; nregion];
        for &r in &self.region_mapping {
            counts[r] += 1;
        }
        if let Some(empty) = counts.iter().position(|&c| c == 0) {
            return Err(SimError::config(
                Component::Surface,
                format!("region {empty} has no vertices in the region mapping"),
            ));
        }
        if let Some(local) = &self.local_connectivity {
            if local.nvertex() != self.number_of_vertices() {
                return Err(SimError::config(
                    Component::Surface,
                    format!(
                        "local connectivity covers {} vertices, surface has {}",
                        local.nvertex(),
                        self.number_of_vertices()
                    ),
                ));
            }
        }
        self.vertices_per_region = counts;
        Ok(())
    }

    /// Region means of a vertex-level state.
    pub fn region_average(&self, vertices: &State, out: &mut State) {
        out.fill(0.0);
        let m = vertices.nmode();
        for v in 0..vertices.nvar() {
            for (vertex, &region) in self.region_mapping.iter().enumerate() {
                for mode in 0..m {
                    let acc = out.get(v, region, mode) + vertices.get(v, vertex, mode);
                    out.set(v, region, mode, acc);
                }
            }
            for (region, &count) in self.vertices_per_region.iter().enumerate() {
                for mode in 0..m {
                    let mean = out.get(v, region, mode) / count as f64;
                    out.set(v, region, mode, mean);
                }
            }
        }
    }

    /// Copy region values to every vertex of the region.
    pub fn broadcast(&self, regions: &State, out: &mut State) {
        let m = regions.nmode();
        for v in 0..regions.nvar() {
            for (vertex, &region) in self.region_mapping.iter().enumerate() {
                for mode in 0..m {
                    out.set(v, vertex, mode, regions.get(v, region, mode));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triplets_are_sorted_and_merged() {
        let lc = LocalConnectivity::from_triplets(3, &[(2, 0, 1.0), (0, 1, 2.0), (2, 0, 0.5)]).unwrap();
        assert_eq!(lc.nnz(), 2);
        assert_eq!(lc.row(0), (&[1usize][..], &[2.0][..]));
        assert_eq!(lc.row(1).0.len(), 0);
        assert_eq!(lc.row(2), (&[0usize][..], &[1.5][..]));
        assert!(LocalConnectivity::from_triplets(2, &[(0, 2, 1.0)]).is_err());
    }

    #[test]
    fn apply_is_a_sparse_product() {
        let lc = LocalConnectivity::from_triplets(2, &[(0, 1, 2.0), (1, 0, -1.0)])
            .unwrap()
            .with_strength(0.5);
        let x = State::from_rows(&[vec![3.0, 4.0], vec![1.0, 0.0]]).unwrap();
        let mut out = State::zeros(2, 2, 1);
        lc.apply(&x, &mut out);
        assert_eq!(out.data(), &[4.0, -1.5, 0.0, -0.5]);
    }

    #[test]
    fn distance_kernel_respects_cutoff() {
        let d = [0.0, 1.0, 5.0, 1.0, 0.0, 1.0, 5.0, 1.0, 0.0];
        let lc = LocalConnectivity::from_distances(3, &d, &Gaussian::default(), 2.0).unwrap();
        assert_eq!(lc.nnz(), 4);
        assert_eq!(lc.row(1).0, &[0, 2]);
    }

    #[test]
    fn region_average_and_broadcast() {
        let mut s = Surface::new(vec![0, 0, 1]);
        s.configure(2).unwrap();
        let x = State::from_rows(&[vec![1.0, 3.0, 7.0]]).unwrap();
        let mut regions = State::zeros(1, 2, 1);
        s.region_average(&x, &mut regions);
        assert_eq!(regions.data(), &[2.0, 7.0]);
        let mut back = State::zeros(1, 3, 1);
        s.broadcast(&regions, &mut back);
        assert_eq!(back.data(), &[2.0, 2.0, 7.0]);
    }

    #[test]
    fn unmapped_region_is_rejected() {
        assert!(Surface::new(vec![0, 0]).configure(2).is_err());
        assert!(Surface::new(vec![0, 3]).configure(2).is_err());
    }
}
