//! Delaunay edge flipping.
//!
//! An interior edge whose aggregated covolume-edge ratio is negative is a
//! Delaunay violation. Flipping replaces the diagonal of the quadrilateral
//! formed by the edge's two adjacent cells:
//!
//! ```text
//!      3                   3
//!      ^                   ^
//!     /|\                 / \
//!    / | \               /   \
//!   /  |  \             /  1  \
//!  0 0 | 1 1    ==>    0-------1
//!   \  |  /             \  0  /
//!    \ | /               \   /
//!     \|/                 \ /
//!      v                   v
//!      2                   2
//! ```
//!
//! The surgery rewrites the flipped edge's node pair, both cells' node and
//! edge triples (relabeled so the opposite-node convention is preserved under
//! either relative orientation of the two cells), and the adjacency of the
//! two outer edges that change owner. Afterwards the per-cell geometry of the
//! touched cells is recomputed from scratch, the aggregated interior ratios
//! of their edges are re-summed, cached 2D signed areas are patched in place,
//! and every other derived quantity is invalidated wholesale.
//!
//! [`TriMesh::flip_until_delaunay`] drives [`TriMesh::flip_edges`] to a fixed
//! point. Each pass flips a maximal non-conflicting subset of the violating
//! edges (at most one flip per cell per batch); edges skipped for conflicts
//! are picked up by a later pass. The loop is bounded by
//! [`MAX_FLIP_PASSES`].

#![forbid(unsafe_code)]

use crate::core::mesh::{plane_coords, CorrectionMode, MeshError, TriMesh};
use crate::core::topology::{CellId, EdgeCells, EdgeId};
use crate::geometry::kernel;
use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::debug;

/// Hard cap on the number of flip passes in
/// [`TriMesh::flip_until_delaunay`]. Healthy meshes converge in a handful of
/// passes; hitting the cap indicates a degenerate configuration that would
/// otherwise cycle forever.
pub const MAX_FLIP_PASSES: usize = 100;

/// Errors from edge-flip operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FlipError {
    /// Full flat-cell correction already guarantees non-negative interior
    /// ratios; requesting a flip in that mode is a usage error.
    #[error("edge flipping is incompatible with full flat-cell correction")]
    FullCorrectionActive,

    /// Only interior edges (two adjacent cells) can be flipped.
    #[error("edge {edge} is a boundary edge and cannot be flipped")]
    BoundaryEdge {
        /// The offending edge.
        edge: EdgeId,
    },

    /// A cell was adjacent to more than one edge of the same batch; two
    /// simultaneous flips through one cell are unsupported.
    #[error("cell {cell} is adjacent to more than one edge in the flip batch")]
    ConflictingFlips {
        /// The doubly claimed cell.
        cell: CellId,
    },

    /// The fixed-point loop did not terminate within [`MAX_FLIP_PASSES`].
    #[error("no Delaunay fixed point reached after {passes} flip passes")]
    PassLimitExceeded {
        /// Number of passes performed.
        passes: usize,
    },

    /// A mesh-level failure (e.g. the edge topology could not be built).
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

impl<const D: usize> TriMesh<D> {
    /// Flips edges until no interior edge has a negative aggregated
    /// covolume-edge ratio, or the pass cap is hit.
    ///
    /// Returns whether more than one pass was needed (`false` also covers
    /// the already-Delaunay case).
    ///
    /// # Errors
    ///
    /// - [`FlipError::FullCorrectionActive`] in full correction mode
    /// - [`FlipError::PassLimitExceeded`] if [`MAX_FLIP_PASSES`] passes do
    ///   not reach a fixed point
    /// - [`FlipError::Mesh`] if the edge topology cannot be built
    ///
    /// # Examples
    ///
    /// ```rust
    /// use covolume::prelude::*;
    ///
    /// // A skewed quad triangulated along the wrong diagonal: the pair is
    /// // obtuse and the shared edge {1,3} aggregates a negative ratio.
    /// let nodes = vec![
    ///     Point::new([0.0, 0.0]),
    ///     Point::new([1.0, 0.0]),
    ///     Point::new([1.0, 1.0]),
    ///     Point::new([0.0, 1.2]),
    /// ];
    /// let mut mesh = TriMesh::new(nodes, vec![[0, 1, 3], [1, 2, 3]]).unwrap();
    /// assert_eq!(mesh.num_delaunay_violations().unwrap(), 1);
    ///
    /// mesh.flip_until_delaunay().unwrap();
    /// assert_eq!(mesh.num_delaunay_violations().unwrap(), 0);
    /// ```
    pub fn flip_until_delaunay(&mut self) -> Result<bool, FlipError> {
        if self.correction_mode() == CorrectionMode::Full {
            return Err(FlipError::FullCorrectionActive);
        }

        // If every half-edge ratio is positive no interior edge can
        // aggregate negative, and the topology need not even be built.
        if self
            .ce_ratios
            .iter()
            .all(|ratios| ratios.iter().all(|&r| r > 0.0))
        {
            return Ok(false);
        }

        let mut passes = 0;
        loop {
            self.interior_ce_ratios()?;
            let needs_flip: Vec<EdgeId> = {
                let ratios = self.interior_ce_ratios.get();
                let topo = self.topology.get();
                topo.interior_edges()
                    .iter()
                    .zip(ratios)
                    .filter_map(|(&edge, &ratio)| (ratio < 0.0).then_some(edge))
                    .collect()
            };
            if needs_flip.is_empty() {
                break;
            }
            if passes >= MAX_FLIP_PASSES {
                return Err(FlipError::PassLimitExceeded { passes });
            }

            // Maximal non-conflicting subset, greedy by ascending edge id;
            // edges skipped here are still violating next pass.
            let mut claimed: FxHashSet<CellId> = FxHashSet::default();
            let mut batch = Vec::with_capacity(needs_flip.len());
            {
                let topo = self.topology.get();
                for &edge in &needs_flip {
                    let EdgeCells::Interior(cells) = *topo.edge_cells(edge) else {
                        continue;
                    };
                    if cells.iter().any(|cell| claimed.contains(cell)) {
                        continue;
                    }
                    claimed.extend(cells);
                    batch.push(edge);
                }
            }

            debug!(
                pass = passes + 1,
                violations = needs_flip.len(),
                batch = batch.len(),
                "flipping interior edges"
            );
            self.flip_edges(&batch)?;
            passes += 1;
        }

        debug!(passes, "reached Delaunay fixed point");
        Ok(passes > 1)
    }

    /// Flips a batch of interior edges simultaneously.
    ///
    /// # Errors
    ///
    /// - [`FlipError::FullCorrectionActive`] in full correction mode
    /// - [`FlipError::BoundaryEdge`] if a batch edge has only one adjacent
    ///   cell
    /// - [`FlipError::ConflictingFlips`] if a cell is adjacent to two batch
    ///   edges
    /// - [`FlipError::Mesh`] if the edge topology cannot be built
    pub fn flip_edges(&mut self, edges: &[EdgeId]) -> Result<(), FlipError> {
        if self.correction_mode() == CorrectionMode::Full {
            return Err(FlipError::FullCorrectionActive);
        }
        self.ensure_topology()?;

        {
            let topo = self.topology.get();
            let mut claimed: FxHashSet<CellId> = FxHashSet::default();
            for &edge in edges {
                let EdgeCells::Interior(cells) = *topo.edge_cells(edge) else {
                    return Err(FlipError::BoundaryEdge { edge });
                };
                for cell in cells {
                    if !claimed.insert(cell) {
                        return Err(FlipError::ConflictingFlips { cell });
                    }
                }
            }
        }

        let mut touched: Vec<CellId> = Vec::with_capacity(2 * edges.len());
        for &edge in edges {
            let (c0, c1) = self.flip_single_edge(edge);
            touched.push(c0);
            touched.push(c1);
        }
        touched.sort_unstable();
        touched.dedup();

        self.patch_after_flips(&touched);
        Ok(())
    }

    /// Performs the topology surgery for one interior edge. Cache patching
    /// is deferred to the end of the batch.
    fn flip_single_edge(&mut self, edge: EdgeId) -> (CellId, CellId) {
        let topo = self.topology.get_mut();
        let EdgeCells::Interior([c0, c1]) = topo.edge_cells[edge] else {
            unreachable!("flip batch was validated to contain only interior edges")
        };
        let l0 = local_edge_index(topo.cell_edges[c0], edge);
        let l1 = local_edge_index(topo.cell_edges[c1], edge);

        // The quadrilateral: apexes a, b opposite the shared edge, shared
        // nodes c, d in c0's local order.
        let a = self.cell_nodes[c0][l0];
        let b = self.cell_nodes[c1][l1];
        let c = self.cell_nodes[c0][(l0 + 1) % 3];
        let d = self.cell_nodes[c0][(l0 + 2) % 3];

        // Do the two cells wind their nodes in the same direction?
        let equal_orientation = c == self.cell_nodes[c1][(l1 + 2) % 3];

        // The new diagonal connects the former apexes.
        topo.edge_nodes[edge] = if a <= b { [a, b] } else { [b, a] };
        self.cell_nodes[c0] = [a, b, c];
        self.cell_nodes[c1] = [a, b, d];

        // Rebuild both edge triples under the opposite-node convention. The
        // relabeling depends on the relative orientation of the old cells.
        let prev0 = topo.cell_edges[c0];
        let prev1 = topo.cell_edges[c1];
        let (i0, i1) = if equal_orientation { (1, 2) } else { (2, 1) };
        topo.cell_edges[c0] = [prev1[(l1 + i0) % 3], prev0[(l0 + 2) % 3], edge];
        topo.cell_edges[c1] = [prev1[(l1 + i1) % 3], prev0[(l0 + 1) % 3], edge];

        // Two outer edges change owner: a-d moves from c0 to c1 and b-c
        // from c1 to c0. The remaining outer edges keep their cells.
        let moved_to_c1 = prev0[(l0 + 1) % 3];
        let moved_to_c0 = prev1[(l1 + i0) % 3];
        let reassigned = topo.edge_cells[moved_to_c1].reassign(c0, c1);
        debug_assert!(reassigned, "edge {moved_to_c1} lost its adjacency to cell {c0}");
        let reassigned = topo.edge_cells[moved_to_c0].reassign(c1, c0);
        debug_assert!(reassigned, "edge {moved_to_c0} lost its adjacency to cell {c1}");

        (c0, c1)
    }

    /// Repairs the caches after a batch of flips: per-cell geometry of the
    /// touched cells from scratch, aggregated interior ratios and signed
    /// areas patched in place, everything else invalidated.
    fn patch_after_flips(&mut self, cells: &[CellId]) {
        for &cell in cells {
            let (e, dots, sq, volume, ratios) = self.cell_geometry(cell);
            self.half_edge_coords[cell] = e;
            self.ei_dot_ej[cell] = dots;
            self.ei_dot_ei[cell] = sq;
            self.cell_volumes[cell] = volume;
            self.ce_ratios[cell] = ratios;
        }

        if self.interior_ce_ratios.is_valid() {
            let updates: Vec<(usize, f64)> = {
                let topo = self.topology.get();
                let mut edges: Vec<EdgeId> = cells
                    .iter()
                    .flat_map(|&cell| topo.cell_edges[cell])
                    .filter(|&edge| !topo.is_boundary_edge(edge))
                    .collect();
                edges.sort_unstable();
                edges.dedup();

                edges
                    .iter()
                    .map(|&edge| {
                        let Some(position) = topo.interior_index(edge) else {
                            unreachable!("boundary edges were filtered out")
                        };
                        let EdgeCells::Interior([ca, cb]) = topo.edge_cells[edge] else {
                            unreachable!("interior edge has two adjacent cells")
                        };
                        let ra = self.ce_ratios[ca][local_edge_index(topo.cell_edges[ca], edge)];
                        let rb = self.ce_ratios[cb][local_edge_index(topo.cell_edges[cb], edge)];
                        (position, ra + rb)
                    })
                    .collect()
            };
            if let Some(values) = self.interior_ce_ratios.value_mut() {
                for (position, value) in updates {
                    values[position] = value;
                }
            }
        }

        // Signed areas exist only on 2D meshes; patch the touched cells.
        let signed_updates: Option<Vec<(CellId, f64)>> = self.signed_areas.is_valid().then(|| {
            cells
                .iter()
                .map(|&cell| {
                    let [a, b, c] = self.cell_nodes[cell];
                    let area = kernel::signed_triangle_area([
                        plane_coords(self.node_coords[a]),
                        plane_coords(self.node_coords[b]),
                        plane_coords(self.node_coords[c]),
                    ]);
                    (cell, area)
                })
                .collect()
        });
        if let (Some(updates), Some(values)) = (signed_updates, self.signed_areas.value_mut()) {
            for (cell, area) in updates {
                values[cell] = area;
            }
        }

        // Not cheaply patchable; recomputed lazily on next access.
        self.cell_partitions.invalidate();
        self.control_volumes.invalidate();
        self.cv_centroids.invalidate();
        self.surface_areas.invalidate();
        self.cell_centroids.invalidate();
        self.circumcenters.invalidate();
        self.subdomains.clear();
        // Boundary flags are untouched: only interior edges were flipped and
        // both cells stay on the same edges' sides of the boundary.
    }
}

fn local_edge_index(edges: [EdgeId; 3], edge: EdgeId) -> usize {
    match edges.iter().position(|&e| e == edge) {
        Some(k) => k,
        None => unreachable!("cell does not contain its adjacent edge {edge}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mesh::MeshOptions;
    use crate::geometry::point::Point;
    use approx::assert_relative_eq;

    /// Skewed quad triangulated along the wrong diagonal {1,3}.
    fn wrong_diagonal_quad() -> TriMesh<2> {
        TriMesh::new(
            vec![
                Point::new([0.0, 0.0]),
                Point::new([1.0, 0.0]),
                Point::new([1.0, 1.0]),
                Point::new([0.0, 1.2]),
            ],
            vec![[0, 1, 3], [1, 2, 3]],
        )
        .unwrap()
    }

    fn sorted_cells<const D: usize>(mesh: &TriMesh<D>) -> Vec<[usize; 3]> {
        let mut cells: Vec<[usize; 3]> = mesh
            .cell_nodes()
            .iter()
            .map(|row| {
                let mut row = *row;
                row.sort_unstable();
                row
            })
            .collect();
        cells.sort_unstable();
        cells
    }

    #[test]
    fn wrong_diagonal_is_repaired_by_one_pass() {
        let mut mesh = wrong_diagonal_quad();
        assert_eq!(mesh.num_delaunay_violations().unwrap(), 1);

        let multiple_passes = mesh.flip_until_delaunay().unwrap();
        assert!(!multiple_passes);
        assert_eq!(mesh.num_delaunay_violations().unwrap(), 0);

        // The diagonal now connects the former apexes 0 and 2.
        assert_eq!(sorted_cells(&mesh), vec![[0, 1, 2], [0, 2, 3]]);
        let topo = mesh.topology().unwrap();
        let interior = topo.interior_edges()[0];
        assert_eq!(topo.edge_nodes(interior), [0, 2]);

        let ratios = mesh.interior_ce_ratios().unwrap();
        assert!(ratios[0] >= 0.0);
    }

    #[test]
    fn flip_to_fixed_point_is_idempotent() {
        let mut mesh = wrong_diagonal_quad();
        mesh.flip_until_delaunay().unwrap();
        let cells = sorted_cells(&mesh);
        let ratios = mesh.interior_ce_ratios().unwrap().to_vec();

        assert!(!mesh.flip_until_delaunay().unwrap());
        assert_eq!(sorted_cells(&mesh), cells);
        let again = mesh.interior_ce_ratios().unwrap();
        for (a, b) in ratios.iter().zip(again) {
            assert_relative_eq!(*a, *b, epsilon = 1e-15);
        }
    }

    #[test]
    fn flipping_an_edge_twice_restores_the_mesh() {
        let mut mesh = wrong_diagonal_quad();
        let cells_before = sorted_cells(&mesh);
        let ratios_before = mesh.interior_ce_ratios().unwrap().to_vec();
        let interior = mesh.topology().unwrap().interior_edges()[0];

        mesh.flip_edges(&[interior]).unwrap();
        assert_ne!(sorted_cells(&mesh), cells_before);

        mesh.flip_edges(&[interior]).unwrap();
        assert_eq!(sorted_cells(&mesh), cells_before);
        assert_eq!(
            mesh.topology().unwrap().edge_nodes(interior),
            [1, 3]
        );

        let ratios_after = mesh.interior_ce_ratios().unwrap();
        for (a, b) in ratios_before.iter().zip(ratios_after) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
    }

    #[test]
    fn patched_caches_match_a_fresh_mesh() {
        let mut mesh = wrong_diagonal_quad();
        // Materialize patchable caches before flipping.
        let _ = mesh.interior_ce_ratios().unwrap();
        let _ = mesh.signed_cell_areas().unwrap();

        mesh.flip_until_delaunay().unwrap();

        let mut fresh =
            TriMesh::new(mesh.node_coords().to_vec(), mesh.cell_nodes().to_vec()).unwrap();

        let patched_signed = mesh.signed_cell_areas().unwrap().to_vec();
        let fresh_signed = fresh.signed_cell_areas().unwrap();
        for (a, b) in patched_signed.iter().zip(fresh_signed) {
            assert_relative_eq!(*a, *b, max_relative = 1e-13);
        }

        let patched_ratios = mesh.interior_ce_ratios().unwrap().to_vec();
        let fresh_ratios = fresh.interior_ce_ratios().unwrap();
        for (a, b) in patched_ratios.iter().zip(fresh_ratios) {
            assert_relative_eq!(*a, *b, max_relative = 1e-13);
        }

        let patched_cv = mesh.control_volumes().to_vec();
        let fresh_cv = fresh.control_volumes();
        for (a, b) in patched_cv.iter().zip(fresh_cv) {
            assert_relative_eq!(*a, *b, max_relative = 1e-13);
        }
    }

    #[test]
    fn boundary_edges_cannot_be_flipped() {
        let mut mesh = wrong_diagonal_quad();
        let boundary = mesh.topology().unwrap().boundary_edges()[0];
        assert_eq!(
            mesh.flip_edges(&[boundary]).unwrap_err(),
            FlipError::BoundaryEdge { edge: boundary }
        );
    }

    #[test]
    fn conflicting_batches_are_rejected() {
        // A fan: cell 1 is adjacent to both interior edges.
        let nodes = vec![
            Point::new([0.0, 0.0]),
            Point::new([2.0, 0.0]),
            Point::new([2.0, 2.0]),
            Point::new([0.0, 2.0]),
            Point::new([-1.0, 1.0]),
        ];
        let mut mesh =
            TriMesh::new(nodes, vec![[0, 1, 2], [0, 2, 3], [0, 3, 4]]).unwrap();
        let interior = mesh.topology().unwrap().interior_edges().to_vec();
        assert_eq!(interior.len(), 2);

        assert_eq!(
            mesh.flip_edges(&interior).unwrap_err(),
            FlipError::ConflictingFlips { cell: 1 }
        );
    }

    #[test]
    fn full_correction_mode_forbids_flipping() {
        let mut mesh = TriMesh::with_options(
            vec![
                Point::new([0.0, 0.0]),
                Point::new([1.0, 0.0]),
                Point::new([1.0, 1.0]),
                Point::new([0.0, 1.2]),
            ],
            vec![[0, 1, 3], [1, 2, 3]],
            MeshOptions {
                sort_cells: false,
                flat_cell_correction: crate::core::mesh::CorrectionMode::Full,
            },
        )
        .unwrap();

        assert_eq!(
            mesh.flip_until_delaunay().unwrap_err(),
            FlipError::FullCorrectionActive
        );
        assert_eq!(mesh.flip_edges(&[0]).unwrap_err(), FlipError::FullCorrectionActive);
    }

    #[test]
    fn already_delaunay_mesh_reports_no_passes() {
        let mut mesh = TriMesh::new(
            vec![
                Point::new([0.0, 0.0]),
                Point::new([1.0, 0.0]),
                Point::new([0.5, 1.0]),
            ],
            vec![[0, 1, 2]],
        )
        .unwrap();
        assert!(!mesh.flip_until_delaunay().unwrap());
    }
}
