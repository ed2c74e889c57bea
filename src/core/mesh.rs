//! Triangular meshes with cached covolume geometry.
//!
//! [`TriMesh`] owns the node coordinates and the cell table, the per-cell
//! geometry that every downstream quantity is built from (half-edge vectors,
//! pairwise dot products, squared lengths, areas, covolume-edge ratios), and
//! a family of lazily computed derived quantities (edge topology, aggregated
//! per-edge ratios, control volumes, centroids, surface areas,
//! circumcenters). The per-cell arrays are kept valid at all times
//! (recomputed wholesale on coordinate updates and patched incrementally by
//! edge flips), while the derived quantities sit in [`Cached`] slots that are
//! invalidated by mutations and recomputed on next read.
//!
//! Obtuse ("flat") cells whose naive covolume-edge ratio is negative along
//! one edge can optionally be repaired at construction time through the
//! mirror-based [`FlatCellCorrector`]; see [`CorrectionMode`].

#![forbid(unsafe_code)]

use crate::core::cache::Cached;
use crate::core::correction::FlatCellCorrector;
use crate::core::topology::{CellId, NodeId, Topology, TopologyError};
use crate::core::util::{scatter_add, scatter_add_vec};
use crate::geometry::kernel;
use crate::geometry::point::Point;
use crate::geometry::quality;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flat-cell correction mode, fixed at construction.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum CorrectionMode {
    /// No correction; negative ratios are left to the edge-flip engine.
    #[default]
    None,
    /// Correct only cells whose negative ratio sits on a boundary edge. This
    /// best imitates the classical notion of control volumes; interior
    /// violations remain flippable.
    Boundary,
    /// Correct every cell with a negative ratio. Guarantees non-negative
    /// interior aggregates by construction, which is why edge flipping is a
    /// usage error in this mode.
    Full,
}

/// Construction options for [`TriMesh::with_options`].
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct MeshOptions {
    /// Sort each cell's node triple ascending, then sort the cell rows
    /// lexicographically. Deterministic; helps downstream consumers that
    /// build sparse systems from the cell/edge tables.
    pub sort_cells: bool,
    /// Flat-cell correction mode.
    pub flat_cell_correction: CorrectionMode,
}

/// Errors from mesh construction, mutation, and derived-quantity queries.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MeshError {
    /// A cell references a node id beyond the supplied coordinate table.
    #[error("cell {cell} references node {node}, but only {num_nodes} nodes were supplied")]
    NodeOutOfRange {
        /// The offending cell.
        cell: CellId,
        /// The out-of-range node id.
        node: NodeId,
        /// Number of supplied nodes.
        num_nodes: usize,
    },

    /// A supplied node is not referenced by any cell.
    #[error("node {node} is not referenced by any cell")]
    UnusedNode {
        /// The orphaned node id.
        node: NodeId,
    },

    /// The derived edge topology is invalid.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// A bulk coordinate update supplied the wrong number of points.
    #[error("expected {expected} node coordinates, got {actual}")]
    NodeCountMismatch {
        /// Number of nodes in the mesh.
        expected: usize,
        /// Number of points supplied.
        actual: usize,
    },

    /// Node coordinates cannot be replaced while flat-cell correction is
    /// active (the corrections were derived from the old coordinates).
    #[error("node coordinates cannot be updated while flat-cell correction is active")]
    CorrectionActive,

    /// The operation is only defined for a specific ambient dimension.
    #[error("operation requires {expected}-dimensional coordinates, mesh is {actual}-dimensional")]
    DimensionMismatch {
        /// Required dimension.
        expected: usize,
        /// The mesh's dimension.
        actual: usize,
    },

    /// A control volume is (near-)zero or non-finite, so its centroid is
    /// undefined.
    #[error("control volume of node {node} is degenerate; centroids are undefined")]
    DegenerateControlVolume {
        /// The node with the degenerate control volume.
        node: NodeId,
    },

    /// The two mirrored covolume-edge ratios of a flat cell disagree beyond
    /// the relative tolerance, i.e. the cell is numerically ill-formed.
    #[error("flat cell {cell}: mirrored covolume-edge ratios disagree beyond tolerance")]
    AsymmetricFlatCell {
        /// The offending cell.
        cell: CellId,
    },
}

/// A triangular mesh with cached covolume/control-volume geometry.
///
/// The ambient dimension `D` is 2 for planar meshes or 3 for surface meshes
/// embedded in space. Per-cell quantities follow the opposite-node
/// convention: local edge `k` is opposite local node `k`, directed from node
/// `k+1` to node `k+2` (mod 3).
///
/// # Examples
///
/// ```rust
/// use covolume::prelude::*;
///
/// // Unit square split along the 0-2 diagonal.
/// let nodes = vec![
///     Point::new([0.0, 0.0]),
///     Point::new([1.0, 0.0]),
///     Point::new([1.0, 1.0]),
///     Point::new([0.0, 1.0]),
/// ];
/// let mut mesh = TriMesh::new(nodes, vec![[0, 1, 2], [0, 2, 3]]).unwrap();
///
/// // Each corner of the square owns a quarter of its area.
/// let control_volumes = mesh.control_volumes().to_vec();
/// for cv in control_volumes {
///     assert!((cv - 0.25).abs() < 1e-14);
/// }
/// assert_eq!(mesh.num_delaunay_violations().unwrap(), 0);
/// ```
#[derive(Clone, Debug)]
pub struct TriMesh<const D: usize> {
    pub(crate) node_coords: Vec<Point<D>>,
    pub(crate) cell_nodes: Vec<[NodeId; 3]>,
    correction_mode: CorrectionMode,

    // Per-cell geometry, kept valid at all times.
    pub(crate) half_edge_coords: Vec<[[f64; D]; 3]>,
    pub(crate) ei_dot_ej: Vec<[f64; 3]>,
    pub(crate) ei_dot_ei: Vec<[f64; 3]>,
    pub(crate) cell_volumes: Vec<f64>,
    pub(crate) ce_ratios: Vec<[f64; 3]>,

    // Flat-cell correction state. `corrector` is `Some` (possibly empty)
    // whenever a correction mode is active; `regular_cells` lists the cells
    // whose contributions come straight from the per-cell arrays.
    pub(crate) corrector: Option<FlatCellCorrector<D>>,
    pub(crate) regular_cells: Vec<CellId>,

    // Lazily derived quantities.
    pub(crate) topology: Cached<Topology>,
    pub(crate) interior_ce_ratios: Cached<Vec<f64>>,
    pub(crate) cell_partitions: Cached<Vec<[f64; 3]>>,
    pub(crate) control_volumes: Cached<Vec<f64>>,
    pub(crate) cv_centroids: Cached<Vec<Point<D>>>,
    pub(crate) surface_areas: Cached<Vec<f64>>,
    pub(crate) cell_centroids: Cached<Vec<Point<D>>>,
    pub(crate) circumcenters: Cached<Vec<Point<D>>>,
    pub(crate) signed_areas: Cached<Vec<f64>>,
    pub(crate) boundary_node_mask: Cached<Vec<bool>>,
    pub(crate) subdomains: FxHashMap<String, Vec<bool>>,
}

impl<const D: usize> TriMesh<D> {
    /// Builds a mesh from node coordinates and a cell→node table, with no
    /// cell sorting and no flat-cell correction.
    ///
    /// # Errors
    ///
    /// - [`MeshError::NodeOutOfRange`] if a cell references a missing node
    /// - [`MeshError::UnusedNode`] if a node appears in no cell
    pub fn new(nodes: Vec<Point<D>>, cells: Vec<[NodeId; 3]>) -> Result<Self, MeshError> {
        Self::with_options(nodes, cells, MeshOptions::default())
    }

    /// Builds a mesh with explicit [`MeshOptions`].
    ///
    /// # Errors
    ///
    /// In addition to the [`new`](Self::new) failures:
    /// - [`MeshError::Topology`] if the cell table is non-manifold (detected
    ///   here when boundary correction needs the edge topology)
    /// - [`MeshError::AsymmetricFlatCell`] if a flagged flat cell fails the
    ///   mirrored-ratio symmetry check
    pub fn with_options(
        nodes: Vec<Point<D>>,
        mut cells: Vec<[NodeId; 3]>,
        options: MeshOptions,
    ) -> Result<Self, MeshError> {
        if options.sort_cells {
            for row in &mut cells {
                row.sort_unstable();
            }
            cells.sort_unstable();
        }

        let num_nodes = nodes.len();
        let mut used = vec![false; num_nodes];
        for (cell, row) in cells.iter().enumerate() {
            for &node in row {
                if node >= num_nodes {
                    return Err(MeshError::NodeOutOfRange {
                        cell,
                        node,
                        num_nodes,
                    });
                }
                used[node] = true;
            }
        }
        if let Some(node) = used.iter().position(|&u| !u) {
            return Err(MeshError::UnusedNode { node });
        }

        let num_cells = cells.len();
        let mut mesh = Self {
            node_coords: nodes,
            cell_nodes: cells,
            correction_mode: options.flat_cell_correction,
            half_edge_coords: Vec::new(),
            ei_dot_ej: Vec::new(),
            ei_dot_ei: Vec::new(),
            cell_volumes: Vec::new(),
            ce_ratios: Vec::new(),
            corrector: None,
            regular_cells: (0..num_cells).collect(),
            topology: Cached::stale(),
            interior_ce_ratios: Cached::stale(),
            cell_partitions: Cached::stale(),
            control_volumes: Cached::stale(),
            cv_centroids: Cached::stale(),
            surface_areas: Cached::stale(),
            cell_centroids: Cached::stale(),
            circumcenters: Cached::stale(),
            signed_areas: Cached::stale(),
            boundary_node_mask: Cached::stale(),
            subdomains: FxHashMap::default(),
        };
        mesh.recompute_cell_geometry();
        mesh.apply_flat_cell_correction()?;
        Ok(mesh)
    }

    /// Number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.node_coords.len()
    }

    /// Number of cells.
    #[must_use]
    pub fn num_cells(&self) -> usize {
        self.cell_nodes.len()
    }

    /// The node coordinates.
    #[must_use]
    pub fn node_coords(&self) -> &[Point<D>] {
        &self.node_coords
    }

    /// The cell→node table.
    #[must_use]
    pub fn cell_nodes(&self) -> &[[NodeId; 3]] {
        &self.cell_nodes
    }

    /// The active flat-cell correction mode.
    #[must_use]
    pub fn correction_mode(&self) -> CorrectionMode {
        self.correction_mode
    }

    /// Per-cell covolume-edge ratios, one per half-edge (local edge `k`
    /// opposite local node `k`). Rows of flat-corrected cells hold the
    /// corrected values.
    #[must_use]
    pub fn half_edge_ce_ratios(&self) -> &[[f64; 3]] {
        &self.ce_ratios
    }

    /// Per-cell (unsigned) triangle areas.
    #[must_use]
    pub fn cell_volumes(&self) -> &[f64] {
        &self.cell_volumes
    }

    /// Per-cell half-edge lengths.
    #[must_use]
    pub fn half_edge_lengths(&self) -> Vec<[f64; 3]> {
        self.ei_dot_ei.iter().map(|sq| sq.map(f64::sqrt)).collect()
    }

    /// Per-cell face partitions: each half-edge split at its midpoint, half
    /// the length to either endpoint.
    #[must_use]
    pub fn face_partitions(&self) -> Vec<[[f64; 2]; 3]> {
        self.ei_dot_ei
            .iter()
            .map(|sq| {
                sq.map(|s| {
                    let half = 0.5 * s.sqrt();
                    [half, half]
                })
            })
            .collect()
    }

    /// Per-cell inradii.
    #[must_use]
    pub fn inradii(&self) -> Vec<f64> {
        self.cell_volumes
            .iter()
            .zip(&self.ei_dot_ei)
            .map(|(&vol, &sq)| quality::inradius(vol, sq))
            .collect()
    }

    /// Per-cell circumradii.
    #[must_use]
    pub fn circumradii(&self) -> Vec<f64> {
        self.ei_dot_ei.iter().map(|&sq| quality::circumradius(sq)).collect()
    }

    /// Per-cell quality `2·r_in / r_out` (1 for equilateral cells).
    #[must_use]
    pub fn cell_qualities(&self) -> Vec<f64> {
        self.ei_dot_ei.iter().map(|&sq| quality::cell_quality(sq)).collect()
    }

    /// Per-cell interior angles in radians, angle `k` at local node `k`.
    #[must_use]
    pub fn angles(&self) -> Vec<[f64; 3]> {
        self.ei_dot_ei
            .iter()
            .zip(&self.ei_dot_ej)
            .map(|(&sq, &dots)| quality::interior_angles(sq, dots))
            .collect()
    }

    /// The derived edge topology, building it on first access.
    ///
    /// # Errors
    ///
    /// [`MeshError::Topology`] if an edge has three or more adjacent cells.
    pub fn topology(&mut self) -> Result<&Topology, MeshError> {
        self.ensure_topology()?;
        Ok(self.topology.get())
    }

    /// Aggregated covolume-edge ratio per interior edge (the sum of the two
    /// adjacent half-edge contributions), aligned with
    /// [`Topology::interior_edges`].
    ///
    /// # Errors
    ///
    /// [`MeshError::Topology`] if the edge topology cannot be built.
    pub fn interior_ce_ratios(&mut self) -> Result<&[f64], MeshError> {
        if !self.interior_ce_ratios.is_valid() {
            self.ensure_topology()?;
            let topo = self.topology.get();
            let mut per_edge = vec![0.0; topo.num_edges()];
            scatter_add(
                &mut per_edge,
                topo.cell_edges.iter().zip(&self.ce_ratios).flat_map(|(edges, ratios)| {
                    edges.iter().zip(ratios).map(|(&edge, &ratio)| (edge, ratio))
                }),
            );
            let values: Vec<f64> = topo.interior_edges.iter().map(|&e| per_edge[e]).collect();
            self.interior_ce_ratios.fill(values);
        }
        Ok(self.interior_ce_ratios.get())
    }

    /// Number of Delaunay violations: interior edges whose aggregated
    /// covolume-edge ratio is negative.
    ///
    /// # Errors
    ///
    /// [`MeshError::Topology`] if the edge topology cannot be built.
    pub fn num_delaunay_violations(&mut self) -> Result<usize, MeshError> {
        Ok(self
            .interior_ce_ratios()?
            .iter()
            .filter(|&&ratio| ratio < 0.0)
            .count())
    }

    /// Per-cell control-volume partitions `¼ · |e_k|² · ratio_k`, one per
    /// half-edge. Each partition is the area of either right sub-triangle
    /// flanking edge `k` between the edge midpoint and the circumcenter, and
    /// is contributed once to each edge endpoint.
    pub fn cell_partitions(&mut self) -> &[[f64; 3]] {
        if !self.cell_partitions.is_valid() {
            let partitions: Vec<[f64; 3]> = self
                .ei_dot_ei
                .iter()
                .zip(&self.ce_ratios)
                .map(|(sq, ratios)| {
                    [
                        0.25 * sq[0] * ratios[0],
                        0.25 * sq[1] * ratios[1],
                        0.25 * sq[2] * ratios[2],
                    ]
                })
                .collect();
            self.cell_partitions.fill(partitions);
        }
        self.cell_partitions.get()
    }

    /// Per-node control volumes (Voronoi-like node areas), assembled from the
    /// regular cells' partitions and the flat-cell corrections with
    /// scatter-add semantics.
    pub fn control_volumes(&mut self) -> &[f64] {
        if !self.control_volumes.is_valid() {
            self.cell_partitions();
            let mut acc = vec![0.0; self.node_coords.len()];
            {
                let partitions = self.cell_partitions.get();
                scatter_add(
                    &mut acc,
                    self.regular_cells.iter().flat_map(|&cell| {
                        let nodes = self.cell_nodes[cell];
                        let v = partitions[cell];
                        (0..3).flat_map(move |k| {
                            [(nodes[(k + 1) % 3], v[k]), (nodes[(k + 2) % 3], v[k])]
                        })
                    }),
                );
            }
            if let Some(corrector) = &self.corrector {
                scatter_add(&mut acc, corrector.control_volumes());
            }
            self.control_volumes.fill(acc);
        }
        self.control_volumes.get()
    }

    /// Per-cell centroids (barycenters).
    pub fn cell_centroids(&mut self) -> &[Point<D>] {
        if !self.cell_centroids.is_valid() {
            let centroids: Vec<Point<D>> = self
                .cell_nodes
                .iter()
                .map(|&[a, b, c]| {
                    Point::barycenter(&[
                        self.node_coords[a],
                        self.node_coords[b],
                        self.node_coords[c],
                    ])
                })
                .collect();
            self.cell_centroids.fill(centroids);
        }
        self.cell_centroids.get()
    }

    /// Per-cell circumcenters.
    pub fn circumcenters(&mut self) -> &[Point<D>] {
        if !self.circumcenters.is_valid() {
            let centers: Vec<Point<D>> = (0..self.cell_nodes.len())
                .map(|cell| {
                    let [a, b, c] = self.cell_nodes[cell];
                    kernel::circumcenter(
                        [
                            self.node_coords[a],
                            self.node_coords[b],
                            self.node_coords[c],
                        ],
                        self.ei_dot_ei[cell],
                        self.ei_dot_ej[cell],
                    )
                })
                .collect();
            self.circumcenters.fill(centers);
        }
        self.circumcenters.get()
    }

    /// Per-node control-volume centroids: the integral of position over each
    /// node's control volume, divided by the control volume.
    ///
    /// # Errors
    ///
    /// [`MeshError::DegenerateControlVolume`] if a node's control volume is
    /// near-zero or non-finite; the division is never performed silently.
    pub fn control_volume_centroids(&mut self) -> Result<&[Point<D>], MeshError> {
        if !self.cv_centroids.is_valid() {
            let centroids = self.compute_cv_centroids()?;
            self.cv_centroids.fill(centroids);
        }
        Ok(self.cv_centroids.get())
    }

    /// Per-node boundary surface areas: half of each adjacent boundary edge,
    /// with flat-corrected cells apportioning their base edge through the
    /// mirror construction. Interior nodes get zero.
    ///
    /// # Errors
    ///
    /// [`MeshError::Topology`] if the edge topology cannot be built.
    pub fn surface_areas(&mut self) -> Result<&[f64], MeshError> {
        if !self.surface_areas.is_valid() {
            self.ensure_topology()?;
            let mut acc = vec![0.0; self.node_coords.len()];
            {
                let topo = self.topology.get();
                scatter_add(
                    &mut acc,
                    self.regular_cells.iter().flat_map(|&cell| {
                        let nodes = self.cell_nodes[cell];
                        let sq = self.ei_dot_ei[cell];
                        (0..3)
                            .filter(move |&k| topo.is_boundary_half_edge(cell, k))
                            .flat_map(move |k| {
                                let half = 0.5 * sq[k].sqrt();
                                [(nodes[(k + 1) % 3], half), (nodes[(k + 2) % 3], half)]
                            })
                    }),
                );
            }
            if let Some(corrector) = &self.corrector {
                scatter_add(&mut acc, corrector.surface_areas());
            }
            self.surface_areas.fill(acc);
        }
        Ok(self.surface_areas.get())
    }

    /// Signed per-cell areas (2D meshes only; positive for counterclockwise
    /// node order).
    ///
    /// # Errors
    ///
    /// [`MeshError::DimensionMismatch`] unless `D == 2`.
    pub fn signed_cell_areas(&mut self) -> Result<&[f64], MeshError> {
        if D != 2 {
            return Err(MeshError::DimensionMismatch {
                expected: 2,
                actual: D,
            });
        }
        if !self.signed_areas.is_valid() {
            let areas: Vec<f64> = self
                .cell_nodes
                .iter()
                .map(|&[a, b, c]| {
                    kernel::signed_triangle_area([
                        plane_coords(self.node_coords[a]),
                        plane_coords(self.node_coords[b]),
                        plane_coords(self.node_coords[c]),
                    ])
                })
                .collect();
            self.signed_areas.fill(areas);
        }
        Ok(self.signed_areas.get())
    }

    /// Per-node boundary mask: `true` for nodes on at least one boundary
    /// edge.
    ///
    /// # Errors
    ///
    /// [`MeshError::Topology`] if the edge topology cannot be built.
    pub fn is_boundary_node(&mut self) -> Result<&[bool], MeshError> {
        if !self.boundary_node_mask.is_valid() {
            self.ensure_topology()?;
            let topo = self.topology.get();
            let mut mask = vec![false; self.node_coords.len()];
            for &edge in &topo.boundary_edges {
                for node in topo.edge_nodes(edge) {
                    mask[node] = true;
                }
            }
            self.boundary_node_mask.fill(mask);
        }
        Ok(self.boundary_node_mask.get())
    }

    /// Ids of all boundary nodes, ascending.
    ///
    /// # Errors
    ///
    /// [`MeshError::Topology`] if the edge topology cannot be built.
    pub fn boundary_nodes(&mut self) -> Result<Vec<NodeId>, MeshError> {
        Ok(self
            .is_boundary_node()?
            .iter()
            .enumerate()
            .filter_map(|(node, &on_boundary)| on_boundary.then_some(node))
            .collect())
    }

    /// Cell-based curl of a node-based vector field (3D meshes only).
    ///
    /// The field is averaged onto edge midpoints, projected onto the edges,
    /// and the boundary integral divided by the cell area yields the normal
    /// component; the result is the (unnormalized) triangle normal scaled by
    /// `0.5 · Σ⟨e, A⟩ / area²`.
    ///
    /// # Errors
    ///
    /// - [`MeshError::DimensionMismatch`] unless `D == 3`
    /// - [`MeshError::NodeCountMismatch`] if `vector_field` has the wrong
    ///   length
    pub fn curl(&self, vector_field: &[[f64; 3]]) -> Result<Vec<[f64; 3]>, MeshError> {
        if D != 3 {
            return Err(MeshError::DimensionMismatch {
                expected: 3,
                actual: D,
            });
        }
        if vector_field.len() != self.node_coords.len() {
            return Err(MeshError::NodeCountMismatch {
                expected: self.node_coords.len(),
                actual: vector_field.len(),
            });
        }

        Ok(self
            .cell_nodes
            .iter()
            .enumerate()
            .map(|(cell, &nodes)| {
                let e: [[f64; 3]; 3] = self.half_edge_coords[cell].map(space_coords);
                let mut boundary_integral = 0.0;
                for k in 0..3 {
                    // Field value at the midpoint of edge k, approximated by
                    // averaging its endpoints.
                    let a = vector_field[nodes[(k + 1) % 3]];
                    let b = vector_field[nodes[(k + 2) % 3]];
                    let midpoint_value =
                        [0.5 * (a[0] + b[0]), 0.5 * (a[1] + b[1]), 0.5 * (a[2] + b[2])];
                    boundary_integral += kernel::dot(e[k], midpoint_value);
                }
                // ‖e0 × e1‖ = 2·area, so normalizing the normal and dividing
                // by the area folds into a single 1/area² factor.
                let z = kernel::cross(e[0], e[1]);
                let scale = 0.5 * boundary_integral / (self.cell_volumes[cell] * self.cell_volumes[cell]);
                [z[0] * scale, z[1] * scale, z[2] * scale]
            })
            .collect())
    }

    /// Tags the nodes satisfying `predicate` under `label`. The mask is
    /// cached until the next coordinate or topology mutation.
    pub fn mark_subdomain(&mut self, label: &str, predicate: impl Fn(&Point<D>) -> bool) {
        let mask = self.node_coords.iter().map(|p| predicate(p)).collect();
        self.subdomains.insert(label.to_owned(), mask);
    }

    /// The node mask tagged under `label`, if still cached.
    #[must_use]
    pub fn subdomain_nodes(&self, label: &str) -> Option<&[bool]> {
        self.subdomains.get(label).map(Vec::as_slice)
    }

    /// Replaces all node coordinates, keeping the topology.
    ///
    /// Recomputes the per-cell geometry and invalidates every derived
    /// quantity; the edge topology is untouched since connectivity does not
    /// change.
    ///
    /// # Errors
    ///
    /// - [`MeshError::CorrectionActive`] if a flat-cell correction mode is
    ///   active (its corrections were derived from the old coordinates)
    /// - [`MeshError::NodeCountMismatch`] if `coords` has the wrong length
    pub fn update_node_coordinates(&mut self, coords: &[Point<D>]) -> Result<(), MeshError> {
        if self.corrector.is_some() {
            return Err(MeshError::CorrectionActive);
        }
        if coords.len() != self.node_coords.len() {
            return Err(MeshError::NodeCountMismatch {
                expected: self.node_coords.len(),
                actual: coords.len(),
            });
        }

        self.node_coords.clear();
        self.node_coords.extend_from_slice(coords);
        self.recompute_cell_geometry();
        self.invalidate_coordinate_dependent();
        Ok(())
    }

    pub(crate) fn ensure_topology(&mut self) -> Result<(), MeshError> {
        if !self.topology.is_valid() {
            let topo = Topology::build(&self.cell_nodes)?;
            self.topology.fill(topo);
        }
        Ok(())
    }

    /// Recomputes the always-valid per-cell arrays from scratch.
    fn recompute_cell_geometry(&mut self) {
        let num_cells = self.cell_nodes.len();
        self.half_edge_coords.clear();
        self.ei_dot_ej.clear();
        self.ei_dot_ei.clear();
        self.cell_volumes.clear();
        self.ce_ratios.clear();
        self.half_edge_coords.reserve(num_cells);
        self.ei_dot_ej.reserve(num_cells);
        self.ei_dot_ei.reserve(num_cells);
        self.cell_volumes.reserve(num_cells);
        self.ce_ratios.reserve(num_cells);

        for cell in 0..num_cells {
            let (e, dots, sq, volume, ratios) = self.cell_geometry(cell);
            self.half_edge_coords.push(e);
            self.ei_dot_ej.push(dots);
            self.ei_dot_ei.push(sq);
            self.cell_volumes.push(volume);
            self.ce_ratios.push(ratios);
        }
    }

    /// Evaluates the per-cell geometry of a single cell from the current
    /// coordinates.
    pub(crate) fn cell_geometry(
        &self,
        cell: CellId,
    ) -> ([[f64; D]; 3], [f64; 3], [f64; 3], f64, [f64; 3]) {
        let [a, b, c] = self.cell_nodes[cell];
        let p = [
            self.node_coords[a],
            self.node_coords[b],
            self.node_coords[c],
        ];
        let e = [p[2] - p[1], p[0] - p[2], p[1] - p[0]];
        let dots = kernel::shifted_edge_dots(&e);
        let sq = [
            kernel::norm_sq(e[0]),
            kernel::norm_sq(e[1]),
            kernel::norm_sq(e[2]),
        ];
        let (volume, ratios) = kernel::triangle_area_and_ce_ratios(dots);
        (e, dots, sq, volume, ratios)
    }

    /// Flags flat cells per the correction mode, builds the corrector, and
    /// overwrites the flagged cells' covolume-edge ratio rows with the
    /// corrected values.
    fn apply_flat_cell_correction(&mut self) -> Result<(), MeshError> {
        let flagged: Vec<(CellId, usize)> = match self.correction_mode {
            CorrectionMode::None => {
                self.corrector = None;
                return Ok(());
            }
            CorrectionMode::Full => self
                .ce_ratios
                .iter()
                .enumerate()
                .flat_map(|(cell, ratios)| {
                    ratios
                        .iter()
                        .enumerate()
                        .filter(|(_, &r)| r < 0.0)
                        .map(move |(k, _)| (cell, k))
                })
                .collect(),
            CorrectionMode::Boundary => {
                self.ensure_topology()?;
                let topo = self.topology.get();
                self.ce_ratios
                    .iter()
                    .enumerate()
                    .flat_map(|(cell, ratios)| {
                        ratios
                            .iter()
                            .enumerate()
                            .filter(move |&(k, &r)| r < 0.0 && topo.is_boundary_half_edge(cell, k))
                            .map(move |(k, _)| (cell, k))
                    })
                    .collect()
            }
        };

        let mut is_flagged = vec![false; self.cell_nodes.len()];
        for &(cell, _) in &flagged {
            is_flagged[cell] = true;
        }
        self.regular_cells = (0..self.cell_nodes.len())
            .filter(|&cell| !is_flagged[cell])
            .collect();

        let corrector = FlatCellCorrector::new(&flagged, &self.cell_nodes, &self.node_coords)?;
        for (i, &(cell, _)) in flagged.iter().enumerate() {
            self.ce_ratios[cell] = corrector.corrected_ce_ratios(i);
        }
        tracing::debug!(corrected = corrector.len(), "flat-cell correction applied");
        self.corrector = Some(corrector);
        Ok(())
    }

    /// Invalidates everything derived from coordinates; topology and
    /// boundary flags are connectivity-only and stay valid.
    fn invalidate_coordinate_dependent(&mut self) {
        self.interior_ce_ratios.invalidate();
        self.cell_partitions.invalidate();
        self.control_volumes.invalidate();
        self.cv_centroids.invalidate();
        self.surface_areas.invalidate();
        self.cell_centroids.invalidate();
        self.circumcenters.invalidate();
        self.signed_areas.invalidate();
        self.subdomains.clear();
    }

    fn compute_cv_centroids(&mut self) -> Result<Vec<Point<D>>, MeshError> {
        self.cell_partitions();
        self.circumcenters();

        let num_nodes = self.node_coords.len();
        let mut integral = vec![[0.0; D]; num_nodes];
        {
            let partitions = self.cell_partitions.get();
            let circumcenters = self.circumcenters.get();
            let coords = &self.node_coords;
            let cell_nodes = &self.cell_nodes;
            scatter_add_vec(
                &mut integral,
                self.regular_cells.iter().flat_map(|&cell| {
                    let nodes = cell_nodes[cell];
                    let v = partitions[cell];
                    let cc = circumcenters[cell];
                    // Two atomic right triangles per half-edge, one per
                    // endpoint: (corner, edge midpoint, circumcenter), each
                    // of area v[k]; the integral of x over each is the corner
                    // average times the area.
                    (0..3).flat_map(move |k| {
                        let a = nodes[(k + 1) % 3];
                        let b = nodes[(k + 2) % 3];
                        let midpoint = coords[a].midpoint(&coords[b]);
                        [a, b].map(|node| {
                            let average = Point::barycenter(&[coords[node], midpoint, cc]);
                            (node, average.coords().map(|x| x * v[k]))
                        })
                    })
                }),
            );
        }
        if let Some(corrector) = &self.corrector {
            scatter_add_vec(&mut integral, corrector.integral_x());
        }

        let volumes = self.control_volumes();
        let scale = volumes.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let tolerance = 1.0e-14 * scale.max(f64::MIN_POSITIVE);

        integral
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(node, (sum, &volume))| {
                if !volume.is_finite() || volume.abs() <= tolerance {
                    return Err(MeshError::DegenerateControlVolume { node });
                }
                Ok(Point::new(sum.map(|x| x / volume)))
            })
            .collect()
    }
}

/// First two coordinates of a point; only meaningful when `D == 2`.
pub(crate) fn plane_coords<const D: usize>(p: Point<D>) -> [f64; 2] {
    let c = p.coords();
    [c[0], c[1]]
}

/// First three coordinates of a vector; only meaningful when `D == 3`.
fn space_coords<const D: usize>(v: [f64; D]) -> [f64; 3] {
    [v[0], v[1], v[2]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> TriMesh<2> {
        TriMesh::new(
            vec![
                Point::new([0.0, 0.0]),
                Point::new([1.0, 0.0]),
                Point::new([1.0, 1.0]),
                Point::new([0.0, 1.0]),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn construction_rejects_orphan_nodes() {
        let nodes = vec![
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.0]),
            Point::new([0.0, 1.0]),
            Point::new([5.0, 5.0]),
        ];
        let err = TriMesh::new(nodes, vec![[0, 1, 2]]).unwrap_err();
        assert_eq!(err, MeshError::UnusedNode { node: 3 });
    }

    #[test]
    fn construction_rejects_out_of_range_node_ids() {
        let nodes = vec![
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.0]),
            Point::new([0.0, 1.0]),
        ];
        let err = TriMesh::new(nodes, vec![[0, 1, 7]]).unwrap_err();
        assert_eq!(
            err,
            MeshError::NodeOutOfRange {
                cell: 0,
                node: 7,
                num_nodes: 3
            }
        );
    }

    #[test]
    fn sort_cells_is_deterministic() {
        let nodes = vec![
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.0]),
            Point::new([1.0, 1.0]),
            Point::new([0.0, 1.0]),
        ];
        let mesh = TriMesh::with_options(
            nodes,
            vec![[2, 0, 3], [1, 2, 0]],
            MeshOptions {
                sort_cells: true,
                ..MeshOptions::default()
            },
        )
        .unwrap();
        assert_eq!(mesh.cell_nodes(), [[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn square_control_volumes_split_evenly() {
        let mut mesh = unit_square();
        let volumes = mesh.control_volumes().to_vec();
        for cv in volumes {
            assert_relative_eq!(cv, 0.25, max_relative = 1e-14);
        }
    }

    #[test]
    fn control_volumes_conserve_total_area() {
        // An irregular five-node mesh around an interior node.
        let nodes = vec![
            Point::new([0.0, 0.0]),
            Point::new([2.0, 0.1]),
            Point::new([1.9, 1.7]),
            Point::new([-0.3, 1.4]),
            Point::new([0.9, 0.8]),
        ];
        let cells = vec![[0, 1, 4], [1, 2, 4], [2, 3, 4], [3, 0, 4]];
        let mut mesh = TriMesh::new(nodes, cells).unwrap();

        let total_area: f64 = mesh.cell_volumes().iter().sum();
        let total_cv: f64 = mesh.control_volumes().iter().sum();
        assert_relative_eq!(total_cv, total_area, max_relative = 1e-12);
    }

    #[test]
    fn interior_ratio_aggregation_is_order_independent() {
        // An irregular quad so the aggregated diagonal ratio is nonzero.
        let nodes = vec![
            Point::new([0.0, 0.0]),
            Point::new([1.0, -0.2]),
            Point::new([1.3, 1.0]),
            Point::new([0.1, 0.9]),
        ];
        let mut forward = TriMesh::new(nodes.clone(), vec![[0, 1, 2], [0, 2, 3]]).unwrap();
        let mut swapped = TriMesh::new(nodes, vec![[0, 2, 3], [0, 1, 2]]).unwrap();

        let a = forward.interior_ce_ratios().unwrap().to_vec();
        let b = swapped.interior_ce_ratios().unwrap().to_vec();
        assert_eq!(a.len(), 1);
        assert!(a[0].abs() > 1e-3);
        assert_relative_eq!(a[0], b[0], max_relative = 1e-14);
    }

    #[test]
    fn circumcenters_and_centroids_of_the_square() {
        let mut mesh = unit_square();

        let centroids = mesh.cell_centroids().to_vec();
        assert_relative_eq!(centroids[0][0], 2.0 / 3.0, max_relative = 1e-14);
        assert_relative_eq!(centroids[0][1], 1.0 / 3.0, max_relative = 1e-14);

        // Both right triangles share the diagonal as hypotenuse.
        for cc in mesh.circumcenters() {
            assert_relative_eq!(cc[0], 0.5, epsilon = 1e-14);
            assert_relative_eq!(cc[1], 0.5, epsilon = 1e-14);
        }
    }

    #[test]
    fn signed_areas_follow_orientation() {
        let mut mesh = unit_square();
        let areas = mesh.signed_cell_areas().unwrap();
        assert_relative_eq!(areas[0], 0.5, max_relative = 1e-14);
        assert_relative_eq!(areas[1], 0.5, max_relative = 1e-14);

        let mut flipped = TriMesh::new(
            mesh.node_coords().to_vec(),
            vec![[0, 2, 1], [0, 3, 2]],
        )
        .unwrap();
        let areas = flipped.signed_cell_areas().unwrap();
        assert_relative_eq!(areas[0], -0.5, max_relative = 1e-14);
    }

    #[test]
    fn signed_areas_require_2d() {
        let nodes = vec![
            Point::new([0.0, 0.0, 0.0]),
            Point::new([1.0, 0.0, 0.0]),
            Point::new([0.0, 1.0, 0.0]),
        ];
        let mut mesh = TriMesh::new(nodes, vec![[0, 1, 2]]).unwrap();
        assert_eq!(
            mesh.signed_cell_areas().unwrap_err(),
            MeshError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn boundary_nodes_of_a_fan() {
        let nodes = vec![
            Point::new([0.0, 0.0]),
            Point::new([2.0, 0.0]),
            Point::new([2.0, 2.0]),
            Point::new([0.0, 2.0]),
            Point::new([1.0, 1.0]),
        ];
        let cells = vec![[0, 1, 4], [1, 2, 4], [2, 3, 4], [3, 0, 4]];
        let mut mesh = TriMesh::new(nodes, cells).unwrap();

        assert_eq!(mesh.boundary_nodes().unwrap(), vec![0, 1, 2, 3]);
        assert!(!mesh.is_boundary_node().unwrap()[4]);
    }

    #[test]
    fn surface_areas_cover_the_square_perimeter() {
        let mut mesh = unit_square();
        let areas = mesh.surface_areas().unwrap();

        // Every corner touches two unit boundary edges.
        for &a in areas {
            assert_relative_eq!(a, 1.0, max_relative = 1e-14);
        }
        assert_relative_eq!(areas.iter().sum::<f64>(), 4.0, max_relative = 1e-14);
    }

    #[test]
    fn cv_centroids_of_the_square_are_inside_their_quadrants() {
        let mut mesh = unit_square();
        let centroids = mesh.control_volume_centroids().unwrap().to_vec();

        // Node 0's control volume is the lower-left quarter square.
        assert!(centroids[0][0] > 0.0 && centroids[0][0] < 0.5);
        assert!(centroids[0][1] > 0.0 && centroids[0][1] < 0.5);
        // Symmetry across the diagonal maps node 1's centroid onto node 3's.
        assert_relative_eq!(centroids[1][0], centroids[3][1], max_relative = 1e-12);
        assert_relative_eq!(centroids[1][1], centroids[3][0], max_relative = 1e-12);
    }

    #[test]
    fn update_node_coordinates_refreshes_geometry() {
        let mut mesh = unit_square();
        let before: f64 = mesh.cell_volumes().iter().sum();
        assert_relative_eq!(before, 1.0, max_relative = 1e-14);
        let _ = mesh.control_volumes();

        // Stretch the square to a 2x1 rectangle.
        let stretched: Vec<Point<2>> = mesh
            .node_coords()
            .iter()
            .map(|p| Point::new([2.0 * p[0], p[1]]))
            .collect();
        mesh.update_node_coordinates(&stretched).unwrap();

        let after: f64 = mesh.cell_volumes().iter().sum();
        assert_relative_eq!(after, 2.0, max_relative = 1e-14);
        let total_cv: f64 = mesh.control_volumes().iter().sum();
        assert_relative_eq!(total_cv, 2.0, max_relative = 1e-12);
    }

    #[test]
    fn update_node_coordinates_checks_length() {
        let mut mesh = unit_square();
        let err = mesh
            .update_node_coordinates(&[Point::new([0.0, 0.0])])
            .unwrap_err();
        assert_eq!(
            err,
            MeshError::NodeCountMismatch {
                expected: 4,
                actual: 1
            }
        );
    }

    #[test]
    fn subdomain_masks_are_cleared_by_coordinate_updates() {
        let mut mesh = unit_square();
        mesh.mark_subdomain("left", |p| p[0] < 0.5);
        assert_eq!(
            mesh.subdomain_nodes("left"),
            Some([true, false, false, true].as_slice())
        );

        let coords = mesh.node_coords().to_vec();
        mesh.update_node_coordinates(&coords).unwrap();
        assert_eq!(mesh.subdomain_nodes("left"), None);
    }

    #[test]
    fn quality_metrics_on_the_square() {
        let mesh = unit_square();
        let qualities = mesh.cell_qualities();
        let inradii = mesh.inradii();
        let circumradii = mesh.circumradii();

        for cell in 0..2 {
            // Right isosceles triangle with legs 1: r_in = 1 - 1/√2,
            // r_out = √2/2.
            assert_relative_eq!(inradii[cell], 1.0 - 0.5_f64.sqrt(), max_relative = 1e-13);
            assert_relative_eq!(circumradii[cell], 0.5_f64.sqrt(), max_relative = 1e-13);
            assert_relative_eq!(
                qualities[cell],
                2.0 * inradii[cell] / circumradii[cell],
                max_relative = 1e-13
            );
        }

        let angles = mesh.angles();
        for cell_angles in angles {
            assert_relative_eq!(
                cell_angles.iter().sum::<f64>(),
                std::f64::consts::PI,
                max_relative = 1e-13
            );
        }
    }

    #[test]
    fn curl_of_a_rotational_field() {
        // Unit square in the z=0 plane; field (-y, x, 0) has curl (0, 0, 2).
        let nodes = vec![
            Point::new([0.0, 0.0, 0.0]),
            Point::new([1.0, 0.0, 0.0]),
            Point::new([1.0, 1.0, 0.0]),
            Point::new([0.0, 1.0, 0.0]),
        ];
        let mesh = TriMesh::new(nodes.clone(), vec![[0, 1, 2], [0, 2, 3]]).unwrap();
        let field: Vec<[f64; 3]> = nodes.iter().map(|p| [-p[1], p[0], 0.0]).collect();

        for c in mesh.curl(&field).unwrap() {
            assert_relative_eq!(c[0], 0.0, epsilon = 1e-13);
            assert_relative_eq!(c[1], 0.0, epsilon = 1e-13);
            assert_relative_eq!(c[2], 2.0, max_relative = 1e-13);
        }
    }

    #[test]
    fn curl_requires_3d() {
        let mesh = unit_square();
        let field = vec![[0.0; 3]; 4];
        assert_eq!(
            mesh.curl(&field).unwrap_err(),
            MeshError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
    }
}
