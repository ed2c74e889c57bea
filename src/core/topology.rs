//! Edge topology derived from the cell table.
//!
//! Cells are handed to the mesh as node triples; everything else is derived
//! here by deduplicating the cell-boundary segments: the unique edge table,
//! the cell→edge table, boundary flags, and the edge→cell adjacency.
//!
//! ## Index conventions
//!
//! Nodes, cells, and edges are addressed by dense integer ids (positions in
//! their respective tables). Within a cell, local edge `k` is the edge
//! opposite local node `k`; the cell→edge table is aligned with that
//! convention. Edge ids are assigned in ascending lexicographic order of the
//! (sorted) endpoint pairs at build time; edge flips later rewrite endpoint
//! pairs in place without renumbering.
//!
//! An edge with exactly one adjacent cell is a boundary edge; two adjacent
//! cells make an interior edge. Any other adjacency count means the cell
//! table is non-manifold (or lists a cell twice) and is rejected outright.

#![forbid(unsafe_code)]

use crate::core::util::unique_rows;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

/// Dense node index.
pub type NodeId = usize;
/// Dense cell index.
pub type CellId = usize;
/// Dense edge index.
pub type EdgeId = usize;

/// Errors detected while deriving the edge topology.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TopologyError {
    /// An edge is shared by more than two cells. This indicates a
    /// non-manifold cell table or a duplicated cell and is not recoverable.
    #[error("edge {nodes:?} has {count} adjacent cells (at most 2 allowed)")]
    NonManifoldEdge {
        /// The endpoints of the offending edge.
        nodes: [NodeId; 2],
        /// How many cells contained the edge.
        count: usize,
    },
}

/// The cells adjacent to an edge: one for boundary edges, two for interior
/// edges. Degree 0 and degree ≥ 3 cannot occur in a built [`Topology`].
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum EdgeCells {
    /// A boundary edge and its single adjacent cell.
    Boundary(CellId),
    /// An interior edge and its two adjacent cells, in ascending id order at
    /// build time.
    Interior([CellId; 2]),
}

impl EdgeCells {
    /// The adjacent cells as a slice (length 1 or 2).
    #[must_use]
    pub fn as_slice(&self) -> &[CellId] {
        match self {
            Self::Boundary(cell) => std::slice::from_ref(cell),
            Self::Interior(cells) => cells,
        }
    }

    /// Whether this is a boundary adjacency.
    #[must_use]
    pub const fn is_boundary(&self) -> bool {
        matches!(self, Self::Boundary(_))
    }

    /// Replaces the slot holding `old` with `new`.
    ///
    /// Returns `false` if no slot holds `old`; the edge-flip engine treats
    /// that as a bookkeeping bug.
    pub(crate) fn reassign(&mut self, old: CellId, new: CellId) -> bool {
        match self {
            Self::Boundary(cell) if *cell == old => {
                *cell = new;
                true
            }
            Self::Interior(cells) => match cells.iter_mut().find(|c| **c == old) {
                Some(cell) => {
                    *cell = new;
                    true
                }
                None => false,
            },
            Self::Boundary(_) => false,
        }
    }
}

/// Edge table, cell→edge table, and edge→cell adjacency for a cell table.
///
/// Built lazily by the mesh on first need and then kept current: edge flips
/// rewrite entries in place, all other mutations leave the topology untouched
/// (coordinate updates) or are not permitted.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Topology {
    /// Endpoint pair per edge, each pair sorted ascending.
    pub(crate) edge_nodes: Vec<[NodeId; 2]>,
    /// Three edge ids per cell, index-aligned with the opposite-node
    /// convention (entry `k` is the edge opposite local node `k`).
    pub(crate) cell_edges: Vec<[EdgeId; 3]>,
    /// Adjacent cells per edge.
    pub(crate) edge_cells: Vec<EdgeCells>,
    /// Ids of boundary edges, ascending.
    pub(crate) boundary_edges: Vec<EdgeId>,
    /// Ids of interior edges, ascending.
    pub(crate) interior_edges: Vec<EdgeId>,
}

impl Topology {
    /// Derives the edge topology from a cell table.
    ///
    /// # Errors
    ///
    /// [`TopologyError::NonManifoldEdge`] if any edge would have three or
    /// more adjacent cells.
    pub fn build(cell_nodes: &[[NodeId; 3]]) -> Result<Self, TopologyError> {
        let mut segments = Vec::with_capacity(3 * cell_nodes.len());
        for nodes in cell_nodes {
            for k in 0..3 {
                let a = nodes[(k + 1) % 3];
                let b = nodes[(k + 2) % 3];
                segments.push(if a <= b { [a, b] } else { [b, a] });
            }
        }

        let (edge_nodes, inverse, counts) = unique_rows(&segments);

        if let Some(edge) = counts.iter().position(|&c| c > 2) {
            return Err(TopologyError::NonManifoldEdge {
                nodes: edge_nodes[edge],
                count: counts[edge],
            });
        }

        let cell_edges: Vec<[EdgeId; 3]> = inverse
            .chunks_exact(3)
            .map(|chunk| [chunk[0], chunk[1], chunk[2]])
            .collect();

        let mut adjacent: Vec<SmallVec<[CellId; 2]>> = vec![SmallVec::new(); edge_nodes.len()];
        for (cell, edges) in cell_edges.iter().enumerate() {
            for &edge in edges {
                adjacent[edge].push(cell);
            }
        }
        let edge_cells: Vec<EdgeCells> = adjacent
            .into_iter()
            .map(|cells| match cells.as_slice() {
                &[cell] => EdgeCells::Boundary(cell),
                &[c0, c1] => EdgeCells::Interior([c0, c1]),
                // counts were screened above; 0 cannot occur for an edge that
                // exists at all
                other => unreachable!("edge with {} adjacent cells", other.len()),
            })
            .collect();

        let boundary_edges = edge_cells
            .iter()
            .enumerate()
            .filter_map(|(e, c)| c.is_boundary().then_some(e))
            .collect();
        let interior_edges = edge_cells
            .iter()
            .enumerate()
            .filter_map(|(e, c)| (!c.is_boundary()).then_some(e))
            .collect();

        Ok(Self {
            edge_nodes,
            cell_edges,
            edge_cells,
            boundary_edges,
            interior_edges,
        })
    }

    /// Number of edges.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edge_nodes.len()
    }

    /// The endpoint pair of an edge, sorted ascending.
    #[must_use]
    pub fn edge_nodes(&self, edge: EdgeId) -> [NodeId; 2] {
        self.edge_nodes[edge]
    }

    /// The three edge ids of a cell, entry `k` opposite local node `k`.
    #[must_use]
    pub fn cell_edges(&self, cell: CellId) -> [EdgeId; 3] {
        self.cell_edges[cell]
    }

    /// The cells adjacent to an edge.
    #[must_use]
    pub fn edge_cells(&self, edge: EdgeId) -> &EdgeCells {
        &self.edge_cells[edge]
    }

    /// Whether an edge lies on the boundary (exactly one adjacent cell).
    #[must_use]
    pub fn is_boundary_edge(&self, edge: EdgeId) -> bool {
        self.edge_cells[edge].is_boundary()
    }

    /// Whether local edge `k` of `cell` lies on the boundary.
    #[must_use]
    pub fn is_boundary_half_edge(&self, cell: CellId, k: usize) -> bool {
        self.is_boundary_edge(self.cell_edges[cell][k])
    }

    /// Ids of all boundary edges, ascending.
    #[must_use]
    pub fn boundary_edges(&self) -> &[EdgeId] {
        &self.boundary_edges
    }

    /// Ids of all interior edges, ascending.
    #[must_use]
    pub fn interior_edges(&self) -> &[EdgeId] {
        &self.interior_edges
    }

    /// Position of an interior edge within [`interior_edges`], or `None` for
    /// boundary edges.
    ///
    /// Interior/boundary status never changes after the build (only interior
    /// edges are flipped), so the ascending id lists stay binary-searchable.
    ///
    /// [`interior_edges`]: Topology::interior_edges
    #[must_use]
    pub fn interior_index(&self, edge: EdgeId) -> Option<usize> {
        self.interior_edges.binary_search(&edge).ok()
    }

    /// The local index of `edge` within `cell`, or `None` if the cell does
    /// not contain it.
    #[must_use]
    pub fn local_edge_index(&self, cell: CellId, edge: EdgeId) -> Option<usize> {
        self.cell_edges[cell].iter().position(|&e| e == edge)
    }
}
