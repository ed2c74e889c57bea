//! # covolume
//!
//! Triangular surface/volume meshes together with the derived geometric
//! quantities needed by finite-volume discretizations: per-triangle
//! covolume-edge ratios, control volumes (Voronoi-like node areas),
//! control-volume centroids, boundary surface areas, and circumcenters.
//!
//! # Features
//!
//! - Dense, index-addressed mesh model: nodes, triangle cells, and derived
//!   edges with the opposite-node convention (local edge `k` faces local
//!   node `k`)
//! - Lazily computed, mutation-invalidated derived quantities behind a small
//!   valid/stale memoization wrapper
//! - Flat-cell correction: obtuse cells whose covolume-edge ratio would be
//!   negative are repaired through a mirrored isosceles decomposition
//! - Delaunay edge flipping: local topology surgery that removes interior
//!   edges with negative aggregated ratios and incrementally patches the
//!   affected caches
//! - Cell quality queries (inradius, circumradius, `2·r_in/r_out`, interior
//!   angles) and boundary aggregation helpers
//!
//! # Basic Usage
//!
//! ```rust
//! use covolume::prelude::*;
//!
//! // Unit square split along the 0-2 diagonal.
//! let nodes = vec![
//!     Point::new([0.0, 0.0]),
//!     Point::new([1.0, 0.0]),
//!     Point::new([1.0, 1.0]),
//!     Point::new([0.0, 1.0]),
//! ];
//! let mut mesh = TriMesh::new(nodes, vec![[0, 1, 2], [0, 2, 3]]).unwrap();
//!
//! // Control volumes partition the total area.
//! let total: f64 = mesh.control_volumes().iter().sum();
//! assert!((total - 1.0).abs() < 1e-14);
//!
//! // The mesh is Delaunay: no interior edge aggregates a negative
//! // covolume-edge ratio.
//! assert_eq!(mesh.num_delaunay_violations().unwrap(), 0);
//! ```
//!
//! # Repairing a non-Delaunay mesh
//!
//! ```rust
//! use covolume::prelude::*;
//!
//! let nodes = vec![
//!     Point::new([0.0, 0.0]),
//!     Point::new([1.0, 0.0]),
//!     Point::new([1.0, 1.0]),
//!     Point::new([0.0, 1.2]),
//! ];
//! // The wrong diagonal: the obtuse pair makes the shared edge a Delaunay
//! // violation.
//! let mut mesh = TriMesh::new(nodes, vec![[0, 1, 3], [1, 2, 3]]).unwrap();
//! assert_eq!(mesh.num_delaunay_violations().unwrap(), 1);
//!
//! mesh.flip_until_delaunay().unwrap();
//! assert_eq!(mesh.num_delaunay_violations().unwrap(), 0);
//! ```

#![forbid(unsafe_code)]

/// Mesh data structures and algorithms: the mesh type with its cached
/// quantities, edge topology, flat-cell correction, and edge flipping.
pub mod core {
    pub(crate) mod cache;
    pub(crate) mod correction;
    /// Delaunay edge flipping.
    pub mod flips;
    /// The mesh type and its derived quantities.
    pub mod mesh;
    /// Edge topology derived from the cell table.
    pub mod topology;
    /// Scatter-accumulation and row-deduplication primitives.
    pub mod util;

    pub use flips::*;
    pub use mesh::*;
    pub use topology::*;
}

/// Geometric types and the stateless kernel: points, triangle measures,
/// circumcenters, and cell-quality metrics.
pub mod geometry {
    /// The stateless geometry kernel.
    pub mod kernel;
    /// Coordinate points.
    pub mod point;
    /// Cell-quality measures.
    pub mod quality;

    pub use kernel::*;
    pub use point::*;
    pub use quality::*;
}

/// Re-exports of the commonly used types.
pub mod prelude {
    pub use crate::core::flips::{FlipError, MAX_FLIP_PASSES};
    pub use crate::core::mesh::{CorrectionMode, MeshError, MeshOptions, TriMesh};
    pub use crate::core::topology::{CellId, EdgeCells, EdgeId, NodeId, Topology, TopologyError};
    pub use crate::core::util::{scatter_add, scatter_add_vec, unique_rows};
    pub use crate::geometry::kernel::{
        circumcenter, cross, dot, norm_sq, shifted_edge_dots, signed_triangle_area,
        triangle_area_and_ce_ratios,
    };
    pub use crate::geometry::point::Point;
    pub use crate::geometry::quality::{cell_quality, circumradius, inradius, interior_angles};
}
