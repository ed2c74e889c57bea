//! Flat-cell correction via mirrored isosceles decomposition.
//!
//! A *flat* cell is a triangle whose circumcenter falls outside it across one
//! edge, making the naive covolume-edge ratio on that edge negative. That is
//! mostly cosmetic, but it breaks consumers that rely on sign conditions:
//! Lloyd-style smoothing drags boundary apexes outward, and an FVM system
//! assembled with a negative covolume can lose definiteness.
//!
//! The repair mirrors the apex `p0` across the line through the flat edge
//! `p1–p2`, producing the ghost point `p0'` and the perpendicular foot `q`:
//!
//! ```text
//!         p0
//!         _^_
//!     ___/ | \___
//!    /____\|/____\
//!   p1     q      p2
//!          |
//!          v
//!         p0'
//! ```
//!
//! The two isosceles sub-triangles `(p1, p0, p0')` and `(p2, p0, p0')` are
//! covolume-decomposed with the general triangle formula; by symmetry the two
//! ratios sharing a mirrored leg must agree, which is asserted within a
//! relative tolerance of 1e-10; a violation means the flat cell is
//! numerically ill-formed and construction fails.
//!
//! The corrector never touches the mesh's shared state. Every quantity comes
//! out as additive `(node id, value)` contributions consumed by the
//! aggregation layer, plus the corrected per-cell ratio rows the mesh writes
//! back itself.

#![forbid(unsafe_code)]

use crate::core::mesh::MeshError;
use crate::core::topology::{CellId, NodeId};
use crate::geometry::kernel;
use crate::geometry::point::Point;

/// State for one corrected cell: the apex/base labeling, the mirror
/// intermediates, and the two covolume-edge ratio pairs.
#[derive(Clone, Debug)]
struct FlatCell<const D: usize> {
    /// Local index of the flat edge, which is also the local index of the
    /// opposite apex `p0`.
    flat_edge_local: usize,
    /// Global node ids `[p0, p1, p2]` (apex first, then the base in local
    /// order).
    nodes: [NodeId; 3],
    /// Coordinates of `[p0, p1, p2]`.
    p: [Point<D>; 3],
    /// Foot of the perpendicular from `p0` onto the base line.
    q: Point<D>,
    /// Squared length of the ghost edge `p0–p0'`.
    ghost_sq: f64,
    /// Ratios of the sub-triangle with apex `p1`:
    /// `[across the ghost edge, across p1's legs]`.
    ce1: [f64; 2],
    /// Ratios of the sub-triangle with apex `p2`, same layout.
    ce2: [f64; 2],
}

/// Corrections for the subset of cells flagged with one flat edge each.
///
/// Scope is exactly that subset; an empty subset yields empty contribution
/// sets.
#[derive(Clone, Debug)]
pub(crate) struct FlatCellCorrector<const D: usize> {
    cells: Vec<FlatCell<D>>,
}

impl<const D: usize> FlatCellCorrector<D> {
    /// Builds the corrector for `flagged` `(cell id, flat local edge)` pairs.
    ///
    /// # Errors
    ///
    /// [`MeshError::AsymmetricFlatCell`] if a cell's mirrored ratio pair
    /// disagrees beyond the relative tolerance.
    pub(crate) fn new(
        flagged: &[(CellId, usize)],
        cell_nodes: &[[NodeId; 3]],
        node_coords: &[Point<D>],
    ) -> Result<Self, MeshError> {
        let mut cells = Vec::with_capacity(flagged.len());
        for &(cell, flat_edge_local) in flagged {
            let row = cell_nodes[cell];
            // Edge k is opposite node k, so p0 is the apex across the flat
            // edge and p1, p2 follow in local order.
            let nodes = [
                row[flat_edge_local],
                row[(flat_edge_local + 1) % 3],
                row[(flat_edge_local + 2) % 3],
            ];
            let p = nodes.map(|n| node_coords[n]);

            let (ghost, q) = mirror_point(p[0], p[1], p[2]);
            let ce1 = isosceles_ce_ratios(p[1], p[0], ghost)
                .ok_or(MeshError::AsymmetricFlatCell { cell })?;
            let ce2 = isosceles_ce_ratios(p[2], p[0], ghost)
                .ok_or(MeshError::AsymmetricFlatCell { cell })?;

            cells.push(FlatCell {
                flat_edge_local,
                nodes,
                p,
                q,
                ghost_sq: kernel::norm_sq(ghost - p[0]),
                ce1,
                ce2,
            });
        }
        Ok(Self { cells })
    }

    /// Number of corrected cells.
    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    /// Corrected covolume-edge ratio row for the `i`-th corrected cell:
    /// zero on the flat edge, the mirror-derived halves on the other two.
    pub(crate) fn corrected_ce_ratios(&self, i: usize) -> [f64; 3] {
        let cell = &self.cells[i];
        let mut ratios = [0.0; 3];
        ratios[cell.flat_edge_local] = 0.0;
        ratios[(cell.flat_edge_local + 1) % 3] = cell.ce2[1];
        ratios[(cell.flat_edge_local + 2) % 3] = cell.ce1[1];
        ratios
    }

    /// Control-volume contributions.
    ///
    /// The apex keeps the two ghost-edge pieces plus one piece of each leg
    /// fan; `p1` and `p2` each keep the matching leg piece. The six pieces
    /// sum to the cell's true area.
    pub(crate) fn control_volumes(&self) -> Vec<(NodeId, f64)> {
        let mut out = Vec::with_capacity(6 * self.cells.len());
        for cell in &self.cells {
            let [p0, p1, p2] = cell.nodes;
            let (a, b, c, d) = cell.piece_areas();
            out.extend([(p0, a), (p0, b), (p0, c), (p1, c), (p0, d), (p2, d)]);
        }
        out
    }

    /// Surface-area contributions along the base edge.
    ///
    /// The base is apportioned as `p1–q1` to `p1`, `q1–q2` to `p0`, and
    /// `q2–p2` to `p2`, where `q1`, `q2` are the sub-triangle circumcenters
    /// on the base; the `p0` span is the two covolume lengths across the
    /// ghost edge.
    pub(crate) fn surface_areas(&self) -> Vec<(NodeId, f64)> {
        let mut out = Vec::with_capacity(4 * self.cells.len());
        for cell in &self.cells {
            let [p0, p1, p2] = cell.nodes;
            let ghost_len = cell.ghost_sq.sqrt();
            let cv1 = cell.ce1[0] * ghost_len;
            let cv2 = cell.ce2[0] * ghost_len;
            out.extend([
                (p0, cv1),
                (p0, cv2),
                (p1, cell.q.distance(&cell.p[1]) - cv1),
                (p2, cell.q.distance(&cell.p[2]) - cv2),
            ]);
        }
        out
    }

    /// Contributions of `∫ x` over the six atomic sub-triangles cornered by
    /// `p0`, the foot `q`, the base points `q1`/`q2`, the leg midpoints, and
    /// `p1`/`p2`. Each piece is its corner average times its area, which is
    /// exact for linear integrands.
    pub(crate) fn integral_x(&self) -> Vec<(NodeId, [f64; D])> {
        let mut out = Vec::with_capacity(6 * self.cells.len());
        for cell in &self.cells {
            let [p0, p1, p2] = cell.nodes;
            let [x0, x1, x2] = cell.p;
            let e0 = x2 - x1;
            let e1 = x0 - x2;
            let e2 = x1 - x0;

            // q1 = p1 + λ1 (p2 - p1) projects onto the midpoint of the leg
            // p0-p1, so λ1 = ½ ⟨e2,e2⟩ / ⟨e0,-e2⟩; q2 likewise from p2.
            let lambda1 = 0.5 * kernel::norm_sq(e2) / -kernel::dot(e0, e2);
            let lambda2 = 0.5 * kernel::norm_sq(e1) / -kernel::dot(e0, e1);
            let q1 = x1 + scale(x2 - x1, lambda1);
            let q2 = x2 + scale(x1 - x2, lambda2);

            let em1 = x0.midpoint(&x2);
            let em2 = x1.midpoint(&x0);

            let (a, b, c, d) = cell.piece_areas();
            out.extend([
                (p0, weighted_average(&[x0, cell.q, q1], a)),
                (p0, weighted_average(&[x0, cell.q, q2], b)),
                (p0, weighted_average(&[x0, q1, em2], c)),
                (p1, weighted_average(&[x1, q1, em2], c)),
                (p0, weighted_average(&[x0, q2, em1], d)),
                (p2, weighted_average(&[x2, q2, em1], d)),
            ]);
        }
        out
    }
}

impl<const D: usize> FlatCell<D> {
    /// Areas of the four distinct pieces: the two ghost-edge pieces `(a, b)`
    /// and the two leg pieces `(c, d)`; `c` and `d` each occur twice in the
    /// fan.
    fn piece_areas(&self) -> (f64, f64, f64, f64) {
        let [x0, x1, x2] = self.p;
        let a = 0.25 * self.ce1[0] * self.ghost_sq;
        let b = 0.25 * self.ce2[0] * self.ghost_sq;
        let c = 0.25 * self.ce1[1] * kernel::norm_sq(x1 - x0);
        let d = 0.25 * self.ce2[1] * kernel::norm_sq(x0 - x2);
        (a, b, c, d)
    }
}

/// Mirrors `p0` across the line through `p1` and `p2`.
///
/// Returns the mirrored point `p0'` and the perpendicular foot `q`, with
/// `q = p1 + (⟨p0-p1, p2-p1⟩ / ⟨p2-p1, p2-p1⟩)(p2-p1)` and `p0' = 2q - p0`.
fn mirror_point<const D: usize>(
    p0: Point<D>,
    p1: Point<D>,
    p2: Point<D>,
) -> (Point<D>, Point<D>) {
    let base = p2 - p1;
    let alpha = kernel::dot(p0 - p1, base) / kernel::norm_sq(base);
    let q = p1 + scale(base, alpha);
    let ghost = q + (q - p0);
    (ghost, q)
}

/// The two covolume-edge ratios of the isosceles triangle `(p0, p1, p2)`
/// whose legs `p0–p1` and `p0–p2` are equally long: the ratio across the
/// base `p1–p2` and the (symmetric) ratio across the legs.
///
/// Returns `None` if the two leg ratios disagree beyond the relative
/// tolerance, which flags a numerically ill-formed flat cell.
fn isosceles_ce_ratios<const D: usize>(
    p0: Point<D>,
    p1: Point<D>,
    p2: Point<D>,
) -> Option<[f64; 2]> {
    let e0 = p2 - p1;
    let e1 = p0 - p2;
    let e2 = p1 - p0;
    debug_assert!(
        (kernel::norm_sq(e2) - kernel::norm_sq(e1)).abs() <= 1.0e-12 * kernel::norm_sq(e1),
        "isosceles precondition violated"
    );

    let (_, ratios) = kernel::triangle_area_and_ce_ratios(kernel::shifted_edge_dots(&[e0, e1, e2]));

    let tolerance = 1.0e-10;
    if (ratios[1] - ratios[2]).abs() > tolerance * ratios[1].abs() {
        return None;
    }
    Some([ratios[0], ratios[1]])
}

fn scale<const D: usize>(v: [f64; D], s: f64) -> [f64; D] {
    v.map(|x| x * s)
}

fn weighted_average<const D: usize>(corners: &[Point<D>; 3], area: f64) -> [f64; D] {
    Point::barycenter(corners).coords().map(|x| x * area)
}
