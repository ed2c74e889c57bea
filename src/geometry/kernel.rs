//! Stateless geometry kernel.
//!
//! Pure vector math consumed by the mesh layer: row-wise dot products,
//! per-triangle area and covolume-edge ratios from the pairwise dot products
//! of the half-edge vectors, circumcenters, the 2D signed triangle area, and
//! the 3D cross product.
//!
//! ## Conventions
//!
//! A triangle's half-edge `k` is the edge opposite local node `k`, directed
//! from node `k+1` to node `k+2` (indices mod 3). The pairwise dot products
//! are cyclically shifted so that entry `i` pairs the two half-edges
//! *adjacent* to local edge `i`: `d[i] = e_{i+1} · e_{i+2}`. With that
//! convention and `e_0 + e_1 + e_2 = 0`,
//!
//! - the triangle area is `0.5 · sqrt(d0·d1 + d1·d2 + d2·d0)`, and
//! - the covolume-edge ratio across edge `i` is `−d[i] / (4 · area)`, i.e.
//!   half the cotangent of the angle opposite edge `i`. It is negative
//!   exactly when the circumcenter falls outside the triangle across edge
//!   `i` (obtuse angle at the opposite vertex).

#![forbid(unsafe_code)]

use crate::geometry::point::Point;

/// Row-wise dot product of two vectors.
#[inline]
#[must_use]
pub fn dot<const D: usize>(a: [f64; D], b: [f64; D]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Squared Euclidean norm of a vector.
#[inline]
#[must_use]
pub fn norm_sq<const D: usize>(v: [f64; D]) -> f64 {
    dot(v, v)
}

/// Triangle area and the three covolume-edge ratios, from the cyclically
/// shifted pairwise dot products of the half-edge vectors.
///
/// Degenerate (zero-area) input produces non-finite ratios; callers that
/// cannot tolerate that must screen their input.
///
/// # Examples
///
/// ```rust
/// use covolume::geometry::kernel::triangle_area_and_ce_ratios;
///
/// // Right isosceles triangle (0,0), (1,0), (0,1):
/// // e0 = (-1,1), e1 = (0,-1), e2 = (1,0).
/// let (area, ratios) = triangle_area_and_ce_ratios([0.0, -1.0, -1.0]);
/// assert!((area - 0.5).abs() < 1e-15);
/// // The ratio across the hypotenuse vanishes (circumcenter on the edge).
/// assert!(ratios[0].abs() < 1e-15);
/// assert!((ratios[1] - 0.5).abs() < 1e-15);
/// assert!((ratios[2] - 0.5).abs() < 1e-15);
/// ```
#[must_use]
pub fn triangle_area_and_ce_ratios(ei_dot_ej: [f64; 3]) -> (f64, [f64; 3]) {
    let [d0, d1, d2] = ei_dot_ej;
    let area = 0.5 * (d0 * d1 + d1 * d2 + d2 * d0).sqrt();
    let scale = -0.25 / area;
    (area, [d0 * scale, d1 * scale, d2 * scale])
}

/// Triangle circumcenter from the corner coordinates, the squared half-edge
/// lengths, and the pairwise dot products.
///
/// `corners[i]` is the corner *opposite* half-edge `i`. The circumcenter is
/// the barycentric combination with weights `|e_i|² · d[i]` (normalized), so
/// no linear solve is required; the formula is valid in any ambient
/// dimension.
#[must_use]
pub fn circumcenter<const D: usize>(
    corners: [Point<D>; 3],
    ei_dot_ei: [f64; 3],
    ei_dot_ej: [f64; 3],
) -> Point<D> {
    let alpha = [
        ei_dot_ei[0] * ei_dot_ej[0],
        ei_dot_ei[1] * ei_dot_ej[1],
        ei_dot_ei[2] * ei_dot_ej[2],
    ];
    let sum: f64 = alpha.iter().sum();

    let mut coords = [0.0; D];
    for (corner, a) in corners.iter().zip(alpha) {
        let beta = a / sum;
        for (c, x) in coords.iter_mut().zip(corner.coords()) {
            *c += beta * x;
        }
    }
    Point::new(coords)
}

/// Signed area of a 2D triangle (positive for counterclockwise node order).
#[must_use]
pub fn signed_triangle_area(p: [[f64; 2]; 3]) -> f64 {
    let [[x0, y0], [x1, y1], [x2, y2]] = p;
    0.5 * (x2 * (y0 - y1) + x0 * (y1 - y2) + x1 * (y2 - y0))
}

/// Cross product of two 3D vectors.
#[inline]
#[must_use]
pub fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Pairwise dot products of a triangle's half-edge vectors, cyclically
/// shifted so that entry `i` pairs the half-edges adjacent to edge `i`.
#[inline]
#[must_use]
pub fn shifted_edge_dots<const D: usize>(e: &[[f64; D]; 3]) -> [f64; 3] {
    [dot(e[1], e[2]), dot(e[2], e[0]), dot(e[0], e[1])]
}
