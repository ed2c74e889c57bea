//! Geometric quality measures for triangle cells.
//!
//! All measures are derived from the squared half-edge lengths (and, for the
//! angles, the pairwise dot products), so they can be evaluated directly from
//! the mesh's cached per-cell arrays without touching coordinates:
//!
//! - **inradius** `= 2·area / (a + b + c)`
//! - **circumradius** `= abc / sqrt((a+b+c)(−a+b+c)(a−b+c)(a+b−c))`
//! - **quality** `= 2·r_in / r_out`, which is 1 for an equilateral triangle
//!   and approaches 0 for degenerate (sliver) cells
//! - **interior angles** from the negated normalized dot products of the
//!   adjacent half-edges

#![forbid(unsafe_code)]

/// Inradius of a triangle with the given area and squared edge lengths.
#[must_use]
pub fn inradius(area: f64, ei_dot_ei: [f64; 3]) -> f64 {
    let perimeter: f64 = ei_dot_ei.iter().map(|s| s.sqrt()).sum();
    2.0 * area / perimeter
}

/// Circumradius of a triangle with the given squared edge lengths.
#[must_use]
pub fn circumradius(ei_dot_ei: [f64; 3]) -> f64 {
    let [a, b, c] = ei_dot_ei.map(f64::sqrt);
    (a * b * c) / ((a + b + c) * (-a + b + c) * (a - b + c) * (a + b - c)).sqrt()
}

/// Cell quality `2·r_in / r_out` in `(0, 1]`, from the squared edge lengths.
///
/// Expanding both radii cancels the area:
/// `q = (−a+b+c)(a−b+c)(a+b−c) / (abc)`.
#[must_use]
pub fn cell_quality(ei_dot_ei: [f64; 3]) -> f64 {
    let [a, b, c] = ei_dot_ei.map(f64::sqrt);
    (-a + b + c) * (a - b + c) * (a + b - c) / (a * b * c)
}

/// The three interior angles, in radians.
///
/// Angle `i` sits at local node `i`, between the two half-edges adjacent to
/// edge `i`; its cosine is the negated normalized dot product `d[i]`.
#[must_use]
pub fn interior_angles(ei_dot_ei: [f64; 3], ei_dot_ej: [f64; 3]) -> [f64; 3] {
    let norms = ei_dot_ei.map(f64::sqrt);
    [
        (-ei_dot_ej[0] / (norms[1] * norms[2])).acos(),
        (-ei_dot_ej[1] / (norms[2] * norms[0])).acos(),
        (-ei_dot_ej[2] / (norms[0] * norms[1])).acos(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn equilateral_triangle_is_optimal() {
        let sq = [1.0, 1.0, 1.0];
        let area = 3.0_f64.sqrt() / 4.0;

        assert_relative_eq!(inradius(area, sq), 0.5 / 3.0_f64.sqrt(), max_relative = 1e-14);
        assert_relative_eq!(circumradius(sq), 1.0 / 3.0_f64.sqrt(), max_relative = 1e-14);
        assert_relative_eq!(circumradius(sq) / inradius(area, sq), 2.0, max_relative = 1e-13);
        assert_relative_eq!(cell_quality(sq), 1.0, max_relative = 1e-14);
    }

    #[test]
    fn right_triangle_radii() {
        // Legs 3 and 4, hypotenuse 5: r_in = 1, r_out = 2.5.
        let sq = [25.0, 16.0, 9.0];
        let area = 6.0;

        assert_relative_eq!(inradius(area, sq), 1.0, max_relative = 1e-14);
        assert_relative_eq!(circumradius(sq), 2.5, max_relative = 1e-14);
        assert_relative_eq!(cell_quality(sq), 0.8, max_relative = 1e-14);
    }

    #[test]
    fn angles_of_a_right_isosceles_triangle() {
        // (0,0), (1,0), (0,1): e0 = (-1,1), e1 = (0,-1), e2 = (1,0).
        let sq = [2.0, 1.0, 1.0];
        let dots = [0.0, -1.0, -1.0];
        let angles = interior_angles(sq, dots);

        assert_relative_eq!(angles[0], FRAC_PI_2, max_relative = 1e-14);
        assert_relative_eq!(angles[1], FRAC_PI_2 / 2.0, max_relative = 1e-14);
        assert_relative_eq!(angles[2], FRAC_PI_2 / 2.0, max_relative = 1e-14);
        assert_relative_eq!(angles.iter().sum::<f64>(), std::f64::consts::PI, max_relative = 1e-14);
    }

    #[test]
    fn sliver_quality_degrades() {
        // Nearly collinear: sides ~1, ~1, ~2.
        let sq = [4.0, 1.02, 1.02];
        assert!(cell_quality(sq) < 0.1);
    }
}
