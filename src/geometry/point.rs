//! Coordinate points for 2D and 3D meshes.
//!
//! A [`Point`] is a thin wrapper around a `[f64; D]` coordinate array. The
//! ambient dimension is a const generic so the same mesh code serves planar
//! meshes (`D = 2`) and surface meshes embedded in space (`D = 3`). Vector
//! values (edge directions, displacements) are plain `[f64; D]` arrays;
//! subtracting two points yields one, and adding one to a point translates it.

#![forbid(unsafe_code)]

use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Index, Sub};

/// A point in `D`-dimensional space.
///
/// # Examples
///
/// ```rust
/// use covolume::geometry::point::Point;
///
/// let a = Point::new([0.0, 0.0]);
/// let b = Point::new([3.0, 4.0]);
///
/// let v = b - a;
/// assert_eq!(v, [3.0, 4.0]);
/// assert_eq!(a + v, b);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point<const D: usize> {
    coords: [f64; D],
}

// Derived `Default` would demand `[f64; D]: Default`, which the standard
// library only provides for fixed small sizes.
impl<const D: usize> Default for Point<D> {
    fn default() -> Self {
        Self::origin()
    }
}

impl<const D: usize> Point<D> {
    /// Creates a point from its coordinate array.
    #[inline]
    #[must_use]
    pub const fn new(coords: [f64; D]) -> Self {
        Self { coords }
    }

    /// The origin.
    #[inline]
    #[must_use]
    pub const fn origin() -> Self {
        Self { coords: [0.0; D] }
    }

    /// Returns the coordinate array.
    #[inline]
    #[must_use]
    pub const fn coords(&self) -> [f64; D] {
        self.coords
    }

    /// Returns `true` if every coordinate is finite.
    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.coords.iter().all(|c| c.is_finite())
    }

    /// The midpoint of `self` and `other`.
    #[must_use]
    pub fn midpoint(&self, other: &Self) -> Self {
        let mut coords = [0.0; D];
        for (c, (a, b)) in coords.iter_mut().zip(self.coords.iter().zip(other.coords)) {
            *c = 0.5 * (a + b);
        }
        Self { coords }
    }

    /// The Euclidean distance to `other`.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        let v = *other - *self;
        v.iter().map(|c| c * c).sum::<f64>().sqrt()
    }

    /// The uniformly weighted average of `points`.
    ///
    /// Used for triangle barycenters and for the corner averages of the
    /// atomic sub-triangles in the integral-of-position computations.
    #[must_use]
    pub fn barycenter(points: &[Self]) -> Self {
        let mut coords = [0.0; D];
        for p in points {
            for (c, x) in coords.iter_mut().zip(p.coords) {
                *c += x;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let inv = 1.0 / points.len() as f64;
        for c in &mut coords {
            *c *= inv;
        }
        Self { coords }
    }
}

impl<const D: usize> From<[f64; D]> for Point<D> {
    #[inline]
    fn from(coords: [f64; D]) -> Self {
        Self { coords }
    }
}

impl<const D: usize> Index<usize> for Point<D> {
    type Output = f64;

    #[inline]
    fn index(&self, index: usize) -> &f64 {
        &self.coords[index]
    }
}

impl<const D: usize> Sub for Point<D> {
    type Output = [f64; D];

    /// The displacement vector from `rhs` to `self`.
    fn sub(self, rhs: Self) -> [f64; D] {
        let mut v = [0.0; D];
        for (c, (a, b)) in v.iter_mut().zip(self.coords.iter().zip(rhs.coords)) {
            *c = a - b;
        }
        v
    }
}

impl<const D: usize> Add<[f64; D]> for Point<D> {
    type Output = Self;

    fn add(self, rhs: [f64; D]) -> Self {
        let mut coords = self.coords;
        for (c, v) in coords.iter_mut().zip(rhs) {
            *c += v;
        }
        Self { coords }
    }
}

// Serde provides no impls for generic `[f64; D]` fields, so points are
// (de)serialized by hand as fixed-length sequences.
impl<const D: usize> Serialize for Point<D> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(D))?;
        for c in &self.coords {
            seq.serialize_element(c)?;
        }
        seq.end()
    }
}

impl<'de, const D: usize> Deserialize<'de> for Point<D> {
    fn deserialize<De: Deserializer<'de>>(deserializer: De) -> Result<Self, De::Error> {
        struct CoordVisitor<const D: usize>;

        impl<'de, const D: usize> Visitor<'de> for CoordVisitor<D> {
            type Value = Point<D>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a sequence of {D} coordinates")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Point<D>, A::Error> {
                let mut coords = [0.0; D];
                for (i, c) in coords.iter_mut().enumerate() {
                    *c = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                if seq.next_element::<f64>()?.is_some() {
                    return Err(serde::de::Error::invalid_length(D + 1, &self));
                }
                Ok(Point::new(coords))
            }
        }

        deserializer.deserialize_seq(CoordVisitor::<D>)
    }
}
