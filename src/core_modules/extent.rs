// THEORY:
// An `Extent` is a size, never an offset. It wraps a `Coordinate` and refuses to
// exist unless every component is finite and at least 1, so code that receives an
// `Extent` can divide by it, step by it and multiply it without re-checking.

use crate::core_modules::coordinate::{Axis, Coordinate};
use crate::core_modules::region::Region;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How many of the spatial axes (x, y, z) are wider than a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialKind {
    Point,
    Line,
    Flat,
    Volume,
}

/// A size over the five axes. Every component is finite and >= 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Coordinate", into = "Coordinate")]
pub struct Extent {
    size: Coordinate,
}

impl Extent {
    pub fn new(t: f64, x: f64, y: f64, z: f64, c: f64) -> Result<Self> {
        Self::from_coordinate(Coordinate::new(t, x, y, z, c))
    }

    /// Builds an extent from `(axis, size)` pairs; unnamed axes default to 1.
    pub fn from_pairs(pairs: &[(Axis, f64)]) -> Result<Self> {
        Self::from_coordinate(Coordinate::from_pairs(pairs, 1.0))
    }

    pub fn from_coordinate(size: Coordinate) -> Result<Self> {
        for axis in Axis::ALL {
            let value = size.get(axis);
            if !value.is_finite() || value < 1.0 {
                return Err(Error::InvalidExtent(format!(
                    "axis {} must be finite and >= 1, got {value} in ({size})",
                    axis.label()
                )));
            }
        }
        Ok(Self { size })
    }

    /// The `2r + 1` window around a voxel for per-axis radii `r`. Always valid.
    pub fn window(radius: &[usize; 5]) -> Extent {
        let [t, x, y, z, c] = radius.map(|r| (2 * r + 1) as f64);
        Self {
            size: Coordinate::new(t, x, y, z, c),
        }
    }

    /// Returns a copy with one axis resized.
    pub fn with_axis(&self, axis: Axis, value: f64) -> Result<Self> {
        Self::from_coordinate(self.size.with_axis(axis, value))
    }

    pub fn as_coordinate(&self) -> &Coordinate {
        &self.size
    }

    pub fn get(&self, axis: Axis) -> f64 {
        self.size.get(axis)
    }

    pub fn t(&self) -> f64 {
        self.size.t()
    }

    pub fn x(&self) -> f64 {
        self.size.x()
    }

    pub fn y(&self) -> f64 {
        self.size.y()
    }

    pub fn z(&self) -> f64 {
        self.size.z()
    }

    pub fn c(&self) -> f64 {
        self.size.c()
    }

    /// Elementwise maximum of two extents.
    pub fn max(&self, other: &Extent) -> Extent {
        Self {
            size: self.size.max(&other.size),
        }
    }

    /// Product of the spatial axes.
    pub fn volume(&self) -> f64 {
        self.x() * self.y() * self.z()
    }

    pub fn spatial_kind(&self) -> SpatialKind {
        let wide_axes = Axis::SPATIAL
            .iter()
            .filter(|&&axis| self.get(axis) > 1.0)
            .count();
        match wide_axes {
            0 => SpatialKind::Point,
            1 => SpatialKind::Line,
            2 => SpatialKind::Flat,
            _ => SpatialKind::Volume,
        }
    }

    pub fn is_line(&self) -> bool {
        self.spatial_kind() == SpatialKind::Line
    }

    pub fn is_flat(&self) -> bool {
        self.spatial_kind() == SpatialKind::Flat
    }

    pub fn is_volume(&self) -> bool {
        self.spatial_kind() == SpatialKind::Volume
    }

    /// The region of this size whose first corner is `start`.
    pub fn to_region(&self, start: Coordinate) -> Region {
        Region::from_parts_unchecked(start, start + self.size)
    }
}

impl Default for Extent {
    fn default() -> Self {
        Self {
            size: Coordinate::one(),
        }
    }
}

impl TryFrom<Coordinate> for Extent {
    type Error = Error;

    fn try_from(size: Coordinate) -> Result<Self> {
        Self::from_coordinate(size)
    }
}

impl From<Extent> for Coordinate {
    fn from(extent: Extent) -> Coordinate {
        extent.size
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Extent({})", self.size)
    }
}
