// THEORY:
// A `Region` is the unit of addressing for the whole engine: the classifier
// predicts over a region, the orchestrator ships regions to workers, and the
// cache keys feature data by region.
//
// Key architectural principles:
// 1.  **Half-Open Boxes**: A region covers `[start, stop)` on each axis, which makes
//     adjacent tiles share a boundary without sharing a sample.
// 2.  **Late Resolution**: Edges may be unbounded (`-inf` start, `+inf` stop) until
//     the region is applied to a concrete data extent with `defined_with`.
// 3.  **Value Semantics**: Regions never change. Every combinator (`clamped`,
//     `enlarged`, `translated`) returns a new region, and equality/hash depend on
//     `(start, stop)` alone, so regions make stable cache keys.

use crate::core_modules::coordinate::{Axis, Coordinate};
use crate::core_modules::extent::Extent;
use crate::core_modules::tiling::{self, Tiles};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

#[derive(Deserialize)]
struct RawRegion {
    start: Coordinate,
    stop: Coordinate,
}

/// An axis-aligned, half-open box over (t, x, y, z, c).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRegion")]
pub struct Region {
    start: Coordinate,
    stop: Coordinate,
}

impl Region {
    /// The unbounded region. Resolve it with `defined_with` before use.
    pub fn all() -> Self {
        Self {
            start: Coordinate::ninf(),
            stop: Coordinate::inf(),
        }
    }

    pub fn from_start_stop(start: Coordinate, stop: Coordinate) -> Result<Self> {
        if !start.all_le(&stop) {
            return Err(Error::InvalidRegion(format!(
                "start ({start}) exceeds stop ({stop}) on some axis"
            )));
        }
        Ok(Self { start, stop })
    }

    /// Caller guarantees `start <= stop` on every axis.
    pub(crate) fn from_parts_unchecked(start: Coordinate, stop: Coordinate) -> Self {
        debug_assert!(start.all_le(&stop), "region start {start} exceeds stop {stop}");
        Self { start, stop }
    }

    pub fn start(&self) -> &Coordinate {
        &self.start
    }

    pub fn stop(&self) -> &Coordinate {
        &self.stop
    }

    /// True when no edge is left unbounded.
    pub fn is_defined(&self) -> bool {
        self.start.is_finite() && self.stop.is_finite()
    }

    /// Resolves unbounded edges: starts become 0, stops become the extent's size.
    pub fn defined_with(&self, extent: &Extent) -> Result<Self> {
        let start = self
            .start
            .map(|value| if value.is_finite() { value } else { 0.0 });
        let stop = self
            .stop
            .zip_with(extent.as_coordinate(), |value, size| {
                if value.is_finite() { value } else { size }
            });
        Self::from_start_stop(start, stop)
    }

    pub fn contains(&self, other: &Region) -> bool {
        self.start.all_le(&other.start) && self.stop.all_ge(&other.stop)
    }

    pub fn clamped(&self, minimum: &Coordinate, maximum: &Coordinate) -> Self {
        // Clamping is monotone, so `start <= stop` survives it.
        Self::from_parts_unchecked(
            self.start.clamped(minimum, maximum),
            self.stop.clamped(minimum, maximum),
        )
    }

    pub fn clamped_to(&self, bounds: &Region) -> Self {
        self.clamped(&bounds.start, &bounds.stop)
    }

    /// Grows the box by `radius` on both sides of every axis.
    pub fn enlarged(&self, radius: &Coordinate) -> Result<Self> {
        Self::from_start_stop(self.start - *radius, self.stop + *radius)
    }

    pub fn translated(&self, offset: &Coordinate) -> Self {
        Self::from_parts_unchecked(self.start + *offset, self.stop + *offset)
    }

    /// The overlap of two regions, if it holds at least one sample.
    pub fn intersection(&self, other: &Region) -> Option<Region> {
        let start = self.start.max(&other.start);
        let stop = self.stop.min(&other.stop);
        if start.all_lt(&stop) {
            Some(Self::from_parts_unchecked(start, stop))
        } else {
            None
        }
    }

    pub fn axis_span(&self, axis: Axis) -> f64 {
        self.stop.get(axis) - self.start.get(axis)
    }

    /// Fails for unresolved regions and for regions that are empty on some axis.
    pub fn shape(&self) -> Result<Extent> {
        if !self.is_defined() {
            return Err(Error::InvalidRegion(format!("{self} is not fully defined")));
        }
        Extent::from_coordinate(self.stop - self.start)
            .map_err(|err| Error::InvalidRegion(format!("{self} has no shape: {err}")))
    }

    /// Product of the spatial spans.
    pub fn volume(&self) -> f64 {
        Axis::SPATIAL.iter().map(|&axis| self.axis_span(axis)).product()
    }

    pub fn is_empty(&self) -> bool {
        Axis::ALL.iter().any(|&axis| self.axis_span(axis) <= 0.0)
    }

    /// Index ranges for array access, in (t, x, y, z, c) order. Bounds must be
    /// non-negative whole numbers.
    pub fn to_ranges(&self) -> Result<[Range<usize>; 5]> {
        let whole = |point: &Coordinate| point.to_array().iter().all(|value| value.fract() == 0.0);
        if !self.is_defined()
            || !self.start.all_ge(&Coordinate::zero())
            || !whole(&self.start)
            || !whole(&self.stop)
        {
            return Err(Error::InvalidRegion(format!(
                "{self} cannot be used as an array index"
            )));
        }
        Ok(Axis::ALL.map(|axis| self.start.get(axis) as usize..self.stop.get(axis) as usize))
    }

    /// Tiles that exactly cover this region, boundary tiles trimmed to fit.
    pub fn split(&self, tile: &Extent) -> Result<Tiles> {
        tiling::split(self, tile)
    }

    /// Grid-aligned tiles covering this region. See [`tiling::get_tiles`].
    pub fn get_tiles(&self, tile: &Extent) -> Result<Tiles> {
        tiling::get_tiles(self, tile)
    }

    /// Grid-aligned tiles covering this region, each clamped to `bounds`.
    pub fn get_tiles_within(
        &self,
        tile: &Extent,
        bounds: &Region,
    ) -> Result<impl Iterator<Item = Region> + use<>> {
        let bounds = *bounds;
        Ok(self
            .get_tiles(tile)?
            .map(move |candidate| candidate.clamped_to(&bounds))
            .filter(|candidate| !candidate.is_empty()))
    }
}

impl TryFrom<RawRegion> for Region {
    type Error = Error;

    fn try_from(raw: RawRegion) -> Result<Self> {
        Self::from_start_stop(raw.start, raw.stop)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {})", self.start, self.stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xy_region(x0: f64, x1: f64, y0: f64, y1: f64) -> Region {
        Region::from_start_stop(
            Coordinate::new(0.0, x0, y0, 0.0, 0.0),
            Coordinate::new(1.0, x1, y1, 1.0, 1.0),
        )
        .unwrap()
    }

    #[test]
    fn rejects_inverted_bounds() {
        let start = Coordinate::new(0.0, 5.0, 0.0, 0.0, 0.0);
        let stop = Coordinate::new(1.0, 4.0, 1.0, 1.0, 1.0);
        assert!(matches!(
            Region::from_start_stop(start, stop),
            Err(Error::InvalidRegion(_))
        ));
    }

    #[test]
    fn all_resolves_against_an_extent() {
        let region = Region::all();
        assert!(!region.is_defined());

        let extent = Extent::from_pairs(&[(Axis::X, 100.0), (Axis::Y, 200.0)]).unwrap();
        let defined = region.defined_with(&extent).unwrap();
        assert!(defined.is_defined());
        assert_eq!(*defined.start(), Coordinate::zero());
        assert_eq!(*defined.stop(), Coordinate::new(1.0, 100.0, 200.0, 1.0, 1.0));
        assert_eq!(defined.shape().unwrap(), extent);
        // The receiver is untouched.
        assert!(!region.is_defined());
    }

    #[test]
    fn defined_with_keeps_resolved_axes() {
        let partial = Region::from_start_stop(
            Coordinate::new(f64::NEG_INFINITY, 10.0, 0.0, 0.0, 0.0),
            Coordinate::new(f64::INFINITY, 20.0, f64::INFINITY, 1.0, f64::INFINITY),
        )
        .unwrap();
        let extent = Extent::new(3.0, 50.0, 60.0, 1.0, 2.0).unwrap();
        let defined = partial.defined_with(&extent).unwrap();
        assert_eq!(*defined.start(), Coordinate::new(0.0, 10.0, 0.0, 0.0, 0.0));
        assert_eq!(*defined.stop(), Coordinate::new(3.0, 20.0, 60.0, 1.0, 2.0));
    }

    #[test]
    fn contains_is_reflexive_and_transitive() {
        let outer = xy_region(0.0, 100.0, 0.0, 100.0);
        let middle = xy_region(10.0, 90.0, 10.0, 90.0);
        let inner = xy_region(20.0, 30.0, 40.0, 50.0);

        for region in [&outer, &middle, &inner] {
            assert!(region.contains(region));
        }
        assert!(outer.contains(&middle));
        assert!(middle.contains(&inner));
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));

        // Sticking out on a single axis is enough to fail.
        let sideways = xy_region(20.0, 95.0, 40.0, 50.0);
        assert!(!middle.contains(&sideways));
    }

    #[test]
    fn clamped_is_idempotent() {
        let region = xy_region(-10.0, 50.0, 5.0, 500.0);
        let minimum = Coordinate::zero();
        let maximum = Coordinate::new(1.0, 40.0, 100.0, 1.0, 1.0);
        let once = region.clamped(&minimum, &maximum);
        assert_eq!(once, xy_region(0.0, 40.0, 5.0, 100.0));
        assert_eq!(once.clamped(&minimum, &maximum), once);
    }

    #[test]
    fn enlarged_and_translated() {
        let region = xy_region(10.0, 20.0, 10.0, 20.0);
        let halo = Coordinate::new(0.0, 2.0, 3.0, 0.0, 0.0);
        assert_eq!(region.enlarged(&halo).unwrap(), xy_region(8.0, 22.0, 7.0, 23.0));

        let offset = Coordinate::new(0.0, -10.0, 5.0, 0.0, 0.0);
        assert_eq!(region.translated(&offset), xy_region(0.0, 10.0, 15.0, 25.0));

        let shrink = Coordinate::new(0.0, -6.0, 0.0, 0.0, 0.0);
        assert!(region.enlarged(&shrink).is_err());
    }

    #[test]
    fn intersection_requires_overlap() {
        let a = xy_region(0.0, 10.0, 0.0, 10.0);
        let b = xy_region(5.0, 15.0, 8.0, 20.0);
        assert_eq!(a.intersection(&b), Some(xy_region(5.0, 10.0, 8.0, 10.0)));
        let touching = xy_region(10.0, 12.0, 0.0, 10.0);
        assert_eq!(a.intersection(&touching), None);
    }

    #[test]
    fn shape_and_ranges() {
        let region = xy_region(2.0, 6.0, 3.0, 10.0);
        let shape = region.shape().unwrap();
        assert_eq!(shape.x(), 4.0);
        assert_eq!(shape.y(), 7.0);
        assert_eq!(region.volume(), 28.0);

        let ranges = region.to_ranges().unwrap();
        assert_eq!(ranges[Axis::X.index()], 2..6);
        assert_eq!(ranges[Axis::Y.index()], 3..10);
        assert!(Region::all().to_ranges().is_err());
        assert!(Region::all().shape().is_err());
    }

    #[test]
    fn fractional_bounds_are_not_indices() {
        assert!(matches!(
            xy_region(0.5, 4.0, 0.0, 4.0).to_ranges(),
            Err(Error::InvalidRegion(_))
        ));
        assert!(matches!(
            xy_region(0.0, 4.0, 0.0, 3.25).to_ranges(),
            Err(Error::InvalidRegion(_))
        ));
    }

    #[test]
    fn serde_round_trip_validates() {
        let region = xy_region(0.0, 4.0, 0.0, 4.0);
        let text = serde_json::to_string(&region).unwrap();
        let back: Region = serde_json::from_str(&text).unwrap();
        assert_eq!(back, region);

        let unbounded = serde_json::to_string(&Region::all()).unwrap();
        assert_eq!(serde_json::from_str::<Region>(&unbounded).unwrap(), Region::all());

        let open_time =
            Region::from_start_stop(Coordinate::zero(), Coordinate::inf().with_axis(Axis::T, 1.0))
                .unwrap();
        let text = serde_json::to_string(&open_time).unwrap();
        assert_eq!(serde_json::from_str::<Region>(&text).unwrap(), open_time);

        let inverted = r#"{"start":[0,5,0,0,0],"stop":[1,1,1,1,1]}"#;
        assert!(serde_json::from_str::<Region>(inverted).is_err());
    }
}
