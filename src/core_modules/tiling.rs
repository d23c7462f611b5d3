// THEORY:
// Tiling turns one large region into a grid of smaller ones, over all five axes and
// for regions that need not start at the origin.
//
// Key architectural principles:
// 1.  **Per-Axis Steps**: Each axis has `ceil(span / tile)` tile starts
//     (`start, start + tile, ...`, strictly below `stop`). Only the counts are
//     stored; the grid is their Cartesian product, and a grid too large to count
//     is rejected up front.
// 2.  **Canonical Order**: The product is walked like an odometer over
//     (t, x, y, z, c), with the channel axis turning fastest.
// 3.  **Laziness**: `Tiles` yields one region at a time, so splitting a huge
//     volume into millions of tiles costs nothing until they are consumed.
// 4.  **Alignment**: `get_tiles` snaps the region outward to the tile grid first,
//     so overlapping requests map onto the very same tiles (and cache keys).

use crate::core_modules::coordinate::{Axis, Coordinate};
use crate::core_modules::extent::Extent;
use crate::core_modules::region::Region;
use crate::error::{Error, Result};

/// Lazy iterator over the tiles of a region.
#[derive(Debug, Clone)]
pub struct Tiles {
    /// Start of the first tile on every axis.
    origin: Coordinate,
    /// Number of tile starts on every axis, in canonical axis order.
    counts: [usize; 5],
    /// Odometer position; the start on an axis is `origin + index * tile`.
    cursor: [usize; 5],
    remaining: usize,
    tile: Coordinate,
    /// Tile stops are clamped to this.
    limit: Coordinate,
}

impl Tiles {
    fn new(region: &Region, tile: &Extent) -> Result<Self> {
        let mut counts = [0usize; 5];
        for axis in Axis::ALL {
            let span = region.axis_span(axis);
            let steps = (span / tile.get(axis)).ceil();
            if steps > 0.0 {
                if steps >= usize::MAX as f64 {
                    return Err(Error::InvalidRegion(format!(
                        "{region} holds too many tiles of {tile} along {}",
                        axis.label()
                    )));
                }
                counts[axis.index()] = steps as usize;
            }
        }
        let remaining = counts
            .iter()
            .try_fold(1usize, |total, &count| total.checked_mul(count))
            .ok_or_else(|| {
                Error::InvalidRegion(format!("{region} holds too many tiles of {tile} to count"))
            })?;
        Ok(Self {
            origin: *region.start(),
            counts,
            cursor: [0; 5],
            remaining,
            tile: *tile.as_coordinate(),
            limit: *region.stop(),
        })
    }

    fn advance(&mut self) {
        // Last axis turns fastest.
        for axis in (0..5).rev() {
            self.cursor[axis] += 1;
            if self.cursor[axis] < self.counts[axis] {
                return;
            }
            self.cursor[axis] = 0;
        }
    }
}

impl Iterator for Tiles {
    type Item = Region;

    fn next(&mut self) -> Option<Region> {
        if self.remaining == 0 {
            return None;
        }
        let offsets = Coordinate::new(
            self.cursor[0] as f64,
            self.cursor[1] as f64,
            self.cursor[2] as f64,
            self.cursor[3] as f64,
            self.cursor[4] as f64,
        );
        let start = self.origin + offsets * self.tile;
        let stop = (start + self.tile).min(&self.limit);

        self.remaining -= 1;
        if self.remaining > 0 {
            self.advance();
        }
        Some(Region::from_parts_unchecked(start, stop))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Tiles {}

/// Splits a defined region into tiles of at most `tile` size that exactly cover it.
pub fn split(region: &Region, tile: &Extent) -> Result<Tiles> {
    if !region.is_defined() {
        return Err(Error::InvalidRegion(format!("cannot split unresolved region {region}")));
    }
    Tiles::new(region, tile)
}

/// Snaps a region outward to the tile grid: start rounded down, stop rounded up.
pub fn align_to_grid(region: &Region, tile: &Extent) -> Result<Region> {
    if !region.is_defined() {
        return Err(Error::InvalidRegion(format!("cannot align unresolved region {region}")));
    }
    let grid = tile.as_coordinate();
    let start = region.start().floor_div(grid) * *grid;
    let stop = region.stop().zip_with(grid, |value, step| (value / step).ceil() * step);
    Region::from_start_stop(start, stop)
}

/// Canonical tiles covering `region`.
///
/// Every tile starts on a multiple of `tile` and has exactly the tile's size, so two
/// overlapping requests produce identical tiles for their shared part. The union of
/// the tiles, clamped back to `region`, is `region`.
pub fn get_tiles(region: &Region, tile: &Extent) -> Result<Tiles> {
    let aligned = align_to_grid(region, tile)?;
    split(&aligned, tile)
}
