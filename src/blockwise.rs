// THEORY:
// Blockwise prediction is where the three layers meet. The region is cut into
// canonical tiles, each tile becomes a work unit for the orchestrator, every worker
// runs the ensemble on its tile, and the tiles are stitched back into one volume.
//
// Key architectural principles:
// 1.  **Canonical Tiles**: Tiles come from `get_tiles_within`, so they sit on the
//     tile grid and are clamped to the source. Repeated or overlapping requests ask
//     the classifier for the same tiles, which keeps its feature cache useful.
// 2.  **Whole Channels**: Features need every input channel, so the channel axis is
//     never split; both the region and the tile span all channels of the source.
// 3.  **Write Once**: Tiles are disjoint, and only the part of each tile inside the
//     requested region is copied out, so every output voxel is written exactly once.

use crate::classifier::EnsembleClassifier;
use crate::core_modules::coordinate::{Axis, Coordinate};
use crate::core_modules::data_source::DataSource;
use crate::core_modules::extent::Extent;
use crate::core_modules::forest::Forest;
use crate::core_modules::region::Region;
use crate::error::{Error, Result};
use crate::orchestrator::{WorkResult, run_local};
use crate::transport::Rank;
use log::{debug, info};
use ndarray::{Array5, s};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One tile's probabilities, flattened for the trip back to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilePrediction {
    pub region: Region,
    pub shape: [usize; 5],
    pub values: Vec<f32>,
}

impl TilePrediction {
    fn into_array(self) -> Result<(Region, Array5<f32>)> {
        let probabilities = Array5::from_shape_vec(self.shape, self.values)
            .map_err(|err| Error::ShapeMismatch(format!("tile {}: {err}", self.region)))?;
        Ok((self.region, probabilities))
    }
}

/// The tiles covering `region`, each clamped to `bounds` and spanning every channel.
pub fn plan_tiles(region: &Region, tile_extent: &Extent, bounds: &Region) -> Result<Vec<Region>> {
    let channels = bounds.axis_span(Axis::C);
    let tile = tile_extent.with_axis(Axis::C, channels)?;
    let region = Region::from_start_stop(
        region.start().with_axis(Axis::C, bounds.start().c()),
        region.stop().with_axis(Axis::C, bounds.stop().c()),
    )?;
    Ok(region
        .get_tiles_within(&tile, bounds)?
        .filter(|tile| tile.intersection(&region).is_some())
        .collect())
}

/// Predicts `region` tile by tile on `num_processes - 1` workers and assembles the
/// result into one (t, x, y, z, class) volume.
pub async fn predict_blockwise<F: Forest + 'static>(
    classifier: Arc<EnsembleClassifier<F>>,
    source: Arc<dyn DataSource>,
    region: &Region,
    tile_extent: &Extent,
    num_processes: usize,
) -> Result<Array5<f32>> {
    let bounds = source.roi();
    let region = region.defined_with(&source.shape())?;
    if !bounds.contains(&region) {
        return Err(Error::InvalidRegion(format!(
            "{region} lies outside of source '{}' ({bounds})",
            source.name()
        )));
    }
    let region = Region::from_start_stop(
        region.start().with_axis(Axis::C, bounds.start().c()),
        region.stop().with_axis(Axis::C, bounds.stop().c()),
    )?;

    let tiles = plan_tiles(&region, tile_extent, &bounds)?;
    info!(
        "Predicting {region} as {} tile(s) of {tile_extent} on {} worker(s)",
        tiles.len(),
        num_processes.saturating_sub(1)
    );
    let started = Instant::now();

    let worker_classifier = Arc::clone(&classifier);
    let worker_source = Arc::clone(&source);
    let handler = move |tile: Region, rank: Rank| -> Result<TilePrediction> {
        let prediction = worker_classifier.predict(worker_source.as_ref(), &tile, None)?;
        let probabilities = prediction.probabilities;
        debug!("Rank {rank} predicted {tile}");
        let dims = probabilities.shape();
        Ok(TilePrediction {
            region: tile,
            shape: [dims[0], dims[1], dims[2], dims[3], dims[4]],
            values: probabilities.iter().copied().collect(),
        })
    };
    let results = run_local(num_processes, tiles, handler).await?;

    let mut output = classifier.allocate_predictions(&region)?;
    let origin = Coordinate::zero() - *region.start();
    for WorkResult { rank, value } in results {
        let (tile, probabilities) = value.into_array()?;
        let overlap = tile.intersection(&region).ok_or_else(|| {
            Error::InvalidRegion(format!("rank {rank} returned {tile}, which misses {region}"))
        })?;
        let [t, x, y, z, _] = overlap.translated(&(Coordinate::zero() - *tile.start())).to_ranges()?;
        let [ot, ox, oy, oz, _] = overlap.translated(&origin).to_ranges()?;
        output
            .slice_mut(s![ot, ox, oy, oz, ..])
            .assign(&probabilities.slice(s![t, x, y, z, ..]));
    }

    info!("Blockwise prediction of {region} took {:?}", started.elapsed());
    Ok(output)
}
