// Example runner for the `tilewise` library: trains an ensemble on a synthetic
// image and predicts it blockwise. Pass a JSON configuration file as the first
// argument to override the defaults.

use anyhow::Context;
use image::{GrayImage, Luma};
use log::info;
use ndarray::Axis as ArrayAxis;
use std::path::Path;
use std::sync::Arc;
use tilewise::{
    Annotation, ArrayDataSource, Axis, Coordinate, DataSource, EnsembleClassifier, Extent,
    FeatureExtractor, FilterRegistry, Region, RuntimeConfig, StumpForest, load_config,
    predict_blockwise,
};

const WIDTH: u32 = 96;
const HEIGHT: u32 = 64;
const SEED: u64 = 17;

/// A bright disk on a dark, striped background.
fn synthetic_image() -> GrayImage {
    GrayImage::from_fn(WIDTH, HEIGHT, |x, y| {
        let dx = x as i64 - 48;
        let dy = y as i64 - 32;
        let stripe = if x % 8 < 4 { 20 } else { 0 };
        if dx * dx + dy * dy < 20 * 20 {
            Luma([200 + stripe])
        } else {
            Luma([40 + stripe])
        }
    })
}

fn xy_region(x0: f64, x1: f64, y0: f64, y1: f64) -> anyhow::Result<Region> {
    Ok(Region::from_start_stop(
        Coordinate::new(0.0, x0, y0, 0.0, 0.0),
        Coordinate::new(1.0, x1, y1, 1.0, 1.0),
    )?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(Path::new(&path))
            .with_context(|| format!("Failed to load config {path}"))?,
        None => {
            let mut config = RuntimeConfig::default();
            config.blockwise.tile_shape = Extent::from_pairs(&[(Axis::X, 32.0), (Axis::Y, 32.0)])?;
            config
        }
    };

    let source: Arc<dyn DataSource> =
        Arc::new(ArrayDataSource::from_gray_image("synthetic-disk", &synthetic_image())?);
    let registry = FilterRegistry::with_defaults();
    let extractor: Arc<dyn FeatureExtractor> =
        Arc::new(registry.build_stack(&config.classifier.filters)?);

    let annotations = [
        Annotation {
            region: xy_region(40.0, 56.0, 26.0, 38.0)?,
            label: 1,
        },
        Annotation {
            region: xy_region(0.0, 12.0, 0.0, 12.0)?,
            label: 2,
        },
        Annotation {
            region: xy_region(84.0, 96.0, 50.0, 64.0)?,
            label: 2,
        },
    ];

    let classifier = Arc::new(
        EnsembleClassifier::<StumpForest>::train(
            &config.classifier,
            extractor,
            source.as_ref(),
            &annotations,
            SEED,
        )
        .context("Training failed")?,
    );

    let probabilities = predict_blockwise(
        Arc::clone(&classifier),
        Arc::clone(&source),
        &Region::all(),
        &config.blockwise.tile_shape,
        config.orchestrator.num_processes,
    )
    .await
    .context("Blockwise prediction failed")?;

    let pixels = probabilities.lanes(ArrayAxis(4)).into_iter().count();
    let foreground = probabilities
        .lanes(ArrayAxis(4))
        .into_iter()
        .filter(|pixel| pixel[0] > pixel[1])
        .count();
    info!(
        "{foreground} of {pixels} pixels classified as label {}",
        classifier.known_classes()[0]
    );
    Ok(())
}
