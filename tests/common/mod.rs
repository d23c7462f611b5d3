#![allow(dead_code)]

use ndarray::Array5;
use std::sync::Arc;
use tilewise::{
    Annotation, ArrayDataSource, ClassifierConfig, Coordinate, EnsembleClassifier, Filter,
    FilterStack, Region, StumpForest,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn xy_region(x0: f64, x1: f64, y0: f64, y1: f64) -> Region {
    Region::from_start_stop(
        Coordinate::new(0.0, x0, y0, 0.0, 0.0),
        Coordinate::new(1.0, x1, y1, 1.0, 1.0),
    )
    .expect("valid test region")
}

/// Dark left half, bright right half, with a faint diagonal texture.
pub fn halves_source(width: usize, height: usize) -> ArrayDataSource {
    let data = Array5::from_shape_fn((1, width, height, 1, 1), |(_, x, y, _, _)| {
        let base = if x < width / 2 { 0.2 } else { 0.8 };
        base + ((x + y) % 3) as f32 * 0.02
    });
    ArrayDataSource::new("halves", data).expect("non-empty test array")
}

pub fn trained_ensemble(
    source: &ArrayDataSource,
    width: usize,
    height: usize,
) -> Arc<EnsembleClassifier<StumpForest>> {
    let config = ClassifierConfig {
        total_trees: 12,
        num_forests: 3,
        ..ClassifierConfig::default()
    };
    let extractor = FilterStack::new(vec![Filter::Identity, Filter::box_mean_2d(1)])
        .expect("non-empty filter stack");
    let quarter = (width / 4) as f64;
    let annotations = [
        Annotation {
            region: xy_region(0.0, quarter, 0.0, height as f64),
            label: 1,
        },
        Annotation {
            region: xy_region(width as f64 - quarter, width as f64, 0.0, height as f64),
            label: 2,
        },
    ];
    let ensemble = EnsembleClassifier::train(&config, Arc::new(extractor), source, &annotations, 5)
        .expect("training on separable halves");
    Arc::new(ensemble)
}
