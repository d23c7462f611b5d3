mod common;

use common::{halves_source, trained_ensemble, xy_region};
use ndarray::Axis as ArrayAxis;
use std::sync::Arc;
use tilewise::{Axis, DataSource, Error, Extent, Region, predict_blockwise};

const WIDTH: usize = 20;
const HEIGHT: usize = 14;

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
}

#[tokio::test]
async fn blockwise_matches_a_single_pass() {
    common::init_logging();
    let source = Arc::new(halves_source(WIDTH, HEIGHT));
    let classifier = trained_ensemble(&source, WIDTH, HEIGHT);
    let tile = Extent::from_pairs(&[(Axis::X, 6.0), (Axis::Y, 4.0)]).unwrap();

    let blockwise = predict_blockwise(
        Arc::clone(&classifier),
        source.clone() as Arc<dyn DataSource>,
        &Region::all(),
        &tile,
        4,
    )
    .await
    .unwrap();
    let single = classifier.predict(source.as_ref(), &Region::all(), None).unwrap();

    assert_eq!(blockwise.shape(), single.probabilities.shape());
    for (a, b) in blockwise.iter().zip(single.probabilities.iter()) {
        assert!(close(*a, *b), "{a} != {b}");
    }
}

#[tokio::test]
async fn every_voxel_of_an_unaligned_region_is_written() {
    common::init_logging();
    let source = Arc::new(halves_source(WIDTH, HEIGHT));
    let classifier = trained_ensemble(&source, WIDTH, HEIGHT);
    let tile = Extent::from_pairs(&[(Axis::X, 4.0), (Axis::Y, 4.0)]).unwrap();
    let region = xy_region(3.0, 17.0, 1.0, 10.0);

    let probabilities = predict_blockwise(
        Arc::clone(&classifier),
        source.clone() as Arc<dyn DataSource>,
        &region,
        &tile,
        3,
    )
    .await
    .unwrap();

    assert_eq!(probabilities.shape(), &[1, 14, 9, 1, 2]);
    for pixel in probabilities.lanes(ArrayAxis(4)) {
        assert!(close(pixel.sum(), 1.0));
    }

    let single = classifier.predict(source.as_ref(), &region, None).unwrap();
    for (a, b) in probabilities.iter().zip(single.probabilities.iter()) {
        assert!(close(*a, *b));
    }
    // Dark side is label 1, bright side label 2.
    assert!(probabilities[[0, 0, 0, 0, 0]] > 0.5);
    assert!(probabilities[[0, 13, 8, 0, 1]] > 0.5);
}

#[tokio::test]
async fn regions_outside_the_source_are_rejected() {
    let source = Arc::new(halves_source(WIDTH, HEIGHT));
    let classifier = trained_ensemble(&source, WIDTH, HEIGHT);
    let tile = Extent::from_pairs(&[(Axis::X, 4.0), (Axis::Y, 4.0)]).unwrap();

    let result = predict_blockwise(
        classifier,
        source as Arc<dyn DataSource>,
        &xy_region(10.0, 30.0, 0.0, 4.0),
        &tile,
        2,
    )
    .await;
    assert!(matches!(result, Err(Error::InvalidRegion(_))));
}
