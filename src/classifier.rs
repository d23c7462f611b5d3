// THEORY:
// The `EnsembleClassifier` is a set of independently trained forests that vote
// together. Training and prediction both fan out one task per forest onto a shared
// rayon pool, the same way the vision pipeline fans frames out to its workers.
//
// Key architectural principles:
// 1.  **Fixed Tree Budget**: `total_trees` is split over the forests up front. The
//     per-forest counts always sum to the configured total, and forests that would
//     get no trees are not created.
// 2.  **Weighted Votes**: Each forest's probabilities are scaled by its tree count
//     before they are summed, and the sum is divided by the total tree count. The
//     result is the per-tree average no matter how unevenly trees were split.
// 3.  **One Critical Section**: During prediction the only shared mutable state is
//     the accumulation buffer, behind a single mutex. Everything else is read-only.
// 4.  **Bounded Feature Reuse**: Feature data is cached by content (source name,
//     extractor, region) in a bounded LRU cache. The cache lock is never held
//     while features are being computed.

use crate::config::ClassifierConfig;
use crate::core_modules::cache::{BoundedCache, CacheStats};
use crate::core_modules::data_source::DataSource;
use crate::core_modules::features::{FeatureData, FeatureExtractor};
use crate::core_modules::forest::Forest;
use crate::core_modules::region::Region;
use crate::error::{Error, Result};
use log::{debug, info};
use ndarray::{Array1, Array2, Array5, ArrayView2, Axis as ArrayAxis, concatenate};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Every pixel of `region` carries the class `label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Annotation {
    pub region: Region,
    pub label: u32,
}

/// Content address of cached feature data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureKey {
    pub source: String,
    pub extractor: String,
    pub region: Region,
}

/// Output of a prediction: probabilities laid out as (t, x, y, z, class) plus the
/// features they were computed from.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub probabilities: Array5<f32>,
    pub features: Arc<FeatureData>,
}

/// Splits `total_trees` over `num_forests`; the first `total_trees % num_forests`
/// forests get one extra tree and zero-sized forests are dropped.
pub fn tree_distribution(total_trees: usize, num_forests: usize) -> Result<Vec<usize>> {
    if total_trees == 0 || num_forests == 0 {
        return Err(Error::Configuration(format!(
            "need at least one tree and one forest, got {total_trees} tree(s) over {num_forests} forest(s)"
        )));
    }
    let base = total_trees / num_forests;
    let extra = total_trees % num_forests;
    Ok((0..num_forests)
        .map(|index| base + usize::from(index < extra))
        .filter(|&count| count > 0)
        .collect())
}

/// Per-forest seed derived from the caller's seed.
fn forest_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn build_pool(num_threads: usize) -> Result<ThreadPool> {
    Ok(ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|index| format!("tilewise-forest-{index}"))
        .build()?)
}

/// Keeps a seeded random `proportion` of the rows. Fails if a class disappears.
fn subsample(
    features: Array2<f32>,
    labels: Array1<usize>,
    num_classes: usize,
    proportion: f64,
    seed: u64,
) -> Result<(Array2<f32>, Array1<usize>)> {
    if !(proportion > 0.0 && proportion <= 1.0) {
        return Err(Error::Configuration(format!(
            "label proportion must lie in (0, 1], got {proportion}"
        )));
    }
    if proportion == 1.0 {
        return Ok((features, labels));
    }

    let rows = labels.len();
    let kept = ((rows as f64 * proportion).round() as usize).clamp(1, rows);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices = sample(&mut rng, rows, kept).into_vec();
    indices.sort_unstable();

    let features = features.select(ArrayAxis(0), &indices);
    let labels = labels.select(ArrayAxis(0), &indices);
    let present: BTreeSet<usize> = labels.iter().copied().collect();
    if present.len() != num_classes {
        return Err(Error::Configuration(format!(
            "label proportion {proportion} kept {kept} of {rows} samples and lost {} class(es)",
            num_classes - present.len()
        )));
    }
    debug!("Subsampled {kept} of {rows} labelled samples");
    Ok((features, labels))
}

/// A trained ensemble of forests sharing one feature extractor.
pub struct EnsembleClassifier<F: Forest> {
    forests: Vec<F>,
    known_classes: Vec<u32>,
    oob_errors: Vec<f64>,
    extractor: Arc<dyn FeatureExtractor>,
    pool: ThreadPool,
    feature_cache: Mutex<BoundedCache<FeatureKey, Arc<FeatureData>>>,
}

impl<F: Forest> EnsembleClassifier<F> {
    /// Computes features for every annotation, then trains on the stacked matrix.
    pub fn train(
        config: &ClassifierConfig,
        extractor: Arc<dyn FeatureExtractor>,
        source: &dyn DataSource,
        annotations: &[Annotation],
        seed: u64,
    ) -> Result<Self> {
        if annotations.is_empty() {
            return Err(Error::Configuration("cannot train without annotations".into()));
        }

        let mut blocks = Vec::with_capacity(annotations.len());
        let mut labels = Vec::new();
        for annotation in annotations {
            let matrix = extractor.compute(source, &annotation.region)?.as_matrix()?;
            labels.extend(std::iter::repeat_n(annotation.label, matrix.nrows()));
            blocks.push(matrix);
        }
        let views: Vec<ArrayView2<f32>> = blocks.iter().map(|block| block.view()).collect();
        let features = concatenate(ArrayAxis(0), &views)
            .map_err(|err| Error::ShapeMismatch(err.to_string()))?;

        Self::train_on_matrix(config, extractor, features, &labels, seed)
    }

    /// Trains on a ready-made pixels-by-features matrix with one label per row.
    pub fn train_on_matrix(
        config: &ClassifierConfig,
        extractor: Arc<dyn FeatureExtractor>,
        features: Array2<f32>,
        labels: &[u32],
        seed: u64,
    ) -> Result<Self> {
        if features.nrows() == 0 || features.nrows() != labels.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} feature rows for {} labels",
                features.nrows(),
                labels.len()
            )));
        }

        let tree_counts = tree_distribution(config.total_trees, config.num_forests)?;
        let known_classes: Vec<u32> = labels
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let class_indices: Array1<usize> = labels
            .iter()
            .map(|label| known_classes.binary_search(label).unwrap_or_default())
            .collect();

        let (features, class_indices) = match config.label_proportion {
            Some(proportion) => {
                subsample(features, class_indices, known_classes.len(), proportion, seed)?
            }
            None => (features, class_indices),
        };

        let pool = build_pool(tree_counts.len())?;
        let mut forests: Vec<F> = tree_counts.iter().map(|&count| F::with_tree_count(count)).collect();
        let num_classes = known_classes.len();

        let started = Instant::now();
        let oob_errors = pool.install(|| {
            forests
                .par_iter_mut()
                .enumerate()
                .map(|(index, forest)| {
                    forest.learn(
                        features.view(),
                        class_indices.view(),
                        num_classes,
                        forest_seed(seed, index),
                    )
                })
                .collect::<Result<Vec<f64>>>()
        })?;

        info!(
            "Training {} trees in {} forest(s) on {} samples took {:?}",
            config.total_trees,
            forests.len(),
            features.nrows(),
            started.elapsed()
        );
        for (index, oob) in oob_errors.iter().enumerate() {
            debug!("Forest {index}: out-of-bag error {oob:.4}");
        }
        info!(
            "Average out-of-bag error: {:.4}",
            oob_errors.iter().sum::<f64>() / oob_errors.len() as f64
        );

        Ok(Self {
            forests,
            known_classes,
            oob_errors,
            extractor,
            pool,
            feature_cache: Mutex::new(BoundedCache::new(config.feature_cache_capacity)?),
        })
    }

    /// Wraps already trained forests. Out-of-bag errors are unknown and left empty.
    pub fn from_forests(
        forests: Vec<F>,
        known_classes: Vec<u32>,
        extractor: Arc<dyn FeatureExtractor>,
        feature_cache_capacity: usize,
    ) -> Result<Self> {
        if forests.is_empty() || known_classes.is_empty() {
            return Err(Error::Configuration(
                "an ensemble needs at least one forest and one class".into(),
            ));
        }
        Ok(Self {
            pool: build_pool(forests.len())?,
            forests,
            known_classes,
            oob_errors: Vec::new(),
            extractor,
            feature_cache: Mutex::new(BoundedCache::new(feature_cache_capacity)?),
        })
    }

    /// Labels in the order of the class axis of every prediction.
    pub fn known_classes(&self) -> &[u32] {
        &self.known_classes
    }

    pub fn oob_errors(&self) -> &[f64] {
        &self.oob_errors
    }

    pub fn tree_counts(&self) -> Vec<usize> {
        self.forests.iter().map(Forest::tree_count).collect()
    }

    pub fn total_trees(&self) -> usize {
        self.forests.iter().map(Forest::tree_count).sum()
    }

    pub fn num_forests(&self) -> usize {
        self.forests.len()
    }

    pub fn extractor(&self) -> &Arc<dyn FeatureExtractor> {
        &self.extractor
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    /// A zeroed (t, x, y, z, class) buffer for `region`.
    pub fn allocate_predictions(&self, region: &Region) -> Result<Array5<f32>> {
        let [t, x, y, z, _] = region.to_ranges()?;
        Ok(Array5::zeros((
            t.len(),
            x.len(),
            y.len(),
            z.len(),
            self.known_classes.len(),
        )))
    }

    fn lock_cache(&self) -> MutexGuard<'_, BoundedCache<FeatureKey, Arc<FeatureData>>> {
        self.feature_cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn features_for(&self, source: &dyn DataSource, region: &Region) -> Result<Arc<FeatureData>> {
        let key = FeatureKey {
            source: source.name().to_string(),
            extractor: self.extractor.describe(),
            region: *region,
        };
        if let Some(cached) = self.lock_cache().get(&key) {
            return Ok(cached);
        }
        let computed = Arc::new(self.extractor.compute(source, region)?);
        self.lock_cache().insert(key, Arc::clone(&computed));
        Ok(computed)
    }

    /// Class probabilities for every pixel of `region`. `out` is reused when given.
    pub fn predict(
        &self,
        source: &dyn DataSource,
        region: &Region,
        out: Option<Array5<f32>>,
    ) -> Result<Prediction> {
        let region = region.defined_with(&source.shape())?;
        let features = self.features_for(source, &region)?;
        let matrix = features.as_matrix()?;

        let out = match out {
            Some(mut buffer) => {
                let expected = self.allocate_predictions(&region)?;
                if buffer.shape() != expected.shape() {
                    return Err(Error::ShapeMismatch(format!(
                        "output buffer is {:?}, {region} needs {:?}",
                        buffer.shape(),
                        expected.shape()
                    )));
                }
                buffer.fill(0.0);
                buffer
            }
            None => self.allocate_predictions(&region)?,
        };
        let dims = out.raw_dim();
        let num_classes = self.known_classes.len();
        let accumulator = Mutex::new(out);

        self.pool.install(|| {
            self.forests.par_iter().try_for_each(|forest| -> Result<()> {
                let probabilities = forest.predict_probabilities(matrix.view())?;
                if probabilities.dim() != (matrix.nrows(), num_classes) {
                    return Err(Error::ShapeMismatch(format!(
                        "forest returned {:?} probabilities for {} pixels and {num_classes} classes",
                        probabilities.dim(),
                        matrix.nrows()
                    )));
                }
                let weight = forest.tree_count() as f32;
                let scaled = Array5::from_shape_vec(
                    dims,
                    probabilities.iter().map(|p| p * weight).collect(),
                )
                .map_err(|err| Error::ShapeMismatch(err.to_string()))?;

                let mut total = accumulator.lock().unwrap_or_else(PoisonError::into_inner);
                *total += &scaled;
                Ok(())
            })
        })?;

        let mut probabilities = accumulator.into_inner().unwrap_or_else(PoisonError::into_inner);
        probabilities /= self.total_trees() as f32;
        Ok(Prediction {
            probabilities,
            features,
        })
    }

    /// Like `predict`, but refuses requests the extractor cannot handle before
    /// doing any work.
    pub fn predict_strict(
        &self,
        source: &dyn DataSource,
        region: &Region,
        out: Option<Array5<f32>>,
    ) -> Result<Prediction> {
        let kernel = self.extractor.kernel_shape();
        if !self.extractor.is_applicable_to(source) {
            return Err(Error::ShapeMismatch(format!(
                "{} needs at least {kernel}, source '{}' is {}",
                self.extractor.describe(),
                source.name(),
                source.shape()
            )));
        }
        let region = region.defined_with(&source.shape())?;
        let shape = region.shape()?;
        if !shape.as_coordinate().all_ge(kernel.as_coordinate()) {
            return Err(Error::ShapeMismatch(format!(
                "{region} is smaller than the {kernel} kernel of {}",
                self.extractor.describe()
            )));
        }
        self.predict(source, &region, out)
    }
}
