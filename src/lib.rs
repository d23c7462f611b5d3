// THEORY:
// This file is the entry point of the `tilewise` library crate. It exposes the
// engine as three layers that build on each other:
//
// 1.  **Addressing** (`core_modules`): coordinates, extents and regions over the
//     five axes (t, x, y, z, c), plus the tilings that cut a region into blocks.
// 2.  **Classification** (`classifier`): an ensemble of forests trained and
//     evaluated concurrently on a shared thread pool, with weighted aggregation of
//     their probabilities.
// 3.  **Distribution** (`transport`, `orchestrator`, `blockwise`): a rank-addressed
//     message protocol that hands tiles to workers and assembles the results.
//
// The commonly used types are re-exported at the crate root.

pub mod blockwise;
pub mod classifier;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod orchestrator;
pub mod transport;

pub use blockwise::{TilePrediction, plan_tiles, predict_blockwise};
pub use classifier::{Annotation, EnsembleClassifier, FeatureKey, Prediction, tree_distribution};
pub use config::{
    BlockwiseConfig, ClassifierConfig, OrchestratorConfig, RuntimeConfig, load_config,
};
pub use core_modules::cache::{BoundedCache, CacheStats};
pub use core_modules::coordinate::{Axis, Coordinate};
pub use core_modules::data_source::{ArrayDataSource, DataSource};
pub use core_modules::extent::{Extent, SpatialKind};
pub use core_modules::features::{
    FeatureData, FeatureExtractor, Filter, FilterRegistry, FilterSpec, FilterStack,
};
pub use core_modules::forest::{Forest, StumpForest};
pub use core_modules::region::Region;
pub use core_modules::tiling::Tiles;
pub use error::{Error, Result};
pub use orchestrator::{
    Orchestrator, OrchestratorState, WorkResult, WorkerSummary, run_as_worker, run_local,
};
pub use transport::{Cluster, Endpoint, ORCHESTRATOR_RANK, Rank, Tag};
