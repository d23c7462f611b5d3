// THEORY:
// The building blocks of the engine, leaves first: coordinate algebra, regions and
// their tilings, the data and feature interfaces with their reference
// implementations, the bounded feature cache, and the forest members of the
// ensemble. Nothing in here knows about threads, workers or messages.

pub mod cache;
pub mod coordinate;
pub mod data_source;
pub mod extent;
pub mod features;
pub mod forest;
pub mod region;
pub mod tiling;
