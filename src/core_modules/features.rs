// THEORY:
// Features are what the forests actually see. A `FeatureExtractor` turns the raw
// samples of a region into one feature vector per pixel; the classifier only ever
// deals with the resulting pixels-by-features matrix.
//
// Key architectural principles:
// 1.  **One Variant Per Filter**: Filter kinds are variants of the `Filter` enum,
//     each computing its own kernel, instead of a class per filter.
// 2.  **Halo Handling**: Filters that look at neighbours read an enlarged region
//     (clamped to the source) and crop their result back to the request, so tiles
//     computed separately agree with a single large computation.
// 3.  **Explicit Registry**: Name-to-filter construction goes through a
//     `FilterRegistry` that is built once by the application and handed to whoever
//     needs it. Nothing registers itself behind the caller's back.

use crate::core_modules::coordinate::{Axis, Coordinate};
use crate::core_modules::data_source::DataSource;
use crate::core_modules::extent::Extent;
use crate::core_modules::region::Region;
use crate::error::{Error, Result};
use ndarray::{Array2, Array5, ArrayView5, Axis as ArrayAxis, concatenate, s};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-pixel features for a region, laid out as (t, x, y, z, feature).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureData {
    region: Region,
    data: Array5<f32>,
}

impl FeatureData {
    pub fn new(region: Region, data: Array5<f32>) -> Result<Self> {
        let ranges = region.to_ranges()?;
        for axis in [Axis::T, Axis::X, Axis::Y, Axis::Z] {
            let expected = ranges[axis.index()].len();
            let actual = data.shape()[axis.index()];
            if expected != actual {
                return Err(Error::ShapeMismatch(format!(
                    "feature data has {actual} samples along {} but {region} needs {expected}",
                    axis.label()
                )));
            }
        }
        Ok(Self { region, data })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn data(&self) -> &Array5<f32> {
        &self.data
    }

    pub fn num_features(&self) -> usize {
        self.data.shape()[Axis::C.index()]
    }

    pub fn num_pixels(&self) -> usize {
        self.data.shape()[..Axis::C.index()].iter().product()
    }

    /// Flattens to a pixels-by-features matrix, pixels in (t, x, y, z) order.
    pub fn as_matrix(&self) -> Result<Array2<f32>> {
        Array2::from_shape_vec(
            (self.num_pixels(), self.num_features()),
            self.data.iter().copied().collect(),
        )
        .map_err(|err| Error::ShapeMismatch(err.to_string()))
    }
}

/// Computes per-pixel features from a data source.
pub trait FeatureExtractor: Send + Sync {
    fn compute(&self, source: &dyn DataSource, region: &Region) -> Result<FeatureData>;

    /// The smallest input this extractor can work on.
    fn kernel_shape(&self) -> Extent;

    fn num_features(&self, input_channels: usize) -> usize;

    /// Stable description, used to address cached features.
    fn describe(&self) -> String;

    fn is_applicable_to(&self, source: &dyn DataSource) -> bool {
        source
            .shape()
            .as_coordinate()
            .all_ge(self.kernel_shape().as_coordinate())
    }
}

/// The available filter kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Raw intensities, one feature per input channel.
    Identity,
    /// Mean over a `(2 * radius + 1)` window on every spatial axis except `axis_2d`.
    BoxMean { radius: usize, axis_2d: Option<Axis> },
}

impl Filter {
    /// A box mean that leaves the z axis alone, for 2D images.
    pub fn box_mean_2d(radius: usize) -> Self {
        Filter::BoxMean {
            radius,
            axis_2d: Some(Axis::Z),
        }
    }

    fn smoothed_axes(&self) -> Vec<Axis> {
        match self {
            Filter::Identity => Vec::new(),
            Filter::BoxMean { axis_2d, .. } => Axis::SPATIAL
                .iter()
                .copied()
                .filter(|axis| Some(*axis) != *axis_2d)
                .collect(),
        }
    }

    fn halo(&self) -> Coordinate {
        match self {
            Filter::Identity => Coordinate::zero(),
            Filter::BoxMean { radius, .. } => self
                .smoothed_axes()
                .into_iter()
                .fold(Coordinate::zero(), |halo, axis| halo.with_axis(axis, *radius as f64)),
        }
    }
}

impl FeatureExtractor for Filter {
    fn compute(&self, source: &dyn DataSource, region: &Region) -> Result<FeatureData> {
        let region = region.defined_with(&source.shape())?;
        let roi = source.roi();
        if !roi.contains(&region) {
            return Err(Error::InvalidRegion(format!(
                "{region} lies outside of source '{}'",
                source.name()
            )));
        }

        match self {
            Filter::Identity => FeatureData::new(region, source.retrieve(&region)?),
            Filter::BoxMean { radius, .. } => {
                let haloed = region.enlarged(&self.halo())?.clamped_to(&roi);
                let mut block = source.retrieve(&haloed)?;
                for axis in self.smoothed_axes() {
                    block = box_mean_along(&block, axis, *radius);
                }
                let inner = region.translated(&(Coordinate::zero() - *haloed.start()));
                let [t, x, y, z, c] = inner.to_ranges()?;
                FeatureData::new(region, block.slice(s![t, x, y, z, c]).to_owned())
            }
        }
    }

    fn kernel_shape(&self) -> Extent {
        match self {
            Filter::Identity => Extent::default(),
            Filter::BoxMean { radius, .. } => {
                let mut radii = [0; 5];
                for axis in self.smoothed_axes() {
                    radii[axis.index()] = *radius;
                }
                Extent::window(&radii)
            }
        }
    }

    fn num_features(&self, input_channels: usize) -> usize {
        input_channels
    }

    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

/// Mean over a sliding window along one axis. Windows are cut at the block edge and
/// averaged over the samples that exist.
fn box_mean_along(block: &Array5<f32>, axis: Axis, radius: usize) -> Array5<f32> {
    let lane_axis = ArrayAxis(axis.index());
    let mut out = Array5::zeros(block.raw_dim());
    for (input, mut output) in block.lanes(lane_axis).into_iter().zip(out.lanes_mut(lane_axis)) {
        let len = input.len();
        let mut prefix = Vec::with_capacity(len + 1);
        let mut running = 0.0f64;
        prefix.push(running);
        for &value in input.iter() {
            running += f64::from(value);
            prefix.push(running);
        }
        for i in 0..len {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(len);
            output[i] = ((prefix[hi] - prefix[lo]) / (hi - lo) as f64) as f32;
        }
    }
    out
}

/// Several filters whose features are concatenated in order.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterStack {
    filters: Vec<Filter>,
}

impl FilterStack {
    pub fn new(filters: Vec<Filter>) -> Result<Self> {
        if filters.is_empty() {
            return Err(Error::Configuration("a filter stack needs at least one filter".into()));
        }
        Ok(Self { filters })
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }
}

impl FeatureExtractor for FilterStack {
    fn compute(&self, source: &dyn DataSource, region: &Region) -> Result<FeatureData> {
        let parts = self
            .filters
            .iter()
            .map(|filter| filter.compute(source, region))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<ArrayView5<f32>> = parts.iter().map(|part| part.data().view()).collect();
        let data = concatenate(ArrayAxis(Axis::C.index()), &views)
            .map_err(|err| Error::ShapeMismatch(err.to_string()))?;
        let region = *parts[0].region();
        FeatureData::new(region, data)
    }

    fn kernel_shape(&self) -> Extent {
        self.filters
            .iter()
            .map(Filter::kernel_shape)
            .fold(Extent::default(), |acc, kernel| acc.max(&kernel))
    }

    fn num_features(&self, input_channels: usize) -> usize {
        self.filters
            .iter()
            .map(|filter| filter.num_features(input_channels))
            .sum()
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.filters.iter().map(Filter::describe).collect();
        format!("Stack[{}]", parts.join(","))
    }
}

/// A filter request as it appears in configuration: a registry name plus parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub type FilterBuilder = Box<dyn Fn(&serde_json::Value) -> Result<Filter> + Send + Sync>;

fn default_axis_2d() -> Option<Axis> {
    Some(Axis::Z)
}

#[derive(Deserialize)]
struct BoxMeanParams {
    radius: usize,
    #[serde(default = "default_axis_2d")]
    axis_2d: Option<Axis>,
}

/// Name-to-filter dispatch table.
pub struct FilterRegistry {
    builders: BTreeMap<String, FilterBuilder>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    /// The registry with every built-in filter.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "Identity",
            Box::new(|_: &serde_json::Value| -> Result<Filter> { Ok(Filter::Identity) }),
        );
        registry.register(
            "BoxMean",
            Box::new(|params: &serde_json::Value| -> Result<Filter> {
                let parsed: BoxMeanParams = serde_json::from_value(params.clone())?;
                Ok(Filter::BoxMean {
                    radius: parsed.radius,
                    axis_2d: parsed.axis_2d,
                })
            }),
        );
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, builder: FilterBuilder) {
        self.builders.insert(name.into(), builder);
    }

    pub fn names(&self) -> Vec<&str> {
        self.builders.keys().map(String::as_str).collect()
    }

    pub fn build(&self, spec: &FilterSpec) -> Result<Filter> {
        let builder = self.builders.get(&spec.name).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown filter '{}', expected one of {:?}",
                spec.name,
                self.names()
            ))
        })?;
        builder(&spec.params)
    }

    pub fn build_stack(&self, specs: &[FilterSpec]) -> Result<FilterStack> {
        let filters = specs
            .iter()
            .map(|spec| self.build(spec))
            .collect::<Result<Vec<_>>>()?;
        FilterStack::new(filters)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
