// THEORY:
// A `DataSource` is whatever holds the raw pixels: a file, a remote volume, or a
// plain array in memory. The engine only ever asks two questions of it: how big
// are you, and give me the samples inside this region. Format-specific readers
// live outside this crate and plug in through the trait.

use crate::core_modules::coordinate::Coordinate;
use crate::core_modules::extent::Extent;
use crate::core_modules::region::Region;
use crate::error::{Error, Result};
use image::GrayImage;
use ndarray::{Array5, s};

/// Raw data addressed in (t, x, y, z, c) order.
pub trait DataSource: Send + Sync {
    /// Stable name used to address cached results for this source.
    fn name(&self) -> &str;

    fn shape(&self) -> Extent;

    /// The region covered by the source, anchored at the origin.
    fn roi(&self) -> Region {
        self.shape().to_region(Coordinate::zero())
    }

    /// Samples inside `region`, which must lie within `roi()`.
    fn retrieve(&self, region: &Region) -> Result<Array5<f32>>;
}

/// A data source backed by an in-memory array.
#[derive(Debug, Clone)]
pub struct ArrayDataSource {
    name: String,
    data: Array5<f32>,
    shape: Extent,
}

impl ArrayDataSource {
    pub fn new(name: impl Into<String>, data: Array5<f32>) -> Result<Self> {
        let dims = data.shape();
        let shape = Extent::new(
            dims[0] as f64,
            dims[1] as f64,
            dims[2] as f64,
            dims[3] as f64,
            dims[4] as f64,
        )
        .map_err(|err| Error::ShapeMismatch(format!("array has an empty axis: {err}")))?;
        Ok(Self {
            name: name.into(),
            data,
            shape,
        })
    }

    /// A single-channel 2D source with x along the image width and y along its height.
    /// Intensities are scaled into `[0, 1]`.
    pub fn from_gray_image(name: impl Into<String>, image: &GrayImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        let data = Array5::from_shape_fn(
            (1, width as usize, height as usize, 1, 1),
            |(_, x, y, _, _)| f32::from(image.get_pixel(x as u32, y as u32).0[0]) / 255.0,
        );
        Self::new(name, data)
    }

    pub fn data(&self) -> &Array5<f32> {
        &self.data
    }
}

impl DataSource for ArrayDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn shape(&self) -> Extent {
        self.shape
    }

    fn retrieve(&self, region: &Region) -> Result<Array5<f32>> {
        if !self.roi().contains(region) {
            return Err(Error::InvalidRegion(format!(
                "{region} lies outside of source '{}' ({})",
                self.name, self.shape
            )));
        }
        let [t, x, y, z, c] = region.to_ranges()?;
        Ok(self.data.slice(s![t, x, y, z, c]).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::coordinate::Axis;

    fn ramp() -> ArrayDataSource {
        let data = Array5::from_shape_fn((1, 6, 4, 1, 2), |(_, x, y, _, c)| {
            (x * 100 + y * 10 + c) as f32
        });
        ArrayDataSource::new("ramp", data).unwrap()
    }

    #[test]
    fn shape_and_roi_follow_the_array() {
        let source = ramp();
        assert_eq!(source.shape(), Extent::new(1.0, 6.0, 4.0, 1.0, 2.0).unwrap());
        assert_eq!(*source.roi().start(), Coordinate::zero());
        assert_eq!(source.roi().shape().unwrap(), source.shape());
    }

    #[test]
    fn retrieve_returns_the_requested_block() {
        let source = ramp();
        let region = Region::from_start_stop(
            Coordinate::new(0.0, 2.0, 1.0, 0.0, 1.0),
            Coordinate::new(1.0, 4.0, 3.0, 1.0, 2.0),
        )
        .unwrap();
        let block = source.retrieve(&region).unwrap();
        assert_eq!(block.shape(), &[1, 2, 2, 1, 1]);
        assert_eq!(block[[0, 0, 0, 0, 0]], 211.0);
        assert_eq!(block[[0, 1, 1, 0, 0]], 321.0);
        assert_eq!(block.shape()[Axis::X.index()], 2);
    }

    #[test]
    fn retrieve_outside_is_rejected() {
        let source = ramp();
        let region = Region::from_start_stop(
            Coordinate::new(0.0, 4.0, 0.0, 0.0, 0.0),
            Coordinate::new(1.0, 8.0, 4.0, 1.0, 2.0),
        )
        .unwrap();
        assert!(matches!(source.retrieve(&region), Err(Error::InvalidRegion(_))));
    }

    #[test]
    fn gray_image_maps_width_to_x() {
        let image = GrayImage::from_fn(3, 2, |x, y| image::Luma([(x * 10 + y) as u8]));
        let source = ArrayDataSource::from_gray_image("gray", &image).unwrap();
        assert_eq!(source.shape().x(), 3.0);
        assert_eq!(source.shape().y(), 2.0);
        assert!((source.data()[[0, 2, 1, 0, 0]] - 21.0 / 255.0).abs() < 1e-6);
    }
}
