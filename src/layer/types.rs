use geo::{Geometry, Point};
use geojson::JsonObject;
use serde_json::Value;

use crate::crs::Crs;

/// One feature of an external attribute layer.
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub properties: JsonObject,
}

/// Read-only dataset joined onto pixels.
#[derive(Debug, Clone)]
pub struct Layer {
    pub source: String,
    pub crs: Crs,
    pub features: Vec<Feature>,
}

/// A grid cell. `cell` is what gets written out; `centroid` is the
/// representative location used by point predicates.
#[derive(Debug, Clone)]
pub struct Pixel {
    pub cell: Geometry<f64>,
    pub centroid: Point<f64>,
    pub attributes: JsonObject,
}

#[derive(Debug, Clone)]
pub struct PixelGrid {
    pub crs: Crs,
    pub pixels: Vec<Pixel>,
}

impl PixelGrid {
    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.pixels
            .iter()
            .any(|p| p.attributes.contains_key(column))
    }

    /// Installs one value per pixel under `name`, replacing any previous
    /// column of that name.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.pixels.len());
        for (pixel, value) in self.pixels.iter_mut().zip(values) {
            pixel.attributes.insert(name.to_string(), value);
        }
    }

    pub fn drop_column(&mut self, name: &str) {
        for pixel in &mut self.pixels {
            pixel.attributes.remove(name);
        }
    }

    pub fn column(&self, name: &str) -> Vec<Option<&Value>> {
        self.pixels.iter().map(|p| p.attributes.get(name)).collect()
    }
}
