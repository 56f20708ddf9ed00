use anyhow::{Context, Result};
use geo::{BoundingRect, Distance, Euclidean, Geometry, Intersects, Point};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};
use serde_json::Value;
use smallvec::SmallVec;

use crate::crs::{Crs, Reprojector};
use crate::layer::{Feature, Layer};

type Entry = GeomWithData<Rectangle<[f64; 2]>, usize>;

const TIE_SLACK: f64 = 1e-12;

/// Feature indices matched by one pixel; almost always zero or one.
pub type Matches = SmallVec<[usize; 4]>;

/// An attribute layer reprojected into a grid's CRS with an R-tree over
/// feature envelopes. Shared read-only across jurisdictions.
pub struct IndexedLayer {
    pub source: String,
    pub crs: Crs,
    features: Vec<Feature>,
    tree: RTree<Entry>,
}

impl IndexedLayer {
    pub fn build(layer: &Layer, crs: Crs) -> Result<Self> {
        let rp = Reprojector::new(layer.crs, crs)?;
        let features = layer
            .features
            .iter()
            .map(|f| -> Result<Feature> {
                Ok(Feature {
                    geometry: rp.geometry(&f.geometry)?,
                    properties: f.properties.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("reproject {} from {} to {}", layer.source, layer.crs, crs))?;

        let entries: Vec<Entry> = features
            .iter()
            .enumerate()
            .filter_map(|(idx, f)| {
                let rect = f.geometry.bounding_rect()?;
                let env = Rectangle::from_corners(
                    [rect.min().x, rect.min().y],
                    [rect.max().x, rect.max().y],
                );
                Some(GeomWithData::new(env, idx))
            })
            .collect();

        Ok(Self {
            source: layer.source.clone(),
            crs,
            features,
            tree: RTree::bulk_load(entries),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.features
            .iter()
            .any(|f| f.properties.contains_key(column))
    }

    #[inline]
    pub fn value(&self, idx: usize, column: &str) -> Option<&Value> {
        self.features[idx].properties.get(column)
    }

    /// Every feature whose geometry intersects `probe` (boundary contact
    /// counts), in feature order.
    pub fn intersecting(&self, probe: &Geometry<f64>) -> Matches {
        let Some(rect) = probe.bounding_rect() else {
            return Matches::new();
        };
        let env = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        let mut hits: Matches = self
            .tree
            .locate_in_envelope_intersecting(&env)
            .map(|e| e.data)
            .filter(|&idx| self.features[idx].geometry.intersects(probe))
            .collect();
        hits.sort_unstable();
        hits
    }

    /// All features at the minimum distance from `point`. Empty only when the
    /// layer has no indexable features.
    pub fn nearest(&self, point: &Point<f64>) -> Matches {
        let mut best = f64::INFINITY;
        let mut ties = Matches::new();
        for (entry, env_d2) in self.tree.nearest_neighbor_iter_with_distance_2(&[point.x(), point.y()]) {
            // envelope distance never exceeds the true distance. Compared
            // unsquared with an ulp-scale slack so rounding cannot cut off a tie.
            if env_d2.sqrt() > best * (1.0 + TIE_SLACK) {
                break;
            }
            let d = Euclidean::distance(&self.features[entry.data].geometry, point);
            if d < best {
                best = d;
                ties.clear();
                ties.push(entry.data);
            } else if d == best {
                ties.push(entry.data);
            }
        }
        ties.sort_unstable();
        ties
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Rect, line_string, point, polygon};
    use geojson::JsonObject;
    use serde_json::json;

    fn feature(geometry: Geometry<f64>, v: f64) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert("v".into(), json!(v));
        Feature {
            geometry,
            properties,
        }
    }

    fn square(x0: f64, y0: f64, size: f64) -> Geometry<f64> {
        Geometry::Polygon(Rect::new((x0, y0), (x0 + size, y0 + size)).to_polygon())
    }

    fn layer(features: Vec<Feature>) -> IndexedLayer {
        let layer = Layer {
            source: "test".into(),
            crs: Crs::Epsg(3310),
            features,
        };
        IndexedLayer::build(&layer, Crs::Epsg(3310)).unwrap()
    }

    #[test]
    fn intersecting_filters_envelope_candidates_exactly() {
        // the triangle's envelope covers the probe, its body does not
        let tri = Geometry::Polygon(polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 0.0, y: 10.0)]);
        let idx = layer(vec![feature(tri, 1.0), feature(square(8.0, 8.0, 4.0), 2.0)]);
        let hits = idx.intersecting(&Geometry::Point(point!(x: 9.0, y: 9.0)));
        assert_eq!(hits.as_slice(), &[1]);
    }

    #[test]
    fn nearest_returns_all_equidistant_features() {
        let idx = layer(vec![
            feature(Geometry::Point(point!(x: -5.0, y: 0.0)), 1.0),
            feature(Geometry::Point(point!(x: 5.0, y: 0.0)), 2.0),
            feature(Geometry::Point(point!(x: 0.0, y: 50.0)), 3.0),
        ]);
        assert_eq!(idx.nearest(&point!(x: 0.0, y: 0.0)).as_slice(), &[0, 1]);
        assert_eq!(idx.nearest(&point!(x: 0.0, y: 40.0)).as_slice(), &[2]);
    }

    #[test]
    fn ties_survive_irrational_distances() {
        // sqrt(13) squared is not 13 in floating point
        let idx = layer(
            [(3.0, 2.0), (-3.0, 2.0), (3.0, -2.0), (-3.0, -2.0)]
                .into_iter()
                .enumerate()
                .map(|(i, (x, y))| feature(Geometry::Point(point!(x: x, y: y)), i as f64))
                .collect(),
        );
        assert_eq!(idx.nearest(&point!(x: 0.0, y: 0.0)).as_slice(), &[0, 1, 2, 3]);
    }

    #[test]
    fn nearest_uses_true_distance_not_envelope() {
        // a long diagonal line has a huge envelope that contains the query
        let diag = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 100.0, y: 100.0)]);
        let idx = layer(vec![
            feature(diag, 1.0),
            feature(Geometry::Point(point!(x: 90.0, y: 5.0)), 2.0),
        ]);
        // query sits inside the line's envelope but ~56 m from the line itself
        assert_eq!(idx.nearest(&point!(x: 90.0, y: 10.0)).as_slice(), &[1]);
    }

    #[test]
    fn empty_layer_matches_nothing() {
        let idx = layer(Vec::new());
        assert!(idx.nearest(&point!(x: 0.0, y: 0.0)).is_empty());
        assert!(idx.intersecting(&Geometry::Point(point!(x: 0.0, y: 0.0))).is_empty());
    }
}
