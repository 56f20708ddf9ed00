//! Attribute joins.
//!
//! Every join kind is one [`JoinPlan`]: which pixel geometry is the probe,
//! how right-hand features are matched, how the matched features collapse to
//! a single value, and what unmatched pixels get. Exactly one value is
//! produced per pixel, so row counts never change.

use anyhow::{Result, bail};
use geo::Geometry;
use serde_json::{Value, json};
use std::cmp::Ordering;

use super::index::{IndexedLayer, Matches};
use crate::error::PipelineError;
use crate::layer::{Pixel, PixelGrid};

/// Pixel column multiplied into `popmul` joins.
pub const POPULATION_COLUMN: &str = "pop";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Binary,
    BinaryFull,
    Numeric,
    Nearest,
    Popmul,
    Max,
}

impl JoinKind {
    pub const ALL: [JoinKind; 6] = [
        JoinKind::Binary,
        JoinKind::BinaryFull,
        JoinKind::Numeric,
        JoinKind::Nearest,
        JoinKind::Popmul,
        JoinKind::Max,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JoinKind::Binary => "binary",
            JoinKind::BinaryFull => "binary_full",
            JoinKind::Numeric => "numeric",
            JoinKind::Nearest => "nearest",
            JoinKind::Popmul => "popmul",
            JoinKind::Max => "max",
        }
    }

    /// `name` is the output column, carried for the error message.
    pub fn parse(kind: &str, name: &str) -> Result<Self, PipelineError> {
        JoinKind::ALL
            .into_iter()
            .find(|k| k.as_str() == kind)
            .ok_or_else(|| PipelineError::UnknownJoin {
                kind: kind.to_string(),
                name: name.to_string(),
            })
    }

    /// Kinds that read a value from the attribute layer.
    pub fn needs_source(self) -> bool {
        !matches!(self, JoinKind::Binary | JoinKind::BinaryFull)
    }
}

/// Pixel geometry a join evaluates its predicate against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateGeometry {
    Centroid,
    Cell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    Intersects,
    /// Closest features to the probe; all equidistant features are kept.
    Nearest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Derive {
    /// 1 when anything matched.
    Presence,
    /// Highest non-null value of `source` among the matches.
    Source(String),
    /// Highest value of `source` times the pixel's `factor` column.
    ScaledBy { source: String, factor: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    pub kind: JoinKind,
    pub geometry: PredicateGeometry,
    pub matcher: Matcher,
    pub derive: Derive,
    /// Value written where nothing matched.
    pub unmatched: Value,
    /// Matched-but-null winners become 0.
    pub nulls_to_zero: bool,
    pub output: String,
}

impl JoinPlan {
    pub fn new(kind: JoinKind, source: Option<&str>, output: &str) -> Result<Self, PipelineError> {
        let source = match (kind.needs_source(), source) {
            (true, Some(s)) => s.to_string(),
            (true, None) => {
                return Err(PipelineError::MissingSource {
                    kind: kind.as_str().to_string(),
                    name: output.to_string(),
                });
            }
            (false, _) => String::new(),
        };
        let zero = json!(0);
        let (geometry, matcher, derive, unmatched, nulls_to_zero) = match kind {
            JoinKind::Binary => (
                PredicateGeometry::Centroid,
                Matcher::Intersects,
                Derive::Presence,
                zero,
                false,
            ),
            JoinKind::BinaryFull => (
                PredicateGeometry::Cell,
                Matcher::Intersects,
                Derive::Presence,
                zero,
                false,
            ),
            JoinKind::Numeric => (
                PredicateGeometry::Centroid,
                Matcher::Intersects,
                Derive::Source(source),
                zero,
                false,
            ),
            JoinKind::Nearest => (
                PredicateGeometry::Centroid,
                Matcher::Nearest,
                Derive::Source(source),
                Value::Null,
                false,
            ),
            JoinKind::Popmul => (
                PredicateGeometry::Centroid,
                Matcher::Nearest,
                Derive::ScaledBy {
                    source,
                    factor: POPULATION_COLUMN.to_string(),
                },
                Value::Null,
                false,
            ),
            JoinKind::Max => (
                PredicateGeometry::Cell,
                Matcher::Intersects,
                Derive::Source(source),
                zero,
                true,
            ),
        };
        Ok(Self {
            kind,
            geometry,
            matcher,
            derive,
            unmatched,
            nulls_to_zero,
            output: output.to_string(),
        })
    }

    fn source(&self) -> Option<&str> {
        match &self.derive {
            Derive::Presence => None,
            Derive::Source(s) | Derive::ScaledBy { source: s, .. } => Some(s),
        }
    }

    /// Join-time preconditions: the layer carries the source column and the
    /// pixels carry the population column when one is needed.
    pub fn check(&self, grid: &PixelGrid, layer: &IndexedLayer) -> Result<(), PipelineError> {
        if let Some(source) = self.source() {
            if !layer.is_empty() && !layer.has_column(source) {
                return Err(PipelineError::MissingColumn {
                    column: source.to_string(),
                    layer: layer.source.clone(),
                });
            }
        }
        if let Derive::ScaledBy { factor, .. } = &self.derive {
            if !grid.is_empty() && !grid.has_column(factor) {
                return Err(PipelineError::MissingPopulation(factor.clone()));
            }
        }
        Ok(())
    }

    fn matches(&self, pixel: &Pixel, layer: &IndexedLayer) -> Matches {
        match self.matcher {
            Matcher::Nearest => layer.nearest(&pixel.centroid),
            Matcher::Intersects => match self.geometry {
                PredicateGeometry::Centroid => layer.intersecting(&Geometry::Point(pixel.centroid)),
                PredicateGeometry::Cell => layer.intersecting(&pixel.cell),
            },
        }
    }

    fn value_for(&self, pixel: &Pixel, layer: &IndexedLayer) -> Value {
        let matches = self.matches(pixel, layer);
        if matches.is_empty() {
            return self.unmatched.clone();
        }
        match &self.derive {
            Derive::Presence => json!(1),
            Derive::Source(source) => {
                let v = highest(layer, &matches, source);
                if v.is_null() && self.nulls_to_zero {
                    json!(0)
                } else {
                    v
                }
            }
            Derive::ScaledBy { source, factor } => {
                let v = highest(layer, &matches, source);
                let scale = pixel.attributes.get(factor.as_str()).and_then(Value::as_f64);
                match (scale, v.as_f64()) {
                    (Some(a), Some(b)) => json!(a * b),
                    _ => Value::Null,
                }
            }
        }
    }
}

/// Highest non-null `column` value among `matches`, or null.
fn highest(layer: &IndexedLayer, matches: &Matches, column: &str) -> Value {
    matches
        .iter()
        .filter_map(|&idx| layer.value(idx, column))
        .filter(|v| !v.is_null())
        .max_by(|a, b| compare_values(a, b))
        .cloned()
        .unwrap_or(Value::Null)
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over attribute values: numbers numerically, strings
/// lexically, mixed types by type.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// One value per pixel, in pixel order.
pub fn join_column(grid: &PixelGrid, layer: &IndexedLayer, plan: &JoinPlan) -> Vec<Value> {
    grid.pixels
        .iter()
        .map(|pixel| plan.value_for(pixel, layer))
        .collect()
}

/// Adds `plan.output` to every pixel. The popmul source column never
/// survives on the pixels.
pub fn apply_join(grid: &mut PixelGrid, layer: &IndexedLayer, plan: &JoinPlan) -> Result<()> {
    if !layer.crs.same_as(grid.crs) {
        bail!(
            "attribute layer {} is in {} but pixels are in {}",
            layer.source,
            layer.crs,
            grid.crs
        );
    }
    plan.check(grid, layer)?;

    let values = join_column(grid, layer, plan);
    grid.set_column(&plan.output, values);

    if let Derive::ScaledBy { source, .. } = &plan.derive {
        if *source != plan.output {
            grid.drop_column(source);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::grid::square_around;
    use crate::layer::{Feature, Layer};
    use geo::{Point, Rect, point};
    use geojson::JsonObject;

    const ALBERS: Crs = Crs::Epsg(3310);

    /// Three 100 m pixels in a row, centred at x = 50, 150, 250.
    fn row_grid(pops: &[Option<f64>]) -> PixelGrid {
        let pixels = (0..3)
            .map(|i| {
                let centroid = Point::new(50.0 + 100.0 * i as f64, 50.0);
                let mut attributes = JsonObject::new();
                if let Some(Some(pop)) = pops.get(i) {
                    attributes.insert(POPULATION_COLUMN.into(), json!(pop));
                }
                Pixel {
                    cell: Geometry::Polygon(square_around(centroid, 100.0)),
                    centroid,
                    attributes,
                }
            })
            .collect();
        PixelGrid { crs: ALBERS, pixels }
    }

    fn band(x0: f64, x1: f64, v: Value) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert("v".into(), v);
        properties.insert("unused".into(), json!("noise"));
        Feature {
            geometry: Geometry::Polygon(Rect::new((x0, -10.0), (x1, 110.0)).to_polygon()),
            properties,
        }
    }

    fn spot(p: Point<f64>, v: f64) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert("v".into(), json!(v));
        Feature {
            geometry: Geometry::Point(p),
            properties,
        }
    }

    fn indexed(features: Vec<Feature>) -> IndexedLayer {
        let layer = Layer {
            source: "fixture".into(),
            crs: ALBERS,
            features,
        };
        IndexedLayer::build(&layer, ALBERS).unwrap()
    }

    fn run(kind: &str, grid: &mut PixelGrid, layer: &IndexedLayer) -> Vec<Value> {
        let plan = JoinPlan::new(JoinKind::parse(kind, "out").unwrap(), Some("v"), "out").unwrap();
        apply_join(grid, layer, &plan).unwrap();
        grid.column("out")
            .into_iter()
            .map(|v| v.cloned().unwrap_or(Value::Null))
            .collect()
    }

    #[test]
    fn parse_accepts_exactly_the_six_kinds() {
        for kind in JoinKind::ALL {
            assert_eq!(JoinKind::parse(kind.as_str(), "x").unwrap(), kind);
        }
        let err = JoinKind::parse("sum", "score").unwrap_err();
        assert_eq!(
            err,
            PipelineError::UnknownJoin {
                kind: "sum".into(),
                name: "score".into()
            }
        );
    }

    #[test]
    fn plans_declare_their_predicate_geometry() {
        let geometry = |k| JoinPlan::new(k, Some("v"), "o").unwrap().geometry;
        assert_eq!(geometry(JoinKind::Binary), PredicateGeometry::Centroid);
        assert_eq!(geometry(JoinKind::BinaryFull), PredicateGeometry::Cell);
        assert_eq!(geometry(JoinKind::Numeric), PredicateGeometry::Centroid);
        assert_eq!(geometry(JoinKind::Nearest), PredicateGeometry::Centroid);
        assert_eq!(geometry(JoinKind::Popmul), PredicateGeometry::Centroid);
        assert_eq!(geometry(JoinKind::Max), PredicateGeometry::Cell);
    }

    #[test]
    fn binary_tests_the_centroid_and_binary_full_the_cell() {
        // band reaches x=120: pixel 1's square touches it, its centroid does not
        let layer = indexed(vec![band(0.0, 120.0, json!(1)), band(10.0, 20.0, json!(1))]);

        let mut grid = row_grid(&[]);
        assert_eq!(run("binary", &mut grid, &layer), vec![json!(1), json!(0), json!(0)]);
        assert_eq!(grid.len(), 3);

        let mut grid = row_grid(&[]);
        assert_eq!(run("binary_full", &mut grid, &layer), vec![json!(1), json!(1), json!(0)]);
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn numeric_and_max_keep_the_highest_match() {
        let layer = indexed(vec![
            band(0.0, 120.0, json!(3)),
            band(0.0, 60.0, json!(7)),
            band(110.0, 130.0, json!(9)),
        ]);

        let mut grid = row_grid(&[]);
        assert_eq!(run("numeric", &mut grid, &layer), vec![json!(7), json!(0), json!(0)]);

        let mut grid = row_grid(&[]);
        assert_eq!(run("max", &mut grid, &layer), vec![json!(7), json!(9), json!(0)]);
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn null_values_only_become_zero_for_max() {
        let layer = indexed(vec![band(0.0, 60.0, Value::Null)]);

        let mut grid = row_grid(&[]);
        assert_eq!(run("numeric", &mut grid, &layer), vec![Value::Null, json!(0), json!(0)]);

        let mut grid = row_grid(&[]);
        assert_eq!(run("max", &mut grid, &layer), vec![json!(0), json!(0), json!(0)]);
    }

    #[test]
    fn nearest_breaks_distance_ties_by_highest_value() {
        // pixel 1 (150, 50) is equidistant from both spots
        let layer = indexed(vec![
            spot(point!(x: 40.0, y: 60.0), 1.0),
            spot(point!(x: 260.0, y: 40.0), 2.0),
        ]);
        let mut grid = row_grid(&[]);
        assert_eq!(run("nearest", &mut grid, &layer), vec![json!(1.0), json!(2.0), json!(2.0)]);
        assert!(!grid.has_column("unused"));
    }

    #[test]
    fn popmul_multiplies_population_and_drops_the_source() {
        let layer = indexed(vec![
            spot(point!(x: 50.0, y: 50.0), 0.5),
            spot(point!(x: 250.0, y: 50.0), 4.0),
        ]);
        let mut grid = row_grid(&[Some(10.0), Some(20.0), None]);
        // a stale copy of the source column on the pixels must go too
        grid.pixels[0].attributes.insert("v".into(), json!(99));

        let out = run("popmul", &mut grid, &layer);
        // pixel 1 is equidistant: highest value (4.0) wins
        assert_eq!(out, vec![json!(5.0), json!(80.0), Value::Null]);
        assert!(!grid.has_column("v"));
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn unmatched_nearest_lookups_are_null() {
        let layer = indexed(Vec::new());
        let mut grid = row_grid(&[Some(1.0), Some(1.0), Some(1.0)]);
        assert_eq!(run("popmul", &mut grid, &layer), vec![Value::Null; 3]);
        let mut grid = row_grid(&[]);
        assert_eq!(run("nearest", &mut grid, &layer), vec![Value::Null; 3]);
    }

    #[test]
    fn missing_source_column_is_a_join_error() {
        let layer = indexed(vec![band(0.0, 60.0, json!(1))]);
        let mut grid = row_grid(&[]);
        let plan = JoinPlan::new(JoinKind::Numeric, Some("absent"), "out").unwrap();
        let err = apply_join(&mut grid, &layer, &plan).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingColumn { column, .. }) if column == "absent"
        ));
        assert!(!grid.has_column("out"));
    }

    #[test]
    fn popmul_requires_a_population_column() {
        let layer = indexed(vec![spot(point!(x: 0.0, y: 0.0), 1.0)]);
        let mut grid = row_grid(&[]);
        let plan = JoinPlan::new(JoinKind::Popmul, Some("v"), "out").unwrap();
        let err = apply_join(&mut grid, &layer, &plan).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::MissingPopulation(POPULATION_COLUMN.into()))
        );
    }

    #[test]
    fn value_order_is_numeric_then_lexical() {
        assert_eq!(compare_values(&json!(10), &json!(9.5)), Ordering::Greater);
        assert_eq!(compare_values(&json!("R1"), &json!("C2")), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(0)), Ordering::Less);
    }
}
