use anyhow::{Context, Result};
use geo::Geometry;
use log::{debug, info};
use rayon::prelude::*;
use std::path::PathBuf;

use super::config::{AttributeStep, Config, Dirs, OutputType};
use super::index::IndexedLayer;
use super::join::apply_join;
use crate::layer::{self, Layer, PixelGrid};
use crate::runtime;

/// A jurisdiction's private copy of the grid, threaded through every join of
/// one output type.
#[derive(Debug, Clone)]
pub struct JurisdictionGrid {
    pub name: String,
    pub grid: PixelGrid,
}

#[derive(Debug, Clone)]
pub struct Boundary {
    pub name: String,
    pub layer: Layer,
}

pub fn load_boundaries(config: &Config, dirs: &Dirs) -> Result<Vec<Boundary>> {
    config
        .jurisdictions
        .iter()
        .map(|j| -> Result<Boundary> {
            let path = dirs.data_path(&j.boundary);
            let layer = layer::read_layer(&path)
                .with_context(|| format!("boundary of jurisdiction {}", j.name))?;
            Ok(Boundary {
                name: j.name.clone(),
                layer,
            })
        })
        .collect()
}

/// Pixels whose centroid lies in (or on) the boundary. The boundary is
/// reprojected into the grid's CRS; cells themselves are never cut.
pub fn clip_to_boundary(grid: &PixelGrid, boundary: &Layer) -> Result<PixelGrid> {
    let idx = IndexedLayer::build(boundary, grid.crs)?;
    let pixels = grid
        .pixels
        .iter()
        .filter(|p| !idx.intersecting(&Geometry::Point(p.centroid)).is_empty())
        .cloned()
        .collect();
    Ok(PixelGrid {
        crs: grid.crs,
        pixels,
    })
}

/// Applies every join of `steps`, in order, to every jurisdiction. Each join
/// runs across jurisdictions in parallel; join order is the same for all.
pub fn enrich(jurisdictions: &mut [JurisdictionGrid], steps: &[AttributeStep], dirs: &Dirs) -> Result<()> {
    let Some(crs) = jurisdictions.first().map(|j| j.grid.crs) else {
        return Ok(());
    };
    let total: usize = steps.iter().map(|s| s.plans.len()).sum::<usize>() * jurisdictions.len();
    let pb = runtime::progress_bar(total, "joins");

    for step in steps {
        info!("joining attributes from {}", step.file.display());
        let path = dirs.data_path(&step.file);
        let layer = layer::read_layer(&path)?;
        let idx = IndexedLayer::build(&layer, crs)?;
        debug!("{}: {} features indexed in {}", idx.source, idx.len(), idx.crs);

        for plan in &step.plans {
            pb.set_message(plan.output.clone());
            jurisdictions.par_iter_mut().try_for_each(|j| {
                apply_join(&mut j.grid, &idx, plan)
                    .with_context(|| format!("{} join `{}` for {}", plan.kind.as_str(), plan.output, j.name))?;
                pb.inc(1);
                Ok::<(), anyhow::Error>(())
            })?;
            debug!("joined column {} ({})", plan.output, plan.kind.as_str());
        }
    }
    pb.finish_and_clear();
    Ok(())
}

/// One output type end to end. Join kinds are validated before the grid is
/// read, so a bad configuration writes nothing for this output type.
pub fn run_output_type(config: &Config, dirs: &Dirs, ty: OutputType, boundaries: &[Boundary]) -> Result<Vec<PathBuf>> {
    let spec = config.output(ty)?;
    let steps = spec.plan().with_context(|| format!("{ty} attributes"))?;

    info!("reading {} pixels from {}", ty, spec.pixels.display());
    let grid = layer::read_grid(&dirs.data_path(&spec.pixels))?;
    info!("{} pixels: {} cells ({})", ty, grid.len(), grid.crs);

    let mut jurisdictions = boundaries
        .iter()
        .map(|b| -> Result<JurisdictionGrid> {
            let clipped = clip_to_boundary(&grid, &b.layer)
                .with_context(|| format!("clip {} pixels to {}", ty, b.name))?;
            debug!("{}: {} of {} pixels", b.name, clipped.len(), grid.len());
            Ok(JurisdictionGrid {
                name: b.name.clone(),
                grid: clipped,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    drop(grid);

    enrich(&mut jurisdictions, &steps, dirs)?;

    let mut written = Vec::with_capacity(jurisdictions.len());
    for j in &jurisdictions {
        let out = dirs.output_path(&j.name, ty);
        layer::write_grid(&out, &j.grid)?;
        info!("saved {} ({} pixels)", out.display(), j.grid.len());
        written.push(out);
    }
    runtime::report_memory(ty.as_str())?;
    Ok(written)
}

/// Every output type in order. Aborts at the first error; files already
/// written stay on disk.
pub fn run(config: &Config, dirs: &Dirs) -> Result<Vec<PathBuf>> {
    let boundaries = load_boundaries(config, dirs)?;
    let mut written = Vec::new();
    for ty in OutputType::ALL {
        written.extend(run_output_type(config, dirs, ty, &boundaries)?);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::{Crs, Reprojector};
    use crate::grid::square_around;
    use crate::layer::{Feature, Pixel};
    use geo::{Point, Rect};
    use geojson::JsonObject;

    fn grid_3x1() -> PixelGrid {
        let pixels = (0..3)
            .map(|i| {
                let centroid = Point::new(50.0 + 100.0 * i as f64, 50.0);
                Pixel {
                    cell: Geometry::Polygon(square_around(centroid, 100.0)),
                    centroid,
                    attributes: JsonObject::new(),
                }
            })
            .collect();
        PixelGrid {
            crs: Crs::Epsg(3310),
            pixels,
        }
    }

    fn boundary(x0: f64, x1: f64) -> Layer {
        Layer {
            source: "boundary".into(),
            crs: Crs::Epsg(3310),
            features: vec![Feature {
                geometry: Geometry::Polygon(Rect::new((x0, 0.0), (x1, 100.0)).to_polygon()),
                properties: JsonObject::new(),
            }],
        }
    }

    #[test]
    fn clipping_selects_by_centroid() {
        let grid = grid_3x1();
        // covers most of pixel 0 and a sliver of pixel 1, whose centroid is outside
        let clipped = clip_to_boundary(&grid, &boundary(0.0, 120.0)).unwrap();
        assert_eq!(clipped.len(), 1);
        assert_eq!(clipped.pixels[0].centroid, Point::new(50.0, 50.0));
    }

    #[test]
    fn overlapping_boundaries_share_pixels() {
        let grid = grid_3x1();
        let a = clip_to_boundary(&grid, &boundary(0.0, 200.0)).unwrap();
        let b = clip_to_boundary(&grid, &boundary(100.0, 300.0)).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn boundary_in_lon_lat_is_reprojected_before_clipping() {
        let grid = grid_3x1();
        let planar = boundary(0.0, 200.0);
        let to_geo = Reprojector::new(Crs::Epsg(3310), Crs::Crs84).unwrap();
        let lon_lat = Layer {
            source: "boundary".into(),
            crs: Crs::Crs84,
            features: vec![Feature {
                geometry: to_geo.geometry(&planar.features[0].geometry).unwrap(),
                properties: JsonObject::new(),
            }],
        };
        let clipped = clip_to_boundary(&grid, &lon_lat).unwrap();
        assert_eq!(clipped.crs, Crs::Epsg(3310));
        let xs: Vec<f64> = clipped.pixels.iter().map(|p| p.centroid.x()).collect();
        assert_eq!(xs, vec![50.0, 150.0]);
    }

    #[test]
    fn no_jurisdictions_means_nothing_to_enrich() {
        let mut none: Vec<JurisdictionGrid> = Vec::new();
        enrich(&mut none, &[], &Dirs::default()).unwrap();
    }
}
