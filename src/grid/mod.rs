//! Utility-corridor pixel grid.
//!
//! Builds the statewide lattice in California Albers, keeps the centres that
//! fall inside the buffered corridor around utility lines, and writes each
//! survivor as a square cell in CRS84.

pub mod lattice;

use ahash::AHashSet;
use anyhow::{Context, Result};
use geo::{BoundingRect, Coord, Distance, Euclidean, Geometry, Line, Point};
use geojson::JsonObject;
use log::info;
use rayon::prelude::*;
use std::path::Path;

use crate::crs::{CALIFORNIA_ALBERS, Crs, Reprojector};
use crate::layer::{self, Pixel, PixelGrid};
use crate::runtime;
pub use lattice::{DEFAULT_CELL_SIZE, Lattice, square_around};

pub const DEFAULT_BUFFER: f64 = 75.0;

/// Splits a geometry into the segments its corridor is measured against.
/// Points become zero-length segments. Polygons contribute their rings.
pub fn segments(geometry: &Geometry<f64>) -> Vec<Line<f64>> {
    let mut out = Vec::new();
    push_segments(geometry, &mut out);
    out
}

fn push_segments(geometry: &Geometry<f64>, out: &mut Vec<Line<f64>>) {
    match geometry {
        Geometry::Point(p) => out.push(Line::new(p.0, p.0)),
        Geometry::MultiPoint(mp) => out.extend(mp.iter().map(|p| Line::new(p.0, p.0))),
        Geometry::Line(l) => out.push(*l),
        Geometry::LineString(ls) => push_linestring(ls, out),
        Geometry::MultiLineString(mls) => mls.iter().for_each(|ls| push_linestring(ls, out)),
        Geometry::Polygon(poly) => {
            push_linestring(poly.exterior(), out);
            poly.interiors().iter().for_each(|ls| push_linestring(ls, out));
        }
        Geometry::MultiPolygon(mp) => {
            for poly in mp {
                push_segments(&Geometry::Polygon(poly.clone()), out);
            }
        }
        Geometry::Rect(r) => push_segments(&Geometry::Polygon(r.to_polygon()), out),
        Geometry::Triangle(t) => push_segments(&Geometry::Polygon(t.to_polygon()), out),
        Geometry::GeometryCollection(gc) => gc.iter().for_each(|g| push_segments(g, out)),
    }
}

fn push_linestring(ls: &geo::LineString<f64>, out: &mut Vec<Line<f64>>) {
    match ls.0.len() {
        0 => {}
        1 => out.push(Line::new(ls.0[0], ls.0[0])),
        _ => out.extend(ls.lines()),
    }
}

/// Lattice indices whose centre lies within `buffer` of `segment` (closed).
fn cells_near(lattice: &Lattice, segment: &Line<f64>, buffer: f64, acc: &mut AHashSet<(u32, u32)>) {
    let bbox = segment.bounding_rect();
    let min = Coord {
        x: bbox.min().x - buffer,
        y: bbox.min().y - buffer,
    };
    let max = Coord {
        x: bbox.max().x + buffer,
        y: bbox.max().y + buffer,
    };
    let Some((xr, yr)) = lattice.index_window(min, max) else {
        return;
    };
    for i in xr {
        for j in yr.clone() {
            let centre = lattice.point(i, j);
            if Euclidean::distance(&centre, segment) <= buffer {
                acc.insert((i, j));
            }
        }
    }
}

/// Indices of lattice centres inside the corridor, in x-major order.
/// `lines` must already be in the lattice's projection.
pub fn select_in_corridor(lattice: &Lattice, lines: &[Geometry<f64>], buffer: f64) -> Vec<(u32, u32)> {
    let segs: Vec<Line<f64>> = lines.iter().flat_map(segments).collect();
    let pb = runtime::progress_bar(segs.len(), "segments");

    let hits = segs
        .par_iter()
        .fold(AHashSet::default, |mut acc, seg| {
            cells_near(lattice, seg, buffer, &mut acc);
            pb.inc(1);
            acc
        })
        .reduce(AHashSet::default, |mut a, mut b| {
            if a.len() < b.len() {
                std::mem::swap(&mut a, &mut b);
            }
            a.extend(b);
            a
        });
    pb.finish_and_clear();

    let mut cells: Vec<(u32, u32)> = hits.into_iter().collect();
    cells.sort_unstable();
    cells
}

/// Expands lattice cells into squares of edge `cell_size`, in the lattice CRS.
pub fn squares(lattice: &Lattice, cells: &[(u32, u32)], cell_size: f64) -> PixelGrid {
    let pixels = cells
        .iter()
        .map(|&(i, j)| {
            let centre: Point<f64> = lattice.point(i, j);
            Pixel {
                cell: Geometry::Polygon(square_around(centre, cell_size)),
                centroid: centre,
                attributes: JsonObject::new(),
            }
        })
        .collect();
    PixelGrid {
        crs: CALIFORNIA_ALBERS,
        pixels,
    }
}

/// Reprojects every cell (and its centroid) into `to`.
pub fn reproject_grid(grid: PixelGrid, to: Crs) -> Result<PixelGrid> {
    let rp = Reprojector::new(grid.crs, to)?;
    if rp.is_identity() {
        return Ok(PixelGrid { crs: to, ..grid });
    }
    let mut pixels = Vec::with_capacity(grid.pixels.len());
    for p in grid.pixels {
        pixels.push(Pixel {
            cell: rp.geometry(&p.cell)?,
            centroid: Point(rp.coord(p.centroid.0)?),
            attributes: p.attributes,
        });
    }
    Ok(PixelGrid { crs: to, pixels })
}

/// Full generator pass: corridor selection, squares, CRS84 output grid.
pub fn generate(lattice: &Lattice, lines: &layer::Layer, buffer: f64, cell_size: f64) -> Result<PixelGrid> {
    info!(
        "grid dimensions: {} x {} = {} points",
        lattice.xs.len(),
        lattice.ys.len(),
        lattice.n_points()
    );

    let rp = Reprojector::new(lines.crs, CALIFORNIA_ALBERS)?;
    let projected = lines
        .features
        .iter()
        .map(|f| rp.geometry(&f.geometry))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("reproject {} to {}", lines.source, CALIFORNIA_ALBERS))?;
    info!("utility lines: {} features ({})", projected.len(), lines.crs);

    info!("clipping grid to {buffer}m corridor");
    let cells = select_in_corridor(lattice, &projected, buffer);
    let total = lattice.n_points().max(1);
    info!(
        "clipped to {} points ({:.1}% of original)",
        cells.len(),
        cells.len() as f64 / total as f64 * 100.0
    );
    runtime::report_memory("corridor selection")?;

    let grid = squares(lattice, &cells, cell_size);
    info!("created {} square polygons", grid.len());
    reproject_grid(grid, Crs::Crs84)
}

/// CLI entry: read utility lines, generate, write.
pub fn run(input: &Path, output: &Path, buffer: f64) -> Result<()> {
    info!("reading utility lines from {}", input.display());
    let lines = layer::read_layer(input)?;
    let grid = generate(&Lattice::california(), &lines, buffer, DEFAULT_CELL_SIZE)?;
    layer::write_grid(output, &grid)?;
    info!("saved {} features to {} ({})", grid.len(), output.display(), grid.crs);
    Ok(())
}
