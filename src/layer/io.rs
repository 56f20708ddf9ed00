use anyhow::{Context, Result, bail};
use geo::{Centroid, Geometry};
use geojson::{FeatureCollection, GeoJson, JsonObject};
use log::{debug, warn};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use super::types::{Feature, Layer, Pixel, PixelGrid};
use crate::crs::Crs;

fn read_collection(path: &Path) -> Result<(Crs, Vec<geojson::Feature>)> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let gj: GeoJson = serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("parse GeoJSON {}", path.display()))?;
    match gj {
        GeoJson::FeatureCollection(fc) => {
            let crs = Crs::from_member(fc.foreign_members.as_ref().and_then(|m| m.get("crs")))
                .with_context(|| format!("crs of {}", path.display()))?;
            Ok((crs, fc.features))
        }
        GeoJson::Feature(feature) => {
            let crs = Crs::from_member(feature.foreign_members.as_ref().and_then(|m| m.get("crs")))
                .with_context(|| format!("crs of {}", path.display()))?;
            Ok((crs, vec![feature]))
        }
        GeoJson::Geometry(geometry) => Ok((Crs::Crs84, vec![geojson::Feature::from(geometry)])),
    }
}

/// Converts features to geo geometries. Null geometries are skipped with a
/// warning unless `strict`, where they are an error.
fn decode_features(path: &Path, raw: Vec<geojson::Feature>, strict: bool) -> Result<Vec<Feature>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut skipped = 0usize;
    for (idx, feature) in raw.into_iter().enumerate() {
        let Some(geometry) = feature.geometry else {
            if strict {
                bail!("feature {idx} of {} has no geometry", path.display());
            }
            skipped += 1;
            continue;
        };
        let geometry = Geometry::<f64>::try_from(geometry)
            .with_context(|| format!("feature {idx} of {}", path.display()))?;
        out.push(Feature {
            geometry,
            properties: feature.properties.unwrap_or_default(),
        });
    }
    if skipped > 0 {
        warn!("{}: skipped {} features without geometry", path.display(), skipped);
    }
    Ok(out)
}

pub fn read_layer(path: &Path) -> Result<Layer> {
    read_features(path, false)
}

fn read_features(path: &Path, strict: bool) -> Result<Layer> {
    let (crs, raw) = read_collection(path)?;
    let features = decode_features(path, raw, strict)?;
    debug!("read {} features ({}) from {}", features.len(), crs, path.display());
    Ok(Layer {
        source: path.display().to_string(),
        crs,
        features,
    })
}

/// Reads a pixel grid and computes each cell's centroid once. Every feature
/// must carry a geometry, so the pixel count is that of the file.
pub fn read_grid(path: &Path) -> Result<PixelGrid> {
    let layer = read_features(path, true)?;
    let mut pixels = Vec::with_capacity(layer.features.len());
    for (idx, feature) in layer.features.into_iter().enumerate() {
        let Some(centroid) = feature.geometry.centroid() else {
            bail!("pixel {} of {} has an empty geometry", idx, path.display());
        };
        pixels.push(Pixel {
            cell: feature.geometry,
            centroid,
            attributes: feature.properties,
        });
    }
    Ok(PixelGrid {
        crs: layer.crs,
        pixels,
    })
}

/// Writes the grid with its cell geometry and a `crs` member naming its CRS.
pub fn write_grid(path: &Path, grid: &PixelGrid) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
    }

    let features = grid
        .pixels
        .iter()
        .map(|p| geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&p.cell))),
            id: None,
            properties: Some(p.attributes.clone()),
            foreign_members: None,
        })
        .collect();

    let mut members = JsonObject::new();
    members.insert("crs".to_string(), grid.crs.to_member());
    let fc = FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(members),
    };

    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer(&mut w, &fc).with_context(|| format!("write {}", path.display()))?;
    w.flush().with_context(|| format!("flush {}", path.display()))?;
    Ok(())
}
