use anyhow::{Result, anyhow};
use geo::{Coord, Geometry, MapCoords};
use proj4rs::proj::Proj;
use serde_json::{Value, json};
use std::fmt;

use crate::error::PipelineError;

const CRS84_URN: &str = "urn:ogc:def:crs:OGC:1.3:CRS84";

/// Coordinate reference systems the pipeline knows how to move between.
/// Geographic systems always use lon/lat axis order, as GeoJSON does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    Crs84,
    Epsg(u32),
}

/// NAD83 / California Albers: equal-area, metres. The lattice lives here.
pub const CALIFORNIA_ALBERS: Crs = Crs::Epsg(3310);

const SUPPORTED_EPSG: [u32; 6] = [4326, 4269, 3310, 3857, 26910, 26911];

impl Crs {
    /// Accepts the OGC URN forms GeoJSON writers emit as well as bare
    /// `EPSG:<code>` strings.
    pub fn parse(name: &str) -> Result<Crs, PipelineError> {
        let trimmed = name.trim();
        let last = trimmed.rsplit(':').next().unwrap_or(trimmed);
        if last.eq_ignore_ascii_case("CRS84") {
            return Ok(Crs::Crs84);
        }
        if trimmed.to_ascii_uppercase().contains("EPSG") {
            if let Ok(code) = last.parse::<u32>() {
                if SUPPORTED_EPSG.contains(&code) {
                    return Ok(Crs::Epsg(code));
                }
            }
        }
        Err(PipelineError::UnsupportedCrs(trimmed.to_string()))
    }

    /// Reads the legacy GeoJSON `crs` member; an absent member means CRS84.
    pub fn from_member(member: Option<&Value>) -> Result<Crs> {
        let Some(member) = member else {
            return Ok(Crs::Crs84);
        };
        let name = member
            .pointer("/properties/name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("crs member without properties.name: {member}"))?;
        Ok(Crs::parse(name)?)
    }

    pub fn to_member(self) -> Value {
        json!({
            "type": "name",
            "properties": { "name": self.urn() }
        })
    }

    pub fn urn(self) -> String {
        match self {
            Crs::Crs84 => CRS84_URN.to_string(),
            Crs::Epsg(code) => format!("urn:ogc:def:crs:EPSG::{code}"),
        }
    }

    /// CRS84 and EPSG:4326 differ only in declared axis order, which GeoJSON
    /// ignores.
    pub fn same_as(self, other: Crs) -> bool {
        self.canonical() == other.canonical()
    }

    fn canonical(self) -> Crs {
        match self {
            Crs::Epsg(4326) => Crs::Crs84,
            other => other,
        }
    }

    fn is_geographic(self) -> bool {
        matches!(self.canonical(), Crs::Crs84 | Crs::Epsg(4269))
    }

    fn proj_string(self) -> &'static str {
        match self.canonical() {
            Crs::Crs84 => "+proj=longlat +datum=WGS84 +no_defs",
            Crs::Epsg(4269) => "+proj=longlat +ellps=GRS80 +towgs84=0,0,0 +no_defs",
            Crs::Epsg(3310) => {
                "+proj=aea +lat_0=0 +lon_0=-120 +lat_1=34 +lat_2=40.5 +x_0=0 +y_0=-4000000 +ellps=GRS80 +towgs84=0,0,0 +units=m +no_defs"
            }
            Crs::Epsg(3857) => {
                "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
            }
            Crs::Epsg(26910) => "+proj=utm +zone=10 +ellps=GRS80 +towgs84=0,0,0 +units=m +no_defs",
            Crs::Epsg(26911) => "+proj=utm +zone=11 +ellps=GRS80 +towgs84=0,0,0 +units=m +no_defs",
            // parse() only admits the codes above
            Crs::Epsg(_) => "+proj=longlat +datum=WGS84 +no_defs",
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Crs84 => write!(f, "OGC:CRS84"),
            Crs::Epsg(code) => write!(f, "EPSG:{code}"),
        }
    }
}

/// Moves coordinates from one CRS to another. Built once per dataset and
/// reused for every geometry in it.
pub struct Reprojector {
    from: Crs,
    to: Crs,
    projs: Option<(Proj, Proj)>,
}

impl Reprojector {
    pub fn new(from: Crs, to: Crs) -> Result<Self> {
        let projs = if from.same_as(to) {
            None
        } else {
            let src = Proj::from_proj_string(from.proj_string())
                .map_err(|e| anyhow!("build projection for {from}: {e:?}"))?;
            let dst = Proj::from_proj_string(to.proj_string())
                .map_err(|e| anyhow!("build projection for {to}: {e:?}"))?;
            Some((src, dst))
        };
        Ok(Self { from, to, projs })
    }

    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    pub fn coord(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        let Some((src, dst)) = &self.projs else {
            return Ok(c);
        };
        let mut p = if self.from.is_geographic() {
            (c.x.to_radians(), c.y.to_radians(), 0.0)
        } else {
            (c.x, c.y, 0.0)
        };
        proj4rs::transform::transform(src, dst, &mut p)
            .map_err(|e| anyhow!("reproject ({}, {}) {} -> {}: {e:?}", c.x, c.y, self.from, self.to))?;
        if self.to.is_geographic() {
            Ok(Coord {
                x: p.0.to_degrees(),
                y: p.1.to_degrees(),
            })
        } else {
            Ok(Coord { x: p.0, y: p.1 })
        }
    }

    pub fn geometry(&self, g: &Geometry<f64>) -> Result<Geometry<f64>> {
        if self.is_identity() {
            return Ok(g.clone());
        }
        g.try_map_coords(|c| self.coord(c))
    }
}
