use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::join::{JoinKind, JoinPlan};
use crate::error::PipelineError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub jurisdictions: Vec<JurisdictionSpec>,
    #[serde(default)]
    pub priority: Option<OutputSpec>,
    #[serde(default)]
    pub feasibility: Option<OutputSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JurisdictionSpec {
    pub name: String,
    pub boundary: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSpec {
    pub pixels: PathBuf,
    /// `null` and an empty list both mean "no joins".
    #[serde(default)]
    pub attributes: Option<Vec<AttributeSpec>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeSpec {
    pub file: PathBuf,
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSpec {
    /// Source column on the attribute layer; unused by binary joins.
    #[serde(default)]
    pub column: Option<String>,
    pub name: String,
    pub join: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Priority,
    Feasibility,
}

impl OutputType {
    pub const ALL: [OutputType; 2] = [OutputType::Priority, OutputType::Feasibility];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputType::Priority => "priority",
            OutputType::Feasibility => "feasibility",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Joins for one attribute file, validated and in configuration order.
#[derive(Debug, Clone)]
pub struct AttributeStep {
    pub file: PathBuf,
    pub plans: Vec<JoinPlan>,
}

impl Config {
    pub fn output(&self, ty: OutputType) -> Result<&OutputSpec, PipelineError> {
        let spec = match ty {
            OutputType::Priority => self.priority.as_ref(),
            OutputType::Feasibility => self.feasibility.as_ref(),
        };
        spec.ok_or_else(|| PipelineError::MissingOutputType(ty.as_str().to_string()))
    }

    /// Output files are keyed by jurisdiction name, so names must be unique.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if let Some(dup) = self.jurisdictions.iter().map(|j| &j.name).duplicates().next() {
            return Err(PipelineError::DuplicateJurisdiction(dup.clone()));
        }
        Ok(())
    }
}

impl OutputSpec {
    /// Turns every column entry into a join plan, failing on the first
    /// unknown join kind.
    pub fn plan(&self) -> Result<Vec<AttributeStep>, PipelineError> {
        let Some(attributes) = &self.attributes else {
            return Ok(Vec::new());
        };
        attributes
            .iter()
            .map(|att| -> Result<AttributeStep, PipelineError> {
                let plans = att
                    .columns
                    .iter()
                    .map(|c| -> Result<JoinPlan, PipelineError> {
                        let kind = JoinKind::parse(&c.join, &c.name)?;
                        JoinPlan::new(kind, c.column.as_deref(), &c.name)
                    })
                    .collect::<Result<Vec<_>, PipelineError>>()?;
                Ok(AttributeStep {
                    file: att.file.clone(),
                    plans,
                })
            })
            .collect()
    }
}

/// Where configurations are read from, inputs resolved against, and outputs
/// written to.
#[derive(Debug, Clone)]
pub struct Dirs {
    pub config: PathBuf,
    pub data: PathBuf,
    pub out: PathBuf,
}

impl Default for Dirs {
    fn default() -> Self {
        Self {
            config: PathBuf::from("config"),
            data: PathBuf::from("data"),
            out: PathBuf::from("out"),
        }
    }
}

impl Dirs {
    /// Defaults overridden by `PIXELS_CONFIG_DIR`, `PIXELS_DATA_DIR` and
    /// `PIXELS_OUT_DIR`.
    pub fn from_env() -> Self {
        let pick = |key: &str, fallback: PathBuf| {
            std::env::var_os(key)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(fallback)
        };
        let d = Dirs::default();
        Self {
            config: pick("PIXELS_CONFIG_DIR", d.config),
            data: pick("PIXELS_DATA_DIR", d.data),
            out: pick("PIXELS_OUT_DIR", d.out),
        }
    }

    /// `name` is a configuration stem (`bay_area` -> `config/bay_area.yaml`);
    /// an explicit `.yaml`/`.yml` name is used as given.
    pub fn config_path(&self, name: &str) -> PathBuf {
        let has_ext = Path::new(name)
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml");
        if has_ext {
            self.config.join(name)
        } else {
            self.config.join(format!("{name}.yaml"))
        }
    }

    pub fn data_path(&self, file: &Path) -> PathBuf {
        self.data.join(file)
    }

    pub fn output_path(&self, jurisdiction: &str, ty: OutputType) -> PathBuf {
        self.out.join(format!("{jurisdiction}_{ty}.json"))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let f = File::open(path).with_context(|| format!("open config {}", path.display()))?;
    let config: Config =
        serde_yaml::from_reader(f).with_context(|| format!("parse config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
