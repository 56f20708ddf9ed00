//! Utility-corridor pixel grids for California and their per-jurisdiction
//! attribute enrichment.

pub mod crs;
pub mod enrich;
pub mod error;
pub mod grid;
pub mod layer;
pub mod logging;
pub mod runtime;

pub use error::PipelineError;
