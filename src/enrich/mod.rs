//! Per-jurisdiction attribute enrichment.
//!
//! The base grid of each output type is clipped once per jurisdiction, every
//! configured join is applied to every jurisdiction in configuration order,
//! and one file per jurisdiction is written.

pub mod config;
pub mod driver;
pub mod index;
pub mod join;

pub use config::*;
pub use driver::*;
pub use index::IndexedLayer;
pub use join::*;
