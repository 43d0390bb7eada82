//! Spatial enablement scoring engine.
//!
//! Turns heterogeneous geospatial inputs (vector layers, rasters, tabular
//! coordinates, fixed index values) into grid-aligned 0-5 score rasters
//! through pluggable indicator workflows, then combines them through a
//! three-level weighted hierarchy: indicators are aggregated into
//! factors, factors into dimensions, and the three dimensions into the
//! composite women's-employment-enablement (WEE) score, classified into
//! six ordinal enablement classes.
//!
//! Entry points: [`config::load_config`] + [`config::validate_config`]
//! for the YAML run definition, [`engine::Engine`] to execute a run, and
//! [`summary::RunSummary`] for the outcome report.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod grid;
pub mod hierarchy;
pub mod layer;
pub mod store;
pub mod summary;
pub mod workflows;

pub use engine::Engine;
pub use error::{EngineError, Result};
pub use summary::RunSummary;
