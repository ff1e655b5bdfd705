//! procflow: processing workflows for satellite remote-sensing imagery
//!
//! Turns raw satellite data files into rendered imagery and data products. A run reads
//! the input data, resolves the geographic areas to process, and for each area sectors
//! the data, derives the requested product arrays, checks coverage, renders outputs and
//! records what was produced.
//!
//! ## Key Features
//!
//! - **Two procflows**: [`procflow::single_source`] for one product across many sectors,
//!   [`procflow::config_based`] for every output of a YAML job from one read
//! - **Pluggable stages**: readers, algorithms, interpolators, colormaps, output formats,
//!   filename formats, coverage checks and database writers are selected by name from a
//!   [`plugins::PluginRegistry`]
//! - **Memoization**: product arrays are computed once per area and sector type
//! - **Skip and continue**: areas without coverage or data are logged and skipped
//!
//! ## Module Organization
//!
//! - [`dataset`]: in-memory datasets and bundles
//! - [`area`]: area definitions and padding
//! - [`sectoring`]: cutting bundles down to an area
//! - [`sectors`]: resolving the areas to process
//! - [`product`]: product declarations and catalogs
//! - [`plugins`]: plugin interfaces, registry and built-ins
//! - [`alg_xarray`]: the interpolate / algorithm pipeline producing product arrays
//! - [`render`]: filenames, output formats and metadata sidecars
//! - [`procflow`]: the orchestrators
//! - [`ledger`]: produced-file bookkeeping, file lists and comparisons
//! - [`config`]: run configuration and YAML jobs
//! - [`errors`]: centralized error handling
//!
//! ## Usage
//!
//! ```rust,no_run
//! use procflow::prelude::*;
//! use std::path::PathBuf;
//!
//! let catalog = ProductCatalog::from_files(&["products.yaml"]).unwrap();
//! let ctx = ProcflowContext::new(PluginRegistry::with_builtins(), catalog);
//! let run = RunConfig {
//!     output_config: Some(PathBuf::from("job.yaml")),
//!     ..RunConfig::default()
//! };
//! let retval = procflow::procflow::config_based(&ctx, &[], &run).unwrap();
//! ```

pub mod alg_xarray;
pub mod area;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod duplicates;
pub mod errors;
pub mod ledger;
pub mod parallel;
pub mod plugins;
pub mod procflow;
pub mod product;
pub mod render;
pub mod sectoring;
pub mod sectors;

pub use errors::{ProcflowError, Result};

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::area::{AreaDefinition, SectorType};
    pub use crate::config::{OutputSpec, ProcflowConfig, RunConfig};
    pub use crate::dataset::{DataArray, Dataset, DatasetBundle};
    pub use crate::errors::{ProcflowError, Result};
    pub use crate::parallel::init_thread_pool;
    pub use crate::plugins::{Kwargs, PluginRegistry};
    pub use crate::procflow::ProcflowContext;
    pub use crate::product::{ProductCatalog, ProductFamily, ProductSpec};
}
