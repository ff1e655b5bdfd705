//! Plugin registry and the typed call contracts of every capability kind
//!
//! Each capability kind is a closed enum of call-signature families. A plugin's family
//! is fixed when it is registered, so an unsupported family is rejected up front
//! instead of deep inside the pipeline. Plugins expose a [`ParamSchema`] listing the
//! keyword arguments they accept; everything else is dropped (and logged) before the
//! call.

pub mod adjuster;
pub mod algorithm;
pub mod colormap;
pub mod comparison;
pub mod coverage;
pub mod database;
pub mod filename;
pub mod interpolator;
pub mod output;
pub mod reader;

use crate::errors::{ProcflowError, Result};
use crate::sectors::{DynamicSectorSource, YamlTrackfileParser};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub use adjuster::{AdjusterCall, AdjusterPlugin};
pub use algorithm::{AlgorithmCall, AlgorithmPlugin, ListFamily};
pub use colormap::{ColormapPlugin, ColorsInfo};
pub use comparison::ComparisonPlugin;
pub use coverage::CoveragePlugin;
pub use database::{DatabaseWriterPlugin, DbTarget};
pub use filename::{DuplicateReport, FilenameCall, FilenamePlugin};
pub use interpolator::InterpolatorPlugin;
pub use output::{MetadataRequest, OutputCall, OutputFormatPlugin, RenderRequest};
pub use reader::{NetcdfReader, ReadRequest, Reader};

/// Keyword arguments passed to plugins
pub type Kwargs = serde_json::Map<String, serde_json::Value>;

/// Keyword arguments a plugin accepts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    accepted: Option<Vec<String>>,
}

impl ParamSchema {
    /// Schema accepting any keyword
    pub fn any() -> Self {
        Self { accepted: None }
    }

    pub fn accepts(keys: &[&str]) -> Self {
        Self {
            accepted: Some(keys.iter().map(|k| k.to_string()).collect()),
        }
    }

    pub fn accepts_key(&self, key: &str) -> bool {
        match &self.accepted {
            Some(keys) => keys.iter().any(|k| k == key),
            None => true,
        }
    }
}

/// Drop every keyword the plugin does not accept, logging each removal.
pub fn remove_unsupported_kwargs(kwargs: &Kwargs, schema: &ParamSchema, plugin_name: &str) -> Kwargs {
    let mut supported = Kwargs::new();
    for (key, value) in kwargs {
        if schema.accepts_key(key) {
            supported.insert(key.clone(), value.clone());
        } else {
            warn!("REMOVING UNSUPPORTED {} key {}", plugin_name, key);
        }
    }
    supported
}

/// Name to plugin lookup for every capability kind
#[derive(Default)]
pub struct PluginRegistry {
    readers: HashMap<String, Arc<dyn Reader>>,
    algorithms: HashMap<String, AlgorithmPlugin>,
    interpolators: HashMap<String, InterpolatorPlugin>,
    colormaps: HashMap<String, ColormapPlugin>,
    output_formats: HashMap<String, OutputFormatPlugin>,
    filename_formats: HashMap<String, FilenamePlugin>,
    coverage_checks: HashMap<String, CoveragePlugin>,
    adjusters: HashMap<String, AdjusterPlugin>,
    comparisons: HashMap<String, ComparisonPlugin>,
    database_writers: HashMap<String, DatabaseWriterPlugin>,
    sector_sources: HashMap<String, Arc<dyn DynamicSectorSource>>,
}

fn lookup<'a, T>(map: &'a HashMap<String, T>, kind: &str, name: &str) -> Result<&'a T> {
    map.get(name)
        .ok_or_else(|| ProcflowError::plugin_not_found(kind, name))
}

impl PluginRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with the built-in plugins
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_reader("netcdf", NetcdfReader);
        registry.register_algorithm(algorithm::single_channel_plugin());
        registry.register_interpolator(interpolator::interp_nearest_plugin());
        registry.register_colormap(colormap::linear_norm_plugin());
        registry.register_output_format(output::netcdf_xarray_plugin());
        registry.register_output_format(output::metadata_default_plugin());
        registry.register_filename_format(filename::standard_plugin());
        registry.register_filename_format(filename::data_netcdf_plugin());
        registry.register_filename_format(filename::metadata_default_plugin());
        registry.register_coverage_check(coverage::masked_arrays_plugin());
        registry.register_coverage_check(coverage::center_radius_plugin());
        registry.register_comparison(comparison::compare_outputs_plugin());
        registry.register_sector_source("yaml_trackfile", YamlTrackfileParser);
        registry
    }

    pub fn register_reader(&mut self, name: impl Into<String>, reader: impl Reader + 'static) {
        self.readers.insert(name.into(), Arc::new(reader));
    }

    pub fn register_algorithm(&mut self, plugin: AlgorithmPlugin) {
        self.algorithms.insert(plugin.name.clone(), plugin);
    }

    pub fn register_interpolator(&mut self, plugin: InterpolatorPlugin) {
        self.interpolators.insert(plugin.name.clone(), plugin);
    }

    pub fn register_colormap(&mut self, plugin: ColormapPlugin) {
        self.colormaps.insert(plugin.name.clone(), plugin);
    }

    pub fn register_output_format(&mut self, plugin: OutputFormatPlugin) {
        self.output_formats.insert(plugin.name.clone(), plugin);
    }

    pub fn register_filename_format(&mut self, plugin: FilenamePlugin) {
        self.filename_formats.insert(plugin.name.clone(), plugin);
    }

    pub fn register_coverage_check(&mut self, plugin: CoveragePlugin) {
        self.coverage_checks.insert(plugin.name.clone(), plugin);
    }

    pub fn register_adjuster(&mut self, plugin: AdjusterPlugin) {
        self.adjusters.insert(plugin.name.clone(), plugin);
    }

    pub fn register_comparison(&mut self, plugin: ComparisonPlugin) {
        self.comparisons.insert(plugin.name.clone(), plugin);
    }

    pub fn register_database_writer(&mut self, plugin: DatabaseWriterPlugin) {
        self.database_writers.insert(plugin.name.clone(), plugin);
    }

    pub fn register_sector_source(
        &mut self,
        name: impl Into<String>,
        source: impl DynamicSectorSource + 'static,
    ) {
        self.sector_sources.insert(name.into(), Arc::new(source));
    }

    pub fn reader(&self, name: &str) -> Result<&dyn Reader> {
        lookup(&self.readers, "reader", name).map(|r| r.as_ref())
    }

    pub fn algorithm(&self, name: &str) -> Result<&AlgorithmPlugin> {
        lookup(&self.algorithms, "algorithm", name)
    }

    pub fn interpolator(&self, name: &str) -> Result<&InterpolatorPlugin> {
        lookup(&self.interpolators, "interpolator", name)
    }

    pub fn colormap(&self, name: &str) -> Result<&ColormapPlugin> {
        lookup(&self.colormaps, "colormap", name)
    }

    pub fn output_format(&self, name: &str) -> Result<&OutputFormatPlugin> {
        lookup(&self.output_formats, "output_format", name)
    }

    pub fn filename_format(&self, name: &str) -> Result<&FilenamePlugin> {
        lookup(&self.filename_formats, "filename_format", name)
    }

    pub fn coverage_check(&self, name: &str) -> Result<&CoveragePlugin> {
        lookup(&self.coverage_checks, "coverage_check", name)
    }

    pub fn adjuster(&self, name: &str) -> Result<&AdjusterPlugin> {
        lookup(&self.adjusters, "area_def_adjuster", name)
    }

    pub fn comparison(&self, name: &str) -> Result<&ComparisonPlugin> {
        lookup(&self.comparisons, "comparison", name)
    }

    pub fn database_writer(&self, name: &str) -> Result<&DatabaseWriterPlugin> {
        lookup(&self.database_writers, "database_writer", name)
    }

    pub fn sector_source(&self, name: &str) -> Result<&dyn DynamicSectorSource> {
        lookup(&self.sector_sources, "sector_source", name).map(|s| s.as_ref())
    }
}
