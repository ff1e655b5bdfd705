//! Run configuration, output specifications and YAML job files
//!
//! [`RunConfig`] is built once from the command line and never mutated. Components get
//! the narrow piece they need: [`SectorArgs`] for area resolution, [`OutputSpec`] for
//! rendering, [`DatabaseArgs`] for product database writes.

use crate::dataset::Dataset;
use crate::errors::{ProcflowError, Result};
use crate::plugins::Kwargs;
use crate::product::CoverageChecks;
use crate::sectors::SectorArgs;
use chrono::Timelike;
use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable holding the output root
pub const OUTDIRS_ENV: &str = "GEOIPS_OUTDIRS";
/// Token replacing the output root in output file lists
pub const OUTDIRS_TOKEN: &str = "$GEOIPS_OUTDIRS";
/// Coverage threshold used when nothing else declares one
pub const DEFAULT_MINIMUM_COVERAGE: f64 = 10.0;
/// Reserved key applying filename kwargs to every filename format
pub const ALL_KEY: &str = "all";

/// Output root from `GEOIPS_OUTDIRS`, defaulting to `./outdirs`
pub fn outdirs_root() -> PathBuf {
    env::var(OUTDIRS_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("outdirs"))
}

/// Insertion-ordered string-keyed map deserialized from a YAML mapping
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.iter().map(|(k, _)| k)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }

            fn visit_unit<E>(self) -> std::result::Result<Self::Value, E> {
                Ok(OrderedMap::default())
            }
        }

        deserializer.deserialize_any(OrderedMapVisitor(PhantomData))
    }
}

/// Production time filter, evaluated against the data start time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProduceTimes {
    #[serde(default)]
    pub required_minutes: Option<Vec<u32>>,
    #[serde(default)]
    pub required_hours: Option<Vec<u32>>,
}

impl ProduceTimes {
    pub fn matches(&self, time: chrono::DateTime<chrono::Utc>) -> bool {
        let minute_ok = self
            .required_minutes
            .as_ref()
            .map_or(true, |m| m.contains(&time.minute()));
        let hour_ok = self
            .required_hours
            .as_ref()
            .map_or(true, |h| h.contains(&time.hour()));
        minute_ok && hour_ok
    }
}

/// One requested output ("output_dict")
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(default)]
    pub requested_sector_type: Option<String>,
    pub output_format: String,
    #[serde(default)]
    pub output_format_kwargs: Kwargs,
    #[serde(default)]
    pub filename_formats: Vec<String>,
    /// Keyed by filename format, or `all`
    #[serde(default)]
    pub filename_formats_kwargs: HashMap<String, Kwargs>,
    #[serde(default)]
    pub metadata_output_format: Option<String>,
    #[serde(default)]
    pub metadata_output_format_kwargs: Kwargs,
    /// Product filename format to metadata filename format
    #[serde(default)]
    pub metadata_filename_formats: HashMap<String, String>,
    /// Keyed by metadata filename format, or `all`
    #[serde(default)]
    pub metadata_filename_formats_kwargs: HashMap<String, Kwargs>,
    #[serde(default)]
    pub product_names: Vec<String>,
    #[serde(default)]
    pub compare_path: Option<String>,
    #[serde(default)]
    pub compare_outputs_module: Option<String>,
    #[serde(default)]
    pub background_products: Option<BackgroundProducts>,
    #[serde(default)]
    pub remove_duplicates: Option<bool>,
    #[serde(default)]
    pub minimum_coverage: Option<f64>,
    /// Per-product minimum coverage overrides
    #[serde(default)]
    pub minimum_coverages: HashMap<String, f64>,
    #[serde(default)]
    pub coverage_checks: Option<CoverageChecks>,
    #[serde(default)]
    pub produce_times: Option<ProduceTimes>,
}

/// Background imagery fused under a product
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackgroundProducts {
    pub product_name: String,
    #[serde(default)]
    pub source_name: Option<String>,
}

impl OutputSpec {
    pub fn new(output_format: impl Into<String>) -> Self {
        Self {
            output_format: output_format.into(),
            ..Self::default()
        }
    }

    /// Filename kwargs for one format: the `all` entry overlaid with the per-format entry
    pub fn filename_format_kwargs(&self, filename_format: &str) -> Kwargs {
        merge_all_and_specific(&self.filename_formats_kwargs, filename_format)
    }

    pub fn metadata_filename_format_kwargs(&self, metadata_format: &str) -> Kwargs {
        merge_all_and_specific(&self.metadata_filename_formats_kwargs, metadata_format)
    }

    pub fn metadata_filename_format(&self, filename_format: &str) -> Option<&str> {
        self.metadata_filename_formats
            .get(filename_format)
            .map(String::as_str)
    }

    /// Effective minimum coverage for a product: override, then dataset attribute,
    /// then product declaration, then the default.
    pub fn minimum_coverage_for(
        &self,
        product_name: &str,
        dataset: &Dataset,
        product_minimum: Option<f64>,
    ) -> f64 {
        self.minimum_coverages
            .get(product_name)
            .copied()
            .or(self.minimum_coverage)
            .or_else(|| dataset.minimum_coverage())
            .or(product_minimum)
            .unwrap_or(DEFAULT_MINIMUM_COVERAGE)
    }
}

fn merge_all_and_specific(map: &HashMap<String, Kwargs>, key: &str) -> Kwargs {
    let mut merged = map.get(ALL_KEY).cloned().unwrap_or_default();
    if let Some(specific) = map.get(key) {
        for (k, v) in specific {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

fn is_absent(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => true,
        Some(JsonValue::Object(map)) => map.is_empty(),
        Some(JsonValue::Array(items)) => items.is_empty(),
        _ => false,
    }
}

/// Merge command-line overrides into an output spec.
///
/// For each override field: a field absent from the spec is added wholesale; when both
/// sides are mappings and the override carries `all`, a spec without `all` receives the
/// override's `all` value, and a spec with `all` has the override's `all` sub-keys merged
/// into it; in every other case the override replaces the spec field.
pub fn merge_output_overrides(spec: &OutputSpec, overrides: &Kwargs) -> Result<OutputSpec> {
    let mut value = serde_json::to_value(spec)?;
    let fields = value
        .as_object_mut()
        .ok_or_else(|| ProcflowError::configuration("Output spec is not a mapping"))?;

    for (field, override_value) in overrides {
        if is_absent(Some(override_value)) {
            continue;
        }
        if is_absent(fields.get(field)) {
            debug!("Adding command line {} to output spec", field);
            fields.insert(field.clone(), override_value.clone());
            continue;
        }
        let override_all = override_value.as_object().and_then(|o| o.get(ALL_KEY));
        let existing = fields.get_mut(field).and_then(|v| v.as_object_mut());
        match (override_all, existing) {
            (Some(override_all), Some(existing)) => match existing.get_mut(ALL_KEY) {
                Some(JsonValue::Object(existing_all)) => {
                    if let Some(sub_keys) = override_all.as_object() {
                        for (k, v) in sub_keys {
                            existing_all.insert(k.clone(), v.clone());
                        }
                    }
                }
                _ => {
                    existing.insert(ALL_KEY.to_string(), override_all.clone());
                }
            },
            _ => {
                fields.insert(field.clone(), override_value.clone());
            }
        }
    }
    Ok(serde_json::from_value(value)?)
}

/// Narrowed database options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseArgs {
    pub product_db: bool,
    pub product_db_writer: Option<String>,
    /// Sector type to writer name
    pub product_db_writer_override: HashMap<String, String>,
}

impl DatabaseArgs {
    pub fn writer_for(&self, sector_type: Option<&str>) -> Option<&str> {
        sector_type
            .and_then(|st| self.product_db_writer_override.get(st))
            .map(String::as_str)
            .or(self.product_db_writer.as_deref())
    }
}

/// Immutable run configuration built from the command line
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub reader_name: Option<String>,
    pub reader_kwargs: Kwargs,
    pub product_name: Option<String>,
    /// Output spec for single-source runs
    pub output: OutputSpec,
    pub sectors: SectorArgs,
    pub database: DatabaseArgs,
    pub sectored_read: bool,
    pub resampled_read: bool,
    pub output_file_list_fname: Option<PathBuf>,
    pub compare_path: Option<String>,
    pub compare_outputs_module: Option<String>,
    /// Config-based job file
    pub output_config: Option<PathBuf>,
    /// Command-line overrides merged into every config-based output spec
    pub output_overrides: Kwargs,
    pub fuse: FuseArgs,
    pub outdirs_root: Option<PathBuf>,
}

impl RunConfig {
    pub fn outdirs_root(&self) -> PathBuf {
        self.outdirs_root.clone().unwrap_or_else(outdirs_root)
    }

    /// Overrides applied to each output spec: explicit overrides plus the singular
    /// filename kwargs from the command line wrapped under `all`.
    pub fn output_overrides(&self) -> Kwargs {
        let mut overrides = self.output_overrides.clone();
        let wrap = |kwargs: &HashMap<String, Kwargs>| -> Option<JsonValue> {
            kwargs.get(ALL_KEY).map(|all| {
                let mut map = Kwargs::new();
                map.insert(ALL_KEY.to_string(), JsonValue::Object(all.clone()));
                JsonValue::Object(map)
            })
        };
        if let Some(v) = wrap(&self.output.filename_formats_kwargs) {
            overrides
                .entry("filename_formats_kwargs".to_string())
                .or_insert(v);
        }
        if let Some(v) = wrap(&self.output.metadata_filename_formats_kwargs) {
            overrides
                .entry("metadata_filename_formats_kwargs".to_string())
                .or_insert(v);
        }
        overrides
    }
}

/// Background fusion options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuseArgs {
    #[serde(default)]
    pub fuse_files: Vec<PathBuf>,
    #[serde(default)]
    pub fuse_reader: Option<String>,
    #[serde(default)]
    pub fuse_product: Option<String>,
    #[serde(default)]
    pub fuse_resampled_read: bool,
    #[serde(default)]
    pub fuse_sectored_read: bool,
}

impl FuseArgs {
    pub fn is_configured(&self) -> bool {
        !self.fuse_files.is_empty() && self.fuse_reader.is_some() && self.fuse_product.is_some()
    }

    /// Command-line values take precedence over the job file
    pub fn overridden_by(&self, cli: &FuseArgs) -> FuseArgs {
        FuseArgs {
            fuse_files: if cli.fuse_files.is_empty() {
                self.fuse_files.clone()
            } else {
                cli.fuse_files.clone()
            },
            fuse_reader: cli.fuse_reader.clone().or_else(|| self.fuse_reader.clone()),
            fuse_product: cli.fuse_product.clone().or_else(|| self.fuse_product.clone()),
            fuse_resampled_read: cli.fuse_resampled_read || self.fuse_resampled_read,
            fuse_sectored_read: cli.fuse_sectored_read || self.fuse_sectored_read,
        }
    }
}

/// A config-based job, read from YAML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcflowConfig {
    #[serde(default)]
    pub reader_name: Option<String>,
    #[serde(default)]
    pub reader_kwargs: Kwargs,
    /// Glob of input files used when none are given on the command line
    #[serde(default)]
    pub filenames: Option<String>,
    #[serde(default)]
    pub available_sectors: OrderedMap<SectorArgs>,
    #[serde(default)]
    pub outputs: OrderedMap<OutputSpec>,
    #[serde(flatten)]
    pub fuse: FuseArgs,
    #[serde(default)]
    pub sectored_read: bool,
    #[serde(default)]
    pub resampled_read: bool,
    #[serde(default)]
    pub primary_sector: Option<String>,
    #[serde(default)]
    pub product_db: bool,
    #[serde(default)]
    pub product_db_writer: Option<String>,
    #[serde(default)]
    pub product_db_writer_override: HashMap<String, String>,
    #[serde(default)]
    pub produce_times: Option<ProduceTimes>,
}

impl ProcflowConfig {
    /// Parse a job file after expanding `${VAR}` environment references.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let expanded = expand_env_vars(text)?;
        Ok(serde_yaml::from_str(&expanded)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&text)?;
        info!(
            "Loaded {} sectors and {} outputs from {}",
            config.available_sectors.len(),
            config.outputs.len(),
            path.display()
        );
        Ok(config)
    }

    /// Input files matching the `filenames` glob, sorted
    pub fn input_files(&self) -> Result<Vec<PathBuf>> {
        let Some(pattern) = &self.filenames else {
            return Ok(Vec::new());
        };
        let mut files: Vec<PathBuf> = glob::glob(pattern)?.flatten().collect();
        files.sort();
        Ok(files)
    }

    pub fn database_args(&self, cli: &DatabaseArgs) -> DatabaseArgs {
        let mut overrides = self.product_db_writer_override.clone();
        overrides.extend(cli.product_db_writer_override.clone());
        DatabaseArgs {
            product_db: cli.product_db || self.product_db,
            product_db_writer: cli
                .product_db_writer
                .clone()
                .or_else(|| self.product_db_writer.clone()),
            product_db_writer_override: overrides,
        }
    }
}

/// Replace `${NAME}` with the value of environment variable `NAME`.
///
/// # Errors
///
/// Returns a configuration error naming the first unset variable.
pub fn expand_env_vars(text: &str) -> Result<String> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ProcflowError::configuration(e.to_string()))?;
    let mut missing: Option<String> = None;
    let expanded = pattern.replace_all(text, |caps: &regex::Captures| match env::var(&caps[1]) {
        Ok(value) => value,
        Err(_) => {
            missing.get_or_insert_with(|| caps[1].to_string());
            String::new()
        }
    });
    match missing {
        Some(name) => Err(ProcflowError::configuration(format!(
            "Environment variable {} referenced in config is not set",
            name
        ))),
        None => Ok(expanded.into_owned()),
    }
}
