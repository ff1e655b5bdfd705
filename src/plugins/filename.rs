//! Filename format plugins and their optional duplicate-removal hooks

use super::{Kwargs, ParamSchema};
use crate::area::AreaDefinition;
use crate::config::outdirs_root;
use crate::dataset::Dataset;
use crate::errors::{ProcflowError, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Family `xarray_metadata_to_filename`: `(metadata dataset, kwargs)`
pub type MetadataFilenameFn = Arc<dyn Fn(&Dataset, &Kwargs) -> Result<Option<PathBuf>> + Send + Sync>;
/// Family `xarray_area_product_to_filename`: `(area, dataset, product, kwargs)`
pub type AreaProductFilenameFn =
    Arc<dyn Fn(&AreaDefinition, &Dataset, &str, &Kwargs) -> Result<Option<PathBuf>> + Send + Sync>;
/// Families `standard` and `data`: `(area, dataset, product, coverage, kwargs)`
pub type CoverageFilenameFn =
    Arc<dyn Fn(&AreaDefinition, &Dataset, &str, f64, &Kwargs) -> Result<Option<PathBuf>> + Send + Sync>;
/// Family `standard_metadata`: `(area, dataset, product, product filename, kwargs)`
pub type SidecarFilenameFn =
    Arc<dyn Fn(&AreaDefinition, &Dataset, &str, &Path, &Kwargs) -> Result<Option<PathBuf>> + Send + Sync>;
/// `<format>_remove_duplicates(filename, remove_files)`
pub type RemoveDuplicatesFn = Arc<dyn Fn(&Path, bool) -> Result<DuplicateReport> + Send + Sync>;

#[derive(Clone)]
pub enum FilenameCall {
    Standard(CoverageFilenameFn),
    Data(CoverageFilenameFn),
    XarrayMetadataToFilename(MetadataFilenameFn),
    XarrayAreaProductToFilename(AreaProductFilenameFn),
    StandardMetadata(SidecarFilenameFn),
}

impl FilenameCall {
    pub fn family(&self) -> &'static str {
        match self {
            FilenameCall::Standard(_) => "standard",
            FilenameCall::Data(_) => "data",
            FilenameCall::XarrayMetadataToFilename(_) => "xarray_metadata_to_filename",
            FilenameCall::XarrayAreaProductToFilename(_) => "xarray_area_product_to_filename",
            FilenameCall::StandardMetadata(_) => "standard_metadata",
        }
    }
}

/// Files removed and kept by a duplicate-removal hook
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateReport {
    pub removed: Vec<PathBuf>,
    pub saved: Vec<PathBuf>,
}

/// Inputs a filename formatter may draw on; which are required depends on the family
#[derive(Debug, Clone, Copy)]
pub struct FilenameArgs<'a> {
    pub area_def: Option<&'a AreaDefinition>,
    pub dataset: &'a Dataset,
    pub product_name: &'a str,
    pub coverage: Option<f64>,
    pub product_filename: Option<&'a Path>,
    pub kwargs: &'a Kwargs,
}

#[derive(Clone)]
pub struct FilenamePlugin {
    pub name: String,
    pub params: ParamSchema,
    pub call: FilenameCall,
    pub remove_duplicates: Option<RemoveDuplicatesFn>,
}

impl fmt::Debug for FilenamePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilenamePlugin")
            .field("name", &self.name)
            .field("family", &self.call.family())
            .field("remove_duplicates", &self.remove_duplicates.is_some())
            .finish()
    }
}

impl FilenamePlugin {
    pub fn new(name: impl Into<String>, params: ParamSchema, call: FilenameCall) -> Self {
        Self {
            name: name.into(),
            params,
            call,
            remove_duplicates: None,
        }
    }

    pub fn with_remove_duplicates<F>(mut self, func: F) -> Self
    where
        F: Fn(&Path, bool) -> Result<DuplicateReport> + Send + Sync + 'static,
    {
        self.remove_duplicates = Some(Arc::new(func));
        self
    }

    pub fn family(&self) -> &'static str {
        self.call.family()
    }

    /// Build the filename, or `None` when the formatter declines to produce one.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an input the family requires is missing.
    pub fn filename(&self, args: &FilenameArgs<'_>) -> Result<Option<PathBuf>> {
        let kwargs = super::remove_unsupported_kwargs(args.kwargs, &self.params, &self.name);
        let missing = |what: &str| {
            ProcflowError::configuration(format!(
                "Filename format {} ({}) requires {}",
                self.name,
                self.family(),
                what
            ))
        };
        match &self.call {
            FilenameCall::XarrayMetadataToFilename(func) => func(args.dataset, &kwargs),
            FilenameCall::XarrayAreaProductToFilename(func) => {
                let area = args.area_def.ok_or_else(|| missing("an area definition"))?;
                func(area, args.dataset, args.product_name, &kwargs)
            }
            FilenameCall::Standard(func) | FilenameCall::Data(func) => {
                let area = args.area_def.ok_or_else(|| missing("an area definition"))?;
                let coverage = args.coverage.ok_or_else(|| missing("a coverage value"))?;
                func(area, args.dataset, args.product_name, coverage, &kwargs)
            }
            FilenameCall::StandardMetadata(func) => {
                let area = args.area_def.ok_or_else(|| missing("an area definition"))?;
                let product_filename = args
                    .product_filename
                    .ok_or_else(|| missing("a product filename"))?;
                func(area, args.dataset, args.product_name, product_filename, &kwargs)
            }
        }
    }
}

fn basedir(kwargs: &Kwargs) -> PathBuf {
    kwargs
        .get("basedir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| outdirs_root().join("preprocessed").join("annotated_imagery"))
}

fn coverage_token(coverage: f64) -> String {
    format!("{:.2}", coverage).replace('.', "p")
}

fn parse_coverage_token(token: &str) -> Option<f64> {
    token.replacen('p', ".", 1).parse().ok()
}

fn extra_fields_token(dataset: &Dataset) -> Option<String> {
    let fields = dataset.filename_extra_fields()?;
    let values: Vec<String> = fields
        .values()
        .map(|v| match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        })
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join("_"))
    }
}

fn timestamped_name(
    area: &AreaDefinition,
    dataset: &Dataset,
    product_name: &str,
    coverage: f64,
    extension: &str,
) -> Result<(String, String)> {
    let source = dataset.source_name().unwrap_or("unknown").to_string();
    let start = dataset.start_datetime().ok_or_else(|| {
        ProcflowError::configuration(format!("{} has no start_datetime for its filename", product_name))
    })?;
    let mut name = format!(
        "{}.{}.{}.{}.{}",
        start.format("%Y%m%d.%H%M%S"),
        source,
        product_name,
        area.name,
        coverage_token(coverage)
    );
    if let Some(extra) = extra_fields_token(dataset) {
        name.push('.');
        name.push_str(&extra);
    }
    name.push('.');
    name.push_str(extension.trim_start_matches('.'));
    Ok((source, name))
}

/// `<basedir>/<source>/<area>/<product>/<YYYYmmdd.HHMMSS>.<source>.<product>.<area>.<coverage>[.<extra>].<ext>`
pub fn standard_filename(
    area: &AreaDefinition,
    dataset: &Dataset,
    product_name: &str,
    coverage: f64,
    kwargs: &Kwargs,
) -> Result<Option<PathBuf>> {
    let extension = kwargs
        .get("extension")
        .and_then(|v| v.as_str())
        .unwrap_or("png");
    let (source, name) = timestamped_name(area, dataset, product_name, coverage, extension)?;
    Ok(Some(
        basedir(kwargs)
            .join(source)
            .join(&area.name)
            .join(product_name)
            .join(name),
    ))
}

/// Keep only the highest-coverage file among those differing from `fname` in coverage alone.
pub fn standard_remove_duplicates(fname: &Path, remove_files: bool) -> Result<DuplicateReport> {
    let mut report = DuplicateReport::default();
    let Some(name) = fname.file_name().and_then(|n| n.to_str()) else {
        return Ok(report);
    };
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() < 7 {
        debug!("{} does not follow the standard layout", name);
        return Ok(report);
    }
    let prefix = parts[..5].join(".");
    let suffix = parts[6..].join(".");
    let dir = fname.parent().unwrap_or_else(|| Path::new("."));
    let pattern = format!(
        "{}/{}.*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(&prefix),
        glob::Pattern::escape(&suffix)
    );

    let mut candidates: Vec<(PathBuf, f64)> = Vec::new();
    for entry in glob::glob(&pattern)?.flatten() {
        let Some(candidate) = entry.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let candidate_parts: Vec<&str> = candidate.split('.').collect();
        if candidate_parts.len() != parts.len() || candidate_parts[6..].join(".") != suffix {
            continue;
        }
        if let Some(coverage) = parse_coverage_token(candidate_parts[5]) {
            candidates.push((entry.clone(), coverage));
        }
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    let best = candidates
        .iter()
        .fold(None::<&(PathBuf, f64)>, |best, cand| match best {
            Some(b) if b.1 >= cand.1 => Some(b),
            _ => Some(cand),
        })
        .map(|(path, _)| path.clone());

    for (path, _) in &candidates {
        if Some(path) == best.as_ref() {
            report.saved.push(path.clone());
        } else {
            if remove_files {
                info!("DELETING duplicate file with less coverage {}", path.display());
                fs::remove_file(path)?;
            }
            report.removed.push(path.clone());
        }
    }
    Ok(report)
}

/// `<basedir>/<source>/<area>/<YYYYmmdd.HHMMSS>.<source>.<product>.<area>.<coverage>.nc`
pub fn data_netcdf_filename(
    area: &AreaDefinition,
    dataset: &Dataset,
    product_name: &str,
    coverage: f64,
    kwargs: &Kwargs,
) -> Result<Option<PathBuf>> {
    let (source, name) = timestamped_name(area, dataset, product_name, coverage, "nc")?;
    let basedir = kwargs
        .get("basedir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| outdirs_root().join("preprocessed").join("sectored"));
    Ok(Some(basedir.join(source).join(&area.name).join(name)))
}

/// `<metadata_dir>/<sector_type>/<area>/<product filename>.yaml`
pub fn metadata_default_filename(
    area: &AreaDefinition,
    _dataset: &Dataset,
    _product_name: &str,
    product_filename: &Path,
    kwargs: &Kwargs,
) -> Result<Option<PathBuf>> {
    let metadata_dir = kwargs
        .get("metadata_dir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| outdirs_root().join("metadata"));
    let Some(product_name) = product_filename.file_name() else {
        return Ok(None);
    };
    let mut name = product_name.to_os_string();
    name.push(".yaml");
    Ok(Some(
        metadata_dir
            .join(area.sector_type.as_str())
            .join(&area.name)
            .join(name),
    ))
}

pub(crate) fn standard_plugin() -> FilenamePlugin {
    FilenamePlugin::new(
        "standard",
        ParamSchema::accepts(&["basedir", "extension"]),
        FilenameCall::Standard(Arc::new(standard_filename)),
    )
    .with_remove_duplicates(standard_remove_duplicates)
}

pub(crate) fn data_netcdf_plugin() -> FilenamePlugin {
    FilenamePlugin::new(
        "data_netcdf",
        ParamSchema::accepts(&["basedir"]),
        FilenameCall::Data(Arc::new(data_netcdf_filename)),
    )
}

pub(crate) fn metadata_default_plugin() -> FilenamePlugin {
    FilenamePlugin::new(
        "metadata_default",
        ParamSchema::accepts(&["metadata_dir"]),
        FilenameCall::StandardMetadata(Arc::new(metadata_default_filename)),
    )
}
