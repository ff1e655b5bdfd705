//! Orchestration engines and the helpers they share
//!
//! [`single_source`] produces one product for every resolved area; [`config_based`]
//! produces every output of a YAML job from a single read of the input data. Both
//! follow the same per-area pipeline: pad, sector, adjust, build the alg xarray, gate on
//! coverage, render, remove duplicates and record database writes.

pub mod config_based;
pub mod single_source;

use crate::area::{AreaDefinition, FULL_SWATH_SOURCES};
use crate::config::OutputSpec;
use crate::dataset::{Dataset, DatasetBundle};
use crate::errors::{ProcflowError, Result};
use crate::plugins::{DbTarget, Kwargs, PluginRegistry};
use crate::product::{CoverageChecks, CoverageKind, ProductCatalog};
use crate::render::ProductFile;
use crate::sectoring::{sector_xarrays, SectorOptions};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::borrow::Cow;
use std::path::PathBuf;
use tracing::info;

pub use config_based::config_based;
pub use single_source::single_source;

/// Plugins and product declarations available to a run
pub struct ProcflowContext {
    pub registry: PluginRegistry,
    pub catalog: ProductCatalog,
}

impl ProcflowContext {
    pub fn new(registry: PluginRegistry, catalog: ProductCatalog) -> Self {
        Self { registry, catalog }
    }
}

/// Run the coverage check of `kind` for a product dataset.
///
/// An output's own coverage checks take precedence over the product's.
pub fn compute_coverage(
    ctx: &ProcflowContext,
    dataset: &Dataset,
    product_name: &str,
    area: &AreaDefinition,
    output_checks: Option<&CoverageChecks>,
    kind: CoverageKind,
) -> Result<f64> {
    let call = match output_checks.and_then(|checks| checks.get(kind)) {
        Some(call) => call.clone(),
        None => {
            let source_name = dataset.source_name().ok_or_else(|| {
                ProcflowError::configuration(format!("{} dataset has no source_name", product_name))
            })?;
            ctx.catalog.get(product_name, source_name)?.coverage_check(kind)
        }
    };
    ctx.registry
        .coverage_check(&call.name)?
        .coverage(dataset, product_name, area, &call.args)
}

/// Image-production and filename coverage of one product against its minimum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageReport {
    pub coverage: f64,
    pub fname_coverage: f64,
    pub minimum: f64,
}

impl CoverageReport {
    /// A product is skipped only when both coverages fall strictly below the minimum.
    pub fn is_sufficient(&self) -> bool {
        !(self.coverage < self.minimum && self.fname_coverage < self.minimum)
    }
}

pub fn check_coverage(
    ctx: &ProcflowContext,
    dataset: &Dataset,
    product_name: &str,
    area: &AreaDefinition,
    output: &OutputSpec,
) -> Result<CoverageReport> {
    let checks = output.coverage_checks.as_ref();
    let coverage = compute_coverage(ctx, dataset, product_name, area, checks, CoverageKind::ImageProduction)?;
    let fname_coverage = compute_coverage(ctx, dataset, product_name, area, checks, CoverageKind::Filename)?;
    let product_minimum = match dataset.source_name() {
        Some(source) => ctx.catalog.get(product_name, source)?.minimum_coverage,
        None => None,
    };
    let minimum = output.minimum_coverage_for(product_name, dataset, product_minimum);
    info!(
        "Required coverage {} for product {}, actual coverage {}",
        minimum, product_name, coverage
    );
    Ok(CoverageReport {
        coverage,
        fname_coverage,
        minimum,
    })
}

/// Sector `bundle` to `target`, or pass it through untouched for areas that consume all
/// available data.
pub fn sector_for_area<'b>(
    bundle: &'b DatasetBundle,
    area: &AreaDefinition,
    target: &AreaDefinition,
    variables: &[String],
) -> Result<Cow<'b, DatasetBundle>> {
    if area.sector_type.uses_unsectored_data() {
        info!("CONTINUE Not sectoring sector_type {}", area.sector_type);
        return Ok(Cow::Borrowed(bundle));
    }
    Ok(Cow::Owned(sector_xarrays(
        bundle,
        target,
        &SectorOptions::with_varlist(variables),
    )?))
}

/// Required variables with no valid data anywhere in the bundle
pub fn missing_variables(bundle: &DatasetBundle, variables: &[String]) -> Vec<String> {
    let with_data = bundle.variables_with_data();
    variables
        .iter()
        .filter(|v| !with_data.contains(v.as_str()))
        .cloned()
        .collect()
}

/// Result of running an area-def adjuster
#[derive(Debug, Clone)]
pub struct AdjustedArea {
    pub area_def: AreaDefinition,
    pub extra_files: Vec<PathBuf>,
}

/// Run the named area-def adjuster.
///
/// Full-swath sources are adjusted on the padded data; everything else on data sectored
/// to the exact area. Returns `None` when exact sectoring leaves nothing.
pub fn adjust_area_def(
    ctx: &ProcflowContext,
    adjuster_name: &str,
    pad_sect: &DatasetBundle,
    area: &AreaDefinition,
    variables: &[String],
    adjust_variables: &[String],
) -> Result<Option<AdjustedArea>> {
    let adjuster = ctx.registry.adjuster(adjuster_name)?;
    info!("Adjusting Area Definition: {}", adjuster_name);
    info!("BEFORE ADJUSTMENT area definition: {}", area.area_id);

    let source_name = pad_sect.source_name()?;
    let sectored = if FULL_SWATH_SOURCES.contains(&source_name.as_str()) {
        Cow::Borrowed(pad_sect)
    } else {
        let sect = sector_for_area(pad_sect, area, area, variables)?;
        if sect.is_empty() {
            info!("SKIPPING no area_def sect_xarrays returned for {}", area.name);
            return Ok(None);
        }
        sect
    };

    let datasets: Vec<&Dataset> = sectored.iter().map(|(_, ds)| ds).collect();
    let (area_def, extra_files) = adjuster.adjust(&datasets, area, variables, adjust_variables)?;
    info!("AFTER ADJUSTMENT area definition: {}", area_def.area_id);
    Ok(Some(AdjustedArea {
        area_def,
        extra_files,
    }))
}

/// Write one database record per produced file; returns the confirmation tokens.
pub fn write_to_database(
    ctx: &ProcflowContext,
    writer_name: &str,
    files: &[ProductFile],
    product_name: &str,
    target: DbTarget<'_>,
    dataset: &Dataset,
    coverage: Option<f64>,
) -> Result<Vec<String>> {
    let writer = ctx.registry.database_writer(writer_name)?;
    let mut confirmations = Vec::with_capacity(files.len());
    for file in files {
        let mut attrs = Kwargs::new();
        if let Some(coverage) = coverage {
            attrs.insert("coverage".to_string(), json!(coverage));
        }
        attrs.insert("product".to_string(), json!(product_name));
        let file_type = file
            .path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        attrs.insert("fileType".to_string(), json!(file_type));
        confirmations.push(writer.write(&file.path, target, dataset, &attrs)?);
    }
    Ok(confirmations)
}

/// Wall-clock timings of each processed area, reported at the end of a run
#[derive(Debug, Clone)]
pub struct ProcessTimes {
    overall_start: DateTime<Utc>,
    areas: Vec<(String, DateTime<Utc>, Option<DateTime<Utc>>)>,
    num_jobs: usize,
}

impl Default for ProcessTimes {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTimes {
    pub fn new() -> Self {
        Self {
            overall_start: Utc::now(),
            areas: Vec::new(),
            num_jobs: 0,
        }
    }

    pub fn start(&mut self, area_id: &str) {
        match self.areas.iter_mut().find(|(id, _, _)| id == area_id) {
            Some(entry) => {
                entry.1 = Utc::now();
                entry.2 = None;
            }
            None => self.areas.push((area_id.to_string(), Utc::now(), None)),
        }
    }

    /// Mark one completed job for `area_id`
    pub fn finish(&mut self, area_id: &str) {
        if let Some(entry) = self.areas.iter_mut().find(|(id, _, _)| id == area_id) {
            entry.2 = Some(Utc::now());
        }
        self.num_jobs += 1;
    }

    pub fn num_jobs(&self) -> usize {
        self.num_jobs
    }

    pub fn log_summary(&self, job_str: &str) {
        for (area_id, start, end) in &self.areas {
            if let Some(end) = end {
                info!(
                    "PROCESSTIME {}: {:.3}s",
                    area_id,
                    (*end - *start).num_milliseconds() as f64 / 1000.0
                );
            }
        }
        let total = Utc::now() - self.overall_start;
        info!(
            "TOTALPROCESSTIME {}: {:.3}s for {} jobs",
            job_str,
            total.num_milliseconds() as f64 / 1000.0,
            self.num_jobs
        );
    }
}
