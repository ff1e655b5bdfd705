//! Output filenames, render dispatch and metadata sidecars
//!
//! Renderers that are handed their output filenames must produce exactly that set.
//! Every other outcome is a contract violation reported as
//! [`ProcflowError::UnexpectedProducts`].

use crate::area::AreaDefinition;
use crate::config::OutputSpec;
use crate::dataset::{Dataset, DatasetBundle, METADATA_KEY};
use crate::errors::{ProcflowError, Result};
use crate::plugins::filename::FilenameArgs;
use crate::plugins::{remove_unsupported_kwargs, ColorsInfo, Kwargs, MetadataRequest, OutputCall, RenderRequest};
use crate::procflow::{compute_coverage, ProcflowContext};
use crate::product::{CoverageKind, ProductFamily};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

/// Metadata output format used when an output names none
pub const DEFAULT_METADATA_OUTPUT_FORMAT: &str = "metadata_default";
/// Filename families that do not take a coverage value
pub const FILENAME_FAMILIES_WITHOUT_COVERAGE: [&str; 3] = [
    "xarray_metadata_to_filename",
    "xarray_area_product_to_filename",
    "standard_metadata",
];
/// Filename families usable with dataset-bundle output formats
pub const FILENAME_FAMILIES_FOR_XARRAY_DICT: [&str; 2] =
    ["xarray_metadata_to_filename", "xarray_area_product_to_filename"];

/// One file produced by a render, with the filename format that named it
#[derive(Debug, Clone, PartialEq)]
pub struct ProductFile {
    pub path: PathBuf,
    pub product_name: String,
    /// `None` when the renderer chose the name itself
    pub filename_format: Option<String>,
    pub is_metadata: bool,
}

impl ProductFile {
    pub fn paths(files: &[ProductFile]) -> Vec<PathBuf> {
        files.iter().map(|f| f.path.clone()).collect()
    }
}

/// A pre-computed output filename and its optional metadata sidecar
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedOutput {
    pub path: PathBuf,
    pub filename_format: String,
    pub filename_format_kwargs: Kwargs,
    pub product_name: String,
    pub metadata_filename_format: Option<String>,
    pub metadata_path: Option<PathBuf>,
}

fn paths_of(planned: &[PlannedOutput]) -> Vec<PathBuf> {
    planned.iter().map(|p| p.path.clone()).collect()
}

/// Fail unless `produced` is exactly the `expected` set.
pub fn check_expected_products(expected: &[PathBuf], produced: &[PathBuf]) -> Result<()> {
    let expected_set: BTreeSet<&PathBuf> = expected.iter().collect();
    let produced_set: BTreeSet<&PathBuf> = produced.iter().collect();
    if expected_set != produced_set || expected.len() != produced.len() {
        return Err(ProcflowError::UnexpectedProducts {
            expected: expected.to_vec(),
            produced: produced.to_vec(),
        });
    }
    Ok(())
}

/// Build one output filename with the named filename format.
///
/// Coverage-bearing families compute the product's filename coverage first.
pub fn get_filename(
    ctx: &ProcflowContext,
    filename_format: &str,
    product_name: &str,
    dataset: &Dataset,
    area: Option<&AreaDefinition>,
    output: &OutputSpec,
    kwargs: &Kwargs,
    supported_families: Option<&[&str]>,
) -> Result<Option<PathBuf>> {
    let plugin = ctx.registry.filename_format(filename_format)?;
    if let Some(supported) = supported_families {
        if !supported.contains(&plugin.family()) {
            return Err(ProcflowError::configuration(format!(
                "UNSUPPORTED filename_format {} family {}, must be one of {:?}",
                filename_format,
                plugin.family(),
                supported
            )));
        }
    }
    let coverage = if FILENAME_FAMILIES_WITHOUT_COVERAGE.contains(&plugin.family()) {
        None
    } else {
        let area = area.ok_or_else(|| {
            ProcflowError::configuration(format!(
                "Filename format {} needs an area definition for its coverage",
                filename_format
            ))
        })?;
        Some(compute_coverage(
            ctx,
            dataset,
            product_name,
            area,
            output.coverage_checks.as_ref(),
            CoverageKind::Filename,
        )?)
    };
    plugin.filename(&FilenameArgs {
        area_def: area,
        dataset,
        product_name,
        coverage,
        product_filename: None,
        kwargs,
    })
}

/// Product and metadata filenames for every filename format of an output.
///
/// Formats that decline to name a file are skipped.
pub fn get_output_filenames(
    ctx: &ProcflowContext,
    output: &OutputSpec,
    product_name: &str,
    dataset: &Dataset,
    area: Option<&AreaDefinition>,
    supported_families: Option<&[&str]>,
) -> Result<Vec<PlannedOutput>> {
    let mut planned = Vec::new();
    for filename_format in &output.filename_formats {
        let kwargs = output.filename_format_kwargs(filename_format);
        let Some(path) = get_filename(
            ctx,
            filename_format,
            product_name,
            dataset,
            area,
            output,
            &kwargs,
            supported_families,
        )?
        else {
            continue;
        };

        let metadata_filename_format = output.metadata_filename_format(filename_format).map(str::to_string);
        let mut metadata_path = None;
        if let Some(metadata_format) = &metadata_filename_format {
            let plugin = ctx.registry.filename_format(metadata_format)?;
            if plugin.family() == "standard_metadata" {
                let metadata_kwargs = output.metadata_filename_format_kwargs(metadata_format);
                metadata_path = plugin.filename(&FilenameArgs {
                    area_def: area,
                    dataset,
                    product_name,
                    coverage: None,
                    product_filename: Some(&path),
                    kwargs: &metadata_kwargs,
                })?;
            }
        }

        planned.push(PlannedOutput {
            path,
            filename_format: filename_format.clone(),
            filename_format_kwargs: kwargs,
            product_name: product_name.to_string(),
            metadata_filename_format,
            metadata_path,
        });
    }
    Ok(planned)
}

/// Write a metadata sidecar for each planned output that has one.
///
/// Returns the primary files followed by the sidecars actually written. Each metadata
/// writer must report exactly its one sidecar.
pub fn output_all_metadata(
    ctx: &ProcflowContext,
    output: &OutputSpec,
    planned: &[PlannedOutput],
    dataset: &Dataset,
    area: Option<&AreaDefinition>,
) -> Result<Vec<ProductFile>> {
    let mut final_outputs: Vec<ProductFile> = planned
        .iter()
        .map(|p| ProductFile {
            path: p.path.clone(),
            product_name: p.product_name.clone(),
            filename_format: Some(p.filename_format.clone()),
            is_metadata: false,
        })
        .collect();

    let metadata_format = output
        .metadata_output_format
        .as_deref()
        .unwrap_or(DEFAULT_METADATA_OUTPUT_FORMAT);
    for item in planned {
        let Some(metadata_fname) = &item.metadata_path else {
            continue;
        };
        let area = area.ok_or_else(|| {
            ProcflowError::configuration("Metadata sidecars need an area definition")
        })?;
        let plugin = ctx.registry.output_format(metadata_format)?;
        let produced = plugin.write_metadata(&MetadataRequest {
            area_def: area,
            dataset,
            metadata_fname,
            product_filename: &item.path,
            kwargs: &output.metadata_output_format_kwargs,
        })?;
        check_expected_products(std::slice::from_ref(metadata_fname), &produced)?;
        final_outputs.push(ProductFile {
            path: metadata_fname.clone(),
            product_name: item.product_name.clone(),
            filename_format: Some(item.filename_format.clone()),
            is_metadata: true,
        });
    }
    Ok(final_outputs)
}

fn merged_output_kwargs(output: &OutputSpec, extra: &Kwargs) -> Kwargs {
    let mut kwargs = output.output_format_kwargs.clone();
    for (k, v) in extra {
        kwargs.insert(k.clone(), v.clone());
    }
    kwargs
}

/// Bundle handed to dataset-bundle renderers: METADATA plus the product dataset
fn single_dataset_bundle(dataset: &Dataset, product_name: &str) -> DatasetBundle {
    let mut bundle = DatasetBundle::new();
    bundle.insert(METADATA_KEY, Dataset::with_attrs(dataset.attrs.clone()));
    bundle.insert(product_name, dataset.clone());
    bundle
}

fn accepted_as_is(produced: Vec<PathBuf>, product_name: &str, family: &str) -> Vec<ProductFile> {
    info!("Not checking output file list for output family {}", family);
    produced
        .into_iter()
        .map(|path| ProductFile {
            path,
            product_name: product_name.to_string(),
            filename_format: None,
            is_metadata: false,
        })
        .collect()
}

/// Output kwargs plus the product title and plotting parameters, for dataset-bundle renderers
fn xrdict_render_kwargs(merged: &Kwargs, title: &str, colors: Option<&ColorsInfo>) -> Result<Kwargs> {
    let mut kwargs = merged.clone();
    kwargs.insert("product_name_title".to_string(), JsonValue::String(title.to_string()));
    if let Some(colors) = colors {
        kwargs.insert("mpl_colors_info".to_string(), serde_json::to_value(colors)?);
    }
    Ok(kwargs)
}

/// Render one product dataset with the output's format and write its metadata sidecars.
///
/// Dataset-bundle renderers receive METADATA plus the product dataset, with the product
/// title and colormap added to their kwargs. `background` reaches overlay renderers.
pub fn plot_data(
    ctx: &ProcflowContext,
    output: &OutputSpec,
    dataset: &Dataset,
    area: &AreaDefinition,
    product_name: &str,
    render_kwargs: &Kwargs,
    background: Option<&Dataset>,
) -> Result<Vec<ProductFile>> {
    let plugin = ctx.registry.output_format(&output.output_format)?;
    let planned = if plugin.call.requires_output_filenames() {
        get_output_filenames(ctx, output, product_name, dataset, Some(area), None)?
    } else {
        Vec::new()
    };
    let expected = paths_of(&planned);
    let merged = merged_output_kwargs(output, render_kwargs);
    let kwargs = remove_unsupported_kwargs(&merged, &plugin.params, &plugin.name);

    if let OutputCall::XarrayData(func) = &plugin.call {
        let varnames = vec![
            product_name.to_string(),
            "latitude".to_string(),
            "longitude".to_string(),
        ];
        let produced = func(dataset, &varnames, &expected, &kwargs)?;
        check_expected_products(&expected, &produced)?;
        return output_all_metadata(ctx, output, &planned, dataset, Some(area));
    }

    let source_name = dataset
        .source_name()
        .map(str::to_string)
        .ok_or_else(|| ProcflowError::configuration(format!("{} has no source_name", product_name)))?;
    let product = ctx.catalog.get(product_name, &source_name)?;
    let colors = match &product.colormap {
        Some(call) => Some(ctx.registry.colormap(&call.name)?.colors_info(&call.args)?),
        None => None,
    };
    let request = RenderRequest {
        dataset,
        product_name,
        output_fnames: &expected,
        product_name_title: product.display_name(),
        colors: colors.as_ref(),
        background,
        kwargs: &kwargs,
    };

    match &plugin.call {
        OutputCall::Image(func) | OutputCall::ImageOverlay(func) => {
            let produced = func(area, &request)?;
            check_expected_products(&expected, &produced)?;
        }
        OutputCall::Unprojected(func) => {
            let produced = func(&request)?;
            check_expected_products(&expected, &produced)?;
        }
        OutputCall::XrdictAreaProductOutfnamesToOutlist(func) => {
            let bundle = single_dataset_bundle(dataset, product_name);
            let xrdict_kwargs = remove_unsupported_kwargs(
                &xrdict_render_kwargs(&merged, product.display_name(), colors.as_ref())?,
                &plugin.params,
                &plugin.name,
            );
            let produced = func(&bundle, Some(area), product_name, &expected, &xrdict_kwargs)?;
            check_expected_products(&expected, &produced)?;
        }
        OutputCall::XrdictAreaProductToOutlist(func) => {
            let bundle = single_dataset_bundle(dataset, product_name);
            let xrdict_kwargs = remove_unsupported_kwargs(
                &xrdict_render_kwargs(&merged, product.display_name(), colors.as_ref())?,
                &plugin.params,
                &plugin.name,
            );
            let produced = func(&bundle, Some(area), product_name, &xrdict_kwargs)?;
            let mut outputs = accepted_as_is(produced, product_name, plugin.family());
            outputs.extend(output_all_metadata(ctx, output, &planned, dataset, Some(area))?);
            return Ok(outputs);
        }
        OutputCall::XarrayData(_)
        | OutputCall::XrdictVarlistOutfnamesToOutlist(_)
        | OutputCall::StandardMetadata(_) => return Err(plugin.unsupported()),
    }

    output_all_metadata(ctx, output, &planned, dataset, Some(area))
}

/// Hand a whole dataset bundle to a dataset-bundle output format.
///
/// # Errors
///
/// Fails with [`ProcflowError::UnsupportedFamily`] unless the product is one of the
/// dataset-bundle families, and with an unsupported-output error for renderers that
/// take a single dataset.
pub fn process_xarray_dict_to_output_format(
    ctx: &ProcflowContext,
    bundle: &DatasetBundle,
    variables: &[String],
    product_name: &str,
    output: &OutputSpec,
    area: Option<&AreaDefinition>,
) -> Result<Vec<ProductFile>> {
    let source_name = bundle.source_name()?;
    let product = ctx.catalog.get(product_name, &source_name)?;
    if !matches!(
        product.family,
        ProductFamily::SectoredXarrayDictToOutputFormat
            | ProductFamily::UnsectoredXarrayDictToOutputFormat
            | ProductFamily::UnsectoredXarrayDictAreaToOutputFormat
    ) {
        return Err(ProcflowError::unsupported_family(
            "xarray_dict_to_output_format",
            product.family.as_str(),
        ));
    }

    let plugin = ctx.registry.output_format(&output.output_format)?;
    let metadata = bundle.metadata()?;
    let planned = match &plugin.call {
        OutputCall::XrdictVarlistOutfnamesToOutlist(_) | OutputCall::XrdictAreaProductOutfnamesToOutlist(_) => {
            get_output_filenames(
                ctx,
                output,
                product_name,
                metadata,
                area,
                Some(&FILENAME_FAMILIES_FOR_XARRAY_DICT),
            )?
        }
        _ => Vec::new(),
    };
    let expected = paths_of(&planned);
    let kwargs = remove_unsupported_kwargs(&output.output_format_kwargs, &plugin.params, &plugin.name);

    match &plugin.call {
        OutputCall::XrdictVarlistOutfnamesToOutlist(func) => {
            let produced = func(bundle, variables, &expected, &kwargs)?;
            check_expected_products(&expected, &produced)?;
        }
        OutputCall::XrdictAreaProductOutfnamesToOutlist(func) => {
            let produced = func(bundle, area, product_name, &expected, &kwargs)?;
            check_expected_products(&expected, &produced)?;
        }
        OutputCall::XrdictAreaProductToOutlist(func) => {
            let produced = func(bundle, area, product_name, &kwargs)?;
            return Ok(accepted_as_is(produced, product_name, plugin.family()));
        }
        _ => return Err(plugin.unsupported()),
    }

    output_all_metadata(ctx, output, &planned, metadata, area)
}

/// Fast path for `sectored_xarray_dict_to_output_format` products; empty otherwise.
pub fn process_sectored_data_output(
    ctx: &ProcflowContext,
    bundle: &DatasetBundle,
    variables: &[String],
    product_name: &str,
    output: &OutputSpec,
    area: Option<&AreaDefinition>,
) -> Result<Vec<ProductFile>> {
    let source_name = bundle.source_name()?;
    let product = ctx.catalog.get(product_name, &source_name)?;
    if product.family != ProductFamily::SectoredXarrayDictToOutputFormat {
        return Ok(Vec::new());
    }
    process_xarray_dict_to_output_format(ctx, bundle, variables, product_name, output, area)
}
