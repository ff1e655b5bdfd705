//! Every output of a YAML job from one read of the input data
//!
//! Areas are processed once per requested sector type. The padded and exact sectored
//! bundles are built once per (area, sector type) and shared by every output and
//! product requesting that sector type; derived product datasets are memoized in an
//! [`AlgXarrayCache`] with the same scope.

use super::{adjust_area_def, check_coverage, sector_for_area, write_to_database, ProcessTimes, ProcflowContext};
use crate::alg_xarray::{get_alg_xarray, resolve_interpolator, AlgXarrayOptions};
use crate::area::{pad_area_definition, AreaDefinition};
use crate::cache::{AlgXarrayCache, CacheKind};
use crate::config::{merge_output_overrides, DatabaseArgs, FuseArgs, OrderedMap, OutputSpec, ProcflowConfig, RunConfig};
use crate::dataset::{combine_filename_extra_fields, copy_standard_metadata, Dataset, DatasetBundle};
use crate::duplicates::remove_duplicates;
use crate::errors::{ProcflowError, Result};
use crate::ledger::{
    log_final_products, run_comparisons, set_comparison_path, write_output_file_list, FinalProducts,
    ADJUSTER_PRODUCT, NO_COMPARISON,
};
use crate::plugins::database::check_db_credentials;
use crate::plugins::{DbTarget, Kwargs, OutputCall, ReadRequest, Reader};
use crate::render::{plot_data, process_sectored_data_output, process_xarray_dict_to_output_format, ProductFile};
use crate::sectoring::{sector_xarrays, verify_area_def, SectorOptions};
use crate::sectors::{get_area_defs_from_available_sectors, SectorArgs};
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info, warn};

pub const PROCFLOW_NAME: &str = "config_based";
/// Extra filename field recording which background product was fused in
pub const BACKGROUND_DATA_FIELD: &str = "background_data";

/// Whether anything should be produced for the data start time.
///
/// Without `output_types` the job-level `produce_times` decides. With them, an output
/// is produced when its own `produce_times` (or the job-level one) matches. Data with no
/// start time is always produced.
pub fn produce_current_time(config: &ProcflowConfig, metadata: &Dataset, output_types: Option<&[&str]>) -> bool {
    let Some(start) = metadata.start_datetime() else {
        return true;
    };
    match output_types {
        None => config
            .produce_times
            .as_ref()
            .map_or(true, |times| times.matches(start)),
        Some(output_types) => output_types.iter().any(|output_type| {
            let times = config
                .outputs
                .get(output_type)
                .and_then(|output| output.produce_times.as_ref())
                .or(config.produce_times.as_ref());
            times.map_or(true, |times| times.matches(start))
        }),
    }
}

fn requests_sector_type(output: &OutputSpec, sector_type: &str) -> bool {
    output.requested_sector_type.as_deref() == Some(sector_type)
}

/// Outputs requesting `sector_type`, in declaration order
pub fn get_required_outputs<'c>(
    outputs: &'c OrderedMap<OutputSpec>,
    sector_type: &str,
) -> Vec<(&'c String, &'c OutputSpec)> {
    outputs
        .iter()
        .filter(|(_, output)| requests_sector_type(output, sector_type))
        .collect()
}

pub fn is_required_sector_type(outputs: &OrderedMap<OutputSpec>, sector_type: &str) -> bool {
    outputs
        .iter()
        .any(|(_, output)| requests_sector_type(output, sector_type))
}

/// Whether an output requesting `sector_type` also needs background imagery
pub fn requires_bg(outputs: &OrderedMap<OutputSpec>, sector_type: &str) -> bool {
    outputs
        .iter()
        .any(|(_, output)| output.background_products.is_some() && requests_sector_type(output, sector_type))
}

/// Required variables of every product of every output, optionally limited to outputs
/// requesting one of `sector_types`. Each variable appears once, in first-seen order.
pub fn get_variables_from_available_outputs_dict(
    ctx: &ProcflowContext,
    outputs: &OrderedMap<OutputSpec>,
    source_name: &str,
    sector_types: Option<&[&str]>,
) -> Result<Vec<String>> {
    let mut variables: Vec<String> = Vec::new();
    for (_, output) in outputs.iter() {
        if let Some(sector_types) = sector_types {
            let requested = output.requested_sector_type.as_deref().unwrap_or_default();
            if !sector_types.contains(&requested) {
                continue;
            }
        }
        for product_name in &output.product_names {
            for variable in &ctx.catalog.get(product_name, source_name)?.variables {
                if !variables.contains(variable) {
                    variables.push(variable.clone());
                }
            }
        }
    }
    Ok(variables)
}

/// Database writer for outputs of `sector_type`: per-sector override, then the sector's
/// own writer, then the job-wide writer.
fn db_writer_for<'a>(
    database: &'a DatabaseArgs,
    available_sectors: &'a OrderedMap<SectorArgs>,
    sector_type: Option<&str>,
) -> Result<&'a str> {
    let overridden = sector_type.and_then(|st| database.product_db_writer_override.get(st));
    let sector_writer = sector_type
        .and_then(|st| available_sectors.get(st))
        .and_then(|sector| sector.product_database_writer.as_ref());
    overridden
        .or(sector_writer)
        .or(database.product_db_writer.as_ref())
        .map(String::as_str)
        .ok_or_else(|| {
            ProcflowError::configuration(format!(
                "No product database writer for sector type {}",
                sector_type.unwrap_or("<none>")
            ))
        })
}

/// Build the background product on `area_def` from sectored background data.
///
/// Pre-processed background files already holding the product are interpolated
/// directly. Raw data has the algorithm applied on the padded area first, so both paths
/// produce the same result.
pub fn get_bg_xarray(
    ctx: &ProcflowContext,
    bg_pad_sect: &DatasetBundle,
    area_def: &AreaDefinition,
    product_name: &str,
    resampled_read: bool,
) -> Result<Dataset> {
    let source_name = bg_pad_sect.source_name()?;
    let (interp, interp_args) = resolve_interpolator(ctx, product_name, &source_name)?;
    let varlist = vec![product_name.to_string()];

    let data: Vec<&Dataset> = bg_pad_sect.data_datasets().map(|(_, ds)| ds).collect();
    let mut alg_xarray = match data.as_slice() {
        [only] if only.contains(product_name) => {
            interp.interpolate(area_def, only, Dataset::new(), &varlist, &interp_args)?
        }
        _ => {
            let pad_area_def = pad_area_definition(area_def, None, false);
            let sect_xarray = get_alg_xarray(
                ctx,
                bg_pad_sect,
                &pad_area_def,
                product_name,
                &AlgXarrayOptions::default().resampled_read(resampled_read),
            )?;
            interp.interpolate(area_def, &sect_xarray, Dataset::new(), &varlist, &interp_args)?
        }
    };

    copy_standard_metadata(bg_pad_sect.metadata()?, &mut alg_xarray, false);
    alg_xarray
        .attrs
        .insert("registered_dataset".to_string(), json!(true));
    alg_xarray.area_definition = Some(area_def.clone());
    if alg_xarray.contains(product_name) {
        alg_xarray.add_filename_extra_field(BACKGROUND_DATA_FIELD, json!(format!("bg{}", product_name)));
    }
    Ok(alg_xarray)
}

/// Read limited to `read_area`; `None` when the data does not intersect it.
fn get_sectored_read(
    reader: &dyn Reader,
    fnames: &[PathBuf],
    variables: &[String],
    read_area: &AreaDefinition,
) -> Result<Option<DatasetBundle>> {
    match reader.read(fnames, &ReadRequest::sectored(Some(variables), read_area)) {
        Ok(bundle) => Ok(Some(bundle)),
        Err(ProcflowError::Coverage(msg)) => {
            error!("{} SKIPPING no coverage for {}", msg, read_area.area_id);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Background data read and sectored to the padded area; `None` without coverage.
fn read_background(
    bg_reader: &dyn Reader,
    fuse: &FuseArgs,
    bg_variables: &[String],
    pad_area_def: &AreaDefinition,
) -> Result<Option<DatasetBundle>> {
    let bg_xobjs = match bg_reader.read(&fuse.fuse_files, &ReadRequest::sectored(Some(bg_variables), pad_area_def)) {
        Ok(bundle) => bundle,
        Err(ProcflowError::Coverage(msg)) => {
            warn!("{} SKIPPING - NO COVERAGE FOR BACKGROUND DATA", msg);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let sectored = sector_xarrays(&bg_xobjs, pad_area_def, &SectorOptions::with_varlist(bg_variables))?;
    Ok((!sectored.is_empty()).then_some(sectored))
}

/// Produce every output requesting an `unsectored` sector type, straight from `xobjs`.
pub fn process_unsectored_data_outputs(
    ctx: &ProcflowContext,
    final_products: &mut FinalProducts,
    config: &ProcflowConfig,
    run: &RunConfig,
    database: &DatabaseArgs,
    xobjs: &DatasetBundle,
    variables: &[String],
) -> Result<()> {
    let overrides = run.output_overrides();
    for (sector_type, sector) in config.available_sectors.iter() {
        if !sector.unsectored {
            continue;
        }
        for (output_type, output_spec) in config.outputs.iter() {
            if !requests_sector_type(output_spec, sector_type) {
                continue;
            }
            let output = merge_output_overrides(output_spec, &overrides)?;
            for product_name in &output.product_names {
                let target = set_comparison_path(
                    output.compare_path.as_deref(),
                    output.compare_outputs_module.as_deref(),
                    run.compare_path.as_deref(),
                    product_name,
                    PROCFLOW_NAME,
                    output_type,
                );
                let files = process_xarray_dict_to_output_format(ctx, xobjs, variables, product_name, &output, None)?;
                let entry = final_products.entry(&target);
                entry.files.extend(ProductFile::paths(&files));
                if database.product_db {
                    let writer = db_writer_for(database, &config.available_sectors, Some(sector_type))?;
                    let metadata = xobjs.metadata()?;
                    let writes = write_to_database(
                        ctx,
                        writer,
                        &files,
                        product_name,
                        DbTarget::Dataset(metadata),
                        metadata,
                        None,
                    )?;
                    entry.database_writes.extend(writes);
                }
            }
        }
    }
    Ok(())
}

/// Run the job in `run.output_config` over `fnames` (or the job's own `filenames` glob).
///
/// Returns the summed result of every comparison path in the ledger.
///
/// # Errors
///
/// Configuration and plugin contract violations abort the run. Areas, sector types and
/// products without coverage or data are skipped.
pub fn config_based(ctx: &ProcflowContext, fnames: &[PathBuf], run: &RunConfig) -> Result<i32> {
    let mut times = ProcessTimes::new();
    let mut final_products = FinalProducts::new();
    let mut removed_products: Vec<PathBuf> = Vec::new();

    let config_path = run
        .output_config
        .as_deref()
        .ok_or_else(|| ProcflowError::configuration("config_based requires an output config"))?;
    let config = ProcflowConfig::from_yaml_file(config_path)?;

    let fnames: Vec<PathBuf> = if fnames.is_empty() {
        config.input_files()?
    } else {
        fnames.to_vec()
    };

    let reader_name = config
        .reader_name
        .as_deref()
        .or(run.reader_name.as_deref())
        .ok_or_else(|| ProcflowError::configuration("Output config has no reader_name"))?;
    let fuse = config.fuse.overridden_by(&run.fuse);
    let database = config.database_args(&run.database);

    let background = if fuse.is_configured() {
        let (Some(bg_reader_name), Some(bg_product_name)) = (fuse.fuse_reader.as_deref(), fuse.fuse_product.as_deref())
        else {
            return Err(ProcflowError::configuration("Incomplete fuse configuration"));
        };
        let bg_reader = ctx.registry.reader(bg_reader_name)?;
        let bg_metadata = bg_reader.read(&fuse.fuse_files, &ReadRequest::metadata_only())?;
        let bg_source = bg_metadata.source_name()?;
        let bg_variables = ctx.catalog.get(bg_product_name, &bg_source)?.variables.clone();
        Some((bg_reader, bg_product_name, bg_variables))
    } else {
        None
    };

    if database.product_db {
        check_db_credentials()?;
    }

    let reader = ctx.registry.reader(reader_name)?;
    let mut xobjs = reader.read(&fnames, &ReadRequest::metadata_only())?;
    let source_name = xobjs.source_name()?;

    if !produce_current_time(&config, xobjs.metadata()?, None) {
        info!("SKIPPING ALL PROCESSING no products required for current time");
        return Ok(0);
    }

    let variables = get_variables_from_available_outputs_dict(ctx, &config.outputs, &source_name, None)?;
    let partial_read = config.sectored_read || config.resampled_read;
    if !partial_read {
        xobjs = reader.read(&fnames, &ReadRequest::full(Some(&variables)))?;
    }

    let area_defs = get_area_defs_from_available_sectors(
        &config.available_sectors,
        &run.sectors,
        &xobjs,
        &ctx.registry,
        true,
    )?;

    process_unsectored_data_outputs(ctx, &mut final_products, &config, run, &database, &xobjs, &variables)?;

    let list_area_defs: Vec<AreaDefinition> = area_defs
        .iter()
        .flat_map(|(_, variants)| variants.iter().map(|(_, entry)| entry.area_def.clone()))
        .collect();
    let overrides = run.output_overrides();

    for (area_num, (area_name, variants)) in area_defs.iter().enumerate() {
        info!("NEXT area def id: {} ({} of {})", area_name, area_num + 1, area_defs.len());

        for (sector_num, (sector_type, sector_entry)) in variants.iter().enumerate() {
            let curr_variables = get_variables_from_available_outputs_dict(
                ctx,
                &config.outputs,
                &source_name,
                Some(&[sector_type.as_str()]),
            )?;

            if partial_read {
                let read_area = match config
                    .primary_sector
                    .as_deref()
                    .and_then(|primary| variants.iter().find(|(st, _)| st == primary))
                {
                    Some((_, primary)) => primary.area_def.clone(),
                    None => pad_area_definition(&sector_entry.area_def, None, false),
                };
                match get_sectored_read(reader, &fnames, &curr_variables, &read_area)? {
                    Some(bundle) => xobjs = bundle,
                    None => continue,
                }
            }

            let mut area_def = sector_entry.area_def.clone();
            let pad_area_def = if area_def.sector_type.uses_unsectored_data() {
                area_def.clone()
            } else {
                pad_area_definition(&area_def, Some(&xobjs.source_name()?), false)
            };

            if !is_required_sector_type(&config.outputs, sector_type) {
                info!(
                    "SKIPPING sector type: {}, not required for outputs {:?}",
                    sector_type,
                    config.outputs.keys().collect::<Vec<_>>()
                );
                continue;
            }
            info!(
                "NEXT area def id: {} ({} of {}), sector_type: {} ({} of {})",
                area_name,
                area_num + 1,
                area_defs.len(),
                sector_type,
                sector_num + 1,
                variants.len()
            );
            times.start(&area_def.area_id);

            let pad_sect = sector_for_area(&xobjs, &area_def, &pad_area_def, &curr_variables)?;
            if pad_sect.is_empty() {
                info!("SKIPPING no pad_area_def pad_sect_xarrays returned for {}", area_def.name);
                continue;
            }
            let all_vars = pad_sect.variables_with_data();
            let metadata = pad_sect.metadata()?;
            if let (Some(start), Some(end)) = (metadata.start_datetime(), metadata.end_datetime()) {
                if !verify_area_def(&list_area_defs, &pad_area_def, start, end) {
                    info!("SKIPPING duplicate area_def, out of time range, for {}", area_def.name);
                    continue;
                }
            }

            let mut cache = AlgXarrayCache::new(area_def.area_id.clone(), sector_type.clone());

            if let Some((bg_reader, bg_product_name, bg_variables)) = &background {
                if requires_bg(&config.outputs, sector_type) {
                    if let Some(bg_pad_sect) = read_background(*bg_reader, &fuse, bg_variables, &pad_area_def)? {
                        let bg_xarray = get_bg_xarray(
                            ctx,
                            &bg_pad_sect,
                            &area_def,
                            bg_product_name,
                            fuse.fuse_resampled_read,
                        )?;
                        cache.insert(CacheKind::Background, *bg_product_name, bg_xarray);
                    }
                }
            }

            let requested: &SectorArgs = &sector_entry.requested;
            if let Some(adjuster) = &requested.adjust_area_def {
                let Some(adjusted) = adjust_area_def(
                    ctx,
                    adjuster,
                    &pad_sect,
                    &area_def,
                    &curr_variables,
                    &requested.adjust_variables,
                )?
                else {
                    continue;
                };
                area_def = adjusted.area_def;
                let target = set_comparison_path(
                    requested.compare_path.as_deref(),
                    requested.compare_outputs_module.as_deref(),
                    run.compare_path.as_deref(),
                    ADJUSTER_PRODUCT,
                    PROCFLOW_NAME,
                    ADJUSTER_PRODUCT,
                );
                final_products.entry(&target).files.extend(adjusted.extra_files);
            }

            let sect = sector_for_area(&pad_sect, &area_def, &area_def, &curr_variables)?;
            if sect.is_empty() {
                info!("SKIPPING no area_def sect_xarrays returned for {}", area_def.name);
                continue;
            }

            let required_outputs = get_required_outputs(&config.outputs, sector_type);
            for (output_num, (output_type, output_spec)) in required_outputs.iter().enumerate() {
                if !produce_current_time(&config, xobjs.metadata()?, Some(&[output_type.as_str()])) {
                    info!(
                        "SKIPPING PROCESSING no products required for output_type {} at current time",
                        output_type
                    );
                    continue;
                }
                let output = merge_output_overrides(output_spec, &overrides)?;
                info!(
                    "NEXT area def id: {}, sector_type: {}, output_type: {} ({} of {})",
                    area_name,
                    sector_type,
                    output_type,
                    output_num + 1,
                    required_outputs.len()
                );

                for product_name in &output.product_names {
                    let product_variables = ctx.catalog.get(product_name, &source_name)?.variables.clone();
                    let missing: Vec<&String> = product_variables
                        .iter()
                        .filter(|v| !all_vars.contains(v.as_str()))
                        .collect();
                    if !missing.is_empty() {
                        info!("SKIPPING product {} missing variables {:?}", product_name, missing);
                        continue;
                    }

                    let target = set_comparison_path(
                        output.compare_path.as_deref(),
                        output.compare_outputs_module.as_deref(),
                        run.compare_path.as_deref(),
                        product_name,
                        PROCFLOW_NAME,
                        output_type,
                    );
                    final_products.entry(&target);

                    let sectored_outputs = process_sectored_data_output(
                        ctx,
                        &pad_sect,
                        &product_variables,
                        product_name,
                        &output,
                        Some(&area_def),
                    )?;
                    if !sectored_outputs.is_empty() {
                        let entry = final_products.entry(&target);
                        entry.files.extend(ProductFile::paths(&sectored_outputs));
                        if database.product_db {
                            let writer = db_writer_for(&database, &config.available_sectors, Some(sector_type))?;
                            let writes = write_to_database(
                                ctx,
                                writer,
                                &sectored_outputs,
                                product_name,
                                DbTarget::Area(&area_def),
                                pad_sect.metadata()?,
                                None,
                            )?;
                            entry.database_writes.extend(writes);
                        }
                        continue;
                    }

                    let options = AlgXarrayOptions::default()
                        .resampled_read(config.resampled_read)
                        .with_variables(&product_variables);
                    let output_plugin = ctx.registry.output_format(&output.output_format)?;
                    let mut alg_xarray = if matches!(output_plugin.call, OutputCall::XarrayData(_)) {
                        cache
                            .get_or_try_insert_with(CacheKind::Padded, product_name, || {
                                get_alg_xarray(ctx, &pad_sect, &pad_area_def, product_name, &options)
                            })?
                            .clone()
                    } else if area_def.sector_type.uses_unsectored_data() {
                        let options = AlgXarrayOptions {
                            resector: false,
                            ..options
                        };
                        get_alg_xarray(ctx, &pad_sect, &pad_area_def, product_name, &options)?
                    } else {
                        cache
                            .get_or_try_insert_with(CacheKind::Exact, product_name, || {
                                get_alg_xarray(ctx, &sect, &area_def, product_name, &options)
                            })?
                            .clone()
                    };

                    let coverage = check_coverage(ctx, &alg_xarray, product_name, &area_def, &output)?;
                    if !coverage.is_sufficient() {
                        info!(
                            "Insufficient coverage {} / {} for data products, SKIPPING",
                            coverage.coverage, coverage.fname_coverage
                        );
                        continue;
                    }

                    let bg_xarray = match (&background, &output.background_products) {
                        (Some((_, bg_product_name, _)), Some(_)) => cache.get(CacheKind::Background, bg_product_name),
                        _ => None,
                    };
                    if let Some(bg_xarray) = bg_xarray {
                        combine_filename_extra_fields(bg_xarray, &mut alg_xarray);
                    }

                    let curr_products = plot_data(
                        ctx,
                        &output,
                        &alg_xarray,
                        &area_def,
                        product_name,
                        &Kwargs::new(),
                        bg_xarray,
                    )?;

                    let entry = final_products.entry(&target);
                    entry.files.extend(ProductFile::paths(&curr_products));
                    if database.product_db {
                        let writer = db_writer_for(&database, &config.available_sectors, Some(sector_type))?;
                        let writes = write_to_database(
                            ctx,
                            writer,
                            &curr_products,
                            product_name,
                            DbTarget::Area(&area_def),
                            &alg_xarray,
                            Some(coverage.coverage),
                        )?;
                        entry.database_writes.extend(writes);
                    }

                    if output.remove_duplicates.unwrap_or(false) {
                        let report = remove_duplicates(&ctx.registry, &curr_products, true)?;
                        removed_products.extend(report.removed);
                    }
                    times.finish(&sector_entry.area_def.area_id);
                }
            }
        }
    }

    let retval = run_comparisons(&ctx.registry, &final_products)?;

    info!("The following products were produced from procflow {}", PROCFLOW_NAME);
    log_final_products(&final_products, &removed_products, "CONFIGSUCCESS");

    if let Some(list_path) = &run.output_file_list_fname {
        write_output_file_list(list_path, &final_products.all_files(), &run.outdirs_root())?;
    }

    info!("READER_NAME: {}", reader_name);
    info!("NUM_PRODUCTS: {}", final_products.all_files().len());
    if database.product_db {
        let writes: usize = final_products.iter().map(|(_, e)| e.database_writes.len()).sum();
        info!("NUM_DATABASE_WRITES: {}", writes);
    }
    info!("NUM_DELETED_PRODUCTS: {}", removed_products.len());
    let compared = final_products.iter().filter(|(path, _)| *path != NO_COMPARISON).count();
    info!("NUM_COMPARISON_DIRS: {}", compared);
    times.log_summary("config_based procflow");
    Ok(retval)
}
