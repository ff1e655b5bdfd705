//! One product, one output spec, every resolved area

use super::{
    adjust_area_def, check_coverage, missing_variables, sector_for_area, write_to_database, ProcessTimes,
    ProcflowContext,
};
use crate::alg_xarray::{get_alg_xarray, AlgXarrayOptions, ADJUSTMENT_ID};
use crate::area::pad_area_definition;
use crate::config::RunConfig;
use crate::dataset::DatasetBundle;
use crate::duplicates::remove_duplicates;
use crate::errors::{ProcflowError, Result};
use crate::ledger::{log_final_products, run_comparisons, set_comparison_path, write_output_file_list, FinalProducts};
use crate::plugins::database::check_db_credentials;
use crate::plugins::{DbTarget, Kwargs, OutputCall, ReadRequest};
use crate::product::ProductFamily;
use crate::render::{plot_data, process_sectored_data_output, process_xarray_dict_to_output_format, ProductFile};
use crate::sectoring::verify_area_def;
use crate::sectors::get_area_defs_from_command_line_args;
use std::path::PathBuf;
use tracing::{error, info};

pub const PROCFLOW_NAME: &str = "single_source";

/// Produce `config.product_name` for every area resolved from `config.sectors`.
///
/// Returns the summed comparison result, 0 when nothing was compared.
///
/// # Errors
///
/// Configuration and plugin contract violations abort the run. Areas without coverage,
/// data or sufficient coverage are skipped.
pub fn single_source(ctx: &ProcflowContext, fnames: &[PathBuf], config: &RunConfig) -> Result<i32> {
    let mut times = ProcessTimes::new();
    let mut final_products = FinalProducts::new();
    let mut removed_products: Vec<PathBuf> = Vec::new();

    let product_name = config
        .product_name
        .as_deref()
        .ok_or_else(|| ProcflowError::configuration("single_source requires a product name"))?;
    let reader_name = config
        .reader_name
        .as_deref()
        .ok_or_else(|| ProcflowError::configuration("single_source requires a reader name"))?;
    let output = &config.output;
    let sectors = &config.sectors;

    let db_writer = if config.database.product_db {
        let writer = config.database.writer_for(None).ok_or_else(|| {
            ProcflowError::configuration("product_db requested without a product_db_writer")
        })?;
        ctx.registry.database_writer(writer)?;
        check_db_credentials()?;
        Some(writer)
    } else {
        None
    };

    let target = set_comparison_path(
        None,
        config.compare_outputs_module.as_deref(),
        config.compare_path.as_deref(),
        product_name,
        PROCFLOW_NAME,
        &output.output_format,
    );

    let reader = ctx.registry.reader(reader_name)?;
    let mut xobjs = reader.read(fnames, &ReadRequest::metadata_only())?;
    let source_name = xobjs.source_name()?;
    let product = ctx.catalog.get(product_name, &source_name)?;
    let variables = product.variables.clone();
    let family = product.family;

    let partial_read = config.sectored_read || config.resampled_read;
    let data_driven = sectors.needs_data_for_area_defs();
    let full_request = ReadRequest {
        self_register_dataset: sectors.self_register_dataset.as_deref(),
        self_register_source: sectors.self_register_source.as_deref(),
        ..ReadRequest::full(Some(&variables))
    };
    if !partial_read && data_driven {
        xobjs = reader.read(fnames, &full_request)?;
    }

    let area_defs = get_area_defs_from_command_line_args(sectors, &xobjs, &ctx.registry, true)?;
    if !area_defs.is_empty() && !data_driven && !partial_read {
        xobjs = reader.read(fnames, &full_request)?;
    }

    let mut unsectored_xdict: Option<DatasetBundle> = None;
    match family {
        ProductFamily::UnsectoredXarrayDictToOutputFormat => {
            let xdict = reader.read(fnames, &ReadRequest::full(None))?;
            let files = process_xarray_dict_to_output_format(ctx, &xdict, &variables, product_name, output, None)?;
            final_products
                .entry(&target)
                .files
                .extend(ProductFile::paths(&files));
        }
        ProductFamily::UnsectoredXarrayDictAreaToOutputFormat => {
            unsectored_xdict = Some(reader.read(fnames, &ReadRequest::full(None))?);
        }
        _ => {}
    }

    for area_def in &area_defs {
        if let Some(xdict) = &unsectored_xdict {
            let files =
                process_xarray_dict_to_output_format(ctx, xdict, &variables, product_name, output, Some(area_def))?;
            final_products
                .entry(&target)
                .files
                .extend(ProductFile::paths(&files));
            continue;
        }

        info!("NEXT area definition: {}", area_def.area_id);
        let area_id = area_def.area_id.clone();
        let pad_area_def = pad_area_definition(area_def, Some(&source_name), false);

        if partial_read {
            match reader.read(fnames, &ReadRequest::sectored(Some(&variables), &pad_area_def)) {
                Ok(bundle) => xobjs = bundle,
                Err(ProcflowError::Coverage(msg)) => {
                    error!("SKIPPING no coverage for {}, {}", area_def.name, msg);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        times.start(&area_id);
        let pad_sect = sector_for_area(&xobjs, area_def, &pad_area_def, &variables)?;
        if pad_sect.is_empty() {
            info!("SKIPPING no sectored xarrays returned for {}", area_def.name);
            continue;
        }
        let metadata = pad_sect.metadata()?;
        if let (Some(start), Some(end)) = (metadata.start_datetime(), metadata.end_datetime()) {
            if !verify_area_def(&area_defs, &pad_area_def, start, end) {
                info!("SKIPPING duplicate area_def, out of time range, for {}", area_def.name);
                continue;
            }
        }

        let sectored_outputs =
            process_sectored_data_output(ctx, &pad_sect, &variables, product_name, output, Some(area_def))?;
        if !sectored_outputs.is_empty() {
            final_products
                .entry(&target)
                .files
                .extend(ProductFile::paths(&sectored_outputs));
            continue;
        }

        let mut area_def = area_def.clone();
        if let Some(adjuster) = &sectors.adjust_area_def {
            let Some(adjusted) =
                adjust_area_def(ctx, adjuster, &pad_sect, &area_def, &variables, &sectors.adjust_variables)?
            else {
                continue;
            };
            area_def = adjusted.area_def;
            final_products.entry(&target).files.extend(adjusted.extra_files);
        }

        let missing = missing_variables(&pad_sect, &variables);
        if !missing.is_empty() {
            info!(
                "SKIPPING No coverage or required variables {:?} for {} {}",
                missing, source_name, area_def.name
            );
            continue;
        }

        let output_plugin = ctx.registry.output_format(&output.output_format)?;
        let mut alg_xarray = if matches!(output_plugin.call, OutputCall::XarrayData(_)) {
            get_alg_xarray(
                ctx,
                &pad_sect,
                &pad_area_def,
                product_name,
                &AlgXarrayOptions::unsectored().resampled_read(config.resampled_read),
            )?
        } else if area_def.sector_type.uses_unsectored_data() {
            get_alg_xarray(
                ctx,
                &pad_sect,
                &pad_area_def,
                product_name,
                &AlgXarrayOptions::unsectored()
                    .resampled_read(config.resampled_read)
                    .with_variables(&variables),
            )?
        } else {
            get_alg_xarray(
                ctx,
                &pad_sect,
                &area_def,
                product_name,
                &AlgXarrayOptions::default().resampled_read(config.resampled_read),
            )?
        };
        if let Some(adjustment_id) = area_def.sector_info.get(ADJUSTMENT_ID) {
            info!("ADDING filename extra field {} {}", ADJUSTMENT_ID, adjustment_id);
            alg_xarray.add_filename_extra_field(ADJUSTMENT_ID, adjustment_id.clone());
        }

        let coverage = check_coverage(ctx, &alg_xarray, product_name, &area_def, output)?;
        if !coverage.is_sufficient() {
            info!(
                "Insufficient coverage {} / {} for data products for {}, {} required SKIPPING",
                coverage.coverage, coverage.fname_coverage, area_def.name, coverage.minimum
            );
            continue;
        }

        let curr_products = plot_data(
            ctx,
            output,
            &alg_xarray,
            &area_def,
            product_name,
            &Kwargs::new(),
            None,
        )?;
        let report = remove_duplicates(&ctx.registry, &curr_products, true)?;
        removed_products.extend(report.removed);

        let entry = final_products.entry(&target);
        entry.files.extend(ProductFile::paths(&curr_products));
        if let Some(writer) = db_writer {
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
        times.finish(&area_id);
    }

    info!("The following products were produced from procflow {}", PROCFLOW_NAME);
    log_final_products(&final_products, &removed_products, "SINGLESOURCESUCCESS");

    if let Some(list_path) = &config.output_file_list_fname {
        write_output_file_list(list_path, &final_products.all_files(), &config.outdirs_root())?;
    }

    let retval = run_comparisons(&ctx.registry, &final_products)?;

    info!("READER_NAME: {}", reader_name);
    info!("PRODUCT_NAME: {}", product_name);
    info!("NUM_PRODUCTS: {}", final_products.all_files().len());
    info!("NUM_DELETED_PRODUCTS: {}", removed_products.len());
    times.log_summary("single_source procflow");
    Ok(retval)
}
