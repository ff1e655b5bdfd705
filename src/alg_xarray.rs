//! Derive one product-ready dataset from sectored raw data
//!
//! [`get_alg_xarray`] runs the interpolation and algorithm stages of a product in the
//! order its [`ProductFamily`] declares. Algorithm-first families apply the algorithm
//! to native-resolution arrays (optionally interpolating the result), while
//! interpolation-first families resample every required variable onto the target
//! grid before the algorithm sees them.

use crate::area::AreaDefinition;
use crate::dataset::{copy_standard_metadata, stack_new_dim, DataArray, Dataset, DatasetBundle};
use crate::errors::{ProcflowError, Result};
use crate::plugins::algorithm::AlgorithmCall;
use crate::plugins::reader::GEOLOCATION_VARIABLES;
use crate::plugins::{remove_unsupported_kwargs, AlgorithmPlugin, InterpolatorPlugin, Kwargs, ListFamily};
use crate::procflow::ProcflowContext;
use crate::product::{ProductFamily, ProductSpec};
use crate::sectoring::{sector_xarrays, SectorOptions};
use ndarray::ArrayD;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

/// Dimension along which per-time-index interpolations are stacked
pub const TIME_DIM: &str = "time";
/// Sector-info key carrying the identifier of an area-def adjustment
pub const ADJUSTMENT_ID: &str = "adjustment_id";

/// Options for [`get_alg_xarray`]
#[derive(Debug, Clone)]
pub struct AlgXarrayOptions {
    /// Re-sector to the exact (unpadded) area before processing
    pub resector: bool,
    /// Data was resampled by the reader; pinned dataset keys no longer exist
    pub resampled_read: bool,
    /// Explicit required variables, replacing the product's declared list
    pub variables: Option<Vec<String>>,
}

impl Default for AlgXarrayOptions {
    fn default() -> Self {
        Self {
            resector: true,
            resampled_read: false,
            variables: None,
        }
    }
}

impl AlgXarrayOptions {
    pub fn unsectored() -> Self {
        Self {
            resector: false,
            ..Self::default()
        }
    }

    pub fn resampled_read(mut self, resampled_read: bool) -> Self {
        self.resampled_read = resampled_read;
        self
    }

    pub fn with_variables(mut self, variables: &[String]) -> Self {
        self.variables = Some(variables.to_vec());
        self
    }
}

/// Wrap an algorithm output, reusing the template's dimension names when shapes agree.
fn product_array(data: ArrayD<f32>, template: Option<&DataArray>) -> Result<DataArray> {
    if let Some(template) = template {
        if template.shape() == data.shape() {
            return DataArray::new(template.dims.clone(), data);
        }
    }
    let dims = match data.ndim() {
        2 => vec!["y".to_string(), "x".to_string()],
        n => (0..n).map(|i| format!("dim_{}", i)).collect(),
    };
    DataArray::new(dims, data)
}

/// Copy latitude/longitude from `source` when they match the product grid.
fn attach_geolocation(dest: &mut Dataset, source: &Dataset, shape: &[usize]) {
    for name in GEOLOCATION_VARIABLES {
        if dest.contains(name) {
            continue;
        }
        if let Some(var) = source.variable(name) {
            if var.shape() == shape {
                dest.insert_variable(name, var.clone());
            }
        }
    }
}

fn resolve_algorithm<'c>(
    ctx: &'c ProcflowContext,
    product: &'c ProductSpec,
) -> Result<Option<(&'c AlgorithmPlugin, Kwargs)>> {
    if !product.family.uses_algorithm() {
        return Ok(None);
    }
    let call = product.algorithm.as_ref().ok_or_else(|| {
        ProcflowError::configuration(format!(
            "Product {} is {} but declares no algorithm",
            product.name,
            product.family.as_str()
        ))
    })?;
    let plugin = ctx.registry.algorithm(&call.name)?;
    let kwargs = remove_unsupported_kwargs(&call.args, &plugin.params, &plugin.name);
    Ok(Some((plugin, kwargs)))
}

pub(crate) fn resolve_interpolator<'c>(
    ctx: &'c ProcflowContext,
    product_name: &str,
    source_name: &str,
) -> Result<(&'c InterpolatorPlugin, Kwargs)> {
    let product = ctx.catalog.get(product_name, source_name)?;
    let call = product.interpolator.as_ref().ok_or_else(|| {
        ProcflowError::configuration(format!(
            "Product {} declares no interpolator for source {}",
            product_name, source_name
        ))
    })?;
    Ok((ctx.registry.interpolator(&call.name)?, call.args.clone()))
}

fn stamp_adjustment_id(dataset: &mut Dataset, area: &AreaDefinition) {
    if let Some(adjustment_id) = area.sector_info.get(ADJUSTMENT_ID) {
        dataset.add_filename_extra_field(ADJUSTMENT_ID, adjustment_id.clone());
    }
}

/// Build the analysis-ready dataset for `product_name` on `area`.
///
/// # Errors
///
/// * [`ProcflowError::UnsupportedFamily`] when the algorithm family cannot serve the
///   product family.
/// * A no-data error when an algorithm-first product finds none of its variables.
/// * Plugin lookup and plugin errors are propagated.
pub fn get_alg_xarray(
    ctx: &ProcflowContext,
    bundle: &DatasetBundle,
    area: &AreaDefinition,
    product_name: &str,
    options: &AlgXarrayOptions,
) -> Result<Dataset> {
    let source_name = bundle.source_name()?;
    let product = ctx.catalog.get(product_name, &source_name)?;
    let variables: Vec<String> = match &options.variables {
        Some(vars) if !vars.is_empty() => vars.clone(),
        _ => product.variables.clone(),
    };
    let algorithm = resolve_algorithm(ctx, product)?;

    let resectored;
    let sectored = if options.resector {
        resectored = sector_xarrays(bundle, area, &SectorOptions::with_varlist(&variables))?;
        &resectored
    } else {
        bundle
    };

    info!("get_alg_xarray required variables: {:?}", variables);
    info!(
        "get_alg_xarray requested datasets for variables: {:?}",
        product.dataset_for_variables
    );

    let mut result = if product.family.is_algorithm_first() {
        algorithm_first(ctx, bundle, sectored, area, product, &variables, algorithm)?
    } else if product.family.is_interpolation_first() {
        interpolation_first(ctx, bundle, sectored, area, product, &variables, options, algorithm)?
    } else {
        return Err(ProcflowError::unsupported_family(
            algorithm.map(|(p, _)| p.family()).unwrap_or("none"),
            product.family.as_str(),
        ));
    };

    result
        .attrs
        .insert("product_name".to_string(), JsonValue::String(product_name.to_string()));
    stamp_adjustment_id(&mut result, area);
    Ok(result)
}

fn algorithm_first(
    ctx: &ProcflowContext,
    bundle: &DatasetBundle,
    sectored: &DatasetBundle,
    area: &AreaDefinition,
    product: &ProductSpec,
    variables: &[String],
    algorithm: Option<(&AlgorithmPlugin, Kwargs)>,
) -> Result<Dataset> {
    let product_name = product.name.as_str();
    let (plugin, kwargs) = algorithm.ok_or_else(|| {
        ProcflowError::unsupported_family("none", product.family.as_str())
    })?;
    let metadata = bundle.metadata()?;

    let mut alg_xarray = match &plugin.call {
        AlgorithmCall::XarrayToNumpy(func) => {
            let (key, dataset) = sectored
                .data_datasets()
                .find(|(_, ds)| ds.contains_all(variables))
                .ok_or_else(|| {
                    ProcflowError::no_data(format!(
                        "No dataset holds all of {:?} for xarray_to_numpy algorithm {}",
                        variables, plugin.name
                    ))
                })?;
            info!("USING dataset {} for {}", key, plugin.name);
            let template = variables.first().and_then(|v| dataset.variable(v));
            let array = product_array(func(dataset, &kwargs)?, template)?;
            let mut out = Dataset::with_attrs(metadata.attrs.clone());
            attach_geolocation(&mut out, dataset, array.shape());
            out.insert_variable(product_name, array);
            out
        }
        AlgorithmCall::XarrayDictAreaDefToNumpy(func) => {
            let data = func(sectored, area, &kwargs)?;
            let template = sectored
                .data_datasets()
                .find_map(|(_, ds)| variables.first().and_then(|v| ds.variable(v)));
            let array = product_array(data, template)?;
            let mut out = Dataset::with_attrs(metadata.attrs.clone());
            if let Some((_, ds)) = sectored.data_datasets().find(|(_, ds)| ds.contains_all(variables)) {
                attach_geolocation(&mut out, ds, array.shape());
            }
            out.insert_variable(product_name, array);
            out
        }
        AlgorithmCall::XarrayDictToXarray(func) => func(sectored, &kwargs)?,
        AlgorithmCall::XarrayToXarray(func) => {
            let mut input: Option<(&String, &Dataset)> = None;
            for varname in variables {
                info!("TRYING variable {} for non-interpolated algorithms", varname);
                for (key, dataset) in sectored.data_datasets().filter(|(_, ds)| ds.contains(varname)) {
                    match input {
                        None => {
                            info!("    USING sectored dataset {} for non-interpolated algorithms", key);
                            input = Some((key, dataset));
                        }
                        Some((chosen, _)) if chosen != key => {
                            info!(
                                "    SKIPPING variable {} from dataset {}: non-interpolated processing \
                                 requires every variable at the resolution of {}",
                                varname, key, chosen
                            );
                        }
                        Some(_) => {}
                    }
                }
            }
            let (_, dataset) = input.ok_or_else(|| {
                ProcflowError::no_data(
                    "No required variables in any dataset for xarray_to_xarray algorithm",
                )
            })?;
            func(dataset, &kwargs)?
        }
        AlgorithmCall::ListNumpy {
            family: ListFamily::ListNumpyToNumpy,
            func,
        } => {
            let mut arrays = Vec::with_capacity(variables.len());
            let mut base: Option<&Dataset> = None;
            for varname in variables {
                let (_, dataset) = sectored
                    .data_datasets()
                    .find(|(_, ds)| ds.contains(varname))
                    .ok_or_else(|| {
                        ProcflowError::no_data(format!(
                            "Required variable {} in none of the sectored datasets",
                            varname
                        ))
                    })?;
                arrays.push(dataset.require_variable(varname)?.data.clone());
                base = Some(dataset);
            }
            let base = base.ok_or_else(|| {
                ProcflowError::no_data(format!("Product {} requires no variables", product_name))
            })?;
            let template = variables.last().and_then(|v| base.variable(v));
            let array = product_array(func(&arrays, &kwargs)?, template)?;
            let mut out = base.clone();
            out.insert_variable(product_name, array);
            out
        }
        AlgorithmCall::ListNumpy { family, .. } => {
            return Err(ProcflowError::unsupported_family(
                family.as_str(),
                product.family.as_str(),
            ))
        }
    };

    copy_standard_metadata(metadata, &mut alg_xarray, false);

    match product.family {
        ProductFamily::AlgInterpCmap => {
            let (interp, interp_args) = resolve_interpolator(ctx, product_name, &bundle.source_name()?)?;
            let varlist = [product_name.to_string()];
            let mut final_xarray = interp.interpolate(area, &alg_xarray, Dataset::new(), &varlist, &interp_args)?;
            final_xarray.attrs = alg_xarray.attrs.clone();
            final_xarray.area_definition = Some(area.clone());
            Ok(final_xarray)
        }
        _ => Ok(alg_xarray),
    }
}

#[allow(clippy::too_many_arguments)]
fn interpolation_first(
    ctx: &ProcflowContext,
    bundle: &DatasetBundle,
    sectored: &DatasetBundle,
    area: &AreaDefinition,
    product: &ProductSpec,
    variables: &[String],
    options: &AlgXarrayOptions,
    algorithm: Option<(&AlgorithmPlugin, Kwargs)>,
) -> Result<Dataset> {
    let product_name = product.name.as_str();
    let fallback_source = bundle.source_name()?;
    let mut interp_xarray = Dataset::new();
    let mut last_source: Option<&Dataset> = None;

    for varname in variables {
        info!("TRYING variable {}", varname);
        for (key, dataset) in sectored.data_datasets() {
            info!("    TRYING dataset {} for variable {}", key, varname);
            if !dataset.contains(varname) {
                continue;
            }
            let time_steps = dataset.dim_len(TIME_DIM);
            if time_steps == Some(0) {
                info!("        SKIPPING dataset {}, empty {} dimension", key, TIME_DIM);
                continue;
            }

            let pinned = product.dataset_for_variables.get(varname);
            match pinned {
                Some(keys) if !options.resampled_read => {
                    if keys.iter().any(|k| k == key) {
                        info!("        USING {} from dataset {}, as pinned by the product", varname, key);
                    } else {
                        info!("        WAITING dataset {} not requested for variable {}", key, varname);
                        continue;
                    }
                }
                _ if interp_xarray.contains(varname) => {
                    if dataset.contains_all(variables) {
                        info!(
                            "        REPLACING {} with dataset {}, all required variables in current dataset",
                            varname, key
                        );
                    } else {
                        warn!(
                            "        SKIPPING {}, encountered multiple versions, skipping subsequent dataset {}",
                            varname, key
                        );
                        continue;
                    }
                }
                _ => info!("        USING {} from dataset {}, first available", varname, key),
            }

            let source_name = dataset.source_name().unwrap_or(fallback_source.as_str());
            let (interp, interp_args) = resolve_interpolator(ctx, product_name, source_name)?;
            let varlist = [varname.clone()];

            if let Some(steps) = time_steps {
                let mut per_time = Vec::with_capacity(steps);
                let mut last_step: Option<Dataset> = None;
                for index in 0..steps {
                    let step = dataset.isel(TIME_DIM, index)?;
                    let interpolated = interp.interpolate(area, &step, Dataset::new(), &varlist, &interp_args)?;
                    per_time.push(interpolated.require_variable(varname)?.clone());
                    last_step = Some(interpolated);
                }
                interp_xarray.insert_variable(varname.as_str(), stack_new_dim(TIME_DIM, &per_time)?);
                if let Some(step) = last_step {
                    for name in GEOLOCATION_VARIABLES {
                        if let (false, Some(var)) = (interp_xarray.contains(name), step.variable(name)) {
                            interp_xarray.insert_variable(name, var.clone());
                        }
                    }
                    if interp_xarray.area_definition.is_none() {
                        interp_xarray.area_definition = step.area_definition;
                    }
                }
            } else {
                interp_xarray = interp.interpolate(area, dataset, interp_xarray, &varlist, &interp_args)?;
            }
            last_source = Some(dataset);
        }
    }

    let representative = match last_source {
        Some(dataset) => dataset,
        None => bundle.metadata()?,
    };
    copy_standard_metadata(representative, &mut interp_xarray, false);

    if product.family == ProductFamily::Interp {
        return Ok(interp_xarray);
    }

    let (plugin, kwargs) = algorithm.ok_or_else(|| {
        ProcflowError::unsupported_family("none", product.family.as_str())
    })?;
    let mut interp_xarray = match &plugin.call {
        AlgorithmCall::XarrayToNumpy(func) => {
            let data = func(&interp_xarray, &kwargs)?;
            let template = variables.first().and_then(|v| interp_xarray.variable(v));
            let array = product_array(data, template)?;
            interp_xarray.insert_variable(product_name, array);
            interp_xarray
        }
        AlgorithmCall::XarrayToXarray(func) => func(&interp_xarray, &kwargs)?,
        AlgorithmCall::ListNumpy { func, .. } => {
            let arrays = variables
                .iter()
                .map(|v| interp_xarray.require_variable(v).map(|a| a.data.clone()))
                .collect::<Result<Vec<_>>>()?;
            let template = variables.first().and_then(|v| interp_xarray.variable(v));
            let array = product_array(func(&arrays, &kwargs)?, template)?;
            interp_xarray.insert_variable(product_name, array);
            interp_xarray
        }
        AlgorithmCall::XarrayDictAreaDefToNumpy(_) | AlgorithmCall::XarrayDictToXarray(_) => {
            return Err(ProcflowError::unsupported_family(
                plugin.family(),
                product.family.as_str(),
            ))
        }
    };

    copy_standard_metadata(representative, &mut interp_xarray, false);
    Ok(interp_xarray)
}
