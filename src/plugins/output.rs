//! Output format plugins and their call-signature families

use super::colormap::ColorsInfo;
use super::{Kwargs, ParamSchema};
use crate::area::AreaDefinition;
use crate::dataset::{Dataset, DatasetBundle};
use crate::errors::{ProcflowError, Result};
use chrono::Utc;
use netcdf::create;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything an image-producing renderer receives
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub dataset: &'a Dataset,
    pub product_name: &'a str,
    pub output_fnames: &'a [PathBuf],
    pub product_name_title: &'a str,
    pub colors: Option<&'a ColorsInfo>,
    /// Background imagery for overlay renderers
    pub background: Option<&'a Dataset>,
    pub kwargs: &'a Kwargs,
}

/// Inputs to a `standard_metadata` writer
#[derive(Debug, Clone, Copy)]
pub struct MetadataRequest<'a> {
    pub area_def: &'a AreaDefinition,
    pub dataset: &'a Dataset,
    pub metadata_fname: &'a Path,
    pub product_filename: &'a Path,
    pub kwargs: &'a Kwargs,
}

pub type XarrayDataFn = Arc<dyn Fn(&Dataset, &[String], &[PathBuf], &Kwargs) -> Result<Vec<PathBuf>> + Send + Sync>;
pub type ImageFn = Arc<dyn Fn(&AreaDefinition, &RenderRequest<'_>) -> Result<Vec<PathBuf>> + Send + Sync>;
pub type UnprojectedFn = Arc<dyn Fn(&RenderRequest<'_>) -> Result<Vec<PathBuf>> + Send + Sync>;
pub type XrdictVarlistFn =
    Arc<dyn Fn(&DatasetBundle, &[String], &[PathBuf], &Kwargs) -> Result<Vec<PathBuf>> + Send + Sync>;
pub type XrdictAreaProductOutfnamesFn = Arc<
    dyn Fn(&DatasetBundle, Option<&AreaDefinition>, &str, &[PathBuf], &Kwargs) -> Result<Vec<PathBuf>>
        + Send
        + Sync,
>;
pub type XrdictAreaProductFn =
    Arc<dyn Fn(&DatasetBundle, Option<&AreaDefinition>, &str, &Kwargs) -> Result<Vec<PathBuf>> + Send + Sync>;
pub type StandardMetadataFn = Arc<dyn Fn(&MetadataRequest<'_>) -> Result<Vec<PathBuf>> + Send + Sync>;

#[derive(Clone)]
pub enum OutputCall {
    /// Writes product, latitude and longitude arrays directly
    XarrayData(XarrayDataFn),
    Image(ImageFn),
    Unprojected(UnprojectedFn),
    ImageOverlay(ImageFn),
    XrdictVarlistOutfnamesToOutlist(XrdictVarlistFn),
    XrdictAreaProductOutfnamesToOutlist(XrdictAreaProductOutfnamesFn),
    /// Dataset-bundle writer choosing its own filenames
    XrdictAreaProductToOutlist(XrdictAreaProductFn),
    StandardMetadata(StandardMetadataFn),
}

impl OutputCall {
    pub fn family(&self) -> &'static str {
        match self {
            OutputCall::XarrayData(_) => "xarray_data",
            OutputCall::Image(_) => "image",
            OutputCall::Unprojected(_) => "unprojected",
            OutputCall::ImageOverlay(_) => "image_overlay",
            OutputCall::XrdictVarlistOutfnamesToOutlist(_) => "xrdict_varlist_outfnames_to_outlist",
            OutputCall::XrdictAreaProductOutfnamesToOutlist(_) => {
                "xrdict_area_product_outfnames_to_outlist"
            }
            OutputCall::XrdictAreaProductToOutlist(_) => "xrdict_area_product_to_outlist",
            OutputCall::StandardMetadata(_) => "standard_metadata",
        }
    }

    /// Families whose output filenames are computed before rendering
    pub fn requires_output_filenames(&self) -> bool {
        !matches!(self, OutputCall::XrdictAreaProductToOutlist(_))
    }
}

#[derive(Clone)]
pub struct OutputFormatPlugin {
    pub name: String,
    pub params: ParamSchema,
    pub call: OutputCall,
}

impl fmt::Debug for OutputFormatPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputFormatPlugin")
            .field("name", &self.name)
            .field("family", &self.call.family())
            .finish()
    }
}

impl OutputFormatPlugin {
    pub fn new(name: impl Into<String>, params: ParamSchema, call: OutputCall) -> Self {
        Self {
            name: name.into(),
            params,
            call,
        }
    }

    pub fn family(&self) -> &'static str {
        self.call.family()
    }

    pub fn unsupported(&self) -> ProcflowError {
        ProcflowError::UnsupportedOutputFamily {
            family: self.family().to_string(),
            output_format: self.name.clone(),
        }
    }

    /// Write a metadata sidecar; only valid for the `standard_metadata` family.
    pub fn write_metadata(&self, request: &MetadataRequest<'_>) -> Result<Vec<PathBuf>> {
        match &self.call {
            OutputCall::StandardMetadata(func) => {
                let kwargs = super::remove_unsupported_kwargs(request.kwargs, &self.params, &self.name);
                func(&MetadataRequest {
                    kwargs: &kwargs,
                    ..*request
                })
            }
            _ => Err(self.unsupported()),
        }
    }
}

/// Write the requested variables of a dataset to each output file as NetCDF.
///
/// Masked pixels are written as NaN with a `_FillValue` of NaN. Dataset attributes of
/// string or numeric type become global attributes.
pub fn write_xarray_netcdf(
    dataset: &Dataset,
    varnames: &[String],
    output_fnames: &[PathBuf],
    _kwargs: &Kwargs,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for output_path in output_fnames {
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if output_path.exists() {
            fs::remove_file(output_path)?;
        }

        let mut file = create(output_path)?;
        let mut defined: Vec<String> = Vec::new();
        for varname in varnames {
            let var = dataset.require_variable(varname)?;
            for (dim_name, &dim_len) in var.dims.iter().zip(var.shape()) {
                if !defined.contains(dim_name) {
                    file.add_dimension(dim_name, dim_len)?;
                    defined.push(dim_name.clone());
                }
            }
            let dim_refs: Vec<&str> = var.dims.iter().map(|s| s.as_str()).collect();
            let mut new_var = file.add_variable::<f32>(varname, &dim_refs)?;
            new_var.put_attribute("_FillValue", f32::NAN)?;
            new_var.put(var.data.view(), ..)?;
        }

        for (key, value) in &dataset.attrs {
            match value {
                serde_json::Value::String(s) => {
                    file.add_attribute(key, s.as_str())?;
                }
                serde_json::Value::Number(n) => {
                    if let Some(v) = n.as_f64() {
                        file.add_attribute(key, v)?;
                    }
                }
                serde_json::Value::Bool(b) => {
                    file.add_attribute(key, if *b { "True" } else { "False" })?;
                }
                _ => {
                    warn!("Skipped unsupported attribute type for '{}'", key);
                }
            }
        }
        file.add_attribute(
            "history",
            format!("Created by procflow on {}", Utc::now().to_rfc3339()),
        )?;
        info!("Wrote {}", output_path.display());
        written.push(output_path.clone());
    }
    Ok(written)
}

#[derive(Debug, Serialize)]
struct ProductMetadata<'a> {
    product_filename: String,
    source_name: Option<&'a str>,
    platform_name: Option<&'a str>,
    start_datetime: Option<String>,
    end_datetime: Option<String>,
    product_name: Option<&'a str>,
    area_definition: &'a AreaDefinition,
}

/// YAML sidecar describing one product file
pub fn write_metadata_yaml(request: &MetadataRequest<'_>) -> Result<Vec<PathBuf>> {
    let dataset = request.dataset;
    let metadata = ProductMetadata {
        product_filename: request.product_filename.display().to_string(),
        source_name: dataset.source_name(),
        platform_name: dataset.attr_str("platform_name"),
        start_datetime: dataset.start_datetime().map(|t| t.to_rfc3339()),
        end_datetime: dataset.end_datetime().map(|t| t.to_rfc3339()),
        product_name: dataset.attr_str("product_name"),
        area_definition: request.area_def,
    };
    if let Some(parent) = request.metadata_fname.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(request.metadata_fname, serde_yaml::to_string(&metadata)?)?;
    info!("Wrote metadata {}", request.metadata_fname.display());
    Ok(vec![request.metadata_fname.to_path_buf()])
}

pub(crate) fn netcdf_xarray_plugin() -> OutputFormatPlugin {
    OutputFormatPlugin::new(
        "netcdf_xarray",
        ParamSchema::any(),
        OutputCall::XarrayData(Arc::new(write_xarray_netcdf)),
    )
}

pub(crate) fn metadata_default_plugin() -> OutputFormatPlugin {
    OutputFormatPlugin::new(
        "metadata_default",
        ParamSchema::any(),
        OutputCall::StandardMetadata(Arc::new(write_metadata_yaml)),
    )
}
