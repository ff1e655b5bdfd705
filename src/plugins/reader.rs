//! Reader plugins: turn input files into a [`DatasetBundle`]

use crate::area::AreaDefinition;
use crate::dataset::{DataArray, Dataset, DatasetBundle, METADATA_KEY};
use crate::errors::{ProcflowError, Result};
use crate::sectoring::{sector_xarrays, SectorOptions};
use chrono::{DateTime, Utc};
use ndarray::{ArrayD, IxDyn};
use netcdf::AttributeValue;
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Variables always read alongside any requested channel list
pub const GEOLOCATION_VARIABLES: [&str; 2] = ["latitude", "longitude"];

/// What the orchestrator wants from a read
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadRequest<'a> {
    /// Only populate METADATA
    pub metadata_only: bool,
    pub chans: Option<&'a [String]>,
    /// Sectored or resampled read: only data intersecting this area is returned
    pub area_def: Option<&'a AreaDefinition>,
    pub self_register_dataset: Option<&'a str>,
    pub self_register_source: Option<&'a str>,
}

impl<'a> ReadRequest<'a> {
    pub fn metadata_only() -> Self {
        Self {
            metadata_only: true,
            ..Self::default()
        }
    }

    pub fn full(chans: Option<&'a [String]>) -> Self {
        Self {
            chans,
            ..Self::default()
        }
    }

    pub fn sectored(chans: Option<&'a [String]>, area_def: &'a AreaDefinition) -> Self {
        Self {
            chans,
            area_def: Some(area_def),
            ..Self::default()
        }
    }
}

/// A reader plugin
///
/// Sectored reads that find no data inside the requested area return
/// [`ProcflowError::Coverage`].
pub trait Reader: Send + Sync {
    fn read(&self, fnames: &[PathBuf], request: &ReadRequest<'_>) -> Result<DatasetBundle>;
}

impl<F> Reader for F
where
    F: Fn(&[PathBuf], &ReadRequest<'_>) -> Result<DatasetBundle> + Send + Sync,
{
    fn read(&self, fnames: &[PathBuf], request: &ReadRequest<'_>) -> Result<DatasetBundle> {
        self(fnames, request)
    }
}

/// Reads one dataset per NetCDF file, keyed by the `dataset_name` global attribute
/// (or the file stem). Global attributes become dataset attributes; `_FillValue`
/// pixels are masked.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfReader;

impl Reader for NetcdfReader {
    fn read(&self, fnames: &[PathBuf], request: &ReadRequest<'_>) -> Result<DatasetBundle> {
        let mut datasets: Vec<(String, Dataset)> = Vec::new();
        let mut metadata = Dataset::new();
        let mut start: Option<DateTime<Utc>> = None;
        let mut end: Option<DateTime<Utc>> = None;

        for path in fnames {
            let file = netcdf::open(path)?;
            let attrs = global_attributes(&file)?;
            let key = attrs
                .get("dataset_name")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| file_stem(path));
            let mut dataset = Dataset::with_attrs(attrs);

            if let Some(s) = dataset.start_datetime() {
                start = Some(start.map_or(s, |cur| cur.min(s)));
            }
            if let Some(e) = dataset.end_datetime() {
                end = Some(end.map_or(e, |cur| cur.max(e)));
            }
            if metadata.attrs.is_empty() {
                metadata.attrs = dataset.attrs.clone();
            }

            if !request.metadata_only {
                read_variables(&file, request.chans, &mut dataset)?;
                debug!(
                    "Read {} variables from {}",
                    dataset.variable_names().count(),
                    path.display()
                );
            }
            datasets.push((key, dataset));
        }

        if let (Some(start), Some(end)) = (start, end) {
            metadata.set_time_range(start, end);
        }

        let mut bundle = DatasetBundle::new();
        bundle.insert(METADATA_KEY, metadata);
        if !request.metadata_only {
            for (key, dataset) in datasets {
                bundle.insert(key, dataset);
            }
        }

        match request.area_def {
            Some(area) if !request.metadata_only => {
                let options = match request.chans {
                    Some(chans) => SectorOptions::with_varlist(chans),
                    None => SectorOptions::default(),
                };
                let sectored = sector_xarrays(&bundle, area, &options)?;
                if sectored.is_empty() {
                    return Err(ProcflowError::coverage(format!(
                        "No data found within area {}",
                        area.name
                    )));
                }
                info!("Sectored read for area {}", area.name);
                Ok(sectored)
            }
            _ => Ok(bundle),
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_variables(file: &netcdf::File, chans: Option<&[String]>, dataset: &mut Dataset) -> Result<()> {
    for var in file.variables() {
        let name = var.name();
        if let Some(chans) = chans {
            let wanted = chans.iter().any(|c| *c == name)
                || GEOLOCATION_VARIABLES.contains(&name.as_str());
            if !wanted {
                continue;
            }
        }
        let dims: Vec<String> = var
            .dimensions()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        let values: Vec<f32> = var.get_values::<f32, _>(..)?;
        let mut data = ArrayD::from_shape_vec(IxDyn(&shape), values)?;

        let fill_value = var
            .attribute("_FillValue")
            .and_then(|attr| match attr.value().ok()? {
                AttributeValue::Float(v) => Some(v),
                AttributeValue::Double(v) => Some(v as f32),
                AttributeValue::Short(v) => Some(v as f32),
                AttributeValue::Int(v) => Some(v as f32),
                _ => None,
            });
        if let Some(fv) = fill_value {
            data.mapv_inplace(|v| if v == fv { f32::NAN } else { v });
        }

        dataset.insert_variable(name, DataArray::new(dims, data)?);
    }
    Ok(())
}

fn global_attributes(file: &netcdf::File) -> Result<crate::dataset::Attributes> {
    let mut attrs = crate::dataset::Attributes::new();
    for attr in file.attributes() {
        let value = match attr.value()? {
            AttributeValue::Str(val) => JsonValue::String(val),
            AttributeValue::Strs(vals) => json!(vals),
            AttributeValue::Float(val) => json!(val),
            AttributeValue::Floats(vals) => json!(vals),
            AttributeValue::Double(val) => json!(val),
            AttributeValue::Doubles(vals) => json!(vals),
            AttributeValue::Int(val) => json!(val),
            AttributeValue::Ints(vals) => json!(vals),
            AttributeValue::Short(val) => json!(val),
            AttributeValue::Shorts(vals) => json!(vals),
            _ => {
                debug!("Skipped unsupported attribute type for '{}'", attr.name());
                continue;
            }
        };
        attrs.insert(attr.name().to_string(), value);
    }
    Ok(attrs)
}
