//! Labeled array collections flowing through the pipeline
//!
//! A [`DatasetBundle`] maps dataset keys (resolution or channel groups) to [`Dataset`]s
//! and always carries a `METADATA` entry holding the canonical source name, time range
//! and area definition. Masked pixels are stored as NaN.

use crate::area::AreaDefinition;
use crate::errors::{ProcflowError, Result};
use chrono::{DateTime, Utc};
use ndarray::{ArrayD, Axis, IxDyn};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// Reserved bundle key for the metadata-only dataset
pub const METADATA_KEY: &str = "METADATA";

/// Attribute mapping shared by datasets, area sector info and plugin kwargs
pub type Attributes = serde_json::Map<String, JsonValue>;

/// Attributes copied between datasets by [`copy_standard_metadata`]
pub const STANDARD_METADATA_ATTRS: [&str; 9] = [
    "source_name",
    "platform_name",
    "data_provider",
    "start_datetime",
    "end_datetime",
    "interpolation_radius_of_influence",
    "sample_distance_km",
    "minimum_coverage",
    "registered_dataset",
];

/// A variable: named dimensions over a float array
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    pub dims: Vec<String>,
    pub data: ArrayD<f32>,
}

impl DataArray {
    /// # Errors
    ///
    /// Returns a configuration error when the number of dimension names does not match
    /// the array rank.
    pub fn new(dims: Vec<String>, data: ArrayD<f32>) -> Result<Self> {
        if dims.len() != data.ndim() {
            return Err(ProcflowError::configuration(format!(
                "{} dimension names for an array of rank {}",
                dims.len(),
                data.ndim()
            )));
        }
        Ok(Self { dims, data })
    }

    /// A 2-D array on the standard `(y, x)` grid dimensions
    pub fn grid(data: ndarray::Array2<f32>) -> Self {
        Self {
            dims: vec!["y".to_string(), "x".to_string()],
            data: data.into_dyn(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Number of unmasked (finite) values
    pub fn count_valid(&self) -> usize {
        self.data.iter().filter(|v| v.is_finite()).count()
    }
}

/// A collection of variables sharing attributes and, optionally, an area definition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    variables: BTreeMap<String, DataArray>,
    pub attrs: Attributes,
    pub area_definition: Option<AreaDefinition>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attrs(attrs: Attributes) -> Self {
        Self {
            attrs,
            ..Self::default()
        }
    }

    pub fn insert_variable(&mut self, name: impl Into<String>, array: DataArray) {
        self.variables.insert(name.into(), array);
    }

    pub fn variable(&self, name: &str) -> Option<&DataArray> {
        self.variables.get(name)
    }

    /// # Errors
    ///
    /// Returns [`ProcflowError::VariableNotFound`] if the variable is absent.
    pub fn require_variable(&self, name: &str) -> Result<&DataArray> {
        self.variables
            .get(name)
            .ok_or_else(|| ProcflowError::variable_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn contains_all<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().all(|n| self.contains(n.as_ref()))
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &String> {
        self.variables.keys()
    }

    pub fn variables(&self) -> impl Iterator<Item = (&String, &DataArray)> {
        self.variables.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Length of a named dimension, taken from the first variable that uses it
    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        self.variables
            .values()
            .find_map(|v| v.axis_of(dim).map(|axis| v.shape()[axis]))
    }

    /// Select one index along `dim`, dropping that dimension from every variable using it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `index` is out of range.
    pub fn isel(&self, dim: &str, index: usize) -> Result<Dataset> {
        let len = self
            .dim_len(dim)
            .ok_or_else(|| ProcflowError::configuration(format!("No dimension {}", dim)))?;
        if index >= len {
            return Err(ProcflowError::configuration(format!(
                "Index {} out of range for dimension {} of length {}",
                index, dim, len
            )));
        }
        let mut selected = Dataset {
            variables: BTreeMap::new(),
            attrs: self.attrs.clone(),
            area_definition: self.area_definition.clone(),
        };
        for (name, var) in &self.variables {
            let array = match var.axis_of(dim) {
                Some(axis) => {
                    let dims = var
                        .dims
                        .iter()
                        .filter(|d| d.as_str() != dim)
                        .cloned()
                        .collect();
                    DataArray {
                        dims,
                        data: var.data.index_axis(Axis(axis), index).to_owned(),
                    }
                }
                None => var.clone(),
            };
            selected.variables.insert(name.clone(), array);
        }
        Ok(selected)
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(|v| v.as_str())
    }

    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attrs.get(key).and_then(|v| v.as_f64())
    }

    pub fn source_name(&self) -> Option<&str> {
        self.attr_str("source_name")
    }

    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        parse_datetime_attr(self.attrs.get("start_datetime"))
    }

    pub fn end_datetime(&self) -> Option<DateTime<Utc>> {
        parse_datetime_attr(self.attrs.get("end_datetime"))
    }

    pub fn set_time_range(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.attrs
            .insert("start_datetime".to_string(), JsonValue::String(start.to_rfc3339()));
        self.attrs
            .insert("end_datetime".to_string(), JsonValue::String(end.to_rfc3339()));
    }

    pub fn minimum_coverage(&self) -> Option<f64> {
        self.attr_f64("minimum_coverage")
    }

    pub fn filename_extra_fields(&self) -> Option<&Attributes> {
        self.attrs
            .get("filename_extra_fields")
            .and_then(|v| v.as_object())
    }

    /// Add one field used by filename formatters to extend the generated name.
    pub fn add_filename_extra_field(&mut self, field: impl Into<String>, value: JsonValue) {
        let entry = self
            .attrs
            .entry("filename_extra_fields".to_string())
            .or_insert_with(|| JsonValue::Object(Attributes::new()));
        if !entry.is_object() {
            *entry = JsonValue::Object(Attributes::new());
        }
        if let JsonValue::Object(fields) = entry {
            fields.insert(field.into(), value);
        }
    }

    /// Names of variables holding at least one unmasked value
    pub fn variables_with_data(&self) -> BTreeSet<String> {
        self.variables
            .iter()
            .filter(|(_, v)| v.count_valid() > 0)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn parse_datetime_attr(value: Option<&JsonValue>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Merge the extra filename fields of `source` into `dest`, keeping existing fields.
pub fn combine_filename_extra_fields(source: &Dataset, dest: &mut Dataset) {
    if let Some(fields) = source.filename_extra_fields() {
        let fields = fields.clone();
        for (field, value) in fields {
            let exists = dest
                .filename_extra_fields()
                .map(|f| f.contains_key(&field))
                .unwrap_or(false);
            if !exists {
                dest.add_filename_extra_field(field, value);
            }
        }
    }
}

/// Copy the standard attribute set (and area definition) from `source` onto `dest`.
///
/// With `force` unset, attributes already present on `dest` are left alone.
pub fn copy_standard_metadata(source: &Dataset, dest: &mut Dataset, force: bool) {
    for attr in STANDARD_METADATA_ATTRS {
        if let Some(value) = source.attrs.get(attr) {
            if force || !dest.attrs.contains_key(attr) {
                dest.attrs.insert(attr.to_string(), value.clone());
            }
        }
    }
    if force || dest.area_definition.is_none() {
        if let Some(area) = &source.area_definition {
            dest.area_definition = Some(area.clone());
        }
    }
}

/// Insertion-ordered mapping of dataset key to [`Dataset`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetBundle {
    entries: Vec<(String, Dataset)>,
}

impl DatasetBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a dataset, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, dataset: Dataset) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = dataset,
            None => self.entries.push((key, dataset)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Dataset> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, ds)| ds)
    }

    pub fn remove(&mut self, key: &str) -> Option<Dataset> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Dataset)> {
        self.entries.iter().map(|(k, ds)| (k, ds))
    }

    /// Data-carrying datasets, in bundle order, excluding `METADATA`
    pub fn data_datasets(&self) -> impl Iterator<Item = (&String, &Dataset)> {
        self.iter().filter(|(k, _)| k.as_str() != METADATA_KEY)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// # Errors
    ///
    /// Returns a no-data error if the bundle has no `METADATA` entry.
    pub fn metadata(&self) -> Result<&Dataset> {
        self.get(METADATA_KEY)
            .ok_or_else(|| ProcflowError::no_data("Dataset bundle has no METADATA entry"))
    }

    /// # Errors
    ///
    /// Fails if METADATA is missing or carries no `source_name`.
    pub fn source_name(&self) -> Result<String> {
        self.metadata()?
            .source_name()
            .map(str::to_string)
            .ok_or_else(|| ProcflowError::configuration("METADATA has no source_name attribute"))
    }

    /// Every variable name that has at least one valid value in some dataset
    pub fn variables_with_data(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .flat_map(|(_, ds)| ds.variables_with_data())
            .collect()
    }
}

/// Concatenate equally shaped arrays along a new leading dimension.
///
/// # Errors
///
/// Fails when the list is empty or shapes differ.
pub fn stack_new_dim(dim: &str, arrays: &[DataArray]) -> Result<DataArray> {
    let first = arrays
        .first()
        .ok_or_else(|| ProcflowError::no_data(format!("Nothing to concatenate along {}", dim)))?;
    let views: Vec<_> = arrays.iter().map(|a| a.data.view()).collect();
    let data = ndarray::stack(Axis(0), &views)?;
    let mut dims = vec![dim.to_string()];
    dims.extend(first.dims.iter().cloned());
    Ok(DataArray {
        dims,
        data: data.into_dimensionality::<IxDyn>()?,
    })
}
