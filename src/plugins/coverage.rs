//! Coverage check plugins: percentage of valid pixels, in [0, 100]

use super::{Kwargs, ParamSchema};
use crate::area::AreaDefinition;
use crate::dataset::Dataset;
use crate::errors::{ProcflowError, Result};
use std::fmt;
use std::sync::Arc;

/// `(dataset, product_name, area_def, kwargs) -> percent`
pub type CoverageFn = Arc<dyn Fn(&Dataset, &str, &AreaDefinition, &Kwargs) -> Result<f64> + Send + Sync>;

#[derive(Clone)]
pub struct CoveragePlugin {
    pub name: String,
    pub params: ParamSchema,
    pub call: CoverageFn,
}

impl fmt::Debug for CoveragePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoveragePlugin")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

impl CoveragePlugin {
    pub fn new<F>(name: impl Into<String>, params: ParamSchema, func: F) -> Self
    where
        F: Fn(&Dataset, &str, &AreaDefinition, &Kwargs) -> Result<f64> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            call: Arc::new(func),
        }
    }

    pub fn coverage(
        &self,
        dataset: &Dataset,
        product_name: &str,
        area: &AreaDefinition,
        kwargs: &Kwargs,
    ) -> Result<f64> {
        let kwargs = super::remove_unsupported_kwargs(kwargs, &self.params, &self.name);
        (self.call)(dataset, product_name, area, &kwargs)
    }
}

fn coverage_variable<'a>(
    dataset: &'a Dataset,
    product_name: &str,
    kwargs: &Kwargs,
) -> Result<&'a crate::dataset::DataArray> {
    let varname = kwargs
        .get("alt_varname_for_covg")
        .and_then(|v| v.as_str())
        .unwrap_or(product_name);
    dataset.require_variable(varname)
}

/// Percentage of unmasked pixels in the product (or `alt_varname_for_covg`) variable
pub fn masked_arrays(dataset: &Dataset, product_name: &str, _area: &AreaDefinition, kwargs: &Kwargs) -> Result<f64> {
    let var = coverage_variable(dataset, product_name, kwargs)?;
    let total = var.data.len();
    if total == 0 {
        return Ok(0.0);
    }
    Ok(100.0 * var.count_valid() as f64 / total as f64)
}

/// Percentage of unmasked pixels inside a disk of `radius_km` around the grid centre
pub fn center_radius(dataset: &Dataset, product_name: &str, area: &AreaDefinition, kwargs: &Kwargs) -> Result<f64> {
    let var = coverage_variable(dataset, product_name, kwargs)?;
    if var.data.ndim() < 2 {
        return Err(ProcflowError::configuration(format!(
            "center_radius coverage needs a 2-D variable, got rank {}",
            var.data.ndim()
        )));
    }
    let radius_km = kwargs
        .get("radius_km")
        .and_then(|v| v.as_f64())
        .unwrap_or(300.0);
    let radius_px = radius_km / area.resolution_km();
    let (rows, cols) = (var.shape()[0], var.shape()[1]);
    let (center_row, center_col) = (rows as f64 / 2.0, cols as f64 / 2.0);

    let mut total = 0usize;
    let mut valid = 0usize;
    for (idx, value) in var.data.indexed_iter() {
        let dr = idx[0] as f64 + 0.5 - center_row;
        let dc = idx[1] as f64 + 0.5 - center_col;
        if (dr * dr + dc * dc).sqrt() <= radius_px {
            total += 1;
            if value.is_finite() {
                valid += 1;
            }
        }
    }
    if total == 0 {
        return Ok(0.0);
    }
    Ok(100.0 * valid as f64 / total as f64)
}

pub(crate) fn masked_arrays_plugin() -> CoveragePlugin {
    CoveragePlugin::new(
        "masked_arrays",
        ParamSchema::accepts(&["alt_varname_for_covg"]),
        masked_arrays,
    )
}

pub(crate) fn center_radius_plugin() -> CoveragePlugin {
    CoveragePlugin::new(
        "center_radius",
        ParamSchema::accepts(&["alt_varname_for_covg", "radius_km"]),
        center_radius,
    )
}
