//! Colormap plugins: produce the plotting parameters handed to image renderers

use super::{Kwargs, ParamSchema};
use crate::errors::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Plotting parameters resolved once per render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorsInfo {
    pub cmap_name: String,
    pub data_range: Option<(f64, f64)>,
    pub cbar_label: Option<String>,
    pub cbar_ticks: Vec<f64>,
}

pub type ColormapFn = Arc<dyn Fn(&Kwargs) -> Result<ColorsInfo> + Send + Sync>;

#[derive(Clone)]
pub struct ColormapPlugin {
    pub name: String,
    pub params: ParamSchema,
    pub call: ColormapFn,
}

impl fmt::Debug for ColormapPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColormapPlugin")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

impl ColormapPlugin {
    pub fn new<F>(name: impl Into<String>, params: ParamSchema, func: F) -> Self
    where
        F: Fn(&Kwargs) -> Result<ColorsInfo> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            call: Arc::new(func),
        }
    }

    pub fn colors_info(&self, kwargs: &Kwargs) -> Result<ColorsInfo> {
        let kwargs = super::remove_unsupported_kwargs(kwargs, &self.params, &self.name);
        (self.call)(&kwargs)
    }
}

/// Linear normalization over `data_range` with evenly spaced colorbar ticks
pub fn linear_norm(kwargs: &Kwargs) -> Result<ColorsInfo> {
    let data_range = kwargs
        .get("data_range")
        .and_then(|v| v.as_array())
        .and_then(|r| Some((r.first()?.as_f64()?, r.get(1)?.as_f64()?)));
    let num_ticks = kwargs
        .get("num_ticks")
        .and_then(|v| v.as_u64())
        .unwrap_or(5)
        .max(2) as usize;
    let cbar_ticks = match data_range {
        Some((lo, hi)) => (0..num_ticks)
            .map(|i| lo + (hi - lo) * i as f64 / (num_ticks - 1) as f64)
            .collect(),
        None => Vec::new(),
    };
    Ok(ColorsInfo {
        cmap_name: kwargs
            .get("cmap_name")
            .and_then(|v| v.as_str())
            .unwrap_or("Greys")
            .to_string(),
        data_range,
        cbar_label: kwargs
            .get("cbar_label")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        cbar_ticks,
    })
}

pub(crate) fn linear_norm_plugin() -> ColormapPlugin {
    ColormapPlugin::new(
        "linear_norm",
        ParamSchema::accepts(&["data_range", "num_ticks", "cmap_name", "cbar_label"]),
        linear_norm,
    )
}
