//! Algorithm plugins and their call-signature families

use super::{Kwargs, ParamSchema};
use crate::area::AreaDefinition;
use crate::dataset::{Dataset, DatasetBundle};
use crate::errors::{ProcflowError, Result};
use ndarray::ArrayD;
use std::fmt;
use std::sync::Arc;

pub type ListNumpyFn = Arc<dyn Fn(&[ArrayD<f32>], &Kwargs) -> Result<ArrayD<f32>> + Send + Sync>;
pub type XarrayToNumpyFn = Arc<dyn Fn(&Dataset, &Kwargs) -> Result<ArrayD<f32>> + Send + Sync>;
pub type XarrayToXarrayFn = Arc<dyn Fn(&Dataset, &Kwargs) -> Result<Dataset> + Send + Sync>;
pub type XarrayDictAreaDefToNumpyFn =
    Arc<dyn Fn(&DatasetBundle, &AreaDefinition, &Kwargs) -> Result<ArrayD<f32>> + Send + Sync>;
pub type XarrayDictToXarrayFn = Arc<dyn Fn(&DatasetBundle, &Kwargs) -> Result<Dataset> + Send + Sync>;

/// Families taking an ordered list of raw arrays, one per required variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFamily {
    SingleChannel,
    ChannelCombination,
    ListNumpyToNumpy,
    Rgb,
}

impl ListFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListFamily::SingleChannel => "single_channel",
            ListFamily::ChannelCombination => "channel_combination",
            ListFamily::ListNumpyToNumpy => "list_numpy_to_numpy",
            ListFamily::Rgb => "rgb",
        }
    }

    pub fn parse(family: &str) -> Option<Self> {
        match family {
            "single_channel" => Some(ListFamily::SingleChannel),
            "channel_combination" => Some(ListFamily::ChannelCombination),
            "list_numpy_to_numpy" => Some(ListFamily::ListNumpyToNumpy),
            "rgb" => Some(ListFamily::Rgb),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub enum AlgorithmCall {
    ListNumpy { family: ListFamily, func: ListNumpyFn },
    XarrayToNumpy(XarrayToNumpyFn),
    XarrayToXarray(XarrayToXarrayFn),
    XarrayDictAreaDefToNumpy(XarrayDictAreaDefToNumpyFn),
    XarrayDictToXarray(XarrayDictToXarrayFn),
}

impl AlgorithmCall {
    pub fn family(&self) -> &'static str {
        match self {
            AlgorithmCall::ListNumpy { family, .. } => family.as_str(),
            AlgorithmCall::XarrayToNumpy(_) => "xarray_to_numpy",
            AlgorithmCall::XarrayToXarray(_) => "xarray_to_xarray",
            AlgorithmCall::XarrayDictAreaDefToNumpy(_) => "xarray_dict_area_def_to_numpy",
            AlgorithmCall::XarrayDictToXarray(_) => "xarray_dict_to_xarray",
        }
    }
}

impl fmt::Debug for AlgorithmCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AlgorithmCall({})", self.family())
    }
}

#[derive(Debug, Clone)]
pub struct AlgorithmPlugin {
    pub name: String,
    pub params: ParamSchema,
    pub call: AlgorithmCall,
}

impl AlgorithmPlugin {
    /// Register a list-of-arrays algorithm under one of its family names.
    ///
    /// # Errors
    ///
    /// Returns [`ProcflowError::UnsupportedFamily`] for an unknown family name.
    pub fn list_numpy<F>(name: impl Into<String>, family: &str, params: ParamSchema, func: F) -> Result<Self>
    where
        F: Fn(&[ArrayD<f32>], &Kwargs) -> Result<ArrayD<f32>> + Send + Sync + 'static,
    {
        let family = ListFamily::parse(family)
            .ok_or_else(|| ProcflowError::unsupported_family(family, "algorithm"))?;
        Ok(Self {
            name: name.into(),
            params,
            call: AlgorithmCall::ListNumpy {
                family,
                func: Arc::new(func),
            },
        })
    }

    pub fn xarray_to_numpy<F>(name: impl Into<String>, params: ParamSchema, func: F) -> Self
    where
        F: Fn(&Dataset, &Kwargs) -> Result<ArrayD<f32>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            call: AlgorithmCall::XarrayToNumpy(Arc::new(func)),
        }
    }

    pub fn xarray_to_xarray<F>(name: impl Into<String>, params: ParamSchema, func: F) -> Self
    where
        F: Fn(&Dataset, &Kwargs) -> Result<Dataset> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            call: AlgorithmCall::XarrayToXarray(Arc::new(func)),
        }
    }

    pub fn xarray_dict_area_def_to_numpy<F>(name: impl Into<String>, params: ParamSchema, func: F) -> Self
    where
        F: Fn(&DatasetBundle, &AreaDefinition, &Kwargs) -> Result<ArrayD<f32>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            call: AlgorithmCall::XarrayDictAreaDefToNumpy(Arc::new(func)),
        }
    }

    pub fn xarray_dict_to_xarray<F>(name: impl Into<String>, params: ParamSchema, func: F) -> Self
    where
        F: Fn(&DatasetBundle, &Kwargs) -> Result<Dataset> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            call: AlgorithmCall::XarrayDictToXarray(Arc::new(func)),
        }
    }

    pub fn family(&self) -> &'static str {
        self.call.family()
    }
}

/// Built-in `single_channel` algorithm
///
/// Applies `output_data_range` to the first array: values outside the range are clipped
/// (`min_outbounds`/`max_outbounds` = `crop`, the default) or masked (`mask`). With
/// `norm` set the result is scaled to 0..1, and `inverse` flips it.
pub fn single_channel(arrays: &[ArrayD<f32>], kwargs: &Kwargs) -> Result<ArrayD<f32>> {
    let data = arrays
        .first()
        .ok_or_else(|| ProcflowError::no_data("single_channel needs one input array"))?;
    let range = kwargs
        .get("output_data_range")
        .and_then(|v| v.as_array())
        .and_then(|r| Some((r.first()?.as_f64()? as f32, r.get(1)?.as_f64()? as f32)));
    let min_mask = kwargs.get("min_outbounds").and_then(|v| v.as_str()) == Some("mask");
    let max_mask = kwargs.get("max_outbounds").and_then(|v| v.as_str()) == Some("mask");
    let norm = kwargs.get("norm").and_then(|v| v.as_bool()).unwrap_or(false);
    let inverse = kwargs.get("inverse").and_then(|v| v.as_bool()).unwrap_or(false);

    let Some((lo, hi)) = range else {
        return Ok(data.clone());
    };
    let span = if hi > lo { hi - lo } else { 1.0 };
    Ok(data.mapv(|v| {
        if !v.is_finite() {
            return v;
        }
        let clipped = if v < lo {
            if min_mask {
                return f32::NAN;
            }
            lo
        } else if v > hi {
            if max_mask {
                return f32::NAN;
            }
            hi
        } else {
            v
        };
        let scaled = if norm { (clipped - lo) / span } else { clipped };
        if inverse && norm {
            1.0 - scaled
        } else {
            scaled
        }
    }))
}

pub(crate) fn single_channel_plugin() -> AlgorithmPlugin {
    AlgorithmPlugin {
        name: "single_channel".to_string(),
        params: ParamSchema::accepts(&[
            "output_data_range",
            "min_outbounds",
            "max_outbounds",
            "norm",
            "inverse",
        ]),
        call: AlgorithmCall::ListNumpy {
            family: ListFamily::SingleChannel,
            func: Arc::new(single_channel),
        },
    }
}
