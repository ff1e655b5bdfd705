//! Interpolator plugins: resample dataset variables onto an area definition grid

use super::{Kwargs, ParamSchema};
use crate::area::{AreaDefinition, METERS_PER_DEGREE_LAT, METERS_PER_DEGREE_LON};
use crate::dataset::{DataArray, Dataset};
use crate::errors::{ProcflowError, Result};
use ndarray::Array2;
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Radius of influence used when neither kwargs nor dataset attributes give one
pub const DEFAULT_RADIUS_OF_INFLUENCE_M: f64 = 20_000.0;

/// `(area, source, target, varlist, kwargs) -> target with interpolated variables`
pub type InterpFn =
    Arc<dyn Fn(&AreaDefinition, &Dataset, Dataset, &[String], &Kwargs) -> Result<Dataset> + Send + Sync>;

#[derive(Clone)]
pub enum InterpolatorCall {
    /// Family `2d`: 2-D swath or grid to 2-D area grid
    TwoDimensional(InterpFn),
}

impl InterpolatorCall {
    pub fn family(&self) -> &'static str {
        match self {
            InterpolatorCall::TwoDimensional(_) => "2d",
        }
    }
}

impl fmt::Debug for InterpolatorCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterpolatorCall({})", self.family())
    }
}

#[derive(Debug, Clone)]
pub struct InterpolatorPlugin {
    pub name: String,
    pub params: ParamSchema,
    pub call: InterpolatorCall,
}

impl InterpolatorPlugin {
    pub fn two_dimensional<F>(name: impl Into<String>, params: ParamSchema, func: F) -> Self
    where
        F: Fn(&AreaDefinition, &Dataset, Dataset, &[String], &Kwargs) -> Result<Dataset>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            params,
            call: InterpolatorCall::TwoDimensional(Arc::new(func)),
        }
    }

    /// Interpolate `varlist` from `source` onto `area`, writing into `target`.
    pub fn interpolate(
        &self,
        area: &AreaDefinition,
        source: &Dataset,
        target: Dataset,
        varlist: &[String],
        kwargs: &Kwargs,
    ) -> Result<Dataset> {
        let kwargs = super::remove_unsupported_kwargs(kwargs, &self.params, &self.name);
        match &self.call {
            InterpolatorCall::TwoDimensional(func) => func(area, source, target, varlist, &kwargs),
        }
    }
}

/// Nearest-neighbour resampling within a radius of influence
///
/// Target pixels with no source pixel inside the radius are masked. The radius comes
/// from `radius_of_influence` in kwargs, else the source's
/// `interpolation_radius_of_influence` attribute. Target rows are processed in parallel.
pub fn interp_nearest(
    area: &AreaDefinition,
    source: &Dataset,
    mut target: Dataset,
    varlist: &[String],
    kwargs: &Kwargs,
) -> Result<Dataset> {
    let lats = source.require_variable("latitude")?;
    let lons = source.require_variable("longitude")?;
    if lats.shape() != lons.shape() {
        return Err(ProcflowError::configuration(
            "latitude and longitude shapes differ",
        ));
    }
    let roi = kwargs
        .get("radius_of_influence")
        .and_then(|v| v.as_f64())
        .or_else(|| source.attr_f64("interpolation_radius_of_influence"))
        .unwrap_or(DEFAULT_RADIUS_OF_INFLUENCE_M);
    let roi2 = roi * roi;

    let points: Vec<(f64, f64, usize)> = lats
        .data
        .iter()
        .zip(lons.data.iter())
        .enumerate()
        .filter(|(_, (lat, lon))| lat.is_finite() && lon.is_finite())
        .map(|(idx, (lat, lon))| (*lat as f64, *lon as f64, idx))
        .collect();

    let (target_lats, target_lons) = area.lats_lons();
    let (rows, cols) = (area.y_size, area.x_size);

    let nearest: Vec<Option<usize>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            (0..cols)
                .map(|col| {
                    let lat = target_lats[[row, col]];
                    let lon = target_lons[[row, col]];
                    let cos_lat = lat.to_radians().cos();
                    let mut best: Option<(usize, f64)> = None;
                    for &(plat, plon, idx) in &points {
                        let dy = (plat - lat) * METERS_PER_DEGREE_LAT;
                        let dx = (plon - lon) * METERS_PER_DEGREE_LON * cos_lat;
                        let d2 = dx * dx + dy * dy;
                        if d2 <= roi2 && best.map_or(true, |(_, bd)| d2 < bd) {
                            best = Some((idx, d2));
                        }
                    }
                    best.map(|(idx, _)| idx)
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();

    for varname in varlist {
        let var = source.require_variable(varname)?;
        if var.shape() != lats.shape() {
            return Err(ProcflowError::configuration(format!(
                "Variable {} shape {:?} does not match geolocation {:?}",
                varname,
                var.shape(),
                lats.shape()
            )));
        }
        let values: Vec<f32> = var.data.iter().copied().collect();
        let resampled = Array2::from_shape_fn((rows, cols), |(row, col)| {
            nearest[row * cols + col].map_or(f32::NAN, |idx| values[idx])
        });
        target.insert_variable(varname.clone(), DataArray::grid(resampled));
    }

    if !target.contains("latitude") {
        target.insert_variable("latitude", DataArray::grid(target_lats.mapv(|v| v as f32)));
    }
    if !target.contains("longitude") {
        target.insert_variable("longitude", DataArray::grid(target_lons.mapv(|v| v as f32)));
    }
    target.area_definition = Some(area.clone());
    debug!("Interpolated {:?} onto {}", varlist, area.name);
    Ok(target)
}

pub(crate) fn interp_nearest_plugin() -> InterpolatorPlugin {
    InterpolatorPlugin::two_dimensional(
        "interp_nearest",
        ParamSchema::accepts(&["radius_of_influence"]),
        interp_nearest,
    )
}
