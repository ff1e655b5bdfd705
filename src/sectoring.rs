//! Geographic and temporal subsetting of dataset bundles

use crate::area::AreaDefinition;
use crate::dataset::{DataArray, Dataset, DatasetBundle, METADATA_KEY};
use crate::errors::Result;
use chrono::{DateTime, Duration, Utc};
use ndarray::{Axis, Slice};
use tracing::{debug, info};

/// Hours of data kept before a dynamic sector's nominal time
pub const HOURS_BEFORE_SECTOR_TIME: i64 = 6;
/// Hours of data kept after a dynamic sector's nominal time
pub const HOURS_AFTER_SECTOR_TIME: i64 = 9;
/// Data spans shorter than this are matched to a single closest dynamic sector
pub const TIME_RANGE_HOURS: i64 = 3;

/// Options controlling [`sector_xarrays`]
#[derive(Debug, Clone)]
pub struct SectorOptions {
    /// Only datasets containing at least one of these variables are kept
    pub varlist: Option<Vec<String>>,
    pub hours_before_sector_time: i64,
    pub hours_after_sector_time: i64,
    /// Mask pixels outside the area after cropping to its bounding box
    pub drop: bool,
}

impl Default for SectorOptions {
    fn default() -> Self {
        Self {
            varlist: None,
            hours_before_sector_time: HOURS_BEFORE_SECTOR_TIME,
            hours_after_sector_time: HOURS_AFTER_SECTOR_TIME,
            drop: true,
        }
    }
}

impl SectorOptions {
    pub fn with_varlist(varlist: &[String]) -> Self {
        Self {
            varlist: Some(varlist.to_vec()),
            ..Self::default()
        }
    }
}

/// Subset every dataset in the bundle to the pixels and times intersecting `area`.
///
/// Datasets need 2-D `latitude`/`longitude` variables to be sectored; variables sharing
/// those dimensions are cropped to the bounding box of the in-area pixels. Datasets with
/// no pixel inside the area, or outside the time window of a dynamic sector, are
/// dropped. The returned bundle is empty when nothing intersects; otherwise it carries a
/// METADATA entry whose time range spans the surviving datasets.
pub fn sector_xarrays(
    bundle: &DatasetBundle,
    area: &AreaDefinition,
    options: &SectorOptions,
) -> Result<DatasetBundle> {
    let extent = area.extent_ll();
    let mut sectored = DatasetBundle::new();
    let mut start: Option<DateTime<Utc>> = None;
    let mut end: Option<DateTime<Utc>> = None;

    for (key, dataset) in bundle.data_datasets() {
        if let Some(varlist) = &options.varlist {
            if !varlist.iter().any(|v| dataset.contains(v)) {
                debug!("Skipping dataset {}, none of {:?} present", key, varlist);
                continue;
            }
        }
        if !within_sector_time(dataset, area, options) {
            info!(
                "Dataset {} outside {}h/{}h window of sector {}",
                key, options.hours_before_sector_time, options.hours_after_sector_time, area.name
            );
            continue;
        }

        let (lats, lons) = match (dataset.variable("latitude"), dataset.variable("longitude")) {
            (Some(lats), Some(lons)) if lats.data.ndim() == 2 && lats.shape() == lons.shape() => {
                (lats, lons)
            }
            _ => {
                debug!("Dataset {} has no 2-D geolocation, kept unsectored", key);
                sectored.insert(key.clone(), dataset.clone());
                accumulate_time_range(dataset, &mut start, &mut end);
                continue;
            }
        };

        let (rows, cols) = (lats.shape()[0], lats.shape()[1]);
        let mut row_range: Option<(usize, usize)> = None;
        let mut col_range: Option<(usize, usize)> = None;
        let inside = ndarray::Array2::from_shape_fn((rows, cols), |(r, c)| {
            let lat = lats.data[[r, c]] as f64;
            let lon = lons.data[[r, c]] as f64;
            let hit = lat.is_finite() && lon.is_finite() && extent.contains(lat, lon);
            if hit {
                row_range = Some(row_range.map_or((r, r), |(lo, hi)| (lo.min(r), hi.max(r))));
                col_range = Some(col_range.map_or((c, c), |(lo, hi)| (lo.min(c), hi.max(c))));
            }
            hit
        });
        let ((row0, row1), (col0, col1)) = match (row_range, col_range) {
            (Some(r), Some(c)) => (r, c),
            _ => {
                info!("Dataset {} does not intersect area {}", key, area.name);
                continue;
            }
        };

        let (row_dim, col_dim) = (lats.dims[0].clone(), lats.dims[1].clone());
        let mask = inside.slice(ndarray::s![row0..=row1, col0..=col1]).to_owned();
        let mut subset = Dataset::with_attrs(dataset.attrs.clone());
        subset.area_definition = dataset.area_definition.clone();
        for (name, var) in dataset.variables() {
            let mut data = var.data.clone();
            let row_axis = var.axis_of(&row_dim);
            let col_axis = var.axis_of(&col_dim);
            if let Some(axis) = row_axis {
                data.slice_axis_inplace(Axis(axis), Slice::from(row0..row1 + 1));
            }
            if let Some(axis) = col_axis {
                data.slice_axis_inplace(Axis(axis), Slice::from(col0..col1 + 1));
            }
            let is_geolocation = name == "latitude" || name == "longitude";
            if options.drop && !is_geolocation {
                if let (Some(ra), Some(ca)) = (row_axis, col_axis) {
                    mask_outside(&mut data, &mask, ra, ca);
                }
            }
            subset.insert_variable(
                name.clone(),
                DataArray {
                    dims: var.dims.clone(),
                    data,
                },
            );
        }
        accumulate_time_range(&subset, &mut start, &mut end);
        sectored.insert(key.clone(), subset);
    }

    if sectored.is_empty() {
        return Ok(sectored);
    }

    let mut metadata = bundle.get(METADATA_KEY).cloned().unwrap_or_default();
    if let (Some(start), Some(end)) = (start, end) {
        metadata.set_time_range(start, end);
    }
    let mut with_metadata = DatasetBundle::new();
    with_metadata.insert(METADATA_KEY, metadata);
    for (key, dataset) in sectored.iter() {
        with_metadata.insert(key.clone(), dataset.clone());
    }
    Ok(with_metadata)
}

fn within_sector_time(dataset: &Dataset, area: &AreaDefinition, options: &SectorOptions) -> bool {
    let sector_time = match area.sector_start_datetime {
        Some(t) => t,
        None => return true,
    };
    let window_start = sector_time - Duration::hours(options.hours_before_sector_time);
    let window_end = sector_time + Duration::hours(options.hours_after_sector_time);
    match (dataset.start_datetime(), dataset.end_datetime()) {
        (Some(start), Some(end)) => end >= window_start && start <= window_end,
        _ => true,
    }
}

fn accumulate_time_range(
    dataset: &Dataset,
    start: &mut Option<DateTime<Utc>>,
    end: &mut Option<DateTime<Utc>>,
) {
    if let Some(s) = dataset.start_datetime() {
        *start = Some(start.map_or(s, |cur| cur.min(s)));
    }
    if let Some(e) = dataset.end_datetime() {
        *end = Some(end.map_or(e, |cur| cur.max(e)));
    }
}

fn mask_outside(
    data: &mut ndarray::ArrayD<f32>,
    mask: &ndarray::Array2<bool>,
    row_axis: usize,
    col_axis: usize,
) {
    for (idx, value) in data.indexed_iter_mut() {
        if !mask[[idx[row_axis], idx[col_axis]]] {
            *value = f32::NAN;
        }
    }
}

/// Reduce dynamic sectors to the single one per name closest to `data_start`.
///
/// Static sectors pass through. Order follows first occurrence of each name.
pub fn filter_area_defs_actual_time(
    area_defs: &[AreaDefinition],
    data_start: DateTime<Utc>,
) -> Vec<AreaDefinition> {
    let mut kept: Vec<AreaDefinition> = Vec::new();
    for area in area_defs {
        let sector_time = match area.sector_start_datetime {
            Some(t) => t,
            None => {
                kept.push(area.clone());
                continue;
            }
        };
        let distance = (sector_time - data_start).num_seconds().abs();
        match kept
            .iter_mut()
            .find(|k| k.is_dynamic() && k.name == area.name)
        {
            Some(existing) => {
                let existing_distance = existing
                    .sector_start_datetime
                    .map(|t| (t - data_start).num_seconds().abs())
                    .unwrap_or(i64::MAX);
                if distance < existing_distance {
                    *existing = area.clone();
                }
            }
            None => kept.push(area.clone()),
        }
    }
    kept
}

/// Whether `area` survives the closest-time filter for the data time range.
///
/// Only short data spans (under [`TIME_RANGE_HOURS`]) are checked; longer spans
/// are always considered verified.
pub fn verify_area_def(
    area_defs: &[AreaDefinition],
    area: &AreaDefinition,
    data_start: DateTime<Utc>,
    data_end: DateTime<Utc>,
) -> bool {
    if data_end - data_start >= Duration::hours(TIME_RANGE_HOURS) {
        return true;
    }
    filter_area_defs_actual_time(area_defs, data_start)
        .iter()
        .any(|kept| kept.name == area.name && kept.sector_start_datetime == area.sector_start_datetime)
}
