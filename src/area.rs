//! Area definitions: named target grids tagged with a sector type
//!
//! An [`AreaDefinition`] is always fully resolved. Optional fields (name, area id,
//! description, sector type) are defaulted exactly once in
//! [`AreaDefinitionBuilder::build_or`], so downstream code never checks for missing
//! attributes. Grids are treated as equirectangular around the projection centre, which
//! is enough for sectoring, padding and nearest-neighbour resampling.

use crate::dataset::Attributes;
use crate::errors::{ProcflowError, Result};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metres per degree of latitude
pub const METERS_PER_DEGREE_LAT: f64 = 110_574.0;
/// Metres per degree of longitude at the equator
pub const METERS_PER_DEGREE_LON: f64 = 111_320.0;

/// Sources whose products need the full swath width when padded
pub const FULL_SWATH_SOURCES: [&str; 2] = ["amsu-b", "mhs"];
/// Default padding factor applied to both axes
pub const DEFAULT_PAD_SCALE: f64 = 1.5;

/// How an area definition should be treated by the orchestrators
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SectorType {
    Static,
    Tc,
    ReaderDefined,
    SelfRegister,
    Unsectored,
    Other(String),
}

impl SectorType {
    pub fn as_str(&self) -> &str {
        match self {
            SectorType::Static => "static",
            SectorType::Tc => "tc",
            SectorType::ReaderDefined => "reader_defined",
            SectorType::SelfRegister => "self_register",
            SectorType::Unsectored => "unsectored",
            SectorType::Other(name) => name,
        }
    }

    /// Reader-defined and self-registered areas consume all available data unsectored.
    pub fn uses_unsectored_data(&self) -> bool {
        matches!(self, SectorType::ReaderDefined | SectorType::SelfRegister)
    }
}

impl From<&str> for SectorType {
    fn from(value: &str) -> Self {
        match value {
            "static" => SectorType::Static,
            "tc" => SectorType::Tc,
            "reader_defined" => SectorType::ReaderDefined,
            "self_register" => SectorType::SelfRegister,
            "unsectored" => SectorType::Unsectored,
            other => SectorType::Other(other.to_string()),
        }
    }
}

impl From<String> for SectorType {
    fn from(value: String) -> Self {
        SectorType::from(value.as_str())
    }
}

impl From<SectorType> for String {
    fn from(value: SectorType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub proj: String,
    pub lat_0: f64,
    pub lon_0: f64,
}

impl Projection {
    pub fn eqc(lat_0: f64, lon_0: f64) -> Self {
        Self {
            proj: "eqc".to_string(),
            lat_0,
            lon_0,
        }
    }
}

/// Geographic bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLonExtent {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl LatLonExtent {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

/// A named geographic region with a pixel grid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaDefinition {
    pub name: String,
    pub area_id: String,
    pub description: String,
    pub sector_type: SectorType,
    pub projection: Projection,
    pub x_size: usize,
    pub y_size: usize,
    /// Pixel width in metres
    pub pixel_size_x: f64,
    /// Pixel height in metres
    pub pixel_size_y: f64,
    pub sector_info: Attributes,
    /// Nominal time of a dynamic sector (tc, track files)
    pub sector_start_datetime: Option<DateTime<Utc>>,
    pub sector_end_datetime: Option<DateTime<Utc>>,
    /// Explicit extent, used for self-registered swaths
    pub swath_extent: Option<LatLonExtent>,
}

impl AreaDefinition {
    pub fn builder() -> AreaDefinitionBuilder {
        AreaDefinitionBuilder::default()
    }

    /// Dynamic sectors carry a nominal time and may be time-filtered.
    pub fn is_dynamic(&self) -> bool {
        self.sector_start_datetime.is_some()
    }

    /// Centre latitude/longitude: the storm centre for tc sectors, the projection centre otherwise.
    pub fn center(&self) -> (f64, f64) {
        if self.sector_type == SectorType::Tc {
            let clat = self.sector_info.get("clat").and_then(|v| v.as_f64());
            let clon = self.sector_info.get("clon").and_then(|v| v.as_f64());
            if let (Some(clat), Some(clon)) = (clat, clon) {
                return (clat, clon);
            }
        }
        (self.projection.lat_0, self.projection.lon_0)
    }

    pub fn extent_ll(&self) -> LatLonExtent {
        if let Some(extent) = self.swath_extent {
            return extent;
        }
        let (lat_0, lon_0) = (self.projection.lat_0, self.projection.lon_0);
        let half_height_deg = self.y_size as f64 * self.pixel_size_y / 2.0 / METERS_PER_DEGREE_LAT;
        let cos_lat = lat_0.to_radians().cos().max(1e-6);
        let half_width_deg =
            self.x_size as f64 * self.pixel_size_x / 2.0 / (METERS_PER_DEGREE_LON * cos_lat);
        LatLonExtent {
            min_lat: lat_0 - half_height_deg,
            max_lat: lat_0 + half_height_deg,
            min_lon: lon_0 - half_width_deg,
            max_lon: lon_0 + half_width_deg,
        }
    }

    /// Cell-centre latitudes and longitudes, row 0 at the northern edge.
    pub fn lats_lons(&self) -> (Array2<f64>, Array2<f64>) {
        let extent = self.extent_ll();
        let dlat = (extent.max_lat - extent.min_lat) / self.y_size as f64;
        let dlon = (extent.max_lon - extent.min_lon) / self.x_size as f64;
        let lats = Array2::from_shape_fn((self.y_size, self.x_size), |(row, _)| {
            extent.max_lat - (row as f64 + 0.5) * dlat
        });
        let lons = Array2::from_shape_fn((self.y_size, self.x_size), |(_, col)| {
            extent.min_lon + (col as f64 + 0.5) * dlon
        });
        (lats, lons)
    }

    /// Average pixel size in kilometres
    pub fn resolution_km(&self) -> f64 {
        (self.pixel_size_x + self.pixel_size_y) / 2.0 / 1000.0
    }
}

/// Optional-field description of an area definition
///
/// Also the on-disk layout of one entry in a static sector YAML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AreaDefinitionBuilder {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub area_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sector_type: Option<SectorType>,
    #[serde(default)]
    pub projection: Option<Projection>,
    #[serde(default)]
    pub x_size: usize,
    #[serde(default)]
    pub y_size: usize,
    #[serde(default)]
    pub pixel_size_x: f64,
    #[serde(default)]
    pub pixel_size_y: f64,
    #[serde(default)]
    pub sector_info: Attributes,
    #[serde(default)]
    pub sector_start_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sector_end_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub swath_extent: Option<LatLonExtent>,
}

impl AreaDefinitionBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn area_id(mut self, area_id: impl Into<String>) -> Self {
        self.area_id = Some(area_id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn sector_type(mut self, sector_type: SectorType) -> Self {
        self.sector_type = Some(sector_type);
        self
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn shape(mut self, x_size: usize, y_size: usize) -> Self {
        self.x_size = x_size;
        self.y_size = y_size;
        self
    }

    pub fn pixel_size(mut self, pixel_size_x: f64, pixel_size_y: f64) -> Self {
        self.pixel_size_x = pixel_size_x;
        self.pixel_size_y = pixel_size_y;
        self
    }

    pub fn sector_info_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.sector_info.insert(key.into(), value);
        self
    }

    pub fn sector_times(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.sector_start_datetime = Some(start);
        self.sector_end_datetime = Some(end);
        self
    }

    pub fn swath_extent(mut self, extent: LatLonExtent) -> Self {
        self.swath_extent = Some(extent);
        self
    }

    /// Resolve every optional field, falling back to `default_sector_type`.
    ///
    /// The name defaults to the area id, then to the sector type; the area id and
    /// description default to the name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty grid or a missing projection.
    pub fn build_or(self, default_sector_type: SectorType) -> Result<AreaDefinition> {
        let sector_type = self.sector_type.unwrap_or(default_sector_type);
        let name = self
            .name
            .or_else(|| self.area_id.clone())
            .unwrap_or_else(|| sector_type.to_string());
        let area_id = self.area_id.unwrap_or_else(|| name.clone());
        let description = self.description.unwrap_or_else(|| name.clone());

        if self.x_size == 0 || self.y_size == 0 {
            return Err(ProcflowError::configuration(format!(
                "Area definition {} has an empty {}x{} grid",
                name, self.x_size, self.y_size
            )));
        }
        if self.pixel_size_x <= 0.0 || self.pixel_size_y <= 0.0 {
            return Err(ProcflowError::configuration(format!(
                "Area definition {} has a non-positive pixel size",
                name
            )));
        }
        let projection = match (self.projection, self.swath_extent) {
            (Some(projection), _) => projection,
            (None, Some(extent)) => {
                let (lat_0, lon_0) = extent.center();
                Projection::eqc(lat_0, lon_0)
            }
            (None, None) => {
                return Err(ProcflowError::configuration(format!(
                    "Area definition {} has no projection",
                    name
                )))
            }
        };

        Ok(AreaDefinition {
            name,
            area_id,
            description,
            sector_type,
            projection,
            x_size: self.x_size,
            y_size: self.y_size,
            pixel_size_x: self.pixel_size_x,
            pixel_size_y: self.pixel_size_y,
            sector_info: self.sector_info,
            sector_start_datetime: self.sector_start_datetime,
            sector_end_datetime: self.sector_end_datetime,
            swath_extent: self.swath_extent,
        })
    }
}

/// Pad an area by the default factor of 1.5 on both axes.
///
/// See [`pad_area_definition_scaled`].
pub fn pad_area_definition(
    area: &AreaDefinition,
    source_name: Option<&str>,
    force_pad: bool,
) -> AreaDefinition {
    pad_area_definition_scaled(area, source_name, force_pad, DEFAULT_PAD_SCALE, DEFAULT_PAD_SCALE)
}

/// Enlarge a tc (or force-padded) area so later recentering has a margin to work with.
///
/// Full-swath sources get five times the width and the original height. The padded
/// area is an equirectangular grid around the storm centre (tc) or the projection
/// centre, with the same pixel size. Names, sector type, sector info and sector times
/// are carried over. Any other area is returned unchanged.
pub fn pad_area_definition_scaled(
    area: &AreaDefinition,
    source_name: Option<&str>,
    force_pad: bool,
    x_scale: f64,
    y_scale: f64,
) -> AreaDefinition {
    if area.sector_type != SectorType::Tc && !force_pad {
        return area.clone();
    }

    let (x_scale, y_scale) = match source_name {
        Some(source) if FULL_SWATH_SOURCES.contains(&source) => (5.0, 1.0),
        _ => (x_scale, y_scale),
    };
    let (clat, clon) = area.center();
    let x_size = ((area.x_size as f64) * x_scale).floor() as usize;
    let y_size = ((area.y_size as f64) * y_scale).floor() as usize;

    AreaDefinition {
        name: area.name.clone(),
        area_id: area.area_id.clone(),
        description: area.description.clone(),
        sector_type: area.sector_type.clone(),
        projection: Projection::eqc(clat, clon),
        x_size: x_size.max(1),
        y_size: y_size.max(1),
        pixel_size_x: area.pixel_size_x,
        pixel_size_y: area.pixel_size_y,
        sector_info: area.sector_info.clone(),
        sector_start_datetime: area.sector_start_datetime,
        sector_end_datetime: area.sector_end_datetime,
        swath_extent: None,
    }
}
