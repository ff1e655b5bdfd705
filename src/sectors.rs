//! Area-definition resolution from sector arguments
//!
//! Candidate areas come from several optional, additive sources: the reader's own area
//! definition, a self-registered dataset, static sector YAML files, a best-track
//! database and track files. Dynamic sources are plugins implementing
//! [`DynamicSectorSource`].

use crate::area::{AreaDefinition, AreaDefinitionBuilder, LatLonExtent, Projection, SectorType};
use crate::config::OrderedMap;
use crate::dataset::{DatasetBundle, METADATA_KEY};
use crate::errors::{ProcflowError, Result};
use crate::plugins::PluginRegistry;
use crate::sectoring::{filter_area_defs_actual_time, TIME_RANGE_HOURS};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Track file windows start this many hours before the data
pub const TRACKFILE_HOURS_BEFORE: i64 = 8;
/// Track file windows end this many hours after the data
pub const TRACKFILE_HOURS_AFTER: i64 = 3;
/// Best-track database source name
pub const TCDB_SOURCE: &str = "tcdb";
const TCDB_AID_TYPE: &str = "BEST";

/// Sector selection parameters, from the command line or one `available_sectors` entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectorArgs {
    #[serde(default)]
    pub reader_defined_area_def: bool,
    #[serde(default)]
    pub self_register_dataset: Option<String>,
    #[serde(default)]
    pub self_register_source: Option<String>,
    #[serde(default)]
    pub sectorfiles: Vec<PathBuf>,
    #[serde(default)]
    pub sector_list: Option<Vec<String>>,
    #[serde(default)]
    pub tcdb: bool,
    #[serde(default)]
    pub tcdb_sector_list: Option<Vec<String>>,
    #[serde(default)]
    pub trackfiles: Vec<PathBuf>,
    #[serde(default)]
    pub trackfile_parser: Option<String>,
    #[serde(default)]
    pub trackfile_sector_list: Option<Vec<String>>,
    #[serde(default)]
    pub tc_template_yaml: Option<PathBuf>,
    #[serde(default)]
    pub adjust_area_def: Option<String>,
    #[serde(default)]
    pub adjust_variables: Vec<String>,
    /// Outputs requesting this sector type are produced from the whole read, before sectoring
    #[serde(default)]
    pub unsectored: bool,
    #[serde(default)]
    pub product_database_writer: Option<String>,
    #[serde(default)]
    pub compare_path: Option<String>,
    #[serde(default)]
    pub compare_outputs_module: Option<String>,
}

impl SectorArgs {
    pub fn is_self_register(&self) -> bool {
        self.self_register_dataset.is_some()
    }

    /// Whether area resolution needs actual arrays rather than metadata alone
    pub fn needs_data_for_area_defs(&self) -> bool {
        self.reader_defined_area_def || self.is_self_register()
    }

    /// Overlay every set command-line field onto these args.
    ///
    /// Track files disable the best-track database.
    pub fn overridden_by(&self, cli: &SectorArgs) -> SectorArgs {
        let mut merged = self.clone();
        if cli.reader_defined_area_def {
            merged.reader_defined_area_def = true;
        }
        if cli.self_register_dataset.is_some() {
            merged.self_register_dataset = cli.self_register_dataset.clone();
        }
        if cli.self_register_source.is_some() {
            merged.self_register_source = cli.self_register_source.clone();
        }
        if !cli.sectorfiles.is_empty() {
            merged.sectorfiles = cli.sectorfiles.clone();
        }
        if cli.sector_list.is_some() {
            merged.sector_list = cli.sector_list.clone();
        }
        if cli.tcdb {
            merged.tcdb = true;
        }
        if cli.tcdb_sector_list.is_some() {
            merged.tcdb_sector_list = cli.tcdb_sector_list.clone();
        }
        if !cli.trackfiles.is_empty() {
            merged.trackfiles = cli.trackfiles.clone();
        }
        if cli.trackfile_parser.is_some() {
            merged.trackfile_parser = cli.trackfile_parser.clone();
        }
        if cli.trackfile_sector_list.is_some() {
            merged.trackfile_sector_list = cli.trackfile_sector_list.clone();
        }
        if cli.tc_template_yaml.is_some() {
            merged.tc_template_yaml = cli.tc_template_yaml.clone();
        }
        if cli.adjust_area_def.is_some() {
            merged.adjust_area_def = cli.adjust_area_def.clone();
        }
        if !cli.adjust_variables.is_empty() {
            merged.adjust_variables = cli.adjust_variables.clone();
        }
        if cli.unsectored {
            merged.unsectored = true;
        }
        if cli.product_database_writer.is_some() {
            merged.product_database_writer = cli.product_database_writer.clone();
        }
        if !merged.trackfiles.is_empty() {
            merged.tcdb = false;
        }
        merged
    }
}

/// Inputs handed to a dynamic sector source
#[derive(Debug, Clone, Copy)]
pub struct DynamicSectorRequest<'a> {
    pub files: &'a [PathBuf],
    pub sector_list: Option<&'a [String]>,
    pub tc_template: Option<&'a Path>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub aid_type: &'a str,
}

/// A source of dynamic (time-stamped) area definitions
pub trait DynamicSectorSource: Send + Sync {
    fn area_defs(&self, request: &DynamicSectorRequest<'_>) -> Result<Vec<AreaDefinition>>;
}

impl<F> DynamicSectorSource for F
where
    F: Fn(&DynamicSectorRequest<'_>) -> Result<Vec<AreaDefinition>> + Send + Sync,
{
    fn area_defs(&self, request: &DynamicSectorRequest<'_>) -> Result<Vec<AreaDefinition>> {
        self(request)
    }
}

/// Grid template for storm-centred sectors
#[derive(Debug, Clone, Deserialize)]
pub struct TcTemplate {
    pub x_size: usize,
    pub y_size: usize,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
}

impl Default for TcTemplate {
    fn default() -> Self {
        Self {
            x_size: 1024,
            y_size: 1024,
            pixel_size_x: 1000.0,
            pixel_size_y: 1000.0,
        }
    }
}

impl TcTemplate {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(serde_yaml::from_str(&fs::read_to_string(path)?)?),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TrackPoint {
    time: DateTime<Utc>,
    clat: f64,
    clon: f64,
    #[serde(default)]
    vmax: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TrackFile {
    storm_name: String,
    #[serde(default)]
    points: Vec<TrackPoint>,
}

/// Track file parser for YAML storm tracks
///
/// ```yaml
/// storm_name: al092020
/// points:
///   - {time: 2020-09-01T12:00:00Z, clat: 20.0, clon: -60.0, vmax: 45}
/// ```
///
/// Produces one tc area per track point inside the request window.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlTrackfileParser;

impl DynamicSectorSource for YamlTrackfileParser {
    fn area_defs(&self, request: &DynamicSectorRequest<'_>) -> Result<Vec<AreaDefinition>> {
        let template = TcTemplate::load(request.tc_template)?;
        let mut area_defs = Vec::new();
        for path in request.files {
            let track: TrackFile = serde_yaml::from_str(&fs::read_to_string(path)?)?;
            if let Some(list) = request.sector_list {
                if !list.iter().any(|s| s.eq_ignore_ascii_case(&track.storm_name)) {
                    continue;
                }
            }
            for point in track
                .points
                .iter()
                .filter(|p| p.time >= request.start && p.time <= request.end)
            {
                let area = AreaDefinition::builder()
                    .name(track.storm_name.clone())
                    .area_id(format!("{}_{}", track.storm_name, point.time.format("%Y%m%d%H%M")))
                    .projection(Projection::eqc(point.clat, point.clon))
                    .shape(template.x_size, template.y_size)
                    .pixel_size(template.pixel_size_x, template.pixel_size_y)
                    .sector_info_entry("storm_name", json!(track.storm_name))
                    .sector_info_entry("clat", json!(point.clat))
                    .sector_info_entry("clon", json!(point.clon))
                    .sector_info_entry("vmax", json!(point.vmax))
                    .sector_info_entry("synoptic_time", json!(point.time.to_rfc3339()))
                    .sector_info_entry("aid_type", json!(request.aid_type))
                    .sector_times(point.time, point.time)
                    .build_or(SectorType::Tc)?;
                area_defs.push(area);
            }
        }
        Ok(area_defs)
    }
}

#[derive(Debug, Deserialize)]
struct StaticSectorFile {
    #[serde(default)]
    sectors: Vec<AreaDefinitionBuilder>,
}

/// Load static sectors from YAML files, keeping only `sector_list` names when given.
pub fn load_static_sectors(paths: &[PathBuf], sector_list: Option<&[String]>) -> Result<Vec<AreaDefinition>> {
    let mut area_defs = Vec::new();
    for path in paths {
        let file: StaticSectorFile = serde_yaml::from_str(&fs::read_to_string(path)?)?;
        for spec in file.sectors {
            let area = spec.build_or(SectorType::Static)?;
            if let Some(list) = sector_list {
                if !list.iter().any(|s| *s == area.name) {
                    continue;
                }
            }
            area_defs.push(area);
        }
    }
    Ok(area_defs)
}

/// Area definition declared by the reader in METADATA
fn reader_defined_area_def(bundle: &DatasetBundle) -> Result<AreaDefinition> {
    bundle
        .metadata()?
        .area_definition
        .clone()
        .ok_or_else(|| ProcflowError::configuration("Reader did not define an area definition"))
}

/// Use one dataset's own geometry as the processing area.
///
/// A dataset without an area definition gets one synthesized from its lat/lon extent,
/// with the pixel size taken from `interpolation_radius_of_influence` (metres) or
/// `sample_distance_km`.
pub fn self_register_area_def(bundle: &DatasetBundle, dataset_key: &str, source: Option<&str>) -> Result<AreaDefinition> {
    let dataset = bundle.get(dataset_key).ok_or_else(|| {
        ProcflowError::no_data(format!("Self-register dataset {} not in the read data", dataset_key))
    })?;

    let mut area = match &dataset.area_definition {
        Some(area) => area.clone(),
        None => {
            let lats = dataset.require_variable("latitude")?;
            let lons = dataset.require_variable("longitude")?;
            let finite = |v: &&f32| v.is_finite();
            let min_max = |values: Vec<f32>| -> Option<(f64, f64)> {
                let lo = values.iter().cloned().fold(f32::INFINITY, f32::min);
                let hi = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                (lo.is_finite() && hi.is_finite()).then_some((lo as f64, hi as f64))
            };
            let (min_lat, max_lat) = min_max(lats.data.iter().filter(finite).cloned().collect())
                .ok_or_else(|| ProcflowError::no_data("Self-register dataset has no valid latitudes"))?;
            let (min_lon, max_lon) = min_max(lons.data.iter().filter(finite).cloned().collect())
                .ok_or_else(|| ProcflowError::no_data("Self-register dataset has no valid longitudes"))?;
            let pixel_size = dataset
                .attr_f64("interpolation_radius_of_influence")
                .or_else(|| dataset.attr_f64("sample_distance_km").map(|km| km * 1000.0))
                .ok_or_else(|| {
                    ProcflowError::configuration(
                        "Self-register dataset needs interpolation_radius_of_influence or sample_distance_km",
                    )
                })?;
            let (rows, cols) = match lats.shape() {
                [rows, cols] => (*rows, *cols),
                other => {
                    return Err(ProcflowError::configuration(format!(
                        "Self-register geolocation must be 2-D, got {:?}",
                        other
                    )))
                }
            };
            AreaDefinition::builder()
                .shape(cols, rows)
                .pixel_size(pixel_size, pixel_size)
                .swath_extent(LatLonExtent {
                    min_lat,
                    max_lat,
                    min_lon,
                    max_lon,
                })
                .build_or(SectorType::SelfRegister)?
        }
    };
    area.sector_info
        .insert("self_register_dataset".to_string(), json!(dataset_key));
    area.sector_info
        .insert("self_register_source".to_string(), json!(source));
    Ok(area)
}

/// Resolve the candidate areas for one set of sector arguments.
///
/// Sources are additive. When `filter_time` is set and the data spans less than
/// [`TIME_RANGE_HOURS`], dynamic areas are reduced to the one closest to the data start.
pub fn get_area_defs_from_command_line_args(
    args: &SectorArgs,
    bundle: &DatasetBundle,
    registry: &PluginRegistry,
    filter_time: bool,
) -> Result<Vec<AreaDefinition>> {
    let metadata = bundle.metadata()?;
    let mut area_defs: Vec<AreaDefinition> = Vec::new();

    if args.reader_defined_area_def {
        area_defs.push(reader_defined_area_def(bundle)?);
    }
    if let Some(dataset_key) = &args.self_register_dataset {
        area_defs.push(self_register_area_def(
            bundle,
            dataset_key,
            args.self_register_source.as_deref(),
        )?);
    }
    if !args.sectorfiles.is_empty() {
        area_defs.extend(load_static_sectors(&args.sectorfiles, args.sector_list.as_deref())?);
    }

    let data_times = metadata.start_datetime().zip(metadata.end_datetime());
    if args.tcdb {
        let (start, end) = data_times
            .ok_or_else(|| ProcflowError::configuration("tcdb sectors need a data time range"))?;
        let request = DynamicSectorRequest {
            files: &[],
            sector_list: args.tcdb_sector_list.as_deref(),
            tc_template: args.tc_template_yaml.as_deref(),
            start,
            end,
            aid_type: TCDB_AID_TYPE,
        };
        area_defs.extend(registry.sector_source(TCDB_SOURCE)?.area_defs(&request)?);
    }
    if !args.trackfiles.is_empty() {
        let (start, end) = data_times
            .ok_or_else(|| ProcflowError::configuration("Track file sectors need a data time range"))?;
        let parser = args.trackfile_parser.as_deref().ok_or_else(|| {
            ProcflowError::configuration("trackfiles given without a trackfile_parser")
        })?;
        let request = DynamicSectorRequest {
            files: &args.trackfiles,
            sector_list: args.trackfile_sector_list.as_deref(),
            tc_template: args.tc_template_yaml.as_deref(),
            start: start - Duration::hours(TRACKFILE_HOURS_BEFORE),
            end: end + Duration::hours(TRACKFILE_HOURS_AFTER),
            aid_type: TCDB_AID_TYPE,
        };
        area_defs.extend(registry.sector_source(parser)?.area_defs(&request)?);
    }

    if filter_time {
        if let Some((start, end)) = data_times {
            if end - start < Duration::hours(TIME_RANGE_HOURS) {
                area_defs = filter_area_defs_actual_time(&area_defs, start);
            }
        }
    }

    let names: Vec<&str> = area_defs.iter().map(|a| a.area_id.as_str()).collect();
    info!("Allowed area_defs: {:?}", names);
    Ok(area_defs)
}

/// One requested sector type for an area, with the args it was requested with
#[derive(Debug, Clone)]
pub struct SectorEntry {
    pub requested: SectorArgs,
    pub area_def: AreaDefinition,
}

/// Areas keyed by name, each holding every requested sector-type variant
#[derive(Debug, Clone, Default)]
pub struct AreaDefCollection {
    areas: Vec<(String, Vec<(String, SectorEntry)>)>,
}

impl AreaDefCollection {
    pub fn insert(&mut self, sector_type: &str, entry: SectorEntry) {
        let name = entry.area_def.name.clone();
        let pos = match self.areas.iter().position(|(n, _)| *n == name) {
            Some(pos) => pos,
            None => {
                self.areas.push((name, Vec::new()));
                self.areas.len() - 1
            }
        };
        let variants = &mut self.areas[pos].1;
        match variants.iter_mut().find(|(st, _)| st == sector_type) {
            Some((_, existing)) => {
                warn!(
                    "Replacing {} sector type {} for area {}",
                    existing.area_def.area_id, sector_type, existing.area_def.name
                );
                *existing = entry;
            }
            None => variants.push((sector_type.to_string(), entry)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<(String, SectorEntry)>)> {
        self.areas.iter().map(|(name, variants)| (name, variants))
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }
}

/// Resolve areas for every `available_sectors` entry of a config-based job.
///
/// Command-line sector args override each entry's own args. Unsectored entries never
/// receive areas.
pub fn get_area_defs_from_available_sectors(
    available_sectors: &OrderedMap<SectorArgs>,
    cli: &SectorArgs,
    bundle: &DatasetBundle,
    registry: &PluginRegistry,
    filter_time: bool,
) -> Result<AreaDefCollection> {
    let mut collection = AreaDefCollection::default();
    for (sector_type, sector_args) in available_sectors.iter() {
        if sector_args.unsectored {
            info!("Sector type {} is unsectored, no area definitions", sector_type);
            continue;
        }
        let requested = sector_args.overridden_by(cli);
        let area_defs = get_area_defs_from_command_line_args(&requested, bundle, registry, filter_time)?;
        for area_def in area_defs {
            collection.insert(
                sector_type,
                SectorEntry {
                    requested: requested.clone(),
                    area_def,
                },
            );
        }
    }
    if bundle.get(METADATA_KEY).is_some() {
        info!("Resolved {} areas from available sectors", collection.len());
    }
    Ok(collection)
}
