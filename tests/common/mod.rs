//! Shared fixtures: synthetic swath files, sector files and recording plugins

#![allow(dead_code)]

use ndarray::{Array2, Array3};
use netcdf::create;
use procflow::area::{AreaDefinition, Projection, SectorType};
use procflow::config::{OutputSpec, RunConfig, ALL_KEY};
use procflow::dataset::{Attributes, DataArray, Dataset, DatasetBundle, METADATA_KEY};
use procflow::errors::{ProcflowError, Result};
use procflow::plugins::{
    AlgorithmPlugin, CoveragePlugin, Kwargs, OutputCall, OutputFormatPlugin, ParamSchema, PluginRegistry,
    RenderRequest,
};
use procflow::procflow::ProcflowContext;
use procflow::product::{CoverageKind, PluginCall, ProductCatalog, ProductFamily, ProductSpec};
use procflow::sectors::SectorArgs;
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const START: &str = "2024-01-01T12:00:00Z";
pub const END: &str = "2024-01-01T12:10:00Z";
pub const TIMESTAMP: &str = "20240101.120000";
pub const SOURCE: &str = "abi";
pub const DATASET: &str = "abi_swath";
pub const AREA: &str = "tst_area";

/// Layout of a synthetic swath file
#[derive(Debug, Clone)]
pub struct Swath {
    pub dataset_name: &'static str,
    pub lat_start: f32,
    pub lon_start: f32,
    pub step: f32,
    pub rows: usize,
    pub cols: usize,
    /// Every B14BT pixel is the fill value
    pub all_fill: bool,
}

impl Default for Swath {
    fn default() -> Self {
        Self {
            dataset_name: DATASET,
            lat_start: 10.0,
            lon_start: 100.0,
            step: 0.5,
            rows: 20,
            cols: 20,
            all_fill: false,
        }
    }
}

pub const FILL_VALUE: f32 = -999.0;

/// Write a regular lat/lon swath with one brightness temperature channel.
pub fn write_swath(path: &Path, swath: &Swath) -> PathBuf {
    let (rows, cols) = (swath.rows, swath.cols);
    let lats = Array2::from_shape_fn((rows, cols), |(r, _)| swath.lat_start + swath.step * r as f32);
    let lons = Array2::from_shape_fn((rows, cols), |(_, c)| swath.lon_start + swath.step * c as f32);
    let bt = Array2::from_shape_fn((rows, cols), |(r, c)| {
        if swath.all_fill {
            FILL_VALUE
        } else {
            200.0 + (r + c) as f32
        }
    });

    let mut file = create(path).expect("Failed to create NetCDF file");
    file.add_dimension("y", rows).expect("Failed to add dimension y");
    file.add_dimension("x", cols).expect("Failed to add dimension x");

    let mut var = file
        .add_variable::<f32>("latitude", &["y", "x"])
        .expect("Failed to add latitude");
    var.put(lats.view(), ..).expect("Failed to write latitude");
    let mut var = file
        .add_variable::<f32>("longitude", &["y", "x"])
        .expect("Failed to add longitude");
    var.put(lons.view(), ..).expect("Failed to write longitude");
    let mut var = file
        .add_variable::<f32>("B14BT", &["y", "x"])
        .expect("Failed to add B14BT");
    var.put_attribute("_FillValue", FILL_VALUE)
        .expect("Failed to add _FillValue");
    var.put(bt.view(), ..).expect("Failed to write B14BT");

    file.add_attribute("source_name", SOURCE)
        .expect("Failed to add source_name");
    file.add_attribute("platform_name", "goes-16")
        .expect("Failed to add platform_name");
    file.add_attribute("dataset_name", swath.dataset_name)
        .expect("Failed to add dataset_name");
    file.add_attribute("start_datetime", START)
        .expect("Failed to add start_datetime");
    file.add_attribute("end_datetime", END)
        .expect("Failed to add end_datetime");
    file.add_attribute("interpolation_radius_of_influence", 50000.0f64)
        .expect("Failed to add interpolation_radius_of_influence");
    path.to_path_buf()
}

/// Static sector entry: name, centre latitude, centre longitude
pub type SectorDecl<'a> = (&'a str, f64, f64);

/// Write a static sector file of 10x10 pixel, 50 km sectors.
pub fn write_sectorfile(path: &Path, sectors: &[SectorDecl<'_>]) -> PathBuf {
    let mut text = String::from("sectors:\n");
    for (name, lat, lon) in sectors {
        text.push_str(&format!(
            "  - name: {}\n    projection: {{proj: eqc, lat_0: {}, lon_0: {}}}\n    x_size: 10\n    y_size: 10\n    pixel_size_x: 50000.0\n    pixel_size_y: 50000.0\n",
            name, lat, lon
        ));
    }
    fs::write(path, text).expect("Failed to write sector file");
    path.to_path_buf()
}

/// Counters and captures shared with the registered test plugins
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub alg_calls: Arc<AtomicUsize>,
    pub renders: Arc<AtomicUsize>,
    /// Shape of the first input array of each `scale` call
    pub alg_input_shapes: Arc<Mutex<Vec<Vec<usize>>>>,
    /// `dataset_name` of every dataset handed to `tag_input`
    pub xarray_inputs: Arc<Mutex<Vec<String>>>,
    /// Kwargs received by `bundle_image`
    pub bundle_kwargs: Arc<Mutex<Vec<Kwargs>>>,
    pub bundle_writes: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn alg_calls(&self) -> usize {
        self.alg_calls.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn alg_input_shapes(&self) -> Vec<Vec<usize>> {
        self.alg_input_shapes.lock().expect("Poisoned shape capture").clone()
    }

    pub fn xarray_inputs(&self) -> Vec<String> {
        self.xarray_inputs.lock().expect("Poisoned input capture").clone()
    }

    pub fn bundle_kwargs(&self) -> Vec<Kwargs> {
        self.bundle_kwargs.lock().expect("Poisoned kwargs capture").clone()
    }

    pub fn bundle_writes(&self) -> usize {
        self.bundle_writes.load(Ordering::SeqCst)
    }
}

fn touch_all(fnames: &[PathBuf]) -> Result<Vec<PathBuf>> {
    for fname in fnames {
        if let Some(parent) = fname.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(fname, b"image")?;
    }
    Ok(fnames.to_vec())
}

/// Built-in registry plus recording plugins:
///
/// * `scale`: list_numpy_to_numpy algorithm multiplying by `factor`
/// * `test_image`: image renderer writing every requested filename
/// * `extra_image`: image renderer that also reports an unrequested file
/// * `fixed_coverage`: coverage check returning its `value` argument
/// * `tag_input`: xarray_to_xarray algorithm returning its input unchanged
/// * `bundle_image`: dataset-bundle renderer capturing its kwargs
/// * `bundle_list`: dataset-bundle writer creating `<outdir>/<product>.bundle`
pub fn test_registry(recorder: &Recorder) -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();

    let alg_calls = Arc::clone(&recorder.alg_calls);
    let shapes = Arc::clone(&recorder.alg_input_shapes);
    registry.register_algorithm(
        AlgorithmPlugin::list_numpy(
            "scale",
            "list_numpy_to_numpy",
            ParamSchema::accepts(&["factor"]),
            move |arrays, kwargs| {
                alg_calls.fetch_add(1, Ordering::SeqCst);
                let factor = kwargs.get("factor").and_then(|v| v.as_f64()).unwrap_or(1.0) as f32;
                let first = &arrays[0];
                shapes
                    .lock()
                    .expect("Poisoned shape capture")
                    .push(first.shape().to_vec());
                Ok(first.mapv(|v| v * factor))
            },
        )
        .expect("list_numpy_to_numpy is a known family"),
    );

    let renders = Arc::clone(&recorder.renders);
    registry.register_output_format(OutputFormatPlugin::new(
        "test_image",
        ParamSchema::any(),
        OutputCall::Image(Arc::new(
            move |_area: &AreaDefinition, request: &RenderRequest<'_>| -> Result<Vec<PathBuf>> {
                renders.fetch_add(1, Ordering::SeqCst);
                touch_all(request.output_fnames)
            },
        )),
    ));

    registry.register_output_format(OutputFormatPlugin::new(
        "extra_image",
        ParamSchema::any(),
        OutputCall::Image(Arc::new(
            |_area: &AreaDefinition, request: &RenderRequest<'_>| -> Result<Vec<PathBuf>> {
                let mut produced = touch_all(request.output_fnames)?;
                produced.push(PathBuf::from("/nonexistent/unrequested.png"));
                Ok(produced)
            },
        )),
    ));

    registry.register_coverage_check(CoveragePlugin::new(
        "fixed_coverage",
        ParamSchema::accepts(&["value"]),
        |_dataset, _product, _area, kwargs: &Kwargs| {
            Ok(kwargs.get("value").and_then(|v| v.as_f64()).unwrap_or(0.0))
        },
    ));

    let inputs = Arc::clone(&recorder.xarray_inputs);
    registry.register_algorithm(AlgorithmPlugin::xarray_to_xarray(
        "tag_input",
        ParamSchema::any(),
        move |dataset: &Dataset, _kwargs: &Kwargs| {
            inputs
                .lock()
                .expect("Poisoned input capture")
                .push(dataset.attr_str("dataset_name").unwrap_or_default().to_string());
            Ok(dataset.clone())
        },
    ));

    let captured = Arc::clone(&recorder.bundle_kwargs);
    registry.register_output_format(OutputFormatPlugin::new(
        "bundle_image",
        ParamSchema::any(),
        OutputCall::XrdictAreaProductOutfnamesToOutlist(Arc::new(
            move |_bundle: &DatasetBundle,
                  _area: Option<&AreaDefinition>,
                  _product_name: &str,
                  fnames: &[PathBuf],
                  kwargs: &Kwargs|
                  -> Result<Vec<PathBuf>> {
                captured.lock().expect("Poisoned kwargs capture").push(kwargs.clone());
                touch_all(fnames)
            },
        )),
    ));

    let bundle_writes = Arc::clone(&recorder.bundle_writes);
    registry.register_output_format(OutputFormatPlugin::new(
        "bundle_list",
        ParamSchema::accepts(&["outdir"]),
        OutputCall::XrdictAreaProductToOutlist(Arc::new(
            move |bundle: &DatasetBundle,
                  _area: Option<&AreaDefinition>,
                  product_name: &str,
                  kwargs: &Kwargs|
                  -> Result<Vec<PathBuf>> {
                bundle_writes.fetch_add(1, Ordering::SeqCst);
                let outdir = kwargs
                    .get("outdir")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ProcflowError::configuration("bundle_list needs outdir"))?;
                let fname = Path::new(outdir).join(format!("{}.bundle", product_name));
                let keys = bundle.keys().cloned().collect::<Vec<_>>().join("\n");
                fs::create_dir_all(outdir)?;
                fs::write(&fname, keys)?;
                Ok(vec![fname])
            },
        )),
    ));

    registry
}

fn fixed_coverage(value: f64) -> PluginCall {
    PluginCall::new("fixed_coverage").with_arg("value", json!(value))
}

/// Products used across the tests, all defined for [`SOURCE`]
pub fn test_catalog() -> ProductCatalog {
    let scale = || PluginCall::new("scale").with_arg("factor", json!(2.0));
    let nearest = || PluginCall::new("interp_nearest");
    ProductCatalog::new()
        .with_product(
            ProductSpec::new("Scale", ProductFamily::AlgCmap)
                .for_sources(&[SOURCE])
                .with_variables(&["B14BT"])
                .with_algorithm(scale()),
        )
        .with_product(
            ProductSpec::new("Infrared", ProductFamily::InterpAlg)
                .for_sources(&[SOURCE])
                .with_variables(&["B14BT"])
                .with_algorithm(PluginCall::new("single_channel").with_arg("output_data_range", json!([180.0, 330.0])))
                .with_interpolator(nearest()),
        )
        .with_product(
            ProductSpec::new("B14BT-Interp", ProductFamily::Interp)
                .for_sources(&[SOURCE])
                .with_variables(&["B14BT"])
                .with_interpolator(nearest()),
        )
        .with_product(
            ProductSpec::new("Scale-Interp", ProductFamily::AlgInterpCmap)
                .for_sources(&[SOURCE])
                .with_variables(&["B14BT"])
                .with_algorithm(scale())
                .with_interpolator(nearest()),
        )
        .with_product(
            ProductSpec::new("Wrong-Family", ProductFamily::AlgCmap)
                .for_sources(&[SOURCE])
                .with_variables(&["B14BT"])
                .with_algorithm(PluginCall::new("single_channel")),
        )
        .with_product(coverage_product("Cov10", 10.0))
        .with_product(coverage_product("Cov9", 9.99))
        .with_product(
            ProductSpec::new("Pair-Interp", ProductFamily::Interp)
                .for_sources(&[SOURCE])
                .with_variables(&["B14BT", "B13BT"])
                .with_interpolator(nearest()),
        )
        .with_product(
            ProductSpec::new("Pinned-Interp", ProductFamily::Interp)
                .for_sources(&[SOURCE])
                .with_variables(&["B14BT"])
                .with_interpolator(nearest())
                .pin_variable("B14BT", &["fine"]),
        )
        .with_product(
            ProductSpec::new("Composite", ProductFamily::Alg)
                .for_sources(&[SOURCE])
                .with_variables(&["B14BT", "B13BT"])
                .with_algorithm(PluginCall::new("tag_input")),
        )
        .with_product(titled_product())
        .with_product(
            ProductSpec::new("Bundle-Dump", ProductFamily::UnsectoredXarrayDictToOutputFormat)
                .for_sources(&[SOURCE])
                .with_variables(&["B14BT"]),
        )
}

fn titled_product() -> ProductSpec {
    let mut spec = ProductSpec::new("Titled", ProductFamily::AlgCmap)
        .for_sources(&[SOURCE])
        .with_variables(&["B14BT"])
        .with_algorithm(PluginCall::new("scale"))
        .with_colormap(PluginCall::new("linear_norm").with_arg("data_range", json!([0.0, 500.0])));
    spec.display_name = Some("Titled Scale".to_string());
    spec
}

fn coverage_product(name: &str, value: f64) -> ProductSpec {
    let mut spec = ProductSpec::new(name, ProductFamily::AlgCmap)
        .for_sources(&[SOURCE])
        .with_variables(&["B14BT"])
        .with_algorithm(PluginCall::new("scale"))
        .with_coverage_check(CoverageKind::Default, fixed_coverage(value));
    spec.minimum_coverage = Some(10.0);
    spec
}

pub fn test_context(recorder: &Recorder) -> ProcflowContext {
    ProcflowContext::new(test_registry(recorder), test_catalog())
}

/// The 10x10, 50 km static area the sector files declare for [`AREA`]
pub fn test_area() -> AreaDefinition {
    AreaDefinition::builder()
        .name(AREA)
        .projection(Projection::eqc(15.0, 105.0))
        .shape(10, 10)
        .pixel_size(50000.0, 50000.0)
        .build_or(SectorType::Static)
        .expect("valid static area")
}

fn swath_attrs(dataset_name: &str) -> Attributes {
    let attrs = json!({
        "source_name": SOURCE,
        "platform_name": "goes-16",
        "dataset_name": dataset_name,
        "start_datetime": START,
        "end_datetime": END,
        "interpolation_radius_of_influence": 50000.0,
    });
    match attrs {
        serde_json::Value::Object(map) => map,
        _ => Attributes::new(),
    }
}

fn with_geolocation(mut dataset: Dataset) -> Dataset {
    let swath = Swath::default();
    dataset.insert_variable(
        "latitude",
        DataArray::grid(Array2::from_shape_fn((swath.rows, swath.cols), |(r, _)| {
            swath.lat_start + swath.step * r as f32
        })),
    );
    dataset.insert_variable(
        "longitude",
        DataArray::grid(Array2::from_shape_fn((swath.rows, swath.cols), |(_, c)| {
            swath.lon_start + swath.step * c as f32
        })),
    );
    dataset
}

/// In-memory copy of the default swath geolocation carrying `(variable, offset)`
/// channels valued `offset + row + col`
pub fn swath_dataset(dataset_name: &str, channels: &[(&str, f32)]) -> Dataset {
    let swath = Swath::default();
    let mut dataset = with_geolocation(Dataset::with_attrs(swath_attrs(dataset_name)));
    for (varname, offset) in channels {
        dataset.insert_variable(
            *varname,
            DataArray::grid(Array2::from_shape_fn((swath.rows, swath.cols), |(r, c)| {
                offset + (r + c) as f32
            })),
        );
    }
    dataset
}

/// Like [`swath_dataset`] with one `(time, y, x)` channel valued `200 + 100 * t + row + col`
pub fn time_swath_dataset(dataset_name: &str, varname: &str, steps: usize) -> Dataset {
    let swath = Swath::default();
    let mut dataset = with_geolocation(Dataset::with_attrs(swath_attrs(dataset_name)));
    let data = Array3::from_shape_fn((steps, swath.rows, swath.cols), |(t, r, c)| {
        200.0 + (100 * t + r + c) as f32
    });
    let dims = vec!["time".to_string(), "y".to_string(), "x".to_string()];
    dataset.insert_variable(varname, DataArray::new(dims, data.into_dyn()).expect("rank 3 dims"));
    dataset
}

/// Bundle holding METADATA plus `datasets`, keyed by their `dataset_name`
pub fn bundle_of(datasets: Vec<Dataset>) -> DatasetBundle {
    let mut bundle = DatasetBundle::new();
    bundle.insert(METADATA_KEY, Dataset::with_attrs(swath_attrs("METADATA")));
    for dataset in datasets {
        let key = dataset.attr_str("dataset_name").unwrap_or_default().to_string();
        bundle.insert(key, dataset);
    }
    bundle
}

/// Mapping `{"all": {..}}` as used by filename kwargs
pub fn under_all(kwargs: serde_json::Value) -> HashMap<String, Kwargs> {
    let map = match kwargs {
        serde_json::Value::Object(map) => map,
        _ => Kwargs::new(),
    };
    HashMap::from([(ALL_KEY.to_string(), map)])
}

/// Single-source run of `product_name` over `sectorfile`, rendering with `output_format`
pub fn single_source_run(root: &Path, product_name: &str, output_format: &str, sectorfile: &Path) -> RunConfig {
    RunConfig {
        reader_name: Some("netcdf".to_string()),
        product_name: Some(product_name.to_string()),
        output: OutputSpec {
            output_format: output_format.to_string(),
            filename_formats: vec!["standard".to_string()],
            filename_formats_kwargs: under_all(json!({
                "basedir": root.join("out").display().to_string(),
                "extension": "png",
            })),
            product_names: vec![product_name.to_string()],
            ..OutputSpec::default()
        },
        sectors: SectorArgs {
            sectorfiles: vec![sectorfile.to_path_buf()],
            ..SectorArgs::default()
        },
        output_file_list_fname: Some(root.join("output_files.txt")),
        outdirs_root: Some(root.to_path_buf()),
        ..RunConfig::default()
    }
}

/// Non-empty lines of a written output file list
pub fn read_file_list(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("Failed to read output file list")
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
