//! Unit tests for the building blocks shared by both procflows

use chrono::{TimeZone, Utc};
use clap::Parser;
use ndarray::array;
use procflow::area::{pad_area_definition, AreaDefinition, LatLonExtent, Projection, SectorType};
use procflow::cache::{AlgXarrayCache, CacheKind};
use procflow::cli::{Cli, Command};
use procflow::config::{
    expand_env_vars, merge_output_overrides, OutputSpec, ProcflowConfig, ALL_KEY, OUTDIRS_TOKEN,
};
use procflow::dataset::{DataArray, Dataset};
use procflow::errors::{ProcflowError, Result};
use procflow::ledger::{
    replace_outdirs, set_comparison_path, write_output_file_list, FinalProducts, NO_COMPARISON,
};
use procflow::parallel::init_thread_pool;
use procflow::plugins::filename::{standard_filename, standard_remove_duplicates};
use procflow::plugins::{Kwargs, PluginRegistry};
use procflow::procflow::config_based::{get_variables_from_available_outputs_dict, produce_current_time};
use procflow::procflow::{CoverageReport, ProcflowContext};
use procflow::product::{ProductCatalog, ProductFamily, ProductSpec};
use procflow::render::check_expected_products;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn static_area(name: &str) -> AreaDefinition {
    AreaDefinition::builder()
        .name(name)
        .projection(Projection::eqc(20.0, -60.0))
        .shape(100, 80)
        .pixel_size(1000.0, 1000.0)
        .build_or(SectorType::Static)
        .expect("valid static area")
}

fn tc_area() -> AreaDefinition {
    AreaDefinition::builder()
        .name("al092020")
        .area_id("al092020_202009011200")
        .projection(Projection::eqc(0.0, 0.0))
        .shape(100, 80)
        .pixel_size(1000.0, 1000.0)
        .sector_info_entry("clat", json!(21.5))
        .sector_info_entry("clon", json!(-61.0))
        .build_or(SectorType::Tc)
        .expect("valid tc area")
}

fn kwargs(value: serde_json::Value) -> Kwargs {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Kwargs::new(),
    }
}

#[test]
fn test_error_types() {
    // Test variable not found error
    let var_err = ProcflowError::variable_not_found("B14BT");
    assert!(format!("{}", var_err).contains("Variable 'B14BT' not found"));

    // Test unsupported family error
    let family_err = ProcflowError::unsupported_family("rgb", "interp");
    assert_eq!(
        format!("{}", family_err),
        "UNSUPPORTED alg_family rgb or product_type interp"
    );

    // Test plugin lookup error
    let plugin_err = ProcflowError::plugin_not_found("reader", "abi_netcdf");
    assert!(format!("{}", plugin_err).contains("abi_netcdf"));

    // Only coverage and no-data errors let a run continue
    assert!(!ProcflowError::coverage("outside").is_fatal());
    assert!(!ProcflowError::no_data("empty").is_fatal());
    assert!(ProcflowError::configuration("bad").is_fatal());
    assert!(family_err.is_fatal());
    assert!(ProcflowError::UnexpectedProducts {
        expected: vec![],
        produced: vec![PathBuf::from("x.png")],
    }
    .is_fatal());
}

#[test]
fn test_thread_pool_sizing() {
    // Test default pool is left in place
    let threads = init_thread_pool(None).expect("default pool");
    assert!(threads > 0);

    // Test zero threads is rejected before touching the pool
    let err = init_thread_pool(Some(0)).expect_err("zero threads must fail");
    assert!(matches!(err, ProcflowError::ThreadPool(_)));
}

#[test]
fn test_area_builder_defaults_and_errors() {
    // Name falls back to the area id, then to the sector type
    let by_id = AreaDefinition::builder()
        .area_id("goes_east")
        .projection(Projection::eqc(0.0, -75.0))
        .shape(10, 10)
        .pixel_size(2000.0, 2000.0)
        .build_or(SectorType::Static)
        .expect("valid area");
    assert_eq!(by_id.name, "goes_east");
    assert_eq!(by_id.description, "goes_east");

    let unnamed = AreaDefinition::builder()
        .swath_extent(LatLonExtent {
            min_lat: 10.0,
            max_lat: 20.0,
            min_lon: 100.0,
            max_lon: 110.0,
        })
        .shape(10, 10)
        .pixel_size(2000.0, 2000.0)
        .build_or(SectorType::SelfRegister)
        .expect("valid area");
    assert_eq!(unnamed.name, "self_register");
    assert_eq!(unnamed.center(), (15.0, 105.0));

    // Empty grid
    let empty = AreaDefinition::builder()
        .name("empty")
        .projection(Projection::eqc(0.0, 0.0))
        .pixel_size(1000.0, 1000.0)
        .build_or(SectorType::Static);
    assert!(matches!(empty, Err(ProcflowError::Configuration(_))));

    // Missing projection
    let no_projection = AreaDefinition::builder()
        .name("nowhere")
        .shape(10, 10)
        .pixel_size(1000.0, 1000.0)
        .build_or(SectorType::Static);
    assert!(matches!(no_projection, Err(ProcflowError::Configuration(_))));
}

#[test]
fn test_area_extent() {
    let area = static_area("extent");
    let extent = area.extent_ll();
    let (lat, lon) = area.center();
    assert!((extent.max_lat - extent.min_lat - 80_000.0 / 110_574.0).abs() < 1e-9);
    assert!(extent.contains(lat, lon));
    assert!(!extent.contains(lat + 5.0, lon));

    let (lats, lons) = area.lats_lons();
    assert_eq!(lats.shape(), &[80, 100]);
    assert!(lats[[0, 0]] > lats[[79, 0]]);
    assert!(lons[[0, 0]] < lons[[0, 99]]);
}

#[test]
fn test_padding() {
    // Static areas are only padded when forced
    let area = static_area("static_pad");
    assert_eq!(pad_area_definition(&area, Some("abi"), false), area);
    let forced = pad_area_definition(&area, Some("abi"), true);
    assert_eq!((forced.x_size, forced.y_size), (150, 120));

    // Tc areas are padded 1.5x around the storm centre
    let tc = tc_area();
    let padded = pad_area_definition(&tc, Some("abi"), false);
    assert_eq!((padded.x_size, padded.y_size), (150, 120));
    assert_eq!((padded.projection.lat_0, padded.projection.lon_0), (21.5, -61.0));
    assert_eq!(padded.area_id, tc.area_id);
    assert_eq!(padded.sector_info, tc.sector_info);
    assert_eq!(padded.pixel_size_x, tc.pixel_size_x);

    // Full-swath sources get five widths and the original height
    let swath_pad = pad_area_definition(&tc, Some("amsu-b"), false);
    assert_eq!((swath_pad.x_size, swath_pad.y_size), (500, 80));
    let mhs_pad = pad_area_definition(&tc, Some("mhs"), false);
    assert_eq!((mhs_pad.x_size, mhs_pad.y_size), (500, 80));
}

#[test]
fn test_merge_output_overrides() -> Result<()> {
    let spec = OutputSpec {
        filename_formats_kwargs: [(ALL_KEY.to_string(), kwargs(json!({"basedir": "/data/a"})))]
            .into_iter()
            .collect(),
        metadata_filename_formats_kwargs: [("metadata_default".to_string(), kwargs(json!({"metadata_dir": "/m"})))]
            .into_iter()
            .collect(),
        product_names: vec!["Infrared".to_string()],
        ..OutputSpec::new("imagery_annotated")
    };
    let overrides = kwargs(json!({
        "filename_formats_kwargs": {"all": {"extension": "jpg"}},
        "metadata_filename_formats_kwargs": {"all": {"metadata_dir": "/meta"}},
        "output_format": "netcdf_xarray",
        "minimum_coverage": 50.0,
    }));

    let merged = merge_output_overrides(&spec, &overrides)?;

    // `all` sub-keys are merged into an existing `all`
    let all = merged.filename_format_kwargs("standard");
    assert_eq!(all.get("basedir"), Some(&json!("/data/a")));
    assert_eq!(all.get("extension"), Some(&json!("jpg")));

    // `all` is added next to the per-format entries
    assert_eq!(
        merged.metadata_filename_formats_kwargs.get("metadata_default"),
        Some(&kwargs(json!({"metadata_dir": "/m"})))
    );
    assert_eq!(
        merged.metadata_filename_formats_kwargs.get(ALL_KEY),
        Some(&kwargs(json!({"metadata_dir": "/meta"})))
    );

    // Other fields are replaced, absent fields added
    assert_eq!(merged.output_format, "netcdf_xarray");
    assert_eq!(merged.minimum_coverage, Some(50.0));
    assert_eq!(merged.product_names, spec.product_names);

    // No overrides leaves the spec untouched
    assert_eq!(merge_output_overrides(&spec, &Kwargs::new())?, spec);
    Ok(())
}

#[test]
fn test_config_preserves_declaration_order() -> Result<()> {
    let config = ProcflowConfig::from_yaml_str(
        r#"reader_name: abi_netcdf
available_sectors:
  tc: {trackfiles: [track.yaml], trackfile_parser: yaml_trackfile}
  static: {sectorfiles: [sectors.yaml]}
outputs:
  z_imagery: {output_format: imagery_annotated, requested_sector_type: tc}
  a_data: {output_format: netcdf_xarray, requested_sector_type: static}
  m_clean: {output_format: imagery_clean, requested_sector_type: tc}
"#,
    )?;
    let outputs: Vec<&String> = config.outputs.keys().collect();
    assert_eq!(outputs, ["z_imagery", "a_data", "m_clean"]);
    let sectors: Vec<&String> = config.available_sectors.keys().collect();
    assert_eq!(sectors, ["tc", "static"]);
    assert_eq!(config.reader_name.as_deref(), Some("abi_netcdf"));
    Ok(())
}

#[test]
fn test_expand_env_vars() {
    std::env::set_var("PROCFLOW_UNIT_TEST_DIR", "/data/sectors");
    let expanded = expand_env_vars("sectorfiles: [${PROCFLOW_UNIT_TEST_DIR}/static.yaml]")
        .expect("variable is set");
    assert_eq!(expanded, "sectorfiles: [/data/sectors/static.yaml]");

    let err = expand_env_vars("basedir: ${PROCFLOW_UNIT_TEST_UNSET_VAR}/out")
        .expect_err("unset variable must be reported");
    assert!(format!("{}", err).contains("PROCFLOW_UNIT_TEST_UNSET_VAR"));
    assert!(err.is_fatal());
}

#[test]
fn test_output_file_list() -> Result<()> {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let root = temp_dir.path();
    let files = vec![
        root.join("annotated").join("a.png"),
        PathBuf::from("/elsewhere/b.png"),
    ];

    let list_path = root.join("lists").join("output_files.txt");
    write_output_file_list(&list_path, &files, root)?;
    let contents = fs::read_to_string(&list_path)?;
    assert_eq!(
        contents,
        format!("{}/annotated/a.png\n/elsewhere/b.png\n", OUTDIRS_TOKEN)
    );

    // Empty list still ends with a newline
    write_output_file_list(&list_path, &[], root)?;
    assert_eq!(fs::read_to_string(&list_path)?, "\n");

    // Empty root leaves paths alone
    assert_eq!(replace_outdirs(Path::new("/x/y.png"), Path::new("")), "/x/y.png");
    Ok(())
}

#[test]
fn test_comparison_paths() {
    // Tokens are substituted, default module applied
    let target = set_comparison_path(
        Some("/ref/<procflow>/<output>/<product>"),
        None,
        None,
        "Infrared",
        "config_based",
        "imagery_annotated",
    );
    assert_eq!(target.path, "/ref/config_based/imagery_annotated/Infrared");
    assert_eq!(target.module, "compare_outputs");
    assert!(target.is_comparison());

    // Command-line path wins over the output's
    let target = set_comparison_path(
        Some("/ref/output"),
        Some("my_compare"),
        Some("/ref/cli/<product>"),
        "Visible",
        "single_source",
        "imagery_clean",
    );
    assert_eq!(target.path, "/ref/cli/Visible");
    assert_eq!(target.module, "my_compare");

    let none = set_comparison_path(None, None, None, "Visible", "single_source", "imagery_clean");
    assert_eq!(none.path, NO_COMPARISON);
    assert!(!none.is_comparison());
}

#[test]
fn test_final_products_order() {
    let mut products = FinalProducts::new();
    let first = set_comparison_path(Some("/ref/<product>"), None, None, "IR", "config_based", "x");
    let second = set_comparison_path(None, None, None, "VIS", "config_based", "x");

    products.entry(&first).files.push(PathBuf::from("ir_1.png"));
    products.entry(&second).files.push(PathBuf::from("vis_1.png"));
    products.entry(&first).files.push(PathBuf::from("ir_2.png"));

    let keys: Vec<&String> = products.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, ["/ref/IR", NO_COMPARISON]);
    assert_eq!(
        products.all_files(),
        vec![
            PathBuf::from("ir_1.png"),
            PathBuf::from("ir_2.png"),
            PathBuf::from("vis_1.png")
        ]
    );
    assert_eq!(
        products.get("/ref/IR").map(|e| e.compare_outputs_module.as_str()),
        Some("compare_outputs")
    );
}

#[test]
fn test_check_expected_products() {
    let a = PathBuf::from("/out/a.png");
    let b = PathBuf::from("/out/b.png");

    // Order does not matter
    assert!(check_expected_products(&[a.clone(), b.clone()], &[b.clone(), a.clone()]).is_ok());
    assert!(check_expected_products(&[], &[]).is_ok());

    // Extra, missing and repeated files are all violations
    let extra = check_expected_products(&[a.clone()], &[a.clone(), b.clone()]);
    assert!(matches!(extra, Err(ProcflowError::UnexpectedProducts { .. })));
    assert!(check_expected_products(&[a.clone(), b.clone()], &[a.clone()]).is_err());
    assert!(check_expected_products(&[a.clone()], &[a.clone(), a]).is_err());
}

fn product_dataset() -> Dataset {
    let mut dataset = Dataset::new();
    dataset.attrs.insert("source_name".to_string(), json!("abi"));
    dataset.set_time_range(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 10, 0).unwrap(),
    );
    dataset
}

#[test]
fn test_standard_filename() -> Result<()> {
    let area = static_area("tst_area");
    let mut dataset = product_dataset();

    let name = standard_filename(&area, &dataset, "Infrared", 87.456, &kwargs(json!({"basedir": "/out"})))?
        .expect("standard always names a file");
    assert_eq!(
        name,
        PathBuf::from("/out/abi/tst_area/Infrared/20240101.120000.abi.Infrared.tst_area.87p46.png")
    );

    // Extra fields are appended before the extension
    dataset.add_filename_extra_field("adjustment_id", json!("adj01"));
    let name = standard_filename(
        &area,
        &dataset,
        "Infrared",
        100.0,
        &kwargs(json!({"basedir": "/out", "extension": "jpg"})),
    )?
    .expect("standard always names a file");
    assert!(name.ends_with("20240101.120000.abi.Infrared.tst_area.100p00.adj01.jpg"));

    // No start time, no filename
    let err = standard_filename(&area, &Dataset::new(), "Infrared", 10.0, &Kwargs::new());
    assert!(err.is_err());
    Ok(())
}

#[test]
fn test_remove_duplicates_keeps_highest_coverage() -> Result<()> {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let dir = temp_dir.path();
    let make = |coverage: &str, area: &str| -> PathBuf {
        let path = dir.join(format!("20240101.120000.abi.Infrared.{}.{}.png", area, coverage));
        fs::write(&path, coverage).expect("Failed to write product");
        path
    };
    let low = make("12p50", "tst_area");
    let mid = make("45p00", "tst_area");
    let high = make("80p00", "tst_area");
    let other_area = make("90p00", "other_area");

    // Dry run reports without deleting
    let report = standard_remove_duplicates(&mid, false)?;
    assert_eq!(report.saved, vec![high.clone()]);
    assert_eq!(report.removed, vec![low.clone(), mid.clone()]);
    assert!(low.exists() && mid.exists());

    let report = standard_remove_duplicates(&mid, true)?;
    assert_eq!(report.removed, vec![low.clone(), mid.clone()]);
    assert!(!low.exists());
    assert!(!mid.exists());
    assert!(high.exists());
    assert!(other_area.exists());

    // Names outside the standard layout are left alone
    let odd = dir.join("odd.png");
    fs::write(&odd, "x")?;
    assert_eq!(standard_remove_duplicates(&odd, true)?.removed.len(), 0);
    Ok(())
}

#[test]
fn test_produce_current_time() -> Result<()> {
    let config = ProcflowConfig::from_yaml_str(
        r#"produce_times:
  required_minutes: [0, 30]
outputs:
  hourly:
    output_format: imagery_annotated
    produce_times: {required_minutes: [0]}
  half_hourly:
    output_format: imagery_annotated
    produce_times: {required_minutes: [30]}
"#,
    )?;
    let metadata = product_dataset();
    assert!(produce_current_time(&config, &metadata, None));
    assert!(produce_current_time(&config, &metadata, Some(&["hourly"])));
    assert!(!produce_current_time(&config, &metadata, Some(&["half_hourly"])));
    assert!(produce_current_time(&config, &metadata, Some(&["half_hourly", "hourly"])));

    // Unknown outputs fall back to the job-level times
    assert!(produce_current_time(&config, &metadata, Some(&["other"])));

    // Data without a start time is always produced
    let strict = ProcflowConfig::from_yaml_str("produce_times: {required_minutes: [15]}\n")?;
    assert!(!produce_current_time(&strict, &metadata, None));
    assert!(produce_current_time(&strict, &Dataset::new(), None));
    Ok(())
}

#[test]
fn test_variables_from_outputs_are_unique() -> Result<()> {
    let catalog = ProductCatalog::new()
        .with_product(ProductSpec::new("IR", ProductFamily::Interp).with_variables(&["B14BT"]))
        .with_product(ProductSpec::new("Split", ProductFamily::AlgCmap).with_variables(&["B13BT", "B14BT"]))
        .with_product(ProductSpec::new("VIS", ProductFamily::Interp).with_variables(&["B02Ref"]));
    let ctx = ProcflowContext::new(PluginRegistry::with_builtins(), catalog);
    let config = ProcflowConfig::from_yaml_str(
        r#"outputs:
  tc_imagery: {output_format: imagery_annotated, requested_sector_type: tc, product_names: [IR, Split]}
  static_imagery: {output_format: imagery_annotated, requested_sector_type: static, product_names: [VIS, IR]}
"#,
    )?;

    let all = get_variables_from_available_outputs_dict(&ctx, &config.outputs, "abi", None)?;
    assert_eq!(all, ["B14BT", "B13BT", "B02Ref"]);
    let tc_only = get_variables_from_available_outputs_dict(&ctx, &config.outputs, "abi", Some(&["tc"]))?;
    assert_eq!(tc_only, ["B14BT", "B13BT"]);
    Ok(())
}

#[test]
fn test_product_catalog_lookup() -> Result<()> {
    let catalog = ProductCatalog::from_yaml_str(
        r#"products:
  - name: IR
    family: interp
    variables: [B14BT]
    interpolator: {name: interp_nearest}
  - name: IR
    source_names: [abi]
    family: interp_alg
    variables: [B14BT]
    algorithm: {name: single_channel, args: {output_data_range: [180.0, 330.0]}}
    interpolator: {name: interp_nearest}
    minimum_coverage: 25.0
"#,
    )?;
    assert_eq!(catalog.len(), 2);

    // Later, source-specific definitions win
    let abi = catalog.get("IR", "abi")?;
    assert_eq!(abi.family, ProductFamily::InterpAlg);
    assert_eq!(abi.minimum_coverage, Some(25.0));
    assert_eq!(catalog.get("IR", "ahi")?.family, ProductFamily::Interp);

    let missing = catalog.get("VIS", "abi");
    assert!(matches!(missing, Err(ProcflowError::ProductNotFound { .. })));
    Ok(())
}

#[test]
fn test_masked_arrays_coverage() -> Result<()> {
    let registry = PluginRegistry::with_builtins();
    let area = static_area("covg");
    let mut dataset = product_dataset();
    dataset.insert_variable("IR", DataArray::grid(array![[1.0, f32::NAN], [3.0, f32::NAN]]));
    dataset.insert_variable("Mask", DataArray::grid(array![[1.0, 1.0], [1.0, f32::NAN]]));

    let coverage = registry.coverage_check("masked_arrays")?;
    assert_eq!(coverage.coverage(&dataset, "IR", &area, &Kwargs::new())?, 50.0);
    let alt = kwargs(json!({"alt_varname_for_covg": "Mask"}));
    assert_eq!(coverage.coverage(&dataset, "IR", &area, &alt)?, 75.0);
    Ok(())
}

#[test]
fn test_coverage_report() {
    let report = |coverage, fname_coverage| CoverageReport {
        coverage,
        fname_coverage,
        minimum: 10.0,
    };
    // Skipped only when both values fall strictly below the minimum
    assert!(report(50.0, 5.0).is_sufficient());
    assert!(report(5.0, 50.0).is_sufficient());
    assert!(report(10.0, 0.0).is_sufficient());
    assert!(!report(9.99, 9.99).is_sufficient());
}

#[test]
fn test_alg_xarray_cache() {
    let mut cache = AlgXarrayCache::new("tst_area", "static");
    let mut computed = 0;

    for _ in 0..3 {
        let dataset = cache
            .get_or_try_insert_with(CacheKind::Exact, "IR", || {
                computed += 1;
                Ok(product_dataset())
            })
            .expect("compute succeeds");
        assert_eq!(dataset.source_name(), Some("abi"));
    }
    assert_eq!(computed, 1);
    assert_eq!((cache.hits(), cache.misses()), (2, 1));

    // Kinds are cached separately
    assert!(!cache.contains(CacheKind::Padded, "IR"));

    // A failed computation leaves nothing behind
    let failed = cache.get_or_try_insert_with(CacheKind::Padded, "IR", || {
        Err(ProcflowError::no_data("nothing to interpolate"))
    });
    assert!(failed.is_err());
    assert!(!cache.contains(CacheKind::Padded, "IR"));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_cli_single_source_arguments() {
    let cli = Cli::try_parse_from([
        "procflow",
        "single-source",
        "a.nc",
        "b.nc",
        "--reader-name",
        "abi_netcdf",
        "--product-name",
        "Infrared",
        "--output-format",
        "imagery_annotated",
        "--filename-formats",
        "standard,geotiff",
        "--filename-formats-kwargs",
        r#"{"basedir": "/out"}"#,
        "--metadata-filename-format",
        "metadata_default",
        "--product-db-writer-override",
        "tc:postgres",
        "--sectorfiles",
        "sectors.yaml",
    ])
    .expect("valid command line");

    let run = match &cli.command {
        Command::SingleSource(args) => {
            assert_eq!(args.files, vec![PathBuf::from("a.nc"), PathBuf::from("b.nc")]);
            args.run_config()
        }
        Command::ConfigBased(_) => panic!("parsed the wrong subcommand"),
    };
    assert_eq!(run.product_name.as_deref(), Some("Infrared"));
    assert_eq!(run.output.filename_formats, ["standard", "geotiff"]);
    assert_eq!(run.output.product_names, ["Infrared"]);
    assert_eq!(
        run.output.filename_format_kwargs("geotiff").get("basedir"),
        Some(&json!("/out"))
    );
    assert_eq!(run.output.metadata_filename_format("geotiff"), Some("metadata_default"));
    assert_eq!(
        run.database.product_db_writer_override.get("tc").map(String::as_str),
        Some("postgres")
    );
    assert_eq!(run.sectors.sectorfiles, vec![PathBuf::from("sectors.yaml")]);

    // Malformed override and kwargs are rejected
    let bad_override = Cli::try_parse_from([
        "procflow",
        "config-based",
        "--output-config",
        "job.yaml",
        "--product-db-writer-override",
        "postgres",
    ]);
    assert!(bad_override.is_err());
    let bad_kwargs = Cli::try_parse_from([
        "procflow",
        "config-based",
        "--output-config",
        "job.yaml",
        "--output-overrides",
        "[1, 2]",
    ]);
    assert!(bad_kwargs.is_err());
}

#[test]
fn test_cli_config_based_overrides() {
    let cli = Cli::try_parse_from([
        "procflow",
        "--threads",
        "2",
        "config-based",
        "--output-config",
        "job.yaml",
        "--output-overrides",
        r#"{"minimum_coverage": 0}"#,
        "--filename-formats-kwargs",
        r#"{"basedir": "/cli"}"#,
        "--fuse-files",
        "bg.nc",
        "--fuse-reader",
        "netcdf",
        "--fuse-product",
        "Visible",
    ])
    .expect("valid command line");
    assert_eq!(cli.threads, Some(2));

    let Command::ConfigBased(args) = &cli.command else {
        panic!("parsed the wrong subcommand");
    };
    let run = args.run_config();
    assert_eq!(run.output_config, Some(PathBuf::from("job.yaml")));
    assert!(run.fuse.is_configured());

    // Command-line filename kwargs become an `all` override
    let overrides = run.output_overrides();
    assert_eq!(overrides.get("minimum_coverage"), Some(&json!(0)));
    assert_eq!(
        overrides.get("filename_formats_kwargs"),
        Some(&json!({"all": {"basedir": "/cli"}}))
    );
}
