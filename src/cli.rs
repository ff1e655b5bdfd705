//! Defines command-line interface options using `clap` for the procflow binary.

use crate::config::{DatabaseArgs, FuseArgs, OutputSpec, RunConfig, ALL_KEY};
use crate::plugins::Kwargs;
use crate::sectors::SectorArgs;
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;

/// Run satellite imagery processing workflows
#[derive(Parser, Debug)]
#[command(
    version,
    name = "procflow",
    about = "Produce imagery and data products from satellite data files"
)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Number of threads for interpolation. Defaults to number of CPU cores.
    #[arg(short = 't', long, global = true)]
    pub threads: Option<usize>,

    /// Product catalog YAML files
    #[arg(long = "product-catalog", global = true)]
    pub product_catalogs: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Produce one product for every requested sector
    SingleSource(SingleSourceArgs),
    /// Produce every output of a YAML job
    ConfigBased(ConfigBasedArgs),
}

#[derive(Args, Debug)]
pub struct SingleSourceArgs {
    /// Input data files
    pub files: Vec<PathBuf>,

    #[arg(long)]
    pub reader_name: String,

    #[arg(long)]
    pub product_name: String,

    #[arg(long)]
    pub output_format: String,

    /// Output format kwargs as a JSON object
    #[arg(long, value_parser = parse_kwargs)]
    pub output_format_kwargs: Option<Kwargs>,

    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub filename_formats: Vec<String>,

    #[arg(long)]
    pub metadata_output_format: Option<String>,

    /// Metadata filename format applied to every product filename format
    #[arg(long)]
    pub metadata_filename_format: Option<String>,

    /// Coverage below which a product is skipped
    #[arg(long)]
    pub minimum_coverage: Option<f64>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct ConfigBasedArgs {
    /// Input data files; defaults to the job's `filenames` glob
    pub files: Vec<PathBuf>,

    /// YAML job file
    #[arg(long)]
    pub output_config: PathBuf,

    /// Reader used when the job file names none
    #[arg(long)]
    pub reader_name: Option<String>,

    /// Fields merged into every output spec, as a JSON object
    #[arg(long, value_parser = parse_kwargs)]
    pub output_overrides: Option<Kwargs>,

    #[command(flatten)]
    pub fuse: FuseCliArgs,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Options shared by both procflows
#[derive(Args, Debug, Default)]
pub struct CommonArgs {
    /// Filename kwargs applied to every filename format, as a JSON object
    #[arg(long, value_parser = parse_kwargs)]
    pub filename_formats_kwargs: Option<Kwargs>,

    /// Metadata filename kwargs applied to every metadata format, as a JSON object
    #[arg(long, value_parser = parse_kwargs)]
    pub metadata_filename_formats_kwargs: Option<Kwargs>,

    #[command(flatten)]
    pub sectors: SectorCliArgs,

    /// Read only data inside each padded area
    #[arg(long)]
    pub sectored_read: bool,

    /// Let the reader resample to each area
    #[arg(long)]
    pub resampled_read: bool,

    /// Write the list of produced files here
    #[arg(long)]
    pub output_file_list_fname: Option<PathBuf>,

    /// Comparison directory; may contain <product>, <procflow> and <output>
    #[arg(long)]
    pub compare_path: Option<String>,

    #[arg(long)]
    pub compare_outputs_module: Option<String>,

    /// Write a database record for every product
    #[arg(long)]
    pub product_db: bool,

    #[arg(long)]
    pub product_db_writer: Option<String>,

    /// Per sector type writer, formatted as <sector_type>:<writer>
    #[arg(long, value_parser = parse_writer_override)]
    pub product_db_writer_override: Vec<(String, String)>,

    /// Output root replaced by $GEOIPS_OUTDIRS in the output file list
    #[arg(long)]
    pub outdirs_root: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct SectorCliArgs {
    /// Static sector YAML files
    #[arg(long, num_args = 1..)]
    pub sectorfiles: Vec<PathBuf>,

    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub sector_list: Option<Vec<String>>,

    /// Use the area definition supplied by the reader
    #[arg(long)]
    pub reader_defined_area_def: bool,

    /// Dataset whose grid becomes the area definition
    #[arg(long)]
    pub self_register_dataset: Option<String>,

    #[arg(long)]
    pub self_register_source: Option<String>,

    /// Use the tropical cyclone best-track database
    #[arg(long)]
    pub tcdb: bool,

    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub tcdb_sector_list: Option<Vec<String>>,

    #[arg(long, num_args = 1..)]
    pub trackfiles: Vec<PathBuf>,

    #[arg(long)]
    pub trackfile_parser: Option<String>,

    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub trackfile_sector_list: Option<Vec<String>>,

    #[arg(long)]
    pub tc_template_yaml: Option<PathBuf>,

    /// Area definition adjuster plugin
    #[arg(long)]
    pub adjust_area_def: Option<String>,

    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub adjust_variables: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct FuseCliArgs {
    /// Background data files fused under products
    #[arg(long, num_args = 1..)]
    pub fuse_files: Vec<PathBuf>,

    #[arg(long)]
    pub fuse_reader: Option<String>,

    #[arg(long)]
    pub fuse_product: Option<String>,

    #[arg(long)]
    pub fuse_resampled_read: bool,

    #[arg(long)]
    pub fuse_sectored_read: bool,
}

impl From<&SectorCliArgs> for SectorArgs {
    fn from(args: &SectorCliArgs) -> Self {
        SectorArgs {
            reader_defined_area_def: args.reader_defined_area_def,
            self_register_dataset: args.self_register_dataset.clone(),
            self_register_source: args.self_register_source.clone(),
            sectorfiles: args.sectorfiles.clone(),
            sector_list: args.sector_list.clone(),
            tcdb: args.tcdb,
            tcdb_sector_list: args.tcdb_sector_list.clone(),
            trackfiles: args.trackfiles.clone(),
            trackfile_parser: args.trackfile_parser.clone(),
            trackfile_sector_list: args.trackfile_sector_list.clone(),
            tc_template_yaml: args.tc_template_yaml.clone(),
            adjust_area_def: args.adjust_area_def.clone(),
            adjust_variables: args.adjust_variables.clone(),
            ..SectorArgs::default()
        }
    }
}

impl From<&FuseCliArgs> for FuseArgs {
    fn from(args: &FuseCliArgs) -> Self {
        FuseArgs {
            fuse_files: args.fuse_files.clone(),
            fuse_reader: args.fuse_reader.clone(),
            fuse_product: args.fuse_product.clone(),
            fuse_resampled_read: args.fuse_resampled_read,
            fuse_sectored_read: args.fuse_sectored_read,
        }
    }
}

fn under_all(kwargs: &Option<Kwargs>) -> HashMap<String, Kwargs> {
    kwargs
        .iter()
        .map(|kwargs| (ALL_KEY.to_string(), kwargs.clone()))
        .collect()
}

impl CommonArgs {
    /// Run configuration holding everything except the procflow-specific fields
    fn run_config(&self, output: OutputSpec) -> RunConfig {
        RunConfig {
            output: OutputSpec {
                filename_formats_kwargs: under_all(&self.filename_formats_kwargs),
                metadata_filename_formats_kwargs: under_all(&self.metadata_filename_formats_kwargs),
                ..output
            },
            sectors: SectorArgs::from(&self.sectors),
            database: DatabaseArgs {
                product_db: self.product_db,
                product_db_writer: self.product_db_writer.clone(),
                product_db_writer_override: self.product_db_writer_override.iter().cloned().collect(),
            },
            sectored_read: self.sectored_read,
            resampled_read: self.resampled_read,
            output_file_list_fname: self.output_file_list_fname.clone(),
            compare_path: self.compare_path.clone(),
            compare_outputs_module: self.compare_outputs_module.clone(),
            outdirs_root: self.outdirs_root.clone(),
            ..RunConfig::default()
        }
    }
}

impl SingleSourceArgs {
    pub fn run_config(&self) -> RunConfig {
        let metadata_filename_formats = match &self.metadata_filename_format {
            Some(metadata_format) => self
                .filename_formats
                .iter()
                .map(|fmt| (fmt.clone(), metadata_format.clone()))
                .collect(),
            None => HashMap::new(),
        };
        let output = OutputSpec {
            output_format: self.output_format.clone(),
            output_format_kwargs: self.output_format_kwargs.clone().unwrap_or_default(),
            filename_formats: self.filename_formats.clone(),
            metadata_output_format: self.metadata_output_format.clone(),
            metadata_filename_formats,
            product_names: vec![self.product_name.clone()],
            minimum_coverage: self.minimum_coverage,
            ..OutputSpec::default()
        };
        RunConfig {
            reader_name: Some(self.reader_name.clone()),
            product_name: Some(self.product_name.clone()),
            ..self.common.run_config(output)
        }
    }
}

impl ConfigBasedArgs {
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            reader_name: self.reader_name.clone(),
            output_config: Some(self.output_config.clone()),
            output_overrides: self.output_overrides.clone().unwrap_or_default(),
            fuse: FuseArgs::from(&self.fuse),
            ..self.common.run_config(OutputSpec::default())
        }
    }
}

fn parse_kwargs(s: &str) -> Result<Kwargs, String> {
    match serde_json::from_str(s) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err("Invalid format: Expected a JSON object.".to_string()),
        Err(e) => Err(format!("Invalid JSON: {}", e)),
    }
}

fn parse_writer_override(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.split(':').collect();
    match parts.as_slice() {
        [sector_type, writer] => Ok((sector_type.to_string(), writer.to_string())),
        _ => Err("Invalid format: Expected '<sector_type>:<writer>'.".to_string()),
    }
}
