//! Entry point for the procflow binary.
//! Handles CLI parsing, logging and thread pool setup, then dispatches to a procflow.

use clap::Parser;
use procflow::cli::{Cli, Command};
use procflow::errors::Result;
use procflow::parallel::init_thread_pool;
use procflow::plugins::PluginRegistry;
use procflow::procflow::{config_based, single_source, ProcflowContext};
use procflow::product::ProductCatalog;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn run(cli: &Cli) -> Result<i32> {
    init_thread_pool(cli.threads)?;

    let catalog = ProductCatalog::from_files(&cli.product_catalogs)?;
    info!("Loaded {} product definitions", catalog.len());
    let ctx = ProcflowContext::new(PluginRegistry::with_builtins(), catalog);

    match &cli.command {
        Command::SingleSource(args) => single_source(&ctx, &args.files, &args.run_config()),
        Command::ConfigBased(args) => config_based(&ctx, &args.files, &args.run_config()),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            1
        }
    };
    std::process::exit(code);
}
