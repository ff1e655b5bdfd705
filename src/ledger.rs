//! Final products ledger, output file lists and output comparisons

use crate::errors::Result;
use crate::plugins::PluginRegistry;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Ledger key for products without a comparison path
pub const NO_COMPARISON: &str = "no_comparison";
pub const NO_COMPARE_OUTPUTS_MODULE: &str = "no_compare_outputs_module";
pub const DEFAULT_COMPARE_OUTPUTS_MODULE: &str = "compare_outputs";
/// Product name under which area-def adjuster files are recorded
pub const ADJUSTER_PRODUCT: &str = "archer";

/// Comparison path and the module that compares it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonTarget {
    pub path: String,
    pub module: String,
}

impl ComparisonTarget {
    pub fn none() -> Self {
        Self {
            path: NO_COMPARISON.to_string(),
            module: NO_COMPARE_OUTPUTS_MODULE.to_string(),
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.path != NO_COMPARISON
    }
}

/// Resolve the comparison path for one product.
///
/// The command-line path wins over the output's own. `<product>`, `<procflow>` and
/// `<output>` are substituted textually.
pub fn set_comparison_path(
    output_compare_path: Option<&str>,
    compare_outputs_module: Option<&str>,
    cli_compare_path: Option<&str>,
    product_name: &str,
    procflow_name: &str,
    output_type: &str,
) -> ComparisonTarget {
    match cli_compare_path.or(output_compare_path) {
        Some(template) => ComparisonTarget {
            path: template
                .replace("<product>", product_name)
                .replace("<procflow>", procflow_name)
                .replace("<output>", output_type),
            module: compare_outputs_module
                .unwrap_or(DEFAULT_COMPARE_OUTPUTS_MODULE)
                .to_string(),
        },
        None => ComparisonTarget::none(),
    }
}

/// Files and database confirmations accumulated under one comparison path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerEntry {
    pub files: Vec<PathBuf>,
    pub database_writes: Vec<String>,
    pub compare_outputs_module: String,
}

/// Products of a whole run, keyed by comparison path in first-use order
#[derive(Debug, Clone, Default)]
pub struct FinalProducts {
    entries: Vec<(String, LedgerEntry)>,
}

impl FinalProducts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `target`, created on first use; the module name follows the latest target.
    pub fn entry(&mut self, target: &ComparisonTarget) -> &mut LedgerEntry {
        let pos = match self.entries.iter().position(|(k, _)| *k == target.path) {
            Some(pos) => pos,
            None => {
                self.entries.push((target.path.clone(), LedgerEntry::default()));
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[pos].1;
        entry.compare_outputs_module = target.module.clone();
        entry
    }

    pub fn get(&self, path: &str) -> Option<&LedgerEntry> {
        self.entries.iter().find(|(k, _)| k == path).map(|(_, e)| e)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LedgerEntry)> {
        self.entries.iter().map(|(k, e)| (k, e))
    }

    /// Every produced file, in ledger order
    pub fn all_files(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .flat_map(|(_, e)| e.files.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Replace the output root prefix with the `$GEOIPS_OUTDIRS` token.
pub fn replace_outdirs(path: &Path, outdirs_root: &Path) -> String {
    let text = path.display().to_string();
    let root = outdirs_root.display().to_string();
    if root.is_empty() {
        return text;
    }
    text.replace(&root, crate::config::OUTDIRS_TOKEN)
}

/// Write one output path per line. The file always ends with a newline, even when
/// nothing was produced.
pub fn write_output_file_list(list_path: &Path, files: &[PathBuf], outdirs_root: &Path) -> Result<()> {
    info!("Writing successful outputs to {}", list_path.display());
    if let Some(parent) = list_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut contents = files
        .iter()
        .map(|file| replace_outdirs(file, outdirs_root))
        .collect::<Vec<_>>()
        .join("\n");
    contents.push('\n');
    fs::write(list_path, contents)?;
    Ok(())
}

/// Compare every ledger entry that has a comparison path; returns the summed results.
pub fn run_comparisons(registry: &PluginRegistry, products: &FinalProducts) -> Result<i32> {
    let mut retval = 0;
    for (path, entry) in products.iter() {
        if path == NO_COMPARISON {
            info!("No comparison specified, not attempting to compare outputs");
            continue;
        }
        let comparison = registry.comparison(&entry.compare_outputs_module)?;
        let result = comparison.compare(path, &entry.files)?;
        if result != 0 {
            info!("{} FAILED COMPARISONS IN DIR: {}", result, path);
        } else {
            info!("SUCCESSFUL COMPARISON DIR: {}", path);
        }
        retval += result;
    }
    Ok(retval)
}

/// Log the run summary the way operators grep for it.
pub fn log_final_products(products: &FinalProducts, removed: &[PathBuf], tag: &str) {
    for (_, entry) in products.iter() {
        for file in &entry.files {
            info!("    {} {}", tag, file.display());
            let name = file.display().to_string();
            if entry.database_writes.iter().any(|w| *w == name) {
                info!("    DATABASESUCCESS {}", name);
            }
        }
    }
    for file in removed {
        info!("    DELETEDPRODUCT {}", file.display());
    }
}
