//! Comparison modules: check produced files against a reference directory

use crate::errors::Result;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// `(comparison_path, file_list) -> mismatch count`
pub type CompareFn = Arc<dyn Fn(&str, &[PathBuf]) -> Result<i32> + Send + Sync>;

#[derive(Clone)]
pub struct ComparisonPlugin {
    pub name: String,
    pub call: CompareFn,
}

impl fmt::Debug for ComparisonPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComparisonPlugin({})", self.name)
    }
}

impl ComparisonPlugin {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str, &[PathBuf]) -> Result<i32> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            call: Arc::new(func),
        }
    }

    pub fn compare(&self, compare_path: &str, files: &[PathBuf]) -> Result<i32> {
        (self.call)(compare_path, files)
    }
}

/// Byte-compare each produced file with the same-named file under `compare_path`.
///
/// Returns the number of missing or differing files.
pub fn compare_outputs(compare_path: &str, files: &[PathBuf]) -> Result<i32> {
    let mut mismatches = 0;
    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let reference = Path::new(compare_path).join(name);
        if !reference.exists() {
            warn!("MISSING comparison file {}", reference.display());
            mismatches += 1;
            continue;
        }
        if fs::read(file)? != fs::read(&reference)? {
            warn!("BAD comparison {} vs {}", file.display(), reference.display());
            mismatches += 1;
        } else {
            info!("GOOD comparison {}", file.display());
        }
    }
    Ok(mismatches)
}

pub(crate) fn compare_outputs_plugin() -> ComparisonPlugin {
    ComparisonPlugin::new("compare_outputs", compare_outputs)
}
