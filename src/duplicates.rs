//! Removal of superseded output files, delegated to each filename format

use crate::errors::Result;
use crate::plugins::{DuplicateReport, PluginRegistry};
use crate::render::ProductFile;
use tracing::warn;

/// Run each product's filename-format duplicate hook.
///
/// Formats without a hook are skipped with a warning. With `remove_files` unset the
/// report lists what would have been removed.
pub fn remove_duplicates(
    registry: &PluginRegistry,
    products: &[ProductFile],
    remove_files: bool,
) -> Result<DuplicateReport> {
    let mut report = DuplicateReport::default();
    for product in products {
        let Some(filename_format) = product.filename_format.as_deref() else {
            continue;
        };
        let plugin = registry.filename_format(filename_format)?;
        match &plugin.remove_duplicates {
            Some(hook) => {
                let current = hook(&product.path, remove_files)?;
                report.removed.extend(current.removed);
                report.saved.extend(current.saved);
            }
            None => warn!(
                "SKIPPING DUPLICATE REMOVAL no {}_remove_duplicates defined",
                filename_format
            ),
        }
    }
    Ok(report)
}
