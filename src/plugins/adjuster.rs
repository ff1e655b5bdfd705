//! Area-def adjuster plugins: refine an area definition using the sectored data

use crate::area::AreaDefinition;
use crate::dataset::Dataset;
use crate::errors::Result;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// `(datasets, area_def, variables, adjust_variables) -> (area_def, extra files)`
pub type AdjustWithFilesFn = Arc<
    dyn Fn(&[&Dataset], &AreaDefinition, &[String], &[String]) -> Result<(AreaDefinition, Vec<PathBuf>)>
        + Send
        + Sync,
>;
/// `(datasets, area_def, variables, adjust_variables) -> area_def`
pub type AdjustAreaFn =
    Arc<dyn Fn(&[&Dataset], &AreaDefinition, &[String], &[String]) -> Result<AreaDefinition> + Send + Sync>;

#[derive(Clone)]
pub enum AdjusterCall {
    /// adjuster_type `list_xarray_list_variables_to_area_def_out_fnames`
    AreaDefOutFnames(AdjustWithFilesFn),
    /// adjuster_type `list_xarray_list_variables_to_area_def`
    AreaDef(AdjustAreaFn),
}

impl AdjusterCall {
    pub fn adjuster_type(&self) -> &'static str {
        match self {
            AdjusterCall::AreaDefOutFnames(_) => "list_xarray_list_variables_to_area_def_out_fnames",
            AdjusterCall::AreaDef(_) => "list_xarray_list_variables_to_area_def",
        }
    }
}

#[derive(Clone)]
pub struct AdjusterPlugin {
    pub name: String,
    pub call: AdjusterCall,
}

impl fmt::Debug for AdjusterPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdjusterPlugin({}, {})", self.name, self.call.adjuster_type())
    }
}

impl AdjusterPlugin {
    pub fn with_output_filenames<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[&Dataset], &AreaDefinition, &[String], &[String]) -> Result<(AreaDefinition, Vec<PathBuf>)>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            call: AdjusterCall::AreaDefOutFnames(Arc::new(func)),
        }
    }

    pub fn area_only<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[&Dataset], &AreaDefinition, &[String], &[String]) -> Result<AreaDefinition>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            call: AdjusterCall::AreaDef(Arc::new(func)),
        }
    }

    /// Run the adjuster; area-only adjusters produce no extra files.
    pub fn adjust(
        &self,
        datasets: &[&Dataset],
        area: &AreaDefinition,
        variables: &[String],
        adjust_variables: &[String],
    ) -> Result<(AreaDefinition, Vec<PathBuf>)> {
        match &self.call {
            AdjusterCall::AreaDefOutFnames(func) => func(datasets, area, variables, adjust_variables),
            AdjusterCall::AreaDef(func) => Ok((func(datasets, area, variables, adjust_variables)?, Vec::new())),
        }
    }
}
