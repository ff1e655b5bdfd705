//! Product specifications and the catalog they are looked up in
//!
//! A product is identified by `(product name, source name)`. Catalogs are loaded from
//! YAML files of the form:
//!
//! ```yaml
//! products:
//!   - name: Infrared
//!     source_names: [abi]
//!     family: interp_alg_cmap
//!     variables: [B14BT]
//!     algorithm: {name: single_channel, args: {output_data_range: [-90.0, 30.0]}}
//!     interpolator: {name: interp_nearest}
//!     colormap: {name: linear_norm}
//!     coverage_checks:
//!       default: {name: masked_arrays}
//! ```

use crate::errors::{ProcflowError, Result};
use crate::plugins::Kwargs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Default coverage check used when a product declares none
pub const DEFAULT_COVERAGE_CHECK: &str = "masked_arrays";

/// Processing family of a product: which stages run and in what order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductFamily {
    Alg,
    AlgCmap,
    Interp,
    InterpAlg,
    InterpAlgCmap,
    AlgInterpCmap,
    SectoredXarrayDictToOutputFormat,
    UnsectoredXarrayDictToOutputFormat,
    UnsectoredXarrayDictAreaToOutputFormat,
}

impl ProductFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductFamily::Alg => "alg",
            ProductFamily::AlgCmap => "alg_cmap",
            ProductFamily::Interp => "interp",
            ProductFamily::InterpAlg => "interp_alg",
            ProductFamily::InterpAlgCmap => "interp_alg_cmap",
            ProductFamily::AlgInterpCmap => "alg_interp_cmap",
            ProductFamily::SectoredXarrayDictToOutputFormat => "sectored_xarray_dict_to_output_format",
            ProductFamily::UnsectoredXarrayDictToOutputFormat => {
                "unsectored_xarray_dict_to_output_format"
            }
            ProductFamily::UnsectoredXarrayDictAreaToOutputFormat => {
                "unsectored_xarray_dict_area_to_output_format"
            }
        }
    }

    /// Families that run an algorithm plugin
    pub fn uses_algorithm(&self) -> bool {
        matches!(
            self,
            ProductFamily::Alg
                | ProductFamily::AlgCmap
                | ProductFamily::InterpAlg
                | ProductFamily::InterpAlgCmap
                | ProductFamily::AlgInterpCmap
        )
    }

    /// Families applying the algorithm on raw sectored arrays before any interpolation
    pub fn is_algorithm_first(&self) -> bool {
        matches!(
            self,
            ProductFamily::Alg | ProductFamily::AlgCmap | ProductFamily::AlgInterpCmap
        )
    }

    pub fn is_interpolation_first(&self) -> bool {
        matches!(
            self,
            ProductFamily::Interp | ProductFamily::InterpAlg | ProductFamily::InterpAlgCmap
        )
    }

    pub fn is_unsectored(&self) -> bool {
        matches!(
            self,
            ProductFamily::UnsectoredXarrayDictToOutputFormat
                | ProductFamily::UnsectoredXarrayDictAreaToOutputFormat
        )
    }
}

/// A named plugin plus the arguments it is called with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginCall {
    pub name: String,
    #[serde(default)]
    pub args: Kwargs,
}

impl PluginCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Kwargs::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }
}

/// Which coverage value is being computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageKind {
    Default,
    ImageProduction,
    Filename,
}

/// Coverage checks declared for a product; the specific kinds fall back to `default`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageChecks {
    #[serde(default, rename = "default")]
    pub default: Option<PluginCall>,
    #[serde(default)]
    pub image_production: Option<PluginCall>,
    #[serde(default)]
    pub fname: Option<PluginCall>,
}

impl CoverageChecks {
    pub fn get(&self, kind: CoverageKind) -> Option<&PluginCall> {
        let specific = match kind {
            CoverageKind::Default => None,
            CoverageKind::ImageProduction => self.image_production.as_ref(),
            CoverageKind::Filename => self.fname.as_ref(),
        };
        specific.or(self.default.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.image_production.is_none() && self.fname.is_none()
    }
}

/// Everything the pipeline needs to know to build one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSpec {
    pub name: String,
    /// Sources this definition applies to; empty means any source
    #[serde(default)]
    pub source_names: Vec<String>,
    pub family: ProductFamily,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub variables: Vec<String>,
    /// Variables pinned to specific dataset keys
    #[serde(default)]
    pub dataset_for_variables: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub algorithm: Option<PluginCall>,
    #[serde(default)]
    pub interpolator: Option<PluginCall>,
    #[serde(default)]
    pub colormap: Option<PluginCall>,
    #[serde(default)]
    pub coverage_checks: CoverageChecks,
    #[serde(default)]
    pub minimum_coverage: Option<f64>,
}

impl ProductSpec {
    pub fn new(name: impl Into<String>, family: ProductFamily) -> Self {
        Self {
            name: name.into(),
            source_names: Vec::new(),
            family,
            display_name: None,
            variables: Vec::new(),
            dataset_for_variables: HashMap::new(),
            algorithm: None,
            interpolator: None,
            colormap: None,
            coverage_checks: CoverageChecks::default(),
            minimum_coverage: None,
        }
    }

    pub fn for_sources(mut self, sources: &[&str]) -> Self {
        self.source_names = sources.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_variables(mut self, variables: &[&str]) -> Self {
        self.variables = variables.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_algorithm(mut self, call: PluginCall) -> Self {
        self.algorithm = Some(call);
        self
    }

    pub fn with_interpolator(mut self, call: PluginCall) -> Self {
        self.interpolator = Some(call);
        self
    }

    pub fn with_colormap(mut self, call: PluginCall) -> Self {
        self.colormap = Some(call);
        self
    }

    pub fn with_coverage_check(mut self, kind: CoverageKind, call: PluginCall) -> Self {
        match kind {
            CoverageKind::Default => self.coverage_checks.default = Some(call),
            CoverageKind::ImageProduction => self.coverage_checks.image_production = Some(call),
            CoverageKind::Filename => self.coverage_checks.fname = Some(call),
        }
        self
    }

    pub fn pin_variable(mut self, variable: &str, dataset_keys: &[&str]) -> Self {
        self.dataset_for_variables.insert(
            variable.to_string(),
            dataset_keys.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn applies_to(&self, source_name: &str) -> bool {
        self.source_names.is_empty() || self.source_names.iter().any(|s| s == source_name)
    }

    /// Title shown on rendered imagery
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Coverage check for `kind`, or the default `masked_arrays` check
    pub fn coverage_check(&self, kind: CoverageKind) -> PluginCall {
        self.coverage_checks
            .get(kind)
            .cloned()
            .unwrap_or_else(|| PluginCall::new(DEFAULT_COVERAGE_CHECK))
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    products: Vec<ProductSpec>,
}

/// Immutable collection of product specifications
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    products: Vec<ProductSpec>,
}

impl ProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: ProductSpec) {
        self.products.push(spec);
    }

    pub fn with_product(mut self, spec: ProductSpec) -> Self {
        self.insert(spec);
        self
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(text)?;
        Ok(Self {
            products: file.products,
        })
    }

    /// Load and concatenate catalog files; later files take precedence on lookup.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut catalog = Self::new();
        for path in paths {
            let text = fs::read_to_string(path.as_ref())?;
            let loaded = Self::from_yaml_str(&text)?;
            debug!(
                "Loaded {} products from {}",
                loaded.products.len(),
                path.as_ref().display()
            );
            catalog.products.extend(loaded.products);
        }
        Ok(catalog)
    }

    /// Look up a product for a source.
    ///
    /// # Errors
    ///
    /// Returns [`ProcflowError::ProductNotFound`] if no specification matches.
    pub fn get(&self, product: &str, source_name: &str) -> Result<&ProductSpec> {
        self.products
            .iter()
            .rev()
            .find(|p| p.name == product && p.applies_to(source_name))
            .ok_or_else(|| ProcflowError::ProductNotFound {
                product: product.to_string(),
                source_name: source_name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}
