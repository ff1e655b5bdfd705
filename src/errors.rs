//! Centralized error handling for procflow
//!
//! Errors fall into the classes the orchestrators act on: configuration and plugin
//! contract violations abort the run, coverage errors and missing data cause the current
//! area or product to be skipped.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for procflow operations
#[derive(Error, Debug)]
pub enum ProcflowError {
    /// NetCDF file operation errors
    #[error("NetCDF error: {0}")]
    NetCDF(#[from] netcdf::Error),

    /// I/O operation errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Array shape or dimension error
    #[error("Array error: {0}")]
    Array(#[from] ndarray::ShapeError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),

    /// Algorithm family and product type combination with no dispatch rule
    #[error("UNSUPPORTED alg_family {family} or product_type {product_type}")]
    UnsupportedFamily { family: String, product_type: String },

    /// Output format family that the requested dispatch path cannot render
    #[error("Unsupported output format family {family} for output format {output_format}")]
    UnsupportedOutputFamily {
        family: String,
        output_format: String,
    },

    /// Renderer returned a file set different from the predeclared filenames
    #[error("Did not produce expected products: expected {expected:?}, produced {produced:?}")]
    UnexpectedProducts {
        expected: Vec<PathBuf>,
        produced: Vec<PathBuf>,
    },

    /// Database credentials are required but not set
    #[error("Must set both {user_var} and {pass_var} environment variables to write to the database")]
    MissingCredentials { user_var: String, pass_var: String },

    #[error("No {kind} plugin named '{name}' is registered")]
    PluginNotFound { kind: String, name: String },

    #[error("Product '{product}' is not defined for source '{source_name}'")]
    ProductNotFound { product: String, source_name: String },

    #[error("Variable '{var}' not found")]
    VariableNotFound { var: String },

    /// Requested data does not intersect the requested area
    #[error("Coverage error: {0}")]
    Coverage(String),

    /// Required data was not present in any candidate dataset
    #[error("No data: {0}")]
    NoData(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

impl ProcflowError {
    pub fn coverage(msg: impl Into<String>) -> Self {
        Self::Coverage(msg.into())
    }

    pub fn no_data(msg: impl Into<String>) -> Self {
        Self::NoData(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn unsupported_family(family: impl Into<String>, product_type: impl Into<String>) -> Self {
        Self::UnsupportedFamily {
            family: family.into(),
            product_type: product_type.into(),
        }
    }

    pub fn plugin_not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::PluginNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn variable_not_found(var: impl Into<String>) -> Self {
        Self::VariableNotFound { var: var.into() }
    }

    /// Whether the error is a configuration or plugin contract violation that must abort the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Coverage(_) | Self::NoData(_))
    }
}

/// Convenient Result type alias for procflow operations
pub type Result<T> = std::result::Result<T, ProcflowError>;

