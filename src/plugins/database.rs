//! Product database writers

use super::Kwargs;
use crate::area::AreaDefinition;
use crate::dataset::Dataset;
use crate::errors::{ProcflowError, Result};
use std::env;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub const DB_USER_ENV: &str = "GEOIPS_DB_USER";
pub const DB_PASS_ENV: &str = "GEOIPS_DB_PASS";

/// What the database record is keyed on
#[derive(Debug, Clone, Copy)]
pub enum DbTarget<'a> {
    Area(&'a AreaDefinition),
    /// Unsectored products have no area definition
    Dataset(&'a Dataset),
}

/// `(filepath, target, dataset, additional_attrs) -> confirmation token`
pub type DbWriteFn = Arc<dyn Fn(&Path, DbTarget<'_>, &Dataset, &Kwargs) -> Result<String> + Send + Sync>;

#[derive(Clone)]
pub struct DatabaseWriterPlugin {
    pub name: String,
    pub call: DbWriteFn,
}

impl fmt::Debug for DatabaseWriterPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatabaseWriterPlugin({})", self.name)
    }
}

impl DatabaseWriterPlugin {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Path, DbTarget<'_>, &Dataset, &Kwargs) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            call: Arc::new(func),
        }
    }

    pub fn write(&self, path: &Path, target: DbTarget<'_>, dataset: &Dataset, attrs: &Kwargs) -> Result<String> {
        (self.call)(path, target, dataset, attrs)
    }
}

/// Fail unless both database credential variables are set.
pub fn check_db_credentials() -> Result<()> {
    let user = env::var(DB_USER_ENV).ok().filter(|v| !v.is_empty());
    let pass = env::var(DB_PASS_ENV).ok().filter(|v| !v.is_empty());
    match (user, pass) {
        (Some(_), Some(_)) => Ok(()),
        _ => Err(ProcflowError::MissingCredentials {
            user_var: DB_USER_ENV.to_string(),
            pass_var: DB_PASS_ENV.to_string(),
        }),
    }
}
