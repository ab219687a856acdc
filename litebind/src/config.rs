///
/// # Connection Configuration
///
/// Connections can be described in a TOML file instead of code. Every
/// field is optional; an empty file opens a private in-memory database
/// with on-demand collations installed.
///
/// ## Example
///
/// ```toml
/// location = "catalog.db"
/// read_only = true
/// busy_timeout_ms = 500
/// trace = false
/// profile = true
/// install_collations = true
/// ```
///
/// ## Location
///
/// - empty: in-memory database, `read_only` is ignored
/// - contains `:`: opened as a URI (`file:catalog.db?mode=ro`)
/// - anything else: a file path, created unless `read_only`
///

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub location: String,
    pub read_only: bool,
    pub busy_timeout_ms: Option<u64>,
    pub trace: bool,
    pub profile: bool,
    pub install_collations: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            read_only: false,
            busy_timeout_ms: None,
            trace: false,
            profile: false,
            install_collations: true,
        }
    }
}

impl ConnectionConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn at(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn is_in_memory(&self) -> bool {
        self.location.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.location.contains('\0') {
            return Err(Error::Config("location contains a NUL byte".to_string()));
        }
        if self.busy_timeout_ms.is_some_and(|ms| ms > i32::MAX as u64) {
            return Err(Error::Config(format!(
                "busy_timeout_ms must be at most {}",
                i32::MAX
            )));
        }
        Ok(())
    }
}
