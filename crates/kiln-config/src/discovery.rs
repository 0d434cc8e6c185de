//! File-based config discovery.
//!
//! Handles finding and loading kiln configuration from a project root.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::KilnConfig;
use crate::error::{ConfigError, Result};

/// Name of the dedicated config file.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Searches a project root for kiln configuration.
///
/// # Example
///
/// ```no_run
/// use kiln_config::ConfigDiscovery;
///
/// let config = ConfigDiscovery::new(".").load_or_default().unwrap();
/// ```
pub struct ConfigDiscovery {
    root: PathBuf,
}

impl ConfigDiscovery {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Find a config file in the root directory
    ///
    /// Searches in this order:
    /// 1. `kiln.toml`
    /// 2. `package.json` with a non-null `kiln` field
    pub fn find(&self) -> Option<PathBuf> {
        let toml_path = self.root.join(CONFIG_FILE);
        if toml_path.is_file() {
            return Some(toml_path);
        }

        let pkg_path = self.root.join("package.json");
        let content = fs::read_to_string(&pkg_path).ok()?;
        let parsed: Value = serde_json::from_str(&content).ok()?;
        match parsed.get("kiln") {
            Some(value) if !value.is_null() => Some(pkg_path),
            _ => None,
        }
    }

    /// Load config from the discovered file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if no config file is found.
    pub fn load(&self) -> Result<KilnConfig> {
        let path = self
            .find()
            .ok_or_else(|| ConfigError::NotFound(self.root.clone()))?;
        load_from(&path)
    }

    /// Like [`ConfigDiscovery::load`], but a project without config gets
    /// the defaults (still layered with `KILN_*` variables).
    pub fn load_or_default(&self) -> Result<KilnConfig> {
        match self.find() {
            Some(path) => load_from(&path),
            None => {
                tracing::debug!(root = %self.root.display(), "no kiln config found, using defaults");
                KilnConfig::load_value(Value::Object(Default::default()))
            }
        }
    }
}

fn load_from(path: &Path) -> Result<KilnConfig> {
    if path.file_name() == Some(std::ffi::OsStr::new("package.json")) {
        return load_from_package_json(path);
    }

    // Parse eagerly so syntax errors point at the file rather than figment.
    let content = fs::read_to_string(path)?;
    toml::from_str::<toml::Value>(&content).map_err(|e| ConfigError::InvalidValue {
        field: CONFIG_FILE.to_string(),
        hint: Some(format!("Invalid TOML syntax: {}", e)),
    })?;

    KilnConfig::load_toml(path)
}

fn load_from_package_json(path: &Path) -> Result<KilnConfig> {
    let content = fs::read_to_string(path)?;
    let parsed: Value = serde_json::from_str(&content).map_err(|e| ConfigError::InvalidValue {
        field: "package.json".to_string(),
        hint: Some(format!("Invalid JSON: {}", e)),
    })?;

    let value = parsed
        .get("kiln")
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| ConfigError::InvalidValue {
            field: "kiln".to_string(),
            hint: Some("Add a 'kiln' object to your package.json".to_string()),
        })?;

    KilnConfig::load_value(value)
}

/// Discover and load config from the current directory, falling back to
/// defaults.
pub fn discover() -> Result<KilnConfig> {
    let root = std::env::current_dir()?;
    ConfigDiscovery::new(&root).load_or_default()
}
