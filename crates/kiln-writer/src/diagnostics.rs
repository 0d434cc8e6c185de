//! Structured diagnostics for compressor plugin failures.
//!
//! A failing compressor never aborts its siblings. Its error is captured as a
//! [`PluginDiagnostic`] tagged with the plugin name, and all diagnostics of
//! one write are reported together as [`crate::Error::Plugin`].

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A failure attributed to a named plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDiagnostic {
    /// Name of the plugin that failed.
    pub origin: String,
    pub message: String,

    /// Output file the plugin was producing.
    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default)]
    pub help: Option<String>,

    /// Causes below the top-level message, outermost first.
    #[serde(default)]
    pub error_chain: Vec<String>,
}

impl PluginDiagnostic {
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
            file: None,
            help: None,
            error_chain: Vec::new(),
        }
    }

    /// Capture an error returned by a plugin, keeping its cause chain.
    pub fn from_error(err: &anyhow::Error, origin: &str) -> Self {
        let help = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<io::Error>())
            .map(|io_err| io_help(io_err.kind()).to_string());

        Self {
            origin: origin.to_string(),
            message: err.to_string(),
            file: None,
            help,
            error_chain: err.chain().skip(1).map(ToString::to_string).collect(),
        }
    }

    pub fn with_file(mut self, file: &Path) -> Self {
        self.file = Some(file.to_path_buf());
        self
    }
}

fn io_help(kind: io::ErrorKind) -> &'static str {
    match kind {
        io::ErrorKind::PermissionDenied => "Check write permissions on the output directory",
        io::ErrorKind::NotFound => "The output directory may have been removed during the build",
        _ => "Check available disk space and output directory permissions",
    }
}

impl fmt::Display for PluginDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.origin, self.message)?;
        if let Some(file) = &self.file {
            write!(f, " ({})", file.display())?;
        }
        Ok(())
    }
}

/// Render a list of plugin diagnostics for terminal output.
pub fn format_plugin_diagnostics(diagnostics: &[PluginDiagnostic]) -> String {
    let mut out = String::new();

    if diagnostics.len() == 1 {
        out.push_str("Compressor failed:\n\n");
    } else {
        out.push_str(&format!("{} compressors failed:\n\n", diagnostics.len()));
    }

    for (i, diag) in diagnostics.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("  {diag}\n"));
        for cause in &diag.error_chain {
            out.push_str(&format!("    caused by: {cause}\n"));
        }
        if let Some(help) = &diag.help {
            out.push_str(&format!("    help: {help}\n"));
        }
    }

    out
}
