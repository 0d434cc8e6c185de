//! Packaged bundle data model.
//!
//! These types are produced upstream by bundling and packaging and are
//! treated as immutable inputs by the writer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A logical output unit ready for emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: String,

    /// Templated file name, e.g. `app.HASH_REF_0123456789abcdef.js`.
    pub name: String,

    /// This bundle's own hash-reference token.
    pub hash_reference: String,

    /// Declared output type (file extension without the dot).
    #[serde(rename = "type")]
    pub bundle_type: String,

    pub target: Target,

    pub env: Environment,

    /// Source file of the main entry asset, if the bundle has one.
    #[serde(default)]
    pub main_entry: Option<PathBuf>,
}

/// Where a bundle is emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Project-relative distribution directory.
    pub dist_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub context: BundleContext,

    #[serde(default)]
    pub source_map: Option<SourceMapOptions>,
}

impl Environment {
    pub fn is_browser(&self) -> bool {
        self.context.is_browser()
    }

    /// A source map is written as a separate `.map` file.
    pub fn has_external_source_map(&self) -> bool {
        self.source_map.as_ref().is_some_and(|sm| !sm.inline)
    }
}

/// Runtime a bundle targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleContext {
    #[default]
    Browser,
    WebWorker,
    ServiceWorker,
    Worklet,
    Node,
    ElectronMain,
    ElectronRenderer,
}

impl BundleContext {
    pub fn is_browser(self) -> bool {
        matches!(
            self,
            BundleContext::Browser
                | BundleContext::WebWorker
                | BundleContext::ServiceWorker
                | BundleContext::Worklet
                | BundleContext::ElectronRenderer
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapOptions {
    #[serde(default)]
    pub inline: bool,
}

/// Output of packaging one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedBundleInfo {
    /// Output type; may differ from [`Bundle::bundle_type`].
    #[serde(rename = "type")]
    pub bundle_type: String,

    pub cache_keys: CacheKeys,

    /// Hash-reference tokens that occur in the packaged content.
    #[serde(default)]
    pub hash_references: Vec<String>,

    /// Content is read from the cache as a stream instead of a blob.
    #[serde(default)]
    pub is_large_blob: bool,

    /// Content hash of the packaged output.
    pub hash: String,

    /// Packaging time in milliseconds.
    #[serde(default)]
    pub time: Option<u64>,
}

impl PackagedBundleInfo {
    pub fn has_hash_references(&self) -> bool {
        !self.hash_references.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKeys {
    pub content: String,

    #[serde(default)]
    pub map: Option<String>,
}
