//! Hash-reference tokens and final output path resolution.
//!
//! Packaging runs before every bundle's final content hash is known, so
//! names and contents carry fixed-width placeholder tokens
//! (`HASH_REF_` + 16 characters). Once all hashes are known upstream builds
//! a [`TokenMap`] from token to name hash, and the writer swaps them in.

use std::path::PathBuf;

use path_clean::PathClean;
use rustc_hash::FxHashMap;

use crate::bundle::Bundle;
use crate::{Error, Result};

pub const HASH_REF_PREFIX: &str = "HASH_REF_";

/// Characters following the prefix.
pub const HASH_REF_HASH_LEN: usize = 16;

/// Total token width.
pub const HASH_REF_LEN: usize = HASH_REF_PREFIX.len() + HASH_REF_HASH_LEN;

/// Returns true if `s` has the shape of a hash-reference token.
pub fn is_hash_ref(s: &str) -> bool {
    s.len() == HASH_REF_LEN && s.starts_with(HASH_REF_PREFIX)
}

/// Token → final name hash, fixed for the duration of a build.
///
/// Built once upstream and shared read-only (usually as `Arc<TokenMap>`)
/// by every write task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMap {
    entries: FxHashMap<String, String>,
}

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries.get(token).map(String::as_str)
    }

    /// Lookup by raw bytes, as found while scanning content.
    pub fn get_bytes(&self, token: &[u8]) -> Option<&[u8]> {
        std::str::from_utf8(token)
            .ok()
            .and_then(|t| self.get(t))
            .map(str::as_bytes)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TokenMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A bundle's final name and the hash substituted into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub name: String,

    /// `None` when the templated name did not embed the bundle's token.
    pub name_hash: Option<String>,
}

/// Final project-relative output location of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub file_path: PathBuf,
    pub name: ResolvedName,
}

/// Resolve a bundle's final file name.
///
/// The extension is swapped first when packaging produced a different
/// output type, then the bundle's own token is replaced by its name hash.
///
/// # Errors
///
/// [`Error::MissingHashReference`] if the name embeds the bundle's token but
/// the map has no entry for it. That is an upstream planning defect.
pub fn resolve_output_name(
    bundle: &Bundle,
    output_type: &str,
    tokens: &TokenMap,
) -> Result<ResolvedName> {
    let mut name = if output_type != bundle.bundle_type {
        replace_extension(&bundle.name, output_type)
    } else {
        bundle.name.clone()
    };

    let mut name_hash = None;
    if !bundle.hash_reference.is_empty() && name.contains(&bundle.hash_reference) {
        let hash = tokens
            .get(&bundle.hash_reference)
            .ok_or_else(|| Error::MissingHashReference {
                bundle_id: bundle.id.clone(),
                hash_reference: bundle.hash_reference.clone(),
            })?;
        name = name.replace(&bundle.hash_reference, hash);
        name_hash = Some(hash.to_string());
    }

    Ok(ResolvedName { name, name_hash })
}

/// Resolve the project-relative path a bundle is written to.
pub fn resolve_bundle_path(
    bundle: &Bundle,
    output_type: &str,
    tokens: &TokenMap,
) -> Result<ResolvedPath> {
    let name = resolve_output_name(bundle, output_type, tokens)?;
    let file_path = bundle.target.dist_dir.join(&name.name).clean();
    Ok(ResolvedPath { file_path, name })
}

fn replace_extension(name: &str, extension: &str) -> String {
    let file_start = name.rfind('/').map_or(0, |i| i + 1);
    let stem = match name[file_start..].rfind('.') {
        Some(dot) if dot > 0 => &name[..file_start + dot],
        _ => name,
    };
    format!("{stem}.{extension}")
}
