//! Compressor pipeline matching.
//!
//! Rules are checked in declaration order. The first rule whose pattern
//! matches an output path supplies the pipeline; a `"..."` entry inside it is
//! replaced by the pipeline of the next matching rule, recursively. Patterns
//! without a `/` are matched against the file name only, everything else
//! against the whole project-relative path.

use globset::{Glob, GlobMatcher};

use crate::config::CompressorRule;
use crate::error::{ConfigError, Result};

/// Placeholder that splices in the next matching rule's pipeline.
pub const SPREAD: &str = "...";

/// Compressor used when no rule matches.
pub const DEFAULT_COMPRESSOR: &str = "raw";

#[derive(Debug, Clone)]
struct CompiledRule {
    matcher: GlobMatcher,
    match_file_name: bool,
    pipeline: Vec<String>,
}

impl CompiledRule {
    fn is_match(&self, path: &str) -> bool {
        if self.match_file_name {
            let file_name = path.rsplit('/').next().unwrap_or(path);
            self.matcher.is_match(file_name)
        } else {
            self.matcher.is_match(path)
        }
    }
}

/// Compiled, ordered compressor rules.
#[derive(Debug, Clone, Default)]
pub struct CompressorPipelines {
    rules: Vec<CompiledRule>,
}

impl CompressorPipelines {
    pub fn compile(rules: &[CompressorRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let glob = Glob::new(&rule.pattern).map_err(|e| ConfigError::InvalidPattern {
                    pattern: rule.pattern.clone(),
                    message: e.kind().to_string(),
                })?;
                Ok(CompiledRule {
                    matcher: glob.compile_matcher(),
                    match_file_name: !rule.pattern.contains('/'),
                    pipeline: rule.pipeline.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Ordered compressor names for a project-relative output path.
    ///
    /// Never empty: falls back to [`DEFAULT_COMPRESSOR`].
    pub fn pipeline_for(&self, relative_path: &str) -> Vec<String> {
        let normalized = relative_path.replace('\\', "/");
        let matching: Vec<&CompiledRule> = self
            .rules
            .iter()
            .filter(|rule| rule.is_match(&normalized))
            .collect();

        let pipeline = expand(&matching);
        if pipeline.is_empty() {
            vec![DEFAULT_COMPRESSOR.to_string()]
        } else {
            pipeline
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn expand(rules: &[&CompiledRule]) -> Vec<String> {
    let Some((first, rest)) = rules.split_first() else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(first.pipeline.len());
    for name in &first.pipeline {
        if name == SPREAD {
            out.extend(expand(rest));
        } else {
            out.push(name.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipelines(rules: &[(&str, &[&str])]) -> CompressorPipelines {
        let rules: Vec<CompressorRule> = rules
            .iter()
            .map(|(pattern, pipeline)| CompressorRule::new(*pattern, pipeline.iter().copied()))
            .collect();
        CompressorPipelines::compile(&rules).unwrap()
    }

    #[test]
    fn no_rules_falls_back_to_raw() {
        let p = CompressorPipelines::default();
        assert_eq!(p.pipeline_for("dist/index.js"), vec!["raw"]);
    }

    #[test]
    fn first_match_wins() {
        let p = pipelines(&[("*.js", &["gzip"]), ("*", &["raw"])]);
        assert_eq!(p.pipeline_for("dist/index.js"), vec!["gzip"]);
        assert_eq!(p.pipeline_for("dist/index.css"), vec!["raw"]);
    }

    #[test]
    fn spread_splices_next_match() {
        let p = pipelines(&[
            ("*.{js,css}", &["...", "gzip", "brotli"]),
            ("*", &["raw"]),
        ]);
        assert_eq!(
            p.pipeline_for("dist/app.css"),
            vec!["raw", "gzip", "brotli"]
        );
    }

    #[test]
    fn spread_without_next_match_is_dropped() {
        let p = pipelines(&[("*.js", &["...", "gzip"])]);
        assert_eq!(p.pipeline_for("app.js"), vec!["gzip"]);
    }

    #[test]
    fn path_patterns_match_whole_path() {
        let p = pipelines(&[("dist/legacy/**", &["gzip"])]);
        assert_eq!(p.pipeline_for("dist/legacy/a/b.js"), vec!["gzip"]);
        assert_eq!(p.pipeline_for("dist/modern/b.js"), vec!["raw"]);
    }

    #[test]
    fn windows_separators_are_normalized() {
        let p = pipelines(&[("*.js", &["gzip"])]);
        assert_eq!(p.pipeline_for("dist\\app.js"), vec!["gzip"]);
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let err = CompressorPipelines::compile(&[CompressorRule::new("*.{js", ["raw"])]);
        assert!(matches!(err, Err(ConfigError::InvalidPattern { .. })));
    }
}
