// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns figment extraction failures into miette diagnostics.
//!
//! Unknown keys get a "did you mean" suggestion and, when the offending file
//! is at hand, a labelled span pointing at the key.

#![allow(unused_assignments)]

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Jaro-Winkler score above which a known key is offered as a correction.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// A TOML document that took part in loading: display path and contents.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: String,
    pub content: String,
}

impl ConfigSource {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown key `{key}` in {}", section_label(section.as_deref()))]
    #[diagnostic(code(tawreed::config::unknown_key), help("{}", unknown_key_help(suggestion.as_deref(), valid_keys)))]
    UnknownKey {
        key: String,
        section: Option<String>,
        suggestion: Option<String>,
        valid_keys: String,
        #[label("not a recognized key")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("`{key}` has the wrong type: found {found}")]
    #[diagnostic(code(tawreed::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        key: String,
        found: String,
        expected: String,
    },

    #[error("`{key}` has an invalid value: {detail}")]
    #[diagnostic(code(tawreed::config::invalid_value))]
    InvalidValue { key: String, detail: String },

    /// A value parsed but breaks a semantic rule.
    #[error("{message}")]
    #[diagnostic(code(tawreed::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(tawreed::config::other))]
    Other(String),
}

impl ConfigError {
    pub fn validation(message: impl Into<String>) -> Self {
        ConfigError::Validation {
            message: message.into(),
        }
    }
}

fn section_label(section: Option<&str>) -> String {
    match section {
        Some(s) => format!("[{s}]"),
        None => "the top level".to_string(),
    }
}

fn unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? valid keys: {valid_keys}"),
        None => format!("valid keys: {valid_keys}"),
    }
}

/// Expands a (possibly aggregated) figment error into one diagnostic per failure.
pub fn figment_to_config_errors(err: figment::Error, sources: &[ConfigSource]) -> Vec<ConfigError> {
    use figment::error::Kind;

    err.into_iter()
        .map(|error| {
            let dotted = error.path.join(".");
            match &error.kind {
                Kind::UnknownField(field, expected) => {
                    let section = error.path.first().cloned();
                    let (span, src) = locate(&error, section.as_deref(), field, sources);
                    ConfigError::UnknownKey {
                        key: field.clone(),
                        section,
                        suggestion: suggest_key(field, expected),
                        valid_keys: expected.join(", "),
                        span,
                        src,
                    }
                }
                Kind::InvalidType(found, expected) => ConfigError::InvalidType {
                    key: dotted,
                    found: found.to_string(),
                    expected: expected.clone(),
                },
                Kind::InvalidValue(found, expected) => ConfigError::InvalidValue {
                    key: dotted,
                    detail: format!("found {found}, expected {expected}"),
                },
                _ => ConfigError::Other(error.to_string()),
            }
        })
        .collect()
}

fn locate(
    error: &figment::Error,
    section: Option<&str>,
    field: &str,
    sources: &[ConfigSource],
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let origin = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|s| s.file_path())
        .map(|p| p.display().to_string());

    let candidates = sources
        .iter()
        .filter(|s| origin.as_deref().is_none_or(|o| o == s.path));
    for source in candidates {
        if let Some(offset) = find_key_offset(&source.content, section, field) {
            return (
                Some(SourceSpan::new(offset.into(), field.len())),
                Some(NamedSource::new(source.path.clone(), source.content.clone())),
            );
        }
    }
    (None, None)
}

/// Byte offset of `field` as a key inside `[section]` (or the top level).
///
/// Walks the document line by line tracking the current table header, so a
/// same-named key in another table is never matched.
pub fn find_key_offset(content: &str, section: Option<&str>, field: &str) -> Option<usize> {
    let mut current: Option<&str> = None;
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let indent = line.len() - line.trim_start().len();
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            current = Some(header.trim());
        } else if current == section
            && let Some(rest) = trimmed.strip_prefix(field)
            && rest.trim_start().starts_with('=')
        {
            return Some(offset + indent);
        }
        offset += line.len();
    }
    None
}

/// Closest valid key to `unknown`, if any scores above the threshold.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Renders each diagnostic to stderr with miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = miette::GraphicalReportHandler::new();
    for error in errors {
        let mut out = String::new();
        match handler.render_report(&mut out, error as &dyn Diagnostic) {
            Ok(()) => eprint!("{out}"),
            Err(_) => eprintln!("error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIVE_KEYS: &[&str] = &["handshake_attempts", "backoff_base_ms", "page_size"];

    #[test]
    fn suggests_close_typos() {
        assert_eq!(suggest_key("page_sise", LIVE_KEYS).as_deref(), Some("page_size"));
        assert_eq!(
            suggest_key("handshake_atempts", LIVE_KEYS).as_deref(),
            Some("handshake_attempts")
        );
        assert_eq!(suggest_key("qqqq", LIVE_KEYS), None);
    }

    #[test]
    fn key_offset_respects_table_boundaries() {
        let content = "[logging]\npage_sise = 1\n\n[live]\n  page_sise = 10\n";
        let offset = find_key_offset(content, Some("live"), "page_sise").unwrap();
        assert_eq!(&content[offset..offset + 9], "page_sise");
        assert!(offset > content.find("[live]").unwrap());

        assert_eq!(find_key_offset(content, Some("notifications"), "page_sise"), None);
    }

    #[test]
    fn key_prefix_is_not_a_match() {
        let content = "[live]\npage_size_max = 3\n";
        assert_eq!(find_key_offset(content, Some("live"), "page_size"), None);
    }
}
