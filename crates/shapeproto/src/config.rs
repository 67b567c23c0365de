// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine configuration.
//!
//! Supports both programmatic and file-based configuration.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Policy for input keys that match no declared record field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFields {
    /// Drop them silently.
    #[default]
    Ignore,
    /// Fail coercion and validation.
    Forbid,
}

/// Spelling applied to record keys on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyCase {
    /// `user_name`
    Snake,
    /// `userName`
    Camel,
    /// `UserName`
    Pascal,
    /// `user-name`
    Kebab,
}

impl KeyCase {
    /// Respell `name` in this case.
    pub fn apply(self, name: &str) -> String {
        let words = split_words(name);
        match self {
            KeyCase::Snake => join_lower(&words, "_"),
            KeyCase::Kebab => join_lower(&words, "-"),
            KeyCase::Pascal => words.iter().map(|w| capitalize(w)).collect(),
            KeyCase::Camel => words
                .iter()
                .enumerate()
                .map(|(i, w)| if i == 0 { w.to_lowercase() } else { capitalize(w) })
                .collect(),
        }
    }
}

/// Split on separators and on lower-to-upper transitions.
fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut after_lower = false;
    for c in name.chars() {
        if matches!(c, '_' | '-' | ' ') {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            after_lower = false;
            continue;
        }
        if c.is_uppercase() && after_lower {
            words.push(std::mem::take(&mut current));
        }
        after_lower = c.is_lowercase() || c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn join_lower(words: &[String], separator: &str) -> String {
    words
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(separator)
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Unknown record keys policy.
    #[serde(default)]
    pub unknown_fields: UnknownFields,

    /// Parse numbers from strings, floats and booleans.
    #[serde(default = "default_true")]
    pub lenient_numbers: bool,

    /// Serialization drops record fields whose value is null.
    #[serde(default)]
    pub omit_none: bool,

    /// Serialization drops record fields equal to any of these values.
    #[serde(default)]
    pub omit_values: Vec<serde_json::Value>,

    /// Case applied to record keys without an explicit rename.
    #[serde(default)]
    pub output_case: Option<KeyCase>,

    /// Largest union accepted by the compiler.
    #[serde(default = "default_max_union_candidates")]
    pub max_union_candidates: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_union_candidates() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unknown_fields: UnknownFields::Ignore,
            lenient_numbers: true,
            omit_none: false,
            omit_values: Vec::new(),
            output_case: None,
            max_union_candidates: default_max_union_candidates(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_union_candidates == 0 {
            return Err(ConfigError::Invalid(
                "max_union_candidates must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn forbid_unknown_fields(mut self) -> Self {
        self.unknown_fields = UnknownFields::Forbid;
        self
    }

    pub fn strict_numbers(mut self) -> Self {
        self.lenient_numbers = false;
        self
    }

    pub fn omit_none(mut self, omit: bool) -> Self {
        self.omit_none = omit;
        self
    }

    /// Also omit fields equal to `value` on serialize.
    pub fn omit_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.omit_values.push(value.into());
        self
    }

    pub fn output_case(mut self, case: KeyCase) -> Self {
        self.output_case = Some(case);
        self
    }

    pub fn max_union_candidates(mut self, max: usize) -> Self {
        self.max_union_candidates = max;
        self
    }

    pub(crate) fn forbids_unknown(&self) -> bool {
        self.unknown_fields == UnknownFields::Forbid
    }

    /// Values a record serializer leaves out.
    pub(crate) fn omitted(&self) -> Vec<Value> {
        let mut omitted: Vec<Value> = self.omit_values.iter().cloned().map(Value::from).collect();
        if self.omit_none && !omitted.contains(&Value::Null) {
            omitted.push(Value::Null);
        }
        omitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.unknown_fields, UnknownFields::Ignore);
        assert!(config.lenient_numbers);
        assert!(!config.omit_none);
        assert_eq!(config.max_union_candidates, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
unknown_fields = "forbid"
omit_none = true
"#,
        )
        .expect("parse");
        assert!(config.forbids_unknown());
        assert!(config.omit_none);
        assert!(config.lenient_numbers);
    }

    #[test]
    fn test_zero_union_limit_rejected() {
        let err = EngineConfig::from_toml_str("max_union_candidates = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let err = EngineConfig::from_toml_str(r#"unknown_fields = "maybe""#).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_builder_setters() {
        let config = EngineConfig::default()
            .forbid_unknown_fields()
            .strict_numbers()
            .omit_none(true)
            .max_union_candidates(4);
        assert!(config.forbids_unknown());
        assert!(!config.lenient_numbers);
        assert_eq!(config.max_union_candidates, 4);
    }

    #[test]
    fn test_key_case() {
        assert_eq!(KeyCase::Camel.apply("user_name"), "userName");
        assert_eq!(KeyCase::Pascal.apply("user_name"), "UserName");
        assert_eq!(KeyCase::Kebab.apply("user_name"), "user-name");
        assert_eq!(KeyCase::Snake.apply("userName"), "user_name");
        assert_eq!(KeyCase::Camel.apply("id"), "id");
        assert_eq!(KeyCase::Snake.apply("sensor2Id"), "sensor2_id");
    }

    #[test]
    fn test_omit_values_and_case_from_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
omit_none = true
omit_values = [0, ""]
output_case = "camel"
"#,
        )
        .expect("parse");
        assert_eq!(config.output_case, Some(KeyCase::Camel));
        assert_eq!(
            config.omitted(),
            vec![Value::Int(0), Value::from(""), Value::Null]
        );
    }
}
