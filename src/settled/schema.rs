//! Declared setting shapes and validation.
//!
//! A [`Schema`] maps top-level setting keys to a [`SettingSchema`] entry:
//! declared type, default value, and an optional numeric range. Validation
//! never fails a write; invalid values are replaced by the entry's default
//! and reported as [`ValidationWarning`] data; logging them is the caller's
//! concern. Keys not covered by the schema pass through untouched, so newer
//! persisted data survives older schemas.

use crate::value::{deep_copy, deep_merge, value_kind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of a setting value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    StringOrNull,
}

impl SettingType {
    /// Whether `value`'s runtime type matches. Objects reject arrays and
    /// `null`; `StringOrNull` accepts both strings and `null`.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            SettingType::String => value.is_string(),
            SettingType::Number => value.is_number(),
            SettingType::Boolean => value.is_boolean(),
            SettingType::Array => value.is_array(),
            SettingType::Object => value.is_object(),
            SettingType::StringOrNull => value.is_string() || value.is_null(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettingType::String => "string",
            SettingType::Number => "number",
            SettingType::Boolean => "boolean",
            SettingType::Array => "array",
            SettingType::Object => "object",
            SettingType::StringOrNull => "stringOrNull",
        }
    }
}

/// One schema entry: declared type, default, optional inclusive range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingSchema {
    #[serde(rename = "type")]
    pub setting_type: SettingType,
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// For object entries: deep-merge a loaded value over the default
    /// object, so members missing from old persisted data pick up their
    /// defaults. Applies to full validation only, never to incremental
    /// writes.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub merge_defaults: bool,
}

impl SettingSchema {
    pub fn new(setting_type: SettingType, default: Value) -> Self {
        Self {
            setting_type,
            default,
            min: None,
            max: None,
            merge_defaults: false,
        }
    }

    pub fn string(default: &str) -> Self {
        Self::new(SettingType::String, Value::String(default.to_string()))
    }

    pub fn number(default: impl Into<serde_json::Number>) -> Self {
        Self::new(SettingType::Number, Value::Number(default.into()))
    }

    pub fn boolean(default: bool) -> Self {
        Self::new(SettingType::Boolean, Value::Bool(default))
    }

    pub fn array(default: Value) -> Self {
        Self::new(SettingType::Array, default)
    }

    pub fn object(default: Value) -> Self {
        Self::new(SettingType::Object, default)
    }

    pub fn string_or_null(default: Value) -> Self {
        Self::new(SettingType::StringOrNull, default)
    }

    /// Inclusive numeric bounds; checked only for number values.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_merged_defaults(mut self) -> Self {
        self.merge_defaults = true;
        self
    }
}

/// The full declared shape: one entry per top-level setting key.
///
/// Read-only at runtime; built once by the embedding application (or
/// deserialized from a JSON document of `{key: entry}` form).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(flatten)]
    entries: BTreeMap<String, SettingSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, entry: SettingSchema) -> Self {
        self.entries.insert(key.into(), entry);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: SettingSchema) {
        self.entries.insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<&SettingSchema> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingSchema)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A fresh snapshot holding every entry's default.
    pub fn defaults(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), deep_copy(&entry.default)))
            .collect()
    }
}

/// Result of validating a single value against one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub valid: bool,
    pub value: Value,
}

/// One rejected value, already substituted by its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub key: String,
    pub detail: String,
}

impl ValidationWarning {
    fn new(key: &str, detail: String) -> Self {
        Self {
            key: key.to_string(),
            detail,
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid setting \"{}\": {}. Using default.",
            self.key, self.detail
        )
    }
}

/// Sanitized snapshot plus everything that had to be defaulted.
#[derive(Debug, Clone, Default)]
pub struct ValidatedSettings {
    pub settings: Map<String, Value>,
    pub warnings: Vec<ValidationWarning>,
}

enum Violation {
    TypeMismatch,
    OutOfRange(f64),
}

fn check(value: &Value, entry: &SettingSchema) -> Option<Violation> {
    if !entry.setting_type.accepts(value) {
        return Some(Violation::TypeMismatch);
    }
    if let Some(n) = value.as_f64() {
        if entry.min.is_some_and(|min| n < min) || entry.max.is_some_and(|max| n > max) {
            return Some(Violation::OutOfRange(n));
        }
    }
    None
}

fn describe(violation: &Violation, value: &Value, entry: &SettingSchema) -> String {
    match violation {
        Violation::TypeMismatch => format!(
            "expected {}, got {}",
            entry.setting_type.name(),
            value_kind(value)
        ),
        Violation::OutOfRange(n) => {
            let min = entry.min.map_or("..".to_string(), |m| m.to_string());
            let max = entry.max.map_or("..".to_string(), |m| m.to_string());
            format!("expected number in [{min}, {max}], got {n}")
        }
    }
}

/// Validate one value against one entry. A missing value, a type mismatch,
/// or an out-of-range number all yield `{valid: false, value: default}`.
pub fn validate_one(value: Option<&Value>, entry: &SettingSchema) -> Validated {
    match value {
        Some(v) if check(v, entry).is_none() => Validated {
            valid: true,
            value: deep_copy(v),
        },
        _ => Validated {
            valid: false,
            value: deep_copy(&entry.default),
        },
    }
}

/// Validate a whole raw snapshot. Every schema key ends up present: missing
/// keys default silently, invalid values default with a warning, valid
/// values are deep-copied (merged over the entry default when the entry
/// asks for it). Keys outside the schema pass through unchanged.
pub fn validate_full(raw: &Map<String, Value>, schema: &Schema) -> ValidatedSettings {
    let mut result = ValidatedSettings::default();

    for (key, entry) in schema.iter() {
        match raw.get(key) {
            None => {
                result.settings.insert(key.to_string(), deep_copy(&entry.default));
            }
            Some(value) => match check(value, entry) {
                Some(violation) => {
                    result
                        .warnings
                        .push(ValidationWarning::new(key, describe(&violation, value, entry)));
                    result.settings.insert(key.to_string(), deep_copy(&entry.default));
                }
                None => {
                    let sanitized = if entry.merge_defaults && entry.default.is_object() {
                        deep_merge(&entry.default, value)
                    } else {
                        deep_copy(value)
                    };
                    result.settings.insert(key.to_string(), sanitized);
                }
            },
        }
    }

    for (key, value) in raw {
        if !schema.contains_key(key) {
            result.settings.insert(key.clone(), deep_copy(value));
        }
    }

    result
}

/// Validate only the keys present in `updates`, so incremental writes can
/// be sanitized without touching unrelated state. Unknown keys pass through
/// unchanged.
pub fn validate_partial(updates: &Map<String, Value>, schema: &Schema) -> ValidatedSettings {
    let mut result = ValidatedSettings::default();

    for (key, value) in updates {
        match schema.get(key) {
            None => {
                result.settings.insert(key.clone(), deep_copy(value));
            }
            Some(entry) => match check(value, entry) {
                Some(violation) => {
                    result
                        .warnings
                        .push(ValidationWarning::new(key, describe(&violation, value, entry)));
                    result.settings.insert(key.clone(), deep_copy(&entry.default));
                }
                None => {
                    result.settings.insert(key.clone(), deep_copy(value));
                }
            },
        }
    }

    result
}
