// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Typed, ordered key/value maps attached to services and components.
//!
//! Values keep the type they were stored with. The typed getters
//! (`get_as_long`, `get_as_version`, ...) convert on the fly when the stored
//! value is a string, and fall back to the caller's default otherwise.

use crate::error::{FrameworkError, Result};
use crate::version::Version;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A single typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A UTF-8 string.
    String(String),
    /// A signed 64-bit integer.
    Long(i64),
    /// A 64-bit float.
    Double(f64),
    /// A boolean.
    Bool(bool),
    /// A semantic version.
    Version(Version),
}

impl PropertyValue {
    /// Returns a short name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "string",
            PropertyValue::Long(_) => "long",
            PropertyValue::Double(_) => "double",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Version(_) => "version",
        }
    }

    /// Interprets the value as a long, parsing strings.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            PropertyValue::Long(v) => Some(*v),
            PropertyValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Interprets the value as a double, parsing strings and widening longs.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            PropertyValue::Double(v) => Some(*v),
            PropertyValue::Long(v) => Some(*v as f64),
            PropertyValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Interprets the value as a bool, parsing `true`/`false` case-insensitively.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            PropertyValue::String(s) => parse_bool(s),
            _ => None,
        }
    }

    /// Interprets the value as a version, parsing strings.
    pub fn as_version(&self) -> Option<Version> {
        match self {
            PropertyValue::Version(v) => Some(v.clone()),
            PropertyValue::String(s) => Version::parse(s).ok(),
            _ => None,
        }
    }
}

pub(crate) fn parse_bool(text: &str) -> Option<bool> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(v) => f.write_str(v),
            PropertyValue::Long(v) => write!(f, "{v}"),
            PropertyValue::Double(v) => write!(f, "{v}"),
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Version(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Long(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Long(i64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<Version> for PropertyValue {
    fn from(value: Version) -> Self {
        PropertyValue::Version(value)
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PropertyValue::String(v) => serializer.serialize_str(v),
            PropertyValue::Long(v) => serializer.serialize_i64(*v),
            PropertyValue::Double(v) => serializer.serialize_f64(*v),
            PropertyValue::Bool(v) => serializer.serialize_bool(*v),
            PropertyValue::Version(v) => serializer.collect_str(v),
        }
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        PropertyValue::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<serde_json::Value> for PropertyValue {
    type Error = FrameworkError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;
        match value {
            Value::String(s) => Ok(PropertyValue::String(s)),
            Value::Bool(b) => Ok(PropertyValue::Bool(b)),
            Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Ok(PropertyValue::Long(v))
                } else if let Some(v) = n.as_f64() {
                    Ok(PropertyValue::Double(v))
                } else {
                    Err(FrameworkError::illegal_argument(format!(
                        "number {n} does not fit a property value"
                    )))
                }
            }
            other => Err(FrameworkError::illegal_argument(format!(
                "unsupported property value {other}"
            ))),
        }
    }
}

/// An ordered map from string keys to typed values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: BTreeMap<String, PropertyValue>,
}

impl Properties {
    /// Creates an empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Stores `value` under `key`, returning the value it replaces.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Stores `value` only if `key` is not present yet.
    pub fn set_if_absent(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.entries.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Returns the raw value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    /// Returns the value under `key` rendered as a string.
    pub fn get_as_string(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(ToString::to_string)
    }

    /// Returns the value under `key` as a long, or `default`.
    pub fn get_as_long(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(PropertyValue::as_long).unwrap_or(default)
    }

    /// Returns the value under `key` as a double, or `default`.
    pub fn get_as_double(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(PropertyValue::as_double).unwrap_or(default)
    }

    /// Returns the value under `key` as a bool, or `default`.
    pub fn get_as_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(PropertyValue::as_bool).unwrap_or(default)
    }

    /// Returns the value under `key` as a version, if it is or parses as one.
    pub fn get_as_version(&self, key: &str) -> Option<Version> {
        self.get(key).and_then(PropertyValue::as_version)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(key)
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copies every entry of `other` into `self`, overwriting duplicates.
    pub fn extend_from(&mut self, other: &Properties) {
        for (key, value) in other.iter() {
            self.entries.insert(key.to_string(), value.clone());
        }
    }

    /// Serialises the properties to a JSON object.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FrameworkError::illegal_argument(format!("cannot encode properties: {e}")))
    }

    /// Parses a JSON object into properties.
    ///
    /// Integers become `Long`, other numbers `Double`, booleans `Bool` and
    /// strings stay strings; nested arrays and objects are rejected.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| FrameworkError::illegal_argument(format!("cannot decode properties: {e}")))
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (key, value) in iter {
            props.set(key, value);
        }
        props
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Properties {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let entries = BTreeMap::<String, PropertyValue>::deserialize(deserializer)?;
        Ok(Properties { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_keep_their_type() {
        let props = Properties::new()
            .with("name", "calc")
            .with("ranking", 10)
            .with("ratio", 0.5)
            .with("enabled", true)
            .with("version", Version::new(1, 2, 3));

        assert_eq!(props.get("name").unwrap().type_name(), "string");
        assert_eq!(props.get("ranking").unwrap().type_name(), "long");
        assert_eq!(props.get("ratio").unwrap().type_name(), "double");
        assert_eq!(props.get("enabled").unwrap().type_name(), "bool");
        assert_eq!(props.get("version").unwrap().type_name(), "version");
        assert_eq!(props.len(), 5);
    }

    #[test]
    fn test_typed_getters_convert_strings() {
        let props = Properties::new()
            .with("a", "42")
            .with("b", "2.5")
            .with("c", "TRUE")
            .with("d", "1.5.0")
            .with("e", "not-a-number");

        assert_eq!(props.get_as_long("a", -1), 42);
        assert_eq!(props.get_as_double("b", 0.0), 2.5);
        assert!(props.get_as_bool("c", false));
        assert_eq!(props.get_as_version("d"), Some(Version::new(1, 5, 0)));
        assert_eq!(props.get_as_long("e", -1), -1);
        assert_eq!(props.get_as_long("missing", 7), 7);
        assert_eq!(props.get_as_string("e").as_deref(), Some("not-a-number"));
    }

    #[test]
    fn test_set_if_absent_keeps_existing() {
        let mut props = Properties::new().with("k", "v1");
        props.set_if_absent("k", "v2");
        props.set_if_absent("other", 3);
        assert_eq!(props.get_as_string("k").as_deref(), Some("v1"));
        assert_eq!(props.get_as_long("other", 0), 3);
    }

    #[test]
    fn test_iteration_is_key_ordered() {
        let props: Properties = vec![("b", 2), ("a", 1), ("c", 3)].into_iter().collect();
        let keys: Vec<_> = props.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_json_round_trip_keeps_scalar_types() {
        let props = Properties::new()
            .with("name", "calc")
            .with("ranking", 10)
            .with("ratio", 0.25)
            .with("enabled", false);
        let json = props.to_json_string().unwrap();
        let decoded = Properties::from_json_str(&json).unwrap();
        assert_eq!(decoded, props);
    }

    #[test]
    fn test_json_versions_load_back_as_strings() {
        let props = Properties::new().with("service.version", Version::new(1, 0, 0));
        let decoded = Properties::from_json_str(&props.to_json_string().unwrap()).unwrap();
        assert_eq!(
            decoded.get("service.version"),
            Some(&PropertyValue::String("1.0.0".into()))
        );
        assert_eq!(decoded.get_as_version("service.version"), Some(Version::new(1, 0, 0)));
    }

    #[test]
    fn test_json_rejects_nested_values() {
        assert!(Properties::from_json_str(r#"{"a": [1, 2]}"#).is_err());
        assert!(Properties::from_json_str("not json").is_err());
    }
}
