/*
 * Copyright (c) 2026. Busbar contributors
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! A small dynamically-typed value model for structured status records and
//! in-process event payloads.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A string-keyed map of [`Variant`] values.
///
/// Used as the value type of the structured status topic family and as the
/// payload of in-process reactor events. A `BTreeMap` keeps the serialized
/// form deterministic.
pub type VariantMap = BTreeMap<String, Variant>;

/// A dynamically-typed scalar.
///
/// The serialized form is the natural JSON value (`true`, `42`, `1.5`,
/// `"text"`), not a tagged enum, so callers on the other side of the bus see
/// plain JSON objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Variant {
    /// A boolean value.
    Bool(bool),
    /// A signed 64-bit integer.
    Int(i64),
    /// A double-precision float.
    Double(f64),
    /// A UTF-8 string.
    Str(String),
}

impl Variant {
    /// Returns the boolean value, if this variant holds one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value, if this variant holds one.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float value, if this variant holds one.
    #[must_use]
    pub const fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the string value, if this variant holds one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_serializes_untagged() {
        let mut map = VariantMap::new();
        map.insert("connected".to_string(), Variant::from(true));
        map.insert("name".to_string(), Variant::from("hdmi0"));
        map.insert("strength".to_string(), Variant::from(42));

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(
            json,
            r#"{"connected":true,"name":"hdmi0","strength":42}"#
        );
    }

    #[test]
    fn test_variant_round_trip() {
        let json = r#"{"a":1,"b":2.5,"c":"x","d":false}"#;
        let map: VariantMap = serde_json::from_str(json).unwrap();

        assert_eq!(map["a"].as_int(), Some(1));
        assert_eq!(map["b"].as_double(), Some(2.5));
        assert_eq!(map["c"].as_str(), Some("x"));
        assert_eq!(map["d"].as_bool(), Some(false));
    }

    #[test]
    fn test_variant_accessors_reject_wrong_type() {
        let v = Variant::from("text");
        assert!(v.as_bool().is_none());
        assert!(v.as_int().is_none());
        assert_eq!(v.as_str(), Some("text"));
    }
}
