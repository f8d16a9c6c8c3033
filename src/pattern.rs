//! Pattern records as stored in chunk files and the per-model property summaries.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;
use utoipa::ToSchema;

/// A mined sequence of events and its counts.
///
/// Histograms and the other mined statistics are not interpreted by the server, they are kept
/// as-is in `properties` so a re-encoded pattern carries everything the file had.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(rename = "en")]
    pub event_names: Vec<String>,
    #[serde(rename = "c", default)]
    pub per_occurrence_count: u64,
    #[serde(rename = "uc", default)]
    pub total_user_count: u64,
    #[serde(rename = "ouc", default)]
    pub per_user_count: u64,
    #[serde(flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Raw JSON body of a pattern, decoded on first use.
#[derive(Debug, Clone)]
pub struct LazyPattern {
    raw: Box<RawValue>,
    decoded: OnceLock<Pattern>,
}

impl LazyPattern {
    pub fn new(raw: Box<RawValue>) -> Self {
        Self {
            raw,
            decoded: OnceLock::new(),
        }
    }

    pub fn raw(&self) -> &RawValue {
        &self.raw
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded.get().is_some()
    }

    /// Decodes the body once, later calls return the cached value.
    ///
    /// A failed decode is not cached, the next call retries.
    pub fn decode(&self) -> Result<&Pattern, serde_json::Error> {
        if let Some(pattern) = self.decoded.get() {
            return Ok(pattern);
        }

        let pattern: Pattern = serde_json::from_str(self.raw.get())?;
        Ok(self.decoded.get_or_init(|| pattern))
    }
}

impl Serialize for LazyPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LazyPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Box::<RawValue>::deserialize(deserializer).map(LazyPattern::new)
    }
}

/// One line of a chunk file: the event names, decoded eagerly for filtering, and the full body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternWithMeta {
    #[serde(rename = "pe")]
    pub pattern_events: Vec<String>,
    #[serde(rename = "rp")]
    pub raw_pattern: LazyPattern,
}

/// Go-style `map[string]bool` sets, only `true` entries are members.
mod bool_map {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::{BTreeMap, BTreeSet};

    pub fn serialize<S: Serializer>(
        set: &BTreeSet<String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        set.iter()
            .map(|key| (key.as_str(), true))
            .collect::<BTreeMap<_, _>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeSet<String>, D::Error> {
        let map = Option::<BTreeMap<String, bool>>::deserialize(deserializer)?.unwrap_or_default();
        Ok(map
            .into_iter()
            .filter_map(|(key, present)| present.then_some(key))
            .collect())
    }

    pub mod nested {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::collections::{BTreeMap, BTreeSet};

        pub fn serialize<S: Serializer>(
            sets: &BTreeMap<String, BTreeSet<String>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            sets.iter()
                .map(|(key, values)| {
                    let values: BTreeMap<_, _> =
                        values.iter().map(|value| (value.as_str(), true)).collect();
                    (key.as_str(), values)
                })
                .collect::<BTreeMap<_, _>>()
                .serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<BTreeMap<String, BTreeSet<String>>, D::Error> {
            let map = Option::<BTreeMap<String, BTreeMap<String, bool>>>::deserialize(deserializer)?
                .unwrap_or_default();
            Ok(map
                .into_iter()
                .map(|(key, values)| {
                    let values = values
                        .into_iter()
                        .filter_map(|(value, present)| present.then_some(value))
                        .collect();
                    (key, values)
                })
                .collect())
        }
    }
}

/// Property keys seen for an event (or for users) and the distinct values of categorical keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct PropertiesInfo {
    #[serde(with = "bool_map", default)]
    #[schema(value_type = Object)]
    pub numeric_property_keys: BTreeSet<String>,
    #[serde(with = "bool_map::nested", default)]
    #[schema(value_type = Object)]
    pub categorical_property_key_values: BTreeMap<String, BTreeSet<String>>,
}

impl PropertiesInfo {
    pub fn categorical_property_keys(&self) -> Vec<String> {
        self.categorical_property_key_values.keys().cloned().collect()
    }

    pub fn numeric_property_keys(&self) -> Vec<String> {
        self.numeric_property_keys.iter().cloned().collect()
    }

    /// Distinct values recorded for a categorical key, empty when the key was never seen.
    pub fn values_of(&self, property_name: &str) -> Vec<String> {
        self.categorical_property_key_values
            .get(property_name)
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Per-model summary of the user and event properties seen while mining.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct UserAndEventsInfo {
    #[serde(default)]
    pub user_properties_info: PropertiesInfo,
    #[serde(default)]
    pub event_properties_info_map: BTreeMap<String, PropertiesInfo>,
    #[serde(default)]
    pub model_version: i64,
}
