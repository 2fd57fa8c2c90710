//! Pipeline context data
//!
//! The `github`, `needs`, and `matrix` contexts travel as a compact tagged
//! tree: primitives are encoded bare, structured values as objects with
//! single-letter fields. Dictionaries are a list of `{k,v}` pairs at rest.

use serde::{Deserialize, Deserializer, Serialize};

/// Tag codes for [`PipelineContextData::kind`].
pub mod context_kind {
    pub const STRING: i32 = 0;
    pub const ARRAY: i32 = 1;
    pub const DICTIONARY: i32 = 2;
    pub const BOOLEAN: i32 = 3;
    pub const NUMBER: i32 = 4;
}

/// One node of a pipeline context tree.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct PipelineContextData {
    #[serde(rename = "t", skip_serializing_if = "Option::is_none")]
    pub kind: Option<i32>,
    #[serde(rename = "b", skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,
    #[serde(rename = "n", skip_serializing_if = "Option::is_none")]
    pub number_value: Option<f64>,
    #[serde(rename = "s", skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(rename = "a", skip_serializing_if = "Option::is_none")]
    pub array_value: Option<Vec<PipelineContextData>>,
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    pub dictionary_value: Option<Vec<DictionaryPair>>,
}

/// A dictionary entry; keys are always strings here, unlike template tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryPair {
    #[serde(rename = "k")]
    pub key: String,
    #[serde(rename = "v")]
    pub value: PipelineContextData,
}

impl PipelineContextData {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            kind: Some(context_kind::STRING),
            string_value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            kind: Some(context_kind::BOOLEAN),
            bool_value: Some(value),
            ..Default::default()
        }
    }

    pub fn number(value: f64) -> Self {
        Self {
            kind: Some(context_kind::NUMBER),
            number_value: Some(value),
            ..Default::default()
        }
    }

    pub fn array(items: Vec<PipelineContextData>) -> Self {
        Self {
            kind: Some(context_kind::ARRAY),
            array_value: Some(items),
            ..Default::default()
        }
    }

    pub fn dictionary(pairs: Vec<(String, PipelineContextData)>) -> Self {
        Self {
            kind: Some(context_kind::DICTIONARY),
            dictionary_value: Some(
                pairs
                    .into_iter()
                    .map(|(key, value)| DictionaryPair { key, value })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    /// Converts the tree to a plain JSON value.
    ///
    /// Dictionaries become string-keyed objects; an untagged node is null.
    pub fn to_json(&self) -> serde_json::Value {
        match self.kind {
            Some(context_kind::STRING) => {
                serde_json::Value::String(self.string_value.clone().unwrap_or_default())
            }
            Some(context_kind::ARRAY) => serde_json::Value::Array(
                self.array_value
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(PipelineContextData::to_json)
                    .collect(),
            ),
            Some(context_kind::DICTIONARY) => {
                let mut object = serde_json::Map::new();
                for pair in self.dictionary_value.as_deref().unwrap_or_default() {
                    object.insert(pair.key.clone(), pair.value.to_json());
                }
                serde_json::Value::Object(object)
            }
            Some(context_kind::BOOLEAN) => {
                serde_json::Value::Bool(self.bool_value.unwrap_or_default())
            }
            Some(context_kind::NUMBER) => serde_json::Number::from_f64(
                self.number_value.unwrap_or_default(),
            )
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
            _ => serde_json::Value::Null,
        }
    }

    fn from_wire(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Bool(b) => Ok(Self::boolean(b)),
            serde_json::Value::Number(n) => Ok(Self::number(n.as_f64().unwrap_or_default())),
            serde_json::Value::String(s) => Ok(Self::string(s)),
            serde_json::Value::Null => Ok(Self::default()),
            serde_json::Value::Object(mut fields) => {
                let mut data = PipelineContextData {
                    kind: fields.remove("t").and_then(|v| v.as_i64()).map(|v| v as i32),
                    ..Default::default()
                };
                if let Some(serde_json::Value::Bool(b)) = fields.remove("b") {
                    data.bool_value = Some(b);
                }
                if let Some(serde_json::Value::Number(n)) = fields.remove("n") {
                    data.number_value = n.as_f64();
                }
                if let Some(serde_json::Value::String(s)) = fields.remove("s") {
                    data.string_value = Some(s);
                }
                if let Some(serde_json::Value::Array(items)) = fields.remove("a") {
                    let items = items
                        .into_iter()
                        .map(Self::from_wire)
                        .collect::<Result<Vec<_>, _>>()?;
                    data.array_value = Some(items);
                }
                if let Some(serde_json::Value::Array(pairs)) = fields.remove("d") {
                    let mut dictionary = Vec::with_capacity(pairs.len());
                    for pair in pairs {
                        let serde_json::Value::Object(mut entry) = pair else {
                            return Err("dictionary entry is not an object".to_string());
                        };
                        let Some(serde_json::Value::String(key)) = entry.remove("k") else {
                            return Err("dictionary entry without string key".to_string());
                        };
                        let value = entry
                            .remove("v")
                            .ok_or_else(|| "dictionary entry without value".to_string())?;
                        dictionary.push(DictionaryPair {
                            key,
                            value: Self::from_wire(value)?,
                        });
                    }
                    data.dictionary_value = Some(dictionary);
                }
                Ok(data)
            }
            serde_json::Value::Array(_) => {
                Err("context data cannot be a bare array".to_string())
            }
        }
    }
}

impl<'de> Deserialize<'de> for PipelineContextData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        PipelineContextData::from_wire(value).map_err(serde::de::Error::custom)
    }
}
