//! Template token trees
//!
//! Workflow fields on the wire (env blocks, containers, step inputs, job
//! outputs) are polymorphic JSON trees: any node may be a literal, a
//! sequence, a mapping, or an unevaluated `${{ ... }}` expression. The
//! control plane encodes primitives bare and structured nodes as tagged
//! objects, so decoding tries bool, number, and string before falling back
//! to the structural form.

use serde::{Deserialize, Deserializer, Serialize};

/// Tag codes for [`TemplateToken::kind`].
pub mod token_kind {
    pub const STRING: i32 = 0;
    pub const SEQUENCE: i32 = 1;
    pub const MAPPING: i32 = 2;
    pub const EXPRESSION: i32 = 3;
    pub const DIRECTIVE: i32 = 4;
    pub const BOOLEAN: i32 = 5;
    pub const NUMBER: i32 = 6;
    pub const NULL: i32 = 7;
}

/// One node of a template token tree.
///
/// Exactly one payload field is populated for a given [`kind`](Self::kind);
/// the constructors below maintain that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TemplateToken {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i32>,
    #[serde(rename = "type")]
    pub kind: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bool: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directive: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<Vec<TemplateToken>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<Vec<MapEntry>>,
}

/// A key/value pair of a mapping token.
///
/// Mappings stay a list of pairs rather than a keyed map: the wire form
/// preserves insertion order and keys are tokens themselves, so they are
/// not necessarily strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapEntry {
    pub key: TemplateToken,
    pub value: TemplateToken,
}

/// Language-neutral object form of a token tree.
///
/// Mappings keep the list-of-pairs shape; key identity is value equality.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Sequence(Vec<RawValue>),
    Mapping(Vec<(RawValue, RawValue)>),
}

impl TemplateToken {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            kind: token_kind::STRING,
            lit: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            kind: token_kind::BOOLEAN,
            bool: Some(value),
            ..Default::default()
        }
    }

    pub fn number(value: f64) -> Self {
        Self {
            kind: token_kind::NUMBER,
            num: Some(value),
            ..Default::default()
        }
    }

    pub fn null() -> Self {
        Self {
            kind: token_kind::NULL,
            ..Default::default()
        }
    }

    pub fn expression(expr: impl Into<String>) -> Self {
        Self {
            kind: token_kind::EXPRESSION,
            expr: Some(expr.into()),
            ..Default::default()
        }
    }

    pub fn sequence(items: Vec<TemplateToken>) -> Self {
        Self {
            kind: token_kind::SEQUENCE,
            seq: Some(items),
            ..Default::default()
        }
    }

    pub fn mapping(entries: Vec<MapEntry>) -> Self {
        Self {
            kind: token_kind::MAPPING,
            map: Some(entries),
            ..Default::default()
        }
    }

    /// Builds a token tree from its language-neutral object form.
    pub fn from_raw(value: &RawValue) -> Self {
        match value {
            RawValue::Null => Self::null(),
            RawValue::Bool(b) => Self::boolean(*b),
            RawValue::Number(n) => Self::number(*n),
            RawValue::String(s) => Self::literal(s.clone()),
            RawValue::Sequence(items) => {
                Self::sequence(items.iter().map(Self::from_raw).collect())
            }
            RawValue::Mapping(entries) => Self::mapping(
                entries
                    .iter()
                    .map(|(k, v)| MapEntry {
                        key: Self::from_raw(k),
                        value: Self::from_raw(v),
                    })
                    .collect(),
            ),
        }
    }

    /// Converts the tree to its language-neutral object form.
    ///
    /// Expressions and directives collapse to their string spelling; an
    /// expression node renders as `${{<expr>}}`.
    pub fn to_raw(&self) -> RawValue {
        match self.kind {
            token_kind::STRING => RawValue::String(self.lit.clone().unwrap_or_default()),
            token_kind::SEQUENCE => RawValue::Sequence(
                self.seq
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(TemplateToken::to_raw)
                    .collect(),
            ),
            token_kind::MAPPING => RawValue::Mapping(
                self.map
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|e| (e.key.to_raw(), e.value.to_raw()))
                    .collect(),
            ),
            token_kind::EXPRESSION => RawValue::String(format!(
                "${{{{{}}}}}",
                self.expr.as_deref().unwrap_or_default()
            )),
            token_kind::DIRECTIVE => {
                RawValue::String(self.directive.clone().unwrap_or_default())
            }
            token_kind::BOOLEAN => RawValue::Bool(self.bool.unwrap_or_default()),
            token_kind::NUMBER => RawValue::Number(self.num.unwrap_or_default()),
            _ => RawValue::Null,
        }
    }

    /// Converts the tree to a YAML node for the workflow engine.
    ///
    /// Expressions keep their `${{<expr>}}` string form so the engine can
    /// evaluate them; a null token becomes a YAML null.
    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self.kind {
            token_kind::STRING => {
                serde_yaml::Value::String(self.lit.clone().unwrap_or_default())
            }
            token_kind::SEQUENCE => serde_yaml::Value::Sequence(
                self.seq
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(TemplateToken::to_yaml)
                    .collect(),
            ),
            token_kind::MAPPING => {
                let mut mapping = serde_yaml::Mapping::new();
                for entry in self.map.as_deref().unwrap_or_default() {
                    mapping.insert(entry.key.to_yaml(), entry.value.to_yaml());
                }
                serde_yaml::Value::Mapping(mapping)
            }
            token_kind::EXPRESSION => serde_yaml::Value::String(format!(
                "${{{{{}}}}}",
                self.expr.as_deref().unwrap_or_default()
            )),
            token_kind::DIRECTIVE => {
                serde_yaml::Value::String(self.directive.clone().unwrap_or_default())
            }
            token_kind::BOOLEAN => serde_yaml::Value::Bool(self.bool.unwrap_or_default()),
            token_kind::NUMBER => {
                serde_yaml::Value::Number(serde_yaml::Number::from(self.num.unwrap_or_default()))
            }
            _ => serde_yaml::Value::Null,
        }
    }

    fn from_wire(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Bool(b) => Ok(Self::boolean(b)),
            serde_json::Value::Number(n) => Ok(Self::number(n.as_f64().unwrap_or_default())),
            serde_json::Value::String(s) => Ok(Self::literal(s)),
            serde_json::Value::Null => Ok(Self::null()),
            serde_json::Value::Object(mut fields) => {
                let mut token = TemplateToken {
                    file_id: take_i32(&mut fields, "fileId"),
                    line: take_i32(&mut fields, "line"),
                    column: take_i32(&mut fields, "column"),
                    kind: take_i32(&mut fields, "type").unwrap_or(token_kind::STRING),
                    ..Default::default()
                };
                if let Some(serde_json::Value::Bool(b)) = fields.remove("bool") {
                    token.bool = Some(b);
                }
                if let Some(serde_json::Value::Number(n)) = fields.remove("num") {
                    token.num = n.as_f64();
                }
                if let Some(serde_json::Value::String(s)) = fields.remove("lit") {
                    token.lit = Some(s);
                }
                if let Some(serde_json::Value::String(s)) = fields.remove("expr") {
                    token.expr = Some(s);
                }
                if let Some(serde_json::Value::String(s)) = fields.remove("directive") {
                    token.directive = Some(s);
                }
                if let Some(serde_json::Value::Array(items)) = fields.remove("seq") {
                    let seq = items
                        .into_iter()
                        .map(Self::from_wire)
                        .collect::<Result<Vec<_>, _>>()?;
                    token.seq = Some(seq);
                }
                if let Some(serde_json::Value::Array(entries)) = fields.remove("map") {
                    let mut map = Vec::with_capacity(entries.len());
                    for entry in entries {
                        let serde_json::Value::Object(mut pair) = entry else {
                            return Err("mapping entry is not an object".to_string());
                        };
                        let key = pair
                            .remove("key")
                            .ok_or_else(|| "mapping entry without key".to_string())?;
                        let value = pair
                            .remove("value")
                            .ok_or_else(|| "mapping entry without value".to_string())?;
                        map.push(MapEntry {
                            key: Self::from_wire(key)?,
                            value: Self::from_wire(value)?,
                        });
                    }
                    token.map = Some(map);
                }
                Ok(token)
            }
            serde_json::Value::Array(_) => Err("template token cannot be a bare array".to_string()),
        }
    }
}

fn take_i32(fields: &mut serde_json::Map<String, serde_json::Value>, key: &str) -> Option<i32> {
    fields.remove(key).and_then(|v| v.as_i64()).map(|v| v as i32)
}

impl<'de> Deserialize<'de> for TemplateToken {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        TemplateToken::from_wire(value).map_err(serde::de::Error::custom)
    }
}

impl RawValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&[(RawValue, RawValue)]> {
        match self {
            RawValue::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    /// Converts to a JSON value with string-keyed objects.
    ///
    /// Fails on mappings whose keys are not strings and on non-finite
    /// numbers, neither of which JSON can express.
    pub fn into_json(self) -> Result<serde_json::Value, String> {
        match self {
            RawValue::Null => Ok(serde_json::Value::Null),
            RawValue::Bool(b) => Ok(serde_json::Value::Bool(b)),
            RawValue::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .ok_or_else(|| format!("number {n} is not representable in JSON")),
            RawValue::String(s) => Ok(serde_json::Value::String(s)),
            RawValue::Sequence(items) => {
                let items = items
                    .into_iter()
                    .map(RawValue::into_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(serde_json::Value::Array(items))
            }
            RawValue::Mapping(entries) => {
                let mut object = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries {
                    let RawValue::String(key) = key else {
                        return Err("mapping key is not a string".to_string());
                    };
                    object.insert(key, value.into_json()?);
                }
                Ok(serde_json::Value::Object(object))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_bare_primitives() {
        let token: TemplateToken = serde_json::from_str("true").unwrap();
        assert_eq!(token, TemplateToken::boolean(true));

        let token: TemplateToken = serde_json::from_str("42.5").unwrap();
        assert_eq!(token, TemplateToken::number(42.5));

        let token: TemplateToken = serde_json::from_str("\"echo hi\"").unwrap();
        assert_eq!(token, TemplateToken::literal("echo hi"));

        let token: TemplateToken = serde_json::from_str("null").unwrap();
        assert_eq!(token, TemplateToken::null());
    }

    #[test]
    fn test_decodes_structural_form() {
        let wire = r#"{
            "type": 2,
            "map": [
                {"key": "image", "value": "node:20"},
                {"key": {"type": 3, "expr": "matrix.os"}, "value": 14}
            ]
        }"#;
        let token: TemplateToken = serde_json::from_str(wire).unwrap();
        let entries = token.map.as_ref().unwrap();
        assert_eq!(token.kind, token_kind::MAPPING);
        assert_eq!(entries[0].key, TemplateToken::literal("image"));
        assert_eq!(entries[0].value, TemplateToken::literal("node:20"));
        assert_eq!(entries[1].key, TemplateToken::expression("matrix.os"));
        assert_eq!(entries[1].value, TemplateToken::number(14.0));
    }

    #[test]
    fn test_raw_round_trip() {
        let token = TemplateToken::mapping(vec![
            MapEntry {
                key: TemplateToken::literal("retries"),
                value: TemplateToken::number(3.0),
            },
            MapEntry {
                key: TemplateToken::literal("flags"),
                value: TemplateToken::sequence(vec![
                    TemplateToken::boolean(true),
                    TemplateToken::null(),
                    TemplateToken::literal("verbose"),
                ]),
            },
        ]);

        assert_eq!(TemplateToken::from_raw(&token.to_raw()), token);
    }

    #[test]
    fn test_expression_collapses_to_string_form() {
        let token = TemplateToken::expression("steps.build.outputs.artifact");
        assert_eq!(
            token.to_raw(),
            RawValue::String("${{steps.build.outputs.artifact}}".to_string())
        );
        assert_eq!(
            token.to_yaml(),
            serde_yaml::Value::String("${{steps.build.outputs.artifact}}".to_string())
        );
    }

    #[test]
    fn test_yaml_preserves_mapping_order() {
        let token = TemplateToken::mapping(vec![
            MapEntry {
                key: TemplateToken::literal("zeta"),
                value: TemplateToken::literal("1"),
            },
            MapEntry {
                key: TemplateToken::literal("alpha"),
                value: TemplateToken::literal("2"),
            },
        ]);
        let serde_yaml::Value::Mapping(mapping) = token.to_yaml() else {
            panic!("expected a mapping");
        };
        let keys: Vec<_> = mapping.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                serde_yaml::Value::String("zeta".to_string()),
                serde_yaml::Value::String("alpha".to_string()),
            ]
        );
    }

    #[test]
    fn test_into_json_rejects_non_string_keys() {
        let raw = RawValue::Mapping(vec![(
            RawValue::Number(1.0),
            RawValue::String("x".to_string()),
        )]);
        assert!(raw.into_json().is_err());

        let raw = RawValue::Mapping(vec![(
            RawValue::String("port".to_string()),
            RawValue::Number(8080.0),
        )]);
        assert_eq!(
            raw.into_json().unwrap(),
            serde_json::json!({"port": 8080.0})
        );
    }
}
