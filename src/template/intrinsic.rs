//! Template values and intrinsic functions
//!
//! A [`Value`] is either a literal known at synthesis time or an expression the
//! provisioning engine resolves at deploy time (`Ref`, `Fn::GetAtt`, ...).
//! Cross-resource wiring always goes through these expressions so the
//! rendered templates never embed identifiers that only exist after deploy.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// Pseudo parameters supplied by the provisioning engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PseudoParameter {
    /// `AWS::AccountId`
    AccountId,
    /// `AWS::Region`
    Region,
    /// `AWS::Partition`
    Partition,
}

impl PseudoParameter {
    /// Engine-side name of the parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountId => "AWS::AccountId",
            Self::Region => "AWS::Region",
            Self::Partition => "AWS::Partition",
        }
    }
}

impl fmt::Display for PseudoParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A template value: literal string or deploy-time expression
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Plain string known at synthesis time
    Literal(String),
    /// `{"Ref": "<LogicalId>"}`, also used for pseudo parameters
    Ref(String),
    /// `{"Fn::GetAtt": ["<LogicalId>", "<Attribute>"]}`
    GetAtt(String, String),
    /// `{"Fn::Sub": "<pattern>"}`
    Sub(String),
    /// `{"Fn::ImportValue": "<ExportName>"}`
    ImportValue(String),
    /// `{"Fn::Select": [index, {"Fn::GetAZs": ""}]}`
    AvailabilityZone(usize),
    /// `{"Fn::Base64": <value>}`
    Base64(Box<Value>),
}

impl Value {
    /// Literal string value
    pub fn literal(s: impl Into<String>) -> Self {
        Self::Literal(s.into())
    }

    /// Reference to another resource in the same template
    pub fn reference(logical_id: impl Into<String>) -> Self {
        Self::Ref(logical_id.into())
    }

    /// Attribute of another resource in the same template
    pub fn get_att(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::GetAtt(logical_id.into(), attribute.into())
    }

    /// String substitution pattern
    pub fn sub(pattern: impl Into<String>) -> Self {
        Self::Sub(pattern.into())
    }

    /// Value exported by another stack
    pub fn import(export_name: impl Into<String>) -> Self {
        Self::ImportValue(export_name.into())
    }

    /// Pseudo parameter reference
    pub fn pseudo(param: PseudoParameter) -> Self {
        Self::Ref(param.as_str().to_string())
    }

    /// Base64-encode a value at deploy time
    pub fn base64(inner: Value) -> Self {
        Self::Base64(Box::new(inner))
    }

    /// Literal contents, if any
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Self::Literal(s) => Some(s),
            _ => None,
        }
    }

    /// Render as a JSON value for embedding into `serde_json::json!` bodies
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Literal(s) => serde_json::Value::String(s.clone()),
            Self::Ref(id) => serde_json::json!({ "Ref": id }),
            Self::GetAtt(id, attr) => serde_json::json!({ "Fn::GetAtt": [id, attr] }),
            Self::Sub(pattern) => serde_json::json!({ "Fn::Sub": pattern }),
            Self::ImportValue(name) => serde_json::json!({ "Fn::ImportValue": name }),
            Self::AvailabilityZone(index) => {
                serde_json::json!({ "Fn::Select": [index, { "Fn::GetAZs": "" }] })
            }
            Self::Base64(inner) => serde_json::json!({ "Fn::Base64": inner.to_json() }),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Literal(s) => serializer.serialize_str(s),
            other => {
                // Every intrinsic is a single-key object
                let json = other.to_json();
                let obj = json.as_object().cloned().unwrap_or_default();
                let mut map = serializer.serialize_map(Some(obj.len()))?;
                for (k, v) in &obj {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Literal(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Literal(s)
    }
}
