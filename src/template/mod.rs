//! Provisioning-engine templates
//!
//! This module turns typed resource descriptions into CloudFormation
//! documents. Each resource type implements [`CfnResource`]; a [`Template`]
//! collects them under their logical IDs together with parameters and
//! outputs, and serializes to JSON or YAML.
//!
//! # Usage
//!
//! ```text
//! let mut template = Template::new("Proxy service");
//! template.add_resource(&cluster)?;
//! let json = template.to_json()?;
//! ```

mod intrinsic;
mod renderer;

pub use intrinsic::{PseudoParameter, Value};
pub use renderer::{render, OutputFormat, StackTemplate, PROXY_STACK_NAME, VPC_STACK_NAME};

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::{Error, Result};

/// Template format version understood by the provisioning engine
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// What the engine does with a resource when it leaves the template
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// Delete the physical resource
    #[default]
    Destroy,
}

impl RemovalPolicy {
    /// Engine-side policy name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Destroy => "Delete",
        }
    }
}

/// A resource that can be placed into a template
///
/// Implementors describe themselves; cross-resource wiring happens through
/// [`Value`] expressions inside [`CfnResource::properties`].
pub trait CfnResource {
    /// Logical ID under which the resource is registered
    fn logical_id(&self) -> String;

    /// Engine resource type (e.g. `AWS::ECS::Cluster`)
    fn resource_type(&self) -> &'static str;

    /// Resource properties
    fn properties(&self) -> serde_json::Value;

    /// Logical IDs that must be created before this resource
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Removal policy, when the engine default should be overridden
    fn removal_policy(&self) -> Option<RemovalPolicy> {
        None
    }
}

/// A rendered resource entry
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateResource {
    /// Resource type
    #[serde(rename = "Type")]
    pub type_: String,
    /// Properties
    pub properties: serde_json::Value,
    /// Explicit creation-order dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Deletion policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
    /// Replacement policy (mirrors the deletion policy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,
}

/// Template input parameter
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    /// Parameter type
    #[serde(rename = "Type")]
    pub type_: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Export block of an output
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Export {
    /// Export name, unique per account and region
    pub name: String,
}

/// Template output
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Output value
    pub value: Value,
    /// Cross-stack export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

/// A complete CloudFormation template
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    /// Format version
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    /// Resources keyed by logical ID
    pub resources: BTreeMap<String, TemplateResource>,
    /// Outputs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    /// Create an empty template
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: Some(description.into()),
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add a resource under its logical ID
    ///
    /// Logical IDs are derived from deterministic names, so a collision means
    /// two builders claimed the same role.
    pub fn add_resource(&mut self, resource: &dyn CfnResource) -> Result<()> {
        let id = resource.logical_id();
        if self.resources.contains_key(&id) {
            return Err(Error::validation(format!("duplicate logical id: {id}")));
        }

        let policy = resource.removal_policy().map(|p| p.as_str().to_string());
        debug!(logical_id = %id, resource_type = resource.resource_type(), "adding resource");

        self.resources.insert(
            id,
            TemplateResource {
                type_: resource.resource_type().to_string(),
                properties: resource.properties(),
                depends_on: resource.depends_on(),
                deletion_policy: policy.clone(),
                update_replace_policy: policy,
            },
        );
        Ok(())
    }

    /// Declare a string parameter
    pub fn add_parameter(&mut self, name: impl Into<String>, description: impl Into<String>) {
        self.parameters.insert(
            name.into(),
            Parameter {
                type_: "String".to_string(),
                description: Some(description.into()),
                default: None,
            },
        );
    }

    /// Declare a parameter resolved from a public SSM parameter path
    pub fn add_ssm_parameter(
        &mut self,
        name: impl Into<String>,
        value_type: &str,
        path: impl Into<String>,
    ) {
        self.parameters.insert(
            name.into(),
            Parameter {
                type_: format!("AWS::SSM::Parameter::Value<{value_type}>"),
                description: None,
                default: Some(path.into()),
            },
        );
    }

    /// Add an output, optionally exported for other stacks
    pub fn add_output(&mut self, name: impl Into<String>, value: Value, export: Option<String>) {
        self.outputs.insert(
            name.into(),
            Output {
                description: None,
                value,
                export: export.map(|name| Export { name }),
            },
        );
    }

    /// Check that every same-template reference resolves
    pub fn validate_references(&self) -> Result<()> {
        for (id, resource) in &self.resources {
            let mut targets = resource.depends_on.clone();
            collect_refs(&resource.properties, &mut targets);
            for target in targets {
                if !self.resources.contains_key(&target) && !self.parameters.contains_key(&target)
                {
                    return Err(Error::validation(format!(
                        "resource {id} references unknown logical id {target}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Gather logical IDs from `Ref`, `Fn::GetAtt` and `Fn::Sub` nodes
fn collect_refs(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(pattern)) = map.get("Fn::Sub") {
                out.extend(sub_variables(pattern));
            }
            if let Some(serde_json::Value::String(id)) = map.get("Ref") {
                if !id.starts_with("AWS::") {
                    out.push(id.clone());
                }
            }
            if let Some(serde_json::Value::Array(parts)) = map.get("Fn::GetAtt") {
                if let Some(serde_json::Value::String(id)) = parts.first() {
                    out.push(id.clone());
                }
            }
            for v in map.values() {
                collect_refs(v, out);
            }
        }
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}

/// Logical IDs named by `${Id}` / `${Id.Attr}` in a substitution pattern
fn sub_variables(pattern: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = pattern;
    while let Some(start) = rest.find("${") {
        let tail = &rest[start + 2..];
        let Some(end) = tail.find('}') else { break };
        let var = &tail[..end];
        // `${!Literal}` escapes substitution
        if !var.starts_with('!') && !var.starts_with("AWS::") {
            let id = var.split('.').next().unwrap_or(var);
            out.push(id.to_string());
        }
        rest = &tail[end + 1..];
    }
    out
}
