//! Deployment context
//!
//! The context is the only input that varies between deployments: the
//! sidecar feature flag, the target account/region, and overrides for the
//! sidecar's source repository. Values come from a JSON context file
//! (`{"context": {...}}`) and from `key=value` pairs, later sources winning.
//!
//! Flag lookups fail closed: an absent, malformed, or non-boolean value reads
//! as `false` and never aborts synthesis.

use std::collections::BTreeMap;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pipeline::SourceRepository;
use crate::template::{PseudoParameter, Value};
use crate::{Error, Result};

/// Context key enabling the tunnel sidecar
pub const USE_WARP_KEY: &str = "useWarp";
/// Context key overriding the sidecar source repository owner
pub const WARP_SOURCE_OWNER_KEY: &str = "warpSourceOwner";
/// Context key overriding the sidecar source repository name
pub const WARP_SOURCE_REPO_KEY: &str = "warpSourceRepo";
/// Context key overriding the sidecar source branch
pub const WARP_SOURCE_BRANCH_KEY: &str = "warpSourceBranch";

/// On-disk context file
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ContextFile {
    /// Context key/value pairs
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

/// Target account and region
///
/// Either may be unset, in which case templates stay environment-agnostic and
/// defer to the engine's pseudo parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
    /// Account ID
    pub account: Option<String>,
    /// Region name
    pub region: Option<String>,
}

impl Environment {
    /// Create an environment with both values set
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            region: Some(region.into()),
        }
    }

    /// Region as a template value
    pub fn region_value(&self) -> Value {
        self.region
            .as_ref()
            .map(Value::literal)
            .unwrap_or_else(|| Value::pseudo(PseudoParameter::Region))
    }

    /// Account as a template value
    pub fn account_value(&self) -> Value {
        self.account
            .as_ref()
            .map(Value::literal)
            .unwrap_or_else(|| Value::pseudo(PseudoParameter::AccountId))
    }
}

/// Resolved deployment context
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeploymentContext {
    values: BTreeMap<String, serde_json::Value>,
    /// Target environment
    pub environment: Environment,
}

impl DeploymentContext {
    /// Empty context: sidecar disabled, environment-agnostic
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a context value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Set the target environment
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Load values from a context file
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        let file: ContextFile = serde_json::from_str(&data)
            .map_err(|e| Error::config(format!("failed to parse {}: {}", path.display(), e)))?;
        Ok(Self {
            values: file.context,
            environment: Environment::default(),
        })
    }

    /// Merge every input source: the optional file first, then `key=value`
    /// pairs (which win over file values), then the target environment
    pub fn from_sources<S: AsRef<str>>(
        file: Option<&Path>,
        pairs: &[S],
        environment: Environment,
    ) -> Result<Self> {
        let mut context = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::new(),
        };
        for pair in pairs {
            context.apply_pair(pair.as_ref())?;
        }
        Ok(context.with_environment(environment))
    }

    /// Apply a `key=value` override
    pub fn apply_pair(&mut self, pair: &str) -> Result<()> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::config(format!("context pair must be key=value: {pair}")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::config(format!("context key is empty: {pair}")));
        }
        self.values
            .insert(key.to_string(), serde_json::Value::String(value.to_string()));
        Ok(())
    }

    /// Raw context value
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// String context value (non-string values are ignored)
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    /// Boolean flag, failing closed
    pub fn flag(&self, key: &str) -> bool {
        parse_flag(key, self.values.get(key))
    }

    /// Whether the tunnel sidecar subtree is requested
    pub fn use_warp(&self) -> bool {
        self.flag(USE_WARP_KEY)
    }

    /// Sidecar source repository, defaults overridden by context
    pub fn sidecar_source(&self) -> SourceRepository {
        let default = SourceRepository::default();
        SourceRepository {
            owner: self
                .get_str(WARP_SOURCE_OWNER_KEY)
                .map(str::to_string)
                .unwrap_or(default.owner),
            repo: self
                .get_str(WARP_SOURCE_REPO_KEY)
                .map(str::to_string)
                .unwrap_or(default.repo),
            branch: self
                .get_str(WARP_SOURCE_BRANCH_KEY)
                .map(str::to_string)
                .unwrap_or(default.branch),
        }
    }
}

/// Interpret a context value as a boolean
fn parse_flag(key: &str, value: Option<&serde_json::Value>) -> bool {
    let Some(value) = value else {
        return false;
    };

    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" | "" => false,
            other => {
                warn!(key, value = other, "unrecognized flag value, treating as false");
                false
            }
        },
        serde_json::Value::Number(n) => match n.as_u64() {
            Some(1) => true,
            Some(0) => false,
            _ => {
                warn!(key, value = %n, "unrecognized flag value, treating as false");
                false
            }
        },
        serde_json::Value::Null => false,
        other => {
            warn!(key, value = %other, "unrecognized flag value, treating as false");
            false
        }
    }
}
