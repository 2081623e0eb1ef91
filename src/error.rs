//! Error types for topology construction and rendering

use thiserror::Error;

/// Main error type for personal-infra operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Topology or resource definition violates an invariant
    #[error("validation error: {0}")]
    Validation(String),

    /// Deployment context could not be loaded or parsed
    #[error("config error: {0}")]
    Config(String),

    /// Template serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem error while reading context or writing templates
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a config error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Categories During Synthesis
    // ==========================================================================

    /// Story: a customized network that cannot be carved up is rejected
    /// before any template is written.
    #[test]
    fn story_validation_rejects_impossible_topology() {
        let err = Error::validation("subnet mask /8 does not subdivide 10.0.0.0/16");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("/8"));

        match Error::validation("any message") {
            Error::Validation(msg) => assert_eq!(msg, "any message"),
            _ => panic!("Expected Validation variant"),
        }
    }

    /// Story: a broken context file surfaces as a config error naming the path
    #[test]
    fn story_config_errors_name_the_source() {
        let path = "/tmp/cdk.json";
        let err = Error::config(format!("failed to parse {}: expected value", path));
        assert!(err.to_string().starts_with("config error"));
        assert!(err.to_string().contains("/tmp/cdk.json"));
    }

    /// Story: serde failures convert into serialization errors via `?`
    #[test]
    fn story_serde_errors_convert() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));

        let parse: std::result::Result<serde_json::Value, _> = serde_yaml::from_str("a: [");
        let err: Error = parse.unwrap_err().into();
        assert!(err.to_string().contains("serialization error"));
    }

    #[test]
    fn story_io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("no such file"));
    }
}
