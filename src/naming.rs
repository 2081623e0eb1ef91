//! Resource naming convention
//!
//! Every resource name is the fixed prefix plus a role suffix
//! (`PersonalProxyStack-Proxy-Cluster`). The template logical ID is derived
//! from the same name with non-alphanumerics removed, so repeated synthesis
//! always addresses the same logical resource.

use std::fmt;

/// Prefix shared by every resource in the deployment
pub const RESOURCE_PREFIX: &str = "PersonalProxyStack";

/// A deterministic resource name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceName(String);

impl ResourceName {
    /// Name under the default prefix: `PersonalProxyStack-<suffix>`
    pub fn new(suffix: &str) -> Self {
        Self::with_prefix(RESOURCE_PREFIX, suffix)
    }

    /// Name under an explicit prefix
    pub fn with_prefix(prefix: &str, suffix: &str) -> Self {
        Self(format!("{prefix}-{suffix}"))
    }

    /// Derive a child name: `<self>-<part>`
    pub fn child(&self, part: &str) -> Self {
        Self(format!("{}-{}", self.0, part))
    }

    /// The physical name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Template logical ID (alphanumeric only)
    pub fn logical_id(&self) -> String {
        self.0.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_carry_prefix_and_suffix() {
        let name = ResourceName::new("Proxy-Cluster");
        assert_eq!(name.as_str(), "PersonalProxyStack-Proxy-Cluster");
        assert_eq!(name.to_string(), "PersonalProxyStack-Proxy-Cluster");
    }

    #[test]
    fn logical_id_strips_separators() {
        let name = ResourceName::new("ProxyWithWarp-Service");
        assert_eq!(name.logical_id(), "PersonalProxyStackProxyWithWarpService");
    }

    #[test]
    fn child_names_extend_parent() {
        let vpc = ResourceName::new("Vpc");
        assert_eq!(vpc.child("PublicSubnet1").as_str(), "PersonalProxyStack-Vpc-PublicSubnet1");
    }

    #[test]
    fn naming_is_deterministic() {
        assert_eq!(ResourceName::new("Proxy-Service"), ResourceName::new("Proxy-Service"));
        assert_eq!(
            ResourceName::with_prefix("Other", "Vpc").logical_id(),
            "OtherVpc"
        );
    }
}
