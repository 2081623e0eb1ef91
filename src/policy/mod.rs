//! Network and permission policy types
//!
//! This module defines the two access-control layers the deployment uses:
//!
//! - **Network**: security groups with explicit ingress rules
//! - **Identity**: IAM roles, inline policy documents and attached policies
//!
//! Permission documents are built statement by statement so that callers can
//! scope each action to exactly the resources it needs; [`PolicyDocument`]
//! exposes the actions and resources it grants so that scoping can be checked.

use std::collections::BTreeMap;

use crate::naming::ResourceName;
use crate::template::{CfnResource, PseudoParameter, Value};
use crate::workload::Protocol;

// =============================================================================
// Security groups
// =============================================================================

/// Traffic source of an ingress rule
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Peer {
    /// Any IPv4 address
    AnyIpv4,
}

impl Peer {
    /// Source CIDR
    pub fn cidr(&self) -> &'static str {
        match self {
            Self::AnyIpv4 => "0.0.0.0/0",
        }
    }
}

/// Ingress rule
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct IngressRule {
    /// Source
    pub peer: Peer,
    /// Protocol
    pub protocol: Protocol,
    /// Port (single port range)
    pub port: u16,
}

impl IngressRule {
    fn description(&self) -> String {
        format!(
            "from {}:{} {}",
            self.peer.cidr(),
            self.protocol.as_str().to_uppercase(),
            self.port
        )
    }
}

/// Security group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityGroup {
    /// Resource name
    pub name: ResourceName,
    /// Network the group belongs to
    pub vpc_id: Value,
    /// Ingress rules
    pub ingress: Vec<IngressRule>,
}

impl SecurityGroup {
    /// Empty group in the given network
    pub fn new(name: ResourceName, vpc_id: Value) -> Self {
        Self {
            name,
            vpc_id,
            ingress: Vec::new(),
        }
    }

    /// Open a port to a peer; repeated rules are kept once
    pub fn add_ingress_rule(&mut self, peer: Peer, protocol: Protocol, port: u16) {
        let rule = IngressRule {
            peer,
            protocol,
            port,
        };
        if !self.ingress.contains(&rule) {
            self.ingress.push(rule);
        }
    }

    /// Group ID value
    pub fn group_id(&self) -> Value {
        Value::get_att(self.name.logical_id(), "GroupId")
    }
}

impl CfnResource for SecurityGroup {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::EC2::SecurityGroup"
    }

    fn properties(&self) -> serde_json::Value {
        let ingress: Vec<serde_json::Value> = self
            .ingress
            .iter()
            .map(|rule| {
                serde_json::json!({
                    "CidrIp": rule.peer.cidr(),
                    "Description": rule.description(),
                    "IpProtocol": rule.protocol.as_str(),
                    "FromPort": rule.port,
                    "ToPort": rule.port,
                })
            })
            .collect();

        serde_json::json!({
            "GroupDescription": self.name.as_str(),
            "VpcId": self.vpc_id,
            "SecurityGroupIngress": ingress,
            "SecurityGroupEgress": [{
                "CidrIp": "0.0.0.0/0",
                "Description": "Allow all outbound traffic by default",
                "IpProtocol": "-1",
            }],
        })
    }
}

// =============================================================================
// IAM documents
// =============================================================================

/// IAM policy language version
pub const POLICY_VERSION: &str = "2012-10-17";

/// An `Allow` statement
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyStatement {
    /// Actions, e.g. `ecs:UpdateService`
    pub actions: Vec<String>,
    /// Resources the actions apply to
    pub resources: Vec<Value>,
}

impl PolicyStatement {
    /// Statement granting `actions` on `resources`
    pub fn allow<I, S>(actions: I, resources: Vec<Value>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            resources,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        // Single-element lists collapse to scalars, as the engine prints them
        let action = match self.actions.as_slice() {
            [single] => serde_json::json!(single),
            many => serde_json::json!(many),
        };
        let resource = match self.resources.as_slice() {
            [single] => single.to_json(),
            many => serde_json::json!(many),
        };
        serde_json::json!({
            "Effect": "Allow",
            "Action": action,
            "Resource": resource,
        })
    }
}

/// A policy document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicyDocument {
    /// Statements
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    /// Document with the given statements
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self { statements }
    }

    /// Every action granted by the document
    pub fn actions(&self) -> Vec<&str> {
        self.statements
            .iter()
            .flat_map(|s| s.actions.iter().map(String::as_str))
            .collect()
    }

    /// Every resource the document grants on
    pub fn resources(&self) -> Vec<&Value> {
        self.statements.iter().flat_map(|s| s.resources.iter()).collect()
    }

    /// Whether any action or resource is a wildcard
    pub fn has_wildcard(&self) -> bool {
        self.actions().iter().any(|a| a.contains('*'))
            || self
                .resources()
                .iter()
                .any(|r| r.as_literal().is_some_and(|s| s.contains('*')))
    }

    /// Render the document
    pub fn to_json(&self) -> serde_json::Value {
        let statements: Vec<serde_json::Value> =
            self.statements.iter().map(|s| s.to_json()).collect();
        serde_json::json!({
            "Version": POLICY_VERSION,
            "Statement": statements,
        })
    }
}

/// AWS-managed policy ARN by name
pub fn managed_policy_arn(name: &str) -> Value {
    Value::sub(format!(
        "arn:${{{}}}:iam::aws:policy/{}",
        PseudoParameter::Partition,
        name
    ))
}

// =============================================================================
// Roles and policies
// =============================================================================

/// Service allowed to assume a role
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServicePrincipal(pub String);

impl ServicePrincipal {
    /// Container task agent and tasks
    pub fn ecs_tasks() -> Self {
        Self("ecs-tasks.amazonaws.com".to_string())
    }

    /// Build service
    pub fn codebuild() -> Self {
        Self("codebuild.amazonaws.com".to_string())
    }

    /// Compute instances
    pub fn ec2() -> Self {
        Self("ec2.amazonaws.com".to_string())
    }
}

/// IAM role
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Role {
    /// Resource name
    pub name: ResourceName,
    /// Physical role name; engine-generated when unset
    pub role_name: Option<String>,
    /// Trusted service
    pub assumed_by: ServicePrincipal,
    /// Attached managed policies
    pub managed_policy_arns: Vec<Value>,
    /// Inline documents keyed by policy name
    pub inline_policies: BTreeMap<String, PolicyDocument>,
}

impl Role {
    /// Role trusted by `assumed_by` with no permissions
    pub fn new(name: ResourceName, assumed_by: ServicePrincipal) -> Self {
        Self {
            name,
            role_name: None,
            assumed_by,
            managed_policy_arns: Vec::new(),
            inline_policies: BTreeMap::new(),
        }
    }

    /// Role ARN value
    pub fn arn(&self) -> Value {
        Value::get_att(self.name.logical_id(), "Arn")
    }

    /// Role name value
    pub fn name_ref(&self) -> Value {
        Value::reference(self.name.logical_id())
    }

    /// Inline document by name
    pub fn inline_policy(&self, name: &str) -> Option<&PolicyDocument> {
        self.inline_policies.get(name)
    }
}

impl CfnResource for Role {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::IAM::Role"
    }

    fn properties(&self) -> serde_json::Value {
        let mut props = serde_json::json!({
            "AssumeRolePolicyDocument": {
                "Version": POLICY_VERSION,
                "Statement": [{
                    "Effect": "Allow",
                    "Action": "sts:AssumeRole",
                    "Principal": { "Service": self.assumed_by.0 },
                }],
            },
        });

        if let Some(ref role_name) = self.role_name {
            props["RoleName"] = serde_json::json!(role_name);
        }
        if !self.managed_policy_arns.is_empty() {
            props["ManagedPolicyArns"] = serde_json::json!(self.managed_policy_arns);
        }
        if !self.inline_policies.is_empty() {
            props["Policies"] = self
                .inline_policies
                .iter()
                .map(|(name, doc)| {
                    serde_json::json!({ "PolicyName": name, "PolicyDocument": doc.to_json() })
                })
                .collect();
        }
        props
    }
}

/// Standalone policy attached to roles (grants added after role creation)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    /// Resource name
    pub name: ResourceName,
    /// Document
    pub document: PolicyDocument,
    /// Role names the policy attaches to
    pub roles: Vec<Value>,
}

impl CfnResource for Policy {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::IAM::Policy"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "PolicyName": self.name.logical_id(),
            "PolicyDocument": self.document.to_json(),
            "Roles": self.roles,
        })
    }
}

/// Instance profile wrapping a role for compute instances
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceProfile {
    /// Resource name
    pub name: ResourceName,
    /// Role name
    pub role: Value,
}

impl CfnResource for InstanceProfile {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::IAM::InstanceProfile"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({ "Roles": [self.role] })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Story: Security group rules
    // =========================================================================

    #[test]
    fn story_ingress_rules_render_per_protocol() {
        let mut sg = SecurityGroup::new(ResourceName::new("Proxy-SecurityGroup"), Value::import("vpc"));
        sg.add_ingress_rule(Peer::AnyIpv4, Protocol::Tcp, 8388);
        sg.add_ingress_rule(Peer::AnyIpv4, Protocol::Udp, 8388);

        let props = sg.properties();
        let ingress = props["SecurityGroupIngress"].as_array().unwrap();
        assert_eq!(ingress.len(), 2);
        assert_eq!(ingress[0]["IpProtocol"], "tcp");
        assert_eq!(ingress[1]["IpProtocol"], "udp");
        assert_eq!(ingress[0]["CidrIp"], "0.0.0.0/0");
        assert_eq!(ingress[0]["Description"], "from 0.0.0.0/0:TCP 8388");
        assert_eq!(props["VpcId"], serde_json::json!({ "Fn::ImportValue": "vpc" }));
    }

    #[test]
    fn story_duplicate_rules_are_kept_once() {
        let mut sg = SecurityGroup::new(ResourceName::new("Sg"), Value::reference("Vpc"));
        sg.add_ingress_rule(Peer::AnyIpv4, Protocol::Tcp, 8388);
        sg.add_ingress_rule(Peer::AnyIpv4, Protocol::Tcp, 8388);
        assert_eq!(sg.ingress.len(), 1);
    }

    // =========================================================================
    // Story: Policy documents
    // =========================================================================

    #[test]
    fn story_single_statement_collapses_lists() {
        let doc = PolicyDocument::new(vec![PolicyStatement::allow(
            ["ecs:UpdateService"],
            vec![Value::reference("Service")],
        )]);

        let json = doc.to_json();
        assert_eq!(json["Version"], "2012-10-17");
        assert_eq!(json["Statement"][0]["Action"], "ecs:UpdateService");
        assert_eq!(json["Statement"][0]["Resource"], serde_json::json!({ "Ref": "Service" }));
        assert!(!doc.has_wildcard());
    }

    #[test]
    fn story_wildcards_are_detected() {
        let doc = PolicyDocument::new(vec![PolicyStatement::allow(
            ["ecr:GetAuthorizationToken"],
            vec![Value::literal("*")],
        )]);
        assert!(doc.has_wildcard());

        let doc = PolicyDocument::new(vec![PolicyStatement::allow(
            ["ecs:*"],
            vec![Value::reference("Service")],
        )]);
        assert!(doc.has_wildcard());
    }

    // =========================================================================
    // Story: Roles
    // =========================================================================

    #[test]
    fn story_role_renders_trust_and_inline_policies() {
        let mut role = Role::new(ResourceName::new("Build-Role"), ServicePrincipal::codebuild());
        role.role_name = Some("PersonalProxyStack-Build-Role".to_string());
        role.inline_policies.insert(
            "updateEcsService".to_string(),
            PolicyDocument::new(vec![PolicyStatement::allow(
                ["ecs:UpdateService"],
                vec![Value::reference("Service")],
            )]),
        );

        let props = role.properties();
        assert_eq!(
            props["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"],
            "codebuild.amazonaws.com"
        );
        assert_eq!(props["RoleName"], "PersonalProxyStack-Build-Role");
        assert_eq!(props["Policies"][0]["PolicyName"], "updateEcsService");
        assert!(props.get("ManagedPolicyArns").is_none());
        assert!(role.inline_policy("updateEcsService").is_some());
    }

    #[test]
    fn story_managed_policy_arn_uses_partition() {
        assert_eq!(
            managed_policy_arn("service-role/AmazonECSTaskExecutionRolePolicy"),
            Value::sub(
                "arn:${AWS::Partition}:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy"
            )
        );
    }
}
