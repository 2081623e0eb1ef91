//! Image registry and build pipeline
//!
//! The sidecar image is built by a hosted build project from a source
//! repository, pushed to a dedicated registry, and rolled out by forcing a new
//! deployment of one service. The project's role gets exactly those
//! permissions: push/pull on the one registry and update on the one service.

use crate::naming::ResourceName;
use crate::policy::PolicyStatement;
use crate::template::{CfnResource, PseudoParameter, RemovalPolicy, Value};

/// Default sidecar source owner
pub const DEFAULT_SOURCE_OWNER: &str = "thomas0chow";
/// Default sidecar source repository
pub const DEFAULT_SOURCE_REPO: &str = "personal-infra";
/// Default sidecar source branch
pub const DEFAULT_SOURCE_BRANCH: &str = "feature/warp";

/// Build image with container tooling
pub const BUILD_IMAGE: &str = "aws/codebuild/standard:7.0";

/// Actions needed to pull from and push to a registry
pub const REGISTRY_PULL_PUSH_ACTIONS: &[&str] = &[
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:BatchGetImage",
    "ecr:CompleteLayerUpload",
    "ecr:UploadLayerPart",
    "ecr:InitiateLayerUpload",
    "ecr:PutImage",
];

// =============================================================================
// Registry
// =============================================================================

/// Container image registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registry {
    /// Resource name
    pub name: ResourceName,
    /// Repository name, e.g. `proxy/with-warp`
    pub repository_name: String,
    /// Removal policy
    pub removal_policy: RemovalPolicy,
}

impl Registry {
    /// Registry ARN value
    pub fn arn(&self) -> Value {
        Value::get_att(self.name.logical_id(), "Arn")
    }

    /// Repository URI value
    pub fn uri(&self) -> Value {
        Value::get_att(self.name.logical_id(), "RepositoryUri")
    }

    /// Statements granting push and pull on this registry only
    ///
    /// The authorization-token action has no resource-level scoping in the
    /// registry API and is granted account-wide.
    pub fn grant_pull_push(&self) -> Vec<PolicyStatement> {
        vec![
            PolicyStatement::allow(REGISTRY_PULL_PUSH_ACTIONS.iter().copied(), vec![self.arn()]),
            PolicyStatement::allow(["ecr:GetAuthorizationToken"], vec![Value::literal("*")]),
        ]
    }
}

impl CfnResource for Registry {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::ECR::Repository"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({ "RepositoryName": self.repository_name })
    }

    fn removal_policy(&self) -> Option<RemovalPolicy> {
        Some(self.removal_policy)
    }
}

// =============================================================================
// Build project
// =============================================================================

/// Source repository a build pulls from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRepository {
    /// Owner
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Branch or ref
    pub branch: String,
}

impl Default for SourceRepository {
    fn default() -> Self {
        Self {
            owner: DEFAULT_SOURCE_OWNER.to_string(),
            repo: DEFAULT_SOURCE_REPO.to_string(),
            branch: DEFAULT_SOURCE_BRANCH.to_string(),
        }
    }
}

impl SourceRepository {
    /// Clone URL
    pub fn location(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }
}

/// Build instructions shipped in a local directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildSpecSource {
    /// Directory holding `buildspec.yml`
    pub directory: String,
}

impl BuildSpecSource {
    /// Path of the build instructions relative to the source root
    pub fn path(&self) -> String {
        format!("{}/buildspec.yml", self.directory.trim_end_matches('/'))
    }
}

/// Build project
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildProject {
    /// Resource name, also the project name
    pub name: ResourceName,
    /// Source repository
    pub source: SourceRepository,
    /// Build instructions
    pub build_spec: BuildSpecSource,
    /// Environment bindings, in declaration order
    pub environment_variables: Vec<(String, Value)>,
    /// Privileged build container (needed for image builds)
    pub privileged: bool,
    /// Service role ARN
    pub service_role: Value,
    /// Resources that must exist first (role grants)
    pub depends_on: Vec<String>,
}

impl BuildProject {
    /// Environment binding by name
    pub fn environment_variable(&self, name: &str) -> Option<&Value> {
        self.environment_variables
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Log group ARN pattern the project writes build logs to
    pub fn log_group_arn(&self) -> Value {
        Value::sub(format!(
            "arn:${{{}}}:logs:${{{}}}:${{{}}}:log-group:/aws/codebuild/{}:*",
            PseudoParameter::Partition,
            PseudoParameter::Region,
            PseudoParameter::AccountId,
            self.name
        ))
    }

    /// Statements the project needs to write its own build logs
    pub fn grant_logs(&self) -> PolicyStatement {
        PolicyStatement::allow(
            ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
            vec![self.log_group_arn()],
        )
    }
}

impl CfnResource for BuildProject {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::CodeBuild::Project"
    }

    fn properties(&self) -> serde_json::Value {
        let env: Vec<serde_json::Value> = self
            .environment_variables
            .iter()
            .map(|(name, value)| {
                serde_json::json!({ "Name": name, "Type": "PLAINTEXT", "Value": value })
            })
            .collect();

        serde_json::json!({
            "Name": self.name.as_str(),
            "Artifacts": { "Type": "NO_ARTIFACTS" },
            "Environment": {
                "ComputeType": "BUILD_GENERAL1_SMALL",
                "Image": BUILD_IMAGE,
                "ImagePullCredentialsType": "CODEBUILD",
                "PrivilegedMode": self.privileged,
                "Type": "LINUX_CONTAINER",
                "EnvironmentVariables": env,
            },
            "ServiceRole": self.service_role,
            "Source": {
                "Type": "GITHUB",
                "Location": self.source.location(),
                "BuildSpec": self.build_spec.path(),
            },
            "SourceVersion": self.source.branch,
        })
    }

    fn depends_on(&self) -> Vec<String> {
        self.depends_on.clone()
    }
}
