//! Workload types for the proxy deployment
//!
//! This module defines the container-service resource types the builders
//! produce:
//! - Cluster: grouping of services and capacity
//! - TaskDefinition: the workload template (one or more containers)
//! - EcsService: keeps a number of task copies running on a cluster
//!
//! For workload generation, use [`crate::compiler::DeploymentBuilder`].

use std::collections::BTreeMap;

use crate::logs::LogGroupHandle;
use crate::naming::ResourceName;
use crate::template::{CfnResource, PseudoParameter, Value};

// =============================================================================
// Secrets
// =============================================================================

/// Reference to a secure parameter, identified by its path
///
/// Never resolved at synthesis time; the container runtime fetches the value
/// when the task starts.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SecretReference {
    parameter_name: String,
}

impl SecretReference {
    /// Reference a parameter by path (e.g. `/proxy/SS_PASSWORD`)
    pub fn from_parameter(parameter_name: impl Into<String>) -> Self {
        Self {
            parameter_name: parameter_name.into(),
        }
    }

    /// Parameter path
    pub fn parameter_name(&self) -> &str {
        &self.parameter_name
    }

    /// Parameter ARN, built from pseudo parameters
    pub fn arn(&self) -> Value {
        let path = self.parameter_name.trim_start_matches('/');
        Value::sub(format!(
            "arn:${{{}}}:ssm:${{{}}}:${{{}}}:parameter/{}",
            PseudoParameter::Partition,
            PseudoParameter::Region,
            PseudoParameter::AccountId,
            path
        ))
    }
}

// =============================================================================
// Container definitions
// =============================================================================

/// Where a container image comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSource {
    /// Built from a local directory by the asset publisher; the pushed URI
    /// arrives through a template parameter
    Asset {
        /// Build context directory
        directory: String,
        /// Template parameter carrying the published image URI
        parameter: String,
    },
    /// Pulled from a registry in the same template
    Registry {
        /// Logical ID of the registry
        repository_logical_id: String,
        /// Image tag
        tag: String,
    },
}

impl ImageSource {
    /// Image built from a local directory; the parameter name is derived from
    /// the directory's last segment (`lib/proxy` -> `AssetImageProxy`)
    pub fn asset(directory: impl Into<String>) -> Self {
        let directory = directory.into();
        let stem: String = directory
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect();
        Self::Asset {
            parameter: format!("AssetImage{stem}"),
            directory,
        }
    }

    /// Template parameter this image needs, if any
    pub fn asset_parameter(&self) -> Option<(&str, &str)> {
        match self {
            Self::Asset {
                directory,
                parameter,
            } => Some((parameter.as_str(), directory.as_str())),
            Self::Registry { .. } => None,
        }
    }

    /// Image reference value
    pub fn image(&self) -> Value {
        match self {
            Self::Asset { parameter, .. } => Value::reference(parameter.clone()),
            Self::Registry {
                repository_logical_id,
                tag,
            } => Value::sub(format!("${{{repository_logical_id}.RepositoryUri}}:{tag}")),
        }
    }
}

/// Linux capabilities a container may add
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    /// Network administration
    NetAdmin,
    /// System administration
    SysAdmin,
}

impl Capability {
    /// Capability name as the runtime expects it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetAdmin => "NET_ADMIN",
            Self::SysAdmin => "SYS_ADMIN",
        }
    }
}

/// Kernel parameter override
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemControl {
    /// Parameter namespace, e.g. `net.ipv4.conf.all.src_valid_mark`
    pub namespace: String,
    /// Value
    pub value: String,
}

impl SystemControl {
    /// Create a kernel parameter override
    pub fn new(namespace: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            value: value.into(),
        }
    }
}

/// Transport protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl Protocol {
    /// Lowercase protocol name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// Container port binding
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortMapping {
    /// Container port
    pub container_port: u16,
    /// Protocol
    pub protocol: Protocol,
}

/// Log routing for a container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfiguration {
    /// Target group
    pub group: LogGroupHandle,
    /// Stream prefix distinguishing this container's streams
    pub stream_prefix: String,
}

/// Container definition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerDefinition {
    /// Container name
    pub name: String,
    /// Image source
    pub image: ImageSource,
    /// Secret bindings: environment variable name to parameter reference
    pub secrets: BTreeMap<String, SecretReference>,
    /// Log routing
    pub logging: LogConfiguration,
    /// Added Linux capabilities
    pub capabilities: Vec<Capability>,
    /// Kernel parameter overrides
    pub system_controls: Vec<SystemControl>,
    /// Port bindings
    pub port_mappings: Vec<PortMapping>,
    /// Hard memory limit in MiB
    pub memory_limit_mib: Option<u32>,
    /// Privileged mode
    pub privileged: bool,
}

impl ContainerDefinition {
    /// Container with required fields; everything else empty
    pub fn new(name: impl Into<String>, image: ImageSource, logging: LogConfiguration) -> Self {
        Self {
            name: name.into(),
            image,
            secrets: BTreeMap::new(),
            logging,
            capabilities: Vec::new(),
            system_controls: Vec::new(),
            port_mappings: Vec::new(),
            memory_limit_mib: None,
            privileged: false,
        }
    }

    /// Bind a secret to an environment variable
    pub fn with_secret(mut self, name: impl Into<String>, secret: SecretReference) -> Self {
        self.secrets.insert(name.into(), secret);
        self
    }

    fn to_json(&self) -> serde_json::Value {
        let secrets: Vec<serde_json::Value> = self
            .secrets
            .iter()
            .map(|(name, secret)| serde_json::json!({ "Name": name, "ValueFrom": secret.arn() }))
            .collect();

        let mut def = serde_json::json!({
            "Name": self.name,
            "Image": self.image.image(),
            "Essential": true,
            "LogConfiguration": {
                "LogDriver": "awslogs",
                "Options": {
                    "awslogs-group": self.logging.group.name,
                    "awslogs-stream-prefix": self.logging.stream_prefix,
                    "awslogs-region": Value::pseudo(PseudoParameter::Region),
                }
            },
        });

        if !secrets.is_empty() {
            def["Secrets"] = serde_json::json!(secrets);
        }
        if !self.capabilities.is_empty() {
            let add: Vec<&str> = self.capabilities.iter().map(|c| c.as_str()).collect();
            def["LinuxParameters"] = serde_json::json!({ "Capabilities": { "Add": add } });
        }
        if !self.system_controls.is_empty() {
            def["SystemControls"] = self
                .system_controls
                .iter()
                .map(|s| serde_json::json!({ "Namespace": s.namespace, "Value": s.value }))
                .collect();
        }
        if !self.port_mappings.is_empty() {
            def["PortMappings"] = self
                .port_mappings
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "ContainerPort": p.container_port,
                        "Protocol": p.protocol.as_str(),
                    })
                })
                .collect();
        }
        if let Some(memory) = self.memory_limit_mib {
            def["Memory"] = serde_json::json!(memory);
        }
        if self.privileged {
            def["Privileged"] = serde_json::json!(true);
        }
        def
    }
}

// =============================================================================
// Task definitions
// =============================================================================

/// Processor architecture of the workload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuArchitecture {
    /// 64-bit ARM
    Arm64,
}

impl CpuArchitecture {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Arm64 => "ARM64",
        }
    }
}

/// Capacity a workload is compatible with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compatibility {
    /// Serverless capacity
    Fargate,
    /// Self-managed instances
    Ec2,
}

impl Compatibility {
    /// Engine-side name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fargate => "FARGATE",
            Self::Ec2 => "EC2",
        }
    }
}

/// Task networking
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkMode {
    /// One network interface per task (required for serverless)
    AwsVpc,
    /// Docker bridge on the instance
    Bridge,
}

impl NetworkMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::AwsVpc => "awsvpc",
            Self::Bridge => "bridge",
        }
    }
}

/// Task definition (the workload template)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskDefinition {
    /// Resource name
    pub name: ResourceName,
    /// Compatibility
    pub compatibility: Compatibility,
    /// Network mode
    pub network_mode: NetworkMode,
    /// Architecture, when pinned
    pub cpu_architecture: Option<CpuArchitecture>,
    /// Task CPU units (serverless only)
    pub cpu: Option<u32>,
    /// Task memory in MiB (serverless only)
    pub memory_mib: Option<u32>,
    /// Role the agent uses to pull images, fetch secrets and ship logs
    pub execution_role_arn: Value,
    /// Role the containers run as
    pub task_role_arn: Option<Value>,
    /// Containers
    pub containers: Vec<ContainerDefinition>,
}

impl TaskDefinition {
    /// Logical ID
    pub fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    /// Container by name
    pub fn container(&self, name: &str) -> Option<&ContainerDefinition> {
        self.containers.iter().find(|c| c.name == name)
    }
}

impl CfnResource for TaskDefinition {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::ECS::TaskDefinition"
    }

    fn properties(&self) -> serde_json::Value {
        let containers: Vec<serde_json::Value> =
            self.containers.iter().map(|c| c.to_json()).collect();

        let mut props = serde_json::json!({
            "Family": self.name.logical_id(),
            "RequiresCompatibilities": [self.compatibility.as_str()],
            "NetworkMode": self.network_mode.as_str(),
            "ExecutionRoleArn": self.execution_role_arn,
            "ContainerDefinitions": containers,
        });

        if let Some(arch) = self.cpu_architecture {
            props["RuntimePlatform"] = serde_json::json!({
                "CpuArchitecture": arch.as_str(),
                "OperatingSystemFamily": "LINUX",
            });
        }
        if let Some(cpu) = self.cpu {
            props["Cpu"] = serde_json::json!(cpu.to_string());
        }
        if let Some(memory) = self.memory_mib {
            props["Memory"] = serde_json::json!(memory.to_string());
        }
        if let Some(ref role) = self.task_role_arn {
            props["TaskRoleArn"] = serde_json::json!(role);
        }
        props
    }
}

// =============================================================================
// Cluster
// =============================================================================

/// Container cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    /// Resource name, also the cluster name
    pub name: ResourceName,
}

impl Cluster {
    /// Handle for services and capacity providers joining the cluster
    pub fn handle(&self) -> ClusterHandle {
        ClusterHandle {
            logical_id: self.name.logical_id(),
            cluster_name: self.name.as_str().to_string(),
            name: Value::reference(self.name.logical_id()),
            arn: Value::get_att(self.name.logical_id(), "Arn"),
        }
    }
}

impl CfnResource for Cluster {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::ECS::Cluster"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({ "ClusterName": self.name.as_str() })
    }
}

/// Reference to a cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterHandle {
    /// Logical ID
    pub logical_id: String,
    /// Physical cluster name, known at synthesis time
    pub cluster_name: String,
    /// Name value
    pub name: Value,
    /// ARN value
    pub arn: Value,
}

// =============================================================================
// Service
// =============================================================================

/// Where a service's tasks are placed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchType {
    /// Serverless capacity
    Fargate,
    /// Cluster instances
    Ec2,
}

impl LaunchType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Fargate => "FARGATE",
            Self::Ec2 => "EC2",
        }
    }
}

/// Per-task network exposure (awsvpc mode only)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceNetwork {
    /// Security group IDs
    pub security_groups: Vec<Value>,
    /// Subnet IDs
    pub subnets: Vec<Value>,
    /// Assign a public IP to each task
    pub assign_public_ip: bool,
}

/// Long-running service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EcsService {
    /// Resource name, also the service name
    pub name: ResourceName,
    /// Cluster
    pub cluster: ClusterHandle,
    /// Task definition ARN
    pub task_definition: Value,
    /// Replica count
    pub desired_count: u32,
    /// Launch type
    pub launch_type: LaunchType,
    /// Network exposure
    pub network: Option<ServiceNetwork>,
    /// Allow interactive shell sessions into tasks
    pub enable_execute_command: bool,
    /// Resources that must exist before tasks can be placed
    pub depends_on: Vec<String>,
}

impl EcsService {
    /// Handle for resources that act on this service
    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            logical_id: self.name.logical_id(),
            service_name: self.name.as_str().to_string(),
            // Ref on a service yields its ARN
            arn: Value::reference(self.name.logical_id()),
            name: Value::get_att(self.name.logical_id(), "Name"),
        }
    }
}

impl CfnResource for EcsService {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::ECS::Service"
    }

    fn properties(&self) -> serde_json::Value {
        let mut props = serde_json::json!({
            "ServiceName": self.name.as_str(),
            "Cluster": self.cluster.name,
            "TaskDefinition": self.task_definition,
            "DesiredCount": self.desired_count,
            "LaunchType": self.launch_type.as_str(),
            "EnableECSManagedTags": false,
            "EnableExecuteCommand": self.enable_execute_command,
            "DeploymentConfiguration": {
                "MaximumPercent": 200,
                "MinimumHealthyPercent": 50,
            },
        });

        if let Some(ref network) = self.network {
            let public_ip = if network.assign_public_ip {
                "ENABLED"
            } else {
                "DISABLED"
            };
            props["NetworkConfiguration"] = serde_json::json!({
                "AwsvpcConfiguration": {
                    "AssignPublicIp": public_ip,
                    "SecurityGroups": network.security_groups,
                    "Subnets": network.subnets,
                }
            });
        }
        props
    }

    fn depends_on(&self) -> Vec<String> {
        self.depends_on.clone()
    }
}

/// Reference to a service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceHandle {
    /// Logical ID
    pub logical_id: String,
    /// Physical service name, known at synthesis time
    pub service_name: String,
    /// ARN value
    pub arn: Value,
    /// Name value
    pub name: Value,
}

// =============================================================================
// Tests
// =============================================================================
