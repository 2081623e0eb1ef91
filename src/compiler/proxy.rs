//! Base proxy service
//!
//! Always built. Produces the cluster every workload in the deployment joins,
//! the serverless proxy task, its log group, and a public security group with
//! the proxy port open on both transports.

use std::collections::BTreeMap;

use tracing::debug;

use crate::logs::{LogGroup, LogGroupHandle, RetentionDays};
use crate::naming::ResourceName;
use crate::network::NetworkHandle;
use crate::policy::{
    managed_policy_arn, Peer, PolicyDocument, PolicyStatement, Role, SecurityGroup,
    ServicePrincipal,
};
use crate::template::{CfnResource, RemovalPolicy, Value};
use crate::workload::{
    Cluster, ClusterHandle, Compatibility, ContainerDefinition, CpuArchitecture, EcsService,
    ImageSource, LaunchType, LogConfiguration, NetworkMode, Protocol, SecretReference,
    ServiceNetwork, TaskDefinition,
};
use crate::PROXY_PORT;

/// Name of the proxy container
pub const PROXY_CONTAINER_NAME: &str = "proxy";
/// Build context of the proxy image
pub const PROXY_BUILD_CONTEXT: &str = "lib/proxy";
/// Log group shared by every proxy container
pub const PROXY_LOG_GROUP_NAME: &str = "/aws/ecs/proxy";
/// Stream prefix of the base proxy
pub const PROXY_STREAM_PREFIX: &str = "proxy";
/// Secret bindings: environment variable to parameter path
pub const PROXY_SECRETS: [(&str, &str); 2] = [
    ("SS_ALGORITHM", "/proxy/SS_ALGORITHM"),
    ("SS_PASSWORD", "/proxy/SS_PASSWORD"),
];
/// Default serverless task CPU units
pub const DEFAULT_TASK_CPU: u32 = 256;
/// Default serverless task memory in MiB
pub const DEFAULT_TASK_MEMORY_MIB: u32 = 512;

const TASK_EXECUTION_POLICY: &str = "service-role/AmazonECSTaskExecutionRolePolicy";

/// Resources of the base proxy service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyResources {
    /// Cluster shared with the sidecar
    pub cluster: Cluster,
    /// Log group shared with the sidecar
    pub log_group: LogGroup,
    /// Execution role of the proxy task
    pub execution_role: Role,
    /// Serverless task
    pub task_definition: TaskDefinition,
    /// Public security group
    pub security_group: SecurityGroup,
    /// Service
    pub service: EcsService,
}

impl ProxyResources {
    /// Resources in template order
    pub fn resources(&self) -> Vec<&dyn CfnResource> {
        vec![
            &self.cluster,
            &self.log_group,
            &self.execution_role,
            &self.task_definition,
            &self.security_group,
            &self.service,
        ]
    }
}

/// Handles the sidecar builds on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyHandles {
    /// Cluster
    pub cluster: ClusterHandle,
    /// Secret bindings
    pub secrets: BTreeMap<String, SecretReference>,
    /// Log group
    pub log_group: LogGroupHandle,
}

/// Builds the base proxy service into a network
pub struct ProxyServiceBuilder {
    network: NetworkHandle,
    cpu: u32,
    memory_mib: u32,
}

impl ProxyServiceBuilder {
    /// Builder placing the service in the public subnets of `network`
    pub fn new(network: NetworkHandle) -> Self {
        Self {
            network,
            cpu: DEFAULT_TASK_CPU,
            memory_mib: DEFAULT_TASK_MEMORY_MIB,
        }
    }

    /// Override serverless task sizing
    pub fn with_task_size(mut self, cpu: u32, memory_mib: u32) -> Self {
        self.cpu = cpu;
        self.memory_mib = memory_mib;
        self
    }

    /// Build the base service and the handles dependent builders need
    pub fn build(self) -> (ProxyResources, ProxyHandles) {
        let cluster = Cluster {
            name: ResourceName::new("Proxy-Cluster"),
        };

        let log_group = LogGroup {
            name: ResourceName::new("Proxy-LogGroup"),
            log_group_name: PROXY_LOG_GROUP_NAME.to_string(),
            retention: RetentionDays::ThreeDays,
            removal_policy: RemovalPolicy::Destroy,
        };

        let secrets: BTreeMap<String, SecretReference> = PROXY_SECRETS
            .iter()
            .map(|(name, path)| (name.to_string(), SecretReference::from_parameter(*path)))
            .collect();

        let execution_role = execution_role(ResourceName::new("Proxy-TaskExecutionRole"), &secrets);

        let mut container = ContainerDefinition::new(
            PROXY_CONTAINER_NAME,
            ImageSource::asset(PROXY_BUILD_CONTEXT),
            LogConfiguration {
                group: log_group.handle(),
                stream_prefix: PROXY_STREAM_PREFIX.to_string(),
            },
        );
        for (name, secret) in &secrets {
            container = container.with_secret(name.clone(), secret.clone());
        }

        let task_definition = TaskDefinition {
            name: ResourceName::new("Proxy-FargateTaskDefinition"),
            compatibility: Compatibility::Fargate,
            network_mode: NetworkMode::AwsVpc,
            cpu_architecture: Some(CpuArchitecture::Arm64),
            cpu: Some(self.cpu),
            memory_mib: Some(self.memory_mib),
            execution_role_arn: execution_role.arn(),
            task_role_arn: None,
            containers: vec![container],
        };

        let mut security_group = SecurityGroup::new(
            ResourceName::new("Proxy-SecurityGroup"),
            self.network.vpc_id.clone(),
        );
        security_group.add_ingress_rule(Peer::AnyIpv4, Protocol::Tcp, PROXY_PORT);
        security_group.add_ingress_rule(Peer::AnyIpv4, Protocol::Udp, PROXY_PORT);

        let service = EcsService {
            name: ResourceName::new("Proxy-Service"),
            cluster: cluster.handle(),
            task_definition: Value::reference(task_definition.logical_id()),
            desired_count: 1,
            launch_type: LaunchType::Fargate,
            network: Some(ServiceNetwork {
                security_groups: vec![security_group.group_id()],
                subnets: self.network.public_subnet_ids.clone(),
                assign_public_ip: true,
            }),
            enable_execute_command: false,
            depends_on: Vec::new(),
        };

        debug!(service = %service.name, cluster = %cluster.name, "built proxy service");

        let handles = ProxyHandles {
            cluster: cluster.handle(),
            secrets,
            log_group: log_group.handle(),
        };

        (
            ProxyResources {
                cluster,
                log_group,
                execution_role,
                task_definition,
                security_group,
                service,
            },
            handles,
        )
    }
}

/// Execution role able to start tasks and read exactly the given secrets
pub(crate) fn execution_role(
    name: ResourceName,
    secrets: &BTreeMap<String, SecretReference>,
) -> Role {
    let mut role = Role::new(name, ServicePrincipal::ecs_tasks());
    role.managed_policy_arns.push(managed_policy_arn(TASK_EXECUTION_POLICY));

    let parameters = secrets.values().map(SecretReference::arn).collect();
    role.inline_policies.insert(
        "readSecrets".to_string(),
        PolicyDocument::new(vec![PolicyStatement::allow(
            ["ssm:GetParameters"],
            parameters,
        )]),
    );
    role
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> NetworkHandle {
        NetworkHandle {
            vpc_id: Value::import("PersonalProxyStack-Vpc-VpcId"),
            public_subnet_ids: vec![Value::import("PersonalProxyStack-Vpc-SubnetId")],
        }
    }

    // =========================================================================
    // Story: Base proxy shape
    // =========================================================================

    #[test]
    fn story_proxy_service_uses_fixed_names() {
        let (resources, _) = ProxyServiceBuilder::new(network()).build();

        assert_eq!(resources.cluster.name.as_str(), "PersonalProxyStack-Proxy-Cluster");
        assert_eq!(resources.service.name.as_str(), "PersonalProxyStack-Proxy-Service");
        assert_eq!(resources.service.desired_count, 1);
        assert_eq!(resources.log_group.log_group_name, "/aws/ecs/proxy");
        assert_eq!(resources.log_group.retention, RetentionDays::ThreeDays);
        assert_eq!(resources.log_group.removal_policy, RemovalPolicy::Destroy);
        assert_eq!(resources.resources().len(), 6);
    }

    #[test]
    fn story_single_arm64_container_from_local_context() {
        let (resources, _) = ProxyServiceBuilder::new(network()).build();
        let task = &resources.task_definition;

        assert_eq!(task.compatibility, Compatibility::Fargate);
        assert_eq!(task.cpu_architecture, Some(CpuArchitecture::Arm64));
        assert_eq!(task.cpu, Some(256));
        assert_eq!(task.memory_mib, Some(512));
        assert_eq!(task.containers.len(), 1);

        let container = task.container("proxy").unwrap();
        assert_eq!(container.image.asset_parameter(), Some(("AssetImageProxy", "lib/proxy")));
        assert_eq!(container.logging.stream_prefix, "proxy");
        assert_eq!(
            container.secrets.keys().collect::<Vec<_>>(),
            vec!["SS_ALGORITHM", "SS_PASSWORD"]
        );
        assert_eq!(
            container.secrets["SS_PASSWORD"].parameter_name(),
            "/proxy/SS_PASSWORD"
        );
    }

    #[test]
    fn story_security_group_opens_proxy_port_on_both_transports() {
        let (resources, _) = ProxyServiceBuilder::new(network()).build();
        let rules = &resources.security_group.ingress;

        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.port == 8388 && r.peer == Peer::AnyIpv4));
        assert!(rules.iter().any(|r| r.protocol == Protocol::Tcp));
        assert!(rules.iter().any(|r| r.protocol == Protocol::Udp));
        assert_eq!(
            resources.security_group.vpc_id,
            Value::import("PersonalProxyStack-Vpc-VpcId")
        );
    }

    #[test]
    fn story_service_is_public_in_network_subnets() {
        let (resources, _) = ProxyServiceBuilder::new(network()).build();
        let net = resources.service.network.as_ref().unwrap();

        assert!(net.assign_public_ip);
        assert_eq!(net.subnets, network().public_subnet_ids);
        assert_eq!(net.security_groups, vec![resources.security_group.group_id()]);
    }

    // =========================================================================
    // Story: Secret access is scoped
    // =========================================================================

    #[test]
    fn story_execution_role_reads_exactly_the_two_secrets() {
        let (resources, handles) = ProxyServiceBuilder::new(network()).build();
        let doc = resources.execution_role.inline_policy("readSecrets").unwrap();

        assert_eq!(doc.actions(), vec!["ssm:GetParameters"]);
        let expected: Vec<Value> = handles.secrets.values().map(SecretReference::arn).collect();
        assert_eq!(doc.resources().into_iter().cloned().collect::<Vec<_>>(), expected);
        assert!(!doc.has_wildcard());
    }

    #[test]
    fn story_handles_point_at_built_resources() {
        let (resources, handles) = ProxyServiceBuilder::new(network()).build();
        assert_eq!(handles.cluster, resources.cluster.handle());
        assert_eq!(handles.log_group, resources.log_group.handle());
        assert_eq!(handles.secrets.len(), 2);
    }

    #[test]
    fn story_task_size_can_be_overridden() {
        let (resources, _) = ProxyServiceBuilder::new(network())
            .with_task_size(512, 1024)
            .build();
        assert_eq!(resources.task_definition.cpu, Some(512));
        assert_eq!(resources.task_definition.memory_mib, Some(1024));
    }
}
