//! Tunnel sidecar
//!
//! A privileged proxy variant that routes through a tunnel. It needs kernel
//! features serverless capacity does not offer, so it brings its own instance
//! pool and joins the base cluster through a capacity provider association.
//! Its image is built by a pipeline whose role may update exactly this one
//! service.

use tracing::debug;

use crate::compiler::proxy::{execution_role, ProxyHandles};
use crate::compute::{
    AutoScalingGroup, CapacityProvider, ClusterCapacityProviderAssociation, LaunchTemplate,
};
use crate::context::Environment;
use crate::logs::LogGroupHandle;
use crate::naming::ResourceName;
use crate::network::NetworkHandle;
use crate::pipeline::{BuildProject, BuildSpecSource, Registry, SourceRepository};
use crate::policy::{
    managed_policy_arn, InstanceProfile, Policy, PolicyDocument, PolicyStatement, Role,
    SecurityGroup, ServicePrincipal,
};
use crate::template::{CfnResource, RemovalPolicy, Value};
use crate::workload::{
    Capability, Compatibility, ContainerDefinition, EcsService, ImageSource, LaunchType,
    LogConfiguration, NetworkMode, PortMapping, Protocol, SystemControl, TaskDefinition,
};
use crate::SIDECAR_PORT;

/// Name of the sidecar container
pub const SIDECAR_CONTAINER_NAME: &str = "ProxyWithWarp";
/// Registry the pipeline pushes to
pub const SIDECAR_REPOSITORY_NAME: &str = "proxy/with-warp";
/// Stream prefix of the sidecar
pub const SIDECAR_STREAM_PREFIX: &str = "proxy-with-warp";
/// Directory holding the sidecar build instructions
pub const SIDECAR_BUILD_SPEC_DIR: &str = "lib/proxy-with-warp";
/// Tag the pipeline pushes and the task pulls
pub const SIDECAR_IMAGE_TAG: &str = "latest";
/// Hard memory limit of the sidecar container
pub const SIDECAR_MEMORY_MIB: u32 = 512;
/// Instance type of the sidecar pool
pub const SIDECAR_INSTANCE_TYPE: &str = "t2.micro";
/// Name of the inline document letting the pipeline redeploy the sidecar
pub const UPDATE_SERVICE_POLICY: &str = "updateEcsService";
/// Template parameter resolving the container-optimized machine image
pub const SIDECAR_IMAGE_ID_PARAMETER: &str = "EcsOptimizedAmiImageId";

const INSTANCE_ROLE_POLICY: &str = "service-role/AmazonEC2ContainerServiceforEC2Role";
const EXEC_CHANNEL_ACTIONS: [&str; 4] = [
    "ssmmessages:CreateControlChannel",
    "ssmmessages:CreateDataChannel",
    "ssmmessages:OpenControlChannel",
    "ssmmessages:OpenDataChannel",
];

/// Every resource of the sidecar
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelSidecar {
    /// Image registry
    pub registry: Registry,
    /// Instance role
    pub instance_role: Role,
    /// Instance profile
    pub instance_profile: InstanceProfile,
    /// Instance security group (egress only)
    pub instance_security_group: SecurityGroup,
    /// Launch template
    pub launch_template: LaunchTemplate,
    /// Instance pool
    pub auto_scaling_group: AutoScalingGroup,
    /// Capacity provider over the pool
    pub capacity_provider: CapacityProvider,
    /// Registration of the provider with the base cluster
    pub association: ClusterCapacityProviderAssociation,
    /// Execution role of the sidecar task
    pub execution_role: Role,
    /// Task role (interactive sessions)
    pub task_role: Role,
    /// Self-managed task
    pub task_definition: TaskDefinition,
    /// Service
    pub service: EcsService,
    /// Pipeline role
    pub build_role: Role,
    /// Grants attached to the pipeline role
    pub build_grants: Policy,
    /// Pipeline
    pub build_project: BuildProject,
}

impl TunnelSidecar {
    /// Resources in template order
    pub fn resources(&self) -> Vec<&dyn CfnResource> {
        vec![
            &self.registry,
            &self.instance_role,
            &self.instance_profile,
            &self.instance_security_group,
            &self.launch_template,
            &self.auto_scaling_group,
            &self.capacity_provider,
            &self.association,
            &self.execution_role,
            &self.task_role,
            &self.task_definition,
            &self.service,
            &self.build_role,
            &self.build_grants,
            &self.build_project,
        ]
    }
}

/// Builds the sidecar onto the base proxy's cluster
pub struct TunnelSidecarBuilder<'a> {
    base: &'a ProxyHandles,
    network: NetworkHandle,
    source: SourceRepository,
    environment: Environment,
}

impl<'a> TunnelSidecarBuilder<'a> {
    /// Builder reusing the base proxy's cluster, secrets and log group
    pub fn new(base: &'a ProxyHandles, network: NetworkHandle) -> Self {
        Self {
            base,
            network,
            source: SourceRepository::default(),
            environment: Environment::default(),
        }
    }

    /// Override the pipeline source
    pub fn with_source(mut self, source: SourceRepository) -> Self {
        self.source = source;
        self
    }

    /// Pin account and region in the pipeline environment
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Build every sidecar resource
    pub fn build(self) -> TunnelSidecar {
        let cluster = &self.base.cluster;

        let registry = Registry {
            name: ResourceName::new("ProxyWithWarp-Repo"),
            repository_name: SIDECAR_REPOSITORY_NAME.to_string(),
            removal_policy: RemovalPolicy::Destroy,
        };

        // Capacity
        let mut instance_role = Role::new(
            ResourceName::new("ProxyWithWarp-Asg-InstanceRole"),
            ServicePrincipal::ec2(),
        );
        instance_role.managed_policy_arns.push(managed_policy_arn(INSTANCE_ROLE_POLICY));

        let instance_profile = InstanceProfile {
            name: ResourceName::new("ProxyWithWarp-Asg-InstanceProfile"),
            role: instance_role.name_ref(),
        };

        let instance_security_group = SecurityGroup::new(
            ResourceName::new("ProxyWithWarp-Asg-InstanceSecurityGroup"),
            self.network.vpc_id.clone(),
        );

        let launch_template = LaunchTemplate {
            name: ResourceName::new("ProxyWithWarp-Asg-LaunchTemplate"),
            image_id: Value::reference(SIDECAR_IMAGE_ID_PARAMETER),
            instance_type: SIDECAR_INSTANCE_TYPE.to_string(),
            instance_profile_arn: Value::get_att(instance_profile.logical_id(), "Arn"),
            security_groups: vec![instance_security_group.group_id()],
            associate_public_ip: true,
            cluster: cluster.clone(),
        };

        let auto_scaling_group = AutoScalingGroup {
            name: ResourceName::new("ProxyWithWarp-Asg"),
            launch_template: launch_template.logical_id(),
            min_size: 1,
            max_size: 1,
            desired_capacity: 1,
            subnets: self.network.public_subnet_ids.clone(),
        };

        let capacity_provider = CapacityProvider {
            name: ResourceName::new("ProxyEc2-AsgCapacityProvider"),
            auto_scaling_group: auto_scaling_group.name_ref(),
        };

        let association = ClusterCapacityProviderAssociation {
            name: ResourceName::with_prefix(&cluster.cluster_name, "CapacityProviderAssociation"),
            cluster: cluster.clone(),
            capacity_providers: vec![capacity_provider.name_ref()],
        };

        // Workload
        let execution_role = execution_role(
            ResourceName::new("ProxyWithWarp-TaskExecutionRole"),
            &self.base.secrets,
        );

        let mut task_role =
            Role::new(ResourceName::new("ProxyWithWarp-TaskRole"), ServicePrincipal::ecs_tasks());
        task_role.inline_policies.insert(
            "executeCommand".to_string(),
            PolicyDocument::new(vec![PolicyStatement::allow(
                EXEC_CHANNEL_ACTIONS,
                vec![Value::literal("*")],
            )]),
        );

        let task_definition = TaskDefinition {
            name: ResourceName::new("ProxyWithWarp-Ec2TaskDefinition"),
            compatibility: Compatibility::Ec2,
            network_mode: NetworkMode::Bridge,
            cpu_architecture: None,
            cpu: None,
            memory_mib: None,
            execution_role_arn: execution_role.arn(),
            task_role_arn: Some(task_role.arn()),
            containers: vec![self.container(&registry, &self.base.log_group)],
        };

        let service = EcsService {
            name: ResourceName::new("ProxyWithWarp-Service"),
            cluster: cluster.clone(),
            task_definition: Value::reference(task_definition.logical_id()),
            desired_count: 1,
            launch_type: LaunchType::Ec2,
            network: None,
            enable_execute_command: true,
            // Tasks cannot be placed before the pool is registered
            depends_on: vec![association.logical_id()],
        };
        let service_handle = service.handle();

        // Pipeline
        let mut build_role = Role::new(
            ResourceName::new("ProxyWithWarpCodebuild-Role"),
            ServicePrincipal::codebuild(),
        );
        build_role.role_name = Some(build_role.name.as_str().to_string());
        build_role.inline_policies.insert(
            UPDATE_SERVICE_POLICY.to_string(),
            PolicyDocument::new(vec![PolicyStatement::allow(
                ["ecs:UpdateService"],
                vec![service_handle.arn.clone()],
            )]),
        );

        let project_name = ResourceName::new("ProxyWithWarp-Project");
        let grants_name = project_name.child("DefaultPolicy");

        let build_project = BuildProject {
            name: project_name,
            source: self.source.clone(),
            build_spec: BuildSpecSource {
                directory: SIDECAR_BUILD_SPEC_DIR.to_string(),
            },
            environment_variables: vec![
                ("AWS_DEFAULT_REGION".to_string(), self.environment.region_value()),
                ("AWS_ACCOUNT_ID".to_string(), self.environment.account_value()),
                (
                    "IMAGE_REPO_NAME".to_string(),
                    Value::reference(registry.logical_id()),
                ),
                ("IMAGE_TAG".to_string(), Value::literal(SIDECAR_IMAGE_TAG)),
                ("SERVICE_NAME".to_string(), service_handle.name.clone()),
                ("CLUSTER_NAME".to_string(), cluster.name.clone()),
            ],
            privileged: true,
            service_role: build_role.arn(),
            depends_on: vec![grants_name.logical_id()],
        };

        let mut statements = registry.grant_pull_push();
        statements.push(build_project.grant_logs());
        let build_grants = Policy {
            name: grants_name,
            document: PolicyDocument::new(statements),
            roles: vec![build_role.name_ref()],
        };

        debug!(
            service = %service.name,
            project = %build_project.name,
            branch = %self.source.branch,
            "built tunnel sidecar"
        );

        TunnelSidecar {
            registry,
            instance_role,
            instance_profile,
            instance_security_group,
            launch_template,
            auto_scaling_group,
            capacity_provider,
            association,
            execution_role,
            task_role,
            task_definition,
            service,
            build_role,
            build_grants,
            build_project,
        }
    }

    fn container(&self, registry: &Registry, log_group: &LogGroupHandle) -> ContainerDefinition {
        let mut container = ContainerDefinition::new(
            SIDECAR_CONTAINER_NAME,
            ImageSource::Registry {
                repository_logical_id: registry.logical_id(),
                tag: SIDECAR_IMAGE_TAG.to_string(),
            },
            LogConfiguration {
                group: log_group.clone(),
                stream_prefix: SIDECAR_STREAM_PREFIX.to_string(),
            },
        );
        for (name, secret) in &self.base.secrets {
            container = container.with_secret(name.clone(), secret.clone());
        }
        container.capabilities = vec![Capability::NetAdmin, Capability::SysAdmin];
        container.system_controls = vec![
            SystemControl::new("net.ipv6.conf.all.disable_ipv6", "0"),
            SystemControl::new("net.ipv4.conf.all.src_valid_mark", "1"),
        ];
        container.port_mappings = vec![PortMapping {
            container_port: SIDECAR_PORT,
            protocol: Protocol::Tcp,
        }];
        container.memory_limit_mib = Some(SIDECAR_MEMORY_MIB);
        container.privileged = true;
        container
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::proxy::ProxyServiceBuilder;

    fn network() -> NetworkHandle {
        NetworkHandle {
            vpc_id: Value::import("PersonalProxyStack-Vpc-VpcId"),
            public_subnet_ids: vec![Value::import("PersonalProxyStack-Vpc-SubnetId")],
        }
    }

    fn sidecar() -> (ProxyHandles, TunnelSidecar) {
        let (_, handles) = ProxyServiceBuilder::new(network()).build();
        let sidecar = TunnelSidecarBuilder::new(&handles, network()).build();
        (handles, sidecar)
    }

    // =========================================================================
    // Story: Sidecar joins the base cluster
    // =========================================================================

    #[test]
    fn story_capacity_joins_base_cluster_through_association() {
        let (handles, sidecar) = sidecar();

        assert_eq!(sidecar.association.cluster, handles.cluster);
        assert_eq!(
            sidecar.association.capacity_providers,
            vec![sidecar.capacity_provider.name_ref()]
        );
        assert_eq!(sidecar.service.cluster, handles.cluster);
        assert_eq!(
            sidecar.service.depends_on,
            vec![sidecar.association.logical_id()]
        );
        assert_eq!(sidecar.launch_template.cluster, handles.cluster);
    }

    #[test]
    fn story_pool_is_one_public_micro_instance() {
        let (_, sidecar) = sidecar();

        assert_eq!(sidecar.launch_template.instance_type, "t2.micro");
        assert!(sidecar.launch_template.associate_public_ip);
        assert_eq!(
            sidecar.launch_template.image_id,
            Value::reference(SIDECAR_IMAGE_ID_PARAMETER)
        );
        let asg = &sidecar.auto_scaling_group;
        assert_eq!((asg.min_size, asg.max_size, asg.desired_capacity), (1, 1, 1));
        assert_eq!(asg.subnets, network().public_subnet_ids);
        assert!(sidecar.instance_security_group.ingress.is_empty());
    }

    // =========================================================================
    // Story: Privileged container
    // =========================================================================

    #[test]
    fn story_container_is_privileged_with_tunnel_settings() {
        let (handles, sidecar) = sidecar();
        let task = &sidecar.task_definition;
        assert_eq!(task.compatibility, Compatibility::Ec2);
        assert_eq!(task.network_mode, NetworkMode::Bridge);

        let container = task.container("ProxyWithWarp").unwrap();
        assert!(container.privileged);
        assert_eq!(container.capabilities, vec![Capability::NetAdmin, Capability::SysAdmin]);
        assert_eq!(container.memory_limit_mib, Some(512));
        assert_eq!(container.port_mappings[0].container_port, 9091);
        assert_eq!(
            container
                .system_controls
                .iter()
                .map(|s| (s.namespace.as_str(), s.value.as_str()))
                .collect::<Vec<_>>(),
            vec![
                ("net.ipv6.conf.all.disable_ipv6", "0"),
                ("net.ipv4.conf.all.src_valid_mark", "1"),
            ]
        );
        assert_eq!(container.secrets, handles.secrets);
        assert_eq!(container.logging.group, handles.log_group);
        assert_eq!(container.logging.stream_prefix, "proxy-with-warp");
        assert_eq!(
            container.image.image(),
            Value::sub("${PersonalProxyStackProxyWithWarpRepo.RepositoryUri}:latest")
        );
    }

    #[test]
    fn story_service_allows_interactive_sessions() {
        let (_, sidecar) = sidecar();
        assert_eq!(
            sidecar.service.name.as_str(),
            "PersonalProxyStack-ProxyWithWarp-Service"
        );
        assert!(sidecar.service.enable_execute_command);
        assert_eq!(sidecar.service.desired_count, 1);

        let doc = sidecar.task_role.inline_policy("executeCommand").unwrap();
        assert_eq!(doc.actions().len(), 4);
        assert!(doc.actions().iter().all(|a| a.starts_with("ssmmessages:")));
    }

    // =========================================================================
    // Story: Pipeline is least privilege
    // =========================================================================

    #[test]
    fn story_build_role_updates_exactly_the_sidecar_service() {
        let (_, sidecar) = sidecar();
        assert_eq!(
            sidecar.build_role.role_name.as_deref(),
            Some("PersonalProxyStack-ProxyWithWarpCodebuild-Role")
        );

        let doc = sidecar.build_role.inline_policy("updateEcsService").unwrap();
        assert_eq!(doc.actions(), vec!["ecs:UpdateService"]);
        assert_eq!(doc.resources(), vec![&sidecar.service.handle().arn]);
        assert_eq!(sidecar.build_role.inline_policies.len(), 1);
    }

    #[test]
    fn story_registry_grant_targets_only_the_sidecar_registry() {
        let (_, sidecar) = sidecar();
        let doc = &sidecar.build_grants.document;
        let registry_arn = sidecar.registry.arn();

        for statement in &doc.statements {
            if statement.actions.iter().any(|a| a.starts_with("ecr:Put")) {
                assert_eq!(statement.resources, vec![registry_arn.clone()]);
            }
        }
        assert_eq!(sidecar.build_grants.roles, vec![sidecar.build_role.name_ref()]);
        assert_eq!(
            sidecar.build_project.depends_on,
            vec![sidecar.build_grants.logical_id()]
        );
    }

    #[test]
    fn story_pipeline_environment_bindings() {
        let (handles, sidecar) = sidecar();
        let project = &sidecar.build_project;

        let names: Vec<&str> = project
            .environment_variables
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "AWS_DEFAULT_REGION",
                "AWS_ACCOUNT_ID",
                "IMAGE_REPO_NAME",
                "IMAGE_TAG",
                "SERVICE_NAME",
                "CLUSTER_NAME",
            ]
        );
        assert_eq!(project.environment_variable("IMAGE_TAG"), Some(&Value::literal("latest")));
        assert_eq!(project.environment_variable("CLUSTER_NAME"), Some(&handles.cluster.name));
        assert_eq!(
            project.environment_variable("AWS_DEFAULT_REGION"),
            Some(&Value::pseudo(crate::template::PseudoParameter::Region))
        );
        assert!(project.privileged);
        assert_eq!(project.build_spec.path(), "lib/proxy-with-warp/buildspec.yml");
        assert_eq!(project.source, SourceRepository::default());
    }

    #[test]
    fn story_environment_and_source_overrides_flow_into_pipeline() {
        let (_, handles) = ProxyServiceBuilder::new(network()).build();
        let sidecar = TunnelSidecarBuilder::new(&handles, network())
            .with_environment(Environment::new("123456789012", "ap-east-1"))
            .with_source(SourceRepository {
                owner: "someone".to_string(),
                repo: "fork".to_string(),
                branch: "main".to_string(),
            })
            .build();

        let project = &sidecar.build_project;
        assert_eq!(
            project.environment_variable("AWS_ACCOUNT_ID"),
            Some(&Value::literal("123456789012"))
        );
        assert_eq!(project.source.location(), "https://github.com/someone/fork.git");
        assert_eq!(project.source.branch, "main");
    }
}
