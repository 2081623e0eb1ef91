//! End-to-end rendering tests
//!
//! Build the deployment from a context, render both stacks and assert on the
//! serialized templates, the way the provisioning engine would see them.

use personal_infra::compiler::DeploymentBuilder;
use personal_infra::context::DeploymentContext;
use personal_infra::template::{render, OutputFormat};
use rstest::rstest;
use serde_json::Value;

const SIDECAR_TYPES: [&str; 6] = [
    "AWS::ECR::Repository",
    "AWS::AutoScaling::AutoScalingGroup",
    "AWS::ECS::CapacityProvider",
    "AWS::ECS::ClusterCapacityProviderAssociations",
    "AWS::CodeBuild::Project",
    "AWS::EC2::LaunchTemplate",
];

fn synth(context: &DeploymentContext) -> (Value, Value) {
    let graph = DeploymentBuilder::new(context).build().unwrap();
    let stacks = render(&graph).unwrap();
    let parse = |i: usize| -> Value {
        serde_json::from_str(&stacks[i].serialize(OutputFormat::Json).unwrap()).unwrap()
    };
    (parse(0), parse(1))
}

fn proxy_stack(use_warp: Option<Value>) -> Value {
    let mut context = DeploymentContext::new();
    if let Some(flag) = use_warp {
        context = context.with("useWarp", flag);
    }
    synth(&context).1
}

fn resources_of_type<'a>(template: &'a Value, type_: &str) -> Vec<(&'a String, &'a Value)> {
    template["Resources"]
        .as_object()
        .unwrap()
        .iter()
        .filter(|(_, r)| r["Type"] == type_)
        .collect()
}

fn resource<'a>(template: &'a Value, logical_id: &str) -> &'a Value {
    template["Resources"]
        .get(logical_id)
        .unwrap_or_else(|| panic!("missing resource {logical_id}"))
}

// =============================================================================
// Flag gating
// =============================================================================

#[rstest]
#[case::unset(None)]
#[case::false_bool(Some(Value::Bool(false)))]
#[case::false_string(Some(Value::from("false")))]
#[case::malformed(Some(Value::from("sometimes")))]
#[case::wrong_type(Some(serde_json::json!({ "enabled": true })))]
fn sidecar_absent_unless_flag_is_true(#[case] flag: Option<Value>) {
    let template = proxy_stack(flag);
    for type_ in SIDECAR_TYPES {
        assert!(
            resources_of_type(&template, type_).is_empty(),
            "{type_} present without the flag"
        );
    }
    assert_eq!(resources_of_type(&template, "AWS::ECS::Service").len(), 1);
    assert_eq!(resources_of_type(&template, "AWS::ECS::TaskDefinition").len(), 1);
}

#[rstest]
#[case::bool_true(Value::Bool(true))]
#[case::string_true(Value::from("true"))]
fn sidecar_present_when_flag_is_true(#[case] flag: Value) {
    let template = proxy_stack(Some(flag));
    for type_ in SIDECAR_TYPES {
        assert_eq!(
            resources_of_type(&template, type_).len(),
            1,
            "expected exactly one {type_}"
        );
    }
    assert_eq!(resources_of_type(&template, "AWS::ECS::Service").len(), 2);
    assert_eq!(resources_of_type(&template, "AWS::ECS::Cluster").len(), 1);
}

// =============================================================================
// Base service
// =============================================================================

#[test]
fn base_security_group_opens_exactly_the_proxy_port() {
    let template = proxy_stack(None);
    let sg = resource(&template, "PersonalProxyStackProxySecurityGroup");
    let ingress = sg["Properties"]["SecurityGroupIngress"].as_array().unwrap();

    assert_eq!(ingress.len(), 2);
    let mut protocols: Vec<&str> = ingress
        .iter()
        .map(|rule| {
            assert_eq!(rule["CidrIp"], "0.0.0.0/0");
            assert_eq!(rule["FromPort"], 8388);
            assert_eq!(rule["ToPort"], 8388);
            rule["IpProtocol"].as_str().unwrap()
        })
        .collect();
    protocols.sort();
    assert_eq!(protocols, vec!["tcp", "udp"]);
}

#[test]
fn base_service_is_public_fargate_arm64() {
    let template = proxy_stack(None);
    let service = resource(&template, "PersonalProxyStackProxyService");
    let props = &service["Properties"];
    assert_eq!(props["ServiceName"], "PersonalProxyStack-Proxy-Service");
    assert_eq!(props["DesiredCount"], 1);
    assert_eq!(props["LaunchType"], "FARGATE");
    assert_eq!(
        props["NetworkConfiguration"]["AwsvpcConfiguration"]["AssignPublicIp"],
        "ENABLED"
    );

    let task = resource(&template, "PersonalProxyStackProxyFargateTaskDefinition");
    assert_eq!(task["Properties"]["RuntimePlatform"]["CpuArchitecture"], "ARM64");
    let containers = task["Properties"]["ContainerDefinitions"].as_array().unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0]["Name"], "proxy");
    assert_eq!(containers[0]["Image"], serde_json::json!({ "Ref": "AssetImageProxy" }));
    assert!(template["Parameters"]["AssetImageProxy"].is_object());
}

#[test]
fn log_group_has_three_day_retention_and_is_destroyed() {
    let template = proxy_stack(None);
    let group = resource(&template, "PersonalProxyStackProxyLogGroup");
    assert_eq!(group["Properties"]["LogGroupName"], "/aws/ecs/proxy");
    assert_eq!(group["Properties"]["RetentionInDays"], 3);
    assert_eq!(group["DeletionPolicy"], "Delete");
}

// =============================================================================
// Secrets
// =============================================================================

#[test]
fn every_secret_binding_is_a_reference() {
    let template = proxy_stack(Some(Value::Bool(true)));
    let mut seen = 0;
    for (_, task) in resources_of_type(&template, "AWS::ECS::TaskDefinition") {
        for container in task["Properties"]["ContainerDefinitions"].as_array().unwrap() {
            let secrets = container["Secrets"].as_array().unwrap();
            assert_eq!(secrets.len(), 2);
            for secret in secrets {
                let value_from = &secret["ValueFrom"];
                assert!(!value_from.is_string(), "secret rendered as a literal");
                let pattern = value_from["Fn::Sub"].as_str().unwrap();
                assert!(pattern.contains(":parameter/proxy/SS_"));
                seen += 1;
            }
            assert!(container.get("Environment").is_none());
        }
    }
    assert_eq!(seen, 4);
}

// =============================================================================
// Sidecar permissions
// =============================================================================

#[test]
fn build_role_updates_exactly_one_service() {
    let template = proxy_stack(Some(Value::Bool(true)));
    let role = resource(&template, "PersonalProxyStackProxyWithWarpCodebuildRole");
    let props = &role["Properties"];
    assert_eq!(props["RoleName"], "PersonalProxyStack-ProxyWithWarpCodebuild-Role");

    let policies = props["Policies"].as_array().unwrap();
    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0]["PolicyName"], "updateEcsService");

    let statements = policies[0]["PolicyDocument"]["Statement"].as_array().unwrap();
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0]["Action"], "ecs:UpdateService");
    assert_eq!(
        statements[0]["Resource"],
        serde_json::json!({ "Ref": "PersonalProxyStackProxyWithWarpService" })
    );
}

#[test]
fn registry_grant_is_scoped_to_the_sidecar_registry() {
    let template = proxy_stack(Some(Value::Bool(true)));
    let (_, policy) = resources_of_type(&template, "AWS::IAM::Policy")
        .into_iter()
        .next()
        .unwrap();
    let statements = policy["Properties"]["PolicyDocument"]["Statement"]
        .as_array()
        .unwrap();

    let push = statements
        .iter()
        .find(|s| {
            s["Action"]
                .as_array()
                .is_some_and(|a| a.iter().any(|x| x == "ecr:PutImage"))
        })
        .unwrap();
    assert_eq!(
        push["Resource"],
        serde_json::json!({ "Fn::GetAtt": ["PersonalProxyStackProxyWithWarpRepo", "Arn"] })
    );
    assert_eq!(
        policy["Properties"]["Roles"],
        serde_json::json!([{ "Ref": "PersonalProxyStackProxyWithWarpCodebuildRole" }])
    );
}

#[test]
fn build_project_environment_and_source() {
    let template = proxy_stack(Some(Value::Bool(true)));
    let project = resource(&template, "PersonalProxyStackProxyWithWarpProject");
    let props = &project["Properties"];

    assert_eq!(
        props["Source"]["Location"],
        "https://github.com/thomas0chow/personal-infra.git"
    );
    assert_eq!(props["SourceVersion"], "feature/warp");
    assert_eq!(props["Environment"]["PrivilegedMode"], true);

    let env = props["Environment"]["EnvironmentVariables"].as_array().unwrap();
    let names: Vec<&str> = env.iter().map(|e| e["Name"].as_str().unwrap()).collect();
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
    assert_eq!(env[3]["Value"], "latest");
    assert_eq!(env[0]["Value"], serde_json::json!({ "Ref": "AWS::Region" }));
}

#[test]
fn cluster_never_references_capacity() {
    let template = proxy_stack(Some(Value::Bool(true)));
    let cluster = resource(&template, "PersonalProxyStackProxyCluster");
    let text = serde_json::to_string(cluster).unwrap();
    assert!(!text.contains("CapacityProvider"));

    let (_, association) =
        resources_of_type(&template, "AWS::ECS::ClusterCapacityProviderAssociations")
            .into_iter()
            .next()
            .unwrap();
    assert_eq!(
        association["Properties"]["Cluster"],
        serde_json::json!({ "Ref": "PersonalProxyStackProxyCluster" })
    );
}

// =============================================================================
// Toggling and determinism
// =============================================================================

#[test]
fn enabling_sidecar_only_adds_resources() {
    let off = proxy_stack(None);
    let on = proxy_stack(Some(Value::Bool(true)));

    for (id, resource) in off["Resources"].as_object().unwrap() {
        assert_eq!(&on["Resources"][id], resource, "{id} changed when enabling sidecar");
    }
    assert!(
        on["Resources"].as_object().unwrap().len() > off["Resources"].as_object().unwrap().len()
    );
}

#[test]
fn network_stack_is_independent_of_flag() {
    let (off, _) = synth(&DeploymentContext::new());
    let (on, _) = synth(&DeploymentContext::new().with("useWarp", true));
    assert_eq!(off, on);

    let subnets = resources_of_type(&off, "AWS::EC2::Subnet");
    assert_eq!(subnets.len(), 1);
    assert_eq!(subnets[0].1["Properties"]["CidrBlock"], "10.0.0.0/24");
    assert_eq!(
        resource(&off, "PersonalProxyStackVpc")["Properties"]["CidrBlock"],
        "10.0.0.0/16"
    );
}

#[test]
fn identical_context_renders_identical_templates() {
    let context = DeploymentContext::new().with("useWarp", true);
    assert_eq!(synth(&context), synth(&context));
}
