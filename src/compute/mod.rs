//! Self-managed compute capacity
//!
//! An auto-scaling group of container-optimized instances, registered with a
//! cluster as a capacity provider. Registration goes through a separate
//! association resource that references the cluster, so the cluster resource
//! itself never depends on the capacity and removing the capacity leaves the
//! cluster untouched.

use crate::naming::ResourceName;
use crate::template::{CfnResource, Value};
use crate::workload::ClusterHandle;

/// Public parameter resolving to the current container-optimized Amazon Linux 2 image
pub const ECS_OPTIMIZED_AL2_IMAGE_PARAMETER: &str =
    "/aws/service/ecs/optimized-ami/amazon-linux-2/recommended/image_id";

/// Instance launch template
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchTemplate {
    /// Resource name
    pub name: ResourceName,
    /// Machine image ID
    pub image_id: Value,
    /// Instance type, e.g. `t2.micro`
    pub instance_type: String,
    /// Instance profile ARN
    pub instance_profile_arn: Value,
    /// Security groups of the primary interface
    pub security_groups: Vec<Value>,
    /// Give instances a public address
    pub associate_public_ip: bool,
    /// Cluster the instance agent joins
    pub cluster: ClusterHandle,
}

impl LaunchTemplate {
    /// Boot script pointing the container agent at the cluster
    fn user_data(&self) -> Value {
        Value::base64(Value::sub(format!(
            "#!/bin/bash\necho ECS_CLUSTER=${{{}}} >> /etc/ecs/ecs.config",
            self.cluster.logical_id
        )))
    }
}

impl CfnResource for LaunchTemplate {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::EC2::LaunchTemplate"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "LaunchTemplateData": {
                "ImageId": self.image_id,
                "InstanceType": self.instance_type,
                "IamInstanceProfile": { "Arn": self.instance_profile_arn },
                "NetworkInterfaces": [{
                    "DeviceIndex": 0,
                    "AssociatePublicIpAddress": self.associate_public_ip,
                    "Groups": self.security_groups,
                }],
                "UserData": self.user_data(),
            },
            "TagSpecifications": [{
                "ResourceType": "instance",
                "Tags": [{ "Key": "Name", "Value": self.name.as_str() }],
            }],
        })
    }
}

/// Auto-scaling group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AutoScalingGroup {
    /// Resource name
    pub name: ResourceName,
    /// Launch template logical ID
    pub launch_template: String,
    /// Minimum size
    pub min_size: u32,
    /// Maximum size
    pub max_size: u32,
    /// Desired capacity
    pub desired_capacity: u32,
    /// Subnets instances launch into
    pub subnets: Vec<Value>,
}

impl AutoScalingGroup {
    /// Group name value
    pub fn name_ref(&self) -> Value {
        Value::reference(self.name.logical_id())
    }
}

impl CfnResource for AutoScalingGroup {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::AutoScaling::AutoScalingGroup"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "MinSize": self.min_size.to_string(),
            "MaxSize": self.max_size.to_string(),
            "DesiredCapacity": self.desired_capacity.to_string(),
            "LaunchTemplate": {
                "LaunchTemplateId": Value::reference(self.launch_template.clone()),
                "Version": Value::get_att(self.launch_template.clone(), "LatestVersionNumber"),
            },
            "VPCZoneIdentifier": self.subnets,
        })
    }
}

/// Capacity provider backed by an auto-scaling group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapacityProvider {
    /// Resource name
    pub name: ResourceName,
    /// Auto-scaling group name
    pub auto_scaling_group: Value,
}

impl CapacityProvider {
    /// Provider name value
    pub fn name_ref(&self) -> Value {
        Value::reference(self.name.logical_id())
    }
}

impl CfnResource for CapacityProvider {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::ECS::CapacityProvider"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "AutoScalingGroupProvider": {
                "AutoScalingGroupArn": self.auto_scaling_group,
                "ManagedScaling": {
                    "Status": "ENABLED",
                    "TargetCapacity": 100,
                },
                "ManagedTerminationProtection": "DISABLED",
            },
        })
    }
}

/// Association of capacity providers with a cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterCapacityProviderAssociation {
    /// Resource name
    pub name: ResourceName,
    /// Cluster
    pub cluster: ClusterHandle,
    /// Provider names
    pub capacity_providers: Vec<Value>,
}

impl CfnResource for ClusterCapacityProviderAssociation {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::ECS::ClusterCapacityProviderAssociations"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "Cluster": self.cluster.name,
            "CapacityProviders": self.capacity_providers,
            "DefaultCapacityProviderStrategy": [],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::Cluster;

    fn cluster() -> ClusterHandle {
        Cluster {
            name: ResourceName::new("Proxy-Cluster"),
        }
        .handle()
    }

    #[test]
    fn launch_template_joins_cluster_via_user_data() {
        let lt = LaunchTemplate {
            name: ResourceName::new("Asg-LaunchTemplate"),
            image_id: Value::reference("ImageParam"),
            instance_type: "t2.micro".to_string(),
            instance_profile_arn: Value::get_att("Profile", "Arn"),
            security_groups: vec![Value::get_att("Sg", "GroupId")],
            associate_public_ip: true,
            cluster: cluster(),
        };

        let props = lt.properties();
        let data = &props["LaunchTemplateData"];
        assert_eq!(data["InstanceType"], "t2.micro");
        assert_eq!(data["NetworkInterfaces"][0]["AssociatePublicIpAddress"], true);
        assert_eq!(
            data["UserData"]["Fn::Base64"]["Fn::Sub"],
            "#!/bin/bash\necho ECS_CLUSTER=${PersonalProxyStackProxyCluster} >> /etc/ecs/ecs.config"
        );
    }

    #[test]
    fn auto_scaling_group_sizes_are_strings() {
        let asg = AutoScalingGroup {
            name: ResourceName::new("Asg"),
            launch_template: "Lt".to_string(),
            min_size: 1,
            max_size: 1,
            desired_capacity: 1,
            subnets: vec![Value::import("subnet")],
        };
        let props = asg.properties();
        assert_eq!(props["MinSize"], "1");
        assert_eq!(props["DesiredCapacity"], "1");
        assert_eq!(
            props["LaunchTemplate"]["Version"],
            serde_json::json!({ "Fn::GetAtt": ["Lt", "LatestVersionNumber"] })
        );
    }

    #[test]
    fn association_references_cluster_not_the_reverse() {
        let provider = CapacityProvider {
            name: ResourceName::new("CapacityProvider"),
            auto_scaling_group: Value::reference("Asg"),
        };
        let assoc = ClusterCapacityProviderAssociation {
            name: ResourceName::new("Proxy-Cluster-Association"),
            cluster: cluster(),
            capacity_providers: vec![provider.name_ref()],
        };

        let props = assoc.properties();
        assert_eq!(
            props["Cluster"],
            serde_json::json!({ "Ref": "PersonalProxyStackProxyCluster" })
        );
        assert_eq!(
            props["CapacityProviders"],
            serde_json::json!([{ "Ref": "PersonalProxyStackCapacityProvider" }])
        );
        assert_eq!(props["DefaultCapacityProviderStrategy"], serde_json::json!([]));
    }
}
