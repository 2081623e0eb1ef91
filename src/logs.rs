//! Container log destinations

use crate::naming::ResourceName;
use crate::template::{CfnResource, RemovalPolicy, Value};

/// Retention periods the log service accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetentionDays {
    /// 3 days
    ThreeDays,
}

impl RetentionDays {
    /// Retention in days
    pub fn days(&self) -> u32 {
        match self {
            Self::ThreeDays => 3,
        }
    }
}

/// A log group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogGroup {
    /// Resource name
    pub name: ResourceName,
    /// Log group name, e.g. `/aws/ecs/proxy`
    pub log_group_name: String,
    /// Retention
    pub retention: RetentionDays,
    /// Removal policy
    pub removal_policy: RemovalPolicy,
}

impl LogGroup {
    /// Handle for containers logging into this group
    pub fn handle(&self) -> LogGroupHandle {
        LogGroupHandle {
            logical_id: self.name.logical_id(),
            name: Value::reference(self.name.logical_id()),
            arn: Value::get_att(self.name.logical_id(), "Arn"),
        }
    }
}

impl CfnResource for LogGroup {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::Logs::LogGroup"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "LogGroupName": self.log_group_name,
            "RetentionInDays": self.retention.days(),
        })
    }

    fn removal_policy(&self) -> Option<RemovalPolicy> {
        Some(self.removal_policy)
    }
}

/// Reference to a log group, shared between workloads
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogGroupHandle {
    /// Logical ID of the group
    pub logical_id: String,
    /// Group name value
    pub name: Value,
    /// Group ARN value
    pub arn: Value,
}
