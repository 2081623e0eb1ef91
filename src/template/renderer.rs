//! Stack rendering
//!
//! Splits a [`ResourceGraph`] into the two templates the deployment is made
//! of: the network stack, which exports its identifiers, and the service
//! stack, which imports them. Both templates are checked before they are
//! returned: every same-template reference must resolve, and every import
//! must match an export of the network stack.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::{Template, Value};
use crate::compiler::{ResourceGraph, SIDECAR_IMAGE_ID_PARAMETER};
use crate::compute::ECS_OPTIMIZED_AL2_IMAGE_PARAMETER;
use crate::workload::TaskDefinition;
use crate::{Error, Result};

/// Name of the network stack
pub const VPC_STACK_NAME: &str = "VpcStack";
/// Name of the service stack
pub const PROXY_STACK_NAME: &str = "ProxyStack";

/// Serialization format of a rendered template
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty JSON
    #[default]
    Json,
    /// YAML
    Yaml,
}

impl OutputFormat {
    /// File extension
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

/// A named template, ready to be written out
#[derive(Clone, Debug, PartialEq)]
pub struct StackTemplate {
    /// Stack name
    pub name: String,
    /// Stacks that must be deployed first
    pub dependencies: Vec<String>,
    /// Template body
    pub template: Template,
}

impl StackTemplate {
    /// File name the template is written to (`<Stack>.template.<ext>`)
    pub fn file_name(&self, format: OutputFormat) -> String {
        format!("{}.template.{}", self.name, format.extension())
    }

    /// Serialize the template body
    pub fn serialize(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => self.template.to_json(),
            OutputFormat::Yaml => self.template.to_yaml(),
        }
    }
}

/// Render the graph into its stacks, network first
pub fn render(graph: &ResourceGraph) -> Result<Vec<StackTemplate>> {
    let network = render_network(graph)?;
    let services = render_services(graph)?;
    check_imports(&network.template, &services.template)?;
    Ok(vec![network, services])
}

fn render_network(graph: &ResourceGraph) -> Result<StackTemplate> {
    let mut template = Template::new("Network for the personal proxy");
    for resource in graph.network.resources() {
        template.add_resource(resource.as_ref())?;
    }
    for export in graph.network.exports() {
        template.add_output(export.output_name, export.value, Some(export.export_name));
    }
    template.validate_references()?;

    info!(
        stack = VPC_STACK_NAME,
        resources = template.resources.len(),
        "rendered stack"
    );
    Ok(StackTemplate {
        name: VPC_STACK_NAME.to_string(),
        dependencies: Vec::new(),
        template,
    })
}

fn render_services(graph: &ResourceGraph) -> Result<StackTemplate> {
    let mut template = Template::new("Proxy service and optional tunnel sidecar");

    for task in task_definitions(graph) {
        for container in &task.containers {
            if let Some((parameter, directory)) = container.image.asset_parameter() {
                debug!(parameter, directory, "declaring asset image parameter");
                template.add_parameter(
                    parameter,
                    format!("Image URI published from build context {directory}"),
                );
            }
        }
    }
    if graph.has_sidecar() {
        template.add_ssm_parameter(
            SIDECAR_IMAGE_ID_PARAMETER,
            "AWS::EC2::Image::Id",
            ECS_OPTIMIZED_AL2_IMAGE_PARAMETER,
        );
    }

    for resource in graph.service_resources() {
        template.add_resource(resource)?;
    }

    let proxy = &graph.proxy;
    template.add_output("ClusterName", proxy.cluster.handle().name, None);
    template.add_output("ProxyServiceName", proxy.service.handle().name, None);
    if let Some(ref sidecar) = graph.sidecar {
        template.add_output("ProxyWithWarpServiceName", sidecar.service.handle().name, None);
        template.add_output("ProxyWithWarpRepositoryUri", sidecar.registry.uri(), None);
        template.add_output(
            "ProxyWithWarpProjectName",
            Value::reference(sidecar.build_project.name.logical_id()),
            None,
        );
    }
    template.validate_references()?;

    info!(
        stack = PROXY_STACK_NAME,
        resources = template.resources.len(),
        sidecar = graph.has_sidecar(),
        "rendered stack"
    );
    Ok(StackTemplate {
        name: PROXY_STACK_NAME.to_string(),
        dependencies: vec![VPC_STACK_NAME.to_string()],
        template,
    })
}

fn task_definitions(graph: &ResourceGraph) -> Vec<&TaskDefinition> {
    let mut tasks = vec![&graph.proxy.task_definition];
    if let Some(ref sidecar) = graph.sidecar {
        tasks.push(&sidecar.task_definition);
    }
    tasks
}

/// Every import of `consumer` must be exported by `producer`
fn check_imports(producer: &Template, consumer: &Template) -> Result<()> {
    let exported: BTreeSet<&str> = producer
        .outputs
        .values()
        .filter_map(|o| o.export.as_ref().map(|e| e.name.as_str()))
        .collect();

    let mut imports = Vec::new();
    for resource in consumer.resources.values() {
        collect_imports(&resource.properties, &mut imports);
    }
    for name in imports {
        if !exported.contains(name.as_str()) {
            return Err(Error::validation(format!(
                "import {name} is not exported by {VPC_STACK_NAME}"
            )));
        }
    }
    Ok(())
}

fn collect_imports(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(name)) = map.get("Fn::ImportValue") {
                out.push(name.clone());
            }
            map.values().for_each(|v| collect_imports(v, out));
        }
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_imports(v, out)),
        _ => {}
    }
}
