//! Deployment compiler
//!
//! This module turns a [`DeploymentContext`] into a [`ResourceGraph`]: the
//! network, the base proxy service, and (when the `useWarp` flag is set) the
//! tunnel sidecar.
//!
//! # Architecture
//!
//! The DeploymentBuilder delegates to specialized builders:
//! - [`NetworkTopologyBuilder`]: network, subnets, gateway and routes
//! - [`ProxyServiceBuilder`]: cluster, serverless proxy, log group, security group
//! - [`TunnelSidecarBuilder`]: instance pool, privileged sidecar, build pipeline
//!
//! Builders exchange explicit handles rather than looking each other up, so
//! the network must exist before the proxy, and the proxy before the sidecar.
//!
//! # Usage
//!
//! ```text
//! let context = DeploymentContext::new().with("useWarp", true);
//! let graph = DeploymentBuilder::new(&context).build()?;
//! let stacks = template::render(&graph)?;
//! ```

mod proxy;
mod sidecar;

pub use proxy::{
    ProxyHandles, ProxyResources, ProxyServiceBuilder, DEFAULT_TASK_CPU, DEFAULT_TASK_MEMORY_MIB,
    PROXY_BUILD_CONTEXT, PROXY_CONTAINER_NAME, PROXY_LOG_GROUP_NAME, PROXY_SECRETS,
    PROXY_STREAM_PREFIX,
};
pub use sidecar::{
    TunnelSidecar, TunnelSidecarBuilder, SIDECAR_BUILD_SPEC_DIR, SIDECAR_CONTAINER_NAME,
    SIDECAR_IMAGE_ID_PARAMETER, SIDECAR_IMAGE_TAG, SIDECAR_INSTANCE_TYPE, SIDECAR_MEMORY_MIB,
    SIDECAR_REPOSITORY_NAME, SIDECAR_STREAM_PREFIX, UPDATE_SERVICE_POLICY,
};

use tracing::info;

use crate::context::{DeploymentContext, Environment};
use crate::naming::ResourceName;
use crate::network::{NetworkTopology, NetworkTopologyBuilder};
use crate::template::CfnResource;
use crate::Result;

/// Suffix of the network name
pub const NETWORK_NAME: &str = "Vpc";

/// Complete description of the deployment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceGraph {
    /// Network topology
    pub network: NetworkTopology,
    /// Base proxy service
    pub proxy: ProxyResources,
    /// Tunnel sidecar, present only when requested
    pub sidecar: Option<TunnelSidecar>,
    /// Deployment environment
    pub environment: Environment,
}

impl ResourceGraph {
    /// Whether the sidecar subtree is present
    pub fn has_sidecar(&self) -> bool {
        self.sidecar.is_some()
    }

    /// Resources of the proxy stack (base proxy then sidecar)
    pub fn service_resources(&self) -> Vec<&dyn CfnResource> {
        let mut resources = self.proxy.resources();
        if let Some(ref sidecar) = self.sidecar {
            resources.extend(sidecar.resources());
        }
        resources
    }

    /// Total count of all described resources
    pub fn resource_count(&self) -> usize {
        self.network.resources().len() + self.service_resources().len()
    }
}

/// Builds the whole deployment from a context
pub struct DeploymentBuilder<'a> {
    context: &'a DeploymentContext,
}

impl<'a> DeploymentBuilder<'a> {
    /// Create a builder over `context`
    pub fn new(context: &'a DeploymentContext) -> Self {
        Self { context }
    }

    /// Build the resource graph
    ///
    /// The flag is read exactly once, here. A missing or malformed value
    /// leaves the sidecar out.
    pub fn build(&self) -> Result<ResourceGraph> {
        let network = NetworkTopologyBuilder::new(ResourceName::new(NETWORK_NAME)).build()?;
        info!(
            network = %network.name,
            cidr = %network.cidr,
            subnets = network.subnets.len(),
            "built network topology"
        );

        // The service stack consumes the network through exports
        let network_handle = network.imported_handle();

        let (proxy, handles) = ProxyServiceBuilder::new(network_handle.clone()).build();
        info!(cluster = %handles.cluster.cluster_name, "built proxy service");

        let sidecar = if self.context.use_warp() {
            let sidecar = TunnelSidecarBuilder::new(&handles, network_handle)
                .with_source(self.context.sidecar_source())
                .with_environment(self.context.environment.clone())
                .build();
            info!(service = %sidecar.service.name, "built tunnel sidecar");
            Some(sidecar)
        } else {
            info!("tunnel sidecar disabled");
            None
        };

        Ok(ResourceGraph {
            network,
            proxy,
            sidecar,
            environment: self.context.environment.clone(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
