//! personal-infra - declarative infrastructure for a personal proxy
//!
//! Describes a small network and a containerized proxy service as a typed
//! resource graph, and renders that graph into provisioning-engine templates.
//! Nothing here talks to a cloud API; the templates are the only output.
//!
//! # Architecture
//!
//! The deployment is assembled by a single builder:
//! - The network topology is built first and exposes a handle
//! - The base proxy service is built into that network and exposes handles to
//!   its cluster, secrets and log group
//! - The tunnel sidecar is built from those handles only when the `useWarp`
//!   context flag is set
//!
//! The resulting graph renders into two stacks: `VpcStack` (exports) and
//! `ProxyStack` (imports).
//!
//! # Modules
//!
//! - [`compiler`] - Deployment builder and the resource graph
//! - [`context`] - Deployment context (feature flags, environment)
//! - [`network`] - Network topology and subnet allocation
//! - [`workload`] - Cluster, task and service types
//! - [`policy`] - Security groups and IAM documents
//! - [`compute`] - Instance pool and capacity provider
//! - [`pipeline`] - Image registry and build project
//! - [`logs`] - Log groups
//! - [`naming`] - Deterministic resource names
//! - [`template`] - Template model and stack rendering
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod compiler;
pub mod compute;
pub mod context;
pub mod error;
pub mod logs;
pub mod naming;
pub mod network;
pub mod pipeline;
pub mod policy;
pub mod template;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Ports
// =============================================================================

/// Public proxy port, opened on both TCP and UDP
pub const PROXY_PORT: u16 = 8388;

/// Sidecar container port, reachable inside the network only
pub const SIDECAR_PORT: u16 = 9091;
