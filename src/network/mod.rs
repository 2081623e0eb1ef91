//! Network topology
//!
//! Builds the isolated network the proxy runs in: one address block, subnet
//! tiers carved from it, and the gateway/routing resources a public tier
//! needs. The default topology is `10.0.0.0/16` with a single public `/24`
//! tier confined to one availability zone.
//!
//! Subnets are allocated consecutively, tier by tier and zone by zone, each
//! aligned to its own mask, so the same tier list always yields the same
//! CIDRs.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use tracing::debug;

use crate::naming::ResourceName;
use crate::template::{CfnResource, Value};
use crate::{Error, Result};

/// Default address block
pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";
/// Default mask for the public tier
pub const DEFAULT_PUBLIC_MASK: u8 = 24;
/// Smallest block the provider accepts (largest prefix length)
pub const MAX_PREFIX_LEN: u8 = 28;
/// Largest block the provider accepts (smallest prefix length)
pub const MIN_PREFIX_LEN: u8 = 16;
/// Most availability zones a single region offers
pub const MAX_AZS: usize = 6;

/// Kind of subnet tier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubnetKind {
    /// Routed to the internet gateway, public IPs on launch
    Public,
    /// No route out of the network
    Isolated,
}

/// A subnet tier: one subnet per availability zone
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubnetTier {
    /// Tier name, used in subnet names (ASCII alphanumeric)
    pub name: String,
    /// Prefix length of each subnet in the tier
    pub cidr_mask: u8,
    /// Tier kind
    pub kind: SubnetKind,
}

impl SubnetTier {
    /// Public tier with the given name and mask
    pub fn public(name: impl Into<String>, cidr_mask: u8) -> Self {
        Self {
            name: name.into(),
            cidr_mask,
            kind: SubnetKind::Public,
        }
    }

    /// Isolated tier with the given name and mask
    pub fn isolated(name: impl Into<String>, cidr_mask: u8) -> Self {
        Self {
            name: name.into(),
            cidr_mask,
            kind: SubnetKind::Isolated,
        }
    }
}

/// An allocated subnet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subnet {
    /// Resource name
    pub name: ResourceName,
    /// Owning tier
    pub tier: String,
    /// Tier kind
    pub kind: SubnetKind,
    /// Allocated block
    pub cidr: Ipv4Net,
    /// Availability zone index
    pub az_index: usize,
}

impl Subnet {
    /// Logical ID of the subnet resource
    pub fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn route_table_name(&self) -> ResourceName {
        self.name.child("RouteTable")
    }
}

/// Handle to the network, consumed by dependent builders
///
/// Holds template values rather than names, so the same builders work whether
/// the network lives in the same template or is imported from another stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkHandle {
    /// Network ID
    pub vpc_id: Value,
    /// IDs of public subnets, in allocation order
    pub public_subnet_ids: Vec<Value>,
}

/// A value the network stack exports for other stacks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkExport {
    /// Output name in the network template
    pub output_name: String,
    /// Exported value
    pub value: Value,
    /// Account-wide export name
    pub export_name: String,
}

/// A complete, validated network topology
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkTopology {
    /// Network name
    pub name: ResourceName,
    /// Address block
    pub cidr: Ipv4Net,
    /// Number of availability zones spanned
    pub max_azs: usize,
    /// Tiers in declaration order
    pub tiers: Vec<SubnetTier>,
    /// Allocated subnets
    pub subnets: Vec<Subnet>,
}

impl NetworkTopology {
    /// Logical ID of the network resource
    pub fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    /// Public subnets in allocation order
    pub fn public_subnets(&self) -> impl Iterator<Item = &Subnet> {
        self.subnets.iter().filter(|s| s.kind == SubnetKind::Public)
    }

    fn has_public_tier(&self) -> bool {
        self.tiers.iter().any(|t| t.kind == SubnetKind::Public)
    }

    fn gateway_name(&self) -> ResourceName {
        self.name.child("IGW")
    }

    fn attachment_name(&self) -> ResourceName {
        self.name.child("VPCGW")
    }

    /// Handle for builders in the same template
    pub fn local_handle(&self) -> NetworkHandle {
        NetworkHandle {
            vpc_id: Value::reference(self.logical_id()),
            public_subnet_ids: self
                .public_subnets()
                .map(|s| Value::reference(s.logical_id()))
                .collect(),
        }
    }

    /// Handle for builders in another template, via exports
    pub fn imported_handle(&self) -> NetworkHandle {
        NetworkHandle {
            vpc_id: Value::import(self.export_name("VpcId")),
            public_subnet_ids: self
                .public_subnets()
                .map(|s| Value::import(self.export_name(&format!("{}Id", s.logical_id()))))
                .collect(),
        }
    }

    /// Values exported for other stacks; matches [`Self::imported_handle`]
    pub fn exports(&self) -> Vec<NetworkExport> {
        let mut exports = vec![NetworkExport {
            output_name: "VpcId".to_string(),
            value: Value::reference(self.logical_id()),
            export_name: self.export_name("VpcId"),
        }];
        for subnet in self.public_subnets() {
            let output_name = format!("{}Id", subnet.logical_id());
            exports.push(NetworkExport {
                export_name: self.export_name(&output_name),
                output_name,
                value: Value::reference(subnet.logical_id()),
            });
        }
        exports
    }

    fn export_name(&self, output: &str) -> String {
        format!("{}-{}", self.name, output)
    }

    /// Every resource the topology contributes to a template
    pub fn resources(&self) -> Vec<Box<dyn CfnResource>> {
        let mut out: Vec<Box<dyn CfnResource>> = vec![Box::new(VpcResource {
            name: self.name.clone(),
            cidr: self.cidr,
        })];

        let vpc_id = Value::reference(self.logical_id());
        let has_gateway = self.has_public_tier();
        if has_gateway {
            out.push(Box::new(InternetGateway {
                name: self.gateway_name(),
            }));
            out.push(Box::new(GatewayAttachment {
                name: self.attachment_name(),
                vpc_id: vpc_id.clone(),
                gateway_id: Value::reference(self.gateway_name().logical_id()),
            }));
        }

        for subnet in &self.subnets {
            out.push(Box::new(SubnetResource {
                subnet: subnet.clone(),
                vpc_id: vpc_id.clone(),
            }));
            out.push(Box::new(RouteTable {
                name: subnet.route_table_name(),
                vpc_id: vpc_id.clone(),
            }));
            out.push(Box::new(RouteTableAssociation {
                name: subnet.name.child("RouteTableAssociation"),
                route_table_id: Value::reference(subnet.route_table_name().logical_id()),
                subnet_id: Value::reference(subnet.logical_id()),
            }));
            if subnet.kind == SubnetKind::Public {
                out.push(Box::new(DefaultRoute {
                    name: subnet.name.child("DefaultRoute"),
                    route_table_id: Value::reference(subnet.route_table_name().logical_id()),
                    gateway_id: Value::reference(self.gateway_name().logical_id()),
                    attachment: self.attachment_name().logical_id(),
                }));
            }
        }
        out
    }
}

/// Builder for [`NetworkTopology`]
#[derive(Clone, Debug)]
pub struct NetworkTopologyBuilder {
    name: ResourceName,
    cidr: String,
    max_azs: usize,
    tiers: Vec<SubnetTier>,
}

impl NetworkTopologyBuilder {
    /// Default topology under the given name
    pub fn new(name: ResourceName) -> Self {
        Self {
            name,
            cidr: DEFAULT_VPC_CIDR.to_string(),
            max_azs: 1,
            tiers: vec![SubnetTier::public("public", DEFAULT_PUBLIC_MASK)],
        }
    }

    /// Override the address block
    pub fn with_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = cidr.into();
        self
    }

    /// Override the availability-zone count
    pub fn with_max_azs(mut self, max_azs: usize) -> Self {
        self.max_azs = max_azs;
        self
    }

    /// Replace the tier list
    pub fn with_tiers(mut self, tiers: Vec<SubnetTier>) -> Self {
        self.tiers = tiers;
        self
    }

    /// Validate the configuration and allocate subnets
    pub fn build(self) -> Result<NetworkTopology> {
        let cidr: Ipv4Net = self
            .cidr
            .parse()
            .map_err(|e| Error::validation(format!("invalid address block {}: {}", self.cidr, e)))?;
        // Normalize host bits away (10.0.0.1/16 -> 10.0.0.0/16)
        let cidr = cidr.trunc();

        if !(MIN_PREFIX_LEN..=MAX_PREFIX_LEN).contains(&cidr.prefix_len()) {
            return Err(Error::validation(format!(
                "address block {cidr} must be between /{MIN_PREFIX_LEN} and /{MAX_PREFIX_LEN}"
            )));
        }
        if self.tiers.is_empty() {
            return Err(Error::validation("at least one subnet tier is required"));
        }
        if !(1..=MAX_AZS).contains(&self.max_azs) {
            return Err(Error::validation(format!(
                "max_azs must be between 1 and {MAX_AZS}, got {}",
                self.max_azs
            )));
        }

        let mut seen = std::collections::BTreeSet::new();
        for tier in &self.tiers {
            if tier.name.is_empty() {
                return Err(Error::validation("subnet tier name must not be empty"));
            }
            // Logical IDs drop non-alphanumerics, so `a-b` and `ab` would collide
            if !tier.name.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::validation(format!(
                    "subnet tier name must be alphanumeric: {}",
                    tier.name
                )));
            }
            if !seen.insert(tier.name.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate subnet tier name: {}",
                    tier.name
                )));
            }
            if tier.cidr_mask < cidr.prefix_len() || tier.cidr_mask > MAX_PREFIX_LEN {
                return Err(Error::validation(format!(
                    "subnet mask /{} for tier {} does not subdivide {}",
                    tier.cidr_mask, tier.name, cidr
                )));
            }
        }

        let subnets = allocate_subnets(&self.name, cidr, &self.tiers, self.max_azs)?;
        for subnet in &subnets {
            debug!(subnet = %subnet.name, cidr = %subnet.cidr, "allocated subnet");
        }

        Ok(NetworkTopology {
            name: self.name,
            cidr,
            max_azs: self.max_azs,
            tiers: self.tiers,
            subnets,
        })
    }
}

/// Carve consecutive, mask-aligned subnets out of the parent block
fn allocate_subnets(
    network: &ResourceName,
    parent: Ipv4Net,
    tiers: &[SubnetTier],
    max_azs: usize,
) -> Result<Vec<Subnet>> {
    let start = u64::from(u32::from(parent.network()));
    let end = u64::from(u32::from(parent.broadcast())) + 1;
    let mut cursor = start;
    let mut subnets = Vec::with_capacity(tiers.len() * max_azs);

    for tier in tiers {
        let size = 1u64 << (32 - u32::from(tier.cidr_mask));
        for az_index in 0..max_azs {
            let aligned = (cursor + size - 1) & !(size - 1);
            if aligned + size > end {
                return Err(Error::validation(format!(
                    "address block {parent} is too small for {} subnets of tier {}",
                    max_azs, tier.name
                )));
            }
            // aligned < end <= 2^32, so the conversion cannot truncate
            let addr = Ipv4Addr::from(aligned as u32);
            let cidr = Ipv4Net::new(addr, tier.cidr_mask)
                .map_err(|e| Error::validation(format!("invalid subnet mask: {e}")))?;

            subnets.push(Subnet {
                name: network.child(&format!("{}Subnet{}", tier.name, az_index + 1)),
                tier: tier.name.clone(),
                kind: tier.kind,
                cidr,
                az_index,
            });
            cursor = aligned + size;
        }
    }
    Ok(subnets)
}

// =============================================================================
// Network resources
// =============================================================================

fn name_tag(name: &ResourceName) -> serde_json::Value {
    serde_json::json!([{ "Key": "Name", "Value": name.as_str() }])
}

struct VpcResource {
    name: ResourceName,
    cidr: Ipv4Net,
}

impl CfnResource for VpcResource {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::EC2::VPC"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "CidrBlock": self.cidr.to_string(),
            "EnableDnsHostnames": true,
            "EnableDnsSupport": true,
            "InstanceTenancy": "default",
            "Tags": name_tag(&self.name),
        })
    }
}

struct SubnetResource {
    subnet: Subnet,
    vpc_id: Value,
}

impl CfnResource for SubnetResource {
    fn logical_id(&self) -> String {
        self.subnet.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::EC2::Subnet"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "VpcId": self.vpc_id,
            "CidrBlock": self.subnet.cidr.to_string(),
            "AvailabilityZone": Value::AvailabilityZone(self.subnet.az_index),
            "MapPublicIpOnLaunch": self.subnet.kind == SubnetKind::Public,
            "Tags": name_tag(&self.subnet.name),
        })
    }
}

struct InternetGateway {
    name: ResourceName,
}

impl CfnResource for InternetGateway {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::EC2::InternetGateway"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({ "Tags": name_tag(&self.name) })
    }
}

struct GatewayAttachment {
    name: ResourceName,
    vpc_id: Value,
    gateway_id: Value,
}

impl CfnResource for GatewayAttachment {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::EC2::VPCGatewayAttachment"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "VpcId": self.vpc_id,
            "InternetGatewayId": self.gateway_id,
        })
    }
}

struct RouteTable {
    name: ResourceName,
    vpc_id: Value,
}

impl CfnResource for RouteTable {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::EC2::RouteTable"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "VpcId": self.vpc_id,
            "Tags": name_tag(&self.name),
        })
    }
}

struct RouteTableAssociation {
    name: ResourceName,
    route_table_id: Value,
    subnet_id: Value,
}

impl CfnResource for RouteTableAssociation {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::EC2::SubnetRouteTableAssociation"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "RouteTableId": self.route_table_id,
            "SubnetId": self.subnet_id,
        })
    }
}

struct DefaultRoute {
    name: ResourceName,
    route_table_id: Value,
    gateway_id: Value,
    attachment: String,
}

impl CfnResource for DefaultRoute {
    fn logical_id(&self) -> String {
        self.name.logical_id()
    }

    fn resource_type(&self) -> &'static str {
        "AWS::EC2::Route"
    }

    fn properties(&self) -> serde_json::Value {
        serde_json::json!({
            "RouteTableId": self.route_table_id,
            "DestinationCidrBlock": "0.0.0.0/0",
            "GatewayId": self.gateway_id,
        })
    }

    // The route is rejected until the gateway is attached
    fn depends_on(&self) -> Vec<String> {
        vec![self.attachment.clone()]
    }
}
