//! Network extension: VPC with public, private and isolated subnets

use super::DemoStack;
use crate::resource::{intrinsic, DeploymentGraph, ResourceRef};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use std::net::Ipv4Addr;

pub const VPC_CIDR: &str = "10.0.0.0/16";
pub const SUBNET_MASK: u8 = 20;
pub const DEFAULT_MAX_AZS: usize = 3;
const NAT_GATEWAYS: usize = 1;

/// Role of a subnet group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetType {
    /// Routes to the internet gateway
    Public,
    /// Routes outbound traffic through the NAT gateway
    PrivateWithNat,
    /// No route out of the VPC
    Isolated,
}

impl SubnetType {
    fn as_tag(&self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::PrivateWithNat => "Private",
            Self::Isolated => "Isolated",
        }
    }
}

/// A declared subnet
#[derive(Debug, Clone)]
pub struct Subnet {
    pub resource: ResourceRef,
    pub route_table: ResourceRef,
    pub cidr: String,
    pub subnet_type: SubnetType,
}

/// A declared VPC and its subnets, grouped by type
#[derive(Debug, Clone)]
pub struct Vpc {
    pub resource: ResourceRef,
    pub public_subnets: Vec<Subnet>,
    pub private_subnets: Vec<Subnet>,
    pub isolated_subnets: Vec<Subnet>,
}

impl Vpc {
    pub fn subnets(&self) -> impl Iterator<Item = &Subnet> {
        self.public_subnets
            .iter()
            .chain(&self.private_subnets)
            .chain(&self.isolated_subnets)
    }
}

/// Parse `a.b.c.d/n` and return it normalised
pub fn parse_ipv4_cidr(cidr: &str) -> Result<String> {
    let (address, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| anyhow!("{:?} is not in CIDR notation (a.b.c.d/n)", cidr))?;
    let address: Ipv4Addr = address
        .trim()
        .parse()
        .with_context(|| format!("Invalid IPv4 address in {:?}", cidr))?;
    let prefix: u8 = prefix
        .trim()
        .parse()
        .with_context(|| format!("Invalid prefix length in {:?}", cidr))?;
    if prefix > 32 {
        bail!("Prefix length {} in {:?} exceeds 32", prefix, cidr);
    }
    Ok(format!("{}/{}", address, prefix))
}

/// The `index`th `/mask` block inside `vpc_cidr`
pub fn subnet_cidr(vpc_cidr: &str, mask: u8, index: usize) -> Result<String> {
    let normalised = parse_ipv4_cidr(vpc_cidr)?;
    let (base, vpc_prefix) = normalised
        .split_once('/')
        .ok_or_else(|| anyhow!("Invalid VPC CIDR {:?}", vpc_cidr))?;
    let base: Ipv4Addr = base.parse()?;
    let vpc_prefix: u8 = vpc_prefix.parse()?;
    if mask < vpc_prefix || mask > 32 {
        bail!("Subnet mask /{} does not fit in {}", mask, vpc_cidr);
    }

    let capacity = 1u64 << (mask - vpc_prefix);
    if index as u64 >= capacity {
        bail!(
            "{} only holds {} /{} subnets, asked for #{}",
            vpc_cidr,
            capacity,
            mask,
            index + 1
        );
    }

    let block_size = 1u64 << (32 - mask);
    let start = u64::from(u32::from(base)) + index as u64 * block_size;
    let address = Ipv4Addr::from(start as u32);
    Ok(format!("{}/{}", address, mask))
}

struct SubnetGroup {
    name: String,
    subnet_type: SubnetType,
}

fn declare_subnet(
    graph: &mut DeploymentGraph,
    vpc: &ResourceRef,
    group: &SubnetGroup,
    az_index: usize,
    cidr: String,
) -> Result<Subnet> {
    let construct_id = format!("vpc/{}Subnet{}", group.name, az_index + 1);
    let resource = graph.add(
        &construct_id,
        "ec2-subnet",
        json!({
            "VpcId": intrinsic::reference(vpc),
            "AvailabilityZone": intrinsic::select_az(az_index),
            "CidrBlock": cidr,
            "MapPublicIpOnLaunch": group.subnet_type == SubnetType::Public,
            "Tags": [
                { "Key": "aws-cdk:subnet-name", "Value": group.name },
                { "Key": "aws-cdk:subnet-type", "Value": group.subnet_type.as_tag() },
                { "Key": "Name", "Value": construct_id }
            ]
        }),
    )?;
    let route_table = graph.add(
        &format!("{}/RouteTable", construct_id),
        "ec2-route-table",
        json!({ "VpcId": intrinsic::reference(vpc) }),
    )?;
    graph.add(
        &format!("{}/RouteTableAssociation", construct_id),
        "ec2-subnet-route-table-association",
        json!({
            "RouteTableId": intrinsic::reference(&route_table),
            "SubnetId": intrinsic::reference(&resource)
        }),
    )?;

    Ok(Subnet {
        resource,
        route_table,
        cidr,
        subnet_type: group.subnet_type,
    })
}

fn declare_default_route(
    graph: &mut DeploymentGraph,
    subnet: &Subnet,
    target_key: &str,
    target: &ResourceRef,
) -> Result<ResourceRef> {
    graph.add(
        &format!("{}/DefaultRoute", subnet.resource.construct_id),
        "ec2-route",
        json!({
            "RouteTableId": intrinsic::reference(&subnet.route_table),
            "DestinationCidrBlock": "0.0.0.0/0",
            target_key: intrinsic::reference(target)
        }),
    )
}

impl DemoStack {
    /// Creates a VPC with one NAT gateway, public, private and isolated
    /// subnets in every AZ, and an S3 gateway endpoint
    pub fn with_vpc(&mut self) -> Result<&mut Self> {
        if self.vpc.is_some() {
            tracing::debug!("VPC already declared");
            return Ok(self);
        }

        let graph = &mut self.graph;
        let vpc = graph.add(
            "vpc",
            "ec2-vpc",
            json!({
                "CidrBlock": VPC_CIDR,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
                "Tags": [{ "Key": "Name", "Value": "vpc" }]
            }),
        )?;

        let igw = graph.add("vpc/IGW", "ec2-internet-gateway", json!({}))?;
        let attachment = graph.add(
            "vpc/VPCGW",
            "ec2-vpc-gateway-attachment",
            json!({
                "VpcId": intrinsic::reference(&vpc),
                "InternetGatewayId": intrinsic::reference(&igw)
            }),
        )?;

        let groups = [
            SubnetGroup {
                name: self.namer.snake_name("public"),
                subnet_type: SubnetType::Public,
            },
            SubnetGroup {
                name: self.namer.snake_name("private_app"),
                subnet_type: SubnetType::PrivateWithNat,
            },
            SubnetGroup {
                name: self.namer.snake_name("private_db"),
                subnet_type: SubnetType::Isolated,
            },
        ];

        let mut public_subnets = Vec::new();
        let mut private_subnets = Vec::new();
        let mut isolated_subnets = Vec::new();
        let mut block = 0;
        for group in &groups {
            for az in 0..self.max_azs {
                let subnet = declare_subnet(graph, &vpc, group, az, subnet_cidr(VPC_CIDR, SUBNET_MASK, block)?)?;
                block += 1;
                match group.subnet_type {
                    SubnetType::Public => public_subnets.push(subnet),
                    SubnetType::PrivateWithNat => private_subnets.push(subnet),
                    SubnetType::Isolated => isolated_subnets.push(subnet),
                }
            }
        }

        let mut nat_gateways = Vec::new();
        for subnet in &public_subnets {
            let route = declare_default_route(graph, subnet, "GatewayId", &igw)?;
            graph.add_dependency(&route, &attachment)?;

            if nat_gateways.len() < NAT_GATEWAYS {
                let eip = graph.add(
                    &format!("{}/EIP", subnet.resource.construct_id),
                    "ec2-eip",
                    json!({ "Domain": "vpc" }),
                )?;
                let nat = graph.add(
                    &format!("{}/NATGateway", subnet.resource.construct_id),
                    "ec2-nat-gateway",
                    json!({
                        "SubnetId": intrinsic::reference(&subnet.resource),
                        "AllocationId": intrinsic::get_att(&eip, "AllocationId")
                    }),
                )?;
                graph.add_dependency(&nat, &route)?;
                nat_gateways.push(nat);
            }
        }

        if !nat_gateways.is_empty() {
            for (i, subnet) in private_subnets.iter().enumerate() {
                let nat = &nat_gateways[i % nat_gateways.len()];
                declare_default_route(graph, subnet, "NatGatewayId", nat)?;
            }
        }

        let route_tables: Vec<Value> = public_subnets
            .iter()
            .chain(&private_subnets)
            .chain(&isolated_subnets)
            .map(|s| intrinsic::reference(&s.route_table))
            .collect();
        graph.add(
            "vpc/S3",
            "ec2-vpc-endpoint",
            json!({
                "ServiceName": intrinsic::join("", vec![
                    json!("com.amazonaws."),
                    intrinsic::pseudo("Region"),
                    json!(".s3")
                ]),
                "VpcId": intrinsic::reference(&vpc),
                "RouteTableIds": route_tables,
                "VpcEndpointType": "Gateway"
            }),
        )?;

        graph.add_output("VpcId", Some("Demo VPC"), intrinsic::reference(&vpc))?;

        tracing::info!(
            "VPC declared with {} public, {} private and {} isolated subnets",
            public_subnets.len(),
            private_subnets.len(),
            isolated_subnets.len()
        );

        self.vpc = Some(Vpc {
            resource: vpc,
            public_subnets,
            private_subnets,
            isolated_subnets,
        });
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_cidr() {
        assert_eq!(parse_ipv4_cidr("203.0.113.7/32").unwrap(), "203.0.113.7/32");
        assert_eq!(parse_ipv4_cidr(" 10.0.0.0 / 8").unwrap(), "10.0.0.0/8");
        assert!(parse_ipv4_cidr("203.0.113.7").is_err());
        assert!(parse_ipv4_cidr("203.0.113.300/32").is_err());
        assert!(parse_ipv4_cidr("203.0.113.7/33").is_err());
    }

    #[test]
    fn test_subnet_cidr_blocks() {
        assert_eq!(subnet_cidr(VPC_CIDR, 20, 0).unwrap(), "10.0.0.0/20");
        assert_eq!(subnet_cidr(VPC_CIDR, 20, 1).unwrap(), "10.0.16.0/20");
        assert_eq!(subnet_cidr(VPC_CIDR, 20, 8).unwrap(), "10.0.128.0/20");
        assert_eq!(subnet_cidr(VPC_CIDR, 20, 15).unwrap(), "10.0.240.0/20");
        assert!(subnet_cidr(VPC_CIDR, 20, 16).is_err());
        assert!(subnet_cidr(VPC_CIDR, 8, 0).is_err());
    }
}
