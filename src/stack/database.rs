//! Database extensions: DynamoDB table and Aurora serverless cluster

use super::DemoStack;
use crate::resource::{intrinsic, RemovalPolicy, ResourceRef};
use anyhow::Result;
use serde_json::{json, Value};

const AURORA_ENGINE: &str = "aurora-mysql";
const AURORA_ADMIN_USER: &str = "clusterAdmin";
const AURORA_AUTO_PAUSE_SECONDS: u32 = 10 * 60;
const AURORA_MIN_CAPACITY: u32 = 2;
const AURORA_MAX_CAPACITY: u32 = 16;

/// Characters the generated cluster password must not contain
const SECRET_EXCLUDE_CHARACTERS: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";

/// Actions granted to the Glue role on the DynamoDB table
const DYNAMODB_READ_WRITE_ACTIONS: &[&str] = &[
    "dynamodb:BatchGetItem",
    "dynamodb:GetRecords",
    "dynamodb:GetShardIterator",
    "dynamodb:Query",
    "dynamodb:GetItem",
    "dynamodb:Scan",
    "dynamodb:ConditionCheckItem",
    "dynamodb:BatchWriteItem",
    "dynamodb:PutItem",
    "dynamodb:UpdateItem",
    "dynamodb:DeleteItem",
    "dynamodb:DescribeTable",
];

/// A declared DynamoDB table
#[derive(Debug, Clone)]
pub struct Table {
    pub resource: ResourceRef,
    pub name: String,
}

/// A declared Aurora cluster
#[derive(Debug, Clone)]
pub struct AuroraCluster {
    pub resource: ResourceRef,
    pub secret: ResourceRef,
    pub security_group: ResourceRef,
    pub identifier: String,
}

/// `{{resolve:secretsmanager:<secret>:SecretString:<field>::}}`
fn resolve_secret_field(secret: &ResourceRef, field: &str) -> Value {
    intrinsic::join(
        "",
        vec![
            json!("{{resolve:secretsmanager:"),
            intrinsic::reference(secret),
            json!(format!(":SecretString:{}::}}}}", field)),
        ],
    )
}

impl DemoStack {
    /// Adds a DynamoDB table with just a partition key called `id`, readable
    /// and writable by the Glue role
    pub fn with_dynamodb(&mut self) -> Result<&mut Self> {
        if self.dynamodb_table.is_some() {
            tracing::debug!("DynamoDB table already declared");
            return Ok(self);
        }

        let name = self.namer.name("dynamodb-table");
        let table = self.graph.add(
            "test_table",
            "dynamodb-table",
            json!({
                "TableName": name,
                "KeySchema": [{ "AttributeName": "id", "KeyType": "HASH" }],
                "AttributeDefinitions": [{ "AttributeName": "id", "AttributeType": "S" }],
                "BillingMode": "PAY_PER_REQUEST"
            }),
        )?;
        self.graph.set_removal_policy(&table, RemovalPolicy::Destroy)?;

        self.graph.add(
            "demoAthenaGlueRole/DefaultPolicy",
            "iam-policy",
            json!({
                "PolicyName": "demoAthenaGlueRoleDefaultPolicy",
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Action": DYNAMODB_READ_WRITE_ACTIONS,
                        "Effect": "Allow",
                        "Resource": [intrinsic::get_att(&table, "Arn")]
                    }]
                },
                "Roles": [intrinsic::reference(&self.catalog.glue_role)]
            }),
        )?;

        tracing::info!("DynamoDB table {} declared", name);
        self.dynamodb_table = Some(Table {
            resource: table,
            name,
        });
        Ok(self)
    }

    /// Creates an Aurora serverless cluster in the isolated subnets.
    /// If no VPC is declared yet, it adds the VPC as well.
    pub fn with_aurora(&mut self) -> Result<&mut Self> {
        if self.aurora_cluster.is_some() {
            tracing::debug!("Aurora cluster already declared");
            return Ok(self);
        }
        if self.vpc.is_none() {
            self.with_vpc()?;
        }
        let Some(vpc) = &self.vpc else {
            anyhow::bail!("VPC missing after with_vpc");
        };

        let identifier = self.namer.name("rds-cluster");
        let graph = &mut self.graph;

        let secret = graph.add(
            "serverlessCluster/Secret",
            "secretsmanager-secret",
            json!({
                "Description": format!("Generated by demo-data for {}", identifier),
                "GenerateSecretString": {
                    "SecretStringTemplate": format!("{{\"username\":\"{}\"}}", AURORA_ADMIN_USER),
                    "GenerateStringKey": "password",
                    "PasswordLength": 30,
                    "ExcludeCharacters": SECRET_EXCLUDE_CHARACTERS
                }
            }),
        )?;
        graph.set_removal_policy(&secret, RemovalPolicy::Destroy)?;

        let isolated: Vec<Value> = vpc
            .isolated_subnets
            .iter()
            .map(|s| intrinsic::reference(&s.resource))
            .collect();
        let subnet_group = graph.add(
            "serverlessCluster/Subnets",
            "rds-db-subnet-group",
            json!({
                "DBSubnetGroupDescription": format!("Subnets for {}", identifier),
                "SubnetIds": isolated
            }),
        )?;

        let security_group = graph.add(
            "serverlessCluster/SecurityGroup",
            "ec2-security-group",
            json!({
                "GroupDescription": "RDS security group",
                "VpcId": intrinsic::reference(&vpc.resource),
                "SecurityGroupEgress": [{
                    "CidrIp": "0.0.0.0/0",
                    "Description": "Allow all outbound traffic by default",
                    "IpProtocol": "-1"
                }]
            }),
        )?;

        let cluster = graph.add(
            "serverlessCluster",
            "rds-db-cluster",
            json!({
                "Engine": AURORA_ENGINE,
                "EngineMode": "serverless",
                "DBClusterIdentifier": identifier,
                "MasterUsername": resolve_secret_field(&secret, "username"),
                "MasterUserPassword": resolve_secret_field(&secret, "password"),
                "DeletionProtection": false,
                "StorageEncrypted": true,
                "DBSubnetGroupName": intrinsic::reference(&subnet_group),
                "VpcSecurityGroupIds": [intrinsic::get_att(&security_group, "GroupId")],
                "ScalingConfiguration": {
                    "AutoPause": true,
                    "MinCapacity": AURORA_MIN_CAPACITY,
                    "MaxCapacity": AURORA_MAX_CAPACITY,
                    "SecondsUntilAutoPause": AURORA_AUTO_PAUSE_SECONDS
                }
            }),
        )?;
        graph.set_removal_policy(&cluster, RemovalPolicy::Snapshot)?;

        graph.add(
            "serverlessCluster/Secret/Attachment",
            "secretsmanager-secret-target-attachment",
            json!({
                "SecretId": intrinsic::reference(&secret),
                "TargetId": intrinsic::reference(&cluster),
                "TargetType": "AWS::RDS::DBCluster"
            }),
        )?;

        for (i, subnet) in vpc.private_subnets.iter().enumerate() {
            graph.add(
                &format!("serverlessCluster/SecurityGroup/from{}", i + 1),
                "ec2-security-group-ingress",
                json!({
                    "GroupId": intrinsic::get_att(&security_group, "GroupId"),
                    "IpProtocol": "tcp",
                    "CidrIp": subnet.cidr,
                    "Description": format!("from {}", subnet.cidr),
                    "FromPort": intrinsic::get_att(&cluster, "Endpoint.Port"),
                    "ToPort": intrinsic::get_att(&cluster, "Endpoint.Port")
                }),
            )?;
        }

        graph.add_output(
            "AuroraClusterIdentifier",
            Some("Aurora serverless cluster"),
            intrinsic::reference(&cluster),
        )?;

        tracing::info!(
            "Aurora cluster {} declared, reachable from {} private subnets",
            identifier,
            vpc.private_subnets.len()
        );

        self.aurora_cluster = Some(AuroraCluster {
            resource: cluster,
            secret,
            security_group,
            identifier,
        });
        Ok(self)
    }
}
