//! Compute layer: the Glue ETL job and the legacy dev endpoint

use super::etl::{TransformArgs, SCRIPT_NAME};
use super::network::parse_ipv4_cidr;
use super::storage::SCRIPTS_FOLDER_PREFIX;
use super::DemoStack;
use crate::resource::intrinsic;
use anyhow::Result;
use serde_json::{json, Value};

const GLUE_JOB_CONSTRUCT_ID: &str = "glue-job-etl";
const SSH_PORT: u16 = 22;

impl DemoStack {
    /// Adds an ETL job converting one raw dataset file to Parquet
    pub fn with_glue_job(&mut self, path_to_file: &str) -> Result<&mut Self> {
        if self.glue_job.is_some() {
            tracing::warn!(
                "Glue job already declared, ignoring dataset {}",
                path_to_file
            );
            return Ok(self);
        }

        let transform = TransformArgs::new(&self.storage.raw, &self.storage.processed, path_to_file)?;

        let mut default_arguments = json!({
            "--job-language": "python",
            "--enable-metrics": "",
            "--enable-continuous-cloudwatch-log": "true",
            "--job-bookmark-option": "job-bookmark-disable"
        });
        if let Value::Object(map) = &mut default_arguments {
            map.extend(transform.to_default_arguments());
        }

        let script_key = format!("{}/{}", SCRIPTS_FOLDER_PREFIX, SCRIPT_NAME);
        let job = self.graph.add(
            GLUE_JOB_CONSTRUCT_ID,
            "glue-job",
            json!({
                "Name": self.namer.name("s3-to-parquet"),
                "Description": "Transform the name IMDB dataset to partitioned parquet",
                "Role": intrinsic::get_att(&self.catalog.glue_role, "Arn"),
                "ExecutionProperty": { "MaxConcurrentRuns": 1 },
                "Command": {
                    "Name": "glueetl",
                    "PythonVersion": "3",
                    "ScriptLocation": self.storage.scripts.s3_url(Some(&script_key))
                },
                "MaxRetries": 1,
                "Timeout": 20,
                "NumberOfWorkers": 2,
                "GlueVersion": "3.0",
                "WorkerType": "G.1X",
                "DefaultArguments": default_arguments
            }),
        )?;

        self.graph.add_output(
            "PartitionedOutputUri",
            Some("Parquet output partitioned by birth year"),
            transform.partitioned_output_uri(),
        )?;
        self.graph.add_output(
            "UnpartitionedOutputUri",
            Some("Unpartitioned Parquet output"),
            transform.unpartitioned_output_uri(),
        )?;

        tracing::info!("Glue job declared for dataset {}", transform.dataset_path);
        self.glue_job = Some(job);
        Ok(self)
    }

    /// Adds a Glue v1 dev endpoint reachable over SSH from `ip_cidr`.
    ///
    /// Without a VPC the endpoint is declared without subnet and security
    /// group; call `with_vpc` first to place it in the network.
    pub fn with_dev_endpoint(&mut self, ip_cidr: &str) -> Result<&mut Self> {
        if self.dev_endpoint.is_some() {
            tracing::debug!("Dev endpoint already declared");
            return Ok(self);
        }

        let mut properties = json!({
            "RoleArn": intrinsic::get_att(&self.catalog.glue_role, "Arn"),
            "EndpointName": self.namer.name("dev-endpoint"),
            "GlueVersion": "1.0",
            "NumberOfWorkers": 2,
            "WorkerType": "G.1X"
        });

        if let Some(vpc) = &self.vpc {
            let cidr = parse_ipv4_cidr(ip_cidr)?;
            let Some(subnet) = vpc.public_subnets.first() else {
                anyhow::bail!("VPC has no public subnet for the dev endpoint");
            };

            let security_group = self.graph.add(
                "endpoint-sg",
                "ec2-security-group",
                json!({
                    "GroupDescription": "Dev endpoint SSH access",
                    "VpcId": intrinsic::reference(&vpc.resource),
                    "SecurityGroupEgress": [{
                        "CidrIp": "0.0.0.0/0",
                        "Description": "Allow all outbound traffic by default",
                        "IpProtocol": "-1"
                    }],
                    "SecurityGroupIngress": [{
                        "CidrIp": cidr,
                        "Description": format!("from {}:{}", cidr, SSH_PORT),
                        "FromPort": SSH_PORT,
                        "ToPort": SSH_PORT,
                        "IpProtocol": "tcp"
                    }]
                }),
            )?;

            if let Value::Object(map) = &mut properties {
                map.insert("SubnetId".to_string(), intrinsic::reference(&subnet.resource));
                map.insert(
                    "SecurityGroupIds".to_string(),
                    json!([intrinsic::get_att(&security_group, "GroupId")]),
                );
            }
        } else {
            tracing::info!("No VPC declared, dev endpoint gets no network configuration");
        }

        let endpoint = self
            .graph
            .add("MyCfnDevEndpoint", "glue-dev-endpoint", properties)?;
        self.dev_endpoint = Some(endpoint);
        Ok(self)
    }
}
