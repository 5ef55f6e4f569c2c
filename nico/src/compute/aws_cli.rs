//! EC2 through the `aws` command line.
//!
//! Every call shells out to `aws ec2 ...` with `--output json`; the
//! waiter is `aws ec2 wait instance-running`. Credentials and retries are
//! the CLI's business.

use super::{ComputeError, ComputeProvider, InstanceDescription};
use nico_common::compute::ComputeState;
use serde::Deserialize;
use std::process::{Command, Output};
use tracing::debug;

/// Provider backed by the `aws` executable on `PATH`.
pub struct AwsCliProvider {
    program: String,
    region: String,
}

impl AwsCliProvider {
    pub fn new(region: &str) -> Self {
        Self {
            program: "aws".to_string(),
            region: region.to_string(),
        }
    }

    /// Use another executable (wrapper script, absolute path).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, args: &[&str], instance_id: &str) -> Result<Output, ComputeError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("ec2").args(args).args(["--instance-ids", instance_id]);
        if !self.region.is_empty() {
            cmd.args(["--region", &self.region]);
        }
        debug!("Running {cmd:?}");

        let output = cmd
            .output()
            .map_err(|e| ComputeError::Provider(format!("failed to run {}: {e}", self.program)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ComputeError::Provider(format!(
                "aws ec2 {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(output)
    }
}

impl ComputeProvider for AwsCliProvider {
    fn name(&self) -> &'static str {
        "aws-cli"
    }

    fn describe(&self, instance_id: &str) -> Result<InstanceDescription, ComputeError> {
        let output = self.run(&["describe-instances", "--output", "json"], instance_id)?;
        parse_describe(&output.stdout, instance_id)
    }

    fn start_instance(&self, instance_id: &str) -> Result<(), ComputeError> {
        self.run(&["start-instances", "--output", "json"], instance_id)
            .map(|_| ())
    }

    fn stop_instance(&self, instance_id: &str) -> Result<(), ComputeError> {
        self.run(&["stop-instances", "--output", "json"], instance_id)
            .map(|_| ())
    }

    fn wait_until_running(&self, instance_id: &str) -> Result<(), ComputeError> {
        self.run(&["wait", "instance-running"], instance_id).map(|_| ())
    }
}

// ─── describe-instances output ──────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeOutput {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    instance_id: String,
    state: InstanceState,
    #[serde(default)]
    public_ip_address: Option<String>,
    #[serde(default)]
    public_dns_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceState {
    name: String,
}

fn parse_describe(stdout: &[u8], instance_id: &str) -> Result<InstanceDescription, ComputeError> {
    let parsed: DescribeOutput = serde_json::from_slice(stdout)
        .map_err(|e| ComputeError::InvalidResponse(e.to_string()))?;

    let instance = parsed
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .find(|i| i.instance_id == instance_id)
        .ok_or_else(|| {
            ComputeError::InvalidResponse(format!("instance {instance_id} not in response"))
        })?;

    let state: ComputeState = instance
        .state
        .name
        .parse()
        .map_err(ComputeError::InvalidResponse)?;
    let public_host = instance
        .public_ip_address
        .or(instance.public_dns_name)
        .filter(|h| !h.is_empty());

    Ok(InstanceDescription { state, public_host })
}
