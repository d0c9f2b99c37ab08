//! Docker: follows container output through the docker CLI.

use crate::client::ops::ContainerTail;

#[derive(Debug, Clone, Default)]
pub struct DockerCli {
    /// Socket path or URL; empty means the CLI's own default
    docker_host: String,
}

impl DockerCli {
    pub fn new(docker_host: impl Into<String>) -> Self {
        Self { docker_host: docker_host.into() }
    }

    /// Resolved `DOCKER_HOST` value, if one is configured
    pub fn host(&self) -> Option<String> {
        if self.docker_host.is_empty() {
            return None;
        }
        if self.docker_host.starts_with("unix://") || self.docker_host.starts_with("tcp://") {
            Some(self.docker_host.clone())
        } else {
            Some(format!("unix://{}", self.docker_host))
        }
    }

    fn docker_cli_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("docker");
        if let Some(host) = self.host() {
            cmd.env("DOCKER_HOST", host);
        }
        cmd
    }
}

impl ContainerTail for DockerCli {
    fn tail_command(&self, handle: &str) -> tokio::process::Command {
        let mut cmd = self.docker_cli_command();
        cmd.args(["logs", "--follow", "--tail", "all", handle]);
        cmd
    }
}
