// Container status: name, running state, health. Two backends share the status parser:
// the Docker Engine API via bollard, and `docker ps` when the socket is not reachable.

use bollard::Docker;
use bollard::query_parameters::ListContainersOptions;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::time::Duration;
use tokio::process::Command;

use super::Provider;
use crate::models::Payload;

pub const SOURCE_ID: &str = "containers";

/// Default Docker Engine socket.
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Startup ping budget before `auto` falls back to the CLI.
pub const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Container state; serializes to lowercase JSON (e.g. "running").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Paused,
    Restarting,
    Exited,
    Created,
    Dead,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerHealth {
    Healthy,
    Unhealthy,
    Starting,
    /// No health check configured.
    #[serde(rename = "none")]
    NoCheck,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStatus {
    pub name: String,
    pub state: ContainerState,
    pub health: ContainerHealth,
}

/// Parse a runtime status line such as `Up 3 hours (healthy)` or `Exited (1) 2 minutes ago`.
pub fn parse_docker_status(status: &str) -> (ContainerState, ContainerHealth) {
    let s = status.trim().to_lowercase();
    let state = if s.starts_with("up") {
        if s.contains("(paused)") {
            ContainerState::Paused
        } else {
            ContainerState::Running
        }
    } else if s.starts_with("restarting") {
        ContainerState::Restarting
    } else if s.starts_with("exited") {
        ContainerState::Exited
    } else if s.starts_with("created") {
        ContainerState::Created
    } else if s.starts_with("dead") || s.starts_with("removal") {
        ContainerState::Dead
    } else {
        ContainerState::Unknown
    };
    let health = if s.contains("(healthy)") {
        ContainerHealth::Healthy
    } else if s.contains("(unhealthy)") {
        ContainerHealth::Unhealthy
    } else if s.contains("(health: starting)") {
        ContainerHealth::Starting
    } else {
        ContainerHealth::NoCheck
    };
    (state, health)
}

/// Parse `docker ps --format '{{.Names}}\t{{.Status}}'` output.
pub fn parse_ps_output(stdout: &str) -> Vec<ContainerStatus> {
    stdout
        .lines()
        .filter_map(|line| {
            let (names, status) = line.split_once('\t')?;
            let name = names.split(',').next()?.trim();
            if name.is_empty() {
                return None;
            }
            let (state, health) = parse_docker_status(status);
            Some(ContainerStatus {
                name: name.to_string(),
                state,
                health,
            })
        })
        .collect()
}

fn container_payload(mut containers: Vec<ContainerStatus>) -> anyhow::Result<Payload> {
    containers.sort_by(|a, b| a.name.cmp(&b.name));
    let running = containers
        .iter()
        .filter(|c| c.state == ContainerState::Running)
        .count();
    let unhealthy = containers
        .iter()
        .filter(|c| c.health == ContainerHealth::Unhealthy)
        .count();

    let mut payload = Payload::new();
    payload.insert("total".into(), containers.len().into());
    payload.insert("running".into(), running.into());
    payload.insert("unhealthy".into(), unhealthy.into());
    payload.insert("containers".into(), serde_json::to_value(&containers)?);
    Ok(payload)
}

pub struct DockerApiProvider {
    docker: Docker,
}

impl DockerApiProvider {
    /// Connect over the local socket and ping the daemon.
    pub async fn connect() -> anyhow::Result<Self> {
        Self::connect_at(DOCKER_SOCKET, PING_TIMEOUT).await
    }

    /// Connect to the daemon at `socket`; a ping that takes longer than `ping_timeout`
    /// is an error.
    pub async fn connect_at(socket: &str, ping_timeout: Duration) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_unix(
            socket,
            ping_timeout.as_secs().max(1),
            bollard::API_DEFAULT_VERSION,
        )?;
        tokio::time::timeout(ping_timeout, docker.ping())
            .await
            .map_err(|_| anyhow::anyhow!("docker ping timed out after {:?}", ping_timeout))??;
        Ok(Self { docker })
    }

    async fn list(&self) -> anyhow::Result<Vec<ContainerStatus>> {
        let options = ListContainersOptions {
            all: true,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .iter()
            .map(|c| {
                let name = c
                    .names
                    .as_ref()
                    .and_then(|n| n.first())
                    .cloned()
                    .or_else(|| c.id.clone())
                    .unwrap_or_default();
                let (state, health) = parse_docker_status(c.status.as_deref().unwrap_or_default());
                ContainerStatus {
                    name: name.trim_start_matches('/').to_string(),
                    state,
                    health,
                }
            })
            .collect())
    }
}

impl Provider for DockerApiProvider {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn collect(&self) -> BoxFuture<'_, anyhow::Result<Payload>> {
        async move { container_payload(self.list().await?) }.boxed()
    }
}

pub struct DockerCliProvider {
    binary: String,
}

impl DockerCliProvider {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn list(&self) -> anyhow::Result<Vec<ContainerStatus>> {
        let output = Command::new(&self.binary)
            .args(["ps", "--all", "--format", "{{.Names}}\t{{.Status}}"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("spawn {}: {}", self.binary, e))?;
        anyhow::ensure!(
            output.status.success(),
            "{} ps exited with {}: {}",
            self.binary,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl Provider for DockerCliProvider {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn collect(&self) -> BoxFuture<'_, anyhow::Result<Payload>> {
        async move { container_payload(self.list().await?) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_docker_status_running_with_health() {
        assert_eq!(
            parse_docker_status("Up 3 hours (healthy)"),
            (ContainerState::Running, ContainerHealth::Healthy)
        );
        assert_eq!(
            parse_docker_status("Up 10 seconds (health: starting)"),
            (ContainerState::Running, ContainerHealth::Starting)
        );
        assert_eq!(
            parse_docker_status("Up 2 days (unhealthy)"),
            (ContainerState::Running, ContainerHealth::Unhealthy)
        );
    }

    #[test]
    fn parse_docker_status_other_states() {
        assert_eq!(
            parse_docker_status("Up 5 minutes (Paused)"),
            (ContainerState::Paused, ContainerHealth::NoCheck)
        );
        assert_eq!(
            parse_docker_status("Exited (137) 2 minutes ago"),
            (ContainerState::Exited, ContainerHealth::NoCheck)
        );
        assert_eq!(
            parse_docker_status("Restarting (1) 4 seconds ago").0,
            ContainerState::Restarting
        );
        assert_eq!(parse_docker_status("Created").0, ContainerState::Created);
        assert_eq!(parse_docker_status("").0, ContainerState::Unknown);
    }

    #[test]
    fn parse_ps_output_skips_malformed_lines() {
        let out = "web\tUp 1 hour (healthy)\nbroken line\ndb,db-alias\tExited (0) 3 days ago\n\n";
        let parsed = parse_ps_output(out);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "web");
        assert_eq!(parsed[1].name, "db");
        assert_eq!(parsed[1].state, ContainerState::Exited);
    }

    #[test]
    fn container_payload_counts_and_sorts() {
        let payload = container_payload(parse_ps_output(
            "zeta\tUp 1 hour (unhealthy)\nalpha\tUp 2 hours\nmid\tExited (1) 1 minute ago\n",
        ))
        .unwrap();
        assert_eq!(payload["total"], 3);
        assert_eq!(payload["running"], 2);
        assert_eq!(payload["unhealthy"], 1);
        let names: Vec<&str> = payload["containers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
        assert_eq!(payload["containers"][2]["health"], "unhealthy");
    }
}
