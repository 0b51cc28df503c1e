// Data sources polled by samplers. One provider per source; sources with an optional
// backend (container runtime API vs CLI, sysinfo vs /proc) pick a variant once, here.

mod containers;
mod host;
mod log_tail;
mod ports;
mod services;

pub use containers::{
    ContainerHealth, ContainerState, ContainerStatus, DockerApiProvider, DockerCliProvider,
    parse_docker_status, parse_ps_output,
};
pub use host::{ProcfsHostProvider, SysinfoHostProvider};
pub use log_tail::{LogTailProvider, read_last_lines};
pub use ports::{PortScanProvider, PortState};
pub use services::{ServiceState, ServiceStatusProvider};

use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{ContainerBackend, HostBackend, SourcesConfig};
use crate::models::Payload;

/// One data source. `collect` may block on external tools; the sampler bounds it with a
/// timeout, so implementations need not.
pub trait Provider: Send + Sync {
    fn source_id(&self) -> &str;

    fn collect(&self) -> BoxFuture<'_, anyhow::Result<Payload>>;
}

/// Build one provider per enabled source. Backend detection happens once, here.
pub async fn from_config(sources: &SourcesConfig) -> anyhow::Result<Vec<Arc<dyn Provider>>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    match sources.containers {
        ContainerBackend::Disabled => {}
        ContainerBackend::Api => providers.push(Arc::new(DockerApiProvider::connect().await?)),
        ContainerBackend::Cli => providers.push(Arc::new(DockerCliProvider::new(
            sources.docker_binary.clone(),
        ))),
        ContainerBackend::Auto => match DockerApiProvider::connect().await {
            Ok(api) => {
                info!(backend = "api", "containers source");
                providers.push(Arc::new(api));
            }
            Err(e) => {
                info!(backend = "cli", reason = %e, "containers source: Docker API unreachable, using CLI");
                providers.push(Arc::new(DockerCliProvider::new(
                    sources.docker_binary.clone(),
                )));
            }
        },
    }

    match sources.host {
        HostBackend::Disabled => {}
        HostBackend::Auto | HostBackend::Sysinfo => {
            providers.push(Arc::new(SysinfoHostProvider::new()));
        }
        HostBackend::Procfs => providers.push(Arc::new(ProcfsHostProvider::new(
            sources.disk_mount.clone(),
        ))),
    }

    for log in &sources.logs {
        providers.push(Arc::new(LogTailProvider::new(&log.name, &log.path, log.lines)));
    }

    if !sources.ports.is_empty() {
        providers.push(Arc::new(PortScanProvider::new(
            sources.port_host.clone(),
            sources.ports.clone(),
            Duration::from_millis(sources.port_timeout_ms),
        )));
    }

    if !sources.services.is_empty() {
        providers.push(Arc::new(ServiceStatusProvider::new(
            sources.systemctl_binary.clone(),
            sources.services.clone(),
        )));
    }

    Ok(providers)
}
