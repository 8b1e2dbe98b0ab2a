use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{HostConfig, PortBinding as DockerPortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;

use async_trait::async_trait;
use bootspec_models::{BootstrapError, DockerConfig, PortBinding};
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::{error, info, instrument};

#[derive(Clone, Debug)]
pub struct CreateSpec {
    pub image: String,
    pub name: String,
    pub env: Vec<String>,
    pub exposed_ports: Vec<u16>,
    pub port_bindings: Vec<PortBinding>,
    pub working_dir: Option<String>,
    pub labels: Vec<(String, String)>,
}

impl Default for CreateSpec {
    fn default() -> Self {
        Self {
            image: "test:latest".to_string(),
            name: "test-container".to_string(),
            env: vec![],
            exposed_ports: vec![],
            port_bindings: vec![],
            working_dir: None,
            labels: vec![],
        }
    }
}

#[async_trait]
pub trait DockerLike: Send + Sync + 'static {
    async fn create(&self, spec: CreateSpec) -> anyhow::Result<String>; // returns container_id
    async fn start(&self, container_id: &str) -> anyhow::Result<()>;
    async fn stop(&self, container_id: &str, timeout_secs: u64) -> anyhow::Result<()>;
    async fn remove(&self, container_id: &str, force: bool) -> anyhow::Result<()>;
    async fn inspect_running(&self, container_id: &str) -> anyhow::Result<bool>;
    /// Whether `path` exists in the container's filesystem. Works on created,
    /// not yet started containers.
    async fn path_exists(&self, container_id: &str, path: &str) -> anyhow::Result<bool>;
    async fn logs(&self, container_id: &str) -> anyhow::Result<String>;
}

/// Connects to the daemon named by `DOCKER_HOST` or the config, falling back
/// to the local socket.
/// `DOCKER_HOST` if set, else the configured host. `None` means the local
/// socket.
pub fn daemon_host(config: &DockerConfig) -> Option<String> {
    std::env::var("DOCKER_HOST")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| Some(config.host.clone()).filter(|h| !h.is_empty()))
}

/// Whether ports published by the daemon at `host` are ports on this machine.
pub fn is_local_daemon(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return true;
    };
    let Some(rest) = host
        .strip_prefix("tcp://")
        .or_else(|| host.strip_prefix("http://"))
        .or_else(|| host.strip_prefix("https://"))
    else {
        // unix:// and npipe:// sockets
        return true;
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    let name = match authority.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or(v6),
        None => authority.rsplit_once(':').map_or(authority, |(name, _)| name),
    };
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}

pub fn connect(config: &DockerConfig) -> Result<Docker, BootstrapError> {
    match daemon_host(config) {
        Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
            Docker::connect_with_http(&host, 120, bollard::API_DEFAULT_VERSION).map_err(|e| {
                BootstrapError::Docker {
                    message: format!("Failed to connect to Docker at {host}: {e}"),
                }
            })
        }
        _ => Docker::connect_with_socket_defaults().map_err(|e| BootstrapError::Docker {
            message: e.to_string(),
        }),
    }
}

pub struct Invoker {
    docker: Docker,
}

impl Invoker {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

fn to_host_config(bindings: &[PortBinding]) -> HostConfig {
    let mut port_bindings: HashMap<String, Option<Vec<DockerPortBinding>>> = HashMap::new();
    for binding in bindings {
        port_bindings
            .entry(binding.container_key())
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(DockerPortBinding {
                host_ip: Some(binding.host_ip.clone()),
                host_port: Some(binding.host_port.to_string()),
            });
    }

    HostConfig {
        port_bindings: Some(port_bindings),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            maximum_retry_count: None,
        }),
        ..Default::default()
    }
}

#[async_trait]
impl DockerLike for Invoker {
    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create(&self, spec: CreateSpec) -> anyhow::Result<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|port| (format!("{port}/tcp"), HashMap::new()))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            working_dir: spec.working_dir.clone(),
            host_config: Some(to_host_config(&spec.port_bindings)),
            labels: Some(spec.labels.iter().cloned().collect()),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self.docker.create_container(Some(options), config).await?;
        info!("Created container: {} with ID: {}", spec.name, response.id);
        Ok(response.id)
    }

    async fn start(&self, container_id: &str) -> anyhow::Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        info!("Started container: {}", container_id);
        Ok(())
    }

    async fn stop(&self, container_id: &str, timeout_secs: u64) -> anyhow::Result<()> {
        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };
        self.docker
            .stop_container(container_id, Some(options))
            .await?;
        info!("Stopped container: {}", container_id);
        Ok(())
    }

    async fn remove(&self, container_id: &str, force: bool) -> anyhow::Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(container_id, Some(options))
            .await?;
        info!("Removed container: {}", container_id);
        Ok(())
    }

    async fn inspect_running(&self, container_id: &str) -> anyhow::Result<bool> {
        let container = self.docker.inspect_container(container_id, None).await?;
        Ok(container
            .state
            .is_some_and(|state| state.running.unwrap_or(false)))
    }

    async fn path_exists(&self, container_id: &str, path: &str) -> anyhow::Result<bool> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut stream = Box::pin(
            self.docker
                .download_from_container(container_id, Some(options)),
        );

        match stream.next().await {
            Some(Ok(_)) => Ok(true),
            Some(Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            })) => Ok(false),
            Some(Err(e)) => Err(e.into()),
            None => Ok(false),
        }
    }

    #[instrument(skip(self))]
    async fn logs(&self, container_id: &str) -> anyhow::Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: true,
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_id, Some(options));

        let mut logs = String::new();
        while let Some(log) = stream.next().await {
            match log {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::StdIn { message })
                | Ok(LogOutput::Console { message }) => {
                    logs.push_str(&String::from_utf8_lossy(&message));
                }
                Err(e) => {
                    error!("Error reading container logs: {}", e);
                    break;
                }
            }
        }

        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_config_groups_bindings_by_container_port() {
        let bindings = vec![
            PortBinding::new(7860, 7860, "0.0.0.0"),
            PortBinding::new(7860, 8080, "127.0.0.1"),
            PortBinding::new(9000, 9000, "0.0.0.0"),
        ];
        let host_config = to_host_config(&bindings);
        let ports = host_config.port_bindings.unwrap();

        let published = ports["7860/tcp"].as_ref().unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].host_port.as_deref(), Some("8080"));
        assert_eq!(published[1].host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(ports["9000/tcp"].as_ref().unwrap().len(), 1);
    }

    #[test]
    fn local_and_remote_daemons() {
        assert!(is_local_daemon(None));
        assert!(is_local_daemon(Some("unix:///var/run/docker.sock")));
        assert!(is_local_daemon(Some("tcp://localhost:2375")));
        assert!(is_local_daemon(Some("tcp://127.0.0.1:2375")));
        assert!(is_local_daemon(Some("tcp://[::1]:2375")));
        assert!(!is_local_daemon(Some("tcp://10.0.0.5:2376")));
        assert!(!is_local_daemon(Some("http://build-host:2375")));
    }
}
