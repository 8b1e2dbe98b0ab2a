use crate::docker::{CreateSpec, DockerLike};
use crate::registry::InstanceRegistry;
use bootspec_models::{
    default_bindings, env_to_docker, merge_env, BootstrapError, BuildSpec, EnvMap, Image,
    InstanceStatus, PortBinding, RunConfig, RunningInstance, PORT_ENV,
};
use std::io::ErrorKind;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

/// Caller-supplied parts of a run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub env_overrides: EnvMap,
    /// Empty publishes every exposed port on the same host port.
    pub port_bindings: Vec<PortBinding>,
}

pub type PortProbe = fn(&PortBinding) -> Result<(), BootstrapError>;

/// Fails if the host port is already taken on this machine.
///
/// Privileged ports are left to the daemon, which can bind them when this
/// process cannot.
pub fn probe_host_port(binding: &PortBinding) -> Result<(), BootstrapError> {
    match TcpListener::bind((binding.host_ip.as_str(), binding.host_port)) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            debug!("Cannot check {} locally: {}", binding, e);
            Ok(())
        }
        Err(e) => Err(BootstrapError::PortBinding {
            port: binding.host_port,
            reason: e.to_string(),
        }),
    }
}

/// For daemons on another host, where local port state says nothing.
pub fn skip_port_probe(_binding: &PortBinding) -> Result<(), BootstrapError> {
    Ok(())
}

fn is_wildcard(ip: &str) -> bool {
    matches!(ip, "" | "0.0.0.0" | "::")
}

/// Two bindings collide when they share a host port and either listens on
/// every address or both name the same one.
fn overlaps(a: &PortBinding, b: &PortBinding) -> bool {
    a.host_port == b.host_port
        && (is_wildcard(&a.host_ip) || is_wildcard(&b.host_ip) || a.host_ip == b.host_ip)
}

/// The binding a daemon conflict message names, e.g.
/// `Bind for 0.0.0.0:8080 failed: port is already allocated`.
fn conflicting_port(message: &str, bindings: &[PortBinding]) -> u16 {
    bindings
        .iter()
        .map(|b| b.host_port)
        .find(|port| {
            let needle = format!(":{port}");
            message.match_indices(&needle).any(|(at, _)| {
                !message[at + needle.len()..].starts_with(|c: char| c.is_ascii_digit())
            })
        })
        .or_else(|| bindings.first().map(|b| b.host_port))
        .unwrap_or_default()
}

fn is_port_conflict(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("port is already allocated")
        || message.contains("address already in use")
        || message.contains("ports are not available")
}

/// Starts processes from built images.
///
/// Every `run` is independent: it gets its own environment merge, its own
/// port bindings and its own container.
pub struct Launcher<D: DockerLike> {
    docker: Arc<D>,
    spec: Arc<BuildSpec>,
    config: RunConfig,
    registry: InstanceRegistry,
    port_probe: PortProbe,
}

impl<D: DockerLike> Launcher<D> {
    pub fn new(docker: Arc<D>, spec: Arc<BuildSpec>, config: RunConfig) -> Self {
        Self {
            docker,
            spec,
            config,
            registry: InstanceRegistry::new(),
            port_probe: probe_host_port,
        }
    }

    pub fn with_port_probe(mut self, probe: PortProbe) -> Self {
        self.port_probe = probe;
        self
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn effective_env(&self, overrides: &EnvMap) -> EnvMap {
        merge_env(self.spec.env_defaults(), overrides)
    }

    pub fn resolve_bindings(&self, requested: &[PortBinding]) -> Vec<PortBinding> {
        if requested.is_empty() {
            default_bindings(self.spec.exposed_ports(), &self.config.host_ip)
        } else {
            requested.to_vec()
        }
    }

    #[instrument(skip(self, image, request), fields(image = %image.tag))]
    pub async fn run(
        &self,
        image: &Image,
        request: RunRequest,
    ) -> Result<RunningInstance, BootstrapError> {
        let env = self.effective_env(&request.env_overrides);
        let bindings = self.resolve_bindings(&request.port_bindings);
        self.check_bindings(&bindings)?;
        self.warn_on_port_mismatch(&env, &bindings);

        let name = format!("bootspec-{}-{}", self.spec.name(), uuid::Uuid::new_v4());
        let mut exposed: Vec<u16> = self.spec.exposed_ports().to_vec();
        for binding in &bindings {
            if !exposed.contains(&binding.container_port) {
                exposed.push(binding.container_port);
            }
        }

        let create = CreateSpec {
            image: image.tag.clone(),
            name: name.clone(),
            env: env_to_docker(&env),
            exposed_ports: exposed,
            port_bindings: bindings.clone(),
            working_dir: Some(self.spec.work_dir().to_string()),
            labels: vec![
                ("bootspec.name".to_string(), self.spec.name().to_string()),
                ("bootspec.digest".to_string(), image.context_digest.clone()),
            ],
        };

        let container_id = self.docker.create(create).await.map_err(docker_error)?;

        if let Some(entry) = self.spec.entry_target_in_image() {
            let exists = match self.docker.path_exists(&container_id, &entry).await {
                Ok(exists) => exists,
                Err(e) => {
                    self.discard(&container_id).await;
                    return Err(docker_error(e));
                }
            };
            if !exists {
                warn!("Entry point {} missing from image {}", entry, image.tag);
                self.discard(&container_id).await;
                return Err(BootstrapError::EntryPointNotFound { path: entry });
            }
        }

        if let Err(e) = self.docker.start(&container_id).await {
            self.discard(&container_id).await;
            let message = e.to_string();
            if is_port_conflict(&message) {
                return Err(BootstrapError::PortBinding {
                    port: conflicting_port(&message, &bindings),
                    reason: message,
                });
            }
            return Err(BootstrapError::Docker { message });
        }

        let instance = RunningInstance {
            container_id: container_id.clone(),
            name,
            image_tag: image.tag.clone(),
            env,
            port_bindings: bindings,
            status: InstanceStatus::Running,
            started_at: chrono::Utc::now(),
        };
        self.registry.insert(instance.clone()).await;

        info!(
            "Started {} from {} on {}",
            instance.name,
            image.tag,
            instance
                .port_bindings
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(instance)
    }

    /// Stops and removes one instance. Other instances are untouched.
    #[instrument(skip(self))]
    pub async fn stop(&self, container_id: &str) -> Result<(), BootstrapError> {
        if let Err(e) = self
            .docker
            .stop(container_id, self.config.stop_grace_secs)
            .await
        {
            warn!("Failed to stop {}: {}", container_id, e);
        }
        self.registry
            .set_status(container_id, InstanceStatus::Stopped)
            .await;

        self.docker
            .remove(container_id, true)
            .await
            .map_err(docker_error)?;
        self.registry.remove(container_id).await;
        Ok(())
    }

    /// Stops every tracked instance, returning how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for instance in self.registry.list().await {
            match self.stop(&instance.container_id).await {
                Ok(()) => stopped += 1,
                Err(e) => warn!("Failed to stop {}: {}", instance.container_id, e),
            }
        }
        stopped
    }

    pub async fn logs(&self, container_id: &str) -> Result<String, BootstrapError> {
        self.docker.logs(container_id).await.map_err(docker_error)
    }

    /// Waits until the instance accepts connections on its first binding and,
    /// if a health path is configured, answers it with a success status.
    #[instrument(skip(self, instance), fields(container = %instance.container_id))]
    pub async fn wait_ready(&self, instance: &RunningInstance) -> Result<(), BootstrapError> {
        let Some(binding) = instance.port_bindings.first() else {
            return Ok(());
        };
        let host = match binding.host_ip.as_str() {
            "0.0.0.0" | "" => "127.0.0.1",
            ip => ip,
        };
        let address = format!("{host}:{}", binding.host_port);
        let timeout_ms = self.config.ready_timeout_ms;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let client = reqwest::Client::new();

        loop {
            // Every wait below is capped by what is left, so a server that
            // accepts and never answers cannot hold past the deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.registry
                    .set_status(&instance.container_id, InstanceStatus::Failed)
                    .await;
                return Err(BootstrapError::NotReady { timeout_ms });
            }

            match self.docker.inspect_running(&instance.container_id).await {
                Ok(true) => {}
                Ok(false) => {
                    self.registry
                        .set_status(&instance.container_id, InstanceStatus::Failed)
                        .await;
                    return Err(BootstrapError::Docker {
                        message: format!("{} exited before becoming ready", instance.name),
                    });
                }
                Err(e) => return Err(docker_error(e)),
            }

            let connected = matches!(
                tokio::time::timeout(remaining, TcpStream::connect(&address)).await,
                Ok(Ok(_))
            );
            if connected {
                match &self.config.health_path {
                    None => break,
                    Some(path) => {
                        let url = format!("http://{address}{path}");
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if let Ok(response) = client.get(&url).timeout(remaining).send().await {
                            if response.status().is_success() {
                                break;
                            }
                        }
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(Duration::from_millis(100))).await;
        }

        info!("{} is ready on {}", instance.name, address);
        Ok(())
    }

    fn check_bindings(&self, bindings: &[PortBinding]) -> Result<(), BootstrapError> {
        for (i, binding) in bindings.iter().enumerate() {
            if bindings[..i].iter().any(|earlier| overlaps(earlier, binding)) {
                return Err(BootstrapError::PortBinding {
                    port: binding.host_port,
                    reason: "requested more than once".to_string(),
                });
            }
            if !self.spec.exposed_ports().contains(&binding.container_port) {
                warn!(
                    "Binding {} targets a port the image does not expose",
                    binding
                );
            }
            (self.port_probe)(binding)?;
        }
        Ok(())
    }

    /// `PORT` is handed to the application as-is; the published ports are
    /// never rebound to follow it.
    fn warn_on_port_mismatch(&self, env: &EnvMap, bindings: &[PortBinding]) {
        let Some(port) = env.get(PORT_ENV).and_then(|p| p.parse::<u16>().ok()) else {
            return;
        };
        if !bindings.iter().any(|b| b.container_port == port) {
            warn!(
                "{}={} but published container ports are {:?}; the application may be unreachable",
                PORT_ENV,
                port,
                bindings.iter().map(|b| b.container_port).collect::<Vec<_>>()
            );
        }
    }

    async fn discard(&self, container_id: &str) {
        if let Err(e) = self.docker.remove(container_id, true).await {
            warn!("Failed to remove container {}: {}", container_id, e);
        }
    }
}

fn docker_error(e: anyhow::Error) -> BootstrapError {
    BootstrapError::Docker {
        message: e.to_string(),
    }
}
