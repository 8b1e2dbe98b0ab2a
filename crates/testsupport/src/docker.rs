use async_trait::async_trait;
use bootspec_invoker::{CreateSpec, DockerLike};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory `DockerLike` that records every call.
#[derive(Clone, Default)]
pub struct FakeDocker {
    pub created: Arc<Mutex<Vec<CreateSpec>>>,
    pub started: Arc<Mutex<Vec<String>>>,
    pub stopped: Arc<Mutex<Vec<(String, u64)>>>,
    pub removed: Arc<Mutex<Vec<(String, bool)>>>,
    pub running: Arc<Mutex<HashSet<String>>>,
    /// Paths reported as absent from every container.
    pub missing_paths: Arc<Mutex<HashSet<String>>>,
    /// When set, `start` fails with this message.
    pub start_error: Arc<Mutex<Option<String>>>,
    pub next_id: Arc<Mutex<u64>>,
}

impl FakeDocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_missing_path(self, path: &str) -> Self {
        self.missing_paths.lock().await.insert(path.to_string());
        self
    }

    pub async fn fail_start(&self, message: &str) {
        *self.start_error.lock().await = Some(message.to_string());
    }

    pub async fn last_created(&self) -> CreateSpec {
        self.created
            .lock()
            .await
            .last()
            .cloned()
            .expect("no create")
    }

    pub async fn is_running(&self, container_id: &str) -> bool {
        self.running.lock().await.contains(container_id)
    }

    /// Simulates the process inside the container exiting.
    pub async fn exit(&self, container_id: &str) {
        self.running.lock().await.remove(container_id);
    }
}

#[async_trait]
impl DockerLike for FakeDocker {
    async fn create(&self, spec: CreateSpec) -> anyhow::Result<String> {
        self.created.lock().await.push(spec);
        let mut id = self.next_id.lock().await;
        *id += 1;
        Ok(format!("ctr-{}", *id))
    }

    async fn start(&self, container_id: &str) -> anyhow::Result<()> {
        if let Some(message) = self.start_error.lock().await.clone() {
            anyhow::bail!(message);
        }
        self.started.lock().await.push(container_id.to_string());
        self.running.lock().await.insert(container_id.to_string());
        Ok(())
    }

    async fn stop(&self, container_id: &str, timeout_secs: u64) -> anyhow::Result<()> {
        self.stopped
            .lock()
            .await
            .push((container_id.to_string(), timeout_secs));
        self.running.lock().await.remove(container_id);
        Ok(())
    }

    async fn remove(&self, container_id: &str, force: bool) -> anyhow::Result<()> {
        self.removed
            .lock()
            .await
            .push((container_id.to_string(), force));
        self.running.lock().await.remove(container_id);
        Ok(())
    }

    async fn inspect_running(&self, container_id: &str) -> anyhow::Result<bool> {
        Ok(self.running.lock().await.contains(container_id))
    }

    async fn path_exists(&self, _container_id: &str, path: &str) -> anyhow::Result<bool> {
        Ok(!self.missing_paths.lock().await.contains(path))
    }

    async fn logs(&self, container_id: &str) -> anyhow::Result<String> {
        Ok(format!("logs for {container_id}\n"))
    }
}
