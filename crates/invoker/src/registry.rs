use bootspec_models::{InstanceStatus, RunningInstance};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Instances started by a launcher, keyed by container id.
#[derive(Default)]
pub struct InstanceRegistry {
    instances: Mutex<HashMap<String, RunningInstance>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, instance: RunningInstance) {
        info!(
            "Tracking instance {} ({})",
            instance.name, instance.container_id
        );
        self.instances
            .lock()
            .await
            .insert(instance.container_id.clone(), instance);
    }

    pub async fn get(&self, container_id: &str) -> Option<RunningInstance> {
        self.instances.lock().await.get(container_id).cloned()
    }

    pub async fn set_status(&self, container_id: &str, status: InstanceStatus) {
        if let Some(instance) = self.instances.lock().await.get_mut(container_id) {
            if status == InstanceStatus::Failed {
                error!("Marked instance as failed: {}", container_id);
            }
            instance.status = status;
        }
    }

    pub async fn remove(&self, container_id: &str) -> Option<RunningInstance> {
        self.instances.lock().await.remove(container_id)
    }

    pub async fn list(&self) -> Vec<RunningInstance> {
        let mut instances: Vec<_> = self.instances.lock().await.values().cloned().collect();
        instances.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        instances
    }

    pub async fn running(&self) -> Vec<String> {
        self.instances
            .lock()
            .await
            .values()
            .filter(|i| i.status == InstanceStatus::Running)
            .map(|i| i.container_id.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.instances.lock().await.len()
    }
}
