use crate::env::EnvMap;
use crate::error::BootstrapError;
use crate::ports::PortBinding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable image produced by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub tag: String,
    pub id: String,
    /// sha256 of the build context archive the image was built from.
    pub context_digest: String,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ImageState {
    #[default]
    Unbuilt,
    Built(Image),
}

impl ImageState {
    pub fn is_built(&self) -> bool {
        matches!(self, ImageState::Built(_))
    }

    pub fn image(&self) -> Result<&Image, BootstrapError> {
        match self {
            ImageState::Built(image) => Ok(image),
            ImageState::Unbuilt => Err(BootstrapError::NotBuilt),
        }
    }

    /// Records a finished build. A rebuild replaces the previous image; there
    /// is no way back to `Unbuilt`.
    pub fn built(&mut self, image: Image) {
        *self = ImageState::Built(image);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Running,
    Stopped,
    Failed,
}

/// One process started from an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningInstance {
    pub container_id: String,
    pub name: String,
    pub image_tag: String,
    pub env: EnvMap,
    pub port_bindings: Vec<PortBinding>,
    pub status: InstanceStatus,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(tag: &str) -> Image {
        Image {
            tag: tag.to_string(),
            id: "sha256:abc".to_string(),
            context_digest: "abc".to_string(),
            built_at: Utc::now(),
        }
    }

    #[test]
    fn unbuilt_has_no_image() {
        let state = ImageState::default();
        assert!(!state.is_built());
        assert!(matches!(state.image(), Err(BootstrapError::NotBuilt)));
    }

    #[test]
    fn rebuild_replaces_image() {
        let mut state = ImageState::Unbuilt;
        state.built(image("bootspec/app:one"));
        state.built(image("bootspec/app:two"));
        assert_eq!(state.image().unwrap().tag, "bootspec/app:two");
    }
}
