use crate::archive::ContextPacker;
use crate::cache::BuildCache;
use crate::context::BuildContext;
use crate::plan::{BuildPlan, DOCKERFILE_NAME};
use async_trait::async_trait;
use bootspec_models::{BootstrapError, BuildSpec, Image};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// What the daemon reported for one build.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub image_id: Option<String>,
    pub log: Vec<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait ImageBackend: Send + Sync + 'static {
    async fn build_image(
        &self,
        tag: &str,
        dockerfile: &str,
        context: Bytes,
    ) -> anyhow::Result<BuildOutput>;
    /// `None` when the daemon does not know the tag.
    async fn image_id(&self, tag: &str) -> anyhow::Result<Option<String>>;
    /// `created_by` of every layer, newest first.
    async fn image_history(&self, tag: &str) -> anyhow::Result<Vec<String>>;
}

pub struct ImageBuilder<B: ImageBackend> {
    backend: Arc<B>,
    packer: ContextPacker,
    cache: BuildCache,
    repository: String,
}

impl<B: ImageBackend> ImageBuilder<B> {
    pub fn new(backend: Arc<B>, cache: BuildCache, repository: impl Into<String>) -> Self {
        Self {
            backend,
            packer: ContextPacker::default(),
            cache,
            repository: repository.into(),
        }
    }

    pub fn with_packer(mut self, packer: ContextPacker) -> Self {
        self.packer = packer;
        self
    }

    pub fn backend(&self) -> Arc<B> {
        self.backend.clone()
    }

    /// Builds `spec` from `context_dir`, or returns the image already built
    /// from an identical context.
    ///
    /// Nothing reaches the daemon unless the build spec and the context validate.
    #[instrument(skip(self, spec), fields(name = %spec.name()))]
    pub async fn build(
        &mut self,
        spec: &BuildSpec,
        context_dir: &std::path::Path,
        tag: Option<&str>,
    ) -> Result<Image, BootstrapError> {
        spec.validate()?;
        let context = BuildContext::new(context_dir);
        context.validate(spec)?;

        let plan = BuildPlan::from_spec(spec);
        plan.verify_order()?;
        let dockerfile = plan.render();

        let archive = self.packer.pack(&context, spec, &dockerfile)?;
        let tag = match tag {
            Some(tag) => tag.to_string(),
            None => self.default_tag(spec, &archive.digest),
        };

        if let Some(cached) = self.cache.get(&tag, &archive.digest) {
            match self.backend.image_id(&tag).await {
                Ok(Some(id)) if id == cached.id => {
                    info!("Context unchanged, reusing image {} ({})", tag, id);
                    return Ok(cached.clone());
                }
                Ok(_) => {
                    warn!("Cached image {} is gone from the daemon, rebuilding", tag);
                    self.cache.invalidate(&tag);
                }
                Err(e) => {
                    return Err(BootstrapError::Docker {
                        message: e.to_string(),
                    })
                }
            }
        }

        info!("Building image: {}", tag);
        let output = self
            .backend
            .build_image(&tag, DOCKERFILE_NAME, archive.data.clone())
            .await
            .map_err(|e| BootstrapError::Docker {
                message: e.to_string(),
            })?;

        if output.error.is_some() {
            let err = classify_build_failure(&plan, &output);
            error!("Image build failed: {}", err);
            return Err(err);
        }

        let id = match output.image_id {
            Some(id) => id,
            None => self
                .backend
                .image_id(&tag)
                .await
                .map_err(|e| BootstrapError::Docker {
                    message: e.to_string(),
                })?
                .ok_or_else(|| BootstrapError::BuildFailed {
                    message: format!("daemon reported no image for {tag}"),
                })?,
        };

        let history = self
            .backend
            .image_history(&tag)
            .await
            .map_err(|e| BootstrapError::Docker {
                message: e.to_string(),
            })?;
        if let Some(install) = plan.install_line() {
            verify_layer_order(&history, &install)?;
        }

        let image = Image {
            tag,
            id,
            context_digest: archive.digest,
            built_at: chrono::Utc::now(),
        };
        self.cache.insert(image.clone());
        self.cache.save_cache()?;

        info!("Built image: {} ({})", image.tag, image.id);
        Ok(image)
    }

    fn default_tag(&self, spec: &BuildSpec, digest: &str) -> String {
        let short = &digest[..digest.len().min(12)];
        format!("{}/{}:{}", self.repository, spec.name(), short)
    }
}

/// Maps a failed build to the error for the step that failed.
///
/// A failure while the install step runs is a dependency resolution failure
/// and carries the daemon's message verbatim.
pub fn classify_build_failure(plan: &BuildPlan, output: &BuildOutput) -> BootstrapError {
    let message = output.error.clone().unwrap_or_default();
    let install = plan.install_line();

    let last_step = output
        .log
        .iter()
        .rev()
        .find_map(|line| line.trim().strip_prefix("Step ").and_then(|s| s.split_once(" : ")))
        .map(|(_, instruction)| instruction.trim().to_string());

    let failed_in_install = match (&install, &last_step) {
        (Some(install), Some(step)) => step == &format!("RUN {install}"),
        (Some(install), None) => message.contains(install.as_str()),
        _ => false,
    };

    if failed_in_install {
        BootstrapError::DependencyResolution { message }
    } else {
        BootstrapError::BuildFailed { message }
    }
}

/// Checks the image history for the manifest-then-install-then-sources
/// layering.
///
/// `history` is newest first, as the daemon returns it. The install layer
/// must be directly preceded by a COPY (the manifest) with no other RUN in
/// between, and followed by at least one COPY (the sources).
pub fn verify_layer_order(history: &[String], install: &str) -> Result<(), BootstrapError> {
    let layers: Vec<&str> = history.iter().rev().map(String::as_str).collect();

    let install_at = layers
        .iter()
        .rposition(|layer| is_run(layer) && layer.contains(install))
        .ok_or_else(|| BootstrapError::LayerOrder {
            reason: format!("no layer runs {install:?}"),
        })?;

    let manifest_first = layers[..install_at]
        .iter()
        .rev()
        .take_while(|layer| !is_run(layer))
        .any(|layer| is_copy(layer));
    if !manifest_first {
        return Err(BootstrapError::LayerOrder {
            reason: "install layer is not preceded by the manifest copy".to_string(),
        });
    }

    if !layers[install_at + 1..].iter().any(|layer| is_copy(layer)) {
        return Err(BootstrapError::LayerOrder {
            reason: "no source copy after the install layer".to_string(),
        });
    }

    Ok(())
}

fn is_run(layer: &str) -> bool {
    let layer = layer.trim();
    layer.starts_with("RUN ") || (layer.starts_with("/bin/sh -c ") && !layer.contains("#(nop)"))
}

fn is_copy(layer: &str) -> bool {
    let layer = layer.trim();
    layer.starts_with("COPY ") || layer.contains("#(nop) COPY ")
}
