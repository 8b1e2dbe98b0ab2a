use bootspec_invoker::{DockerLike, Launcher, PortProbe, RunRequest};
use bootspec_models::{
    BootstrapError, BuildSpec, EnvMap, Image, ImageState, RunConfig, RunningInstance,
};
use bootspec_packaging::{ImageBackend, ImageBuilder};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

/// Drives one service through `Unbuilt -> Built -> Running*`.
///
/// `build` needs `&mut self`; any number of `run`s can proceed concurrently
/// against the built image.
pub struct Bootstrap<B: ImageBackend, D: DockerLike> {
    spec: Arc<BuildSpec>,
    state: ImageState,
    builder: ImageBuilder<B>,
    launcher: Launcher<D>,
}

impl<B: ImageBackend, D: DockerLike> Bootstrap<B, D> {
    pub fn new(
        spec: BuildSpec,
        builder: ImageBuilder<B>,
        docker: Arc<D>,
        run_config: RunConfig,
    ) -> Self {
        let spec = Arc::new(spec);
        Self {
            launcher: Launcher::new(docker, spec.clone(), run_config),
            spec,
            state: ImageState::default(),
            builder,
        }
    }

    pub fn with_port_probe(mut self, probe: PortProbe) -> Self {
        self.launcher = self.launcher.with_port_probe(probe);
        self
    }

    pub fn spec(&self) -> &BuildSpec {
        &self.spec
    }

    pub fn state(&self) -> &ImageState {
        &self.state
    }

    pub fn launcher(&self) -> &Launcher<D> {
        &self.launcher
    }

    pub fn effective_env(&self, overrides: &EnvMap) -> EnvMap {
        self.launcher.effective_env(overrides)
    }

    /// Builds the image. A failed build leaves the current state untouched.
    #[instrument(skip(self), fields(name = %self.spec.name()))]
    pub async fn build(
        &mut self,
        context_dir: &Path,
        tag: Option<&str>,
    ) -> Result<Image, BootstrapError> {
        let image = self.builder.build(&self.spec, context_dir, tag).await?;
        self.state.built(image.clone());
        Ok(image)
    }

    /// Adopts an image built earlier, looked up by tag on the daemon.
    #[instrument(skip(self))]
    pub async fn use_existing(&mut self, tag: &str) -> Result<Image, BootstrapError> {
        let id = self
            .builder
            .backend()
            .image_id(tag)
            .await
            .map_err(|e| BootstrapError::Docker {
                message: e.to_string(),
            })?
            .ok_or(BootstrapError::NotBuilt)?;

        let image = Image {
            tag: tag.to_string(),
            id,
            context_digest: String::new(),
            built_at: chrono::Utc::now(),
        };
        info!("Using existing image {} ({})", image.tag, image.id);
        self.state.built(image.clone());
        Ok(image)
    }

    /// Starts a new process from the built image.
    pub async fn run(&self, request: RunRequest) -> Result<RunningInstance, BootstrapError> {
        let image = self.state.image()?;
        self.launcher.run(image, request).await
    }
}
