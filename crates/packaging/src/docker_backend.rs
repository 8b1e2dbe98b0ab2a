use crate::image_builder::{BuildOutput, ImageBackend};
use async_trait::async_trait;
use bollard::errors::Error as DockerError;
use bollard::image::BuildImageOptions;
use bollard::Docker;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, instrument, warn};

/// Builds images through the daemon's build endpoint.
pub struct DockerImageBackend {
    docker: Docker,
}

impl DockerImageBackend {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ImageBackend for DockerImageBackend {
    #[instrument(skip(self, context), fields(context_bytes = context.len()))]
    async fn build_image(
        &self,
        tag: &str,
        dockerfile: &str,
        context: Bytes,
    ) -> anyhow::Result<BuildOutput> {
        let options = BuildImageOptions {
            dockerfile: dockerfile.to_string(),
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context.into()));
        let mut output = BuildOutput::default();

        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(text) = info.stream {
                        for line in text.lines().filter(|l| !l.trim().is_empty()) {
                            debug!("{}", line);
                            output.log.push(line.to_string());
                        }
                    }
                    if let Some(status) = info.status {
                        debug!("{}", status);
                    }
                    if let Some(aux) = info.aux {
                        if let Some(id) = aux.id {
                            output.image_id = Some(id);
                        }
                    }
                    if let Some(error) = info.error {
                        warn!("Build reported error: {}", error);
                        output.error = Some(error);
                    }
                }
                Err(DockerError::DockerStreamError { error }) => {
                    warn!("Build reported error: {}", error);
                    output.error = Some(error);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(output)
    }

    async fn image_id(&self, tag: &str) -> anyhow::Result<Option<String>> {
        match self.docker.inspect_image(tag).await {
            Ok(image) => Ok(image.id),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn image_history(&self, tag: &str) -> anyhow::Result<Vec<String>> {
        let history = self.docker.image_history(tag).await?;
        Ok(history.into_iter().map(|layer| layer.created_by).collect())
    }
}
