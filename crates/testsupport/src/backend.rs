use anyhow::Context;
use async_trait::async_trait;
use bootspec_packaging::{BuildOutput, ImageBackend};
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One call to `build_image`, with the uploaded context unpacked.
#[derive(Debug, Clone)]
pub struct RecordedBuild {
    pub tag: String,
    pub dockerfile: String,
    /// Archive path to file contents.
    pub files: BTreeMap<String, Vec<u8>>,
}

impl RecordedBuild {
    pub fn dockerfile_text(&self) -> String {
        self.files
            .get(&self.dockerfile)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    }
}

/// In-memory `ImageBackend`.
///
/// Successful builds report a BuildKit-style history derived from the
/// uploaded Dockerfile, so layer verification sees what a real daemon would.
#[derive(Clone, Default)]
pub struct FakeImageBackend {
    pub builds: Arc<Mutex<Vec<RecordedBuild>>>,
    pub images: Arc<Mutex<HashMap<String, String>>>,
    pub histories: Arc<Mutex<HashMap<String, Vec<String>>>>,
    /// When set, every build returns this output instead of succeeding.
    pub scripted: Arc<Mutex<Option<BuildOutput>>>,
    /// When set, replaces the derived history of every build.
    pub history_override: Arc<Mutex<Option<Vec<String>>>>,
}

impl FakeImageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script_failure(&self, log: &[&str], error: &str) {
        *self.scripted.lock().await = Some(BuildOutput {
            image_id: None,
            log: log.iter().map(|s| s.to_string()).collect(),
            error: Some(error.to_string()),
        });
    }

    pub async fn override_history(&self, newest_first: Vec<String>) {
        *self.history_override.lock().await = Some(newest_first);
    }

    pub async fn build_count(&self) -> usize {
        self.builds.lock().await.len()
    }

    pub async fn last_build(&self) -> RecordedBuild {
        self.builds
            .lock()
            .await
            .last()
            .cloned()
            .expect("no build")
    }

    /// Forgets an image, as `docker rmi` would.
    pub async fn remove_image(&self, tag: &str) {
        self.images.lock().await.remove(tag);
    }
}

fn unpack(context: &Bytes) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = tar::Archive::new(GzDecoder::new(context.as_ref()));
    let mut files = BTreeMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        // Links are recorded by their target.
        let contents = match entry.link_name()? {
            Some(target) => target.to_string_lossy().into_owned().into_bytes(),
            None => {
                let mut contents = Vec::new();
                entry.read_to_end(&mut contents)?;
                contents
            }
        };
        files.insert(path, contents);
    }
    Ok(files)
}

/// Newest-first history for a Dockerfile, in the shape BuildKit reports it.
fn history_for(dockerfile: &str) -> Vec<String> {
    let mut layers = vec!["/bin/sh -c #(nop) ADD file:base in / ".to_string()];
    for line in dockerfile.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("FROM ") {
            continue;
        }
        match line.strip_prefix("RUN ") {
            Some(command) => layers.push(format!("RUN /bin/sh -c {command} # buildkit")),
            None if line.starts_with("COPY ") => layers.push(format!("{line} # buildkit")),
            None => layers.push(line.to_string()),
        }
    }
    layers.reverse();
    layers
}

#[async_trait]
impl ImageBackend for FakeImageBackend {
    async fn build_image(
        &self,
        tag: &str,
        dockerfile: &str,
        context: Bytes,
    ) -> anyhow::Result<BuildOutput> {
        let files = unpack(&context).context("context is not a gzipped tar")?;
        let build = RecordedBuild {
            tag: tag.to_string(),
            dockerfile: dockerfile.to_string(),
            files,
        };
        let text = build.dockerfile_text();
        self.builds.lock().await.push(build);

        if let Some(output) = self.scripted.lock().await.clone() {
            return Ok(output);
        }

        let count = self.builds.lock().await.len();
        let id = format!("sha256:{count:064x}");
        let history = match self.history_override.lock().await.clone() {
            Some(history) => history,
            None => history_for(&text),
        };

        self.images.lock().await.insert(tag.to_string(), id.clone());
        self.histories.lock().await.insert(tag.to_string(), history);

        Ok(BuildOutput {
            image_id: Some(id.clone()),
            log: vec![format!("Successfully built {id}")],
            error: None,
        })
    }

    async fn image_id(&self, tag: &str) -> anyhow::Result<Option<String>> {
        Ok(self.images.lock().await.get(tag).cloned())
    }

    async fn image_history(&self, tag: &str) -> anyhow::Result<Vec<String>> {
        self.histories
            .lock()
            .await
            .get(tag)
            .cloned()
            .with_context(|| format!("No such image: {tag}"))
    }
}
