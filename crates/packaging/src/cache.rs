use bootspec_models::{BootstrapError, Image};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{info, instrument};

const CACHE_FILE: &str = "build_cache.json";

/// Remembers which image was built for a given tag and context digest.
pub struct BuildCache {
    cache_dir: Option<PathBuf>,
    images: HashMap<String, Image>, // tag -> image
}

impl BuildCache {
    pub fn new(cache_dir: PathBuf) -> Result<Self, BootstrapError> {
        fs::create_dir_all(&cache_dir)?;

        let mut cache = Self {
            cache_dir: Some(cache_dir),
            images: HashMap::new(),
        };
        cache.load_cache()?;
        Ok(cache)
    }

    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            cache_dir: None,
            images: HashMap::new(),
        }
    }

    pub fn get(&self, tag: &str, context_digest: &str) -> Option<&Image> {
        self.images
            .get(tag)
            .filter(|image| image.context_digest == context_digest)
    }

    #[instrument(skip(self, image), fields(tag = %image.tag))]
    pub fn insert(&mut self, image: Image) {
        info!("Cached image {} for context {}", image.id, image.context_digest);
        self.images.insert(image.tag.clone(), image);
    }

    pub fn invalidate(&mut self, tag: &str) -> Option<Image> {
        self.images.remove(tag)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    fn load_cache(&mut self) -> Result<(), BootstrapError> {
        let Some(dir) = &self.cache_dir else {
            return Ok(());
        };
        let cache_file = dir.join(CACHE_FILE);
        if cache_file.exists() {
            let cache_data = fs::read_to_string(&cache_file)?;
            self.images =
                serde_json::from_str(&cache_data).map_err(|e| BootstrapError::Config {
                    reason: format!("corrupt build cache {}: {e}", cache_file.display()),
                })?;
        }
        Ok(())
    }

    pub fn save_cache(&self) -> Result<(), BootstrapError> {
        let Some(dir) = &self.cache_dir else {
            return Ok(());
        };
        let cache_data =
            serde_json::to_string_pretty(&self.images).map_err(|e| BootstrapError::Config {
                reason: e.to_string(),
            })?;
        fs::write(dir.join(CACHE_FILE), cache_data)?;
        Ok(())
    }
}
