use bootspec_models::{BootstrapError, BuildSpec};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// A directory on disk that a build reads its files from.
#[derive(Debug, Clone)]
pub struct BuildContext {
    root: PathBuf,
}

/// A file from the context, addressed by its path relative to the root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContextFile {
    pub relative: String,
    pub absolute: PathBuf,
    /// Target of a symbolic link. Links are shipped as links and never
    /// followed, the same way `docker build` uploads a context.
    pub link: Option<PathBuf>,
}

impl BuildContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Checks that every path the build spec reads exists.
    ///
    /// The manifest is checked first, then the source paths in declaration
    /// order, then the entry target. The first missing path is reported.
    #[instrument(skip(self, spec), fields(root = %self.root.display()))]
    pub fn validate(&self, spec: &BuildSpec) -> Result<(), BootstrapError> {
        if !self.root.is_dir() {
            return Err(BootstrapError::MissingPath {
                path: self.root.display().to_string(),
            });
        }

        let manifest = spec.dependency_manifest();
        if !self.resolve(manifest).is_file() {
            return Err(BootstrapError::MissingPath {
                path: manifest.to_string(),
            });
        }

        for source in spec.source_paths() {
            if !self.resolve(source).exists() {
                return Err(BootstrapError::MissingPath {
                    path: source.to_string(),
                });
            }
        }

        // Absolute targets live outside the copied sources; only the run-time
        // check applies to them.
        if let Some(target) = spec.entry_target() {
            if !target.starts_with('/') {
                let target = normalize(target);
                let covered = spec
                    .source_paths()
                    .iter()
                    .any(|source| covers(&normalize(source), &target));
                if !covered || !self.resolve(&target).is_file() {
                    return Err(BootstrapError::MissingPath { path: target });
                }
            }
        }

        debug!("Build context validated");
        Ok(())
    }

    /// Lists the files a build sends: the manifest plus everything under the
    /// source paths, sorted and de-duplicated.
    pub fn collect_files(&self, spec: &BuildSpec) -> Result<Vec<ContextFile>, BootstrapError> {
        let mut files = Vec::new();
        self.walk(&normalize(spec.dependency_manifest()), &mut files)?;
        for source in spec.source_paths() {
            self.walk(&normalize(source), &mut files)?;
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn walk(&self, relative: &str, files: &mut Vec<ContextFile>) -> Result<(), BootstrapError> {
        let absolute = self.resolve(relative);
        let metadata =
            std::fs::symlink_metadata(&absolute).map_err(|_| BootstrapError::MissingPath {
                path: relative.to_string(),
            })?;
        let file_type = metadata.file_type();

        if file_type.is_symlink() {
            let target = std::fs::read_link(&absolute)?;
            debug!("Keeping {} as a link to {}", relative, target.display());
            files.push(ContextFile {
                relative: relative.to_string(),
                absolute,
                link: Some(target),
            });
            return Ok(());
        }

        if file_type.is_file() {
            files.push(ContextFile {
                relative: relative.to_string(),
                absolute,
                link: None,
            });
            return Ok(());
        }

        if !file_type.is_dir() {
            debug!("Skipping special file {}", relative);
            return Ok(());
        }

        let mut entries = std::fs::read_dir(&absolute)?
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = if relative.is_empty() {
                name
            } else {
                format!("{relative}/{name}")
            };
            self.walk(&child, files)?;
        }
        Ok(())
    }

    fn resolve(&self, relative: &str) -> PathBuf {
        let relative = normalize(relative);
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }
}

/// `./a//b/` -> `a/b`, `.` -> ``
pub(crate) fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn covers(source: &str, target: &str) -> bool {
    source.is_empty() || source == target || target.starts_with(&format!("{source}/"))
}
