use crate::context::{BuildContext, ContextFile};
use crate::plan::DOCKERFILE_NAME;
use bootspec_models::{BootstrapError, BuildSpec};
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::Write;
use tracing::{debug, info, instrument};

const DOCKERIGNORE: &str = ".dockerignore";

/// A gzip'd tar of the build context, ready to upload to the daemon.
#[derive(Debug, Clone)]
pub struct ContextArchive {
    /// sha256 of the uncompressed tar stream.
    pub digest: String,
    pub files: Vec<String>,
    pub total_size: u64,
    pub data: Bytes,
}

pub struct ContextPacker {
    max_context_size: u64,
}

impl ContextPacker {
    pub fn new(max_context_size: u64) -> Self {
        Self { max_context_size }
    }

    /// Packs the manifest, the source paths and the generated Dockerfile.
    ///
    /// Entries are written in path order with zeroed ownership and
    /// timestamps, so an unchanged context always packs to the same digest.
    #[instrument(skip(self, context, spec, dockerfile), fields(root = %context.root().display()))]
    pub fn pack(
        &self,
        context: &BuildContext,
        spec: &BuildSpec,
        dockerfile: &str,
    ) -> Result<ContextArchive, BootstrapError> {
        let files: Vec<ContextFile> = context
            .collect_files(spec)?
            .into_iter()
            .filter(|f| {
                let generated = f.relative == DOCKERFILE_NAME || f.relative == DOCKERIGNORE;
                if generated {
                    debug!("Skipping {} in favour of the generated file", f.relative);
                }
                !generated
            })
            .collect();

        let mut builder = tar::Builder::new(Vec::new());
        let mut names = Vec::with_capacity(files.len() + 2);
        let mut total_size = 0u64;

        for file in &files {
            if let Some(target) = &file.link {
                append_link(&mut builder, &file.relative, target)?;
                names.push(file.relative.clone());
                continue;
            }
            let data = std::fs::read(&file.absolute)?;
            total_size += data.len() as u64;
            if total_size > self.max_context_size {
                return Err(BootstrapError::BuildFailed {
                    message: format!(
                        "build context exceeds {} bytes",
                        self.max_context_size
                    ),
                });
            }
            append(&mut builder, &file.relative, &data, file_mode(&file.absolute))?;
            names.push(file.relative.clone());
        }

        // Excluded paths are dropped by the daemon before COPY runs, so the
        // generated files never land in the image.
        let ignore = format!("{DOCKERFILE_NAME}\n{DOCKERIGNORE}\n");
        append(&mut builder, DOCKERFILE_NAME, dockerfile.as_bytes(), 0o644)?;
        append(&mut builder, DOCKERIGNORE, ignore.as_bytes(), 0o644)?;
        names.push(DOCKERFILE_NAME.to_string());
        names.push(DOCKERIGNORE.to_string());

        let tar_bytes = builder.into_inner()?;

        let mut hasher = Sha256::new();
        hasher.update(&tar_bytes);
        let digest = format!("{:x}", hasher.finalize());

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes)?;
        let data = Bytes::from(encoder.finish()?);

        info!(
            "Packed build context with {} files, {} bytes, SHA256: {}",
            names.len(),
            total_size,
            digest
        );

        Ok(ContextArchive {
            digest,
            files: names,
            total_size,
            data,
        })
    }
}

impl Default for ContextPacker {
    fn default() -> Self {
        Self::new(512 * 1024 * 1024)
    }
}

fn append(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &str,
    data: &[u8],
    mode: u32,
) -> Result<(), BootstrapError> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    builder.append_data(&mut header, path, data)?;
    Ok(())
}

fn append_link(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &str,
    target: &std::path::Path,
) -> Result<(), BootstrapError> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Symlink);
    header.set_size(0);
    header.set_mode(0o777);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    builder.append_link(&mut header, path, target)?;
    Ok(())
}

#[cfg(unix)]
fn file_mode(path: &std::path::Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) if meta.permissions().mode() & 0o111 != 0 => 0o755,
        _ => 0o644,
    }
}

#[cfg(not(unix))]
fn file_mode(_path: &std::path::Path) -> u32 {
    0o644
}
