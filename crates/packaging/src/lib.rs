pub mod archive;
pub mod cache;
pub mod context;
pub mod docker_backend;
pub mod image_builder;
pub mod plan;

pub use archive::*;
pub use cache::*;
pub use context::*;
pub use docker_backend::*;
pub use image_builder::*;
pub use plan::*;

#[cfg(test)]
mod tests {
    use super::*;
    use bootspec_models::BuildSpec;
    use tempfile::tempdir;

    fn context() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "flask\nrequests\n").unwrap();
        std::fs::write(dir.path().join("app.py"), "print('hi')\n").unwrap();
        dir
    }

    #[test]
    fn test_context_digest_stable() {
        let dir = context();
        let spec = BuildSpec::default();
        let dockerfile = BuildPlan::from_spec(&spec).render();
        let packer = ContextPacker::default();

        let first = packer
            .pack(&BuildContext::new(dir.path()), &spec, &dockerfile)
            .unwrap();
        let second = packer
            .pack(&BuildContext::new(dir.path()), &spec, &dockerfile)
            .unwrap();

        assert_eq!(first.digest, second.digest);
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn test_context_digest_tracks_source_edits() {
        let dir = context();
        let spec = BuildSpec::default();
        let dockerfile = BuildPlan::from_spec(&spec).render();
        let packer = ContextPacker::default();

        let before = packer
            .pack(&BuildContext::new(dir.path()), &spec, &dockerfile)
            .unwrap();
        std::fs::write(dir.path().join("app.py"), "print('changed')\n").unwrap();
        let after = packer
            .pack(&BuildContext::new(dir.path()), &spec, &dockerfile)
            .unwrap();

        assert_ne!(before.digest, after.digest);
    }
}
