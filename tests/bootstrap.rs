use bootspec::Bootstrap;
use bootspec_invoker::RunRequest;
use bootspec_models::{BootstrapError, BuildSpec, EnvMap, PortBinding, RunConfig};
use bootspec_packaging::{BuildCache, ImageBuilder};
use bootspec_testsupport::{python_context, FakeDocker, FakeImageBackend};
use std::sync::Arc;

fn bootstrap(
    spec: BuildSpec,
    backend: &FakeImageBackend,
    docker: &FakeDocker,
) -> Bootstrap<FakeImageBackend, FakeDocker> {
    let builder = ImageBuilder::new(
        Arc::new(backend.clone()),
        BuildCache::in_memory(),
        "bootspec",
    );
    Bootstrap::new(spec, builder, Arc::new(docker.clone()), RunConfig::default())
        .with_port_probe(|_| Ok(()))
}

fn request(pairs: &[(&str, &str)], host_port: u16) -> RunRequest {
    RunRequest {
        env_overrides: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<EnvMap>(),
        port_bindings: vec![PortBinding::new(7860, host_port, "0.0.0.0")],
    }
}

#[tokio::test]
async fn run_before_build_is_not_built() {
    let backend = FakeImageBackend::new();
    let docker = FakeDocker::new();
    let app = bootstrap(BuildSpec::default(), &backend, &docker);

    let err = app.run(RunRequest::default()).await.unwrap_err();

    assert!(matches!(err, BootstrapError::NotBuilt));
    assert!(docker.created.lock().await.is_empty());
}

#[tokio::test]
async fn build_then_run_default_service() {
    let dir = python_context().unwrap();
    let backend = FakeImageBackend::new();
    let docker = FakeDocker::new();
    let mut app = bootstrap(BuildSpec::default(), &backend, &docker);

    let image = app.build(dir.path(), None).await.unwrap();
    assert!(app.state().is_built());

    let instance = app.run(RunRequest::default()).await.unwrap();

    assert_eq!(instance.image_tag, image.tag);
    assert_eq!(instance.env["PORT"], "7860");
    assert_eq!(
        instance.port_bindings,
        vec![PortBinding::new(7860, 7860, "0.0.0.0")]
    );

    let created = docker.last_created().await;
    assert!(created
        .labels
        .contains(&("bootspec.digest".to_string(), image.context_digest.clone())));
}

#[tokio::test]
async fn failed_build_leaves_state_unbuilt() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeImageBackend::new();
    let docker = FakeDocker::new();
    let mut app = bootstrap(BuildSpec::default(), &backend, &docker);

    let err = app.build(dir.path(), None).await.unwrap_err();

    assert!(matches!(err, BootstrapError::MissingPath { .. }));
    assert!(!app.state().is_built());
    assert!(matches!(
        app.run(RunRequest::default()).await,
        Err(BootstrapError::NotBuilt)
    ));
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_image() {
    let dir = python_context().unwrap();
    let backend = FakeImageBackend::new();
    let docker = FakeDocker::new();
    let mut app = bootstrap(BuildSpec::default(), &backend, &docker);

    let first = app.build(dir.path(), None).await.unwrap();
    std::fs::remove_file(dir.path().join("requirements.txt")).unwrap();
    app.build(dir.path(), None).await.unwrap_err();

    assert_eq!(app.state().image().unwrap(), &first);
}

#[tokio::test]
async fn concurrent_runs_are_independent() {
    let dir = python_context().unwrap();
    let backend = FakeImageBackend::new();
    let docker = FakeDocker::new();
    let mut app = bootstrap(BuildSpec::default(), &backend, &docker);
    app.build(dir.path(), None).await.unwrap();

    let (a, b) = tokio::join!(
        app.run(request(&[("PORT", "7860"), ("MODE", "a")], 8001)),
        app.run(request(&[("MODE", "b")], 8002)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.container_id, b.container_id);
    assert_eq!(a.env["MODE"], "a");
    assert_eq!(b.env["MODE"], "b");
    assert_eq!(app.launcher().registry().len().await, 2);
    assert_eq!(backend.build_count().await, 1);
}

#[tokio::test]
async fn missing_entry_in_image_is_reported() {
    let dir = python_context().unwrap();
    let backend = FakeImageBackend::new();
    let docker = FakeDocker::new().with_missing_path("/app/app.py").await;
    let mut app = bootstrap(BuildSpec::default(), &backend, &docker);
    app.build(dir.path(), None).await.unwrap();

    let err = app.run(RunRequest::default()).await.unwrap_err();

    assert!(matches!(err, BootstrapError::EntryPointNotFound { .. }));
    assert_eq!(err.exit_code(), 7);
    assert_eq!(app.launcher().registry().len().await, 0);
}

#[tokio::test]
async fn existing_image_is_adopted_by_tag() {
    let dir = python_context().unwrap();
    let backend = FakeImageBackend::new();
    let docker = FakeDocker::new();

    let built = {
        let mut app = bootstrap(BuildSpec::default(), &backend, &docker);
        app.build(dir.path(), None).await.unwrap()
    };

    let mut app = bootstrap(BuildSpec::default(), &backend, &docker);
    let adopted = app.use_existing(&built.tag).await.unwrap();
    assert_eq!(adopted.id, built.id);

    app.run(RunRequest::default()).await.unwrap();
    assert_eq!(docker.last_created().await.image, built.tag);
}

#[tokio::test]
async fn unknown_tag_is_not_built() {
    let backend = FakeImageBackend::new();
    let docker = FakeDocker::new();
    let mut app = bootstrap(BuildSpec::default(), &backend, &docker);

    let err = app.use_existing("bootspec/app:missing").await.unwrap_err();
    assert!(matches!(err, BootstrapError::NotBuilt));
}

#[tokio::test]
async fn demo_service_builds() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/flask-app");
    let spec = bootspec::load_spec(&root.join("bootspec.toml")).unwrap();
    assert_eq!(spec.name(), "flask-app");

    let backend = FakeImageBackend::new();
    let docker = FakeDocker::new();
    let mut app = bootstrap(spec, &backend, &docker);

    let image = app.build(&root, None).await.unwrap();
    assert!(image.tag.starts_with("bootspec/flask-app:"));

    let build = backend.last_build().await;
    assert!(build.files.contains_key("app.py"));
    assert!(build.files.contains_key("bootspec.toml"));
}
