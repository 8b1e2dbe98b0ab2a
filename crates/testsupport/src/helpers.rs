use anyhow::Result;
use std::path::Path;
use tempfile::TempDir;

pub const REQUIREMENTS: &str = "flask==3.0.0\n";

pub const APP_PY: &str = r#"import os
from flask import Flask

app = Flask(__name__)


@app.get("/")
def index():
    return "ok"


@app.get("/health")
def health():
    return {"status": "healthy"}


if __name__ == "__main__":
    app.run(host="0.0.0.0", port=int(os.environ.get("PORT", "7860")))
"#;

/// Writes `contents` at `relative` under `root`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, contents: &str) -> Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

/// A build context matching the default spec: `requirements.txt` and `app.py`.
pub fn python_context() -> Result<TempDir> {
    let dir = tempfile::tempdir()?;
    write_file(dir.path(), "requirements.txt", REQUIREMENTS)?;
    write_file(dir.path(), "app.py", APP_PY)?;
    Ok(dir)
}

/// Whether a Docker daemon answers at `DOCKER_HOST` or the default socket.
pub async fn docker_available() -> bool {
    match bootspec_invoker::connect(&bootspec_models::DockerConfig::default()) {
        Ok(docker) => docker.ping().await.is_ok(),
        Err(_) => false,
    }
}
