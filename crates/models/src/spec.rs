use crate::env::EnvMap;
use crate::error::BootstrapError;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

pub const DEFAULT_PORT: u16 = 7860;
pub const PORT_ENV: &str = "PORT";

/// Declarative description of how a source tree becomes a running process.
///
/// A `BuildSpec` is authored once and never mutated by the build or by the
/// processes started from its image. Field names follow the descriptor file
/// (`bootspec.toml`), which uses camelCase keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BuildSpec {
    #[serde(default = "default_name")]
    name: String,
    base_image: String,
    work_dir: String,
    #[serde(rename = "dependencyManifestPath")]
    dependency_manifest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    install_command: Option<Vec<String>>,
    source_paths: Vec<String>,
    #[serde(default)]
    env_defaults: EnvMap,
    #[serde(default)]
    exposed_ports: Vec<u16>,
    entry_command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entry_file: Option<String>,
}

fn default_name() -> String {
    "app".to_string()
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self {
            name: default_name(),
            base_image: "python:3.11-slim".to_string(),
            work_dir: "/app".to_string(),
            dependency_manifest: "requirements.txt".to_string(),
            install_command: None,
            source_paths: vec![".".to_string()],
            env_defaults: EnvMap::from([(PORT_ENV.to_string(), DEFAULT_PORT.to_string())]),
            exposed_ports: vec![DEFAULT_PORT],
            entry_command: vec!["python".to_string(), "app.py".to_string()],
            entry_file: None,
        }
    }
}

impl BuildSpec {
    pub fn from_toml(contents: &str) -> Result<Self, BootstrapError> {
        let spec: BuildSpec = toml::from_str(contents).map_err(|e| BootstrapError::InvalidSpec {
            reason: e.to_string(),
        })?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn load(path: &Path) -> Result<Self, BootstrapError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn to_toml(&self) -> Result<String, BootstrapError> {
        toml::to_string_pretty(self).map_err(|e| BootstrapError::InvalidSpec {
            reason: e.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_image(&self) -> &str {
        &self.base_image
    }

    pub fn work_dir(&self) -> &str {
        &self.work_dir
    }

    pub fn dependency_manifest(&self) -> &str {
        &self.dependency_manifest
    }

    pub fn source_paths(&self) -> &[String] {
        &self.source_paths
    }

    pub fn env_defaults(&self) -> &EnvMap {
        &self.env_defaults
    }

    pub fn exposed_ports(&self) -> &[u16] {
        &self.exposed_ports
    }

    pub fn entry_command(&self) -> &[String] {
        &self.entry_command
    }

    /// The command run after the manifest is copied in. Defaults to a pip
    /// install of the manifest.
    pub fn install_command(&self) -> Vec<String> {
        match &self.install_command {
            Some(cmd) => cmd.clone(),
            None => vec![
                "pip".to_string(),
                "install".to_string(),
                "--no-cache-dir".to_string(),
                "-r".to_string(),
                self.dependency_manifest.clone(),
            ],
        }
    }

    /// The file the entry command launches.
    ///
    /// `entryFile` wins when set. A one-element command names the target
    /// directly, as does a program given by path. For a Python interpreter the
    /// target is the first script argument, skipping interpreter options and
    /// their values; module (`-m`) and inline (`-c`) invocations have none.
    /// Other programs (`gunicorn app:app`) have no file target.
    pub fn entry_target(&self) -> Option<&str> {
        if let Some(file) = &self.entry_file {
            return Some(file.as_str());
        }
        match self.entry_command.as_slice() {
            [] => None,
            [only] => Some(only.as_str()),
            [program, args @ ..] if is_python(program) => python_script(args),
            [program, _, ..] if program.contains('/') => Some(program.as_str()),
            _ => None,
        }
    }

    /// Absolute path of the entry target inside the image.
    pub fn entry_target_in_image(&self) -> Option<String> {
        let target = self.entry_target()?;
        if target.starts_with('/') {
            return Some(target.to_string());
        }
        let relative = target.trim_start_matches("./");
        Some(format!("{}/{}", self.work_dir.trim_end_matches('/'), relative))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_source_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_defaults.insert(key.into(), value.into());
        self
    }

    pub fn with_exposed_ports(mut self, ports: Vec<u16>) -> Self {
        self.exposed_ports = ports;
        self
    }

    pub fn with_entry_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_entry_file(mut self, file: impl Into<String>) -> Self {
        self.entry_file = Some(file.into());
        self
    }

    pub fn validate(&self) -> Result<(), BootstrapError> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return invalid(format!(
                "name must be lowercase alphanumeric, '-' or '_': {:?}",
                self.name
            ));
        }

        if self.base_image.trim().is_empty() {
            return invalid("baseImage cannot be empty");
        }

        if !self.work_dir.starts_with('/') {
            return invalid(format!("workDir must be absolute: {}", self.work_dir));
        }

        check_context_path("dependencyManifestPath", &self.dependency_manifest)?;

        if self.source_paths.is_empty() {
            return invalid("sourcePaths cannot be empty");
        }
        for path in &self.source_paths {
            check_context_path("sourcePaths", path)?;
        }

        if let Some(cmd) = &self.install_command {
            if cmd.is_empty() {
                return invalid("installCommand cannot be empty");
            }
        }

        if self.entry_command.is_empty() || self.entry_command[0].is_empty() {
            return invalid("entryCommand cannot be empty");
        }

        if let Some(file) = &self.entry_file {
            if file.is_empty() {
                return invalid("entryFile cannot be empty");
            }
        }

        for (key, value) in &self.env_defaults {
            if !is_env_name(key) {
                return invalid(format!("invalid environment variable name: {key:?}"));
            }
            if value.contains(['\n', '\r']) {
                return invalid(format!("envDefaults.{key} cannot contain a line break"));
            }
        }

        if self.exposed_ports.contains(&0) {
            return invalid("exposedPorts cannot contain port 0");
        }

        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> Result<(), BootstrapError> {
    Err(BootstrapError::InvalidSpec {
        reason: reason.into(),
    })
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `python`, `python3`, `/usr/bin/python3.11`
fn is_python(program: &str) -> bool {
    let name = program.rsplit('/').next().unwrap_or(program);
    name.strip_prefix("python")
        .is_some_and(|version| version.chars().all(|c| c.is_ascii_digit() || c == '.'))
}

/// Interpreter options that consume the next argument.
const PYTHON_VALUE_FLAGS: &[&str] = &["-W", "-X", "--check-hash-based-pycs"];

fn python_script(args: &[String]) -> Option<&str> {
    let mut args = args.iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-m" | "-c" | "-" => return None,
            flag if PYTHON_VALUE_FLAGS.contains(&flag) => {
                args.next();
            }
            flag if flag.starts_with('-') => {
                // `-Wignore`, `-OO`, `-u` carry their value inline or have none.
                if flag.starts_with("-m") || flag.starts_with("-c") {
                    return None;
                }
            }
            script => return Some(script),
        }
    }
    None
}

/// Context paths are relative and may not climb out of the build context.
fn check_context_path(field: &str, path: &str) -> Result<(), BootstrapError> {
    if path.is_empty() {
        return invalid(format!("{field} entries cannot be empty"));
    }
    let p = Path::new(path);
    if p.is_absolute() {
        return invalid(format!("{field} must be relative to the build context: {path}"));
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return invalid(format!("{field} escapes the build context: {path}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_is_valid() {
        let spec = BuildSpec::default();
        spec.validate().unwrap();
        assert_eq!(spec.base_image(), "python:3.11-slim");
        assert_eq!(spec.work_dir(), "/app");
        assert_eq!(spec.exposed_ports(), &[7860]);
        assert_eq!(spec.env_defaults().get("PORT").map(String::as_str), Some("7860"));
        assert_eq!(
            spec.install_command(),
            vec!["pip", "install", "--no-cache-dir", "-r", "requirements.txt"]
        );
    }

    #[test]
    fn parses_descriptor() {
        let spec = BuildSpec::from_toml(
            r#"
            name = "leads"
            baseImage = "python:3.12-slim"
            workDir = "/srv"
            dependencyManifestPath = "requirements.txt"
            sourcePaths = ["app.py", "templates"]
            exposedPorts = [7860]
            entryCommand = ["python", "-u", "app.py"]

            [envDefaults]
            PORT = "7860"
            FLASK_ENV = "production"
            "#,
        )
        .unwrap();

        assert_eq!(spec.name(), "leads");
        assert_eq!(spec.source_paths(), &["app.py", "templates"]);
        assert_eq!(spec.entry_target(), Some("app.py"));
        assert_eq!(spec.entry_target_in_image().as_deref(), Some("/srv/app.py"));
        assert_eq!(spec.env_defaults().len(), 2);
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = BuildSpec::from_toml(
            r#"
            baseImage = "python:3.11-slim"
            workDir = "/app"
            dependencyManifestPath = "requirements.txt"
            sourcePaths = ["."]
            entryCommand = ["python", "app.py"]
            volumes = ["/data"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, BootstrapError::InvalidSpec { .. }));
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn entry_target_variants() {
        let mut spec = BuildSpec::default();
        spec.entry_command = vec!["./server".to_string()];
        assert_eq!(spec.entry_target_in_image().as_deref(), Some("/app/server"));

        spec.entry_command = vec!["/usr/local/bin/run".to_string()];
        assert_eq!(
            spec.entry_target_in_image().as_deref(),
            Some("/usr/local/bin/run")
        );

        spec.entry_command = vec!["python".to_string(), "-O".to_string()];
        assert_eq!(spec.entry_target(), None);

        spec = spec.with_entry_command(["python", "-m", "flask", "run"]);
        assert_eq!(spec.entry_target(), None);
        assert_eq!(spec.entry_target_in_image(), None);
    }

    #[test]
    fn interpreter_option_values_are_not_scripts() {
        let spec = BuildSpec::default().with_entry_command(["python", "-W", "ignore", "app.py"]);
        assert_eq!(spec.entry_target(), Some("app.py"));

        let spec = BuildSpec::default()
            .with_entry_command(["python3.11", "-X", "dev", "-u", "-Wignore", "server.py", "--debug"]);
        assert_eq!(spec.entry_target(), Some("server.py"));

        let spec = BuildSpec::default().with_entry_command(["python", "-mflask", "run"]);
        assert_eq!(spec.entry_target(), None);

        let spec = BuildSpec::default().with_entry_command(["/usr/local/bin/python3", "app.py"]);
        assert_eq!(spec.entry_target(), Some("app.py"));
    }

    #[test]
    fn non_interpreter_commands_have_no_implicit_file() {
        let spec =
            BuildSpec::default().with_entry_command(["gunicorn", "-b", "0.0.0.0:7860", "app:app"]);
        assert_eq!(spec.entry_target(), None);

        let spec = BuildSpec::default().with_entry_command(["./serve.sh", "--port", "7860"]);
        assert_eq!(spec.entry_target(), Some("./serve.sh"));
        assert_eq!(spec.entry_target_in_image().as_deref(), Some("/app/serve.sh"));
    }

    #[test]
    fn explicit_entry_file_wins() {
        let spec = BuildSpec::from_toml(
            r#"
            baseImage = "python:3.11-slim"
            workDir = "/app"
            dependencyManifestPath = "requirements.txt"
            sourcePaths = ["."]
            entryCommand = ["gunicorn", "-b", "0.0.0.0:7860", "wsgi:app"]
            entryFile = "wsgi.py"
            "#,
        )
        .unwrap();
        assert_eq!(spec.entry_target(), Some("wsgi.py"));
        assert_eq!(spec.entry_target_in_image().as_deref(), Some("/app/wsgi.py"));
    }

    #[test]
    fn validation_failures() {
        let mut spec = BuildSpec::default();
        spec.work_dir = "app".to_string();
        assert!(spec.validate().is_err());

        let mut spec = BuildSpec::default();
        spec.dependency_manifest = "../requirements.txt".to_string();
        assert!(spec.validate().is_err());

        let mut spec = BuildSpec::default();
        spec.source_paths.clear();
        assert!(spec.validate().is_err());

        let mut spec = BuildSpec::default();
        spec.entry_command.clear();
        assert!(spec.validate().is_err());

        let mut spec = BuildSpec::default();
        spec.env_defaults.insert("A=B".to_string(), "x".to_string());
        assert!(spec.validate().is_err());

        let mut spec = BuildSpec::default();
        spec.exposed_ports.push(0);
        assert!(spec.validate().is_err());

        for key in ["MY KEY", "1ST", "", "A-B"] {
            let spec = BuildSpec::default().with_env_default(key, "x");
            assert!(spec.validate().is_err(), "{key:?} accepted");
        }
        BuildSpec::default()
            .with_env_default("_PRIVATE_1", "x")
            .validate()
            .unwrap();

        let spec = BuildSpec::default().with_env_default("MOTD", "line1\nline2");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn toml_roundtrip_preserves_spec() {
        let spec = BuildSpec::default();
        let text = spec.to_toml().unwrap();
        assert!(text.contains("dependencyManifestPath"));
        assert_eq!(BuildSpec::from_toml(&text).unwrap(), spec);
    }
}
