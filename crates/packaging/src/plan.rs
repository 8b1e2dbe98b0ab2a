use crate::context::normalize;
use bootspec_models::{BootstrapError, BuildSpec};
use std::fmt::Write as _;

/// Name of the generated Dockerfile inside the context archive.
pub const DOCKERFILE_NAME: &str = "Dockerfile.bootspec";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    From(String),
    Workdir(String),
    /// Copy of the dependency manifest, the only file the install step sees.
    CopyManifest { src: String, dest: String },
    Install(Vec<String>),
    CopySource { src: String, dest: String },
    Env(String, String),
    Expose(u16),
    Cmd(Vec<String>),
}

/// The ordered build steps derived from a [`BuildSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    instructions: Vec<Instruction>,
}

impl BuildPlan {
    /// Dependencies are installed from the manifest alone, before any source
    /// is copied, so source edits reuse the cached dependency layer.
    pub fn from_spec(spec: &BuildSpec) -> Self {
        let manifest = normalize(spec.dependency_manifest());
        let mut instructions = vec![
            Instruction::From(spec.base_image().to_string()),
            Instruction::Workdir(spec.work_dir().to_string()),
            Instruction::CopyManifest {
                src: manifest.clone(),
                dest: manifest,
            },
            Instruction::Install(spec.install_command()),
        ];

        for source in spec.source_paths() {
            let src = normalize(source);
            let (src, dest) = if src.is_empty() {
                (".".to_string(), ".".to_string())
            } else {
                (src.clone(), format!("./{src}"))
            };
            instructions.push(Instruction::CopySource { src, dest });
        }

        for (key, value) in spec.env_defaults() {
            instructions.push(Instruction::Env(key.clone(), value.clone()));
        }
        for port in spec.exposed_ports() {
            instructions.push(Instruction::Expose(*port));
        }
        instructions.push(Instruction::Cmd(spec.entry_command().to_vec()));

        Self { instructions }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The install step as it appears in the Dockerfile and in daemon error
    /// messages (`/bin/sh -c <this>`).
    pub fn install_line(&self) -> Option<String> {
        self.instructions.iter().find_map(|i| match i {
            Instruction::Install(argv) => Some(shell_join(argv)),
            _ => None,
        })
    }

    /// Fails unless the manifest copy and install both come before every
    /// source copy.
    pub fn verify_order(&self) -> Result<(), BootstrapError> {
        let position = |pred: fn(&Instruction) -> bool| self.instructions.iter().position(pred);

        let manifest = position(|i| matches!(i, Instruction::CopyManifest { .. }));
        let install = position(|i| matches!(i, Instruction::Install(_)));
        let first_source = position(|i| matches!(i, Instruction::CopySource { .. }));

        match (manifest, install, first_source) {
            (Some(m), Some(i), Some(s)) if m < i && i < s => Ok(()),
            (Some(_), Some(_), Some(_)) => Err(BootstrapError::LayerOrder {
                reason: "sources are copied before dependencies are installed".to_string(),
            }),
            _ => Err(BootstrapError::LayerOrder {
                reason: "plan is missing a manifest copy, install or source copy step".to_string(),
            }),
        }
    }

    /// Dockerfile text. Steps of the same kind are grouped into blocks
    /// separated by a blank line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut previous_block = None;
        for instruction in &self.instructions {
            let block = instruction.block();
            if previous_block.is_some_and(|b| b != block) {
                out.push('\n');
            }
            previous_block = Some(block);

            // fmt::Write into a String cannot fail
            let _ = match instruction {
                Instruction::From(image) => writeln!(out, "FROM {image}"),
                Instruction::Workdir(dir) => writeln!(out, "WORKDIR {dir}"),
                Instruction::CopyManifest { src, dest } | Instruction::CopySource { src, dest } => {
                    writeln!(out, "COPY {src} {dest}")
                }
                Instruction::Install(argv) => writeln!(out, "RUN {}", shell_join(argv)),
                Instruction::Env(key, value) => writeln!(out, "ENV {key}={}", quote_env(value)),
                Instruction::Expose(port) => writeln!(out, "EXPOSE {port}"),
                Instruction::Cmd(argv) => writeln!(out, "CMD {}", json_array(argv)),
            };
        }
        out
    }
}

impl Instruction {
    fn block(&self) -> u8 {
        match self {
            Instruction::From(_) | Instruction::Workdir(_) => 0,
            Instruction::CopyManifest { .. } | Instruction::Install(_) => 1,
            Instruction::CopySource { .. } => 2,
            Instruction::Env(..) | Instruction::Expose(_) => 3,
            Instruction::Cmd(_) => 4,
        }
    }
}

fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Double-quoted when needed. `$` is escaped so the daemon stores the value
/// verbatim instead of expanding it.
fn quote_env(value: &str) -> String {
    let plain = |c: char| !(c.is_whitespace() || matches!(c, '"' | '\\' | '$'));
    if !value.is_empty() && value.chars().all(plain) {
        value.to_string()
    } else {
        format!(
            "\"{}\"",
            value
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('$', "\\$")
        )
    }
}

fn json_array(argv: &[String]) -> String {
    serde_json::to_string(argv).unwrap_or_else(|_| "[]".to_string())
}
