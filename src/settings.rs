use bootspec_models::{BootstrapError, BuildSpec, Config};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use std::path::Path;
use tracing::warn;

pub const ENV_PREFIX: &str = "BOOTSPEC_";

const CONFIG_PATHS: [&str; 2] = ["configs/default.toml", "config/config.toml"];

/// Layers defaults, a TOML file and `BOOTSPEC_*` variables, in that order.
///
/// Without an explicit path the first of the well-known locations that
/// exists is used. Nested keys use `__`, e.g. `BOOTSPEC_RUN__HOST_IP`.
pub fn load_config(path: Option<&Path>) -> Result<Config, BootstrapError> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    match path {
        Some(path) => {
            if !path.is_file() {
                return Err(BootstrapError::Config {
                    reason: format!("config file {} not found", path.display()),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(found) = CONFIG_PATHS.iter().map(Path::new).find(|p| p.is_file()) {
                figment = figment.merge(Toml::file(found));
            }
        }
    }

    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| BootstrapError::Config {
            reason: e.to_string(),
        })
}

/// Loads the build descriptor, or the default one when `path` does not exist.
pub fn load_spec(path: &Path) -> Result<BuildSpec, BootstrapError> {
    if path.exists() {
        return BuildSpec::load(path);
    }
    warn!(
        "{} not found, using the default build spec",
        path.display()
    );
    Ok(BuildSpec::default())
}
