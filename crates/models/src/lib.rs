pub mod config;
pub mod env;
pub mod error;
pub mod image;
pub mod ports;
pub mod spec;

pub use config::*;
pub use env::*;
pub use error::*;
pub use image::*;
pub use ports::*;
pub use spec::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [run]
            health_path = "/health"
            "#,
        )
        .unwrap();

        assert_eq!(config.run.health_path.as_deref(), Some("/health"));
        assert_eq!(config.run.host_ip, "0.0.0.0");
        assert_eq!(config.image.repository, "bootspec");
        assert_eq!(config.log.format, "text");
    }

    #[test]
    fn test_config_deny_unknown_fields() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [docker]
            socket = "/var/run/docker.sock"
            "#,
        );
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unknown field"));
    }

    #[test]
    fn test_error_shape_serde() {
        let error = BootstrapError::MissingPath {
            path: "requirements.txt".to_string(),
        };
        let shape = error.to_error_shape();
        assert_eq!(shape.error_type, "MissingPathError");

        let json = serde_json::to_string(&shape).unwrap();
        let deserialized: ErrorShape = serde_json::from_str(&json).unwrap();
        assert_eq!(shape.error_message, deserialized.error_message);
        assert!(deserialized.error_message.contains("requirements.txt"));
    }

    #[test]
    fn test_error_taxonomy() {
        let build = BootstrapError::DependencyResolution {
            message: "No matching distribution found for flask==99".to_string(),
        };
        let run = BootstrapError::PortBinding {
            port: 7860,
            reason: "address in use".to_string(),
        };
        assert!(build.is_build_error());
        assert!(!run.is_build_error());
        assert_eq!(build.error_type(), "DependencyResolutionError");
        assert_eq!(run.error_type(), "PortBindingError");
        assert_ne!(build.exit_code(), run.exit_code());
        assert_eq!(
            BootstrapError::EntryPointNotFound {
                path: "/app/app.py".into()
            }
            .error_type(),
            "EntryPointNotFoundError"
        );
    }
}
