pub mod docker;
pub mod launcher;
pub mod registry;

pub use docker::*;
pub use launcher::*;
pub use registry::*;

#[cfg(test)]
mod tests {
    use bootspec_models::{merge_env, BuildSpec, EnvMap};

    #[test]
    fn test_environment_variables() {
        let spec = BuildSpec::default().with_env_default("DEBUG", "0");
        let mut overrides = EnvMap::new();
        overrides.insert("DEBUG".to_string(), "1".to_string());
        overrides.insert("CUSTOM_VAR".to_string(), "custom_value".to_string());

        let env = bootspec_models::env_to_docker(&merge_env(spec.env_defaults(), &overrides));

        assert!(env.contains(&"PORT=7860".to_string()));
        assert!(env.contains(&"DEBUG=1".to_string()));
        assert!(env.contains(&"CUSTOM_VAR=custom_value".to_string()));
        assert!(!env.contains(&"DEBUG=0".to_string()));
    }
}
