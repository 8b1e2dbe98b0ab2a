use crate::error::BootstrapError;
use std::collections::BTreeMap;

/// Environment variables, ordered by name so rendered output is stable.
pub type EnvMap = BTreeMap<String, String>;

/// Right-biased merge of environment defaults with caller overrides.
///
/// Every key in `overrides` replaces the default value, keys only present in
/// `defaults` are kept as-is and override-only keys are added.
pub fn merge_env(defaults: &EnvMap, overrides: &EnvMap) -> EnvMap {
    let mut effective = defaults.clone();
    for (key, value) in overrides {
        effective.insert(key.clone(), value.clone());
    }
    effective
}

/// Parses a `KEY=VALUE` assignment. The value may itself contain `=`.
pub fn parse_env_assignment(raw: &str) -> Result<(String, String), BootstrapError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(BootstrapError::InvalidSpec {
            reason: format!("expected KEY=VALUE, got {raw:?}"),
        }),
    }
}

/// Docker's `KEY=VALUE` list form.
pub fn env_to_docker(env: &EnvMap) -> Vec<String> {
    env.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn override_wins_on_collision() {
        let defaults = env(&[("PORT", "7860"), ("FLASK_ENV", "production")]);
        let overrides = env(&[("PORT", "9090")]);

        let effective = merge_env(&defaults, &overrides);
        assert_eq!(effective, env(&[("PORT", "9090"), ("FLASK_ENV", "production")]));
        // defaults untouched
        assert_eq!(defaults["PORT"], "7860");
    }

    #[test]
    fn override_only_keys_are_added() {
        let defaults = env(&[("PORT", "7860")]);
        let overrides = env(&[("GROQ_API_KEY", "secret")]);

        let effective = merge_env(&defaults, &overrides);
        assert_eq!(effective.len(), 2);
        assert_eq!(effective["PORT"], "7860");
        assert_eq!(effective["GROQ_API_KEY"], "secret");
    }

    #[test]
    fn empty_overrides_yield_defaults() {
        let defaults = env(&[("PORT", "7860")]);
        assert_eq!(merge_env(&defaults, &EnvMap::new()), defaults);
    }

    #[test]
    fn parse_assignment() {
        assert_eq!(
            parse_env_assignment("DATABASE_URL=postgres://u:p@h/db?x=1").unwrap(),
            (
                "DATABASE_URL".to_string(),
                "postgres://u:p@h/db?x=1".to_string()
            )
        );
        assert_eq!(
            parse_env_assignment("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env_assignment("NOVALUE").is_err());
        assert!(parse_env_assignment("=value").is_err());
    }

    #[test]
    fn docker_form_is_sorted() {
        let e = env(&[("B", "2"), ("A", "1")]);
        assert_eq!(env_to_docker(&e), vec!["A=1", "B=2"]);
    }
}
