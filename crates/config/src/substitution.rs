use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::env;
use tracing::{debug, warn};

const PLACEHOLDER_PATTERN: &str = r"\$\{(\w+)\}|\$(\w+)";

fn placeholder_regex() -> Result<Regex> {
    Regex::new(PLACEHOLDER_PATTERN).context("Invalid placeholder pattern")
}

/// Substitute environment variables in the format ${VAR_NAME} or $VAR_NAME
///
/// Unset variables keep their placeholder so validation can report them.
pub fn substitute_env_vars(content: &str) -> Result<String> {
    substitute_with(content, |name| env::var(name).ok())
}

/// Substitute placeholders using an arbitrary lookup
pub fn substitute_with<F>(content: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let re = placeholder_regex()?;
    let mut missing_vars = Vec::new();

    let result = re.replace_all(content, |caps: &Captures<'_>| {
        let placeholder = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let Some(var_name) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) else {
            return placeholder.to_string();
        };

        match lookup(var_name) {
            Some(value) => {
                debug!(var = var_name, "Substituting environment variable");
                value
            }
            None => {
                warn!("Environment variable '{}' not set", var_name);
                missing_vars.push(var_name.to_string());
                placeholder.to_string()
            }
        }
    });

    if !missing_vars.is_empty() {
        debug!(
            "Environment variables not set (may use defaults or fail validation): {:?}",
            missing_vars
        );
    }

    Ok(result.into_owned())
}

/// Get environment variable with a default value
pub fn get_env_or_default(var_name: &str, default: &str) -> String {
    match env::var(var_name) {
        Ok(value) => value,
        Err(_) => {
            warn!(
                "Environment variable '{}' not set, using default: \"{}\"",
                var_name, default
            );
            default.to_string()
        }
    }
}

/// Check if a string contains unresolved environment variable placeholders
pub fn has_unresolved_env_vars(content: &str) -> bool {
    placeholder_regex()
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "JWT_SECRET" => Some("s3cret".to_string()),
            "REDIS_HOST" => Some("cache.local".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_substitutes_both_forms() {
        let out = substitute_with("secret: ${JWT_SECRET}\nhost: $REDIS_HOST", lookup).unwrap();
        assert_eq!(out, "secret: s3cret\nhost: cache.local");
    }

    #[test]
    fn test_missing_vars_keep_placeholder() {
        let out = substitute_with("secret: ${NOT_SET_ANYWHERE}", lookup).unwrap();
        assert_eq!(out, "secret: ${NOT_SET_ANYWHERE}");
        assert!(has_unresolved_env_vars(&out));
    }

    #[test]
    fn test_no_placeholders() {
        assert!(!has_unresolved_env_vars("plain: value"));
        assert_eq!(substitute_with("plain", lookup).unwrap(), "plain");
    }
}
