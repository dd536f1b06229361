use std::str::FromStr;

use crate::error::ConfigError;

/// Read an env var, treating empty values as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Parse an optional env var, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| s.parse::<T>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
        .map(|v| v.unwrap_or(default))
}

/// Validate an endpoint URL: must parse and use `http` or `https`.
///
/// Returns the URL without a trailing slash so paths can be appended.
pub(crate) fn validate_endpoint(key: &str, value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    let parsed = url::Url::parse(trimmed).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{trimmed}' is not a valid URL: {e}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(trimmed.trim_end_matches('/').to_string()),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected an http or https URL, got scheme '{other}'"),
        }),
    }
}
