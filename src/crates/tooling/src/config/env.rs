//! Environment variable loading utilities

use crate::{Result, ToolingError};
use std::env;
use std::str::FromStr;

/// Load an environment variable as a string
///
/// Empty values are treated as absent.
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ToolingError::InvalidEnv {
            key: key.to_string(),
            reason: "contains invalid UTF-8".to_string(),
        }),
    }
}

/// Load and parse an environment variable
///
/// ```rust,ignore
/// let ttl: Option<u64> = get_env_parse("ORCH_INTENT_CACHE_TTL")?;
/// ```
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key)? {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ToolingError::InvalidEnv {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Load a boolean environment variable
///
/// Recognizes `true/1/yes/on` and `false/0/no/off`, case-insensitive.
pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    match get_env(key)? {
        Some(val) => match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ToolingError::InvalidEnv {
                key: key.to_string(),
                reason: format!("invalid boolean value '{}'", val),
            }),
        },
        None => Ok(None),
    }
}

/// Load a comma-separated list, dropping blank entries
pub fn get_env_list(key: &str) -> Result<Option<Vec<String>>> {
    Ok(get_env(key)?.map(|val| {
        val.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }))
}

/// Build a prefixed, upper-cased variable name (`"ORCH_"`, `"rag-gate"` -> `ORCH_RAG_GATE`)
pub fn prefixed_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.to_uppercase().replace('-', "_"))
}
