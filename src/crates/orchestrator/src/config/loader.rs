//! YAML settings loader
//!
//! - `$include: other.yaml` pulls in another file relative to the including
//!   one; sibling keys are merged over the included content
//! - `${VAR}` and `${VAR:default}` expand from the environment

use crate::{OrchestratorError, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

const INCLUDE_KEY: &str = "$include";
const MAX_INCLUDE_DEPTH: usize = 8;

static ENV_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").unwrap());

/// Read a YAML file with includes resolved and variables expanded
pub fn load_yaml_file(path: impl AsRef<Path>) -> Result<Value> {
    load_at_depth(path.as_ref(), 0)
}

/// Read and deserialize a YAML file
pub fn load_yaml_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let value = load_yaml_file(path)?;
    serde_yaml::from_value(value)
        .map_err(|e| OrchestratorError::Config(format!("{}: {}", path.display(), e)))
}

/// Deserialize a YAML document held in memory; variables are expanded but
/// includes are not allowed
pub fn parse_yaml_str<T: DeserializeOwned>(content: &str) -> Result<T> {
    let mut value: Value =
        serde_yaml::from_str(content).map_err(|e| OrchestratorError::Config(e.to_string()))?;
    expand_variables(&mut value);
    serde_yaml::from_value(value).map_err(|e| OrchestratorError::Config(e.to_string()))
}

fn load_at_depth(path: &Path, depth: usize) -> Result<Value> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(OrchestratorError::Config(format!(
            "include depth exceeded at {}",
            path.display()
        )));
    }
    let content = fs::read_to_string(path)
        .map_err(|e| OrchestratorError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let mut value: Value = serde_yaml::from_str(&content)
        .map_err(|e| OrchestratorError::Config(format!("cannot parse {}: {}", path.display(), e)))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    resolve_includes(&mut value, base_dir, depth)?;
    expand_variables(&mut value);
    Ok(value)
}

fn resolve_includes(value: &mut Value, base_dir: &Path, depth: usize) -> Result<()> {
    match value {
        Value::Mapping(map) => {
            if let Some(target) = map.remove(INCLUDE_KEY) {
                let Value::String(target) = target else {
                    return Err(OrchestratorError::Config(format!("{} expects a file path", INCLUDE_KEY)));
                };
                let mut included = load_at_depth(&base_dir.join(target), depth + 1)?;
                for (_, v) in map.iter_mut() {
                    resolve_includes(v, base_dir, depth)?;
                }
                deep_merge(&mut included, &Value::Mapping(map.clone()));
                *value = included;
                return Ok(());
            }
            for (_, v) in map.iter_mut() {
                resolve_includes(v, base_dir, depth)?;
            }
        }
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                resolve_includes(item, base_dir, depth)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn expand_variables(value: &mut Value) {
    match value {
        Value::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *value = retype(expanded);
            }
        }
        Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_variables(v);
            }
        }
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                expand_variables(item);
            }
        }
        _ => {}
    }
}

/// `${VAR:default}` substitution; `None` when the string has no references
fn expand_env_in_string(s: &str) -> Option<String> {
    if !ENV_REF.is_match(s) {
        return None;
    }
    let expanded = ENV_REF.replace_all(s, |caps: &regex::Captures<'_>| {
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
    });
    Some(expanded.into_owned())
}

/// Expanded text is re-read as a YAML scalar so `${PORT:8080}` stays a number
fn retype(text: String) -> Value {
    match serde_yaml::from_str::<Value>(&text) {
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::Null)) if !text.trim().is_empty() => v,
        _ => Value::String(text),
    }
}

/// Merge `other` into `base`; mappings merge key by key, anything else is
/// replaced
pub fn deep_merge(base: &mut Value, other: &Value) {
    match (base, other) {
        (Value::Mapping(base_map), Value::Mapping(other_map)) => {
            for (key, other_value) in other_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, other_value),
                    None => {
                        base_map.insert(key.clone(), other_value.clone());
                    }
                }
            }
        }
        (base, other) => *base = other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_expand_env_in_string() {
        env::set_var("ORCH_LOADER_TEST_VAR", "sk-test");
        assert_eq!(
            expand_env_in_string("key ${ORCH_LOADER_TEST_VAR} end").as_deref(),
            Some("key sk-test end")
        );
        env::remove_var("ORCH_LOADER_TEST_VAR");
    }

    #[test]
    fn test_expand_env_default() {
        assert_eq!(
            expand_env_in_string("${ORCH_LOADER_MISSING:fallback}").as_deref(),
            Some("fallback")
        );
        assert_eq!(expand_env_in_string("plain text"), None);
    }

    #[test]
    fn test_expanded_numbers_keep_type() {
        let value: Value = parse_yaml_str("limit: ${ORCH_LOADER_LIMIT_MISSING:60}").unwrap();
        assert_eq!(value["limit"], Value::Number(60.into()));
    }

    #[test]
    fn test_deep_merge() {
        let mut base: Value = serde_yaml::from_str("a: 1\nb:\n  c: 2\n  d: 3\n").unwrap();
        let other: Value = serde_yaml::from_str("b:\n  c: 20\nf: 5\n").unwrap();
        deep_merge(&mut base, &other);
        assert_eq!(base["a"], Value::Number(1.into()));
        assert_eq!(base["b"]["c"], Value::Number(20.into()));
        assert_eq!(base["b"]["d"], Value::Number(3.into()));
        assert_eq!(base["f"], Value::Number(5.into()));
    }

    #[test]
    fn test_include_with_override() {
        let dir = TempDir::new().unwrap();
        write(&dir, "budgets.yaml", "fallback:\n  requests_per_day: 100\n  tokens_per_day: 1000\n");
        let main = write(
            &dir,
            "main.yaml",
            "budgets:\n  $include: budgets.yaml\n  fallback:\n    requests_per_day: 5\n",
        );

        let value = load_yaml_file(&main).unwrap();
        assert_eq!(value["budgets"]["fallback"]["requests_per_day"], Value::Number(5.into()));
        assert_eq!(value["budgets"]["fallback"]["tokens_per_day"], Value::Number(1000.into()));
    }

    #[test]
    fn test_include_loop_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "self.yaml", "$include: self.yaml\n");
        let err = load_yaml_file(&path).unwrap_err();
        assert!(err.to_string().contains("include depth"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_yaml_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }
}
