//! Orchestrator settings
//!
//! One YAML document describes roles, providers, budgets, feature flags,
//! timeouts and the thresholds of each subsystem. Loading goes through
//! [`loader`] (includes and `${VAR:default}` expansion), then `ORCH_*`
//! environment overrides, then [`OrchestratorSettings::validate`].
//!
//! ```yaml
//! roles:
//!   orchestrator: [planner-small]
//!   synthesizer: [model-a, model-b]
//! providers:
//!   - name: primary
//!     kind: openai
//!     base_url: https://api.example.com/v1
//!     keys: ["${PRIMARY_KEY_1}", "${PRIMARY_KEY_2}"]
//!   - name: secondary
//!     kind: gemini
//!     base_url: https://generativelanguage.googleapis.com/v1beta
//!     keys: ["${GEMINI_KEY}"]
//!     models: [model-b]
//! budgets:
//!   fallback: { requests_per_day: 1000, tokens_per_day: 1000000 }
//!   model-a: { requests_per_day: 200, tokens_per_day: 400000 }
//! ```

pub mod loader;

pub use loader::{deep_merge, load_yaml_config, load_yaml_file, parse_yaml_str};

use crate::governance::ModelRole;
use crate::invoker::RoleTimeouts;
use crate::rag::RagConfig;
use crate::resilience::{BudgetLimits, CircuitConfig, FALLBACK_LIMITS};
use crate::{OrchestratorError, Result};
use llm::ProviderKind;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tooling::config::{get_env_bool, get_env_list, get_env_parse, prefixed_key};
use tooling::mask_secret;
use tracing::{debug, info};

const ENV_PREFIX: &str = "ORCH_";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Role to ordered model list; the order is the fallback chain
    pub roles: BTreeMap<ModelRole, Vec<String>>,
    pub providers: Vec<ProviderSettings>,
    /// Provider for models no provider lists; the first provider if unset
    pub default_provider: Option<String>,
    pub budgets: BudgetSettings,
    pub features: FeatureFlags,
    pub timeouts: TimeoutSettings,
    pub circuit: CircuitSettings,
    pub keys: KeySettings,
    pub intent: IntentSettings,
    pub rag: RagSettings,
}

#[derive(Clone, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub keys: Vec<String>,
    /// Model ids routed to this provider
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub organization: Option<String>,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.keys.iter().map(|k| mask_secret(k)).collect();
        f.debug_struct("ProviderSettings")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("keys", &keys)
            .field("models", &self.models)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSettings {
    #[serde(default = "fallback_limits")]
    pub fallback: BudgetLimits,
    /// Per-model limits, keyed by model id
    #[serde(flatten)]
    pub models: HashMap<String, BudgetLimits>,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            fallback: FALLBACK_LIMITS,
            models: HashMap::new(),
        }
    }
}

fn fallback_limits() -> BudgetLimits {
    FALLBACK_LIMITS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub gray_classifier: bool,
    pub rag_gate: bool,
    pub streaming: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            gray_classifier: true,
            rag_gate: true,
            streaming: true,
        }
    }
}

/// Timeouts in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub classifier: f64,
    pub orchestrator: f64,
    /// Every other role
    pub generation: f64,
    pub retrieval: f64,
    /// Per-role overrides
    pub roles: BTreeMap<ModelRole, f64>,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            classifier: 5.0,
            orchestrator: 15.0,
            generation: 30.0,
            retrieval: 5.0,
            roles: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitSettings {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    pub cooldown_secs: u64,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self { cooldown_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntentSettings {
    pub cache_ttl_secs: u64,
    pub history_window: usize,
    /// Intents handed back to the caller's legacy path
    pub refused_intents: Vec<String>,
}

impl Default for IntentSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            history_window: 10,
            refused_intents: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub pin_ttl_secs: u64,
    /// Append gate telemetry to this JSONL file instead of the log
    pub telemetry_path: Option<PathBuf>,
    #[serde(flatten)]
    pub gate: RagConfig,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            pin_ttl_secs: 3600,
            telemetry_path: None,
            gate: RagConfig::default(),
        }
    }
}

impl OrchestratorSettings {
    /// Load a settings file, apply `ORCH_*` overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut settings: Self = load_yaml_config(path)?;
        settings.apply_env_overrides()?;
        settings.validate()?;
        info!(
            path = %path.display(),
            roles = settings.roles.len(),
            providers = settings.providers.len(),
            "Settings loaded"
        );
        Ok(settings)
    }

    /// Parse and validate settings held in memory; no environment overrides
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let settings: Self = parse_yaml_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// `ORCH_GRAY_CLASSIFIER`, `ORCH_RAG_GATE`, `ORCH_STREAMING` and
    /// `ORCH_<PROVIDER>_KEYS`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let flags = [
            ("gray_classifier", &mut self.features.gray_classifier),
            ("rag_gate", &mut self.features.rag_gate),
            ("streaming", &mut self.features.streaming),
        ];
        for (name, flag) in flags {
            let key = prefixed_key(ENV_PREFIX, name);
            if let Some(value) = get_env_bool(&key).map_err(env_error)? {
                debug!(key = %key, value, "Feature flag overridden");
                *flag = value;
            }
        }

        for provider in &mut self.providers {
            let key = prefixed_key(ENV_PREFIX, &format!("{}_keys", provider.name));
            if let Some(keys) = get_env_list(&key).map_err(env_error)? {
                debug!(key = %key, count = keys.len(), "Provider keys overridden");
                provider.keys = keys;
            }
        }

        let key = prefixed_key(ENV_PREFIX, "intent_cache_ttl");
        if let Some(ttl) = get_env_parse::<u64>(&key).map_err(env_error)? {
            debug!(key = %key, ttl, "Intent cache TTL overridden");
            self.intent.cache_ttl_secs = ttl;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.roles.is_empty() {
            return Err(invalid("no model roles configured"));
        }
        if let Some((role, _)) = self.roles.iter().find(|(_, models)| models.is_empty()) {
            return Err(invalid(format!("role '{}' has no models", role)));
        }

        if self.providers.is_empty() {
            return Err(invalid("no providers configured"));
        }
        let mut names = HashSet::new();
        for provider in &self.providers {
            if !names.insert(provider.name.as_str()) {
                return Err(invalid(format!("provider '{}' is defined twice", provider.name)));
            }
            if provider.keys.is_empty() {
                return Err(invalid(format!("provider '{}' has no keys", provider.name)));
            }
        }
        if let Some(default) = &self.default_provider {
            if !names.contains(default.as_str()) {
                return Err(invalid(format!("default_provider '{}' is not a configured provider", default)));
            }
        }

        check_limits("fallback", &self.budgets.fallback)?;
        for (model, limits) in &self.budgets.models {
            check_limits(model, limits)?;
        }

        let timeouts = [
            ("classifier", self.timeouts.classifier),
            ("orchestrator", self.timeouts.orchestrator),
            ("generation", self.timeouts.generation),
            ("retrieval", self.timeouts.retrieval),
        ];
        for (name, secs) in timeouts {
            check_positive(&format!("timeouts.{}", name), secs)?;
        }
        for (role, secs) in &self.timeouts.roles {
            check_positive(&format!("timeouts.roles.{}", role), *secs)?;
        }

        let counts = [
            ("circuit.failure_threshold", u64::from(self.circuit.failure_threshold)),
            ("circuit.reset_timeout_secs", self.circuit.reset_timeout_secs),
            ("keys.cooldown_secs", self.keys.cooldown_secs),
            ("intent.cache_ttl_secs", self.intent.cache_ttl_secs),
            ("intent.history_window", self.intent.history_window as u64),
            ("rag.pin_ttl_secs", self.rag.pin_ttl_secs),
            ("rag.search_limit", self.rag.gate.search_limit as u64),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, v)| *v == 0) {
            return Err(invalid(format!("{} must be positive", name)));
        }

        let gate = &self.rag.gate;
        for (name, v) in [
            ("rag.dense_threshold", gate.dense_threshold),
            ("rag.dense_margin", gate.dense_margin),
            ("rag.hybrid_threshold", gate.hybrid_threshold),
            ("rag.hybrid_margin", gate.hybrid_margin),
            ("rag.pin_margin", gate.pin_margin),
        ] {
            check_positive(name, v)?;
        }
        Ok(())
    }

    pub fn role_table(&self) -> HashMap<ModelRole, Vec<String>> {
        self.roles.iter().map(|(r, m)| (*r, m.clone())).collect()
    }

    /// Model id to provider name for every explicitly routed model
    pub fn model_routes(&self) -> Vec<(String, String)> {
        self.providers
            .iter()
            .flat_map(|p| p.models.iter().map(move |m| (m.clone(), p.name.clone())))
            .collect()
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider
            .as_deref()
            .or_else(|| self.providers.first().map(|p| p.name.as_str()))
    }

    pub fn role_timeouts(&self) -> RoleTimeouts {
        RoleTimeouts {
            classifier: secs(self.timeouts.classifier),
            orchestrator: secs(self.timeouts.orchestrator),
            generation: secs(self.timeouts.generation),
            overrides: self.timeouts.roles.iter().map(|(r, s)| (*r, secs(*s))).collect(),
        }
    }

    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit.failure_threshold,
            reset_timeout: Duration::from_secs(self.circuit.reset_timeout_secs),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.keys.cooldown_secs)
    }

    pub fn intent_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.intent.cache_ttl_secs)
    }

    pub fn pin_ttl(&self) -> Duration {
        Duration::from_secs(self.rag.pin_ttl_secs)
    }

    pub fn rag_config(&self) -> RagConfig {
        RagConfig {
            retrieval_timeout: secs(self.timeouts.retrieval),
            ..self.rag.gate.clone()
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

fn invalid(message: impl Into<String>) -> OrchestratorError {
    OrchestratorError::Config(message.into())
}

fn env_error(e: tooling::ToolingError) -> OrchestratorError {
    OrchestratorError::Config(e.to_string())
}

fn check_limits(model: &str, limits: &BudgetLimits) -> Result<()> {
    if limits.requests_per_day == 0 || limits.tokens_per_day == 0 {
        return Err(invalid(format!("budget for '{}' must have positive limits", model)));
    }
    Ok(())
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(format!("{} must be positive", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    const SAMPLE: &str = r#"
roles:
  orchestrator: [planner-small]
  synthesizer: [model-a, model-b]
providers:
  - name: primary
    kind: openai
    base_url: https://api.example.com/v1
    keys: [k1, k2]
  - name: secondary
    kind: gemini
    base_url: https://gen.example.com/v1beta
    keys: [g1]
    models: [model-b]
budgets:
  fallback: { requests_per_day: 500, tokens_per_day: 100000 }
  model-a: { requests_per_day: 10, tokens_per_day: 5000 }
timeouts:
  classifier: 3
  roles:
    coder: 45
features:
  gray_classifier: false
rag:
  dense_threshold: 0.4
  telemetry_path: /tmp/gate.jsonl
"#;

    #[test]
    fn test_parse_sample() {
        let settings = OrchestratorSettings::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(settings.roles[&ModelRole::Synthesizer], vec!["model-a", "model-b"]);
        assert_eq!(settings.providers[1].kind, ProviderKind::Gemini);
        assert_eq!(settings.budgets.fallback.requests_per_day, 500);
        assert_eq!(settings.budgets.models["model-a"].requests_per_day, 10);
        assert!(!settings.features.gray_classifier);
        assert!(settings.features.rag_gate);
        assert_eq!(settings.default_provider(), Some("primary"));
        assert_eq!(settings.model_routes(), vec![("model-b".to_string(), "secondary".to_string())]);
    }

    #[test]
    fn test_derived_values() {
        let settings = OrchestratorSettings::from_yaml_str(SAMPLE).unwrap();
        let timeouts = settings.role_timeouts();
        assert_eq!(timeouts.for_role(ModelRole::Classifier), Duration::from_secs(3));
        assert_eq!(timeouts.for_role(ModelRole::Coder), Duration::from_secs(45));
        assert_eq!(timeouts.for_role(ModelRole::Logic), Duration::from_secs(30));

        let rag = settings.rag_config();
        assert_eq!(rag.dense_threshold, 0.4);
        assert_eq!(rag.hybrid_threshold, 0.75);
        assert_eq!(rag.retrieval_timeout, Duration::from_secs(5));
        assert_eq!(settings.pin_ttl(), Duration::from_secs(3600));
        assert_eq!(settings.circuit_config().failure_threshold, 5);
    }

    #[test]
    fn test_rejects_empty_role() {
        let yaml = SAMPLE.replace("orchestrator: [planner-small]", "orchestrator: []");
        let err = OrchestratorSettings::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("role 'orchestrator' has no models"));
    }

    #[test]
    fn test_rejects_provider_without_keys() {
        let yaml = SAMPLE.replace("keys: [g1]", "keys: []");
        let err = OrchestratorSettings::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("provider 'secondary' has no keys"));
    }

    #[test]
    fn test_rejects_unknown_default_provider() {
        let yaml = format!("{}default_provider: tertiary\n", SAMPLE);
        let err = OrchestratorSettings::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("tertiary"));
    }

    #[test]
    fn test_rejects_zero_limits() {
        let yaml = SAMPLE.replace("requests_per_day: 10,", "requests_per_day: 0,");
        assert!(OrchestratorSettings::from_yaml_str(&yaml).is_err());

        let yaml = format!("{}circuit:\n  failure_threshold: 0\n", SAMPLE);
        let err = OrchestratorSettings::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("circuit.failure_threshold"));
    }

    #[test]
    fn test_env_overrides() {
        let yaml = SAMPLE.replace("name: secondary", "name: envtest");
        let mut settings: OrchestratorSettings = parse_yaml_str(&yaml).unwrap();

        env::set_var("ORCH_ENVTEST_KEYS", "e1, e2 ,,e3");
        settings.apply_env_overrides().unwrap();
        env::remove_var("ORCH_ENVTEST_KEYS");

        assert_eq!(settings.providers[1].keys, vec!["e1", "e2", "e3"]);
        assert_eq!(settings.providers[0].keys, vec!["k1", "k2"]);
    }

    #[test]
    fn test_debug_masks_keys() {
        let yaml = SAMPLE.replace("keys: [k1, k2]", "keys: [sk-live-abcdefghijkl]");
        let settings = OrchestratorSettings::from_yaml_str(&yaml).unwrap();
        let rendered = format!("{:?}", settings.providers[0]);
        assert!(!rendered.contains("sk-live-abcdefghijkl"));
    }
}
