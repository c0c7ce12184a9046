//! Model governance: symbolic roles mapped to ordered model lists.
//!
//! The order of a role's list is its fallback chain. Each model is routed to
//! the provider whose configuration lists it, or to the default provider.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Symbolic model role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Orchestrator,
    Synthesizer,
    Coder,
    Logic,
    TrCreative,
    Safety,
    /// Fast gray-zone intent classifier
    Classifier,
}

impl ModelRole {
    pub const ALL: [ModelRole; 7] = [
        ModelRole::Orchestrator,
        ModelRole::Synthesizer,
        ModelRole::Coder,
        ModelRole::Logic,
        ModelRole::TrCreative,
        ModelRole::Safety,
        ModelRole::Classifier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Orchestrator => "orchestrator",
            ModelRole::Synthesizer => "synthesizer",
            ModelRole::Coder => "coder",
            ModelRole::Logic => "logic",
            ModelRole::TrCreative => "tr_creative",
            ModelRole::Safety => "safety",
            ModelRole::Classifier => "classifier",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        ModelRole::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| format!("unknown model role '{}'", s))
    }
}

/// Role table plus model-to-provider routing
#[derive(Debug)]
pub struct ModelGovernance {
    roles: RwLock<HashMap<ModelRole, Vec<String>>>,
    routes: HashMap<String, String>,
    default_provider: Option<String>,
}

impl ModelGovernance {
    pub fn new(roles: HashMap<ModelRole, Vec<String>>) -> Self {
        Self {
            roles: RwLock::new(roles),
            routes: HashMap::new(),
            default_provider: None,
        }
    }

    /// Route a model id to a provider
    pub fn with_route(mut self, model: impl Into<String>, provider: impl Into<String>) -> Self {
        self.routes.insert(model.into(), provider.into());
        self
    }

    /// Provider for models without an explicit route
    pub fn with_default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = Some(provider.into());
        self
    }

    /// Ordered fallback chain for a role
    ///
    /// The classifier borrows the orchestrator's chain when it has none.
    pub fn models_for(&self, role: ModelRole) -> Vec<String> {
        let roles = self.roles.read();
        match roles.get(&role) {
            Some(models) if !models.is_empty() => models.clone(),
            _ if role == ModelRole::Classifier => roles
                .get(&ModelRole::Orchestrator)
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn provider_for(&self, model: &str) -> Option<String> {
        self.routes
            .get(model)
            .cloned()
            .or_else(|| self.default_provider.clone())
    }

    /// Swap the role table in place
    pub fn reload(&self, roles: HashMap<ModelRole, Vec<String>>) {
        let count = roles.len();
        *self.roles.write() = roles;
        info!(roles = count, "Model role table reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governance() -> ModelGovernance {
        let mut roles = HashMap::new();
        roles.insert(
            ModelRole::Synthesizer,
            vec!["model-a".to_string(), "model-b".to_string()],
        );
        roles.insert(ModelRole::Orchestrator, vec!["planner".to_string()]);
        ModelGovernance::new(roles)
            .with_route("model-b", "secondary")
            .with_default_provider("primary")
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("tr_creative".parse::<ModelRole>(), Ok(ModelRole::TrCreative));
        assert_eq!(" Logic ".parse::<ModelRole>(), Ok(ModelRole::Logic));
        assert!("poet".parse::<ModelRole>().is_err());
    }

    #[test]
    fn test_order_is_fallback_chain() {
        let gov = governance();
        assert_eq!(gov.models_for(ModelRole::Synthesizer), vec!["model-a", "model-b"]);
        assert!(gov.models_for(ModelRole::Coder).is_empty());
    }

    #[test]
    fn test_classifier_borrows_orchestrator_chain() {
        assert_eq!(governance().models_for(ModelRole::Classifier), vec!["planner"]);
    }

    #[test]
    fn test_provider_routing() {
        let gov = governance();
        assert_eq!(gov.provider_for("model-b").as_deref(), Some("secondary"));
        assert_eq!(gov.provider_for("model-a").as_deref(), Some("primary"));
    }

    #[test]
    fn test_reload() {
        let gov = governance();
        let mut roles = HashMap::new();
        roles.insert(ModelRole::Synthesizer, vec!["model-c".to_string()]);
        gov.reload(roles);
        assert_eq!(gov.models_for(ModelRole::Synthesizer), vec!["model-c"]);
        assert!(gov.models_for(ModelRole::Orchestrator).is_empty());
    }
}
