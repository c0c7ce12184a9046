//! Per-conversation domain memory for follow-up turns.

use super::plan::{OrchestrationPlan, GENERAL_INTENT};
use crate::clock::{to_chrono, SharedClock};
use chrono::{DateTime, Local};
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

/// Idle time after which a conversation's domain is forgotten
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
struct Domain {
    intent: String,
    updated_at: DateTime<Local>,
}

/// Last non-general intent per conversation
#[derive(Debug)]
pub struct SessionState {
    domains: DashMap<String, Domain>,
    ttl: Duration,
    clock: SharedClock,
}

impl SessionState {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            domains: DashMap::new(),
            ttl: DEFAULT_SESSION_TTL,
            clock,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn previous_domain(&self, conversation_id: &str) -> Option<String> {
        let now = self.clock.now();
        let ttl = to_chrono(self.ttl);
        self.domains
            .get(conversation_id)
            .filter(|d| now - d.updated_at < ttl)
            .map(|d| d.intent.clone())
    }

    /// Inherit the previous domain for a general follow-up, then remember
    /// the plan's own domain
    pub fn apply(&self, conversation_id: &str, plan: &mut OrchestrationPlan) {
        if plan.is_follow_up && plan.intent == GENERAL_INTENT {
            if let Some(previous) = self.previous_domain(conversation_id) {
                debug!(conversation = conversation_id, intent = %previous, "Follow-up inherits intent");
                plan.intent = previous;
            }
        }
        if plan.intent != GENERAL_INTENT && !plan.intent.is_empty() {
            let now = self.clock.now();
            let ttl = to_chrono(self.ttl);
            self.domains.retain(|_, d| now - d.updated_at < ttl);
            self.domains.insert(
                conversation_id.to_string(),
                Domain {
                    intent: plan.intent.clone(),
                    updated_at: now,
                },
            );
        }
    }

    pub fn forget(&self, conversation_id: &str) {
        self.domains.remove(conversation_id);
    }

    /// Conversations currently remembered, expired or not
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn sessions() -> (Arc<ManualClock>, SessionState) {
        let clock = Arc::new(ManualClock::new(Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()));
        (clock.clone(), SessionState::new(clock))
    }

    fn plan(intent: &str, follow_up: bool) -> OrchestrationPlan {
        let mut plan = OrchestrationPlan::fallback("x");
        plan.intent = intent.to_string();
        plan.is_follow_up = follow_up;
        plan
    }

    #[test]
    fn test_follow_up_inherits_domain() {
        let (_clock, sessions) = sessions();
        sessions.apply("c1", &mut plan("weather", false));

        let mut follow_up = plan(GENERAL_INTENT, true);
        sessions.apply("c1", &mut follow_up);
        assert_eq!(follow_up.intent, "weather");

        let mut other = plan(GENERAL_INTENT, true);
        sessions.apply("c2", &mut other);
        assert_eq!(other.intent, GENERAL_INTENT);
    }

    #[test]
    fn test_non_follow_up_keeps_general() {
        let (_clock, sessions) = sessions();
        sessions.apply("c1", &mut plan("coding", false));
        let mut fresh = plan(GENERAL_INTENT, false);
        sessions.apply("c1", &mut fresh);
        assert_eq!(fresh.intent, GENERAL_INTENT);
        assert_eq!(sessions.previous_domain("c1").as_deref(), Some("coding"));
    }

    #[test]
    fn test_idle_domains_expire_and_are_purged() {
        let (clock, sessions) = sessions();
        sessions.apply("c1", &mut plan("weather", false));
        clock.advance(Duration::from_secs(3600));

        let mut follow_up = plan(GENERAL_INTENT, true);
        sessions.apply("c1", &mut follow_up);
        assert_eq!(follow_up.intent, GENERAL_INTENT);

        sessions.apply("c2", &mut plan("coding", false));
        assert_eq!(sessions.len(), 1);
        assert!(sessions.previous_domain("c1").is_none());
    }
}
