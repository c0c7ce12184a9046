//! A single API credential and its health bookkeeping.

use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Health state of a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Healthy,
    /// Rate limited; unusable until the cooldown deadline
    Cooldown,
    /// Quota exhausted for at least one model until local midnight
    Exhausted,
    /// Switched off by an operator
    Disabled,
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialState::Healthy => "healthy",
            CredentialState::Cooldown => "cooldown",
            CredentialState::Exhausted => "exhausted",
            CredentialState::Disabled => "disabled",
        };
        f.pad(s)
    }
}

#[derive(Debug)]
pub(crate) struct Credential {
    pub id: String,
    pub provider: String,
    secret: String,
    pub masked: String,
    pub disabled: bool,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limit_hits: u64,
    pub model_usage: HashMap<String, u64>,
    pub last_used: Option<DateTime<Local>>,
    pub cooldown_until: Option<DateTime<Local>>,
    pub exhausted_until: HashMap<String, DateTime<Local>>,
    pub daily_requests: u64,
    pub daily_date: NaiveDate,
}

impl Credential {
    pub fn new(id: String, provider: String, secret: String, today: NaiveDate) -> Self {
        let masked = tooling::mask_secret(&secret);
        Self {
            id,
            provider,
            secret,
            masked,
            disabled: false,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            rate_limit_hits: 0,
            model_usage: HashMap::new(),
            last_used: None,
            cooldown_until: None,
            exhausted_until: HashMap::new(),
            daily_requests: 0,
            daily_date: today,
        }
    }

    /// Success ratio; an unused credential counts as perfect
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    /// Clear an elapsed cooldown, then report whether the credential can
    /// serve `model` right now.
    pub fn refresh_and_check(&mut self, model: &str, now: DateTime<Local>) -> bool {
        if self.disabled {
            return false;
        }
        if let Some(until) = self.cooldown_until {
            if now < until {
                return false;
            }
            self.cooldown_until = None;
        }
        match self.exhausted_until.get(model) {
            Some(until) if now < *until => false,
            _ => true,
        }
    }

    pub fn state(&self, now: DateTime<Local>) -> CredentialState {
        if self.disabled {
            CredentialState::Disabled
        } else if self.cooldown_until.map_or(false, |until| now < until) {
            CredentialState::Cooldown
        } else if self.exhausted_until.values().any(|until| now < *until) {
            CredentialState::Exhausted
        } else {
            CredentialState::Healthy
        }
    }

    pub fn roll_day(&mut self, today: NaiveDate) {
        self.daily_requests = 0;
        self.exhausted_until.clear();
        self.daily_date = today;
    }

    /// Count an attempt, successful or not
    pub fn count_attempt(&mut self, model: &str, now: DateTime<Local>) {
        self.total_requests += 1;
        self.daily_requests += 1;
        *self.model_usage.entry(model.to_string()).or_insert(0) += 1;
        self.last_used = Some(now);
    }

    pub fn lease(&self) -> CredentialLease {
        CredentialLease {
            id: self.id.clone(),
            provider: self.provider.clone(),
            masked: self.masked.clone(),
            secret: self.secret.clone(),
        }
    }

    pub fn status(&self, now: DateTime<Local>) -> CredentialStatus {
        let mut exhausted_models: Vec<String> = self
            .exhausted_until
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(model, _)| model.clone())
            .collect();
        exhausted_models.sort();

        CredentialStatus {
            id: self.id.clone(),
            provider: self.provider.clone(),
            masked: self.masked.clone(),
            state: self.state(now),
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            rate_limit_hits: self.rate_limit_hits,
            daily_requests: self.daily_requests,
            cooldown_remaining_secs: self
                .cooldown_until
                .filter(|until| now < *until)
                .map(|until| (until - now).num_seconds().max(0) as u64),
            exhausted_models,
            last_used: self.last_used,
        }
    }
}

/// A credential handed out for one attempt
///
/// The secret is only reachable through [`CredentialLease::secret`]; `Debug`
/// prints the masked form.
#[derive(Clone)]
pub struct CredentialLease {
    pub id: String,
    pub provider: String,
    pub masked: String,
    secret: String,
}

impl CredentialLease {
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLease")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("masked", &self.masked)
            .finish()
    }
}

/// Operator view of a credential
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub id: String,
    pub provider: String,
    pub masked: String,
    pub state: CredentialState,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limit_hits: u64,
    pub daily_requests: u64,
    pub cooldown_remaining_secs: Option<u64>,
    pub exhausted_models: Vec<String>,
    pub last_used: Option<DateTime<Local>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_lease_debug_is_masked() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let cred = Credential::new(
            "primary#0".to_string(),
            "primary".to_string(),
            "sk-abcdefghijklmnop".to_string(),
            now.date_naive(),
        );
        let debug = format!("{:?}", cred.lease());
        assert!(!debug.contains("sk-abcdefghijklmnop"));
        assert_eq!(cred.lease().secret(), "sk-abcdefghijklmnop");
    }

    #[test]
    fn test_cooldown_clears_after_deadline() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let mut cred = Credential::new("k".into(), "p".into(), "secret-value-1".into(), now.date_naive());
        cred.cooldown_until = Some(now + chrono::Duration::seconds(60));

        assert!(!cred.refresh_and_check("m", now));
        assert_eq!(cred.state(now), CredentialState::Cooldown);

        let later = now + chrono::Duration::seconds(60);
        assert!(cred.refresh_and_check("m", later));
        assert!(cred.cooldown_until.is_none());
        assert_eq!(cred.state(later), CredentialState::Healthy);
    }

    #[test]
    fn test_exhaustion_is_per_model() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let mut cred = Credential::new("k".into(), "p".into(), "secret-value-1".into(), now.date_naive());
        cred.exhausted_until
            .insert("model-a".to_string(), now + chrono::Duration::hours(15));

        assert!(!cred.refresh_and_check("model-a", now));
        assert!(cred.refresh_and_check("model-b", now));
        assert_eq!(cred.status(now).exhausted_models, vec!["model-a".to_string()]);
    }
}
