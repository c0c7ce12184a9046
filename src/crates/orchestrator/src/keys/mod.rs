//! Credential pools and least-loaded selection
//!
//! The [`KeyManager`] owns every provider credential. The invoker asks it for
//! the best credential for a model, calls the provider, then reports the
//! outcome so the credential moves between health states:
//!
//! - `healthy -> cooldown` on a rate limit, for the configured cooldown
//! - `healthy -> exhausted(model)` on a quota error, until local midnight
//! - `disabled` by an operator, ignored by selection
//!
//! All state sits behind one lock so a `acquire -> invoke -> report`
//! sequence never observes a half-applied update.

mod credential;

pub use credential::{CredentialLease, CredentialState, CredentialStatus};

use crate::clock::{next_local_midnight, to_chrono, SharedClock};
use chrono::{DateTime, Local, NaiveDate};
use credential::Credential;
use llm::ProviderErrorKind;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default cooldown applied after a rate-limit response
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Pools {
    /// Insertion order is the selection tie-break
    credentials: Vec<Credential>,
    current_date: NaiveDate,
}

/// Process-wide credential manager
#[derive(Debug)]
pub struct KeyManager {
    pools: Mutex<Pools>,
    clock: SharedClock,
    cooldown: Duration,
}

impl KeyManager {
    pub fn new(clock: SharedClock) -> Self {
        let today = clock.today();
        Self {
            pools: Mutex::new(Pools {
                credentials: Vec::new(),
                current_date: today,
            }),
            clock,
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    /// Set the rate-limit cooldown
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Register a provider pool. Credential ids are `<provider>#<index>`.
    pub fn add_pool<I, S>(&self, provider: &str, secrets: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pools = self.pools.lock();
        let today = pools.current_date;
        let start = pools
            .credentials
            .iter()
            .filter(|c| c.provider == provider)
            .count();

        let mut added = 0;
        for (offset, secret) in secrets.into_iter().enumerate() {
            let id = format!("{}#{}", provider, start + offset);
            pools
                .credentials
                .push(Credential::new(id, provider.to_string(), secret.into(), today));
            added += 1;
        }
        info!(provider = provider, credentials = added, "Registered credential pool");
    }

    /// Number of credentials in a provider's pool
    pub fn pool_size(&self, provider: &str) -> usize {
        self.pools
            .lock()
            .credentials
            .iter()
            .filter(|c| c.provider == provider)
            .count()
    }

    /// Names of every registered provider, in registration order
    pub fn providers(&self) -> Vec<String> {
        let pools = self.pools.lock();
        let mut names: Vec<String> = Vec::new();
        for cred in &pools.credentials {
            if !names.contains(&cred.provider) {
                names.push(cred.provider.clone());
            }
        }
        names
    }

    /// Pick the least-loaded healthy credential for `model`.
    ///
    /// Minimizes `(daily_requests, -success_rate)`; ties go to the credential
    /// registered first.
    pub fn acquire(&self, provider: &str, model: &str) -> Option<CredentialLease> {
        let now = self.clock.now();
        let mut pools = self.pools.lock();
        Self::roll_if_needed(&mut pools, now);

        let mut best: Option<usize> = None;
        for idx in 0..pools.credentials.len() {
            let cred = &mut pools.credentials[idx];
            if cred.provider != provider || !cred.refresh_and_check(model, now) {
                continue;
            }
            best = match best {
                None => Some(idx),
                Some(current) => {
                    let incumbent = &pools.credentials[current];
                    let candidate = &pools.credentials[idx];
                    let fewer = candidate.daily_requests < incumbent.daily_requests;
                    let same_load_better_rate = candidate.daily_requests
                        == incumbent.daily_requests
                        && candidate.success_rate() > incumbent.success_rate();
                    if fewer || same_load_better_rate {
                        Some(idx)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        match best {
            Some(idx) => {
                let lease = pools.credentials[idx].lease();
                debug!(provider = provider, model = model, credential = %lease.masked, "Selected credential");
                Some(lease)
            }
            None => {
                warn!(provider = provider, model = model, "No healthy credential available");
                None
            }
        }
    }

    /// Record a successful call
    pub fn report_success(&self, id: &str, model: &str) {
        self.with_credential(id, |cred, now| {
            cred.count_attempt(model, now);
            cred.successful_requests += 1;
        });
    }

    /// Record a rate-limit response and put the credential into cooldown
    pub fn report_rate_limit(&self, id: &str, model: &str) {
        let cooldown = to_chrono(self.cooldown);
        self.with_credential(id, |cred, now| {
            cred.count_attempt(model, now);
            cred.failed_requests += 1;
            cred.rate_limit_hits += 1;
            cred.cooldown_until = Some(now + cooldown);
            warn!(
                credential = %cred.masked,
                model = model,
                cooldown_secs = cooldown.num_seconds(),
                "Credential rate limited, cooling down"
            );
        });
    }

    /// Record a quota error: the credential is exhausted for `model` until
    /// local midnight
    pub fn report_quota(&self, id: &str, model: &str) {
        self.with_credential(id, |cred, now| {
            cred.count_attempt(model, now);
            cred.failed_requests += 1;
            let until = next_local_midnight(now);
            cred.exhausted_until.insert(model.to_string(), until);
            warn!(
                credential = %cred.masked,
                model = model,
                until = %until,
                "Credential quota exhausted for model"
            );
        });
    }

    /// Record any other failure; counters only, no state change
    pub fn report_error(&self, id: &str, model: &str, kind: ProviderErrorKind) {
        self.with_credential(id, |cred, now| {
            cred.count_attempt(model, now);
            cred.failed_requests += 1;
            debug!(credential = %cred.masked, model = model, kind = ?kind, "Credential error recorded");
        });
    }

    /// Operator control: exclude a credential from selection
    pub fn disable(&self, id: &str) -> bool {
        self.with_credential(id, |cred, _| {
            cred.disabled = true;
            info!(credential = %cred.masked, "Credential disabled by operator");
        })
    }

    /// Operator control: return a disabled credential to the pool
    pub fn enable(&self, id: &str) -> bool {
        self.with_credential(id, |cred, _| {
            cred.disabled = false;
            info!(credential = %cred.masked, "Credential enabled by operator");
        })
    }

    pub fn state(&self, id: &str) -> Option<CredentialState> {
        self.status(id).map(|s| s.state)
    }

    pub fn status(&self, id: &str) -> Option<CredentialStatus> {
        let now = self.clock.now();
        let mut pools = self.pools.lock();
        Self::roll_if_needed(&mut pools, now);
        pools
            .credentials
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.status(now))
    }

    /// Masked status rows for every credential
    pub fn snapshot(&self) -> Vec<CredentialStatus> {
        let now = self.clock.now();
        let mut pools = self.pools.lock();
        Self::roll_if_needed(&mut pools, now);
        pools.credentials.iter().map(|c| c.status(now)).collect()
    }

    fn with_credential<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Credential, DateTime<Local>),
    {
        let now = self.clock.now();
        let mut pools = self.pools.lock();
        Self::roll_if_needed(&mut pools, now);
        match pools.credentials.iter_mut().find(|c| c.id == id) {
            Some(cred) => {
                f(cred, now);
                true
            }
            None => {
                warn!(credential_id = id, "Report for unknown credential ignored");
                false
            }
        }
    }

    fn roll_if_needed(pools: &mut Pools, now: DateTime<Local>) {
        let today = now.date_naive();
        if pools.current_date == today {
            return;
        }
        for cred in pools.credentials.iter_mut() {
            cred.roll_day(today);
        }
        info!(from = %pools.current_date, to = %today, "Daily credential counters reset");
        pools.current_date = today;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn setup() -> (Arc<ManualClock>, KeyManager) {
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        ));
        let keys = KeyManager::new(clock.clone());
        keys.add_pool("primary", ["key-one-aaaa-1111", "key-two-bbbb-2222", "key-three-cccc-3333"]);
        (clock, keys)
    }

    #[test]
    fn test_ids_and_pool_size() {
        let (_clock, keys) = setup();
        keys.add_pool("secondary", ["gem-key-aaaa-0000"]);
        assert_eq!(keys.pool_size("primary"), 3);
        assert_eq!(keys.pool_size("secondary"), 1);
        assert_eq!(keys.pool_size("missing"), 0);
        assert_eq!(keys.providers(), vec!["primary".to_string(), "secondary".to_string()]);
        assert!(keys.status("primary#2").is_some());
    }

    #[test]
    fn test_least_loaded_with_insertion_tiebreak() {
        let (_clock, keys) = setup();
        assert_eq!(keys.acquire("primary", "m").unwrap().id, "primary#0");

        keys.report_success("primary#0", "m");
        assert_eq!(keys.acquire("primary", "m").unwrap().id, "primary#1");

        keys.report_success("primary#1", "m");
        keys.report_success("primary#2", "m");
        // All at one request: first registered wins
        assert_eq!(keys.acquire("primary", "m").unwrap().id, "primary#0");
    }

    #[test]
    fn test_success_rate_breaks_equal_load() {
        let (_clock, keys) = setup();
        keys.report_error("primary#0", "m", ProviderErrorKind::Transient);
        keys.report_success("primary#1", "m");
        keys.report_success("primary#2", "m");
        // Equal daily load, #1 and #2 have a perfect rate
        assert_eq!(keys.acquire("primary", "m").unwrap().id, "primary#1");
    }

    #[test]
    fn test_rate_limit_cools_exactly_one_credential() {
        let (clock, keys) = setup();
        keys.report_rate_limit("primary#0", "m");

        assert_eq!(keys.state("primary#0"), Some(CredentialState::Cooldown));
        assert_eq!(keys.state("primary#1"), Some(CredentialState::Healthy));
        assert_eq!(keys.state("primary#2"), Some(CredentialState::Healthy));
        assert_eq!(keys.status("primary#0").unwrap().cooldown_remaining_secs, Some(60));

        clock.advance(Duration::from_secs(59));
        assert_eq!(keys.state("primary#0"), Some(CredentialState::Cooldown));

        clock.advance(Duration::from_secs(1));
        assert_eq!(keys.state("primary#0"), Some(CredentialState::Healthy));
    }

    #[test]
    fn test_quota_exhausts_model_until_midnight() {
        let (clock, keys) = setup();
        keys.report_quota("primary#0", "model-a");

        assert_eq!(keys.state("primary#0"), Some(CredentialState::Exhausted));
        assert_ne!(keys.acquire("primary", "model-a").unwrap().id, "primary#0");
        // A different model can still use it
        keys.disable("primary#1");
        keys.disable("primary#2");
        assert_eq!(keys.acquire("primary", "model-b").unwrap().id, "primary#0");
        assert!(keys.acquire("primary", "model-a").is_none());

        clock.advance(Duration::from_secs(14 * 3600));
        assert_eq!(keys.state("primary#0"), Some(CredentialState::Healthy));
        assert_eq!(keys.status("primary#0").unwrap().daily_requests, 0);
    }

    #[test]
    fn test_disabled_is_skipped() {
        let (_clock, keys) = setup();
        assert!(keys.disable("primary#0"));
        assert_eq!(keys.state("primary#0"), Some(CredentialState::Disabled));
        assert_eq!(keys.acquire("primary", "m").unwrap().id, "primary#1");

        assert!(keys.enable("primary#0"));
        assert_eq!(keys.acquire("primary", "m").unwrap().id, "primary#0");
        assert!(!keys.disable("nope#9"));
    }

    #[test]
    fn test_all_unavailable() {
        let (_clock, keys) = setup();
        for id in ["primary#0", "primary#1", "primary#2"] {
            keys.report_rate_limit(id, "m");
        }
        assert!(keys.acquire("primary", "m").is_none());
    }

    #[test]
    fn test_snapshot_never_exposes_secrets() {
        let (_clock, keys) = setup();
        let rendered = serde_json::to_string(&keys.snapshot()).unwrap();
        assert!(!rendered.contains("key-one-aaaa-1111"));
        assert!(rendered.contains("key-…1111"));
    }
}
