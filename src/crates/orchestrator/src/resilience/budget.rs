//! Per-model daily request and token budgets.
//!
//! `check` refuses a model once either counter reaches its limit. `record`
//! increments both counters and raises at most one alert per
//! `(model, metric, level)` per local day.

use crate::clock::SharedClock;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Daily limits for one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub requests_per_day: u64,
    pub tokens_per_day: u64,
}

/// Limits applied to models with no explicit entry
pub const FALLBACK_LIMITS: BudgetLimits = BudgetLimits {
    requests_per_day: 1_000,
    tokens_per_day: 1_000_000,
};

impl Default for BudgetLimits {
    fn default() -> Self {
        FALLBACK_LIMITS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
    Exceeded,
}

impl AlertLevel {
    pub fn threshold(&self) -> f64 {
        match self {
            AlertLevel::Warning => 0.80,
            AlertLevel::Critical => 0.90,
            AlertLevel::Exceeded => 1.00,
        }
    }

    /// Highest level reached by a usage fraction
    pub fn from_fraction(fraction: f64) -> Option<AlertLevel> {
        [AlertLevel::Exceeded, AlertLevel::Critical, AlertLevel::Warning]
            .into_iter()
            .find(|level| fraction >= level.threshold())
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
            AlertLevel::Exceeded => "exceeded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMetric {
    Requests,
    Tokens,
}

/// One threshold crossing
#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    pub model: String,
    pub metric: BudgetMetric,
    pub level: AlertLevel,
    pub fraction: f64,
    pub used: u64,
    pub limit: u64,
    pub date: NaiveDate,
}

/// Destination for budget alerts
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: &BudgetAlert);
}

/// Alerts as log events
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(&self, alert: &BudgetAlert) {
        match alert.level {
            AlertLevel::Exceeded => error!(
                model = %alert.model,
                metric = ?alert.metric,
                used = alert.used,
                limit = alert.limit,
                "Daily budget exceeded"
            ),
            level => warn!(
                model = %alert.model,
                metric = ?alert.metric,
                level = %level,
                fraction = alert.fraction,
                used = alert.used,
                limit = alert.limit,
                "Daily budget threshold crossed"
            ),
        }
    }
}

/// Keeps alerts in memory
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<BudgetAlert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<BudgetAlert> {
        self.alerts.lock().clone()
    }
}

impl AlertSink for MemoryAlertSink {
    fn emit(&self, alert: &BudgetAlert) {
        self.alerts.lock().push(alert.clone());
    }
}

/// Result of a budget check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetCheck {
    pub ok: bool,
    pub reason: Option<String>,
}

impl BudgetCheck {
    fn allowed() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    fn denied(reason: String) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }
}

/// Usage of one model today
#[derive(Debug, Clone, Serialize)]
pub struct ModelUsage {
    pub model: String,
    pub requests: u64,
    pub tokens: u64,
    pub limits: BudgetLimits,
    /// Fraction against the stricter of the two limits
    pub fraction: f64,
    pub level: Option<AlertLevel>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    requests: u64,
    tokens: u64,
}

#[derive(Debug)]
struct Ledger {
    date: NaiveDate,
    usage: HashMap<String, Counters>,
    alerted: HashSet<(String, BudgetMetric, AlertLevel)>,
}

/// Process-wide budget tracker
pub struct BudgetTracker {
    limits: HashMap<String, BudgetLimits>,
    fallback: BudgetLimits,
    clock: SharedClock,
    sink: Arc<dyn AlertSink>,
    ledger: Mutex<Ledger>,
}

impl BudgetTracker {
    pub fn new(clock: SharedClock) -> Self {
        let today = clock.today();
        Self {
            limits: HashMap::new(),
            fallback: FALLBACK_LIMITS,
            clock,
            sink: Arc::new(TracingAlertSink),
            ledger: Mutex::new(Ledger {
                date: today,
                usage: HashMap::new(),
                alerted: HashSet::new(),
            }),
        }
    }

    pub fn with_limits(mut self, limits: HashMap<String, BudgetLimits>) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_limit(mut self, model: impl Into<String>, limits: BudgetLimits) -> Self {
        self.limits.insert(model.into(), limits);
        self
    }

    pub fn with_fallback(mut self, fallback: BudgetLimits) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn limits_for(&self, model: &str) -> BudgetLimits {
        self.limits.get(model).copied().unwrap_or(self.fallback)
    }

    /// Whether `model` still has budget today
    pub fn check(&self, model: &str) -> BudgetCheck {
        let limits = self.limits_for(model);
        let counters = {
            let mut ledger = self.ledger.lock();
            self.roll_if_needed(&mut ledger);
            ledger.usage.get(model).copied().unwrap_or_default()
        };

        if counters.requests >= limits.requests_per_day {
            BudgetCheck::denied(format!(
                "daily request limit reached for {} ({}/{})",
                model, counters.requests, limits.requests_per_day
            ))
        } else if counters.tokens >= limits.tokens_per_day {
            BudgetCheck::denied(format!(
                "daily token limit reached for {} ({}/{})",
                model, counters.tokens, limits.tokens_per_day
            ))
        } else {
            BudgetCheck::allowed()
        }
    }

    /// Count one request and `tokens` tokens against `model`
    pub fn record(&self, model: &str, tokens: u64) {
        let limits = self.limits_for(model);
        let alert = {
            let mut ledger = self.ledger.lock();
            self.roll_if_needed(&mut ledger);
            let date = ledger.date;

            let counters = ledger.usage.entry(model.to_string()).or_default();
            counters.requests += 1;
            counters.tokens += tokens;
            let counters = *counters;

            let (metric, fraction, used, limit) = stricter(counters, limits);
            match AlertLevel::from_fraction(fraction) {
                Some(level) if ledger.alerted.insert((model.to_string(), metric, level)) => {
                    Some(BudgetAlert {
                        model: model.to_string(),
                        metric,
                        level,
                        fraction,
                        used,
                        limit,
                        date,
                    })
                }
                _ => None,
            }
        };

        if let Some(alert) = alert {
            self.sink.emit(&alert);
        }
    }

    /// Requests counted for `model` today
    pub fn requests_today(&self, model: &str) -> u64 {
        self.usage(model).requests
    }

    pub fn usage(&self, model: &str) -> ModelUsage {
        let limits = self.limits_for(model);
        let counters = {
            let mut ledger = self.ledger.lock();
            self.roll_if_needed(&mut ledger);
            ledger.usage.get(model).copied().unwrap_or_default()
        };
        let (_, fraction, _, _) = stricter(counters, limits);
        ModelUsage {
            model: model.to_string(),
            requests: counters.requests,
            tokens: counters.tokens,
            limits,
            fraction,
            level: AlertLevel::from_fraction(fraction),
        }
    }

    /// Usage of every model seen today, sorted by model id
    pub fn report(&self) -> Vec<ModelUsage> {
        let mut models: Vec<String> = {
            let mut ledger = self.ledger.lock();
            self.roll_if_needed(&mut ledger);
            ledger.usage.keys().cloned().collect()
        };
        models.sort();
        models.iter().map(|m| self.usage(m)).collect()
    }

    fn roll_if_needed(&self, ledger: &mut Ledger) {
        let today = self.clock.today();
        if ledger.date != today {
            info!(from = %ledger.date, to = %today, "Daily budget counters reset");
            ledger.date = today;
            ledger.usage.clear();
            ledger.alerted.clear();
        }
    }
}

impl fmt::Debug for BudgetTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetTracker")
            .field("limits", &self.limits)
            .field("fallback", &self.fallback)
            .finish()
    }
}

/// The metric closest to its limit, with its fraction, usage and limit
fn stricter(counters: Counters, limits: BudgetLimits) -> (BudgetMetric, f64, u64, u64) {
    let req = fraction(counters.requests, limits.requests_per_day);
    let tok = fraction(counters.tokens, limits.tokens_per_day);
    if tok > req {
        (BudgetMetric::Tokens, tok, counters.tokens, limits.tokens_per_day)
    } else {
        (BudgetMetric::Requests, req, counters.requests, limits.requests_per_day)
    }
}

fn fraction(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        1.0
    } else {
        used as f64 / limit as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Local, TimeZone};
    use std::time::Duration;

    fn tracker(limits: BudgetLimits) -> (Arc<ManualClock>, Arc<MemoryAlertSink>, BudgetTracker) {
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let sink = Arc::new(MemoryAlertSink::new());
        let tracker = BudgetTracker::new(clock.clone())
            .with_limit("m", limits)
            .with_sink(sink.clone());
        (clock, sink, tracker)
    }

    #[test]
    fn test_level_from_fraction() {
        assert_eq!(AlertLevel::from_fraction(0.79), None);
        assert_eq!(AlertLevel::from_fraction(0.80), Some(AlertLevel::Warning));
        assert_eq!(AlertLevel::from_fraction(0.95), Some(AlertLevel::Critical));
        assert_eq!(AlertLevel::from_fraction(1.2), Some(AlertLevel::Exceeded));
    }

    #[test]
    fn test_check_blocks_at_request_limit() {
        let (_clock, _sink, tracker) = tracker(BudgetLimits {
            requests_per_day: 10,
            tokens_per_day: 1_000_000,
        });
        for _ in 0..9 {
            tracker.record("m", 10);
        }
        assert!(tracker.check("m").ok);
        tracker.record("m", 10);
        let check = tracker.check("m");
        assert!(!check.ok);
        assert!(check.reason.unwrap().contains("request limit"));
    }

    #[test]
    fn test_check_blocks_at_token_limit() {
        let (_clock, _sink, tracker) = tracker(BudgetLimits {
            requests_per_day: 100,
            tokens_per_day: 500,
        });
        tracker.record("m", 500);
        assert!(!tracker.check("m").ok);
    }

    #[test]
    fn test_alerts_deduplicated_per_level() {
        let (_clock, sink, tracker) = tracker(BudgetLimits {
            requests_per_day: 10,
            tokens_per_day: 1_000_000,
        });
        for _ in 0..12 {
            tracker.record("m", 1);
        }
        let levels: Vec<AlertLevel> = sink.alerts().iter().map(|a| a.level).collect();
        assert_eq!(
            levels,
            vec![AlertLevel::Warning, AlertLevel::Critical, AlertLevel::Exceeded]
        );
        assert!(sink.alerts().iter().all(|a| a.metric == BudgetMetric::Requests));
    }

    #[test]
    fn test_stricter_metric_drives_alert() {
        let (_clock, sink, tracker) = tracker(BudgetLimits {
            requests_per_day: 100,
            tokens_per_day: 1_000,
        });
        tracker.record("m", 850);
        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, BudgetMetric::Tokens);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
    }

    #[test]
    fn test_midnight_resets_counters_and_alerts() {
        let (clock, sink, tracker) = tracker(BudgetLimits {
            requests_per_day: 10,
            tokens_per_day: 1_000_000,
        });
        for _ in 0..10 {
            tracker.record("m", 1);
        }
        assert!(!tracker.check("m").ok);

        clock.advance(Duration::from_secs(12 * 3600));
        assert!(tracker.check("m").ok);
        assert_eq!(tracker.requests_today("m"), 0);

        for _ in 0..8 {
            tracker.record("m", 1);
        }
        assert_eq!(sink.alerts().len(), 4);
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let (_clock, _sink, tracker) = tracker(BudgetLimits {
            requests_per_day: 1,
            tokens_per_day: 1,
        });
        assert_eq!(tracker.limits_for("other"), FALLBACK_LIMITS);
        tracker.record("other", 5);
        let report = tracker.report();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].model, "other");
        assert_eq!(report[0].tokens, 5);
    }
}
