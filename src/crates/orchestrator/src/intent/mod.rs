//! Fast intent signals
//!
//! Decides whether a message asks for image generation without a network
//! call whenever possible:
//!
//! 1. `/image` prefix or an explicit request mode settles the question.
//! 2. Keyword rules produce a score in `[0, 1]` ([`rules`]).
//! 3. Scores inside the gray zone `(0.35, 0.75)` go to the fast classifier
//!    role when that feature is on. Verdicts are cached per normalized
//!    message; timeouts and unparseable replies count as "not an image" and
//!    are not cached.

pub mod cache;
pub mod rules;

pub use cache::IntentCache;
pub use rules::RuleScore;

use crate::clock::SharedClock;
use crate::governance::ModelRole;
use crate::invoker::{Generator, InvokeOptions};
use crate::planner::parser::extract_json;
use llm::ChatMessage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tooling::with_timeout;
use tracing::{debug, info};

pub const IMAGE_PREFIX: &str = "/image";
pub const GRAY_ZONE_LOW: f32 = 0.35;
pub const GRAY_ZONE_HIGH: f32 = 0.75;

const CLASSIFIER_PROMPT: &str = "You classify chat messages. Decide whether the user is asking you to \
generate or draw a new image. Reply with strict JSON only: {\"image\": true} or {\"image\": false}.";

/// Mode flag sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    Text,
    Image,
}

/// Where the verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Prefix,
    Mode,
    Rules,
    StopPhrase,
    Classifier,
    Cache,
    /// Classifier timed out or replied with garbage
    ClassifierFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentSignal {
    pub is_image: bool,
    pub score: f32,
    pub source: SignalSource,
    /// Message with any `/image` prefix removed
    pub message: String,
}

#[derive(Deserialize)]
struct ClassifierVerdict {
    #[serde(alias = "is_image")]
    image: bool,
}

pub struct IntentAnalyzer {
    generator: Arc<dyn Generator>,
    cache: IntentCache,
    gray_classifier: bool,
    classifier_timeout: Duration,
}

impl IntentAnalyzer {
    pub fn new(generator: Arc<dyn Generator>, clock: SharedClock) -> Self {
        Self {
            generator,
            cache: IntentCache::new(clock),
            gray_classifier: true,
            classifier_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_gray_classifier(mut self, enabled: bool) -> Self {
        self.gray_classifier = enabled;
        self
    }

    pub fn with_cache(mut self, cache: IntentCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &IntentCache {
        &self.cache
    }

    pub async fn analyze(&self, message: &str, mode: Option<RequestMode>) -> IntentSignal {
        let trimmed = message.trim_start();
        if let Some(rest) = strip_image_prefix(trimmed) {
            return IntentSignal {
                is_image: true,
                score: 1.0,
                source: SignalSource::Prefix,
                message: rest.trim().to_string(),
            };
        }

        if let Some(mode) = mode {
            return IntentSignal {
                is_image: mode == RequestMode::Image,
                score: if mode == RequestMode::Image { 1.0 } else { 0.0 },
                source: SignalSource::Mode,
                message: message.to_string(),
            };
        }

        let rules = rules::score(message);
        let signal = |is_image: bool, source: SignalSource| IntentSignal {
            is_image,
            score: rules.score,
            source,
            message: message.to_string(),
        };

        if rules.stop_phrase {
            return signal(false, SignalSource::StopPhrase);
        }
        let in_gray_zone = rules.score > GRAY_ZONE_LOW && rules.score < GRAY_ZONE_HIGH;
        if !in_gray_zone || !self.gray_classifier {
            return signal(rules.score >= GRAY_ZONE_HIGH, SignalSource::Rules);
        }

        if let Some(cached) = self.cache.get(message) {
            debug!(is_image = cached, "Intent cache hit");
            return signal(cached, SignalSource::Cache);
        }

        match self.classify(message).await {
            Some(is_image) => {
                self.cache.insert(message, is_image);
                info!(score = rules.score, is_image, "Gray-zone message classified");
                signal(is_image, SignalSource::Classifier)
            }
            None => signal(false, SignalSource::ClassifierFailed),
        }
    }

    async fn classify(&self, message: &str) -> Option<bool> {
        let messages = vec![ChatMessage::system(CLASSIFIER_PROMPT), ChatMessage::user(message)];
        let options = InvokeOptions::json()
            .with_temperature(0.0)
            .with_max_tokens(16)
            .with_timeout(self.classifier_timeout);

        let call = async {
            Ok::<_, ()>(
                self.generator
                    .generate(ModelRole::Classifier, messages, "intent", options)
                    .await,
            )
        };
        let outcome = match with_timeout(self.classifier_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!("Intent classifier timed out");
                return None;
            }
        };
        if !outcome.ok {
            debug!(error = ?outcome.error, "Intent classifier failed");
            return None;
        }

        let verdict = extract_json(&outcome.text)
            .and_then(|json| serde_json::from_str::<ClassifierVerdict>(json).ok());
        if verdict.is_none() {
            debug!(reply = %outcome.text, "Unparseable classifier reply");
        }
        verdict.map(|v| v.image)
    }
}

fn strip_image_prefix(message: &str) -> Option<&str> {
    let rest = message.strip_prefix(IMAGE_PREFIX)?;
    (rest.is_empty() || rest.starts_with(char::is_whitespace)).then_some(rest)
}

impl std::fmt::Debug for IntentAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentAnalyzer")
            .field("gray_classifier", &self.gray_classifier)
            .field("classifier_timeout", &self.classifier_timeout)
            .finish()
    }
}
