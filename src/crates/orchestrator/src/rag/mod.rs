//! Retrieval-augmented context gate
//!
//! Decides whether document evidence may condition the final generation.
//! The gate is conservative: a weak best score, an ambiguous margin or a
//! top passage sharing no content word with the query all produce a
//! negative outcome, and negatives never carry evidence.
//!
//! Every call to [`RagGate::evaluate`] writes exactly one telemetry record.

pub mod evidence;
pub mod index;
pub mod lexical;
pub mod pins;
pub mod telemetry;

pub use evidence::{EvidenceBlock, EvidenceItem, EVIDENCE_GUARD};
pub use index::{DocumentIndex, RagCandidate, ScoreType, SearchFilter, SearchMode, SearchQuery};
pub use pins::{Pin, PinOutcome, PinStore};
pub use telemetry::{
    GateLatencies, GateTelemetry, JsonlTelemetrySink, MemoryTelemetrySink, TelemetrySink, TracingTelemetrySink,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tooling::logging::elapsed_ms;
use tooling::serialization::message_key;
use tooling::with_timeout;
use tracing::{debug, info, warn};

/// Marker recorded when the gate found nothing usable
pub const NO_EVIDENCE_MARKER: &str = "[no evidence found]";

/// Note given to the generator after a negative gate outcome
pub const NO_EVIDENCE_NOTE: &str = "No relevant passages were found in the user's documents for this request. \
Answer from general knowledge and mention that the documents did not cover it.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatingResult {
    Pass,
    /// Best score worse than the threshold
    Threshold,
    /// Best and second-best too close to call
    Margin,
    /// Top passage shares no content word with the query
    LexicalSanity,
    /// No candidates, or the index failed
    Empty,
    /// Code question; retrieval skipped
    Bypass,
}

impl GatingResult {
    pub fn is_negative(&self) -> bool {
        !matches!(self, GatingResult::Pass | GatingResult::Bypass)
    }
}

/// Gate thresholds and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub search_limit: usize,
    pub dense_threshold: f64,
    pub dense_margin: f64,
    pub hybrid_threshold: f64,
    pub hybrid_margin: f64,
    /// Document-level margin that pins a document to the conversation
    pub pin_margin: f64,
    /// Pages after the last shown page searched in continue mode
    pub continue_pages: u32,
    /// Documents kept by the deep-mode seed search
    pub deep_seed_documents: usize,
    /// Top candidates whose neighbors are expanded
    pub neighbor_expansion_top: usize,
    pub neighbor_radius: u32,
    /// Set from the `timeouts.retrieval` setting
    #[serde(skip)]
    pub retrieval_timeout: Duration,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            search_limit: 60,
            dense_threshold: 0.50,
            dense_margin: 0.08,
            hybrid_threshold: 0.75,
            hybrid_margin: 0.05,
            pin_margin: 0.08,
            continue_pages: 5,
            deep_seed_documents: 3,
            neighbor_expansion_top: 2,
            neighbor_radius: 1,
            retrieval_timeout: Duration::from_secs(5),
        }
    }
}

impl RagConfig {
    fn limits_for(&self, score_type: ScoreType) -> (f64, f64) {
        match score_type {
            ScoreType::Dense => (self.dense_threshold, self.dense_margin),
            ScoreType::Hybrid => (self.hybrid_threshold, self.hybrid_margin),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateRequest {
    pub query: String,
    pub owner: String,
    pub scope: String,
    pub conversation_id: Option<String>,
    pub continue_mode: bool,
    pub mode: SearchMode,
}

impl GateRequest {
    pub fn new(query: impl Into<String>, owner: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            owner: owner.into(),
            scope: scope.into(),
            conversation_id: None,
            continue_mode: false,
            mode: SearchMode::Standard,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_continue_mode(mut self, continue_mode: bool) -> Self {
        self.continue_mode = continue_mode;
        self
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateDecision {
    pub gating_result: GatingResult,
    /// Present only on `Pass`
    pub evidence: Option<EvidenceBlock>,
    /// [`NO_EVIDENCE_MARKER`] on negative outcomes
    pub marker: Option<&'static str>,
    pub telemetry: GateTelemetry,
}

impl GateDecision {
    pub fn passed(&self) -> bool {
        self.gating_result == GatingResult::Pass && self.evidence.is_some()
    }

    /// Text to attach to the final generation prompt, if any
    pub fn prompt_block(&self) -> Option<String> {
        match (&self.evidence, self.gating_result) {
            (Some(evidence), GatingResult::Pass) => Some(evidence.render()),
            (_, result) if result.is_negative() => Some(NO_EVIDENCE_NOTE.to_string()),
            _ => None,
        }
    }
}

/// Scores gathered while gating, used for telemetry
#[derive(Debug, Default)]
struct Scores {
    best: Option<f64>,
    second: Option<f64>,
    score_type: Option<ScoreType>,
    lexical_sanity: Option<bool>,
    candidates: usize,
    search_ms: u64,
}

pub struct RagGate {
    index: Arc<dyn DocumentIndex>,
    pins: Arc<PinStore>,
    telemetry: Arc<dyn TelemetrySink>,
    config: RagConfig,
}

impl RagGate {
    pub fn new(index: Arc<dyn DocumentIndex>, pins: Arc<PinStore>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            index,
            pins,
            telemetry,
            config: RagConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RagConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn pins(&self) -> &Arc<PinStore> {
        &self.pins
    }

    pub async fn evaluate(&self, request: &GateRequest) -> GateDecision {
        let started = Instant::now();

        if lexical::is_code_query(&request.query) {
            debug!("Code query, retrieval bypassed");
            return self.finish(request, GatingResult::Bypass, None, Scores::default(), started);
        }

        let pin = request
            .conversation_id
            .as_deref()
            .and_then(|c| self.pins.active(c));

        let mut filter = SearchFilter::default();
        if let Some(pin) = &pin {
            filter.upload_ids = Some(vec![pin.upload_id.clone()]);
            if request.continue_mode {
                filter.page_range = Some((pin.last_page + 1, pin.last_page + self.config.continue_pages));
            }
        }

        let mut scores = Scores::default();
        let search_started = Instant::now();

        if request.mode == SearchMode::Deep && pin.is_none() {
            let seed = self.search(request, SearchFilter::default()).await;
            let seeded = top_documents(seed.as_deref().unwrap_or(&[]), self.config.deep_seed_documents);
            if !seeded.is_empty() {
                debug!(documents = ?seeded, "Deep search seeded");
                filter.upload_ids = Some(seeded);
            }
        }

        let candidates = match self.search(request, filter).await {
            Some(mut candidates) => {
                candidates.sort_by(|a, b| a.gate_score().total_cmp(&b.gate_score()));
                candidates
            }
            None => Vec::new(),
        };
        scores.search_ms = elapsed_ms(search_started);
        scores.candidates = candidates.len();

        let Some(best) = candidates.first() else {
            return self.finish(request, GatingResult::Empty, None, scores, started);
        };
        let score_type = best.score_type;
        let best_score = best.gate_score();
        let second_score = candidates.get(1).map(RagCandidate::gate_score);
        scores.best = Some(best_score);
        scores.second = second_score;
        scores.score_type = Some(score_type);

        let (threshold, margin_limit) = self.config.limits_for(score_type);
        if best_score > threshold {
            return self.finish(request, GatingResult::Threshold, None, scores, started);
        }
        if let Some(second) = second_score {
            if second - best_score < margin_limit {
                return self.finish(request, GatingResult::Margin, None, scores, started);
            }
        }

        let sane = lexical::lexical_sanity(&request.query, &best.text);
        scores.lexical_sanity = Some(sane);
        if !sane {
            return self.finish(request, GatingResult::LexicalSanity, None, scores, started);
        }

        let top: Vec<RagCandidate> = candidates.iter().take(evidence::MAX_ITEMS).cloned().collect();
        let neighbors = self.expand(request, &top).await;
        let block = evidence::compose(&top, &neighbors);
        if block.is_empty() {
            return self.finish(request, GatingResult::Empty, None, scores, started);
        }

        if let Some(conversation_id) = &request.conversation_id {
            self.update_pin(conversation_id, pin.as_ref(), &candidates, &block);
        }

        self.finish(request, GatingResult::Pass, Some(block), scores, started)
    }

    /// Search with the retrieval timeout; `None` on error or timeout
    async fn search(&self, request: &GateRequest, filter: SearchFilter) -> Option<Vec<RagCandidate>> {
        let query = SearchQuery {
            query: request.query.clone(),
            owner: request.owner.clone(),
            scope: request.scope.clone(),
            limit: self.config.search_limit,
            mode: request.mode,
            conversation_id: request.conversation_id.clone(),
            continue_mode: request.continue_mode,
            filter,
        };
        match with_timeout(self.config.retrieval_timeout, self.index.search(&query)).await {
            Ok(candidates) => Some(candidates),
            Err(e) => {
                warn!(owner = %request.owner, error = %e, "Document search failed");
                None
            }
        }
    }

    async fn expand(&self, request: &GateRequest, top: &[RagCandidate]) -> HashMap<usize, Vec<RagCandidate>> {
        let mut neighbors = HashMap::new();
        for (position, candidate) in top.iter().take(self.config.neighbor_expansion_top).enumerate() {
            let call = self.index.expand_neighbors(
                &request.owner,
                &request.scope,
                &candidate.filename,
                candidate.page_number,
                candidate.chunk_index,
                self.config.neighbor_radius,
            );
            match with_timeout(self.config.retrieval_timeout, call).await {
                Ok(found) => {
                    neighbors.insert(position, found);
                }
                Err(e) => debug!(filename = %candidate.filename, error = %e, "Neighbor expansion skipped"),
            }
        }
        neighbors
    }

    fn update_pin(
        &self,
        conversation_id: &str,
        current: Option<&Pin>,
        candidates: &[RagCandidate],
        block: &EvidenceBlock,
    ) {
        if let Some(pin) = current {
            let page = block.last_page(&pin.upload_id).unwrap_or(pin.last_page);
            self.pins.pin(conversation_id, &pin.upload_id, page.max(pin.last_page));
            return;
        }

        let ranked = document_scores(candidates);
        let Some((top_doc, top_score)) = ranked.first() else {
            return;
        };
        let confident = match ranked.get(1) {
            Some((_, second)) => second - top_score > self.config.pin_margin,
            None => true,
        };
        if confident {
            let page = block.last_page(top_doc).unwrap_or(0);
            let outcome = self.pins.pin(conversation_id, top_doc, page);
            info!(conversation = conversation_id, upload_id = %top_doc, outcome = ?outcome, "Conversation pinned");
        }
    }

    fn finish(
        &self,
        request: &GateRequest,
        result: GatingResult,
        evidence: Option<EvidenceBlock>,
        scores: Scores,
        started: Instant,
    ) -> GateDecision {
        let marker = result.is_negative().then_some(NO_EVIDENCE_MARKER);
        let telemetry = GateTelemetry {
            timestamp: Utc::now(),
            query_hash: message_key(&request.query),
            owner: request.owner.clone(),
            scope: request.scope.clone(),
            gating_result: result,
            best_score: scores.best,
            second_score: scores.second,
            best_score_type: scores.score_type,
            marker_written: marker.is_some(),
            bypass_used: result == GatingResult::Bypass,
            lexical_sanity_pass: scores.lexical_sanity,
            candidates: scores.candidates,
            evidence_items: evidence.as_ref().map_or(0, |e| e.items.len()),
            latencies: GateLatencies {
                search_ms: scores.search_ms,
                total_ms: elapsed_ms(started),
            },
        };
        self.telemetry.record(&telemetry);

        GateDecision {
            gating_result: result,
            evidence,
            marker,
            telemetry,
        }
    }
}

/// First `k` distinct documents in score order
fn top_documents(candidates: &[RagCandidate], k: usize) -> Vec<String> {
    let mut sorted: Vec<&RagCandidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| a.gate_score().total_cmp(&b.gate_score()));
    let mut seen = HashSet::new();
    sorted
        .into_iter()
        .filter(|c| seen.insert(c.upload_id.clone()))
        .take(k)
        .map(|c| c.upload_id.clone())
        .collect()
}

/// Best score per document, best first
fn document_scores(candidates: &[RagCandidate]) -> Vec<(String, f64)> {
    let mut best: Vec<(String, f64)> = Vec::new();
    for c in candidates {
        match best.iter_mut().find(|(id, _)| *id == c.upload_id) {
            Some((_, score)) => *score = score.min(c.gate_score()),
            None => best.push((c.upload_id.clone(), c.gate_score())),
        }
    }
    best.sort_by(|a, b| a.1.total_cmp(&b.1));
    best
}

impl std::fmt::Debug for RagGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagGate").field("config", &self.config).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::{OrchestratorError, Result};
    use async_trait::async_trait;
    use chrono::{Local, TimeZone};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct ScriptedIndex {
        results: Vec<RagCandidate>,
        fail: bool,
        queries: Mutex<Vec<SearchQuery>>,
    }

    #[async_trait]
    impl DocumentIndex for ScriptedIndex {
        async fn search(&self, query: &SearchQuery) -> Result<Vec<RagCandidate>> {
            self.queries.lock().push(query.clone());
            if self.fail {
                return Err(OrchestratorError::Retrieval("index offline".to_string()));
            }
            Ok(self
                .results
                .iter()
                .filter(|c| {
                    query
                        .filter
                        .upload_ids
                        .as_ref()
                        .map_or(true, |ids| ids.contains(&c.upload_id))
                })
                .filter(|c| {
                    query
                        .filter
                        .page_range
                        .map_or(true, |(lo, hi)| (lo..=hi).contains(&c.page_number))
                })
                .cloned()
                .collect())
        }

        async fn expand_neighbors(
            &self,
            _owner: &str,
            _scope: &str,
            _filename: &str,
            _page_number: u32,
            _chunk_index: u32,
            _radius: u32,
        ) -> Result<Vec<RagCandidate>> {
            Ok(Vec::new())
        }
    }

    fn gate(index: ScriptedIndex) -> (Arc<ScriptedIndex>, Arc<MemoryTelemetrySink>, RagGate) {
        let clock = Arc::new(ManualClock::new(Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()));
        let index = Arc::new(index);
        let sink = Arc::new(MemoryTelemetrySink::new());
        let gate = RagGate::new(index.clone(), Arc::new(PinStore::new(clock)), sink.clone());
        (index, sink, gate)
    }

    fn doc(upload: &str, page: u32, chunk: u32, score: f64, text: &str) -> RagCandidate {
        RagCandidate::dense(upload, format!("{}.pdf", upload), page, chunk, score, text)
    }

    #[tokio::test]
    async fn test_code_query_bypasses_search() {
        let (index, sink, gate) = gate(ScriptedIndex::default());
        let decision = gate.evaluate(&GateRequest::new("def foo(): pass", "u1", "default")).await;
        assert_eq!(decision.gating_result, GatingResult::Bypass);
        assert!(decision.prompt_block().is_none());
        assert!(decision.telemetry.bypass_used);
        assert!(index.queries.lock().is_empty());
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_index_error_is_empty() {
        let (_index, sink, gate) = gate(ScriptedIndex {
            fail: true,
            ..Default::default()
        });
        let decision = gate.evaluate(&GateRequest::new("termination notice", "u1", "default")).await;
        assert_eq!(decision.gating_result, GatingResult::Empty);
        assert_eq!(decision.marker, Some(NO_EVIDENCE_MARKER));
        assert_eq!(decision.prompt_block().as_deref(), Some(NO_EVIDENCE_NOTE));
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_margin_rejects_close_scores() {
        let (_index, _sink, gate) = gate(ScriptedIndex {
            results: vec![
                doc("a", 1, 0, 0.30, "termination notice is 30 days"),
                doc("b", 1, 0, 0.33, "termination fee applies"),
            ],
            ..Default::default()
        });
        let decision = gate.evaluate(&GateRequest::new("termination notice", "u1", "default")).await;
        assert_eq!(decision.gating_result, GatingResult::Margin);
        assert!(decision.evidence.is_none());
    }

    #[tokio::test]
    async fn test_hybrid_thresholds() {
        let (_index, _sink, gate) = gate(ScriptedIndex {
            results: vec![
                doc("a", 1, 0, 0.9, "termination notice is 30 days").with_hybrid_score(0.70),
                doc("b", 1, 0, 0.9, "unrelated").with_hybrid_score(0.76),
            ],
            ..Default::default()
        });
        let decision = gate.evaluate(&GateRequest::new("termination notice", "u1", "default")).await;
        // 0.70 passes the hybrid threshold, and the 0.06 margin clears 0.05
        assert_eq!(decision.gating_result, GatingResult::Pass);
        assert_eq!(decision.telemetry.best_score_type, Some(ScoreType::Hybrid));
    }

    #[tokio::test]
    async fn test_lexical_sanity_rejects() {
        let (_index, sink, gate) = gate(ScriptedIndex {
            results: vec![doc("a", 1, 0, 0.2, "Quarterly revenue grew by 12%.")],
            ..Default::default()
        });
        let decision = gate.evaluate(&GateRequest::new("termination notice", "u1", "default")).await;
        assert_eq!(decision.gating_result, GatingResult::LexicalSanity);
        assert_eq!(sink.records()[0].lexical_sanity_pass, Some(false));
    }

    #[tokio::test]
    async fn test_pass_pins_confident_document() {
        let (index, _sink, gate) = gate(ScriptedIndex {
            results: vec![
                doc("a", 3, 0, 0.20, "termination notice is 30 days"),
                doc("b", 1, 0, 0.45, "termination fee"),
                doc("a", 4, 1, 0.30, "notice must be written"),
            ],
            ..Default::default()
        });
        let request = GateRequest::new("termination notice", "u1", "default").with_conversation("c1");

        let decision = gate.evaluate(&request).await;
        assert!(decision.passed());
        let pin = gate.pins().active("c1").unwrap();
        assert_eq!(pin.upload_id, "a");
        assert_eq!(pin.last_page, 4);

        // Next turn in continue mode searches pages 5..=9 of the pinned document
        let decision = gate.evaluate(&request.clone().with_continue_mode(true)).await;
        let queries = index.queries.lock();
        let last = queries.last().unwrap();
        assert_eq!(last.filter.upload_ids, Some(vec!["a".to_string()]));
        assert_eq!(last.filter.page_range, Some((5, 9)));
        assert_eq!(decision.gating_result, GatingResult::Empty);
    }

    #[tokio::test]
    async fn test_deep_mode_seeds_documents() {
        let (index, _sink, gate) = gate(ScriptedIndex {
            results: vec![
                doc("a", 1, 0, 0.10, "termination notice"),
                doc("b", 1, 0, 0.20, "termination"),
                doc("c", 1, 0, 0.30, "termination"),
                doc("d", 1, 0, 0.40, "termination"),
            ],
            ..Default::default()
        });
        gate.evaluate(&GateRequest::new("termination notice", "u1", "default").with_mode(SearchMode::Deep))
            .await;

        let queries = index.queries.lock();
        assert_eq!(queries.len(), 2);
        assert!(queries[0].filter.upload_ids.is_none());
        assert_eq!(
            queries[1].filter.upload_ids,
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }
}
