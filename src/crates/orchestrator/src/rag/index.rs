//! Document index seam.
//!
//! The index (embedding, chunking, storage) lives outside this crate; the
//! gate only needs candidate search and neighbor expansion.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How a candidate's score was computed; lower is better for both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreType {
    /// Embedding distance
    Dense,
    /// Blend of embedding distance and lexical rank
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagCandidate {
    pub text: String,
    pub filename: String,
    pub page_number: u32,
    pub chunk_index: u32,
    pub upload_id: String,
    /// Dense distance
    pub score: f64,
    #[serde(default)]
    pub hybrid_score: Option<f64>,
    pub score_type: ScoreType,
}

impl RagCandidate {
    pub fn dense(
        upload_id: impl Into<String>,
        filename: impl Into<String>,
        page_number: u32,
        chunk_index: u32,
        score: f64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            filename: filename.into(),
            page_number,
            chunk_index,
            upload_id: upload_id.into(),
            score,
            hybrid_score: None,
            score_type: ScoreType::Dense,
        }
    }

    pub fn with_hybrid_score(mut self, hybrid_score: f64) -> Self {
        self.hybrid_score = Some(hybrid_score);
        self.score_type = ScoreType::Hybrid;
        self
    }

    /// Score the gate compares against thresholds
    pub fn gate_score(&self) -> f64 {
        match self.score_type {
            ScoreType::Dense => self.score,
            ScoreType::Hybrid => self.hybrid_score.unwrap_or(self.score),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Standard,
    /// Seed search picks documents, then the main search runs inside them
    Deep,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchFilter {
    /// Restrict to these documents
    pub upload_ids: Option<Vec<String>>,
    /// Inclusive page range
    pub page_range: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    pub query: String,
    pub owner: String,
    pub scope: String,
    pub limit: usize,
    pub mode: SearchMode,
    pub conversation_id: Option<String>,
    pub continue_mode: bool,
    pub filter: SearchFilter,
}

#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<RagCandidate>>;

    /// Chunks within `radius` of `chunk_index` on the same page
    async fn expand_neighbors(
        &self,
        owner: &str,
        scope: &str,
        filename: &str,
        page_number: u32,
        chunk_index: u32,
        radius: u32,
    ) -> Result<Vec<RagCandidate>>;
}
