//! Bounded evidence block composition.

use super::index::RagCandidate;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub const MAX_ITEMS: usize = 8;
pub const MAX_ITEM_CHARS: usize = 650;
pub const MAX_TOTAL_CHARS: usize = 2500;
/// Smallest tail worth adding when the budget is nearly spent
const MIN_TAIL_CHARS: usize = 80;

/// Guard attached to every evidence block
pub const EVIDENCE_GUARD: &str = "Answer questions about the user's documents using only the evidence below. \
If the evidence does not contain the answer, say so instead of guessing.";

const EVIDENCE_HEADER: &str = "\n\nEvidence:\n";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    pub upload_id: String,
    pub filename: String,
    pub page_number: u32,
    pub chunk_index: u32,
    pub score: f64,
    pub text: String,
}

impl EvidenceItem {
    /// `[<filename> | p.<page>] <text>`
    pub fn line(&self) -> String {
        format!("[{} | p.{}] {}", self.filename, self.page_number, self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceBlock {
    pub items: Vec<EvidenceItem>,
    /// Characters of the rendered block, guard and header included
    pub total_chars: usize,
}

impl EvidenceBlock {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item lines only
    pub fn body(&self) -> String {
        self.items.iter().map(EvidenceItem::line).collect::<Vec<_>>().join("\n")
    }

    /// Guard sentence followed by the item lines
    pub fn render(&self) -> String {
        format!("{}{}{}", EVIDENCE_GUARD, EVIDENCE_HEADER, self.body())
    }

    /// Highest page used from a document
    pub fn last_page(&self, upload_id: &str) -> Option<u32> {
        self.items
            .iter()
            .filter(|i| i.upload_id == upload_id)
            .map(|i| i.page_number)
            .max()
    }
}

/// Cut `text` to at most `max` characters, preferring a word boundary
pub fn trim_chars(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let cut: String = text.chars().take(max - 1).collect();
    let cut = match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > cut.len() / 2 => cut[..pos].trim_end().to_string(),
        _ => cut,
    };
    format!("{}…", cut)
}

/// Anchor text grown with its neighbors while the item budget allows
///
/// Following chunks are appended first, then preceding chunks prepended.
fn expand_text(anchor: &RagCandidate, neighbors: &[RagCandidate], seen: &HashSet<String>) -> String {
    let mut text = anchor.text.trim().to_string();
    let fits = |text: &str, extra: &str| text.chars().count() + 1 + extra.chars().count() <= MAX_ITEM_CHARS;

    let mut after: Vec<&RagCandidate> = neighbors
        .iter()
        .filter(|n| n.chunk_index > anchor.chunk_index && n.page_number == anchor.page_number)
        .collect();
    after.sort_by_key(|n| n.chunk_index);
    for n in after {
        let extra = n.text.trim();
        if seen.contains(extra) || !fits(&text, extra) {
            break;
        }
        text = format!("{} {}", text, extra);
    }

    let mut before: Vec<&RagCandidate> = neighbors
        .iter()
        .filter(|n| n.chunk_index < anchor.chunk_index && n.page_number == anchor.page_number)
        .collect();
    before.sort_by_key(|n| std::cmp::Reverse(n.chunk_index));
    for n in before {
        let extra = n.text.trim();
        if seen.contains(extra) || !fits(&text, extra) {
            break;
        }
        text = format!("{} {}", extra, text);
    }
    text
}

/// Compose the evidence block from score-ordered candidates
///
/// `neighbors` maps a candidate's position to its expanded neighbors. The
/// character cap covers the whole rendered block, guard included.
pub fn compose(candidates: &[RagCandidate], neighbors: &HashMap<usize, Vec<RagCandidate>>) -> EvidenceBlock {
    let mut seen: HashSet<String> = HashSet::new();
    let mut items: Vec<EvidenceItem> = Vec::new();
    let mut total = EVIDENCE_GUARD.chars().count() + EVIDENCE_HEADER.chars().count();

    for (position, candidate) in candidates.iter().enumerate() {
        if items.len() >= MAX_ITEMS || total >= MAX_TOTAL_CHARS {
            break;
        }
        let own = candidate.text.trim();
        if own.is_empty() || !seen.insert(own.to_string()) {
            continue;
        }

        let text = match neighbors.get(&position) {
            Some(n) if !n.is_empty() => {
                let expanded = expand_text(candidate, n, &seen);
                for neighbor in n {
                    if expanded.contains(neighbor.text.trim()) {
                        seen.insert(neighbor.text.trim().to_string());
                    }
                }
                expanded
            }
            _ => own.to_string(),
        };

        let prefix_len = format!("[{} | p.{}] ", candidate.filename, candidate.page_number)
            .chars()
            .count();
        // Lines are joined with '\n'
        let separator = usize::from(!items.is_empty());
        let remaining = MAX_TOTAL_CHARS.saturating_sub(total + separator + prefix_len);
        let budget = remaining.min(MAX_ITEM_CHARS);
        if budget < MIN_TAIL_CHARS && text.chars().count() > budget {
            break;
        }

        let item = EvidenceItem {
            upload_id: candidate.upload_id.clone(),
            filename: candidate.filename.clone(),
            page_number: candidate.page_number,
            chunk_index: candidate.chunk_index,
            score: candidate.gate_score(),
            text: trim_chars(&text, budget),
        };
        total += separator + item.line().chars().count();
        items.push(item);
    }

    EvidenceBlock {
        items,
        total_chars: total,
    }
}
