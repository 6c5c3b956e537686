//! Multi-phase keyword extraction.

use super::tables::{CONTEXT_EXPANSIONS, EXTENSION_HINTS, SYNONYMS, TECH_VOCAB};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct EnrichedKeywords {
    pub keywords: BTreeSet<String>,
    /// One line per phase that contributed, for the match report.
    pub reasoning: Vec<String>,
}

/// Does the lowered prompt contain a term? Multi-word terms match as
/// phrases; single words match on word prefix so "deploy" covers
/// "deployment" without "ui" matching inside "guide".
pub fn has_term(lowered: &str, term: &str) -> bool {
    if term.contains(' ') {
        lowered.contains(term)
    } else {
        lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| !w.is_empty() && w.starts_with(term))
    }
}

/// Run all four enrichment phases over a prompt and return the union.
pub fn enrich(prompt: &str) -> EnrichedKeywords {
    let lowered = prompt.to_lowercase();
    let mut keywords: BTreeSet<String> = BTreeSet::new();
    let mut reasoning = Vec::new();

    // Phase 1: direct technology vocabulary
    let direct: Vec<&str> = TECH_VOCAB
        .iter()
        .filter(|term| has_term(&lowered, term))
        .copied()
        .collect();
    if !direct.is_empty() {
        reasoning.push(format!("vocabulary: {}", direct.join(", ")));
        keywords.extend(direct.iter().map(|s| s.to_string()));
    }

    // Phase 2: colloquial/alternate phrasing
    let mut via_synonyms = Vec::new();
    for (phrase, expansions) in SYNONYMS {
        if lowered.contains(phrase) {
            via_synonyms.push(*phrase);
            keywords.extend(expansions.iter().map(|s| s.to_string()));
        }
    }
    if !via_synonyms.is_empty() {
        reasoning.push(format!("synonyms: {}", via_synonyms.join(", ")));
    }

    // Phase 3: contextual enrichment over everything found so far
    let snapshot: Vec<String> = keywords.iter().cloned().collect();
    let mut injected = Vec::new();
    for (keyword, related) in CONTEXT_EXPANSIONS {
        if snapshot.iter().any(|k| k == keyword) {
            for r in *related {
                if keywords.insert(r.to_string()) {
                    injected.push(*r);
                }
            }
        }
    }
    if !injected.is_empty() {
        reasoning.push(format!("context: {}", injected.join(", ")));
    }

    // Phase 4: file extensions mentioned in the prompt
    let mut via_extensions = Vec::new();
    for (ext, hints) in EXTENSION_HINTS {
        if lowered.contains(ext) {
            via_extensions.push(*ext);
            keywords.extend(hints.iter().map(|s| s.to_string()));
        }
    }
    if !via_extensions.is_empty() {
        reasoning.push(format!("extensions: {}", via_extensions.join(", ")));
    }

    EnrichedKeywords {
        keywords,
        reasoning,
    }
}
