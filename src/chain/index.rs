//! Tag inverted index: tag -> session-id set.
//!
//! `auto_relate` must stay bounded by the sessions that actually share a tag,
//! never by total history, so relation discovery goes through this index
//! rather than a directory scan.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainIndex {
    tags: BTreeMap<String, BTreeSet<String>>,
}

impl ChainIndex {
    /// Record that a session carries a tag. Idempotent.
    pub fn insert(&mut self, tag: &str, session_id: &str) {
        self.tags
            .entry(tag.to_string())
            .or_default()
            .insert(session_id.to_string());
    }

    pub fn sessions_with_tag(&self, tag: &str) -> Option<&BTreeSet<String>> {
        self.tags.get(tag)
    }

    /// For each other session sharing at least one of `tags`, how many it
    /// shares. Only touches the index buckets for the given tags.
    pub fn shared_tag_counts(
        &self,
        tags: &BTreeSet<String>,
        exclude: &str,
    ) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for tag in tags {
            if let Some(sessions) = self.tags.get(tag) {
                for id in sessions {
                    if id != exclude {
                        *counts.entry(id.clone()).or_insert(0) += 1;
                    }
                }
            }
        }
        counts
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }
}
