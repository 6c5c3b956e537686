//! Capability matching: skills and agents recommended per prompt.
//!
//! Matching is deliberately multi-phase. Single-pass substring matching drops
//! intent the moment a user writes "panel not showing" instead of "CSS bug",
//! so extraction runs four phases - direct vocabulary, synonym expansion,
//! contextual enrichment, file-extension hints - and the union of all phases
//! feeds registry matching.

mod enrich;
mod registry;
mod tables;

pub use enrich::{enrich, EnrichedKeywords};
pub use registry::{CapabilityEntry, CapabilityKind, CapabilityRegistry};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A matched capability with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityMatch {
    pub name: String,
    pub kind: CapabilityKind,
    pub score: u32,
    pub matched_triggers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchReport {
    pub skills: Vec<CapabilityMatch>,
    pub agents: Vec<CapabilityMatch>,
    pub reasoning: Vec<String>,
}

impl MatchReport {
    /// The single best capability name, agents first.
    pub fn best(&self) -> Option<&str> {
        self.agents
            .first()
            .or_else(|| self.skills.first())
            .map(|m| m.name.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CapabilityMatcher {
    registry: CapabilityRegistry,
}

impl CapabilityMatcher {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self { registry }
    }

    /// Match a prompt against the registry.
    ///
    /// Agents are proposed only once `complexity` crosses their configured
    /// threshold; skills have no gate. When the matched agents span two or
    /// more domains, the registry's coordinator (if any) is ranked ahead of
    /// every single-domain specialist. Skill hits do not count toward that:
    /// enrichment routinely pulls in incidental skills (a "broken" phrasing
    /// matches the debugging skill), and an incidental skill is not a second
    /// workstream.
    pub fn match_prompt(&self, prompt: &str, complexity: u32) -> MatchReport {
        let enriched = enrich(prompt);
        let mut report = MatchReport {
            reasoning: enriched.reasoning.clone(),
            ..MatchReport::default()
        };

        let mut agent_domains: BTreeSet<&str> = BTreeSet::new();

        for entry in self.registry.entries() {
            if entry.coordinator {
                continue;
            }

            let matched: Vec<String> = entry
                .triggers
                .iter()
                .filter(|t| enriched.keywords.contains(t.as_str()))
                .cloned()
                .collect();
            if matched.is_empty() {
                continue;
            }

            let capability = CapabilityMatch {
                name: entry.name.clone(),
                kind: entry.kind,
                score: matched.len() as u32,
                matched_triggers: matched,
            };

            match entry.kind {
                CapabilityKind::Skill => {
                    report.skills.push(capability);
                }
                CapabilityKind::Agent => {
                    if complexity >= entry.complexity_threshold {
                        agent_domains.insert(entry.domain.as_str());
                        report.agents.push(capability);
                    } else {
                        report.reasoning.push(format!(
                            "agent '{}' matched but complexity {complexity} is below its threshold {}",
                            entry.name, entry.complexity_threshold
                        ));
                    }
                }
            }
        }

        report.skills.sort_by(|a, b| b.score.cmp(&a.score));
        report.agents.sort_by(|a, b| b.score.cmp(&a.score));

        if agent_domains.len() >= 2 {
            if let Some(coordinator) = self.registry.coordinator() {
                report.reasoning.push(format!(
                    "{} agent domains detected, proposing coordinator '{}' first",
                    agent_domains.len(),
                    coordinator.name
                ));
                report.agents.insert(
                    0,
                    CapabilityMatch {
                        name: coordinator.name.clone(),
                        kind: coordinator.kind,
                        score: agent_domains.len() as u32,
                        matched_triggers: Vec::new(),
                    },
                );
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> CapabilityMatcher {
        CapabilityMatcher::new(CapabilityRegistry::builtin())
    }

    #[test]
    fn test_direct_vocabulary_match() {
        let report = matcher().match_prompt("the css grid is overflowing", 2);
        assert!(report.skills.iter().any(|s| s.name == "css-styling"));
    }

    #[test]
    fn test_colloquial_prompt_still_matches_ui_capability() {
        // No raw technology vocabulary anywhere in this phrasing
        let report = matcher().match_prompt("admin panel not showing, layout broken", 6);
        let names: Vec<&str> = report
            .skills
            .iter()
            .chain(report.agents.iter())
            .map(|m| m.name.as_str())
            .collect();
        assert!(
            names.contains(&"css-styling") || names.contains(&"ui-specialist"),
            "expected a UI/layout capability, got {names:?}"
        );
    }

    #[test]
    fn test_agent_gated_by_complexity_threshold() {
        let m = matcher();

        let low = m.match_prompt("the ui layout is broken on the frontend", 2);
        assert!(!low.agents.iter().any(|a| a.name == "ui-specialist"));
        assert!(low
            .reasoning
            .iter()
            .any(|r| r.contains("below its threshold")));

        let high = m.match_prompt("the ui layout is broken on the frontend", 8);
        assert!(high.agents.iter().any(|a| a.name == "ui-specialist"));
    }

    #[test]
    fn test_skill_has_no_complexity_gate() {
        let report = matcher().match_prompt("css styling question", 0);
        assert!(report.skills.iter().any(|s| s.name == "css-styling"));
    }

    #[test]
    fn test_coordinator_ranked_first_on_multi_domain() {
        let report = matcher().match_prompt(
            "the docker deployment broke the login auth flow and the ui layout",
            12,
        );
        assert_eq!(report.agents.first().map(|a| a.name.as_str()), Some("tech-lead"));
        assert!(report
            .reasoning
            .iter()
            .any(|r| r.contains("coordinator")));
    }

    #[test]
    fn test_single_domain_has_no_coordinator() {
        let report = matcher().match_prompt("fix the css styling", 12);
        assert!(!report.agents.iter().any(|a| a.name == "tech-lead"));
    }

    #[test]
    fn test_incidental_skill_hit_does_not_promote_coordinator() {
        // "broken" enriches into the debugging skill's vocabulary, but one
        // UI agent plus an incidental skill is still a single workstream
        let report = matcher().match_prompt("admin panel not showing, layout broken", 6);
        assert!(report.skills.iter().any(|s| s.name == "debugging"));
        assert!(!report.agents.iter().any(|a| a.name == "tech-lead"));
        assert_eq!(report.best(), Some("ui-specialist"));
    }

    #[test]
    fn test_best_prefers_agents() {
        let report = matcher().match_prompt("docker deployment is failing", 10);
        assert_eq!(report.best(), Some("deploy-engineer"));
    }
}
