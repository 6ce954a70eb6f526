//! Marker rules used to recognise BMAD content.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};

type PredicateFn = dyn Fn(&str) -> bool + Send + Sync;

/// How a marker rule inspects content.
#[derive(Clone)]
pub enum MarkerMatcher {
    /// Matches when the regex finds a match anywhere in the content
    Regex(Regex),
    /// Matches when the predicate returns true
    Predicate(Arc<PredicateFn>),
}

impl fmt::Debug for MarkerMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// A single independent marker contributing to the detection score.
#[derive(Debug, Clone)]
pub struct MarkerRule {
    /// Marker name reported in `matchedMarkers`
    pub name: String,

    /// Contribution to the confidence score
    pub weight: f64,

    /// Matching strategy
    pub matcher: MarkerMatcher,
}

impl MarkerRule {
    /// Create a regex-based rule.
    pub fn regex(name: impl Into<String>, weight: f64, pattern: &str) -> PipelineResult<Self> {
        let name = name.into();
        let regex = Regex::new(pattern).map_err(|e| {
            PipelineError::config(format!("invalid pattern for marker '{}': {}", name, e))
        })?;
        Self::checked(name, weight, MarkerMatcher::Regex(regex))
    }

    /// Create a predicate-based rule.
    pub fn predicate<F>(name: impl Into<String>, weight: f64, predicate: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::checked(name.into(), weight, MarkerMatcher::Predicate(Arc::new(predicate)))
    }

    fn checked(name: String, weight: f64, matcher: MarkerMatcher) -> PipelineResult<Self> {
        if !weight.is_finite() || weight <= 0.0 {
            return Err(PipelineError::config(format!(
                "marker '{}' must have a positive weight, got {}",
                name, weight
            )));
        }
        Ok(Self { name, weight, matcher })
    }

    /// Check whether the rule matches the content.
    pub fn matches(&self, content: &str) -> bool {
        match &self.matcher {
            MarkerMatcher::Regex(re) => re.is_match(content),
            MarkerMatcher::Predicate(predicate) => predicate(content),
        }
    }
}

/// Marker declared in configuration under `detection.extra_markers`.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkerSpec {
    pub name: String,
    pub pattern: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    0.1
}

impl MarkerSpec {
    /// Compile into a rule.
    pub fn compile(&self) -> PipelineResult<MarkerRule> {
        MarkerRule::regex(&self.name, self.weight, &self.pattern)
    }
}

/// Built-in marker rules, in evaluation order.
pub fn default_rules() -> Vec<MarkerRule> {
    DEFAULT_RULES.clone()
}

pub(crate) static DEFAULT_RULES: Lazy<Vec<MarkerRule>> = Lazy::new(|| {
    const DEFAULTS: &[(&str, f64, &str)] = &[
        ("frontmatter", 0.10, r"\A\s*---[ \t]*\r?\n(?s:.*?)\r?\n---[ \t]*(?:\r?\n|\z)"),
        ("epic_header", 0.20, r"(?mi)^[ \t]*#{1,6}[ \t]*epic\b"),
        ("story_header", 0.20, r"(?mi)^[ \t]*#{1,6}[ \t]*(?:user[ \t]+)?story\b"),
        ("agent_role", 0.15, r"(?mi)^[ \t]*(?:[-*][ \t]*)?(?:agent|role)[ \t]*:[ \t]*\S"),
        ("bmad_keyword", 0.15, r"(?i)\bbmad\b"),
        (
            "acceptance_criteria",
            0.10,
            r"(?mi)^[ \t]*(?:#{1,6}[ \t]*)?acceptance[ \t]+criteria\b",
        ),
        (
            "planning_section",
            0.10,
            r"(?mi)^[ \t]*#{1,6}[ \t]*(?:prd|product[ \t]+requirements|architecture|project[ \t]+brief)\b",
        ),
    ];

    DEFAULTS
        .iter()
        .filter_map(|(name, weight, pattern)| MarkerRule::regex(*name, *weight, pattern).ok())
        .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str) -> MarkerRule {
        default_rules().into_iter().find(|r| r.name == name).unwrap()
    }

    #[test]
    fn test_all_default_rules_compile() {
        assert_eq!(default_rules().len(), 7);
        let total: f64 = default_rules().iter().map(|r| r.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_epic_and_story_headers() {
        assert!(rule("epic_header").matches("# Epic: Build X"));
        assert!(rule("epic_header").matches("intro\n### EPIC 2 - Payments"));
        assert!(!rule("epic_header").matches("an epic journey"));
        assert!(rule("story_header").matches("## Story: login"));
        assert!(rule("story_header").matches("## User Story 1"));
        assert!(!rule("story_header").matches("## History"));
    }

    #[test]
    fn test_agent_role() {
        assert!(rule("agent_role").matches("Agent: dev"));
        assert!(rule("agent_role").matches("  - role: architect"));
        assert!(!rule("agent_role").matches("Agent:"));
        assert!(!rule("agent_role").matches("the agent is here"));
    }

    #[test]
    fn test_frontmatter_only_at_start() {
        assert!(rule("frontmatter").matches("---\nname: demo\n---\nbody"));
        assert!(!rule("frontmatter").matches("body\n---\nname: demo\n---\n"));
    }

    #[test]
    fn test_invalid_pattern_and_weight() {
        assert!(MarkerRule::regex("bad", 0.1, "(unclosed").is_err());
        assert!(MarkerRule::regex("zero", 0.0, "x").is_err());
        assert!(MarkerRule::predicate("nan", f64::NAN, |_| true).is_err());
    }

    #[test]
    fn test_predicate_rule() {
        let rule = MarkerRule::predicate("long", 0.5, |c| c.len() > 5).unwrap();
        assert!(rule.matches("abcdefg"));
        assert!(!rule.matches("abc"));
    }
}
