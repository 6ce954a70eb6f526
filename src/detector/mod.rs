//! BMAD content detection.
//!
//! Detection runs an ordered list of independent [`MarkerRule`]s over the
//! content. Each matching rule contributes its weight to the confidence
//! score, which is normalised by the total weight of all rules:
//!
//! ```text
//! confidence = sum(weight of matched rules) / sum(weight of all rules)
//! ```
//!
//! Content counts as BMAD when both the confidence and the number of matched
//! markers reach the configured thresholds.

mod metadata;
mod rules;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use metadata::{extract_project_metadata, ProjectMetadata, WorkItem, WorkItemKind};
pub use rules::{default_rules, MarkerMatcher, MarkerRule, MarkerSpec};

use metadata::BMAD_FORMAT;

use crate::config::{keys, ConfigStore};
use crate::error::{PipelineError, PipelineResult};

/// Default minimum confidence.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.3;

/// Default minimum number of matched markers.
pub const DEFAULT_MIN_MARKERS: usize = 2;

/// Outcome of classifying a piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    /// Whether the content is a BMAD project
    #[serde(rename = "isBMAD")]
    pub is_bmad: bool,

    /// Normalised score in `[0, 1]`
    pub confidence: f64,

    /// Names of the markers that matched
    pub matched_markers: BTreeSet<String>,

    /// Extracted metadata, present when the content is BMAD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ProjectMetadata>,
}

impl DetectionResult {
    /// Result for content with no markers at all.
    pub fn negative() -> Self {
        Self { is_bmad: false, confidence: 0.0, matched_markers: BTreeSet::new(), metadata: None }
    }
}

/// Classifies content and extracts project metadata.
#[derive(Debug, Clone)]
pub struct Detector {
    rules: Vec<MarkerRule>,
    min_confidence: f64,
    min_markers: usize,
}

impl Detector {
    /// Create a detector with the built-in rules and default thresholds.
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            min_markers: DEFAULT_MIN_MARKERS,
        }
    }

    /// Create a detector with a custom rule list.
    pub fn with_rules(rules: Vec<MarkerRule>) -> Self {
        Self { rules, ..Self::new() }
    }

    /// Build a detector from the `detection` configuration subtree.
    ///
    /// Extra markers are appended after the built-in ones.
    pub fn from_config(config: &ConfigStore) -> PipelineResult<Self> {
        let mut detector = Self::new();

        if let Some(value) = config.get(keys::DETECTION_MIN_CONFIDENCE) {
            let min = value.as_f64().ok_or_else(|| {
                PipelineError::config(format!("{} must be a number", keys::DETECTION_MIN_CONFIDENCE))
            })?;
            detector = detector.min_confidence(min);
        }

        if let Some(value) = config.get(keys::DETECTION_MIN_MARKERS) {
            let min = value.as_u64().ok_or_else(|| {
                PipelineError::config(format!(
                    "{} must be a non-negative integer",
                    keys::DETECTION_MIN_MARKERS
                ))
            })?;
            detector = detector.min_markers(min as usize);
        }

        if let Some(value) = config.get(keys::DETECTION_EXTRA_MARKERS) {
            let specs: Vec<MarkerSpec> = serde_json::from_value(value).map_err(|e| {
                PipelineError::config(format!("{}: {}", keys::DETECTION_EXTRA_MARKERS, e))
            })?;
            for spec in &specs {
                detector.rules.push(spec.compile()?);
            }
        }

        Ok(detector)
    }

    /// Set the minimum confidence, clamped to `[0, 1]`.
    pub fn min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = if min.is_nan() { DEFAULT_MIN_CONFIDENCE } else { min.clamp(0.0, 1.0) };
        self
    }

    /// Set the minimum number of matched markers.
    pub fn min_markers(mut self, min: usize) -> Self {
        self.min_markers = min;
        self
    }

    /// Append a rule.
    pub fn add_rule(&mut self, rule: MarkerRule) {
        self.rules.push(rule);
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[MarkerRule] {
        &self.rules
    }

    /// Classify content. Deterministic and side-effect free.
    pub fn detect_bmad(&self, content: &str) -> DetectionResult {
        let total: f64 = self.rules.iter().map(|r| r.weight).sum();
        if content.trim().is_empty() || total <= 0.0 {
            return DetectionResult::negative();
        }

        let mut matched = BTreeSet::new();
        let mut score = 0.0;
        for rule in &self.rules {
            if rule.matches(content) && matched.insert(rule.name.clone()) {
                score += rule.weight;
            }
        }

        if matched.is_empty() {
            return DetectionResult::negative();
        }

        let confidence = ((score / total).clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0;
        let is_bmad = confidence >= self.min_confidence && matched.len() >= self.min_markers;
        let metadata = is_bmad.then(|| {
            let mut metadata = extract_project_metadata(content);
            metadata.format = BMAD_FORMAT.to_string();
            metadata
        });

        DetectionResult { is_bmad, confidence, matched_markers: matched, metadata }
    }

    /// Extract project metadata. Never fails.
    pub fn extract_project_metadata(&self, content: &str) -> ProjectMetadata {
        let mut metadata = extract_project_metadata(content);
        // Configured extra markers count as BMAD too.
        if self.rules.iter().any(|rule| rule.matches(content)) {
            metadata.format = BMAD_FORMAT.to_string();
        }
        metadata
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}
