//! Prompt modification for detected BMAD content.
//!
//! The modifier wraps the original content with guardrail text built from the
//! configured response templates. Every modified prompt starts with a marker
//! line carrying a signature of the original content:
//!
//! ```text
//! <!-- bmad-pipeline:modified sig=3f2a9c0d1e4b5a67 -->
//! ```
//!
//! Content that already carries a marker is returned unchanged, so feeding a
//! modified prompt back through the pipeline never stacks guardrails.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::detector::DetectionResult;

/// Prefix of the marker line.
pub const MODIFIED_MARKER: &str = "<!-- bmad-pipeline:modified";

static MARKER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<!-- bmad-pipeline:modified sig=([0-9a-f]{16}) -->").expect("valid regex")
});
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("valid regex"));

/// Templates from `responses.templates`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseTemplates {
    /// Text placed before the original content
    pub preamble: String,

    /// Bullet points placed before the original content
    pub guardrails: Vec<String>,

    /// Text placed after the original content
    pub epilogue: String,
}

impl ResponseTemplates {
    /// Read templates from a configuration value. Malformed values yield empty templates.
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring malformed response templates");
            Self::default()
        })
    }

    fn is_empty(&self) -> bool {
        self.preamble.trim().is_empty()
            && self.guardrails.iter().all(|g| g.trim().is_empty())
            && self.epilogue.trim().is_empty()
    }
}

/// Output of a modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedPrompt {
    /// Content to forward downstream
    pub content: String,

    /// Whether guardrails were inserted by this call
    pub applied: bool,

    /// Signature of the original content
    pub signature: String,
}

/// Rewrites prompt text before it is forwarded downstream.
#[derive(Debug, Clone, Default)]
pub struct PromptModifier;

impl PromptModifier {
    pub fn new() -> Self {
        Self
    }

    /// Check whether content was already modified.
    pub fn is_modified(content: &str) -> bool {
        MARKER_LINE.is_match(content)
    }

    /// Signature of already-modified content, if any.
    pub fn existing_signature(content: &str) -> Option<String> {
        MARKER_LINE.captures(content).map(|caps| caps[1].to_string())
    }

    /// Signature over the content and the matched markers.
    pub fn signature(content: &str, detection: &DetectionResult) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        for marker in &detection.matched_markers {
            hasher.update([0u8]);
            hasher.update(marker.as_bytes());
        }
        let digest = hasher.finalize();
        digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
    }

    /// Insert guardrails around the content.
    pub fn modify(
        &self,
        content: &str,
        detection: &DetectionResult,
        templates: &ResponseTemplates,
    ) -> ModifiedPrompt {
        if let Some(signature) = Self::existing_signature(content) {
            tracing::debug!(signature = %signature, "Content already modified, skipping");
            return ModifiedPrompt { content: content.to_string(), applied: false, signature };
        }

        let signature = Self::signature(content, detection);
        let vars = template_vars(detection);

        let mut out = String::with_capacity(content.len() + 512);
        out.push_str(&format!("{} sig={} -->\n", MODIFIED_MARKER, signature));

        if !templates.is_empty() {
            let preamble = render(&templates.preamble, &vars);
            if !preamble.trim().is_empty() {
                out.push_str(preamble.trim_end());
                out.push_str("\n\n");
            }

            let guardrails: Vec<String> = templates
                .guardrails
                .iter()
                .map(|g| render(g, &vars))
                .filter(|g| !g.trim().is_empty())
                .collect();
            if !guardrails.is_empty() {
                for guardrail in &guardrails {
                    out.push_str("- ");
                    out.push_str(guardrail.trim());
                    out.push('\n');
                }
                out.push('\n');
            }
        }

        out.push_str(content.trim_end());
        out.push('\n');

        let epilogue = render(&templates.epilogue, &vars);
        if !epilogue.trim().is_empty() {
            out.push('\n');
            out.push_str(epilogue.trim_end());
            out.push('\n');
        }

        ModifiedPrompt { content: out, applied: true, signature }
    }
}

fn template_vars(detection: &DetectionResult) -> HashMap<&'static str, String> {
    let metadata = detection.metadata.clone().unwrap_or_default();
    let work_items = if metadata.work_items.is_empty() {
        "none declared".to_string()
    } else {
        metadata.work_items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    };
    let name = if metadata.name.is_empty() { "untitled".to_string() } else { metadata.name };

    let mut vars = HashMap::new();
    vars.insert("project_name", name);
    vars.insert("work_item_count", metadata.work_items.len().to_string());
    vars.insert("work_items", work_items);
    vars.insert("confidence", format!("{:.2}", detection.confidence));
    vars.insert("version", metadata.version);
    vars
}

/// Substitute `{{name}}` placeholders. Unknown placeholders are left as-is.
fn render(template: &str, vars: &HashMap<&'static str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1]).cloned().unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
