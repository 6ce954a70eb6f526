//! Default configuration tree.

use serde_json::{json, Value};

/// Well-known configuration paths.
pub mod keys {
    /// Global execution-mode flag.
    pub const EXECUTION_ENABLED: &str = "execution.enabled";
    /// Per-execution timeout in milliseconds (0 disables the timeout).
    pub const EXECUTION_TIMEOUT_MS: &str = "execution.timeout_ms";
    /// Maximum number of executions running at the same time.
    pub const EXECUTION_MAX_CONCURRENT: &str = "execution.max_concurrent";
    /// Artificial delay applied by the local backend to each step.
    pub const EXECUTION_STEP_DELAY_MS: &str = "execution.step_delay_ms";
    /// Minimum confidence for content to count as BMAD.
    pub const DETECTION_MIN_CONFIDENCE: &str = "detection.min_confidence";
    /// Minimum number of matched markers for content to count as BMAD.
    pub const DETECTION_MIN_MARKERS: &str = "detection.min_markers";
    /// Additional marker rules declared by the user.
    pub const DETECTION_EXTRA_MARKERS: &str = "detection.extra_markers";
    /// Structural rules applied to execution responses.
    pub const RESPONSE_VALIDATION: &str = "responses.validation";
    /// Templates used by the prompt modifier.
    pub const RESPONSE_TEMPLATES: &str = "responses.templates";
    /// Counter subtree.
    pub const STATS: &str = "stats";
    /// Timestamp of the last recorded pipeline activity.
    pub const STATS_LAST_UPDATED: &str = "stats.last_updated";
}

/// Build the default configuration tree.
pub fn default_tree() -> Value {
    json!({
        "execution": {
            "enabled": false,
            "timeout_ms": 0,
            "max_concurrent": 4,
            "step_delay_ms": 0
        },
        "detection": {
            "min_confidence": 0.3,
            "min_markers": 2,
            "extra_markers": []
        },
        "responses": {
            "validation": {
                "required_fields": ["summary", "status"],
                "allowed_values": {
                    "status": ["completed", "failed", "partial"]
                },
                "field_types": {
                    "summary": "string"
                }
            },
            "templates": {
                "preamble": "You are executing the BMAD project \"{{project_name}}\" ({{work_item_count}} declared work items, detection confidence {{confidence}}).",
                "guardrails": [
                    "Work through the declared items in order: {{work_items}}.",
                    "Do not change anything outside the scope of the current work item.",
                    "Stop and report instead of guessing when a requirement is ambiguous."
                ],
                "epilogue": "Finish with a JSON object containing `summary` and `status` (completed, failed or partial)."
            }
        },
        "stats": {
            "detections": 0,
            "executions": 0,
            "passthroughs": 0
        }
    })
}
