//! Project metadata extraction.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::rules::DEFAULT_RULES;

/// Format tag for content carrying BMAD structure or markers.
pub(crate) const BMAD_FORMAT: &str = "bmad";

static FRONTMATTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\A\s*---[ \t]*\r?\n((?s:.*?))\r?\n---[ \t]*(?:\r?\n|\z)").expect("valid regex")
});
static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(#{1,6})\s*(.*?)[\s#]*$").expect("valid regex"));
static WORK_ITEM_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(epic|user\s+story|story)\b(?:\s*[\w.]*\s*[:\-])?\s*(.*)$").expect("valid regex")
});
static AGENT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*]\s*)?(?:agent|role)\s*:\s*(\S.*?)\s*$").expect("valid regex")
});
static PROJECT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:project|project\s+name)\s*:\s*(\S.*?)\s*$").expect("valid regex")
});
static VERSION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:bmad[\s_-]*)?version\s*:\s*(\S+)").expect("valid regex")
});
static KEY_VALUE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*]\s*)?[\w\s-]{1,32}:\s*\S").expect("valid regex"));

/// Kind of a declared work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemKind {
    Epic,
    Story,
    Agent,
}

impl fmt::Display for WorkItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epic => write!(f, "epic"),
            Self::Story => write!(f, "story"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// A work item declared by the project (epic, story or agent role).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub kind: WorkItemKind,
    pub title: String,
}

impl WorkItem {
    pub fn new(kind: WorkItemKind, title: impl Into<String>) -> Self {
        Self { kind, title: title.into() }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.title)
    }
}

/// Structured description of a detected project.
///
/// Produced fresh by every extraction. Fields that cannot be located are
/// left empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    /// Project name
    pub name: String,

    /// Free-text description
    pub description: String,

    /// Declared work items in document order
    pub work_items: Vec<WorkItem>,

    /// Declared version, if any
    pub version: String,

    /// Format tag (`bmad` or `unknown`)
    pub format: String,
}

impl ProjectMetadata {
    /// Work items of a given kind.
    pub fn items_of(&self, kind: WorkItemKind) -> impl Iterator<Item = &WorkItem> {
        self.work_items.iter().filter(move |item| item.kind == kind)
    }

    /// Whether nothing at all was extracted.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.description.is_empty()
            && self.work_items.is_empty()
            && self.version.is_empty()
    }
}

#[derive(Debug, Default)]
struct Frontmatter {
    name: Option<String>,
    description: Option<String>,
    version: Option<String>,
    agents: Vec<String>,
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_frontmatter(body: &str) -> Frontmatter {
    let Ok(serde_yaml::Value::Mapping(map)) = serde_yaml::from_str::<serde_yaml::Value>(body)
    else {
        return Frontmatter::default();
    };

    let field = |keys: &[&str]| keys.iter().find_map(|k| map.get(*k).and_then(yaml_scalar));

    let agents = match map.get("agents") {
        Some(serde_yaml::Value::Sequence(items)) => items
            .iter()
            .filter_map(|item| match item {
                serde_yaml::Value::Mapping(m) => m.get("name").and_then(yaml_scalar),
                other => yaml_scalar(other),
            })
            .collect(),
        _ => Vec::new(),
    };

    Frontmatter {
        name: field(&["name", "project", "title"]),
        description: field(&["description", "summary"]),
        version: field(&["version", "bmad_version"]),
        agents,
    }
}

/// Extract project metadata from content. Never fails.
pub fn extract_project_metadata(content: &str) -> ProjectMetadata {
    let (frontmatter, body) = match FRONTMATTER.captures(content) {
        Some(caps) => {
            let end = caps.get(0).map_or(0, |m| m.end());
            let yaml = caps.get(1).map_or("", |m| m.as_str());
            (Some(parse_frontmatter(yaml)), &content[end..])
        }
        None => (None, content),
    };
    let frontmatter_present = frontmatter.is_some();
    let frontmatter = frontmatter.unwrap_or_default();

    let mut work_items: Vec<WorkItem> =
        frontmatter.agents.iter().map(|a| WorkItem::new(WorkItemKind::Agent, a.clone())).collect();
    let mut project_line = None;
    let mut first_h1 = None;
    let mut first_epic = None;
    let mut version_line = None;
    let mut description_line = None;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.chars().all(|c| c == '-' || c == '=' || c == '*') {
            continue;
        }

        if let Some(caps) = HEADING.captures(line) {
            let level = caps.get(1).map_or(0, |m| m.as_str().len());
            let text = caps.get(2).map_or("", |m| m.as_str()).trim();

            if let Some(item) = WORK_ITEM_HEADING.captures(text) {
                let kind_word = item.get(1).map_or("", |m| m.as_str()).to_lowercase();
                let title = item.get(2).map_or("", |m| m.as_str()).trim();
                let title = if title.is_empty() { text } else { title };
                let kind =
                    if kind_word == "epic" { WorkItemKind::Epic } else { WorkItemKind::Story };
                if kind == WorkItemKind::Epic && first_epic.is_none() {
                    first_epic = Some(title.to_string());
                }
                work_items.push(WorkItem::new(kind, title));
            } else if level == 1 && first_h1.is_none() && !text.is_empty() {
                first_h1 = Some(text.to_string());
            }
            continue;
        }

        if let Some(caps) = AGENT_LINE.captures(line) {
            work_items.push(WorkItem::new(WorkItemKind::Agent, &caps[1]));
            continue;
        }
        if let Some(caps) = PROJECT_LINE.captures(line) {
            project_line.get_or_insert_with(|| caps[1].to_string());
            continue;
        }
        if let Some(caps) = VERSION_LINE.captures(line) {
            version_line.get_or_insert_with(|| caps[1].to_string());
            continue;
        }
        if description_line.is_none() && !KEY_VALUE_LINE.is_match(line) {
            description_line = Some(trimmed.trim_start_matches(['-', '*', '>', ' ']).to_string());
        }
    }

    let has_marker = || DEFAULT_RULES.iter().any(|rule| rule.matches(content));
    let format = if frontmatter_present || !work_items.is_empty() || has_marker() {
        BMAD_FORMAT
    } else {
        "unknown"
    };

    ProjectMetadata {
        name: frontmatter
            .name
            .or(project_line)
            .or(first_h1)
            .or(first_epic)
            .unwrap_or_default(),
        description: frontmatter.description.or(description_line).unwrap_or_default(),
        work_items,
        version: frontmatter.version.or(version_line).unwrap_or_default(),
        format: format.to_string(),
    }
}
