//! Core data model: research records, results, citations, and prompt configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length, in characters, of a title derived from a research goal.
pub const MAX_TITLE_CHARS: usize = 100;

/// Lifecycle status of a research job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ResearchStatus {
    /// Whether no further automatic transition can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchStatus::Completed | ResearchStatus::Error)
    }
}

impl std::fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResearchStatus::Pending => write!(f, "pending"),
            ResearchStatus::Running => write!(f, "running"),
            ResearchStatus::Completed => write!(f, "completed"),
            ResearchStatus::Error => write!(f, "error"),
        }
    }
}

/// A citation attached to a research result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    pub cited_at: DateTime<Utc>,
}

/// The payload of a completed research job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    /// Primary report text.
    pub report: String,
    /// Reasoning trace, when the model exposed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_process: Option<String>,
    /// Citations in the order they were cited.
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// Token usage reported by the remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Spend recorded for a completed job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResearchCost {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Total cost in USD.
    pub total_cost: f64,
}

/// One research request and its outcome.
///
/// `result` and `cost` are either both present (status `completed`) or both
/// absent. All mutation after creation goes through a
/// [`ResearchPatch`](crate::lifecycle::ResearchPatch) applied by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Research {
    pub id: String,
    pub title: String,
    pub prompt: String,
    pub model: String,
    pub status: ResearchStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Remote job handle, recorded once submission succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Failure report for jobs in `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<ResearchCost>,
}

impl Research {
    /// Create a new pending research job with a fresh id.
    pub fn new(
        title: impl Into<String>,
        prompt: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: truncate_chars(&title.into(), MAX_TITLE_CHARS),
            prompt: prompt.into(),
            model: model.into(),
            status: ResearchStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            response_id: None,
            error: None,
            result: None,
            cost: None,
        }
    }

    /// Create a job whose title is derived from the research goal.
    pub fn from_goal(goal: &str, prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(title_from_goal(goal), prompt, model)
    }

    /// Whether `result` and `cost` agree with `status`.
    ///
    /// Holds for every record the store ever exposes.
    pub fn is_consistent(&self) -> bool {
        let completed = self.status == ResearchStatus::Completed;
        let terminal_stamp = self.completed_at.is_some() == self.status.is_terminal();
        completed == self.result.is_some() && completed == self.cost.is_some() && terminal_stamp
    }
}

/// Requested research depth, used by prompt refinement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for ResearchDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResearchDepth::Low => write!(f, "low"),
            ResearchDepth::Medium => write!(f, "medium"),
            ResearchDepth::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for ResearchDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(ResearchDepth::Low),
            "medium" => Ok(ResearchDepth::Medium),
            "high" => Ok(ResearchDepth::High),
            other => Err(format!("unknown depth '{other}', expected low, medium or high")),
        }
    }
}

/// Input to prompt refinement. Not persisted beyond job creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    pub goal: String,
    pub scope: String,
    #[serde(default)]
    pub constraints: String,
    #[serde(default)]
    pub depth: ResearchDepth,
    /// Model used for refinement.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Derive a job title from a research goal.
pub fn title_from_goal(goal: &str) -> String {
    let first_line = goal.trim().lines().next().unwrap_or_default().trim();
    truncate_chars(first_line, MAX_TITLE_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Format a token count for display: `999`, `1.5K`, `2.3M`.
pub fn format_token_count(count: u64) -> String {
    if count < 1_000 {
        count.to_string()
    } else if count < 1_000_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_research_is_pending() {
        let research = Research::new("Title", "Explain X", "o3-deep-research");
        assert_eq!(research.status, ResearchStatus::Pending);
        assert!(research.result.is_none());
        assert!(research.cost.is_none());
        assert!(research.completed_at.is_none());
        assert!(research.is_consistent());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Research::new("a", "p", "m");
        let b = Research::new("a", "p", "m");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_title_from_goal_truncates() {
        let goal = "x".repeat(250);
        assert_eq!(title_from_goal(&goal).chars().count(), MAX_TITLE_CHARS);
        assert_eq!(title_from_goal("  Solar panels\nsecond line"), "Solar panels");
    }

    #[test]
    fn test_title_truncation_respects_char_boundaries() {
        let goal = "é".repeat(150);
        let title = title_from_goal(&goal);
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_format_token_count() {
        assert_eq!(format_token_count(999), "999");
        assert_eq!(format_token_count(1_500), "1.5K");
        assert_eq!(format_token_count(2_300_000), "2.3M");
    }

    #[test]
    fn test_status_display_and_serde() {
        assert_eq!(ResearchStatus::Error.to_string(), "error");
        let json = serde_json::to_string(&ResearchStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        assert!(ResearchStatus::Completed.is_terminal());
        assert!(!ResearchStatus::Running.is_terminal());
    }

    #[test]
    fn test_depth_from_str() {
        assert_eq!("HIGH".parse::<ResearchDepth>().unwrap(), ResearchDepth::High);
        assert!("extreme".parse::<ResearchDepth>().is_err());
    }

    #[test]
    fn test_research_serde_skips_absent_fields() {
        let research = Research::new("t", "p", "m");
        let json = serde_json::to_value(&research).unwrap();
        assert!(json.get("result").is_none());
        assert!(json.get("cost").is_none());
        let back: Research = serde_json::from_value(json).unwrap();
        assert_eq!(back, research);
    }
}
