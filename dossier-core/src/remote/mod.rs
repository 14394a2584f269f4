//! Remote services: the deep-research job API and prompt refinement.
//!
//! The engine talks to these only through the [`ResearchService`] and
//! [`PromptRefiner`] traits. [`openai`] holds the HTTP implementation and
//! [`mock`] a scripted one for tests and offline runs.

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::types::{PromptConfig, ResearchResult, Source, TokenUsage};

pub use mock::{MockPromptRefiner, MockResearchService, ScriptedPoll};
pub use openai::OpenAiClient;

/// A research submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
    pub model: String,
}

/// Coarse remote job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Running,
    Completed,
    Failed,
}

impl RemoteStatus {
    /// Map a status string reported by the API.
    ///
    /// Anything not recognisably finished counts as still running.
    pub fn from_api(status: &str) -> Self {
        match status {
            "completed" => RemoteStatus::Completed,
            "failed" | "cancelled" => RemoteStatus::Failed,
            _ => RemoteStatus::Running,
        }
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteStatus::Running => write!(f, "running"),
            RemoteStatus::Completed => write!(f, "completed"),
            RemoteStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Everything extracted from a finished remote job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPayload {
    pub report: String,
    #[serde(default)]
    pub thought_process: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl ResearchPayload {
    pub fn into_result(self) -> (ResearchResult, TokenUsage) {
        (
            ResearchResult {
                report: self.report,
                thought_process: self.thought_process,
                sources: self.sources,
            },
            self.usage,
        )
    }
}

/// Result of one status query.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePoll {
    pub status: RemoteStatus,
    /// Present when the status query already carried the finished payload.
    pub payload: Option<ResearchPayload>,
    /// Failure detail for `Failed`.
    pub error: Option<String>,
}

impl RemotePoll {
    pub fn running() -> Self {
        Self {
            status: RemoteStatus::Running,
            payload: None,
            error: None,
        }
    }

    pub fn completed(payload: Option<ResearchPayload>) -> Self {
        Self {
            status: RemoteStatus::Completed,
            payload,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: RemoteStatus::Failed,
            payload: None,
            error: Some(message.into()),
        }
    }
}

/// A remote service that runs long research jobs in the background.
#[async_trait]
pub trait ResearchService: Send + Sync {
    /// Submit a job and return its remote handle.
    async fn submit(&self, request: &SubmitRequest) -> Result<String, RemoteError>;

    /// Query the status of a submitted job.
    async fn poll(&self, response_id: &str) -> Result<RemotePoll, RemoteError>;

    /// Retrieve the full payload of a completed job.
    async fn fetch(&self, response_id: &str) -> Result<ResearchPayload, RemoteError>;
}

/// Turns a structured research brief into a prompt.
#[async_trait]
pub trait PromptRefiner: Send + Sync {
    async fn refine(&self, config: &PromptConfig) -> Result<String, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(RemoteStatus::from_api("completed"), RemoteStatus::Completed);
        assert_eq!(RemoteStatus::from_api("failed"), RemoteStatus::Failed);
        assert_eq!(RemoteStatus::from_api("cancelled"), RemoteStatus::Failed);
        for status in ["queued", "in_progress", "incomplete", "something_new"] {
            assert_eq!(RemoteStatus::from_api(status), RemoteStatus::Running);
        }
    }

    #[test]
    fn test_payload_into_result() {
        let payload = ResearchPayload {
            report: "r".into(),
            thought_process: Some("t".into()),
            sources: vec![],
            usage: TokenUsage {
                input_tokens: 3,
                output_tokens: 4,
                reasoning_tokens: 0,
            },
        };
        let (result, usage) = payload.into_result();
        assert_eq!(result.report, "r");
        assert_eq!(result.thought_process.as_deref(), Some("t"));
        assert_eq!(usage.total(), 7);
    }
}
