//! Scripted in-memory remote services, for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use super::{PromptRefiner, RemotePoll, ResearchPayload, ResearchService, SubmitRequest};
use crate::error::RemoteError;
use crate::types::{PromptConfig, Source, TokenUsage};

/// One scripted answer to a `poll` call.
#[derive(Debug, Clone)]
pub enum ScriptedPoll {
    Running,
    /// Completed; `None` makes the engine call `fetch` for the payload.
    Completed(Option<ResearchPayload>),
    Failed(String),
    /// The status query itself fails (network, auth, ...).
    Error(String),
}

/// A [`ResearchService`] that replays a script of poll results.
///
/// Once the script is exhausted every poll reports `Running`.
#[derive(Debug, Default)]
pub struct MockResearchService {
    polls: Mutex<VecDeque<ScriptedPoll>>,
    submit_error: Mutex<Option<String>>,
    fetch_payload: Mutex<Option<ResearchPayload>>,
    submitted: Mutex<Vec<SubmitRequest>>,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockResearchService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service whose jobs complete on the given poll with `payload`.
    pub fn completing_after(running_polls: usize, payload: ResearchPayload) -> Self {
        let mut script = vec![ScriptedPoll::Running; running_polls];
        script.push(ScriptedPoll::Completed(Some(payload)));
        Self::new().with_polls(script)
    }

    pub fn with_polls(self, script: impl IntoIterator<Item = ScriptedPoll>) -> Self {
        lock(&self.polls).extend(script);
        self
    }

    /// Payload returned by `fetch`. Defaults to [`sample_payload`](Self::sample_payload).
    pub fn with_fetch_payload(self, payload: ResearchPayload) -> Self {
        *lock(&self.fetch_payload) = Some(payload);
        self
    }

    /// Make the next `submit` fail with an API error.
    pub fn fail_submit(self, message: impl Into<String>) -> Self {
        *lock(&self.submit_error) = Some(message.into());
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Requests received by `submit`, in order.
    pub fn submitted(&self) -> Vec<SubmitRequest> {
        lock(&self.submitted).clone()
    }

    /// A small finished payload: two-paragraph report, reasoning, two sources
    /// and 1000 input / 2000 output tokens.
    pub fn sample_payload() -> ResearchPayload {
        let now = Utc::now();
        ResearchPayload {
            report: "First finding.\n\nSecond finding.".to_string(),
            thought_process: Some("Searched the web and compared sources.".to_string()),
            sources: vec![
                Source {
                    id: "src-1".to_string(),
                    title: "Example One".to_string(),
                    url: "https://example.com/one".to_string(),
                    snippet: "First finding".to_string(),
                    cited_at: now,
                },
                Source {
                    id: "src-2".to_string(),
                    title: "Example Two".to_string(),
                    url: "https://example.com/two".to_string(),
                    snippet: String::new(),
                    cited_at: now,
                },
            ],
            usage: TokenUsage {
                input_tokens: 1000,
                output_tokens: 2000,
                reasoning_tokens: 0,
            },
        }
    }
}

#[async_trait]
impl ResearchService for MockResearchService {
    async fn submit(&self, request: &SubmitRequest) -> Result<String, RemoteError> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.submitted).push(request.clone());
        if let Some(message) = lock(&self.submit_error).take() {
            return Err(RemoteError::ApiRequest { message });
        }
        Ok(format!("resp_mock_{n}"))
    }

    async fn poll(&self, _response_id: &str) -> Result<RemotePoll, RemoteError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.polls).pop_front().unwrap_or(ScriptedPoll::Running);
        match next {
            ScriptedPoll::Running => Ok(RemotePoll::running()),
            ScriptedPoll::Completed(payload) => Ok(RemotePoll::completed(payload)),
            ScriptedPoll::Failed(message) => Ok(RemotePoll::failed(message)),
            ScriptedPoll::Error(message) => Err(RemoteError::Connection { message }),
        }
    }

    async fn fetch(&self, _response_id: &str) -> Result<ResearchPayload, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.fetch_payload)
            .clone()
            .unwrap_or_else(Self::sample_payload))
    }
}

/// A [`PromptRefiner`] returning a fixed answer, or the goal when none is set.
#[derive(Debug, Default)]
pub struct MockPromptRefiner {
    answer: Option<String>,
    calls: AtomicUsize,
}

impl MockPromptRefiner {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PromptRefiner for MockPromptRefiner {
    async fn refine(&self, config: &PromptConfig) -> Result<String, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone().unwrap_or_else(|| config.goal.clone()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteStatus;

    fn request() -> SubmitRequest {
        SubmitRequest {
            prompt: "Explain X".into(),
            model: "o3-deep-research".into(),
        }
    }

    #[tokio::test]
    async fn test_script_then_running() {
        let service = MockResearchService::new()
            .with_polls([ScriptedPoll::Running, ScriptedPoll::Failed("boom".into())]);
        let id = service.submit(&request()).await.unwrap();
        assert_eq!(id, "resp_mock_1");

        assert_eq!(service.poll(&id).await.unwrap().status, RemoteStatus::Running);
        let failed = service.poll(&id).await.unwrap();
        assert_eq!(failed.status, RemoteStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(service.poll(&id).await.unwrap().status, RemoteStatus::Running);
        assert_eq!(service.poll_calls(), 3);
    }

    #[tokio::test]
    async fn test_submit_failure_is_one_shot() {
        let service = MockResearchService::new().fail_submit("bad request");
        assert!(service.submit(&request()).await.is_err());
        assert!(service.submit(&request()).await.is_ok());
        assert_eq!(service.submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_refiner_falls_back_to_goal() {
        let config = PromptConfig {
            goal: "Goal".into(),
            scope: String::new(),
            constraints: String::new(),
            depth: Default::default(),
            model: "gpt-4.1".into(),
            max_tokens: None,
        };
        assert_eq!(MockPromptRefiner::default().refine(&config).await.unwrap(), "Goal");
        let refiner = MockPromptRefiner::new("Refined");
        assert_eq!(refiner.refine(&config).await.unwrap(), "Refined");
        assert_eq!(refiner.calls(), 1);
    }
}
