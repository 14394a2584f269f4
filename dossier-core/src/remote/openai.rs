//! OpenAI client: deep research over the Responses API and prompt refinement
//! over chat completions.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{PromptRefiner, RemotePoll, RemoteStatus, ResearchPayload, ResearchService, SubmitRequest};
use crate::config::{ApiConfig, ResearchConfig};
use crate::error::RemoteError;
use crate::types::{PromptConfig, Source, TokenUsage};

const PROVIDER: &str = "OpenAI";
const REFINE_TEMPERATURE: f64 = 0.3;
const REFINE_MAX_TOKENS: u32 = 500;

/// HTTP client for the OpenAI API.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    research: ResearchConfig,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl OpenAiClient {
    /// Create a client, resolving the API key from configuration or the
    /// environment variable named by `api.api_key_env`.
    pub fn new(api: &ApiConfig, research: &ResearchConfig) -> Result<Self, RemoteError> {
        let api_key = api.require_api_key().map_err(|e| RemoteError::AuthFailed {
            provider: format!("{PROVIDER}: {e}"),
        })?;
        Self::new_with_key(api, research, api_key)
    }

    /// Create a client with an explicitly provided API key.
    pub fn new_with_key(
        api: &ApiConfig,
        research: &ResearchConfig,
        api_key: String,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()
            .map_err(|e| RemoteError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            api_key,
            research: research.clone(),
        })
    }

    /// JSON body for `POST /responses`.
    pub fn submit_body(&self, request: &SubmitRequest) -> Value {
        let research = &self.research;
        let mut input = Vec::new();
        if !research.system_prompt.trim().is_empty() {
            input.push(json!({
                "role": "developer",
                "content": [{ "type": "input_text", "text": research.system_prompt }],
            }));
        }
        input.push(json!({
            "role": "user",
            "content": [{ "type": "input_text", "text": request.prompt }],
        }));

        let mut reasoning = json!({ "summary": research.reasoning_summary });
        if let Some(effort) = &research.reasoning_effort {
            reasoning["effort"] = json!(effort);
        }

        let mut body = json!({
            "model": request.model,
            "input": input,
            "reasoning": reasoning,
            "tools": [{
                "type": "web_search_preview",
                "search_context_size": research.search_context_size,
            }],
            "background": true,
        });
        if let Some(max) = research.max_output_tokens {
            body["max_output_tokens"] = json!(max);
        }
        body
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, RemoteError> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    RemoteError::Connection {
                        message: e.to_string(),
                    }
                } else {
                    RemoteError::ApiRequest {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| RemoteError::ApiRequest {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(map_http_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| RemoteError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })
    }

    async fn retrieve(&self, response_id: &str) -> Result<Value, RemoteError> {
        let url = format!("{}/responses/{}", self.base_url, response_id);
        self.send(self.client.get(&url)).await
    }
}

#[async_trait]
impl ResearchService for OpenAiClient {
    async fn submit(&self, request: &SubmitRequest) -> Result<String, RemoteError> {
        let url = format!("{}/responses", self.base_url);
        debug!(url = %url, model = %request.model, "Submitting research job");

        let json = self
            .send(self.client.post(&url).json(&self.submit_body(request)))
            .await?;
        let id = json["id"]
            .as_str()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RemoteError::ResponseParse {
                message: "response has no id".into(),
            })?;
        info!(response_id = %id, model = %request.model, "Research job submitted");
        Ok(id.to_string())
    }

    async fn poll(&self, response_id: &str) -> Result<RemotePoll, RemoteError> {
        let json = self.retrieve(response_id).await?;
        let raw_status = json["status"].as_str().unwrap_or("unknown");
        debug!(response_id = %response_id, status = %raw_status, "Polled research job");

        Ok(match RemoteStatus::from_api(raw_status) {
            RemoteStatus::Running => RemotePoll::running(),
            RemoteStatus::Completed => RemotePoll::completed(Some(parse_response(&json)?)),
            RemoteStatus::Failed => RemotePoll::failed(failure_message(&json, raw_status)),
        })
    }

    async fn fetch(&self, response_id: &str) -> Result<ResearchPayload, RemoteError> {
        let json = self.retrieve(response_id).await?;
        parse_response(&json)
    }
}

#[async_trait]
impl PromptRefiner for OpenAiClient {
    async fn refine(&self, config: &PromptConfig) -> Result<String, RemoteError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": config.model,
            "messages": [{ "role": "user", "content": build_refinement_prompt(config) }],
            "max_tokens": config.max_tokens.unwrap_or(REFINE_MAX_TOKENS),
            "temperature": REFINE_TEMPERATURE,
        });
        debug!(url = %url, model = %config.model, "Refining research prompt");

        let json = self.send(self.client.post(&url).json(&body)).await?;
        Ok(refined_or_goal(
            json["choices"][0]["message"]["content"].as_str(),
            config,
        ))
    }
}

/// The meta-prompt asking a chat model to write a research prompt.
pub fn build_refinement_prompt(config: &PromptConfig) -> String {
    format!(
        "You are a research prompt specialist. Write a detailed, high-quality research \
         prompt from these requirements:\n\n\
         Goal: {}\n\
         Scope: {}\n\
         Constraints: {}\n\
         Depth Level: {}\n\n\
         The prompt must be specific and information-rich, and must guide a research model \
         towards a comprehensive, well-cited answer.\n\n\
         Return only the research prompt, nothing else.",
        config.goal, config.scope, config.constraints, config.depth
    )
}

fn refined_or_goal(answer: Option<&str>, config: &PromptConfig) -> String {
    match answer.map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => config.goal.clone(),
    }
}

fn map_http_error(status: reqwest::StatusCode, body: &str) -> RemoteError {
    match status.as_u16() {
        401 | 403 => {
            debug!(body = %body, "Authentication failed ({})", status);
            RemoteError::AuthFailed {
                provider: PROVIDER.to_string(),
            }
        }
        429 => {
            // "... Please try again in 20s."
            let retry_secs = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .and_then(|msg| {
                    msg.split("in ")
                        .last()
                        .and_then(|s| s.trim_end_matches('.').trim_end_matches('s').parse::<u64>().ok())
                })
                .unwrap_or(5);
            RemoteError::RateLimited {
                retry_after_secs: retry_secs,
            }
        }
        code if code >= 500 => RemoteError::ApiRequest {
            message: format!("Server error ({}): {}", status, body),
        },
        _ => RemoteError::ApiRequest {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}

fn failure_message(json: &Value, raw_status: &str) -> String {
    json["error"]["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Research job {raw_status}"))
}

/// Extract report, reasoning summary, citations and usage from a Responses
/// API object.
pub fn parse_response(json: &Value) -> Result<ResearchPayload, RemoteError> {
    let cited_at = json["created_at"]
        .as_i64()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    let mut report_parts = Vec::new();
    let mut summaries = Vec::new();
    let mut sources = Vec::new();

    for item in json["output"].as_array().into_iter().flatten() {
        match item["type"].as_str() {
            Some("message") => {
                for part in item["content"].as_array().into_iter().flatten() {
                    if part["type"].as_str() != Some("output_text") {
                        continue;
                    }
                    let text = part["text"].as_str().unwrap_or_default();
                    for annotation in part["annotations"].as_array().into_iter().flatten() {
                        if let Some(source) =
                            citation_source(annotation, text, sources.len() + 1, cited_at)
                        {
                            sources.push(source);
                        }
                    }
                    if !text.is_empty() {
                        report_parts.push(text.to_string());
                    }
                }
            }
            Some("reasoning") => {
                for summary in item["summary"].as_array().into_iter().flatten() {
                    if let Some(text) = summary["text"].as_str().filter(|t| !t.trim().is_empty()) {
                        summaries.push(text.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    if report_parts.is_empty() {
        return Err(RemoteError::ResponseParse {
            message: "response contains no report text".into(),
        });
    }

    let usage = &json["usage"];
    Ok(ResearchPayload {
        report: report_parts.join("\n\n"),
        thought_process: (!summaries.is_empty()).then(|| summaries.join("\n\n")),
        sources,
        usage: TokenUsage {
            input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
            reasoning_tokens: usage["output_tokens_details"]["reasoning_tokens"]
                .as_u64()
                .unwrap_or(0),
        },
    })
}

fn citation_source(
    annotation: &Value,
    text: &str,
    number: usize,
    cited_at: DateTime<Utc>,
) -> Option<Source> {
    if annotation["type"].as_str() != Some("url_citation") {
        return None;
    }
    let url = annotation["url"].as_str()?.to_string();
    let title = annotation["title"]
        .as_str()
        .filter(|t| !t.is_empty())
        .unwrap_or(url.as_str())
        .to_string();
    let snippet = match (
        annotation["start_index"].as_u64(),
        annotation["end_index"].as_u64(),
    ) {
        (Some(start), Some(end)) if end > start => text
            .chars()
            .skip(start as usize)
            .take((end - start) as usize)
            .collect::<String>()
            .trim()
            .to_string(),
        _ => String::new(),
    };
    Some(Source {
        id: format!("src-{number}"),
        title,
        url,
        snippet,
        cited_at,
    })
}
