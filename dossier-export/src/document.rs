//! Format-independent document model shared by every renderer.

use chrono::{DateTime, Utc};

use dossier_core::cost::format_cost;
use dossier_core::error::ExportError;
use dossier_core::types::{Research, ResearchStatus, Source, format_token_count};

use crate::ExportOptions;

pub const REPORT_HEADING: &str = "Research Report";
pub const PROCESS_HEADING: &str = "Research Process";
pub const SOURCES_HEADING: &str = "Sources";

/// One `label: value` line of the metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub label: &'static str,
    pub value: String,
}

/// The logical content of an export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportDocument {
    pub title: String,
    pub metadata: Vec<MetadataEntry>,
    pub prompt: String,
    pub report: String,
    pub thought_process: Option<String>,
    pub sources: Vec<Source>,
}

/// A body section, in render order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Section<'a> {
    Report(&'a str),
    ThoughtProcess(&'a str),
    Sources(&'a [Source]),
}

impl Section<'_> {
    pub fn heading(&self) -> &'static str {
        match self {
            Section::Report(_) => REPORT_HEADING,
            Section::ThoughtProcess(_) => PROCESS_HEADING,
            Section::Sources(_) => SOURCES_HEADING,
        }
    }
}

impl ExportDocument {
    /// Build the document for a completed job.
    pub fn from_research(research: &Research, options: ExportOptions) -> Result<Self, ExportError> {
        let result = match (&research.result, research.status) {
            (Some(result), ResearchStatus::Completed) => result,
            _ => {
                return Err(ExportError::PreconditionFailed {
                    id: research.id.clone(),
                    reason: format!(
                        "job is {}, only completed jobs with a result can be exported",
                        research.status
                    ),
                });
            }
        };

        let mut metadata = vec![MetadataEntry {
            label: "Created",
            value: format_timestamp(&research.created_at),
        }];
        if let Some(completed_at) = &research.completed_at {
            metadata.push(MetadataEntry {
                label: "Completed",
                value: format_timestamp(completed_at),
            });
        }
        metadata.push(MetadataEntry {
            label: "Model",
            value: research.model.clone(),
        });
        metadata.push(MetadataEntry {
            label: "Status",
            value: research.status.to_string(),
        });
        if let Some(cost) = &research.cost {
            metadata.push(MetadataEntry {
                label: "Tokens",
                value: format!(
                    "{} input / {} output",
                    format_token_count(cost.input_tokens),
                    format_token_count(cost.output_tokens)
                ),
            });
            metadata.push(MetadataEntry {
                label: "Cost",
                value: format_cost(cost.total_cost),
            });
        }

        let thought_process = result
            .thought_process
            .as_ref()
            .filter(|_| options.include_thought_process)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let sources = if options.include_sources {
            result.sources.clone()
        } else {
            Vec::new()
        };

        Ok(Self {
            title: research.title.clone(),
            metadata,
            prompt: research.prompt.trim().to_string(),
            report: result.report.trim().to_string(),
            thought_process,
            sources,
        })
    }

    /// Body sections in render order, skipping absent optional ones.
    pub fn sections(&self) -> Vec<Section<'_>> {
        let mut sections = vec![Section::Report(&self.report)];
        if let Some(thought) = &self.thought_process {
            sections.push(Section::ThoughtProcess(thought));
        }
        if !self.sources.is_empty() {
            sections.push(Section::Sources(&self.sources));
        }
        sections
    }
}

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Split text into paragraphs on blank lines. Empty paragraphs are dropped.
pub fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::TimeZone;
    use dossier_core::types::{ResearchCost, ResearchResult};

    use super::*;

    /// A completed job with fixed timestamps.
    pub fn completed_research() -> Research {
        let created = Utc.with_ymd_and_hms(2025, 6, 26, 9, 30, 0).unwrap();
        let completed = Utc.with_ymd_and_hms(2025, 6, 26, 9, 52, 0).unwrap();
        let mut research = Research::new(
            "Solar adoption in Europe",
            "Explain solar adoption trends in Europe since 2020.",
            "o3-deep-research",
        );
        research.created_at = created;
        research.status = ResearchStatus::Completed;
        research.completed_at = Some(completed);
        research.result = Some(ResearchResult {
            report: "Solar capacity grew quickly.\n\nGermany led installations.\n\n\n".into(),
            thought_process: Some("Searched for capacity statistics.".into()),
            sources: vec![
                Source {
                    id: "src-1".into(),
                    title: "EU Solar Report".into(),
                    url: "https://example.com/eu-solar".into(),
                    snippet: "Solar capacity grew quickly".into(),
                    cited_at: completed,
                },
                Source {
                    id: "src-2".into(),
                    title: "Installations 2024".into(),
                    url: "https://example.com/install".into(),
                    snippet: String::new(),
                    cited_at: completed,
                },
            ],
        });
        research.cost = Some(ResearchCost {
            input_tokens: 1000,
            output_tokens: 2000,
            total_cost: 0.09,
        });
        research
    }
}
