//! # Dossier Export
//!
//! Turns a completed [`Research`] into a Markdown, PDF or DOCX document.
//!
//! Every format renders the same [`ExportDocument`], so section order is
//! identical everywhere: title, metadata, report, research process (when
//! present), sources (when present). Renderers only produce bytes; writing
//! them somewhere is the job of a [`DocumentSink`].

pub mod document;
pub mod docx;
pub mod markdown;
pub mod pdf;
pub mod sink;

use serde::{Deserialize, Serialize};
use tracing::debug;

use dossier_core::error::ExportError;
use dossier_core::types::Research;

pub use document::{ExportDocument, MetadataEntry, Section};
pub use docx::DocxRenderer;
pub use markdown::MarkdownRenderer;
pub use pdf::PdfRenderer;
pub use sink::{DirectorySink, DocumentSink, ExportArtifact, MemorySink, sanitize_filename};

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Markdown,
    Pdf,
    Docx,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Markdown, ExportFormat::Pdf, ExportFormat::Docx];

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Docx => "docx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "text/markdown",
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Markdown => write!(f, "markdown"),
            ExportFormat::Pdf => write!(f, "pdf"),
            ExportFormat::Docx => write!(f, "docx"),
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "pdf" => Ok(ExportFormat::Pdf),
            "docx" | "word" => Ok(ExportFormat::Docx),
            other => Err(ExportError::UnknownFormat {
                name: other.to_string(),
            }),
        }
    }
}

/// Which optional sections to include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    pub include_thought_process: bool,
    pub include_sources: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_thought_process: true,
            include_sources: true,
        }
    }
}

/// Renders an [`ExportDocument`] to bytes in one format.
pub trait Renderer {
    fn format(&self) -> ExportFormat;

    fn render(&self, document: &ExportDocument) -> Result<Vec<u8>, ExportError>;
}

pub fn renderer_for(format: ExportFormat) -> Box<dyn Renderer> {
    match format {
        ExportFormat::Markdown => Box::new(MarkdownRenderer),
        ExportFormat::Pdf => Box::new(PdfRenderer::default()),
        ExportFormat::Docx => Box::new(DocxRenderer),
    }
}

/// Render a completed job.
///
/// Fails with `PreconditionFailed` if the job has no result; nothing is
/// rendered in that case.
pub fn export(
    research: &Research,
    format: ExportFormat,
    options: ExportOptions,
) -> Result<ExportArtifact, ExportError> {
    let document = ExportDocument::from_research(research, options)?;
    let bytes = renderer_for(format).render(&document)?;
    debug!(
        job_id = %research.id,
        format = %format,
        bytes = bytes.len(),
        "Rendered export"
    );
    Ok(ExportArtifact {
        file_name: sink::file_name(&research.title, format),
        mime_type: format.mime_type(),
        bytes,
        folder: Some(sink::folder_name(research)),
    })
}
