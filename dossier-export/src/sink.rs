//! Destinations for rendered exports.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::info;

use dossier_core::error::ExportError;
use dossier_core::persistence::atomic_write;
use dossier_core::types::Research;

use crate::ExportFormat;

const MAX_FILE_STEM: usize = 50;
const FALLBACK_STEM: &str = "research";

/// A rendered document ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
    /// Suggested grouping folder; sinks may ignore it.
    pub folder: Option<String>,
}

/// Performs the actual write of an artifact.
pub trait DocumentSink: Send + Sync {
    /// Write the artifact and return where it went.
    fn write(&self, artifact: &ExportArtifact) -> Result<String, ExportError>;
}

/// Writes artifacts under a root directory, optionally one folder per job.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
    grouped: bool,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            grouped: false,
        }
    }

    pub fn grouped(mut self, grouped: bool) -> Self {
        self.grouped = grouped;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn target_path(&self, artifact: &ExportArtifact) -> PathBuf {
        match (&artifact.folder, self.grouped) {
            (Some(folder), true) => self.root.join(folder).join(&artifact.file_name),
            _ => self.root.join(&artifact.file_name),
        }
    }
}

impl DocumentSink for DirectorySink {
    fn write(&self, artifact: &ExportArtifact) -> Result<String, ExportError> {
        let path = self.target_path(artifact);
        atomic_write(&path, &artifact.bytes).map_err(|e| ExportError::Sink {
            file_name: artifact.file_name.clone(),
            message: e.to_string(),
        })?;
        info!(
            path = %path.display(),
            bytes = artifact.bytes.len(),
            mime = artifact.mime_type,
            "Export written"
        );
        Ok(path.display().to_string())
    }
}

/// Keeps artifacts in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    written: Mutex<Vec<ExportArtifact>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<ExportArtifact> {
        match self.written.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DocumentSink for MemorySink {
    fn write(&self, artifact: &ExportArtifact) -> Result<String, ExportError> {
        let mut written = match self.written.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        written.push(artifact.clone());
        Ok(format!("memory:{}", artifact.file_name))
    }
}

/// Turn a title into a safe file stem: every character outside `[A-Za-z0-9]`
/// becomes `_`, runs of `_` collapse, leading and trailing `_` are trimmed and
/// the result is cut to 50 characters.
pub fn sanitize_filename(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    // ASCII only, so byte and char lengths agree.
    let cut = &trimmed[..trimmed.len().min(MAX_FILE_STEM)];
    let cut = cut.trim_end_matches('_');
    if cut.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        cut.to_string()
    }
}

pub(crate) fn file_name(title: &str, format: ExportFormat) -> String {
    format!("{}.{}", sanitize_filename(title), format.extension())
}

/// `YYYY-MM-DD_<title>`, dated by job creation.
pub(crate) fn folder_name(research: &Research) -> String {
    format!(
        "{}_{}",
        research.created_at.format("%Y-%m-%d"),
        sanitize_filename(&research.title)
    )
}
