//! End-to-end exports of a job completed through the engine.

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use dossier_core::remote::{MockResearchService, ResearchPayload, ResearchService};
use dossier_core::{EngineConfig, ExecutionEngine, JobStore, Research, ResearchStatus};
use dossier_export::pdf::BlockStyle;
use dossier_export::{
    DirectorySink, DocumentSink, ExportDocument, ExportFormat, ExportOptions, MemorySink,
    PdfRenderer, export,
};
use pretty_assertions::assert_eq;

async fn completed_job() -> Research {
    completed_job_with(MockResearchService::sample_payload()).await
}

async fn completed_job_with(payload: ResearchPayload) -> Research {
    let store = JobStore::in_memory().into_shared();
    let remote: Arc<dyn ResearchService> = Arc::new(MockResearchService::completing_after(1, payload));
    let config = EngineConfig {
        poll_interval: Duration::from_millis(1),
        ..EngineConfig::default()
    };
    let engine = ExecutionEngine::new(store.clone(), remote, config);

    let research = Research::new("Grid storage & batteries", "Explain grid storage.", "o3-deep-research");
    let id = research.id.clone();
    store.lock().await.add(research).unwrap();
    engine.start(&id).await.unwrap().wait().await.unwrap();

    let guard = store.lock().await;
    let finished = guard.get(&id).unwrap().clone();
    assert_eq!(finished.status, ResearchStatus::Completed);
    finished
}

fn headings_in(text: &str, headings: &[&str]) -> Vec<usize> {
    headings.iter().map(|h| text.find(h).unwrap()).collect()
}

fn pdf_blocks(research: &Research) -> Vec<(BlockStyle, String)> {
    let document = ExportDocument::from_research(research, ExportOptions::default()).unwrap();
    PdfRenderer::default()
        .blocks(&document)
        .into_iter()
        .map(|b| (b.style, b.text))
        .collect()
}

/// Text of each `<w:p>` in document order, with `<w:br/>` as a newline.
fn docx_paragraphs(xml: &str) -> Vec<String> {
    const OPEN: &str = r#"<w:t xml:space="preserve">"#;
    const BREAK: &str = "<w:br/>";
    xml.split("<w:p>")
        .skip(1)
        .map(|mut rest| {
            let mut text = String::new();
            loop {
                let t = rest.find(OPEN);
                let br = rest.find(BREAK);
                match (t, br) {
                    (Some(t), Some(b)) if b < t => {
                        text.push('\n');
                        rest = &rest[b + BREAK.len()..];
                    }
                    (Some(t), _) => {
                        let start = t + OPEN.len();
                        let end = start + rest[start..].find("</w:t>").unwrap();
                        text.push_str(&rest[start..end]);
                        rest = &rest[end..];
                    }
                    (None, Some(b)) => {
                        text.push('\n');
                        rest = &rest[b + BREAK.len()..];
                    }
                    (None, None) => break,
                }
            }
            text.replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&quot;", "\"")
                .replace("&apos;", "'")
                .replace("&amp;", "&")
        })
        .collect()
}

/// The body of a `## heading` section of the Markdown export.
fn markdown_section<'a>(markdown: &'a str, heading: &str) -> &'a str {
    let marker = format!("\n## {heading}\n");
    let start = markdown.find(&marker).unwrap() + marker.len();
    let rest = &markdown[start..];
    match rest.find("\n## ") {
        Some(end) => &rest[..end],
        None => rest,
    }
}

/// Paragraphs as a reader sees them in Markdown: runs of non-blank lines.
fn markdown_paragraphs(section: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in section.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    out
}

/// `(title, url)` for every `N. [title](url)` line.
fn markdown_sources(section: &str) -> Vec<(String, String)> {
    section
        .lines()
        .filter_map(|line| {
            let (_, link) = line.split_once(". [")?;
            let (title, rest) = link.split_once("](")?;
            Some((title.to_string(), rest.strip_suffix(')')?.to_string()))
        })
        .collect()
}

/// Indexes of `expected` items inside `actual`, asserting each is present.
fn positions_of(actual: &[String], expected: &[String], what: &str) -> Vec<usize> {
    expected
        .iter()
        .map(|item| {
            actual
                .iter()
                .position(|a| a == item)
                .unwrap_or_else(|| panic!("{what}: missing paragraph {item:?} in {actual:#?}"))
        })
        .collect()
}

fn assert_increasing(positions: &[usize], what: &str) {
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "{what}: paragraphs out of order: {positions:?}"
    );
}

fn docx_body(bytes: &[u8]) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut part = archive.by_name("word/document.xml").unwrap();
    let mut xml = String::new();
    part.read_to_string(&mut xml).unwrap();
    xml
}

#[tokio::test]
async fn test_every_format_keeps_section_order() {
    let research = completed_job().await;
    let headings = ["Research Report", "Research Process", "Sources"];

    for format in ExportFormat::ALL {
        let artifact = export(&research, format, ExportOptions::default()).unwrap();
        assert_eq!(artifact.mime_type, format.mime_type());
        assert!(artifact.file_name.ends_with(format.extension()));

        let text = match format {
            ExportFormat::Markdown => String::from_utf8_lossy(&artifact.bytes).into_owned(),
            ExportFormat::Docx => docx_body(&artifact.bytes),
            ExportFormat::Pdf => {
                assert!(artifact.bytes.starts_with(b"%PDF-"));
                pdf_blocks(&research)
                    .into_iter()
                    .filter(|(style, _)| *style == BlockStyle::Heading)
                    .map(|(_, text)| text)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        let positions = headings_in(&text, &headings);
        assert!(
            positions.windows(2).all(|w| w[0] < w[1]),
            "{format} sections out of order"
        );
    }
}

#[tokio::test]
async fn test_markdown_export_is_byte_identical() {
    let research = completed_job().await;
    let a = export(&research, ExportFormat::Markdown, ExportOptions::default()).unwrap();
    let b = export(&research, ExportFormat::Markdown, ExportOptions::default()).unwrap();
    assert_eq!(a.bytes, b.bytes);
}

#[tokio::test]
async fn test_directory_sink_groups_by_job() {
    let research = completed_job().await;
    let dir = tempfile::tempdir().unwrap();
    let sink = DirectorySink::new(dir.path()).grouped(true);

    for format in ExportFormat::ALL {
        let artifact = export(&research, format, ExportOptions::default()).unwrap();
        sink.write(&artifact).unwrap();
    }

    let folder = dir.path().join(format!(
        "{}_Grid_storage_batteries",
        research.created_at.format("%Y-%m-%d")
    ));
    for ext in ["md", "pdf", "docx"] {
        assert!(folder.join(format!("Grid_storage_batteries.{ext}")).exists());
    }
}

#[tokio::test]
async fn test_options_strip_optional_sections() {
    let research = completed_job().await;
    let options = ExportOptions {
        include_thought_process: false,
        include_sources: false,
    };
    let sink = MemorySink::new();
    let artifact = export(&research, ExportFormat::Markdown, options).unwrap();
    sink.write(&artifact).unwrap();

    let written = sink.artifacts();
    let text = String::from_utf8_lossy(&written[0].bytes);
    assert!(text.contains("## Research Report"));
    assert!(!text.contains("## Sources"));
}

#[tokio::test]
async fn test_every_format_carries_the_same_paragraphs_and_sources() {
    let mut payload = MockResearchService::sample_payload();
    payload.report = "Storage costs fell sharply.\n\n\n\nPumped hydro still dominates capacity.\n \n\t\n\
                      Lithium-ion leads new installs.\nSodium-ion is close behind.\n\n\n"
        .to_string();
    payload.thought_process = Some("Compared agency figures.\n\n\nChecked vendor filings.".to_string());
    let research = completed_job_with(payload).await;

    let markdown = String::from_utf8(
        export(&research, ExportFormat::Markdown, ExportOptions::default())
            .unwrap()
            .bytes,
    )
    .unwrap();
    let report = markdown_paragraphs(markdown_section(&markdown, "Research Report"));
    let process = markdown_paragraphs(markdown_section(&markdown, "Research Process"));
    let sources = markdown_sources(markdown_section(&markdown, "Sources"));
    assert_eq!(
        report,
        vec![
            "Storage costs fell sharply.",
            "Pumped hydro still dominates capacity.",
            "Lithium-ion leads new installs.\nSodium-ion is close behind.",
        ]
    );
    assert_eq!(process.len(), 2);
    assert_eq!(sources.len(), 2);

    let mut expected: Vec<String> = report.iter().chain(&process).cloned().collect();

    // DOCX: one paragraph per Markdown paragraph, same order, nothing empty.
    let docx = export(&research, ExportFormat::Docx, ExportOptions::default()).unwrap();
    let paragraphs = docx_paragraphs(&docx_body(&docx.bytes));
    assert!(paragraphs.iter().all(|p| !p.trim().is_empty()), "{paragraphs:#?}");
    let mut docx_expected = expected.clone();
    docx_expected.extend(
        sources
            .iter()
            .enumerate()
            .map(|(i, (title, url))| format!("{}. {title}\n{url}", i + 1)),
    );
    assert_increasing(&positions_of(&paragraphs, &docx_expected, "docx"), "docx");

    // PDF: the same paragraphs as separate blocks, then each source title
    // immediately followed by its URL.
    let pdf = export(&research, ExportFormat::Pdf, ExportOptions::default()).unwrap();
    assert!(pdf.bytes.starts_with(b"%PDF-"));
    let blocks = pdf_blocks(&research);
    for (i, (title, url)) in sources.iter().enumerate() {
        expected.push(format!("{}. {title}", i + 1));
        expected.push(url.clone());
    }
    let texts: Vec<String> = blocks.iter().map(|(_, text)| text.clone()).collect();
    let positions = positions_of(&texts, &expected, "pdf");
    assert_increasing(&positions, "pdf");
    for pair in positions[report.len() + process.len()..].chunks(2) {
        assert_eq!(pair[1], pair[0] + 1);
        assert_eq!(blocks[pair[1]].0, BlockStyle::SourceUrl);
    }
    let body_blocks = blocks.iter().filter(|(style, _)| *style == BlockStyle::Body).count();
    assert_eq!(body_blocks, report.len() + process.len());
}
