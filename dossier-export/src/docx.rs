//! DOCX renderer.
//!
//! Builds a minimal WordprocessingML package by hand: a document part, a
//! style part with `Title` and `Heading1`, core properties and the
//! relationship parts Word requires. Entries carry a fixed timestamp so the
//! archive is reproducible.

use std::io::{Cursor, Write};

use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use dossier_core::error::ExportError;
use dossier_core::types::Source;

use crate::document::{ExportDocument, Section, paragraphs};
use crate::{ExportFormat, Renderer};

const LINK_COLOR: &str = "0066CC";

#[derive(Debug, Clone, Copy, Default)]
pub struct DocxRenderer;

impl Renderer for DocxRenderer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Docx
    }

    fn render(&self, document: &ExportDocument) -> Result<Vec<u8>, ExportError> {
        let body = document_xml(&blocks(document));
        package(&document.title, &body).map_err(|e| ExportError::Render {
            format: ExportFormat::Docx.to_string(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Title,
    Heading,
    Normal,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Run {
    text: String,
    bold: bool,
    italic: bool,
    color: Option<&'static str>,
}

impl Run {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    fn bold(text: impl Into<String>) -> Self {
        Self {
            bold: true,
            ..Self::plain(text)
        }
    }

    fn italic(text: impl Into<String>) -> Self {
        Self {
            italic: true,
            ..Self::plain(text)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Block {
    style: Style,
    runs: Vec<Run>,
}

impl Block {
    fn new(style: Style, runs: Vec<Run>) -> Self {
        Self { style, runs }
    }
}

fn blocks(document: &ExportDocument) -> Vec<Block> {
    let mut out = vec![Block::new(Style::Title, vec![Run::plain(&document.title)])];

    for entry in &document.metadata {
        out.push(Block::new(
            Style::Normal,
            vec![
                Run::bold(format!("{}: ", entry.label)),
                Run::plain(&entry.value),
            ],
        ));
    }

    if !document.prompt.is_empty() {
        out.push(Block::new(
            Style::Normal,
            vec![Run::bold("Prompt: "), Run::italic(&document.prompt)],
        ));
    }

    for section in document.sections() {
        out.push(Block::new(Style::Heading, vec![Run::plain(section.heading())]));
        match section {
            Section::Report(text) | Section::ThoughtProcess(text) => {
                for paragraph in paragraphs(text) {
                    out.push(Block::new(Style::Normal, vec![Run::plain(paragraph)]));
                }
            }
            Section::Sources(sources) => push_sources(&mut out, sources),
        }
    }
    out
}

fn push_sources(out: &mut Vec<Block>, sources: &[Source]) {
    for (i, source) in sources.iter().enumerate() {
        out.push(Block::new(
            Style::Normal,
            vec![
                Run::bold(format!("{}. ", i + 1)),
                Run::bold(&source.title),
                Run::plain("\n"),
                Run {
                    color: Some(LINK_COLOR),
                    ..Run::plain(&source.url)
                },
            ],
        ));
        if !source.snippet.trim().is_empty() {
            out.push(Block::new(
                Style::Normal,
                vec![Run::italic(source.snippet.trim())],
            ));
        }
    }
}

fn document_xml(blocks: &[Block]) -> String {
    let mut body = String::new();
    for block in blocks {
        body.push_str("<w:p>");
        match block.style {
            Style::Title => body.push_str(r#"<w:pPr><w:pStyle w:val="Title"/></w:pPr>"#),
            Style::Heading => body.push_str(r#"<w:pPr><w:pStyle w:val="Heading1"/></w:pPr>"#),
            Style::Normal => {}
        }
        for run in &block.runs {
            push_run(&mut body, run);
        }
        body.push_str("</w:p>");
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{body}<w:sectPr><w:pgSz w:w=\"12240\" w:h=\"15840\"/>\
         <w:pgMar w:top=\"1000\" w:right=\"1000\" w:bottom=\"1000\" w:left=\"1000\"/></w:sectPr>\
         </w:body></w:document>"
    )
}

fn push_run(out: &mut String, run: &Run) {
    out.push_str("<w:r>");
    if run.bold || run.italic || run.color.is_some() {
        out.push_str("<w:rPr>");
        if run.bold {
            out.push_str("<w:b/>");
        }
        if run.italic {
            out.push_str("<w:i/>");
        }
        if let Some(color) = run.color {
            out.push_str(&format!(r#"<w:color w:val="{color}"/>"#));
        }
        out.push_str("</w:rPr>");
    }
    for (i, line) in run.text.split('\n').enumerate() {
        if i > 0 {
            out.push_str("<w:br/>");
        }
        if !line.is_empty() {
            out.push_str(&format!(
                r#"<w:t xml:space="preserve">{}</w:t>"#,
                escape_xml(line)
            ));
        }
    }
    out.push_str("</w:r>");
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Control characters other than tab are not allowed in XML 1.0.
            c if c.is_control() && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/></Relationships>"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri"/><w:sz w:val="22"/></w:rPr></w:rPrDefault><w:pPrDefault><w:pPr><w:spacing w:after="120"/></w:pPr></w:pPrDefault></w:docDefaults><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/></w:style><w:style w:type="paragraph" w:styleId="Title"><w:name w:val="Title"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:pPr><w:spacing w:after="240"/></w:pPr><w:rPr><w:b/><w:sz w:val="40"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:pPr><w:keepNext/><w:spacing w:before="240" w:after="120"/><w:outlineLvl w:val="0"/></w:pPr><w:rPr><w:b/><w:sz w:val="28"/></w:rPr></w:style></w:styles>"#;

fn core_xml(title: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <cp:coreProperties xmlns:cp=\"http://schemas.openxmlformats.org/package/2006/metadata/core-properties\" \
         xmlns:dc=\"http://purl.org/dc/elements/1.1/\"><dc:title>{}</dc:title>\
         <dc:creator>Dossier</dc:creator></cp:coreProperties>",
        escape_xml(title)
    )
}

fn package(title: &str, document: &str) -> zip::result::ZipResult<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let core = core_xml(title);
    let parts: [(&str, &str); 6] = [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", ROOT_RELS),
        ("docProps/core.xml", &core),
        ("word/document.xml", document),
        ("word/styles.xml", STYLES),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS),
    ];
    for (name, contents) in parts {
        zip.start_file(name, options)?;
        zip.write_all(contents.as_bytes())?;
    }
    Ok(zip.finish()?.into_inner())
}
