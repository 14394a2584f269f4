//! PDF renderer built on genpdf.
//!
//! The document is first flattened into ordered [`PdfBlock`]s, then typeset
//! in DejaVu Sans, which is embedded so any text the report carries renders
//! as written. genpdf wraps at word boundaries and starts a new page between
//! lines, so a word never straddles a page break.

use std::borrow::Cow;

use dossier_core::error::ExportError;
use dossier_core::types::Source;
use genpdf::elements::{Break, Paragraph};
use genpdf::fonts::{FontData, FontFamily};
use genpdf::style::{Color, Style, StyledString};
use genpdf::{Document, Element as _, Margins, SimplePageDecorator};

use crate::document::{ExportDocument, Section, paragraphs};
use crate::{ExportFormat, Renderer};

static REGULAR: &[u8] = include_bytes!("../fonts/DejaVuSans.ttf");
static BOLD: &[u8] = include_bytes!("../fonts/DejaVuSans-Bold.ttf");
static ITALIC: &[u8] = include_bytes!("../fonts/DejaVuSans-Oblique.ttf");
static BOLD_ITALIC: &[u8] = include_bytes!("../fonts/DejaVuSans-BoldOblique.ttf");

/// genpdf's default paper size is A4.
const PAGE_WIDTH_MM: f64 = 210.0;
const SOURCE_INDENT_MM: u8 = 5;
const MM_TO_PT: f64 = 72.0 / 25.4;
/// Widest DejaVu Sans glyphs run slightly over one em.
const WIDEST_GLYPH_EM: f64 = 1.05;
const LINK_BLUE: Color = Color::Rgb(0, 102, 204);

/// What a block of text is, which decides how it is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStyle {
    Title,
    Meta,
    PromptLabel,
    Prompt,
    Heading,
    Body,
    SourceTitle,
    SourceUrl,
    SourceSnippet,
}

impl BlockStyle {
    fn font_size(self) -> u8 {
        match self {
            BlockStyle::Title => 20,
            BlockStyle::Heading => 14,
            BlockStyle::Body | BlockStyle::SourceTitle => 11,
            BlockStyle::Meta | BlockStyle::PromptLabel | BlockStyle::Prompt => 10,
            BlockStyle::SourceUrl | BlockStyle::SourceSnippet => 9,
        }
    }

    fn style(self) -> Style {
        let base = Style::new().with_font_size(self.font_size());
        match self {
            BlockStyle::Title | BlockStyle::Heading | BlockStyle::PromptLabel | BlockStyle::SourceTitle => {
                base.bold()
            }
            BlockStyle::Prompt | BlockStyle::SourceSnippet => base.italic(),
            BlockStyle::SourceUrl => base.with_color(LINK_BLUE),
            BlockStyle::Meta | BlockStyle::Body => base,
        }
    }

    fn indent_mm(self) -> u8 {
        match self {
            BlockStyle::SourceUrl | BlockStyle::SourceSnippet => SOURCE_INDENT_MM,
            _ => 0,
        }
    }

    /// Blank space before and after the block, in lines.
    fn spacing(self) -> (f64, f64) {
        match self {
            BlockStyle::Title => (0.0, 0.5),
            BlockStyle::PromptLabel => (0.5, 0.0),
            BlockStyle::Heading => (1.0, 0.3),
            BlockStyle::Body => (0.0, 0.5),
            BlockStyle::SourceTitle => (0.4, 0.0),
            BlockStyle::Meta | BlockStyle::Prompt | BlockStyle::SourceUrl | BlockStyle::SourceSnippet => {
                (0.0, 0.0)
            }
        }
    }
}

/// One paragraph of the laid-out document. Single newlines inside `text` are
/// line breaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfBlock {
    pub style: BlockStyle,
    pub text: String,
}

impl PdfBlock {
    fn new(style: BlockStyle, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PdfRenderer {
    /// Page margin on every side, in millimetres.
    pub margin_mm: u8,
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self { margin_mm: 18 }
    }
}

impl Renderer for PdfRenderer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Pdf
    }

    fn render(&self, document: &ExportDocument) -> Result<Vec<u8>, ExportError> {
        let content_width_mm = PAGE_WIDTH_MM - 2.0 * f64::from(self.margin_mm);
        if content_width_mm <= f64::from(SOURCE_INDENT_MM) {
            return Err(render_error("page margins leave no room for text"));
        }

        let mut doc = Document::new(font_family()?);
        doc.set_title(document.title.clone());
        doc.set_minimal_conformance();
        doc.set_font_size(11);
        doc.set_line_spacing(1.25);
        let mut decorator = SimplePageDecorator::new();
        decorator.set_margins(i32::from(self.margin_mm));
        doc.set_page_decorator(decorator);

        for block in self.blocks(document) {
            push_block(&mut doc, &block, content_width_mm);
        }

        let mut bytes = Vec::new();
        doc.render(&mut bytes)
            .map_err(|e| render_error(e.to_string()))?;
        Ok(bytes)
    }
}

impl PdfRenderer {
    /// The document as the ordered blocks the PDF is typeset from.
    pub fn blocks(&self, document: &ExportDocument) -> Vec<PdfBlock> {
        let mut blocks = vec![PdfBlock::new(BlockStyle::Title, document.title.as_str())];
        blocks.extend(
            document
                .metadata
                .iter()
                .map(|entry| PdfBlock::new(BlockStyle::Meta, format!("{}: {}", entry.label, entry.value))),
        );

        if !document.prompt.is_empty() {
            blocks.push(PdfBlock::new(BlockStyle::PromptLabel, "Prompt:"));
            blocks.push(PdfBlock::new(BlockStyle::Prompt, document.prompt.as_str()));
        }

        for section in document.sections() {
            blocks.push(PdfBlock::new(BlockStyle::Heading, section.heading()));
            match section {
                Section::Report(text) | Section::ThoughtProcess(text) => blocks.extend(
                    paragraphs(text)
                        .into_iter()
                        .map(|paragraph| PdfBlock::new(BlockStyle::Body, paragraph)),
                ),
                Section::Sources(sources) => source_blocks(&mut blocks, sources),
            }
        }
        blocks
    }
}

fn source_blocks(blocks: &mut Vec<PdfBlock>, sources: &[Source]) {
    for (i, source) in sources.iter().enumerate() {
        blocks.push(PdfBlock::new(
            BlockStyle::SourceTitle,
            format!("{}. {}", i + 1, source.title),
        ));
        blocks.push(PdfBlock::new(BlockStyle::SourceUrl, source.url.as_str()));
        if !source.snippet.trim().is_empty() {
            blocks.push(PdfBlock::new(BlockStyle::SourceSnippet, source.snippet.trim()));
        }
    }
}

fn push_block(doc: &mut Document, block: &PdfBlock, content_width_mm: f64) {
    let (before, after) = block.style.spacing();
    if before > 0.0 {
        doc.push(Break::new(before));
    }

    let indent = block.style.indent_mm();
    let width_pt = (content_width_mm - f64::from(indent)) * MM_TO_PT;
    let max_chars = max_word_chars(width_pt, block.style.font_size());
    for line in block.text.lines().filter(|line| !line.trim().is_empty()) {
        let text = StyledString::new(fit_words(line, max_chars).into_owned(), block.style.style());
        if indent > 0 {
            doc.push(Paragraph::new(text).padded(Margins::trbl(0, 0, 0, i32::from(indent))));
        } else {
            doc.push(Paragraph::new(text));
        }
    }

    if after > 0.0 {
        doc.push(Break::new(after));
    }
}

/// Longest run of characters guaranteed to fit on one line at `font_size`.
fn max_word_chars(width_pt: f64, font_size: u8) -> usize {
    let glyph_pt = f64::from(font_size) * WIDEST_GLYPH_EM;
    ((width_pt / glyph_pt).floor() as usize).max(1)
}

/// genpdf only wraps at whitespace and rejects a word wider than the line,
/// so words longer than `max_chars` (typically URLs) are cut into pieces.
fn fit_words(line: &str, max_chars: usize) -> Cow<'_, str> {
    if line.split_whitespace().all(|word| word.chars().count() <= max_chars) {
        return Cow::Borrowed(line);
    }
    let words: Vec<String> = line
        .split_whitespace()
        .map(|word| {
            let chars: Vec<char> = word.chars().collect();
            chars
                .chunks(max_chars)
                .map(|piece| piece.iter().collect::<String>())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    Cow::Owned(words.join(" "))
}

fn font_family() -> Result<FontFamily<FontData>, ExportError> {
    let load = |bytes: &[u8]| {
        FontData::new(bytes.to_vec(), None).map_err(|e| render_error(format!("font: {e}")))
    };
    Ok(FontFamily {
        regular: load(REGULAR)?,
        bold: load(BOLD)?,
        italic: load(ITALIC)?,
        bold_italic: load(BOLD_ITALIC)?,
    })
}

fn render_error(message: impl Into<String>) -> ExportError {
    ExportError::Render {
        format: ExportFormat::Pdf.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExportOptions;
    use crate::document::fixtures::completed_research;
    use dossier_core::types::Research;
    use pretty_assertions::assert_eq;

    fn document(research: &Research) -> ExportDocument {
        ExportDocument::from_research(research, ExportOptions::default()).unwrap()
    }

    fn render(research: &Research) -> Vec<u8> {
        PdfRenderer::default().render(&document(research)).unwrap()
    }

    /// Page objects, skipping the `/Pages` tree node.
    fn page_count(bytes: &[u8]) -> usize {
        let text = String::from_utf8_lossy(bytes);
        ["/Type/Page", "/Type /Page"]
            .iter()
            .map(|needle| {
                text.match_indices(needle)
                    .filter(|(at, _)| !text[at + needle.len()..].starts_with('s'))
                    .count()
            })
            .sum()
    }

    fn with_report(report: String) -> Research {
        let mut research = completed_research();
        if let Some(result) = research.result.as_mut() {
            result.report = report;
        }
        research
    }

    #[test]
    fn test_blocks_keep_section_order() {
        let blocks = PdfRenderer::default().blocks(&document(&completed_research()));
        let headings: Vec<&str> = blocks
            .iter()
            .filter(|b| b.style == BlockStyle::Heading)
            .map(|b| b.text.as_str())
            .collect();
        assert_eq!(headings, vec!["Research Report", "Research Process", "Sources"]);
        assert_eq!(blocks[0], PdfBlock::new(BlockStyle::Title, "Solar adoption in Europe"));

        let body: Vec<&str> = blocks
            .iter()
            .filter(|b| b.style == BlockStyle::Body)
            .map(|b| b.text.as_str())
            .collect();
        assert_eq!(
            body,
            vec![
                "Solar capacity grew quickly.",
                "Germany led installations.",
                "Searched for capacity statistics."
            ]
        );

        let urls: Vec<&str> = blocks
            .iter()
            .filter(|b| b.style == BlockStyle::SourceUrl)
            .map(|b| b.text.as_str())
            .collect();
        assert_eq!(urls, vec!["https://example.com/eu-solar", "https://example.com/install"]);
        // The second source has no snippet.
        assert_eq!(
            blocks.iter().filter(|b| b.style == BlockStyle::SourceSnippet).count(),
            1
        );
    }

    #[test]
    fn test_renders_pdf() {
        let bytes = render(&completed_research());
        assert!(bytes.starts_with(b"%PDF-"));
        assert_eq!(page_count(&bytes), 1);
    }

    #[test]
    fn test_long_report_spans_pages() {
        let report = (0..200)
            .map(|i| format!("Paragraph {i} about grid capacity and storage."))
            .collect::<Vec<_>>()
            .join("\n\n");
        assert!(page_count(&render(&with_report(report))) > 3);
    }

    #[test]
    fn test_non_latin_text_and_long_words_render() {
        let report = format!(
            "Grüße aus Köln: naïve café, Ελληνικά, Привет, “quoted” — dash.\n\n{}",
            "x".repeat(500)
        );
        let bytes = render(&with_report(report));
        assert!(bytes.starts_with(b"%PDF-"));
    }

    #[test]
    fn test_fit_words_splits_only_overlong_words() {
        assert_eq!(fit_words("short words stay", 10), "short words stay");
        assert_eq!(fit_words("ab abcdefgh", 3), "ab abc def gh");
        assert!(matches!(fit_words("fits", 4), Cow::Borrowed(_)));
    }

    #[test]
    fn test_max_word_chars_never_zero() {
        assert_eq!(max_word_chars(1.0, 20), 1);
        assert!(max_word_chars(490.0, 11) > 40);
    }

    #[test]
    fn test_oversized_margins_are_render_error() {
        let renderer = PdfRenderer { margin_mm: 104 };
        assert!(matches!(
            renderer.render(&document(&completed_research())),
            Err(ExportError::Render { .. })
        ));
    }
}
