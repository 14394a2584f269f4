//! Markdown renderer. Pure string building; identical input gives identical bytes.

use dossier_core::error::ExportError;
use dossier_core::types::Source;

use crate::document::{ExportDocument, Section};
use crate::{ExportFormat, Renderer};

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Markdown
    }

    fn render(&self, document: &ExportDocument) -> Result<Vec<u8>, ExportError> {
        Ok(render_markdown(document).into_bytes())
    }
}

pub fn render_markdown(document: &ExportDocument) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", document.title));

    for entry in &document.metadata {
        out.push_str(&format!("- **{}:** {}\n", entry.label, entry.value));
    }
    out.push('\n');

    if !document.prompt.is_empty() {
        let fence = fence_for(&document.prompt);
        out.push_str(&format!("**Prompt:**\n\n{fence}text\n{}\n{fence}\n\n", document.prompt));
    }
    out.push_str("---\n");

    for section in document.sections() {
        out.push_str(&format!("\n## {}\n\n", section.heading()));
        match section {
            Section::Report(text) | Section::ThoughtProcess(text) => {
                out.push_str(text);
                out.push('\n');
            }
            Section::Sources(sources) => push_sources(&mut out, sources),
        }
    }
    out
}

fn push_sources(out: &mut String, sources: &[Source]) {
    for (i, source) in sources.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{}]({})\n",
            i + 1,
            escape_link_text(&source.title),
            escape_url(&source.url)
        ));
        for line in source.snippet.lines().filter(|l| !l.trim().is_empty()) {
            out.push_str(&format!("   > {}\n", line.trim()));
        }
    }
}

/// A backtick fence longer than any backtick run in `text`.
fn fence_for(text: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in text.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}

fn escape_link_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('[', "\\[")
        .replace(']', "\\]")
}

fn escape_url(url: &str) -> String {
    url.replace(' ', "%20").replace('(', "%28").replace(')', "%29")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExportOptions;
    use crate::document::fixtures::completed_research;
    use pretty_assertions::assert_eq;

    fn document() -> ExportDocument {
        ExportDocument::from_research(&completed_research(), ExportOptions::default()).unwrap()
    }

    #[test]
    fn test_full_rendering() {
        let expected = "\
# Solar adoption in Europe

- **Created:** 2025-06-26 09:30 UTC
- **Completed:** 2025-06-26 09:52 UTC
- **Model:** o3-deep-research
- **Status:** completed
- **Tokens:** 1.0K input / 2.0K output
- **Cost:** $0.09

**Prompt:**

```text
Explain solar adoption trends in Europe since 2020.
```

---

## Research Report

Solar capacity grew quickly.

Germany led installations.

## Research Process

Searched for capacity statistics.

## Sources

1. [EU Solar Report](https://example.com/eu-solar)
   > Solar capacity grew quickly
2. [Installations 2024](https://example.com/install)
";
        assert_eq!(render_markdown(&document()), expected);
    }

    #[test]
    fn test_render_is_deterministic() {
        let doc = document();
        let a = MarkdownRenderer.render(&doc).unwrap();
        let b = MarkdownRenderer.render(&doc).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_optional_sections_omitted() {
        let options = ExportOptions {
            include_thought_process: false,
            include_sources: false,
        };
        let doc = ExportDocument::from_research(&completed_research(), options).unwrap();
        let md = render_markdown(&doc);
        assert!(!md.contains("## Research Process"));
        assert!(!md.contains("## Sources"));
        assert!(md.ends_with("Germany led installations.\n"));
    }

    #[test]
    fn test_prompt_fence_outgrows_backticks() {
        assert_eq!(fence_for("plain"), "```");
        assert_eq!(fence_for("has ```code``` inside"), "````");
    }

    #[test]
    fn test_link_escaping() {
        assert_eq!(escape_link_text("a [b] c"), "a \\[b\\] c");
        assert_eq!(escape_url("https://x.org/a (b)"), "https://x.org/a%20%28b%29");
    }
}
