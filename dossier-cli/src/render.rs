//! Terminal formatting of jobs and progress.

use dossier_core::cost::format_cost;
use dossier_core::types::format_token_count;
use dossier_core::{ProgressEvent, ProgressKind, Research};
use dossier_export::document::format_timestamp;

const ID_WIDTH: usize = 8;
const TITLE_WIDTH: usize = 48;
const WRAP_WIDTH: usize = 100;

/// Leading characters of a job id, enough to select it on the command line.
pub fn short_id(id: &str) -> &str {
    id.get(..ID_WIDTH).unwrap_or(id)
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

pub fn history_table(jobs: &[&Research]) -> String {
    let mut out = format!(
        "{:<8}  {:<9}  {:<20}  {:>8}  {}\n",
        "ID", "STATUS", "CREATED", "COST", "TITLE"
    );
    for job in jobs {
        let cost = job
            .cost
            .as_ref()
            .map(|c| format_cost(c.total_cost))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<8}  {:<9}  {:<20}  {:>8}  {}\n",
            short_id(&job.id),
            job.status.to_string(),
            format_timestamp(&job.created_at),
            cost,
            truncate(&job.title, TITLE_WIDTH)
        ));
    }
    out
}

pub fn job_details(job: &Research, full: bool) -> String {
    let mut out = format!("{}\n", job.title);
    out.push_str(&format!("  id:        {}\n", job.id));
    out.push_str(&format!("  status:    {}\n", job.status));
    out.push_str(&format!("  model:     {}\n", job.model));
    out.push_str(&format!("  created:   {}\n", format_timestamp(&job.created_at)));
    if let Some(at) = &job.completed_at {
        out.push_str(&format!("  finished:  {}\n", format_timestamp(at)));
    }
    if let Some(response_id) = &job.response_id {
        out.push_str(&format!("  remote:    {response_id}\n"));
    }
    if let Some(cost) = &job.cost {
        out.push_str(&format!(
            "  tokens:    {} in / {} out\n  cost:      {}\n",
            format_token_count(cost.input_tokens),
            format_token_count(cost.output_tokens),
            format_cost(cost.total_cost)
        ));
    }
    if let Some(error) = &job.error {
        out.push_str(&format!("  error:     {error}\n"));
    }

    out.push_str("\nPrompt:\n");
    out.push_str(&indented(&job.prompt));

    if let Some(result) = &job.result {
        out.push_str(&format!("\nReport ({} sources):\n", result.sources.len()));
        let report = if full {
            result.report.clone()
        } else {
            result
                .report
                .split("\n\n")
                .next()
                .unwrap_or_default()
                .to_string()
        };
        out.push_str(&indented(&report));
        if !full && result.report.contains("\n\n") {
            out.push_str("  ... (use --full for the whole report)\n");
        }
    }
    out
}

fn indented(text: &str) -> String {
    let options = textwrap::Options::new(WRAP_WIDTH)
        .initial_indent("  ")
        .subsequent_indent("  ");
    let mut out = String::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            out.push('\n');
        } else {
            out.push_str(&textwrap::fill(line, &options));
            out.push('\n');
        }
    }
    out
}

pub fn progress_line(event: &ProgressEvent) -> String {
    let marker = match event.kind {
        ProgressKind::Completed { .. } => "done",
        ProgressKind::Failed { .. } | ProgressKind::Cancelled => "stop",
        _ => "....",
    };
    format!(
        "[{marker}] {} {} {}",
        event.at.format("%H:%M:%S"),
        short_id(&event.job_id),
        event.kind
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_core::ResearchStatus;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a rather long title", 10), "a rathe...");
    }

    #[test]
    fn test_history_table_lists_each_job() {
        let mut done = Research::new("Done job", "p", "o3-deep-research");
        done.status = ResearchStatus::Error;
        let pending = Research::new("Pending job", "p", "o3-deep-research");
        let table = history_table(&[&done, &pending]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("error") && lines[1].ends_with("Done job"));
        assert!(lines[2].contains("pending") && lines[2].contains(" - "));
    }

    #[test]
    fn test_details_show_error() {
        let mut job = Research::new("Broken", "Explain X", "o3-deep-research");
        job.status = ResearchStatus::Error;
        job.error = Some("Cancelled by user".into());
        let details = job_details(&job, false);
        assert!(details.contains("error:     Cancelled by user"));
        assert!(details.contains("  Explain X\n"));
    }
}
