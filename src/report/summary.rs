//! Rendering of the final run summary for stdout

use std::fmt::Write as _;

use crate::config::OutputFormat;
use crate::model::RunSummary;

/// A run summary ready to be written to stdout
#[derive(Debug, Clone, Copy)]
pub struct SummaryReport<'a> {
    summary: &'a RunSummary,
}

impl<'a> SummaryReport<'a> {
    /// Wrap a finished summary
    pub fn new(summary: &'a RunSummary) -> Self {
        Self { summary }
    }

    /// Render in the requested format
    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Text => self.render_text(),
            OutputFormat::Json => self.render_json(),
        }
    }

    fn render_text(&self) -> String {
        let s = self.summary;
        let mut out = String::new();

        for item in &s.items {
            let _ = match &item.error_detail {
                Some(detail) => writeln!(out, "{}\t{}\t{}", item.subject, item.status, detail),
                None => writeln!(out, "{}\t{}", item.subject, item.status),
            };
        }

        let _ = write!(
            out,
            "total={} succeeded={} failed={} skipped={}",
            s.total, s.succeeded, s.failed, s.skipped
        );
        if let Some(key) = &s.key_fingerprint {
            let _ = write!(out, " key={}", key.short());
        }
        if s.dry_run {
            out.push_str(" (dry-run)");
        }
        if s.cancelled {
            out.push_str(" (cancelled)");
        }
        out.push('\n');
        out
    }

    fn render_json(&self) -> String {
        // RunSummary holds only strings, counts and timestamps
        match serde_json::to_string_pretty(self.summary) {
            Ok(mut json) => {
                json.push('\n');
                json
            }
            Err(e) => format!("{{\"error\":\"failed to serialize summary: {e}\"}}\n"),
        }
    }
}
