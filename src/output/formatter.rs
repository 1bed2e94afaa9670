//! Output formatters for run results
//!
//! Per-package progress lines and the end-of-run report in text, JSON or CSV.

use anyhow::{Context, Result};
use std::str::FromStr;

use crate::executor::{RunReport, Verdict};
use crate::models::{Response, Status};

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonPretty,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "table" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            "csv" => Ok(OutputFormat::Csv),
            other => anyhow::bail!("Unknown output format: {other}"),
        }
    }
}

/// Result formatter
pub struct ReportFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ReportFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// One line per completed package
    pub fn format_progress(&self, response: &Response, done: usize, total: usize) -> String {
        let width = total.to_string().len();
        let status = match (&response.status, self.colorize) {
            (Status::Success, true) => "\x1b[32mOK\x1b[0m".to_string(),
            (Status::Success, false) => "OK".to_string(),
            (Status::Failure(message), true) => format!("\x1b[31m{}\x1b[0m", message.trim_end()),
            (Status::Failure(message), false) => message.trim_end().to_string(),
        };

        format!(
            "[{:>width$}/{}] {}: {}",
            done,
            total,
            response.unit_id,
            status,
            width = width
        )
    }

    /// Consolidated end-of-run report
    pub fn format_report(&self, report: &RunReport) -> Result<String> {
        match self.format {
            OutputFormat::Text => Ok(self.format_report_text(report)),
            OutputFormat::Json => {
                serde_json::to_string(report).context("Failed to serialize report")
            }
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(report).context("Failed to serialize report")
            }
            OutputFormat::Csv => self.format_report_csv(report),
        }
    }

    fn format_report_text(&self, report: &RunReport) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "\nTested {} packages with {} workers in {}ms ({} installed, {} without manifest, install {}ms)\n",
            report.tested,
            report.workers,
            report.dispatch_ms,
            report.installed,
            report.install_skipped,
            report.install_ms
        ));

        let failures = match &report.verdict {
            Verdict::Success => {
                let line = format!("All {} packages passed", report.tested);
                if self.colorize {
                    output.push_str(&format!("\x1b[32m{line}\x1b[0m\n"));
                } else {
                    output.push_str(&line);
                    output.push('\n');
                }
                return output;
            }
            Verdict::Failure(failures) => failures,
        };

        let header = format!("{} of {} packages failed:", failures.len(), report.tested);
        if self.colorize {
            output.push_str(&format!("\x1b[31m{header}\x1b[0m\n"));
        } else {
            output.push_str(&header);
            output.push('\n');
        }

        for failure in failures {
            let mut lines = failure.message.trim_end().lines();
            output.push_str(&format!(
                "  {}: {}\n",
                failure.unit_id,
                lines.next().unwrap_or_default()
            ));
            for line in lines {
                output.push_str(&format!("    {line}\n"));
            }
        }

        output
    }

    fn format_report_csv(&self, report: &RunReport) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["unit_id", "message"])?;
        for failure in report.verdict.failures() {
            writer.write_record([failure.unit_id.as_str(), failure.message.as_str()])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV report: {}", e.error()))?;
        String::from_utf8(bytes).context("CSV report is not UTF-8")
    }
}
