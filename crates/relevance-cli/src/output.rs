use clap::ValueEnum;
use relevance_core::RunSummary;
use relevance_runtime::{RunReport, UsageSnapshot};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Summary format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Debug, Serialize)]
struct JsonSummary<'a> {
    #[serde(flatten)]
    summary: &'a RunSummary,
    usage: &'a UsageSnapshot,
    aborted: bool,
    output: Option<&'a str>,
}

/// Write the run summary in the requested format.
pub fn write_summary<W: Write>(
    mut out: W,
    report: &RunReport,
    destination: Option<&str>,
    format: OutputFormat,
) -> io::Result<()> {
    let summary = report.result.summary();
    match format {
        OutputFormat::Plain => write_plain(&mut out, &summary, report, destination),
        OutputFormat::Json => {
            let json = JsonSummary {
                summary: &summary,
                usage: &report.usage,
                aborted: report.aborted,
                output: destination,
            };
            serde_json::to_writer_pretty(&mut out, &json)?;
            writeln!(out)
        }
    }
}

fn write_plain<W: Write>(
    out: &mut W,
    summary: &RunSummary,
    report: &RunReport,
    destination: Option<&str>,
) -> io::Result<()> {
    let elapsed = summary.finished_at - summary.started_at;

    writeln!(out, "RUN SUMMARY")?;
    writeln!(out, "-----------")?;
    writeln!(out, "{:<12} {}", "Documents", summary.total)?;
    writeln!(out, "{:<12} {}", "Succeeded", summary.succeeded)?;
    writeln!(out, "{:<12} {}", "Failed", summary.failed)?;
    for (kind, count) in &summary.failures_by_kind {
        writeln!(out, "  {:<10} {}", kind, count)?;
    }
    writeln!(
        out,
        "{:<12} {} ({} failed)",
        "Calls", report.usage.calls, report.usage.failed_calls
    )?;
    writeln!(
        out,
        "{:<12} {} in / {} out",
        "Tokens", report.usage.input_tokens, report.usage.output_tokens
    )?;
    writeln!(
        out,
        "{:<12} {:.1}s",
        "Elapsed",
        elapsed.num_milliseconds() as f64 / 1000.0
    )?;
    if let Some(path) = destination {
        writeln!(out, "{:<12} {}", "Output", path)?;
    }
    if report.aborted {
        writeln!(out, "Run aborted after repeated authentication failures.")?;
    }
    Ok(())
}
