//! Shared report rendering: per-object change lines and the summary table.

use tabled::settings::Style;
use tabled::{Table, Tabled};

use hubward_core::ChangeState;
use hubward_sync::{ChangeReport, ProcessorOutcome, ReportState};

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "metric")]
    metric: &'static str,
    #[tabled(rename = "count")]
    count: usize,
}

/// Print per-object change reports in tier order.
pub fn print_reports(reports: &[ChangeReport], verbose: bool) {
    for report in reports {
        let marker = match report.state {
            ReportState::Applied if report.changes.is_empty() => "·",
            ReportState::Applied => "✓",
            ReportState::Failed => "✗",
            _ => "~",
        };
        if report.changes.is_empty() && report.failure.is_none() && !verbose {
            continue;
        }
        println!("{marker} {}", report.key);
        for change in &report.changes {
            let state = match &change.state {
                ChangeState::Applied => "applied",
                ChangeState::WouldApply => "would apply",
                ChangeState::Skipped => "skipped",
                ChangeState::Failed(_) => "failed",
                ChangeState::Pending => "pending",
            };
            println!("    [{state}] {change}");
            if let ChangeState::Failed(message) = &change.state {
                println!("        fault: {message}");
            }
        }
        if let Some(failure) = &report.failure {
            println!("    {failure}");
        }
    }
}

/// Print the run summary as a table.
pub fn print_summary(outcome: &ProcessorOutcome) {
    let summary = &outcome.summary;
    let rows = vec![
        SummaryRow { metric: "objects", count: summary.total_objects },
        SummaryRow { metric: "tiers", count: summary.tiers },
        SummaryRow { metric: "unchanged", count: summary.unchanged },
        SummaryRow { metric: "changes", count: summary.total_changes },
        SummaryRow { metric: "applied changes", count: summary.applied_changes },
        SummaryRow { metric: "would apply", count: summary.would_apply_changes },
        SummaryRow { metric: "skipped changes", count: summary.skipped_changes },
        SummaryRow { metric: "failed objects", count: summary.failed },
        SummaryRow { metric: "phantoms", count: summary.phantoms.len() },
    ];
    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{table}");

    for key in &summary.phantoms {
        println!("phantom: {key} (referenced but not declared)");
    }
    for key in &summary.dropped_for_phantoms {
        println!("dropped: {key} (dependency closure contains a phantom)");
    }
    if summary.cancelled {
        println!("run cancelled before completion; remaining tiers discarded");
    }
}
