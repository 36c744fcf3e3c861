//! Console rendering of run results

use crate::demo::Counts;
use console::style;
use ferrosync_engine::{SyncOutcome, SyncProfileStatus, SyncResults};
use ferrosync_types::{SyncIssue, SyncStatistics};
use std::time::Duration;

/// Number of issues listed before the rest are summarized
const MAX_LISTED_ISSUES: usize = 10;

/// Display the outcome of one request
pub fn display_outcome(name: &str, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Ran(results) => display_results(results),
        SyncOutcome::SkippedBecauseBusy => println!(
            "{} {} skipped, another sync is running",
            style("⚠").yellow().bold(),
            style(name).cyan()
        ),
        SyncOutcome::Cancelled => println!(
            "{} {} cancelled",
            style("✗").yellow().bold(),
            style(name).cyan()
        ),
    }
}

/// Display run statistics
pub fn display_results(results: &SyncResults) {
    let marker = match results.status {
        SyncProfileStatus::Completed => style("✓").green().bold(),
        SyncProfileStatus::Cancelled => style("✗").yellow().bold(),
        _ => style("✗").red().bold(),
    };
    println!();
    println!(
        "{} {} {}",
        marker,
        style(&results.profile).bold().underlined(),
        style(results.status).dim()
    );
    println!("  Pulled: {}", style(results.pulled).green());
    println!("  Pushed: {}", style(results.pushed).green());
    display_statistics("Client", &results.client_statistics);
    display_statistics("Server", &results.server_statistics);
    println!(
        "  Duration: {}",
        style(format_duration(results.elapsed)).blue()
    );
    if let Some(error) = &results.error {
        println!("  Error: {}", style(error).red());
    }
    display_issues(&results.issues);
}

fn display_statistics(label: &str, statistics: &SyncStatistics) {
    println!(
        "  {}: {} enumerated, {} applied, {} skipped, {} corrections",
        label,
        statistics.enumerated,
        style(statistics.applied).green(),
        style(statistics.skipped).yellow(),
        statistics.corrections
    );
}

fn display_issues(issues: &[SyncIssue]) {
    if issues.is_empty() {
        return;
    }
    println!("  Issues: {}", style(issues.len()).red());
    for issue in issues.iter().take(MAX_LISTED_ISSUES) {
        println!(
            "    • {} {} {:?}{}",
            style(&issue.type_name).cyan(),
            style(issue.id).dim(),
            issue.issue_type,
            if issue.message.is_empty() {
                String::new()
            } else {
                format!(": {}", issue.message)
            }
        );
    }
    if issues.len() > MAX_LISTED_ISSUES {
        println!(
            "    {}",
            style(format!("... and {} more", issues.len() - MAX_LISTED_ISSUES)).dim()
        );
    }
}

/// Display row counts of both stores
pub fn display_counts(client: Counts, server: Counts) {
    println!();
    println!("{}", style("Store contents:").bold().underlined());
    println!(
        "  Client: {} projects, {} tasks",
        style(client.projects).cyan(),
        style(client.tasks).cyan()
    );
    println!(
        "  Server: {} projects, {} tasks",
        style(server.projects).cyan(),
        style(server.tasks).cyan()
    );
}

/// Format a duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
