//! Human-readable rendering of verification reports and registry contents.

use colored::{ColoredString, Colorize};
use warden_kernel::{Finding, VerificationReport};
use warden_registry::StatusRegistry;
use warden_types::Status;

fn status_label(status: Status) -> ColoredString {
    let label = format!("{:<15}", status.as_str());
    match status {
        Status::Enabled => label.green(),
        Status::Disabled => label.red(),
        Status::NotImplemented => label.yellow(),
    }
}

/// One line per finding: status, key, and the failure reason if any.
pub(crate) fn finding_line(finding: &Finding) -> String {
    let mut line = format!("  {} {}", status_label(finding.status), finding.key);
    if let Some(reason) = &finding.reason {
        line.push_str(&format!("  {}", reason.to_string().dimmed()));
    }
    line
}

pub fn print_report(report: &VerificationReport) {
    println!(
        "{} {} {}",
        "Verification pass".bold(),
        report.pass_id.to_string().dimmed(),
        format!(
            "({} ms)",
            (report.finished_at - report.started_at).num_milliseconds()
        )
        .dimmed()
    );
    for finding in &report.findings {
        println!("{}", finding_line(finding));
    }
    println!(
        "  {} enabled, {} disabled, {} not implemented",
        report.count(Status::Enabled).to_string().green(),
        report.count(Status::Disabled).to_string().red(),
        report.count(Status::NotImplemented).to_string().yellow()
    );
}

pub fn print_registry(registry: &StatusRegistry) {
    if registry.is_empty() {
        println!("  {}", "registry is empty".dimmed());
        return;
    }
    for group in registry.groups() {
        println!("[{}]", group.bold());
        for (name, status) in registry.group(group) {
            println!("  {} {name}", status_label(status));
        }
    }
}
