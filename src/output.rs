use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{GroupAssembly, GroupAudit, PlanResult, ProgressEvent, ProgressSink, RunSummary};
use crate::auditor::AuditReport;
use crate::domain::SourceKind;
use crate::fetcher::FetchReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_plan(result: &PlanResult) {
        let plan = &result.plan;
        println!("forcing plan for {}", plan.today);
        match (&plan.latest_available, &result.latest_available_error) {
            (Some(latest), _) => println!("  latest reanalysis available: {latest}"),
            (None, Some(err)) => println!("  latest reanalysis available: unknown ({err})"),
            (None, None) => println!("  latest reanalysis available: unknown"),
        }
        if plan.obligations.is_empty() {
            println!("  nothing to fetch");
        }
        for obligation in &plan.obligations {
            println!("  fetch {obligation}");
        }
        for day in &plan.permanent_gaps {
            println!("  permanent gap {day} (past forecast retention)");
        }
        for file in &result.corrupt_files {
            println!("  corrupt {} ({})", file.path.display(), file.reason);
        }
    }

    pub fn print_fetch(report: &FetchReport) {
        println!("fetch summary");
        for source in SourceKind::ALL {
            println!(
                "  {source}: {} fetched, {} skipped, {} deferred, {} failed",
                report.count(source, "fetched"),
                report.count(source, "skipped"),
                report.count(source, "deferred"),
                report.count(source, "failed"),
            );
        }
        for item in report.failures() {
            println!("  ! {} {}", item.obligation, item.outcome.label());
        }
        if !report.swept.is_empty() {
            println!("  retired {} superseded forecast file(s)", report.swept.len());
        }
    }

    pub fn print_assembly(groups: &[GroupAssembly]) {
        println!("assembly summary");
        for group in groups {
            match (&group.outcome, &group.error) {
                (Some(outcome), _) => {
                    println!("  {}: {} steps -> {}", group.group, outcome.steps, outcome.output);
                    for (source, hours) in &outcome.hours_by_source {
                        println!("    {source}: {hours} h");
                    }
                    for skipped in &outcome.skipped {
                        println!("    skipped {} ({})", skipped.path.display(), skipped.reason);
                    }
                }
                (None, Some(err)) => println!("  {}: failed ({err})", group.group),
                (None, None) => println!("  {}: failed", group.group),
            }
            if let Some(report) = &group.audit {
                print_audit_lines(report);
            }
        }
    }

    pub fn print_audit(groups: &[GroupAudit]) {
        println!("audit summary");
        for group in groups {
            println!("  {}: {}", group.group, group.path);
            match (&group.report, &group.error) {
                (Some(report), _) => print_audit_lines(report),
                (None, Some(err)) => println!("    unreadable ({err})"),
                (None, None) => {}
            }
        }
    }

    pub fn print_run(summary: &RunSummary) {
        Self::print_plan(&summary.plan);
        Self::print_fetch(&summary.fetch);
        Self::print_assembly(&summary.assembly);
    }
}

fn print_audit_lines(report: &AuditReport) {
    let stamp = |time: Option<chrono::NaiveDateTime>| {
        time.map(|time| time.to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    println!(
        "    {} .. {}: {} steps, {} missing h ({} past retention), {} duplicates",
        stamp(report.first),
        stamp(report.last),
        report.total_steps,
        report.missing_hours,
        report.expected_missing_hours,
        report.duplicate_timestamps,
    );
    for range in &report.missing_ranges {
        println!("    missing {} .. {} ({} h)", range.start, range.end, range.hours);
    }
}
