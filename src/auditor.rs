use std::collections::BTreeSet;
use std::path::Path;

use chrono::{Duration, DurationRound, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use tracing::{info, warn};

use crate::codec::DatasetCodec;
use crate::error::ForcingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Complete,
    Incomplete,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MissingRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub hours: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub status: AuditStatus,
    pub total_steps: usize,
    pub first: Option<NaiveDateTime>,
    pub last: Option<NaiveDateTime>,
    pub expected_steps: usize,
    pub present_steps: usize,
    pub missing_hours: usize,
    pub expected_missing_hours: usize,
    pub duplicate_timestamps: usize,
    pub off_grid_timestamps: usize,
    pub missing_ranges: Vec<MissingRange>,
    pub permanent_gaps: Vec<NaiveDate>,
}

impl AuditReport {
    pub fn is_go(&self) -> bool {
        self.status == AuditStatus::Complete
    }
}

pub fn audit(times: &[NaiveDateTime], permanent_gaps: &[NaiveDate]) -> AuditReport {
    let mut sorted = times.to_vec();
    sorted.sort();
    let (Some(&first), Some(&last)) = (sorted.first(), sorted.last()) else {
        return AuditReport {
            status: AuditStatus::Empty,
            total_steps: 0,
            first: None,
            last: None,
            expected_steps: 0,
            present_steps: 0,
            missing_hours: 0,
            expected_missing_hours: 0,
            duplicate_timestamps: 0,
            off_grid_timestamps: 0,
            missing_ranges: Vec::new(),
            permanent_gaps: permanent_gaps.to_vec(),
        };
    };

    let duplicate_timestamps = sorted.windows(2).filter(|pair| pair[0] == pair[1]).count();
    let off_grid_timestamps = sorted.iter().filter(|time| !on_hour(time)).count();
    let present: BTreeSet<NaiveDateTime> =
        sorted.iter().copied().filter(|time| on_hour(time)).collect();
    let gap_days: BTreeSet<NaiveDate> = permanent_gaps.iter().copied().collect();

    let start = first
        .duration_trunc(Duration::hours(1))
        .unwrap_or(first);
    let mut expected_steps = 0;
    let mut missing_hours = 0;
    let mut expected_missing_hours = 0;
    let mut missing_ranges: Vec<MissingRange> = Vec::new();
    let mut hour = start;
    while hour <= last {
        expected_steps += 1;
        if !present.contains(&hour) {
            missing_hours += 1;
            if gap_days.contains(&hour.date()) {
                expected_missing_hours += 1;
            }
            match missing_ranges.last_mut() {
                Some(range) if range.end + Duration::hours(1) == hour => {
                    range.end = hour;
                    range.hours += 1;
                }
                _ => missing_ranges.push(MissingRange {
                    start: hour,
                    end: hour,
                    hours: 1,
                }),
            }
        }
        hour += Duration::hours(1);
    }

    let status = if missing_hours == 0 && duplicate_timestamps == 0 && off_grid_timestamps == 0 {
        AuditStatus::Complete
    } else {
        AuditStatus::Incomplete
    };
    AuditReport {
        status,
        total_steps: times.len(),
        first: Some(first),
        last: Some(last),
        expected_steps,
        present_steps: expected_steps - missing_hours,
        missing_hours,
        expected_missing_hours,
        duplicate_timestamps,
        off_grid_timestamps,
        missing_ranges,
        permanent_gaps: permanent_gaps.to_vec(),
    }
}

pub fn audit_file(
    codec: &dyn DatasetCodec,
    path: &Path,
    permanent_gaps: &[NaiveDate],
) -> Result<AuditReport, ForcingError> {
    let dataset = codec.read(path)?;
    Ok(audit(&dataset.times, permanent_gaps))
}

fn on_hour(time: &NaiveDateTime) -> bool {
    time.minute() == 0 && time.second() == 0 && time.nanosecond() == 0
}

pub fn log_summary(group: &str, report: &AuditReport) {
    let span = |time: Option<NaiveDateTime>| {
        time.map(|time| time.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    info!(
        group,
        first = %span(report.first),
        last = %span(report.last),
        steps = report.total_steps,
        expected = report.expected_steps,
        "forcing data chain summary"
    );
    if report.duplicate_timestamps > 0 {
        warn!(group, duplicates = report.duplicate_timestamps, "duplicate timestamps in timeline");
    }
    if report.off_grid_timestamps > 0 {
        warn!(group, off_grid = report.off_grid_timestamps, "timestamps off the hourly grid");
    }
    for range in &report.missing_ranges {
        warn!(
            group,
            start = %range.start,
            end = %range.end,
            hours = range.hours,
            "missing hours in timeline"
        );
    }
    if report.expected_missing_hours > 0 {
        info!(
            group,
            hours = report.expected_missing_hours,
            "missing hours fall on days past the forecast retention window"
        );
    }
}
