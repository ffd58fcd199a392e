use std::path::Path;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::dataset::GridDataset;
use crate::domain::start_of_day;
use crate::error::ForcingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub first: NaiveDateTime,
    pub last: NaiveDateTime,
    pub steps: usize,
}

impl FileSummary {
    pub fn of(times: &[NaiveDateTime]) -> Option<Self> {
        Some(Self {
            first: *times.iter().min()?,
            last: *times.iter().max()?,
            steps: times.len(),
        })
    }

    pub fn within_day(&self, day: NaiveDate) -> bool {
        self.first.date() == day && self.last.date() == day
    }

    pub fn covers_day(&self, day: NaiveDate) -> bool {
        self.within_day(day)
            && self.steps == 24
            && self.first == start_of_day(day)
            && self.last == start_of_day(day) + Duration::hours(23)
    }
}

pub trait DatasetCodec: Send + Sync {
    fn read(&self, path: &Path) -> Result<GridDataset, ForcingError>;

    fn write(&self, dataset: &GridDataset, path: &Path) -> Result<(), ForcingError>;

    fn probe(&self, path: &Path) -> Result<FileSummary, ForcingError> {
        let dataset = self.read(path)?;
        if dataset.grid.latitudes.is_empty() || dataset.grid.longitudes.is_empty() {
            return Err(corrupt(path, "missing latitude/longitude axis"));
        }
        FileSummary::of(&dataset.times).ok_or_else(|| corrupt(path, "empty time axis"))
    }
}

pub fn corrupt(path: &Path, reason: impl Into<String>) -> ForcingError {
    ForcingError::CorruptLocalFile {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUnits {
    pub seconds_per_unit: i64,
    pub epoch: NaiveDateTime,
}

impl TimeUnits {
    pub fn hours_since(epoch: NaiveDateTime) -> Self {
        Self {
            seconds_per_unit: 3600,
            epoch,
        }
    }

    pub fn parse(units: &str) -> Result<Self, ForcingError> {
        let invalid = || ForcingError::UnsupportedFormat(format!("time units `{units}`"));
        let (unit, epoch) = units.split_once(" since ").ok_or_else(invalid)?;
        let seconds_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
            "seconds" | "second" | "secs" | "sec" | "s" => 1,
            "minutes" | "minute" | "mins" | "min" => 60,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3600,
            "days" | "day" | "d" => 86_400,
            _ => return Err(invalid()),
        };
        let epoch = parse_epoch(epoch).ok_or_else(invalid)?;
        Ok(Self {
            seconds_per_unit,
            epoch,
        })
    }

    pub fn to_datetime(&self, offset: f64) -> Option<NaiveDateTime> {
        if !offset.is_finite() {
            return None;
        }
        let millis = (offset * self.seconds_per_unit as f64 * 1000.0).round() as i64;
        self.epoch.checked_add_signed(Duration::milliseconds(millis))
    }

    pub fn to_offset(&self, time: NaiveDateTime) -> f64 {
        (time - self.epoch).num_milliseconds() as f64 / (self.seconds_per_unit as f64 * 1000.0)
    }

    pub fn to_cf_string(&self) -> String {
        let unit = match self.seconds_per_unit {
            1 => "seconds",
            60 => "minutes",
            86_400 => "days",
            _ => "hours",
        };
        format!("{unit} since {}", self.epoch.format("%Y-%m-%d %H:%M:%S"))
    }
}

fn parse_epoch(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value
        .trim()
        .trim_end_matches("UTC")
        .trim_end_matches('Z')
        .trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .map(crate::domain::start_of_day)
        })
}
