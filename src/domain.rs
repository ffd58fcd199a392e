use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ForcingError;

static REANALYSIS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z0-9]+)_(\d{8})\.nc$").expect("valid regex"));
static GAP_FILL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z0-9]+)_FC_(\d{4}-\d{2}-\d{2})\.nc$").expect("valid regex")
});
static CONTINUOUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z0-9]+)_FC\.nc$").expect("valid regex"));
static MERGED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z0-9]+)_final_merged_output\.nc$").expect("valid regex"));

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Reanalysis,
    GapFillForecast,
    ContinuousForecast,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::Reanalysis,
        SourceKind::GapFillForecast,
        SourceKind::ContinuousForecast,
    ];

    pub fn priority(self) -> u8 {
        match self {
            SourceKind::Reanalysis => 0,
            SourceKind::GapFillForecast => 1,
            SourceKind::ContinuousForecast => 2,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Reanalysis => write!(f, "reanalysis"),
            SourceKind::GapFillForecast => write!(f, "gap_fill_forecast"),
            SourceKind::ContinuousForecast => write!(f, "continuous_forecast"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Surface,
    PressureLevels,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub prefix: String,
    pub kind: GroupKind,
    pub era5_dataset: String,
    pub era5_variables: Vec<String>,
    pub forecast_fields: Vec<String>,
    pub levels: Vec<u32>,
}

impl GroupSpec {
    pub fn surface() -> Self {
        Self {
            prefix: "SURF".to_string(),
            kind: GroupKind::Surface,
            era5_dataset: "reanalysis-era5-single-levels".to_string(),
            era5_variables: strings(&[
                "geopotential",
                "2m_temperature",
                "2m_dewpoint_temperature",
                "surface_pressure",
                "surface_solar_radiation_downwards",
                "surface_thermal_radiation_downwards",
                "total_precipitation",
                "toa_incident_solar_radiation",
            ]),
            forecast_fields: strings(&["2t", "sp", "2d", "ssrd", "strd", "tp", "msl"]),
            levels: Vec::new(),
        }
    }

    pub fn pressure_levels(levels: Vec<u32>) -> Self {
        Self {
            prefix: "PLEV".to_string(),
            kind: GroupKind::PressureLevels,
            era5_dataset: "reanalysis-era5-pressure-levels".to_string(),
            era5_variables: strings(&[
                "geopotential",
                "temperature",
                "u_component_of_wind",
                "v_component_of_wind",
                "relative_humidity",
                "specific_humidity",
            ]),
            forecast_fields: strings(&["gh", "u", "v", "r", "q", "t"]),
            levels,
        }
    }

    pub fn is_pressure_levels(&self) -> bool {
        self.kind == GroupKind::PressureLevels
    }
}

pub fn default_pressure_levels() -> Vec<u32> {
    vec![1000, 925, 850, 700, 600, 500, 400, 300]
}

pub fn default_groups() -> Vec<GroupSpec> {
    vec![
        GroupSpec::surface(),
        GroupSpec::pressure_levels(default_pressure_levels()),
    ]
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            lat_min: 32.0,
            lat_max: 45.0,
            lon_min: 59.0,
            lon_max: 81.0,
        }
    }
}

impl BoundingBox {
    pub fn contains_lat(&self, lat: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max
    }

    pub fn contains_lon(&self, lon: f64) -> bool {
        lon >= self.lon_min && lon <= self.lon_max
    }

    pub fn cds_area(&self) -> [f64; 4] {
        [self.lat_max, self.lon_min, self.lat_min, self.lon_max]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ForcingFile {
    Reanalysis { prefix: String, date: NaiveDate },
    GapFill { prefix: String, date: NaiveDate },
    Continuous { prefix: String },
    Merged { prefix: String },
}

impl ForcingFile {
    pub fn prefix(&self) -> &str {
        match self {
            ForcingFile::Reanalysis { prefix, .. }
            | ForcingFile::GapFill { prefix, .. }
            | ForcingFile::Continuous { prefix }
            | ForcingFile::Merged { prefix } => prefix,
        }
    }

    pub fn source(&self) -> Option<SourceKind> {
        match self {
            ForcingFile::Reanalysis { .. } => Some(SourceKind::Reanalysis),
            ForcingFile::GapFill { .. } => Some(SourceKind::GapFillForecast),
            ForcingFile::Continuous { .. } => Some(SourceKind::ContinuousForecast),
            ForcingFile::Merged { .. } => None,
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            ForcingFile::Reanalysis { date, .. } | ForcingFile::GapFill { date, .. } => Some(*date),
            _ => None,
        }
    }

    pub fn file_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ForcingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForcingFile::Reanalysis { prefix, date } => {
                write!(f, "{prefix}_{}.nc", date.format("%Y%m%d"))
            }
            ForcingFile::GapFill { prefix, date } => {
                write!(f, "{prefix}_FC_{}.nc", date.format("%Y-%m-%d"))
            }
            ForcingFile::Continuous { prefix } => write!(f, "{prefix}_FC.nc"),
            ForcingFile::Merged { prefix } => write!(f, "{prefix}_final_merged_output.nc"),
        }
    }
}

impl FromStr for ForcingFile {
    type Err = ForcingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Some(caps) = GAP_FILL_RE.captures(value) {
            let date = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d")
                .map_err(|_| ForcingError::InvalidFileName(value.to_string()))?;
            return Ok(ForcingFile::GapFill {
                prefix: caps[1].to_string(),
                date,
            });
        }
        if let Some(caps) = CONTINUOUS_RE.captures(value) {
            return Ok(ForcingFile::Continuous {
                prefix: caps[1].to_string(),
            });
        }
        if let Some(caps) = MERGED_RE.captures(value) {
            return Ok(ForcingFile::Merged {
                prefix: caps[1].to_string(),
            });
        }
        if let Some(caps) = REANALYSIS_RE.captures(value) {
            let date = NaiveDate::parse_from_str(&caps[2], "%Y%m%d")
                .map_err(|_| ForcingError::InvalidFileName(value.to_string()))?;
            return Ok(ForcingFile::Reanalysis {
                prefix: caps[1].to_string(),
                date,
            });
        }
        Err(ForcingError::InvalidFileName(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchObligation {
    pub date: NaiveDate,
    pub source: SourceKind,
}

impl FetchObligation {
    pub fn reanalysis(date: NaiveDate) -> Self {
        Self {
            date,
            source: SourceKind::Reanalysis,
        }
    }

    pub fn gap_fill(date: NaiveDate) -> Self {
        Self {
            date,
            source: SourceKind::GapFillForecast,
        }
    }

    pub fn continuous(date: NaiveDate) -> Self {
        Self {
            date,
            source: SourceKind::ContinuousForecast,
        }
    }
}

impl fmt::Display for FetchObligation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.source, self.date)
    }
}

pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

pub fn day_hours(date: NaiveDate) -> impl Iterator<Item = NaiveDateTime> {
    let start = start_of_day(date);
    (0..24).map(move |hour| start + Duration::hours(hour))
}

/// Forecast run whose hourly steps cover all of `day`. A 00 UTC run covers
/// its own date; a later cycle only reaches 00 UTC on the following day.
pub fn covering_run_date(day: NaiveDate, cycle_hour: u32) -> NaiveDate {
    if cycle_hour == 0 {
        day
    } else {
        day - Duration::days(1)
    }
}

pub fn first_full_day(run_date: NaiveDate, cycle_hour: u32) -> NaiveDate {
    if cycle_hour == 0 {
        run_date
    } else {
        run_date + Duration::days(1)
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, ForcingError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ForcingError::InvalidDate(value.to_string()))
}
