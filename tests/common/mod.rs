#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use snowmapper_forcing::app::{ProgressEvent, ProgressSink};
use snowmapper_forcing::cdo::GribConverter;
use snowmapper_forcing::codec::{DatasetCodec, corrupt};
use snowmapper_forcing::dataset::{Grid, GridDataset};
use snowmapper_forcing::domain::{BoundingBox, GroupSpec, start_of_day};
use snowmapper_forcing::error::ForcingError;
use snowmapper_forcing::providers::{ForecastProvider, ForecastRequest, ReanalysisProvider};

/// Classic NetCDF magic, so payload sniffing treats fixtures as NetCDF.
const MAGIC: &[u8] = b"CDF\x01";

#[derive(Serialize, Deserialize)]
struct FixtureFile {
    times: Vec<NaiveDateTime>,
    grid: Grid,
    variables: BTreeMap<String, Vec<Option<f32>>>,
}

/// JSON stand-in for the NetCDF codec. `NaN` is stored as `null`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixtureCodec;

impl DatasetCodec for FixtureCodec {
    fn read(&self, path: &Path) -> Result<GridDataset, ForcingError> {
        let bytes = fs::read(path).map_err(|err| corrupt(path, err.to_string()))?;
        let body = bytes
            .strip_prefix(MAGIC)
            .ok_or_else(|| corrupt(path, "not a fixture file"))?;
        let file: FixtureFile =
            serde_json::from_slice(body).map_err(|err| corrupt(path, err.to_string()))?;
        let variables = file
            .variables
            .into_iter()
            .map(|(name, values)| {
                let values = values.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect();
                (name, values)
            })
            .collect();
        Ok(GridDataset {
            times: file.times,
            grid: file.grid,
            variables,
        })
    }

    fn write(&self, dataset: &GridDataset, path: &Path) -> Result<(), ForcingError> {
        let file = FixtureFile {
            times: dataset.times.clone(),
            grid: dataset.grid.clone(),
            variables: dataset
                .variables
                .iter()
                .map(|(name, values)| {
                    let values = values
                        .iter()
                        .map(|v| if v.is_nan() { None } else { Some(*v) })
                        .collect();
                    (name.clone(), values)
                })
                .collect(),
        };
        let mut bytes = MAGIC.to_vec();
        bytes.extend(
            serde_json::to_vec(&file).map_err(|err| ForcingError::Dataset(err.to_string()))?,
        );
        fs::write(path, bytes).map_err(|err| ForcingError::Filesystem(err.to_string()))
    }
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(date: NaiveDate, hour: u32) -> NaiveDateTime {
    date.and_hms_opt(hour, 0, 0).unwrap()
}

pub fn hours_of(date: NaiveDate) -> Vec<NaiveDateTime> {
    (0..24).map(|hour| at(date, hour)).collect()
}

/// 2x2 grid inside the default bounding box.
pub fn test_grid(group: &GroupSpec) -> Grid {
    Grid::new(
        vec![40.0, 41.0],
        vec![70.0, 71.0],
        group.levels.iter().map(|level| *level as f64).collect(),
    )
}

/// Dataset with every variable constant at `value`.
pub fn constant(
    times: Vec<NaiveDateTime>,
    grid: Grid,
    variables: &[&str],
    value: f32,
) -> GridDataset {
    let len = times.len() * grid.frame_len();
    let mut dataset = GridDataset::new(times, grid);
    for name in variables {
        dataset.insert_variable(name, vec![value; len]).unwrap();
    }
    dataset
}

pub fn write_fixture(path: &Path, dataset: &GridDataset) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    FixtureCodec.write(dataset, path).unwrap();
}

/// Reanalysis variables of the fixture groups.
pub fn reanalysis_variables(group: &GroupSpec) -> &'static [&'static str] {
    if group.is_pressure_levels() {
        &["z", "t", "u", "v", "r", "q"]
    } else {
        &["z", "t2m", "d2m", "sp", "ssrd", "strd", "tp"]
    }
}

pub fn reanalysis_day(group: &GroupSpec, date: NaiveDate, value: f32) -> GridDataset {
    constant(
        hours_of(date),
        test_grid(group),
        reanalysis_variables(group),
        value,
    )
}

pub enum Failure {
    Transient,
    Fatal,
}

impl Failure {
    fn error(&self) -> ForcingError {
        match self {
            Failure::Transient => ForcingError::TransientFetch("connection reset".to_string()),
            Failure::Fatal => ForcingError::CdsStatus {
                status: 401,
                message: "unauthorized".to_string(),
            },
        }
    }
}

/// Serves constant reanalysis days. The first `fail_calls` retrievals fail.
pub struct MockReanalysis {
    pub latest: Option<NaiveDate>,
    pub value: f32,
    fail_calls: usize,
    failure: Failure,
    pub calls: Mutex<usize>,
}

impl MockReanalysis {
    pub fn new(latest: NaiveDate) -> Self {
        Self {
            latest: Some(latest),
            value: 1.0,
            fail_calls: 0,
            failure: Failure::Transient,
            calls: Mutex::new(0),
        }
    }

    pub fn failing(latest: NaiveDate, fail_calls: usize, failure: Failure) -> Self {
        Self {
            fail_calls,
            failure,
            ..Self::new(latest)
        }
    }

    pub fn unreachable() -> Self {
        Self {
            latest: None,
            ..Self::new(day(2000, 1, 1))
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl ReanalysisProvider for MockReanalysis {
    fn latest_available(&self) -> Result<NaiveDate, ForcingError> {
        self.latest
            .ok_or_else(|| ForcingError::CdsHttp("catalogue unreachable".to_string()))
    }

    fn retrieve_day(
        &self,
        group: &GroupSpec,
        day: NaiveDate,
        _bbox: &BoundingBox,
        destination: &Path,
    ) -> Result<(), ForcingError> {
        let call = {
            let mut guard = self.calls.lock().unwrap();
            *guard += 1;
            *guard
        };
        if call <= self.fail_calls {
            return Err(self.failure.error());
        }
        FixtureCodec.write(&reanalysis_day(group, day, self.value), destination)
    }
}

/// Writes forecast "GRIB" as fixture files with raw IFS field names.
#[derive(Default)]
pub struct MockForecast {
    pub requests: Mutex<Vec<ForecastRequest>>,
    pub fail: bool,
}

impl MockForecast {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl ForecastProvider for MockForecast {
    fn retrieve(&self, request: &ForecastRequest, destination: &Path) -> Result<(), ForcingError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(ForcingError::EcmwfStatus {
                status: 404,
                message: "cycle not published".to_string(),
            });
        }
        let start = start_of_day(request.run_date()) + Duration::hours(i64::from(request.cycle_hour));
        let times: Vec<NaiveDateTime> = request
            .steps
            .iter()
            .map(|step| start + Duration::hours(i64::from(*step)))
            .collect();
        let grid = Grid::new(
            vec![40.0, 41.0],
            vec![70.0, 71.0],
            request.levels.iter().map(|level| *level as f64).collect(),
        );
        let frame = grid.frame_len();
        let mut dataset = GridDataset::new(times.clone(), grid);
        for field in &request.fields {
            let values: Vec<f32> = match field.as_str() {
                "sp" => vec![80_000.0; times.len() * frame],
                "msl" => vec![100_000.0; times.len() * frame],
                "2t" | "t" => vec![270.0; times.len() * frame],
                "tp" | "ssrd" | "strd" => request
                    .steps
                    .iter()
                    .flat_map(|step| std::iter::repeat_n(*step as f32, frame))
                    .collect(),
                _ => vec![5.0; times.len() * frame],
            };
            dataset.insert_variable(field, values)?;
        }
        FixtureCodec.write(&dataset, destination)
    }
}

/// Copies the fixture through unchanged.
#[derive(Default)]
pub struct CopyConverter {
    pub calls: Mutex<usize>,
}

impl GribConverter for CopyConverter {
    fn to_netcdf(&self, grib: &Path, netcdf: &Path) -> Result<(), ForcingError> {
        *self.calls.lock().unwrap() += 1;
        fs::copy(grib, netcdf).map_err(|err| ForcingError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct CaptureSink {
    pub events: Mutex<Vec<String>>,
}

impl CaptureSink {
    pub fn messages(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for CaptureSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}
