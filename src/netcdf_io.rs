use std::path::Path;

use chrono::NaiveDateTime;
use netcdf::AttributeValue;
use tracing::debug;

use crate::codec::{DatasetCodec, FileSummary, TimeUnits, corrupt};
use crate::dataset::{Grid, GridDataset};
use crate::error::ForcingError;

const TIME_NAMES: &[&str] = &["time", "valid_time"];
const LAT_NAMES: &[&str] = &["latitude", "lat"];
const LON_NAMES: &[&str] = &["longitude", "lon"];
const LEVEL_NAMES: &[&str] = &["level", "pressure_level", "plev", "isobaricInhPa"];

#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfCodec;

impl NetcdfCodec {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Time,
    Level,
    Lat,
    Lon,
}

struct Coordinates {
    time: String,
    lat: String,
    lon: String,
    level: Option<String>,
}

impl Coordinates {
    fn axis_of(&self, dim: &str) -> Option<Axis> {
        if dim == self.time {
            Some(Axis::Time)
        } else if dim == self.lat {
            Some(Axis::Lat)
        } else if dim == self.lon {
            Some(Axis::Lon)
        } else if self.level.as_deref() == Some(dim) {
            Some(Axis::Level)
        } else {
            None
        }
    }

    fn is_coordinate(&self, name: &str) -> bool {
        self.axis_of(name).is_some()
    }
}

impl DatasetCodec for NetcdfCodec {
    fn read(&self, path: &Path) -> Result<GridDataset, ForcingError> {
        let file = netcdf::open(path).map_err(|err| corrupt(path, err.to_string()))?;
        let (time, times) = read_times(&file, path)?;
        let (lat, latitudes) = read_axis(&file, LAT_NAMES, path)
            .ok_or_else(|| corrupt(path, "missing latitude coordinate"))??;
        let (lon, longitudes) = read_axis(&file, LON_NAMES, path)
            .ok_or_else(|| corrupt(path, "missing longitude coordinate"))??;
        let (level, levels) = match read_axis(&file, LEVEL_NAMES, path) {
            Some(result) => {
                let (name, values) = result?;
                (Some(name), values)
            }
            None => (None, Vec::new()),
        };
        let coords = Coordinates {
            time,
            lat,
            lon,
            level,
        };

        let mut expected = vec![Axis::Time];
        if coords.level.is_some() {
            expected.push(Axis::Level);
        }
        expected.extend([Axis::Lat, Axis::Lon]);

        let mut dataset = GridDataset::new(times, Grid::new(latitudes, longitudes, levels));
        for var in file.variables() {
            let name = var.name();
            if coords.is_coordinate(&name) {
                continue;
            }
            let mut layout = Vec::new();
            let mut foreign = false;
            for dim in var.dimensions() {
                match coords.axis_of(&dim.name()) {
                    Some(axis) => layout.push(axis),
                    None if dim.len() == 1 => {}
                    None => foreign = true,
                }
            }
            if foreign || layout != expected {
                debug!(variable = %name, path = %path.display(), "skipping non-gridded variable");
                continue;
            }
            let raw = var
                .get_values::<f32, _>(..)
                .map_err(|err| corrupt(path, format!("{name}: {err}")))?;
            let values = unpack(
                raw,
                attr_f64(&var, "scale_factor"),
                attr_f64(&var, "add_offset"),
                attr_f64(&var, "_FillValue").or_else(|| attr_f64(&var, "missing_value")),
            );
            dataset
                .insert_variable(&name, values)
                .map_err(|err| corrupt(path, err.to_string()))?;
        }
        Ok(dataset)
    }

    fn write(&self, dataset: &GridDataset, path: &Path) -> Result<(), ForcingError> {
        let Some(&first) = dataset.times.first() else {
            return Err(ForcingError::Dataset("refusing to write an empty dataset".to_string()));
        };
        let nc = |err: netcdf::Error| ForcingError::Filesystem(format!("{}: {err}", path.display()));

        let mut file = netcdf::create(path).map_err(nc)?;
        file.add_dimension("time", dataset.len()).map_err(nc)?;
        if dataset.grid.has_levels() {
            file.add_dimension("level", dataset.grid.levels.len()).map_err(nc)?;
        }
        file.add_dimension("latitude", dataset.grid.latitudes.len()).map_err(nc)?;
        file.add_dimension("longitude", dataset.grid.longitudes.len()).map_err(nc)?;

        let units = TimeUnits::hours_since(first);
        let offsets: Vec<f64> = dataset.times.iter().map(|t| units.to_offset(*t)).collect();
        let mut time = file.add_variable::<f64>("time", &["time"]).map_err(nc)?;
        time.put_attribute("standard_name", "time").map_err(nc)?;
        time.put_attribute("units", units.to_cf_string()).map_err(nc)?;
        time.put_attribute("calendar", "proleptic_gregorian").map_err(nc)?;
        time.put_values(&offsets, ..).map_err(nc)?;

        if dataset.grid.has_levels() {
            let mut level = file.add_variable::<f64>("level", &["level"]).map_err(nc)?;
            level.put_attribute("units", "hPa").map_err(nc)?;
            level.put_values(&dataset.grid.levels, ..).map_err(nc)?;
        }
        let mut lat = file.add_variable::<f64>("latitude", &["latitude"]).map_err(nc)?;
        lat.put_attribute("units", "degrees_north").map_err(nc)?;
        lat.put_values(&dataset.grid.latitudes, ..).map_err(nc)?;
        let mut lon = file.add_variable::<f64>("longitude", &["longitude"]).map_err(nc)?;
        lon.put_attribute("units", "degrees_east").map_err(nc)?;
        lon.put_values(&dataset.grid.longitudes, ..).map_err(nc)?;

        let dims: &[&str] = if dataset.grid.has_levels() {
            &["time", "level", "latitude", "longitude"]
        } else {
            &["time", "latitude", "longitude"]
        };
        for (name, values) in &dataset.variables {
            let mut var = file.add_variable::<f32>(name, dims).map_err(nc)?;
            var.put_attribute("_FillValue", f32::NAN).map_err(nc)?;
            var.put_values(values, ..).map_err(nc)?;
        }
        debug!(path = %path.display(), steps = dataset.len(), "wrote netcdf");
        Ok(())
    }

    fn probe(&self, path: &Path) -> Result<FileSummary, ForcingError> {
        let file = netcdf::open(path).map_err(|err| corrupt(path, err.to_string()))?;
        let (_, times) = read_times(&file, path)?;
        for names in [LAT_NAMES, LON_NAMES] {
            match read_axis(&file, names, path) {
                Some(Ok((_, values))) if !values.is_empty() => {}
                _ => return Err(corrupt(path, format!("missing {} coordinate", names[0]))),
            }
        }
        FileSummary::of(&times).ok_or_else(|| corrupt(path, "empty time axis"))
    }
}

fn read_times(
    file: &netcdf::File,
    path: &Path,
) -> Result<(String, Vec<NaiveDateTime>), ForcingError> {
    let var = TIME_NAMES
        .iter()
        .find_map(|name| file.variable(name))
        .ok_or_else(|| corrupt(path, "missing time coordinate"))?;
    let units = attr_string(&var, "units").ok_or_else(|| corrupt(path, "time has no units"))?;
    let units = TimeUnits::parse(&units).map_err(|err| corrupt(path, err.to_string()))?;
    let offsets = var
        .get_values::<f64, _>(..)
        .map_err(|err| corrupt(path, err.to_string()))?;
    let times = offsets
        .iter()
        .map(|offset| units.to_datetime(*offset))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| corrupt(path, "time value out of range"))?;
    Ok((var.name(), times))
}

fn read_axis(
    file: &netcdf::File,
    names: &[&str],
    path: &Path,
) -> Option<Result<(String, Vec<f64>), ForcingError>> {
    let var = names.iter().find_map(|name| file.variable(name))?;
    let name = var.name();
    Some(
        var.get_values::<f64, _>(..)
            .map(|values| (name, values))
            .map_err(|err| corrupt(path, format!("{name}: {err}"))),
    )
}

fn unpack(raw: Vec<f32>, scale: Option<f64>, offset: Option<f64>, fill: Option<f64>) -> Vec<f32> {
    let scale = scale.unwrap_or(1.0);
    let offset = offset.unwrap_or(0.0);
    raw.into_iter()
        .map(|value| {
            let is_fill = fill.is_some_and(|fill| (value as f64 - fill).abs() <= fill.abs() * 1e-6);
            if is_fill || !value.is_finite() {
                f32::NAN
            } else {
                (value as f64 * scale + offset) as f32
            }
        })
        .collect()
}

fn attr_f64(var: &netcdf::Variable, name: &str) -> Option<f64> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Double(value) => Some(value),
        AttributeValue::Float(value) => Some(value as f64),
        AttributeValue::Longlong(value) => Some(value as f64),
        AttributeValue::Ulonglong(value) => Some(value as f64),
        AttributeValue::Int(value) => Some(value as f64),
        AttributeValue::Uint(value) => Some(value as f64),
        AttributeValue::Short(value) => Some(value as f64),
        AttributeValue::Ushort(value) => Some(value as f64),
        AttributeValue::Schar(value) => Some(value as f64),
        AttributeValue::Uchar(value) => Some(value as f64),
        _ => None,
    }
}

fn attr_string(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Str(value) => Some(value),
        _ => None,
    }
}
