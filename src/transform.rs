use chrono::{Duration, NaiveDate};

use crate::dataset::{Grid, GridDataset};
use crate::domain::{BoundingBox, GroupSpec};
use crate::error::ForcingError;
use crate::regrid::resample_time;

pub const R_DRY_AIR: f64 = 287.0;
pub const GRAVITY: f64 = 9.81;
pub const ACCUMULATED_FIELDS: [&str; 3] = ["tp", "ssrd", "strd"];
const PRECIP_ALIAS: &str = "param193.1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastBlock {
    pub first_step: u32,
    pub last_step: u32,
    pub step_hours: u32,
}

impl ForecastBlock {
    pub fn steps(&self) -> Vec<u32> {
        (self.first_step..=self.last_step)
            .step_by(self.step_hours as usize)
            .collect()
    }
}

pub const FORECAST_BLOCKS: [ForecastBlock; 2] = [
    ForecastBlock {
        first_step: 0,
        last_step: 144,
        step_hours: 3,
    },
    ForecastBlock {
        first_step: 150,
        last_step: 240,
        step_hours: 6,
    },
];

pub fn subset(dataset: &GridDataset, bbox: &BoundingBox) -> Result<GridDataset, ForcingError> {
    let lat_idx: Vec<usize> = indices_where(&dataset.grid.latitudes, |lat| bbox.contains_lat(lat));
    let lon_idx: Vec<usize> = indices_where(&dataset.grid.longitudes, |lon| bbox.contains_lon(lon));
    if lat_idx.is_empty() || lon_idx.is_empty() {
        return Err(ForcingError::Dataset(format!(
            "no grid points inside {}..{}N {}..{}E",
            bbox.lat_min, bbox.lat_max, bbox.lon_min, bbox.lon_max
        )));
    }
    if lat_idx.len() == dataset.grid.latitudes.len() && lon_idx.len() == dataset.grid.longitudes.len() {
        return Ok(dataset.clone());
    }

    let grid = Grid::new(
        lat_idx.iter().map(|&i| dataset.grid.latitudes[i]).collect(),
        lon_idx.iter().map(|&j| dataset.grid.longitudes[j]).collect(),
        dataset.grid.levels.clone(),
    );
    let src_lon = dataset.grid.longitudes.len();
    let src_plane = dataset.grid.plane_len();
    let planes = dataset.len() * dataset.grid.level_count();
    let variables = dataset
        .variables
        .iter()
        .map(|(name, values)| {
            let mut out = Vec::with_capacity(planes * grid.plane_len());
            for plane in 0..planes {
                let base = plane * src_plane;
                for &i in &lat_idx {
                    for &j in &lon_idx {
                        out.push(values[base + i * src_lon + j]);
                    }
                }
            }
            (name.clone(), out)
        })
        .collect();
    Ok(GridDataset {
        times: dataset.times.clone(),
        grid,
        variables,
    })
}

fn indices_where(values: &[f64], keep: impl Fn(f64) -> bool) -> Vec<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, value)| keep(**value))
        .map(|(index, _)| index)
        .collect()
}

pub fn normalize_levels(dataset: &mut GridDataset) {
    if !dataset.grid.has_levels() {
        return;
    }
    if dataset.grid.levels.iter().any(|level| *level > 2000.0) {
        for level in &mut dataset.grid.levels {
            *level /= 100.0;
        }
    }
    let mut order: Vec<usize> = (0..dataset.grid.levels.len()).collect();
    order.sort_by(|&a, &b| dataset.grid.levels[a].total_cmp(&dataset.grid.levels[b]));
    if order.iter().copied().eq(0..order.len()) {
        return;
    }

    let plane = dataset.grid.plane_len();
    let frame = dataset.grid.frame_len();
    for values in dataset.variables.values_mut() {
        let mut reordered = Vec::with_capacity(values.len());
        for step in 0..values.len() / frame {
            for &level in &order {
                let start = step * frame + level * plane;
                reordered.extend_from_slice(&values[start..start + plane]);
            }
        }
        *values = reordered;
    }
    dataset.grid.levels = order.iter().map(|&i| dataset.grid.levels[i]).collect();
}

/// Turns accumulated totals into per-hour rates in place.
///
/// `carry` is the last accumulated frame of the previous block and is removed
/// first. Returns this block's last accumulated frame.
pub fn deaccumulate(
    values: &mut [f32],
    frame_len: usize,
    step_hours: f32,
    carry: Option<&[f32]>,
) -> Vec<f32> {
    if frame_len == 0 || values.is_empty() {
        return carry.map(<[f32]>::to_vec).unwrap_or_default();
    }
    let last_accumulated = values[values.len() - frame_len..].to_vec();
    let mut previous = carry.map(<[f32]>::to_vec).unwrap_or_else(|| vec![0.0; frame_len]);
    for frame in values.chunks_mut(frame_len) {
        for (value, before) in frame.iter_mut().zip(previous.iter_mut()) {
            let total = *value;
            *value = (total - *before) / step_hours;
            *before = total;
        }
    }
    last_accumulated
}

pub fn surface_geopotential(t2m: &[f32], sp: &[f32], msl: &[f32]) -> Vec<f32> {
    t2m.iter()
        .zip(sp)
        .zip(msl)
        .map(|((&t, &p), &p0)| (R_DRY_AIR * t as f64 * (p0 as f64 / p as f64).ln()) as f32)
        .collect()
}

fn require<'a>(dataset: &'a GridDataset, name: &str) -> Result<&'a [f32], ForcingError> {
    dataset
        .variable(name)
        .ok_or_else(|| ForcingError::MalformedResponse(format!("forecast lacks field {name}")))
}

pub fn process_forecast(
    group: &GroupSpec,
    blocks: Vec<(ForecastBlock, GridDataset)>,
) -> Result<GridDataset, ForcingError> {
    let mut carry: std::collections::BTreeMap<&str, Vec<f32>> = Default::default();
    let mut processed = Vec::with_capacity(blocks.len());
    for (block, mut dataset) in blocks {
        dataset.sort_and_dedup();
        if group.is_pressure_levels() {
            normalize_levels(&mut dataset);
            let gh = dataset
                .remove_variable("gh")
                .ok_or_else(|| ForcingError::MalformedResponse("forecast lacks field gh".to_string()))?;
            let z = gh.iter().map(|value| (*value as f64 * GRAVITY) as f32).collect();
            dataset.insert_variable("z", z)?;
        } else {
            if dataset.variable("tp").is_none() {
                dataset.rename_variable(PRECIP_ALIAS, "tp");
            }
            let frame_len = dataset.frame_len();
            for field in ACCUMULATED_FIELDS {
                if let Some(values) = dataset.variables.get_mut(field) {
                    let last = deaccumulate(
                        values,
                        frame_len,
                        block.step_hours as f32,
                        carry.get(field).map(Vec::as_slice),
                    );
                    carry.insert(field, last);
                }
            }
            dataset.rename_variable("2t", "t2m");
            dataset.rename_variable("2d", "d2m");
            let z = surface_geopotential(
                require(&dataset, "t2m")?,
                require(&dataset, "sp")?,
                require(&dataset, "msl")?,
            );
            dataset.insert_variable("z", z)?;
            dataset.remove_variable("msl");
        }
        processed.push(dataset);
    }
    let mut joined = GridDataset::concat(processed)?;
    joined.sort_and_dedup();
    Ok(resample_time(&joined, Duration::hours(1)))
}

pub fn normalize_reanalysis(
    dataset: GridDataset,
    bbox: &BoundingBox,
) -> Result<GridDataset, ForcingError> {
    let mut dataset = subset(&dataset, bbox)?;
    normalize_levels(&mut dataset);
    dataset.sort_and_dedup();
    Ok(dataset)
}

pub fn hindcast_day(dataset: &GridDataset, day: NaiveDate) -> GridDataset {
    let indices: Vec<usize> = dataset
        .times
        .iter()
        .enumerate()
        .filter(|(_, time)| time.date() == day)
        .map(|(index, _)| index)
        .collect();
    dataset.select_times(&indices)
}
