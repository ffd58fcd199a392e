use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};

use crate::dataset::{Grid, GridDataset};

const EPS: f64 = 1e-6;

pub fn interpolate_to_grid(source: &GridDataset, target: &Grid) -> Result<GridDataset, String> {
    if source.grid.matches(target) {
        let mut passthrough = source.clone();
        passthrough.grid = target.clone();
        return Ok(passthrough);
    }
    source.grid.validate()?;
    target.validate()?;

    let source = select_levels(source, &target.levels)?;
    let lat_brackets: Vec<_> = target
        .latitudes
        .iter()
        .map(|&lat| bracket(&source.grid.latitudes, lat))
        .collect();
    let lon_brackets: Vec<_> = target
        .longitudes
        .iter()
        .map(|&lon| bracket(&source.grid.longitudes, lon))
        .collect();

    let src_lon = source.grid.longitudes.len();
    let src_plane = source.grid.plane_len();
    let src_frame = source.grid.frame_len();
    let dst_lon = target.longitudes.len();
    let dst_plane = target.plane_len();
    let dst_frame = target.frame_len();
    let levels = target.level_count();

    let mut variables = BTreeMap::new();
    for (name, values) in &source.variables {
        let mut out = vec![f32::NAN; source.len() * dst_frame];
        for step in 0..source.len() {
            for level in 0..levels {
                let src = &values[step * src_frame + level * src_plane..][..src_plane];
                let dst = &mut out[step * dst_frame + level * dst_plane..][..dst_plane];
                for (i, lat) in lat_brackets.iter().enumerate() {
                    let Some((a0, a1, wa)) = *lat else { continue };
                    for (j, lon) in lon_brackets.iter().enumerate() {
                        let Some((b0, b1, wb)) = *lon else { continue };
                        let south = lerp(src[a0 * src_lon + b0], src[a0 * src_lon + b1], wb);
                        let north = lerp(src[a1 * src_lon + b0], src[a1 * src_lon + b1], wb);
                        dst[i * dst_lon + j] = lerp(south, north, wa);
                    }
                }
            }
        }
        variables.insert(name.clone(), out);
    }

    Ok(GridDataset {
        times: source.times.clone(),
        grid: target.clone(),
        variables,
    })
}

pub fn select_levels(source: &GridDataset, levels: &[f64]) -> Result<GridDataset, String> {
    let have = &source.grid.levels;
    if levels.is_empty() && have.is_empty() {
        return Ok(source.clone());
    }
    if levels.is_empty() != have.is_empty() {
        return Err("surface and pressure-level grids cannot be combined".to_string());
    }
    let mut picks = Vec::with_capacity(levels.len());
    for level in levels {
        match have.iter().position(|candidate| (candidate - level).abs() < EPS) {
            Some(index) => picks.push(index),
            None => return Err(format!("level {level} is missing")),
        }
    }
    if picks.iter().copied().eq(0..have.len()) {
        return Ok(source.clone());
    }

    let plane = source.grid.plane_len();
    let frame = source.grid.frame_len();
    let variables = source
        .variables
        .iter()
        .map(|(name, values)| {
            let mut out = Vec::with_capacity(source.len() * picks.len() * plane);
            for step in 0..source.len() {
                for &index in &picks {
                    let start = step * frame + index * plane;
                    out.extend_from_slice(&values[start..start + plane]);
                }
            }
            (name.clone(), out)
        })
        .collect();

    Ok(GridDataset {
        times: source.times.clone(),
        grid: Grid::new(
            source.grid.latitudes.clone(),
            source.grid.longitudes.clone(),
            levels.to_vec(),
        ),
        variables,
    })
}

pub fn resample_time(source: &GridDataset, step: Duration) -> GridDataset {
    let (Some(&first), Some(&last)) = (source.times.first(), source.times.last()) else {
        return source.clone();
    };
    let mut targets = Vec::new();
    let mut current = first;
    while current <= last {
        targets.push(current);
        current += step;
    }

    let frame = source.frame_len();
    let weights: Vec<(usize, usize, f32)> = targets
        .iter()
        .map(|target| time_bracket(&source.times, *target))
        .collect();

    let variables = source
        .variables
        .iter()
        .map(|(name, values)| {
            let mut out = Vec::with_capacity(targets.len() * frame);
            for &(lo, hi, w) in &weights {
                let a = &values[lo * frame..(lo + 1) * frame];
                let b = &values[hi * frame..(hi + 1) * frame];
                out.extend(a.iter().zip(b).map(|(&x, &y)| lerp_f32(x, y, w)));
            }
            (name.clone(), out)
        })
        .collect();

    GridDataset {
        times: targets,
        grid: source.grid.clone(),
        variables,
    }
}

fn time_bracket(times: &[NaiveDateTime], target: NaiveDateTime) -> (usize, usize, f32) {
    let hi = times.partition_point(|time| *time < target);
    if hi >= times.len() {
        let last = times.len() - 1;
        return (last, last, 0.0);
    }
    if times[hi] == target || hi == 0 {
        return (hi, hi, 0.0);
    }
    let lo = hi - 1;
    let span = (times[hi] - times[lo]).num_seconds() as f32;
    let offset = (target - times[lo]).num_seconds() as f32;
    (lo, hi, offset / span)
}

fn bracket(coords: &[f64], x: f64) -> Option<(usize, usize, f64)> {
    match coords {
        [] => None,
        [only] => ((only - x).abs() < EPS).then_some((0, 0, 0.0)),
        _ => coords.windows(2).enumerate().find_map(|(i, pair)| {
            let (a, b) = (pair[0], pair[1]);
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            if x < low - EPS || x > high + EPS {
                return None;
            }
            let weight = ((x - a) / (b - a)).clamp(0.0, 1.0);
            Some((i, i + 1, weight))
        }),
    }
}

fn lerp(a: f32, b: f32, weight: f64) -> f32 {
    lerp_f32(a, b, weight as f32)
}

/// Zero weights return the endpoint untouched so a `NaN` neighbour does not leak in.
fn lerp_f32(a: f32, b: f32, weight: f32) -> f32 {
    if weight <= 0.0 {
        a
    } else if weight >= 1.0 {
        b
    } else {
        a + (b - a) * weight
    }
}
