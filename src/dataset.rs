//! In-memory gridded time series shared by every stage.
//!
//! Values of each variable are stored flat in `[time][level][lat][lon]` order.
//! Surface groups have no level axis; their frames are one lat/lon plane.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::ForcingError;

const COORD_EPS: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    #[serde(default)]
    pub levels: Vec<f64>,
}

impl Grid {
    pub fn new(latitudes: Vec<f64>, longitudes: Vec<f64>, levels: Vec<f64>) -> Self {
        Self {
            latitudes,
            longitudes,
            levels,
        }
    }

    pub fn surface(latitudes: Vec<f64>, longitudes: Vec<f64>) -> Self {
        Self::new(latitudes, longitudes, Vec::new())
    }

    pub fn has_levels(&self) -> bool {
        !self.levels.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len().max(1)
    }

    pub fn plane_len(&self) -> usize {
        self.latitudes.len() * self.longitudes.len()
    }

    pub fn frame_len(&self) -> usize {
        self.level_count() * self.plane_len()
    }

    pub fn matches(&self, other: &Grid) -> bool {
        coords_match(&self.latitudes, &other.latitudes)
            && coords_match(&self.longitudes, &other.longitudes)
            && coords_match(&self.levels, &other.levels)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.latitudes.is_empty() || self.longitudes.is_empty() {
            return Err("empty latitude/longitude axis".to_string());
        }
        for (name, axis) in [
            ("latitude", &self.latitudes),
            ("longitude", &self.longitudes),
            ("level", &self.levels),
        ] {
            if axis.iter().any(|value| !value.is_finite()) {
                return Err(format!("non-finite {name} coordinate"));
            }
            if !is_monotonic(axis) {
                return Err(format!("{name} axis is not monotonic"));
            }
        }
        Ok(())
    }
}

fn coords_match(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < COORD_EPS)
}

fn is_monotonic(values: &[f64]) -> bool {
    let ascending = values.windows(2).all(|pair| pair[1] > pair[0]);
    let descending = values.windows(2).all(|pair| pair[1] < pair[0]);
    ascending || descending
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDataset {
    pub times: Vec<NaiveDateTime>,
    pub grid: Grid,
    pub variables: BTreeMap<String, Vec<f32>>,
}

impl GridDataset {
    pub fn new(times: Vec<NaiveDateTime>, grid: Grid) -> Self {
        Self {
            times,
            grid,
            variables: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn frame_len(&self) -> usize {
        self.grid.frame_len()
    }

    pub fn with_variable(mut self, name: &str, values: Vec<f32>) -> Result<Self, ForcingError> {
        self.insert_variable(name, values)?;
        Ok(self)
    }

    pub fn insert_variable(&mut self, name: &str, values: Vec<f32>) -> Result<(), ForcingError> {
        let expected = self.len() * self.frame_len();
        if values.len() != expected {
            return Err(ForcingError::Dataset(format!(
                "variable {name} has {} values, expected {expected}",
                values.len()
            )));
        }
        self.variables.insert(name.to_string(), values);
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&[f32]> {
        self.variables.get(name).map(Vec::as_slice)
    }

    pub fn frame(&self, name: &str, index: usize) -> Option<&[f32]> {
        let frame_len = self.frame_len();
        self.variables
            .get(name)
            .and_then(|values| values.get(index * frame_len..(index + 1) * frame_len))
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Vec<f32>> {
        self.variables.remove(name)
    }

    pub fn rename_variable(&mut self, from: &str, to: &str) -> bool {
        match self.variables.remove(from) {
            Some(values) => {
                self.variables.insert(to.to_string(), values);
                true
            }
            None => false,
        }
    }

    pub fn first_time(&self) -> Option<NaiveDateTime> {
        self.times.iter().min().copied()
    }

    pub fn last_time(&self) -> Option<NaiveDateTime> {
        self.times.iter().max().copied()
    }

    pub fn select_times(&self, indices: &[usize]) -> GridDataset {
        let frame_len = self.frame_len();
        let times = indices.iter().map(|&index| self.times[index]).collect();
        let variables = self
            .variables
            .iter()
            .map(|(name, values)| {
                let mut selected = Vec::with_capacity(indices.len() * frame_len);
                for &index in indices {
                    selected.extend_from_slice(&values[index * frame_len..(index + 1) * frame_len]);
                }
                (name.clone(), selected)
            })
            .collect();
        GridDataset {
            times,
            grid: self.grid.clone(),
            variables,
        }
    }

    pub fn sort_and_dedup(&mut self) -> usize {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&index| self.times[index]);
        let mut keep: Vec<usize> = Vec::with_capacity(order.len());
        for index in order {
            let duplicate = keep
                .last()
                .map(|&previous| self.times[previous] == self.times[index])
                .unwrap_or(false);
            if !duplicate {
                keep.push(index);
            }
        }
        let removed = self.len() - keep.len();
        let sorted = keep.windows(2).all(|pair| pair[0] < pair[1]);
        if removed > 0 || !sorted {
            *self = self.select_times(&keep);
        }
        removed
    }

    pub fn concat(parts: Vec<GridDataset>) -> Result<GridDataset, ForcingError> {
        let mut iter = parts.into_iter();
        let Some(first) = iter.next() else {
            return Err(ForcingError::Dataset("nothing to concatenate".to_string()));
        };
        let rest: Vec<GridDataset> = iter.collect();
        for part in &rest {
            if !part.grid.matches(&first.grid) {
                return Err(ForcingError::Dataset(
                    "cannot concatenate datasets on different grids".to_string(),
                ));
            }
        }

        let mut names: Vec<String> = first.variables.keys().cloned().collect();
        for part in &rest {
            for name in part.variables.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }

        let frame_len = first.frame_len();
        let mut all = Vec::with_capacity(rest.len() + 1);
        all.push(first);
        all.extend(rest);

        let times: Vec<NaiveDateTime> = all.iter().flat_map(|part| part.times.clone()).collect();
        let mut variables = BTreeMap::new();
        for name in names {
            let mut values = Vec::with_capacity(times.len() * frame_len);
            for part in &all {
                match part.variables.get(&name) {
                    Some(data) => values.extend_from_slice(data),
                    None => values.extend(std::iter::repeat_n(f32::NAN, part.len() * frame_len)),
                }
            }
            variables.insert(name, values);
        }

        Ok(GridDataset {
            times,
            grid: all[0].grid.clone(),
            variables,
        })
    }

    pub fn merge_variables(&mut self, other: GridDataset) -> Result<(), ForcingError> {
        if other.times != self.times || !other.grid.matches(&self.grid) {
            return Err(ForcingError::Dataset(
                "cannot merge variables of datasets with different axes".to_string(),
            ));
        }
        for (name, values) in other.variables {
            self.variables.entry(name).or_insert(values);
        }
        Ok(())
    }
}
