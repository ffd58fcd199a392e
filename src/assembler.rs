use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::DatasetCodec;
use crate::dataset::{Grid, GridDataset};
use crate::domain::{ForcingFile, SourceKind, day_hours, start_of_day};
use crate::error::ForcingError;
use crate::inventory::GroupInventory;
use crate::regrid;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub source: SourceKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssemblyOutcome {
    pub group: String,
    pub output: String,
    pub steps: usize,
    pub first: Option<NaiveDateTime>,
    pub last: Option<NaiveDateTime>,
    pub hours_by_source: BTreeMap<SourceKind, usize>,
    pub skipped: Vec<SkippedFile>,
    pub duplicates_removed: usize,
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub source: SourceKind,
    pub dataset: GridDataset,
}

pub struct Assembler<'a> {
    store: &'a Store,
    codec: &'a dyn DatasetCodec,
}

impl<'a> Assembler<'a> {
    pub fn new(store: &'a Store, codec: &'a dyn DatasetCodec) -> Self {
        Self { store, codec }
    }

    pub fn assemble(&self, inventory: &GroupInventory) -> Result<AssemblyOutcome, ForcingError> {
        let prefix = inventory.prefix.as_str();
        let mut skipped = Vec::new();

        let mut parts = Vec::with_capacity(inventory.reanalysis.len());
        for path in inventory.reanalysis.values() {
            match self.codec.read(path) {
                Ok(dataset) => parts.push(dataset),
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "skipping unreadable reanalysis file");
                    skipped.push(skip(path, SourceKind::Reanalysis, &err));
                }
            }
        }
        if parts.is_empty() {
            return Err(ForcingError::MissingPrimarySource {
                group: prefix.to_string(),
            });
        }
        let mut reanalysis = GridDataset::concat(parts)?;
        let duplicates_removed = reanalysis.sort_and_dedup();
        if duplicates_removed > 0 {
            warn!(group = prefix, duplicates_removed, "reanalysis overlaps itself");
        }
        let grid = reanalysis.grid.clone();

        let gaps = gap_set(&reanalysis, inventory);
        debug!(group = prefix, gaps = gaps.len(), "reanalysis gap set");

        let mut layers = vec![Layer {
            source: SourceKind::Reanalysis,
            dataset: reanalysis,
        }];

        let mut gap_fill = Vec::new();
        for (day, path) in &inventory.gap_fill {
            if !day_hours(*day).any(|hour| gaps.contains(&hour)) {
                continue;
            }
            match self.load_on_grid(path, &grid) {
                Ok(dataset) => gap_fill.push(dataset),
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "gap-fill file left out");
                    skipped.push(skip(path, SourceKind::GapFillForecast, &err));
                }
            }
        }
        if !gap_fill.is_empty() {
            layers.push(Layer {
                source: SourceKind::GapFillForecast,
                dataset: GridDataset::concat(gap_fill)?,
            });
        }

        if let Some(continuous) = &inventory.continuous {
            match self.load_on_grid(&continuous.path, &grid) {
                Ok(dataset) => layers.push(Layer {
                    source: SourceKind::ContinuousForecast,
                    dataset,
                }),
                Err(err) => {
                    warn!(file = %continuous.path.display(), error = %err, "continuous forecast left out");
                    skipped.push(skip(&continuous.path, SourceKind::ContinuousForecast, &err));
                }
            }
        }

        let (merged, hours_by_source) = merge_by_priority(layers)?;
        let destination = self.store.path_of(&ForcingFile::Merged {
            prefix: prefix.to_string(),
        });
        let output = self
            .store
            .write_dataset_atomic(self.codec, &merged, &destination)?;
        info!(
            group = prefix,
            output = %output,
            steps = merged.len(),
            "forcing timeline written"
        );

        Ok(AssemblyOutcome {
            group: prefix.to_string(),
            output: output.to_string(),
            steps: merged.len(),
            first: merged.first_time(),
            last: merged.last_time(),
            hours_by_source,
            skipped,
            duplicates_removed,
        })
    }

    fn load_on_grid(&self, path: &Path, grid: &Grid) -> Result<GridDataset, ForcingError> {
        let mut dataset = self.codec.read(path)?;
        dataset.sort_and_dedup();
        regrid::interpolate_to_grid(&dataset, grid).map_err(|reason| {
            ForcingError::SpatialGridMismatch {
                path: path.to_path_buf(),
                reason,
            }
        })
    }
}

fn skip(path: &Path, source: SourceKind, err: &ForcingError) -> SkippedFile {
    SkippedFile {
        path: path.to_path_buf(),
        source,
        reason: err.to_string(),
    }
}

pub fn gap_set(reanalysis: &GridDataset, inventory: &GroupInventory) -> BTreeSet<NaiveDateTime> {
    let (Some(first), Some(last)) = (reanalysis.first_time(), reanalysis.last_time()) else {
        return BTreeSet::new();
    };
    let gap_fill_end = inventory
        .gap_fill
        .keys()
        .next_back()
        .map(|day| start_of_day(*day) + Duration::hours(23));
    let end = gap_fill_end.map_or(last, |end| end.max(last));
    let present: BTreeSet<NaiveDateTime> = reanalysis.times.iter().copied().collect();

    let mut gaps = BTreeSet::new();
    let mut hour = first;
    while hour <= end {
        if !present.contains(&hour) {
            gaps.insert(hour);
        }
        hour += Duration::hours(1);
    }
    gaps
}

/// Merges layers given in descending priority: at each timestamp the first
/// layer that has it wins. Variables follow the first layer; a lower layer
/// lacking one of them contributes `NaN`.
pub fn merge_by_priority(
    layers: Vec<Layer>,
) -> Result<(GridDataset, BTreeMap<SourceKind, usize>), ForcingError> {
    let Some(primary) = layers.first() else {
        return Err(ForcingError::Dataset("nothing to merge".to_string()));
    };
    let grid = primary.dataset.grid.clone();
    let names: Vec<String> = primary.dataset.variables.keys().cloned().collect();
    for layer in &layers[1..] {
        if !layer.dataset.grid.matches(&grid) {
            return Err(ForcingError::Dataset(format!(
                "{} layer is not on the primary grid",
                layer.source
            )));
        }
        for name in names.iter().filter(|name| layer.dataset.variable(name).is_none()) {
            warn!(source = %layer.source, variable = %name, "variable missing, filled with NaN");
        }
    }

    let mut winners: BTreeMap<NaiveDateTime, (usize, usize)> = BTreeMap::new();
    for (layer_index, layer) in layers.iter().enumerate() {
        for (step, time) in layer.dataset.times.iter().enumerate() {
            winners.entry(*time).or_insert((layer_index, step));
        }
    }

    let mut hours_by_source = BTreeMap::new();
    for (layer_index, _) in winners.values() {
        *hours_by_source.entry(layers[*layer_index].source).or_insert(0) += 1;
    }

    let frame_len = grid.frame_len();
    let times: Vec<NaiveDateTime> = winners.keys().copied().collect();
    let mut merged = GridDataset::new(times, grid);
    for name in &names {
        let mut values = Vec::with_capacity(winners.len() * frame_len);
        for &(layer_index, step) in winners.values() {
            match layers[layer_index].dataset.frame(name, step) {
                Some(frame) => values.extend_from_slice(frame),
                None => values.extend(std::iter::repeat_n(f32::NAN, frame_len)),
            }
        }
        merged.insert_variable(name, values)?;
    }
    Ok((merged, hours_by_source))
}
