use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{DatasetCodec, FileSummary};
use crate::domain::{ForcingFile, GroupSpec, SourceKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Found(FileSummary),
    Missing,
    Corrupt(String),
}

pub fn probe_file(codec: &dyn DatasetCodec, path: &Path, day: Option<NaiveDate>) -> Presence {
    if !path.is_file() {
        return Presence::Missing;
    }
    match codec.probe(path) {
        Ok(summary) => match day {
            Some(day) if !summary.within_day(day) => Presence::Corrupt(format!(
                "timestamps {} .. {} fall outside {day}",
                summary.first, summary.last
            )),
            _ => Presence::Found(summary),
        },
        Err(err) => Presence::Corrupt(err.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContinuousFile {
    pub path: PathBuf,
    pub cycle: NaiveDate,
    pub summary: FileSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupInventory {
    pub prefix: String,
    pub reanalysis: BTreeMap<NaiveDate, PathBuf>,
    pub partial_reanalysis: BTreeSet<NaiveDate>,
    pub gap_fill: BTreeMap<NaiveDate, PathBuf>,
    pub continuous: Option<ContinuousFile>,
    pub corrupt: Vec<CorruptFile>,
}

impl GroupInventory {
    pub fn days(&self, kind: SourceKind) -> BTreeSet<NaiveDate> {
        match kind {
            SourceKind::Reanalysis => self.reanalysis.keys().copied().collect(),
            SourceKind::GapFillForecast => self.gap_fill.keys().copied().collect(),
            SourceKind::ContinuousForecast => {
                self.continuous.iter().map(|file| file.cycle).collect()
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub groups: Vec<GroupInventory>,
}

impl Inventory {
    pub fn group(&self, prefix: &str) -> Option<&GroupInventory> {
        self.groups.iter().find(|group| group.prefix == prefix)
    }

    pub fn complete_days(&self, kind: SourceKind) -> BTreeSet<NaiveDate> {
        let mut groups = self.groups.iter();
        let Some(first) = groups.next() else {
            return BTreeSet::new();
        };
        groups.fold(first.days(kind), |acc, group| {
            acc.intersection(&group.days(kind)).copied().collect()
        })
    }

    pub fn full_reanalysis_days(&self) -> BTreeSet<NaiveDate> {
        let mut days = self.complete_days(SourceKind::Reanalysis);
        for group in &self.groups {
            days.retain(|day| !group.partial_reanalysis.contains(day));
        }
        days
    }

    pub fn any_days(&self, kind: SourceKind) -> BTreeSet<NaiveDate> {
        self.groups.iter().flat_map(|group| group.days(kind)).collect()
    }

    pub fn continuous_cycle(&self) -> Option<NaiveDate> {
        if self.groups.is_empty() {
            return None;
        }
        self.groups
            .iter()
            .map(|group| group.continuous.as_ref().map(|file| file.cycle))
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .min()
    }

    pub fn corrupt_files(&self) -> impl Iterator<Item = &CorruptFile> {
        self.groups.iter().flat_map(|group| group.corrupt.iter())
    }
}

pub fn scan(dir: &Path, groups: &[GroupSpec], codec: &dyn DatasetCodec) -> Inventory {
    Inventory {
        groups: groups
            .iter()
            .map(|group| scan_group(dir, &group.prefix, codec))
            .collect(),
    }
}

pub fn scan_group(dir: &Path, prefix: &str, codec: &dyn DatasetCodec) -> GroupInventory {
    let mut inventory = GroupInventory {
        prefix: prefix.to_string(),
        ..GroupInventory::default()
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %dir.display(), error = %err, "forecast directory not readable");
            return inventory;
        }
    };

    let mut candidates: Vec<(ForcingFile, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let file: ForcingFile = path.file_name()?.to_str()?.parse().ok()?;
            (file.prefix() == prefix).then_some((file, path))
        })
        .collect();
    candidates.sort_by(|a, b| a.1.cmp(&b.1));

    for (file, path) in candidates {
        let presence = probe_file(codec, &path, file.date());
        let summary = match presence {
            Presence::Found(summary) => summary,
            Presence::Missing => continue,
            Presence::Corrupt(reason) => {
                warn!(file = %path.display(), reason = %reason, "corrupt forcing file left in place");
                inventory.corrupt.push(CorruptFile { path, reason });
                continue;
            }
        };
        match file {
            ForcingFile::Reanalysis { date, .. } => {
                if !summary.covers_day(date) {
                    debug!(file = %path.display(), steps = summary.steps, "partial reanalysis day");
                    inventory.partial_reanalysis.insert(date);
                }
                inventory.reanalysis.insert(date, path);
            }
            ForcingFile::GapFill { date, .. } => {
                inventory.gap_fill.insert(date, path);
            }
            ForcingFile::Continuous { .. } => {
                inventory.continuous = Some(ContinuousFile {
                    path,
                    cycle: summary.first.date(),
                    summary,
                });
            }
            ForcingFile::Merged { .. } => {}
        }
    }
    debug!(
        prefix,
        reanalysis = inventory.reanalysis.len(),
        gap_fill = inventory.gap_fill.len(),
        continuous = inventory.continuous.is_some(),
        "scanned group"
    );
    inventory
}
