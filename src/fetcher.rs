use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::cdo::GribConverter;
use crate::codec::{DatasetCodec, FileSummary};
use crate::dataset::GridDataset;
use crate::domain::{self, BoundingBox, FetchObligation, ForcingFile, GroupSpec, SourceKind};
use crate::error::ForcingError;
use crate::fs_util;
use crate::inventory;
use crate::providers::{ForecastProvider, ForecastRequest, ReanalysisProvider};
use crate::resolver::ObligationPlan;
use crate::store::{StagedWrite, Store};
use crate::transform::{self, FORECAST_BLOCKS};

const HOURS_PER_DAY: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    pub bbox: BoundingBox,
    pub cycle_hour: u32,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub archive_superseded: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            bbox: BoundingBox::default(),
            cycle_hour: 0,
            max_attempts: 3,
            retry_delay: Duration::from_secs(30),
            archive_superseded: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    Fetched { attempts: u32 },
    Skipped { reason: String },
    Deferred { attempts: u32, error: String },
    Failed { attempts: u32, error: String },
}

impl FetchOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, FetchOutcome::Deferred { .. } | FetchOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Fetched { .. } => "fetched",
            FetchOutcome::Skipped { .. } => "skipped",
            FetchOutcome::Deferred { .. } => "deferred",
            FetchOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchItemResult {
    pub obligation: FetchObligation,
    pub outcome: FetchOutcome,
    pub files: Vec<String>,
    pub retired: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub items: Vec<FetchItemResult>,
    pub swept: Vec<String>,
}

impl FetchReport {
    pub fn failures(&self) -> impl Iterator<Item = &FetchItemResult> {
        self.items.iter().filter(|item| item.outcome.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn count(&self, source: SourceKind, label: &str) -> usize {
        self.items
            .iter()
            .filter(|item| item.obligation.source == source && item.outcome.label() == label)
            .count()
    }
}

#[derive(Debug, Default)]
struct Written {
    files: Vec<String>,
    retired: Vec<String>,
    full_day: bool,
}

pub struct Fetcher<'a, R, F, G> {
    store: &'a Store,
    codec: &'a dyn DatasetCodec,
    reanalysis: &'a R,
    forecast: &'a F,
    converter: &'a G,
    groups: &'a [GroupSpec],
    settings: &'a FetchSettings,
}

impl<'a, R, F, G> Fetcher<'a, R, F, G>
where
    R: ReanalysisProvider,
    F: ForecastProvider,
    G: GribConverter,
{
    pub fn new(
        store: &'a Store,
        codec: &'a dyn DatasetCodec,
        reanalysis: &'a R,
        forecast: &'a F,
        converter: &'a G,
        groups: &'a [GroupSpec],
        settings: &'a FetchSettings,
    ) -> Self {
        Self {
            store,
            codec,
            reanalysis,
            forecast,
            converter,
            groups,
            settings,
        }
    }

    pub fn run(&self, plan: &ObligationPlan, sink: &dyn ProgressSink) -> FetchReport {
        let mut report = FetchReport {
            swept: self.sweep_superseded(),
            ..FetchReport::default()
        };
        let mut reanalysed = BTreeSet::new();
        let total = plan.obligations.len();
        for (index, obligation) in plan.obligations.iter().enumerate() {
            if obligation.source == SourceKind::GapFillForecast
                && reanalysed.contains(&obligation.date)
            {
                report.items.push(FetchItemResult {
                    obligation: *obligation,
                    outcome: FetchOutcome::Skipped {
                        reason: "reanalysis fetched earlier in this run".to_string(),
                    },
                    files: Vec::new(),
                    retired: Vec::new(),
                });
                continue;
            }

            let started = Instant::now();
            sink.event(ProgressEvent {
                message: format!("phase=Fetch; {}/{total} {obligation}", index + 1),
                elapsed: None,
            });
            let (item, full_day) = self.attempt(obligation, plan.today);
            sink.event(ProgressEvent {
                message: format!("phase=Fetch; {obligation} {}", item.outcome.label()),
                elapsed: Some(started.elapsed()),
            });
            if obligation.source == SourceKind::Reanalysis && full_day {
                reanalysed.insert(obligation.date);
            }
            report.items.push(item);
        }
        report
    }

    fn attempt(&self, obligation: &FetchObligation, today: NaiveDate) -> (FetchItemResult, bool) {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempts = 0;
        let (outcome, written) = loop {
            attempts += 1;
            match self.execute(obligation, today) {
                Ok(written) => break (FetchOutcome::Fetched { attempts }, written),
                Err(err) if err.is_transient() && attempts < max_attempts => {
                    warn!(%obligation, attempt = attempts, error = %err, "transient fetch failure, retrying");
                    thread::sleep(self.settings.retry_delay);
                }
                Err(err) if err.is_transient() => {
                    warn!(%obligation, attempts, error = %err, "deferring to the next run");
                    let error = err.to_string();
                    break (FetchOutcome::Deferred { attempts, error }, Written::default());
                }
                Err(err) => {
                    warn!(%obligation, error = %err, "fetch failed");
                    let error = err.to_string();
                    break (FetchOutcome::Failed { attempts, error }, Written::default());
                }
            }
        };
        let item = FetchItemResult {
            obligation: *obligation,
            outcome,
            files: written.files,
            retired: written.retired,
        };
        (item, written.full_day)
    }

    fn execute(&self, obligation: &FetchObligation, today: NaiveDate) -> Result<Written, ForcingError> {
        match obligation.source {
            SourceKind::Reanalysis => self.fetch_reanalysis_day(obligation.date),
            SourceKind::GapFillForecast => self.fetch_forecast_cycle(obligation.date, today, false),
            SourceKind::ContinuousForecast => {
                self.fetch_forecast_cycle(obligation.date, today, true)
            }
        }
    }

    /// One task per group; every task is joined before any result is used.
    fn per_group<T, Task>(&self, task: Task) -> Result<Vec<T>, ForcingError>
    where
        T: Send,
        Task: Fn(&GroupSpec) -> Result<T, ForcingError> + Sync,
    {
        let results: Vec<Result<T, ForcingError>> = thread::scope(|scope| {
            let task = &task;
            let handles: Vec<_> = self
                .groups
                .iter()
                .map(|group| scope.spawn(move || task(group)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(ForcingError::TransientFetch("retrieval worker panicked".to_string()))
                    })
                })
                .collect()
        });
        results.into_iter().collect()
    }

    fn fetch_reanalysis_day(&self, day: NaiveDate) -> Result<Written, ForcingError> {
        let staging = self.store.staging_dir()?;
        let work = staging.path();
        let datasets = self.per_group(|group| self.retrieve_reanalysis(group, day, work))?;

        let mut staged = Vec::with_capacity(datasets.len());
        for (group, dataset) in self.groups.iter().zip(&datasets) {
            let file = ForcingFile::Reanalysis {
                prefix: group.prefix.clone(),
                date: day,
            };
            staged.push(self.stage(&file, dataset)?);
        }
        let files = commit_all(staged)?;
        let full_day = datasets.iter().all(|dataset| {
            FileSummary::of(&dataset.times).is_some_and(|summary| summary.covers_day(day))
        });
        info!(%day, files = files.len(), full_day, "reanalysis day stored");

        let mut retired = Vec::new();
        if !full_day {
            warn!(%day, "reanalysis day has missing hours, gap-fill forecast kept");
            return Ok(Written {
                files,
                retired,
                full_day,
            });
        }
        for group in self.groups {
            match self.retire(&group.prefix, day) {
                Ok(Some(name)) => retired.push(name),
                Ok(None) => {}
                Err(err) => warn!(%day, group = %group.prefix, error = %err, "could not retire superseded forecast"),
            }
        }
        Ok(Written {
            files,
            retired,
            full_day,
        })
    }

    fn retrieve_reanalysis(
        &self,
        group: &GroupSpec,
        day: NaiveDate,
        work: &Path,
    ) -> Result<GridDataset, ForcingError> {
        let dir = work.join(&group.prefix);
        fs::create_dir_all(&dir).map_err(|err| ForcingError::Filesystem(err.to_string()))?;
        let payload = dir.join(format!("{}_{}.download", group.prefix, day.format("%Y%m%d")));
        self.reanalysis
            .retrieve_day(group, day, &self.settings.bbox, &payload)?;

        let mut merged: Option<GridDataset> = None;
        for file in fs_util::unpack_payload(&payload, &dir)? {
            let dataset = self.codec.read(&file).map_err(as_malformed)?;
            match merged.as_mut() {
                Some(existing) => existing.merge_variables(dataset)?,
                None => merged = Some(dataset),
            }
        }
        let dataset = merged.ok_or_else(|| ForcingError::NoData {
            kind: format!("{} reanalysis", group.prefix),
            date: day,
        })?;
        let dataset = transform::normalize_reanalysis(dataset, &self.settings.bbox)?;
        match FileSummary::of(&dataset.times) {
            Some(summary) if summary.within_day(day) => Ok(dataset),
            Some(summary) => Err(ForcingError::MalformedResponse(format!(
                "{} reanalysis for {day} spans {} .. {}",
                group.prefix, summary.first, summary.last
            ))),
            None => Err(ForcingError::NoData {
                kind: format!("{} reanalysis", group.prefix),
                date: day,
            }),
        }
    }

    fn fetch_forecast_cycle(
        &self,
        date: NaiveDate,
        today: NaiveDate,
        continuous: bool,
    ) -> Result<Written, ForcingError> {
        let cycle_hour = self.settings.cycle_hour;
        let (run_date, day) = if continuous {
            (date, domain::first_full_day(date, cycle_hour))
        } else {
            (domain::covering_run_date(date, cycle_hour), date)
        };
        let staging = self.store.staging_dir()?;
        let work = staging.path();
        let datasets =
            self.per_group(|group| self.retrieve_forecast(group, run_date, today, work))?;

        let mut staged = Vec::new();
        for (group, dataset) in self.groups.iter().zip(&datasets) {
            let hindcast = transform::hindcast_day(dataset, day);
            if hindcast.len() == HOURS_PER_DAY {
                let daily = ForcingFile::GapFill {
                    prefix: group.prefix.clone(),
                    date: day,
                };
                staged.push(self.stage(&daily, &hindcast)?);
            } else if !continuous {
                return Err(ForcingError::NoData {
                    kind: format!("{} forecast hours ({} of {HOURS_PER_DAY})", group.prefix, hindcast.len()),
                    date: day,
                });
            } else {
                warn!(%day, group = %group.prefix, steps = hindcast.len(), "run does not cover a full day, no gap-fill file kept");
            }
            if continuous {
                let run = ForcingFile::Continuous {
                    prefix: group.prefix.clone(),
                };
                staged.push(self.stage(&run, dataset)?);
            }
        }
        let files = commit_all(staged)?;
        info!(%run_date, cycle_hour, continuous, files = files.len(), "forecast cycle stored");
        Ok(Written {
            files,
            retired: Vec::new(),
            full_day: false,
        })
    }

    fn retrieve_forecast(
        &self,
        group: &GroupSpec,
        run_date: NaiveDate,
        today: NaiveDate,
        work: &Path,
    ) -> Result<GridDataset, ForcingError> {
        let dir = work.join(&group.prefix);
        fs::create_dir_all(&dir).map_err(|err| ForcingError::Filesystem(err.to_string()))?;
        let mut blocks = Vec::with_capacity(FORECAST_BLOCKS.len());
        for (index, block) in FORECAST_BLOCKS.iter().enumerate() {
            let request = ForecastRequest {
                reference_date: today,
                date_offset: (run_date - today).num_days(),
                cycle_hour: self.settings.cycle_hour,
                fields: group.forecast_fields.clone(),
                levels: group.levels.clone(),
                steps: block.steps(),
            };
            let grib = dir.join(format!("{}_fc{}.grib2", group.prefix, index + 1));
            self.forecast.retrieve(&request, &grib)?;
            let netcdf = grib.with_extension("nc");
            self.converter.to_netcdf(&grib, &netcdf)?;
            let dataset = self.codec.read(&netcdf).map_err(as_malformed)?;
            blocks.push((*block, transform::subset(&dataset, &self.settings.bbox)?));
        }
        transform::process_forecast(group, blocks)
    }

    fn stage(&self, file: &ForcingFile, dataset: &GridDataset) -> Result<StagedWrite, ForcingError> {
        let destination = self.store.path_of(file);
        self.store.stage_dataset(self.codec, dataset, &destination)
    }

    fn retire(&self, prefix: &str, day: NaiveDate) -> Result<Option<String>, ForcingError> {
        let file = ForcingFile::GapFill {
            prefix: prefix.to_string(),
            date: day,
        };
        if !self.store.path_of(&file).as_std_path().exists() {
            return Ok(None);
        }
        self.store
            .retire_gap_fill(prefix, day, self.settings.archive_superseded)?;
        Ok(Some(file.file_name()))
    }

    fn sweep_superseded(&self) -> Vec<String> {
        let dir = self.store.forecast_dir();
        let inventory = inventory::scan(dir.as_std_path(), self.groups, self.codec);
        let complete = inventory.full_reanalysis_days();
        let mut retired = Vec::new();
        for group in &inventory.groups {
            for day in group.gap_fill.keys().filter(|day| complete.contains(day)) {
                match self.retire(&group.prefix, *day) {
                    Ok(Some(name)) => retired.push(name),
                    Ok(None) => {}
                    Err(err) => warn!(%day, group = %group.prefix, error = %err, "could not retire superseded forecast"),
                }
            }
        }
        if !retired.is_empty() {
            info!(files = retired.len(), "retired superseded forecasts");
        }
        retired
    }
}

fn commit_all(staged: Vec<StagedWrite>) -> Result<Vec<String>, ForcingError> {
    staged
        .into_iter()
        .map(|write| write.commit().map(|path| path.to_string()))
        .collect()
}

fn as_malformed(err: ForcingError) -> ForcingError {
    match err {
        ForcingError::CorruptLocalFile { path, reason } => {
            ForcingError::MalformedResponse(format!("{}: {reason}", path.display()))
        }
        other => other,
    }
}
