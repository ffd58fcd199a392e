use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::assembler::{Assembler, AssemblyOutcome};
use crate::auditor::{self, AuditReport};
use crate::cdo::GribConverter;
use crate::codec::DatasetCodec;
use crate::config::ResolvedConfig;
use crate::domain::{ForcingFile, SourceKind};
use crate::fetcher::{FetchReport, Fetcher};
use crate::inventory::{self, CorruptFile, Inventory};
use crate::providers::{ForecastProvider, ReanalysisProvider};
use crate::resolver::{self, ObligationPlan};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub plan: ObligationPlan,
    pub latest_available_error: Option<String>,
    pub corrupt_files: Vec<CorruptFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Assembled,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupAssembly {
    pub group: String,
    pub status: GroupStatus,
    pub outcome: Option<AssemblyOutcome>,
    pub audit: Option<AuditReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupAudit {
    pub group: String,
    pub path: String,
    pub report: Option<AuditReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub plan: PlanResult,
    pub fetch: FetchReport,
    pub assembly: Vec<GroupAssembly>,
}

impl PlanResult {
    pub fn latest_available_failed(&self) -> bool {
        self.latest_available_error.is_some()
    }
}

impl RunSummary {
    pub fn fetch_failed(&self) -> bool {
        self.fetch.has_failures() || self.plan.latest_available_failed()
    }

    pub fn assembly_failed(&self) -> bool {
        assembly_failed(&self.assembly)
    }
}

pub fn assembly_failed(groups: &[GroupAssembly]) -> bool {
    groups.iter().any(|group| group.status == GroupStatus::Failed)
}

pub struct App<C, R, F, G>
where
    C: DatasetCodec,
    R: ReanalysisProvider,
    F: ForecastProvider,
    G: GribConverter,
{
    config: ResolvedConfig,
    store: Store,
    codec: C,
    reanalysis: R,
    forecast: F,
    converter: G,
}

impl<C, R, F, G> App<C, R, F, G>
where
    C: DatasetCodec,
    R: ReanalysisProvider,
    F: ForecastProvider,
    G: GribConverter,
{
    pub fn new(config: ResolvedConfig, codec: C, reanalysis: R, forecast: F, converter: G) -> Self {
        let store = Store::new(config.climate_dir.clone());
        Self {
            config,
            store,
            codec,
            reanalysis,
            forecast,
            converter,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn scan(&self) -> Inventory {
        inventory::scan(
            self.store.forecast_dir().as_std_path(),
            &self.config.groups,
            &self.codec,
        )
    }

    pub fn plan(
        &self,
        today: NaiveDate,
        latest_override: Option<NaiveDate>,
        sink: &dyn ProgressSink,
    ) -> PlanResult {
        sink.event(ProgressEvent {
            message: "phase=Scan; reading forecast directory".to_string(),
            elapsed: None,
        });
        let started = Instant::now();
        let inventory = self.scan();

        let (latest, latest_available_error) = match latest_override {
            Some(latest) => (Some(latest), None),
            None => match self.reanalysis.latest_available() {
                Ok(latest) => (Some(latest), None),
                Err(err) => {
                    warn!(error = %err, "latest available reanalysis day unknown");
                    (None, Some(err.to_string()))
                }
            },
        };

        let plan = resolver::resolve(&inventory, latest, today, self.config.gap_fill_retention());
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {} obligations", plan.obligations.len()),
            elapsed: Some(started.elapsed()),
        });
        PlanResult {
            plan,
            latest_available_error,
            corrupt_files: inventory.corrupt_files().cloned().collect(),
        }
    }

    pub fn fetch(&self, plan: &ObligationPlan, sink: &dyn ProgressSink) -> FetchReport {
        let fetcher = Fetcher::new(
            &self.store,
            &self.codec,
            &self.reanalysis,
            &self.forecast,
            &self.converter,
            &self.config.groups,
            &self.config.fetch,
        );
        let report = fetcher.run(plan, sink);
        for source in SourceKind::ALL {
            info!(
                %source,
                fetched = report.count(source, "fetched"),
                skipped = report.count(source, "skipped"),
                deferred = report.count(source, "deferred"),
                failed = report.count(source, "failed"),
                "fetch summary"
            );
        }
        report
    }

    pub fn assemble(
        &self,
        permanent_gaps: &[NaiveDate],
        sink: &dyn ProgressSink,
    ) -> Vec<GroupAssembly> {
        let inventory = self.scan();
        let assembler = Assembler::new(&self.store, &self.codec);
        let mut results = Vec::with_capacity(inventory.groups.len());
        for group in &inventory.groups {
            let started = Instant::now();
            sink.event(ProgressEvent {
                message: format!("phase=Assemble; {}", group.prefix),
                elapsed: None,
            });
            let result = match assembler.assemble(group) {
                Ok(outcome) => {
                    let audit = auditor::audit_file(
                        &self.codec,
                        std::path::Path::new(&outcome.output),
                        permanent_gaps,
                    );
                    let (audit, error) = match audit {
                        Ok(report) => {
                            auditor::log_summary(&group.prefix, &report);
                            (Some(report), None)
                        }
                        Err(err) => (None, Some(err.to_string())),
                    };
                    GroupAssembly {
                        group: group.prefix.clone(),
                        status: GroupStatus::Assembled,
                        outcome: Some(outcome),
                        audit,
                        error,
                    }
                }
                Err(err) => {
                    warn!(group = %group.prefix, error = %err, "assembly failed");
                    GroupAssembly {
                        group: group.prefix.clone(),
                        status: GroupStatus::Failed,
                        outcome: None,
                        audit: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            sink.event(ProgressEvent {
                message: format!("phase=Assemble; {} done", group.prefix),
                elapsed: Some(started.elapsed()),
            });
            results.push(result);
        }
        results
    }

    pub fn audit(&self, permanent_gaps: &[NaiveDate], sink: &dyn ProgressSink) -> Vec<GroupAudit> {
        self.config
            .groups
            .iter()
            .map(|group| {
                let path = self.store.path_of(&ForcingFile::Merged {
                    prefix: group.prefix.clone(),
                });
                sink.event(ProgressEvent {
                    message: format!("phase=Audit; {path}"),
                    elapsed: None,
                });
                match auditor::audit_file(&self.codec, path.as_std_path(), permanent_gaps) {
                    Ok(report) => {
                        auditor::log_summary(&group.prefix, &report);
                        GroupAudit {
                            group: group.prefix.clone(),
                            path: path.to_string(),
                            report: Some(report),
                            error: None,
                        }
                    }
                    Err(err) => GroupAudit {
                        group: group.prefix.clone(),
                        path: path.to_string(),
                        report: None,
                        error: Some(err.to_string()),
                    },
                }
            })
            .collect()
    }

    pub fn permanent_gaps(&self, today: NaiveDate) -> Vec<NaiveDate> {
        resolver::resolve(&self.scan(), None, today, self.config.gap_fill_retention()).permanent_gaps
    }

    pub fn run(
        &self,
        today: NaiveDate,
        latest_override: Option<NaiveDate>,
        sink: &dyn ProgressSink,
    ) -> RunSummary {
        let plan = self.plan(today, latest_override, sink);
        let fetch = self.fetch(&plan.plan, sink);
        let assembly = self.assemble(&plan.plan.permanent_gaps, sink);
        RunSummary {
            plan,
            fetch,
            assembly,
        }
    }
}
