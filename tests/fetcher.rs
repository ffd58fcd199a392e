mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::Timelike;

use common::{
    CaptureSink, CopyConverter, Failure, FixtureCodec, MockForecast, MockReanalysis, day,
    at, constant, hours_of, reanalysis_day, reanalysis_variables, test_grid, write_fixture,
};
use snowmapper_forcing::codec::DatasetCodec;
use snowmapper_forcing::domain::{FetchObligation, ForcingFile, GroupSpec, SourceKind, default_groups};
use snowmapper_forcing::fetcher::{FetchOutcome, FetchReport, FetchSettings, Fetcher};
use snowmapper_forcing::inventory::scan;
use snowmapper_forcing::resolver::ObligationPlan;
use snowmapper_forcing::store::Store;

struct Harness {
    _temp: tempfile::TempDir,
    store: Store,
    groups: Vec<GroupSpec>,
    settings: FetchSettings,
}

impl Harness {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let store = Store::new(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
        store.ensure_layout().unwrap();
        Self {
            _temp: temp,
            store,
            groups: default_groups(),
            settings: FetchSettings {
                retry_delay: Duration::ZERO,
                ..FetchSettings::default()
            },
        }
    }

    fn run(
        &self,
        reanalysis: &MockReanalysis,
        forecast: &MockForecast,
        obligations: Vec<FetchObligation>,
    ) -> FetchReport {
        let converter = CopyConverter::default();
        let fetcher = Fetcher::new(
            &self.store,
            &FixtureCodec,
            reanalysis,
            forecast,
            &converter,
            &self.groups,
            &self.settings,
        );
        let plan = ObligationPlan {
            today: day(2026, 2, 10),
            latest_available: Some(day(2026, 2, 5)),
            obligations,
            permanent_gaps: Vec::new(),
        };
        fetcher.run(&plan, &CaptureSink::default())
    }

    fn exists(&self, file: ForcingFile) -> bool {
        self.store.path_of(&file).as_std_path().exists()
    }
}

fn surf_gap_fill(date: chrono::NaiveDate) -> ForcingFile {
    ForcingFile::GapFill {
        prefix: "SURF".to_string(),
        date,
    }
}

#[test]
fn reanalysis_supersedes_gap_fill_for_the_same_day() {
    let harness = Harness::new();
    let date = day(2026, 2, 4);
    for group in &harness.groups {
        let file = ForcingFile::GapFill {
            prefix: group.prefix.clone(),
            date,
        };
        write_fixture(
            harness.store.path_of(&file).as_std_path(),
            &reanalysis_day(group, date, 9.0),
        );
    }

    let reanalysis = MockReanalysis::new(day(2026, 2, 5));
    let forecast = MockForecast::default();
    let report = harness.run(
        &reanalysis,
        &forecast,
        vec![FetchObligation::reanalysis(date), FetchObligation::gap_fill(date)],
    );

    assert_eq!(report.items[0].outcome, FetchOutcome::Fetched { attempts: 1 });
    assert_matches!(report.items[1].outcome, FetchOutcome::Skipped { .. });
    assert_eq!(report.items[0].retired.len(), 2);
    assert_eq!(forecast.request_count(), 0);
    assert!(!report.has_failures());

    for group in &harness.groups {
        assert!(harness.exists(ForcingFile::Reanalysis {
            prefix: group.prefix.clone(),
            date,
        }));
        assert!(!harness.exists(ForcingFile::GapFill {
            prefix: group.prefix.clone(),
            date,
        }));
    }
    assert!(harness
        .store
        .archive_dir()
        .join("SURF_FC_2026-02-04.nc")
        .as_std_path()
        .exists());
}

#[test]
fn stored_reanalysis_is_normalised() {
    let harness = Harness::new();
    let date = day(2026, 2, 4);
    let reanalysis = MockReanalysis::new(date);
    harness.run(
        &reanalysis,
        &MockForecast::default(),
        vec![FetchObligation::reanalysis(date)],
    );
    let plev = FixtureCodec
        .read(
            harness
                .store
                .path_of(&ForcingFile::Reanalysis {
                    prefix: "PLEV".to_string(),
                    date,
                })
                .as_std_path(),
        )
        .unwrap();
    assert_eq!(plev.len(), 24);
    assert!(plev.grid.levels.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn transient_failures_are_retried_within_the_run() {
    let harness = Harness::new();
    let date = day(2026, 2, 4);
    let reanalysis = MockReanalysis::failing(date, 1, Failure::Transient);
    let report = harness.run(
        &reanalysis,
        &MockForecast::default(),
        vec![FetchObligation::reanalysis(date)],
    );
    assert_eq!(report.items[0].outcome, FetchOutcome::Fetched { attempts: 2 });
    assert_eq!(reanalysis.call_count(), 4);
}

#[test]
fn exhausted_retries_defer_without_writing() {
    let harness = Harness::new();
    let date = day(2026, 2, 4);
    let reanalysis = MockReanalysis::failing(date, usize::MAX, Failure::Transient);
    let report = harness.run(
        &reanalysis,
        &MockForecast::default(),
        vec![FetchObligation::reanalysis(date)],
    );
    assert_matches!(
        report.items[0].outcome,
        FetchOutcome::Deferred { attempts: 3, .. }
    );
    assert!(report.has_failures());
    for group in &harness.groups {
        assert!(!harness.exists(ForcingFile::Reanalysis {
            prefix: group.prefix.clone(),
            date,
        }));
    }
}

#[test]
fn fatal_errors_are_not_retried() {
    let harness = Harness::new();
    let date = day(2026, 2, 4);
    let reanalysis = MockReanalysis::failing(date, usize::MAX, Failure::Fatal);
    let report = harness.run(
        &reanalysis,
        &MockForecast::default(),
        vec![FetchObligation::reanalysis(date)],
    );
    assert_matches!(report.items[0].outcome, FetchOutcome::Failed { attempts: 1, .. });
}

#[test]
fn one_failure_does_not_stop_the_loop() {
    let harness = Harness::new();
    let today = day(2026, 2, 10);
    let reanalysis = MockReanalysis::failing(today, usize::MAX, Failure::Fatal);
    let forecast = MockForecast::default();
    let report = harness.run(
        &reanalysis,
        &forecast,
        vec![
            FetchObligation::reanalysis(day(2026, 2, 4)),
            FetchObligation::continuous(today),
        ],
    );
    assert_eq!(report.items.len(), 2);
    assert!(report.items[0].outcome.is_failure());
    assert_eq!(report.items[1].outcome, FetchOutcome::Fetched { attempts: 1 });
    assert_eq!(report.failures().count(), 1);
}

#[test]
fn continuous_run_writes_full_run_and_hindcast_day() {
    let harness = Harness::new();
    let today = day(2026, 2, 10);
    let forecast = MockForecast::default();
    let report = harness.run(
        &MockReanalysis::new(day(2026, 2, 5)),
        &forecast,
        vec![FetchObligation::continuous(today)],
    );
    assert_eq!(report.items[0].outcome, FetchOutcome::Fetched { attempts: 1 });
    assert_eq!(report.items[0].files.len(), 4);
    // two blocks per group
    assert_eq!(forecast.request_count(), 4);

    let hindcast = FixtureCodec
        .read(harness.store.path_of(&surf_gap_fill(today)).as_std_path())
        .unwrap();
    assert_eq!(hindcast.len(), 24);
    assert!(hindcast.variable("t2m").is_some());
    assert!(hindcast.variable("z").is_some());
    assert!(hindcast.variable("msl").is_none());
    // accumulation grows by 3 per 3 h step, so the rate settles at 1 once past step 0
    assert!(hindcast.frame("tp", 0).unwrap().iter().all(|value| *value == 0.0));
    for step in 3..24 {
        let frame = hindcast.frame("tp", step).unwrap();
        assert!(frame.iter().all(|value| (value - 1.0).abs() < 1e-5));
    }

    let run = FixtureCodec
        .read(
            harness
                .store
                .path_of(&ForcingFile::Continuous {
                    prefix: "PLEV".to_string(),
                })
                .as_std_path(),
        )
        .unwrap();
    assert_eq!(run.len(), 241);
    assert!(run.variable("gh").is_none());
    let z = run.variable("z").unwrap();
    assert!((z[0] - 5.0 * 9.81).abs() < 1e-3);
}

#[test]
fn gap_fill_requests_use_a_negative_date_offset() {
    let harness = Harness::new();
    let forecast = MockForecast::default();
    let report = harness.run(
        &MockReanalysis::new(day(2026, 2, 5)),
        &forecast,
        vec![FetchObligation::gap_fill(day(2026, 2, 8))],
    );
    assert_eq!(report.items[0].outcome, FetchOutcome::Fetched { attempts: 1 });
    let requests = forecast.requests.lock().unwrap();
    assert!(requests.iter().all(|request| request.date_offset == -2));
    assert!(harness.exists(surf_gap_fill(day(2026, 2, 8))));
    assert!(!harness.exists(ForcingFile::Continuous {
        prefix: "SURF".to_string()
    }));
}

#[test]
fn housekeeping_archives_leftover_gap_fill_files() {
    let harness = Harness::new();
    let date = day(2026, 2, 2);
    for group in &harness.groups {
        for file in [
            ForcingFile::Reanalysis {
                prefix: group.prefix.clone(),
                date,
            },
            ForcingFile::GapFill {
                prefix: group.prefix.clone(),
                date,
            },
        ] {
            write_fixture(
                harness.store.path_of(&file).as_std_path(),
                &reanalysis_day(group, date, 1.0),
            );
        }
    }
    let report = harness.run(
        &MockReanalysis::new(day(2026, 2, 5)),
        &MockForecast::default(),
        Vec::new(),
    );
    assert_eq!(report.swept.len(), 2);
    assert!(!harness.exists(surf_gap_fill(date)));
}

fn assert_full_day(dataset: &snowmapper_forcing::dataset::GridDataset, date: chrono::NaiveDate) {
    assert_eq!(dataset.len(), 24);
    assert_eq!(dataset.times, hours_of(date));
    assert!(dataset.times.iter().all(|time| time.minute() == 0));
}

#[test]
fn midday_cycle_gap_fill_covers_the_whole_day() {
    let mut harness = Harness::new();
    harness.settings.cycle_hour = 12;
    let date = day(2026, 2, 8);
    let forecast = MockForecast::default();
    let report = harness.run(
        &MockReanalysis::new(day(2026, 2, 5)),
        &forecast,
        vec![FetchObligation::gap_fill(date)],
    );
    assert_eq!(report.items[0].outcome, FetchOutcome::Fetched { attempts: 1 });

    // the 12 UTC run of the day before reaches 00 UTC of the wanted day
    let requests = forecast.requests.lock().unwrap();
    assert!(requests
        .iter()
        .all(|request| request.cycle_hour == 12 && request.date_offset == -3));
    drop(requests);

    for group in &harness.groups {
        let file = ForcingFile::GapFill {
            prefix: group.prefix.clone(),
            date,
        };
        let dataset = FixtureCodec
            .read(harness.store.path_of(&file).as_std_path())
            .unwrap();
        assert_full_day(&dataset, date);
    }
    let inventory = scan(
        harness.store.forecast_dir().as_std_path(),
        &harness.groups,
        &FixtureCodec,
    );
    assert!(inventory
        .complete_days(SourceKind::GapFillForecast)
        .contains(&date));
    assert_eq!(inventory.corrupt_files().count(), 0);
}

#[test]
fn midday_continuous_run_keeps_its_first_full_day() {
    let mut harness = Harness::new();
    harness.settings.cycle_hour = 12;
    let today = day(2026, 2, 10);
    let report = harness.run(
        &MockReanalysis::new(day(2026, 2, 5)),
        &MockForecast::default(),
        vec![FetchObligation::continuous(today)],
    );
    assert_eq!(report.items[0].outcome, FetchOutcome::Fetched { attempts: 1 });
    assert!(!harness.exists(surf_gap_fill(today)));

    let tomorrow = day(2026, 2, 11);
    let hindcast = FixtureCodec
        .read(harness.store.path_of(&surf_gap_fill(tomorrow)).as_std_path())
        .unwrap();
    assert_full_day(&hindcast, tomorrow);

    let run = FixtureCodec
        .read(
            harness
                .store
                .path_of(&ForcingFile::Continuous {
                    prefix: "SURF".to_string(),
                })
                .as_std_path(),
        )
        .unwrap();
    assert_eq!(run.times[0], at(today, 12));
    let inventory = scan(
        harness.store.forecast_dir().as_std_path(),
        &harness.groups,
        &FixtureCodec,
    );
    assert_eq!(inventory.continuous_cycle(), Some(today));
}

#[test]
fn reanalysis_day_with_missing_hours_keeps_its_gap_fill() {
    let harness = Harness::new();
    let date = day(2026, 2, 2);
    for group in &harness.groups {
        let times = hours_of(date)
            .into_iter()
            .filter(|time| !(3..=6).contains(&time.hour()))
            .collect();
        write_fixture(
            harness
                .store
                .path_of(&ForcingFile::Reanalysis {
                    prefix: group.prefix.clone(),
                    date,
                })
                .as_std_path(),
            &constant(times, test_grid(group), reanalysis_variables(group), 1.0),
        );
        write_fixture(
            harness
                .store
                .path_of(&ForcingFile::GapFill {
                    prefix: group.prefix.clone(),
                    date,
                })
                .as_std_path(),
            &reanalysis_day(group, date, 2.0),
        );
    }
    let report = harness.run(
        &MockReanalysis::new(day(2026, 2, 5)),
        &MockForecast::default(),
        Vec::new(),
    );
    assert!(report.swept.is_empty());
    assert!(harness.exists(surf_gap_fill(date)));
}
