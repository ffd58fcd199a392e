mod common;

use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::Duration;

use common::{FixtureCodec, at, constant, day, reanalysis_day, test_grid, write_fixture};
use snowmapper_forcing::domain::{ForcingFile, GroupSpec, SourceKind, default_groups};
use snowmapper_forcing::inventory::{Presence, probe_file, scan};
use snowmapper_forcing::store::Store;

fn store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
    store.ensure_layout().unwrap();
    (temp, store)
}

fn write(store: &Store, file: ForcingFile, group: &GroupSpec) {
    let date = file.date().unwrap_or(day(2026, 1, 1));
    write_fixture(
        store.path_of(&file).as_std_path(),
        &reanalysis_day(group, date, 1.0),
    );
}

#[test]
fn companion_groups_decide_completeness() {
    let (_temp, store) = store();
    let groups = default_groups();
    let (surf, plev) = (&groups[0], &groups[1]);
    for date in [day(2026, 1, 1), day(2026, 1, 2)] {
        write(
            &store,
            ForcingFile::Reanalysis {
                prefix: "SURF".to_string(),
                date,
            },
            surf,
        );
    }
    write(
        &store,
        ForcingFile::Reanalysis {
            prefix: "PLEV".to_string(),
            date: day(2026, 1, 1),
        },
        plev,
    );

    let inventory = scan(store.forecast_dir().as_std_path(), &groups, &FixtureCodec);
    assert_eq!(
        inventory.complete_days(SourceKind::Reanalysis).into_iter().collect::<Vec<_>>(),
        vec![day(2026, 1, 1)]
    );
    assert_eq!(inventory.any_days(SourceKind::Reanalysis).len(), 2);
}

#[test]
fn corrupt_files_are_absent_but_kept() {
    let (_temp, store) = store();
    let groups = default_groups();
    let garbage = store.path_of(&ForcingFile::Reanalysis {
        prefix: "SURF".to_string(),
        date: day(2026, 1, 3),
    });
    fs::write(garbage.as_std_path(), b"<html>502</html>").unwrap();

    // daily file whose timestamps spill into the next day
    let spill = store.path_of(&ForcingFile::GapFill {
        prefix: "SURF".to_string(),
        date: day(2026, 1, 4),
    });
    let times = (0..25)
        .map(|hour| at(day(2026, 1, 4), 0) + Duration::hours(hour))
        .collect();
    write_fixture(
        spill.as_std_path(),
        &constant(times, test_grid(&groups[0]), &["t2m"], 1.0),
    );

    let inventory = scan(store.forecast_dir().as_std_path(), &groups, &FixtureCodec);
    let surf = inventory.group("SURF").unwrap();
    assert!(surf.reanalysis.is_empty());
    assert!(surf.gap_fill.is_empty());
    assert_eq!(inventory.corrupt_files().count(), 2);
    assert!(garbage.as_std_path().exists());
    assert!(spill.as_std_path().exists());
}

#[test]
fn staging_and_foreign_files_are_ignored() {
    let (_temp, store) = store();
    let groups = default_groups();
    let dir = store.forecast_dir();
    fs::write(dir.join(".SURF_20260101.nc.x1y2.part").as_std_path(), b"partial").unwrap();
    fs::write(dir.join("notes.txt").as_std_path(), b"hello").unwrap();
    fs::write(dir.join("OTHER_20260101.nc").as_std_path(), b"x").unwrap();

    let inventory = scan(dir.as_std_path(), &groups, &FixtureCodec);
    assert_eq!(inventory.corrupt_files().count(), 0);
    assert!(inventory.any_days(SourceKind::Reanalysis).is_empty());
}

#[test]
fn continuous_cycle_is_the_oldest_first_step() {
    let (_temp, store) = store();
    let groups = default_groups();
    for (group, start) in groups.iter().zip([day(2026, 1, 6), day(2026, 1, 5)]) {
        let times = (0..48).map(|hour| at(start, 0) + Duration::hours(hour)).collect();
        write_fixture(
            store
                .path_of(&ForcingFile::Continuous {
                    prefix: group.prefix.clone(),
                })
                .as_std_path(),
            &constant(times, test_grid(group), &["t"], 1.0),
        );
    }
    let inventory = scan(store.forecast_dir().as_std_path(), &groups, &FixtureCodec);
    assert_eq!(inventory.continuous_cycle(), Some(day(2026, 1, 5)));
}

#[test]
fn probe_distinguishes_missing_from_corrupt() {
    let (_temp, store) = store();
    let path = store.forecast_dir().join("SURF_20260101.nc");
    assert_matches!(
        probe_file(&FixtureCodec, path.as_std_path(), Some(day(2026, 1, 1))),
        Presence::Missing
    );
    fs::write(path.as_std_path(), b"").unwrap();
    assert_matches!(
        probe_file(&FixtureCodec, path.as_std_path(), Some(day(2026, 1, 1))),
        Presence::Corrupt(_)
    );
}

#[test]
fn reanalysis_day_short_of_hours_is_present_but_not_full() {
    let (_temp, store) = store();
    let groups = default_groups();
    let (full, partial) = (day(2026, 1, 1), day(2026, 1, 2));
    for group in &groups {
        write(
            &store,
            ForcingFile::Reanalysis {
                prefix: group.prefix.clone(),
                date: full,
            },
            group,
        );
    }
    write(
        &store,
        ForcingFile::Reanalysis {
            prefix: "PLEV".to_string(),
            date: partial,
        },
        &groups[1],
    );
    let times = (0..23).map(|hour| at(partial, hour)).collect();
    write_fixture(
        store
            .path_of(&ForcingFile::Reanalysis {
                prefix: "SURF".to_string(),
                date: partial,
            })
            .as_std_path(),
        &constant(times, test_grid(&groups[0]), &["t2m"], 1.0),
    );

    let inventory = scan(store.forecast_dir().as_std_path(), &groups, &FixtureCodec);
    assert!(inventory.complete_days(SourceKind::Reanalysis).contains(&partial));
    assert_eq!(
        inventory.full_reanalysis_days().into_iter().collect::<Vec<_>>(),
        vec![full]
    );
    assert!(inventory.group("SURF").unwrap().partial_reanalysis.contains(&partial));
}
