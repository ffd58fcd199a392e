use std::fs;

use snowmapper_forcing::config::{CONFIG_FILE, Config, ConfigLoader};
use snowmapper_forcing::error::ForcingError;

#[test]
fn config_is_found_in_an_ancestor_directory() {
    let temp = tempfile::tempdir().unwrap();
    let sim = temp.path().join("sim");
    let domain = sim.join("domains").join("naryn");
    fs::create_dir_all(&domain).unwrap();
    fs::write(
        sim.join(CONFIG_FILE),
        "paths:\n  climate_dir: data/climate\nforcing:\n  retention_days: 5\n  archive_superseded: false\n  pressure_levels: [850, 500]\n",
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(&domain).unwrap();
    assert_eq!(resolved.sim_dir, sim);
    assert_eq!(resolved.climate_dir.as_std_path(), sim.join("data/climate"));
    assert_eq!(resolved.retention_days, 5);
    assert!(!resolved.fetch.archive_superseded);
    assert_eq!(resolved.fetch.cycle_hour, 0);
    assert_eq!(resolved.groups[1].levels, vec![850, 500]);
}

#[test]
fn missing_config_falls_back_to_defaults() {
    let temp = tempfile::tempdir().unwrap();
    let resolved = ConfigLoader::resolve(temp.path()).unwrap();
    assert!(resolved.config_file.is_none());
    assert_eq!(
        resolved.climate_dir.as_std_path(),
        temp.path().join("inputs/climate")
    );
}

#[test]
fn invalid_values_are_rejected() {
    let config: Config = serde_yaml::from_str(
        "forcing:\n  bbox: {lat_min: 45.0, lat_max: 32.0, lon_min: 59.0, lon_max: 81.0}\n",
    )
    .unwrap();
    let err = ConfigLoader::resolve_config(config, std::path::Path::new("/sim"), None).unwrap_err();
    assert!(matches!(err, ForcingError::InvalidConfig(_)));

    let config: Config = serde_yaml::from_str("forcing:\n  max_attempts: 0\n").unwrap();
    assert!(ConfigLoader::resolve_config(config, std::path::Path::new("/sim"), None).is_err());
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join(CONFIG_FILE), "forcing: [unclosed").unwrap();
    let err = ConfigLoader::resolve(temp.path()).unwrap_err();
    assert!(matches!(err, ForcingError::ConfigParse(_)));
}
