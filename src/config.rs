use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{BoundingBox, GroupSpec, default_pressure_levels};
use crate::error::ForcingError;
use crate::fetcher::FetchSettings;

pub const CONFIG_FILE: &str = "snowmapper.yml";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub forcing: ForcingSection,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsSection {
    pub climate_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            climate_dir: PathBuf::from("inputs/climate"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ForcingSection {
    pub bbox: BoundingBox,
    pub forecast_cycle_hour: u32,
    pub retention_days: u32,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub archive_superseded: bool,
    pub pressure_levels: Vec<u32>,
}

impl Default for ForcingSection {
    fn default() -> Self {
        Self {
            bbox: BoundingBox::default(),
            forecast_cycle_hour: 0,
            retention_days: 3,
            max_attempts: 3,
            retry_delay_secs: 30,
            archive_superseded: true,
            pressure_levels: default_pressure_levels(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub sim_dir: PathBuf,
    pub config_file: Option<PathBuf>,
    pub climate_dir: Utf8PathBuf,
    pub retention_days: u32,
    pub fetch: FetchSettings,
    pub groups: Vec<GroupSpec>,
}

impl ResolvedConfig {
    pub fn gap_fill_retention(&self) -> u32 {
        if self.fetch.cycle_hour == 0 {
            self.retention_days
        } else {
            self.retention_days.saturating_sub(1)
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(dir: &Path) -> Result<ResolvedConfig, ForcingError> {
        let Some(config_path) = find_config(dir) else {
            return Self::resolve_config(Config::default(), dir, None);
        };
        let content = fs::read_to_string(&config_path)
            .map_err(|_| ForcingError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|err| ForcingError::ConfigParse(err.to_string()))?;
        let sim_dir = config_path.parent().unwrap_or(dir).to_path_buf();
        Self::resolve_config(config, &sim_dir, Some(config_path))
    }

    pub fn resolve_config(
        config: Config,
        sim_dir: &Path,
        config_file: Option<PathBuf>,
    ) -> Result<ResolvedConfig, ForcingError> {
        let forcing = config.forcing;
        if !matches!(forcing.forecast_cycle_hour, 0 | 12) {
            return Err(ForcingError::InvalidConfig(format!(
                "forecast_cycle_hour must be 0 or 12, got {}",
                forcing.forecast_cycle_hour
            )));
        }
        if forcing.max_attempts == 0 {
            return Err(ForcingError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        let bbox = forcing.bbox;
        if !(bbox.lat_min < bbox.lat_max && bbox.lon_min < bbox.lon_max) {
            return Err(ForcingError::InvalidConfig(format!(
                "empty bounding box {}..{} / {}..{}",
                bbox.lat_min, bbox.lat_max, bbox.lon_min, bbox.lon_max
            )));
        }
        if !(-90.0..=90.0).contains(&bbox.lat_min) || !(-90.0..=90.0).contains(&bbox.lat_max) {
            return Err(ForcingError::InvalidConfig(
                "bounding box latitudes must lie within -90..90".to_string(),
            ));
        }
        if forcing.pressure_levels.is_empty() {
            return Err(ForcingError::InvalidConfig(
                "pressure_levels must not be empty".to_string(),
            ));
        }

        let climate_dir = sim_dir.join(&config.paths.climate_dir);
        let climate_dir = Utf8PathBuf::from_path_buf(climate_dir).map_err(|path| {
            ForcingError::InvalidConfig(format!("non UTF-8 climate dir {}", path.display()))
        })?;

        Ok(ResolvedConfig {
            sim_dir: sim_dir.to_path_buf(),
            config_file,
            climate_dir,
            retention_days: forcing.retention_days,
            fetch: FetchSettings {
                bbox,
                cycle_hour: forcing.forecast_cycle_hour,
                max_attempts: forcing.max_attempts,
                retry_delay: Duration::from_secs(forcing.retry_delay_secs),
                archive_superseded: forcing.archive_superseded,
            },
            groups: vec![
                GroupSpec::surface(),
                GroupSpec::pressure_levels(forcing.pressure_levels),
            ],
        })
    }
}

fn find_config(dir: &Path) -> Option<PathBuf> {
    dir.ancestors()
        .map(|ancestor| ancestor.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_relative_to_sim_dir() {
        let resolved =
            ConfigLoader::resolve_config(Config::default(), Path::new("/sim/alps"), None).unwrap();
        assert_eq!(resolved.climate_dir, "/sim/alps/inputs/climate");
        assert_eq!(resolved.retention_days, 3);
        assert_eq!(resolved.fetch.max_attempts, 3);
        assert_eq!(resolved.groups.len(), 2);
        assert_eq!(resolved.groups[1].levels, default_pressure_levels());
    }

    #[test]
    fn later_cycle_shortens_gap_fill_retention() {
        let config: Config = serde_yaml::from_str("forcing:\n  forecast_cycle_hour: 12\n").unwrap();
        let resolved = ConfigLoader::resolve_config(config, Path::new("/sim"), None).unwrap();
        assert_eq!(resolved.fetch.cycle_hour, 12);
        assert_eq!(resolved.gap_fill_retention(), 2);

        let resolved =
            ConfigLoader::resolve_config(Config::default(), Path::new("/sim"), None).unwrap();
        assert_eq!(resolved.gap_fill_retention(), 3);
    }

    #[test]
    fn rejects_unsupported_cycle() {
        let config: Config = serde_yaml::from_str("forcing:\n  forecast_cycle_hour: 6\n").unwrap();
        let err = ConfigLoader::resolve_config(config, Path::new("/sim"), None).unwrap_err();
        assert!(matches!(err, ForcingError::InvalidConfig(_)));
    }
}
