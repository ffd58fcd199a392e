use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use tempfile::{Builder, TempDir, TempPath};
use tracing::{debug, info};

use crate::codec::DatasetCodec;
use crate::dataset::GridDataset;
use crate::domain::ForcingFile;
use crate::error::ForcingError;

#[derive(Debug, Clone)]
pub struct Store {
    climate_dir: Utf8PathBuf,
}

impl Store {
    pub fn new(climate_dir: Utf8PathBuf) -> Self {
        Self { climate_dir }
    }

    pub fn climate_dir(&self) -> &Utf8Path {
        &self.climate_dir
    }

    pub fn forecast_dir(&self) -> Utf8PathBuf {
        self.climate_dir.join("forecast")
    }

    pub fn archive_dir(&self) -> Utf8PathBuf {
        self.forecast_dir().join("archive_forecast")
    }

    pub fn path_of(&self, file: &ForcingFile) -> Utf8PathBuf {
        match file {
            ForcingFile::Merged { .. } => self.climate_dir.join(file.file_name()),
            _ => self.forecast_dir().join(file.file_name()),
        }
    }

    pub fn ensure_layout(&self) -> Result<(), ForcingError> {
        fs::create_dir_all(self.forecast_dir().as_std_path())
            .map_err(|err| ForcingError::Filesystem(err.to_string()))
    }

    pub fn staging_dir(&self) -> Result<TempDir, ForcingError> {
        self.ensure_layout()?;
        Builder::new()
            .prefix(".fetch-")
            .tempdir_in(self.forecast_dir().as_std_path())
            .map_err(|err| ForcingError::Filesystem(err.to_string()))
    }

    /// Writes `dataset` to a hidden temp file next to `destination`.
    /// Nothing becomes visible under the final name until [`StagedWrite::commit`].
    pub fn stage_dataset(
        &self,
        codec: &dyn DatasetCodec,
        dataset: &GridDataset,
        destination: &Utf8Path,
    ) -> Result<StagedWrite, ForcingError> {
        let parent = destination
            .parent()
            .ok_or_else(|| ForcingError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ForcingError::Filesystem(err.to_string()))?;
        let name = destination.file_name().unwrap_or("dataset");
        let temp = Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| ForcingError::Filesystem(err.to_string()))?
            .into_temp_path();
        codec.write(dataset, &temp)?;
        debug!(destination = %destination, "staged dataset");
        Ok(StagedWrite {
            temp,
            destination: destination.to_path_buf(),
        })
    }

    pub fn write_dataset_atomic(
        &self,
        codec: &dyn DatasetCodec,
        dataset: &GridDataset,
        destination: &Utf8Path,
    ) -> Result<Utf8PathBuf, ForcingError> {
        self.stage_dataset(codec, dataset, destination)?.commit()
    }

    pub fn retire_gap_fill(
        &self,
        prefix: &str,
        date: NaiveDate,
        archive: bool,
    ) -> Result<Option<Utf8PathBuf>, ForcingError> {
        let file = ForcingFile::GapFill {
            prefix: prefix.to_string(),
            date,
        };
        let source = self.path_of(&file);
        if !source.as_std_path().exists() {
            return Ok(None);
        }
        if !archive {
            fs::remove_file(source.as_std_path())
                .map_err(|err| ForcingError::Filesystem(err.to_string()))?;
            info!(file = %source, "deleted superseded forecast");
            return Ok(None);
        }
        let archive_dir = self.archive_dir();
        fs::create_dir_all(archive_dir.as_std_path())
            .map_err(|err| ForcingError::Filesystem(err.to_string()))?;
        let target = archive_dir.join(file.file_name());
        fs::rename(source.as_std_path(), target.as_std_path())
            .map_err(|err| ForcingError::Filesystem(err.to_string()))?;
        info!(file = %target, "archived superseded forecast");
        Ok(Some(target))
    }
}

pub struct StagedWrite {
    temp: TempPath,
    destination: Utf8PathBuf,
}

impl StagedWrite {
    pub fn destination(&self) -> &Utf8Path {
        &self.destination
    }

    pub fn commit(self) -> Result<Utf8PathBuf, ForcingError> {
        self.temp
            .persist(self.destination.as_std_path())
            .map_err(|err| ForcingError::Filesystem(err.to_string()))?;
        Ok(self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new(Utf8PathBuf::from("/sim/inputs/climate"));
        let date = NaiveDate::from_ymd_opt(2026, 2, 3).unwrap();
        let daily = store.path_of(&ForcingFile::Reanalysis {
            prefix: "SURF".to_string(),
            date,
        });
        assert_eq!(daily, "/sim/inputs/climate/forecast/SURF_20260203.nc");
        let merged = store.path_of(&ForcingFile::Merged {
            prefix: "PLEV".to_string(),
        });
        assert_eq!(merged, "/sim/inputs/climate/PLEV_final_merged_output.nc");
        assert!(store.archive_dir().ends_with("forecast/archive_forecast"));
    }
}
