use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::{Client, Response};
use reqwest::header::RANGE;
use serde::Deserialize;
use tracing::debug;

use super::{ForecastProvider, ForecastRequest, http_client, send_with_retries};
use crate::error::ForcingError;

const OPEN_DATA_BASE: &str = "https://data.ecmwf.int/forecasts";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexEntry {
    pub param: String,
    #[serde(default)]
    pub levtype: Option<String>,
    #[serde(default)]
    pub levelist: Option<String>,
    #[serde(rename = "_offset")]
    pub offset: u64,
    #[serde(rename = "_length")]
    pub length: u64,
}

#[derive(Clone)]
pub struct EcmwfOpenDataClient {
    client: Client,
    base_url: String,
    resolution: String,
}

impl EcmwfOpenDataClient {
    pub fn new() -> Result<Self, ForcingError> {
        let client = http_client(Duration::from_secs(120))
            .map_err(|err| ForcingError::EcmwfHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: OPEN_DATA_BASE.to_string(),
            resolution: "0p25".to_string(),
        })
    }

    pub fn grib_url(&self, run_date: NaiveDate, cycle_hour: u32, step: u32) -> String {
        let ymd = run_date.format("%Y%m%d");
        format!(
            "{}/{ymd}/{cycle_hour:02}z/ifs/{}/oper/{ymd}{cycle_hour:02}0000-{step}h-oper-fc.grib2",
            self.base_url, self.resolution
        )
    }

    fn handle_status(response: Response) -> Result<Response, ForcingError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "ECMWF request failed".to_string());
        Err(ForcingError::EcmwfStatus { status, message })
    }

    fn fetch_index(&self, grib_url: &str) -> Result<Vec<IndexEntry>, ForcingError> {
        let url = grib_url.replace(".grib2", ".index");
        let response = send_with_retries(|| self.client.get(&url), ForcingError::EcmwfHttp)?;
        let body = Self::handle_status(response)?
            .text()
            .map_err(|err| ForcingError::EcmwfHttp(err.to_string()))?;
        parse_index(&body)
    }

    fn fetch_range(&self, url: &str, entry: &IndexEntry) -> Result<Vec<u8>, ForcingError> {
        let range = format!("bytes={}-{}", entry.offset, entry.offset + entry.length - 1);
        let response = send_with_retries(
            || self.client.get(url).header(RANGE, &range),
            ForcingError::EcmwfHttp,
        )?;
        let bytes = Self::handle_status(response)?
            .bytes()
            .map_err(|err| ForcingError::EcmwfHttp(err.to_string()))?;
        if bytes.len() as u64 != entry.length {
            return Err(ForcingError::MalformedResponse(format!(
                "{} {}: expected {} bytes, got {}",
                url,
                entry.param,
                entry.length,
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }
}

impl ForecastProvider for EcmwfOpenDataClient {
    fn retrieve(&self, request: &ForecastRequest, destination: &Path) -> Result<(), ForcingError> {
        let run_date = request.run_date();
        let mut file =
            File::create(destination).map_err(|err| ForcingError::Filesystem(err.to_string()))?;
        for &step in &request.steps {
            let url = self.grib_url(run_date, request.cycle_hour, step);
            let index = self.fetch_index(&url)?;
            let selected = select_entries(&index, &request.fields, &request.levels)?;
            debug!(%run_date, step, messages = selected.len(), "fetching open data step");
            for entry in selected {
                let bytes = self.fetch_range(&url, entry)?;
                file.write_all(&bytes)
                    .map_err(|err| ForcingError::Filesystem(err.to_string()))?;
            }
        }
        Ok(())
    }
}

pub fn parse_index(body: &str) -> Result<Vec<IndexEntry>, ForcingError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|err| ForcingError::MalformedResponse(format!("index line: {err}")))
        })
        .collect()
}

pub fn select_entries<'a>(
    index: &'a [IndexEntry],
    fields: &[String],
    levels: &[u32],
) -> Result<Vec<&'a IndexEntry>, ForcingError> {
    let mut selected = Vec::new();
    for field in fields {
        if levels.is_empty() {
            let entry = index
                .iter()
                .find(|entry| &entry.param == field && entry.levtype.as_deref() != Some("pl"))
                .ok_or_else(|| ForcingError::MalformedResponse(format!("index lacks {field}")))?;
            selected.push(entry);
            continue;
        }
        for level in levels {
            let wanted = level.to_string();
            let entry = index
                .iter()
                .find(|entry| {
                    &entry.param == field
                        && entry.levtype.as_deref() == Some("pl")
                        && entry.levelist.as_deref() == Some(wanted.as_str())
                })
                .ok_or_else(|| {
                    ForcingError::MalformedResponse(format!("index lacks {field} at {level} hPa"))
                })?;
            selected.push(entry);
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{"domain": "g", "date": "20260210", "time": "0000", "step": "3", "levtype": "sfc", "param": "2t", "_offset": 0, "_length": 100}
{"domain": "g", "date": "20260210", "time": "0000", "step": "3", "levtype": "pl", "levelist": "850", "param": "t", "_offset": 100, "_length": 50}
{"domain": "g", "date": "20260210", "time": "0000", "step": "3", "levtype": "pl", "levelist": "500", "param": "t", "_offset": 150, "_length": 50}
"#;

    #[test]
    fn urls_follow_open_data_layout() {
        let client = EcmwfOpenDataClient::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        assert_eq!(
            client.grib_url(date, 0, 150),
            "https://data.ecmwf.int/forecasts/20260210/00z/ifs/0p25/oper/20260210000000-150h-oper-fc.grib2"
        );
    }

    #[test]
    fn selects_messages_by_field_and_level() {
        let index = parse_index(INDEX).unwrap();
        let surface = select_entries(&index, &["2t".to_string()], &[]).unwrap();
        assert_eq!(surface[0].offset, 0);

        let upper = select_entries(&index, &["t".to_string()], &[500, 850]).unwrap();
        assert_eq!(upper.iter().map(|e| e.offset).collect::<Vec<_>>(), vec![150, 100]);

        let err = select_entries(&index, &["t".to_string()], &[300]).unwrap_err();
        assert!(err.is_transient());
    }
}
