use std::fs::{self, File};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime};
use directories::BaseDirs;
use reqwest::blocking::Response;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{ReanalysisProvider, http_client, send_with_retries};
use crate::domain::{BoundingBox, GroupSpec};
use crate::error::ForcingError;

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CdsCredentials {
    pub url: String,
    pub key: String,
}

impl CdsCredentials {
    pub fn discover() -> Result<Self, ForcingError> {
        if let (Ok(url), Ok(key)) = (std::env::var("CDSAPI_URL"), std::env::var("CDSAPI_KEY")) {
            return Ok(Self { url, key });
        }
        let rc = BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".cdsapirc"))
            .ok_or_else(|| {
                ForcingError::MissingCredentials("unable to resolve home directory".to_string())
            })?;
        let content = fs::read_to_string(&rc).map_err(|_| {
            ForcingError::MissingCredentials(format!(
                "set CDSAPI_URL and CDSAPI_KEY or create {}",
                rc.display()
            ))
        })?;
        Self::parse_rc(&content)
    }

    pub fn parse_rc(content: &str) -> Result<Self, ForcingError> {
        let credentials: CdsCredentials = serde_yaml::from_str(content)
            .map_err(|err| ForcingError::MissingCredentials(format!(".cdsapirc: {err}")))?;
        if credentials.key.trim().is_empty() {
            return Err(ForcingError::MissingCredentials(".cdsapirc has an empty key".to_string()));
        }
        Ok(credentials)
    }
}

#[derive(Clone)]
pub struct CdsClient {
    client: reqwest::blocking::Client,
    base_url: String,
    key: String,
    poll_interval: Duration,
    max_wait: Duration,
}

impl CdsClient {
    pub fn new(credentials: CdsCredentials) -> Result<Self, ForcingError> {
        let client = http_client(Duration::from_secs(120))
            .map_err(|err| ForcingError::CdsHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: credentials.url.trim_end_matches('/').to_string(),
            key: credentials.key,
            poll_interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(3 * 3600),
        })
    }

    pub fn with_polling(mut self, interval: Duration, max_wait: Duration) -> Self {
        self.poll_interval = interval;
        self.max_wait = max_wait;
        self
    }

    fn handle_status(response: Response) -> Result<Response, ForcingError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "CDS request failed".to_string());
        Err(ForcingError::CdsStatus { status, message })
    }

    fn get_json(&self, url: &str) -> Result<Value, ForcingError> {
        let response = send_with_retries(
            || self.client.get(url).header(TOKEN_HEADER, &self.key),
            ForcingError::CdsHttp,
        )?;
        Self::handle_status(response)?
            .json()
            .map_err(|err| ForcingError::MalformedResponse(err.to_string()))
    }

    fn submit(&self, dataset: &str, inputs: &Value) -> Result<String, ForcingError> {
        let url = format!("{}/retrieve/v1/processes/{dataset}/execution", self.base_url);
        let body = json!({ "inputs": inputs });
        let response = send_with_retries(
            || {
                self.client
                    .post(&url)
                    .header(TOKEN_HEADER, &self.key)
                    .json(&body)
            },
            ForcingError::CdsHttp,
        )?;
        let value: Value = Self::handle_status(response)?
            .json()
            .map_err(|err| ForcingError::MalformedResponse(err.to_string()))?;
        value
            .get("jobID")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ForcingError::MalformedResponse("job submission without jobID".to_string()))
    }

    fn wait_for(&self, job: &str) -> Result<(), ForcingError> {
        let url = format!("{}/retrieve/v1/jobs/{job}", self.base_url);
        let started = Instant::now();
        loop {
            let value = self.get_json(&url)?;
            let status = value.get("status").and_then(Value::as_str).unwrap_or("unknown");
            match status {
                "successful" => return Ok(()),
                "failed" | "rejected" | "dismissed" | "deleted" => {
                    return Err(ForcingError::CdsJob {
                        job: job.to_string(),
                        status: status.to_string(),
                    });
                }
                _ => {}
            }
            if started.elapsed() > self.max_wait {
                return Err(ForcingError::TransientFetch(format!(
                    "CDS job {job} still {status} after {}s",
                    self.max_wait.as_secs()
                )));
            }
            debug!(job, status, "waiting for CDS job");
            thread::sleep(self.poll_interval);
        }
    }

    fn download(&self, job: &str, destination: &Path) -> Result<(), ForcingError> {
        let url = format!("{}/retrieve/v1/jobs/{job}/results", self.base_url);
        let results = self.get_json(&url)?;
        let href = asset_href(&results)?;
        let response = send_with_retries(|| self.client.get(&href), ForcingError::CdsHttp)?;
        let mut response = Self::handle_status(response)?;
        let mut file =
            File::create(destination).map_err(|err| ForcingError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| ForcingError::CdsHttp(err.to_string()))?;
        Ok(())
    }
}

impl ReanalysisProvider for CdsClient {
    fn latest_available(&self) -> Result<NaiveDate, ForcingError> {
        let url = format!(
            "{}/catalogue/v1/collections/reanalysis-era5-single-levels",
            self.base_url
        );
        temporal_end(&self.get_json(&url)?)
    }

    fn retrieve_day(
        &self,
        group: &GroupSpec,
        day: NaiveDate,
        bbox: &BoundingBox,
        destination: &Path,
    ) -> Result<(), ForcingError> {
        let inputs = request_inputs(group, day, bbox);
        let job = self.submit(&group.era5_dataset, &inputs)?;
        info!(group = %group.prefix, %day, job = %job, "submitted CDS request");
        self.wait_for(&job)?;
        self.download(&job, destination)
    }
}

pub fn request_inputs(group: &GroupSpec, day: NaiveDate, bbox: &BoundingBox) -> Value {
    let hours: Vec<String> = (0..24).map(|hour| format!("{hour:02}:00")).collect();
    let mut inputs = json!({
        "product_type": ["reanalysis"],
        "variable": group.era5_variables,
        "year": [day.format("%Y").to_string()],
        "month": [day.format("%m").to_string()],
        "day": [day.format("%d").to_string()],
        "time": hours,
        "area": bbox.cds_area(),
        "data_format": "netcdf",
        "download_format": "unarchived",
    });
    if group.is_pressure_levels() {
        let levels: Vec<String> = group.levels.iter().map(u32::to_string).collect();
        inputs["pressure_level"] = json!(levels);
    }
    inputs
}

fn asset_href(results: &Value) -> Result<String, ForcingError> {
    results
        .pointer("/asset/value/href")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ForcingError::MalformedResponse("job results without asset href".to_string()))
}

fn temporal_end(collection: &Value) -> Result<NaiveDate, ForcingError> {
    let end = collection
        .pointer("/extent/temporal/interval/0/1")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ForcingError::MalformedResponse("collection without temporal extent".to_string())
        })?;
    let trimmed = end.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .map(|time| time.date())
        .or_else(|_| NaiveDate::parse_from_str(&trimmed[..trimmed.len().min(10)], "%Y-%m-%d"))
        .map_err(|_| ForcingError::MalformedResponse(format!("temporal extent end `{end}`")))
}
