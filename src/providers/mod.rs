pub mod cds;
pub mod ecmwf;

use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::{Client, RequestBuilder, Response};

use crate::domain::{BoundingBox, GroupSpec};
use crate::error::ForcingError;

pub use cds::{CdsClient, CdsCredentials};
pub use ecmwf::EcmwfOpenDataClient;

pub trait ReanalysisProvider: Send + Sync {
    fn latest_available(&self) -> Result<NaiveDate, ForcingError>;

    fn retrieve_day(
        &self,
        group: &GroupSpec,
        day: NaiveDate,
        bbox: &BoundingBox,
        destination: &Path,
    ) -> Result<(), ForcingError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastRequest {
    pub reference_date: NaiveDate,
    /// Days relative to `reference_date`; zero or negative.
    pub date_offset: i64,
    pub cycle_hour: u32,
    pub fields: Vec<String>,
    pub levels: Vec<u32>,
    pub steps: Vec<u32>,
}

impl ForecastRequest {
    pub fn run_date(&self) -> NaiveDate {
        self.reference_date + chrono::Duration::days(self.date_offset)
    }
}

pub trait ForecastProvider: Send + Sync {
    fn retrieve(&self, request: &ForecastRequest, destination: &Path) -> Result<(), ForcingError>;
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(format!("snowmapper-forcing/{}", env!("CARGO_PKG_VERSION")))
        .build()
}

pub(crate) fn send_with_retries<F>(
    mut make_req: F,
    on_error: fn(String) -> ForcingError,
) -> Result<Response, ForcingError>
where
    F: FnMut() -> RequestBuilder,
{
    const MAX_RETRIES: usize = 3;
    const BASE_DELAY_MS: u64 = 500;
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                    thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                    thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                    continue;
                }
                return Err(on_error(err.to_string()));
            }
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
