use std::path::PathBuf;

use chrono::NaiveDate;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ForcingError {
    #[error("transient fetch failure: {0}")]
    #[diagnostic(help("the obligation stays missing and is picked up by the next run"))]
    TransientFetch(String),

    #[error("no reanalysis files found for variable group {group}")]
    MissingPrimarySource { group: String },

    #[error("grid mismatch for {path}: {reason}")]
    SpatialGridMismatch { path: PathBuf, reason: String },

    #[error("corrupt local file {path}: {reason}")]
    #[diagnostic(help("the file was left in place for inspection; it is re-fetched on the next run"))]
    CorruptLocalFile { path: PathBuf, reason: String },

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing CDS credentials: {0}")]
    MissingCredentials(String),

    #[error("CDS request failed: {0}")]
    CdsHttp(String),

    #[error("CDS returned status {status}: {message}")]
    CdsStatus { status: u16, message: String },

    #[error("CDS job {job} ended with status {status}")]
    CdsJob { job: String, status: String },

    #[error("ECMWF open data request failed: {0}")]
    EcmwfHttp(String),

    #[error("ECMWF open data returned status {status}: {message}")]
    EcmwfStatus { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("GRIB conversion failed: {0}")]
    Conversion(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("unsupported data format: {0}")]
    UnsupportedFormat(String),

    #[error("no {kind} data for {date}")]
    NoData { kind: String, date: NaiveDate },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl ForcingError {
    pub fn is_transient(&self) -> bool {
        match self {
            ForcingError::TransientFetch(_)
            | ForcingError::CdsHttp(_)
            | ForcingError::EcmwfHttp(_)
            | ForcingError::MalformedResponse(_) => true,
            ForcingError::CdsStatus { status, .. } | ForcingError::EcmwfStatus { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}
