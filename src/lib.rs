pub mod app;
pub mod assembler;
pub mod auditor;
pub mod cdo;
pub mod codec;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod fs_util;
pub mod inventory;
#[cfg(feature = "netcdf")]
pub mod netcdf_io;
pub mod output;
pub mod providers;
pub mod regrid;
pub mod resolver;
pub mod store;
pub mod transform;
