//! Fetch planning, concurrent retrieval and per-event merging of NARR
//! pressure-level reanalysis subsets for wildfire events.

pub mod app;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod coords;
pub mod dataset;
pub mod dedupe;
pub mod domain;
pub mod error;
pub mod executor;
pub mod merge;
#[cfg(feature = "netcdf")]
pub mod netcdf_io;
pub mod output;
pub mod planner;
pub mod request;
pub mod retry;
pub mod store;
pub mod transport;
