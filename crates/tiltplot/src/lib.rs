//! `tiltplot` - Owner-scoped sensor time series
//!
//! Devices append raw measurements under their user's device key. Users group
//! measurement channels into plots, each with a time window, and read a plot's
//! series at raw, minute, hour, or day resolution. Plots can be shared
//! read-only through a share link.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod service;
pub mod storage;

pub use auth::{Access, Credentials, Identity, IdentityResolver, KeyDirectory, TokenVerifier};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use logging::init_logging;
pub use model::{Measurement, NewInstrument, NewPlot, Plot, PlotUpdate, TimeWindow};
pub use query::{QueryEngine, QueryTimings, Resolution, Series, SeriesPoint};
pub use service::Service;
pub use storage::{Storage, StorageStats};
