//! hydrobuf: incremental acquisition and chunked buffering of
//! hydro-meteorological data
//!
//! hydrobuf ingests observation and forecast files on a rolling run
//! schedule, discovers which time steps actually have data on disk, and
//! incrementally assembles per-variable time series and gridded rasters
//! into reusable chunked NetCDF buffer files so repeated runs never re-read
//! the full historical window.
//!
//! ## Key Features
//!
//! - **Run windows**: observed + forecast timestamp sequences anchored at a
//!   run time, with corrivation padding
//! - **Dataset discovery**: backward scans over templated paths find the
//!   most recent timestamp with data on disk, cached per run
//! - **Chunked buffering**: bounded-size NetCDF chunk files, one group per
//!   variable, merged incrementally instead of overwritten
//! - **Ensemble fan-out**: probabilistic variables expand into one outcome
//!   per member label
//! - **Transparent gzip**: compressed sources are staged to temp files
//!   before reading
//!
//! ## Module Organization
//!
//! - [`time_window`]: run window construction and the observed/forecast split
//! - [`template`]: typed `$token` path template expansion
//! - [`descriptor`]: static per-variable configuration
//! - [`chunks`]: positional chunk allocation
//! - [`dataset_time`]: reference-time discovery and the run-scoped map
//! - [`readers`]: point-series and gridded source readers
//! - [`container`]: in-memory containers and merge rules
//! - [`acquirer`]: per-variable acquisition orchestration
//! - [`buffer_store`]: chunked NetCDF buffer persistence
//! - [`errors`]: centralized error handling
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use chrono::{Duration, NaiveDate};
//! use hydrobuf::prelude::*;
//!
//! let time_run = NaiveDate::from_ymd_opt(2021, 4, 8)
//!     .unwrap()
//!     .and_hms_opt(0, 0, 0)
//!     .unwrap();
//!
//! let spec = TimeWindowSpec {
//!     observed: Some(WindowSpec::hourly(72)),
//!     forecast: Some(WindowSpec::hourly(48)),
//!     extra: None,
//! };
//! let window = TimeWindow::resolve(time_run, &spec).unwrap();
//!
//! let rain = VariableDescriptor::new(
//!     "rain_obs",
//!     Dimensionality::Grid2d,
//!     DataKind::Observed,
//!     "/data/obs/$yyyy/$mm/$dd/rain_$yyyy$mm$dd$HH$MM.nc.gz",
//! );
//!
//! let store = BufferStore::new("/data/buffer");
//! let finder = DatasetTimeFinder::new(24, Duration::minutes(20));
//! let acquirer = VariableAcquirer::new(&store, finder, 24);
//!
//! let mut map = DatasetTimeMap::new();
//! acquirer.acquire(&rain, &window, &mut map).unwrap();
//! ```

// Core modules
pub mod acquirer;
pub mod buffer_store;
pub mod chunks;
pub mod container;
pub mod dataset_time;
pub mod descriptor;
pub mod errors;
pub mod readers;
pub mod template;
pub mod time_window;

// Direct re-exports for the public API
pub use acquirer::*;
pub use buffer_store::*;
pub use chunks::*;
pub use container::*;
pub use dataset_time::*;
pub use descriptor::*;
pub use errors::*;
pub use time_window::*;

// High-level convenience API
pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::acquirer::VariableAcquirer;
    pub use crate::buffer_store::BufferStore;
    pub use crate::chunks::{chunk_label, ChunkPlan};
    pub use crate::container::{Container, GridContainer, SeriesContainer, VarAttributes};
    pub use crate::dataset_time::{DatasetTimeFinder, DatasetTimeMap};
    pub use crate::descriptor::{
        DataKind, Dimensionality, EnsembleSpec, ExperimentKind, VariableDescriptor,
    };
    pub use crate::errors::{HydrobufError, Result};
    pub use crate::time_window::{TimeWindow, TimeWindowSpec, WindowSpec};
}
