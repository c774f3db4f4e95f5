//! Run time window construction
//!
//! A run is anchored at a single `time_run` timestamp. The observed window
//! covers the steps up to and including `time_run`, the forecast window the
//! steps after it. Both are optional, but at least one must be configured.

use crate::errors::{HydrobufError, Result};
use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeSet;

/// One side of the run window: a number of steps at a fixed frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    /// Number of time steps in this window.
    pub steps: u32,
    /// Spacing between consecutive steps.
    pub frequency: Duration,
}

impl WindowSpec {
    /// Convenience constructor for an hourly window.
    pub fn hourly(steps: u32) -> Self {
        WindowSpec {
            steps,
            frequency: Duration::hours(1),
        }
    }
}

/// Optional backward padding of the observed window.
///
/// A negative `steps` value selects the domain corrivation time
/// (`corrivation_steps`); any non-negative value is used literally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraSpec {
    pub steps: i64,
    pub frequency: Duration,
    /// Catchment corrivation time expressed in steps, used when `steps < 0`.
    pub corrivation_steps: u32,
}

impl ExtraSpec {
    fn resolved_steps(&self) -> u32 {
        if self.steps < 0 {
            self.corrivation_steps
        } else {
            self.steps as u32
        }
    }
}

/// Window settings for one run.
#[derive(Debug, Clone, Default)]
pub struct TimeWindowSpec {
    pub observed: Option<WindowSpec>,
    pub forecast: Option<WindowSpec>,
    pub extra: Option<ExtraSpec>,
}

/// The resolved, immutable time period of one run.
///
/// Timestamps are strictly increasing. `time_run_index` is the position of
/// the first timestamp `>= time_run`, splitting the period into the observed
/// part (`<= time_run`) and the forecast part (`> time_run`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    timestamps: Vec<NaiveDateTime>,
    time_run: NaiveDateTime,
    time_run_index: usize,
}

impl TimeWindow {
    /// Build the time window for a run anchored at `time_run`.
    ///
    /// The observed window ends at `time_run` (its last step is the anchor
    /// itself); the forecast window starts one forecast step after it. Extra
    /// padding, when configured, prepends steps before the observed start.
    ///
    /// # Errors
    ///
    /// Returns [`HydrobufError::Config`] when neither an observed nor a
    /// forecast window is configured.
    pub fn resolve(time_run: NaiveDateTime, spec: &TimeWindowSpec) -> Result<Self> {
        if spec.observed.is_none() && spec.forecast.is_none() {
            return Err(HydrobufError::Config {
                message: "neither observed nor forecast window configured".to_string(),
            });
        }

        let mut times: BTreeSet<NaiveDateTime> = BTreeSet::new();

        if let Some(observed) = &spec.observed {
            for i in 0..observed.steps {
                times.insert(time_run - observed.frequency * i as i32);
            }
        }

        if let Some(forecast) = &spec.forecast {
            for i in 1..=forecast.steps {
                times.insert(time_run + forecast.frequency * i as i32);
            }
        }

        if let Some(extra) = &spec.extra {
            let start = times.iter().next().copied().unwrap_or(time_run);
            for i in 1..=extra.resolved_steps() {
                times.insert(start - extra.frequency * i as i32);
            }
        }

        Ok(Self::from_sorted(times.into_iter().collect(), time_run))
    }

    /// Wrap an already ordered timestamp sequence.
    ///
    /// # Errors
    ///
    /// Returns [`HydrobufError::Config`] if the sequence is empty or not
    /// strictly increasing.
    pub fn from_timestamps(timestamps: Vec<NaiveDateTime>, time_run: NaiveDateTime) -> Result<Self> {
        if timestamps.is_empty() {
            return Err(HydrobufError::Config {
                message: "empty timestamp sequence".to_string(),
            });
        }
        if timestamps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(HydrobufError::Config {
                message: "timestamp sequence is not strictly increasing".to_string(),
            });
        }
        Ok(Self::from_sorted(timestamps, time_run))
    }

    fn from_sorted(timestamps: Vec<NaiveDateTime>, time_run: NaiveDateTime) -> Self {
        let time_run_index = timestamps.partition_point(|t| *t < time_run);
        TimeWindow {
            timestamps,
            time_run,
            time_run_index,
        }
    }

    /// The run anchor timestamp.
    pub fn time_run(&self) -> NaiveDateTime {
        self.time_run
    }

    /// Index of the first timestamp `>= time_run`.
    pub fn time_run_index(&self) -> usize {
        self.time_run_index
    }

    /// All timestamps, oldest first.
    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    /// Timestamps newest first, for backward scans.
    pub fn iter_rev(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        self.timestamps.iter().rev().copied()
    }

    /// The observed part of the period (timestamps `<= time_run`).
    pub fn observed(&self) -> &[NaiveDateTime] {
        let end = self.timestamps.partition_point(|t| *t <= self.time_run);
        &self.timestamps[..end]
    }

    /// The forecast part of the period (timestamps `> time_run`).
    pub fn forecast(&self) -> &[NaiveDateTime] {
        let start = self.timestamps.partition_point(|t| *t <= self.time_run);
        &self.timestamps[start..]
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
