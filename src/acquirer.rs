//! Per-variable acquisition orchestration
//!
//! Walks the run window timestamp by timestamp, resolves concrete source
//! paths (observed and outcome variables are keyed by the iterated
//! timestamp, forecast variables by the discovered reference timestamp),
//! reads through the dimensionality-selected reader, and flushes to the
//! buffer store at every chunk boundary. Probabilistic variables fan out
//! into one independently named outcome per ensemble member; all members of
//! a timestamp are acquired before the next timestamp.

use crate::buffer_store::BufferStore;
use crate::chunks::ChunkPlan;
use crate::container::{Container, GridContainer, GridCoords, SeriesContainer, VarAttributes};
use crate::dataset_time::{DatasetTimeFinder, DatasetTimeMap};
use crate::descriptor::{DataKind, VariableDescriptor};
use crate::errors::Result;
use crate::readers::{stage, SourceReader, StagedFile};
use crate::template::{expand, TemplateValues};
use crate::time_window::TimeWindow;
use chrono::NaiveDateTime;
use ndarray::{ArrayD, Axis, IxDyn};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Orchestrates acquisition for a set of variables against one buffer store.
#[derive(Debug)]
pub struct VariableAcquirer<'a> {
    store: &'a BufferStore,
    finder: DatasetTimeFinder,
    chunk_max_step: usize,
}

/// Per-member accumulation state for the current chunk.
enum MemberAccumulator {
    Series {
        /// Slots pushed so far; a column first seen mid-chunk is NaN-padded
        /// back to this length.
        len: usize,
        columns: BTreeMap<String, Vec<f64>>,
    },
    Grid {
        frames: Vec<Option<ArrayD<f32>>>,
        coords: GridCoords,
        attrs: VarAttributes,
    },
}

impl MemberAccumulator {
    fn new(reader: SourceReader) -> Self {
        match reader {
            SourceReader::Point => MemberAccumulator::Series {
                len: 0,
                columns: BTreeMap::new(),
            },
            SourceReader::Grid2d | SourceReader::Grid3d => MemberAccumulator::Grid {
                frames: Vec::new(),
                coords: GridCoords::default(),
                attrs: VarAttributes::default(),
            },
        }
    }

    fn push_missing(&mut self) {
        match self {
            MemberAccumulator::Series { len, columns } => {
                for values in columns.values_mut() {
                    values.push(f64::NAN);
                }
                *len += 1;
            }
            MemberAccumulator::Grid { frames, .. } => frames.push(None),
        }
    }

    fn push_from(&mut self, container: &Container, time: NaiveDateTime) {
        match (self, container) {
            (MemberAccumulator::Series { len, columns }, Container::Series(series)) => {
                let idx = series.times().binary_search(&time).ok();
                for (name, col) in series.columns() {
                    let value = idx.map(|i| col[i]).unwrap_or(f64::NAN);
                    columns
                        .entry(name.clone())
                        .or_insert_with(|| vec![f64::NAN; *len])
                        .push(value);
                }
                for (name, values) in columns.iter_mut() {
                    if !series.columns().contains_key(name) {
                        values.push(f64::NAN);
                    }
                }
                *len += 1;
            }
            (
                MemberAccumulator::Grid {
                    frames,
                    coords,
                    attrs,
                },
                Container::Grid(grid),
            ) => {
                if coords == &GridCoords::default() {
                    *coords = grid.coords.clone();
                }
                if attrs == &VarAttributes::default() {
                    *attrs = grid.attrs.clone();
                }
                frames.push(grid.frame_at(time).map(|f| f.to_owned()));
            }
            // Reader and accumulator are derived from the same
            // dimensionality, so the variants always line up.
            _ => unreachable!("container kind does not match accumulator"),
        }
    }

    /// Build the chunk container, or `None` when nothing usable was read.
    fn finish(self, times: &[NaiveDateTime]) -> Result<Option<Container>> {
        match self {
            MemberAccumulator::Series { columns, .. } => {
                if columns.values().flatten().all(|v| v.is_nan()) {
                    return Ok(None);
                }
                let series = SeriesContainer::new(times.to_vec(), columns, VarAttributes::default())?;
                Ok(Some(Container::Series(series)))
            }
            MemberAccumulator::Grid {
                frames,
                coords,
                attrs,
            } => {
                let Some(frame_shape) =
                    frames.iter().flatten().next().map(|f| f.shape().to_vec())
                else {
                    return Ok(None);
                };

                let mut shape = Vec::with_capacity(frame_shape.len() + 1);
                shape.push(times.len());
                shape.extend_from_slice(&frame_shape);
                let mut data = ArrayD::from_elem(IxDyn(&shape), f32::NAN);
                for (i, frame) in frames.iter().enumerate() {
                    if let Some(frame) = frame {
                        data.index_axis_mut(Axis(0), i).assign(frame);
                    }
                }

                let grid = GridContainer::new(times.to_vec(), data, coords, attrs)?;
                Ok(Some(Container::Grid(grid)))
            }
        }
    }
}

impl<'a> VariableAcquirer<'a> {
    pub fn new(store: &'a BufferStore, finder: DatasetTimeFinder, chunk_max_step: usize) -> Self {
        VariableAcquirer {
            store,
            finder,
            chunk_max_step,
        }
    }

    /// Acquire every descriptor in order.
    ///
    /// Configuration errors abort immediately; availability problems are
    /// logged and the affected variable is left unavailable for the run.
    pub fn acquire_all(
        &self,
        descriptors: &[VariableDescriptor],
        window: &TimeWindow,
        map: &mut DatasetTimeMap,
    ) -> Result<()> {
        for descriptor in descriptors {
            self.acquire(descriptor, window, map)?;
        }
        Ok(())
    }

    /// Acquire one variable across the whole run window.
    pub fn acquire(
        &self,
        descriptor: &VariableDescriptor,
        window: &TimeWindow,
        map: &mut DatasetTimeMap,
    ) -> Result<()> {
        descriptor.validate()?;

        let reference_time = self.finder.find(map, descriptor, window.time_run())?;
        if descriptor.data_kind == DataKind::Forecast && reference_time.is_none() {
            warn!(
                variable = %descriptor.name,
                "no forecast issue found on disk, skipping acquisition"
            );
            return Ok(());
        }

        let reader = SourceReader::from(descriptor.dimensionality);
        let members = descriptor.members();
        let plan = ChunkPlan::new(window.len(), self.chunk_max_step)?;

        // Forecast sources are one file per issue: read each member's file
        // once and align its own time axis onto the window.
        let forecast_sources: Vec<Option<Container>> =
            if descriptor.data_kind == DataKind::Forecast {
                let reference = reference_time.unwrap_or(window.time_run());
                members
                    .iter()
                    .map(|member| {
                        self.read_forecast_source(descriptor, reader, member.as_deref(), reference, window)
                    })
                    .collect::<Result<Vec<_>>>()?
            } else {
                Vec::new()
            };

        for (chunk_id, range) in plan.ranges() {
            let chunk_times = &window.timestamps()[range];
            let mut staged_files: Vec<StagedFile> = Vec::new();
            let mut accumulators: Vec<MemberAccumulator> =
                members.iter().map(|_| MemberAccumulator::new(reader)).collect();

            for &time in chunk_times {
                for (member_idx, member) in members.iter().enumerate() {
                    let acc = &mut accumulators[member_idx];
                    match descriptor.data_kind {
                        DataKind::Observed | DataKind::Outcome => {
                            self.acquire_slot(
                                descriptor,
                                reader,
                                member.as_deref(),
                                time,
                                acc,
                                &mut staged_files,
                            )?;
                        }
                        DataKind::Forecast => match &forecast_sources[member_idx] {
                            Some(source) => acc.push_from(source, time),
                            None => acc.push_missing(),
                        },
                    }
                }
            }

            for (member_idx, member) in members.iter().enumerate() {
                let outcome = descriptor.outcome_name(member.as_deref());
                let acc = std::mem::replace(
                    &mut accumulators[member_idx],
                    MemberAccumulator::new(reader),
                );
                match acc.finish(chunk_times)? {
                    Some(container) => {
                        self.store.write(&outcome, chunk_id, chunk_times, &container)?;
                    }
                    None => {
                        warn!(
                            variable = %outcome,
                            chunk_id,
                            "no data acquired for chunk, skipping buffer write"
                        );
                    }
                }
            }

            // Staged decompressed copies are only needed while the chunk is
            // being read; dropping the guards removes them.
            staged_files.clear();
            debug!(variable = %descriptor.name, chunk_id, "chunk flushed");
        }

        Ok(())
    }

    /// Acquire a single (timestamp, member) slot of a timestamp-keyed
    /// variable.
    fn acquire_slot(
        &self,
        descriptor: &VariableDescriptor,
        reader: SourceReader,
        member: Option<&str>,
        time: NaiveDateTime,
        acc: &mut MemberAccumulator,
        staged_files: &mut Vec<StagedFile>,
    ) -> Result<()> {
        let values = TemplateValues::at(time).with_ensemble(member);
        let path = PathBuf::from(expand(&descriptor.source_template, &values)?);

        let Some(staged) = stage(&path)? else {
            debug!(
                variable = %descriptor.name,
                time = %time,
                path = %path.display(),
                "source file absent, slot recorded as missing"
            );
            acc.push_missing();
            return Ok(());
        };

        let outcome = descriptor.outcome_name(member);
        match reader.read(&staged, &descriptor.source_name, &outcome, &[time])? {
            Some(container) => acc.push_from(&container, time),
            None => {
                warn!(
                    variable = %descriptor.name,
                    time = %time,
                    path = %path.display(),
                    "reader returned no data for slot"
                );
                acc.push_missing();
            }
        }
        staged_files.push(staged);
        Ok(())
    }

    /// Read one member's forecast source file, keyed by the reference
    /// timestamp rather than the iterated one.
    fn read_forecast_source(
        &self,
        descriptor: &VariableDescriptor,
        reader: SourceReader,
        member: Option<&str>,
        reference: NaiveDateTime,
        window: &TimeWindow,
    ) -> Result<Option<Container>> {
        let values = TemplateValues::at(reference).with_ensemble(member);
        let path = PathBuf::from(expand(&descriptor.source_template, &values)?);

        let Some(staged) = stage(&path)? else {
            warn!(
                variable = %descriptor.name,
                member = member.unwrap_or("-"),
                path = %path.display(),
                "forecast member has no data"
            );
            return Ok(None);
        };

        let outcome = descriptor.outcome_name(member);
        // Point forecast files have no time axis; their lines map onto the
        // window's forecast steps in order.
        let container = reader.read(&staged, &descriptor.source_name, &outcome, window.forecast())?;
        if container.is_none() {
            warn!(
                variable = %descriptor.name,
                member = member.unwrap_or("-"),
                path = %path.display(),
                "forecast source unreadable"
            );
        }
        Ok(container)
    }
}
