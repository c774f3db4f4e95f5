//! In-memory data containers and merge rules
//!
//! A container holds one variable's data across a set of timestamps: a
//! time-indexed column table for point series, or a time-stacked raster for
//! gridded data. Both carry the attribute metadata needed to round-trip
//! through buffer files. The merge functions are pure so the precedence
//! rules can be tested without any file I/O.

use crate::errors::{HydrobufError, Result};
use chrono::NaiveDateTime;
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Zip};
use std::collections::{BTreeMap, HashMap};

/// Attribute metadata carried alongside the data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarAttributes {
    pub units: Option<String>,
    pub scale_factor: Option<f32>,
    pub fill_value: Option<f32>,
    pub valid_range: Option<(f32, f32)>,
}

/// Geo-reference coordinates of a gridded container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridCoords {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Vertical axis for 3-D raster stacks.
    pub levels: Option<Vec<f64>>,
}

/// A time-indexed table of scalar columns.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesContainer {
    times: Vec<NaiveDateTime>,
    columns: BTreeMap<String, Vec<f64>>,
    pub attrs: VarAttributes,
}

impl SeriesContainer {
    /// # Errors
    ///
    /// [`HydrobufError::MergeError`] if the times are not strictly
    /// increasing or any column length differs from the time axis.
    pub fn new(
        times: Vec<NaiveDateTime>,
        columns: BTreeMap<String, Vec<f64>>,
        attrs: VarAttributes,
    ) -> Result<Self> {
        if times.windows(2).any(|w| w[0] >= w[1]) {
            return Err(HydrobufError::MergeError {
                var: columns.keys().next().cloned().unwrap_or_default(),
                message: "series time axis is not strictly increasing".to_string(),
            });
        }
        for (name, values) in &columns {
            if values.len() != times.len() {
                return Err(HydrobufError::MergeError {
                    var: name.clone(),
                    message: format!(
                        "column has {} values for {} timestamps",
                        values.len(),
                        times.len()
                    ),
                });
            }
        }
        Ok(SeriesContainer {
            times,
            columns,
            attrs,
        })
    }

    /// Single-column convenience constructor.
    pub fn single(
        name: impl Into<String>,
        times: Vec<NaiveDateTime>,
        values: Vec<f64>,
        attrs: VarAttributes,
    ) -> Result<Self> {
        let mut columns = BTreeMap::new();
        columns.insert(name.into(), values);
        SeriesContainer::new(times, columns, attrs)
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn columns(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn value_at(&self, column: &str, time: NaiveDateTime) -> Option<f64> {
        let idx = self.times.binary_search(&time).ok()?;
        self.columns.get(column).map(|v| v[idx])
    }
}

/// A time-stacked raster. The first axis of `data` is time; the remaining
/// axes are the frame shape (y, x for 2-D; level, y, x for 3-D stacks).
#[derive(Debug, Clone, PartialEq)]
pub struct GridContainer {
    times: Vec<NaiveDateTime>,
    data: ArrayD<f32>,
    pub coords: GridCoords,
    pub attrs: VarAttributes,
}

impl GridContainer {
    /// # Errors
    ///
    /// [`HydrobufError::MergeError`] if the times are not strictly
    /// increasing or the leading axis length differs from the time axis.
    pub fn new(
        times: Vec<NaiveDateTime>,
        data: ArrayD<f32>,
        coords: GridCoords,
        attrs: VarAttributes,
    ) -> Result<Self> {
        if times.windows(2).any(|w| w[0] >= w[1]) {
            return Err(HydrobufError::MergeError {
                var: String::new(),
                message: "grid time axis is not strictly increasing".to_string(),
            });
        }
        if data.ndim() < 2 || data.shape()[0] != times.len() {
            return Err(HydrobufError::MergeError {
                var: String::new(),
                message: format!(
                    "grid data shape {:?} does not match {} timestamps",
                    data.shape(),
                    times.len()
                ),
            });
        }
        Ok(GridContainer {
            times,
            data,
            coords,
            attrs,
        })
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    /// Shape of a single time frame (everything behind the time axis).
    pub fn frame_shape(&self) -> &[usize] {
        &self.data.shape()[1..]
    }

    pub fn frame(&self, index: usize) -> ArrayViewD<f32> {
        self.data.index_axis(Axis(0), index)
    }

    pub fn frame_at(&self, time: NaiveDateTime) -> Option<ArrayViewD<f32>> {
        let idx = self.times.binary_search(&time).ok()?;
        Some(self.frame(idx))
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// One variable's data for some time range.
#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    Series(SeriesContainer),
    Grid(GridContainer),
}

impl Container {
    pub fn times(&self) -> &[NaiveDateTime] {
        match self {
            Container::Series(s) => s.times(),
            Container::Grid(g) => g.times(),
        }
    }

    pub fn as_series(&self) -> Option<&SeriesContainer> {
        match self {
            Container::Series(s) => Some(s),
            Container::Grid(_) => None,
        }
    }

    pub fn as_grid(&self) -> Option<&GridContainer> {
        match self {
            Container::Grid(g) => Some(g),
            Container::Series(_) => None,
        }
    }
}

/// Outer-join merge of two series containers.
///
/// The result covers the union of both time axes. Per timestamp and column,
/// a finite fresh value wins over the on-disk value; an on-disk value wins
/// over a NaN or absent fresh value. Previously stored points are never
/// dropped by a shorter or NaN-only re-read.
pub fn merge_series(on_disk: &SeriesContainer, fresh: &SeriesContainer) -> Result<SeriesContainer> {
    let mut times: Vec<NaiveDateTime> = on_disk.times.iter().chain(fresh.times.iter()).copied().collect();
    times.sort_unstable();
    times.dedup();

    let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let names: Vec<&String> = on_disk.columns.keys().chain(fresh.columns.keys()).collect();

    for name in names {
        if columns.contains_key(name.as_str()) {
            continue;
        }
        let merged: Vec<f64> = times
            .iter()
            .map(|t| {
                let fresh_val = fresh.value_at(name, *t).filter(|v| !v.is_nan());
                let disk_val = on_disk.value_at(name, *t).filter(|v| !v.is_nan());
                fresh_val.or(disk_val).unwrap_or(f64::NAN)
            })
            .collect();
        columns.insert(name.clone(), merged);
    }

    let mut attrs = fresh.attrs.clone();
    if attrs == VarAttributes::default() {
        attrs = on_disk.attrs.clone();
    }

    SeriesContainer::new(times, columns, attrs)
}

/// Three-way merge of a gridded chunk.
///
/// Builds a NaN skeleton over the chunk's full expected time range, overlays
/// whatever is on disk, then overlays the finite values of the freshly
/// acquired frames. Disk state wins over nothing, finite fresh values win
/// over disk state, and the skeleton guarantees an entry (possibly NaN) for
/// every expected timestamp.
pub fn merge_grid(
    expected_times: &[NaiveDateTime],
    on_disk: Option<&GridContainer>,
    fresh: &GridContainer,
) -> Result<GridContainer> {
    let frame_shape = fresh.frame_shape().to_vec();
    if let Some(disk) = on_disk {
        if disk.frame_shape() != frame_shape.as_slice() {
            return Err(HydrobufError::MergeError {
                var: String::new(),
                message: format!(
                    "frame shape changed between buffer ({:?}) and fresh read ({:?})",
                    disk.frame_shape(),
                    frame_shape
                ),
            });
        }
    }

    let mut shape = Vec::with_capacity(frame_shape.len() + 1);
    shape.push(expected_times.len());
    shape.extend_from_slice(&frame_shape);
    let mut data = ArrayD::from_elem(IxDyn(&shape), f32::NAN);

    let index_of: HashMap<NaiveDateTime, usize> = expected_times
        .iter()
        .enumerate()
        .map(|(i, t)| (*t, i))
        .collect();

    if let Some(disk) = on_disk {
        for (i, t) in disk.times.iter().enumerate() {
            if let Some(&out) = index_of.get(t) {
                data.index_axis_mut(Axis(0), out).assign(&disk.frame(i));
            }
        }
    }

    // Fresh values overlay per element so a NaN re-read (a source file that
    // has since been archived away) never clobbers buffered data.
    for (i, t) in fresh.times.iter().enumerate() {
        if let Some(&out) = index_of.get(t) {
            let mut target = data.index_axis_mut(Axis(0), out);
            Zip::from(&mut target)
                .and(&fresh.frame(i))
                .for_each(|out_val, &fresh_val| {
                    if !fresh_val.is_nan() {
                        *out_val = fresh_val;
                    }
                });
        }
    }

    let coords = if fresh.coords == GridCoords::default() {
        on_disk.map(|d| d.coords.clone()).unwrap_or_default()
    } else {
        fresh.coords.clone()
    };
    let mut attrs = fresh.attrs.clone();
    if attrs == VarAttributes::default() {
        attrs = on_disk.map(|d| d.attrs.clone()).unwrap_or_default();
    }

    GridContainer::new(expected_times.to_vec(), data, coords, attrs)
}
