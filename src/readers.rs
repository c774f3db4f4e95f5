//! Raw source file readers
//!
//! One reader per dimensionality, selected once per descriptor so the
//! per-timestamp loop never dispatches on strings: an ASCII reader for point
//! series and NetCDF readers for 2-D rasters and 3-D raster stacks. Sources
//! may be gzip-compressed; [`stage`] transparently decompresses them to a
//! temp file first.
//!
//! A missing or unreadable source is not an error: readers return
//! `Ok(None)` and the caller records the slot as unavailable.

use crate::container::{Container, GridContainer, GridCoords, SeriesContainer, VarAttributes};
use crate::descriptor::Dimensionality;
use crate::errors::{HydrobufError, Result};
use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use ndarray::{ArrayD, IxDyn};
use netcdf::AttributeValue;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Coordinate variable names probed in gridded sources.
const X_NAMES: &[&str] = &["x", "lon", "longitude"];
const Y_NAMES: &[&str] = &["y", "lat", "latitude"];
const LEVEL_NAMES: &[&str] = &["level", "levels", "z"];
const TIME_NAME: &str = "time";

/// A source file ready to be read, possibly decompressed to a temp file.
///
/// The temp file lives as long as this guard; the acquirer keeps guards for
/// a chunk and drops them when the chunk is flushed.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    _staged: Option<NamedTempFile>,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Stage a source file for reading.
///
/// Returns `Ok(None)` if the file does not exist. A `.gz` suffix triggers
/// decompression into a temp file that is removed when the returned guard
/// is dropped.
pub fn stage(path: &Path) -> Result<Option<StagedFile>> {
    if !path.is_file() {
        return Ok(None);
    }

    let is_gzip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    if !is_gzip {
        return Ok(Some(StagedFile {
            path: path.to_path_buf(),
            _staged: None,
        }));
    }

    debug!(path = %path.display(), "staging gzip-compressed source");
    let mut decoder = GzDecoder::new(File::open(path)?);
    let mut staged = NamedTempFile::new()?;
    io::copy(&mut decoder, staged.as_file_mut())?;

    Ok(Some(StagedFile {
        path: staged.path().to_path_buf(),
        _staged: Some(staged),
    }))
}

/// The closed reader set, selected once per descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceReader {
    Point,
    Grid2d,
    Grid3d,
}

impl From<Dimensionality> for SourceReader {
    fn from(dimensionality: Dimensionality) -> Self {
        match dimensionality {
            Dimensionality::Point => SourceReader::Point,
            Dimensionality::Grid2d => SourceReader::Grid2d,
            Dimensionality::Grid3d => SourceReader::Grid3d,
        }
    }
}

impl SourceReader {
    /// Read one staged source file into a container.
    ///
    /// `times` is the timestamp sequence the file is expected to cover;
    /// sources without their own time axis (ASCII series, single-frame
    /// rasters) have it injected from here.
    pub fn read(
        &self,
        staged: &StagedFile,
        source_name: &str,
        outcome_name: &str,
        times: &[NaiveDateTime],
    ) -> Result<Option<Container>> {
        match self {
            SourceReader::Point => {
                Ok(read_point_series(staged.path(), outcome_name, times)?.map(Container::Series))
            }
            SourceReader::Grid2d | SourceReader::Grid3d => {
                Ok(read_grid(staged.path(), source_name, times)?.map(Container::Grid))
            }
        }
    }
}

/// Read a columnar ASCII series: one timestamp per line, whitespace-
/// separated columns, `NaN` for parse failures. Timestamps come from the
/// caller since these files carry no time axis.
///
/// Extra lines beyond `times` are ignored; short files are NaN-padded.
pub fn read_point_series(
    path: &Path,
    name: &str,
    times: &[NaiveDateTime],
) -> Result<Option<SeriesContainer>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut rows: Vec<Vec<f64>> = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        rows.push(
            trimmed
                .split_whitespace()
                .map(|tok| tok.parse::<f64>().unwrap_or(f64::NAN))
                .collect(),
        );
    }

    if rows.is_empty() {
        warn!(path = %path.display(), "point source file contains no data lines");
        return Ok(None);
    }

    let ncols = rows.iter().map(Vec::len).max().unwrap_or(1);
    let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for col in 0..ncols {
        let column_name = if ncols == 1 {
            name.to_string()
        } else {
            format!("{}_{}", name, col + 1)
        };
        let values: Vec<f64> = (0..times.len())
            .map(|row| {
                rows.get(row)
                    .and_then(|r| r.get(col))
                    .copied()
                    .unwrap_or(f64::NAN)
            })
            .collect();
        columns.insert(column_name, values);
    }

    SeriesContainer::new(times.to_vec(), columns, VarAttributes::default()).map(Some)
}

/// Read a gridded NetCDF source into a [`GridContainer`].
///
/// Handles 2-D single frames (time injected from `times`), 3-D
/// time-stacked rasters, 3-D single-frame level stacks, and 4-D
/// time-stacked level stacks. Fill values are converted to NaN; the fill
/// value, units, scale factor, and valid range are kept as attributes.
pub fn read_grid(
    path: &Path,
    source_name: &str,
    times: &[NaiveDateTime],
) -> Result<Option<GridContainer>> {
    let file = match netcdf::open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot open gridded source");
            return Ok(None);
        }
    };

    let Some(var) = file.variable(source_name) else {
        warn!(
            path = %path.display(),
            variable = source_name,
            "variable not found in gridded source"
        );
        return Ok(None);
    };

    let dim_names: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let values: Vec<f32> = var.get_values::<f32, _>(..)?;

    let attrs = read_attributes(&var);
    let mut data = ArrayD::from_shape_vec(IxDyn(&shape), values)?;
    if let Some(fill) = attrs.fill_value {
        data.mapv_inplace(|v| if v == fill { f32::NAN } else { v });
    }

    let has_time_axis = dim_names.first().map(String::as_str) == Some(TIME_NAME);
    let (frame_times, data) = if has_time_axis {
        if file.variable(TIME_NAME).is_some() {
            match decode_time_axis(&file, shape[0]) {
                Ok(decoded) => (decoded, data),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "cannot decode time coordinate, skipping source"
                    );
                    return Ok(None);
                }
            }
        } else if shape[0] == times.len() && !times.is_empty() {
            // A time dimension without a coordinate variable: take the
            // expected timestamps from the caller.
            (times.to_vec(), data)
        } else if shape[0] == 1 && !times.is_empty() {
            (vec![times[0]], data)
        } else {
            warn!(
                path = %path.display(),
                frames = shape[0],
                expected = times.len(),
                "time dimension has no coordinate variable and frame count \
                 does not match the expected timestamps, skipping source"
            );
            return Ok(None);
        }
    } else {
        // No time coordinate in the source: inject the expected timestamp
        // and add a leading length-one time axis.
        let injected = times.first().copied().ok_or_else(|| HydrobufError::Config {
            message: format!(
                "no timestamp available to inject for '{}'",
                path.display()
            ),
        })?;
        let mut with_time = vec![1];
        with_time.extend_from_slice(&shape);
        (vec![injected], data.into_shape(IxDyn(&with_time))?)
    };

    let coords = GridCoords {
        x: read_coord(&file, X_NAMES).unwrap_or_default(),
        y: read_coord(&file, Y_NAMES).unwrap_or_default(),
        levels: read_coord(&file, LEVEL_NAMES),
    };

    GridContainer::new(frame_times, data, coords, attrs).map(Some)
}

fn read_coord(file: &netcdf::File, names: &[&str]) -> Option<Vec<f64>> {
    for name in names {
        if let Some(var) = file.variable(name) {
            if let Ok(values) = var.get_values::<f64, _>(..) {
                return Some(values);
            }
        }
    }
    None
}

fn attr_f32(var: &netcdf::Variable, name: &str) -> Option<f32> {
    var.attribute(name)
        .and_then(|attr| match attr.value().ok()? {
            AttributeValue::Float(v) => Some(v),
            AttributeValue::Double(v) => Some(v as f32),
            AttributeValue::Int(v) => Some(v as f32),
            AttributeValue::Short(v) => Some(v as f32),
            _ => None,
        })
}

fn read_attributes(var: &netcdf::Variable) -> VarAttributes {
    let units = var
        .attribute("units")
        .and_then(|attr| match attr.value().ok()? {
            AttributeValue::Str(s) => Some(s),
            _ => None,
        });

    let valid_range = match (attr_f32(var, "valid_min"), attr_f32(var, "valid_max")) {
        (Some(min), Some(max)) => Some((min, max)),
        _ => var
            .attribute("valid_range")
            .and_then(|attr| match attr.value().ok()? {
                AttributeValue::Floats(v) if v.len() == 2 => Some((v[0], v[1])),
                AttributeValue::Doubles(v) if v.len() == 2 => Some((v[0] as f32, v[1] as f32)),
                _ => None,
            }),
    };

    VarAttributes {
        units,
        scale_factor: attr_f32(var, "scale_factor"),
        fill_value: attr_f32(var, "_FillValue"),
        valid_range,
    }
}

/// Decode the file's time coordinate into timestamps.
///
/// Supports `seconds since <base>` and `hours since <base>` units; a time
/// variable without a units attribute is taken as seconds since the Unix
/// epoch.
fn decode_time_axis(file: &netcdf::File, expected_len: usize) -> Result<Vec<NaiveDateTime>> {
    let var = file
        .variable(TIME_NAME)
        .ok_or_else(|| HydrobufError::VariableNotFound {
            var: TIME_NAME.to_string(),
        })?;
    let offsets: Vec<f64> = var.get_values::<f64, _>(..)?;
    if offsets.len() != expected_len {
        return Err(HydrobufError::Generic(format!(
            "time coordinate has {} entries for {} frames",
            offsets.len(),
            expected_len
        )));
    }

    let units = var
        .attribute("units")
        .and_then(|attr| match attr.value().ok()? {
            AttributeValue::Str(s) => Some(s),
            _ => None,
        });

    let (per_unit, base) = match units.as_deref() {
        None => (1.0, epoch()),
        Some(u) => {
            let (secs, rest) = if let Some(rest) = u.strip_prefix("seconds since ") {
                (1.0, rest)
            } else if let Some(rest) = u.strip_prefix("hours since ") {
                (3600.0, rest)
            } else {
                return Err(HydrobufError::Generic(format!(
                    "unsupported time units '{}'",
                    u
                )));
            };
            let base = NaiveDateTime::parse_from_str(rest.trim(), "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(rest.trim(), "%Y-%m-%dT%H:%M:%S"))
                .map_err(|e| {
                    HydrobufError::Generic(format!("cannot parse time base '{}': {}", rest, e))
                })?;
            (secs, base)
        }
    };

    Ok(offsets
        .iter()
        .map(|off| base + chrono::Duration::seconds((off * per_unit).round() as i64))
        .collect())
}

fn epoch() -> NaiveDateTime {
    chrono::DateTime::from_timestamp(0, 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}
