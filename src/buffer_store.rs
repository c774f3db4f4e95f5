//! Chunked buffer persistence
//!
//! One NetCDF file per chunk, one group per variable, so unrelated
//! variables can be updated independently. Writes never replace data
//! blindly: an existing group is read back and merged (fresh wins over
//! disk, disk wins over nothing) and the whole file is rewritten through a
//! temp file and an atomic rename, so an aborted run leaves the previous
//! chunk state intact.

use crate::chunks::chunk_label;
use crate::container::{
    merge_grid, merge_series, Container, GridContainer, GridCoords, SeriesContainer, VarAttributes,
};
use crate::errors::{HydrobufError, Result};
use crate::template::{expand, TemplateValues};
use chrono::NaiveDateTime;
use ndarray::{ArrayD, IxDyn};
use netcdf::AttributeValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TIME_UNITS: &str = "seconds since 1970-01-01 00:00:00";
const GRID_DATA_NAME: &str = "data";

/// Store for chunked per-variable buffer files.
#[derive(Debug, Clone)]
pub struct BufferStore {
    root: PathBuf,
    /// File name template; must contain the `$subset` chunk token.
    file_template: String,
    /// Zero-padding width of the chunk label.
    subset_width: usize,
}

impl BufferStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BufferStore {
            root: root.into(),
            file_template: "hydro_buffer_$subset.nc".to_string(),
            subset_width: 3,
        }
    }

    pub fn with_file_template(mut self, template: impl Into<String>) -> Self {
        self.file_template = template.into();
        self
    }

    pub fn with_subset_width(mut self, width: usize) -> Self {
        self.subset_width = width;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolved path of one chunk's buffer file.
    pub fn chunk_path(&self, chunk_id: usize) -> Result<PathBuf> {
        let label = chunk_label(chunk_id, self.subset_width);
        let values = TemplateValues::default().with_subset(&label);
        Ok(self.root.join(expand(&self.file_template, &values)?))
    }

    /// Write one variable's chunk, merging with any buffered state.
    ///
    /// `expected_times` is the chunk's full timestamp range; gridded chunks
    /// are padded to it with NaN frames so every timestamp the chunk is
    /// responsible for has an entry. Pass the container's own times when no
    /// wider range applies.
    pub fn write(
        &self,
        variable: &str,
        chunk_id: usize,
        expected_times: &[NaiveDateTime],
        container: &Container,
    ) -> Result<()> {
        let path = self.chunk_path(chunk_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut groups: BTreeMap<String, Container> = if path.is_file() {
            read_all_groups(&path)?
        } else {
            BTreeMap::new()
        };

        let expected = if expected_times.is_empty() {
            container.times()
        } else {
            expected_times
        };

        let merged = match container {
            Container::Series(fresh) => {
                let merged = match groups.get(variable).and_then(Container::as_series) {
                    Some(on_disk) => merge_series(on_disk, fresh)?,
                    None => fresh.clone(),
                };
                Container::Series(merged)
            }
            Container::Grid(fresh) => {
                let on_disk = groups.get(variable).and_then(Container::as_grid);
                Container::Grid(merge_grid(expected, on_disk, fresh)?)
            }
        };

        debug!(
            variable,
            chunk_id,
            timestamps = merged.times().len(),
            path = %path.display(),
            "writing buffer chunk"
        );
        groups.insert(variable.to_string(), merged);
        write_buffer_file(&path, &groups)
    }

    /// Read one variable's chunk.
    ///
    /// Returns `Ok(None)` when the chunk file or the variable's group is
    /// absent; a missing group in an existing file is logged.
    pub fn read(&self, variable: &str, chunk_id: usize) -> Result<Option<Container>> {
        let path = self.chunk_path(chunk_id)?;
        if !path.is_file() {
            return Ok(None);
        }

        let file = netcdf::open(&path)?;
        match file.group(variable)? {
            Some(group) => read_group(&group).map(Some),
            None => {
                warn!(
                    variable,
                    chunk_id,
                    path = %path.display(),
                    "buffer file exists but variable group is absent"
                );
                Ok(None)
            }
        }
    }

    /// Names of the variable groups present in one chunk file.
    pub fn variables(&self, chunk_id: usize) -> Result<Vec<String>> {
        let path = self.chunk_path(chunk_id)?;
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let file = netcdf::open(&path)?;
        let names = file.groups()?.map(|g| g.name()).collect();
        Ok(names)
    }
}

fn read_all_groups(path: &Path) -> Result<BTreeMap<String, Container>> {
    let file = netcdf::open(path)?;
    let mut groups = BTreeMap::new();
    for group in file.groups()? {
        let name = group.name();
        groups.insert(name, read_group(&group)?);
    }
    Ok(groups)
}

/// Rewrite the whole buffer file: temp file in the same directory, then an
/// atomic rename over the destination.
fn write_buffer_file(path: &Path, groups: &BTreeMap<String, Container>) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = tempfile::Builder::new()
        .prefix(".hydro_buffer")
        .suffix(".nc.tmp")
        .tempfile_in(parent)?;
    let temp_path = temp.path().to_path_buf();

    {
        let mut file = netcdf::create(&temp_path)?;
        for (name, container) in groups {
            let mut group = file.add_group(name)?;
            match container {
                Container::Series(series) => write_series_group(&mut group, series)?,
                Container::Grid(grid) => write_grid_group(&mut group, grid)?,
            }
        }
    }

    temp.persist(path)
        .map_err(|e| HydrobufError::IoError(e.error))?;
    Ok(())
}

fn encode_times(times: &[NaiveDateTime]) -> Vec<f64> {
    times
        .iter()
        .map(|t| t.and_utc().timestamp() as f64)
        .collect()
}

fn put_attrs(var: &mut netcdf::VariableMut, attrs: &VarAttributes) -> Result<()> {
    if let Some(units) = &attrs.units {
        var.put_attribute("units", units.as_str())?;
    }
    if let Some(scale) = attrs.scale_factor {
        var.put_attribute("scale_factor", scale)?;
    }
    if let Some(fill) = attrs.fill_value {
        var.put_attribute("fill_value_source", fill)?;
    }
    if let Some((min, max)) = attrs.valid_range {
        var.put_attribute("valid_min", min)?;
        var.put_attribute("valid_max", max)?;
    }
    Ok(())
}

fn write_time_variable(
    group: &mut netcdf::GroupMut,
    times: &[NaiveDateTime],
) -> Result<()> {
    group.add_dimension("time", times.len())?;
    let mut time_var = group.add_variable::<f64>("time", &["time"])?;
    time_var.put_attribute("units", TIME_UNITS)?;
    time_var.put_values(&encode_times(times), ..)?;
    Ok(())
}

fn write_series_group(group: &mut netcdf::GroupMut, series: &SeriesContainer) -> Result<()> {
    write_time_variable(group, series.times())?;
    for (name, values) in series.columns() {
        let mut var = group.add_variable::<f64>(name, &["time"])?;
        put_attrs(&mut var, &series.attrs)?;
        var.put_values(values, ..)?;
    }
    Ok(())
}

fn write_grid_group(group: &mut netcdf::GroupMut, grid: &GridContainer) -> Result<()> {
    write_time_variable(group, grid.times())?;

    let frame_shape = grid.frame_shape().to_vec();
    let spatial_dims: Vec<&str> = match frame_shape.len() {
        2 => vec!["y", "x"],
        3 => vec!["level", "y", "x"],
        n => {
            return Err(HydrobufError::Generic(format!(
                "unsupported grid frame rank {}",
                n
            )))
        }
    };
    for (dim_name, &len) in spatial_dims.iter().zip(&frame_shape) {
        group.add_dimension(dim_name, len)?;
    }

    let mut dim_names = vec!["time"];
    dim_names.extend_from_slice(&spatial_dims);
    let mut data_var = group.add_variable::<f32>(GRID_DATA_NAME, &dim_names)?;
    put_attrs(&mut data_var, &grid.attrs)?;
    // Containers are built in standard layout, so a flat iteration matches
    // the dimension order declared above.
    let flat: Vec<f32> = grid.data().iter().copied().collect();
    data_var.put_values(&flat, ..)?;

    let x_len = *frame_shape.last().unwrap_or(&0);
    let y_len = frame_shape[frame_shape.len().saturating_sub(2)];
    if grid.coords.x.len() == x_len && !grid.coords.x.is_empty() {
        let mut x_var = group.add_variable::<f64>("x", &["x"])?;
        x_var.put_values(&grid.coords.x, ..)?;
    }
    if grid.coords.y.len() == y_len && !grid.coords.y.is_empty() {
        let mut y_var = group.add_variable::<f64>("y", &["y"])?;
        y_var.put_values(&grid.coords.y, ..)?;
    }
    if let Some(levels) = &grid.coords.levels {
        if frame_shape.len() == 3 && levels.len() == frame_shape[0] {
            let mut level_var = group.add_variable::<f64>("level", &["level"])?;
            level_var.put_values(levels, ..)?;
        }
    }

    Ok(())
}

fn decode_times(values: &[f64]) -> Result<Vec<NaiveDateTime>> {
    values
        .iter()
        .map(|secs| {
            chrono::DateTime::from_timestamp(*secs as i64, 0)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| {
                    HydrobufError::Generic(format!("time value {} out of range", secs))
                })
        })
        .collect()
}

fn read_group_attrs(var: &netcdf::Variable) -> VarAttributes {
    let get_f32 = |name: &str| {
        var.attribute(name).and_then(|a| match a.value().ok()? {
            AttributeValue::Float(v) => Some(v),
            AttributeValue::Double(v) => Some(v as f32),
            _ => None,
        })
    };
    let units = var.attribute("units").and_then(|a| match a.value().ok()? {
        AttributeValue::Str(s) => Some(s),
        _ => None,
    });
    let valid_range = match (get_f32("valid_min"), get_f32("valid_max")) {
        (Some(min), Some(max)) => Some((min, max)),
        _ => None,
    };
    VarAttributes {
        units,
        scale_factor: get_f32("scale_factor"),
        fill_value: get_f32("fill_value_source"),
        valid_range,
    }
}

fn read_group(group: &netcdf::Group) -> Result<Container> {
    let time_var = group
        .variable("time")
        .ok_or_else(|| HydrobufError::VariableNotFound {
            var: format!("{}/time", group.name()),
        })?;
    let times = decode_times(&time_var.get_values::<f64, _>(..)?)?;

    if let Some(data_var) = group.variable(GRID_DATA_NAME) {
        let shape: Vec<usize> = data_var.dimensions().iter().map(|d| d.len()).collect();
        let values: Vec<f32> = data_var.get_values::<f32, _>(..)?;
        let data = ArrayD::from_shape_vec(IxDyn(&shape), values)?;
        let attrs = read_group_attrs(&data_var);

        let read_coord = |name: &str| -> Option<Vec<f64>> {
            group
                .variable(name)
                .and_then(|v| v.get_values::<f64, _>(..).ok())
        };
        let coords = GridCoords {
            x: read_coord("x").unwrap_or_default(),
            y: read_coord("y").unwrap_or_default(),
            levels: read_coord("level"),
        };

        return GridContainer::new(times, data, coords, attrs).map(Container::Grid);
    }

    // Series group: every non-coordinate variable is a column.
    let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut attrs = VarAttributes::default();
    for var in group.variables() {
        let name = var.name();
        if name == "time" {
            continue;
        }
        if attrs == VarAttributes::default() {
            attrs = read_group_attrs(&var);
        }
        columns.insert(name, var.get_values::<f64, _>(..)?);
    }

    SeriesContainer::new(times, columns, attrs).map(Container::Series)
}
