//! Dataset reference-time discovery
//!
//! For each variable the finder scans backward from the run anchor and
//! records the most recent timestamp for which the templated source path
//! resolves to at least one existing file. Results live in a run-scoped
//! [`DatasetTimeMap`] so repeated lookups in the same run never touch the
//! file system twice, and the map can be persisted as a JSON artifact for
//! warm restarts.

use crate::descriptor::{DataKind, VariableDescriptor};
use crate::errors::{HydrobufError, Result};
use crate::template::{expand, TemplateValues};
use chrono::{Duration, NaiveDateTime};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Discovery result for one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetTimeEntry {
    /// Most recent timestamp with source data on disk.
    pub reference_time: NaiveDateTime,
    /// The template that resolved.
    pub source_template: String,
    /// Member label -> resolved path. Deterministic variables use a single
    /// empty-string key.
    pub member_paths: BTreeMap<String, PathBuf>,
    /// Set once a scan in the current run confirmed the entry; loaded
    /// warm-restart entries start unresolved and are re-verified.
    pub resolved: bool,
}

/// Run-scoped map from variable name to its discovery result.
///
/// Created empty at run start, filled by [`DatasetTimeFinder`], consulted by
/// the acquirer, and discarded (or persisted) at run end. Passed explicitly
/// between calls; never global.
#[derive(Debug, Clone, Default)]
pub struct DatasetTimeMap {
    entries: HashMap<String, DatasetTimeEntry>,
}

impl DatasetTimeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, variable: &str) -> Option<&DatasetTimeEntry> {
        self.entries.get(variable)
    }

    /// The resolved reference timestamp for a variable, if any.
    pub fn reference_time(&self, variable: &str) -> Option<NaiveDateTime> {
        self.entries.get(variable).map(|e| e.reference_time)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&mut self, variable: String, entry: DatasetTimeEntry) {
        self.entries.insert(variable, entry);
    }

    /// Persist the map as a JSON warm-restart artifact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut root = Map::new();
        for (variable, entry) in &self.entries {
            let mut obj = Map::new();
            obj.insert(
                "reference_time".to_string(),
                Value::String(entry.reference_time.format(TIME_FORMAT).to_string()),
            );
            obj.insert(
                "source_template".to_string(),
                Value::String(entry.source_template.clone()),
            );
            let paths: Map<String, Value> = entry
                .member_paths
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.display().to_string())))
                .collect();
            obj.insert("member_paths".to_string(), Value::Object(paths));
            root.insert(variable.clone(), Value::Object(obj));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&Value::Object(root))?)?;
        Ok(())
    }

    /// Load a previously saved map. Entries come back unresolved so the next
    /// scan re-verifies them against the file system.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let root: Value = serde_json::from_str(&text)?;
        let root = root.as_object().ok_or_else(|| HydrobufError::Config {
            message: format!("'{}' is not a JSON object", path.display()),
        })?;

        let mut map = DatasetTimeMap::new();
        for (variable, value) in root {
            let obj = value.as_object().ok_or_else(|| HydrobufError::Config {
                message: format!("entry '{}' is not a JSON object", variable),
            })?;
            let time_str = obj
                .get("reference_time")
                .and_then(Value::as_str)
                .ok_or_else(|| HydrobufError::Config {
                    message: format!("entry '{}' is missing reference_time", variable),
                })?;
            let reference_time = NaiveDateTime::parse_from_str(time_str, TIME_FORMAT)
                .map_err(|e| HydrobufError::Config {
                    message: format!("bad reference_time for '{}': {}", variable, e),
                })?;
            let source_template = obj
                .get("source_template")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let member_paths = obj
                .get("member_paths")
                .and_then(Value::as_object)
                .map(|paths| {
                    paths
                        .iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), PathBuf::from(s))))
                        .collect()
                })
                .unwrap_or_default();

            map.insert(
                variable.clone(),
                DatasetTimeEntry {
                    reference_time,
                    source_template,
                    member_paths,
                    resolved: false,
                },
            );
        }
        Ok(map)
    }
}

/// One row of the presence table built during a scan.
#[derive(Debug)]
struct CandidateRow {
    time: NaiveDateTime,
    source_paths: Option<BTreeMap<String, PathBuf>>,
    ancillary_present: bool,
}

/// Chronological-consistency rule between paired columns.
///
/// A forecast must not resolve after its paired observed column, an outcome
/// must resolve together with its paired observed column (and the observed
/// column with its paired outcome). Other pairings carry no constraint.
fn chronologically_consistent(
    kind: DataKind,
    time: NaiveDateTime,
    fixed_kind: DataKind,
    fixed_time: NaiveDateTime,
) -> bool {
    use DataKind::*;
    match (kind, fixed_kind) {
        (Forecast, Observed) => time <= fixed_time,
        (Observed, Forecast) => time >= fixed_time,
        (Outcome, Observed) | (Observed, Outcome) => time == fixed_time,
        _ => true,
    }
}

/// Scans backward from the run anchor for the most recent on-disk dataset.
#[derive(Debug, Clone, Copy)]
pub struct DatasetTimeFinder {
    /// Number of candidate timestamps to probe.
    pub lookback_steps: u32,
    /// Spacing of candidate timestamps; finer than the nominal data
    /// frequency to tolerate irregular delivery times.
    pub scan_frequency: Duration,
}

impl DatasetTimeFinder {
    pub fn new(lookback_steps: u32, scan_frequency: Duration) -> Self {
        DatasetTimeFinder {
            lookback_steps,
            scan_frequency,
        }
    }

    /// Find the reference timestamp for `descriptor`, caching the result.
    ///
    /// A second call in the same run is served from the map without any
    /// file-system access. Total absence of candidate files is a warning
    /// and yields `Ok(None)`; the run proceeds with the variable
    /// unavailable.
    pub fn find(
        &self,
        map: &mut DatasetTimeMap,
        descriptor: &VariableDescriptor,
        time_run: NaiveDateTime,
    ) -> Result<Option<NaiveDateTime>> {
        if let Some(entry) = map.get(&descriptor.name) {
            if entry.resolved {
                debug!(
                    variable = %descriptor.name,
                    reference_time = %entry.reference_time,
                    "dataset time served from map"
                );
                return Ok(Some(entry.reference_time));
            }
        }

        let rows = self.build_presence_table(descriptor, time_run)?;
        let selected = self.select_row(descriptor, &rows);

        let Some((reference_time, member_paths)) = selected else {
            warn!(
                variable = %descriptor.name,
                time_run = %time_run,
                lookback_steps = self.lookback_steps,
                "no source file found in lookback window, variable unavailable"
            );
            return Ok(None);
        };

        // A warm-restart entry that is strictly newer than what the scan
        // found wins, together with its own member paths; files may have
        // been archived away since it was saved.
        let (reference_time, member_paths) = match map.get(&descriptor.name) {
            Some(entry) if entry.reference_time > reference_time => {
                debug!(
                    variable = %descriptor.name,
                    cached = %entry.reference_time,
                    scanned = %reference_time,
                    "keeping newer cached reference time"
                );
                (entry.reference_time, entry.member_paths.clone())
            }
            _ => (reference_time, member_paths),
        };

        map.insert(
            descriptor.name.clone(),
            DatasetTimeEntry {
                reference_time,
                source_template: descriptor.source_template.clone(),
                member_paths,
                resolved: true,
            },
        );
        Ok(Some(reference_time))
    }

    /// Probe every candidate timestamp, newest first.
    fn build_presence_table(
        &self,
        descriptor: &VariableDescriptor,
        time_run: NaiveDateTime,
    ) -> Result<Vec<CandidateRow>> {
        let members = descriptor.members();
        let mut rows = Vec::with_capacity(self.lookback_steps as usize);

        for step in 0..self.lookback_steps {
            let candidate = time_run - self.scan_frequency * step as i32;

            let mut paths = BTreeMap::new();
            for member in &members {
                let values =
                    TemplateValues::at(candidate).with_ensemble(member.as_deref());
                let path = PathBuf::from(expand(&descriptor.source_template, &values)?);
                if path.is_file() {
                    paths.insert(member.clone().unwrap_or_default(), path);
                }
            }

            let ancillary_present = match &descriptor.ancillary {
                Some(ancillary) => {
                    let mut present = false;
                    for member in &members {
                        let values =
                            TemplateValues::at(candidate).with_ensemble(member.as_deref());
                        if Path::new(&expand(&ancillary.template, &values)?).is_file() {
                            present = true;
                            break;
                        }
                    }
                    present
                }
                None => false,
            };

            rows.push(CandidateRow {
                time: candidate,
                source_paths: (!paths.is_empty()).then_some(paths),
                ancillary_present,
            });
        }

        Ok(rows)
    }

    /// Pick the reference row: first fully-populated row wins; otherwise the
    /// most recent partial hits, subject to the chronological-consistency
    /// rule, with a warning.
    fn select_row(
        &self,
        descriptor: &VariableDescriptor,
        rows: &[CandidateRow],
    ) -> Option<(NaiveDateTime, BTreeMap<String, PathBuf>)> {
        let ancillary_kind = descriptor.ancillary.as_ref().map(|a| a.kind);

        // Fully populated row: source present and, when required, the
        // ancillary companion present at the same timestamp.
        for row in rows {
            if let Some(paths) = &row.source_paths {
                if ancillary_kind.is_none() || row.ancillary_present {
                    return Some((row.time, paths.clone()));
                }
            }
        }

        // Fallback: fix each column at its most recent hit, discarding more
        // recent candidates that would be chronologically inconsistent with
        // an already-fixed column.
        let mut source_hit: Option<(NaiveDateTime, BTreeMap<String, PathBuf>)> = None;
        let mut ancillary_hit: Option<NaiveDateTime> = None;

        for row in rows {
            if source_hit.is_none() {
                if let Some(paths) = &row.source_paths {
                    let consistent = match (ancillary_kind, ancillary_hit) {
                        (Some(anc_kind), Some(anc_time)) => chronologically_consistent(
                            descriptor.data_kind,
                            row.time,
                            anc_kind,
                            anc_time,
                        ),
                        _ => true,
                    };
                    if consistent {
                        source_hit = Some((row.time, paths.clone()));
                    } else {
                        debug!(
                            variable = %descriptor.name,
                            candidate = %row.time,
                            "discarding chronologically inconsistent source candidate"
                        );
                    }
                }
            }

            if let Some(anc_kind) = ancillary_kind {
                if ancillary_hit.is_none() && row.ancillary_present {
                    let consistent = match &source_hit {
                        Some((source_time, _)) => chronologically_consistent(
                            anc_kind,
                            row.time,
                            descriptor.data_kind,
                            *source_time,
                        ),
                        None => true,
                    };
                    if consistent {
                        ancillary_hit = Some(row.time);
                    } else {
                        debug!(
                            variable = %descriptor.name,
                            candidate = %row.time,
                            "discarding chronologically inconsistent ancillary candidate"
                        );
                    }
                }
            }

            let done = source_hit.is_some()
                && (ancillary_kind.is_none() || ancillary_hit.is_some());
            if done {
                break;
            }
        }

        if let Some((time, paths)) = source_hit {
            warn!(
                variable = %descriptor.name,
                reference_time = %time,
                "no fully populated candidate row, falling back to partial hit"
            );
            return Some((time, paths));
        }
        None
    }
}
