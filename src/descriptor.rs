//! Static per-run variable configuration
//!
//! A [`VariableDescriptor`] is created once from configuration and read-only
//! for the rest of the run. It names the source files through path templates,
//! selects the reader through its dimensionality, and declares how the
//! variable relates to the run anchor through its data kind.

use crate::errors::{HydrobufError, Result};
use crate::template::{self, Token};
use std::str::FromStr;

/// Shape of the data behind one variable, fixed at configuration time.
///
/// Selecting the reader here, once, keeps string comparisons out of the
/// per-timestamp acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimensionality {
    /// Scalar time series read from columnar ASCII files.
    Point,
    /// 2-D rasters stacked along time.
    Grid2d,
    /// 3-D raster stacks (e.g. with a vertical level axis) stacked along time.
    Grid3d,
}

impl Dimensionality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimensionality::Point => "point",
            Dimensionality::Grid2d => "grid2d",
            Dimensionality::Grid3d => "grid3d",
        }
    }
}

impl FromStr for Dimensionality {
    type Err = HydrobufError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "point" => Ok(Dimensionality::Point),
            "grid2d" => Ok(Dimensionality::Grid2d),
            "grid3d" => Ok(Dimensionality::Grid3d),
            _ => Err(HydrobufError::UnknownName {
                kind: "dimensionality",
                name: s.to_string(),
            }),
        }
    }
}

/// How a variable's source files are keyed in time.
///
/// Observed and outcome variables have one file per timestamp; forecast
/// variables have one file per issue (reference) timestamp covering the
/// whole horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Observed,
    Forecast,
    /// Model results paired with observations ("result" in configuration).
    Outcome,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Observed => "observed",
            DataKind::Forecast => "forecast",
            DataKind::Outcome => "result",
        }
    }
}

impl FromStr for DataKind {
    type Err = HydrobufError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "observed" => Ok(DataKind::Observed),
            "forecast" => Ok(DataKind::Forecast),
            "result" => Ok(DataKind::Outcome),
            _ => Err(HydrobufError::UnknownName {
                kind: "data kind",
                name: s.to_string(),
            }),
        }
    }
}

/// Deterministic variables have a single realization; probabilistic ones fan
/// out into one realization per ensemble member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentKind {
    Deterministic,
    Probabilistic,
}

impl FromStr for ExperimentKind {
    type Err = HydrobufError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deterministic" => Ok(ExperimentKind::Deterministic),
            "probabilistic" => Ok(ExperimentKind::Probabilistic),
            _ => Err(HydrobufError::UnknownName {
                kind: "experiment kind",
                name: s.to_string(),
            }),
        }
    }
}

/// Ensemble member labelling for probabilistic variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsembleSpec {
    /// First member number.
    pub start: u32,
    /// Number of members.
    pub count: u32,
    /// Zero-padding width of the member label.
    pub width: usize,
}

impl EnsembleSpec {
    /// The member labels, zero-padded to `width`.
    pub fn labels(&self) -> Vec<String> {
        (self.start..self.start + self.count)
            .map(|n| format!("{:0width$}", n, width = self.width))
            .collect()
    }
}

/// A companion variable that must be present on disk together with the
/// source before a candidate timestamp can be selected.
#[derive(Debug, Clone)]
pub struct AncillarySpec {
    pub template: String,
    pub kind: DataKind,
}

/// Static configuration for one logical variable.
#[derive(Debug, Clone)]
pub struct VariableDescriptor {
    /// Logical variable name, used as the buffer group name (with
    /// `$ensemble` expanded for probabilistic variables).
    pub name: String,
    pub dimensionality: Dimensionality,
    pub data_kind: DataKind,
    pub experiment: ExperimentKind,
    /// Variable name inside gridded source files.
    pub source_name: String,
    /// Path template for the source files.
    pub source_template: String,
    /// Companion variable that must exist alongside the source.
    pub ancillary: Option<AncillarySpec>,
    pub ensemble: Option<EnsembleSpec>,
}

impl VariableDescriptor {
    /// Start a descriptor with the mandatory fields; customise with the
    /// `with_*` methods, then [`validate`](Self::validate) before use.
    pub fn new(
        name: impl Into<String>,
        dimensionality: Dimensionality,
        data_kind: DataKind,
        source_template: impl Into<String>,
    ) -> Self {
        let name = name.into();
        VariableDescriptor {
            source_name: name.clone(),
            name,
            dimensionality,
            data_kind,
            experiment: ExperimentKind::Deterministic,
            source_template: source_template.into(),
            ancillary: None,
            ensemble: None,
        }
    }

    /// Set the variable name used inside gridded source files.
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    /// Declare a required companion variable.
    pub fn with_ancillary(mut self, template: impl Into<String>, kind: DataKind) -> Self {
        self.ancillary = Some(AncillarySpec {
            template: template.into(),
            kind,
        });
        self
    }

    /// Fan the variable out over ensemble members.
    pub fn with_ensemble(mut self, spec: EnsembleSpec) -> Self {
        self.experiment = ExperimentKind::Probabilistic;
        self.ensemble = Some(spec);
        self
    }

    /// Check the descriptor for internal contradictions.
    ///
    /// # Errors
    ///
    /// [`HydrobufError::Config`] for a probabilistic variable without an
    /// ensemble spec, an `$ensemble` token on a deterministic variable, or
    /// an unparsable template; these abort the run.
    pub fn validate(&self) -> Result<()> {
        let tokens = template::required_tokens(&self.source_template)?;
        if let Some(ancillary) = &self.ancillary {
            template::required_tokens(&ancillary.template)?;
        }

        match self.experiment {
            ExperimentKind::Probabilistic => {
                if self.ensemble.is_none() {
                    return Err(HydrobufError::Config {
                        message: format!(
                            "probabilistic variable '{}' has no ensemble spec",
                            self.name
                        ),
                    });
                }
            }
            ExperimentKind::Deterministic => {
                if tokens.contains(&Token::Ensemble) {
                    return Err(HydrobufError::Config {
                        message: format!(
                            "deterministic variable '{}' uses $ensemble in its source template",
                            self.name
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// Member labels to iterate over: one `None` entry for deterministic
    /// variables, one `Some(label)` per member otherwise.
    pub fn members(&self) -> Vec<Option<String>> {
        match &self.ensemble {
            Some(spec) => spec.labels().into_iter().map(Some).collect(),
            None => vec![None],
        }
    }

    /// Buffer group name for one member (`name_label` for members, the
    /// plain name otherwise).
    pub fn outcome_name(&self, member: Option<&str>) -> String {
        match member {
            Some(label) => format!("{}_{}", self.name, label),
            None => self.name.clone(),
        }
    }
}
