//! Centralized error handling for hydrobuf
//!
//! Only configuration problems are fatal for a run. Missing source files,
//! absent buffer groups and undetermined datasets are availability issues:
//! they are logged as warnings at the call site and surface as `Ok(None)` or
//! NaN-filled slots, never as an `Err`.

use std::fmt;

/// Main error type for hydrobuf operations
#[derive(Debug)]
pub enum HydrobufError {
    /// NetCDF file operation errors
    NetCDFError(netcdf::Error),

    /// I/O operation errors
    IoError(std::io::Error),

    /// Array shape or dimension error
    ArrayError(ndarray::ShapeError),

    /// Warm-restart artifact (de)serialization errors
    JsonError(serde_json::Error),

    /// Invalid or contradictory run configuration (fatal)
    Config { message: String },

    /// A path template referenced a token this crate does not recognize
    UnknownTemplateToken { token: String, template: String },

    /// A configuration string did not name a known variant
    UnknownName { kind: &'static str, name: String },

    /// Variable not found in a NetCDF file where it was required
    VariableNotFound { var: String },

    /// Two containers could not be merged
    MergeError { var: String, message: String },

    /// Generic error for anything without a better home
    Generic(String),
}

impl fmt::Display for HydrobufError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HydrobufError::NetCDFError(e) => write!(f, "NetCDF error: {}", e),
            HydrobufError::IoError(e) => write!(f, "I/O error: {}", e),
            HydrobufError::ArrayError(e) => write!(f, "Array error: {}", e),
            HydrobufError::JsonError(e) => write!(f, "JSON error: {}", e),
            HydrobufError::Config { message } => write!(f, "Configuration error: {}", message),
            HydrobufError::UnknownTemplateToken { token, template } => {
                write!(f, "Unknown token '{}' in path template '{}'", token, template)
            }
            HydrobufError::UnknownName { kind, name } => {
                write!(f, "Unknown {} name: '{}'", kind, name)
            }
            HydrobufError::VariableNotFound { var } => {
                write!(f, "Variable '{}' not found in file", var)
            }
            HydrobufError::MergeError { var, message } => {
                write!(f, "Cannot merge containers for '{}': {}", var, message)
            }
            HydrobufError::Generic(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for HydrobufError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HydrobufError::NetCDFError(e) => Some(e),
            HydrobufError::IoError(e) => Some(e),
            HydrobufError::ArrayError(e) => Some(e),
            HydrobufError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<netcdf::Error> for HydrobufError {
    fn from(error: netcdf::Error) -> Self {
        HydrobufError::NetCDFError(error)
    }
}

impl From<std::io::Error> for HydrobufError {
    fn from(error: std::io::Error) -> Self {
        HydrobufError::IoError(error)
    }
}

impl From<ndarray::ShapeError> for HydrobufError {
    fn from(error: ndarray::ShapeError) -> Self {
        HydrobufError::ArrayError(error)
    }
}

impl From<serde_json::Error> for HydrobufError {
    fn from(error: serde_json::Error) -> Self {
        HydrobufError::JsonError(error)
    }
}

impl From<String> for HydrobufError {
    fn from(error: String) -> Self {
        HydrobufError::Generic(error)
    }
}

impl From<&str> for HydrobufError {
    fn from(error: &str) -> Self {
        HydrobufError::Generic(error.to_string())
    }
}

/// Result type alias for hydrobuf operations
pub type Result<T> = std::result::Result<T, HydrobufError>;
