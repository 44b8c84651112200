//! Error types for the dispatch planner.

use std::fmt;

/// Returned when a search is stopped by its [`CancelToken`](crate::cancel::CancelToken).
///
/// Callers propagate it with `?` and catch it once at the worker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "search cancelled")
    }
}

impl std::error::Error for Cancelled {}

#[derive(Debug)]
pub enum PlannerError {
    /// The request is structurally unusable (empty horizon, inverted work time, ...).
    InvalidInput(String),
    /// A search parameter is out of range.
    InvalidConfig(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            PlannerError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            PlannerError::Io(e) => write!(f, "io error: {e}"),
            PlannerError::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl std::error::Error for PlannerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlannerError::Io(e) => Some(e),
            PlannerError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PlannerError {
    fn from(e: std::io::Error) -> Self {
        PlannerError::Io(e)
    }
}

impl From<serde_json::Error> for PlannerError {
    fn from(e: serde_json::Error) -> Self {
        PlannerError::Json(e)
    }
}
