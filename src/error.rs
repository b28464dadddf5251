use std::path::PathBuf;

use crate::grid::Position;

/// Errors raised by samples, collections and plates.
///
/// Missing data is not an error: an apply over a sample with neither cached
/// data nor a source yields the caller's none value.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An unsupported strategy, target or output-format tag.
    #[error("Unsupported value '{value}' for {parameter}. Expected one of: {expected}")]
    Configuration {
        parameter: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("A position can only be occupied by a single sample: {first} and {second} both map to {position}")]
    PositionConflict {
        position: Position,
        first: String,
        second: String,
    },

    #[error("Position {position} of sample {id} is not part of this grid")]
    PositionOutOfGrid { id: String, position: Position },

    #[error("All sample positions must be set, but no position was set for sample {0}")]
    UnpositionedSample(String),

    #[error("The keyword '{field}' does not exist in the metadata of {path:?}")]
    IdentityLookup { field: String, path: PathBuf },

    #[error("Could not derive a sample ID from {path:?}: {reason}")]
    UnparsableId { path: PathBuf, reason: String },

    #[error("Could not derive a grid position from sample ID '{id}': {reason}")]
    UnparsablePosition { id: String, reason: String },

    #[error("No sample with ID '{0}'")]
    UnknownSample(String),

    #[error("Function returned {got} values but {expected} outputs were requested")]
    OutputArity { expected: usize, got: usize },

    #[error("Failed to read {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// A failure raised by a caller-supplied callback, passed through unchanged.
    #[error(transparent)]
    Callback(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    pub(crate) fn configuration(
        parameter: &'static str,
        value: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Self::Configuration {
            parameter,
            value: value.into(),
            expected,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
