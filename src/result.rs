use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionState;

/// Raised while reading or writing a Touchstone file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported file extension {0:?}")]
    Extension(String),
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("sample count does not match a {rank}-port network")]
    Shape { rank: usize },
    #[error("{keyword} declares {declared}, file holds {found}")]
    Mismatch {
        keyword: &'static str,
        declared: usize,
        found: usize,
    },
    #[error("{0}-parameters are not supported, only S-parameters")]
    Unsupported(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The instrument never confirmed a command within one attempt budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no acknowledgement for `{command}` after {attempts} attempts")]
pub struct AckTimeout {
    pub command: String,
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to {address}: {reason}")]
    Connection { address: String, reason: String },
    #[error(transparent)]
    AckTimeout(#[from] AckTimeout),
    #[error("instrument did not enter network analyzer mode")]
    ModeSetFailure(#[source] AckTimeout),
    #[error("failed to load calibration state {id}")]
    CalibrationLoadFailure {
        id: i32,
        #[source]
        source: AckTimeout,
    },
    #[error("sweep repetition {repetition} did not complete")]
    SweepFailure {
        repetition: u32,
        #[source]
        source: AckTimeout,
    },
    #[error("failed to save dataset {name}")]
    SaveFailure {
        name: String,
        #[source]
        source: AckTimeout,
    },
    #[error("{operation} is not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("calibration range {start}..={end} is empty")]
    InvalidRange { start: i32, end: i32 },
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),
}

impl SessionError {
    /// Promotes an exhausted ack budget to the operation specific failure,
    /// leaving every other error untouched.
    pub(crate) fn escalate(self, f: impl FnOnce(AckTimeout) -> SessionError) -> SessionError {
        match self {
            SessionError::AckTimeout(timeout) => f(timeout),
            other => other,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum OrderingError {
    #[error("{name:?} does not follow the <base>_<ordinal>.<ext> convention")]
    Format { name: String },
    #[error("ordinal {ordinal} appears more than once ({first:?}, {second:?})")]
    DuplicateOrdinal {
        ordinal: i32,
        first: String,
        second: String,
    },
}

#[derive(Debug, Error)]
pub enum StitchError {
    #[error("expected segment ordinal {expected}, found {found}")]
    Contiguity { expected: i32, found: i32 },
    #[error("upper band starts at {upper_start} Hz, below lower band end {lower_stop} Hz")]
    Overlap { lower_stop: f64, upper_start: f64 },
    #[error("cannot join a {lower}-port network with a {upper}-port network")]
    PortMismatch { lower: usize, upper: usize },
    #[error(transparent)]
    Ordering(#[from] OrderingError),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead { path: PathBuf, source: io::Error },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to list {path}: {source}")]
    Listing { path: PathBuf, source: io::Error },
    #[error("failed to load {path}: {source}")]
    Load { path: PathBuf, source: ParseError },
    #[error("no fine segments found in {0}")]
    Empty(PathBuf),
    #[error(transparent)]
    Ordering(#[from] OrderingError),
    #[error(transparent)]
    Stitch(#[from] StitchError),
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: ParseError },
}
