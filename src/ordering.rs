//! Ordinal extraction and ordering for per-band measurement files.
//!
//! Fine sub-band files are named `<base>_<ordinal>.<ext>`; the coarse file of
//! a run is just `<base>.<ext>` and never takes part in the ordinal sort.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use itertools::Itertools;
use regex::Regex;

use crate::result::OrderingError;

/// Everything up to the last `_`, then the suffix up to the last `.`.
fn ordinal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(?s)(?P<stem>.*)_(?P<ordinal>[^_]*)\.[^.]*$").unwrap())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Extracts the ordinal between the last `_` and the last `.` of `name`.
pub fn ordinal(name: &str) -> Result<i32, OrderingError> {
    let format_error = || OrderingError::Format {
        name: name.to_owned(),
    };
    let captures = ordinal_pattern().captures(name).ok_or_else(format_error)?;
    let suffix = &captures["ordinal"];
    if suffix.is_empty() || !suffix.trim_start_matches('-').bytes().all(|b| b.is_ascii_digit()) {
        return Err(format_error());
    }
    suffix.parse::<i32>().map_err(|_| format_error())
}

/// A fine sub-band file with its ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedFile {
    pub ordinal: i32,
    pub path: PathBuf,
}

/// Stable ascending sort by ordinal. Every name must carry an ordinal and no
/// ordinal may appear twice.
pub fn sort_by_ordinal<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<OrderedFile>, OrderingError> {
    let mut files = paths
        .iter()
        .map(|p| {
            let path = p.as_ref();
            Ok(OrderedFile {
                ordinal: ordinal(&file_name(path))?,
                path: path.to_path_buf(),
            })
        })
        .collect::<Result<Vec<_>, OrderingError>>()?;
    files.sort_by_key(|f| f.ordinal);

    if let Some((first, second)) = files
        .iter()
        .tuple_windows()
        .find(|(a, b)| a.ordinal == b.ordinal)
    {
        return Err(OrderingError::DuplicateOrdinal {
            ordinal: first.ordinal,
            first: file_name(&first.path),
            second: file_name(&second.path),
        });
    }
    Ok(files)
}

/// A directory listing split into coarse files and the ordered fine sequence.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MeasurementBatch {
    pub coarse: Vec<PathBuf>,
    pub fine: Vec<OrderedFile>,
}

fn stem(path: &Path) -> String {
    let name = file_name(path);
    match name.rsplit_once('.') {
        Some((stem, _)) => stem.to_owned(),
        None => name,
    }
}

/// True when `candidate` is `<base>_<digits>`.
fn extends(candidate: &str, base: &str) -> bool {
    candidate
        .strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('_'))
        .map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

impl MeasurementBatch {
    /// A file is coarse when its stem has no `_`, or when another file of the
    /// listing is named `<stem>_<n>`, so underscored base names work. Every
    /// other file must carry a numeric ordinal.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self, OrderingError> {
        let stems: Vec<String> = paths.iter().map(|p| stem(p.as_ref())).collect();
        let (coarse, fine): (Vec<(PathBuf, bool)>, Vec<(PathBuf, bool)>) = paths
            .iter()
            .zip(&stems)
            .map(|(p, own)| {
                let is_coarse =
                    !own.contains('_') || stems.iter().any(|other| extends(other, own));
                (p.as_ref().to_path_buf(), is_coarse)
            })
            .partition(|(_, is_coarse)| *is_coarse);
        let fine: Vec<PathBuf> = fine.into_iter().map(|(p, _)| p).collect();
        Ok(MeasurementBatch {
            coarse: coarse.into_iter().map(|(p, _)| p).sorted().collect(),
            fine: sort_by_ordinal(&fine)?,
        })
    }
}
