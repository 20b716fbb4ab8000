use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::network::Network;
use crate::ordering::MeasurementBatch;
use crate::result::{DatasetError, ParseError};
use crate::stitch::{self, FrequencySegment};
use crate::touchstone;

/// Turns one stored network file into an in-memory network.
pub trait DatasetLoader {
    fn load(&self, path: &Path) -> Result<Network, ParseError>;
}

/// Loads `.sNp` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct TouchstoneLoader;

impl DatasetLoader for TouchstoneLoader {
    fn load(&self, path: &Path) -> Result<Network, ParseError> {
        Network::from_snp(path)
    }
}

fn is_snp(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            e.len() > 2
                && e.starts_with('s')
                && e.ends_with('p')
                && e[1..e.len() - 1].bytes().all(|b| b.is_ascii_digit())
        })
        .unwrap_or(false)
}

/// Lists the `.sNp` files directly inside `dir`, sorted by name.
pub fn list_datasets(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let listing_error = |source| DatasetError::Listing {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(listing_error)? {
        let path = entry.map_err(listing_error)?.path();
        if path.is_file() && is_snp(&path) {
            files.push(path);
        }
    }
    Ok(files.into_iter().sorted().collect())
}

/// Loads the fine sub-band files of `dir` in ordinal order and stitches them
/// into one network. Coarse files in the same directory are skipped.
pub fn stitch_directory(dir: &Path, loader: &impl DatasetLoader) -> Result<Network, DatasetError> {
    let batch = MeasurementBatch::from_paths(&list_datasets(dir)?)?;
    for coarse in &batch.coarse {
        warn!(path = %coarse.display(), "skipping coarse measurement");
    }

    let segments = batch
        .fine
        .iter()
        .map(|file| {
            debug!(path = %file.path.display(), ordinal = file.ordinal, "loading segment");
            loader
                .load(&file.path)
                .map(|network| FrequencySegment::new(file.ordinal, network))
                .map_err(|source| DatasetError::Load {
                    path: file.path.clone(),
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let count = segments.len();
    let network = stitch::stitch(segments)?.ok_or_else(|| DatasetError::Empty(dir.to_path_buf()))?;
    info!(segments = count, points = network.len(), "stitched");
    Ok(network)
}

/// Writes a stitched network, adding an `.sNp` extension when `path` has none.
pub fn save_stitched(network: &Network, path: &Path) -> Result<PathBuf, DatasetError> {
    let mut path = path.to_path_buf();
    if path.extension().is_none() {
        path.set_extension(format!("s{}p", network.nports()));
    }
    touchstone::write_snp(network, &path).map_err(|source| DatasetError::Write {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), "stitched network written");
    Ok(path)
}
