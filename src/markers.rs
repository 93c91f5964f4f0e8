use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::domain::{MarkerSets, join_path, parent_path};
use crate::error::KiraError;
use crate::index::IndexBackend;

const MARKERS_DIR: &str = "markers/";
const MARKERS_PREFIX: &str = "markers-";

fn numeric_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+$").expect("valid regex"))
}

/// Discovers marker-gene directories next to `dataset_path`.
///
/// Recognizes a `markers/` subdirectory (unlabeled sets), legacy numbered
/// `markers-<n>/` siblings (also unlabeled) and labeled `markers-<kind>/`
/// siblings whose subdirectories form the sets for `<kind>`.
pub fn find_marker_sets<I: IndexBackend>(
    index: &I,
    dataset_path: &str,
) -> Result<MarkerSets, KiraError> {
    let parent = parent_path(dataset_path);
    let listing = list_dir(index, parent)?;
    let mut found = MarkerSets::new();

    if listing.iter().any(|entry| entry == MARKERS_DIR) {
        let dir = join_path(parent, MARKERS_DIR);
        let available = subdirectories(index, &dir)?;
        if !available.is_empty() {
            found.insert(String::new(), available);
        }
    }

    for entry in &listing {
        let Some(suffix) = entry
            .strip_prefix(MARKERS_PREFIX)
            .and_then(|rest| rest.strip_suffix('/'))
        else {
            continue;
        };

        if numeric_suffix().is_match(suffix) {
            found
                .entry(String::new())
                .or_default()
                .push(join_path(parent, entry));
        } else {
            let dir = join_path(parent, entry);
            let available = subdirectories(index, &dir)?;
            if !available.is_empty() {
                found.entry(suffix.to_string()).or_default().extend(available);
            }
        }
    }

    debug!(dataset_path, kinds = found.len(), "marker discovery finished");
    Ok(found)
}

fn list_dir<I: IndexBackend>(index: &I, path: &str) -> Result<Vec<String>, KiraError> {
    index.list(path).map_err(|err| match err {
        KiraError::DirectoryListing { .. }
        | KiraError::InvalidPayload { .. }
        | KiraError::Cancelled => err,
        _ => KiraError::DirectoryListing {
            path: path.to_string(),
        },
    })
}

fn subdirectories<I: IndexBackend>(index: &I, dir: &str) -> Result<Vec<String>, KiraError> {
    Ok(list_dir(index, dir)?
        .into_iter()
        .filter(|entry| entry.ends_with('/'))
        .map(|entry| join_path(dir, &entry))
        .collect())
}
