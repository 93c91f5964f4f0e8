use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::domain::MarkerSets;
use crate::error::KiraError;
use crate::experiment::{DataFrame, Experiment};
use crate::store::{RemoteStore, StoreBackend};

/// Marker kind matched to the main experiment and to each alternative
/// experiment, `None` where nothing matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MarkerMatch {
    pub main: Option<String>,
    pub alternative: BTreeMap<String, Option<String>>,
}

struct Candidate {
    kind: String,
    sorted_names: Vec<String>,
}

/// Candidate marker tables grouped by row count.
#[derive(Default)]
pub struct MarkerIndex {
    by_len: HashMap<usize, Vec<Candidate>>,
}

impl MarkerIndex {
    pub fn insert(&mut self, kind: &str, names: &[String]) {
        let mut sorted_names = names.to_vec();
        sorted_names.sort();
        self.by_len
            .entry(names.len())
            .or_default()
            .push(Candidate {
                kind: kind.to_string(),
                sorted_names,
            });
    }

    pub fn is_empty(&self) -> bool {
        self.by_len.is_empty()
    }

    /// First registered kind whose sorted row names equal `names` sorted.
    pub fn find(&self, names: &[String]) -> Option<&str> {
        let candidates = self.by_len.get(&names.len())?;
        let mut sorted = names.to_vec();
        sorted.sort();
        candidates
            .iter()
            .find(|candidate| candidate.sorted_names == sorted)
            .map(|candidate| candidate.kind.as_str())
    }
}

/// Aligns converted marker tables to the experiment at `converted_path`.
///
/// Only the first table of each kind is inspected. When two kinds share an
/// identical row-name set the first kind in label order wins.
pub fn match_markers<B: StoreBackend>(
    store: &RemoteStore<B>,
    converted_path: &str,
    converted_markers: &MarkerSets,
) -> Result<MarkerMatch, KiraError> {
    let mut index = MarkerIndex::default();
    for (kind, paths) in converted_markers {
        let Some(first) = paths.first() else {
            continue;
        };
        let table = DataFrame::load(store, first)?;
        match table.row_names()? {
            Some(names) => index.insert(kind, &names),
            None => debug!(kind = kind.as_str(), "marker table has no row names, skipped"),
        }
    }

    let experiment = Experiment::load(store, converted_path)?;
    let mut result = MarkerMatch {
        main: experiment
            .row_names()?
            .and_then(|names| index.find(&names).map(str::to_string)),
        ..MarkerMatch::default()
    };

    if experiment.is_single_cell() {
        for name in experiment.alternative_experiment_names() {
            let alternative = experiment.alternative_experiment(name)?;
            let matched = alternative
                .row_names()?
                .and_then(|names| index.find(&names).map(str::to_string));
            result.alternative.insert(name.clone(), matched);
        }
    }

    Ok(result)
}

/// Position of each marker-table row name within the experiment row names.
pub fn map_names(table_names: &[String], experiment_names: &[String]) -> Vec<Option<usize>> {
    let positions: HashMap<&str, usize> = experiment_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    table_names
        .iter()
        .map(|name| positions.get(name.as_str()).copied())
        .collect()
}
