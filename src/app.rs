use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::assay::{
    AssayChoice, AssaySelector, compute_size_factors, has_usable_size_factors, normalize,
};
use crate::cancel::CancelToken;
use crate::codec::ColumnValues;
use crate::convert::{ConversionOptions, Converter};
use crate::domain::{DatasetRecord, MarkerSets};
use crate::error::KiraError;
use crate::experiment::{DataFrame, Experiment};
use crate::index::{IndexBackend, SearchClient};
use crate::markers::find_marker_sets;
use crate::matcher::{MarkerMatch, map_names, match_markers};
use crate::store::{RemoteStore, StoreBackend};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Everything the viewer needs after a dataset has been converted and
/// matched against its marker sets.
#[derive(Debug, Clone, Serialize)]
pub struct OpenedDataset {
    pub dataset_path: String,
    pub data_path: String,
    pub opened_at: DateTime<Utc>,
    pub markers: MarkerSets,
    pub matches: MarkerMatch,
    pub row_count: usize,
    pub column_count: usize,
    pub assay_names: Vec<String>,
    pub chosen_assay: Option<AssayChoice>,
    pub reduced_dimension_names: Vec<String>,
    pub row_data_names: Vec<String>,
    pub column_data_names: Vec<String>,
    pub alternative_experiment_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub color: ColorValues,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColorValues {
    Numeric(Vec<f64>),
    Column(ColumnValues),
}

impl ColorValues {
    fn len(&self) -> usize {
        match self {
            ColorValues::Numeric(values) => values.len(),
            ColorValues::Column(values) => values.len(),
        }
    }
}

/// One exploration session: owns the document cache, the cancellation token
/// and the per-assay size factors.
pub struct Explorer<S: StoreBackend, I: IndexBackend> {
    store: RemoteStore<S>,
    index: I,
    conversion: ConversionOptions,
    selector: AssaySelector,
    size_factors: Mutex<HashMap<(String, String), Arc<Vec<f64>>>>,
}

impl<S: StoreBackend, I: IndexBackend> Explorer<S, I> {
    pub fn new(store: S, index: I, conversion: ConversionOptions, cancel: CancelToken) -> Self {
        Self {
            store: RemoteStore::with_cancel(store, cancel),
            index,
            conversion,
            selector: AssaySelector::default(),
            size_factors: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_selector(mut self, selector: AssaySelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn store(&self) -> &RemoteStore<S> {
        &self.store
    }

    pub fn cancel(&self) {
        self.store.cancel_token().cancel();
    }

    pub fn search(
        &self,
        text: Option<&str>,
        path_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DatasetRecord>, KiraError> {
        SearchClient::new(&self.index).find_experiments(text, path_prefix, limit)
    }

    pub fn discover(&self, dataset_path: &str) -> Result<MarkerSets, KiraError> {
        find_marker_sets(&self.index, dataset_path)
    }

    pub fn open(
        &self,
        dataset_path: &str,
        sink: &dyn ProgressSink,
    ) -> Result<OpenedDataset, KiraError> {
        let started = Instant::now();
        let phase = |message: String| {
            sink.event(ProgressEvent {
                message,
                elapsed: Some(started.elapsed()),
            })
        };

        phase(format!("phase=Discover; listing markers next to {dataset_path}"));
        let markers = self.discover(dataset_path)?;

        let candidates: usize = markers.values().map(Vec::len).sum();
        phase(format!(
            "phase=Convert; converting dataset and {candidates} marker tables"
        ));
        let converter = Converter::new(&self.store, self.conversion);
        let converted = converter.convert_all(dataset_path, &markers)?;

        phase("phase=Match; aligning marker tables".to_string());
        let matches = match_markers(&self.store, &converted.path, &converted.markers)?;

        phase("phase=Load; reading experiment summary".to_string());
        let experiment = Experiment::load(&self.store, &converted.path)?;
        let chosen_assay = if experiment.assay_names().is_empty() {
            None
        } else {
            Some(self.selector.choose(experiment.assay_names())?)
        };
        let row_data_names = experiment
            .row_data()?
            .map(|frame| frame.column_names().to_vec())
            .unwrap_or_default();
        let column_data_names = experiment
            .column_data()?
            .map(|frame| frame.column_names().to_vec())
            .unwrap_or_default();

        info!(
            dataset_path,
            data_path = %converted.path,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dataset opened"
        );

        Ok(OpenedDataset {
            dataset_path: dataset_path.to_string(),
            data_path: converted.path,
            opened_at: Utc::now(),
            markers: converted.markers,
            matches,
            row_count: experiment.row_count(),
            column_count: experiment.column_count(),
            assay_names: experiment.assay_names().to_vec(),
            chosen_assay,
            reduced_dimension_names: experiment.reduced_dimension_names().to_vec(),
            row_data_names,
            column_data_names,
            alternative_experiment_names: experiment.alternative_experiment_names().to_vec(),
        })
    }

    /// Assay to read and whether its values still need normalizing. An
    /// explicitly requested assay goes through the same rules as the
    /// default choice.
    pub fn assay_choice(
        &self,
        opened: &OpenedDataset,
        requested: Option<&str>,
    ) -> Result<AssayChoice, KiraError> {
        let Some(name) = requested else {
            return opened.chosen_assay.clone().ok_or(KiraError::NoAssay);
        };
        if !opened.assay_names.iter().any(|assay| assay == name) {
            return Err(KiraError::UnknownAssay(name.to_string()));
        }
        Ok(AssayChoice {
            assay: name.to_string(),
            normalize: self.selector.normalize_for(name),
        })
    }

    /// Size factors of `assay`, computed once per session.
    pub fn size_factors(
        &self,
        opened: &OpenedDataset,
        assay: &str,
    ) -> Result<Arc<Vec<f64>>, KiraError> {
        let key = (opened.data_path.clone(), assay.to_string());
        if let Some(existing) = self
            .size_factors
            .lock()
            .ok()
            .and_then(|cache| cache.get(&key).cloned())
        {
            return Ok(existing);
        }
        let experiment = Experiment::load(&self.store, &opened.data_path)?;
        let factors = Arc::new(compute_size_factors(&experiment.assay(assay)?)?);
        if let Ok(mut cache) = self.size_factors.lock() {
            cache.insert(key, factors.clone());
        }
        Ok(factors)
    }

    /// Values of one row of `assay`. With `normalize`, values are divided by
    /// size factors and log2-transformed unless the factors are degenerate.
    pub fn expression(
        &self,
        opened: &OpenedDataset,
        assay: &str,
        row: usize,
        normalize_values: bool,
    ) -> Result<Vec<f64>, KiraError> {
        let experiment = Experiment::load(&self.store, &opened.data_path)?;
        let values = experiment.assay(assay)?.row(row)?;
        if !normalize_values {
            return Ok(values);
        }
        let factors = self.size_factors(opened, assay)?;
        if !has_usable_size_factors(&factors) {
            return Ok(values);
        }
        normalize(&values, &factors, true)
    }

    /// Row index of `gene` in the main experiment's row names.
    pub fn find_row(&self, opened: &OpenedDataset, gene: &str) -> Result<Option<usize>, KiraError> {
        let experiment = Experiment::load(&self.store, &opened.data_path)?;
        Ok(experiment
            .row_names()?
            .and_then(|names| names.iter().position(|name| name == gene)))
    }

    /// First two dimensions of a reduced-dimension embedding.
    pub fn embedding(&self, opened: &OpenedDataset, name: &str) -> Result<Embedding, KiraError> {
        let experiment = Experiment::load(&self.store, &opened.data_path)?;
        let frame = experiment.reduced_dimension(name)?;
        let axis = |index: usize| -> Result<Vec<f64>, KiraError> {
            frame.column_at(index)?.to_f64().ok_or_else(|| {
                KiraError::Decode(format!("{name}: non-numeric embedding coordinates"))
            })
        };
        Ok(Embedding {
            x: axis(0)?,
            y: axis(1)?,
        })
    }

    pub fn column(&self, opened: &OpenedDataset, name: &str) -> Result<ColumnValues, KiraError> {
        let experiment = Experiment::load(&self.store, &opened.data_path)?;
        let frame = experiment
            .column_data()?
            .ok_or_else(|| KiraError::UnknownColumn(name.to_string()))?;
        frame.column(name)
    }

    /// Rows matched by each row of the first marker table of `kind`, taken
    /// from whichever experiment (main or alternative) that kind matched.
    /// Empty when the kind matched nothing.
    pub fn marker_rows(
        &self,
        opened: &OpenedDataset,
        kind: &str,
    ) -> Result<Vec<Option<usize>>, KiraError> {
        let Some(table_path) = opened.markers.get(kind).and_then(|paths| paths.first()) else {
            return Ok(Vec::new());
        };
        let experiment = Experiment::load(&self.store, &opened.data_path)?;
        let target_names = if opened.matches.main.as_deref() == Some(kind) {
            experiment.row_names()?
        } else if let Some(name) = opened
            .matches
            .alternative
            .iter()
            .find(|(_, matched)| matched.as_deref() == Some(kind))
            .map(|(name, _)| name)
        {
            experiment.alternative_experiment(name)?.row_names()?
        } else {
            return Ok(Vec::new());
        };
        let table = DataFrame::load(&self.store, table_path)?;
        let table_names = table.row_names()?.unwrap_or_default();
        Ok(map_names(&table_names, &target_names.unwrap_or_default()))
    }
}

pub fn plot_data(embedding: Embedding, color: ColorValues) -> Result<PlotData, KiraError> {
    if embedding.x.len() != color.len() {
        return Err(KiraError::LengthMismatch {
            left: embedding.x.len(),
            right: color.len(),
        });
    }
    if embedding.x.len() != embedding.y.len() {
        return Err(KiraError::LengthMismatch {
            left: embedding.x.len(),
            right: embedding.y.len(),
        });
    }
    Ok(PlotData {
        x: embedding.x,
        y: embedding.y,
        color,
    })
}
