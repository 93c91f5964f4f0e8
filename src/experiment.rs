//! Typed handles over a converted dataset.
//!
//! A converted dataset is a directory tree of `summary.json` documents and
//! binary `content`/`stats` files. Summaries go through the session's
//! document cache; binary payloads are always fetched by byte range so large
//! matrices are never held in memory as a whole.

use std::fmt;

use serde::Deserialize;

use crate::codec::{self, ColumnValues, ValueType};
use crate::error::KiraError;
use crate::store::{RemoteStore, StoreBackend};

const SUMMARY: &str = "summary.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    SummarizedExperiment,
    SingleCellExperiment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentSummary {
    pub object: ExperimentKind,
    pub row_count: usize,
    pub column_count: usize,
    #[serde(default)]
    pub has_row_data: bool,
    #[serde(default)]
    pub has_column_data: bool,
    #[serde(default)]
    pub assay_names: Vec<String>,
    #[serde(default)]
    pub reduced_dimension_names: Vec<String>,
    #[serde(default)]
    pub alternative_experiment_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkTable {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub types: Vec<ValueType>,
    #[serde(default)]
    pub bytes: Vec<u64>,
}

impl ChunkTable {
    fn validate(&self, path: &str) -> Result<(), KiraError> {
        if self.names.len() != self.types.len() || self.names.len() != self.bytes.len() {
            return Err(KiraError::invalid_payload(
                path,
                "names, types and bytes differ in length",
            ));
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    fn offsets(&self, path: &str) -> Result<Vec<(u64, u64)>, KiraError> {
        codec::chunk_offsets(&self.bytes)
            .ok_or_else(|| KiraError::invalid_payload(path, "chunk sizes overflow"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataFrameSummary {
    pub object: String,
    pub row_count: usize,
    #[serde(default)]
    pub has_row_names: bool,
    #[serde(default)]
    pub columns: ChunkTable,
    #[serde(default)]
    pub row_names_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixFormat {
    #[default]
    Dense,
    Sparse,
}

/// Per-row chunk sizes: one value chunk per row for dense matrices, a value
/// chunk followed by an index chunk for sparse ones.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RowBytes {
    Dense(Vec<u64>),
    Sparse { value: Vec<u64>, index: Vec<u64> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatrixSummary {
    pub object: String,
    pub row_count: usize,
    pub column_count: usize,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub format: MatrixFormat,
    pub row_bytes: RowBytes,
    #[serde(default)]
    pub statistics: ChunkTable,
}

#[derive(Debug, Clone, Copy)]
struct RowChunk {
    start: u64,
    value_bytes: u64,
    index_bytes: u64,
}

impl MatrixSummary {
    fn row_chunks(&self, location: &str) -> Result<Vec<RowChunk>, KiraError> {
        let pairs: Vec<(u64, u64)> = match (&self.row_bytes, self.format) {
            (RowBytes::Dense(values), MatrixFormat::Dense) => {
                values.iter().map(|value| (*value, 0)).collect()
            }
            (RowBytes::Sparse { value, index }, MatrixFormat::Sparse) => {
                if value.len() != index.len() {
                    return Err(KiraError::invalid_payload(
                        location,
                        "sparse value and index sizes differ in length",
                    ));
                }
                value.iter().copied().zip(index.iter().copied()).collect()
            }
            _ => {
                return Err(KiraError::invalid_payload(
                    location,
                    "row_bytes does not match the matrix format",
                ));
            }
        };
        if pairs.len() != self.row_count {
            return Err(KiraError::invalid_payload(
                location,
                "row_bytes does not match row_count",
            ));
        }

        let mut start = 0u64;
        let mut chunks = Vec::with_capacity(pairs.len());
        for (value_bytes, index_bytes) in pairs {
            chunks.push(RowChunk {
                start,
                value_bytes,
                index_bytes,
            });
            start = start
                .checked_add(value_bytes)
                .and_then(|end| end.checked_add(index_bytes))
                .ok_or_else(|| KiraError::invalid_payload(location, "chunk sizes overflow"))?;
        }
        Ok(chunks)
    }
}

fn summary_path(dir: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), SUMMARY)
}

fn child_path(dir: &str, child: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), child)
}

pub struct Experiment<'a, B: StoreBackend> {
    store: &'a RemoteStore<B>,
    path: String,
    summary: ExperimentSummary,
}

impl<B: StoreBackend> fmt::Debug for Experiment<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("path", &self.path)
            .field("summary", &self.summary)
            .finish()
    }
}

impl<'a, B: StoreBackend> Experiment<'a, B> {
    pub fn load(store: &'a RemoteStore<B>, path: &str) -> Result<Self, KiraError> {
        let location = summary_path(path);
        let summary: ExperimentSummary = store.fetch_typed(&location)?;
        if summary.object == ExperimentKind::SummarizedExperiment
            && !(summary.reduced_dimension_names.is_empty()
                && summary.alternative_experiment_names.is_empty())
        {
            return Err(KiraError::invalid_payload(
                &location,
                "reduced dimensions or alternative experiments on a summarized experiment",
            ));
        }
        Ok(Self {
            store,
            path: path.trim_end_matches('/').to_string(),
            summary,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn summary(&self) -> &ExperimentSummary {
        &self.summary
    }

    pub fn is_single_cell(&self) -> bool {
        self.summary.object == ExperimentKind::SingleCellExperiment
    }

    pub fn row_count(&self) -> usize {
        self.summary.row_count
    }

    pub fn column_count(&self) -> usize {
        self.summary.column_count
    }

    pub fn assay_names(&self) -> &[String] {
        &self.summary.assay_names
    }

    pub fn reduced_dimension_names(&self) -> &[String] {
        &self.summary.reduced_dimension_names
    }

    pub fn alternative_experiment_names(&self) -> &[String] {
        &self.summary.alternative_experiment_names
    }

    pub fn row_data(&self) -> Result<Option<DataFrame<'a, B>>, KiraError> {
        if !self.summary.has_row_data {
            return Ok(None);
        }
        DataFrame::load(self.store, &child_path(&self.path, "row_data")).map(Some)
    }

    pub fn column_data(&self) -> Result<Option<DataFrame<'a, B>>, KiraError> {
        if !self.summary.has_column_data {
            return Ok(None);
        }
        DataFrame::load(self.store, &child_path(&self.path, "column_data")).map(Some)
    }

    /// Row names from the row data, if there are any.
    pub fn row_names(&self) -> Result<Option<Vec<String>>, KiraError> {
        match self.row_data()? {
            Some(frame) => frame.row_names(),
            None => Ok(None),
        }
    }

    pub fn assay(&self, name: &str) -> Result<Matrix<'a, B>, KiraError> {
        let index = position(&self.summary.assay_names, name)
            .ok_or_else(|| KiraError::UnknownAssay(name.to_string()))?;
        Matrix::load(self.store, &child_path(&self.path, &format!("assays/{index}")))
    }

    pub fn reduced_dimension(&self, name: &str) -> Result<DataFrame<'a, B>, KiraError> {
        let index = position(&self.summary.reduced_dimension_names, name)
            .ok_or_else(|| KiraError::UnknownReducedDimension(name.to_string()))?;
        DataFrame::load(
            self.store,
            &child_path(&self.path, &format!("reduced_dimensions/{index}")),
        )
    }

    pub fn alternative_experiment(&self, name: &str) -> Result<Experiment<'a, B>, KiraError> {
        let index = position(&self.summary.alternative_experiment_names, name).ok_or_else(|| {
            KiraError::invalid_payload(&self.path, format!("no alternative experiment '{name}'"))
        })?;
        Experiment::load(
            self.store,
            &child_path(&self.path, &format!("alternative_experiments/{index}")),
        )
    }
}

fn position(names: &[String], name: &str) -> Option<usize> {
    names.iter().position(|candidate| candidate == name)
}

pub struct DataFrame<'a, B: StoreBackend> {
    store: &'a RemoteStore<B>,
    path: String,
    summary: DataFrameSummary,
    offsets: Vec<(u64, u64)>,
    row_names_range: Option<(u64, u64)>,
}

impl<B: StoreBackend> fmt::Debug for DataFrame<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFrame")
            .field("path", &self.path)
            .field("summary", &self.summary)
            .finish()
    }
}

impl<'a, B: StoreBackend> DataFrame<'a, B> {
    pub fn load(store: &'a RemoteStore<B>, path: &str) -> Result<Self, KiraError> {
        let location = summary_path(path);
        let summary: DataFrameSummary = store.fetch_typed(&location)?;
        if summary.object != "data_frame" {
            return Err(KiraError::invalid_payload(
                &location,
                format!("expected a data_frame, found '{}'", summary.object),
            ));
        }
        summary.columns.validate(&location)?;
        if summary.has_row_names && summary.row_names_bytes.is_none() {
            return Err(KiraError::invalid_payload(
                &location,
                "row names declared without row_names_bytes",
            ));
        }
        let offsets = summary.columns.offsets(&location)?;
        let row_names_range = match summary.row_names_bytes.filter(|_| summary.has_row_names) {
            Some(size) => {
                let start = offsets.last().map(|(_, end)| *end).unwrap_or(0);
                let end = start.checked_add(size).ok_or_else(|| {
                    KiraError::invalid_payload(&location, "chunk sizes overflow")
                })?;
                Some((start, end))
            }
            None => None,
        };
        Ok(Self {
            store,
            path: path.trim_end_matches('/').to_string(),
            summary,
            offsets,
            row_names_range,
        })
    }

    pub fn row_count(&self) -> usize {
        self.summary.row_count
    }

    pub fn has_row_names(&self) -> bool {
        self.summary.has_row_names
    }

    pub fn column_names(&self) -> &[String] {
        &self.summary.columns.names
    }

    pub fn column_type(&self, name: &str) -> Option<ValueType> {
        self.summary
            .columns
            .position(name)
            .map(|index| self.summary.columns.types[index])
    }

    pub fn row_names(&self) -> Result<Option<Vec<String>>, KiraError> {
        let Some((start, end)) = self.row_names_range else {
            return Ok(None);
        };
        let compressed = self
            .store
            .fetch_byte_range(&child_path(&self.path, "content"), start, end)?;
        let names = codec::decode_strings(&codec::inflate(&compressed)?)?;
        self.check_length(names.len())?;
        Ok(Some(names))
    }

    pub fn column(&self, name: &str) -> Result<ColumnValues, KiraError> {
        let index = self
            .summary
            .columns
            .position(name)
            .ok_or_else(|| KiraError::UnknownColumn(name.to_string()))?;
        self.column_at(index)
    }

    pub fn column_at(&self, index: usize) -> Result<ColumnValues, KiraError> {
        let Some(&(start, end)) = self.offsets.get(index) else {
            return Err(KiraError::UnknownColumn(index.to_string()));
        };
        let compressed = self
            .store
            .fetch_byte_range(&child_path(&self.path, "content"), start, end)?;
        let values = codec::decode(&compressed, self.summary.columns.types[index])?;
        self.check_length(values.len())?;
        Ok(values)
    }

    fn check_length(&self, len: usize) -> Result<(), KiraError> {
        if len != self.summary.row_count {
            return Err(KiraError::Decode(format!(
                "{}: decoded {len} values for {} rows",
                self.path, self.summary.row_count
            )));
        }
        Ok(())
    }
}

pub struct Matrix<'a, B: StoreBackend> {
    store: &'a RemoteStore<B>,
    path: String,
    summary: MatrixSummary,
    rows: Vec<RowChunk>,
    statistic_offsets: Vec<(u64, u64)>,
}

impl<B: StoreBackend> fmt::Debug for Matrix<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("path", &self.path)
            .field("summary", &self.summary)
            .finish()
    }
}

impl<'a, B: StoreBackend> Matrix<'a, B> {
    pub fn load(store: &'a RemoteStore<B>, path: &str) -> Result<Self, KiraError> {
        let location = summary_path(path);
        let summary: MatrixSummary = store.fetch_typed(&location)?;
        if summary.object != "matrix" {
            return Err(KiraError::invalid_payload(
                &location,
                format!("expected a matrix, found '{}'", summary.object),
            ));
        }
        let rows = summary.row_chunks(&location)?;
        summary.statistics.validate(&location)?;
        let statistic_offsets = summary.statistics.offsets(&location)?;
        Ok(Self {
            store,
            path: path.trim_end_matches('/').to_string(),
            summary,
            rows,
            statistic_offsets,
        })
    }

    pub fn row_count(&self) -> usize {
        self.summary.row_count
    }

    pub fn column_count(&self) -> usize {
        self.summary.column_count
    }

    pub fn format(&self) -> MatrixFormat {
        self.summary.format
    }

    pub fn statistic_names(&self) -> &[String] {
        &self.summary.statistics.names
    }

    /// Dense values of one row (one gene across all columns). Sparse rows
    /// are expanded with zeros.
    pub fn row(&self, row: usize) -> Result<Vec<f64>, KiraError> {
        let Some(chunk) = self.rows.get(row).copied() else {
            return Err(KiraError::RowOutOfRange {
                row,
                row_count: self.summary.row_count,
            });
        };
        let end = chunk.start + chunk.value_bytes + chunk.index_bytes;
        let bytes = self
            .store
            .fetch_byte_range(&child_path(&self.path, "content"), chunk.start, end)?;
        let (value_chunk, index_chunk) = bytes.split_at(chunk.value_bytes as usize);
        let values = codec::decode(value_chunk, self.summary.value_type)?;
        match self.summary.format {
            MatrixFormat::Dense => self.numeric(values),
            MatrixFormat::Sparse => {
                let indices = codec::decode(index_chunk, ValueType::Integer)?;
                self.densify(values, indices)
            }
        }
    }

    /// Per-column statistic such as `column_sum`.
    pub fn statistic(&self, name: &str) -> Result<Vec<f64>, KiraError> {
        let stats = &self.summary.statistics;
        let index = stats
            .position(name)
            .ok_or_else(|| KiraError::invalid_payload(&self.path, format!("no statistic '{name}'")))?;
        let (start, end) = self.statistic_offsets[index];
        let compressed = self
            .store
            .fetch_byte_range(&child_path(&self.path, "stats"), start, end)?;
        self.numeric(codec::decode(&compressed, stats.types[index])?)
    }

    /// Scatters sparse values into a zero-filled row. Column indices are
    /// delta-encoded: the first is absolute, each later one is an offset from
    /// its predecessor.
    fn densify(&self, values: ColumnValues, indices: ColumnValues) -> Result<Vec<f64>, KiraError> {
        let values = values
            .to_f64()
            .ok_or_else(|| KiraError::Decode(format!("{}: non-numeric matrix values", self.path)))?;
        let ColumnValues::Integer(deltas) = indices else {
            return Err(KiraError::Decode(format!("{}: non-integer sparse indices", self.path)));
        };
        if deltas.len() != values.len() {
            return Err(KiraError::Decode(format!(
                "{}: {} sparse values for {} indices",
                self.path,
                values.len(),
                deltas.len()
            )));
        }

        let mut dense = vec![0.0; self.summary.column_count];
        let mut column = 0i64;
        for (value, delta) in values.into_iter().zip(deltas) {
            let delta = delta.ok_or_else(|| {
                KiraError::Decode(format!("{}: missing sparse index", self.path))
            })?;
            column += i64::from(delta);
            let position = usize::try_from(column)
                .ok()
                .filter(|position| *position < dense.len())
                .ok_or_else(|| {
                    KiraError::Decode(format!(
                        "{}: sparse index {column} outside {} columns",
                        self.path, self.summary.column_count
                    ))
                })?;
            dense[position] = value;
        }
        Ok(dense)
    }

    fn numeric(&self, values: ColumnValues) -> Result<Vec<f64>, KiraError> {
        let numeric = values
            .to_f64()
            .ok_or_else(|| KiraError::Decode(format!("{}: non-numeric matrix values", self.path)))?;
        if numeric.len() != self.summary.column_count {
            return Err(KiraError::Decode(format!(
                "{}: decoded {} values for {} columns",
                self.path,
                numeric.len(),
                self.summary.column_count
            )));
        }
        Ok(numeric)
    }
}
