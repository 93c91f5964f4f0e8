#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use serde_json::{Value, json};

use kira_cell_explorer::domain::{ConversionResponse, ConversionStatus};
use kira_cell_explorer::error::KiraError;
use kira_cell_explorer::index::{IndexBackend, QueryPage, SearchQuery};
use kira_cell_explorer::store::StoreBackend;

/// In-memory file service with call counters and scripted conversions.
#[derive(Default)]
pub struct MockStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
    status_scripts: Mutex<HashMap<String, VecDeque<String>>>,
    conversions: Mutex<HashMap<String, ConversionResponse>>,
    over_delivery: usize,
    conversion_delay: Duration,
    pub file_calls: AtomicUsize,
    pub range_calls: AtomicUsize,
    pub conversion_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_over_delivery(mut self, extra: usize) -> Self {
        self.over_delivery = extra;
        self
    }

    pub fn with_conversion_delay(mut self, delay: Duration) -> Self {
        self.conversion_delay = delay;
        self
    }

    pub fn put(&self, path: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(path.to_string(), bytes);
    }

    pub fn put_json(&self, path: &str, value: Value) {
        self.put(path, serde_json::to_vec(&value).unwrap());
    }

    /// Conversion of `input` finishes immediately with `data_path`.
    pub fn convert_immediately(&self, input: &str, data_path: &str) {
        self.conversions.lock().unwrap().insert(
            input.to_string(),
            ConversionResponse {
                status: ConversionStatus::Success,
                status_path: None,
                data_path: Some(data_path.to_string()),
            },
        );
    }

    /// Conversion of `input` stays pending and reports `statuses` in turn on
    /// its status file; the last entry repeats.
    pub fn convert_with_statuses(&self, input: &str, data_path: &str, statuses: &[&str]) {
        let status_path = format!("{input}.status");
        self.conversions.lock().unwrap().insert(
            input.to_string(),
            ConversionResponse {
                status: ConversionStatus::Pending,
                status_path: Some(status_path.clone()),
                data_path: Some(data_path.to_string()),
            },
        );
        self.status_scripts.lock().unwrap().insert(
            status_path,
            statuses.iter().map(|status| status.to_string()).collect(),
        );
    }

    pub fn file_calls(&self) -> usize {
        self.file_calls.load(Ordering::SeqCst)
    }

    pub fn range_calls(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }
}

impl StoreBackend for MockStore {
    fn get_file(&self, path: &str) -> Result<Vec<u8>, KiraError> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(script) = self.status_scripts.lock().unwrap().get_mut(path) {
            let status = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap_or_default()
            };
            return Ok(format!("{status}\n").into_bytes());
        }
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| KiraError::RemoteFetch {
                path: path.to_string(),
                status: 404,
            })
    }

    fn get_range(&self, path: &str, start: u64, end: u64) -> Result<Vec<u8>, KiraError> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap();
        let bytes = files.get(path).ok_or_else(|| KiraError::RemoteFetch {
            path: path.to_string(),
            status: 404,
        })?;
        let stop = (end as usize + self.over_delivery).min(bytes.len());
        Ok(bytes[start as usize..stop].to_vec())
    }

    fn submit_conversion(&self, path: &str) -> Result<ConversionResponse, KiraError> {
        self.conversion_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.conversion_delay.is_zero() {
            thread::sleep(self.conversion_delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.conversions
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| KiraError::Conversion {
                path: path.to_string(),
                reason: "failed to start conversion (status 404)".to_string(),
            })
    }
}

/// In-memory search index with fixed listings and result pages.
#[derive(Default)]
pub struct MockIndex {
    listings: HashMap<String, Vec<String>>,
    pages: Vec<QueryPage>,
    pub queries: Mutex<Vec<(Option<String>, usize, SearchQuery)>>,
    pub list_calls: Mutex<Vec<String>>,
}

impl MockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, path: &str, entries: &[&str]) -> Self {
        self.listings.insert(
            path.to_string(),
            entries.iter().map(|entry| entry.to_string()).collect(),
        );
        self
    }

    pub fn with_pages(mut self, pages: Vec<QueryPage>) -> Self {
        self.pages = pages;
        self
    }
}

impl IndexBackend for MockIndex {
    fn list(&self, path: &str) -> Result<Vec<String>, KiraError> {
        self.list_calls.lock().unwrap().push(path.to_string());
        self.listings
            .get(path)
            .cloned()
            .ok_or_else(|| KiraError::DirectoryListing {
                path: path.to_string(),
            })
    }

    fn query(
        &self,
        page: Option<&str>,
        limit: usize,
        body: &SearchQuery,
    ) -> Result<QueryPage, KiraError> {
        let mut queries = self.queries.lock().unwrap();
        let index = queries.len();
        queries.push((page.map(str::to_string), limit, body.clone()));
        self.pages
            .get(index)
            .cloned()
            .ok_or(KiraError::SearchQuery {
                status: 500,
                message: "no more pages".to_string(),
            })
    }
}

pub fn compress(raw: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw).unwrap();
    encoder.finish().unwrap()
}

pub fn strings_chunk(values: &[&str]) -> Vec<u8> {
    let mut raw = Vec::new();
    for value in values {
        raw.extend_from_slice(value.as_bytes());
        raw.push(0);
    }
    compress(&raw)
}

pub fn doubles_chunk(values: &[f64]) -> Vec<u8> {
    let raw: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
    compress(&raw)
}

pub fn integers_chunk(values: &[i32]) -> Vec<u8> {
    let raw: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
    compress(&raw)
}

pub enum TestColumn<'a> {
    Strings(&'a [&'a str]),
    Doubles(&'a [f64]),
    Integers(&'a [i32]),
}

/// Writes a data frame (summary + content) under `dir`.
pub fn put_data_frame(
    store: &MockStore,
    dir: &str,
    row_count: usize,
    row_names: Option<&[&str]>,
    columns: &[(&str, TestColumn<'_>)],
) {
    let mut content = Vec::new();
    let mut names = Vec::new();
    let mut types = Vec::new();
    let mut bytes = Vec::new();
    for (name, column) in columns {
        let (kind, chunk) = match column {
            TestColumn::Strings(values) => ("string", strings_chunk(values)),
            TestColumn::Doubles(values) => ("double", doubles_chunk(values)),
            TestColumn::Integers(values) => ("integer", integers_chunk(values)),
        };
        names.push(name.to_string());
        types.push(kind);
        bytes.push(chunk.len());
        content.extend(chunk);
    }

    let mut summary = json!({
        "object": "data_frame",
        "row_count": row_count,
        "has_row_names": row_names.is_some(),
        "columns": { "names": names, "types": types, "bytes": bytes },
    });
    if let Some(row_names) = row_names {
        let chunk = strings_chunk(row_names);
        summary["row_names_bytes"] = json!(chunk.len());
        content.extend(chunk);
    }

    store.put_json(&format!("{dir}/summary.json"), summary);
    store.put(&format!("{dir}/content"), content);
}

/// Writes a dense double matrix with a `column_sum` statistic under `dir`.
pub fn put_matrix(store: &MockStore, dir: &str, rows: &[Vec<f64>]) {
    let column_count = rows.first().map(Vec::len).unwrap_or(0);
    let mut content = Vec::new();
    let mut row_bytes = Vec::new();
    for row in rows {
        let chunk = doubles_chunk(row);
        row_bytes.push(chunk.len());
        content.extend(chunk);
    }
    let sums: Vec<f64> = (0..column_count)
        .map(|column| rows.iter().map(|row| row[column]).sum())
        .collect();
    let stats = doubles_chunk(&sums);

    store.put_json(
        &format!("{dir}/summary.json"),
        json!({
            "object": "matrix",
            "row_count": rows.len(),
            "column_count": column_count,
            "type": "double",
            "row_bytes": row_bytes,
            "statistics": {
                "names": ["column_sum"],
                "types": ["double"],
                "bytes": [stats.len()],
            },
        }),
    );
    store.put(&format!("{dir}/content"), content);
    store.put(&format!("{dir}/stats"), stats);
}

/// Writes a sparse double matrix (delta-encoded column indices) with a
/// `column_sum` statistic under `dir`.
pub fn put_sparse_matrix(store: &MockStore, dir: &str, rows: &[Vec<f64>]) {
    let column_count = rows.first().map(Vec::len).unwrap_or(0);
    let mut content = Vec::new();
    let mut value_bytes = Vec::new();
    let mut index_bytes = Vec::new();
    for row in rows {
        let mut values = Vec::new();
        let mut deltas = Vec::new();
        let mut previous = 0i32;
        for (column, value) in row.iter().enumerate() {
            if *value != 0.0 {
                let column = column as i32;
                values.push(*value);
                deltas.push(column - previous);
                previous = column;
            }
        }
        let value_chunk = doubles_chunk(&values);
        let index_chunk = integers_chunk(&deltas);
        value_bytes.push(value_chunk.len());
        index_bytes.push(index_chunk.len());
        content.extend(value_chunk);
        content.extend(index_chunk);
    }
    let sums: Vec<f64> = (0..column_count)
        .map(|column| rows.iter().map(|row| row[column]).sum())
        .collect();
    let stats = doubles_chunk(&sums);

    store.put_json(
        &format!("{dir}/summary.json"),
        json!({
            "object": "matrix",
            "row_count": rows.len(),
            "column_count": column_count,
            "type": "double",
            "format": "sparse",
            "row_bytes": { "value": value_bytes, "index": index_bytes },
            "statistics": {
                "names": ["column_sum"],
                "types": ["double"],
                "bytes": [stats.len()],
            },
        }),
    );
    store.put(&format!("{dir}/content"), content);
    store.put(&format!("{dir}/stats"), stats);
}

pub fn put_experiment(store: &MockStore, dir: &str, summary: Value) {
    store.put_json(&format!("{dir}/summary.json"), summary);
}
