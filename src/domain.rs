use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

/// Marker-kind label to storage paths. The unlabeled kind is `""` and sorts
/// first.
pub type MarkerSets = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub path: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub time: Option<f64>,
    pub metadata: DatasetMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub organism: Option<String>,
    #[serde(default)]
    pub taxonomy_id: Vec<String>,
    #[serde(default)]
    pub object: Option<ObjectDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Author {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        orcid: Option<String>,
    },
}

impl Author {
    pub fn name(&self) -> &str {
        match self {
            Author::Name(name) => name,
            Author::Detailed { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescription {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub summarized_experiment: Option<SummarizedExperimentInfo>,
    #[serde(default)]
    pub single_cell_experiment: Option<SingleCellExperimentInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizedExperimentInfo {
    #[serde(default)]
    pub rows: Option<u64>,
    #[serde(default)]
    pub columns: Option<u64>,
    #[serde(default)]
    pub assays: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleCellExperimentInfo {
    #[serde(default)]
    pub reduced_dimensions: Vec<String>,
    #[serde(default)]
    pub alternative_experiments: Vec<String>,
}

impl DatasetRecord {
    pub fn title(&self) -> &str {
        self.metadata.title.as_deref().unwrap_or("")
    }

    pub fn author_names(&self) -> Vec<&str> {
        self.metadata.authors.iter().map(Author::name).collect()
    }

    pub fn cell_count(&self) -> Option<u64> {
        self.metadata
            .object
            .as_ref()
            .and_then(|object| object.summarized_experiment.as_ref())
            .and_then(|se| se.columns)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConversionStatus {
    Pending,
    Success,
    Failure,
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionStatus::Pending => write!(f, "PENDING"),
            ConversionStatus::Success => write!(f, "SUCCESS"),
            ConversionStatus::Failure => write!(f, "FAILURE"),
        }
    }
}

impl FromStr for ConversionStatus {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim_end() {
            "PENDING" => Ok(ConversionStatus::Pending),
            "SUCCESS" => Ok(ConversionStatus::Success),
            "FAILURE" => Ok(ConversionStatus::Failure),
            other => Err(KiraError::invalid_payload(
                "status",
                format!("unknown conversion status '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResponse {
    pub status: ConversionStatus,
    #[serde(default)]
    pub status_path: Option<String>,
    #[serde(default)]
    pub data_path: Option<String>,
}

impl ConversionResponse {
    pub fn validate(&self, path: &str) -> Result<(), KiraError> {
        match self.status {
            ConversionStatus::Pending if self.status_path.is_none() => Err(
                KiraError::invalid_payload(path, "PENDING conversion without status_path"),
            ),
            ConversionStatus::Pending | ConversionStatus::Success if self.data_path.is_none() => {
                Err(KiraError::invalid_payload(
                    path,
                    "conversion response without data_path",
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Directory containing `path`, i.e. `path` without its last segment.
pub fn parent_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    Utf8Path::new(trimmed)
        .parent()
        .map(|parent| parent.as_str())
        .unwrap_or("")
}

pub fn join_path(parent: &str, child: &str) -> String {
    let child = child.trim_end_matches('/');
    if parent.is_empty() {
        return child.to_string();
    }
    format!("{}/{}", parent.trim_end_matches('/'), child)
}
