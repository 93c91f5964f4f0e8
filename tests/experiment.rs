mod common;

use assert_matches::assert_matches;
use serde_json::json;

use kira_cell_explorer::assay::compute_size_factors;
use kira_cell_explorer::codec::ColumnValues;
use kira_cell_explorer::error::KiraError;
use kira_cell_explorer::experiment::{DataFrame, Experiment, Matrix, MatrixFormat};
use kira_cell_explorer::store::RemoteStore;

use common::{
    MockStore, TestColumn, put_data_frame, put_experiment, put_matrix, put_sparse_matrix,
};

fn fixture() -> RemoteStore<MockStore> {
    let backend = MockStore::new();
    put_experiment(
        &backend,
        "conv/sce",
        json!({
            "object": "single_cell_experiment",
            "row_count": 2,
            "column_count": 3,
            "has_row_data": true,
            "has_column_data": true,
            "assay_names": ["counts"],
            "reduced_dimension_names": ["UMAP"],
        }),
    );
    put_data_frame(&backend, "conv/sce/row_data", 2, Some(&["CD3E", "MS4A1"]), &[]);
    put_data_frame(
        &backend,
        "conv/sce/column_data",
        3,
        None,
        &[
            ("cluster", TestColumn::Strings(&["T", "B", "T"])),
            ("n_genes", TestColumn::Integers(&[120, i32::MIN, 87])),
        ],
    );
    put_matrix(
        &backend,
        "conv/sce/assays/0",
        &[vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]],
    );
    put_data_frame(
        &backend,
        "conv/sce/reduced_dimensions/0",
        3,
        None,
        &[
            ("1", TestColumn::Doubles(&[0.5, 1.5, -2.0])),
            ("2", TestColumn::Doubles(&[3.0, f64::NAN, 1.0])),
        ],
    );
    RemoteStore::new(backend)
}

#[test]
fn summary_accessors() {
    let store = fixture();
    let experiment = Experiment::load(&store, "conv/sce/").unwrap();
    assert!(experiment.is_single_cell());
    assert_eq!(experiment.path(), "conv/sce");
    assert_eq!(experiment.row_count(), 2);
    assert_eq!(experiment.column_count(), 3);
    assert_eq!(experiment.assay_names(), ["counts"]);
    assert_eq!(
        experiment.row_names().unwrap(),
        Some(vec!["CD3E".to_string(), "MS4A1".to_string()])
    );
}

#[test]
fn column_data_decodes_each_type() {
    let store = fixture();
    let experiment = Experiment::load(&store, "conv/sce").unwrap();
    let frame = experiment.column_data().unwrap().unwrap();

    assert_eq!(frame.column_names(), ["cluster", "n_genes"]);
    assert!(!frame.has_row_names());
    assert_eq!(frame.row_names().unwrap(), None);
    assert_eq!(
        frame.column("cluster").unwrap(),
        ColumnValues::String(vec!["T".into(), "B".into(), "T".into()])
    );
    assert_eq!(
        frame.column("n_genes").unwrap(),
        ColumnValues::Integer(vec![Some(120), None, Some(87)])
    );
    assert_matches!(frame.column("missing"), Err(KiraError::UnknownColumn(_)));
}

#[test]
fn matrix_rows_and_statistics() {
    let store = fixture();
    let experiment = Experiment::load(&store, "conv/sce").unwrap();
    let counts = experiment.assay("counts").unwrap();

    assert_eq!(counts.row_count(), 2);
    assert_eq!(counts.column_count(), 3);
    assert_eq!(counts.row(1).unwrap(), vec![1.0, 2.0, 3.0]);
    assert_matches!(
        counts.row(2),
        Err(KiraError::RowOutOfRange {
            row: 2,
            row_count: 2
        })
    );
    assert_eq!(counts.statistic("column_sum").unwrap(), vec![2.0, 4.0, 6.0]);
    assert_eq!(compute_size_factors(&counts).unwrap(), vec![0.5, 1.0, 1.5]);
    assert_matches!(experiment.assay("logcounts"), Err(KiraError::UnknownAssay(_)));
}

#[test]
fn reduced_dimension_columns() {
    let store = fixture();
    let experiment = Experiment::load(&store, "conv/sce").unwrap();
    let umap = experiment.reduced_dimension("UMAP").unwrap();
    let y = umap.column_at(1).unwrap();
    let ColumnValues::Double(values) = y else {
        panic!("expected doubles");
    };
    assert_eq!(values[0], Some(3.0));
    assert_eq!(values[1], None);
    assert_matches!(
        experiment.reduced_dimension("TSNE"),
        Err(KiraError::UnknownReducedDimension(_))
    );
}

#[test]
fn wrong_object_kind_is_rejected() {
    let store = fixture();
    assert_matches!(
        DataFrame::load(&store, "conv/sce/assays/0"),
        Err(KiraError::InvalidPayload { .. })
    );
}

#[test]
fn summary_is_cached_and_content_is_not() {
    let store = fixture();
    let experiment = Experiment::load(&store, "conv/sce").unwrap();
    let counts = experiment.assay("counts").unwrap();
    counts.row(0).unwrap();
    counts.row(0).unwrap();
    Experiment::load(&store, "conv/sce").unwrap();

    assert!(store.cache().contains("conv/sce/summary.json"));
    assert!(!store.cache().contains("conv/sce/assays/0/content"));
    assert_eq!(store.backend().range_calls(), 2);
}

#[test]
fn sparse_rows_are_expanded_with_zeros() {
    let backend = MockStore::new();
    put_sparse_matrix(
        &backend,
        "conv/sparse",
        &[
            vec![0.0, 5.0, 0.0, 0.0, 2.0],
            vec![0.0, 0.0, 0.0, 0.0, 0.0],
            vec![7.0, 0.0, 0.0, 1.0, 0.0],
        ],
    );
    let store = RemoteStore::new(backend);
    let matrix = Matrix::load(&store, "conv/sparse").unwrap();

    assert_eq!(matrix.format(), MatrixFormat::Sparse);
    assert_eq!(matrix.row(0).unwrap(), vec![0.0, 5.0, 0.0, 0.0, 2.0]);
    assert_eq!(matrix.row(1).unwrap(), vec![0.0; 5]);
    assert_eq!(matrix.row(2).unwrap(), vec![7.0, 0.0, 0.0, 1.0, 0.0]);
    let factors = compute_size_factors(&matrix).unwrap();
    let expected = [7.0 / 3.0, 5.0 / 3.0, 0.0, 1.0 / 3.0, 2.0 / 3.0];
    for (factor, expected) in factors.iter().zip(expected) {
        assert!((factor - expected).abs() < 1e-12);
    }
    assert_matches!(
        matrix.row(3),
        Err(KiraError::RowOutOfRange {
            row: 3,
            row_count: 3
        })
    );
}

#[test]
fn sparse_index_outside_the_row_is_a_decode_error() {
    let backend = MockStore::new();
    let values = common::doubles_chunk(&[1.0]);
    let indices = common::integers_chunk(&[9]);
    let value_len = values.len();
    let index_len = indices.len();
    backend.put_json(
        "conv/bad/summary.json",
        json!({
            "object": "matrix",
            "row_count": 1,
            "column_count": 3,
            "type": "double",
            "format": "sparse",
            "row_bytes": { "value": [value_len], "index": [index_len] },
        }),
    );
    backend.put("conv/bad/content", [values, indices].concat());
    let store = RemoteStore::new(backend);

    let matrix = Matrix::load(&store, "conv/bad").unwrap();
    assert_matches!(matrix.row(0), Err(KiraError::Decode(_)));
}

#[test]
fn row_bytes_must_match_the_declared_format() {
    let backend = MockStore::new();
    backend.put_json(
        "conv/mixed/summary.json",
        json!({
            "object": "matrix",
            "row_count": 1,
            "column_count": 3,
            "type": "double",
            "format": "sparse",
            "row_bytes": [10],
        }),
    );
    let store = RemoteStore::new(backend);
    assert_matches!(
        Matrix::load(&store, "conv/mixed"),
        Err(KiraError::InvalidPayload { .. })
    );
}

#[test]
fn overflowing_chunk_sizes_are_rejected() {
    let backend = MockStore::new();
    backend.put_json(
        "conv/huge/summary.json",
        json!({
            "object": "data_frame",
            "row_count": 1,
            "has_row_names": true,
            "columns": { "names": ["a", "b"], "types": ["double", "double"], "bytes": [u64::MAX, 1] },
            "row_names_bytes": 4,
        }),
    );
    backend.put_json(
        "conv/huge-matrix/summary.json",
        json!({
            "object": "matrix",
            "row_count": 2,
            "column_count": 1,
            "type": "double",
            "row_bytes": [u64::MAX, 1],
        }),
    );
    let store = RemoteStore::new(backend);

    assert_matches!(
        DataFrame::load(&store, "conv/huge"),
        Err(KiraError::InvalidPayload { ref message, .. }) if message.contains("overflow")
    );
    assert_matches!(
        Matrix::load(&store, "conv/huge-matrix"),
        Err(KiraError::InvalidPayload { ref message, .. }) if message.contains("overflow")
    );
}
