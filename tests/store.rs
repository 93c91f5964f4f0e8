mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use serde::Deserialize;
use serde_json::json;

use kira_cell_explorer::cancel::CancelToken;
use kira_cell_explorer::error::KiraError;
use kira_cell_explorer::store::RemoteStore;

use common::MockStore;

#[test]
fn second_document_fetch_is_a_cache_hit() {
    let backend = MockStore::new();
    backend.put_json("ds/summary.json", json!({"row_count": 3}));
    let store = RemoteStore::new(backend);

    let first = store.fetch_document("ds/summary.json").unwrap();
    let second = store.fetch_document("ds/summary.json").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(store.backend().file_calls(), 1);
    assert!(store.cache().contains("ds/summary.json"));
}

#[test]
fn missing_document_reports_status_and_path() {
    let store = RemoteStore::new(MockStore::new());
    let err = store.fetch_document("nope.json").unwrap_err();
    assert_matches!(err, KiraError::RemoteFetch { status: 404, ref path } if path == "nope.json");
    assert!(store.cache().is_empty());
}

#[test]
fn range_is_trimmed_to_requested_length() {
    let backend = MockStore::new().with_over_delivery(4);
    backend.put("blob", (0u8..32).collect());
    let store = RemoteStore::new(backend);

    let bytes = store.fetch_byte_range("blob", 3, 10).unwrap();
    assert_eq!(bytes, (3u8..10).collect::<Vec<_>>());
}

#[test]
fn ranges_are_never_cached() {
    let backend = MockStore::new();
    backend.put("blob", vec![7; 16]);
    let store = RemoteStore::new(backend);

    store.fetch_byte_range("blob", 0, 8).unwrap();
    store.fetch_byte_range("blob", 0, 8).unwrap();

    assert_eq!(store.backend().range_calls(), 2);
    assert!(store.cache().is_empty());
}

#[test]
fn empty_range_skips_the_network() {
    let store = RemoteStore::new(MockStore::new());
    assert!(store.fetch_byte_range("blob", 5, 5).unwrap().is_empty());
    assert_eq!(store.backend().range_calls(), 0);
}

#[test]
fn short_range_is_an_error() {
    let backend = MockStore::new();
    backend.put("blob", vec![1, 2, 3]);
    let store = RemoteStore::new(backend);
    assert_matches!(
        store.fetch_byte_range("blob", 0, 10),
        Err(KiraError::ShortRange {
            expected: 10,
            received: 3,
            ..
        })
    );
}

#[derive(Debug, Deserialize)]
struct Summary {
    #[allow(dead_code)]
    row_count: usize,
}

#[test]
fn typed_fetch_rejects_malformed_payloads() {
    let backend = MockStore::new();
    backend.put_json("bad/summary.json", json!({"row_count": "many"}));
    backend.put("garbage.json", b"{not json".to_vec());
    let store = RemoteStore::new(backend);

    assert_matches!(
        store.fetch_typed::<Summary>("bad/summary.json"),
        Err(KiraError::InvalidPayload { .. })
    );
    assert_matches!(
        store.fetch_document("garbage.json"),
        Err(KiraError::InvalidPayload { .. })
    );
}

#[test]
fn cancelled_session_stops_fetching() {
    let backend = MockStore::new();
    backend.put_json("a.json", json!({}));
    let token = CancelToken::new();
    let store = RemoteStore::with_cancel(backend, token.clone());
    token.cancel();

    assert_matches!(store.fetch_document("a.json"), Err(KiraError::Cancelled));
    assert_matches!(store.fetch_byte_range("a.json", 0, 1), Err(KiraError::Cancelled));
    assert_eq!(store.backend().file_calls(), 0);
}
