//! Single PK read tests against the in-memory engine.

mod common;

use std::sync::Arc;
use std::thread;

use rdrs::api::{PkReadParams, PkReadResponse};
use rdrs::codec::{
    decode_pk_read, encode_pk_read, ArrayType, DataType, PkReadRequestView, PkReadResponseWriter,
};
use rdrs::engine::{ColumnDef, NativeEngine};
use rdrs::status::{http, ErrorKind, GrpcCode};
use rdrs::{NativeBuffer, ReadColumn, ReadRequest};
use serde_json::json;

// ============ Scenario Tests ============

#[test]
fn test_int_table_scenario_round_trip() {
    let request = ReadRequest::new("db004", "int_table")
        .with_filter("id0", "0")
        .with_filter("id1", "0")
        .with_read_column(ReadColumn::new("col0"))
        .with_read_column(ReadColumn::new("col1"));

    let mut req_buf = NativeBuffer::zeroed(1024);
    encode_pk_read(&request, &mut req_buf).unwrap();

    let view = PkReadRequestView::new(req_buf.as_bytes_mut()).unwrap();
    assert_eq!(view.database().unwrap(), "db004");
    assert_eq!(view.table().unwrap(), "int_table");
    assert_eq!(view.pk_name(0).unwrap(), "id0");
    assert_eq!(view.pk_name(1).unwrap(), "id1");
    assert_eq!(view.pk_value(1).unwrap(), b"0");
    assert_eq!(view.read_column_name(1).unwrap(), "col1");

    // Synthetic engine answer: col0 = "5", col1 = NULL.
    let mut resp_buf = NativeBuffer::zeroed(1024);
    let mut w = PkReadResponseWriter::new(resp_buf.as_bytes_mut()).unwrap();
    w.set_status(http::OK).unwrap();
    w.set_db("db004").unwrap();
    w.set_table("int_table").unwrap();
    w.set_operation_id(None).unwrap();
    w.set_column_count(2).unwrap();
    w.append_column("col0", Some("5"), DataType::String).unwrap();
    w.append_column("col1", None, DataType::Integer).unwrap();
    w.close().unwrap();

    let response = decode_pk_read(&resp_buf).unwrap();
    let body = serde_json::to_value(PkReadResponse::from(&response)).unwrap();
    assert_eq!(body, json!({"data": {"col0": "5", "col1": null}}));
}

// ============ Pipeline Tests ============

#[test]
fn test_read_found_row() {
    let engine = common::engine();
    let pipeline = common::pipeline(&engine);

    let resp = pipeline.pk_read(&common::int_read(3, 3), None).unwrap();
    assert!(resp.is_found());
    assert_eq!(resp.column("col0"), Some(Some("15")));
    assert_eq!(resp.column("col1"), Some(Some("3")));

    let resp = pipeline.pk_read(&common::int_read(2, 2), None).unwrap();
    assert_eq!(resp.column("col1"), Some(None));

    let body = serde_json::to_value(PkReadResponse::from(&resp)).unwrap();
    assert_eq!(body, json!({"data": {"col0": 10, "col1": null}}));
}

#[test]
fn test_read_missing_row_is_not_an_error() {
    let engine = common::engine();
    let pipeline = common::pipeline(&engine);

    let req = common::int_read(1, 2).with_operation_id("lookup-7");
    let resp = pipeline.pk_read(&req, None).unwrap();
    assert_eq!(resp.status, http::NOT_FOUND);
    assert_eq!(resp.operation_id.as_deref(), Some("lookup-7"));
    assert!(resp.columns.is_empty());
    assert_eq!(pipeline.stats().not_found, 1);
    assert_eq!(pipeline.stats().total_failures(), 0);
}

#[test]
fn test_read_all_columns_when_none_requested() {
    let engine = common::engine();
    let pipeline = common::pipeline(&engine);

    let req = ReadRequest::new("db000", "string_table").with_filter("id", "\"a\"");
    let resp = pipeline.pk_read(&req, None).unwrap();
    let names: Vec<&str> = resp.columns.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["born", "name"]);
    assert_eq!(resp.columns["born"].data_type, DataType::DateTime);
}

#[test]
fn test_read_escaped_string_key_and_value() {
    let engine = common::engine();
    let pipeline = common::pipeline(&engine);

    let params: PkReadParams = serde_json::from_value(json!({
        "db": "db000",
        "table": "string_table",
        "filters": [{"column": "id", "value": "q\"t"}],
        "readColumns": [{"column": "name", "dataReturnType": "default"}],
        "operationId": "esc"
    }))
    .unwrap();

    let resp = pipeline.pk_read(&params.to_request(), None).unwrap();
    assert!(resp.is_found());
    let body = serde_json::to_value(PkReadResponse::from(&resp)).unwrap();
    assert_eq!(
        body,
        json!({"operationId": "esc", "data": {"name": "say \"hi\""}})
    );
}

#[test]
fn test_read_unicode_key() {
    let engine = common::engine();
    let pipeline = common::pipeline(&engine);

    let req = ReadRequest::new("db000", "string_table")
        .with_filter("id", "\"é\"")
        .with_read_column(ReadColumn::new("name"));
    let resp = pipeline.pk_read(&req, None).unwrap();
    let body = serde_json::to_value(PkReadResponse::from(&resp)).unwrap();
    assert_eq!(body, json!({"data": {"name": "ünïcode"}}));
}

#[test]
fn test_decimal_and_wide_integers_keep_their_text() {
    let engine = common::engine();
    engine.create_table(
        "db004",
        "decimal_table",
        vec![
            ColumnDef::key("id", ArrayType::Fixed, 11).with_data_type(DataType::Integer),
            ColumnDef::value("price", DataType::Float),
            ColumnDef::value("big", DataType::Integer),
        ],
    );
    engine
        .insert_row(
            "db004",
            "decimal_table",
            &["1"],
            &[
                ("price", Some("12345678901234567890.123456789012345678")),
                ("big", Some("18446744073709551617")),
            ],
        )
        .unwrap();
    engine
        .insert_row("db004", "decimal_table", &["2"], &[("price", Some("123.450")), ("big", None)])
        .unwrap();
    let pipeline = common::pipeline(&engine);

    let resp = pipeline
        .pk_read(&ReadRequest::new("db004", "decimal_table").with_filter("id", "1"), None)
        .unwrap();
    let text = serde_json::to_string(&PkReadResponse::from(&resp)).unwrap();
    assert_eq!(
        text,
        r#"{"data":{"big":18446744073709551617,"price":12345678901234567890.123456789012345678}}"#
    );

    let resp = pipeline
        .pk_read(&ReadRequest::new("db004", "decimal_table").with_filter("id", "2"), None)
        .unwrap();
    let text = serde_json::to_string(&PkReadResponse::from(&resp)).unwrap();
    assert_eq!(text, r#"{"data":{"big":null,"price":123.450}}"#);
}

// ============ Error Tests ============

#[test]
fn test_unsupported_return_type_never_reaches_engine() {
    let engine = common::engine();
    let pipeline = common::pipeline(&engine);

    let req = ReadRequest::new("db004", "int_table")
        .with_filter("id0", "0")
        .with_filter("id1", "0")
        .with_read_column(ReadColumn::new("col0").with_return_type("base64"));
    let err = pipeline.pk_read(&req, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.grpc_code(), GrpcCode::InvalidArgument);
    assert_eq!(engine.reads(), 0);
    assert_eq!(pipeline.pool_stats().checked_out(), 0);
}

#[test]
fn test_request_too_large_for_buffer() {
    let engine = common::engine();
    let native: Arc<dyn NativeEngine> = engine.clone();
    let pipeline = rdrs::Pipeline::new(common::pool(64, 2), native, Default::default());

    let req = ReadRequest::new("db000", "string_table").with_filter("id", "x".repeat(200));
    let err = pipeline.pk_read(&req, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(err.http_status(), 500);
    assert_eq!(engine.reads(), 0);

    let stats = pipeline.pool_stats();
    assert_eq!(stats.checked_out(), 0);
    assert_eq!(stats.total_buffers, 2);
}

#[test]
fn test_unknown_table_is_native_not_found() {
    let engine = common::engine();
    let pipeline = common::pipeline(&engine);

    let req = ReadRequest::new("db004", "no_such_table").with_filter("id", "1");
    let err = pipeline.pk_read(&req, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Native);
    assert_eq!(err.http_status(), 404);
    assert_eq!(err.grpc_code(), GrpcCode::NotFound);
    assert_eq!(
        err.to_string(),
        "Database/Table does not exist. Database: db004 Table: no_such_table"
    );
    assert!(err.verbose().contains("File:"));

    let stats = pipeline.stats();
    assert_eq!(stats.not_found, 0);
    assert_eq!(stats.corruption_failures, 0);
    assert_eq!(stats.responses_with(404), 1);
    assert_eq!(pipeline.pool_stats().checked_out(), 0);
}

#[test]
fn test_read_during_reconnect_is_retriable() {
    let engine = common::engine();
    let pipeline = common::pipeline(&engine);

    engine.disconnect().unwrap();
    let err = pipeline.pk_read(&common::int_read(1, 1), None).unwrap_err();
    match &err {
        rdrs::RdrsError::Native(status) => assert!(status.is_retriable()),
        other => panic!("expected native error, got {other:?}"),
    }
    assert_eq!(pipeline.pool_stats().checked_out(), 0);

    engine.reconnect().unwrap();
    assert_eq!(engine.reconnects(), 1);
    assert!(pipeline.pk_read(&common::int_read(1, 1), None).is_ok());
}

// ============ Authorization Tests ============

#[test]
fn test_api_key_required() {
    let engine = common::engine();
    let (pipeline, _cache) = common::secured_pipeline(&engine, common::fast_cache(10_000, 60_000));

    let err = pipeline.pk_read(&common::int_read(1, 1), None).unwrap_err();
    assert_eq!(err, rdrs::RdrsError::Unauthorized("No API key supplied".into()));
    assert_eq!(err.grpc_code(), GrpcCode::PermissionDenied);

    let resp = pipeline
        .pk_read(&common::int_read(1, 1), Some(common::API_KEY))
        .unwrap();
    assert!(resp.is_found());
}

#[test]
fn test_api_key_denied_for_other_database() {
    let engine = common::engine();
    let (pipeline, _cache) = common::secured_pipeline(&engine, common::fast_cache(10_000, 60_000));

    let req = ReadRequest::new("db001", "secret_table").with_filter("id", "\"1\"");
    let err = pipeline.pk_read(&req, Some(common::API_KEY)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(engine.reads(), 0);
    assert_eq!(pipeline.stats().unauthorized_failures, 1);
}

#[test]
fn test_malformed_api_key() {
    let engine = common::engine();
    let (pipeline, cache) = common::secured_pipeline(&engine, common::fast_cache(10_000, 60_000));

    let err = pipeline
        .pk_read(&common::int_read(1, 1), Some("not-a-key"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(engine.api_key_lookups(), 0);
    assert_eq!(cache.size(), 0);
}

// ============ Concurrency Tests ============

#[test]
fn test_concurrent_reads_conserve_buffers() {
    let engine = common::engine();
    let pipeline = Arc::new(common::pipeline(&engine));

    let handles: Vec<_> = (0..8u32)
        .map(|t| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                for i in 0..100u32 {
                    let id = (t + i) % 12;
                    let resp = pipeline.pk_read(&common::int_read(id, id), None).unwrap();
                    if id < 10 {
                        assert_eq!(resp.column("col0"), Some(Some((id * 5).to_string().as_str())));
                    } else {
                        assert_eq!(resp.status, http::NOT_FOUND);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pipeline.pool_stats();
    assert_eq!(stats.checked_out(), 0);
    assert_eq!(stats.free_buffers, stats.total_buffers);
    assert_eq!(pipeline.stats().reads, 800);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_facade() {
    let engine = common::engine();
    let pipeline = rdrs::AsyncPipeline::new(common::pipeline(&engine));

    let handles: Vec<_> = (0..4u32)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.pk_read(common::int_read(i, i), None).await })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let resp = handle.await.unwrap().unwrap();
        let expected = (i as u32 * 5).to_string();
        assert_eq!(resp.column("col0"), Some(Some(expected.as_str())));
    }
    assert_eq!(pipeline.pipeline().pool_stats().checked_out(), 0);
}
