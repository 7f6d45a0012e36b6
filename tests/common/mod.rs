//! Shared fixtures: an in-memory engine loaded with a few tables, pools
//! and pipelines wired to it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rdrs::auth::{ApiKeyCache, ApiKeyCacheConfig, CredentialStore};
use rdrs::codec::{ArrayType, DataType};
use rdrs::engine::{ColumnDef, MemoryEngine, NativeEngine};
use rdrs::{BufferPool, BufferPoolConfig, Pipeline, PipelineConfig, ReadColumn, ReadRequest};

/// Prefix of [`API_KEY`].
pub const API_KEY_PREFIX: &str = "bkYjEz6OTZyevbqT";
/// Secret half of [`API_KEY`].
pub const API_KEY_SECRET: &str = "ocHajJhnE0ytBh8zbYj3IXupyMqeMZp8PW464eTxzxqP5afBjodEQUgY0lmL33ub";
/// Full key granted `db000` and `db004`.
pub const API_KEY: &str =
    "bkYjEz6OTZyevbqT.ocHajJhnE0ytBh8zbYj3IXupyMqeMZp8PW464eTxzxqP5afBjodEQUgY0lmL33ub";
/// Owner of [`API_KEY`].
pub const USER_ID: u64 = 1;

/// Engine with:
/// - `db004.int_table(id0, id1 | col0, col1)`, rows `(i, i)` for i in 0..10
///   with `col0 = i * 5` and `col1 = NULL` for even i
/// - `db000.string_table(id | name, born)` with a few rows
/// - `db001.secret_table(id | v)`, not granted to [`USER_ID`]
pub fn engine() -> Arc<MemoryEngine> {
    let engine = MemoryEngine::new();

    engine.create_table(
        "db004",
        "int_table",
        vec![
            ColumnDef::key("id0", ArrayType::Fixed, 11).with_data_type(DataType::Integer),
            ColumnDef::key("id1", ArrayType::Fixed, 11).with_data_type(DataType::Integer),
            ColumnDef::value("col0", DataType::Integer),
            ColumnDef::value("col1", DataType::Integer),
        ],
    );
    for i in 0..10u32 {
        let id = i.to_string();
        let col0 = (i * 5).to_string();
        let col1 = (i % 2 == 1).then(|| i.to_string());
        engine
            .insert_row(
                "db004",
                "int_table",
                &[&id, &id],
                &[("col0", Some(&col0)), ("col1", col1.as_deref())],
            )
            .unwrap();
    }

    engine.create_table(
        "db000",
        "string_table",
        vec![
            ColumnDef::key("id", ArrayType::ShortVar, 32),
            ColumnDef::value("name", DataType::String),
            ColumnDef::value("born", DataType::DateTime),
        ],
    );
    for (id, name, born) in [
        ("a", "Ada", "1815-12-10"),
        ("q\"t", "say \"hi\"", "2000-01-01"),
        ("é", "ünïcode", "1999-12-31"),
    ] {
        engine
            .insert_row(
                "db000",
                "string_table",
                &[id],
                &[("name", Some(name)), ("born", Some(born))],
            )
            .unwrap();
    }

    engine.create_table(
        "db001",
        "secret_table",
        vec![
            ColumnDef::key("id", ArrayType::MediumVar, 64),
            ColumnDef::value("v", DataType::String),
        ],
    );
    engine
        .insert_row("db001", "secret_table", &["1"], &[("v", Some("hidden"))])
        .unwrap();

    engine.add_api_key(API_KEY_PREFIX, API_KEY_SECRET, "salty", USER_ID);
    engine.grant(USER_ID, "db000");
    engine.grant(USER_ID, "db004");

    Arc::new(engine)
}

/// Initialized pool
pub fn pool(buffer_size: u32, pre_allocated: u32) -> BufferPool {
    BufferPool::with_config(BufferPoolConfig::new(buffer_size, pre_allocated)).unwrap()
}

/// Pipeline without API keys over a 4 KiB pool
pub fn pipeline(engine: &Arc<MemoryEngine>) -> Pipeline {
    let native: Arc<dyn NativeEngine> = engine.clone();
    Pipeline::new(pool(4096, 8), native, PipelineConfig::default())
}

/// Pipeline requiring API keys, with its cache
pub fn secured_pipeline(
    engine: &Arc<MemoryEngine>,
    cache_config: ApiKeyCacheConfig,
) -> (Pipeline, Arc<ApiKeyCache>) {
    let store: Arc<dyn CredentialStore> = engine.clone();
    let cache = Arc::new(ApiKeyCache::new(store, cache_config));
    let native: Arc<dyn NativeEngine> = engine.clone();
    let pipeline = Pipeline::new(
        pool(4096, 8),
        native,
        PipelineConfig::default().with_api_keys(true),
    )
    .with_auth(cache.clone());
    (pipeline, cache)
}

/// Cache settings with no jitter and short timings
pub fn fast_cache(refresh_ms: u64, eviction_ms: u64) -> ApiKeyCacheConfig {
    ApiKeyCacheConfig::new()
        .with_refresh_interval(Duration::from_millis(refresh_ms))
        .with_refresh_jitter(Duration::ZERO)
        .with_eviction_window(Duration::from_millis(eviction_ms))
        .with_sweep_interval(Duration::from_millis(5))
}

/// `db004.int_table` read of row `(id0, id1)` returning both value columns
pub fn int_read(id0: u32, id1: u32) -> ReadRequest {
    ReadRequest::new("db004", "int_table")
        .with_filter("id0", id0.to_string())
        .with_filter("id1", id1.to_string())
        .with_read_column(ReadColumn::new("col0"))
        .with_read_column(ReadColumn::new("col1"))
}
