//! In-memory engine speaking the native buffer contract.
//!
//! Tables live in a hash map keyed by primary-key bytes. Requests are read
//! with [`PkReadRequestView`] and answered with [`PkReadResponseWriter`], so
//! the serving layer exercises exactly the buffers a cluster would see.
//! The engine also acts as the credential backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::auth::{hash_secret, CredentialStore, StoredApiKey};
use crate::buffer_pool::{NativeBuffer, PooledBuffer};
use crate::codec::{
    escape_json_string, ArrayType, CodecError, DataReturnType, DataType, PkReadRequestView,
    PkReadResponseWriter,
};
use crate::engine::{ConnectionState, EngineStats, NativeEngine, RonDbConfig};
use crate::status::{http, NativeStatus};

macro_rules! status {
    ($code:expr, $($arg:tt)*) => {
        NativeStatus::new($code, format!($($arg)*)).with_location(file!(), line!())
    };
}

/// Column of an in-memory table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Type tag reported for values of this column
    pub data_type: DataType,
    /// Storage class, used to prepare key values
    pub array_type: ArrayType,
    /// Largest value in bytes
    pub size: usize,
    /// Whether the column is part of the primary key
    pub primary_key: bool,
}

impl ColumnDef {
    /// Primary-key column
    pub fn key(name: impl Into<String>, array_type: ArrayType, size: usize) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::String,
            array_type,
            size,
            primary_key: true,
        }
    }

    /// Non-key column
    pub fn value(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            array_type: ArrayType::MediumVar,
            size: u16::MAX as usize,
            primary_key: false,
        }
    }

    /// Override the reported data type
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }
}

type Row = HashMap<String, Option<String>>;

struct Table {
    columns: Vec<ColumnDef>,
    rows: HashMap<Vec<Vec<u8>>, Row>,
}

impl Table {
    fn key_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

struct OutColumn {
    name: String,
    value: Option<String>,
    data_type: DataType,
}

/// Fields echoed back in every response.
struct Echo {
    db: String,
    table: String,
    operation_id: Option<String>,
}

fn bad_request(err: CodecError) -> NativeStatus {
    status!(http::BAD_REQUEST, "{err}")
}

/// Engine backed by process memory.
///
/// Starts connected. While disconnected every call fails with a retriable
/// `503`.
#[derive(Default)]
pub struct MemoryEngine {
    tables: RwLock<HashMap<(String, String), Table>>,
    api_keys: RwLock<HashMap<String, StoredApiKey>>,
    user_databases: RwLock<HashMap<u64, Vec<String>>>,
    connect_string: RwLock<Option<String>>,
    state: AtomicU8,
    reads: AtomicU32,
    reconnects: AtomicU32,
    api_key_lookups: AtomicU32,
}

impl MemoryEngine {
    /// Create an empty, connected engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table, replacing any table of the same name
    pub fn create_table(&self, db: &str, table: &str, columns: Vec<ColumnDef>) {
        self.tables.write().insert(
            (db.to_string(), table.to_string()),
            Table {
                columns,
                rows: HashMap::new(),
            },
        );
    }

    /// Insert or replace a row.
    ///
    /// `key` holds the key values in key column order; `values` may name
    /// any non-key column, `None` being SQL NULL.
    pub fn insert_row(
        &self,
        db: &str,
        table: &str,
        key: &[&str],
        values: &[(&str, Option<&str>)],
    ) -> Result<(), NativeStatus> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&(db.to_string(), table.to_string()))
            .ok_or_else(|| status!(http::BAD_REQUEST, "Table does not exist"))?;

        if key.len() != table.key_columns().count() {
            return Err(status!(
                http::BAD_REQUEST,
                "Wrong number of primary key columns. Expected: {}",
                table.key_columns().count()
            ));
        }
        let mut row = Row::new();
        for (name, value) in values {
            match table.column(name) {
                Some(col) if !col.primary_key => {
                    row.insert(name.to_string(), value.map(str::to_string));
                }
                _ => return Err(status!(http::BAD_REQUEST, "Column does not exist: {name}")),
            }
        }
        let key = key.iter().map(|k| k.as_bytes().to_vec()).collect();
        table.rows.insert(key, row);
        Ok(())
    }

    /// Register an API key whose secret hashes with `salt`
    pub fn add_api_key(&self, prefix: &str, secret: &str, salt: &str, user_id: u64) {
        self.api_keys.write().insert(
            prefix.to_string(),
            StoredApiKey {
                secret: hash_secret(secret, salt),
                salt: salt.to_string(),
                name: format!("key-{prefix}"),
                user_id,
            },
        );
    }

    /// Allow `user_id` to read `db`
    pub fn grant(&self, user_id: u64, db: &str) {
        let mut users = self.user_databases.write();
        let dbs = users.entry(user_id).or_default();
        if !dbs.iter().any(|d| d == db) {
            dbs.push(db.to_string());
        }
    }

    /// Withdraw every grant of `user_id`
    pub fn revoke_all(&self, user_id: u64) {
        self.user_databases.write().remove(&user_id);
    }

    /// Number of PK reads served, batched operations included
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of completed `reconnect` calls
    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Number of API key lookups served
    pub fn api_key_lookups(&self) -> u32 {
        self.api_key_lookups.load(Ordering::Relaxed)
    }

    /// Connect string of the last `connect`
    pub fn connect_string(&self) -> Option<String> {
        self.connect_string.read().clone()
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn ensure_connected(&self) -> Result<(), NativeStatus> {
        match self.connection_state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Connecting => Err(status!(
                http::SERVICE_UNAVAILABLE,
                "reconnection in progress"
            )),
            ConnectionState::Disconnected => Err(status!(
                http::SERVICE_UNAVAILABLE,
                "not connected to the cluster"
            )),
        }
    }

    /// Answer one request buffer into one response buffer and return the
    /// operation status.
    ///
    /// An unknown database or table fails a single read with `404` before
    /// any response is written. Inside a batch the sub-operation is answered
    /// with a `400` response instead and the rest of the batch proceeds.
    fn serve(&self, request: &mut [u8], response: &mut [u8], in_batch: bool) -> NativeStatus {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let outcome = PkReadRequestView::new(request)
            .map_err(bad_request)
            .and_then(|mut view| {
                let echo = Echo {
                    db: view.database().map_err(bad_request)?.to_owned(),
                    table: view.table().map_err(bad_request)?.to_owned(),
                    operation_id: view
                        .operation_id()
                        .map_err(bad_request)?
                        .map(str::to_owned),
                };
                let columns = self.lookup(&echo, &mut view);
                Ok((echo, columns))
            });

        let (echo, columns) = match outcome {
            Ok(found) => found,
            Err(status) => return finish(response, None, status, Vec::new()),
        };
        match columns {
            Ok(columns) => finish(response, Some(&echo), NativeStatus::ok(), columns),
            Err(Miss::Table(status)) if in_batch => {
                let status = NativeStatus::new(http::BAD_REQUEST, status.message);
                finish(response, Some(&echo), status, Vec::new())
            }
            Err(Miss::Table(status)) => status,
            Err(Miss::Other(status)) => finish(response, Some(&echo), status, Vec::new()),
        }
    }

    fn lookup(
        &self,
        echo: &Echo,
        view: &mut PkReadRequestView<'_>,
    ) -> Result<Vec<OutColumn>, Miss> {
        let tables = self.tables.read();
        let table = tables
            .get(&(echo.db.clone(), echo.table.clone()))
            .ok_or_else(|| {
                Miss::Table(status!(
                    http::NOT_FOUND,
                    "Database/Table does not exist. Database: {} Table: {}",
                    echo.db,
                    echo.table
                ))
            })?;
        self.lookup_row(table, view).map_err(Miss::Other)
    }

    fn lookup_row(
        &self,
        table: &Table,
        view: &mut PkReadRequestView<'_>,
    ) -> Result<Vec<OutColumn>, NativeStatus> {
        let key_columns: Vec<&ColumnDef> = table.key_columns().collect();
        let pk_count = view.pk_count().map_err(bad_request)?;
        if pk_count as usize != key_columns.len() {
            return Err(status!(
                http::BAD_REQUEST,
                "Wrong number of primary key columns. Expected: {}, Got: {pk_count}",
                key_columns.len()
            ));
        }

        let mut key = vec![Vec::new(); key_columns.len()];
        for i in 0..pk_count {
            let name = view.pk_name(i).map_err(bad_request)?.to_owned();
            let (pos, col) = key_columns
                .iter()
                .enumerate()
                .find(|(_, c)| c.name == name)
                .ok_or_else(|| {
                    status!(http::BAD_REQUEST, "Column does not exist or is not a primary key: {name}")
                })?;
            let prepared = view
                .prepare_ndb_value(i, col.array_type, col.size)
                .map_err(bad_request)?;
            key[pos] = prepared[col.array_type.length_bytes()..].to_vec();
        }

        let row = table
            .rows
            .get(&key)
            .ok_or_else(|| NativeStatus::new(http::NOT_FOUND, "Not Found"))?;

        let read_count = view.read_column_count().map_err(bad_request)?;
        let names: Vec<String> = if read_count == 0 {
            table
                .columns
                .iter()
                .filter(|c| !c.primary_key)
                .map(|c| c.name.clone())
                .collect()
        } else {
            let mut names = Vec::with_capacity(read_count as usize);
            for i in 0..read_count {
                let return_type = view.read_column_return_type(i).map_err(bad_request)?;
                if return_type != DataReturnType::DEFAULT_TAG {
                    return Err(status!(
                        http::BAD_REQUEST,
                        "Return data type is not supported. Data type: {return_type}"
                    ));
                }
                names.push(view.read_column_name(i).map_err(bad_request)?.to_owned());
            }
            names
        };

        names
            .into_iter()
            .map(|name| {
                let col = table
                    .column(&name)
                    .filter(|c| !c.primary_key)
                    .ok_or_else(|| status!(http::BAD_REQUEST, "Column does not exist: {name}"))?;
                let value = row.get(&name).cloned().flatten().map(|v| {
                    if col.data_type.is_numeric() {
                        v
                    } else {
                        escape_json_string(&v)
                    }
                });
                Ok(OutColumn {
                    name,
                    value,
                    data_type: col.data_type,
                })
            })
            .collect()
    }
}

/// Why a lookup produced no columns.
enum Miss {
    /// The database or table does not exist.
    Table(NativeStatus),
    /// Any other failure, including a missing row.
    Other(NativeStatus),
}

/// Write the response for `status` and return the status to report. A
/// response that does not fit the buffer turns into a `500`.
fn finish(
    response: &mut [u8],
    echo: Option<&Echo>,
    status: NativeStatus,
    columns: Vec<OutColumn>,
) -> NativeStatus {
    match write_response(response, echo, status.code, &columns) {
        Ok(_) => status,
        Err(err) => {
            warn!(code = status.code, error = %err, "failed to write response");
            status!(http::INTERNAL_SERVER_ERROR, "failed to write response. {err}")
        }
    }
}

fn write_response(
    buf: &mut [u8],
    echo: Option<&Echo>,
    code: i32,
    columns: &[OutColumn],
) -> Result<u32, CodecError> {
    let mut w = PkReadResponseWriter::new(buf)?;
    w.set_status(code)?;
    if let Some(echo) = echo {
        w.set_db(&echo.db)?;
        w.set_table(&echo.table)?;
        w.set_operation_id(echo.operation_id.as_deref())?;
    }
    if code == http::OK {
        w.set_column_count(columns.len() as u32)?;
        for col in columns {
            w.append_column(&col.name, col.value.as_deref(), col.data_type)?;
        }
    }
    w.close()
}

impl NativeEngine for MemoryEngine {
    fn connect(&self, config: &RonDbConfig) -> Result<(), NativeStatus> {
        *self.connect_string.write() = Some(config.connect_string.clone());
        self.set_state(ConnectionState::Connected);
        info!(connect_string = %config.connect_string, "memory engine connected");
        Ok(())
    }

    fn disconnect(&self) -> Result<(), NativeStatus> {
        self.set_state(ConnectionState::Disconnected);
        info!("memory engine disconnected");
        Ok(())
    }

    fn reconnect(&self) -> Result<(), NativeStatus> {
        self.set_state(ConnectionState::Connecting);
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectionState::Connected);
        info!("memory engine reconnected");
        Ok(())
    }

    fn pk_read(
        &self,
        request: &mut NativeBuffer,
        response: &mut NativeBuffer,
    ) -> Result<(), NativeStatus> {
        self.ensure_connected()?;
        let status = self.serve(request.as_bytes_mut(), response.as_bytes_mut(), false);
        if status.is_ok() {
            Ok(())
        } else {
            Err(status)
        }
    }

    fn pk_batch_read(
        &self,
        requests: &mut [PooledBuffer],
        responses: &mut [PooledBuffer],
    ) -> Result<(), NativeStatus> {
        self.ensure_connected()?;
        if requests.len() != responses.len() {
            return Err(status!(
                http::BAD_REQUEST,
                "request and response counts differ: {} != {}",
                requests.len(),
                responses.len()
            ));
        }
        for (request, response) in requests.iter_mut().zip(responses.iter_mut()) {
            let status = self.serve(request.as_bytes_mut(), response.as_bytes_mut(), true);
            if tracing::enabled!(tracing::Level::DEBUG) && !status.is_ok() {
                debug!(code = status.code, message = %status.message, "batch operation failed");
            }
        }
        Ok(())
    }

    fn stats(&self) -> Result<EngineStats, NativeStatus> {
        let state = self.connection_state();
        Ok(EngineStats {
            connection_state: state,
            is_shutdown: state == ConnectionState::Disconnected,
            is_reconnection_in_progress: state == ConnectionState::Connecting,
            ..EngineStats::default()
        })
    }
}

impl CredentialStore for MemoryEngine {
    fn api_key(&self, prefix: &str) -> Result<StoredApiKey, NativeStatus> {
        self.ensure_connected()?;
        self.api_key_lookups.fetch_add(1, Ordering::Relaxed);
        self.api_keys
            .read()
            .get(prefix)
            .cloned()
            .ok_or_else(|| NativeStatus::new(http::NOT_FOUND, "API key not found"))
    }

    fn user_databases(&self, user_id: u64) -> Result<Vec<String>, NativeStatus> {
        self.ensure_connected()?;
        Ok(self
            .user_databases
            .read()
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("tables", &self.tables.read().len())
            .field("state", &self.connection_state())
            .field("reads", &self.reads())
            .finish()
    }
}
