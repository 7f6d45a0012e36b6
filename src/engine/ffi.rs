//! Binding to the native data-access library.
//!
//! This is the only module that crosses into foreign code. Buffers are
//! passed as `(size, base pointer)` pairs that stay borrowed for the
//! duration of each call.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};
use std::ptr;
use std::sync::OnceLock;

use tracing::{info, warn};

use crate::auth::{CredentialStore, StoredApiKey};
use crate::buffer_pool::{NativeBuffer, PooledBuffer};
use crate::engine::{init_once, ConnectionState, EngineStats, NativeEngine, RonDbConfig};
use crate::status::{http, NativeStatus};

const STATUS_MSG_LEN: usize = 256;
const STATUS_FILE_NAME_LEN: usize = 256;

#[repr(C)]
struct RsStatus {
    http_code: c_int,
    status: c_int,
    classification: c_int,
    code: c_int,
    mysql_code: c_int,
    message: [c_char; STATUS_MSG_LEN],
    err_line_no: c_int,
    err_file_name: [c_char; STATUS_FILE_NAME_LEN],
}

#[repr(C)]
struct RsBuffer {
    size: c_uint,
    buffer: *mut c_char,
}

#[repr(C)]
struct RonDbStats {
    ndb_objects_created: c_uint,
    ndb_objects_deleted: c_uint,
    ndb_objects_count: c_uint,
    ndb_objects_available: c_uint,
    connection_state: c_int,
    is_shutdown: u8,
    is_reconnection_in_progress: u8,
}

#[repr(C)]
struct HopsworksApiKey {
    secret: [c_char; 513],
    salt: [c_char; 257],
    name: [c_char; 46],
    user_id: c_int,
}

#[link(name = "rdrclient")]
extern "C" {
    fn init() -> RsStatus;
    fn add_data_connection(
        connection_string: *const c_char,
        connection_pool_size: c_uint,
        node_ids: *mut c_uint,
        node_ids_len: c_uint,
        connection_retries: c_uint,
        connection_retry_delay_in_sec: c_uint,
    ) -> RsStatus;
    fn set_op_retry_props_data_cluster(
        retry_count: c_uint,
        retry_initial_delay: c_uint,
        jitter: c_uint,
    ) -> RsStatus;
    fn shutdown_connection() -> RsStatus;
    fn reconnect() -> RsStatus;
    fn pk_read(request: *mut RsBuffer, response: *mut RsBuffer) -> RsStatus;
    fn pk_batch_read(count: c_uint, requests: *mut RsBuffer, responses: *mut RsBuffer) -> RsStatus;
    fn get_rondb_stats(stats: *mut RonDbStats) -> RsStatus;
    fn find_api_key(prefix: *const c_char, api_key: *mut HopsworksApiKey) -> RsStatus;
    fn find_all_projects(uid: c_int, projects: *mut *mut *mut c_char, count: *mut c_int) -> RsStatus;
}

extern "C" {
    fn free(ptr: *mut c_void);
}

fn c_string(chars: &[c_char]) -> String {
    // SAFETY: c_char and u8 have the same layout.
    let bytes: &[u8] = unsafe { &*(chars as *const [c_char] as *const [u8]) };
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl RsStatus {
    fn into_result(self) -> Result<(), NativeStatus> {
        if self.http_code == http::OK {
            return Ok(());
        }
        Err(NativeStatus::new(self.http_code, c_string(&self.message))
            .with_location(c_string(&self.err_file_name), self.err_line_no.max(0) as u32))
    }
}

fn rs_buffer(buffer: &mut NativeBuffer) -> RsBuffer {
    RsBuffer {
        size: buffer.capacity(),
        buffer: buffer.as_mut_ptr().cast(),
    }
}

fn invalid_argument(message: &str) -> NativeStatus {
    NativeStatus::new(http::BAD_REQUEST, message).with_location(file!(), line!())
}

fn secs(d: std::time::Duration) -> c_uint {
    d.as_secs().min(c_uint::MAX as u64) as c_uint
}

fn millis(d: std::time::Duration) -> c_uint {
    d.as_millis().min(c_uint::MAX as u128) as c_uint
}

/// Engine backed by the native data-access library.
#[derive(Debug, Default)]
pub struct RonDbEngine {
    _private: (),
}

static INIT: OnceLock<Result<(), NativeStatus>> = OnceLock::new();

impl RonDbEngine {
    /// Create an engine handle. The library is initialised on first connect.
    pub fn new() -> Self {
        Self::default()
    }
}

impl NativeEngine for RonDbEngine {
    fn connect(&self, config: &RonDbConfig) -> Result<(), NativeStatus> {
        // SAFETY: no arguments; runs at most once per process.
        init_once(&INIT, || unsafe { init() }.into_result())?;

        let connect_string = CString::new(config.connect_string.as_str())
            .map_err(|_| invalid_argument("connect string contains a NUL byte"))?;
        // SAFETY: the string outlives the call and no node ids are passed.
        unsafe {
            add_data_connection(
                connect_string.as_ptr(),
                1,
                ptr::null_mut(),
                0,
                config.connection_retries,
                secs(config.connection_retry_delay),
            )
        }
        .into_result()?;

        // SAFETY: plain integer arguments.
        unsafe {
            set_op_retry_props_data_cluster(
                config.op_retry_count,
                millis(config.op_retry_initial_delay),
                millis(config.op_retry_jitter),
            )
        }
        .into_result()?;

        info!(connect_string = %config.connect_string, "connected to data cluster");
        Ok(())
    }

    fn disconnect(&self) -> Result<(), NativeStatus> {
        // SAFETY: no arguments.
        unsafe { shutdown_connection() }.into_result()
    }

    fn reconnect(&self) -> Result<(), NativeStatus> {
        warn!("reconnecting to data cluster");
        // SAFETY: no arguments.
        unsafe { reconnect() }.into_result()
    }

    fn pk_read(
        &self,
        request: &mut NativeBuffer,
        response: &mut NativeBuffer,
    ) -> Result<(), NativeStatus> {
        let mut req = rs_buffer(request);
        let mut resp = rs_buffer(response);
        // SAFETY: both descriptors point at live, exclusively borrowed
        // buffers of the recorded size.
        unsafe { pk_read(&mut req, &mut resp) }.into_result()
    }

    fn pk_batch_read(
        &self,
        requests: &mut [PooledBuffer],
        responses: &mut [PooledBuffer],
    ) -> Result<(), NativeStatus> {
        if requests.len() != responses.len() {
            return Err(invalid_argument("request and response counts differ"));
        }
        let count = c_uint::try_from(requests.len())
            .map_err(|_| invalid_argument("too many operations"))?;
        let mut reqs: Vec<RsBuffer> = requests.iter_mut().map(|b| rs_buffer(b)).collect();
        let mut resps: Vec<RsBuffer> = responses.iter_mut().map(|b| rs_buffer(b)).collect();
        // SAFETY: both arrays hold `count` descriptors of live buffers that
        // stay exclusively borrowed until the call returns.
        unsafe { pk_batch_read(count, reqs.as_mut_ptr(), resps.as_mut_ptr()) }.into_result()
    }

    fn stats(&self) -> Result<EngineStats, NativeStatus> {
        let mut raw = RonDbStats {
            ndb_objects_created: 0,
            ndb_objects_deleted: 0,
            ndb_objects_count: 0,
            ndb_objects_available: 0,
            connection_state: ConnectionState::Disconnected as c_int,
            is_shutdown: 0,
            is_reconnection_in_progress: 0,
        };
        // SAFETY: `raw` is a valid out parameter.
        unsafe { get_rondb_stats(&mut raw) }.into_result()?;
        Ok(EngineStats {
            objects_created: raw.ndb_objects_created,
            objects_deleted: raw.ndb_objects_deleted,
            objects_count: raw.ndb_objects_count,
            objects_available: raw.ndb_objects_available,
            connection_state: ConnectionState::from_u8(raw.connection_state as u8),
            is_shutdown: raw.is_shutdown != 0,
            is_reconnection_in_progress: raw.is_reconnection_in_progress != 0,
        })
    }
}

impl CredentialStore for RonDbEngine {
    fn api_key(&self, prefix: &str) -> Result<StoredApiKey, NativeStatus> {
        let prefix =
            CString::new(prefix).map_err(|_| invalid_argument("api key contains a NUL byte"))?;
        let mut raw = HopsworksApiKey {
            secret: [0; 513],
            salt: [0; 257],
            name: [0; 46],
            user_id: 0,
        };
        // SAFETY: `prefix` is NUL-terminated and `raw` is a valid out parameter.
        unsafe { find_api_key(prefix.as_ptr(), &mut raw) }.into_result()?;
        Ok(StoredApiKey {
            secret: c_string(&raw.secret),
            salt: c_string(&raw.salt),
            name: c_string(&raw.name),
            user_id: raw.user_id.max(0) as u64,
        })
    }

    fn user_databases(&self, user_id: u64) -> Result<Vec<String>, NativeStatus> {
        let uid = c_int::try_from(user_id).map_err(|_| invalid_argument("user id out of range"))?;
        let mut projects: *mut *mut c_char = ptr::null_mut();
        let mut count: c_int = 0;
        // SAFETY: both are valid out parameters.
        unsafe { find_all_projects(uid, &mut projects, &mut count) }.into_result()?;

        let mut dbs = Vec::with_capacity(count.max(0) as usize);
        if projects.is_null() {
            return Ok(dbs);
        }
        for i in 0..count.max(0) as usize {
            // SAFETY: the library returns `count` malloc'ed NUL-terminated
            // strings in a malloc'ed array; each is freed once here.
            unsafe {
                let name = *projects.add(i);
                if !name.is_null() {
                    dbs.push(CStr::from_ptr(name).to_string_lossy().into_owned());
                    free(name.cast());
                }
            }
        }
        // SAFETY: the array itself was malloc'ed by the library.
        unsafe { free(projects.cast()) };
        Ok(dbs)
    }
}
