//! In-memory service database.
//!
//! Behaves like the service manager closely enough to exercise the
//! registration and control logic deterministically: name collisions,
//! deferred deletion, pending states that settle after a number of status
//! queries, and handle accounting for leak checks. Faults can be injected
//! per operation.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use log::debug;

use super::{CreateRequest, RawHandle, RuntimeStatus, ServicePort};
use crate::error::{
    ERROR_DUPLICATE_SERVICE_NAME, ERROR_SERVICE_DOES_NOT_EXIST, ERROR_SERVICE_EXISTS,
    ERROR_SERVICE_MARKED_FOR_DELETE, OsCode,
};
use crate::host::DispatchEntry;
use crate::service::{ServiceType, StartMode};

const ERROR_INVALID_HANDLE: u32 = 6;
const ERROR_SERVICE_ALREADY_RUNNING: u32 = 1056;
const ERROR_SERVICE_DISABLED: u32 = 1058;
const ERROR_SERVICE_NOT_ACTIVE: u32 = 1062;

const DEFAULT_EXE: &str = r"C:\Program Files\selfserviced\selfserviced.exe";

/// Snapshot of one record in the in-memory database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRecord {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub service_type: ServiceType,
    pub start_mode: StartMode,
    pub binary_path: String,
    pub dependencies: Option<String>,
    pub account_name: Option<String>,
    pub password: Option<String>,
    pub status: RuntimeStatus,
    pub marked_for_delete: bool,
    pending_queries: u32,
    stuck: bool,
}

impl MemoryRecord {
    fn new(request: &CreateRequest<'_>) -> Self {
        Self {
            name: request.name.to_string(),
            display_name: request.display_name.to_string(),
            description: None,
            service_type: request.service_type,
            start_mode: request.start_mode,
            binary_path: request.binary_path.to_string(),
            dependencies: request.dependencies.map(str::to_string),
            account_name: request.account_name.map(str::to_string),
            password: request.password.map(str::to_string),
            status: RuntimeStatus::Stopped,
            marked_for_delete: false,
            pending_queries: 0,
            stuck: false,
        }
    }

    fn settle(&mut self) {
        self.status = match self.status {
            RuntimeStatus::StartPending | RuntimeStatus::ContinuePending => RuntimeStatus::Running,
            RuntimeStatus::StopPending => RuntimeStatus::Stopped,
            RuntimeStatus::PausePending => RuntimeStatus::Paused,
            settled => settled,
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HandleKind {
    Database,
    Record(String),
}

#[derive(Default)]
struct State {
    next_handle: usize,
    handles: HashMap<usize, HandleKind>,
    records: BTreeMap<String, MemoryRecord>,
    database_opens: usize,
    settle_queries: u32,
    current_exe: Option<PathBuf>,
    deny_database: Option<OsCode>,
    fail_description: Option<OsCode>,
    fail_delete: Option<OsCode>,
    fail_dispatcher: Option<OsCode>,
    dispatched: Vec<DispatchEntry>,
    /// Dispatch entry name (lowercased) to the record key it runs as.
    bound: HashMap<String, String>,
    self_stops: Vec<String>,
    calls: Vec<String>,
}

impl State {
    fn issue(&mut self, kind: HandleKind) -> RawHandle {
        self.next_handle += 1;
        self.handles.insert(self.next_handle, kind);
        RawHandle(self.next_handle)
    }

    fn record_key(&self, handle: RawHandle) -> Result<String, OsCode> {
        match self.handles.get(&handle.0) {
            Some(HandleKind::Record(key)) => Ok(key.clone()),
            _ => Err(OsCode(ERROR_INVALID_HANDLE)),
        }
    }

    fn record_mut(&mut self, handle: RawHandle) -> Result<&mut MemoryRecord, OsCode> {
        let key = self.record_key(handle)?;
        self.records
            .get_mut(&key)
            .ok_or(OsCode(ERROR_SERVICE_DOES_NOT_EXIST))
    }

    fn ensure_database(&self, handle: RawHandle) -> Result<(), OsCode> {
        match self.handles.get(&handle.0) {
            Some(HandleKind::Database) => Ok(()),
            _ => Err(OsCode(ERROR_INVALID_HANDLE)),
        }
    }

    fn log_call(&mut self, op: &str, handle: RawHandle) {
        let key = self.record_key(handle).unwrap_or_default();
        self.calls.push(format!("{op} {key}"));
    }

    /// Record a dispatch entry runs as: its own name, or for a lone entry
    /// the single own-process record whose command line launches `exe`.
    fn bind(&self, entry: &DispatchEntry, lone: bool) -> Option<String> {
        let key = entry.name().to_lowercase();
        if self.records.contains_key(&key) {
            return Some(key);
        }
        if !lone {
            return None;
        }
        let exe = self.current_exe.as_ref()?;
        let launch = format!("\"{}\"", exe.display());
        let mut candidates = self.records.iter().filter(|(_, r)| {
            r.service_type == ServiceType::OwnProcess && r.binary_path.starts_with(&launch)
        });
        match (candidates.next(), candidates.next()) {
            (Some((key, _)), None) => Some(key.clone()),
            _ => None,
        }
    }

    fn key_for_display_name(&self, display_name: &str) -> Option<String> {
        let wanted = display_name.to_lowercase();
        self.records
            .iter()
            .find(|(_, r)| r.display_name.to_lowercase() == wanted)
            .map(|(key, _)| key.clone())
    }

    /// Drop a deleted record once nothing holds it open and it has stopped.
    fn reap(&mut self, key: &str) {
        let held = self
            .handles
            .values()
            .any(|h| matches!(h, HandleKind::Record(k) if k == key));
        let removable = self
            .records
            .get(key)
            .is_some_and(|r| r.marked_for_delete && r.status == RuntimeStatus::Stopped);
        if removable && !held {
            debug!("memory port: removing deleted service '{}'", key);
            self.records.remove(key);
        }
    }
}

/// Thread-safe fake implementation of [`ServicePort`].
pub struct MemoryPort {
    state: Mutex<State>,
}

impl Default for MemoryPort {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPort {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                settle_queries: 1,
                current_exe: Some(PathBuf::from(DEFAULT_EXE)),
                ..State::default()
            }),
        }
    }

    /// Number of status queries a pending state takes to settle. Zero settles immediately.
    pub fn with_settle_queries(self, queries: u32) -> Self {
        self.lock().settle_queries = queries;
        self
    }

    pub fn with_current_exe(self, exe: Option<PathBuf>) -> Self {
        self.lock().current_exe = exe;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a record as if another installer had created it.
    pub fn add_existing(&self, name: &str, display_name: &str) {
        let request = CreateRequest {
            name,
            display_name,
            service_type: ServiceType::OwnProcess,
            start_mode: StartMode::Manual,
            binary_path: r"C:\Windows\System32\svchost.exe",
            dependencies: None,
            account_name: None,
            password: None,
        };
        self.lock()
            .records
            .insert(name.to_lowercase(), MemoryRecord::new(&request));
    }

    pub fn deny_database(&self, code: Option<OsCode>) {
        self.lock().deny_database = code;
    }

    pub fn fail_description(&self, code: Option<OsCode>) {
        self.lock().fail_description = code;
    }

    pub fn fail_delete(&self, code: Option<OsCode>) {
        self.lock().fail_delete = code;
    }

    pub fn fail_dispatcher(&self, code: Option<OsCode>) {
        self.lock().fail_dispatcher = code;
    }

    /// Keep a service's pending states from ever settling.
    pub fn set_stuck(&self, name: &str, stuck: bool) {
        if let Some(record) = self.lock().records.get_mut(&name.to_lowercase()) {
            record.stuck = stuck;
        }
    }

    pub fn record(&self, name: &str) -> Option<MemoryRecord> {
        self.lock().records.get(&name.to_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().records.contains_key(&name.to_lowercase())
    }

    pub fn service_names(&self) -> Vec<String> {
        self.lock().records.values().map(|r| r.name.clone()).collect()
    }

    /// How many times the database has been opened.
    pub fn database_opens(&self) -> usize {
        self.lock().database_opens
    }

    /// Handles currently open. Zero after every completed operation.
    pub fn open_handles(&self) -> usize {
        self.lock().handles.len()
    }

    /// Entries passed to the most recent dispatcher run.
    pub fn dispatched(&self) -> Vec<DispatchEntry> {
        self.lock().dispatched.clone()
    }

    pub fn self_stops(&self) -> Vec<String> {
        self.lock().self_stops.clone()
    }

    /// Mutating requests received so far, oldest first, as `"<op> <key>"`
    /// with `op` one of `create`, `delete`, `start` or `stop`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }
}

impl ServicePort for MemoryPort {
    fn open_database(&self) -> Result<RawHandle, OsCode> {
        let mut state = self.lock();
        if let Some(code) = state.deny_database {
            return Err(code);
        }
        state.database_opens += 1;
        Ok(state.issue(HandleKind::Database))
    }

    fn close_handle(&self, handle: RawHandle) {
        let mut state = self.lock();
        if let Some(HandleKind::Record(key)) = state.handles.remove(&handle.0) {
            state.reap(&key);
        }
    }

    fn create_service(&self, db: RawHandle, request: &CreateRequest<'_>) -> Result<RawHandle, OsCode> {
        let mut state = self.lock();
        state.ensure_database(db)?;

        let key = request.name.to_lowercase();
        state.calls.push(format!("create {key}"));
        if state.records.contains_key(&key) {
            return Err(OsCode(ERROR_SERVICE_EXISTS));
        }
        let display_key = request.display_name.to_lowercase();
        if state.key_for_display_name(request.display_name).is_some()
            || state.records.contains_key(&display_key)
            || state.key_for_display_name(request.name).is_some()
        {
            return Err(OsCode(ERROR_DUPLICATE_SERVICE_NAME));
        }

        state.records.insert(key.clone(), MemoryRecord::new(request));
        Ok(state.issue(HandleKind::Record(key)))
    }

    fn set_description(&self, record: RawHandle, description: &str) -> Result<(), OsCode> {
        let mut state = self.lock();
        if let Some(code) = state.fail_description {
            return Err(code);
        }
        state.record_mut(record)?.description = Some(description.to_string());
        Ok(())
    }

    fn open_service(&self, db: RawHandle, name: &str) -> Result<RawHandle, OsCode> {
        let mut state = self.lock();
        state.ensure_database(db)?;
        let key = name.to_lowercase();
        if !state.records.contains_key(&key) {
            return Err(OsCode(ERROR_SERVICE_DOES_NOT_EXIST));
        }
        Ok(state.issue(HandleKind::Record(key)))
    }

    fn delete_service(&self, record: RawHandle) -> Result<(), OsCode> {
        let mut state = self.lock();
        state.log_call("delete", record);
        if let Some(code) = state.fail_delete {
            return Err(code);
        }
        let record = state.record_mut(record)?;
        if record.marked_for_delete {
            return Err(OsCode(ERROR_SERVICE_MARKED_FOR_DELETE));
        }
        record.marked_for_delete = true;
        Ok(())
    }

    fn query_status(&self, record: RawHandle) -> Result<RuntimeStatus, OsCode> {
        let mut state = self.lock();
        let key = state.record_key(record)?;
        let rec = state.record_mut(record)?;
        if rec.status.is_pending() && !rec.stuck {
            rec.pending_queries = rec.pending_queries.saturating_sub(1);
            if rec.pending_queries == 0 {
                rec.settle();
            }
        }
        let status = rec.status;
        state.reap(&key);
        Ok(status)
    }

    fn start_service(&self, record: RawHandle) -> Result<(), OsCode> {
        let mut state = self.lock();
        state.log_call("start", record);
        let settle = state.settle_queries;
        let rec = state.record_mut(record)?;
        if rec.marked_for_delete {
            return Err(OsCode(ERROR_SERVICE_MARKED_FOR_DELETE));
        }
        if rec.start_mode == StartMode::Disabled {
            return Err(OsCode(ERROR_SERVICE_DISABLED));
        }
        if rec.status != RuntimeStatus::Stopped {
            return Err(OsCode(ERROR_SERVICE_ALREADY_RUNNING));
        }
        rec.status = RuntimeStatus::StartPending;
        rec.pending_queries = settle;
        if settle == 0 && !rec.stuck {
            rec.settle();
        }
        Ok(())
    }

    fn stop_service(&self, record: RawHandle) -> Result<(), OsCode> {
        let mut state = self.lock();
        state.log_call("stop", record);
        let settle = state.settle_queries;
        let rec = state.record_mut(record)?;
        if rec.status == RuntimeStatus::Stopped {
            return Err(OsCode(ERROR_SERVICE_NOT_ACTIVE));
        }
        rec.status = RuntimeStatus::StopPending;
        rec.pending_queries = settle;
        if settle == 0 && !rec.stuck {
            rec.settle();
        }
        Ok(())
    }

    fn resolve_key_name(&self, db: RawHandle, name: &str) -> Option<String> {
        let state = self.lock();
        state.ensure_database(db).ok()?;
        if let Some(record) = state.records.get(&name.to_lowercase()) {
            return Some(record.name.clone());
        }
        let key = state.key_for_display_name(name)?;
        state.records.get(&key).map(|r| r.name.clone())
    }

    fn current_exe(&self) -> Option<PathBuf> {
        self.lock().current_exe.clone()
    }

    fn run_dispatcher(&self, entries: Vec<DispatchEntry>) -> Result<(), OsCode> {
        {
            let mut state = self.lock();
            if let Some(code) = state.fail_dispatcher {
                return Err(code);
            }
            let lone = entries.len() == 1;
            let bound = entries
                .iter()
                .filter_map(|e| Some((e.name().to_lowercase(), state.bind(e, lone)?)))
                .collect();
            state.bound = bound;
            state.dispatched = entries.clone();
        }

        // Callbacks run without the lock held; they may call back into the port.
        for entry in &entries {
            entry.callbacks().start();
            let mut state = self.lock();
            let Some(key) = state.bound.get(&entry.name().to_lowercase()).cloned() else {
                continue;
            };
            if let Some(rec) = state.records.get_mut(&key) {
                rec.status = RuntimeStatus::Running;
            }
        }
        Ok(())
    }

    fn stop_self(&self, name: &str) -> Result<(), OsCode> {
        let entry = {
            let mut state = self.lock();
            state.self_stops.push(name.to_string());
            state
                .dispatched
                .iter()
                .find(|e| e.name().eq_ignore_ascii_case(name))
                .cloned()
        };
        let entry = entry.ok_or(OsCode(ERROR_SERVICE_NOT_ACTIVE))?;
        entry.callbacks().stop();

        let mut state = self.lock();
        let Some(key) = state.bound.get(&name.to_lowercase()).cloned() else {
            return Ok(());
        };
        if let Some(rec) = state.records.get_mut(&key) {
            rec.status = RuntimeStatus::Stopped;
        }
        state.reap(&key);
        Ok(())
    }
}
