//! The narrow OS surface every service operation goes through.
//!
//! Nothing outside this module tree calls the platform directly. The core
//! talks to a [`ServicePort`]; production code uses [`NativePort`] (Windows
//! only), tests and dry runs use [`MemoryPort`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::debug;

use crate::error::{OsCode, ServiceError};
use crate::host::DispatchEntry;
use crate::service::{ServiceType, StartMode};

pub mod memory;

cfg_if::cfg_if! {
    if #[cfg(target_os = "windows")] {
        mod scm;
        pub use self::scm::NativePort;
    }
}

pub use memory::MemoryPort;

/// The production port for this platform.
pub fn native_port() -> Result<Arc<dyn ServicePort>, ServiceError> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "windows")] {
            Ok(Arc::new(NativePort::new()))
        } else {
            Err(ServiceError::Unsupported)
        }
    }
}

/// Opaque capability for an open database or record handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub usize);

/// Live runtime status of an installed service. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeStatus {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
}

impl RuntimeStatus {
    /// Decode the service manager's `dwCurrentState` value.
    pub fn from_raw(state: u32) -> Option<Self> {
        Some(match state {
            1 => RuntimeStatus::Stopped,
            2 => RuntimeStatus::StartPending,
            3 => RuntimeStatus::StopPending,
            4 => RuntimeStatus::Running,
            5 => RuntimeStatus::ContinuePending,
            6 => RuntimeStatus::PausePending,
            7 => RuntimeStatus::Paused,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> u32 {
        match self {
            RuntimeStatus::Stopped => 1,
            RuntimeStatus::StartPending => 2,
            RuntimeStatus::StopPending => 3,
            RuntimeStatus::Running => 4,
            RuntimeStatus::ContinuePending => 5,
            RuntimeStatus::PausePending => 6,
            RuntimeStatus::Paused => 7,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(
            self,
            RuntimeStatus::StartPending
                | RuntimeStatus::StopPending
                | RuntimeStatus::ContinuePending
                | RuntimeStatus::PausePending
        )
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeStatus::Stopped => "stopped",
            RuntimeStatus::StartPending => "start pending",
            RuntimeStatus::StopPending => "stop pending",
            RuntimeStatus::Running => "running",
            RuntimeStatus::ContinuePending => "continue pending",
            RuntimeStatus::PausePending => "pause pending",
            RuntimeStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Everything the service manager needs to create one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest<'a> {
    pub name: &'a str,
    pub display_name: &'a str,
    pub service_type: ServiceType,
    pub start_mode: StartMode,
    pub binary_path: &'a str,
    /// Null-separated, double-null-terminated list, or `None` for no dependencies.
    pub dependencies: Option<&'a str>,
    /// `None` runs the service as LocalSystem.
    pub account_name: Option<&'a str>,
    pub password: Option<&'a str>,
}

/// Capability object over the local service database and control dispatcher.
///
/// Every method maps onto one platform call. Handles returned here must be
/// released through [`ServicePort::close_handle`]; use [`ScopedHandle`].
pub trait ServicePort: Send + Sync {
    /// Open the local service database with full access.
    fn open_database(&self) -> Result<RawHandle, OsCode>;

    /// Release a database or record handle.
    fn close_handle(&self, handle: RawHandle);

    fn create_service(&self, db: RawHandle, request: &CreateRequest<'_>) -> Result<RawHandle, OsCode>;

    fn set_description(&self, record: RawHandle, description: &str) -> Result<(), OsCode>;

    fn open_service(&self, db: RawHandle, name: &str) -> Result<RawHandle, OsCode>;

    /// Mark a record for deletion. Removal completes once every handle is closed.
    fn delete_service(&self, record: RawHandle) -> Result<(), OsCode>;

    fn query_status(&self, record: RawHandle) -> Result<RuntimeStatus, OsCode>;

    fn start_service(&self, record: RawHandle) -> Result<(), OsCode>;

    fn stop_service(&self, record: RawHandle) -> Result<(), OsCode>;

    /// Canonical key name for a key name or display name, if it resolves to a live service.
    fn resolve_key_name(&self, db: RawHandle, name: &str) -> Option<String>;

    /// Path of the executable of the current process.
    fn current_exe(&self) -> Option<PathBuf>;

    /// Hand the calling thread to the control dispatcher. Returns once every
    /// registered service has stopped, or immediately on failure.
    fn run_dispatcher(&self, entries: Vec<DispatchEntry>) -> Result<(), OsCode>;

    /// Stop a service hosted by this process's dispatcher from within.
    fn stop_self(&self, name: &str) -> Result<(), OsCode>;
}

/// A handle that is released exactly once, on drop.
pub struct ScopedHandle<'p> {
    port: &'p dyn ServicePort,
    raw: RawHandle,
}

impl<'p> ScopedHandle<'p> {
    /// Open the service database.
    pub fn database(port: &'p dyn ServicePort) -> Result<Self, OsCode> {
        let raw = port.open_database()?;
        debug!("opened service database handle {:?}", raw);
        Ok(Self { port, raw })
    }

    /// Open an existing record by name.
    pub fn service(port: &'p dyn ServicePort, db: &ScopedHandle<'_>, name: &str) -> Result<Self, OsCode> {
        let raw = port.open_service(db.raw(), name)?;
        debug!("opened service '{}' handle {:?}", name, raw);
        Ok(Self { port, raw })
    }

    /// Take ownership of a handle produced by another port call.
    pub fn adopt(port: &'p dyn ServicePort, raw: RawHandle) -> Self {
        Self { port, raw }
    }

    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.raw
    }
}

impl Drop for ScopedHandle<'_> {
    #[inline]
    fn drop(&mut self) {
        debug!("closing handle {:?}", self.raw);
        self.port.close_handle(self.raw);
    }
}
