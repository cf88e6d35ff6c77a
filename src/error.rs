//! Error taxonomy for service registration and control.
//!
//! The OS port reports bare [`OsCode`] values. The registrar and orchestration
//! layers translate them into [`ServiceError`] variants so callers can tell a
//! name collision apart from a privilege problem without decoding numbers.

use std::fmt;

use thiserror::Error;

/// The specified service does not exist as an installed service.
pub(crate) const ERROR_SERVICE_DOES_NOT_EXIST: u32 = 1060;
/// The specified service already exists.
pub(crate) const ERROR_SERVICE_EXISTS: u32 = 1073;
/// The name is already in use as either a service name or a service display name.
pub(crate) const ERROR_DUPLICATE_SERVICE_NAME: u32 = 1078;
/// The specified service has been marked for deletion.
pub(crate) const ERROR_SERVICE_MARKED_FOR_DELETE: u32 = 1072;

/// Raw platform error number as reported by the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsCode(pub u32);

impl OsCode {
    #[inline]
    pub fn code(self) -> u32 {
        self.0
    }
}

impl fmt::Display for OsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "os error {} (0x{:08X})", self.0, self.0)
    }
}

/// Errors surfaced by install, uninstall and dispatch operations.
///
/// `start`/`stop` never produce these; they degrade to a boolean outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("the service name \"{0}\" is not acceptable")]
    InvalidServiceName(String),

    #[error("the service display name is too long ({0} characters); maximum length is 255 characters")]
    DisplayNameTooLong(usize),

    #[error("failed to open the service database: {0}")]
    DatabaseUnavailable(OsCode),

    #[error("failed to create service: {0}")]
    CreateFailed(OsCode),

    #[error("failed to set service description: {0}")]
    ConfigureFailed(OsCode),

    #[error("the service \"{0}\" does not exist as an installed service")]
    ServiceNotFound(String),

    #[error("a service with the name or display name \"{0}\" already exists")]
    ServiceAlreadyExists(String),

    #[error("unsupported account configuration: {0}")]
    UnsupportedAccount(String),

    #[error("could not retrieve the current executable path")]
    EntryPathUnavailable,

    #[error("a start handler is required to run as a service")]
    MissingStartHandler,

    #[error("there are no services defined")]
    NoServicesDefined,

    #[error("failed to delete service: {0}")]
    DeleteFailed(OsCode),

    #[error("failed to connect to the service control dispatcher: {0}")]
    DispatcherFailed(OsCode),

    #[error("service management is not supported on this platform")]
    Unsupported,
}

impl ServiceError {
    /// Map a failed record creation onto the taxonomy.
    pub(crate) fn from_create(name: &str, code: OsCode) -> Self {
        match code.0 {
            ERROR_SERVICE_EXISTS | ERROR_DUPLICATE_SERVICE_NAME => {
                ServiceError::ServiceAlreadyExists(name.to_string())
            }
            _ => ServiceError::CreateFailed(code),
        }
    }

    /// Map a failed record open (for deletion) onto the taxonomy.
    pub(crate) fn from_open(name: &str, code: OsCode) -> Self {
        match code.0 {
            ERROR_SERVICE_DOES_NOT_EXIST => ServiceError::ServiceNotFound(name.to_string()),
            _ => ServiceError::DeleteFailed(code),
        }
    }

    /// True for errors detected before any OS call was made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ServiceError::InvalidServiceName(_)
                | ServiceError::DisplayNameTooLong(_)
                | ServiceError::UnsupportedAccount(_)
                | ServiceError::MissingStartHandler
                | ServiceError::NoServicesDefined
        )
    }
}
