//! Let an executable register, unregister and run itself as an OS-managed
//! service, and query, start or stop other services.
//!
//! All OS access goes through a [`ServicePort`]: [`NativePort`] talks to the
//! Windows Service Control Manager, [`MemoryPort`] is an in-memory service
//! database for tests and dry runs.
//!
//! ```no_run
//! use selfserviced::{
//!     CallbacksBuilder, ServiceAccount, ServiceDescriptor, SingleSelfService, native_port,
//! };
//!
//! fn main() -> Result<(), selfserviced::ServiceError> {
//!     let single = SingleSelfService::new(native_port()?);
//!     if std::env::args().any(|a| a == "--service") {
//!         return single.execute_as_service(CallbacksBuilder::default().on_start(|| {}).on_stop(|| {}));
//!     }
//!     let descriptor = ServiceDescriptor::new("svc1").display_name("Service One");
//!     single.install(&descriptor, ServiceAccount::LocalService, None, Some("--service"))
//! }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod host;
pub mod port;
pub mod process;
pub mod registrar;
pub mod service;

pub use config::{ConfigError, ControlConfig, ServiceFile};
pub use control::ServiceController;
pub use error::{OsCode, ServiceError};
pub use host::{CallbacksBuilder, Capabilities, DispatchEntry, PowerEvent, ServiceCallbacks, ServiceHost};
#[cfg(target_os = "windows")]
pub use port::NativePort;
pub use port::{MemoryPort, RuntimeStatus, ScopedHandle, ServicePort, native_port};
pub use process::{SelfServiceProcess, SingleSelfService};
pub use service::{
    Credentials, ServiceAccount, ServiceDescriptor, ServiceType, StartMode, validate_service_name,
};
