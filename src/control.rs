//! Runtime status control of installed services.
//!
//! `start` and `stop` are advisory: every failure (missing service, access
//! denied, conflicting state, timeout) degrades to `false`.

use std::thread;
use std::time::Instant;

use log::{debug, info, warn};

use crate::config::ControlConfig;
use crate::error::OsCode;
use crate::port::{RawHandle, RuntimeStatus, ScopedHandle, ServicePort};

/// Drives the runtime status of services by name.
pub struct ServiceController<'p> {
    port: &'p dyn ServicePort,
    config: ControlConfig,
}

impl<'p> ServiceController<'p> {
    pub fn new(port: &'p dyn ServicePort, config: ControlConfig) -> Self {
        Self { port, config }
    }

    #[inline]
    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Start a service and wait for it to report running.
    ///
    /// Returns whether the final observed status is `Running`.
    pub fn start(&self, name: &str) -> bool {
        match self.drive(name, RuntimeStatus::Running) {
            Ok(true) => {
                info!("service '{}' is running", name);
                true
            }
            Ok(false) => {
                warn!("service '{}' did not reach running within {:?}", name, self.config.status_timeout);
                false
            }
            Err(code) => {
                warn!("could not start service '{}': {}", name, code);
                false
            }
        }
    }

    /// Stop a service and wait for it to report stopped.
    ///
    /// Returns whether the final observed status is `Stopped`.
    pub fn stop(&self, name: &str) -> bool {
        match self.drive(name, RuntimeStatus::Stopped) {
            Ok(true) => {
                info!("service '{}' is stopped", name);
                true
            }
            Ok(false) => {
                warn!("service '{}' did not reach stopped within {:?}", name, self.config.status_timeout);
                false
            }
            Err(code) => {
                debug!("could not stop service '{}': {}", name, code);
                false
            }
        }
    }

    /// Live status of a service, or `None` if it cannot be queried.
    pub fn status(&self, name: &str) -> Option<RuntimeStatus> {
        let db = ScopedHandle::database(self.port).ok()?;
        let record = ScopedHandle::service(self.port, &db, name).ok()?;
        self.port.query_status(record.raw()).ok()
    }

    fn drive(&self, name: &str, target: RuntimeStatus) -> Result<bool, OsCode> {
        let db = ScopedHandle::database(self.port)?;
        let record = ScopedHandle::service(self.port, &db, name)?;

        let current = self.port.query_status(record.raw())?;
        let needs_request = match target {
            RuntimeStatus::Running => {
                !matches!(current, RuntimeStatus::StartPending | RuntimeStatus::Running)
            }
            _ => current != RuntimeStatus::Stopped,
        };
        if needs_request {
            debug!("service '{}' is {}, requesting {}", name, current, target);
            match target {
                RuntimeStatus::Running => self.port.start_service(record.raw())?,
                _ => self.port.stop_service(record.raw())?,
            }
        }

        let observed = self.wait_for(record.raw(), target)?;
        Ok(observed == target)
    }

    /// Poll until `target` is observed or the status budget runs out.
    fn wait_for(&self, record: RawHandle, target: RuntimeStatus) -> Result<RuntimeStatus, OsCode> {
        let deadline = Instant::now() + self.config.status_timeout;
        loop {
            let status = self.port.query_status(record)?;
            if status == target || Instant::now() >= deadline {
                return Ok(status);
            }
            thread::sleep(self.config.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MemoryPort;

    #[test]
    fn missing_service_is_false() {
        let port = MemoryPort::new();
        let controller = ServiceController::new(&port, ControlConfig::immediate());
        assert!(!controller.start("nonexistent-service"));
        assert!(!controller.stop("nonexistent-service"));
        assert_eq!(controller.status("nonexistent-service"), None);
        assert_eq!(port.open_handles(), 0);
    }

    #[test]
    fn start_then_stop() {
        let port = MemoryPort::new().with_settle_queries(3);
        port.add_existing("svc", "svc");
        let controller = ServiceController::new(&port, ControlConfig::immediate());

        assert!(controller.start("svc"));
        assert_eq!(controller.status("svc"), Some(RuntimeStatus::Running));
        // already running: no second request, still true
        assert!(controller.start("svc"));

        assert!(controller.stop("svc"));
        assert_eq!(controller.status("svc"), Some(RuntimeStatus::Stopped));
        assert!(controller.stop("svc"));
        assert_eq!(port.open_handles(), 0);
    }

    #[test]
    fn start_pending_is_awaited_without_a_second_request() {
        let port = MemoryPort::new().with_settle_queries(3);
        port.add_existing("svc", "svc");
        {
            let db = ScopedHandle::database(&port).unwrap();
            let rec = ScopedHandle::service(&port, &db, "svc").unwrap();
            port.start_service(rec.raw()).unwrap();
        }
        let controller = ServiceController::new(&port, ControlConfig::immediate());
        assert_eq!(controller.config().status_timeout, ControlConfig::immediate().status_timeout);

        assert!(controller.start("svc"));
        assert_eq!(port.calls(), ["start svc"]);
        assert_eq!(controller.status("svc"), Some(RuntimeStatus::Running));
    }

    #[test]
    fn stuck_service_times_out() {
        let port = MemoryPort::new();
        port.add_existing("svc", "svc");
        port.set_stuck("svc", true);
        let controller = ServiceController::new(&port, ControlConfig::immediate());

        assert!(!controller.start("svc"));
        assert_eq!(controller.status("svc"), Some(RuntimeStatus::StartPending));
        assert_eq!(port.open_handles(), 0);
    }

    #[test]
    fn access_denied_is_false() {
        let port = MemoryPort::new();
        port.add_existing("svc", "svc");
        port.deny_database(Some(OsCode(5)));
        let controller = ServiceController::new(&port, ControlConfig::immediate());
        assert!(!controller.start("svc"));
    }
}
