//! Orchestration of the services hosted by the current executable.
//!
//! A process hosting one service and a process hosting several are the same
//! thing: a sequence of [`ServiceHost`] values. [`SingleSelfService`] is the
//! convenience surface for the one-service case, where callbacks are only
//! needed at dispatch time.
//!
//! The executable must call [`SelfServiceProcess::execute_services`] (or
//! [`SingleSelfService::execute_as_service`]) when launched with the same
//! `exe_args` it was installed with; otherwise the registered services cannot
//! start.

use std::sync::Arc;
use std::thread;

use log::{info, warn};

use crate::config::ControlConfig;
use crate::control::ServiceController;
use crate::error::ServiceError;
use crate::host::{CallbacksBuilder, DispatchEntry, ServiceHost};
use crate::port::{RuntimeStatus, ServicePort};
use crate::registrar;
use crate::service::{Credentials, ServiceAccount, ServiceDescriptor};

/// Build the command line the service manager will launch:
/// the quoted executable path followed by `exe_args` verbatim.
pub fn binary_path_and_args(port: &dyn ServicePort, exe_args: Option<&str>) -> Result<String, ServiceError> {
    let exe = port.current_exe().ok_or(ServiceError::EntryPathUnavailable)?;
    let exe = exe.to_string_lossy();
    if exe.is_empty() {
        return Err(ServiceError::EntryPathUnavailable);
    }

    let mut command = format!("\"{exe}\"");
    if let Some(args) = exe_args.filter(|a| !a.is_empty()) {
        command.push(' ');
        command.push_str(args);
    }
    Ok(command)
}

fn install_descriptors(
    port: &dyn ServicePort,
    descriptors: &[&ServiceDescriptor],
    account: ServiceAccount,
    credentials: Option<&Credentials>,
    exe_args: Option<&str>,
) -> Result<(), ServiceError> {
    if descriptors.is_empty() {
        return Err(ServiceError::NoServicesDefined);
    }
    let identity = account.resolve(credentials)?;
    for descriptor in descriptors {
        registrar::validate_descriptor(descriptor)?;
    }
    let binary_path = binary_path_and_args(port, exe_args)?;

    info!("installing {} service(s) as {:?}: {}", descriptors.len(), account, binary_path);
    registrar::install_all(port, descriptors, &binary_path, &identity)
}

fn uninstall_names(port: &dyn ServicePort, config: ControlConfig, names: &[&str]) -> Result<(), ServiceError> {
    let controller = ServiceController::new(port, config);
    let result = registrar::uninstall_all(port, &controller, names);

    // Give the OS time to finish tearing the records down, success or not.
    if !config.uninstall_settle.is_zero() {
        thread::sleep(config.uninstall_settle);
    }
    result
}

fn dispatch(port: &dyn ServicePort, entries: Vec<DispatchEntry>) -> Result<(), ServiceError> {
    for entry in &entries {
        let caps = entry.capabilities();
        info!(
            "dispatching service '{}' (stop: {}, shutdown: {}, power: {})",
            entry.name(),
            caps.can_stop,
            caps.can_shutdown,
            caps.can_handle_power_event
        );
    }
    port.run_dispatcher(entries).map_err(|code| {
        warn!("control dispatcher failed: {}", code);
        ServiceError::DispatcherFailed(code)
    })
}

/// The executable and every service it hosts.
pub struct SelfServiceProcess {
    port: Arc<dyn ServicePort>,
    config: ControlConfig,
    hosts: Vec<ServiceHost>,
}

impl SelfServiceProcess {
    pub fn new(port: Arc<dyn ServicePort>, hosts: Vec<ServiceHost>) -> Self {
        Self {
            port,
            config: ControlConfig::default(),
            hosts,
        }
    }

    pub fn with_config(mut self, config: ControlConfig) -> Self {
        self.config = config;
        self
    }

    #[inline]
    pub fn hosts(&self) -> &[ServiceHost] {
        &self.hosts
    }

    pub fn controller(&self) -> ServiceController<'_> {
        ServiceController::new(self.port.as_ref(), self.config)
    }

    /// Register every hosted service. All services are initially stopped.
    pub fn install(
        &self,
        account: ServiceAccount,
        credentials: Option<&Credentials>,
        exe_args: Option<&str>,
    ) -> Result<(), ServiceError> {
        let descriptors: Vec<&ServiceDescriptor> = self.hosts.iter().map(ServiceHost::descriptor).collect();
        install_descriptors(self.port.as_ref(), &descriptors, account, credentials, exe_args)
    }

    /// Unregister every hosted service, whatever its current state, then wait
    /// for the configured settle delay.
    pub fn uninstall(&self) -> Result<(), ServiceError> {
        let names: Vec<&str> = self.hosts.iter().map(ServiceHost::name).collect();
        uninstall_names(self.port.as_ref(), self.config, &names)
    }

    /// Start every hosted service; one outcome per host, in order.
    pub fn start_all(&self) -> Vec<bool> {
        let controller = self.controller();
        self.hosts.iter().map(|h| controller.start(h.name())).collect()
    }

    /// Stop every hosted service; one outcome per host, in order.
    pub fn stop_all(&self) -> Vec<bool> {
        let controller = self.controller();
        self.hosts.iter().map(|h| controller.stop(h.name())).collect()
    }

    pub fn start(&self, name: &str) -> bool {
        self.controller().start(name)
    }

    pub fn stop(&self, name: &str) -> bool {
        self.controller().stop(name)
    }

    pub fn status(&self, name: &str) -> Option<RuntimeStatus> {
        self.controller().status(name)
    }

    /// Hand this thread to the control dispatcher ("service mode").
    ///
    /// Does not return while any hosted service is running.
    pub fn execute_services(&self) -> Result<(), ServiceError> {
        if self.hosts.is_empty() {
            return Err(ServiceError::NoServicesDefined);
        }
        let entries = self.hosts.iter().map(ServiceHost::dispatch_entry).collect();
        dispatch(self.port.as_ref(), entries)
    }

    /// Stop a hosted service from within while running in service mode.
    pub fn stop_self(&self, name: &str) -> Result<(), ServiceError> {
        self.port.stop_self(name).map_err(ServiceError::DispatcherFailed)
    }
}

/// Install, remove, control and run an executable that hosts exactly one service.
pub struct SingleSelfService {
    port: Arc<dyn ServicePort>,
    config: ControlConfig,
}

impl SingleSelfService {
    /// Name used for the dispatch entry; own-process services ignore it.
    const DISPATCH_NAME: &'static str = "";

    pub fn new(port: Arc<dyn ServicePort>) -> Self {
        Self {
            port,
            config: ControlConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ControlConfig) -> Self {
        self.config = config;
        self
    }

    pub fn controller(&self) -> ServiceController<'_> {
        ServiceController::new(self.port.as_ref(), self.config)
    }

    /// Register the running executable as an own-process service.
    pub fn install(
        &self,
        descriptor: &ServiceDescriptor,
        account: ServiceAccount,
        credentials: Option<&Credentials>,
        exe_args: Option<&str>,
    ) -> Result<(), ServiceError> {
        install_descriptors(self.port.as_ref(), &[descriptor], account, credentials, exe_args)
    }

    /// Unregister the named service. Works for any service, not only ones
    /// installed through this type.
    pub fn uninstall(&self, name: &str) -> Result<(), ServiceError> {
        uninstall_names(self.port.as_ref(), self.config, &[name])
    }

    pub fn start(&self, name: &str) -> bool {
        self.controller().start(name)
    }

    pub fn stop(&self, name: &str) -> bool {
        self.controller().stop(name)
    }

    pub fn status(&self, name: &str) -> Option<RuntimeStatus> {
        self.controller().status(name)
    }

    /// Pass control to the service manager with the given callbacks.
    ///
    /// Stop, shutdown and power-event handling are advertised exactly when
    /// the matching callback is present.
    pub fn execute_as_service(&self, callbacks: CallbacksBuilder) -> Result<(), ServiceError> {
        let callbacks = callbacks.build()?;
        dispatch(
            self.port.as_ref(),
            vec![DispatchEntry::new(Self::DISPATCH_NAME, callbacks)],
        )
    }

    /// Stop this service from within while running in service mode.
    pub fn stop_self(&self) -> Result<(), ServiceError> {
        self.port
            .stop_self(Self::DISPATCH_NAME)
            .map_err(ServiceError::DispatcherFailed)
    }
}
