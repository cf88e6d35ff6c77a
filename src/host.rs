//! In-process service definitions and their control callbacks.

use std::fmt;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::service::ServiceDescriptor;

type Handler = Arc<dyn Fn() + Send + Sync>;
type PowerHandler = Arc<dyn Fn(PowerEvent) -> bool + Send + Sync>;

/// Power broadcast delivered to a service that accepts power events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerEvent {
    QuerySuspend,
    QuerySuspendFailed,
    Suspend,
    ResumeCritical,
    ResumeSuspend,
    BatteryLow,
    PowerStatusChange,
    OemEvent,
    ResumeAutomatic,
    Other(u32),
}

impl PowerEvent {
    /// Decode a `PBT_*` event type.
    pub fn from_raw(event_type: u32) -> Self {
        match event_type {
            0x0000 => PowerEvent::QuerySuspend,
            0x0002 => PowerEvent::QuerySuspendFailed,
            0x0004 => PowerEvent::Suspend,
            0x0006 => PowerEvent::ResumeCritical,
            0x0007 => PowerEvent::ResumeSuspend,
            0x0009 => PowerEvent::BatteryLow,
            0x000A => PowerEvent::PowerStatusChange,
            0x000B => PowerEvent::OemEvent,
            0x0012 => PowerEvent::ResumeAutomatic,
            other => PowerEvent::Other(other),
        }
    }
}

/// Controls a service advertises to the service manager.
///
/// Always derived from which callbacks are present; there is no way to
/// advertise a control without a handler behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub can_stop: bool,
    pub can_shutdown: bool,
    pub can_handle_power_event: bool,
}

/// Dispatch table of one service: a mandatory start handler and optional
/// stop, shutdown and power-event handlers.
#[derive(Clone)]
pub struct ServiceCallbacks {
    on_start: Handler,
    on_stop: Option<Handler>,
    on_shutdown: Option<Handler>,
    on_power_event: Option<PowerHandler>,
}

impl ServiceCallbacks {
    /// Callbacks with only a start handler.
    pub fn new<F>(on_start: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            on_start: Arc::new(on_start),
            on_stop: None,
            on_shutdown: None,
            on_power_event: None,
        }
    }

    pub fn builder() -> CallbacksBuilder {
        CallbacksBuilder::default()
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_stop: self.on_stop.is_some(),
            can_shutdown: self.on_shutdown.is_some(),
            can_handle_power_event: self.on_power_event.is_some(),
        }
    }

    pub fn start(&self) {
        (self.on_start)();
    }

    pub fn stop(&self) {
        if let Some(f) = &self.on_stop {
            f();
        }
    }

    pub fn shutdown(&self) {
        if let Some(f) = &self.on_shutdown {
            f();
        }
    }

    /// Returns whether the event is accepted; services without a handler accept everything.
    pub fn power_event(&self, event: PowerEvent) -> bool {
        match &self.on_power_event {
            Some(f) => f(event),
            None => true,
        }
    }
}

impl fmt::Debug for ServiceCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCallbacks")
            .field("capabilities", &self.capabilities())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ServiceCallbacks`] where the start handler may be missing
/// until [`CallbacksBuilder::build`].
#[derive(Default)]
pub struct CallbacksBuilder {
    on_start: Option<Handler>,
    on_stop: Option<Handler>,
    on_shutdown: Option<Handler>,
    on_power_event: Option<PowerHandler>,
}

impl CallbacksBuilder {
    pub fn on_start<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_stop<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_stop = Some(Arc::new(f));
        self
    }

    pub fn on_shutdown<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_shutdown = Some(Arc::new(f));
        self
    }

    pub fn on_power_event<F: Fn(PowerEvent) -> bool + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_power_event = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<ServiceCallbacks, ServiceError> {
        let on_start = self.on_start.ok_or(ServiceError::MissingStartHandler)?;
        Ok(ServiceCallbacks {
            on_start,
            on_stop: self.on_stop,
            on_shutdown: self.on_shutdown,
            on_power_event: self.on_power_event,
        })
    }
}

/// One service definition bound to its callbacks. Lives for the process lifetime.
#[derive(Debug, Clone)]
pub struct ServiceHost {
    descriptor: ServiceDescriptor,
    callbacks: ServiceCallbacks,
}

impl ServiceHost {
    pub fn new(descriptor: ServiceDescriptor, callbacks: ServiceCallbacks) -> Self {
        Self {
            descriptor,
            callbacks,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[inline]
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    #[inline]
    pub fn callbacks(&self) -> &ServiceCallbacks {
        &self.callbacks
    }

    pub(crate) fn dispatch_entry(&self) -> DispatchEntry {
        DispatchEntry::new(self.name(), self.callbacks.clone())
    }
}

/// What the control dispatcher is told about one hosted service.
///
/// The advertised controls are read off the callbacks, never stored apart
/// from them.
#[derive(Debug, Clone)]
pub struct DispatchEntry {
    name: String,
    callbacks: ServiceCallbacks,
}

impl DispatchEntry {
    pub fn new(name: impl Into<String>, callbacks: ServiceCallbacks) -> Self {
        Self {
            name: name.into(),
            callbacks,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn callbacks(&self) -> &ServiceCallbacks {
        &self.callbacks
    }

    pub fn capabilities(&self) -> Capabilities {
        self.callbacks.capabilities()
    }
}
