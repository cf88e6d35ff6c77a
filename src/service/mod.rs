//! Service descriptors: the data a record is created from.

mod account;
mod name;

pub use account::{Credentials, LoginIdentity, ServiceAccount};
pub use name::{MAX_DISPLAY_NAME, MAX_SERVICE_NAME, display_name_len, validate_service_name};

use serde::{Deserialize, Serialize};

/// Initial startup type of a service. Administrators can change it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartMode {
    Boot,
    System,
    #[default]
    Automatic,
    Manual,
    Disabled,
}

impl StartMode {
    /// Numeric start type understood by the service manager.
    #[inline]
    pub fn as_raw(self) -> u32 {
        match self {
            StartMode::Boot => 0,
            StartMode::System => 1,
            StartMode::Automatic => 2,
            StartMode::Manual => 3,
            StartMode::Disabled => 4,
        }
    }
}

/// Whether the executable hosts one service or shares its process between several.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    OwnProcess,
    ShareProcess,
}

impl ServiceType {
    /// Service type for a process hosting `count` services.
    #[inline]
    pub fn for_count(count: usize) -> Self {
        if count == 1 {
            ServiceType::OwnProcess
        } else {
            ServiceType::ShareProcess
        }
    }

    #[inline]
    pub fn as_raw(self) -> u32 {
        match self {
            ServiceType::OwnProcess => 0x10,
            ServiceType::ShareProcess => 0x20,
        }
    }
}

/// Description of one service record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Unique key name of the service.
    pub name: String,
    /// Name shown to administrators; defaults to `name`.
    #[serde(default)]
    pub display_name: String,
    /// Longer text shown by service management tools.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start_mode: StartMode,
    /// Names of services that must be running before this one starts.
    /// Display names are accepted but discouraged since they can be localised.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ServiceDescriptor {
    /// Create a descriptor whose display name equals its key name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            start_mode: StartMode::default(),
            depends_on: Vec::new(),
        }
    }

    /// Set display name
    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Set description
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Set start mode
    pub fn start_mode(mut self, mode: StartMode) -> Self {
        self.start_mode = mode;
        self
    }

    /// Add dependency
    pub fn depends_on(mut self, service: impl Into<String>) -> Self {
        self.depends_on.push(service.into());
        self
    }

    /// Display name to register; an empty display name falls back to the key name.
    pub fn effective_display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let d = ServiceDescriptor::new("svc1");
        assert_eq!(d.display_name, "svc1");
        assert_eq!(d.start_mode, StartMode::Automatic);
        assert!(d.depends_on.is_empty());

        let d = ServiceDescriptor::new("svc1")
            .display_name("Service One")
            .start_mode(StartMode::Manual)
            .depends_on("Tcpip")
            .depends_on("Afd");
        assert_eq!(d.effective_display_name(), "Service One");
        assert_eq!(d.depends_on, ["Tcpip", "Afd"]);
    }

    #[test]
    fn raw_values() {
        assert_eq!(StartMode::Boot.as_raw(), 0);
        assert_eq!(StartMode::Disabled.as_raw(), 4);
        assert_eq!(ServiceType::for_count(1), ServiceType::OwnProcess);
        assert_eq!(ServiceType::for_count(3).as_raw(), 0x20);
    }

    #[test]
    fn empty_display_name_falls_back() {
        let mut d = ServiceDescriptor::new("svc1");
        d.display_name.clear();
        assert_eq!(d.effective_display_name(), "svc1");
    }
}
