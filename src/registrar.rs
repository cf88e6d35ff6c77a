//! Creation and deletion of service records.
//!
//! Each operation works against a database handle the caller already holds;
//! record handles are opened and released here, on every path.

use log::{debug, info, warn};

use crate::control::ServiceController;
use crate::error::ServiceError;
use crate::port::{CreateRequest, ScopedHandle, ServicePort};
use crate::service::{
    LoginIdentity, MAX_DISPLAY_NAME, ServiceDescriptor, ServiceType, display_name_len,
    validate_service_name,
};

/// Join dependency names into the null-separated, double-null-terminated form.
///
/// An empty list yields `None` ("no dependencies"), never an empty-but-present list.
pub fn encode_dependencies<S: AsRef<str>>(names: &[S]) -> Option<String> {
    if names.is_empty() {
        return None;
    }

    let mut out = String::new();
    for name in names {
        out.push_str(name.as_ref());
        out.push('\0');
    }
    out.push('\0');
    Some(out)
}

/// Check the parts of a descriptor that can be validated without the OS.
pub fn validate_descriptor(descriptor: &ServiceDescriptor) -> Result<(), ServiceError> {
    if !validate_service_name(&descriptor.name) {
        return Err(ServiceError::InvalidServiceName(descriptor.name.clone()));
    }
    let len = display_name_len(descriptor.effective_display_name());
    if len > MAX_DISPLAY_NAME {
        return Err(ServiceError::DisplayNameTooLong(len));
    }
    Ok(())
}

/// Build the dependency string, translating each entry to its canonical key
/// name where it names a live service. Lookup failures keep the original text.
fn resolve_dependencies(
    port: &dyn ServicePort,
    db: &ScopedHandle<'_>,
    depends_on: &[String],
) -> Option<String> {
    let resolved: Vec<String> = depends_on
        .iter()
        .map(|name| match port.resolve_key_name(db.raw(), name) {
            Some(key) => key,
            None => {
                debug!("dependency '{}' did not resolve, keeping as given", name);
                name.clone()
            }
        })
        .collect();
    encode_dependencies(&resolved)
}

/// Create one service record and attach its description.
///
/// If the description cannot be attached the record stays installed,
/// undescribed, and `ConfigureFailed` is returned.
pub fn install(
    port: &dyn ServicePort,
    db: &ScopedHandle<'_>,
    descriptor: &ServiceDescriptor,
    service_type: ServiceType,
    binary_path: &str,
    identity: &LoginIdentity,
) -> Result<(), ServiceError> {
    validate_descriptor(descriptor)?;

    let dependencies = resolve_dependencies(port, db, &descriptor.depends_on);
    let request = CreateRequest {
        name: &descriptor.name,
        display_name: descriptor.effective_display_name(),
        service_type,
        start_mode: descriptor.start_mode,
        binary_path,
        dependencies: dependencies.as_deref(),
        account_name: identity.account_name.as_deref(),
        password: identity.password.as_deref(),
    };

    let raw = port
        .create_service(db.raw(), &request)
        .map_err(|code| ServiceError::from_create(&descriptor.name, code))?;
    let record = ScopedHandle::adopt(port, raw);

    if !descriptor.description.is_empty() {
        port.set_description(record.raw(), &descriptor.description)
            .map_err(|code| {
                warn!(
                    "service '{}' was created but its description could not be set: {}",
                    descriptor.name, code
                );
                ServiceError::ConfigureFailed(code)
            })?;
    }

    info!("installed service '{}' ({:?})", descriptor.name, service_type);
    Ok(())
}

/// Mark a service record for deletion, then stop the live service.
///
/// The record is removed by the OS once every handle to it is closed and the
/// service has stopped. The stop is best effort.
pub fn uninstall(
    port: &dyn ServicePort,
    db: &ScopedHandle<'_>,
    controller: &ServiceController<'_>,
    name: &str,
) -> Result<(), ServiceError> {
    {
        let record = ScopedHandle::service(port, db, name)
            .map_err(|code| ServiceError::from_open(name, code))?;
        port.delete_service(record.raw())
            .map_err(ServiceError::DeleteFailed)?;
    }

    if !controller.stop(name) {
        debug!("service '{}' did not confirm stopped after deletion", name);
    }

    info!("uninstalled service '{}'", name);
    Ok(())
}

/// Install every descriptor in order against one shared database handle.
///
/// Stops at the first failure; descriptors installed before it stay installed.
pub fn install_all(
    port: &dyn ServicePort,
    descriptors: &[&ServiceDescriptor],
    binary_path: &str,
    identity: &LoginIdentity,
) -> Result<(), ServiceError> {
    for descriptor in descriptors {
        validate_descriptor(descriptor)?;
    }

    let db = ScopedHandle::database(port).map_err(ServiceError::DatabaseUnavailable)?;
    let service_type = ServiceType::for_count(descriptors.len());
    for descriptor in descriptors {
        install(port, &db, descriptor, service_type, binary_path, identity)?;
    }
    Ok(())
}

/// Uninstall every named service in order against one shared database handle.
///
/// Stops at the first failure; services removed before it stay removed.
pub fn uninstall_all<S: AsRef<str>>(
    port: &dyn ServicePort,
    controller: &ServiceController<'_>,
    names: &[S],
) -> Result<(), ServiceError> {
    let db = ScopedHandle::database(port).map_err(ServiceError::DatabaseUnavailable)?;
    for name in names {
        uninstall(port, &db, controller, name.as_ref())?;
    }
    Ok(())
}
