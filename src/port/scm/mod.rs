//! Service Control Manager implementation of [`ServicePort`].
//!
//! Every request asks for full access (`SC_MANAGER_ALL_ACCESS` /
//! `SERVICE_ALL_ACCESS`), so install, uninstall and control all need an
//! elevated process.

use std::ffi::c_void;
use std::path::PathBuf;

use log::debug;
use windows::Win32::System::Services::{
    ChangeServiceConfig2W, CloseServiceHandle, ControlService, CreateServiceW, DeleteService,
    ENUM_SERVICE_TYPE, GetServiceDisplayNameW, GetServiceKeyNameW, OpenSCManagerW, OpenServiceW,
    QueryServiceStatus, SC_HANDLE, SC_MANAGER_ALL_ACCESS, SERVICE_ALL_ACCESS,
    SERVICE_CONFIG_DESCRIPTION, SERVICE_CONTROL_STOP, SERVICE_DESCRIPTIONW, SERVICE_ERROR_NORMAL,
    SERVICE_START_TYPE, SERVICE_STATUS, StartServiceW,
};
use windows::core::{PCWSTR, PWSTR};

use super::{CreateRequest, RawHandle, RuntimeStatus, ServicePort};
use crate::error::OsCode;
use crate::host::DispatchEntry;

mod dispatch;
mod wide;

use wide::{from_wide, pcwstr, to_wide, to_wide_opt};

/// The data is invalid.
const ERROR_INVALID_DATA: u32 = 13;
/// Longest key name plus terminator.
const MAX_KEY_NAME: usize = 257;
/// Longest display name (256 UTF-16 units) plus terminator.
const MAX_DISPLAY_NAME: usize = 257;

#[inline]
fn sc(handle: RawHandle) -> SC_HANDLE {
    SC_HANDLE(handle.0 as *mut c_void)
}

#[inline]
fn raw(handle: SC_HANDLE) -> RawHandle {
    RawHandle(handle.0 as usize)
}

/// Win32 error code carried by a `windows` error (HRESULT_FROM_WIN32 keeps it in the low word).
#[inline]
pub(super) fn os_code(e: &windows::core::Error) -> OsCode {
    OsCode((e.code().0 as u32) & 0xFFFF)
}

/// The local Service Control Manager.
#[derive(Debug, Default)]
pub struct NativePort;

impl NativePort {
    pub fn new() -> Self {
        NativePort
    }
}

impl ServicePort for NativePort {
    fn open_database(&self) -> Result<RawHandle, OsCode> {
        let handle = unsafe { OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), SC_MANAGER_ALL_ACCESS) }
            .map_err(|e| os_code(&e))?;
        Ok(raw(handle))
    }

    fn close_handle(&self, handle: RawHandle) {
        let handle = sc(handle);
        if !handle.is_invalid() {
            unsafe {
                let _ = CloseServiceHandle(handle);
            }
        }
    }

    fn create_service(&self, db: RawHandle, request: &CreateRequest<'_>) -> Result<RawHandle, OsCode> {
        let name = to_wide(request.name);
        let display_name = to_wide(request.display_name);
        let binary_path = to_wide(request.binary_path);
        let dependencies = to_wide_opt(request.dependencies);
        let account_name = to_wide_opt(request.account_name);
        let password = to_wide_opt(request.password);

        debug!("CreateServiceW '{}' -> {}", request.name, request.binary_path);
        let handle = unsafe {
            CreateServiceW(
                sc(db),
                PCWSTR(name.as_ptr()),
                PCWSTR(display_name.as_ptr()),
                SERVICE_ALL_ACCESS,
                ENUM_SERVICE_TYPE(request.service_type.as_raw()),
                SERVICE_START_TYPE(request.start_mode.as_raw()),
                SERVICE_ERROR_NORMAL,
                PCWSTR(binary_path.as_ptr()),
                PCWSTR::null(),
                None,
                pcwstr(&dependencies),
                pcwstr(&account_name),
                pcwstr(&password),
            )
        }
        .map_err(|e| os_code(&e))?;
        Ok(raw(handle))
    }

    fn set_description(&self, record: RawHandle, description: &str) -> Result<(), OsCode> {
        let mut text = to_wide(description);
        let info = SERVICE_DESCRIPTIONW {
            lpDescription: PWSTR(text.as_mut_ptr()),
        };
        unsafe {
            ChangeServiceConfig2W(
                sc(record),
                SERVICE_CONFIG_DESCRIPTION,
                Some(&info as *const _ as *const c_void),
            )
        }
        .map_err(|e| os_code(&e))
    }

    fn open_service(&self, db: RawHandle, name: &str) -> Result<RawHandle, OsCode> {
        let name = to_wide(name);
        let handle = unsafe { OpenServiceW(sc(db), PCWSTR(name.as_ptr()), SERVICE_ALL_ACCESS) }
            .map_err(|e| os_code(&e))?;
        Ok(raw(handle))
    }

    fn delete_service(&self, record: RawHandle) -> Result<(), OsCode> {
        unsafe { DeleteService(sc(record)) }.map_err(|e| os_code(&e))
    }

    fn query_status(&self, record: RawHandle) -> Result<RuntimeStatus, OsCode> {
        let mut status = SERVICE_STATUS::default();
        unsafe { QueryServiceStatus(sc(record), &mut status) }.map_err(|e| os_code(&e))?;
        RuntimeStatus::from_raw(status.dwCurrentState.0).ok_or(OsCode(ERROR_INVALID_DATA))
    }

    fn start_service(&self, record: RawHandle) -> Result<(), OsCode> {
        unsafe { StartServiceW(sc(record), None) }.map_err(|e| os_code(&e))
    }

    fn stop_service(&self, record: RawHandle) -> Result<(), OsCode> {
        let mut status = SERVICE_STATUS::default();
        unsafe { ControlService(sc(record), SERVICE_CONTROL_STOP, &mut status) }.map_err(|e| os_code(&e))
    }

    fn resolve_key_name(&self, db: RawHandle, name: &str) -> Option<String> {
        let wide_name = to_wide(name);

        // A display name maps to its key name.
        let mut buf = [0u16; MAX_KEY_NAME];
        let mut len = buf.len() as u32;
        let by_display = unsafe {
            GetServiceKeyNameW(
                sc(db),
                PCWSTR(wide_name.as_ptr()),
                Some(PWSTR(buf.as_mut_ptr())),
                &mut len,
            )
        };
        if by_display.is_ok() {
            return Some(from_wide(&buf));
        }

        // Otherwise it may be a key name in any casing; round-trip through the
        // display name to get the manager's own spelling.
        let mut display = [0u16; MAX_DISPLAY_NAME];
        let mut len = display.len() as u32;
        unsafe {
            GetServiceDisplayNameW(
                sc(db),
                PCWSTR(wide_name.as_ptr()),
                Some(PWSTR(display.as_mut_ptr())),
                &mut len,
            )
        }
        .ok()?;

        let mut len = buf.len() as u32;
        unsafe {
            GetServiceKeyNameW(
                sc(db),
                PCWSTR(display.as_ptr()),
                Some(PWSTR(buf.as_mut_ptr())),
                &mut len,
            )
        }
        .ok()?;
        Some(from_wide(&buf))
    }

    fn current_exe(&self) -> Option<PathBuf> {
        std::env::current_exe().ok()
    }

    fn run_dispatcher(&self, entries: Vec<DispatchEntry>) -> Result<(), OsCode> {
        dispatch::run(entries)
    }

    fn stop_self(&self, name: &str) -> Result<(), OsCode> {
        dispatch::stop_self(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "needs an elevated session"]
    fn key_name_comes_back_in_canonical_casing() {
        let port = NativePort::new();
        let db = port.open_database().unwrap();
        assert_eq!(port.resolve_key_name(db, "eventlog").as_deref(), Some("EventLog"));
        assert_eq!(port.resolve_key_name(db, "Windows Event Log").as_deref(), Some("EventLog"));
        assert_eq!(port.resolve_key_name(db, "no-such-service-xyz"), None);
        port.close_handle(db);
    }
}
