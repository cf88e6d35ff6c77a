//! Control dispatcher glue.
//!
//! The service manager calls back through plain `extern "system"` functions
//! with no user data except the handler context, so the hosted services live
//! in a process-global table that is filled once before the dispatcher starts.
//! The handler context carries the slot index.

use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use log::{error, info, warn};
use once_cell::sync::OnceCell;
use windows::Win32::System::Services::{
    ENUM_SERVICE_TYPE, RegisterServiceCtrlHandlerExW, SERVICE_ACCEPT_POWEREVENT,
    SERVICE_ACCEPT_SHUTDOWN, SERVICE_ACCEPT_STOP, SERVICE_CONTROL_INTERROGATE,
    SERVICE_CONTROL_POWEREVENT, SERVICE_CONTROL_SHUTDOWN, SERVICE_CONTROL_STOP, SERVICE_STATUS,
    SERVICE_STATUS_CURRENT_STATE, SERVICE_STATUS_HANDLE, SERVICE_TABLE_ENTRYW,
    SERVICE_WIN32_OWN_PROCESS, SERVICE_WIN32_SHARE_PROCESS, SetServiceStatus,
    StartServiceCtrlDispatcherW,
};
use windows::core::{PCWSTR, PWSTR};

use super::os_code;
use super::wide::to_wide;
use crate::error::OsCode;
use crate::host::{DispatchEntry, PowerEvent};
use crate::port::RuntimeStatus;

const NO_ERROR: u32 = 0;
const ERROR_CALL_NOT_IMPLEMENTED: u32 = 120;
const ERROR_SERVICE_ALREADY_RUNNING: u32 = 1056;
const ERROR_SERVICE_NOT_ACTIVE: u32 = 1062;
const ERROR_SERVICE_SPECIFIC_ERROR: u32 = 1066;
const BROADCAST_QUERY_DENY: u32 = 0x424D_5144;

/// Wait hint reported with pending states, in milliseconds.
const PENDING_WAIT_HINT: u32 = 30_000;

struct Slot {
    entry: DispatchEntry,
    service_type: ENUM_SERVICE_TYPE,
    /// `SERVICE_STATUS_HANDLE` as an integer; zero until registered.
    status_handle: AtomicUsize,
    state: AtomicU32,
}

impl Slot {
    fn accepted_controls(&self) -> u32 {
        let caps = self.entry.capabilities();
        let mut accepted = 0;
        if caps.can_stop {
            accepted |= SERVICE_ACCEPT_STOP;
        }
        if caps.can_shutdown {
            accepted |= SERVICE_ACCEPT_SHUTDOWN;
        }
        if caps.can_handle_power_event {
            accepted |= SERVICE_ACCEPT_POWEREVENT;
        }
        accepted
    }

    fn report(&self, state: RuntimeStatus, exit_code: u32, specific_exit_code: u32) {
        let handle = self.status_handle.load(Ordering::Acquire);
        if handle == 0 {
            return;
        }
        self.state.store(state.as_raw(), Ordering::Release);

        let controls = match state {
            RuntimeStatus::StartPending | RuntimeStatus::Stopped => 0,
            _ => self.accepted_controls(),
        };
        let status = SERVICE_STATUS {
            dwServiceType: self.service_type,
            dwCurrentState: SERVICE_STATUS_CURRENT_STATE(state.as_raw()),
            dwControlsAccepted: controls,
            dwWin32ExitCode: exit_code,
            dwServiceSpecificExitCode: specific_exit_code,
            dwCheckPoint: 0,
            dwWaitHint: if state.is_pending() { PENDING_WAIT_HINT } else { 0 },
        };
        let handle = SERVICE_STATUS_HANDLE(handle as *mut c_void);
        if let Err(e) = unsafe { SetServiceStatus(handle, &status) } {
            warn!("SetServiceStatus({}) for '{}' failed: {}", state, self.entry.name(), e);
        }
    }

    fn report_state(&self, state: RuntimeStatus) {
        self.report(state, NO_ERROR, 0);
    }

    /// Run a callback, containing any panic. Returns false if it panicked.
    fn guarded(&self, what: &str, f: impl FnOnce()) -> bool {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(()) => true,
            Err(_) => {
                error!("{} handler of service '{}' panicked", what, self.entry.name());
                self.report(RuntimeStatus::Stopped, ERROR_SERVICE_SPECIFIC_ERROR, 1);
                false
            }
        }
    }

    fn stop(&self) {
        self.report_state(RuntimeStatus::StopPending);
        if self.guarded("stop", || self.entry.callbacks().stop()) {
            self.report_state(RuntimeStatus::Stopped);
        }
        info!("service '{}' stopped", self.entry.name());
    }
}

static TABLE: OnceCell<Vec<Slot>> = OnceCell::new();

fn slot_index(name: &str) -> Option<usize> {
    let table = TABLE.get()?;
    table
        .iter()
        .position(|s| s.entry.name().eq_ignore_ascii_case(name))
        .or_else(|| (table.len() == 1).then_some(0))
}

pub(super) fn run(entries: Vec<DispatchEntry>) -> Result<(), OsCode> {
    let service_type = if entries.len() == 1 {
        SERVICE_WIN32_OWN_PROCESS
    } else {
        SERVICE_WIN32_SHARE_PROCESS
    };
    let slots = entries
        .into_iter()
        .map(|entry| Slot {
            entry,
            service_type,
            status_handle: AtomicUsize::new(0),
            state: AtomicU32::new(RuntimeStatus::Stopped.as_raw()),
        })
        .collect();
    TABLE
        .set(slots)
        .map_err(|_| OsCode(ERROR_SERVICE_ALREADY_RUNNING))?;
    let table = TABLE.get().ok_or(OsCode(ERROR_SERVICE_ALREADY_RUNNING))?;

    let mut names: Vec<Vec<u16>> = table.iter().map(|s| to_wide(s.entry.name())).collect();
    let mut raw_entries: Vec<SERVICE_TABLE_ENTRYW> = names
        .iter_mut()
        .map(|name| SERVICE_TABLE_ENTRYW {
            lpServiceName: PWSTR(name.as_mut_ptr()),
            lpServiceProc: Some(service_main),
        })
        .collect();
    // sentinel
    raw_entries.push(SERVICE_TABLE_ENTRYW {
        lpServiceName: PWSTR::null(),
        lpServiceProc: None,
    });

    // Blocks until every service in the table has stopped.
    unsafe { StartServiceCtrlDispatcherW(raw_entries.as_ptr()) }.map_err(|e| os_code(&e))
}

pub(super) fn stop_self(name: &str) -> Result<(), OsCode> {
    let index = slot_index(name).ok_or(OsCode(ERROR_SERVICE_NOT_ACTIVE))?;
    let slot = TABLE
        .get()
        .and_then(|t| t.get(index))
        .ok_or(OsCode(ERROR_SERVICE_NOT_ACTIVE))?;
    if slot.status_handle.load(Ordering::Acquire) == 0 {
        return Err(OsCode(ERROR_SERVICE_NOT_ACTIVE));
    }
    slot.stop();
    Ok(())
}

unsafe extern "system" fn service_main(argc: u32, argv: *mut PWSTR) {
    let name = if argc > 0 && !argv.is_null() {
        unsafe { (*argv).to_string() }.unwrap_or_default()
    } else {
        String::new()
    };
    let Some(index) = slot_index(&name) else {
        error!("service manager started unknown service '{}'", name);
        return;
    };
    let Some(slot) = TABLE.get().and_then(|t| t.get(index)) else {
        return;
    };

    let wide_name = to_wide(slot.entry.name());
    let handle = match unsafe {
        RegisterServiceCtrlHandlerExW(
            PCWSTR(wide_name.as_ptr()),
            Some(control_handler),
            Some(index as *const c_void),
        )
    } {
        Ok(h) => h,
        Err(e) => {
            error!("RegisterServiceCtrlHandlerExW for '{}' failed: {}", slot.entry.name(), e);
            return;
        }
    };
    slot.status_handle.store(handle.0 as usize, Ordering::Release);

    slot.report_state(RuntimeStatus::StartPending);
    if slot.guarded("start", || slot.entry.callbacks().start()) {
        slot.report_state(RuntimeStatus::Running);
        info!("service '{}' running", slot.entry.name());
    }
}

unsafe extern "system" fn control_handler(
    control: u32,
    event_type: u32,
    _event_data: *mut c_void,
    context: *mut c_void,
) -> u32 {
    let Some(slot) = TABLE.get().and_then(|t| t.get(context as usize)) else {
        return ERROR_CALL_NOT_IMPLEMENTED;
    };
    let caps = slot.entry.capabilities();

    match control {
        SERVICE_CONTROL_STOP if caps.can_stop => {
            slot.stop();
            NO_ERROR
        }
        SERVICE_CONTROL_SHUTDOWN if caps.can_shutdown => {
            if slot.guarded("shutdown", || slot.entry.callbacks().shutdown()) {
                slot.report_state(RuntimeStatus::Stopped);
            }
            NO_ERROR
        }
        SERVICE_CONTROL_POWEREVENT if caps.can_handle_power_event => {
            let event = PowerEvent::from_raw(event_type);
            let mut accepted = true;
            slot.guarded("power event", || accepted = slot.entry.callbacks().power_event(event));
            if accepted { NO_ERROR } else { BROADCAST_QUERY_DENY }
        }
        SERVICE_CONTROL_INTERROGATE => {
            let current = RuntimeStatus::from_raw(slot.state.load(Ordering::Acquire))
                .unwrap_or(RuntimeStatus::Stopped);
            slot.report_state(current);
            NO_ERROR
        }
        _ => ERROR_CALL_NOT_IMPLEMENTED,
    }
}
