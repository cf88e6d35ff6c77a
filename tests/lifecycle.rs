use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use selfserviced::{
    CallbacksBuilder, Capabilities, ControlConfig, MemoryPort, OsCode, RuntimeStatus,
    SelfServiceProcess, ServiceAccount, ServiceCallbacks, ServiceDescriptor, ServiceError,
    ServiceFile, ServiceHost, ServiceType, SingleSelfService, StartMode,
};

fn single(port: &Arc<MemoryPort>) -> SingleSelfService {
    SingleSelfService::new(port.clone()).with_config(ControlConfig::immediate())
}

fn svc1() -> ServiceDescriptor {
    ServiceDescriptor::new("svc1")
        .display_name("Service One")
        .description("test")
        .start_mode(StartMode::Automatic)
}

#[test]
fn install_start_stop_uninstall() {
    let port = Arc::new(MemoryPort::new().with_settle_queries(2));
    let single = single(&port);

    single
        .install(&svc1(), ServiceAccount::LocalService, None, Some("--service"))
        .unwrap();

    let record = port.record("svc1").unwrap();
    assert_eq!(record.display_name, "Service One");
    assert_eq!(record.description.as_deref(), Some("test"));
    assert_eq!(record.service_type, ServiceType::OwnProcess);
    assert_eq!(record.account_name.as_deref(), Some(r"NT AUTHORITY\LocalService"));
    assert_eq!(
        record.binary_path,
        r#""C:\Program Files\selfserviced\selfserviced.exe" --service"#
    );
    assert_eq!(single.status("svc1"), Some(RuntimeStatus::Stopped));

    assert!(single.start("svc1"));
    assert_eq!(single.status("svc1"), Some(RuntimeStatus::Running));

    assert!(single.stop("svc1"));
    assert_eq!(single.status("svc1"), Some(RuntimeStatus::Stopped));

    single.uninstall("svc1").unwrap();
    assert!(!port.contains("svc1"));
    assert_eq!(port.open_handles(), 0);
}

#[test]
fn install_then_uninstall_leaves_database_clean() {
    let port = Arc::new(MemoryPort::new());
    let single = single(&port);

    single
        .install(&svc1(), ServiceAccount::NetworkService, None, None)
        .unwrap();
    single.uninstall("svc1").unwrap();

    assert!(port.service_names().is_empty());
    // the same descriptor can be installed again
    single
        .install(&svc1(), ServiceAccount::NetworkService, None, None)
        .unwrap();
    assert!(port.contains("svc1"));
}

#[test]
fn uninstall_stops_a_running_service() {
    let port = Arc::new(MemoryPort::new());
    let single = single(&port);
    single
        .install(&svc1(), ServiceAccount::LocalSystem, None, None)
        .unwrap();
    assert!(single.start("svc1"));

    single.uninstall("svc1").unwrap();
    assert!(!port.contains("svc1"));
    assert_eq!(port.open_handles(), 0);
}

#[test]
fn uninstall_waits_for_settle_delay() {
    let port = Arc::new(MemoryPort::new());
    let config = ControlConfig {
        uninstall_settle: Duration::from_millis(50),
        ..ControlConfig::immediate()
    };
    let single = SingleSelfService::new(port.clone()).with_config(config);
    single
        .install(&svc1(), ServiceAccount::LocalService, None, None)
        .unwrap();

    let started = Instant::now();
    single.uninstall("svc1").unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));

    // the delay applies even when uninstall fails
    let started = Instant::now();
    assert_eq!(
        single.uninstall("svc1"),
        Err(ServiceError::ServiceNotFound("svc1".into()))
    );
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn collision_leaves_existing_record_untouched() {
    let port = Arc::new(MemoryPort::new());
    port.add_existing("svc1", "Original");
    let before = port.record("svc1").unwrap();

    let err = single(&port)
        .install(&svc1(), ServiceAccount::LocalService, None, None)
        .unwrap_err();

    assert_eq!(err, ServiceError::ServiceAlreadyExists("svc1".into()));
    assert_eq!(port.record("svc1").unwrap(), before);
    assert_eq!(port.open_handles(), 0);
}

#[test]
fn display_name_collision_is_reported() {
    let port = Arc::new(MemoryPort::new());
    port.add_existing("other", "Service One");

    let err = single(&port)
        .install(&svc1(), ServiceAccount::LocalService, None, None)
        .unwrap_err();
    assert_eq!(err, ServiceError::ServiceAlreadyExists("svc1".into()));
    assert!(!port.contains("svc1"));
}

#[test]
fn controlling_a_nonexistent_service_is_false() {
    let port = Arc::new(MemoryPort::new());
    let single = single(&port);
    assert!(!single.start("nonexistent-service"));
    assert!(!single.stop("nonexistent-service"));
}

#[test]
fn display_name_too_long_never_opens_database() {
    let port = Arc::new(MemoryPort::new());
    let descriptor = ServiceDescriptor::new("svc1").display_name("d".repeat(256));

    let err = single(&port)
        .install(&descriptor, ServiceAccount::LocalService, None, None)
        .unwrap_err();

    assert_eq!(err, ServiceError::DisplayNameTooLong(256));
    assert_eq!(port.database_opens(), 0);
}

#[test]
fn display_name_of_255_is_accepted() {
    let port = Arc::new(MemoryPort::new());
    let descriptor = ServiceDescriptor::new("svc1").display_name("d".repeat(255));
    single(&port)
        .install(&descriptor, ServiceAccount::LocalService, None, None)
        .unwrap();
    assert!(port.contains("svc1"));
}

#[test]
fn start_only_callbacks_advertise_nothing() {
    let port = Arc::new(MemoryPort::new());
    let started = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();

    single(&port)
        .execute_as_service(CallbacksBuilder::default().on_start(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    let dispatched = port.dispatched();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].capabilities(), Capabilities::default());
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[test]
fn execute_without_start_handler_fails() {
    let port = Arc::new(MemoryPort::new());
    let err = single(&port)
        .execute_as_service(CallbacksBuilder::default().on_stop(|| {}))
        .unwrap_err();
    assert_eq!(err, ServiceError::MissingStartHandler);
    assert!(port.dispatched().is_empty());
}

#[test]
fn dispatcher_failure_is_surfaced() {
    let port = Arc::new(MemoryPort::new());
    port.fail_dispatcher(Some(OsCode(1063)));
    let err = single(&port)
        .execute_as_service(CallbacksBuilder::default().on_start(|| {}))
        .unwrap_err();
    assert_eq!(err, ServiceError::DispatcherFailed(OsCode(1063)));
}

#[test]
fn self_stop_runs_stop_handler() {
    let port = Arc::new(MemoryPort::new());
    let stops = Arc::new(AtomicUsize::new(0));
    let counter = stops.clone();
    let single = single(&port);

    single
        .execute_as_service(
            CallbacksBuilder::default()
                .on_start(|| {})
                .on_stop(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .unwrap();
    single.stop_self().unwrap();

    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert_eq!(port.self_stops(), [""]);
}

#[test]
fn installed_single_service_runs_under_dispatch() {
    let port = Arc::new(MemoryPort::new());
    let single = single(&port);
    single
        .install(&svc1(), ServiceAccount::LocalService, None, Some("--service"))
        .unwrap();

    single
        .execute_as_service(CallbacksBuilder::default().on_start(|| {}).on_stop(|| {}))
        .unwrap();
    assert_eq!(single.status("svc1"), Some(RuntimeStatus::Running));
    assert!(port.dispatched()[0].capabilities().can_stop);

    single.stop_self().unwrap();
    assert_eq!(single.status("svc1"), Some(RuntimeStatus::Stopped));
}

#[test]
fn dependencies_are_registered_in_list_form() {
    let port = Arc::new(MemoryPort::new());
    let single = single(&port);

    let with = ServiceDescriptor::new("with").depends_on("A").depends_on("B");
    let without = ServiceDescriptor::new("without");
    single
        .install(&with, ServiceAccount::LocalService, None, None)
        .unwrap();
    single
        .install(&without, ServiceAccount::LocalService, None, None)
        .unwrap();

    assert_eq!(port.record("with").unwrap().dependencies.as_deref(), Some("A\0B\0\0"));
    assert_eq!(port.record("without").unwrap().dependencies, None);
}

fn process(port: &Arc<MemoryPort>) -> SelfServiceProcess {
    let hosts = ["alpha", "beta"]
        .into_iter()
        .map(|name| {
            ServiceHost::new(
                ServiceDescriptor::new(name).start_mode(StartMode::Manual),
                ServiceCallbacks::builder()
                    .on_start(|| {})
                    .on_shutdown(|| {})
                    .build()
                    .unwrap(),
            )
        })
        .collect();
    SelfServiceProcess::new(port.clone(), hosts).with_config(ControlConfig::immediate())
}

#[test]
fn shared_process_lifecycle() {
    let port = Arc::new(MemoryPort::new());
    let process = process(&port);

    process.install(ServiceAccount::LocalSystem, None, Some("run")).unwrap();
    for name in ["alpha", "beta"] {
        let record = port.record(name).unwrap();
        assert_eq!(record.service_type, ServiceType::ShareProcess);
        assert_eq!(record.account_name, None);
    }
    // one shared database handle for the whole batch
    assert_eq!(port.database_opens(), 1);

    assert_eq!(process.start_all(), [true, true]);
    assert_eq!(process.status("beta"), Some(RuntimeStatus::Running));
    assert_eq!(process.stop_all(), [true, true]);

    process.uninstall().unwrap();
    assert!(port.service_names().is_empty());
    assert_eq!(port.open_handles(), 0);
}

#[test]
fn shared_process_dispatch_advertises_shutdown() {
    let port = Arc::new(MemoryPort::new());
    process(&port).execute_services().unwrap();

    let dispatched = port.dispatched();
    assert_eq!(dispatched.len(), 2);
    for entry in &dispatched {
        assert_eq!(
            entry.capabilities(),
            Capabilities {
                can_stop: false,
                can_shutdown: true,
                can_handle_power_event: false,
            }
        );
    }
}

#[test]
fn batch_uninstall_stops_at_first_missing_service() {
    let port = Arc::new(MemoryPort::new());
    let process = process(&port);
    process.install(ServiceAccount::LocalService, None, None).unwrap();

    // remove beta behind the process's back
    single(&port).uninstall("beta").unwrap();

    assert_eq!(
        process.uninstall(),
        Err(ServiceError::ServiceNotFound("beta".into()))
    );
    // alpha came first and stays removed
    assert!(!port.contains("alpha"));
}

#[test]
fn database_denied_is_surfaced_on_install_and_uninstall() {
    let port = Arc::new(MemoryPort::new());
    port.deny_database(Some(OsCode(5)));
    let single = single(&port);

    assert_eq!(
        single.install(&svc1(), ServiceAccount::LocalService, None, None),
        Err(ServiceError::DatabaseUnavailable(OsCode(5)))
    );
    assert_eq!(
        single.uninstall("svc1"),
        Err(ServiceError::DatabaseUnavailable(OsCode(5)))
    );
}

#[test]
fn delete_refused_is_surfaced() {
    let port = Arc::new(MemoryPort::new());
    let single = single(&port);
    single
        .install(&svc1(), ServiceAccount::LocalService, None, None)
        .unwrap();

    port.fail_delete(Some(OsCode(5)));
    assert_eq!(single.uninstall("svc1"), Err(ServiceError::DeleteFailed(OsCode(5))));
    assert!(port.contains("svc1"));
    assert_eq!(port.open_handles(), 0);
}

#[test]
fn service_file_drives_install() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        account = "local-system"
        exe_args = "run --file svc.toml"

        [control]
        uninstall_settle_ms = 0

        [[service]]
        name = "filesvc"
        display_name = "File Service"
        depends_on = ["Tcpip"]
        "#
    )
    .unwrap();

    let cfg = ServiceFile::load(file.path()).unwrap();
    let hosts = cfg
        .services
        .iter()
        .map(|d| ServiceHost::new(d.clone(), ServiceCallbacks::new(|| {})))
        .collect();

    let port = Arc::new(MemoryPort::new());
    let process = SelfServiceProcess::new(port.clone(), hosts).with_config(cfg.control);
    process
        .install(cfg.account, cfg.credentials.as_ref(), cfg.exe_args.as_deref())
        .unwrap();

    let record = port.record("filesvc").unwrap();
    assert_eq!(record.display_name, "File Service");
    assert_eq!(record.dependencies.as_deref(), Some("Tcpip\0\0"));
    assert!(record.binary_path.ends_with("\" run --file svc.toml"));
}

#[test]
fn missing_service_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ServiceFile::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, selfserviced::ConfigError::Io { .. }));
}
