mod cli;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use selfserviced::{
    CallbacksBuilder, ControlConfig, MemoryPort, SelfServiceProcess, ServiceFile, ServiceHost,
    ServicePort, native_port,
};

fn main() {
    // Initialize logger with custom format; RUST_LOG overrides the level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();

    if let Err(e) = real_main() {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let args = cli::Args::parse();

    match args.sub {
        cli::Cmd::Install { file, dry_run } => handle_install(&file, dry_run),
        cli::Cmd::Uninstall { file, dry_run } => handle_uninstall(&file, dry_run),
        cli::Cmd::Start { name } => handle_start(&name),
        cli::Cmd::Stop { name } => handle_stop(&name),
        cli::Cmd::Status { name } => handle_status(&name),
        cli::Cmd::Run { file } => handle_run(&file),
    }
}

fn load(file: &Path) -> Result<ServiceFile> {
    ServiceFile::load(file).with_context(|| format!("Failed to load service file {}", file.display()))
}

/// Arguments the service manager should launch us with: the file's own
/// `exe_args`, or `run --file <absolute path>`.
fn exe_args_for(file: &Path, cfg: &ServiceFile) -> Result<String> {
    if let Some(args) = &cfg.exe_args {
        return Ok(args.clone());
    }
    let abs = std::fs::canonicalize(file).context("Failed to resolve service file path")?;
    Ok(format!("run --file \"{}\"", abs.display()))
}

/// Hosts for every service in the file, all sharing the demo worker.
fn hosts(cfg: &ServiceFile) -> Result<Vec<ServiceHost>> {
    cfg.services
        .iter()
        .map(|descriptor| -> Result<ServiceHost> {
            let running = Arc::new(AtomicBool::new(false));
            let name = descriptor.name.clone();
            let (on_stop, on_shutdown) = (running.clone(), running.clone());
            let callbacks = CallbacksBuilder::default()
                .on_start(move || {
                    running.store(true, Ordering::SeqCst);
                    let running = running.clone();
                    let name = name.clone();
                    thread::spawn(move || {
                        while running.load(Ordering::SeqCst) {
                            info!("service '{}' heartbeat", name);
                            thread::sleep(Duration::from_secs(30));
                        }
                    });
                })
                .on_stop(move || on_stop.store(false, Ordering::SeqCst))
                .on_shutdown(move || on_shutdown.store(false, Ordering::SeqCst))
                .on_power_event(|event| {
                    info!("power event {:?}", event);
                    true
                })
                .build()?;
            Ok(ServiceHost::new(descriptor.clone(), callbacks))
        })
        .collect()
}

fn process_for(cfg: &ServiceFile, dry_run: bool) -> Result<(SelfServiceProcess, Option<Arc<MemoryPort>>)> {
    if dry_run {
        let memory = Arc::new(MemoryPort::new().with_settle_queries(0));
        let port: Arc<dyn ServicePort> = memory.clone();
        let process = SelfServiceProcess::new(port, hosts(cfg)?).with_config(ControlConfig::immediate());
        return Ok((process, Some(memory)));
    }
    let port = native_port().context("Service management is unavailable")?;
    Ok((SelfServiceProcess::new(port, hosts(cfg)?).with_config(cfg.control), None))
}

fn handle_install(file: &Path, dry_run: bool) -> Result<()> {
    let cfg = load(file)?;
    let exe_args = exe_args_for(file, &cfg)?;
    let (process, memory) = process_for(&cfg, dry_run)?;

    if let Err(e) = process.install(cfg.account, cfg.credentials.as_ref(), Some(exe_args.as_str())) {
        if e.is_validation() {
            anyhow::bail!("{} rejected before touching the service database: {e}", file.display());
        }
        return Err(e).context("Failed to install services");
    }

    if let Some(memory) = memory {
        for name in memory.service_names() {
            if let Some(record) = memory.record(&name) {
                println!(
                    "{} ({:?}, {:?}) -> {} deps={:?} account={:?}",
                    record.name,
                    record.service_type,
                    record.start_mode,
                    record.binary_path,
                    record.dependencies,
                    record.account_name
                );
            }
        }
    }
    println!("installed {} service(s)", process.hosts().len());
    Ok(())
}

fn handle_uninstall(file: &Path, dry_run: bool) -> Result<()> {
    let cfg = load(file)?;
    let (process, memory) = process_for(&cfg, dry_run)?;

    if let Some(memory) = &memory {
        // Nothing is registered in a fresh in-memory database; seed it first.
        process
            .install(cfg.account, cfg.credentials.as_ref(), cfg.exe_args.as_deref())
            .context("Failed to seed in-memory database")?;
        info!("seeded {} record(s)", memory.service_names().len());
    }

    process.uninstall().context("Failed to uninstall services")?;
    println!("uninstalled {} service(s)", process.hosts().len());
    Ok(())
}

fn controller_process() -> Result<SelfServiceProcess> {
    let port = native_port().context("Service management is unavailable")?;
    Ok(SelfServiceProcess::new(port, Vec::new()))
}

/// Handle start command - start a service and wait for it
fn handle_start(name: &str) -> Result<()> {
    if controller_process()?.start(name) {
        println!("{name} started successfully");
        std::process::exit(0);
    }
    eprintln!("Failed to start {name}");
    std::process::exit(1);
}

/// Handle stop command - stop a service and wait for it
fn handle_stop(name: &str) -> Result<()> {
    if controller_process()?.stop(name) {
        println!("{name} stopped successfully");
        std::process::exit(0);
    }
    eprintln!("Failed to stop {name}");
    std::process::exit(1);
}

/// Handle status command - print the live status
fn handle_status(name: &str) -> Result<()> {
    match controller_process()?.status(name) {
        Some(status) => {
            println!("{name} is {status}");
            std::process::exit(if status == selfserviced::RuntimeStatus::Running { 0 } else { 1 });
        }
        None => {
            eprintln!("Could not query {name}");
            std::process::exit(1);
        }
    }
}

/// Handle run command - service mode, entered when launched by the service manager
fn handle_run(file: &Path) -> Result<()> {
    let cfg = load(file)?;
    let (process, _) = process_for(&cfg, false)?;
    info!("entering service mode (pid {})", std::process::id());
    process
        .execute_services()
        .context("Failed to run as a service (was this launched by the service manager?)")?;
    info!("all services stopped, exiting");
    Ok(())
}
