//! EnvSwitch - Entry Point
//!
//! Command line front end over the activation coordinator. Every command
//! connects to the privileged backend, runs one coordinator operation and
//! prints the resulting notifications.

use anyhow::Result;
use clap::{Parser, Subcommand};
use envswitch::{
    coordinator::{spawn_runtime_monitor, ActivationCoordinator},
    core::{
        config::Config,
        credentials::TerminalPrompt,
        error::{CoordinatorError, CoordinatorResult},
        events::{AppEvent, EventSender, NotificationLevel},
        settings::{SettingsHandle, TomlSettingsStore},
    },
    gateway::{DaemonGateway, Gateway},
    BatchReport,
};
use envswitch_protocol::{RuntimeStatus, ServiceKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "envswitch", about = "Switch local development environments on and off")]
struct Cli {
    /// Backend address (overrides the config file)
    #[arg(long)]
    gateway: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List environments
    List,
    /// Show the services of an environment
    Services { environment: String },
    /// Switch an environment on or off
    Toggle { environment: String },
    /// Activate an environment
    Activate { environment: String },
    /// Deactivate an environment
    Deactivate { environment: String },
    /// Deactivate every active environment except one
    Only { environment: String },
    /// Deactivate every environment
    DeactivateAll,
    /// Re-activate the last used environments
    Resume,
    /// Create an environment
    Create { name: String },
    /// Rename an environment
    Rename { environment: String, name: String },
    /// Reorder environments (listed first to last)
    Reorder { environments: Vec<String> },
    /// Delete an inactive environment
    Delete { environment: String },
    /// Add a service to an environment
    AddService {
        environment: String,
        kind: ServiceKind,
        version: String,
    },
    /// Remove an inactive service
    RemoveService { environment: String, service: String },
    /// Activate one service
    ServiceOn { environment: String, service: String },
    /// Deactivate one service
    ServiceOff { environment: String, service: String },
    /// Start a service's process
    Start { environment: String, service: String },
    /// Stop a service's process
    Stop { environment: String, service: String },
    /// Restart a service's process
    Restart { environment: String, service: String },
    /// Show runtime status of an environment's services
    Status { environment: String },
    /// Keep polling runtime status until interrupted
    Watch { environment: String },
    /// Show or change settings
    Settings {
        /// Deactivate other environments when activating one
        #[arg(long)]
        deactivate_others: Option<bool>,
        /// Resume last used environments on start
        #[arg(long)]
        auto_resume: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load()?;
    if let Some(addr) = cli.gateway.clone() {
        config.gateway.addr = addr;
    }
    debug!("Configuration loaded: {:?}", config);

    let settings = Arc::new(SettingsHandle::new(Arc::new(
        TomlSettingsStore::default_location()?,
    )));

    // Settings need no backend
    if let Commands::Settings {
        deactivate_others,
        auto_resume,
    } = &cli.command
    {
        return run_settings(&settings, *deactivate_others, *auto_resume).await;
    }

    let transport = DaemonGateway::connect(&config.gateway.addr, config.gateway.request_timeout());
    let gateway = Gateway::new(Arc::new(transport));

    let (event_tx, event_rx) = EventSender::channel();
    let coordinator = Arc::new(
        ActivationCoordinator::new(gateway, settings, Arc::new(TerminalPrompt), event_tx)
            .with_loading_debounce(config.ui.loading_debounce()),
    );

    let outcome = run(&cli.command, &coordinator, &config, event_rx).await;
    if outcome.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(
    command: &Commands,
    coordinator: &Arc<ActivationCoordinator>,
    config: &Config,
    mut events: mpsc::UnboundedReceiver<AppEvent>,
) -> CoordinatorResult<()> {
    let initialized = coordinator.initialize().await;
    print_events(&mut events);
    initialized?;

    let result = dispatch(command, coordinator, config, &mut events).await;
    print_events(&mut events);
    result
}

async fn dispatch(
    command: &Commands,
    coordinator: &Arc<ActivationCoordinator>,
    config: &Config,
    events: &mut mpsc::UnboundedReceiver<AppEvent>,
) -> CoordinatorResult<()> {
    match command {
        Commands::List => {
            print_environments(coordinator);
            Ok(())
        }
        Commands::Services { environment } => {
            let id = resolve_environment(coordinator, environment)?;
            coordinator.select_environment(&id).await?;
            print_services(coordinator);
            Ok(())
        }
        Commands::Toggle { environment } => {
            let id = resolve_environment(coordinator, environment)?;
            coordinator.toggle_environment(&id).await
        }
        Commands::Activate { environment } => {
            let id = resolve_environment(coordinator, environment)?;
            coordinator.activate_environment(&id).await
        }
        Commands::Deactivate { environment } => {
            let id = resolve_environment(coordinator, environment)?;
            coordinator.deactivate_environment(&id).await
        }
        Commands::Only { environment } => {
            let id = resolve_environment(coordinator, environment)?;
            batch_result(coordinator.deactivate_others_except(&id).await)
        }
        Commands::DeactivateAll => batch_result(coordinator.deactivate_all().await),
        Commands::Resume => batch_result(coordinator.auto_resume().await),
        Commands::Create { name } => coordinator.create_environment(name).await.map(|env| {
            println!("{}\t{}", env.id, env.name);
        }),
        Commands::Rename { environment, name } => {
            let id = resolve_environment(coordinator, environment)?;
            coordinator.rename_environment(&id, name).await
        }
        Commands::Reorder { environments } => {
            let ids = environments
                .iter()
                .map(|key| resolve_environment(coordinator, key))
                .collect::<CoordinatorResult<Vec<_>>>()?;
            coordinator.reorder_environments(&ids).await
        }
        Commands::Delete { environment } => {
            let id = resolve_environment(coordinator, environment)?;
            coordinator.delete_environment(&id).await
        }
        Commands::AddService {
            environment,
            kind,
            version,
        } => {
            let id = resolve_environment(coordinator, environment)?;
            coordinator.select_environment(&id).await?;
            coordinator
                .create_service(&id, *kind, version)
                .await
                .map(|service| println!("{}\t{}\t{}", service.id, service.kind, service.version))
        }
        Commands::RemoveService {
            environment,
            service,
        } => {
            let id = focus_service(coordinator, environment, service).await?;
            coordinator.delete_service(&id).await
        }
        Commands::ServiceOn {
            environment,
            service,
        } => {
            let id = focus_service(coordinator, environment, service).await?;
            coordinator.activate_service(&id).await
        }
        Commands::ServiceOff {
            environment,
            service,
        } => {
            let id = focus_service(coordinator, environment, service).await?;
            coordinator.deactivate_service(&id).await
        }
        Commands::Start {
            environment,
            service,
        } => {
            let id = focus_service(coordinator, environment, service).await?;
            coordinator.start_service(&id).await
        }
        Commands::Stop {
            environment,
            service,
        } => {
            let id = focus_service(coordinator, environment, service).await?;
            coordinator.stop_service(&id).await
        }
        Commands::Restart {
            environment,
            service,
        } => {
            let id = focus_service(coordinator, environment, service).await?;
            coordinator.restart_service(&id).await
        }
        Commands::Status { environment } => {
            let id = resolve_environment(coordinator, environment)?;
            coordinator.select_environment(&id).await?;
            coordinator.poll_runtime_status().await;
            print_services(coordinator);
            Ok(())
        }
        Commands::Watch { environment } => {
            let id = resolve_environment(coordinator, environment)?;
            coordinator.select_environment(&id).await?;
            watch(coordinator, config, events).await;
            Ok(())
        }
        Commands::Settings { .. } => Ok(()),
    }
}

/// Poll runtime status and print every change until Ctrl-C
async fn watch(
    coordinator: &Arc<ActivationCoordinator>,
    config: &Config,
    events: &mut mpsc::UnboundedReceiver<AppEvent>,
) {
    let monitor = spawn_runtime_monitor(coordinator, config.ui.runtime_poll_interval());
    let mut ticker = tokio::time::interval(config.ui.runtime_poll_interval());
    let mut last = coordinator.state().runtime_statuses();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = events.recv() => print_event(&event),
            _ = ticker.tick() => {
                let current = coordinator.state().runtime_statuses();
                if current != last {
                    print_services(coordinator);
                    last = current;
                }
            }
        }
    }

    monitor.abort();
    info!("Stopped watching");
}

async fn run_settings(
    settings: &SettingsHandle,
    deactivate_others: Option<bool>,
    auto_resume: Option<bool>,
) -> Result<()> {
    settings.initialize().await?;

    if deactivate_others.is_some() || auto_resume.is_some() {
        settings
            .update(|s| {
                if let Some(value) = deactivate_others {
                    s.deactivate_other_environments_on_activate = value;
                }
                if let Some(value) = auto_resume {
                    s.auto_activate_last_used_environment_on_app_start = value;
                }
            })
            .await?;
    }

    let current = settings.current_or_default();
    println!(
        "deactivate-others: {}",
        current.deactivate_other_environments_on_activate
    );
    println!(
        "auto-resume: {}",
        current.auto_activate_last_used_environment_on_app_start
    );
    println!(
        "last used: {}",
        current.last_used_environment_ids.join(", ")
    );
    Ok(())
}

/// Accept an environment id or its (trimmed) name
fn resolve_environment(
    coordinator: &ActivationCoordinator,
    key: &str,
) -> CoordinatorResult<String> {
    let state = coordinator.state();
    state
        .environment(key)
        .or_else(|| state.environment_by_name(key.trim()))
        .map(|env| env.id)
        .ok_or_else(|| {
            let err = CoordinatorError::environment_not_found(key);
            eprintln!("error: {}", err);
            err
        })
}

/// Focus the environment, then accept a service id or a kind that appears
/// exactly once
async fn focus_service(
    coordinator: &ActivationCoordinator,
    environment: &str,
    key: &str,
) -> CoordinatorResult<String> {
    let env_id = resolve_environment(coordinator, environment)?;
    coordinator.select_environment(&env_id).await?;

    let state = coordinator.state();
    if state.service(key).is_some() {
        coordinator.select_service(Some(key))?;
        return Ok(key.to_string());
    }

    let by_kind: Vec<String> = match key.parse::<ServiceKind>() {
        Ok(kind) => state
            .services()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.id.clone())
            .collect(),
        Err(_) => Vec::new(),
    };
    match by_kind.as_slice() {
        [id] => {
            coordinator.select_service(Some(id))?;
            Ok(id.clone())
        }
        _ => {
            let err = CoordinatorError::service_not_found(key);
            eprintln!("error: {}", err);
            Err(err)
        }
    }
}

fn batch_result(report: BatchReport) -> CoordinatorResult<()> {
    for id in &report.skipped {
        eprintln!("skipped: {}", id);
    }
    match report.failed.into_iter().next() {
        Some((_, err)) => Err(err),
        None => Ok(()),
    }
}

fn print_environments(coordinator: &ActivationCoordinator) {
    let state = coordinator.state();
    let current = state.current_environment_id();
    for env in state.environments().iter() {
        let marker = if current.as_deref() == Some(env.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{} {}\t{}\t{}", marker, env.id, env.name, env.status);
    }
}

fn print_services(coordinator: &ActivationCoordinator) {
    let state = coordinator.state();
    for service in state.services().iter() {
        let runtime = state.runtime_status(&service.id);
        let runtime = if runtime == RuntimeStatus::Unknown {
            String::from("-")
        } else {
            runtime.to_string()
        };
        println!(
            "{}\t{}\t{}\t{}\t{}",
            service.id,
            service.kind.display_name(),
            service.version,
            service.status,
            runtime
        );
        for host in service.host_entries() {
            let mark = if host.enabled { "" } else { " (disabled)" };
            println!("\t{} {}{}", host.ip, host.hostname, mark);
        }
    }
}

fn print_events(events: &mut mpsc::UnboundedReceiver<AppEvent>) {
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
}

fn print_event(event: &AppEvent) {
    match event {
        AppEvent::Notification(notification) => {
            let label = match notification.level {
                NotificationLevel::Info => "info",
                NotificationLevel::Warning => "warning",
                NotificationLevel::Error => "error",
            };
            eprintln!("{}: {}", label, notification.message);
        }
        AppEvent::LoadingChanged(true) => eprintln!("working..."),
        AppEvent::LoadingChanged(false) | AppEvent::ActivationChanged(_) => {}
    }
}
