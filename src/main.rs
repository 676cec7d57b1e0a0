//! Recorder Link - command-line front end for recorder sessions and commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use recorder_link as app;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use app::config::{AppConfig, ConfigLoadResult, LoggingConfig};
use app::device::{DeviceEvent, DeviceManager, Notification};
use app::request::Command;
use app::wire::{FVS, RequestKind, join_fields};

/// Talk to network video recorders.
#[derive(Parser)]
#[command(name = "recorder-link", version)]
struct Cli {
    /// Use config.toml from current directory (dev mode)
    #[arg(long)]
    dev: bool,

    /// Explicit config file path
    #[arg(long, conflicts_with = "dev")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Log in and print device notifications until Ctrl-C
    Watch { device: String },
    /// Run one device command
    Command {
        device: String,
        /// Wire name, e.g. PTZ_CTRL
        command: Command,
        /// Command arguments, sent as separate values
        args: Vec<String>,
    },
    /// Read, write or reset a configuration table
    Config {
        operation: ConfigOperation,
        device: String,
        payload: String,
    },
    /// Save a camera snapshot to a file
    Snapshot { device: String, camera: u16, out: PathBuf },
    /// Validate the config file and exit
    CheckConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConfigOperation {
    Get,
    Set,
    Default,
}

impl ConfigOperation {
    fn kind(self) -> RequestKind {
        match self {
            ConfigOperation::Get => RequestKind::GetConfig,
            ConfigOperation::Set => RequestKind::SetConfig,
            ConfigOperation::Default => RequestKind::DefaultConfig,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Determine config path based on mode
    let config_path = match (&cli.config, cli.dev) {
        (Some(path), _) => path.clone(),
        (None, true) => PathBuf::from("config.toml"),
        (None, false) => AppConfig::default_path(),
    };

    let config = match AppConfig::try_load(&config_path) {
        ConfigLoadResult::Loaded(config) => config,
        ConfigLoadResult::Missing => bail!("Config file not found: {}", config_path.display()),
        ConfigLoadResult::Invalid(e) => bail!("Config file {} is invalid: {e}", config_path.display()),
    };

    let _guard = init_logging(&config.logging);
    tracing::info!("Recorder Link starting, config {:?}", config_path);

    match cli.action {
        Action::CheckConfig => {
            println!("{}: OK, {} device(s)", config_path.display(), config.devices.len());
            for device in &config.devices {
                println!("  {} -> {}:{}", device.name, device.address, device.tcp_port);
            }
            Ok(())
        }
        Action::Watch { device } => watch(&config, &device).await,
        Action::Command { device, command, args } => {
            let args = join_fields(&args, FVS);
            run_command(&config, &device, command, &args, None).await
        }
        Action::Config {
            operation,
            device,
            payload,
        } => run_config(&config, &device, operation.kind(), payload.as_bytes()).await,
        Action::Snapshot { device, camera, out } => {
            let args = camera.to_string();
            run_command(&config, &device, Command::Snapshot, args.as_bytes(), Some(&out)).await
        }
    }
}

/// Initialize stderr logging, plus daily files when a log directory is configured.
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match &logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "recorder-link.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            tracing_subscriber::registry().with(filter).with(stderr).with(file).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

/// Start only the named device.
fn start_device(config: &AppConfig, name: &str) -> anyhow::Result<(DeviceManager, UnboundedReceiver<Notification>)> {
    let device = config
        .device(name)
        .with_context(|| format!("No device named {name} in config"))?;
    let (mut manager, rx) = DeviceManager::new();
    manager.add_device(config.device_settings(device))?;
    Ok((manager, rx))
}

/// Longest reasonable wait for the first login.
fn login_wait(config: &AppConfig) -> Duration {
    let client = &config.client;
    Duration::from_secs(client.connect_timeout_secs * 2 + client.login_timeout_secs + 5)
}

async fn wait_logged_in(rx: &mut UnboundedReceiver<Notification>, limit: Duration) -> anyhow::Result<()> {
    let login = async {
        while let Some((name, event)) = rx.recv().await {
            match event {
                DeviceEvent::LoggedIn { model, camera_count } => {
                    tracing::info!("{name}: logged in to {model} ({camera_count} cameras)");
                    return Ok(());
                }
                DeviceEvent::LoginFailed(status) => bail!("{name}: login failed: {status}"),
                DeviceEvent::SessionEnded(exit) => bail!("{name}: session ended: {exit:?}"),
                _ => {}
            }
        }
        bail!("device channel closed")
    };
    tokio::time::timeout(limit, login).await.context("Timed out waiting for login")?
}

async fn watch(config: &AppConfig, name: &str) -> anyhow::Result<()> {
    let (mut manager, mut rx) = start_device(config, name)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notification = rx.recv() => match notification {
                Some((device, event)) => println!("{device}: {}", describe(&event)),
                None => break,
            },
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn run_command(
    config: &AppConfig,
    name: &str,
    command: Command,
    args: &[u8],
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let (mut manager, mut rx) = start_device(config, name)?;
    wait_logged_in(&mut rx, login_wait(config)).await?;

    manager.submit_command(name, command, args)?;
    let response = loop {
        match rx.recv().await {
            Some((_, DeviceEvent::Command(response))) => break response,
            Some(_) => continue,
            None => bail!("device channel closed"),
        }
    };
    manager.shutdown().await;

    if !response.reply.status.is_success() {
        bail!("{command} failed: {}", response.reply.status);
    }
    match out {
        Some(path) => {
            std::fs::write(path, &response.reply.payload)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Saved {} bytes to {}", response.reply.payload.len(), path.display());
        }
        None => println!("{command}: {}", printable(&response.reply.payload)),
    }
    Ok(())
}

async fn run_config(config: &AppConfig, name: &str, kind: RequestKind, payload: &[u8]) -> anyhow::Result<()> {
    let (mut manager, mut rx) = start_device(config, name)?;
    wait_logged_in(&mut rx, login_wait(config)).await?;

    manager.submit_request(name, kind, payload)?;
    let reply = loop {
        match rx.recv().await {
            Some((_, DeviceEvent::Config { reply, .. })) => break reply,
            Some(_) => continue,
            None => bail!("device channel closed"),
        }
    };
    manager.shutdown().await;

    if !reply.status.is_success() {
        bail!("{kind} failed: {}", reply.status);
    }
    println!("{}", printable(&reply.payload));
    Ok(())
}

/// Show separators as `|` and `,` so replies fit on a terminal line.
fn printable(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).replace('\u{1e}', " | ").replace('\u{1f}', ",")
}

fn describe(event: &DeviceEvent) -> String {
    match event {
        DeviceEvent::LoggedIn { model, camera_count } => format!("logged in ({model}, {camera_count} cameras)"),
        DeviceEvent::LoginFailed(status) => format!("login failed: {status}"),
        DeviceEvent::Link(state) => format!("link {state:?}"),
        DeviceEvent::Health(health) => {
            let categories: Vec<String> = health
                .categories
                .iter()
                .map(|(name, flags)| {
                    let bits: String = flags.iter().map(|f| if *f { '1' } else { '0' }).collect();
                    format!("{name}={bits}")
                })
                .collect();
            format!("health {}", categories.join(" "))
        }
        DeviceEvent::Live(event) => format!(
            "{} {} source {} {} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.kind,
            event.source,
            event.state,
            event.detail
        ),
        DeviceEvent::EventFetchFailed(status) => format!("event fetch failed: {status}"),
        DeviceEvent::Config { kind, reply } => format!("{kind}: {}", reply.status),
        DeviceEvent::Command(response) => format!("{}: {}", response.command, response.reply.status),
        DeviceEvent::PasswordReset(response) => format!("{}: {}", response.command, response.reply.status),
        DeviceEvent::SessionEnded(exit) => format!("session ended: {exit:?}"),
    }
}
