//! meshlink network configuration CLI
//!
//! Converges a tunnel interface, its routes and the system resolver to the
//! state described in a settings file.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use meshlink_netcfg::dns::{self, OSConfig};
use meshlink_netcfg::exec::CommandRunner;
use meshlink_netcfg::router::{self, Router};
use meshlink_netcfg::{Settings, SystemRunner};

/// meshlink network reconciler
#[derive(Parser)]
#[command(name = "meshlink-netctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to settings file
    #[arg(short, long, default_value = "meshlink.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the settings and keep them applied until signalled
    Run,

    /// Remove everything a previous run applied and restore resolv.conf
    Down,

    /// Remove a leftover interface from a crashed run
    Cleanup,

    /// Print the host's own DNS settings
    BaseDns,

    /// Generate a sample settings file
    GenConfig {
        /// Output path for the settings file
        #[arg(short, long, default_value = "meshlink.toml")]
        output: PathBuf,
    },
}

/// Work handed to the reconciler thread
enum Message {
    Apply(router::Config),
    Shutdown,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    // External tools are driven synchronously, so only `run` needs an async
    // runtime, and it keeps reconciling off the runtime's threads.
    match cli.command {
        Commands::Run => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(run(cli.config))
        }
        Commands::Down => down(&cli.config),
        Commands::Cleanup => cleanup(&cli.config),
        Commands::BaseDns => base_dns(&cli.config),
        Commands::GenConfig { output } => generate_config(output),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config_path: PathBuf) -> Result<()> {
    let settings = load_settings(&config_path)?;
    info!("Configuration loaded from {:?}", config_path);

    let (tx, rx) = mpsc::channel();
    let (done_tx, mut done_rx) = oneshot::channel::<()>();

    let worker = thread::Builder::new()
        .name("reconciler".into())
        .spawn(move || {
            let result = reconcile(settings, rx);
            let _ = done_tx.send(());
            result
        })
        .context("Failed to spawn reconciler thread")?;

    let mut signals = Signals::new()?;

    loop {
        tokio::select! {
            event = signals.next() => match event {
                Event::Reload => match load_settings(&config_path) {
                    Ok(settings) => {
                        info!("Reloaded configuration from {:?}", config_path);
                        if tx.send(Message::Apply(settings.desired)).is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("Keeping current configuration: {:#}", e),
                },
                Event::Shutdown => break,
            },
            _ = &mut done_rx => {
                warn!("Reconciler stopped");
                break;
            }
        }
    }

    info!("Shutting down...");
    let _ = tx.send(Message::Shutdown);

    tokio::task::spawn_blocking(move || worker.join())
        .await
        .context("Failed to wait for reconciler")?
        .map_err(|_| anyhow!("reconciler thread panicked"))?
}

/// Owns the router for the lifetime of `run`
fn reconcile(settings: Settings, rx: mpsc::Receiver<Message>) -> Result<()> {
    let runner = new_runner(&settings)?;

    router::cleanup(&settings.interface, runner.as_ref());
    let mut router = new_router(&settings, runner)?;

    if let Err(e) = router.up() {
        error!("Failed to bring up {}: {}", settings.interface, e);
        if let Err(e) = router.close() {
            warn!("Cleanup after failed start: {}", e);
        }
        return Err(e).context("Failed to bring up interface");
    }

    apply(router.as_mut(), &settings.desired);

    // A dropped sender means the front end is gone; tear down as on Shutdown.
    for message in rx {
        match message {
            Message::Apply(desired) => apply(router.as_mut(), &desired),
            Message::Shutdown => break,
        }
    }

    info!("Removing network configuration from {}", settings.interface);
    if let Err(e) = router.set(None) {
        error!("Failed to remove configuration: {}", e);
    }
    router.close().context("Failed to close router")?;

    info!("Network configuration removed");
    Ok(())
}

fn apply(router: &mut dyn Router, desired: &router::Config) {
    match router.set(Some(desired)) {
        Ok(()) => info!(
            "Applied {} addresses, {} routes, DNS {}",
            desired.local_addrs.len(),
            desired.routes.len(),
            desired.dns
        ),
        Err(e) if e.is_retryable() => {
            error!("Failed to apply configuration, will retry on reload: {}", e)
        }
        Err(e) => error!("Failed to apply configuration: {}", e),
    }
}

fn new_runner(settings: &Settings) -> Result<Arc<dyn CommandRunner>> {
    let runner = SystemRunner::with_timeout(settings.command_timeout())
        .context("Failed to create command runner")?;
    Ok(Arc::new(runner))
}

fn new_router(settings: &Settings, runner: Arc<dyn CommandRunner>) -> Result<Box<dyn Router>> {
    let manager = dns::Manager::new(settings.manager_config(runner.clone()));
    router::new_userspace_router(settings.interface.clone(), runner, manager)
        .with_context(|| format!("Failed to create router for {}", settings.interface))
}

fn down(config_path: &Path) -> Result<()> {
    let settings = load_settings(config_path)?;
    let runner = new_runner(&settings)?;

    let mut router = new_router(&settings, runner)?;
    router.close().context("Failed to restore DNS")?;

    info!("Removed network configuration from {}", settings.interface);
    Ok(())
}

fn cleanup(config_path: &Path) -> Result<()> {
    let settings = load_settings(config_path)?;
    let runner = new_runner(&settings)?;

    router::cleanup(&settings.interface, runner.as_ref());
    info!("Cleaned up {}", settings.interface);
    Ok(())
}

fn base_dns(config_path: &Path) -> Result<()> {
    let settings = load_settings(config_path)?;
    let runner = new_runner(&settings)?;

    let manager = dns::Manager::new(settings.manager_config(runner));
    let base = manager
        .base_config()
        .context("Failed to read host DNS settings")?;

    print_os_config(&base);
    Ok(())
}

fn print_os_config(config: &OSConfig) {
    if config.is_zero() {
        println!("No host DNS settings found");
        return;
    }

    for ns in &config.nameservers {
        println!("nameserver {}", ns);
    }
    if !config.search_domains.is_empty() {
        let domains: Vec<&str> = config
            .search_domains
            .iter()
            .map(|d| d.without_trailing_dot())
            .collect();
        println!("search {}", domains.join(" "));
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    Settings::load(path).with_context(|| format!("Failed to load configuration from {:?}", path))
}

fn generate_config(output: PathBuf) -> Result<()> {
    let sample = Settings::sample();

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    info!("Generated sample configuration at {:?}", output);
    println!("Sample configuration written to {:?}", output);
    println!("\nEdit the interface name and desired state before running.");

    Ok(())
}

enum Event {
    Reload,
    Shutdown,
}

#[cfg(unix)]
struct Signals {
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            hangup: signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?,
            interrupt: signal(SignalKind::interrupt())
                .context("Failed to register SIGINT handler")?,
            terminate: signal(SignalKind::terminate())
                .context("Failed to register SIGTERM handler")?,
        })
    }

    async fn next(&mut self) -> Event {
        tokio::select! {
            _ = self.hangup.recv() => {
                info!("Received SIGHUP");
                Event::Reload
            }
            _ = self.interrupt.recv() => {
                info!("Received SIGINT");
                Event::Shutdown
            }
            _ = self.terminate.recv() => {
                info!("Received SIGTERM");
                Event::Shutdown
            }
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Event {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Received Ctrl+C");
        Event::Shutdown
    }
}
