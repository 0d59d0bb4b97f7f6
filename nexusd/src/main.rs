//! nexusd: the Nexus agent daemon.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nexus_backend_openai::{OpenAiLikeBackend, OpenAiLikeConfig};
use nexus_brain::{Brain, TierModels};
use nexus_common::{MemoryStore, QueueStore, RedisStore};
use nexus_containers::{ContainerManager, DockerEngine};
use nexus_gate::CommandGate;
use nexusd::{load_config, resolve_config_path, Daemon, DaemonConfig};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nexusd", version, about = "Nexus agent daemon")]
struct Cli {
    /// Path to the daemon configuration (nexusd.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Redis URL of the shared store (or use NEXUS_REDIS_URL)
    #[arg(long)]
    redis_url: Option<String>,

    /// Use an in-process store instead of Redis
    #[arg(long)]
    memory: bool,

    /// Control loop interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Exit instead of warning when another instance holds the inbox
    #[arg(long)]
    refuse_if_running: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config_path = resolve_config_path(cli.config.clone());
    let mut config = load_config(config_path.as_deref());
    config.apply_env();
    if let Some(url) = cli.redis_url {
        config.store.redis_url = url;
    }
    if cli.memory {
        config.store.memory = true;
    }
    if let Some(interval) = cli.interval_ms {
        config.daemon.interval_ms = interval;
    }
    if cli.refuse_if_running {
        config.daemon.refuse_if_running = true;
    }

    info!("nexusd version {}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config).await?;
    let brain = Arc::new(build_brain(&config)?);
    let gate = CommandGate::new(config.gate.working_dir.clone())
        .with_shell(config.gate.shell.clone())
        .with_extra_patterns(config.gate.compiled_patterns());

    let mut builder = Daemon::builder(store, brain)
        .settings(config.daemon.clone())
        .gate(gate)
        .configured_limits(config.gate.configured_limits());
    if let Some(manager) = connect_containers(&config) {
        builder = builder.containers(manager);
    }
    let daemon = builder.build();

    spawn_signal_handlers(daemon.clone());
    daemon.run().await?;
    info!("nexusd exited cleanly");
    Ok(())
}

async fn open_store(config: &DaemonConfig) -> Result<Arc<dyn QueueStore>> {
    if config.store.memory {
        warn!("Using the in-process store; producers in other processes will not see it");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = RedisStore::connect(&config.store.redis_url)
        .await
        .with_context(|| format!("connect to store at {}", config.store.redis_url))?;
    info!("Connected to store at {}", config.store.redis_url);
    Ok(Arc::new(store))
}

fn build_brain(config: &DaemonConfig) -> Result<Brain> {
    let settings = &config.brain;
    let backend_config =
        OpenAiLikeConfig::from_env(settings.base_url.as_deref(), &settings.api_key_env);
    if backend_config.api_key.is_none() {
        warn!(
            "{} is not set; model calls will be sent without credentials",
            settings.api_key_env
        );
    }
    let backend = OpenAiLikeBackend::new(backend_config).context("build model backend")?;
    info!("Model endpoint: {}", backend.endpoint());

    let mut models = TierModels::default();
    let rejected = models.apply_overrides(&settings.models);
    for name in rejected {
        warn!("Ignoring model override for unknown tier '{}'", name);
    }

    Ok(Brain::new(Arc::new(backend))
        .with_models(models)
        .with_default_max_tokens(settings.max_tokens))
}

fn connect_containers(config: &DaemonConfig) -> Option<Arc<ContainerManager>> {
    if !config.containers.enabled {
        info!("Container management disabled");
        return None;
    }
    match DockerEngine::connect() {
        Ok(engine) => Some(Arc::new(ContainerManager::with_catalogue(
            Arc::new(engine),
            config.containers.tools.clone(),
        ))),
        Err(err) => {
            warn!("Container engine unavailable; docker actions will fail: {}", err);
            None
        }
    }
}

fn spawn_signal_handlers(daemon: Arc<Daemon>) {
    let ctrl_c_daemon = daemon.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C; shutting down daemon");
            ctrl_c_daemon.stop();
        }
    });

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                return;
            }
        };
        tokio::spawn(async move {
            if sigterm.recv().await.is_some() {
                info!("Received SIGTERM; shutting down daemon");
                daemon.stop();
            }
        });
    }
}
