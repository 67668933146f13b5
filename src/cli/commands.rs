use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, warn};

use crate::cli::{Args, Commands};
use crate::config::Config;
use crate::listener::Listener;
use crate::manager::Manager;
use crate::services::api::{start_api_server, ApiState};
use crate::services::database::DatabaseService;
use crate::services::sink::{HeartbeatSink, NullSink, ShareRecorder, ShareSink};
use crate::services::stats::{spawn_heartbeat, NodeIdentity};
use crate::services::sync::spawn_sync;

pub async fn execute(args: Args) -> Result<()> {
    setup_logging(&args)?;

    match args.command {
        Commands::Start { daemon } => start_server(args.config, daemon).await,
        Commands::Config { file, show } => validate_config(file, show).await,
        Commands::Init { output, force } => init_config(output, force).await,
    }
}

async fn start_server(config_path: Option<PathBuf>, daemon: bool) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;
    info!("configuration validated, {} listen ports", config.ports.len());

    let config = Arc::new(config);
    let node = NodeIdentity::generate();
    info!("node identity: {}", node.id);

    // Database is optional; a relay without one still forwards shares and
    // serves its own local stats.
    let database = if config.database.any() {
        match DatabaseService::connect(&config.database, &node).await {
            Ok(db) => Some(Arc::new(db)),
            Err(e) => {
                error!("database unavailable, continuing without persistence: {e}");
                None
            }
        }
    } else {
        None
    };

    let share_sink: Arc<dyn ShareSink> = match &database {
        Some(db) => db.clone(),
        None => Arc::new(NullSink),
    };
    let heartbeat_sink: Arc<dyn HeartbeatSink> = match &database {
        Some(db) => db.clone(),
        None => Arc::new(NullSink),
    };

    let (recorder, _writer) = ShareRecorder::spawn(share_sink, 1024);
    let manager = Arc::new(Manager::new(config.clone(), recorder));

    spawn_sync(manager.pool_data().clone(), config.sync.clone());
    spawn_heartbeat(
        manager.stats().clone(),
        heartbeat_sink,
        node,
        config.sync.heartbeat_interval,
    );

    if config.api.enabled {
        let api = start_api_server(
            &config.api,
            ApiState {
                stats: manager.stats().clone(),
                database,
            },
        )
        .await?;
        tokio::spawn(api);
    }

    let listener = Listener::bind(manager).await?;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = listener.accept().await {
            error!("server error: {}", e);
        }
    });

    info!("relay started");

    if daemon {
        server_handle.await?;
    } else {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received shutdown signal");
            }
            result = server_handle => {
                if let Err(e) = result {
                    error!("server task failed: {}", e);
                }
            }
        }
    }

    info!("shutdown complete");
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("loading configuration from {}", path.display());
            Ok(Config::load_from_file(path)?)
        }
        None => {
            let mut config = Config::default();
            config.apply_env();
            Ok(config)
        }
    }
}

async fn validate_config(file: PathBuf, show: bool) -> Result<()> {
    info!("validating configuration file: {}", file.display());

    let config = Config::load_from_file(&file)?;
    config.validate()?;

    info!("configuration is valid");

    if show {
        println!("Effective configuration:");
        println!("{:#?}", config);
    }

    Ok(())
}

async fn init_config(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        warn!(
            "{} already exists, pass --force to overwrite",
            output.display()
        );
        return Ok(());
    }

    let rendered = toml::to_string_pretty(&Config::default())?;
    std::fs::write(&output, rendered)?;
    info!("wrote example configuration to {}", output.display());

    Ok(())
}

fn setup_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_level = match args.verbose {
        0 => &args.log_level,
        1 => "debug",
        _ => "trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let use_json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    if use_json_format {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(false)
                    .compact(),
            )
            .init();
    }

    Ok(())
}
