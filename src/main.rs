#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use dbforge::config::{LogSettings, Settings};
use dbforge::purge::PurgeService;
use dbforge::server::{router, AppState};

#[derive(Debug, Parser)]
#[command(name = "dbforge", about = "Installs and configures MySQL server instances on remote hosts")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "DBFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override server.addr
    #[arg(long)]
    addr: Option<String>,

    /// Override log.level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_ref())?;
    if let Some(addr) = cli.addr {
        settings.server.addr = addr;
    }
    if let Some(log_level) = cli.log_level {
        settings.log.level = log_level;
    }
    settings.validate()?;

    init_tracing(&settings.log)?;
    write_pid_file(&settings.server.pid_file)?;

    let pool = init_pool(&settings).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let purge = PurgeService::new(pool.clone(), settings.operation_timeout());
    let purge_handle = tokio::spawn(purge.run(shutdown_rx.clone()));
    let keep_alive_handle = tokio::spawn(keep_alive(
        pool.clone(),
        Duration::from_secs(settings.db.pool.keep_alive_interval),
        shutdown_rx,
    ));

    let addr = settings.server.addr.clone();
    let pid_file = settings.server.pid_file.clone();
    let state = AppState {
        settings: Arc::new(settings),
        pool,
    };

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind listener on {addr}"))?;
    info!("dbforge started. addr: {addr}, pid: {}", std::process::id());

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    // drain background tasks before exiting
    let _ = shutdown_tx.send(true);
    let _ = purge_handle.await;
    let _ = keep_alive_handle.await;
    let _ = std::fs::remove_file(&pid_file);
    info!("dbforge stopped");

    Ok(())
}

fn init_tracing(log: &LogSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&log.level).context("log.level is not a valid filter")?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (log.file_name.is_empty(), log.format.as_str()) {
        (true, "json") => builder.json().init(),
        (true, _) => builder.init(),
        (false, format) => {
            let file = std::fs::File::options()
                .append(true)
                .create(true)
                .open(&log.file_name)
                .with_context(|| format!("cannot open log file {}", log.file_name))?;
            let builder = builder.with_writer(Arc::new(file)).with_ansi(false);
            if format == "json" {
                builder.json().init()
            } else {
                builder.init()
            }
        }
    }

    Ok(())
}

fn write_pid_file(pid_file: &str) -> anyhow::Result<()> {
    if std::path::Path::new(pid_file).exists() {
        anyhow::bail!("pid file {pid_file} already exists, is another dbforge running?");
    }
    std::fs::write(pid_file, std::process::id().to_string()).with_context(|| format!("cannot write pid file {pid_file}"))
}

async fn init_pool(settings: &Settings) -> anyhow::Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(settings.db.pool.max_connections)
        .min_connections(settings.db.pool.init_connections)
        .idle_timeout(Duration::from_secs(settings.db.pool.max_idle_time))
        .acquire_timeout(Duration::from_secs(settings.db.pool.max_wait_time))
        .connect(&settings.db_url())
        .await
        .with_context(|| format!("cannot connect to {} as {}", settings.db.addr, settings.db.user))?;

    sqlx::query("SELECT 1").execute(&pool).await.context("database ping failed")?;

    Ok(pool)
}

async fn keep_alive(pool: MySqlPool, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = sqlx::query("SELECT 1").execute(&pool).await {
                    warn!("database keep-alive ping failed: {err}");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
