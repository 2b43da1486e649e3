use std::future::IntoFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use sqlx::mysql::MySqlPoolOptions;

use ocsp_responder::config::Config;
use ocsp_responder::ocsp;
use ocsp_responder::ocsp::cache::CacheLookup;
use ocsp_responder::ocsp::db::DbLookup;
use ocsp_responder::ocsp::file::MemorySource;
use ocsp_responder::ocsp::issuers::IssuerFilter;
use ocsp_responder::ocsp::metrics::{self, Metrics};
use ocsp_responder::ocsp::source::{DbSource, OcspLookup, Source};

#[derive(Parser)]
#[command(about = "OCSP responder serving pre-signed responses")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init_timed();
    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    let c = config.ocsp_responder;

    let registry = prometheus::Registry::new();

    let source: Arc<dyn Source> = match c.source.as_deref().and_then(|s| s.strip_prefix("file:")) {
        Some(path) => {
            info!("serving responses from {}", path);
            Arc::new(MemorySource::from_file(Path::new(path))?)
        }
        None => {
            let db = c
                .db
                .clone()
                .context("config must carry either a file: source or db settings")?;
            let pool = MySqlPoolOptions::new()
                .max_connections(db.max_open_conns)
                .connect(&db.url)
                .await
                .context("connecting to database")?;
            metrics::register_max_db_connections(&registry, db.max_open_conns)?;

            let filter = Arc::new(IssuerFilter::from_files(
                &c.issuer_certs,
                c.required_serial_prefixes.clone(),
            )?);
            let primary = DbLookup::new(pool, filter.clone());
            let secondary: Option<Box<dyn OcspLookup>> = match &c.redis {
                Some(redis) => {
                    info!("redis config found, using redis as the secondary source");
                    Some(Box::new(
                        CacheLookup::connect(&redis.url)
                            .await
                            .context("connecting to redis")?,
                    ))
                }
                None => {
                    info!("no redis config found, using the database as the only source");
                    None
                }
            };
            let m = Metrics::new(&registry)?;
            Arc::new(DbSource::new(
                Box::new(primary),
                secondary,
                filter,
                c.timeout(),
                m,
            ))
        }
    };

    if let Some(debug_address) = c.debug_address.clone() {
        let debug_app = metrics::debug_router(registry.clone());
        let listener = tokio::net::TcpListener::bind(&debug_address)
            .await
            .with_context(|| format!("binding debug listener on {}", debug_address))?;
        info!("debug listener on {}", debug_address);
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, debug_app).await {
                log::error!("debug listener failed: {}", err);
            }
        });
    }

    let state = Arc::new(ocsp::AppState {
        source,
        path_prefix: c.path.clone(),
        max_age: c.max_age_seconds,
    });
    let app = ocsp::router(state);

    let listener = tokio::net::TcpListener::bind(&c.listen_address)
        .await
        .with_context(|| format!("binding listener on {}", c.listen_address))?;
    info!("listening on {}", c.listen_address);

    // Drain in-flight connections after a signal, but never longer than the
    // configured stop timeout.
    let draining = Arc::new(tokio::sync::Notify::new());
    let signal_draining = draining.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining connections");
        signal_draining.notify_waiters();
    });

    let stop_timeout = c.shutdown_stop_timeout();
    tokio::select! {
        result = server.into_future() => result.context("running HTTP server")?,
        _ = async {
            draining.notified().await;
            tokio::time::sleep(stop_timeout).await;
        } => {
            warn!("shutdown stop timeout reached with connections still open");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
