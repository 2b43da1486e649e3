use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub const RESULT_CANCELED: &str = "canceled";
pub const RESULT_MYSQL_SUCCESS: &str = "mysql_success";
pub const RESULT_MYSQL_FAILED: &str = "mysql_failed";
pub const RESULT_REDIS_SUCCESS: &str = "redis_success";
pub const RESULT_REDIS_FAILED: &str = "redis_failed";
pub const RESULT_REDIS_MISMATCH: &str = "redis_mismatch";

pub const SOURCE_MYSQL: &str = "mysql";
pub const SOURCE_REDIS: &str = "redis";
pub const SOURCE_ERROR_RETURNED: &str = "error_returned";

/// Counters incremented once per request that reaches the resolver race.
#[derive(Clone)]
pub struct Metrics {
    pub(crate) lookups: IntCounterVec,
    pub(crate) source_used: IntCounterVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Metrics> {
        let lookups = IntCounterVec::new(
            Opts::new("ocsp_lookups", "A counter of OCSP lookups labeled by result"),
            &["result"],
        )?;
        registry.register(Box::new(lookups.clone()))?;

        let source_used = IntCounterVec::new(
            Opts::new("lookup_source_used", "A counter of lookups returned labeled by the source used"),
            &["source"],
        )?;
        registry.register(Box::new(source_used.clone()))?;

        Ok(Metrics { lookups, source_used })
    }

    pub fn lookup(&self, result: &str) {
        self.lookups.with_label_values(&[result]).inc();
    }

    pub fn source_used(&self, source: &str) {
        self.source_used.with_label_values(&[source]).inc();
    }
}

pub fn register_max_db_connections(registry: &Registry, max_open_conns: u32) -> prometheus::Result<()> {
    let gauge = IntGauge::new("max_db_connections", "Maximum number of DB connections allowed.")?;
    registry.register(Box::new(gauge.clone()))?;
    gauge.set(max_open_conns as i64);
    Ok(())
}

/// Router for the debug listener, exposing the registry in Prometheus text
/// format.
pub fn debug_router(registry: Registry) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let registry = registry.clone();
            async move {
                let encoder = TextEncoder::new();
                let mut buffer = Vec::new();
                match encoder.encode(&registry.gather(), &mut buffer) {
                    Ok(()) => (
                        StatusCode::OK,
                        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
                        buffer,
                    )
                        .into_response(),
                    Err(err) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
                    }
                }
            }
        }),
    )
}
