use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue};
use chrono::prelude::*;
use tokio::sync::oneshot;

use super::issuers::IssuerFilter;
use super::metrics::{self, Metrics};
use super::types::{self, OcspError, OcspRequestInfo, ParsedOcspResponse};

/// Exactly one of bytes or error, delivered once per lookup.
pub type LookupResponse = Result<Vec<u8>, OcspError>;

/// A backend able to fetch stored OCSP response bytes. Implementations
/// spawn their I/O onto the runtime and deliver exactly one result on the
/// returned channel. A receiver that has gone away is not an error; the
/// resolver abandons channels it no longer needs.
pub trait OcspLookup: Send + Sync {
    fn get_response(&self, req: &OcspRequestInfo) -> oneshot::Receiver<LookupResponse>;
}

/// What a source hands to the HTTP layer: the verbatim stored bytes plus
/// the metadata driving cache headers.
#[derive(Debug)]
pub struct SourceResponse {
    pub bytes: Vec<u8>,
    pub headers: HeaderMap,
    pub produced_at: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait Source: Send + Sync {
    async fn response(&self, req: &OcspRequestInfo) -> Result<SourceResponse, OcspError>;
}

/// Race coordinator over the authoritative database lookup and an optional
/// cache lookup.
///
/// The bytes returned to a client never represent a less severe status than
/// the primary source currently reports: a secondary win is only honored
/// after the primary has answered with the same status.
pub struct DbSource {
    primary: Box<dyn OcspLookup>,
    secondary: Option<Box<dyn OcspLookup>>,
    filter: Arc<IssuerFilter>,
    timeout: Option<Duration>,
    metrics: Metrics,
}

impl DbSource {
    pub fn new(
        primary: Box<dyn OcspLookup>,
        secondary: Option<Box<dyn OcspLookup>>,
        filter: Arc<IssuerFilter>,
        timeout: Option<Duration>,
        metrics: Metrics,
    ) -> DbSource {
        DbSource { primary, secondary, filter, timeout, metrics }
    }

    /// Maps a finished primary lookup to its bytes and parsed form. Does not
    /// touch the success counters; the caller records which source won.
    fn primary_outcome(&self, result: LookupResponse) -> Result<(Vec<u8>, ParsedOcspResponse), OcspError> {
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("looking up OCSP response: {}", err);
                self.metrics.lookup(metrics::RESULT_MYSQL_FAILED);
                self.metrics.source_used(metrics::SOURCE_ERROR_RETURNED);
                return Err(err);
            }
        };
        match types::parse_ocsp_resp(&bytes) {
            Ok(parsed) => Ok((bytes, parsed)),
            Err(err) => {
                error!("parsing OCSP response from primary source: {}", err);
                self.metrics.lookup(metrics::RESULT_MYSQL_FAILED);
                self.metrics.source_used(metrics::SOURCE_ERROR_RETURNED);
                Err(err)
            }
        }
    }

    async fn race(&self, req: &OcspRequestInfo) -> Result<(Vec<u8>, ParsedOcspResponse), OcspError> {
        let mut primary_rx = self.primary.get_response(req);

        let mut secondary_rx = match &self.secondary {
            Some(secondary) => secondary.get_response(req),
            None => {
                let (bytes, parsed) = self.primary_outcome(flatten(primary_rx.await))?;
                debug!("returning OCSP response from primary source for serial {}", req.serial);
                self.metrics.lookup(metrics::RESULT_MYSQL_SUCCESS);
                self.metrics.source_used(metrics::SOURCE_MYSQL);
                return Ok((bytes, parsed));
            }
        };

        tokio::select! {
            primary = &mut primary_rx => {
                let (bytes, parsed) = self.primary_outcome(flatten(primary))?;
                debug!("returning OCSP response from primary source for serial {}", req.serial);
                self.metrics.lookup(metrics::RESULT_MYSQL_SUCCESS);
                self.metrics.source_used(metrics::SOURCE_MYSQL);
                Ok((bytes, parsed))
            }
            secondary = &mut secondary_rx => {
                // The secondary may hold a stale "Good" while the primary has
                // a newer revocation, so its answer only counts once the
                // primary has reported the same status.
                let secondary = flatten(secondary);
                let primary = flatten((&mut primary_rx).await);
                let (primary_bytes, primary_parsed) = self.primary_outcome(primary)?;

                match secondary.and_then(|bytes| {
                    types::parse_ocsp_resp(&bytes).map(|parsed| (bytes, parsed))
                }) {
                    Err(err) => {
                        debug!("secondary OCSP lookup response error: {}", err);
                        self.metrics.lookup(metrics::RESULT_REDIS_FAILED);
                        self.metrics.source_used(metrics::SOURCE_MYSQL);
                        Ok((primary_bytes, primary_parsed))
                    }
                    Ok((secondary_bytes, secondary_parsed)) => {
                        if primary_parsed.status != secondary_parsed.status {
                            error!("primary OCSP source does not match secondary source, returning primary response");
                            self.metrics.lookup(metrics::RESULT_REDIS_MISMATCH);
                            self.metrics.source_used(metrics::SOURCE_MYSQL);
                            Ok((primary_bytes, primary_parsed))
                        } else {
                            debug!("returning OCSP response from secondary source for serial {}", req.serial);
                            self.metrics.lookup(metrics::RESULT_REDIS_SUCCESS);
                            self.metrics.source_used(metrics::SOURCE_REDIS);
                            Ok((secondary_bytes, secondary_parsed))
                        }
                    }
                }
            }
        }
    }
}

fn flatten(result: Result<LookupResponse, oneshot::error::RecvError>) -> LookupResponse {
    match result {
        Ok(response) => response,
        // A lookup dropping its sender without sending is a bug in the
        // lookup, not a condition to recover from.
        Err(_) => Err(OcspError::Internal(
            "lookup closed its channel without sending a result".to_string(),
        )),
    }
}

#[async_trait::async_trait]
impl Source for DbSource {
    async fn response(&self, req: &OcspRequestInfo) -> Result<SourceResponse, OcspError> {
        self.filter.check_request(req)?;

        debug!("searching for OCSP response issued by us for serial {}", req.serial);

        let mut headers = HeaderMap::new();
        if req.serial.len() >= 2 {
            // The tag is the serial's last two hex digits; each tag covers
            // about 1/256 of all responses.
            if let Ok(tag) = HeaderValue::from_str(&req.serial[req.serial.len() - 2..]) {
                headers.insert("edge-cache-tag", tag);
            }
        }

        let race = self.race(req);
        let (bytes, parsed) = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, race).await {
                Ok(result) => result?,
                Err(_) => {
                    debug!("looking up OCSP response for serial {}: deadline exceeded", req.serial);
                    self.metrics.lookup(metrics::RESULT_CANCELED);
                    return Err(OcspError::Canceled(req.serial.clone()));
                }
            },
            None => race.await?,
        };

        debug!(
            "OCSP response sent for CA={}, serial={}",
            hex::encode(&req.issuer_key_hash),
            req.serial
        );

        Ok(SourceResponse {
            bytes,
            headers,
            produced_at: Some(parsed.produced_at),
            next_update: parsed.next_update,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::ocsp::issuers::testutil::test_filter;
    use crate::ocsp::types::testutil::{good_response, revoked_response};

    const SERIAL: [u8; 5] = [0x03, 0xf9, 0xa1, 0xb2, 0xc3];

    struct FakeLookup {
        result: LookupResponse,
        delay: Duration,
        called: Arc<AtomicBool>,
    }

    impl FakeLookup {
        fn new(result: LookupResponse, delay: Duration) -> FakeLookup {
            FakeLookup {
                result,
                delay,
                called: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl OcspLookup for FakeLookup {
        fn get_response(&self, _req: &OcspRequestInfo) -> oneshot::Receiver<LookupResponse> {
            self.called.store(true, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            let result = self.result.clone();
            let delay = self.delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(result);
            });
            rx
        }
    }

    fn build_source(
        primary: FakeLookup,
        secondary: Option<FakeLookup>,
        timeout: Option<Duration>,
    ) -> (DbSource, OcspRequestInfo, Metrics) {
        let (filter, req) = test_filter();
        let registry = prometheus::Registry::new();
        let metrics = Metrics::new(&registry).unwrap();
        let secondary = secondary.map(|s| Box::new(s) as Box<dyn OcspLookup>);
        let source = DbSource::new(
            Box::new(primary),
            secondary,
            Arc::new(filter),
            timeout,
            metrics.clone(),
        );
        (source, req, metrics)
    }

    fn lookup_count(metrics: &Metrics, result: &str) -> u64 {
        metrics.lookups.with_label_values(&[result]).get()
    }

    fn source_count(metrics: &Metrics, source: &str) -> u64 {
        metrics.source_used.with_label_values(&[source]).get()
    }

    #[tokio::test(start_paused = true)]
    async fn primary_only_success() {
        let bytes = good_response(&SERIAL);
        let primary = FakeLookup::new(Ok(bytes.clone()), Duration::from_millis(5));
        let (source, req, metrics) = build_source(primary, None, None);

        let resp = source.response(&req).await.unwrap();
        assert_eq!(resp.bytes, bytes);
        assert_eq!(resp.headers.get("edge-cache-tag").unwrap(), "c3");
        assert!(resp.produced_at.is_some());
        assert_eq!(lookup_count(&metrics, metrics::RESULT_MYSQL_SUCCESS), 1);
        assert_eq!(source_count(&metrics, metrics::SOURCE_MYSQL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn admission_rejection_touches_no_backend() {
        let primary = FakeLookup::new(Ok(good_response(&SERIAL)), Duration::ZERO);
        let secondary = FakeLookup::new(Ok(good_response(&SERIAL)), Duration::ZERO);
        let primary_called = primary.called.clone();
        let secondary_called = secondary.called.clone();
        let (source, mut req, metrics) = build_source(primary, Some(secondary), None);
        req.issuer_key_hash = vec![0x00; 20];

        let err = source.response(&req).await.unwrap_err();
        assert_eq!(err, OcspError::NotFound);
        assert!(!primary_called.load(Ordering::SeqCst));
        assert!(!secondary_called.load(Ordering::SeqCst));
        assert_eq!(source_count(&metrics, metrics::SOURCE_MYSQL), 0);
        assert_eq!(source_count(&metrics, metrics::SOURCE_ERROR_RETURNED), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn primary_error_is_returned() {
        let primary = FakeLookup::new(Err(OcspError::NotFound), Duration::from_millis(1));
        let (source, req, metrics) = build_source(primary, None, None);

        let err = source.response(&req).await.unwrap_err();
        assert_eq!(err, OcspError::NotFound);
        assert_eq!(lookup_count(&metrics, metrics::RESULT_MYSQL_FAILED), 1);
        assert_eq!(source_count(&metrics, metrics::SOURCE_ERROR_RETURNED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_primary_bytes_are_an_error() {
        let primary = FakeLookup::new(Ok(b"junk".to_vec()), Duration::from_millis(1));
        let (source, req, metrics) = build_source(primary, None, None);

        let err = source.response(&req).await.unwrap_err();
        assert!(matches!(err, OcspError::Internal(_)));
        assert_eq!(lookup_count(&metrics, metrics::RESULT_MYSQL_FAILED), 1);
        assert_eq!(source_count(&metrics, metrics::SOURCE_ERROR_RETURNED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn secondary_win_with_agreeing_status_returns_secondary_bytes() {
        let primary_bytes = good_response(&SERIAL);
        let secondary_bytes = good_response(&[0x99]);
        let primary = FakeLookup::new(Ok(primary_bytes.clone()), Duration::from_millis(50));
        let secondary = FakeLookup::new(Ok(secondary_bytes.clone()), Duration::from_millis(5));
        let (source, req, metrics) = build_source(primary, Some(secondary), None);

        let resp = source.response(&req).await.unwrap();
        assert_eq!(resp.bytes, secondary_bytes);
        assert_ne!(resp.bytes, primary_bytes);
        assert_eq!(lookup_count(&metrics, metrics::RESULT_REDIS_SUCCESS), 1);
        assert_eq!(source_count(&metrics, metrics::SOURCE_REDIS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn secondary_win_with_divergent_status_returns_primary_bytes() {
        let primary_bytes = revoked_response(&SERIAL);
        let primary = FakeLookup::new(Ok(primary_bytes.clone()), Duration::from_millis(50));
        let secondary = FakeLookup::new(Ok(good_response(&SERIAL)), Duration::from_millis(5));
        let (source, req, metrics) = build_source(primary, Some(secondary), None);

        let resp = source.response(&req).await.unwrap();
        assert_eq!(resp.bytes, primary_bytes);
        assert_eq!(lookup_count(&metrics, metrics::RESULT_REDIS_MISMATCH), 1);
        assert_eq!(source_count(&metrics, metrics::SOURCE_MYSQL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_secondary_bytes_fall_back_to_primary() {
        let primary_bytes = good_response(&SERIAL);
        let primary = FakeLookup::new(Ok(primary_bytes.clone()), Duration::from_millis(50));
        let secondary = FakeLookup::new(Ok(b"junk".to_vec()), Duration::from_millis(5));
        let (source, req, metrics) = build_source(primary, Some(secondary), None);

        let resp = source.response(&req).await.unwrap();
        assert_eq!(resp.bytes, primary_bytes);
        assert_eq!(lookup_count(&metrics, metrics::RESULT_REDIS_FAILED), 1);
        assert_eq!(source_count(&metrics, metrics::SOURCE_MYSQL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_secondary_falls_back_to_primary() {
        let primary_bytes = good_response(&SERIAL);
        let primary = FakeLookup::new(Ok(primary_bytes.clone()), Duration::from_millis(50));
        let secondary = FakeLookup::new(
            Err(OcspError::Internal("connection refused".to_string())),
            Duration::from_millis(5),
        );
        let (source, req, metrics) = build_source(primary, Some(secondary), None);

        let resp = source.response(&req).await.unwrap();
        assert_eq!(resp.bytes, primary_bytes);
        assert_eq!(lookup_count(&metrics, metrics::RESULT_REDIS_FAILED), 1);
        assert_eq!(source_count(&metrics, metrics::SOURCE_MYSQL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn primary_error_wins_over_secondary_success() {
        let primary = FakeLookup::new(
            Err(OcspError::Internal("db gone".to_string())),
            Duration::from_millis(50),
        );
        let secondary = FakeLookup::new(Ok(good_response(&SERIAL)), Duration::from_millis(5));
        let (source, req, metrics) = build_source(primary, Some(secondary), None);

        let err = source.response(&req).await.unwrap_err();
        assert!(matches!(err, OcspError::Internal(_)));
        assert_eq!(lookup_count(&metrics, metrics::RESULT_MYSQL_FAILED), 1);
        assert_eq!(source_count(&metrics, metrics::SOURCE_ERROR_RETURNED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_while_awaiting_primary_after_secondary_win() {
        let primary = FakeLookup::new(Ok(good_response(&SERIAL)), Duration::from_secs(60));
        let secondary = FakeLookup::new(Ok(good_response(&SERIAL)), Duration::from_millis(1));
        let (source, req, metrics) =
            build_source(primary, Some(secondary), Some(Duration::from_secs(5)));

        let err = source.response(&req).await.unwrap_err();
        assert!(matches!(err, OcspError::Canceled(_)));
        assert_eq!(lookup_count(&metrics, metrics::RESULT_CANCELED), 1);
        assert_eq!(source_count(&metrics, metrics::SOURCE_MYSQL), 0);
        assert_eq!(source_count(&metrics, metrics::SOURCE_REDIS), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_with_slow_primary_only() {
        let primary = FakeLookup::new(Ok(good_response(&SERIAL)), Duration::from_secs(60));
        let (source, req, metrics) = build_source(primary, None, Some(Duration::from_secs(1)));

        let err = source.response(&req).await.unwrap_err();
        assert!(matches!(err, OcspError::Canceled(_)));
        assert_eq!(lookup_count(&metrics, metrics::RESULT_CANCELED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn short_serial_gets_no_edge_cache_tag() {
        let primary = FakeLookup::new(Ok(good_response(&SERIAL)), Duration::from_millis(1));
        let (source, mut req, _metrics) = build_source(primary, None, None);
        req.serial = "f".to_string();

        let resp = source.response(&req).await.unwrap();
        assert!(resp.headers.get("edge-cache-tag").is_none());
    }
}
