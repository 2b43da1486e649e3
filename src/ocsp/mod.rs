use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::prelude::*;
use chrono::prelude::*;
use percent_encoding::percent_decode_str;

pub(crate) mod proto;
pub mod cache;
pub mod db;
pub mod file;
pub mod issuers;
pub mod metrics;
pub mod source;
pub mod types;

use source::Source;
use types::OcspError;

const MAX_REQUEST_BYTES: usize = 4096;

pub struct AppState {
    pub source: Arc<dyn Source>,
    pub path_prefix: String,
    pub max_age: u32,
}

/// Builds the responder's router. Everything except the root landing page
/// goes through a single fallback handler, so the raw request path,
/// repeated slashes included, reaches the base64 decoder untouched. A
/// routing layer that canonicalizes paths would corrupt GET payloads.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(handle_ocsp).with_state(state)
}

async fn handle_ocsp(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if method == Method::GET && path == "/" {
        return root_response();
    }

    let encoded = match path.strip_prefix(state.path_prefix.as_str()) {
        Some(rest) => rest,
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    if method == Method::GET {
        let der = match decode_get_payload(encoded) {
            Some(der) => der,
            None => {
                warn!("error decoding base64 OCSP request from GET path");
                return ocsp_error(&OcspError::MalformedRequest);
            }
        };
        respond(&state, &der).await
    } else if method == Method::POST {
        let body = match axum::body::to_bytes(req.into_body(), MAX_REQUEST_BYTES).await {
            Ok(body) => body,
            Err(_) => return ocsp_error(&OcspError::MalformedRequest),
        };
        respond(&state, &body).await
    } else {
        StatusCode::METHOD_NOT_ALLOWED.into_response()
    }
}

/// GET payloads arrive either percent-escaped or raw, in the standard or
/// the URL-safe base64 alphabet.
fn decode_get_payload(encoded: &str) -> Option<Vec<u8>> {
    let unescaped: Vec<u8> = percent_decode_str(encoded).collect();
    BASE64_STANDARD
        .decode(&unescaped)
        .or_else(|_| BASE64_URL_SAFE.decode(&unescaped))
        .ok()
}

async fn respond(state: &AppState, der: &[u8]) -> Response {
    let req_info = match types::parse_ocsp_req(der) {
        Ok(info) => info,
        Err(err) => return ocsp_error(&err),
    };
    match state.source.response(&req_info).await {
        Ok(resp) => OcspHttpResponse {
            value: resp.bytes,
            max_age: state.max_age,
            produced_at: resp.produced_at,
            next_update: resp.next_update,
            extra: resp.headers,
        }
        .into_response(),
        Err(err) => ocsp_error(&err),
    }
}

/// Well-formed OCSP exchanges answer HTTP 200 even for protocol-level
/// failures; the status travels inside an unsigned OCSP response.
fn ocsp_error(err: &OcspError) -> Response {
    let body = match err {
        OcspError::NotFound => types::UNAUTHORIZED_RESPONSE.clone(),
        OcspError::MalformedRequest => types::MALFORMED_REQUEST_RESPONSE.clone(),
        OcspError::Canceled(_) => types::TRY_LATER_RESPONSE.clone(),
        OcspError::Internal(_) => types::INTERNAL_ERROR_RESPONSE.clone(),
    };
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/ocsp-response"),
    );
    response
}

fn root_response() -> Response {
    let mut response = Response::new(Body::empty());
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=43200"));
    response
}

/// Serialized OCSP response plus the metadata that drives its caching
/// headers.
pub struct OcspHttpResponse {
    value: Vec<u8>,
    max_age: u32,
    produced_at: Option<DateTime<Utc>>,
    next_update: Option<DateTime<Utc>>,
    extra: axum::http::HeaderMap,
}

impl IntoResponse for OcspHttpResponse {
    fn into_response(self) -> Response {
        let etag = hex::encode(openssl::hash::hash(
            openssl::hash::MessageDigest::sha1(), &self.value,
        ).unwrap());

        let mut response = Response::new(Body::from(self.value));
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/ocsp-response"),
        );
        if let Ok(value) = HeaderValue::from_str(&Utc::now().to_rfc2822()) {
            headers.insert(header::DATE, value);
        }
        if let Ok(value) = HeaderValue::from_str(&format!(
            "max-age={}, public, no-transform, must-revalidate",
            self.max_age
        )) {
            headers.insert(header::CACHE_CONTROL, value);
        }
        if let Ok(value) = HeaderValue::from_str(&etag) {
            headers.insert(header::ETAG, value);
        }
        if let Some(produced_at) = self.produced_at {
            if let Ok(value) = HeaderValue::from_str(&produced_at.to_rfc2822()) {
                headers.insert(header::LAST_MODIFIED, value);
            }
        }
        if let Some(next_update) = self.next_update {
            if let Ok(value) = HeaderValue::from_str(&next_update.to_rfc2822()) {
                headers.insert(header::EXPIRES, value);
            }
        }
        headers.extend(self.extra);
        response
    }
}
