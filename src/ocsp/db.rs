use std::sync::Arc;

use chrono::prelude::*;
use sqlx::mysql::MySqlPool;
use tokio::sync::oneshot;

use super::issuers::IssuerFilter;
use super::source::{LookupResponse, OcspLookup};
use super::types::{OcspError, OcspRequestInfo};

/// Row shape of the certificateStatus table. Rows are written by the signer
/// pipeline; this service only reads them. `ocsp_last_updated` is NULL
/// until the signer has stored a response for the row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CertificateStatus {
    #[sqlx(rename = "serialNumber")]
    pub serial_number: String,
    #[sqlx(rename = "issuerID")]
    pub issuer_id: i64,
    #[sqlx(rename = "ocspResponse")]
    pub ocsp_response: Vec<u8>,
    #[sqlx(rename = "ocspLastUpdated")]
    pub ocsp_last_updated: Option<DateTime<Utc>>,
    #[sqlx(rename = "isExpired")]
    pub is_expired: bool,
}

/// Authoritative lookup against the certificateStatus table, keyed by the
/// canonical hex serial. serialNumber must be indexed; every query is a
/// point read on it.
pub struct DbLookup {
    pool: MySqlPool,
    filter: Arc<IssuerFilter>,
}

impl DbLookup {
    pub fn new(pool: MySqlPool, filter: Arc<IssuerFilter>) -> DbLookup {
        DbLookup { pool, filter }
    }
}

impl OcspLookup for DbLookup {
    fn get_response(&self, req: &OcspRequestInfo) -> oneshot::Receiver<LookupResponse> {
        let (tx, rx) = oneshot::channel();
        let pool = self.pool.clone();
        let filter = self.filter.clone();
        let req = req.clone();
        tokio::spawn(async move {
            let result = lookup_status(&pool, &filter, &req).await;
            // The resolver may have moved on; dropped receivers are fine.
            let _ = tx.send(result);
        });
        rx
    }
}

async fn lookup_status(
    pool: &MySqlPool,
    filter: &IssuerFilter,
    req: &OcspRequestInfo,
) -> LookupResponse {
    let row = sqlx::query_as::<_, CertificateStatus>(
        "SELECT serialNumber, issuerID, ocspResponse, ocspLastUpdated, isExpired \
         FROM certificateStatus WHERE serialNumber = ?",
    )
    .bind(&req.serial)
    .fetch_optional(pool)
    .await;

    let status = match row {
        Ok(Some(status)) => status,
        Ok(None) => return Err(OcspError::NotFound),
        Err(err) => {
            return Err(OcspError::Internal(format!(
                "querying certificateStatus for serial {}: {}",
                req.serial, err
            )))
        }
    };

    evaluate_status(filter, req, status)
}

/// Decides whether a fetched row may be served for this request.
fn evaluate_status(
    filter: &IssuerFilter,
    req: &OcspRequestInfo,
    status: CertificateStatus,
) -> LookupResponse {
    if status.is_expired {
        info!(
            "OCSP response not sent (expired) for CA={}, serial={}",
            hex::encode(&req.issuer_key_hash),
            req.serial
        );
        return Err(OcspError::NotFound);
    }
    if status.ocsp_last_updated.is_none() {
        warn!(
            "OCSP response not sent (ocspLastUpdated not set) for CA={}, serial={}",
            hex::encode(&req.issuer_key_hash),
            req.serial
        );
        return Err(OcspError::NotFound);
    }
    if !filter.response_matches_issuer(req, status.issuer_id) {
        warn!(
            "OCSP response not sent (issuer and serial mismatch) for CA={}, serial={}",
            hex::encode(&req.issuer_key_hash),
            req.serial
        );
        return Err(OcspError::NotFound);
    }

    Ok(status.ocsp_response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocsp::issuers::testutil::{request_for, test_issuer};
    use crate::ocsp::issuers::IssuerFilter;

    fn row_for(req: &OcspRequestInfo, issuer_id: i64) -> CertificateStatus {
        CertificateStatus {
            serial_number: req.serial.clone(),
            issuer_id,
            ocsp_response: vec![0xde, 0xad, 0xbe, 0xef],
            ocsp_last_updated: Some(Utc::now()),
            is_expired: false,
        }
    }

    #[test]
    fn valid_row_yields_its_response_bytes() {
        let issuer = test_issuer();
        let issuer_id = issuer.name_id().0;
        let req = request_for(&issuer, "03f9a1b2c3");
        let filter = IssuerFilter::new(vec![issuer], vec![]).unwrap();

        let row = row_for(&req, issuer_id);
        assert_eq!(
            evaluate_status(&filter, &req, row),
            Ok(vec![0xde, 0xad, 0xbe, 0xef])
        );
    }

    #[test]
    fn expired_row_is_not_found() {
        let issuer = test_issuer();
        let issuer_id = issuer.name_id().0;
        let req = request_for(&issuer, "03f9a1b2c3");
        let filter = IssuerFilter::new(vec![issuer], vec![]).unwrap();

        let mut row = row_for(&req, issuer_id);
        row.is_expired = true;
        assert_eq!(evaluate_status(&filter, &req, row), Err(OcspError::NotFound));
    }

    #[test]
    fn row_without_stored_response_time_is_not_found() {
        let issuer = test_issuer();
        let issuer_id = issuer.name_id().0;
        let req = request_for(&issuer, "03f9a1b2c3");
        let filter = IssuerFilter::new(vec![issuer], vec![]).unwrap();

        let mut row = row_for(&req, issuer_id);
        row.ocsp_last_updated = None;
        assert_eq!(evaluate_status(&filter, &req, row), Err(OcspError::NotFound));
    }

    #[test]
    fn row_for_another_issuer_is_not_found() {
        let issuer = test_issuer();
        let req = request_for(&issuer, "03f9a1b2c3");
        let filter = IssuerFilter::new(vec![issuer], vec![]).unwrap();

        let row = row_for(&req, 0x0123_4567_89ab_cdef);
        assert_eq!(evaluate_status(&filter, &req, row), Err(OcspError::NotFound));
    }
}
