use super::proto;

lazy_static! {
    static ref ID_SHA1: asn1::ObjectIdentifier = asn1::ObjectIdentifier::from_string("1.3.14.3.2.26").unwrap();
    static ref ID_SHA224: asn1::ObjectIdentifier = asn1::ObjectIdentifier::from_string("2.16.840.1.101.3.4.2.4").unwrap();
    static ref ID_SHA256: asn1::ObjectIdentifier = asn1::ObjectIdentifier::from_string("2.16.840.1.101.3.4.2.1").unwrap();
    static ref ID_SHA384: asn1::ObjectIdentifier = asn1::ObjectIdentifier::from_string("2.16.840.1.101.3.4.2.2").unwrap();
    static ref ID_SHA512: asn1::ObjectIdentifier = asn1::ObjectIdentifier::from_string("2.16.840.1.101.3.4.2.3").unwrap();

    static ref SHA256_WITH_RSA_ENCRYPTION: asn1::ObjectIdentifier = asn1::ObjectIdentifier::from_string("1.2.840.113549.1.1.11").unwrap();

    static ref ID_PKIX_OCSP_BASIC: asn1::ObjectIdentifier = asn1::ObjectIdentifier::from_string("1.3.6.1.5.5.7.48.1.1").unwrap();
    static ref ID_PKIX_OCSP_NONCE: asn1::ObjectIdentifier = asn1::ObjectIdentifier::from_string("1.3.6.1.5.5.7.48.1.2").unwrap();
    static ref ID_PKIX_OCSP_RESPONSE: asn1::ObjectIdentifier = asn1::ObjectIdentifier::from_string("1.3.6.1.5.5.7.48.1.4").unwrap();

    pub static ref MALFORMED_REQUEST_RESPONSE: Vec<u8> = status_only_response(OCSPResponseStatus::MalformedRequest);
    pub static ref INTERNAL_ERROR_RESPONSE: Vec<u8> = status_only_response(OCSPResponseStatus::InternalError);
    pub static ref TRY_LATER_RESPONSE: Vec<u8> = status_only_response(OCSPResponseStatus::TryLater);
    pub static ref UNAUTHORIZED_RESPONSE: Vec<u8> = status_only_response(OCSPResponseStatus::Unauthorized);
}

/// Failure taxonomy shared by the decoder, the admission filter and both
/// lookup backends. The HTTP layer maps each variant onto an unsigned OCSP
/// error response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OcspError {
    #[error("OCSP response not found")]
    NotFound,
    #[error("malformed OCSP request")]
    MalformedRequest,
    #[error("looking up OCSP response for serial {0}: deadline exceeded")]
    Canceled(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Copy, Clone)]
pub enum OCSPResponseStatus {
    Successful = 0,
    MalformedRequest = 1,
    InternalError = 2,
    TryLater = 3,
    SigRequired = 5,
    Unauthorized = 6,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HashAlgorithm {
    SHA1,
    SHA224,
    SHA256,
    SHA384,
    SHA512,
}

impl HashAlgorithm {
    fn from_oid(oid: &asn1::ObjectIdentifier) -> Option<HashAlgorithm> {
        if oid.eq(&ID_SHA1) {
            Some(HashAlgorithm::SHA1)
        } else if oid.eq(&ID_SHA224) {
            Some(HashAlgorithm::SHA224)
        } else if oid.eq(&ID_SHA256) {
            Some(HashAlgorithm::SHA256)
        } else if oid.eq(&ID_SHA384) {
            Some(HashAlgorithm::SHA384)
        } else if oid.eq(&ID_SHA512) {
            Some(HashAlgorithm::SHA512)
        } else {
            None
        }
    }
}

/// The single CertID this responder answers for, lifted out of the DER
/// request so lookup tasks can own a copy. `serial` is the canonical hex
/// string used as the key against every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspRequestInfo {
    pub hash_algorithm: HashAlgorithm,
    pub issuer_name_hash: Vec<u8>,
    pub issuer_key_hash: Vec<u8>,
    pub serial: String,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CertStatus {
    Good,
    Revoked,
    Unknown,
}

/// The fields of a stored response the resolver needs for safety comparison
/// and cache headers. The unparsed bytes are what actually gets returned.
#[derive(Debug, Clone)]
pub struct ParsedOcspResponse {
    pub status: CertStatus,
    pub serial: String,
    pub produced_at: chrono::DateTime<chrono::Utc>,
    pub this_update: chrono::DateTime<chrono::Utc>,
    pub next_update: Option<chrono::DateTime<chrono::Utc>>,
}

fn known_extension(oid: &asn1::ObjectIdentifier) -> bool {
    oid.eq(&ID_PKIX_OCSP_NONCE) || oid.eq(&ID_PKIX_OCSP_RESPONSE)
}

pub fn parse_ocsp_req(req: &[u8]) -> Result<OcspRequestInfo, OcspError> {
    let outer_request = match asn1::parse_single::<proto::OCSPRequest>(req) {
        Ok(r) => r,
        Err(e) => {
            warn!("error parsing OCSP request: {:?}", e);
            return Err(OcspError::MalformedRequest);
        }
    };
    let tbs_request = match outer_request.tbs_request.parse::<proto::TBSRequest>() {
        Ok(r) => r,
        Err(e) => {
            warn!("error parsing OCSP request: {:?}", e);
            return Err(OcspError::MalformedRequest);
        }
    };

    if tbs_request.version != proto::Version::V1 as u8 {
        warn!("received unsupported OCSP request version: {}", tbs_request.version);
        return Err(OcspError::MalformedRequest);
    }

    if let Some(exts) = tbs_request.request_extensions {
        for ext in exts {
            if ext.critical && !known_extension(&ext.extension_id) {
                warn!("unsupported critical request extension: {:?}", ext.extension_id);
                return Err(OcspError::MalformedRequest);
            }
        }
    }

    let mut request_list = tbs_request.request_list;
    let first_request = match request_list.next() {
        Some(r) => r,
        None => return Err(OcspError::MalformedRequest),
    };

    if let Some(exts) = first_request.single_request_extensions {
        for ext in exts {
            if ext.critical {
                warn!("unsupported critical single request extension: {:?}", ext.extension_id);
                return Err(OcspError::MalformedRequest);
            }
        }
    }

    let cert_id = first_request.request_cert;
    let hash_algorithm = match HashAlgorithm::from_oid(&cert_id.hash_algorithm.id) {
        Some(h) => h,
        None => {
            warn!("unknown digest algorithm: {:?}", cert_id.hash_algorithm.id);
            return Err(OcspError::MalformedRequest);
        }
    };

    Ok(OcspRequestInfo {
        hash_algorithm,
        issuer_name_hash: cert_id.issuer_name_hash.to_vec(),
        issuer_key_hash: cert_id.issuer_key_hash.to_vec(),
        serial: crate::util::serial_to_string(cert_id.serial_number.as_bytes()),
    })
}

/// Structural verification of stored response bytes. Signatures are not
/// checked here; responses are pre-signed elsewhere.
pub fn parse_ocsp_resp(resp: &[u8]) -> Result<ParsedOcspResponse, OcspError> {
    let outer = asn1::parse_single::<proto::OCSPResponse>(resp)
        .map_err(|e| OcspError::Internal(format!("parsing OCSP response: {:?}", e)))?;
    if outer.response_status.value() != OCSPResponseStatus::Successful as u32 {
        return Err(OcspError::Internal(format!(
            "stored OCSP response has status {}",
            outer.response_status.value()
        )));
    }
    let response_bytes = outer.response_bytes.ok_or_else(|| {
        OcspError::Internal("stored OCSP response has no response bytes".to_string())
    })?;
    if !response_bytes.response_type.eq(&ID_PKIX_OCSP_BASIC) {
        return Err(OcspError::Internal(format!(
            "unsupported OCSP response type: {:?}",
            response_bytes.response_type
        )));
    }
    let basic = asn1::parse_single::<proto::BasicOCSPResponse>(response_bytes.response)
        .map_err(|e| OcspError::Internal(format!("parsing basic OCSP response: {:?}", e)))?;
    let response_data = basic
        .tbs_response_data
        .parse::<proto::ResponseData>()
        .map_err(|e| OcspError::Internal(format!("parsing OCSP response data: {:?}", e)))?;
    let mut responses = response_data.responses;
    let single = responses.next().ok_or_else(|| {
        OcspError::Internal("OCSP response contains no single responses".to_string())
    })?;

    Ok(ParsedOcspResponse {
        status: match single.cert_status {
            proto::CertStatus::Good(()) => CertStatus::Good,
            proto::CertStatus::Revoked(_) => CertStatus::Revoked,
            proto::CertStatus::Unknown(()) => CertStatus::Unknown,
        },
        serial: crate::util::serial_to_string(single.cert_id.serial_number.as_bytes()),
        produced_at: *response_data.produced_at.as_chrono(),
        this_update: *single.this_update.as_chrono(),
        next_update: single.next_update.map(|t| *t.as_chrono()),
    })
}

fn status_only_response(status: OCSPResponseStatus) -> Vec<u8> {
    asn1::write_single(&proto::OCSPResponseWrite {
        response_status: asn1::Enumerated::new(status as u32),
        response_bytes: None,
    })
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn request_round_trip() {
        let der = build_request(&[0x03, 0xf9, 0xa1, 0xb2, 0xc3], &ISSUER_NAME_HASH, &ISSUER_KEY_HASH);
        let info = parse_ocsp_req(&der).unwrap();
        assert_eq!(info.hash_algorithm, HashAlgorithm::SHA1);
        assert_eq!(info.issuer_name_hash, ISSUER_NAME_HASH.to_vec());
        assert_eq!(info.issuer_key_hash, ISSUER_KEY_HASH.to_vec());
        assert_eq!(info.serial, "03f9a1b2c3");
    }

    #[test]
    fn high_bit_serial_keeps_canonical_form() {
        let der = build_request(&[0xff, 0x00], &ISSUER_NAME_HASH, &ISSUER_KEY_HASH);
        let info = parse_ocsp_req(&der).unwrap();
        assert_eq!(info.serial, "ff00");
    }

    #[test]
    fn garbage_request_is_malformed() {
        assert_eq!(parse_ocsp_req(b"not a der request"), Err(OcspError::MalformedRequest));
        assert_eq!(parse_ocsp_req(&[]), Err(OcspError::MalformedRequest));
    }

    #[test]
    fn response_round_trip_good() {
        let der = good_response(&[0x03, 0x09]);
        let parsed = parse_ocsp_resp(&der).unwrap();
        assert_eq!(parsed.status, CertStatus::Good);
        assert_eq!(parsed.serial, "0309");
        assert!(parsed.next_update.is_some());
        assert!(parsed.this_update <= parsed.next_update.unwrap());
    }

    #[test]
    fn response_round_trip_revoked() {
        let der = revoked_response(&[0x03, 0x09]);
        let parsed = parse_ocsp_resp(&der).unwrap();
        assert_eq!(parsed.status, CertStatus::Revoked);
    }

    #[test]
    fn error_responses_are_status_only_der() {
        assert_eq!(MALFORMED_REQUEST_RESPONSE.as_slice(), [0x30, 0x03, 0x0a, 0x01, 0x01]);
        assert_eq!(INTERNAL_ERROR_RESPONSE.as_slice(), [0x30, 0x03, 0x0a, 0x01, 0x02]);
        assert_eq!(TRY_LATER_RESPONSE.as_slice(), [0x30, 0x03, 0x0a, 0x01, 0x03]);
        assert_eq!(UNAUTHORIZED_RESPONSE.as_slice(), [0x30, 0x03, 0x0a, 0x01, 0x06]);
    }

    #[test]
    fn status_only_response_does_not_verify() {
        assert!(parse_ocsp_resp(&UNAUTHORIZED_RESPONSE).is_err());
    }
}
