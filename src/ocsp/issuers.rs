use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use foreign_types::{ForeignType, ForeignTypeRef};

use super::proto;
use super::types::{HashAlgorithm, OcspError, OcspRequestInfo};

/// Stable identifier derived from a full issuer certificate (legacy scheme,
/// still present in older database rows).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct IssuerID(pub i64);

/// Stable identifier derived from an issuer's distinguished name and public
/// key.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct IssuerNameID(pub i64);

/// One issuer certificate this responder is authorized to answer for.
#[derive(Debug)]
pub struct OcspIssuer {
    cert: openssl::x509::X509,
    key_hash: Vec<u8>,
    id: IssuerID,
    name_id: IssuerNameID,
}

impl OcspIssuer {
    pub fn from_x509(cert: openssl::x509::X509) -> Result<OcspIssuer, openssl::error::ErrorStack> {
        // The key hash in OCSP requests covers the contents of the
        // subjectPublicKey BIT STRING, not the whole SPKI structure.
        let key_hash = openssl::hash::hash(
            openssl::hash::MessageDigest::sha1(), pubkey_bitstring(&cert),
        )?.to_vec();

        let cert_der = cert.to_der()?;
        let id = IssuerID(truncated_hash_id(&cert_der)?);

        let mut name_and_key = x509_name_to_der(cert.subject_name().as_ptr())?;
        name_and_key.extend_from_slice(pubkey_bitstring(&cert));
        let name_id = IssuerNameID(truncated_hash_id(&name_and_key)?);

        Ok(OcspIssuer { cert, key_hash, id, name_id })
    }

    pub fn from_pem_file(path: &Path) -> anyhow::Result<OcspIssuer> {
        let pem = std::fs::read(path)
            .with_context(|| format!("reading issuer certificate {}", path.display()))?;
        let cert = openssl::x509::X509::from_pem(&pem)
            .with_context(|| format!("parsing issuer certificate {}", path.display()))?;
        Ok(Self::from_x509(cert)?)
    }

    pub fn key_hash(&self) -> &[u8] {
        &self.key_hash
    }

    pub fn id(&self) -> IssuerID {
        self.id
    }

    pub fn name_id(&self) -> IssuerNameID {
        self.name_id
    }

    #[allow(dead_code)]
    pub fn cert(&self) -> &openssl::x509::X509 {
        &self.cert
    }
}

/// Contents of the subjectPublicKey BIT STRING, without the SPKI wrapper.
pub(crate) fn pubkey_bitstring(cert: &openssl::x509::X509) -> &[u8] {
    unsafe {
        let bits = proto::X509_get0_pubkey_bitstr(cert.as_ptr());
        std::slice::from_raw_parts(
            openssl_sys::ASN1_STRING_get0_data(bits.cast()),
            openssl_sys::ASN1_STRING_length(bits.cast()) as usize,
        )
    }
}

pub(crate) fn x509_name_to_der(name: *mut openssl_sys::X509_NAME) -> Result<Vec<u8>, openssl::error::ErrorStack> {
    unsafe {
        let len = crate::util::cvt(proto::i2d_X509_NAME(name, std::ptr::null_mut()))?;
        let mut buf = vec![0; len as usize];
        crate::util::cvt(proto::i2d_X509_NAME(name, &mut buf.as_mut_ptr()))?;
        Ok(buf)
    }
}

fn truncated_hash_id(data: &[u8]) -> Result<i64, openssl::error::ErrorStack> {
    let digest = openssl::hash::hash(openssl::hash::MessageDigest::sha256(), data)?;
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Ok(i64::from_be_bytes(prefix))
}

/// Pre-backend request admission. Everything here is immutable after
/// construction and shared read-only across requests.
#[derive(Debug)]
pub struct IssuerFilter {
    hash_algorithm: HashAlgorithm,
    issuer_key_hashes: HashMap<IssuerID, Vec<u8>>,
    issuer_name_key_hashes: HashMap<IssuerNameID, Vec<u8>>,
    serial_prefixes: Vec<String>,
}

impl IssuerFilter {
    pub fn new(issuers: Vec<OcspIssuer>, serial_prefixes: Vec<String>) -> anyhow::Result<IssuerFilter> {
        if issuers.is_empty() {
            anyhow::bail!("filter must include at least 1 issuer cert");
        }
        let mut issuer_key_hashes = HashMap::new();
        let mut issuer_name_key_hashes = HashMap::new();
        for issuer in &issuers {
            issuer_key_hashes.insert(issuer.id, issuer.key_hash.clone());
            issuer_name_key_hashes.insert(issuer.name_id, issuer.key_hash.clone());
        }
        Ok(IssuerFilter {
            hash_algorithm: HashAlgorithm::SHA1,
            issuer_key_hashes,
            issuer_name_key_hashes,
            serial_prefixes,
        })
    }

    pub fn from_files(paths: &[PathBuf], serial_prefixes: Vec<String>) -> anyhow::Result<IssuerFilter> {
        let issuers = paths
            .iter()
            .map(|path| OcspIssuer::from_pem_file(path))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Self::new(issuers, serial_prefixes)
    }

    /// Rules run in order and the first failure wins; a request rejected
    /// here never reaches a backend.
    pub fn check_request(&self, req: &OcspRequestInfo) -> Result<(), OcspError> {
        if req.hash_algorithm != self.hash_algorithm {
            debug!("request hashes issuer key with unsupported algorithm {:?}", req.hash_algorithm);
            return Err(OcspError::NotFound);
        }
        // issuer_key_hashes holds the same values as issuer_name_key_hashes,
        // so one scan covers both.
        if !self.issuer_key_hashes.values().any(|h| h == &req.issuer_key_hash) {
            debug!("request intended for wrong issuer cert {}", hex::encode(&req.issuer_key_hash));
            return Err(OcspError::NotFound);
        }
        if !self.serial_prefixes.is_empty()
            && !self.serial_prefixes.iter().any(|p| req.serial.starts_with(p))
        {
            debug!("request serial {} has wrong prefix", req.serial);
            return Err(OcspError::NotFound);
        }
        Ok(())
    }

    /// True if the stored row was produced under the issuer the request
    /// names. A row can exist for a serial that was issued under some other
    /// issuer; such rows must not be served.
    pub fn response_matches_issuer(&self, req: &OcspRequestInfo, issuer_id: i64) -> bool {
        let key_hash = self
            .issuer_name_key_hashes
            .get(&IssuerNameID(issuer_id))
            .or_else(|| self.issuer_key_hashes.get(&IssuerID(issuer_id)));
        match key_hash {
            Some(key_hash) => key_hash == &req.issuer_key_hash,
            None => false,
        }
    }
}
