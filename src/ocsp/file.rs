use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use axum::http::HeaderMap;
use base64::prelude::*;
use chrono::prelude::*;

use super::source::{Source, SourceResponse};
use super::types::{self, OcspError, OcspRequestInfo};

struct MemoryEntry {
    bytes: Vec<u8>,
    produced_at: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
}

/// In-memory source backed by a file of base64 DER responses, one per line.
/// Used for long-lived root and intermediate responses; each entry is
/// indexed at startup by the serial it certifies. No filtering and no
/// racing: a lookup is a plain map read.
pub struct MemorySource {
    responses: HashMap<String, MemoryEntry>,
}

impl MemorySource {
    pub fn from_file(path: &Path) -> anyhow::Result<MemorySource> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading response file {}", path.display()))?;
        let mut responses = HashMap::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let der = BASE64_STANDARD
                .decode(line)
                .with_context(|| format!("decoding response on line {}", lineno + 1))?;
            let parsed = types::parse_ocsp_resp(&der)
                .map_err(|err| anyhow::anyhow!("parsing response on line {}: {}", lineno + 1, err))?;
            info!("adding OCSP response for serial {}", parsed.serial);
            responses.insert(
                parsed.serial,
                MemoryEntry {
                    bytes: der,
                    produced_at: parsed.produced_at,
                    next_update: parsed.next_update,
                },
            );
        }
        Ok(MemorySource { responses })
    }

    #[cfg(test)]
    pub(crate) fn from_der_responses(responses: &[Vec<u8>]) -> MemorySource {
        let mut map = HashMap::new();
        for der in responses {
            let parsed = types::parse_ocsp_resp(der).unwrap();
            map.insert(
                parsed.serial,
                MemoryEntry {
                    bytes: der.clone(),
                    produced_at: parsed.produced_at,
                    next_update: parsed.next_update,
                },
            );
        }
        MemorySource { responses: map }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.responses.len()
    }
}

#[async_trait::async_trait]
impl Source for MemorySource {
    async fn response(&self, req: &OcspRequestInfo) -> Result<SourceResponse, OcspError> {
        match self.responses.get(&req.serial) {
            Some(entry) => Ok(SourceResponse {
                bytes: entry.bytes.clone(),
                headers: HeaderMap::new(),
                produced_at: Some(entry.produced_at),
                next_update: entry.next_update,
            }),
            None => Err(OcspError::NotFound),
        }
    }
}
