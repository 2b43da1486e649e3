use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::oneshot;

use super::source::{LookupResponse, OcspLookup};
use super::types::{OcspError, OcspRequestInfo};

/// Secondary lookup against a Redis cache of response bytes keyed by the
/// canonical hex serial. Strictly read-only; every failure, a miss
/// included, is just reported on the channel for the resolver to weigh.
pub struct CacheLookup {
    conn: ConnectionManager,
}

impl CacheLookup {
    pub async fn connect(url: &str) -> anyhow::Result<CacheLookup> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(CacheLookup { conn })
    }
}

impl OcspLookup for CacheLookup {
    fn get_response(&self, req: &OcspRequestInfo) -> oneshot::Receiver<LookupResponse> {
        let (tx, rx) = oneshot::channel();
        let mut conn = self.conn.clone();
        let serial = req.serial.clone();
        tokio::spawn(async move {
            let result = match conn.get::<_, Option<Vec<u8>>>(&serial).await {
                Ok(Some(bytes)) => Ok(bytes),
                Ok(None) => Err(OcspError::NotFound),
                Err(err) => Err(OcspError::Internal(format!(
                    "fetching cached OCSP response for serial {}: {}",
                    serial, err
                ))),
            };
            let _ = tx.send(result);
        });
        rx
    }
}
