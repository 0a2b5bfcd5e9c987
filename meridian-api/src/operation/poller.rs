use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::{OperationError, Result};

/// A long-running operation in flight.
///
/// `poll` performs exactly one status read against the backend and caches
/// the answer; `done` only reads that cache. `result` fails with
/// [`OperationError::NotDone`] until `done` is true, and yields
/// [`OperationError::Failed`] when the backend reports a failed operation.
/// `resume_token` serializes enough state to rebuild an equivalent poller
/// after a restart without re-issuing the original mutation.
#[async_trait]
pub trait Poller: Send + Sync {
    type Output: Send;

    fn done(&self) -> bool;

    async fn poll(&mut self) -> Result<()>;

    async fn result(&mut self) -> Result<Self::Output>;

    fn resume_token(&self) -> Result<String>;
}

/// Encode a token payload as URL-safe base64 JSON.
pub fn encode_token<T: Serialize>(payload: &T) -> Result<String> {
    let json = serde_json::to_vec(payload)
        .map_err(|e| OperationError::InvalidResumeToken(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decode a token produced by [`encode_token`].
pub fn decode_token<T: DeserializeOwned>(token: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| OperationError::InvalidResumeToken(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| OperationError::InvalidResumeToken(e.to_string()))
}
