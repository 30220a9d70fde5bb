use async_trait::async_trait;

use crate::error::Error;
use crate::wire::{Response, WireRequest};

/// The capability that actually moves bytes.
///
/// Given a wire-level request descriptor, a transport returns the
/// complete response envelope or fails with [`Error::Transport`]
/// carrying a stable [`TransportErrorCode`](crate::TransportErrorCode).
/// Connection pooling, TLS, and timeouts all live behind this seam;
/// the pipeline never looks inside.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &WireRequest) -> Result<Response, Error>;
}
