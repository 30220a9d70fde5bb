use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

/// Per-attempt execution context threaded through every chain call.
///
/// Cancellation is cooperative: each chain calls [`Context::checkpoint`]
/// before invoking a member, so a cancellation discovered mid-chain
/// aborts that chain without running the remaining members or the
/// transport.
#[derive(Clone, Debug)]
pub struct Context {
    token: CancellationToken,
    client: String,
    attempt: u32,
}

impl Context {
    pub(crate) fn new(token: CancellationToken, client: String, attempt: u32) -> Self {
        Self {
            token,
            client,
            attempt,
        }
    }

    /// Label of the owning client, for logging.
    pub fn client(&self) -> &str {
        &self.client
    }

    /// 1-based number of the attempt this context belongs to.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fails with [`Error::Cancelled`] when the run has been cancelled.
    pub fn checkpoint(&self, url: &Url) -> Result<(), Error> {
        if self.token.is_cancelled() {
            return Err(Error::cancelled(url));
        }
        Ok(())
    }

    /// Resolves once the run is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}
