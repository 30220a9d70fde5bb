use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn};

use crate::adapt::{AdaptHandler, Adaptor, HeaderCollision, HeadersAdaptor, QueryAdaptor};
use crate::client::Client;
use crate::codec::{Coder, JsonCoder};
use crate::context::Context;
use crate::error::Error;
use crate::retry::{Backoff, Retrier, RetryDecision, RetryHandler};
use crate::validate::{AcceptableStatus, StatusCodeValidator, ValidateHandler, Validator};
use crate::wire::{Response, WireRequest};

/// A declared request plus its adaptor, validator, and retrier chains.
///
/// Built by a [`Client`], mutated through the fluent surface, and
/// driven by [`Request::run`]. Chains must not be mutated from multiple
/// threads, but `run` may be invoked repeatedly; every call is an
/// independent execution starting from the original wire request.
pub struct Request<'a, T, C: Coder = JsonCoder> {
    client: &'a Client<C>,
    original: WireRequest,
    adaptors: Vec<Arc<dyn Adaptor>>,
    validators: Vec<Arc<dyn Validator>>,
    retriers: Vec<Arc<dyn Retrier>>,
    token: CancellationToken,
    expected: PhantomData<fn() -> T>,
}

impl<T, C: Coder> std::fmt::Debug for Request<'_, T, C> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Request")
            .field("client", &self.client)
            .field("original", &self.original)
            .field("adaptors", &self.adaptors.len())
            .field("validators", &self.validators.len())
            .field("retriers", &self.retriers.len())
            .finish_non_exhaustive()
    }
}

impl<'a, T, C: Coder> Request<'a, T, C> {
    pub(crate) fn new(client: &'a Client<C>, original: WireRequest) -> Self {
        Self {
            client,
            original,
            adaptors: Vec::new(),
            validators: Vec::new(),
            retriers: Vec::new(),
            token: CancellationToken::new(),
            expected: PhantomData,
        }
    }

    /// Raw request body. Declaring a body implies a non-GET method.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        debug_assert!(
            !matches!(self.original.method, Method::GET | Method::HEAD),
            "a request body implies a non-GET method"
        );
        self.original.body = Some(body.into());
        self
    }

    /// Encodes `value` through the client's coder and declares it as
    /// the body, setting the coder's content type unless one is set.
    pub fn body_value<B: Serialize + ?Sized>(mut self, value: &B) -> Result<Self, Error> {
        let encoded = self.client.coder().encode(value)?;
        if !self.original.headers.contains_key(CONTENT_TYPE) {
            self.original
                .headers
                .insert(CONTENT_TYPE, self.client.coder().content_type());
        }
        Ok(self.body(encoded))
    }

    /// Sets a header on the original wire request (builder-time, not an
    /// adaptor; survives unchanged into every attempt's adaptor stage).
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.original.headers.insert(name, value);
        self
    }

    /// Appends a request-level adaptor.
    pub fn adapt(mut self, adaptor: impl Adaptor + 'static) -> Self {
        self.adaptors.push(Arc::new(adaptor));
        self
    }

    /// Appends a closure as a request-level adaptor.
    pub fn adapt_fn<F>(self, handler: F) -> Self
    where
        F: Fn(WireRequest, &Context) -> Result<WireRequest, Error> + Send + Sync + 'static,
    {
        self.adapt(AdaptHandler::new(handler))
    }

    /// Appends a headers adaptor with the given collision policy.
    pub fn headers(self, headers: HeaderMap, collision: HeaderCollision) -> Self {
        self.adapt(HeadersAdaptor::new(headers, collision))
    }

    /// Appends a query-parameters adaptor (pure append).
    pub fn query<K, V, I>(self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.adapt(QueryAdaptor::new(pairs))
    }

    /// Appends a request-level validator.
    pub fn validate(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Appends a closure as a request-level validator.
    pub fn validate_fn<F>(self, handler: F) -> Self
    where
        F: Fn(&Response, &WireRequest) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.validate(ValidateHandler::new(handler))
    }

    /// Appends a status-code validator.
    pub fn validate_status(self, acceptable: impl Into<AcceptableStatus>) -> Self {
        self.validate(StatusCodeValidator::new(acceptable))
    }

    /// Appends a request-level retrier.
    pub fn retry(mut self, retrier: impl Retrier + 'static) -> Self {
        self.retriers.push(Arc::new(retrier));
        self
    }

    /// Appends a closure as a request-level retrier.
    pub fn retry_fn<F>(self, handler: F) -> Self
    where
        F: Fn(&WireRequest, Option<&Response>, &Error, u32) -> Result<RetryDecision, Error>
            + Send
            + Sync
            + 'static,
    {
        self.retry(RetryHandler::new(handler))
    }

    /// Appends a [`Backoff`] retry policy.
    pub fn retry_strategy(self, backoff: Backoff) -> Self {
        self.retry(backoff)
    }

    /// Replaces the cancellation token `run` observes.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Handle for cancelling this request's runs cooperatively.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Drives the pipeline to a decoded value or exactly one terminal
    /// error.
    ///
    /// Each attempt re-adapts the ORIGINAL wire request rather than the
    /// previously adapted one, so adaptors that derive state (a fresh
    /// auth token, a signature over the body) never compound across
    /// retries. Retries are sequential continuations of this call; no
    /// attempt runs in parallel with another.
    pub async fn run(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let mut previous_attempts: u32 = 0;
        loop {
            let attempt = previous_attempts + 1;
            let cx = Context::new(
                self.token.clone(),
                self.client.name().to_owned(),
                attempt,
            );
            let span = info_span!(
                "reqflow.request",
                client = %cx.client(),
                method = %self.original.method,
                url = %self.original.url,
                attempt = attempt
            );
            let _enter = span.enter();

            // Adapting: failures here are terminal, never retried.
            let adapted = self.adapt_all(&cx).await?;

            // Skip the transport entirely when already cancelled.
            cx.checkpoint(&adapted.url)?;
            debug!("dispatching request");
            let (response, failure) = match self.client.transport().send(&adapted).await {
                Ok(response) => match self.validate_all(&response, &adapted, &cx).await {
                    Ok(()) => match self.client.coder().decode::<T>(&response.body) {
                        Ok(value) => return Ok(value),
                        Err(error) => (Some(response), error),
                    },
                    Err(error) if error.is_cancelled() => return Err(error),
                    Err(error) => (Some(response), error),
                },
                Err(error) => (None, error),
            };

            match self
                .consult_retriers(&adapted, &cx, response.as_ref(), &failure, previous_attempts)
                .await?
            {
                RetryDecision::Concede => {
                    warn!(error = %failure, attempts = attempt, "giving up");
                    return Err(failure);
                }
                RetryDecision::Retry => {
                    debug!("retrying immediately");
                }
                RetryDecision::RetryAfterDelay(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "retrying after backoff");
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = cx.cancelled() => return Err(Error::cancelled(&adapted.url)),
                    }
                }
            }
            previous_attempts += 1;
        }
    }

    /// Threads the pristine request through the client chain, then the
    /// request chain, checking cancellation before every member.
    async fn adapt_all(&self, cx: &Context) -> Result<WireRequest, Error> {
        let mut request = self.original.clone();
        for member in self.client.adaptors().iter().chain(self.adaptors.iter()) {
            cx.checkpoint(&request.url)?;
            request = member.adapt(request, cx).await?;
        }
        Ok(request)
    }

    async fn validate_all(
        &self,
        response: &Response,
        request: &WireRequest,
        cx: &Context,
    ) -> Result<(), Error> {
        for member in self.client.validators().iter().chain(self.validators.iter()) {
            cx.checkpoint(&request.url)?;
            member.validate(response, request, cx).await?;
        }
        Ok(())
    }

    /// First member returning other than `Concede` wins; a member's own
    /// error propagates, bypassing further retry evaluation.
    async fn consult_retriers(
        &self,
        request: &WireRequest,
        cx: &Context,
        response: Option<&Response>,
        error: &Error,
        previous_attempts: u32,
    ) -> Result<RetryDecision, Error> {
        for member in self.client.retriers().iter().chain(self.retriers.iter()) {
            cx.checkpoint(&request.url)?;
            match member
                .retry(request, cx, response, error, previous_attempts)
                .await?
            {
                RetryDecision::Concede => continue,
                decision => return Ok(decision),
            }
        }
        Ok(RetryDecision::Concede)
    }
}
