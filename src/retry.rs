use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use rand::Rng;

use crate::context::Context;
use crate::error::{Error, TransportErrorCode};
use crate::wire::{Response, WireRequest};

/// Outcome of consulting a retrier about a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry; defer to the next retrier or the final failure.
    Concede,
    /// Resubmit immediately.
    Retry,
    /// Wait, then resubmit.
    RetryAfterDelay(Duration),
}

/// A step that, given a failed attempt, decides whether and when to
/// resubmit. `previous_attempts` starts at 0 on the first failure.
#[async_trait]
pub trait Retrier: Send + Sync {
    async fn retry(
        &self,
        request: &WireRequest,
        cx: &Context,
        response: Option<&Response>,
        error: &Error,
        previous_attempts: u32,
    ) -> Result<RetryDecision, Error>;
}

/// Wraps a plain function value so closures satisfy [`Retrier`].
pub struct RetryHandler<F>(F);

impl<F> RetryHandler<F>
where
    F: Fn(&WireRequest, Option<&Response>, &Error, u32) -> Result<RetryDecision, Error>
        + Send
        + Sync,
{
    pub fn new(handler: F) -> Self {
        Self(handler)
    }
}

#[async_trait]
impl<F> Retrier for RetryHandler<F>
where
    F: Fn(&WireRequest, Option<&Response>, &Error, u32) -> Result<RetryDecision, Error>
        + Send
        + Sync,
{
    async fn retry(
        &self,
        request: &WireRequest,
        _cx: &Context,
        response: Option<&Response>,
        error: &Error,
        previous_attempts: u32,
    ) -> Result<RetryDecision, Error> {
        (self.0)(request, response, error, previous_attempts)
    }
}

/// Composite retrier: members are consulted in declared order; each
/// `Concede` defers to the next member, and the first `Retry` or
/// `RetryAfterDelay` wins immediately. Cancellation is checked before
/// every member and fails the chain instead of producing a decision.
pub struct ZipRetrier {
    members: Vec<Arc<dyn Retrier>>,
}

impl ZipRetrier {
    pub fn new(members: Vec<Arc<dyn Retrier>>) -> Self {
        Self { members }
    }

    pub fn push(&mut self, member: Arc<dyn Retrier>) {
        self.members.push(member);
    }
}

#[async_trait]
impl Retrier for ZipRetrier {
    async fn retry(
        &self,
        request: &WireRequest,
        cx: &Context,
        response: Option<&Response>,
        error: &Error,
        previous_attempts: u32,
    ) -> Result<RetryDecision, Error> {
        for member in &self.members {
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

/// Randomized perturbation applied to a computed backoff delay, to keep
/// independent clients from retrying in lockstep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Delay unchanged.
    None,
    /// Uniform in `[delay / 2, delay)`.
    Equal,
    /// Uniform in `[0, delay)`.
    #[default]
    Full,
}

impl Jitter {
    /// Applies this strategy once to a delay expressed in seconds.
    pub fn apply(self, delay_secs: f64) -> Duration {
        let delay_secs = delay_secs.max(0.0);
        let sampled = match self {
            Self::None => delay_secs,
            Self::Equal if delay_secs > 0.0 => {
                rand::rng().random_range(delay_secs / 2.0..delay_secs)
            }
            Self::Full if delay_secs > 0.0 => rand::rng().random_range(0.0..delay_secs),
            _ => delay_secs,
        };
        Duration::from_secs_f64(sampled)
    }
}

/// Built-in retry policy: exponential backoff with jitter.
///
/// Eligibility requires all of: fewer than `attempts` total dispatches
/// performed so far, the failing request's method in the eligible
/// method set, and either the response status in the eligible status
/// set or the transport error's code in the eligible code set. Errors
/// the policy does not recognize (decode failures, malformed URLs,
/// client certificates) concede by design: retrying them would not
/// change the outcome.
#[derive(Clone, Debug)]
pub struct Backoff {
    attempts: u32,
    methods: HashSet<Method>,
    status_codes: BTreeSet<u16>,
    error_codes: BTreeSet<TransportErrorCode>,
    base: f64,
    max_delay: f64,
    jitter: Jitter,
}

impl Backoff {
    /// Two retries over the idempotent methods and the transient
    /// failure sets, half-second base delay capped at five minutes,
    /// full jitter.
    pub fn standard() -> Self {
        Self {
            attempts: 3,
            methods: default_retry_methods(),
            status_codes: default_retry_status_codes(),
            error_codes: default_retry_error_codes(),
            base: 0.5,
            max_delay: 300.0,
            jitter: Jitter::Full,
        }
    }

    /// Maximum number of total dispatches, the first included.
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes = codes.into_iter().collect();
        self
    }

    pub fn error_codes(mut self, codes: impl IntoIterator<Item = TransportErrorCode>) -> Self {
        self.error_codes = codes.into_iter().collect();
        self
    }

    /// Base delay in seconds; the first retry waits this long (before
    /// jitter), each further retry doubles it. Non-finite values are
    /// ignored; a base above the current cap raises the cap with it.
    pub fn base_delay(mut self, base_secs: f64) -> Self {
        if base_secs.is_finite() {
            self.base = base_secs.max(0.0);
            if self.max_delay < self.base {
                self.max_delay = self.base;
            }
        }
        self
    }

    /// Upper bound in seconds on any computed delay, jitter included.
    /// Non-finite values are ignored; the cap never drops below the
    /// base delay.
    pub fn max_delay(mut self, max_secs: f64) -> Self {
        if max_secs.is_finite() {
            self.max_delay = max_secs.max(self.base);
        }
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    fn eligible(
        &self,
        request: &WireRequest,
        response: Option<&Response>,
        error: &Error,
        previous_attempts: u32,
    ) -> bool {
        if previous_attempts.saturating_add(1) >= self.attempts {
            return false;
        }
        if !self.methods.contains(&request.method) {
            return false;
        }
        let status = response
            .map(|response| response.status.as_u16())
            .or_else(|| error.status());
        if let Some(status) = status {
            if self.status_codes.contains(&status) {
                return true;
            }
        }
        if let Some(code) = error.transport_code() {
            if self.error_codes.contains(&code) {
                return true;
            }
        }
        false
    }

    /// Jittered delay before retry number `previous_attempts + 1`,
    /// capped at the configured maximum before jitter is applied.
    pub fn delay_for(&self, previous_attempts: u32) -> Duration {
        let exponent = previous_attempts.min(31);
        let delay_secs = (self.base * 2_f64.powi(exponent as i32)).min(self.max_delay);
        self.jitter.apply(delay_secs)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::standard()
    }
}

#[async_trait]
impl Retrier for Backoff {
    async fn retry(
        &self,
        request: &WireRequest,
        _cx: &Context,
        response: Option<&Response>,
        error: &Error,
        previous_attempts: u32,
    ) -> Result<RetryDecision, Error> {
        if !self.eligible(request, response, error, previous_attempts) {
            return Ok(RetryDecision::Concede);
        }
        Ok(RetryDecision::RetryAfterDelay(
            self.delay_for(previous_attempts),
        ))
    }
}

fn default_retry_methods() -> HashSet<Method> {
    [
        Method::GET,
        Method::HEAD,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
        Method::TRACE,
    ]
    .into_iter()
    .collect()
}

fn default_retry_status_codes() -> BTreeSet<u16> {
    [408_u16, 500, 502, 503, 504].into_iter().collect()
}

fn default_retry_error_codes() -> BTreeSet<TransportErrorCode> {
    [
        TransportErrorCode::TimedOut,
        TransportErrorCode::CannotConnect,
        TransportErrorCode::ConnectionLost,
        TransportErrorCode::Dns,
        TransportErrorCode::HostUnreachable,
        TransportErrorCode::NetworkDown,
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};
    use tokio_util::sync::CancellationToken;
    use url::Url;

    use super::{Backoff, Jitter, Retrier, RetryDecision, RetryHandler, ZipRetrier};
    use crate::context::Context;
    use crate::error::{Error, TransportErrorCode};
    use crate::wire::{Response, WireRequest};

    fn test_context(token: CancellationToken) -> Context {
        Context::new(token, "test".to_owned(), 1)
    }

    fn counting_member(
        counter: &Arc<AtomicUsize>,
        decision: RetryDecision,
    ) -> Arc<dyn Retrier> {
        let counter = Arc::clone(counter);
        Arc::new(RetryHandler::new(
            move |_request, _response, _error, _previous_attempts| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(decision)
            },
        ))
    }

    fn request_with_method(method: Method) -> WireRequest {
        let url = Url::parse("https://api.example.com/v1/items").expect("url should parse");
        WireRequest::new(method, url)
    }

    fn response_with_status(status: StatusCode) -> Response {
        Response {
            url: Url::parse("https://api.example.com/v1/items").expect("url should parse"),
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    fn status_error(status: u16) -> Error {
        Error::Status {
            status,
            method: Method::GET,
            url: "https://api.example.com/v1/items".to_owned(),
        }
    }

    #[test]
    fn backoff_doubles_per_retry_without_jitter() {
        let backoff = Backoff::standard().base_delay(2.0).jitter(Jitter::None);
        let delays: Vec<Duration> = (0..4).map(|index| backoff.delay_for(index)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ]
        );
    }

    #[test]
    fn full_jitter_stays_within_zero_and_delay() {
        for _ in 0..1000 {
            let sampled = Jitter::Full.apply(5.0);
            assert!(sampled <= Duration::from_secs(5), "sampled {sampled:?}");
        }
    }

    #[test]
    fn equal_jitter_stays_within_half_delay_and_delay() {
        for _ in 0..1000 {
            let sampled = Jitter::Equal.apply(5.0);
            assert!(
                sampled >= Duration::from_secs_f64(2.5) && sampled <= Duration::from_secs(5),
                "sampled {sampled:?}"
            );
        }
    }

    #[test]
    fn no_jitter_leaves_delay_unchanged() {
        assert_eq!(Jitter::None.apply(5.0), Duration::from_secs(5));
    }

    #[test]
    fn non_finite_base_delay_is_ignored_and_delays_stay_finite() {
        let backoff = Backoff::standard()
            .base_delay(f64::INFINITY)
            .base_delay(f64::NAN)
            .jitter(Jitter::None);
        assert_eq!(backoff.delay_for(0), Duration::from_secs_f64(0.5));
    }

    #[test]
    fn delays_are_capped_at_the_configured_maximum() {
        let backoff = Backoff::standard()
            .base_delay(100.0)
            .max_delay(250.0)
            .jitter(Jitter::None);
        assert_eq!(backoff.delay_for(0), Duration::from_secs(100));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(200));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(250));
        assert_eq!(backoff.delay_for(31), Duration::from_secs(250));
    }

    #[test]
    fn jittered_delay_never_exceeds_the_configured_maximum() {
        let backoff = Backoff::standard()
            .base_delay(100.0)
            .max_delay(120.0)
            .jitter(Jitter::Full);
        for _ in 0..256 {
            assert!(backoff.delay_for(3) <= Duration::from_secs(120));
        }
    }

    #[test]
    fn raising_the_base_above_the_cap_raises_the_cap() {
        let backoff = Backoff::standard()
            .max_delay(10.0)
            .base_delay(60.0)
            .jitter(Jitter::None);
        assert_eq!(backoff.delay_for(0), Duration::from_secs(60));
    }

    #[test]
    fn exhausted_attempts_are_ineligible() {
        let backoff = Backoff::standard().attempts(1).status_codes([500]);
        let request = request_with_method(Method::GET);
        let response = response_with_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!backoff.eligible(&request, Some(&response), &status_error(500), 0));
    }

    #[test]
    fn non_idempotent_method_is_ineligible_by_default() {
        let backoff = Backoff::standard();
        let request = request_with_method(Method::POST);
        let response = response_with_status(StatusCode::SERVICE_UNAVAILABLE);
        assert!(!backoff.eligible(&request, Some(&response), &status_error(503), 0));
    }

    #[test]
    fn eligible_transport_error_code_triggers_retry() {
        let backoff = Backoff::standard();
        let request = request_with_method(Method::GET);
        let error = Error::Transport {
            code: TransportErrorCode::ConnectionLost,
            method: Method::GET,
            url: request.url.to_string(),
            source: None,
        };
        assert!(backoff.eligible(&request, None, &error, 0));
    }

    #[test]
    fn decode_failure_concedes_by_default() {
        let backoff = Backoff::standard();
        let request = request_with_method(Method::GET);
        let response = response_with_status(StatusCode::OK);
        let error = Error::decode(
            serde_json::from_slice::<serde_json::Value>(b"not json")
                .expect_err("body should not parse"),
            b"not json",
        );
        assert!(!backoff.eligible(&request, Some(&response), &error, 0));
    }

    #[tokio::test]
    async fn backoff_decision_is_retry_after_delay_when_eligible() {
        let backoff = Backoff::standard()
            .attempts(3)
            .base_delay(0.25)
            .jitter(Jitter::None);
        let request = request_with_method(Method::GET);
        let response = response_with_status(StatusCode::BAD_GATEWAY);
        let cx = crate::context::Context::new(
            tokio_util::sync::CancellationToken::new(),
            "test".to_owned(),
            1,
        );

        let decision = crate::retry::Retrier::retry(
            &backoff,
            &request,
            &cx,
            Some(&response),
            &status_error(502),
            0,
        )
        .await
        .expect("backoff should never fail");
        assert_eq!(
            decision,
            RetryDecision::RetryAfterDelay(Duration::from_millis(250))
        );
    }

    #[tokio::test]
    async fn zip_retrier_consults_members_in_order_until_one_accepts() {
        let conceding_calls = Arc::new(AtomicUsize::new(0));
        let retrying_calls = Arc::new(AtomicUsize::new(0));
        let later_calls = Arc::new(AtomicUsize::new(0));

        let mut zip = ZipRetrier::new(vec![
            counting_member(&conceding_calls, RetryDecision::Concede),
            counting_member(&retrying_calls, RetryDecision::Retry),
        ]);
        zip.push(counting_member(&later_calls, RetryDecision::Retry));

        let request = request_with_method(Method::GET);
        let cx = test_context(CancellationToken::new());
        let decision = zip
            .retry(&request, &cx, None, &status_error(500), 0)
            .await
            .expect("chain should produce a decision");

        assert_eq!(decision, RetryDecision::Retry);
        assert_eq!(conceding_calls.load(Ordering::SeqCst), 1);
        assert_eq!(retrying_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            later_calls.load(Ordering::SeqCst),
            0,
            "members after the first non-concede must not be consulted"
        );
    }

    #[tokio::test]
    async fn zip_retrier_concedes_when_every_member_concedes() {
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));
        let zip = ZipRetrier::new(vec![
            counting_member(&first_calls, RetryDecision::Concede),
            counting_member(&second_calls, RetryDecision::Concede),
        ]);

        let request = request_with_method(Method::GET);
        let cx = test_context(CancellationToken::new());
        let decision = zip
            .retry(&request, &cx, None, &status_error(500), 0)
            .await
            .expect("chain should produce a decision");

        assert_eq!(decision, RetryDecision::Concede);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zip_retrier_fails_with_cancellation_instead_of_deciding() {
        let token = CancellationToken::new();
        let second_calls = Arc::new(AtomicUsize::new(0));

        let cancel = token.clone();
        let cancelling = Arc::new(RetryHandler::new(
            move |_request, _response, _error: &Error, _previous_attempts| {
                cancel.cancel();
                Ok(RetryDecision::Concede)
            },
        )) as Arc<dyn Retrier>;
        let zip = ZipRetrier::new(vec![
            cancelling,
            counting_member(&second_calls, RetryDecision::Retry),
        ]);

        let request = request_with_method(Method::GET);
        let cx = test_context(token);
        let error = zip
            .retry(&request, &cx, None, &status_error(500), 0)
            .await
            .expect_err("cancelled chain should fail rather than decide");

        assert!(error.is_cancelled());
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }
}
