use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use tokio::time::sleep;
use url::Url;

use crate::error::{Error, TransportErrorCode};
use crate::transport::Transport;
use crate::wire::{Response, WireRequest};

type ObserveHook = Arc<dyn Fn(&WireRequest) + Send + Sync>;

#[derive(Clone)]
enum MockOutcome {
    Response {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Failure(TransportErrorCode),
}

/// A programmed result table entry for one URL.
///
/// Outcomes replay in the order they were declared; the last one
/// repeats for every further dispatch. An entry with no declared
/// outcome answers `200 OK` with an empty body.
pub struct Mock {
    url: Url,
    outcomes: VecDeque<MockOutcome>,
    delay: Option<Duration>,
    observer: Option<ObserveHook>,
}

impl Mock {
    pub fn new(url: &str) -> Result<Self, Error> {
        let url = Url::parse(url).map_err(|source| Error::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;
        Ok(Self {
            url,
            outcomes: VecDeque::new(),
            delay: None,
            observer: None,
        })
    }

    /// Programs a response with an empty body.
    pub fn then_status(self, status: StatusCode) -> Self {
        self.then_body(status, Bytes::new())
    }

    /// Programs a response with the given body.
    pub fn then_body(mut self, status: StatusCode, body: impl Into<Bytes>) -> Self {
        self.outcomes.push_back(MockOutcome::Response {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        });
        self
    }

    /// Programs a JSON response.
    pub fn then_json<T: Serialize + ?Sized>(
        self,
        status: StatusCode,
        payload: &T,
    ) -> Result<Self, Error> {
        let body = serde_json::to_vec(payload).map_err(|source| Error::Encode {
            source: Box::new(source),
        })?;
        Ok(self.then_body(status, body))
    }

    /// Programs a transport failure with the given code.
    pub fn then_failure(mut self, code: TransportErrorCode) -> Self {
        self.outcomes.push_back(MockOutcome::Failure(code));
        self
    }

    /// Artificial delay applied before every programmed result.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hook invoked with the wire request each time this URL is
    /// dispatched to; the way tests observe attempt counts.
    pub fn on_request(mut self, hook: impl Fn(&WireRequest) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(hook));
        self
    }
}

struct MockEntry {
    outcomes: VecDeque<MockOutcome>,
    delay: Option<Duration>,
    observer: Option<ObserveHook>,
}

/// Deterministic in-memory transport for tests.
///
/// The registry is keyed by URL and may be shared by concurrently
/// running requests; use distinct URLs per concurrent test case.
/// Dispatching to an unregistered URL fails with a `cannot_connect`
/// transport error naming the URL.
#[derive(Clone, Default)]
pub struct MockTransport {
    registry: Arc<Mutex<HashMap<Url, MockEntry>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, mock: Mock) {
        lock_unpoisoned(&self.registry).insert(
            mock.url,
            MockEntry {
                outcomes: mock.outcomes,
                delay: mock.delay,
                observer: mock.observer,
            },
        );
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MockTransport")
            .field("registered", &lock_unpoisoned(&self.registry).len())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &WireRequest) -> Result<Response, Error> {
        let (outcome, delay, observer) = {
            let mut registry = lock_unpoisoned(&self.registry);
            let Some(entry) = registry.get_mut(&request.url) else {
                return Err(Error::Transport {
                    code: TransportErrorCode::CannotConnect,
                    method: request.method.clone(),
                    url: request.url.to_string(),
                    source: None,
                });
            };
            let outcome = if entry.outcomes.len() > 1 {
                entry.outcomes.pop_front()
            } else {
                entry.outcomes.front().cloned()
            };
            (outcome, entry.delay, entry.observer.clone())
        };

        if let Some(observer) = observer {
            observer(request);
        }
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        match outcome {
            Some(MockOutcome::Response {
                status,
                headers,
                body,
            }) => Ok(Response {
                url: request.url.clone(),
                status,
                headers,
                body,
            }),
            None => Ok(Response {
                url: request.url.clone(),
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::new(),
            }),
            Some(MockOutcome::Failure(code)) => Err(Error::Transport {
                code,
                method: request.method.clone(),
                url: request.url.to_string(),
                source: None,
            }),
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
