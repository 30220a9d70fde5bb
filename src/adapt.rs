use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

use crate::context::Context;
use crate::error::Error;
use crate::wire::WireRequest;

/// A step that transforms an outgoing request before it is sent.
#[async_trait]
pub trait Adaptor: Send + Sync {
    async fn adapt(&self, request: WireRequest, cx: &Context) -> Result<WireRequest, Error>;
}

/// Wraps a plain function value so closures satisfy [`Adaptor`].
pub struct AdaptHandler<F>(F);

impl<F> AdaptHandler<F>
where
    F: Fn(WireRequest, &Context) -> Result<WireRequest, Error> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self(handler)
    }
}

#[async_trait]
impl<F> Adaptor for AdaptHandler<F>
where
    F: Fn(WireRequest, &Context) -> Result<WireRequest, Error> + Send + Sync,
{
    async fn adapt(&self, request: WireRequest, cx: &Context) -> Result<WireRequest, Error> {
        (self.0)(request, cx)
    }
}

/// Composite adaptor: threads the request through its members in order,
/// feeding each member's output to the next. Cancellation is checked
/// before every member; members after the cancellation point never run.
pub struct ZipAdaptor {
    members: Vec<Arc<dyn Adaptor>>,
}

impl ZipAdaptor {
    pub fn new(members: Vec<Arc<dyn Adaptor>>) -> Self {
        Self { members }
    }

    pub fn push(&mut self, member: Arc<dyn Adaptor>) {
        self.members.push(member);
    }
}

#[async_trait]
impl Adaptor for ZipAdaptor {
    async fn adapt(&self, mut request: WireRequest, cx: &Context) -> Result<WireRequest, Error> {
        for member in &self.members {
            cx.checkpoint(&request.url)?;
            request = member.adapt(request, cx).await?;
        }
        Ok(request)
    }
}

type CollisionResolver =
    Arc<dyn Fn(&HeaderName, &HeaderValue, &HeaderValue) -> HeaderValue + Send + Sync>;

/// Policy applied when a [`HeadersAdaptor`] field collides with one the
/// request already carries.
#[derive(Clone, Default)]
pub enum HeaderCollision {
    /// The request's existing value wins.
    KeepOld,
    /// The adaptor's value wins.
    #[default]
    KeepNew,
    /// Both survive, joined as `old, new`.
    Concatenate,
    /// A caller-supplied resolver receives `(field, old, new)` and
    /// returns the value to use.
    Resolve(CollisionResolver),
}

impl std::fmt::Debug for HeaderCollision {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::KeepOld => "KeepOld",
            Self::KeepNew => "KeepNew",
            Self::Concatenate => "Concatenate",
            Self::Resolve(_) => "Resolve(..)",
        };
        formatter.write_str(text)
    }
}

/// Appends a header map to the outgoing request, applying a
/// [`HeaderCollision`] policy on conflicting fields.
#[derive(Clone, Debug)]
pub struct HeadersAdaptor {
    headers: HeaderMap,
    collision: HeaderCollision,
}

impl HeadersAdaptor {
    pub fn new(headers: HeaderMap, collision: HeaderCollision) -> Self {
        Self { headers, collision }
    }
}

#[async_trait]
impl Adaptor for HeadersAdaptor {
    async fn adapt(&self, mut request: WireRequest, _cx: &Context) -> Result<WireRequest, Error> {
        for (name, value) in &self.headers {
            let Some(old) = request.headers.get(name).cloned() else {
                request.headers.insert(name.clone(), value.clone());
                continue;
            };
            match &self.collision {
                HeaderCollision::KeepOld => {}
                HeaderCollision::KeepNew => {
                    request.headers.insert(name.clone(), value.clone());
                }
                HeaderCollision::Concatenate => {
                    let joined = [old.as_bytes(), b", ", value.as_bytes()].concat();
                    let joined = HeaderValue::from_bytes(&joined).map_err(|_| {
                        Error::InvalidHeader {
                            name: name.to_string(),
                            message: "concatenated value is not a valid header value".to_owned(),
                        }
                    })?;
                    request.headers.insert(name.clone(), joined);
                }
                HeaderCollision::Resolve(resolver) => {
                    let resolved = resolver(name, &old, value);
                    request.headers.insert(name.clone(), resolved);
                }
            }
        }
        Ok(request)
    }
}

/// Appends query items to the outgoing URL. Pure append: existing
/// parameters are never removed or overwritten, duplicates included.
#[derive(Clone, Debug)]
pub struct QueryAdaptor {
    pairs: Vec<(String, String)>,
}

impl QueryAdaptor {
    pub fn new<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl Adaptor for QueryAdaptor {
    async fn adapt(&self, mut request: WireRequest, _cx: &Context) -> Result<WireRequest, Error> {
        request.append_query_pairs(
            self.pairs
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use http::header::{HeaderValue, ACCEPT, AUTHORIZATION};
    use http::{HeaderMap, Method};
    use tokio_util::sync::CancellationToken;
    use url::Url;

    use super::{AdaptHandler, Adaptor, HeaderCollision, HeadersAdaptor, QueryAdaptor, ZipAdaptor};
    use crate::context::Context;
    use crate::wire::WireRequest;

    fn test_context(token: CancellationToken) -> Context {
        Context::new(token, "test".to_owned(), 1)
    }

    fn test_request() -> WireRequest {
        let url = Url::parse("https://api.example.com/v1/items").expect("url should parse");
        WireRequest::new(Method::GET, url)
    }

    #[tokio::test]
    async fn zip_adaptor_invokes_members_in_declared_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut members: Vec<Arc<dyn Adaptor>> = (0..3)
            .map(|index| {
                let order = Arc::clone(&order);
                Arc::new(AdaptHandler::new(move |request, _cx| {
                    order.lock().expect("lock should not be poisoned").push(index);
                    Ok(request)
                })) as Arc<dyn Adaptor>
            })
            .collect();

        let last = members.pop().expect("three members were built");
        let mut zip = ZipAdaptor::new(members);
        zip.push(last);
        let cx = test_context(CancellationToken::new());
        zip.adapt(test_request(), &cx)
            .await
            .expect("chain should succeed");
        assert_eq!(
            *order.lock().expect("lock should not be poisoned"),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn zip_adaptor_skips_members_after_cancellation() {
        let token = CancellationToken::new();
        let second_ran = Arc::new(AtomicUsize::new(0));

        let cancel = token.clone();
        let first = Arc::new(AdaptHandler::new(move |request, _cx| {
            cancel.cancel();
            Ok(request)
        })) as Arc<dyn Adaptor>;
        let counter = Arc::clone(&second_ran);
        let second = Arc::new(AdaptHandler::new(move |request, _cx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(request)
        })) as Arc<dyn Adaptor>;

        let zip = ZipAdaptor::new(vec![first, second]);
        let cx = test_context(token);
        let error = zip
            .adapt(test_request(), &cx)
            .await
            .expect_err("cancelled chain should fail");
        assert!(error.is_cancelled());
        assert_eq!(second_ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn headers_adaptor_keep_old_is_idempotent() {
        let mut incoming = HeaderMap::new();
        incoming.insert(ACCEPT, HeaderValue::from_static("text/plain"));
        let adaptor = HeadersAdaptor::new(incoming, HeaderCollision::KeepOld);
        let cx = test_context(CancellationToken::new());

        let mut request = test_request();
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));

        let once = adaptor
            .adapt(request.clone(), &cx)
            .await
            .expect("adapt should succeed");
        let twice = adaptor
            .adapt(once.clone(), &cx)
            .await
            .expect("adapt should succeed");
        assert_eq!(once.headers, twice.headers);
        assert_eq!(
            once.headers.get(ACCEPT),
            Some(&HeaderValue::from_static("application/json"))
        );
    }

    #[tokio::test]
    async fn headers_adaptor_keep_new_overwrites() {
        let mut incoming = HeaderMap::new();
        incoming.insert(ACCEPT, HeaderValue::from_static("text/plain"));
        let adaptor = HeadersAdaptor::new(incoming, HeaderCollision::KeepNew);
        let cx = test_context(CancellationToken::new());

        let mut request = test_request();
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));

        let adapted = adaptor
            .adapt(request, &cx)
            .await
            .expect("adapt should succeed");
        assert_eq!(
            adapted.headers.get(ACCEPT),
            Some(&HeaderValue::from_static("text/plain"))
        );
    }

    #[tokio::test]
    async fn headers_adaptor_concatenates_with_comma() {
        let mut incoming = HeaderMap::new();
        incoming.insert(ACCEPT, HeaderValue::from_static("text/plain"));
        let adaptor = HeadersAdaptor::new(incoming, HeaderCollision::Concatenate);
        let cx = test_context(CancellationToken::new());

        let mut request = test_request();
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));

        let adapted = adaptor
            .adapt(request, &cx)
            .await
            .expect("adapt should succeed");
        assert_eq!(
            adapted.headers.get(ACCEPT),
            Some(&HeaderValue::from_static("application/json, text/plain"))
        );
    }

    #[tokio::test]
    async fn headers_adaptor_resolver_receives_field_and_both_values() {
        let mut incoming = HeaderMap::new();
        incoming.insert(AUTHORIZATION, HeaderValue::from_static("Bearer new"));
        let adaptor = HeadersAdaptor::new(
            incoming,
            HeaderCollision::Resolve(Arc::new(|name, old, new| {
                assert_eq!(name, AUTHORIZATION);
                assert_eq!(old, &HeaderValue::from_static("Bearer old"));
                new.clone()
            })),
        );
        let cx = test_context(CancellationToken::new());

        let mut request = test_request();
        request
            .headers
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer old"));

        let adapted = adaptor
            .adapt(request, &cx)
            .await
            .expect("adapt should succeed");
        assert_eq!(
            adapted.headers.get(AUTHORIZATION),
            Some(&HeaderValue::from_static("Bearer new"))
        );
    }

    #[tokio::test]
    async fn query_adaptor_appends_without_overwriting() {
        let url =
            Url::parse("https://api.example.com/search?q=rust&page=2").expect("url should parse");
        let request = WireRequest::new(Method::GET, url);
        let adaptor = QueryAdaptor::new([("q", "http"), ("sort", "asc")]);
        let cx = test_context(CancellationToken::new());

        let adapted = adaptor
            .adapt(request, &cx)
            .await
            .expect("adapt should succeed");
        assert_eq!(adapted.url.query(), Some("q=rust&page=2&q=http&sort=asc"));
    }
}
