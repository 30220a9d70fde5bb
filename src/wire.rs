use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::error::Error;

/// Wire-level request descriptor handed to the transport.
///
/// Adaptors take ownership of a `WireRequest` and return a new one; the
/// pipeline threads the value through the chain, so no adaptor ever
/// observes another adaptor's in-progress mutation.
#[derive(Clone, Debug)]
pub struct WireRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl WireRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Appends query pairs to the existing query string. Pure append:
    /// existing parameters survive, duplicate keys are kept.
    pub fn append_query_pairs<'p>(&mut self, pairs: impl IntoIterator<Item = (&'p str, &'p str)>) {
        let mut serializer = self.url.query_pairs_mut();
        for (name, value) in pairs {
            serializer.append_pair(name, value);
        }
    }
}

/// Complete response envelope produced by a transport.
#[derive(Clone, Debug)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Parses a method token, normalizing to uppercase.
pub fn parse_method(text: &str) -> Result<Method, Error> {
    Method::from_bytes(text.to_ascii_uppercase().as_bytes()).map_err(|_| Error::InvalidMethod {
        method: text.to_owned(),
    })
}
