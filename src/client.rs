use std::sync::Arc;

use http::Method;
use url::Url;

use crate::adapt::Adaptor;
use crate::codec::{Coder, JsonCoder};
use crate::error::Error;
use crate::request::Request;
use crate::retry::Retrier;
use crate::transport::Transport;
use crate::validate::Validator;
use crate::wire::WireRequest;

/// Factory for [`Request`]s.
///
/// Holds the transport, the coder, and the client-level chains. Every
/// request the client builds starts with these chains pre-populated;
/// client members always run before request members, on every attempt.
pub struct Client<C: Coder = JsonCoder> {
    transport: Arc<dyn Transport>,
    coder: C,
    name: String,
    adaptors: Vec<Arc<dyn Adaptor>>,
    validators: Vec<Arc<dyn Validator>>,
    retriers: Vec<Arc<dyn Retrier>>,
}

impl Client {
    pub fn builder(transport: impl Transport + 'static) -> ClientBuilder {
        ClientBuilder {
            transport: Arc::new(transport),
            coder: JsonCoder,
            name: "reqflow".to_owned(),
            adaptors: Vec::new(),
            validators: Vec::new(),
            retriers: Vec::new(),
        }
    }
}

impl<C: Coder> Client<C> {
    /// Builds a request expecting a decoded `T`.
    ///
    /// A body, when one is needed, is attached through the request's
    /// fluent surface; attaching one implies a non-GET method.
    pub fn request<T>(&self, method: Method, url: &str) -> Result<Request<'_, T, C>, Error> {
        let url = Url::parse(url).map_err(|source| Error::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;
        Ok(Request::new(self, WireRequest::new(method, url)))
    }

    pub fn get<T>(&self, url: &str) -> Result<Request<'_, T, C>, Error> {
        self.request(Method::GET, url)
    }

    pub fn post<T>(&self, url: &str) -> Result<Request<'_, T, C>, Error> {
        self.request(Method::POST, url)
    }

    pub fn put<T>(&self, url: &str) -> Result<Request<'_, T, C>, Error> {
        self.request(Method::PUT, url)
    }

    pub fn delete<T>(&self, url: &str) -> Result<Request<'_, T, C>, Error> {
        self.request(Method::DELETE, url)
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn coder(&self) -> &C {
        &self.coder
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn adaptors(&self) -> &[Arc<dyn Adaptor>] {
        &self.adaptors
    }

    pub(crate) fn validators(&self) -> &[Arc<dyn Validator>] {
        &self.validators
    }

    pub(crate) fn retriers(&self) -> &[Arc<dyn Retrier>] {
        &self.retriers
    }
}

impl<C: Coder> std::fmt::Debug for Client<C> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("name", &self.name)
            .field("adaptors", &self.adaptors.len())
            .field("validators", &self.validators.len())
            .field("retriers", &self.retriers.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`]; every option defaults to empty/standard.
pub struct ClientBuilder<C: Coder = JsonCoder> {
    transport: Arc<dyn Transport>,
    coder: C,
    name: String,
    adaptors: Vec<Arc<dyn Adaptor>>,
    validators: Vec<Arc<dyn Validator>>,
    retriers: Vec<Arc<dyn Retrier>>,
}

impl<C: Coder> ClientBuilder<C> {
    /// Label used in log spans for requests built by this client.
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the encoder/decoder pair.
    pub fn coder<D: Coder>(self, coder: D) -> ClientBuilder<D> {
        ClientBuilder {
            transport: self.transport,
            coder,
            name: self.name,
            adaptors: self.adaptors,
            validators: self.validators,
            retriers: self.retriers,
        }
    }

    /// Appends a client-level adaptor, run before request-level ones.
    pub fn adaptor(mut self, adaptor: impl Adaptor + 'static) -> Self {
        self.adaptors.push(Arc::new(adaptor));
        self
    }

    /// Appends a client-level validator.
    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Appends a client-level retrier.
    pub fn retrier(mut self, retrier: impl Retrier + 'static) -> Self {
        self.retriers.push(Arc::new(retrier));
        self
    }

    pub fn build(self) -> Client<C> {
        Client {
            transport: self.transport,
            coder: self.coder,
            name: self.name,
            adaptors: self.adaptors,
            validators: self.validators,
            retriers: self.retriers,
        }
    }
}
