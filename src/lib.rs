//! `reqflow` turns a declared request into a decoded response through a
//! composable pipeline: adapt → dispatch → validate → decode, with
//! failure-driven retry (exponential backoff + jitter) and cooperative
//! cancellation. The transport is a pluggable seam; a deterministic
//! mock ships for tests.
//!
//! # Quick Start
//!
//! ```no_run
//! use http::StatusCode;
//! use reqflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), reqflow::Error> {
//!     let transport = MockTransport::new();
//!     transport.register(
//!         Mock::new("https://api.example.com/v1/items")?
//!             .then_json(StatusCode::OK, &["a", "b"])?,
//!     );
//!
//!     let client = Client::builder(transport).client_name("demo").build();
//!     let items: Vec<String> = client
//!         .get("https://api.example.com/v1/items")?
//!         .validate_status(200..=299)
//!         .retry_strategy(Backoff::standard().attempts(3))
//!         .run()
//!         .await?;
//!
//!     println!("{items:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Pipeline contract
//!
//! Client-level chain members always run before request-level ones, in
//! declared order, on every attempt. A retry re-adapts the original
//! wire request rather than the previously adapted one, so adaptors
//! must derive what they add (a fresh token, a signature) instead of
//! assuming their last output survives.

mod adapt;
mod client;
mod codec;
mod context;
mod error;
mod mock;
mod request;
mod retry;
mod transport;
mod validate;
mod wire;

pub use crate::adapt::{AdaptHandler, Adaptor, HeaderCollision, HeadersAdaptor, QueryAdaptor, ZipAdaptor};
pub use crate::client::{Client, ClientBuilder};
pub use crate::codec::{Coder, JsonCoder};
pub use crate::context::Context;
pub use crate::error::{Error, ErrorCode, TransportErrorCode};
pub use crate::mock::{Mock, MockTransport};
pub use crate::request::Request;
pub use crate::retry::{Backoff, Jitter, Retrier, RetryDecision, RetryHandler, ZipRetrier};
pub use crate::transport::Transport;
pub use crate::validate::{
    AcceptableStatus, StatusCodeValidator, ValidateHandler, Validator, ZipValidator,
};
pub use crate::wire::{parse_method, Response, WireRequest};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        AcceptableStatus, Adaptor, Backoff, Client, Coder, Context, Error, ErrorCode,
        HeaderCollision, Jitter, JsonCoder, Mock, MockTransport, Request, Response, Retrier,
        RetryDecision, Transport, TransportErrorCode, Validator, WireRequest,
    };
}
