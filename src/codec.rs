use bytes::Bytes;
use http::header::HeaderValue;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;

/// Encoder/decoder pair at the body seam.
///
/// The client owns one coder and uses it for every request it builds:
/// encoding declared bodies on the way out, decoding accepted responses
/// on the way in.
pub trait Coder: Send + Sync {
    /// Content type advertised for encoded bodies.
    fn content_type(&self) -> HeaderValue;

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, Error>;

    fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, Error>;
}

/// JSON coder over serde_json, the default.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCoder;

impl Coder for JsonCoder {
    fn content_type(&self) -> HeaderValue {
        HeaderValue::from_static("application/json")
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, Error> {
        let encoded = serde_json::to_vec(value).map_err(|source| Error::Encode {
            source: Box::new(source),
        })?;
        Ok(Bytes::from(encoded))
    }

    fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, Error> {
        serde_json::from_slice(body).map_err(|source| Error::decode(source, body))
    }
}
