use std::collections::BTreeSet;
use std::ops::{Range, RangeInclusive};
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;

use crate::context::Context;
use crate::error::Error;
use crate::wire::{Response, WireRequest};

/// A step that inspects a response and decides accept/reject before the
/// body is decoded.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        response: &Response,
        request: &WireRequest,
        cx: &Context,
    ) -> Result<(), Error>;
}

/// Wraps a plain function value so closures satisfy [`Validator`].
pub struct ValidateHandler<F>(F);

impl<F> ValidateHandler<F>
where
    F: Fn(&Response, &WireRequest) -> Result<(), Error> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self(handler)
    }
}

#[async_trait]
impl<F> Validator for ValidateHandler<F>
where
    F: Fn(&Response, &WireRequest) -> Result<(), Error> + Send + Sync,
{
    async fn validate(
        &self,
        response: &Response,
        request: &WireRequest,
        _cx: &Context,
    ) -> Result<(), Error> {
        (self.0)(response, request)
    }
}

/// Composite validator: members run in order and the first failure wins;
/// later members are never consulted. Cancellation is checked before
/// every member.
pub struct ZipValidator {
    members: Vec<Arc<dyn Validator>>,
}

impl ZipValidator {
    pub fn new(members: Vec<Arc<dyn Validator>>) -> Self {
        Self { members }
    }

    pub fn push(&mut self, member: Arc<dyn Validator>) {
        self.members.push(member);
    }
}

#[async_trait]
impl Validator for ZipValidator {
    async fn validate(
        &self,
        response: &Response,
        request: &WireRequest,
        cx: &Context,
    ) -> Result<(), Error> {
        for member in &self.members {
            cx.checkpoint(&request.url)?;
            member.validate(response, request, cx).await?;
        }
        Ok(())
    }
}

/// Acceptable status codes for a [`StatusCodeValidator`]: a single code,
/// an explicit set, or a contiguous range.
#[derive(Clone, Debug)]
pub enum AcceptableStatus {
    One(u16),
    Set(BTreeSet<u16>),
    Range(RangeInclusive<u16>),
}

impl AcceptableStatus {
    pub fn accepts(&self, status: StatusCode) -> bool {
        let code = status.as_u16();
        match self {
            Self::One(accepted) => *accepted == code,
            Self::Set(accepted) => accepted.contains(&code),
            Self::Range(accepted) => accepted.contains(&code),
        }
    }
}

impl From<u16> for AcceptableStatus {
    fn from(status: u16) -> Self {
        Self::One(status)
    }
}

impl From<StatusCode> for AcceptableStatus {
    fn from(status: StatusCode) -> Self {
        Self::One(status.as_u16())
    }
}

impl From<RangeInclusive<u16>> for AcceptableStatus {
    fn from(range: RangeInclusive<u16>) -> Self {
        Self::Range(range)
    }
}

impl From<Range<u16>> for AcceptableStatus {
    fn from(range: Range<u16>) -> Self {
        Self::Range(range.start..=range.end.saturating_sub(1))
    }
}

impl From<BTreeSet<u16>> for AcceptableStatus {
    fn from(set: BTreeSet<u16>) -> Self {
        Self::Set(set)
    }
}

impl<const N: usize> From<[u16; N]> for AcceptableStatus {
    fn from(codes: [u16; N]) -> Self {
        Self::Set(codes.into_iter().collect())
    }
}

/// Rejects responses whose status code falls outside the acceptable
/// set; the failure carries the offending code.
#[derive(Clone, Debug)]
pub struct StatusCodeValidator {
    acceptable: AcceptableStatus,
}

impl StatusCodeValidator {
    pub fn new(acceptable: impl Into<AcceptableStatus>) -> Self {
        Self {
            acceptable: acceptable.into(),
        }
    }
}

#[async_trait]
impl Validator for StatusCodeValidator {
    async fn validate(
        &self,
        response: &Response,
        request: &WireRequest,
        _cx: &Context,
    ) -> Result<(), Error> {
        if self.acceptable.accepts(response.status) {
            return Ok(());
        }
        Err(Error::Status {
            status: response.status.as_u16(),
            method: request.method.clone(),
            url: request.url.to_string(),
        })
    }
}
