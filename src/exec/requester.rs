// src/exec/requester.rs

//! The HTTP requester seam.
//!
//! How requests are physically sent is up to the implementation. The
//! controller sees one logical call per item, even if the requester performs
//! several transport round-trips (e.g. a two-pass digest exchange).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collection::{Header, Request};
use crate::errors::TransportError;
use crate::exec::BoxFuture;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub code: u16,
    pub status: String,
    pub headers: Vec<Header>,
    pub body: String,
    pub response_time: Duration,
}

impl Response {
    pub fn new(code: u16, status: impl Into<String>) -> Self {
        Self {
            code,
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// One entry of the protocol history returned with a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    /// Ask the requester for protocol-level debug frames in the history.
    pub verbose: bool,
}

/// Everything the requester reports for one logical request.
///
/// A transport error may still carry a usable response (e.g. a proxy
/// authentication failure); the controller treats that as a completed step.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub error: Option<TransportError>,
    pub response: Option<Response>,
    /// The request as actually sent.
    pub request: Request,
    pub history: Vec<HistoryEntry>,
}

impl RequestOutcome {
    pub fn success(request: Request, response: Response) -> Self {
        Self {
            error: None,
            response: Some(response),
            request,
            history: Vec::new(),
        }
    }

    pub fn failure(request: Request, error: TransportError) -> Self {
        Self {
            error: Some(error),
            response: None,
            request,
            history: Vec::new(),
        }
    }
}

/// Invoked once response headers are available, before the body completes.
pub type ResponseStartHook<'a> = Box<dyn FnOnce(&Response) + Send + 'a>;

pub trait Requester: Send + Sync {
    fn send<'a>(
        &'a self,
        request: Request,
        options: &'a RequestOptions,
        on_response_start: ResponseStartHook<'a>,
    ) -> BoxFuture<'a, RequestOutcome>;
}
