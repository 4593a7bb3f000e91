//! Transport Module
//!
//! The engine treats the wire as a black box: given a prepared request it
//! returns a status, headers and body, or fails with a timeout or I/O error.

mod client;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::HeaderMap;

use crate::error::TransportError;
use crate::operation::{Credentials, HttpMethod, Operation, RequestBody};

pub use client::ReqwestTransport;

// == Request / Response ==
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Formatted into an `Authorization` header by the transport
    pub credentials: Option<Credentials>,
}

impl TransportRequest {
    pub fn from_operation(operation: &Operation) -> Self {
        Self {
            method: operation.method(),
            url: operation.url().to_string(),
            headers: operation.headers().clone(),
            body: operation.request_body(),
            credentials: operation.credentials().cloned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

// == Transport Trait ==
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request. Timeouts must be reported as
    /// [`TransportError::Timeout`] so they surface distinctly from other
    /// failures.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
