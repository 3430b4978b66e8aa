use std::fmt;

use http::StatusCode;

use crate::http::{InboundRequest, ProxyResponse};

/// Proxy-level failures. Every variant materializes as exactly one HTTP
/// response written back to the client before the connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyError {
    /// The request could not be parsed off the socket.
    BadRequest,
    /// The static path does not exist or is not readable.
    NotFound,
    /// The upstream call exceeded the per-request timeout.
    RequestTimeout,
    /// Any other upstream dispatch failure: DNS, connect, reset,
    /// malformed upstream response.
    BadGateway,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest => StatusCode::BAD_REQUEST,
            ProxyError::NotFound => StatusCode::NOT_FOUND,
            ProxyError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ProxyError::BadGateway => StatusCode::BAD_GATEWAY,
        }
    }

    /// Status-line body sent to the client.
    pub fn text(&self) -> &'static str {
        match self {
            ProxyError::BadRequest => "HTTP 400 BAD REQUEST",
            ProxyError::NotFound => "HTTP 404 NOT FOUND",
            ProxyError::RequestTimeout => "HTTP 408 REQUEST TIMEOUT",
            ProxyError::BadGateway => "HTTP 502 BAD GATEWAY",
        }
    }

    /// Build the client-facing response for this failure. The protocol
    /// version echoes the original request when one was parsed; without a
    /// request it defaults to HTTP/1.1.
    pub fn to_response(self, request: Option<&InboundRequest>) -> ProxyResponse {
        ProxyResponse::from_error(request, self)
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

impl std::error::Error for ProxyError {}
