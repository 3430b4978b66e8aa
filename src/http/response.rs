use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, SERVER, TRANSFER_ENCODING};
use http::{StatusCode, Version};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::ProxyError;

use super::request::InboundRequest;
use super::SERVER_TOKEN;

/// A response ready to be serialized back to the client, either wrapped from
/// an upstream exchange or synthesized locally.
#[derive(Debug)]
pub struct ProxyResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl ProxyResponse {
    /// Wrap an upstream response verbatim. Collecting the body drains the
    /// upstream connection exactly once, returning it to the client pool.
    pub async fn from_upstream(response: hyper::Response<Incoming>) -> Result<Self, hyper::Error> {
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            body,
        })
    }

    /// Synthesize a `200 OK` carrying raw file contents. No `Content-Type`
    /// is inferred.
    pub fn from_file(request: &InboundRequest, contents: Bytes) -> Self {
        Self {
            status: StatusCode::OK,
            version: request.version,
            headers: HeaderMap::new(),
            body: contents,
        }
    }

    /// Synthesize a response for a proxy-level failure, echoing the protocol
    /// version of the original request when one is available.
    pub(crate) fn from_error(request: Option<&InboundRequest>, error: ProxyError) -> Self {
        Self {
            status: error.status(),
            version: request.map(|r| r.version).unwrap_or(Version::HTTP_11),
            headers: HeaderMap::new(),
            body: Bytes::from_static(error.text().as_bytes()),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Serialize in wire HTTP/1.1 format and flush. The proxy identity is
    /// stamped on the way out, and framing headers are normalized to the
    /// buffered body: `Content-Length` is authoritative, `Transfer-Encoding`
    /// never reaches the client.
    pub async fn write_to<W>(mut self, sink: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.headers.insert(SERVER, HeaderValue::from_static(SERVER_TOKEN));
        self.headers.remove(TRANSFER_ENCODING);
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));

        let mut digits = itoa::Buffer::new();
        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(version_line(self.version).as_bytes());
        head.push(b' ');
        head.extend_from_slice(digits.format(self.status.as_u16()).as_bytes());
        head.push(b' ');
        head.extend_from_slice(self.status.canonical_reason().unwrap_or("").as_bytes());
        head.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");

        sink.write_all(&head).await?;
        sink.write_all(&self.body).await?;
        sink.flush().await
    }
}

fn version_line(version: Version) -> &'static str {
    if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn request(version: Version) -> InboundRequest {
        InboundRequest {
            method: Method::GET,
            target: "/".to_string(),
            version,
            headers: HeaderMap::new(),
            host: String::new(),
            body: Bytes::new(),
        }
    }

    async fn serialize(response: ProxyResponse) -> String {
        let mut sink = Vec::new();
        response.write_to(&mut sink).await.unwrap();
        String::from_utf8(sink).unwrap()
    }

    #[tokio::test]
    async fn error_response_wire_format() {
        let wire = serialize(ProxyError::BadGateway.to_response(None)).await;
        assert!(wire.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "got: {wire}");
        assert!(wire.contains(&format!("server: {SERVER_TOKEN}\r\n")));
        assert!(wire.contains("content-length: 20\r\n"));
        assert!(wire.ends_with("\r\n\r\nHTTP 502 BAD GATEWAY"));
    }

    #[tokio::test]
    async fn error_response_echoes_the_request_version() {
        let req = request(Version::HTTP_10);
        let wire = serialize(ProxyError::NotFound.to_response(Some(&req))).await;
        assert!(wire.starts_with("HTTP/1.0 404 Not Found\r\n"), "got: {wire}");
        assert!(wire.ends_with("HTTP 404 NOT FOUND"));
    }

    #[tokio::test]
    async fn file_response_sets_the_content_length() {
        let req = request(Version::HTTP_11);
        let wire = serialize(ProxyResponse::from_file(&req, Bytes::from_static(b"hi"))).await;
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("content-length: 2\r\n"));
        assert!(!wire.contains("content-type"));
        assert!(wire.ends_with("\r\n\r\nhi"));
    }
}
