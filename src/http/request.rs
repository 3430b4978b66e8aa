use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, FORWARDED, HOST, TRANSFER_ENCODING};
use http::{Method, Request, Version};
use http_body_util::Full;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::ForwardMode;
use crate::error::ProxyError;

use super::MAX_REQUEST_SIZE;

const MAX_HEADERS: usize = 100;

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// A fully buffered inbound HTTP/1.1 request.
///
/// `Transfer-Encoding` never survives parsing: chunked bodies are decoded
/// into `body` and the header is dropped, so downstream consumers only ever
/// see plain buffered payloads.
#[derive(Debug)]
pub struct InboundRequest {
    pub method: Method,
    /// Origin-form request target, e.g. `/a?b=1`.
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    /// Value of the `Host` header, empty when the client sent none.
    pub host: String,
    pub body: Bytes,
}

impl InboundRequest {
    /// Request target with the query string stripped.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }
}

/// Read one HTTP/1.1 request off the socket, enforcing the 32 MiB cap on the
/// buffered header + body region. Every failure collapses to `BadRequest`:
/// the client gets a response, never a diagnosis.
pub async fn read_request<R>(stream: &mut R) -> Result<InboundRequest, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(8 * 1024);

    let (method, target, version, mut headers, header_len) = loop {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut slots);
        match parsed.parse(&buf).map_err(|_| ProxyError::BadRequest)? {
            httparse::Status::Complete(header_len) => {
                break parse_head(&parsed, header_len)?;
            }
            httparse::Status::Partial => {
                if buf.len() >= MAX_REQUEST_SIZE {
                    return Err(ProxyError::BadRequest);
                }
                if read_more(stream, &mut buf).await? == 0 {
                    return Err(ProxyError::BadRequest);
                }
            }
        }
    };
    buf.advance(header_len);

    let body = if let Some(encoding) = headers.remove(TRANSFER_ENCODING) {
        if !encoding.as_bytes().eq_ignore_ascii_case(b"chunked") {
            return Err(ProxyError::BadRequest);
        }
        // Chunked payloads are decoded here; the stale framing headers must
        // not leak into the outbound request.
        headers.remove(CONTENT_LENGTH);
        read_chunked_body(stream, &mut buf, header_len).await?
    } else if let Some(length) = content_length(&headers)? {
        if length.saturating_add(header_len) > MAX_REQUEST_SIZE {
            return Err(ProxyError::BadRequest);
        }
        read_sized_body(stream, &mut buf, length).await?
    } else {
        Bytes::new()
    };

    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    Ok(InboundRequest {
        method,
        target,
        version,
        headers,
        host,
        body,
    })
}

type RequestHead = (Method, String, Version, HeaderMap, usize);

fn parse_head(parsed: &httparse::Request<'_, '_>, header_len: usize) -> Result<RequestHead, ProxyError> {
    let method = parsed
        .method
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or(ProxyError::BadRequest)?;
    let target = parsed.path.ok_or(ProxyError::BadRequest)?.to_string();
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(ProxyError::BadRequest),
    };

    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| ProxyError::BadRequest)?;
        let value = HeaderValue::from_bytes(header.value).map_err(|_| ProxyError::BadRequest)?;
        headers.append(name, value);
    }

    Ok((method, target, version, headers, header_len))
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>, ProxyError> {
    match headers.get(CONTENT_LENGTH) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .map(Some)
            .ok_or(ProxyError::BadRequest),
    }
}

async fn read_more<R>(stream: &mut R, buf: &mut BytesMut) -> Result<usize, ProxyError>
where
    R: AsyncRead + Unpin,
{
    stream.read_buf(buf).await.map_err(|_| ProxyError::BadRequest)
}

async fn read_sized_body<R>(stream: &mut R, buf: &mut BytesMut, length: usize) -> Result<Bytes, ProxyError>
where
    R: AsyncRead + Unpin,
{
    while buf.len() < length {
        if read_more(stream, buf).await? == 0 {
            return Err(ProxyError::BadRequest);
        }
    }
    Ok(buf.split_to(length).freeze())
}

/// Minimal chunked-transfer decoder: size line (extensions ignored), data,
/// CRLF, repeated; a zero chunk then discarded trailers terminate the body.
async fn read_chunked_body<R>(
    stream: &mut R,
    buf: &mut BytesMut,
    header_len: usize,
) -> Result<Bytes, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut body = BytesMut::new();
    loop {
        let line = read_line(stream, buf).await?;
        let size = parse_chunk_size(&line)?;
        if header_len + body.len() + size > MAX_REQUEST_SIZE {
            return Err(ProxyError::BadRequest);
        }
        if size == 0 {
            loop {
                if read_line(stream, buf).await?.is_empty() {
                    return Ok(body.freeze());
                }
            }
        }
        while buf.len() < size + 2 {
            if read_more(stream, buf).await? == 0 {
                return Err(ProxyError::BadRequest);
            }
        }
        body.extend_from_slice(&buf[..size]);
        if &buf[size..size + 2] != b"\r\n" {
            return Err(ProxyError::BadRequest);
        }
        buf.advance(size + 2);
    }
}

async fn read_line<R>(stream: &mut R, buf: &mut BytesMut) -> Result<Vec<u8>, ProxyError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(end) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = buf.split_to(end).to_vec();
            buf.advance(2);
            return Ok(line);
        }
        if buf.len() >= MAX_REQUEST_SIZE {
            return Err(ProxyError::BadRequest);
        }
        if read_more(stream, buf).await? == 0 {
            return Err(ProxyError::BadRequest);
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ProxyError> {
    let digits = match line.iter().position(|&b| b == b';') {
        Some(at) => &line[..at],
        None => line,
    };
    let digits = std::str::from_utf8(digits).map_err(|_| ProxyError::BadRequest)?;
    usize::from_str_radix(digits.trim(), 16).map_err(|_| ProxyError::BadRequest)
}

/// Pure builder that clones an inbound request into its upstream form,
/// rewriting the target URL and the forwarding headers. The inbound request
/// is left untouched.
pub struct ProxyRequest<'a> {
    request: &'a InboundRequest,
    proxy_id: &'a str,
    proxy_addr: SocketAddr,
    client_addr: SocketAddr,
    upstream_addr: &'a str,
}

impl<'a> ProxyRequest<'a> {
    pub fn new(
        request: &'a InboundRequest,
        proxy_id: &'a str,
        proxy_addr: SocketAddr,
        client_addr: SocketAddr,
        upstream_addr: &'a str,
    ) -> Self {
        Self {
            request,
            proxy_id,
            proxy_addr,
            client_addr,
            upstream_addr,
        }
    }

    /// Build the outbound request: scheme `http`, host swapped for the
    /// selected upstream, method/body/headers preserved verbatim except the
    /// forwarding headers for `mode`.
    pub fn into_forwarded(self, mode: ForwardMode) -> Result<Request<Full<Bytes>>, http::Error> {
        let mut headers = self.request.headers.clone();
        match mode {
            ForwardMode::Forwarded => self.append_forwarded(&mut headers)?,
            ForwardMode::XForwarded => self.append_x_forwarded(&mut headers)?,
        }

        let uri = format!("http://{}{}", self.upstream_addr, self.request.target);
        let mut outbound = Request::builder()
            .method(self.request.method.clone())
            .uri(uri)
            .version(Version::HTTP_11)
            .body(Full::new(self.request.body.clone()))?;
        *outbound.headers_mut() = headers;
        Ok(outbound)
    }

    /// RFC 7239 single-hop append. `X-Forwarded-*` is left alone.
    fn append_forwarded(&self, headers: &mut HeaderMap) -> Result<(), http::Error> {
        let by = if self.proxy_id.is_empty() {
            self.proxy_addr.to_string()
        } else {
            self.proxy_id.to_string()
        };
        let element = format!("for={};by={};host={}", self.client_addr, by, self.request.host);
        let value = match headers.get(FORWARDED).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {element}"),
            None => element,
        };
        headers.insert(FORWARDED, HeaderValue::from_str(&value)?);
        Ok(())
    }

    /// `X-Forwarded-For` / `X-Forwarded-Host` appends. `Forwarded` is left
    /// alone.
    fn append_x_forwarded(&self, headers: &mut HeaderMap) -> Result<(), http::Error> {
        let proxy = self.proxy_addr.to_string();
        let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {proxy}"),
            None => format!("{}, {}", self.client_addr, proxy),
        };
        headers.insert(X_FORWARDED_FOR.clone(), HeaderValue::from_str(&forwarded_for)?);

        let forwarded_host = match headers.get(&X_FORWARDED_HOST).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{}, {}", existing, self.request.host),
            None => self.request.host.clone(),
        };
        headers.insert(X_FORWARDED_HOST.clone(), HeaderValue::from_str(&forwarded_host)?);
        Ok(())
    }
}
