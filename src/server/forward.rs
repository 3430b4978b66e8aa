use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use http::Request;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::balance::Balancer;
use crate::config::{ForwardConfig, ForwardMode};
use crate::error::ProxyError;
use crate::http::{read_request, ProxyRequest, ProxyResponse};

use super::Core;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// A server instance that forwards requests to a set of upstreams.
pub struct ForwardServer {
    pub(crate) core: Core,
    id: String,
    forward_mode: ForwardMode,
    request_timeout: Duration,
    balancer: Balancer,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl ForwardServer {
    pub(crate) async fn new(config: ForwardConfig) -> Result<Self> {
        let core = Core::bind(config.name.clone(), &config.listen, config.max_connections).await?;
        let balancer = Balancer::new(config.balancer, &config.upstreams);
        let client = build_upstream_client(config.max_connections);
        Ok(Self {
            core,
            id: config.id,
            forward_mode: config.forward_mode,
            request_timeout: config.request_timeout,
            balancer,
            client,
        })
    }

    /// Per-connection pipeline: parse → rewrite → dispatch → respond.
    /// Exactly one response is written before the socket closes.
    pub(crate) async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        let response = self.respond(&mut stream, peer).await;
        if let Err(error) = response.write_to(&mut stream).await {
            debug!("{}: response write failed, peer={}, error={}", self.core.name, peer, error);
        }
    }

    async fn respond(&self, stream: &mut TcpStream, peer: SocketAddr) -> ProxyResponse {
        let request = match read_request(stream).await {
            Ok(request) => request,
            Err(error) => {
                debug!("{}: unreadable request, peer={}", self.core.name, peer);
                return error.to_response(None);
            }
        };

        let upstream = self.balancer.next();
        let outbound = ProxyRequest::new(&request, &self.id, self.core.local_addr, peer, &upstream)
            .into_forwarded(self.forward_mode);
        let outbound = match outbound {
            Ok(outbound) => outbound,
            Err(error) => {
                warn!(
                    "{}: cannot build upstream request, upstream={}, error={}",
                    self.core.name, upstream, error
                );
                return ProxyError::BadRequest.to_response(Some(&request));
            }
        };

        // The timeout bounds the whole exchange: connect, send, and reading
        // the upstream response body.
        match tokio::time::timeout(self.request_timeout, self.dispatch(outbound)).await {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                warn!(
                    "{}: upstream dispatch failed, upstream={}, error={:#}",
                    self.core.name, upstream, error
                );
                ProxyError::BadGateway.to_response(Some(&request))
            }
            Err(_) => {
                warn!("{}: upstream timed out, upstream={}", self.core.name, upstream);
                ProxyError::RequestTimeout.to_response(Some(&request))
            }
        }
    }

    async fn dispatch(&self, outbound: Request<Full<Bytes>>) -> Result<ProxyResponse> {
        let response = self.client.request(outbound).await?;
        Ok(ProxyResponse::from_upstream(response).await?)
    }
}

/// HTTP/1.1 client shared by every pipeline invocation of one server.
fn build_upstream_client(max_connections: usize) -> Client<HttpConnector, Full<Bytes>> {
    let mut connector = HttpConnector::new();
    connector.set_nodelay(true);
    connector.set_keepalive(Some(TCP_KEEPALIVE));
    connector.set_connect_timeout(Some(CONNECT_TIMEOUT));

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(TCP_KEEPALIVE)
        .pool_max_idle_per_host(max_connections)
        .build(connector)
}
