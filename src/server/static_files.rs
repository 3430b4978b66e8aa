use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Result};
use bytes::Bytes;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::StaticConfig;
use crate::error::ProxyError;
use crate::http::{read_request, ProxyResponse};

use super::Core;

/// A server instance that serves files from a directory prefix.
pub struct StaticServer {
    pub(crate) core: Core,
    path_prefix: PathBuf,
}

impl StaticServer {
    pub(crate) async fn new(config: StaticConfig) -> Result<Self> {
        if !config.path_prefix.is_dir() {
            bail!(
                "{}: serve path {} is not a directory",
                config.name,
                config.path_prefix.display()
            );
        }
        let core = Core::bind(config.name.clone(), &config.listen, config.max_connections).await?;
        Ok(Self { core, path_prefix: config.path_prefix })
    }

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

        let Some(target) = resolve_path(&self.path_prefix, request.path()) else {
            debug!("{}: path escapes the prefix, target={}", self.core.name, request.target);
            return ProxyError::NotFound.to_response(Some(&request));
        };

        match tokio::fs::read(&target).await {
            Ok(contents) => ProxyResponse::from_file(&request, Bytes::from(contents)),
            Err(error) => {
                debug!(
                    "{}: cannot read {}, error={}",
                    self.core.name,
                    target.display(),
                    error
                );
                ProxyError::NotFound.to_response(Some(&request))
            }
        }
    }
}

/// Join the request path under the prefix. Paths are normalized lexically
/// first, and any path that would climb out of the prefix is rejected.
fn resolve_path(prefix: &Path, request_path: &str) -> Option<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in Path::new(request_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(prefix.join(resolved))
}
