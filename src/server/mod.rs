pub mod forward;
pub mod runtime;
pub mod static_files;
mod status;

pub use forward::ForwardServer;
pub use static_files::StaticServer;
pub use status::{ServerStatus, SupervisorStatus};

pub(crate) use status::{StatusCell, SupervisorStatusCell};

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerConfig;

/// A single bound listener plus its pipeline, load balancer, and
/// concurrency governor.
pub enum Server {
    Forward(ForwardServer),
    Static(StaticServer),
}

impl Server {
    /// Build a server from its configuration. The listener is bound eagerly:
    /// construction fails if the port is taken or, for the static variant,
    /// the directory is missing.
    pub async fn from_config(config: ServerConfig) -> Result<Self> {
        match config {
            ServerConfig::Forward(cfg) => Ok(Self::Forward(ForwardServer::new(cfg).await?)),
            ServerConfig::Static(cfg) => Ok(Self::Static(StaticServer::new(cfg).await?)),
        }
    }

    fn core(&self) -> &Core {
        match self {
            Server::Forward(server) => &server.core,
            Server::Static(server) => &server.core,
        }
    }

    pub fn name(&self) -> &str {
        &self.core().name
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.core().local_addr
    }

    pub fn status(&self) -> ServerStatus {
        self.core().status.load()
    }

    /// Stop admitting new connections. In-flight pipelines are not
    /// cancelled; the accept-loop task drains them and reports `Offline`.
    /// A no-op unless the server is `Online`.
    pub fn shutdown(&self) {
        let core = self.core();
        if core.status.load() != ServerStatus::Online {
            return;
        }
        core.status.store(ServerStatus::ShuttingDown);
        core.stop.cancel();
        info!("{}: listener closing", core.name);
    }

    /// Accept loop. Runs until `shutdown` or a terminal accept error, then
    /// drains every in-flight connection before going `Offline`.
    pub async fn run(self: Arc<Self>) {
        let core = self.core();
        let Some(listener) = core.take_listener() else {
            warn!("{}: run invoked twice, ignoring", core.name);
            return;
        };
        core.status.store(ServerStatus::Online);
        info!("{}: listening for requests, addr={}", core.name, core.local_addr);

        loop {
            let accepted = tokio::select! {
                result = listener.accept() => result,
                _ = core.stop.cancelled() => break,
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(error) if is_transient_accept_error(&error) => {
                    warn!("{}: transient accept failure, error={}", core.name, error);
                    continue;
                }
                Err(error) => {
                    warn!("{}: accept failed, closing listener, error={}", core.name, error);
                    break;
                }
            };

            // Backpressure: hold the accepted socket until a slot frees up.
            let permit = tokio::select! {
                permit = core.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = core.stop.cancelled() => break,
            };

            info!("{}: accepted connection, peer={}", core.name, peer);
            let server = self.clone();
            tokio::spawn(async move {
                match &*server {
                    Server::Forward(s) => s.handle_connection(stream, peer).await,
                    Server::Static(s) => s.handle_connection(stream, peer).await,
                }
                info!("{}: closed connection, peer={}", server.core().name, peer);
                // Slot released unconditionally on task exit.
                drop(permit);
            });
        }

        core.status.store(ServerStatus::ShuttingDown);
        drop(listener);
        let pending = core.max_connections - core.permits.available_permits();
        info!("{}: listener closed, connections pending={}", core.name, pending);

        // Re-acquiring every permit is the drain barrier: it resolves only
        // once the last in-flight connection has released its slot.
        if core.permits.acquire_many(core.max_connections as u32).await.is_ok() {
            info!("{}: all client connections closed", core.name);
        }
        core.status.store(ServerStatus::Offline);
    }
}

/// State shared by both server kinds: the bound listener, the concurrency
/// governor, and the lifecycle status.
pub(crate) struct Core {
    pub(crate) name: String,
    listener: Mutex<Option<TcpListener>>,
    pub(crate) local_addr: SocketAddr,
    max_connections: usize,
    permits: Arc<Semaphore>,
    status: StatusCell,
    stop: CancellationToken,
}

impl Core {
    pub(crate) async fn bind(name: String, listen: &str, max_connections: usize) -> Result<Self> {
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("{name}: cannot bind {listen}"))?;
        let local_addr = listener
            .local_addr()
            .with_context(|| format!("{name}: cannot resolve the bound address"))?;
        Ok(Self {
            name,
            listener: Mutex::new(Some(listener)),
            local_addr,
            max_connections,
            permits: Arc::new(Semaphore::new(max_connections)),
            status: StatusCell::new(ServerStatus::Offline),
            stop: CancellationToken::new(),
        })
    }

    fn take_listener(&self) -> Option<TcpListener> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// `EMFILE`-class conditions recover once descriptors free up; everything
/// else tears the listener down.
fn is_transient_accept_error(error: &io::Error) -> bool {
    if matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) {
        return true;
    }
    // ENFILE (23) / EMFILE (24) have no stable `ErrorKind` mapping.
    matches!(error.raw_os_error(), Some(23) | Some(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_accept_errors() {
        assert!(is_transient_accept_error(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
        assert!(is_transient_accept_error(&io::Error::from_raw_os_error(24)));
        assert!(!is_transient_accept_error(&io::Error::from(
            io::ErrorKind::InvalidInput
        )));
    }
}
