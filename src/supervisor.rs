use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::config::ServerConfig;
use crate::server::{Server, ServerStatus, SupervisorStatus, SupervisorStatusCell};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Top-level owner of every server instance. All process state is reachable
/// from this value; there are no singletons.
pub struct Supervisor {
    servers: Vec<Arc<Server>>,
    status: SupervisorStatusCell,
}

impl Supervisor {
    /// Construct every server up front. Any bind or setup failure aborts
    /// the whole construction and is returned to the caller.
    pub async fn new(configs: Vec<ServerConfig>) -> Result<Self> {
        let mut servers = Vec::with_capacity(configs.len());
        for config in configs {
            servers.push(Arc::new(Server::from_config(config).await?));
        }
        Ok(Self {
            servers,
            status: SupervisorStatusCell::new(SupervisorStatus::Stopped),
        })
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status.load()
    }

    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    /// Spawn every server's accept loop.
    pub fn run(&self) {
        info!("starting grx, servers={}", self.servers.len());
        self.status.store(SupervisorStatus::Running);
        for server in &self.servers {
            tokio::spawn(server.clone().run());
        }
    }

    /// Stop every online server, then wait until all of them have drained.
    /// Polls indefinitely: bounding total stop time is the caller's job.
    pub async fn stop(&self) {
        info!("stopping grx");
        self.status.store(SupervisorStatus::Stopping);
        for server in &self.servers {
            if server.status() == ServerStatus::Online {
                server.shutdown();
            }
        }

        loop {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            if self
                .servers
                .iter()
                .all(|server| server.status() == ServerStatus::Offline)
            {
                break;
            }
        }

        self.status.store(SupervisorStatus::Stopped);
        info!("grx stopped");
    }
}
