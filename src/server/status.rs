use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a single server instance. Transitions are monotone within
/// one run cycle: `Offline → Online → ShuttingDown → Offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Offline,
    Online,
    ShuttingDown,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServerStatus::Offline => "offline",
            ServerStatus::Online => "online",
            ServerStatus::ShuttingDown => "shutting down",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorStatus {
    Stopped,
    Running,
    Stopping,
}

impl fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SupervisorStatus::Stopped => "stopped",
            SupervisorStatus::Running => "running",
            SupervisorStatus::Stopping => "stopping",
        })
    }
}

/// Lock-free status cell shared between the accept loop, `shutdown`, and
/// the drain observer.
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn new(initial: ServerStatus) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub(crate) fn load(&self) -> ServerStatus {
        match self.0.load(Ordering::Acquire) {
            0 => ServerStatus::Offline,
            1 => ServerStatus::Online,
            _ => ServerStatus::ShuttingDown,
        }
    }

    pub(crate) fn store(&self, status: ServerStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

pub(crate) struct SupervisorStatusCell(AtomicU8);

impl SupervisorStatusCell {
    pub(crate) fn new(initial: SupervisorStatus) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub(crate) fn load(&self) -> SupervisorStatus {
        match self.0.load(Ordering::Acquire) {
            0 => SupervisorStatus::Stopped,
            1 => SupervisorStatus::Running,
            _ => SupervisorStatus::Stopping,
        }
    }

    pub(crate) fn store(&self, status: SupervisorStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}
