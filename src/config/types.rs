use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Validated model — immutable once constructed, consumed by the supervisor.
// ---------------------------------------------------------------------------

/// Description of one server instance.
#[derive(Debug, Clone)]
pub enum ServerConfig {
    Forward(ForwardConfig),
    Static(StaticConfig),
}

impl ServerConfig {
    pub fn name(&self) -> &str {
        match self {
            ServerConfig::Forward(cfg) => &cfg.name,
            ServerConfig::Static(cfg) => &cfg.name,
        }
    }

    pub fn listen(&self) -> &str {
        match self {
            ServerConfig::Forward(cfg) => &cfg.listen,
            ServerConfig::Static(cfg) => &cfg.listen,
        }
    }
}

/// A server that forwards requests to one or more upstream addresses.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    pub name: String,
    pub listen: String,
    pub max_connections: usize,
    pub request_timeout: Duration,
    /// Used as the `by=` token of the `Forwarded` header. May be empty, in
    /// which case the listener address is used. Ignored under `XForwarded`.
    pub id: String,
    pub forward_mode: ForwardMode,
    pub upstreams: Vec<Upstream>,
    pub balancer: BalancerKind,
}

/// A server that serves files from a local directory prefix.
#[derive(Debug, Clone)]
pub struct StaticConfig {
    pub name: String,
    pub listen: String,
    pub max_connections: usize,
    pub path_prefix: PathBuf,
}

/// A backend address a forwarding server can dispatch to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub address: String,
    /// Only consulted by the weighted round-robin policy.
    pub weight: u8,
}

/// Which family of forwarding headers the proxy appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// RFC 7239 `Forwarded` single-hop append.
    Forwarded,
    /// `X-Forwarded-For` / `X-Forwarded-Host` appends.
    XForwarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancerKind {
    Single,
    RoundRobin,
    WeightedRoundRobin,
}

// ---------------------------------------------------------------------------
// Raw file schema — the exact YAML shapes accepted on disk. Validation into
// the model above happens in `config::load`.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct RawConfig {
    #[serde(default)]
    pub servers: Vec<RawServer>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawServer {
    pub name: Option<String>,
    pub listen: String,
    pub serve: Option<PathBuf>,
    pub forward: Option<RawForward>,
    pub header: Option<RawHeader>,
    #[serde(default)]
    pub connection: RawConnection,
}

/// `forward` accepts a single address, a homogeneous list of addresses, or a
/// homogeneous list of weighted entries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawForward {
    Address(String),
    Addresses(Vec<String>),
    Weighted(Vec<RawWeighted>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawWeighted {
    pub address: String,
    pub weight: u16,
}

/// `header: "forwarded"`, `header: "x-forwarded"`, or
/// `header: { forwarded: { id: "..." } }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawHeader {
    Named(String),
    Forwarded { forwarded: RawForwardedHeader },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawForwardedHeader {
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawConnection {
    pub timeout: Option<u64>,
    pub concurrent: Option<usize>,
}
