pub mod types;


pub use types::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 40;
const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Load and validate the server list from a YAML file.
pub fn load(path: &Path) -> Result<Vec<ServerConfig>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    parse(&contents).with_context(|| format!("invalid configuration in {}", path.display()))
}

/// Parse and validate a YAML document. Split out of [`load`] so tests can
/// exercise the schema without touching the filesystem.
pub fn parse(contents: &str) -> Result<Vec<ServerConfig>> {
    let raw: RawConfig = serde_yaml::from_str(contents)?;
    if raw.servers.is_empty() {
        bail!("no servers configured");
    }
    raw.servers
        .into_iter()
        .enumerate()
        .map(|(index, server)| validate_server(server, index))
        .collect()
}

fn validate_server(raw: RawServer, index: usize) -> Result<ServerConfig> {
    let name = raw.name.unwrap_or_else(|| format!("server {index}"));
    if raw.listen.is_empty() {
        bail!("{name}: listen must not be empty");
    }

    let max_connections = raw.connection.concurrent.unwrap_or(DEFAULT_MAX_CONNECTIONS);
    if max_connections == 0 {
        bail!("{name}: connection.concurrent must be at least 1");
    }
    let timeout_secs = raw.connection.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        bail!("{name}: connection.timeout must be at least 1 second");
    }

    // `serve` takes precedence when both are present.
    if let Some(path_prefix) = raw.serve {
        return Ok(ServerConfig::Static(StaticConfig {
            name,
            listen: raw.listen,
            max_connections,
            path_prefix,
        }));
    }

    let Some(forward) = raw.forward else {
        bail!("{name}: must have a forward or serve");
    };
    let (upstreams, balancer) = validate_forward(forward, &name)?;

    let (forward_mode, id) = match raw.header {
        None => (ForwardMode::Forwarded, String::new()),
        Some(RawHeader::Named(value)) => match value.as_str() {
            "forwarded" => (ForwardMode::Forwarded, String::new()),
            "x-forwarded" => (ForwardMode::XForwarded, String::new()),
            other => bail!("{name}: header must be \"forwarded\" or \"x-forwarded\", got \"{other}\""),
        },
        Some(RawHeader::Forwarded { forwarded }) => (ForwardMode::Forwarded, forwarded.id),
    };

    Ok(ServerConfig::Forward(ForwardConfig {
        name,
        listen: raw.listen,
        max_connections,
        request_timeout: Duration::from_secs(timeout_secs),
        id,
        forward_mode,
        upstreams,
        balancer,
    }))
}

fn validate_forward(forward: RawForward, name: &str) -> Result<(Vec<Upstream>, BalancerKind)> {
    let (upstreams, kind) = match forward {
        RawForward::Address(address) => (vec![Upstream { address, weight: 1 }], BalancerKind::Single),
        RawForward::Addresses(addresses) => {
            let upstreams: Vec<Upstream> = addresses
                .into_iter()
                .map(|address| Upstream { address, weight: 1 })
                .collect();
            (upstreams, BalancerKind::RoundRobin)
        }
        RawForward::Weighted(entries) => {
            let mut upstreams = Vec::with_capacity(entries.len());
            for (i, entry) in entries.into_iter().enumerate() {
                if !(1..=255).contains(&entry.weight) {
                    bail!("{name}: forward[{i}].weight must be between 1 and 255");
                }
                upstreams.push(Upstream {
                    address: entry.address,
                    weight: entry.weight as u8,
                });
            }
            (upstreams, BalancerKind::WeightedRoundRobin)
        }
    };

    if upstreams.is_empty() {
        bail!("{name}: forward must name at least one upstream");
    }
    for (i, upstream) in upstreams.iter().enumerate() {
        if upstream.address.is_empty() {
            bail!("{name}: forward[{i}].address must not be empty");
        }
    }

    // A single upstream is always the trivial policy, whatever the shape.
    let kind = if upstreams.len() == 1 { BalancerKind::Single } else { kind };
    Ok((upstreams, kind))
}
