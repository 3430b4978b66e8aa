/// Size the tokio worker pool from the container CPU limit rather than the
/// host CPU count: a container limited to a few cores on a large host would
/// otherwise over-provision threads.
///
/// Order: `GRX_WORKER_THREADS` env override, cgroup v2 `cpu.max`, then
/// `available_parallelism`.
pub fn worker_threads() -> usize {
    if let Some(threads) = std::env::var("GRX_WORKER_THREADS")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        return threads.max(1);
    }

    if let Ok(contents) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        if let Some(cores) = parse_cpu_max(&contents) {
            return cores.max(1);
        }
    }

    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// cgroup v2 `cpu.max` is `<quota> <period>` or `max <period>`. Fractional
/// limits round up so a 1.5-core container still gets two workers.
fn parse_cpu_max(contents: &str) -> Option<usize> {
    let mut parts = contents.split_whitespace();
    let quota = parts.next()?;
    let period: u64 = parts.next()?.parse().ok()?;
    if quota == "max" || period == 0 {
        return None;
    }
    let quota: u64 = quota.parse().ok()?;
    if quota == 0 {
        return None;
    }
    Some(quota.div_ceil(period) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_core_limits() {
        assert_eq!(parse_cpu_max("400000 100000"), Some(4));
        assert_eq!(parse_cpu_max("100000 100000"), Some(1));
    }

    #[test]
    fn fractional_limits_round_up() {
        assert_eq!(parse_cpu_max("150000 100000"), Some(2));
        assert_eq!(parse_cpu_max("50000 100000"), Some(1));
    }

    #[test]
    fn unlimited_and_malformed_fall_through() {
        assert_eq!(parse_cpu_max("max 100000"), None);
        assert_eq!(parse_cpu_max(""), None);
        assert_eq!(parse_cpu_max("0 100000"), None);
        assert_eq!(parse_cpu_max("100000 0"), None);
    }
}
