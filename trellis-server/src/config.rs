use std::path::PathBuf;

use trellis_sync::ServerConfig;

/// Server configuration from the process environment.
pub fn load_config() -> ServerConfig {
    apply_overrides(ServerConfig::default(), |name| std::env::var(name).ok())
}

/// Overlay `TRELLIS_*` variables onto `config`. Unparsable numbers keep the
/// default and are logged.
pub fn apply_overrides<F>(mut config: ServerConfig, lookup: F) -> ServerConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("TRELLIS_BIND_ADDR") {
        config.bind_addr = v;
    }

    if let Some(v) = lookup("TRELLIS_STORAGE_PATH") {
        let v = v.trim();
        config.storage_path = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
    }

    if let Some(v) = lookup("TRELLIS_BROADCAST_CAPACITY") {
        match v.parse::<usize>() {
            Ok(parsed) if parsed > 0 => config.broadcast_capacity = parsed,
            _ => log::warn!("Ignoring TRELLIS_BROADCAST_CAPACITY={v}"),
        }
    }

    if let Some(v) = lookup("TRELLIS_MAX_COMMIT_ATTEMPTS") {
        match v.parse::<u32>() {
            Ok(parsed) if parsed > 0 => config.max_commit_attempts = parsed,
            _ => log::warn!("Ignoring TRELLIS_MAX_COMMIT_ATTEMPTS={v}"),
        }
    }

    config
}
