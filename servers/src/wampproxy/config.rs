use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Fixed backoff bounds for the reconnecting transport (C3). Not exposed on the
/// CLI surface; the router URI and realm are the only per-connection knobs an
/// operator needs.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(200);
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(3);

#[derive(Parser, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
#[command(name = "server_wampproxy", about = "WAMP protocol-bridge proxy")]
pub struct Config {
    /// Downstream listener WebSocket URI.
    #[clap(short = 's', long, env = "WAMPPROXY_SERVER", default_value = "ws://127.0.0.1:9000/ws")]
    pub server: String,

    /// Upstream WAMP router WebSocket URI.
    #[clap(short = 'r', long, env = "WAMPPROXY_ROUTER", default_value = "ws://127.0.0.1:8080/ws")]
    pub router: String,

    /// PEM private key used for upstream mTLS. Absent means no client certificate.
    #[clap(short = 'k', long, env = "WAMPPROXY_CLIENT_KEY")]
    pub client_key: Option<PathBuf>,

    /// PEM certificate used for upstream mTLS. Absent means no client certificate.
    #[clap(short = 'c', long, env = "WAMPPROXY_CLIENT_CERTIFICATE")]
    pub client_certificate: Option<PathBuf>,

    /// Raise the logging floor from info to debug.
    #[clap(short = 'd', long, env = "WAMPPROXY_DEBUG")]
    pub debug: bool,

    /// Optional JSON config file, overlaid beneath CLI/env overrides.
    #[clap(long, env = "WAMPPROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for rotated log files.
    #[clap(long, env = "WAMPPROXY_LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    /// Downstream connection cap.
    #[clap(long, env = "WAMPPROXY_MAX_CONNECTIONS", default_value_t = 40)]
    pub max_connections: usize,

    /// Per-call deadline, in seconds.
    #[clap(long, env = "WAMPPROXY_CALL_TIMEOUT_SECS", default_value_t = 30)]
    pub call_timeout_secs: u64,
}

impl Config {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Loads CLI + env, then overlays the optional config file for any field the
/// operator left at a file-provided value. Mirrors the override priority
/// CLI > env > file > default: clap already resolves CLI-over-env at parse
/// time, so only fields clap left at `None` fall back to the file.
pub fn load_config() -> Config {
    let cli_config = Config::parse();

    let config_from_file = cli_config.config.as_ref().and_then(|path| {
        fs::read_to_string(path)
            .ok()
            .and_then(|c| serde_json::from_str::<Config>(&c).ok())
    });

    match config_from_file {
        Some(file_config) => Config {
            server: cli_config.server,
            router: cli_config.router,
            client_key: cli_config.client_key.or(file_config.client_key),
            client_certificate: cli_config.client_certificate.or(file_config.client_certificate),
            debug: cli_config.debug || file_config.debug,
            config: cli_config.config,
            log_dir: cli_config.log_dir,
            max_connections: cli_config.max_connections,
            call_timeout_secs: cli_config.call_timeout_secs,
        },
        None => cli_config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_timeout_converts_seconds() {
        let cfg = Config {
            server: "ws://127.0.0.1:9000/ws".into(),
            router: "ws://127.0.0.1:8080/ws".into(),
            client_key: None,
            client_certificate: None,
            debug: false,
            config: None,
            log_dir: "./logs".into(),
            max_connections: 40,
            call_timeout_secs: 30,
        };
        assert_eq!(cfg.call_timeout(), Duration::from_secs(30));
    }
}
