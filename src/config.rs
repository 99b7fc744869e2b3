//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `KUBE_RELAY_LISTEN`, `KUBE_RELAY_KUBECONFIG`,
//!    `KUBE_RELAY_CONTEXT`
//! 2. **Config file** — path via `--config <path>`, or `kube-relay.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:3030"
//! outbound_queue_depth = 256
//! read_chunk_size = 4096
//! max_pending_input = 1048576
//!
//! [cluster]
//! kubeconfig = "/home/me/.kube/config"   # omit to use kube's default inference
//! context = "staging"                     # omit to use current-context
//!
//! [streams]
//! default_namespace = "default"
//! log_tail_lines = 100
//! log_follow = true
//! exec_command = "/bin/sh"
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Default config file looked up in the working directory.
const DEFAULT_CONFIG_FILE: &str = "kube-relay.toml";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server and per-connection limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:3030`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Capacity of each connection's outbound message queue (default 256).
    /// A full queue blocks the producing task until the client catches up.
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,
    /// Maximum bytes requested per read from a remote log or exec stream
    /// (default 4096). Each read becomes one outbound message.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// Bytes of exec input the connection may hold while the remote process
    /// is not reading stdin (default 1 MiB). Exceeding it ends the session.
    #[serde(default = "default_max_pending_input")]
    pub max_pending_input: usize,
}

/// Which cluster credentials to use. Both fields are optional; when unset,
/// kube's standard inference (in-cluster env, then `~/.kube/config`) applies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterConfig {
    /// Explicit kubeconfig path. Override with `KUBE_RELAY_KUBECONFIG`.
    pub kubeconfig: Option<String>,
    /// Context name inside the kubeconfig. Override with `KUBE_RELAY_CONTEXT`.
    pub context: Option<String>,
}

/// Defaults applied to stream requests that omit a parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamsConfig {
    #[serde(default = "default_namespace")]
    pub default_namespace: String,
    /// Lines of history requested when a log stream opens (default 100).
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: u32,
    /// Keep log streams open for new output (default true).
    #[serde(default = "default_log_follow")]
    pub log_follow: bool,
    /// Command run by exec sessions that don't name one (default `/bin/sh`).
    #[serde(default = "default_exec_command")]
    pub exec_command: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:3030".to_string()
}
fn default_outbound_queue_depth() -> usize {
    256
}
fn default_read_chunk_size() -> usize {
    4096
}
fn default_max_pending_input() -> usize {
    1024 * 1024
}
fn default_namespace() -> String {
    "default".to_string()
}
fn default_log_tail_lines() -> u32 {
    100
}
fn default_log_follow() -> bool {
    true
}
fn default_exec_command() -> String {
    "/bin/sh".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            outbound_queue_depth: default_outbound_queue_depth(),
            read_chunk_size: default_read_chunk_size(),
            max_pending_input: default_max_pending_input(),
        }
    }
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            default_namespace: default_namespace(),
            log_tail_lines: default_log_tail_lines(),
            log_follow: default_log_follow(),
            exec_command: default_exec_command(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `kube-relay.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            Self::parse(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
            let content = std::fs::read_to_string(DEFAULT_CONFIG_FILE)
                .unwrap_or_else(|e| panic!("Failed to read {DEFAULT_CONFIG_FILE}: {e}"));
            Self::parse(&content)
                .unwrap_or_else(|e| panic!("Failed to parse {DEFAULT_CONFIG_FILE}: {e}"))
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Parse a TOML document; missing sections and fields take their defaults.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = var("KUBE_RELAY_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(path) = var("KUBE_RELAY_KUBECONFIG") {
            self.cluster.kubeconfig = Some(path);
        }
        if let Some(context) = var("KUBE_RELAY_CONTEXT") {
            self.cluster.context = Some(context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:3030");
        assert_eq!(config.server.outbound_queue_depth, 256);
        assert_eq!(config.streams.log_tail_lines, 100);
        assert!(config.streams.log_follow);
        assert_eq!(config.streams.exec_command, "/bin/sh");
        assert!(config.cluster.kubeconfig.is_none());
    }

    #[test]
    fn test_parse_partial_sections() {
        let config = Config::parse(
            "[server]\nlisten = \"127.0.0.1:9000\"\n\n[cluster]\ncontext = \"staging\"\n",
        )
        .unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.read_chunk_size, 4096);
        assert_eq!(config.server.max_pending_input, 1024 * 1024);
        assert_eq!(config.cluster.context.as_deref(), Some("staging"));
        assert_eq!(config.streams.default_namespace, "default");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::parse("[server]\nlisten = \"127.0.0.1:9000\"\n").unwrap();
        config.apply_env(|key| match key {
            "KUBE_RELAY_LISTEN" => Some("0.0.0.0:8080".to_string()),
            "KUBE_RELAY_KUBECONFIG" => Some("/tmp/kc".to_string()),
            _ => None,
        });
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.cluster.kubeconfig.as_deref(), Some("/tmp/kc"));
        assert!(config.cluster.context.is_none());
    }
}
