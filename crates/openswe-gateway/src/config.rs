//! Configuration for the gateway.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default request body limit (10 MB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Container provider backing new sandboxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    /// Docker containers (default)
    #[default]
    Docker,
    /// Host directories, no isolation
    Local,
}

impl ProviderKind {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "local" | "host" | "none" => Self::Local,
            _ => Self::Docker,
        }
    }
}

/// Configuration for the OpenSWE gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HTTP server bind address.
    pub http_addr: SocketAddr,

    /// Which provider creates sandboxes.
    pub provider: ProviderKind,

    /// Docker CLI binary.
    pub docker_bin: String,

    /// Image used when a create request names none.
    pub default_image: String,

    /// Host directory holding sandbox repositories.
    pub workspace_path: PathBuf,

    /// Dev-server readiness budget.
    pub dev_server_timeout: Duration,

    /// Maximum accepted request body.
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080),
            provider: ProviderKind::Docker,
            docker_bin: "docker".into(),
            default_image: "node:20-bookworm".into(),
            workspace_path: PathBuf::from("/tmp/openswe/workspace"),
            dev_server_timeout: Duration::from_secs(60),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `OPENSWE_HTTP_HOST` | `0.0.0.0` |
    /// | `OPENSWE_HTTP_PORT` | `8080` |
    /// | `OPENSWE_PROVIDER` | `docker` (docker, local) |
    /// | `OPENSWE_DOCKER_BIN` | `docker` |
    /// | `OPENSWE_IMAGE` | `node:20-bookworm` |
    /// | `OPENSWE_WORKSPACE` | `/tmp/openswe/workspace` |
    /// | `OPENSWE_DEV_SERVER_TIMEOUT` | `60` (seconds) |
    /// | `OPENSWE_MAX_BODY_BYTES` | `10485760` |
    pub fn from_env() -> Self {
        let default = Self::default();

        let http_host: IpAddr = std::env::var("OPENSWE_HTTP_HOST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default.http_addr.ip());

        let http_port: u16 = std::env::var("OPENSWE_HTTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default.http_addr.port());

        Self {
            http_addr: SocketAddr::new(http_host, http_port),
            provider: std::env::var("OPENSWE_PROVIDER")
                .map(|v| ProviderKind::parse(&v))
                .unwrap_or(default.provider),
            docker_bin: std::env::var("OPENSWE_DOCKER_BIN")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.docker_bin),
            default_image: std::env::var("OPENSWE_IMAGE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.default_image),
            workspace_path: std::env::var("OPENSWE_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or(default.workspace_path),
            dev_server_timeout: std::env::var("OPENSWE_DEV_SERVER_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default.dev_server_timeout),
            max_body_bytes: std::env::var("OPENSWE_MAX_BODY_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_body_bytes),
        }
    }

    /// Log warnings for missing paths without failing.
    ///
    /// The workspace is created on demand and docker may live on `PATH`.
    pub fn validate_warn(&self) {
        if !self.workspace_path.exists() {
            tracing::warn!("Workspace directory not found: {:?}", self.workspace_path);
        }

        if self.provider == ProviderKind::Docker && !binary_exists(Path::new(&self.docker_bin)) {
            tracing::warn!("Docker binary not found: {:?}", self.docker_bin);
        }
    }
}

fn binary_exists(bin: &Path) -> bool {
    if bin.components().count() > 1 {
        return bin.exists();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file()))
        .unwrap_or(false)
}
