//! Sandbox configuration types.
//!
//! [`SandboxDefaults`] is loaded once from the environment and applies to
//! every sandbox; [`SandboxOptions`] carries per-sandbox choices.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Container ports a dev server commonly listens on.
pub const DEFAULT_EXPOSED_PORTS: &[u16] = &[3000, 3001, 4200, 5000, 5173, 8000, 8080];

/// CPU, memory and process-count limits for a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    /// Memory limit in docker notation (e.g. `4g`, `512m`).
    pub memory: String,
    /// CPU count (fractional allowed).
    pub cpus: f64,
    /// Maximum number of processes.
    pub pids_limit: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: "4g".into(),
            cpus: 2.0,
            pids_limit: 512,
        }
    }
}

impl ResourceLimits {
    /// Check that every limit is positive.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.memory.trim().is_empty() {
            return Err(CoreError::InvalidConfig("memory limit must not be empty".into()));
        }
        if !(self.cpus > 0.0) {
            return Err(CoreError::InvalidConfig("cpus must be > 0".into()));
        }
        if self.pids_limit == 0 {
            return Err(CoreError::InvalidConfig("pids_limit must be > 0".into()));
        }
        Ok(())
    }
}

/// Sandbox network mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Default bridged networking (ports published to the host)
    #[default]
    Bridge,
    /// Share the host network namespace
    Host,
    /// No network access
    None,
}

impl NetworkMode {
    /// Name as understood by `docker run --network`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bridge => "bridge",
            Self::Host => "host",
            Self::None => "none",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bridge" | "default" => Ok(Self::Bridge),
            "host" => Ok(Self::Host),
            "none" | "off" | "disabled" => Ok(Self::None),
            other => Err(CoreError::InvalidConfig(format!("unknown network mode: {other}"))),
        }
    }
}

/// Author and committer identity used for auto-commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    /// `user.name` / `GIT_AUTHOR_NAME`
    pub author_name: String,
    /// `user.email` / `GIT_AUTHOR_EMAIL`
    pub author_email: String,
    /// `GIT_COMMITTER_NAME`
    pub committer_name: String,
    /// `GIT_COMMITTER_EMAIL`
    pub committer_email: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            author_name: "OpenSWE".into(),
            author_email: "openswe@localhost".into(),
            committer_name: "OpenSWE".into(),
            committer_email: "openswe@localhost".into(),
        }
    }
}

impl GitIdentity {
    /// Environment entries that make `git commit` use this identity.
    pub fn env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("GIT_AUTHOR_NAME".into(), self.author_name.clone()),
            ("GIT_AUTHOR_EMAIL".into(), self.author_email.clone()),
            ("GIT_COMMITTER_NAME".into(), self.committer_name.clone()),
            ("GIT_COMMITTER_EMAIL".into(), self.committer_email.clone()),
        ])
    }
}

/// Process-wide defaults consumed by the sandbox manager.
#[derive(Debug, Clone)]
pub struct SandboxDefaults {
    /// Resource limits requested for new sandboxes.
    pub resources: ResourceLimits,
    /// Network mode for new sandboxes.
    pub network: NetworkMode,
    /// Per-command timeout when the caller does not give one.
    pub command_timeout: Duration,
    /// Container ports to publish.
    pub exposed_ports: Vec<u16>,
    /// Identity for auto-commits and in-sandbox git.
    pub git: GitIdentity,
    /// Tag auto-commit messages with `[skip ci]`.
    pub skip_ci: bool,
}

impl Default for SandboxDefaults {
    fn default() -> Self {
        Self {
            resources: ResourceLimits::default(),
            network: NetworkMode::Bridge,
            command_timeout: Duration::from_secs(300),
            exposed_ports: DEFAULT_EXPOSED_PORTS.to_vec(),
            git: GitIdentity::default(),
            skip_ci: true,
        }
    }
}

impl SandboxDefaults {
    /// Load defaults from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `OPENSWE_SANDBOX_MEMORY` | `4g` |
    /// | `OPENSWE_SANDBOX_CPUS` | `2` |
    /// | `OPENSWE_SANDBOX_PIDS_LIMIT` | `512` |
    /// | `OPENSWE_SANDBOX_NETWORK` | `bridge` (bridge, host, none) |
    /// | `OPENSWE_SANDBOX_NETWORK_ENABLED` | `true` |
    /// | `OPENSWE_COMMAND_TIMEOUT` | `300` (seconds) |
    /// | `OPENSWE_EXPOSED_PORTS` | `3000,3001,4200,5000,5173,8000,8080` |
    /// | `OPENSWE_GIT_AUTHOR_NAME` | `OpenSWE` |
    /// | `OPENSWE_GIT_AUTHOR_EMAIL` | `openswe@localhost` |
    /// | `OPENSWE_GIT_COMMITTER_NAME` | author name |
    /// | `OPENSWE_GIT_COMMITTER_EMAIL` | author email |
    /// | `OPENSWE_SKIP_CI` | `true` |
    pub fn from_env() -> Self {
        let default = Self::default();

        let network_enabled = env_flag("OPENSWE_SANDBOX_NETWORK_ENABLED").unwrap_or(true);
        let network = if network_enabled {
            env_parse("OPENSWE_SANDBOX_NETWORK").unwrap_or(default.network)
        } else {
            NetworkMode::None
        };

        let exposed_ports = std::env::var("OPENSWE_EXPOSED_PORTS")
            .ok()
            .map(|v| parse_port_list(&v))
            .filter(|ports| !ports.is_empty())
            .unwrap_or(default.exposed_ports);

        let author_name =
            std::env::var("OPENSWE_GIT_AUTHOR_NAME").unwrap_or(default.git.author_name);
        let author_email =
            std::env::var("OPENSWE_GIT_AUTHOR_EMAIL").unwrap_or(default.git.author_email);

        Self {
            resources: ResourceLimits {
                memory: std::env::var("OPENSWE_SANDBOX_MEMORY")
                    .unwrap_or(default.resources.memory),
                cpus: env_parse("OPENSWE_SANDBOX_CPUS")
                    .filter(|c: &f64| *c > 0.0)
                    .unwrap_or(default.resources.cpus),
                pids_limit: env_parse("OPENSWE_SANDBOX_PIDS_LIMIT")
                    .filter(|p: &u32| *p > 0)
                    .unwrap_or(default.resources.pids_limit),
            },
            network,
            command_timeout: env_parse("OPENSWE_COMMAND_TIMEOUT")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(default.command_timeout),
            exposed_ports,
            git: GitIdentity {
                committer_name: std::env::var("OPENSWE_GIT_COMMITTER_NAME")
                    .unwrap_or_else(|_| author_name.clone()),
                committer_email: std::env::var("OPENSWE_GIT_COMMITTER_EMAIL")
                    .unwrap_or_else(|_| author_email.clone()),
                author_name,
                author_email,
            },
            skip_ci: env_flag("OPENSWE_SKIP_CI").unwrap_or(default.skip_ci),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off"))
}

/// Parse `"3000, 5173,abc,0"` into `[3000, 5173]`.
pub(crate) fn parse_port_list(value: &str) -> Vec<u16> {
    value
        .split(',')
        .filter_map(|p| p.trim().parse::<u16>().ok())
        .filter(|p| *p != 0)
        .collect()
}

/// Options for creating a single sandbox.
#[derive(Debug, Clone, Default)]
pub struct SandboxOptions {
    /// Host checkout mounted into the sandbox.
    pub host_repo_path: Option<PathBuf>,
    /// Host directory containing checkouts (combined with `repo_name`).
    pub workspace_path: Option<PathBuf>,
    /// Repository name, used for naming and default paths.
    pub repo_name: Option<String>,
    /// Where the repository appears inside the sandbox.
    pub container_repo_path: Option<PathBuf>,
    /// Commit pending changes after successful commands and at teardown.
    pub commit_on_change: bool,
    /// Default per-command timeout for this sandbox.
    pub command_timeout: Option<Duration>,
    /// Resource limits overriding the process defaults.
    pub resources: Option<ResourceLimits>,
}

impl SandboxOptions {
    /// Create a new options builder.
    pub fn builder() -> SandboxOptionsBuilder {
        SandboxOptionsBuilder::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(name) = &self.repo_name {
            if name.trim().is_empty() {
                return Err(CoreError::InvalidConfig("repo_name must not be empty".into()));
            }
        }
        if self.command_timeout == Some(Duration::ZERO) {
            return Err(CoreError::InvalidConfig("command_timeout must be > 0".into()));
        }
        if let Some(path) = &self.container_repo_path {
            if !path.is_absolute() {
                return Err(CoreError::InvalidConfig(format!(
                    "container_repo_path must be absolute: {}",
                    path.display()
                )));
            }
        }
        if let Some(resources) = &self.resources {
            resources.validate()?;
        }
        Ok(())
    }

    /// Host checkout path: explicit, else `workspace_path/repo_name`.
    pub fn resolved_host_repo_path(&self) -> Option<PathBuf> {
        self.host_repo_path.clone().or_else(|| {
            match (&self.workspace_path, &self.repo_name) {
                (Some(ws), Some(name)) => Some(ws.join(name)),
                _ => None,
            }
        })
    }

    /// In-sandbox path: explicit, else `/workspace/<repo_name>`, else `/workspace`.
    pub fn resolved_container_repo_path(&self) -> PathBuf {
        if let Some(path) = &self.container_repo_path {
            return path.clone();
        }
        match &self.repo_name {
            Some(name) => PathBuf::from("/workspace").join(name),
            None => PathBuf::from("/workspace"),
        }
    }
}

/// Builder for SandboxOptions.
#[derive(Debug, Default)]
pub struct SandboxOptionsBuilder {
    options: SandboxOptions,
}

impl SandboxOptionsBuilder {
    /// Mount an existing host checkout.
    pub fn host_repo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.host_repo_path = Some(path.into());
        self
    }

    /// Set the host workspace directory.
    pub fn workspace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.workspace_path = Some(path.into());
        self
    }

    /// Set the repository name.
    pub fn repo_name(mut self, name: impl Into<String>) -> Self {
        self.options.repo_name = Some(name.into());
        self
    }

    /// Set the in-sandbox repository path.
    pub fn container_repo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.container_repo_path = Some(path.into());
        self
    }

    /// Enable or disable auto-commit.
    pub fn commit_on_change(mut self, enabled: bool) -> Self {
        self.options.commit_on_change = enabled;
        self
    }

    /// Set the default per-command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_timeout = Some(timeout);
        self
    }

    /// Override resource limits.
    pub fn resources(mut self, resources: ResourceLimits) -> Self {
        self.options.resources = Some(resources);
        self
    }

    /// Build the options, validating all fields.
    pub fn build(self) -> Result<SandboxOptions, CoreError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_defaults() {
        let defaults = SandboxDefaults::default();
        assert_eq!(defaults.resources.memory, "4g");
        assert_eq!(defaults.resources.pids_limit, 512);
        assert_eq!(defaults.network, NetworkMode::Bridge);
        assert_eq!(defaults.command_timeout, Duration::from_secs(300));
        assert!(defaults.exposed_ports.contains(&3000));
        assert!(defaults.skip_ci);
    }

    #[test]
    fn test_from_env_uses_defaults() {
        for key in [
            "OPENSWE_SANDBOX_MEMORY",
            "OPENSWE_SANDBOX_CPUS",
            "OPENSWE_SANDBOX_NETWORK",
            "OPENSWE_SANDBOX_NETWORK_ENABLED",
            "OPENSWE_COMMAND_TIMEOUT",
            "OPENSWE_EXPOSED_PORTS",
            "OPENSWE_GIT_AUTHOR_NAME",
            "OPENSWE_GIT_COMMITTER_NAME",
        ] {
            std::env::remove_var(key);
        }

        let config = SandboxDefaults::from_env();
        let default = SandboxDefaults::default();
        assert_eq!(config.resources, default.resources);
        assert_eq!(config.exposed_ports, default.exposed_ports);
        assert_eq!(config.git.committer_name, config.git.author_name);
    }

    #[test]
    fn test_network_mode_parsing() {
        assert_eq!("bridge".parse::<NetworkMode>().unwrap(), NetworkMode::Bridge);
        assert_eq!("HOST".parse::<NetworkMode>().unwrap(), NetworkMode::Host);
        assert_eq!("none".parse::<NetworkMode>().unwrap(), NetworkMode::None);
        assert!("wifi".parse::<NetworkMode>().is_err());
    }

    #[test]
    fn test_parse_port_list() {
        assert_eq!(parse_port_list("3000, 5173,abc,0,70000"), vec![3000, 5173]);
        assert!(parse_port_list("").is_empty());
    }

    #[test]
    fn test_git_identity_env() {
        let env = GitIdentity::default().env();
        assert_eq!(env["GIT_AUTHOR_NAME"], "OpenSWE");
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn test_options_path_resolution() {
        let options = SandboxOptions::builder()
            .workspace_path("/srv/work")
            .repo_name("my-app")
            .build()
            .expect("should build successfully");
        assert_eq!(
            options.resolved_host_repo_path().as_deref(),
            Some(Path::new("/srv/work/my-app"))
        );
        assert_eq!(
            options.resolved_container_repo_path(),
            PathBuf::from("/workspace/my-app")
        );

        let bare = SandboxOptions::default();
        assert!(bare.resolved_host_repo_path().is_none());
        assert_eq!(bare.resolved_container_repo_path(), PathBuf::from("/workspace"));
    }

    #[test]
    fn test_builder_validation() {
        assert!(SandboxOptions::builder().repo_name(" ").build().is_err());
        assert!(SandboxOptions::builder()
            .command_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(SandboxOptions::builder()
            .container_repo_path("relative/path")
            .build()
            .is_err());
        assert!(SandboxOptions::builder()
            .resources(ResourceLimits {
                cpus: 0.0,
                ..Default::default()
            })
            .build()
            .is_err());
    }
}
