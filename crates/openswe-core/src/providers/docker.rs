//! Docker provider driving the `docker` CLI through the command executor.

use crate::config::{NetworkMode, ResourceLimits};
use crate::error::{CoreError, Result};
use crate::ports::PortMapping;
use crate::provider::{ContainerHandle, ContainerProvider, ContainerSpec, ProviderCapabilities};
use async_trait::async_trait;
use openswe_exec::{CommandExecutor, ExecOptions, ExecResult};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

/// Timeout for docker management commands (run/stop/rm/port).
const DOCKER_CLI_TIMEOUT: Duration = Duration::from_secs(120);

/// Environment variable tagging every process tree started by `exec`.
///
/// Killing the host `docker` client does not stop the command inside the
/// container, so on timeout the tree is found by this tag and killed there.
const EXEC_TAG_VAR: &str = "OPENSWE_EXEC_TAG";

/// Creates sandboxes as long-running docker containers.
pub struct DockerProvider {
    executor: Arc<CommandExecutor>,
    docker_bin: String,
}

impl DockerProvider {
    /// Create a provider invoking `docker` from `PATH`.
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self::with_binary(executor, "docker")
    }

    /// Create a provider invoking a specific docker-compatible binary.
    pub fn with_binary(executor: Arc<CommandExecutor>, docker_bin: impl Into<String>) -> Self {
        Self {
            executor,
            docker_bin: docker_bin.into(),
        }
    }

    async fn docker(&self, args: &[String]) -> Result<ExecResult> {
        let line = command_line(&self.docker_bin, args);
        tracing::debug!(command = %line, "Running docker CLI");
        Ok(self
            .executor
            .execute(&line, ExecOptions::new().timeout(DOCKER_CLI_TIMEOUT))
            .await?)
    }
}

#[async_trait]
impl ContainerProvider for DockerProvider {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            isolated: true,
            publishes_ports: true,
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<Arc<dyn ContainerHandle>> {
        let applied = applied_resources(&spec.resources);
        let args = run_args(spec, &applied);
        let result = self.docker(&args).await?;
        if !result.success() {
            tracing::error!(
                container = %spec.name,
                exit_code = result.exit_code,
                stderr = %result.stderr.trim(),
                "docker run failed"
            );
            return Err(CoreError::SandboxCreation(format!(
                "docker run exited with {}: {}",
                result.exit_code,
                result.stderr.trim()
            )));
        }
        tracing::info!(
            container = %spec.name,
            image = %spec.image,
            container_id = %result.stdout.trim(),
            "Container started"
        );

        Ok(Arc::new(DockerHandle {
            name: spec.name.clone(),
            docker_bin: self.docker_bin.clone(),
            executor: Arc::clone(&self.executor),
            applied,
        }))
    }

    async fn stop(&self, container_name: &str) -> Result<()> {
        let result = self
            .docker(&["stop".into(), container_name.into()])
            .await?;
        if !result.success() {
            return Err(CoreError::Provider(format!(
                "docker stop {container_name}: {}",
                result.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn delete(&self, container_name: &str) -> Result<()> {
        let result = self
            .docker(&["rm".into(), "-f".into(), container_name.into()])
            .await?;
        if !result.success() {
            return Err(CoreError::Provider(format!(
                "docker rm {container_name}: {}",
                result.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn port_mappings(&self, container_name: &str) -> Result<Vec<PortMapping>> {
        let result = self
            .docker(&["port".into(), container_name.into()])
            .await?;
        if !result.success() {
            return Err(CoreError::Provider(format!(
                "docker port {container_name}: {}",
                result.stderr.trim()
            )));
        }
        Ok(parse_port_output(&result.stdout))
    }
}

struct DockerHandle {
    name: String,
    docker_bin: String,
    executor: Arc<CommandExecutor>,
    applied: ResourceLimits,
}

#[async_trait]
impl ContainerHandle for DockerHandle {
    fn container_name(&self) -> &str {
        &self.name
    }

    fn applied_resources(&self) -> Option<ResourceLimits> {
        Some(self.applied.clone())
    }

    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult> {
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let line = command_line(&self.docker_bin, &exec_args(&self.name, command, &opts, &tag));
        let host_opts = ExecOptions {
            timeout: opts.timeout,
            ..ExecOptions::default()
        };
        let result = self.executor.execute(&line, host_opts).await?;
        if result.timed_out() {
            self.kill_tagged(&tag).await;
        }
        Ok(result)
    }
}

impl DockerHandle {
    /// Kill every process in the container carrying `tag`.
    async fn kill_tagged(&self, tag: &str) {
        let args = [
            "exec".to_string(),
            self.name.clone(),
            "sh".into(),
            "-c".into(),
            kill_tagged_script(tag),
        ];
        let line = command_line(&self.docker_bin, &args);
        let opts = ExecOptions::new().timeout(DOCKER_CLI_TIMEOUT);
        match self.executor.execute(&line, opts).await {
            Ok(result) if result.success() => {
                tracing::debug!(container = %self.name, tag, "Killed timed-out command in container");
            }
            Ok(result) => {
                tracing::warn!(
                    container = %self.name,
                    exit_code = result.exit_code,
                    stderr = %result.stderr.trim(),
                    "Failed to kill timed-out command in container"
                );
            }
            Err(e) => {
                tracing::warn!(container = %self.name, error = %e, "Failed to kill timed-out command in container");
            }
        }
    }
}

/// Arguments for `docker exec`, tagging the command's environment.
fn exec_args(name: &str, command: &str, opts: &ExecOptions, tag: &str) -> Vec<String> {
    let mut args: Vec<String> = vec!["exec".into()];
    if let Some(cwd) = &opts.cwd {
        args.push("-w".into());
        args.push(cwd.display().to_string());
    }
    for (key, value) in opts.env.iter().filter(|(k, v)| !k.is_empty() && !v.is_empty()) {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }
    args.push("-e".into());
    args.push(format!("{EXEC_TAG_VAR}={tag}"));
    args.extend([name.to_string(), "sh".into(), "-c".into(), command.into()]);
    args
}

/// Shell script that SIGKILLs every process whose environment holds `tag`.
fn kill_tagged_script(tag: &str) -> String {
    format!(
        "for d in /proc/[0-9]*; do \
tr '\\0' '\\n' < \"$d/environ\" 2>/dev/null | grep -qx '{EXEC_TAG_VAR}={tag}' \
&& kill -KILL \"${{d#/proc/}}\" 2>/dev/null; \
done; true"
    )
}

/// Limits docker will actually enforce: CPUs are capped at what the host has.
fn applied_resources(requested: &ResourceLimits) -> ResourceLimits {
    let available = std::thread::available_parallelism()
        .map(|n| n.get() as f64)
        .unwrap_or(1.0);
    ResourceLimits {
        cpus: requested.cpus.min(available),
        ..requested.clone()
    }
}

/// Arguments for `docker run`.
fn run_args(spec: &ContainerSpec, resources: &ResourceLimits) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--memory".to_string(),
        resources.memory.clone(),
        "--cpus".to_string(),
        resources.cpus.to_string(),
        "--pids-limit".to_string(),
        resources.pids_limit.to_string(),
        "--network".to_string(),
        spec.network.as_str().to_string(),
    ];

    if spec.network == NetworkMode::Bridge {
        for mapping in &spec.port_mappings {
            args.push("-p".to_string());
            args.push(format!("{}:{}", mapping.host_port, mapping.container_port));
        }
    }

    if let Some(mount) = &spec.mount {
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}",
            mount.host_path.display(),
            mount.container_path.display()
        ));
    }

    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }

    args.push("-w".to_string());
    args.push(spec.workdir.display().to_string());
    args.push(spec.image.clone());
    args.extend(["sleep".to_string(), "infinity".to_string()]);
    args
}

/// Parse `docker port` output such as `3000/tcp -> 0.0.0.0:32768`.
fn parse_port_output(output: &str) -> Vec<PortMapping> {
    let mut mappings: Vec<PortMapping> = Vec::new();
    for line in output.lines() {
        let Some((container, host)) = line.split_once("->") else {
            continue;
        };
        let container_port = container
            .trim()
            .split('/')
            .next()
            .and_then(|p| p.parse::<u16>().ok());
        let host_port = host
            .trim()
            .rsplit(':')
            .next()
            .and_then(|p| p.parse::<u16>().ok());
        if let (Some(container_port), Some(host_port)) = (container_port, host_port) {
            // IPv4 and IPv6 bindings are reported separately for the same port.
            if !mappings.iter().any(|m| m.container_port == container_port) {
                mappings.push(PortMapping {
                    container_port,
                    host_port,
                });
            }
        }
    }
    mappings
}

fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(|part| shell_escape::unix::escape(Cow::Borrowed(part)).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Mount;
    use std::path::PathBuf;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "openswe-app-deadbeef".into(),
            image: "node:20-bookworm".into(),
            mount: Some(Mount {
                host_path: PathBuf::from("/srv/work/app"),
                container_path: PathBuf::from("/workspace/app"),
            }),
            workdir: PathBuf::from("/workspace/app"),
            resources: ResourceLimits {
                memory: "2g".into(),
                cpus: 1.0,
                pids_limit: 256,
            },
            network: NetworkMode::Bridge,
            port_mappings: vec![PortMapping {
                container_port: 3000,
                host_port: 3001,
            }],
            env: Default::default(),
        }
    }

    #[test]
    fn test_run_args_include_limits_ports_and_mount() {
        let spec = spec();
        let args = run_args(&spec, &spec.resources);
        let joined = args.join(" ");
        assert!(joined.starts_with("run -d --name openswe-app-deadbeef"));
        assert!(joined.contains("--memory 2g"));
        assert!(joined.contains("--cpus 1"));
        assert!(joined.contains("--pids-limit 256"));
        assert!(joined.contains("-p 3001:3000"));
        assert!(joined.contains("-v /srv/work/app:/workspace/app"));
        assert!(joined.ends_with("-w /workspace/app node:20-bookworm sleep infinity"));
    }

    #[test]
    fn test_no_published_ports_without_bridge_network() {
        let mut spec = spec();
        spec.network = NetworkMode::None;
        let args = run_args(&spec, &spec.resources);
        assert!(!args.iter().any(|a| a == "-p"));
        assert!(args.join(" ").contains("--network none"));
    }

    #[test]
    fn test_applied_resources_cap_cpus() {
        let applied = applied_resources(&ResourceLimits {
            cpus: 100_000.0,
            ..Default::default()
        });
        assert!(applied.cpus < 100_000.0);
        assert_eq!(applied.memory, "4g");
    }

    #[test]
    fn test_parse_port_output() {
        let output = "3000/tcp -> 0.0.0.0:32768\n3000/tcp -> [::]:32768\n5173/tcp -> 0.0.0.0:5173\ngarbage\n";
        let mappings = parse_port_output(output);
        assert_eq!(
            mappings,
            vec![
                PortMapping {
                    container_port: 3000,
                    host_port: 32768
                },
                PortMapping {
                    container_port: 5173,
                    host_port: 5173
                },
            ]
        );
    }

    #[test]
    fn test_command_line_escapes_arguments() {
        let line = command_line(
            "docker",
            &["exec".into(), "box".into(), "sh".into(), "-c".into(), "echo 'hi' && ls".into()],
        );
        assert_eq!(line, r#"docker exec box sh -c 'echo '\''hi'\'' && ls'"#);
    }

    #[test]
    fn test_exec_args_tag_the_command() {
        let opts = ExecOptions::new().cwd("/workspace/app").env("CI", "1").env("EMPTY", "");
        let args = exec_args("box", "npm test", &opts, "abc123");
        assert_eq!(
            args.join(" "),
            "exec -w /workspace/app -e CI=1 -e OPENSWE_EXEC_TAG=abc123 box sh -c npm test"
        );
    }

    #[test]
    fn test_kill_tagged_script_matches_exact_tag() {
        let script = kill_tagged_script("abc123");
        assert!(script.contains("grep -qx 'OPENSWE_EXEC_TAG=abc123'"));
        assert!(script.contains("kill -KILL \"${d#/proc/}\""));
        assert!(script.contains("tr '\\0' '\\n'"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_kill_tagged_script_kills_tagged_command() {
        let executor = CommandExecutor::new();
        let dir = tempfile::tempdir().unwrap();
        let done = dir.path().join("done");
        let tagged_cmd = format!("sleep 3 && touch {}", done.display());
        let tagged = executor.execute(
            &tagged_cmd,
            ExecOptions::new().env(EXEC_TAG_VAR, "kill-me"),
        );
        let killer = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            executor
                .execute(&kill_tagged_script("kill-me"), ExecOptions::new())
                .await
                .unwrap()
        };
        let (tagged, killer) = tokio::join!(tagged, killer);
        assert!(killer.success());
        assert_ne!(tagged.unwrap().exit_code, 0);
        assert!(!done.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_failure_surfaces_stderr() {
        let provider =
            DockerProvider::with_binary(Arc::new(CommandExecutor::new()), "/nonexistent/docker");
        let result = provider.create(&spec()).await;
        assert!(matches!(result, Err(CoreError::SandboxCreation(_))));
    }
}
