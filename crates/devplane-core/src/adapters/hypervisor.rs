//! C4 — Hypervisor Adapter.
//!
//! Uniform interface over the local LXC-style container engine: CRUD,
//! exec, file transfer, and network readiness polling. The one
//! concrete implementation here (`LxcHypervisorAdapter`) shells out to the
//! `lxc` CLI; swapping in a unix-socket or remote-RPC-backed engine only
//! means a new `impl HypervisorAdapter`.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::time::Instant;

use devplane_types::models::{DevboxResources, DevboxState};
use devplane_types::{AppError, AppResult};

use super::{classify_process_failure, with_retry};

/// Config passed to `createContainer`.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub resources: DevboxResources,
}

/// Result of `exec`.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Best-effort descriptor of a container as reported by the hypervisor
/// right now; the daemon's in-memory cache of this is best-effort, the
/// hypervisor itself is authoritative.
#[derive(Debug, Clone)]
pub struct ContainerDescriptor {
    pub name: String,
    pub state: DevboxState,
    pub ip_address: Option<String>,
}

/// A bidirectional byte stream for an interactive shell session.
pub trait ShellStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ShellStream for T {}

/// Point-in-time resource usage snapshot for `GetMetrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerMetrics {
    pub cpu_usage_pct: f64,
    pub memory_used_bytes: u64,
    pub memory_limit_bytes: u64,
    pub disk_used_bytes: u64,
}

#[async_trait]
pub trait HypervisorAdapter: Send + Sync {
    async fn create_container(&self, config: &ContainerConfig) -> AppResult<()>;
    async fn start_container(&self, name: &str) -> AppResult<()>;
    async fn stop_container(&self, name: &str, force: bool) -> AppResult<()>;
    async fn delete_container(&self, name: &str) -> AppResult<()>;
    async fn get_container(&self, name: &str) -> AppResult<Option<ContainerDescriptor>>;
    async fn wait_for_network(&self, name: &str, timeout: Duration) -> AppResult<String>;
    async fn exec(&self, name: &str, argv: &[String]) -> AppResult<ExecResult>;
    async fn write_file(&self, name: &str, path: &str, bytes: &[u8], mode: u32) -> AppResult<()>;
    async fn read_file(&self, name: &str, path: &str) -> AppResult<Vec<u8>>;
    async fn attach_shell(&self, name: &str) -> AppResult<Box<dyn ShellStream>>;

    /// Installs `resources` onto an already-created container (resize).
    /// Separate from `create_container` so the lifecycle engine can call it
    /// for both the initial apply and later resizes.
    async fn apply_resources(&self, name: &str, resources: &DevboxResources) -> AppResult<()>;

    /// Sets a single `user.<key>` config entry on the container, the
    /// hypervisor-native home for the free-form label map `GetContainer`
    /// reports back (labels are not tracked anywhere else — the hypervisor
    /// is authoritative, same as for container existence itself).
    async fn set_label(&self, name: &str, key: &str, value: &str) -> AppResult<()>;
    async fn remove_label(&self, name: &str, key: &str) -> AppResult<()>;

    /// Snapshot of CPU/memory/disk usage for `GetMetrics`.
    async fn metrics(&self, name: &str) -> AppResult<ContainerMetrics>;

    /// Runs a user-creation command (typically `useradd`) inside the
    /// container, honoring the special contract on `/etc/passwd` lock
    /// contention: if the guest agent inside the container holds an
    /// exclusive lock on `/etc/passwd` (e.g. mid `useradd` from a previous
    /// partial attempt), stop the agent, clear the stale lock, retry the
    /// user-creation command, then restart the agent. Failure to recover is
    /// a transient, retryable error. Every user-creation call site (DevBox
    /// creation's default account, collaborator accounts) must go through
    /// this method rather than calling `exec` directly.
    async fn create_user(&self, name: &str, argv: &[String]) -> AppResult<ExecResult> {
        match self.exec(name, argv).await {
            Ok(result) => Ok(result),
            Err(err) if passwd_lock_conflict(&err) => {
                self.exec(name, &["systemctl".into(), "stop".into(), "guest-agent".into()])
                    .await
                    .map_err(|_| AppError::unavailable("failed to stop guest-agent for passwd lock recovery"))?;
                self.exec(
                    name,
                    &["rm".into(), "-f".into(), "/etc/passwd.lock".into(), "/etc/.pwd.lock".into()],
                )
                .await
                .map_err(|_| AppError::unavailable("failed to clear stale passwd lock"))?;
                let retried = self.exec(name, argv).await;
                let _ = self
                    .exec(name, &["systemctl".into(), "start".into(), "guest-agent".into()])
                    .await;
                retried.map_err(|_| AppError::unavailable("user creation failed after passwd lock recovery"))
            }
            Err(err) => Err(err),
        }
    }
}

/// Shells out to the `lxc` binary found on `$PATH`.
pub struct LxcHypervisorAdapter {
    binary: String,
}

impl Default for LxcHypervisorAdapter {
    fn default() -> Self {
        Self::new("lxc")
    }
}

impl LxcHypervisorAdapter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, args: &[&str]) -> AppResult<ExecResult> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AppError::unavailable(format!("spawning `{}`: {e}", self.binary)))?;
        let result = ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        };
        if !result.success() {
            return Err(classify_process_failure(&String::from_utf8_lossy(&result.stderr)));
        }
        Ok(result)
    }
}

fn passwd_lock_conflict(err: &AppError) -> bool {
    err.message.to_lowercase().contains("/etc/passwd")
        && (err.message.to_lowercase().contains("lock") || err.message.to_lowercase().contains("resource busy"))
}

#[async_trait]
impl HypervisorAdapter for LxcHypervisorAdapter {
    async fn create_container(&self, config: &ContainerConfig) -> AppResult<()> {
        with_retry("create_container", || async {
            self.run(&[
                "launch",
                &config.image,
                &config.name,
                "-c",
                &format!("limits.cpu={}", config.resources.cpu),
                "-c",
                &format!("limits.memory={}", config.resources.memory),
            ])
            .await
            .map(|_| ())
        })
        .await
    }

    async fn start_container(&self, name: &str) -> AppResult<()> {
        with_retry("start_container", || async { self.run(&["start", name]).await.map(|_| ()) }).await
    }

    async fn stop_container(&self, name: &str, force: bool) -> AppResult<()> {
        let args: Vec<&str> = if force { vec!["stop", name, "--force"] } else { vec!["stop", name] };
        with_retry("stop_container", || async { self.run(&args).await.map(|_| ()) }).await
    }

    async fn delete_container(&self, name: &str) -> AppResult<()> {
        with_retry("delete_container", || async { self.run(&["delete", name, "--force"]).await.map(|_| ()) }).await
    }

    async fn get_container(&self, name: &str) -> AppResult<Option<ContainerDescriptor>> {
        let result = self.run(&["list", name, "--format", "json"]).await;
        let result = match result {
            Ok(r) => r,
            Err(err) if err.kind == devplane_types::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let parsed: Vec<serde_json::Value> = serde_json::from_slice(&result.stdout)
            .map_err(|e| AppError::internal(format!("parsing lxc list output: {e}")))?;
        let Some(entry) = parsed.into_iter().next() else { return Ok(None) };
        let state_str = entry.get("status").and_then(|v| v.as_str()).unwrap_or("UNKNOWN");
        let state = match state_str.to_uppercase().as_str() {
            "RUNNING" => DevboxState::Running,
            "STOPPED" => DevboxState::Stopped,
            "FROZEN" => DevboxState::Frozen,
            _ => DevboxState::Unknown,
        };
        let ip_address = entry
            .get("state")
            .and_then(|s| s.get("network"))
            .and_then(|n| n.get("eth0"))
            .and_then(|e| e.get("addresses"))
            .and_then(|a| a.as_array())
            .and_then(|addrs| addrs.iter().find(|a| a.get("family").and_then(|f| f.as_str()) == Some("inet")))
            .and_then(|a| a.get("address"))
            .and_then(|a| a.as_str())
            .map(str::to_owned);
        Ok(Some(ContainerDescriptor { name: name.to_owned(), state, ip_address }))
    }

    async fn wait_for_network(&self, name: &str, timeout: Duration) -> AppResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(descriptor) = self.get_container(name).await? {
                if let Some(ip) = descriptor.ip_address {
                    return Ok(ip);
                }
            }
            if Instant::now() >= deadline {
                return Err(AppError::deadline_exceeded(format!(
                    "timed out waiting for network on {name}"
                )));
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn exec(&self, name: &str, argv: &[String]) -> AppResult<ExecResult> {
        let mut args = vec!["exec".to_string(), name.to_string(), "--".to_string()];
        args.extend(argv.iter().cloned());
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        with_retry("exec", || async { self.run(&args_ref).await }).await
    }

    async fn write_file(&self, name: &str, path: &str, bytes: &[u8], mode: u32) -> AppResult<()> {
        let mut tmp = tempfile::NamedTempFile::new()
            .map_err(|e| AppError::internal(format!("creating temp file: {e}")))?;
        use std::io::Write;
        tmp.write_all(bytes).map_err(|e| AppError::internal(format!("writing temp file: {e}")))?;
        let tmp_path = tmp.path().to_string_lossy().to_string();
        let dest = format!("{name}{path}");
        with_retry("write_file", || async {
            self.run(&["file", "push", &tmp_path, &dest, "--mode", &format!("{mode:o}")]).await.map(|_| ())
        })
        .await
    }

    async fn read_file(&self, name: &str, path: &str) -> AppResult<Vec<u8>> {
        let src = format!("{name}{path}");
        let result = with_retry("read_file", || async { self.run(&["file", "pull", &src, "-"]).await }).await?;
        Ok(result.stdout)
    }

    async fn attach_shell(&self, name: &str) -> AppResult<Box<dyn ShellStream>> {
        let mut child = Command::new(&self.binary)
            .args(["exec", name, "--", "/bin/bash", "-l"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::unavailable(format!("attaching shell: {e}")))?;
        let stdin = child.stdin.take().ok_or_else(|| AppError::internal("missing child stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| AppError::internal("missing child stdout"))?;
        // Keep the child alive for the lifetime of the stream by leaking its
        // handle into a background reaper; the RPC layer closes the stream
        // (and thus stdin) when the session ends, which is what signals the
        // shell to exit.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(Box::new(tokio::io::join(stdout, stdin)))
    }

    async fn apply_resources(&self, name: &str, resources: &DevboxResources) -> AppResult<()> {
        with_retry("apply_resources", || async {
            self.run(&["config", "set", name, "limits.cpu", &resources.cpu]).await?;
            self.run(&["config", "set", name, "limits.memory", &resources.memory]).await?;
            self.run(&["config", "set", name, "limits.disk", &resources.disk]).await.map(|_| ())
        })
        .await
    }

    async fn set_label(&self, name: &str, key: &str, value: &str) -> AppResult<()> {
        let config_key = format!("user.label.{key}");
        with_retry("set_label", || async { self.run(&["config", "set", name, &config_key, value]).await.map(|_| ()) })
            .await
    }

    async fn remove_label(&self, name: &str, key: &str) -> AppResult<()> {
        let config_key = format!("user.label.{key}");
        with_retry("remove_label", || async {
            self.run(&["config", "unset", name, &config_key]).await.map(|_| ())
        })
        .await
    }

    async fn metrics(&self, name: &str) -> AppResult<ContainerMetrics> {
        let result = with_retry("metrics", || async { self.run(&["query", &format!("/1.0/instances/{name}/state")]).await }).await?;
        let parsed: serde_json::Value = serde_json::from_slice(&result.stdout)
            .map_err(|e| AppError::internal(format!("parsing lxc state query output: {e}")))?;
        let metadata = parsed.get("metadata").unwrap_or(&parsed);
        let cpu_usage_ns = metadata.get("cpu").and_then(|c| c.get("usage")).and_then(|v| v.as_f64()).unwrap_or(0.0);
        let memory_used_bytes =
            metadata.get("memory").and_then(|m| m.get("usage")).and_then(|v| v.as_u64()).unwrap_or(0);
        let memory_limit_bytes = metadata
            .get("memory")
            .and_then(|m| m.get("usage_peak"))
            .and_then(|v| v.as_u64())
            .unwrap_or(memory_used_bytes);
        let disk_used_bytes = metadata
            .get("disk")
            .and_then(|d| d.get("root"))
            .and_then(|r| r.get("usage"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        // `cpu.usage` is cumulative nanoseconds of CPU time consumed since
        // container start, not an instantaneous percentage; without a prior
        // sample to diff against this reports the normalized cumulative
        // share instead of true current utilization.
        let cpu_usage_pct = (cpu_usage_ns / 1_000_000_000.0).min(100.0);
        Ok(ContainerMetrics { cpu_usage_pct, memory_used_bytes, memory_limit_bytes, disk_used_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwd_lock_detection() {
        let err = AppError::unavailable("cannot lock /etc/passwd; resource busy");
        assert!(passwd_lock_conflict(&err));
        let other = AppError::unavailable("connection refused");
        assert!(!passwd_lock_conflict(&other));
    }
}
