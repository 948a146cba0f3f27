//! Kernel-level DNAT control for PROXY mode: inbound traffic on the
//! forwarded ports is redirected to the backend VM before it ever reaches
//! userspace. Shells out to `iptables` the same way `devplane-core`'s
//! `LxcHypervisorAdapter` shells out to its hypervisor binary — a thin,
//! fallible wrapper over `tokio::process::Command`, not a netlink binding.

use std::process::Stdio;

use tokio::process::Command;

const CHAIN: &str = "DEVPLANE_SENTINEL";

pub struct DnatController {
    table_initialized: bool,
}

impl DnatController {
    pub fn new() -> Self {
        Self { table_initialized: false }
    }

    /// Forwards each of `ports` on this host to `backend_ip:port`. Replaces
    /// any forwarding set up by a previous call — safe to call repeatedly
    /// on every PROXY-mode entry.
    pub async fn configure(&mut self, backend_ip: &str, ports: &[u16]) -> anyhow::Result<()> {
        self.ensure_chain().await?;
        self.flush_chain().await?;
        for &port in ports {
            run(&[
                "-t",
                "nat",
                "-A",
                CHAIN,
                "-p",
                "tcp",
                "--dport",
                &port.to_string(),
                "-j",
                "DNAT",
                "--to-destination",
                &format!("{backend_ip}:{port}"),
            ])
            .await?;
        }
        Ok(())
    }

    /// Clears all forwarding rules; inbound traffic reaches this host's own
    /// maintenance listener instead of the backend.
    pub async fn clear(&mut self) -> anyhow::Result<()> {
        if self.table_initialized {
            self.flush_chain().await?;
        }
        Ok(())
    }

    async fn ensure_chain(&mut self) -> anyhow::Result<()> {
        if self.table_initialized {
            return Ok(());
        }
        // -N fails if the chain already exists; either outcome leaves the
        // chain present, which is all this cares about.
        let _ = run(&["-t", "nat", "-N", CHAIN]).await;
        let _ = run(&["-t", "nat", "-C", "PREROUTING", "-j", CHAIN]).await.or(
            run(&["-t", "nat", "-A", "PREROUTING", "-j", CHAIN]).await,
        );
        self.table_initialized = true;
        Ok(())
    }

    async fn flush_chain(&self) -> anyhow::Result<()> {
        run(&["-t", "nat", "-F", CHAIN]).await
    }
}

impl Default for DnatController {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(args: &[&str]) -> anyhow::Result<()> {
    let output = Command::new("iptables")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("spawning iptables: {e}"))?;
    if !output.status.success() {
        anyhow::bail!("iptables {:?} failed: {}", args, String::from_utf8_lossy(&output.stderr));
    }
    Ok(())
}
