// 文件: netrole-core/src/backends/linux/mod.rs
use crate::backends::utils::{tail_lines, write_atomic};
use crate::config::PathsConfig;
use crate::subnet::parse_ip_addr_output;
use crate::traits::{InterfaceAddress, InterfaceInfo, NetworkProbe, SystemController};
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, error, trace, warn};

/// Pings in flight at once during a sweep.
const PING_BATCH: usize = 50;

/// 真实后端：systemctl / ip / iw / pgrep / nft / ping，外加 sysfs 和 procfs 读取。
#[derive(Debug, Clone)]
pub struct LinuxSystem {
    paths: PathsConfig,
}

impl LinuxSystem {
    pub fn new(paths: PathsConfig) -> Self {
        Self { paths }
    }

    async fn read_or_empty(path: &Path) -> String {
        match tokio::fs::read_to_string(path).await {
            Ok(s) => s,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "probe read failed, treating as empty");
                String::new()
            }
        }
    }

    /// stdout of a read-only command, empty on any failure.
    async fn probe_output(cmd: Command, ctx: &str) -> String {
        match run_cmd_output(cmd, ctx).await {
            Ok(out) => String::from_utf8_lossy(&out.stdout).into_owned(),
            Err(e) => {
                debug!(context = %ctx, error = %e, "probe command failed, treating as empty");
                String::new()
            }
        }
    }

    async fn interface_kind(&self, name: &str) -> (String, bool) {
        let dir = self.paths.sys_class_net.join(name);
        let wireless = tokio::fs::metadata(dir.join("wireless")).await.is_ok();
        if !wireless {
            return ("ethernet".to_string(), false);
        }
        // device 链接指向 USB 总线即为 USB 网卡
        let usb = match tokio::fs::read_link(dir.join("device")).await {
            Ok(target) => target.to_string_lossy().contains("usb"),
            Err(_) => false,
        };
        let kind = if usb { "wifi-usb" } else { "wifi" };
        (kind.to_string(), true)
    }
}

/// Runs `cmd` to completion. A spawn failure or a non-zero exit becomes
/// `Error::CommandFailed` carrying `ctx` and the trimmed stderr.
async fn run_cmd_output(mut cmd: Command, ctx: &str) -> Result<Output> {
    let out = cmd.output().await.map_err(|e| {
        error!(context = %ctx, error = %e, "failed to spawn command");
        Error::CommandFailed(format!("{ctx} spawn failed: {e}"))
    })?;
    if out.status.success() {
        return Ok(out);
    }
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stderr = stderr.trim();
    error!(context = %ctx, status = ?out.status.code(), stderr = %stderr, "command failed");
    Err(Error::CommandFailed(format!("{ctx} failed: {stderr}")))
}

/// For commands run only for their exit status (`systemctl`, `ip`, `pgrep`,
/// `ping`). stdout is discarded; stderr ends up in the error. Not logged here,
/// a non-zero `pgrep` or `ping` is an ordinary answer.
async fn run_cmd_status(mut cmd: Command, ctx: &str) -> Result<()> {
    cmd.stdout(Stdio::null());
    let out = cmd
        .output()
        .await
        .map_err(|e| Error::CommandFailed(format!("{ctx} spawn failed: {e}")))?;
    if out.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&out.stderr);
    Err(Error::CommandFailed(format!("{ctx} failed: {}", stderr.trim())))
}

fn command(program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

#[async_trait]
impl SystemController for LinuxSystem {
    async fn restart_service(&self, name: &str) -> Result<()> {
        debug!(service = %name, "restarting service");
        run_cmd_status(command("systemctl", &["restart", name]), "systemctl restart").await
    }

    async fn stop_service(&self, name: &str) -> Result<()> {
        debug!(service = %name, "stopping service");
        run_cmd_status(command("systemctl", &["stop", name]), "systemctl stop").await
    }

    async fn service_status(&self, name: &str) -> String {
        // is-active 对非活动服务返回非零，因此直接读 stdout
        match command("systemctl", &["is-active", name]).output().await {
            Ok(out) => {
                let state = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if state.is_empty() {
                    "unknown".to_string()
                } else {
                    state
                }
            }
            Err(e) => {
                warn!(service = %name, error = %e, "systemctl is-active failed");
                "unknown".to_string()
            }
        }
    }

    async fn set_link(&self, iface: &str, up: bool) -> Result<()> {
        let state = if up { "up" } else { "down" };
        run_cmd_status(command("ip", &["link", "set", "dev", iface, state]), "ip link set").await
    }

    async fn set_address(&self, iface: &str, ip: Ipv4Addr, prefix: u8) -> Result<()> {
        let cidr = format!("{ip}/{prefix}");
        run_cmd_status(command("ip", &["addr", "add", cidr.as_str(), "dev", iface]), "ip addr add").await
    }

    async fn flush_addresses(&self, iface: &str) -> Result<()> {
        run_cmd_status(command("ip", &["addr", "flush", "dev", iface]), "ip addr flush").await
    }

    async fn install_file(&self, path: &Path, contents: &str) -> Result<()> {
        let path = path.to_path_buf();
        let contents = contents.to_string();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &contents, 0o644))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        debug!(path = %path.display(), "installed file");
        Ok(())
    }

    async fn vacuum_journal(&self, unit: &str) -> Result<()> {
        run_cmd_status(command("journalctl", &["--rotate"]), "journalctl --rotate").await?;
        run_cmd_status(
            command("journalctl", &["--vacuum-time=1s", "-u", unit]),
            "journalctl --vacuum-time",
        )
        .await
    }

    async fn truncate_file(&self, path: &Path) -> Result<()> {
        if tokio::fs::metadata(path).await.is_err() {
            return Ok(());
        }
        tokio::fs::write(path, b"").await?;
        debug!(path = %path.display(), "truncated file");
        Ok(())
    }

    async fn wpa_cli(&self, iface: &str, args: &[&str]) -> Result<String> {
        let mut argv = vec!["-i", iface];
        argv.extend_from_slice(args);
        let out = run_cmd_output(command("wpa_cli", &argv), "wpa_cli").await?;
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }
}

#[async_trait]
impl NetworkProbe for LinuxSystem {
    async fn list_interfaces(&self) -> Vec<InterfaceInfo> {
        let mut entries = match tokio::fs::read_dir(&self.paths.sys_class_net).await {
            Ok(rd) => rd,
            Err(e) => {
                warn!(path = %self.paths.sys_class_net.display(), error = %e, "cannot list interfaces");
                return Vec::new();
            }
        };

        let mut interfaces = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "lo" {
                continue;
            }
            let dir = entry.path();
            let (kind, wireless) = self.interface_kind(&name).await;
            let operstate = Self::read_or_empty(&dir.join("operstate")).await;
            let mac = Self::read_or_empty(&dir.join("address")).await;
            interfaces.push(InterfaceInfo {
                name,
                kind,
                operstate: match operstate.trim() {
                    "" => "unknown".to_string(),
                    s => s.to_string(),
                },
                mac: mac.trim().to_string(),
                wireless,
            });
        }
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        interfaces
    }

    async fn interface_exists(&self, iface: &str) -> bool {
        tokio::fs::metadata(self.paths.sys_class_net.join(iface))
            .await
            .is_ok()
    }

    async fn ipv4_addresses(&self) -> Vec<InterfaceAddress> {
        let out = Self::probe_output(command("ip", &["-4", "addr", "show"]), "ip -4 addr show").await;
        parse_ip_addr_output(&out)
    }

    async fn read_leases(&self, iface: &str) -> String {
        let own = self.paths.lease_file(iface);
        if tokio::fs::metadata(&own).await.is_ok() {
            return Self::read_or_empty(&own).await;
        }
        Self::read_or_empty(&self.paths.shared_lease_file()).await
    }

    async fn read_arp_table(&self) -> String {
        Self::read_or_empty(&self.paths.arp_table).await
    }

    async fn station_dump(&self, iface: &str) -> String {
        Self::probe_output(command("iw", &["dev", iface, "station", "dump"]), "iw station dump").await
    }

    async fn process_running(&self, pattern: &str) -> bool {
        // pgrep 找不到进程时返回 1
        run_cmd_status(command("pgrep", &["-f", pattern]), "pgrep").await.is_ok()
    }

    async fn firewall_tables(&self) -> Vec<String> {
        let out = Self::probe_output(command("nft", &["list", "tables"]), "nft list tables").await;
        out.lines()
            .filter_map(|l| l.split_whitespace().last())
            .filter(|name| *name != "tables")
            .map(str::to_string)
            .collect()
    }

    async fn ping_sweep(&self, targets: &[Ipv4Addr]) {
        for batch in targets.chunks(PING_BATCH) {
            let mut tasks = JoinSet::new();
            for ip in batch {
                let ip = ip.to_string();
                tasks.spawn(async move {
                    let _ = run_cmd_status(command("ping", &["-c1", "-W1", ip.as_str()]), "ping").await;
                });
            }
            while tasks.join_next().await.is_some() {}
            trace!(count = batch.len(), "ping batch done");
        }
    }

    async fn journal_tail(&self, unit: &str, lines: usize) -> String {
        let n = lines.to_string();
        Self::probe_output(
            command("journalctl", &["-u", unit, "-n", n.as_str(), "--no-pager"]),
            "journalctl",
        )
        .await
    }

    async fn file_tail(&self, path: &Path, lines: usize) -> Option<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Some(tail_lines(&text, lines)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "log read failed, treating as empty");
                Some(String::new())
            }
        }
    }
}
