use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use netrole_core::backends::http_settings::HttpTetherSettings;
use netrole_core::backends::linux::LinuxSystem;
use netrole_core::config::{load_config, ManagerConfig};
use netrole_core::validate::ApRequest;
use netrole_core::manager::DEFAULT_LOG_LINES;
use netrole_core::RoleManager;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "netrole-ctl")]
#[command(about = "Assign roles to network interfaces and manage their access points")]
#[command(version)]
struct Cli {
    /// TOML configuration file; defaults apply when it does not exist
    #[arg(long, env = "NETROLE_CONFIG", default_value = "/etc/netrole/netrole.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the interface -> role summary
    Roles,

    /// Assign a role: sbs, listener, show_network, unused, or "" to clear
    Assign { interface: String, role: String },

    /// Show the stored AP configuration of an interface
    Config { interface: String },

    /// Save AP settings for an interface that already holds an AP role.
    /// Options left out keep their stored values.
    Save {
        interface: String,

        #[arg(long)]
        ssid: Option<String>,

        #[arg(long)]
        channel: Option<i64>,

        /// Pass an empty string for an open network (listener only)
        #[arg(long)]
        password: Option<String>,

        #[arg(long)]
        ip: Option<String>,

        #[arg(long)]
        mask: Option<u8>,
    },

    /// List clients of an AP interface (defaults to the first AP)
    Clients {
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Ping-sweep the AP subnet, then list clients
    Scan { interface: String },

    /// Service, firewall, tether and AP summary
    Status,

    /// Every network interface with its stored role
    Interfaces,

    /// Run the health checks
    Selftest,

    /// Tail a service journal, or the sync log with `sync`
    Logs {
        #[arg(default_value = "ws-sync")]
        source: String,

        /// Clamped to 10-200
        #[arg(short = 'n', long, default_value_t = DEFAULT_LOG_LINES)]
        lines: i64,
    },

    /// Vacuum a service journal, or empty the sync log with `sync`
    ClearLogs { source: String },

    /// Restart one of the restartable services
    Restart { service: String },

    /// Disable PMF on a client interface's network and reassociate
    FixWifi { interface: String },
}

fn build_manager(config: ManagerConfig) -> Result<RoleManager> {
    let system = Arc::new(LinuxSystem::new(config.paths.clone()));
    let tether = Arc::new(
        HttpTetherSettings::new(&config.tether).context("failed to set up the host settings client")?,
    );
    Ok(RoleManager::new(config, system.clone(), system, tether))
}

async fn run(cli: Cli) -> Result<Value> {
    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let manager = build_manager(config)?;

    let value = match cli.command {
        Commands::Roles => serde_json::to_value(manager.roles().await)?,
        Commands::Assign { interface, role } => {
            serde_json::to_value(manager.assign_role(&interface, &role).await?)?
        }
        Commands::Config { interface } => {
            serde_json::to_value(manager.interface_config(&interface).await?)?
        }
        Commands::Save {
            interface,
            ssid,
            channel,
            password,
            ip,
            mask,
        } => {
            let request = ApRequest {
                ssid,
                channel,
                password,
                ip,
                mask,
            };
            serde_json::to_value(manager.save_config(&interface, &request).await?)?
        }
        Commands::Clients { interface } => {
            serde_json::to_value(manager.list_clients(interface.as_deref()).await?)?
        }
        Commands::Scan { interface } => serde_json::to_value(manager.scan_clients(&interface).await?)?,
        Commands::Status => serde_json::to_value(manager.status().await)?,
        Commands::Interfaces => serde_json::to_value(manager.interfaces().await)?,
        Commands::Selftest => serde_json::to_value(manager.self_test().await)?,
        Commands::Logs { source, lines } => serde_json::to_value(manager.logs(&source, lines).await?)?,
        Commands::ClearLogs { source } => serde_json::to_value(manager.clear_logs(&source).await?)?,
        Commands::Restart { service } => {
            serde_json::to_value(manager.restart_service(&service).await?)?
        }
        Commands::FixWifi { interface } => serde_json::to_value(manager.fix_wifi(&interface).await?)?,
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 日志写到 stderr，stdout 只输出 JSON
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&json!({ "success": true, "result": result }))?);
            Ok(())
        }
        Err(e) => {
            tracing::error!("❌ netrole-ctl failed: {:#}", e);
            println!("{}", json!({ "success": false, "error": e.to_string() }));
            std::process::exit(1);
        }
    }
}
