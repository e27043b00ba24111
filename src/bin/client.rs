//! rsslvpn client binary
//!
//! Connects to an SSL-VPN gateway and manages saved connection profiles.

use clap::{Args, Parser, Subcommand};
use log::{debug, info, warn};
use rsslvpn::{
    config::Config,
    error::{IntoVpnError, Result, VpnError},
    network::SystemNetwork,
    profiles::{Profile, ProfileStore},
    protocol::{constants::DEFAULT_PORT, AuthNegotiator, Credentials},
    tunnel::{TlsTransport, TunProvider, Tunnel, TunnelOptions},
};
use std::path::PathBuf;
use std::process;
use tokio::signal;

#[derive(Parser)]
#[command(name = "rsslvpn")]
#[command(about = "SSL VPN client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to a VPN gateway
    Connect(ConnectArgs),
    /// List saved profiles
    List,
    /// Save a connection profile
    Save(SaveArgs),
    /// Delete a saved profile
    Delete {
        /// Profile name
        name: String,
    },
    /// Make a saved profile the default
    SetDefault {
        /// Profile name
        name: String,
    },
}

#[derive(Args)]
struct ConnectArgs {
    /// Gateway address
    server: Option<String>,

    /// Gateway port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Username
    #[arg(short, long)]
    username: Option<String>,

    /// Password (prompted for when omitted)
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Ignore server certificate errors
    #[arg(long)]
    ignore_cert: bool,

    /// Use a saved profile
    #[arg(short = 'c', long = "profile")]
    profile: Option<String>,

    /// Load settings from a TOML configuration file
    #[arg(long = "config")]
    config_file: Option<PathBuf>,

    /// Reconnect automatically when the connection drops
    #[arg(long)]
    auto_reconnect: bool,

    /// Maximum reconnect attempts
    #[arg(long)]
    max_retries: Option<u32>,

    /// Delay between reconnect attempts in seconds
    #[arg(long)]
    retry_delay: Option<u32>,
}

#[derive(Args)]
struct SaveArgs {
    /// Profile name
    name: String,

    /// Gateway address
    server: String,

    /// Gateway port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Username
    #[arg(short, long)]
    username: String,

    /// Password to store with the profile
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Ignore server certificate errors
    #[arg(long)]
    ignore_cert: bool,

    /// Also make this the default profile
    #[arg(long)]
    set_default: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Connect(args) => connect(args).await,
        Command::List => with_store(list_profiles),
        Command::Save(args) => with_store(|store| save_profile(store, args)),
        Command::Delete { name } => with_store(|store| delete_profile(store, &name)),
        Command::SetDefault { name } => with_store(|store| {
            store.set_default(&name)?;
            println!("Profile '{name}' is now the default");
            Ok(())
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

async fn connect(args: ConnectArgs) -> Result<()> {
    check_privileges()?;

    let mut config = resolve_config(&args)?;
    init_logging(&config.logging.level);
    info!("Starting rsslvpn v{}", env!("CARGO_PKG_VERSION"));

    let password = match config.auth.password.take() {
        Some(password) => password,
        None => dialoguer::Password::new()
            .with_prompt("VPN password")
            .interact()
            .into_vpn_error("Failed to read password")?,
    };

    let mut transport = TlsTransport::new();
    if let Some(ca_file) = &config.server.ca_file {
        transport = transport.with_ca_file(ca_file);
    }
    let auth = AuthNegotiator::new(
        Credentials::new(config.auth.username.clone(), password),
        config.server.ignore_cert_errors,
    );
    let host = SystemNetwork::new(&config.network.resolv_conf);

    let mut tunnel = Tunnel::new(
        TunnelOptions::from(&config),
        transport,
        TunProvider,
        auth,
        Box::new(host),
    );

    let handle = tunnel.shutdown_handle();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Disconnecting...");
        handle.trigger();
    });

    info!(
        "Connecting to {}:{}",
        config.server.hostname, config.server.port
    );
    match tunnel.run().await {
        Ok(()) => {
            info!("Disconnected");
            Ok(())
        }
        Err(VpnError::Cancelled(reason)) => {
            info!("Connection cancelled: {reason}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Build the effective configuration: config file, then profile, then command
/// line server, then the default profile. Reconnect flags apply on top.
fn resolve_config(args: &ConnectArgs) -> Result<Config> {
    let mut config = if let Some(path) = &args.config_file {
        Config::from_file(path)?
    } else if let Some(name) = &args.profile {
        load_profile(name)?.to_config()
    } else if let Some(server) = &args.server {
        let username = args.username.clone().ok_or_else(|| {
            VpnError::Config("A username is required (-u) when connecting by address".into())
        })?;
        Config::new(server.clone(), args.port, username)
    } else {
        let store = ProfileStore::open_default()?;
        let name = store.default_profile()?.ok_or_else(|| {
            VpnError::Config("Specify a server address or a saved profile (-c)".into())
        })?;
        load_profile(&name)?.to_config()
    };

    if args.password.is_some() {
        config.auth.password = args.password.clone();
    }
    if args.ignore_cert {
        config.server.ignore_cert_errors = true;
    }
    if args.auto_reconnect {
        config.reconnect.auto_reconnect = true;
    }
    if let Some(max_retries) = args.max_retries {
        config.reconnect.max_retries = max_retries;
    }
    if let Some(retry_delay) = args.retry_delay {
        config.reconnect.retry_delay = retry_delay;
    }

    config.validate()?;
    Ok(config)
}

fn load_profile(name: &str) -> Result<Profile> {
    ProfileStore::open_default()?
        .load(name)?
        .ok_or_else(|| VpnError::Config(format!("Profile '{name}' does not exist")))
}

fn with_store(action: impl FnOnce(&ProfileStore) -> Result<()>) -> Result<()> {
    init_logging("warn");
    action(&ProfileStore::open_default()?)
}

fn list_profiles(store: &ProfileStore) -> Result<()> {
    let names = store.list()?;
    if names.is_empty() {
        println!("No saved profiles");
        return Ok(());
    }

    let default = store.default_profile()?;
    println!("Saved profiles:");
    for name in names {
        let marker = if default.as_deref() == Some(name.as_str()) {
            '*'
        } else {
            ' '
        };
        println!("  {marker} {name}");
    }
    println!("\n(* marks the default profile)");
    Ok(())
}

fn save_profile(store: &ProfileStore, args: SaveArgs) -> Result<()> {
    let profile = Profile {
        server: args.server,
        port: args.port,
        username: args.username,
        password: args.password,
        ignore_cert_errors: args.ignore_cert,
    };
    store.save(&args.name, &profile)?;

    if args.set_default {
        store.set_default(&args.name)?;
        println!("Profile '{}' saved and set as default", args.name);
    } else {
        println!("Profile '{}' saved", args.name);
    }
    Ok(())
}

fn delete_profile(store: &ProfileStore, name: &str) -> Result<()> {
    if !store.delete(name)? {
        return Err(VpnError::Config(format!("Profile '{name}' does not exist")));
    }
    println!("Profile '{name}' deleted");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn wait_for_shutdown_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            debug!("Received Ctrl+C");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        debug!("Received SIGTERM");
                    }
                    Err(e) => {
                        warn!("Cannot listen for SIGTERM: {e}");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

/// TUN devices and route changes need root
#[cfg(unix)]
fn check_privileges() -> Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        return Err(VpnError::Permission(
            "Connecting requires root privileges to create the TUN interface. Please run with sudo."
                .to_string(),
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_privileges() -> Result<()> {
    Ok(())
}
