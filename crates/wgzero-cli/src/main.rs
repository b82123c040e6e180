mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use wgzero_config::keys::{WgTool, X25519Keys};
use wgzero_config::settings::Settings;
use wgzero_config::tunnel::CurrentTunnel;

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(distribute)]
    {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    #[cfg(not(distribute))]
    {
        fmt()
            .pretty()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum KeySource {
    /// Compute x25519 keys in-process
    #[default]
    Internal,
    /// Shell out to `wg genkey` / `wg pubkey` / `wg genpsk`
    Wg,
}

#[derive(Debug, Parser)]
#[command(name = "wgzero")]
#[command(version = env!("WGZERO_VERSION"))]
#[command(about = "Manage a wg-quick configuration with backups and migrations")]
struct Args {
    /// Settings file; WG_* environment variables override it
    #[arg(short, long, default_value = "/etc/wgzero/wgzero.toml")]
    config: PathBuf,

    /// Where key material comes from
    #[arg(long, value_enum, default_value_t = KeySource::Internal)]
    keys: KeySource,

    /// Commit mutations (backup, save, reload the tunnel) instead of only saving
    #[arg(long, global = true)]
    apply: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a fresh configuration with a new interface key
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
    /// Print a JSON summary of the interface and its peers
    Show,
    /// Print the configuration file as it would be saved
    Export,
    /// Run pending migrations and save the result
    Migrate,
    /// Copy the live file into the backup directory
    Backup,
    /// Restore the live file from the latest backup
    Revert,
    /// Manage peers
    #[command(subcommand)]
    Peer(PeerCommand),
    /// Bring the interface up
    Up,
    /// Bring the interface down
    Down,
    /// Back up, save and reload the interface
    Commit,
}

#[derive(Debug, Subcommand)]
enum PeerCommand {
    /// Create a peer with fresh keys and the next free address
    Add {
        name: String,
        /// Also generate a preshared key
        #[arg(long)]
        psk: bool,
        /// Do not keep the client private key; no client config can be rendered
        #[arg(long)]
        no_private_key: bool,
    },
    /// Delete a peer
    Remove { public_key: String },
    /// Re-enable a peer's routes
    Enable { public_key: String },
    /// Soft-disable a peer's routes without deleting them
    Disable { public_key: String },
    /// Print the wg-quick config for the peer's device
    Config { public_key: String },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }
    init_tracing();
    let args = Args::parse();

    let mut settings = Settings::load(&args.config)?;
    settings.apply_env()?;
    debug!(?settings, "resolved settings");
    info!(
        interface = %settings.interface,
        path = %settings.layout().config_path().display(),
        "starting wgzero"
    );

    let tunnel = CurrentTunnel::new(settings.interface.as_str());
    let mut out = std::io::stdout().lock();
    match args.keys {
        KeySource::Internal => commands::run(&settings, X25519Keys, &tunnel, &args, &mut out)?,
        KeySource::Wg => commands::run(&settings, WgTool, &tunnel, &args, &mut out)?,
    }
    Ok(())
}
