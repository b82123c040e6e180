use std::io::Write;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use wgzero_config::client::{ClientError, render_client_config};
use wgzero_config::keys::KeyGenerator;
use wgzero_config::migrate::MigrationError;
use wgzero_config::settings::Settings;
use wgzero_config::store::{ConfigStore, StoreError};
use wgzero_config::tunnel::{TunnelController, TunnelError};

use crate::{Args, Command, PeerCommand};

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("failed to encode summary: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("no peer with public key {0}")]
    PeerNotFound(String),

    #[error("{} already exists, pass --force to replace it", .0.display())]
    AlreadyInitialized(PathBuf),
}

pub fn run<K, T, W>(
    settings: &Settings,
    keys: K,
    tunnel: &T,
    args: &Args,
    out: &mut W,
) -> Result<(), CliError>
where
    K: KeyGenerator,
    T: TunnelController,
    W: Write,
{
    match &args.command {
        Command::Init { force } => init(settings, keys, tunnel, *force, args.apply, out),
        Command::Up => Ok(tunnel.up()?),
        Command::Down => Ok(tunnel.down()?),
        Command::Revert => {
            // the live file is never parsed here; it may be the corrupt one
            settings.layout().revert()?;
            if args.apply {
                tunnel.reload()?;
            }
            Ok(())
        }
        Command::Migrate => {
            let mut store = ConfigStore::load_existing(settings.store_options(), keys)?;
            let report = settings
                .migration_runner()
                .persist(true)
                .execute(&mut store)?;
            writeln!(
                out,
                "config version {} -> {} ({} applied)",
                report.from_version,
                report.to_version,
                report.applied.len()
            )?;
            Ok(())
        }
        command => {
            let mut store = open(settings, keys)?;
            match command {
                Command::Show => {
                    serde_json::to_writer_pretty(&mut *out, &store.summary())?;
                    writeln!(out)?;
                }
                Command::Export => write!(out, "{}", store.render())?,
                Command::Backup => {
                    let path = store.backup_fs_copy()?;
                    writeln!(out, "{}", path.display())?;
                }
                Command::Commit => store.commit(tunnel)?,
                Command::Peer(cmd) => peer(settings, &mut store, tunnel, cmd, args.apply, out)?,
                Command::Init { .. }
                | Command::Up
                | Command::Down
                | Command::Migrate
                | Command::Revert => {}
            }
            Ok(())
        }
    }
}

/// Load the live file and bring it up to date in memory.
fn open<K: KeyGenerator>(settings: &Settings, keys: K) -> Result<ConfigStore<K>, CliError> {
    let mut store = ConfigStore::load_existing(settings.store_options(), keys)?;
    let report = settings.migration_runner().execute(&mut store)?;
    if !report.is_noop() && !settings.migration_save {
        warn!(
            applied = report.applied.len(),
            "migrations applied in memory only; run `wgzero migrate` to persist them"
        );
    }
    Ok(store)
}

fn init<K, T, W>(
    settings: &Settings,
    keys: K,
    tunnel: &T,
    force: bool,
    apply: bool,
    out: &mut W,
) -> Result<(), CliError>
where
    K: KeyGenerator,
    T: TunnelController,
    W: Write,
{
    let path = settings.layout().config_path();
    if path.exists() && !force {
        return Err(CliError::AlreadyInitialized(path));
    }

    let mut store = ConfigStore::init(settings.store_options(), keys, &settings.init_options())?;
    let version = settings.migration_runner().current_version();
    store.interface_mut().set_config_version(version);
    persist(&mut store, tunnel, apply)?;

    info!(path = %path.display(), "initialized configuration");
    writeln!(out, "{}", store.interface().public_key().unwrap_or_default())?;
    Ok(())
}

fn peer<K, T, W>(
    settings: &Settings,
    store: &mut ConfigStore<K>,
    tunnel: &T,
    cmd: &PeerCommand,
    apply: bool,
    out: &mut W,
) -> Result<(), CliError>
where
    K: KeyGenerator,
    T: TunnelController,
    W: Write,
{
    match cmd {
        PeerCommand::Add {
            name,
            psk,
            no_private_key,
        } => {
            let peer = store.create_peer(name, *psk, !*no_private_key)?;
            let public_key = peer.public_key().unwrap_or_default().to_string();
            persist(store, tunnel, apply)?;
            writeln!(out, "{public_key}")?;
        }
        PeerCommand::Remove { public_key } => {
            store
                .remove_peer(public_key)
                .ok_or_else(|| CliError::PeerNotFound(public_key.clone()))?;
            persist(store, tunnel, apply)?;
        }
        PeerCommand::Enable { public_key } | PeerCommand::Disable { public_key } => {
            let enabled = matches!(cmd, PeerCommand::Enable { .. });
            store
                .peer_mut(public_key)
                .ok_or_else(|| CliError::PeerNotFound(public_key.clone()))?
                .set_enabled(enabled);
            persist(store, tunnel, apply)?;
        }
        PeerCommand::Config { public_key } => {
            let peer = store
                .peer(public_key)
                .ok_or_else(|| CliError::PeerNotFound(public_key.clone()))?;
            let config = render_client_config(store.interface(), peer, &settings.client_options())?;
            write!(out, "{config}")?;
        }
    }
    Ok(())
}

/// Commit through the tunnel when applying; otherwise back up and save.
fn persist<K, T>(store: &mut ConfigStore<K>, tunnel: &T, apply: bool) -> Result<(), CliError>
where
    K: KeyGenerator,
    T: TunnelController,
{
    if apply {
        store.commit(tunnel)?;
        return Ok(());
    }
    if store.config_exists() {
        store.backup_fs_copy()?;
    }
    store.save()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use clap::Parser;
    use tempfile::TempDir;
    use test_case::test_case;
    use wgzero_config::keys::X25519Keys;
    use wgzero_types::DocumentSummary;

    use super::*;

    #[derive(Default)]
    struct Recording {
        calls: RefCell<Vec<&'static str>>,
    }

    impl TunnelController for Recording {
        fn up(&self) -> Result<(), TunnelError> {
            self.calls.borrow_mut().push("up");
            Ok(())
        }

        fn down(&self) -> Result<(), TunnelError> {
            self.calls.borrow_mut().push("down");
            Ok(())
        }
    }

    struct Harness {
        dir: TempDir,
        settings: Settings,
        tunnel: Recording,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let settings = Settings {
                config_dir: dir.path().to_path_buf(),
                host: "vpn.example.com".into(),
                ..Settings::default()
            };
            Self {
                dir,
                settings,
                tunnel: Recording::default(),
            }
        }

        fn run(&self, argv: &[&str]) -> Result<String, CliError> {
            let args = Args::try_parse_from(std::iter::once("wgzero").chain(argv.iter().copied()))
                .unwrap();
            let mut out = Vec::new();
            run(&self.settings, X25519Keys, &self.tunnel, &args, &mut out)?;
            Ok(String::from_utf8(out).unwrap())
        }

        fn summary(&self) -> DocumentSummary {
            serde_json::from_str(&self.run(&["show"]).unwrap()).unwrap()
        }
    }

    #[test]
    fn init_writes_current_version() {
        let h = Harness::new();
        let public_key = h.run(&["init"]).unwrap();
        assert!(h.dir.path().join("wg0.conf").exists());

        let summary = h.summary();
        assert_eq!(summary.interface.public_key.as_deref(), Some(public_key.trim()));
        assert_eq!(summary.interface.config_version, 1);
        assert_eq!(summary.interface.host.as_deref(), Some("vpn.example.com"));
        assert!(h.tunnel.calls.borrow().is_empty());
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let h = Harness::new();
        h.run(&["init"]).unwrap();
        assert!(matches!(h.run(&["init"]), Err(CliError::AlreadyInitialized(_))));
        h.run(&["init", "--force"]).unwrap();
        assert!(h.dir.path().join("wg-zero-backups/wg0_latest.conf").exists());
    }

    #[test]
    fn peer_lifecycle() {
        let h = Harness::new();
        h.run(&["init"]).unwrap();
        let key = h.run(&["peer", "add", "phone", "--psk"]).unwrap();
        let key = key.trim();

        let summary = h.summary();
        assert_eq!(summary.peers.len(), 1);
        assert_eq!(summary.peers[0].allowed_ips, vec!["10.1.3.2/32"]);
        assert!(summary.peers[0].has_preshared_key);

        h.run(&["peer", "disable", key]).unwrap();
        assert!(h.run(&["export"]).unwrap().contains("#$AllowedIPs = 10.1.3.2/32"));
        assert!(!h.summary().peers[0].enabled);

        let config = h.run(&["peer", "config", key]).unwrap();
        assert!(config.contains("Address = 10.1.3.2/32"));
        assert!(config.contains("Endpoint = vpn.example.com:51820"));

        h.run(&["peer", "remove", key]).unwrap();
        assert!(h.summary().peers.is_empty());
    }

    #[test_case(&["peer", "remove", "nope"] ; "remove")]
    #[test_case(&["peer", "enable", "nope"] ; "enable")]
    #[test_case(&["peer", "config", "nope"] ; "config")]
    fn unknown_peer(argv: &[&str]) {
        let h = Harness::new();
        h.run(&["init"]).unwrap();
        assert!(matches!(h.run(argv), Err(CliError::PeerNotFound(_))));
    }

    #[test]
    fn config_without_stored_private_key() {
        let h = Harness::new();
        h.run(&["init"]).unwrap();
        let key = h.run(&["peer", "add", "router", "--no-private-key"]).unwrap();
        assert!(matches!(
            h.run(&["peer", "config", key.trim()]),
            Err(CliError::Client(ClientError::MissingPeerPrivateKey))
        ));
    }

    #[test]
    fn apply_reloads_tunnel() {
        let h = Harness::new();
        h.run(&["init", "--apply"]).unwrap();
        h.run(&["peer", "add", "phone", "--apply"]).unwrap();
        assert_eq!(*h.tunnel.calls.borrow(), vec!["down", "up", "down", "up"]);
    }

    #[test]
    fn revert_restores_unparseable_config() {
        let h = Harness::new();
        h.run(&["init"]).unwrap();
        let before = h.summary();
        h.run(&["backup"]).unwrap();

        let live = h.dir.path().join("wg0.conf");
        std::fs::write(&live, "[Interface]\ncorrupted line\n").unwrap();
        assert!(matches!(
            h.run(&["show"]),
            Err(CliError::Store(StoreError::Parse { .. }))
        ));

        h.run(&["revert", "--apply"]).unwrap();
        assert_eq!(h.summary(), before);
        assert_eq!(*h.tunnel.calls.borrow(), vec!["down", "up"]);
    }

    #[test]
    fn revert_without_backup() {
        let h = Harness::new();
        h.run(&["init"]).unwrap();
        assert!(matches!(
            h.run(&["revert"]),
            Err(CliError::Store(StoreError::NoBackup(_)))
        ));
    }

    #[test]
    fn commands_on_missing_config() {
        let h = Harness::new();
        assert!(matches!(
            h.run(&["show"]),
            Err(CliError::Store(StoreError::NotFound(_)))
        ));
    }
}
