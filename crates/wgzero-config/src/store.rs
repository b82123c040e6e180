// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use wgzero_types::DocumentSummary;

use crate::alloc::{self, AllocError};
use crate::ini::{self, ParseError, Section};
use crate::keys::{KeyError, KeyGenerator};
use crate::record::{Hook, InterfaceRecord, PeerRecord, RecordDefaults, RecordError, ValidationError};
use crate::tunnel::{TunnelController, TunnelError};

const LATEST_TAG: &str = "latest";
const BACKUP_TAG_FORMAT: &str = "%Y-%m-%d_%H-%M-%S_%3f";
/// The leading seconds-resolution part of [`BACKUP_TAG_FORMAT`].
const BACKUP_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const BACKUP_STAMP_LEN: usize = "2000-01-01_00-00-00".len();

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("no [Interface] section in {}", .0.display())]
    MissingInterface(PathBuf),

    #[error("no backup to revert to at {}", .0.display())]
    NoBackup(PathBuf),

    #[error("a peer with public key {0} already exists")]
    DuplicatePeer(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("commit failed: {cause}")]
    CommitFailed {
        cause: Box<StoreError>,
        /// Failure of the revert-and-reload path, if it failed too.
        recovery: Option<Box<StoreError>>,
    },
}

impl From<RecordError> for StoreError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::Validation(e) => StoreError::Validation(e),
            RecordError::Key(e) => StoreError::Key(e),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Where the live document and its backups live.
///
/// `<config_dir>/<interface>.conf`, with backups in
/// `<config_dir>/<backup_dir_name>/<interface>_<tag>.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub config_dir: PathBuf,
    pub interface: String,
    pub backup_dir_name: String,
}

impl StoreLayout {
    pub const DEFAULT_BACKUP_DIR: &'static str = "wg-zero-backups";

    pub fn new(config_dir: impl Into<PathBuf>, interface: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            interface: interface.into(),
            backup_dir_name: Self::DEFAULT_BACKUP_DIR.to_string(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(format!("{}.conf", self.interface))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.config_dir.join(&self.backup_dir_name)
    }

    pub fn backup_path(&self, tag: &str) -> PathBuf {
        self.backup_dir().join(format!("{}_{tag}.conf", self.interface))
    }

    pub fn latest_backup_path(&self) -> PathBuf {
        self.backup_path(LATEST_TAG)
    }

    /// Timestamped backups of this interface, oldest first.
    ///
    /// Only `<interface>_<tag>.conf` names whose tag is a backup timestamp are
    /// listed, so `_latest` and the backups of another interface sharing the
    /// directory (`wg0_home_...` next to `wg0_...`) are never included.
    pub fn timestamped_backups(&self) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.backup_dir();
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(io_error(&dir)(e)),
        };

        let prefix = format!("{}_", self.interface);
        let mut backups = Vec::new();
        for entry in listing {
            let entry = entry.map_err(io_error(&dir))?;
            let name = entry.file_name();
            let Some(tag) = name
                .to_str()
                .and_then(|n| n.strip_prefix(&prefix))
                .and_then(|n| n.strip_suffix(".conf"))
            else {
                continue;
            };
            if is_backup_tag(tag) {
                backups.push(entry.path());
            }
        }
        backups.sort();
        Ok(backups)
    }

    /// Overwrite the live file with the `_latest` backup.
    ///
    /// Works on the files alone, so a live file that no longer parses can
    /// still be restored.
    #[tracing::instrument(skip_all, fields(path = %self.config_path().display()))]
    pub fn revert(&self) -> Result<(), StoreError> {
        let latest = self.latest_backup_path();
        let contents = match fs::read(&latest) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NoBackup(latest));
            }
            Err(e) => return Err(io_error(&latest)(e)),
        };
        let path = self.config_path();
        fs::write(&path, contents).map_err(io_error(&path))?;
        warn!(backup = %latest.display(), "reverted configuration to latest backup");
        Ok(())
    }
}

/// Retention of timestamped backups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackupRetention {
    /// Backups accumulate without bound.
    #[default]
    Unbounded,
    /// Keep this many timestamped backups after every backup.
    KeepLatest(usize),
}

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub layout: StoreLayout,
    pub defaults: RecordDefaults,
    pub retention: BackupRetention,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self::new("/etc/wireguard", "wg0")
    }
}

/// Values for a freshly initialized interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOptions {
    pub addresses: Vec<String>,
    pub listen_port: u16,
    pub dns: Vec<String>,
    pub mtu: Option<u16>,
    pub pre_up: Vec<String>,
    pub post_up: Vec<String>,
    pub pre_down: Vec<String>,
    pub post_down: Vec<String>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            addresses: vec!["10.1.3.1/24".to_string()],
            listen_port: 51820,
            dns: vec![],
            mtu: None,
            pre_up: vec![],
            post_up: vec![],
            pre_down: vec![],
            post_down: vec![],
        }
    }
}

impl InitOptions {
    fn hook(&self, hook: Hook) -> &[String] {
        match hook {
            Hook::PreUp => &self.pre_up,
            Hook::PostUp => &self.post_up,
            Hook::PreDown => &self.pre_down,
            Hook::PostDown => &self.post_down,
        }
    }
}

struct Document {
    interface: InterfaceRecord,
    peers: Vec<PeerRecord>,
    raw_sections: Vec<Section>,
}

/// The in-memory representation of one configuration file.
///
/// Callers serialize mutating operations; the store holds no locks and two
/// processes writing the same file race at the OS level.
#[derive(Debug)]
pub struct ConfigStore<K> {
    options: StoreOptions,
    keys: K,
    interface: InterfaceRecord,
    peers: Vec<PeerRecord>,
    raw_sections: Vec<Section>,
}

impl<K: KeyGenerator> ConfigStore<K> {
    /// Read and parse the live file, then run `enforce_fields` on every record.
    ///
    /// A missing file is `StoreError::NotFound`; a present but malformed one
    /// is `StoreError::Parse`.
    #[tracing::instrument(skip_all, fields(interface = %options.layout.interface))]
    pub fn load_existing(options: StoreOptions, keys: K) -> Result<Self, StoreError> {
        let doc = read_document(&options.layout)?;
        let mut store = Self {
            options,
            keys,
            interface: doc.interface,
            peers: doc.peers,
            raw_sections: doc.raw_sections,
        };
        store.enforce_fields()?;
        info!(
            path = %store.path().display(),
            peer_count = store.peers.len(),
            version = store.interface.config_version(),
            "loaded configuration"
        );
        Ok(store)
    }

    /// A fresh interface with a generated private key and no peers. Nothing is
    /// written until `save`.
    #[tracing::instrument(skip_all, fields(interface = %options.layout.interface))]
    pub fn init(options: StoreOptions, keys: K, init: &InitOptions) -> Result<Self, StoreError> {
        let mut interface = InterfaceRecord::new();
        interface.set_addresses(&init.addresses)?;
        interface.set_listen_port(i64::from(init.listen_port))?;
        interface.set_private_key(&keys.generate_private_key()?)?;
        interface.set_dns(&init.dns)?;
        interface.set_mtu(init.mtu.map(i64::from))?;
        for hook in Hook::ALL {
            interface.set_hook(hook, init.hook(hook))?;
        }

        let mut store = Self {
            options,
            keys,
            interface,
            peers: vec![],
            raw_sections: vec![],
        };
        store.enforce_fields()?;
        info!(path = %store.path().display(), "initialized new configuration");
        Ok(store)
    }

    /// Re-read the live file, discarding in-memory state. On failure the
    /// current state is kept.
    #[tracing::instrument(skip_all, fields(path = %self.path().display()))]
    pub fn reload(&mut self) -> Result<(), StoreError> {
        let mut doc = read_document(&self.options.layout)?;
        doc.interface
            .enforce_fields(&self.options.defaults, &self.keys)?;
        for peer in &mut doc.peers {
            peer.enforce_fields();
        }
        self.interface = doc.interface;
        self.peers = doc.peers;
        self.raw_sections = doc.raw_sections;
        debug!(peer_count = self.peers.len(), "reloaded configuration");
        Ok(())
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.options.layout
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }

    pub fn path(&self) -> PathBuf {
        self.options.layout.config_path()
    }

    pub fn config_exists(&self) -> bool {
        self.path().is_file()
    }

    pub fn interface(&self) -> &InterfaceRecord {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut InterfaceRecord {
        &mut self.interface
    }

    pub fn peers(&self) -> &[PeerRecord] {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut [PeerRecord] {
        &mut self.peers
    }

    /// Both record views at once, for passes that touch the interface and
    /// its peers together.
    pub fn records_mut(&mut self) -> (&mut InterfaceRecord, &mut [PeerRecord]) {
        (&mut self.interface, &mut self.peers)
    }

    /// Sections as parsed by the last load, including discarded ones.
    pub fn raw_sections(&self) -> &[Section] {
        &self.raw_sections
    }

    pub fn peer(&self, public_key: &str) -> Option<&PeerRecord> {
        self.peers
            .iter()
            .find(|p| p.public_key() == Some(public_key))
    }

    pub fn peer_mut(&mut self, public_key: &str) -> Option<&mut PeerRecord> {
        self.peers
            .iter_mut()
            .find(|p| p.public_key() == Some(public_key))
    }

    pub fn add_peer(&mut self, mut peer: PeerRecord) -> Result<&mut PeerRecord, StoreError> {
        if let Some(key) = peer.public_key() {
            if self.peer(key).is_some() {
                warn!(public_key = %key, "refusing to add duplicate peer");
                return Err(StoreError::DuplicatePeer(key.to_string()));
            }
        }
        peer.enforce_fields();
        info!(name = ?peer.name(), "added peer");
        let at = self.peers.len();
        self.peers.push(peer);
        Ok(&mut self.peers[at])
    }

    /// Generate a peer with fresh keys and the next free tunnel address.
    pub fn create_peer(
        &mut self,
        name: &str,
        with_preshared_key: bool,
        persist_private_key: bool,
    ) -> Result<&mut PeerRecord, StoreError> {
        let address = alloc::next_peer_address(&self.interface, &self.peers)?;
        let peer = PeerRecord::generate(
            &self.keys,
            name,
            &[address.to_string()],
            with_preshared_key,
            persist_private_key,
        )?;
        self.add_peer(peer)
    }

    /// Remove the peer's section entirely.
    pub fn remove_peer(&mut self, public_key: &str) -> Option<PeerRecord> {
        let at = self
            .peers
            .iter()
            .position(|p| p.public_key() == Some(public_key))?;
        let peer = self.peers.remove(at);
        info!(name = ?peer.name(), "removed peer");
        Some(peer)
    }

    /// Run the defaulting pass over the interface and every peer.
    pub fn enforce_fields(&mut self) -> Result<(), KeyError> {
        self.interface
            .enforce_fields(&self.options.defaults, &self.keys)?;
        for peer in &mut self.peers {
            peer.enforce_fields();
        }
        Ok(())
    }

    /// The interface section then each peer section, each followed by a
    /// blank line.
    pub fn to_lines(&self) -> Vec<String> {
        ini::codec::to_lines(self.sections())
    }

    pub fn render(&self) -> String {
        self.to_lines().join("\n")
    }

    fn sections(&self) -> impl Iterator<Item = &Section> {
        std::iter::once(self.interface.section()).chain(self.peers.iter().map(PeerRecord::section))
    }

    /// Rewrite the live file with the full in-memory document.
    #[tracing::instrument(skip_all, fields(path = %self.path().display()))]
    pub fn save(&mut self) -> Result<(), StoreError> {
        self.enforce_fields()?;
        let path = self.path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::write(&path, self.render()).map_err(io_error(&path))?;
        info!(peer_count = self.peers.len(), "saved configuration");
        Ok(())
    }

    /// Copy the live file (not the in-memory state) into the backup directory,
    /// once under a timestamp tag and once as `_latest`. Returns the
    /// timestamped path.
    #[tracing::instrument(skip_all, fields(path = %self.path().display()))]
    pub fn backup_fs_copy(&mut self) -> Result<PathBuf, StoreError> {
        self.enforce_fields()?;

        let source = self.path();
        let contents = match fs::read(&source) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(source));
            }
            Err(e) => return Err(io_error(&source)(e)),
        };

        let layout = &self.options.layout;
        let dir = layout.backup_dir();
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        let stamped = next_backup_path(layout)?;
        fs::write(&stamped, &contents).map_err(io_error(&stamped))?;
        let latest = layout.latest_backup_path();
        fs::write(&latest, &contents).map_err(io_error(&latest))?;
        info!(backup = %stamped.display(), "backed up configuration");

        if let BackupRetention::KeepLatest(keep) = self.options.retention {
            self.trim_backups(keep)?;
        }
        Ok(stamped)
    }

    /// Overwrite the live file with the `_latest` backup. In-memory state is
    /// left alone; call `reload` to pick the restored document up.
    pub fn revert(&self) -> Result<(), StoreError> {
        self.options.layout.revert()
    }

    /// Delete all but the `keep` most recent timestamped backups. `_latest`
    /// is never touched. Returns the deleted paths.
    pub fn trim_backups(&self, keep: usize) -> Result<Vec<PathBuf>, StoreError> {
        let backups = self.options.layout.timestamped_backups()?;
        let excess = backups.len().saturating_sub(keep);
        let mut deleted = Vec::with_capacity(excess);
        for path in backups.into_iter().take(excess) {
            fs::remove_file(&path).map_err(io_error(&path))?;
            debug!(backup = %path.display(), "trimmed backup");
            deleted.push(path);
        }
        if !deleted.is_empty() {
            info!(deleted = deleted.len(), keep, "trimmed backups");
        }
        Ok(deleted)
    }

    /// Back up, save, and reload the tunnel. If any step fails the previous
    /// file is restored, the tunnel reloaded again and the in-memory state
    /// re-read from disk before the original error is returned.
    #[tracing::instrument(skip_all, fields(path = %self.path().display()))]
    pub fn commit<T: TunnelController>(&mut self, tunnel: &T) -> Result<(), StoreError> {
        let mut backed_up = false;
        let Err(cause) = self.try_commit(tunnel, &mut backed_up) else {
            info!("committed configuration");
            return Ok(());
        };
        error!(error = %cause, "commit failed");

        if !backed_up {
            return Err(StoreError::CommitFailed {
                cause: Box::new(cause),
                recovery: None,
            });
        }

        let recovery = self
            .revert()
            .and_then(|()| tunnel.reload().map_err(StoreError::from))
            .and_then(|()| self.reload());
        if let Err(e) = &recovery {
            error!(error = %e, "recovery after failed commit also failed");
        }
        Err(StoreError::CommitFailed {
            cause: Box::new(cause),
            recovery: recovery.err().map(Box::new),
        })
    }

    fn try_commit<T: TunnelController>(
        &mut self,
        tunnel: &T,
        backed_up: &mut bool,
    ) -> Result<(), StoreError> {
        if self.config_exists() {
            self.backup_fs_copy()?;
            *backed_up = true;
        }
        self.save()?;
        tunnel.reload()?;
        Ok(())
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            interface: self.interface.summary(),
            peers: self.peers.iter().map(PeerRecord::summary).collect(),
        }
    }
}

fn read_document(layout: &StoreLayout) -> Result<Document, StoreError> {
    let path = layout.config_path();
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path));
        }
        Err(e) => return Err(io_error(&path)(e)),
    };

    let sections = ini::parse(&text).map_err(|source| StoreError::Parse {
        path: path.clone(),
        source,
    })?;

    let mut interface = None;
    let mut peers = Vec::new();
    for section in &sections {
        if section.is_named(InterfaceRecord::SECTION) {
            if interface.is_some() {
                warn!(path = %path.display(), "discarding additional [Interface] section");
                continue;
            }
            interface = Some(InterfaceRecord::from_section(section.clone()));
        } else if section.is_named(PeerRecord::SECTION) {
            peers.push(PeerRecord::from_section(section.clone()));
        } else {
            warn!(
                path = %path.display(),
                section = section.name().unwrap_or("<unnamed>"),
                "discarding unknown section"
            );
        }
    }

    let interface = interface.ok_or_else(|| StoreError::MissingInterface(path.clone()))?;
    Ok(Document {
        interface,
        peers,
        raw_sections: sections,
    })
}

/// `<date>_<time>_<millis>`, optionally followed by a `_NNNN` collision
/// suffix.
fn is_backup_tag(tag: &str) -> bool {
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    let Some((stamp, rest)) = tag.split_at_checked(BACKUP_STAMP_LEN) else {
        return false;
    };
    if NaiveDateTime::parse_from_str(stamp, BACKUP_STAMP_FORMAT).is_err() {
        return false;
    }
    let Some(rest) = rest.strip_prefix('_') else {
        return false;
    };
    match rest.split_once('_') {
        Some((millis, suffix)) => millis.len() == 3 && all_digits(millis) && all_digits(suffix),
        None => rest.len() == 3 && all_digits(rest),
    }
}

/// A timestamped backup path that sorts after every existing backup.
/// Same-millisecond tags get a `_NNNN` suffix, which sorts after the bare tag.
fn next_backup_path(layout: &StoreLayout) -> Result<PathBuf, StoreError> {
    let tag = Local::now().format(BACKUP_TAG_FORMAT).to_string();
    let base = format!("{}_{tag}", layout.interface);
    let newest = layout.timestamped_backups()?.pop();
    let shadowed = |path: &Path| {
        newest.as_deref().is_some_and(|newest| {
            newest >= path
                && newest
                    .file_name()
                    .and_then(|f| f.to_str())
                    .is_some_and(|f| f.starts_with(&base))
        })
    };

    let mut path = layout.backup_path(&tag);
    let mut n = 1u32;
    while path.exists() || shadowed(&path) {
        path = layout.backup_path(&format!("{tag}_{n:04}"));
        n += 1;
    }
    Ok(path)
}
