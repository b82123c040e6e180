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

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::client::ClientOptions;
use crate::ini::split_list;
use crate::migrate::{LegacyFlagPolicy, MigrationRunner, UnknownPolicy};
use crate::record::RecordDefaults;
use crate::store::{BackupRetention, InitOptions, StoreLayout, StoreOptions};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    #[error(transparent)]
    Policy(#[from] UnknownPolicy),
}

/// Engine settings: an optional TOML file, then `WG_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub interface: String,
    /// Uplink the post-up/post-down forwarding rules route through.
    pub internet_interface: String,
    pub config_dir: PathBuf,
    pub backup_dir_name: String,
    pub host: String,
    pub port: u16,
    pub mtu: Option<u16>,
    /// Interface address, also the pool peers are allocated from.
    pub address_space: String,
    pub default_dns: Vec<String>,
    /// Routes pushed to clients.
    pub allowed_ips: Vec<String>,
    /// Seconds; 0 disables keepalive in client configs.
    pub persistent_keepalive: u16,
    pub pre_up: Vec<String>,
    /// Unset means the default forwarding rules; an empty list means none.
    pub post_up: Option<Vec<String>>,
    pub pre_down: Vec<String>,
    /// Unset means the rules undoing the default post-up rules.
    pub post_down: Option<Vec<String>>,
    /// Back up before migrating, persist after, revert on failure.
    pub migration_save: bool,
    /// Timestamped backups kept after each backup; unset keeps all.
    pub backup_trim_keep: Option<usize>,
    pub legacy_flag_policy: LegacyFlagPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interface: "wg0".to_string(),
            internet_interface: "eth0".to_string(),
            config_dir: PathBuf::from("/etc/wireguard"),
            backup_dir_name: StoreLayout::DEFAULT_BACKUP_DIR.to_string(),
            host: "127.0.0.1".to_string(),
            port: 51820,
            mtu: None,
            address_space: "10.1.3.1/24".to_string(),
            default_dns: vec!["1.1.1.1".to_string()],
            allowed_ips: vec!["0.0.0.0/0".to_string(), "::/0".to_string()],
            persistent_keepalive: 0,
            pre_up: vec![],
            post_up: None,
            pre_down: vec![],
            post_down: None,
            migration_save: false,
            backup_trim_keep: None,
            legacy_flag_policy: LegacyFlagPolicy::default(),
        }
    }
}

impl Settings {
    /// Read settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        debug!(path = %path.display(), "loading settings");
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let settings: Settings = toml::from_str(&contents)?;
                info!(path = %path.display(), interface = %settings.interface, "loaded settings");
                Ok(settings)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "settings file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(SettingsError::Read(e)),
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), SettingsError> {
        self.apply_overrides(|var| env::var(var).ok())
    }

    /// Apply overrides from `lookup`, keyed by `WG_*` variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WG_INTERFACE") {
            self.interface = v;
        }
        if let Some(v) = lookup("WG_INTERNET_INTERFACE") {
            self.internet_interface = v;
        }
        if let Some(v) = lookup("WG_PATH") {
            self.config_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("WG_BACKUP_DIR") {
            self.backup_dir_name = v;
        }
        if let Some(v) = lookup("WG_HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("WG_PORT") {
            self.port = parse_env("WG_PORT", &v)?;
        }
        if let Some(v) = lookup("WG_MTU") {
            self.mtu = optional(&v).map(|v| parse_env("WG_MTU", v)).transpose()?;
        }
        if let Some(v) = lookup("WG_ADDRESS_SPACE") {
            self.address_space = v;
        }
        if let Some(v) = lookup("WG_DEFAULT_DNS") {
            self.default_dns = split_list(&v);
        }
        if let Some(v) = lookup("WG_ALLOWED_IPS") {
            self.allowed_ips = split_list(&v);
        }
        if let Some(v) = lookup("WG_PERSISTENT_KEEPALIVE") {
            self.persistent_keepalive = parse_env("WG_PERSISTENT_KEEPALIVE", &v)?;
        }
        if let Some(v) = lookup("WG_PRE_UP") {
            self.pre_up = hook_lines(&v);
        }
        if let Some(v) = lookup("WG_PRE_DOWN") {
            self.pre_down = hook_lines(&v);
        }
        // an empty value falls back to the default rules
        if let Some(v) = lookup("WG_POST_UP") {
            self.post_up = optional(&v).map(hook_lines);
        }
        if let Some(v) = lookup("WG_POST_DOWN") {
            self.post_down = optional(&v).map(hook_lines);
        }
        if let Some(v) = lookup("WG_MIGRATION_SAVE") {
            self.migration_save = parse_bool("WG_MIGRATION_SAVE", &v)?;
        }
        if let Some(v) = lookup("WG_BACKUP_TRIM_KEEP") {
            self.backup_trim_keep = optional(&v)
                .map(|v| parse_env("WG_BACKUP_TRIM_KEEP", v))
                .transpose()?;
        }
        if let Some(v) = lookup("WG_LEGACY_FLAG_POLICY") {
            self.legacy_flag_policy = v.parse()?;
        }
        Ok(())
    }

    pub fn layout(&self) -> StoreLayout {
        StoreLayout {
            backup_dir_name: self.backup_dir_name.clone(),
            ..StoreLayout::new(&self.config_dir, &self.interface)
        }
    }

    pub fn record_defaults(&self) -> RecordDefaults {
        RecordDefaults {
            interface_name: self.interface.clone(),
            host: self.host.clone(),
            ..RecordDefaults::default()
        }
    }

    pub fn retention(&self) -> BackupRetention {
        match self.backup_trim_keep {
            Some(keep) => BackupRetention::KeepLatest(keep),
            None => BackupRetention::Unbounded,
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            layout: self.layout(),
            defaults: self.record_defaults(),
            retention: self.retention(),
        }
    }

    /// The interface keeps the full address space CIDR; its host part is the
    /// server's tunnel address.
    pub fn init_options(&self) -> InitOptions {
        InitOptions {
            addresses: vec![self.address_space.clone()],
            listen_port: self.port,
            dns: vec![],
            mtu: self.mtu,
            pre_up: self.pre_up.clone(),
            post_up: self.post_up_commands(),
            pre_down: self.pre_down.clone(),
            post_down: self.post_down_commands(),
        }
    }

    /// Configured post-up commands, or rules that accept the listen port and
    /// forward and masquerade tunnel traffic through `internet_interface`.
    pub fn post_up_commands(&self) -> Vec<String> {
        self.post_up
            .clone()
            .unwrap_or_else(|| self.forwarding_rules("-I", "-A"))
    }

    /// Configured post-down commands, or rules removing the default post-up
    /// rules.
    pub fn post_down_commands(&self) -> Vec<String> {
        self.post_down
            .clone()
            .unwrap_or_else(|| self.forwarding_rules("-D", "-D"))
    }

    fn forwarding_rules(&self, chain_op: &str, nat_op: &str) -> Vec<String> {
        let (port, wan, wg) = (self.port, &self.internet_interface, &self.interface);
        vec![
            format!("iptables {chain_op} INPUT -p udp --dport {port} -j ACCEPT"),
            format!("iptables {chain_op} FORWARD -i {wan} -o {wg} -j ACCEPT"),
            format!("iptables {chain_op} FORWARD -i {wg} -j ACCEPT"),
            format!("iptables -t nat {nat_op} POSTROUTING -o {wan} -j MASQUERADE"),
        ]
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            dns: self.default_dns.clone(),
            allowed_ips: self.allowed_ips.clone(),
            persistent_keepalive: (self.persistent_keepalive > 0)
                .then_some(self.persistent_keepalive),
            mtu: self.mtu,
        }
    }

    pub fn migration_runner(&self) -> MigrationRunner {
        MigrationRunner::standard(self.legacy_flag_policy).persist(self.migration_save)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(SettingsError::InvalidEnv {
            var,
            value: value.to_string(),
        }),
    }
}

/// Empty means unset.
fn optional(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// One hook command per non-empty line.
fn hook_lines(value: &str) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
