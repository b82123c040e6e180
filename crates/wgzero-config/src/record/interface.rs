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

use tracing::debug;
use wgzero_types::InterfaceSummary;

use super::{
    RecordDefaults, ValidationError, check_cidrs, check_members, check_port, check_text,
    parse_port,
};
use crate::ini::{Section, join_list, split_list};
use crate::keys::{KeyError, KeyGenerator};

const ADDRESS: &str = "Address";
const LISTEN_PORT: &str = "ListenPort";
const PRIVATE_KEY: &str = "PrivateKey";
const DNS: &str = "DNS";
const MTU: &str = "MTU";
const TABLE: &str = "Table";
const SAVE_CONFIG: &str = "SaveConfig";

const META_HOST: &str = "Host";
const META_INTERFACE: &str = "Interface";
const META_NAME: &str = "Name";
const META_PUBLIC_KEY: &str = "PublicKey";
const META_CONFIG_VERSION: &str = "WGZERO_Version";

/// Lifecycle hook commands. Each command is its own `key = command` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    PreUp,
    PostUp,
    PreDown,
    PostDown,
}

impl Hook {
    pub const ALL: [Hook; 4] = [Hook::PreUp, Hook::PostUp, Hook::PreDown, Hook::PostDown];

    pub fn key(self) -> &'static str {
        match self {
            Hook::PreUp => "PreUp",
            Hook::PostUp => "PostUp",
            Hook::PreDown => "PreDown",
            Hook::PostDown => "PostDown",
        }
    }
}

/// The local tunnel endpoint: its keys, addresses, port and hooks.
///
/// Application-only values (display name, advertised host, cached public key,
/// migration watermark) are stored as metadata entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    section: Section,
}

impl Default for InterfaceRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceRecord {
    pub const SECTION: &'static str = "Interface";

    /// An empty `[Interface]` section. Defaults are not applied.
    pub fn new() -> Self {
        Self {
            section: Section::new(Self::SECTION),
        }
    }

    pub fn from_section(section: Section) -> Self {
        Self { section }
    }

    pub fn section(&self) -> &Section {
        &self.section
    }

    pub fn section_mut(&mut self) -> &mut Section {
        &mut self.section
    }

    pub fn into_section(self) -> Section {
        self.section
    }

    // -- Tunnel fields -------------------------------------------------------

    pub fn addresses(&self) -> Option<Vec<String>> {
        self.section.field(ADDRESS).map(split_list)
    }

    pub fn set_addresses<S: AsRef<str>>(&mut self, addresses: &[S]) -> Result<(), ValidationError> {
        check_cidrs(ADDRESS, addresses)?;
        self.section.set_field(ADDRESS, join_list(addresses));
        Ok(())
    }

    /// `None` when absent or not a valid port.
    pub fn listen_port(&self) -> Option<u16> {
        parse_port(self.section.field(LISTEN_PORT)?).ok()
    }

    pub fn set_listen_port(&mut self, port: i64) -> Result<(), ValidationError> {
        let port = check_port(port)?;
        self.section.set_field(LISTEN_PORT, port.to_string());
        Ok(())
    }

    pub fn private_key(&self) -> Option<&str> {
        self.section.field(PRIVATE_KEY)
    }

    /// The cached public key goes stale until the next `enforce_fields`.
    pub fn set_private_key(&mut self, key: &str) -> Result<(), ValidationError> {
        check_text(PRIVATE_KEY, key)?;
        self.section.set_field(PRIVATE_KEY, key.trim());
        Ok(())
    }

    pub fn dns(&self) -> Option<Vec<String>> {
        self.section.field(DNS).map(split_list)
    }

    /// An empty list removes the `DNS` line.
    pub fn set_dns<S: AsRef<str>>(&mut self, servers: &[S]) -> Result<(), ValidationError> {
        check_members(DNS, servers)?;
        if servers.is_empty() {
            self.section.remove_field(DNS);
        } else {
            self.section.set_field(DNS, join_list(servers));
        }
        Ok(())
    }

    pub fn mtu(&self) -> Option<u16> {
        self.section.field(MTU)?.parse().ok()
    }

    pub fn set_mtu(&mut self, mtu: Option<i64>) -> Result<(), ValidationError> {
        match mtu {
            Some(mtu) => {
                if !(68..=65535).contains(&mtu) {
                    return Err(ValidationError::MtuOutOfRange(mtu));
                }
                self.section.set_field(MTU, mtu.to_string());
            }
            None => {
                self.section.remove_field(MTU);
            }
        }
        Ok(())
    }

    /// Routing table: `off`, `auto` or a table id.
    pub fn table(&self) -> Option<&str> {
        self.section.field(TABLE)
    }

    pub fn set_table(&mut self, table: Option<&str>) -> Result<(), ValidationError> {
        match table {
            Some(table) => {
                check_text(TABLE, table)?;
                self.section.set_field(TABLE, table.trim());
            }
            None => {
                self.section.remove_field(TABLE);
            }
        }
        Ok(())
    }

    pub fn save_config(&self) -> Option<bool> {
        self.section.field(SAVE_CONFIG).map(|v| v == "true")
    }

    pub fn set_save_config(&mut self, save: bool) {
        self.section
            .set_field(SAVE_CONFIG, if save { "true" } else { "false" });
    }

    pub fn hook(&self, hook: Hook) -> Option<Vec<String>> {
        let commands: Vec<String> = self
            .section
            .fields(hook.key())
            .into_iter()
            .map(str::to_string)
            .collect();
        (!commands.is_empty()).then_some(commands)
    }

    /// Commands are passed through verbatim; an empty list removes the hook.
    pub fn set_hook<S: AsRef<str>>(&mut self, hook: Hook, commands: &[S]) -> Result<(), ValidationError> {
        for command in commands {
            check_text(hook.key(), command.as_ref())?;
        }
        self.section
            .set_fields(hook.key(), commands.iter().map(|c| c.as_ref().trim().to_string()));
        Ok(())
    }

    // -- Application metadata ------------------------------------------------

    /// Endpoint host advertised to peers.
    pub fn host_address(&self) -> Option<&str> {
        self.section.metadata(META_HOST)
    }

    pub fn set_host_address(&mut self, host: &str) -> Result<(), ValidationError> {
        check_text(META_HOST, host)?;
        self.section.set_metadata(META_HOST, host.trim());
        Ok(())
    }

    pub fn interface_name(&self) -> Option<&str> {
        self.section.metadata(META_INTERFACE)
    }

    pub fn set_interface_name(&mut self, name: &str) -> Result<(), ValidationError> {
        check_text(META_INTERFACE, name)?;
        self.section.set_metadata(META_INTERFACE, name.trim());
        Ok(())
    }

    pub fn name(&self) -> Option<&str> {
        self.section.metadata(META_NAME)
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), ValidationError> {
        check_text(META_NAME, name)?;
        self.section.set_metadata(META_NAME, name.trim());
        Ok(())
    }

    /// Cached derivation of the private key; refreshed by `enforce_fields`.
    pub fn public_key(&self) -> Option<&str> {
        self.section.metadata(META_PUBLIC_KEY)
    }

    /// 0 means the document has never been migrated.
    pub fn config_version(&self) -> u32 {
        self.section
            .metadata(META_CONFIG_VERSION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_config_version(&mut self, version: u32) {
        self.section
            .set_metadata(META_CONFIG_VERSION, version.to_string());
    }

    /// Fill missing metadata and recompute the cached public key.
    ///
    /// Present values are kept, except `PublicKey` which always follows the
    /// current private key (and is dropped when there is none).
    pub fn enforce_fields<K: KeyGenerator>(
        &mut self,
        defaults: &RecordDefaults,
        keys: &K,
    ) -> Result<(), KeyError> {
        match self.private_key() {
            Some(private) => {
                let public = keys.public_key(private)?;
                if self.public_key() != Some(public.as_str()) {
                    debug!("refreshing cached interface public key");
                    self.section.set_metadata(META_PUBLIC_KEY, public);
                }
            }
            None => {
                self.section.remove_metadata(META_PUBLIC_KEY);
            }
        }

        if self.interface_name().is_none() {
            self.section
                .set_metadata(META_INTERFACE, defaults.interface_name.as_str());
        }
        if self.host_address().is_none() {
            debug!(host = %defaults.host, "enforcing interface host address");
            self.section.set_metadata(META_HOST, defaults.host.as_str());
        }
        if self.name().is_none() {
            debug!(name = %defaults.server_name, "enforcing interface name");
            self.section
                .set_metadata(META_NAME, defaults.server_name.as_str());
        }
        if !self.section.has_metadata(META_CONFIG_VERSION) {
            self.set_config_version(0);
        }
        Ok(())
    }

    pub fn summary(&self) -> InterfaceSummary {
        InterfaceSummary {
            name: self.name().map(str::to_string),
            interface: self.interface_name().map(str::to_string),
            addresses: self.addresses().unwrap_or_default(),
            listen_port: self.listen_port(),
            public_key: self.public_key().map(str::to_string),
            host: self.host_address().map(str::to_string),
            dns: self.dns().unwrap_or_default(),
            mtu: self.mtu(),
            config_version: self.config_version(),
        }
    }
}
