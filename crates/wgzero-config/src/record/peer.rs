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
use wgzero_types::PeerSummary;

use super::{RecordError, ValidationError, check_cidrs, check_text};
use crate::ini::{EntryKind, Section, join_list, split_list};
use crate::keys::KeyGenerator;

const PUBLIC_KEY: &str = "PublicKey";
const ALLOWED_IPS: &str = "AllowedIPs";
const PRESHARED_KEY: &str = "PresharedKey";
const ENDPOINT: &str = "Endpoint";
const PERSISTENT_KEEPALIVE: &str = "PersistentKeepalive";

const META_NAME: &str = "Name";
const META_ENABLED: &str = "Enabled";
const META_PRIVATE_KEY: &str = "PrivateKey";

/// A remote endpoint allowed to exchange traffic with the interface.
///
/// Disabling a peer comments out its `AllowedIPs` lines (`#$AllowedIPs = ...`)
/// so the tunneling subsystem stops routing to it while the values survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    section: Section,
}

impl Default for PeerRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRecord {
    pub const SECTION: &'static str = "Peer";

    pub fn new() -> Self {
        Self {
            section: Section::new(Self::SECTION),
        }
    }

    pub fn from_section(section: Section) -> Self {
        Self { section }
    }

    /// Build an enabled peer with fresh keys from the key generator.
    ///
    /// The private key is only kept (as metadata) when `persist_private_key`
    /// is set; without it no client configuration can be rendered later.
    pub fn generate<K: KeyGenerator, S: AsRef<str>>(
        keys: &K,
        name: &str,
        allowed_ips: &[S],
        with_preshared_key: bool,
        persist_private_key: bool,
    ) -> Result<Self, RecordError> {
        let private = keys.generate_private_key()?;
        let public = keys.public_key(&private)?;

        let mut peer = Self::new();
        peer.set_public_key(&public)?;
        peer.set_allowed_ips(allowed_ips)?;
        if with_preshared_key {
            peer.set_preshared_key(Some(keys.generate_preshared_key()?.as_str()))?;
        }
        peer.set_name(name)?;
        peer.set_enabled(true);
        if persist_private_key {
            peer.set_private_key(Some(private.as_str()))?;
        }
        Ok(peer)
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

    pub fn public_key(&self) -> Option<&str> {
        self.section.field(PUBLIC_KEY)
    }

    pub fn set_public_key(&mut self, key: &str) -> Result<(), ValidationError> {
        check_text(PUBLIC_KEY, key)?;
        self.section.set_field(PUBLIC_KEY, key.trim());
        Ok(())
    }

    /// Returned whether or not the routes are currently soft-disabled.
    pub fn allowed_ips(&self) -> Option<Vec<String>> {
        let entries = self.section.fields(ALLOWED_IPS);
        if entries.is_empty() {
            return None;
        }
        Some(entries.into_iter().flat_map(split_list).collect())
    }

    /// New routes inherit the peer's current enabled state.
    pub fn set_allowed_ips<S: AsRef<str>>(&mut self, ips: &[S]) -> Result<(), ValidationError> {
        check_cidrs(ALLOWED_IPS, ips)?;
        self.section.set_field(ALLOWED_IPS, join_list(ips));
        self.apply_enabled();
        Ok(())
    }

    pub fn preshared_key(&self) -> Option<&str> {
        self.section.field(PRESHARED_KEY)
    }

    pub fn set_preshared_key(&mut self, key: Option<&str>) -> Result<(), ValidationError> {
        self.set_optional_field(PRESHARED_KEY, key)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.section.field(ENDPOINT)
    }

    pub fn set_endpoint(&mut self, endpoint: Option<&str>) -> Result<(), ValidationError> {
        self.set_optional_field(ENDPOINT, endpoint)
    }

    pub fn persistent_keepalive(&self) -> Option<u16> {
        self.section.field(PERSISTENT_KEEPALIVE)?.parse().ok()
    }

    /// `None` or `Some(0)` removes the line (keepalive off).
    pub fn set_persistent_keepalive(&mut self, seconds: Option<u16>) {
        match seconds {
            Some(s) if s > 0 => self.section.set_field(PERSISTENT_KEEPALIVE, s.to_string()),
            _ => {
                self.section.remove_field(PERSISTENT_KEEPALIVE);
            }
        }
    }

    fn set_optional_field(
        &mut self,
        key: &'static str,
        value: Option<&str>,
    ) -> Result<(), ValidationError> {
        match value {
            Some(value) => {
                check_text(key, value)?;
                self.section.set_field(key, value.trim());
            }
            None => {
                self.section.remove_field(key);
            }
        }
        Ok(())
    }

    // -- Application metadata ------------------------------------------------

    pub fn name(&self) -> Option<&str> {
        self.section.metadata(META_NAME)
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), ValidationError> {
        check_text(META_NAME, name)?;
        self.section.set_metadata(META_NAME, name.trim());
        Ok(())
    }

    pub fn enabled(&self) -> Option<bool> {
        self.section.metadata(META_ENABLED).map(|v| v == "true")
    }

    /// Flip the `Enabled` flag and the enabled state of every `AllowedIPs`
    /// entry together.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.section
            .set_metadata(META_ENABLED, if enabled { "true" } else { "false" });
        self.apply_enabled();
    }

    /// Bring the `AllowedIPs` entries in line with the `Enabled` flag.
    /// Returns how many entries changed state.
    pub fn apply_enabled(&mut self) -> usize {
        let enabled = self.enabled().unwrap_or(true);
        let mut changed = 0;
        for entry in self.section.all_mut(EntryKind::Field, ALLOWED_IPS) {
            if entry.is_enabled() != enabled {
                entry.set_enabled(enabled);
                changed += 1;
            }
        }
        if changed > 0 {
            debug!(enabled, changed, "updated allowed ips state");
        }
        changed
    }

    /// Client private key, kept only if the operator opted to store it.
    pub fn private_key(&self) -> Option<&str> {
        self.section.metadata(META_PRIVATE_KEY)
    }

    pub fn set_private_key(&mut self, key: Option<&str>) -> Result<(), ValidationError> {
        match key {
            Some(key) => {
                check_text(META_PRIVATE_KEY, key)?;
                self.section.set_metadata(META_PRIVATE_KEY, key.trim());
            }
            None => {
                self.section.remove_metadata(META_PRIVATE_KEY);
            }
        }
        Ok(())
    }

    /// Fill `Name` and `Enabled` when missing and resync route state.
    pub fn enforce_fields(&mut self) {
        if self.name().is_none() {
            let name = format!("Unnamed Peer: '{}'", self.public_key().unwrap_or_default());
            debug!(name = %name, "enforcing peer name");
            self.section.set_metadata(META_NAME, name);
        }
        if self.enabled().is_none() {
            debug!(name = ?self.name(), "enforcing peer enabled flag");
            self.section.set_metadata(META_ENABLED, "true");
        }
        self.apply_enabled();
    }

    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            name: self.name().map(str::to_string),
            public_key: self.public_key().map(str::to_string),
            allowed_ips: self.allowed_ips().unwrap_or_default(),
            enabled: self.enabled().unwrap_or(true),
            endpoint: self.endpoint().map(str::to_string),
            persistent_keepalive: self.persistent_keepalive(),
            has_preshared_key: self.preshared_key().is_some(),
            has_private_key: self.private_key().is_some(),
        }
    }
}
