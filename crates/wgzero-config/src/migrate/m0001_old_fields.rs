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

use thiserror::Error;
use tracing::{info, warn};

use super::{LegacyFlagPolicy, Migration, StepError};
use crate::record::{InterfaceRecord, PeerRecord};

const OLD_PRIVATE_KEY: &str = "privateKey";
const OLD_ENABLED: &str = "enabled";
const PRIVATE_KEY: &str = "PrivateKey";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("peer {peer}: legacy enabled value '{value}' is neither true nor false")]
pub struct AmbiguousLegacyFlag {
    pub peer: String,
    pub value: String,
}

/// Renames the lowercase peer metadata keys `privateKey` and `enabled` to
/// their canonical spelling.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOldFields {
    policy: LegacyFlagPolicy,
}

impl MigrateOldFields {
    pub fn new(policy: LegacyFlagPolicy) -> Self {
        Self { policy }
    }

    fn legacy_enabled(&self, peer: &PeerRecord, raw: &str) -> Result<bool, AmbiguousLegacyFlag> {
        match raw {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => {
                let name = peer.name().unwrap_or_default();
                match self.policy {
                    LegacyFlagPolicy::AssumeEnabled => {
                        warn!(peer = %name, value = %raw, "ambiguous legacy enabled value, assuming true");
                        Ok(true)
                    }
                    LegacyFlagPolicy::AssumeDisabled => {
                        warn!(peer = %name, value = %raw, "ambiguous legacy enabled value, assuming false");
                        Ok(false)
                    }
                    LegacyFlagPolicy::Reject => Err(AmbiguousLegacyFlag {
                        peer: name.to_string(),
                        value: raw.to_string(),
                    }),
                }
            }
        }
    }
}

impl Migration for MigrateOldFields {
    fn name(&self) -> &str {
        "0001-migrate-old-fields"
    }

    fn apply(
        &self,
        _interface: &mut InterfaceRecord,
        peers: &mut [PeerRecord],
    ) -> Result<(), StepError> {
        for peer in peers {
            if let Some(old) = peer.section().metadata(OLD_PRIVATE_KEY).map(str::to_string) {
                info!(peer = ?peer.name(), "migrating old style private key");
                let section = peer.section_mut();
                section.set_metadata(PRIVATE_KEY, old);
                section.remove_metadata(OLD_PRIVATE_KEY);
            }

            if let Some(old) = peer.section().metadata(OLD_ENABLED).map(str::to_string) {
                info!(peer = ?peer.name(), "migrating old style enabled flag");
                let enabled = self.legacy_enabled(peer, &old)?;
                peer.section_mut().remove_metadata(OLD_ENABLED);
                peer.set_enabled(enabled);
            }
        }
        Ok(())
    }
}
