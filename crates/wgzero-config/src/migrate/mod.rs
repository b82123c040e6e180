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

//! Versioned, one-time document upgrades.
//!
//! The interface's `#!WGZERO_Version` metadata counts how many registered
//! migrations the document has been through. Registration order is the
//! execution order.

mod m0001_old_fields;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::keys::KeyGenerator;
use crate::record::{InterfaceRecord, PeerRecord};
use crate::store::{ConfigStore, StoreError};

pub use m0001_old_fields::{AmbiguousLegacyFlag, MigrateOldFields};

pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// One schema upgrade over the loaded records.
pub trait Migration {
    fn name(&self) -> &str;

    /// Must leave no trace of the keys it replaces when it succeeds.
    fn apply(
        &self,
        interface: &mut InterfaceRecord,
        peers: &mut [PeerRecord],
    ) -> Result<(), StepError>;
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration #{index} ({name}) failed: {source}")]
    Step {
        index: usize,
        name: String,
        #[source]
        source: StepError,
    },

    #[error("migration #{index} ({name}) failed, configuration reverted: {source}")]
    RolledBack {
        index: usize,
        name: String,
        #[source]
        source: StepError,
        /// Set when restoring the pre-migration backup failed as well.
        revert: Option<StoreError>,
    },

    #[error("pre-migration backup failed: {0}")]
    Backup(#[source] StoreError),

    #[error("saving the migrated configuration failed: {0}")]
    Persist(#[source] StoreError),
}

impl MigrationError {
    /// Registration index of the migration that failed, if a step failed.
    pub fn index(&self) -> Option<usize> {
        match self {
            MigrationError::Step { index, .. } | MigrationError::RolledBack { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }
}

/// How a legacy boolean that is neither `true` nor `false` is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LegacyFlagPolicy {
    #[default]
    AssumeEnabled,
    AssumeDisabled,
    /// Fail the migration and leave the decision to the operator.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown legacy flag policy '{0}' (expected assume-enabled, assume-disabled or reject)")]
pub struct UnknownPolicy(pub String);

impl FromStr for LegacyFlagPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assume-enabled" => Ok(LegacyFlagPolicy::AssumeEnabled),
            "assume-disabled" => Ok(LegacyFlagPolicy::AssumeDisabled),
            "reject" => Ok(LegacyFlagPolicy::Reject),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    /// Names of the migrations applied, in order.
    pub applied: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

pub struct MigrationRunner {
    migrations: Vec<Box<dyn Migration>>,
    persist: bool,
}

impl MigrationRunner {
    /// Migrations run in the order given. Results stay in memory unless
    /// `persist` is enabled.
    pub fn new(migrations: Vec<Box<dyn Migration>>) -> Self {
        Self {
            migrations,
            persist: false,
        }
    }

    /// Every migration shipped with this crate.
    pub fn standard(policy: LegacyFlagPolicy) -> Self {
        Self::new(vec![Box::new(MigrateOldFields::new(policy))])
    }

    /// Back up before migrating, save afterwards and revert on failure.
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.migrations.iter().map(|m| m.name())
    }

    /// The version a fully migrated document carries.
    pub fn current_version(&self) -> u32 {
        self.migrations.len() as u32
    }

    /// Apply every migration from the document's recorded version on.
    ///
    /// On failure the remaining migrations are skipped and the in-memory
    /// records are in an unknown partial state; reload before using them.
    #[tracing::instrument(skip_all, fields(path = %store.path().display()))]
    pub fn execute<K: KeyGenerator>(
        &self,
        store: &mut ConfigStore<K>,
    ) -> Result<MigrationReport, MigrationError> {
        let from_version = store.interface().config_version();
        let total = self.current_version();
        debug!(from_version, total, "checking migrations");

        if from_version >= total {
            if from_version > total {
                warn!(
                    from_version,
                    total, "document is newer than the known migrations, leaving it alone"
                );
            } else {
                debug!("no migrations pending");
            }
            return Ok(MigrationReport {
                from_version,
                to_version: from_version,
                applied: vec![],
            });
        }

        if self.persist {
            store.backup_fs_copy().map_err(MigrationError::Backup)?;
        }

        let mut applied = Vec::new();
        for (index, migration) in self
            .migrations
            .iter()
            .enumerate()
            .skip(from_version as usize)
        {
            info!(index, name = migration.name(), "applying migration");
            let (interface, peers) = store.records_mut();
            if let Err(source) = migration.apply(interface, peers) {
                return Err(self.fail(store, index, migration.name(), source));
            }
            applied.push(migration.name().to_string());
        }

        store.interface_mut().set_config_version(total);
        if self.persist {
            if let Err(e) = store.save() {
                error!(error = %e, "failed to save migrated configuration");
                if let Err(revert) = store.revert() {
                    error!(error = %revert, "revert after failed save also failed");
                }
                return Err(MigrationError::Persist(e));
            }
        }

        info!(
            from_version,
            to_version = total,
            applied = applied.len(),
            persisted = self.persist,
            "migrations complete"
        );
        Ok(MigrationReport {
            from_version,
            to_version: total,
            applied,
        })
    }

    fn fail<K: KeyGenerator>(
        &self,
        store: &ConfigStore<K>,
        index: usize,
        name: &str,
        source: StepError,
    ) -> MigrationError {
        error!(index, name, error = %source, "migration failed");
        let name = name.to_string();
        if !self.persist {
            return MigrationError::Step {
                index,
                name,
                source,
            };
        }

        let revert = store.revert().err();
        match &revert {
            Some(e) => error!(error = %e, "failed to revert to pre-migration backup"),
            None => warn!("reverted to pre-migration backup"),
        }
        MigrationError::RolledBack {
            index,
            name,
            source,
            revert,
        }
    }
}
