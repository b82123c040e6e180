//! wgzero-config: persistence and migration engine for wg-quick style
//! configuration files.
//!
//! The on-disk document stays parseable by `wg-quick`; application-only values
//! live in `#!` metadata comments and soft-disabled lines in `#$` comments.

pub mod alloc;
pub mod client;
pub mod ini;
pub mod keys;
pub mod migrate;
pub mod record;
pub mod settings;
pub mod store;
pub mod tunnel;

pub use keys::{KeyError, KeyGenerator, WgTool, X25519Keys};
pub use migrate::{LegacyFlagPolicy, MigrationError, MigrationReport, MigrationRunner};
pub use record::{Hook, InterfaceRecord, PeerRecord, RecordDefaults, ValidationError};
pub use settings::{Settings, SettingsError};
pub use store::{BackupRetention, ConfigStore, InitOptions, StoreError, StoreLayout, StoreOptions};
pub use tunnel::{CurrentTunnel, TunnelController, TunnelError};
