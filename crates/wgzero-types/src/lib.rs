//! wgzero-types: Shared summary types for the wgzero ecosystem.
//!
//! These are the read-only shapes handed to outer layers (REST handlers, the
//! CLI, the web frontend). They never carry private or preshared keys, and
//! the interface summary omits lifecycle hook commands.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};

/// Public view of the local tunnel endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSummary {
    /// Display label (defaults to "Server").
    pub name: Option<String>,
    /// Tunnel interface name, e.g. `wg0`.
    pub interface: Option<String>,
    /// Addresses in CIDR notation.
    pub addresses: Vec<String>,
    /// UDP port the tunnel listens on.
    pub listen_port: Option<u16>,
    /// Public key derived from the interface private key.
    pub public_key: Option<String>,
    /// Externally advertised endpoint host.
    pub host: Option<String>,
    /// DNS servers announced to peers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,
    /// Interface MTU, when pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
    /// Migration watermark (0 means never migrated).
    pub config_version: u32,
}

/// Public view of one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    /// Display label.
    pub name: Option<String>,
    /// WireGuard public key, the peer's identity.
    pub public_key: Option<String>,
    /// Routes assigned to the peer.
    pub allowed_ips: Vec<String>,
    /// Whether the peer's routes are active.
    pub enabled: bool,
    /// Last configured endpoint (host:port).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Keepalive interval in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
    /// Whether a preshared key is configured.
    pub has_preshared_key: bool,
    /// Whether the peer's private key is stored server side.
    pub has_private_key: bool,
}

/// Interface plus all peers, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    /// The single interface definition.
    pub interface: InterfaceSummary,
    /// Every peer definition.
    pub peers: Vec<PeerSummary>,
}
