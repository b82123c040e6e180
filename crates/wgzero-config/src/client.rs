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

use std::net::Ipv6Addr;

use thiserror::Error;
use tracing::debug;

use crate::ini;
use crate::record::{InterfaceRecord, PeerRecord, ValidationError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("peer has no stored private key; its configuration cannot be rendered")]
    MissingPeerPrivateKey,

    #[error("peer has no allowed IPs to use as its address")]
    MissingPeerAddress,

    #[error("interface has no {0}")]
    MissingInterfaceField(&'static str),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Client-side settings that are not stored in the server document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub dns: Vec<String>,
    pub allowed_ips: Vec<String>,
    pub persistent_keepalive: Option<u16>,
    pub mtu: Option<u16>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dns: vec!["1.1.1.1".to_string()],
            allowed_ips: vec!["0.0.0.0/0".to_string(), "::/0".to_string()],
            persistent_keepalive: None,
            mtu: None,
        }
    }
}

/// Render the wg-quick document a peer's device imports.
///
/// The peer's routes on the server become the client's addresses and the
/// interface becomes the client's only peer, reached at `Host:ListenPort`.
pub fn render_client_config(
    interface: &InterfaceRecord,
    peer: &PeerRecord,
    options: &ClientOptions,
) -> Result<String, ClientError> {
    let private_key = peer.private_key().ok_or(ClientError::MissingPeerPrivateKey)?;
    let addresses = peer.allowed_ips().ok_or(ClientError::MissingPeerAddress)?;
    let server_key = interface
        .public_key()
        .ok_or(ClientError::MissingInterfaceField("public key"))?;
    let host = interface
        .host_address()
        .ok_or(ClientError::MissingInterfaceField("host address"))?;
    let port = interface
        .listen_port()
        .ok_or(ClientError::MissingInterfaceField("listen port"))?;

    let mut local = InterfaceRecord::new();
    if let Some(name) = peer.name() {
        local.section_mut().add_comment(format!(" {name}"));
    }
    local.set_private_key(private_key)?;
    local.set_addresses(&addresses)?;
    local.set_dns(&options.dns)?;
    local.set_mtu(options.mtu.map(i64::from))?;

    let mut remote = PeerRecord::new();
    if let Some(name) = interface.name() {
        remote.section_mut().add_comment(format!(" {name}"));
    }
    remote.set_public_key(server_key)?;
    remote.set_preshared_key(peer.preshared_key())?;
    remote.set_allowed_ips(&options.allowed_ips)?;
    remote.set_endpoint(Some(endpoint(host, port).as_str()))?;
    remote.set_persistent_keepalive(options.persistent_keepalive);

    debug!(peer = ?peer.name(), "rendered client configuration");
    Ok(ini::serialize([local.section(), remote.section()]))
}

fn endpoint(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
