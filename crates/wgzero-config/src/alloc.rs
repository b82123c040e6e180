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

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use thiserror::Error;
use tracing::debug;

use crate::record::{InterfaceRecord, PeerRecord, check_cidr};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("interface has no address to allocate from")]
    NoInterfaceAddress,

    #[error("interface address is not a valid CIDR: '{0}'")]
    InvalidInterfaceAddress(String),

    #[error("no free address left in {0}")]
    NetworkFull(IpNetwork),
}

/// The lowest free host address in the interface's first network, as a
/// single-host network (`/32` or `/128`).
///
/// An address is taken when it is an interface address or falls inside any
/// peer route narrower than the interface network, whether or not that route
/// is currently soft-disabled. Taken ranges are skipped whole, so the cost is
/// bounded by the number of routes rather than the size of the network.
pub fn next_peer_address(
    interface: &InterfaceRecord,
    peers: &[PeerRecord],
) -> Result<IpNetwork, AllocError> {
    let addresses = interface.addresses().unwrap_or_default();
    let first = addresses.first().ok_or(AllocError::NoInterfaceAddress)?;
    let network =
        check_cidr(first).map_err(|_| AllocError::InvalidInterfaceAddress(first.clone()))?;
    let same_family = |n: &IpNetwork| n.is_ipv4() == network.is_ipv4();

    let mut taken: Vec<(u128, u128)> = addresses
        .iter()
        .filter_map(|a| check_cidr(a).ok())
        .filter(|n| same_family(n))
        .map(|n| span(host(n.ip())))
        .collect();
    for peer in peers {
        for route in peer.allowed_ips().unwrap_or_default() {
            match check_cidr(&route) {
                Ok(route) if route.prefix() > network.prefix() && same_family(&route) => {
                    taken.push(span(route))
                }
                Ok(_) => {}
                Err(_) => debug!(route = %route, "ignoring unparseable peer route"),
            }
        }
    }
    taken.sort_unstable();

    let full = AllocError::NetworkFull(network);
    let (mut candidate, last) = usable_span(network).ok_or(full.clone())?;
    for (lo, hi) in taken {
        if lo > candidate {
            break;
        }
        if hi >= candidate {
            candidate = hi.checked_add(1).ok_or(full.clone())?;
        }
    }
    if candidate > last {
        return Err(full);
    }
    Ok(host(to_ip(candidate, network.is_ipv4())))
}

/// First and last address of `network` as integers.
fn span(network: IpNetwork) -> (u128, u128) {
    match network {
        IpNetwork::V4(v4) => {
            let base = u32::from(v4.network());
            (u128::from(base), u128::from(base | !u32::from(v4.mask())))
        }
        IpNetwork::V6(v6) => {
            let base = u128::from(v6.network());
            (base, base | !u128::from(v6.mask()))
        }
    }
}

/// Assignable range: IPv4 networks wider than `/31` lose their network and
/// broadcast addresses, IPv6 networks their subnet-router anycast address.
fn usable_span(network: IpNetwork) -> Option<(u128, u128)> {
    let (first, last) = span(network);
    let (first, last) = match network {
        IpNetwork::V4(v4) if v4.prefix() < 31 => (first + 1, last - 1),
        IpNetwork::V4(_) => (first, last),
        IpNetwork::V6(_) => (first.checked_add(1)?, last),
    };
    (first <= last).then_some((first, last))
}

fn to_ip(value: u128, v4: bool) -> IpAddr {
    match u32::try_from(value) {
        Ok(v) if v4 => IpAddr::V4(Ipv4Addr::from(v)),
        _ => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

fn host(ip: IpAddr) -> IpNetwork {
    IpNetwork::from(ip)
}
