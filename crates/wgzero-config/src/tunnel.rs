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

use std::process::Command;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("not supported on this platform")]
    Unsupported,

    #[error("failed to run `{cmd}`: {source}")]
    Spawn { cmd: String, source: std::io::Error },

    #[error("`{cmd}` exited with {status}: {stderr}")]
    Command {
        cmd: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Brings the tunnel interface up and down. The engine only sequences these
/// calls around saves; it never inspects the running tunnel.
pub trait TunnelController {
    fn up(&self) -> Result<(), TunnelError>;
    fn down(&self) -> Result<(), TunnelError>;

    /// Down then up. A failing `down` (interface not running) is tolerated.
    fn reload(&self) -> Result<(), TunnelError> {
        if let Err(e) = self.down() {
            warn!(error = %e, "bringing the interface down failed, continuing");
        }
        self.up()
    }
}

#[cfg(target_os = "linux")]
pub type CurrentTunnel = WgQuick;

#[cfg(not(target_os = "linux"))]
pub type CurrentTunnel = StubTunnel;

// -- wg-quick ------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WgQuick {
    interface: String,
}

impl WgQuick {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    fn run(&self, action: &str) -> Result<(), TunnelError> {
        let cmd = format!("wg-quick {action} {}", self.interface);
        info!(interface = %self.interface, action, "running wg-quick");
        let output = Command::new("wg-quick")
            .args([action, self.interface.as_str()])
            .output()
            .map_err(|source| TunnelError::Spawn {
                cmd: cmd.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(TunnelError::Command {
                cmd,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl TunnelController for WgQuick {
    fn up(&self) -> Result<(), TunnelError> {
        self.run("up")
    }

    fn down(&self) -> Result<(), TunnelError> {
        self.run("down")
    }
}

// -- Stub for non-Linux --------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct StubTunnel;

impl StubTunnel {
    pub fn new(_interface: impl Into<String>) -> Self {
        Self
    }
}

impl TunnelController for StubTunnel {
    fn up(&self) -> Result<(), TunnelError> {
        Err(TunnelError::Unsupported)
    }

    fn down(&self) -> Result<(), TunnelError> {
        Err(TunnelError::Unsupported)
    }
}
