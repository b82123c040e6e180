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

use std::io::Write as _;
use std::process::{Command, Stdio};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to decode base64 key: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),

    #[error("failed to run `{cmd}`: {source}")]
    Spawn {
        cmd: &'static str,
        source: std::io::Error,
    },

    #[error("`{cmd}` exited with {status}: {stderr}")]
    Tool {
        cmd: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Source of WireGuard key material.
///
/// The engine treats every call as a black box that may be slow or fail; it
/// never derives keys on its own.
pub trait KeyGenerator {
    fn generate_private_key(&self) -> Result<String, KeyError>;
    fn public_key(&self, private_key: &str) -> Result<String, KeyError>;
    fn generate_preshared_key(&self) -> Result<String, KeyError>;
}

impl<K: KeyGenerator + ?Sized> KeyGenerator for &K {
    fn generate_private_key(&self) -> Result<String, KeyError> {
        (**self).generate_private_key()
    }

    fn public_key(&self, private_key: &str) -> Result<String, KeyError> {
        (**self).public_key(private_key)
    }

    fn generate_preshared_key(&self) -> Result<String, KeyError> {
        (**self).generate_preshared_key()
    }
}

pub fn decode_key(b64: &str) -> Result<[u8; 32], KeyError> {
    let bytes = BASE64.decode(b64.trim())?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyError::InvalidLength(len))
}

// -- In-process x25519 ---------------------------------------------------------

/// Curve25519 keys computed in-process, base64 encoded like `wg genkey`.
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519Keys;

impl KeyGenerator for X25519Keys {
    fn generate_private_key(&self) -> Result<String, KeyError> {
        let secret = StaticSecret::random_from_rng(&mut OsRng);
        Ok(BASE64.encode(secret.to_bytes()))
    }

    fn public_key(&self, private_key: &str) -> Result<String, KeyError> {
        let secret = StaticSecret::from(decode_key(private_key)?);
        let public = PublicKey::from(&secret);
        Ok(BASE64.encode(public.as_bytes()))
    }

    fn generate_preshared_key(&self) -> Result<String, KeyError> {
        let mut psk = [0u8; 32];
        OsRng.fill_bytes(&mut psk);
        Ok(BASE64.encode(psk))
    }
}

// -- `wg` command line tool ----------------------------------------------------

/// Shells out to the `wg` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgTool;

impl WgTool {
    fn run(cmd: &'static str, args: &[&str], stdin: Option<&str>) -> Result<String, KeyError> {
        debug!(cmd, "invoking wg tool");
        let mut child = Command::new("wg")
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| KeyError::Spawn { cmd, source })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .and_then(|_| pipe.write_all(b"\n"))
                .map_err(|source| KeyError::Spawn { cmd, source })?;
        }

        let output = child
            .wait_with_output()
            .map_err(|source| KeyError::Spawn { cmd, source })?;
        if !output.status.success() {
            return Err(KeyError::Tool {
                cmd,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl KeyGenerator for WgTool {
    fn generate_private_key(&self) -> Result<String, KeyError> {
        Self::run("wg genkey", &["genkey"], None)
    }

    fn public_key(&self, private_key: &str) -> Result<String, KeyError> {
        Self::run("wg pubkey", &["pubkey"], Some(private_key))
    }

    fn generate_preshared_key(&self) -> Result<String, KeyError> {
        Self::run("wg genpsk", &["genpsk"], None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn x25519_public_key_is_deterministic() {
        let keys = X25519Keys;
        let private = keys.generate_private_key().unwrap();
        assert_eq!(decode_key(&private).unwrap().len(), 32);
        let a = keys.public_key(&private).unwrap();
        let b = keys.public_key(&private).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, private);
    }

    #[test]
    fn x25519_known_vector() {
        // RFC 7748 section 6.1, Alice's key pair
        let private = BASE64.encode([
            0x77, 0x07, 0x6d, 0x0a, 0x73, 0x18, 0xa5, 0x7d, 0x3c, 0x16, 0xc1, 0x72, 0x51, 0xb2,
            0x66, 0x45, 0xdf, 0x4c, 0x2f, 0x87, 0xeb, 0xc0, 0x99, 0x2a, 0xb1, 0x77, 0xfb, 0xa5,
            0x1d, 0xb9, 0x2c, 0x2a,
        ]);
        let expected = BASE64.encode([
            0x85, 0x20, 0xf0, 0x09, 0x89, 0x30, 0xa7, 0x54, 0x74, 0x8b, 0x7d, 0xdc, 0xb4, 0x3e,
            0xf7, 0x5a, 0x0d, 0xbf, 0x3a, 0x0d, 0x26, 0x38, 0x1a, 0xf4, 0xeb, 0xa4, 0xa9, 0x8e,
            0xaa, 0x9b, 0x4e, 0x6a,
        ]);
        assert_eq!(X25519Keys.public_key(&private).unwrap(), expected);
    }

    #[test_case("not base64!!" ; "garbage")]
    #[test_case("AAAA" ; "too short")]
    fn invalid_private_key_is_rejected(input: &str) {
        assert!(X25519Keys.public_key(input).is_err());
    }

    #[test]
    fn preshared_keys_differ() {
        let a = X25519Keys.generate_preshared_key().unwrap();
        let b = X25519Keys.generate_preshared_key().unwrap();
        assert_ne!(a, b);
    }
}
