//! Typed views over `[Interface]` and `[Peer]` sections.
//!
//! Getters return `None` when a key is absent. Setters validate first and
//! then replace every existing entry for the key, so a failed setter leaves
//! the section untouched.

mod interface;
mod peer;

use std::str::FromStr;

use ipnetwork::IpNetwork;
use thiserror::Error;

use crate::keys::KeyError;

pub use interface::{Hook, InterfaceRecord};
pub use peer::PeerRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("port {0} out of range (0-65535)")]
    PortOutOfRange(i64),

    #[error("port is not an integer: '{0}'")]
    PortNotInteger(String),

    #[error("invalid CIDR: '{0}'")]
    InvalidCidr(String),

    #[error("MTU {0} out of range (68-65535)")]
    MtuOutOfRange(i64),

    #[error("{0} requires at least one value")]
    EmptyList(&'static str),

    #[error("{0} must not be empty")]
    EmptyValue(&'static str),

    #[error("{0} must not contain a line break")]
    LineBreak(&'static str),

    #[error("{0} must not contain ','")]
    Separator(&'static str),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Values `enforce_fields` fills in when a record lacks them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDefaults {
    pub interface_name: String,
    pub host: String,
    pub server_name: String,
}

impl Default for RecordDefaults {
    fn default() -> Self {
        Self {
            interface_name: "wg0".to_string(),
            host: "127.0.0.1".to_string(),
            server_name: "Server".to_string(),
        }
    }
}

pub fn parse_port(raw: &str) -> Result<u16, ValidationError> {
    let port: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::PortNotInteger(raw.to_string()))?;
    check_port(port)
}

pub fn check_port(port: i64) -> Result<u16, ValidationError> {
    u16::try_from(port).map_err(|_| ValidationError::PortOutOfRange(port))
}

pub fn check_cidr(value: &str) -> Result<IpNetwork, ValidationError> {
    IpNetwork::from_str(value.trim()).map_err(|_| ValidationError::InvalidCidr(value.to_string()))
}

/// Single-line, non-empty text value.
pub(crate) fn check_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyValue(field));
    }
    if value.contains(['\n', '\r']) {
        return Err(ValidationError::LineBreak(field));
    }
    Ok(())
}

/// Members of a comma-joined list: each non-empty, single line, comma free.
pub(crate) fn check_members<S: AsRef<str>>(
    field: &'static str,
    values: &[S],
) -> Result<(), ValidationError> {
    for value in values {
        let value = value.as_ref();
        check_text(field, value)?;
        if value.contains(',') {
            return Err(ValidationError::Separator(field));
        }
    }
    Ok(())
}

pub(crate) fn check_cidrs<S: AsRef<str>>(
    field: &'static str,
    values: &[S],
) -> Result<(), ValidationError> {
    if values.is_empty() {
        return Err(ValidationError::EmptyList(field));
    }
    check_members(field, values)?;
    for value in values {
        check_cidr(value.as_ref())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("51820", Ok(51820) ; "typical")]
    #[test_case("0", Ok(0) ; "lower bound")]
    #[test_case("65535", Ok(65535) ; "upper bound")]
    #[test_case("65536", Err(ValidationError::PortOutOfRange(65536)) ; "too large")]
    #[test_case("-1", Err(ValidationError::PortOutOfRange(-1)) ; "negative")]
    #[test_case("51820.5", Err(ValidationError::PortNotInteger("51820.5".into())) ; "fractional")]
    #[test_case("port", Err(ValidationError::PortNotInteger("port".into())) ; "text")]
    fn port_parsing(raw: &str, expected: Result<u16, ValidationError>) {
        assert_eq!(parse_port(raw), expected);
    }

    #[test_case("10.0.0.1/24", true ; "v4 network")]
    #[test_case("fd00::1/64", true ; "v6 network")]
    #[test_case("10.0.0.1", true ; "bare address")]
    #[test_case("10.0.0.1/33", false ; "bad prefix")]
    #[test_case("vpn.example.com", false ; "hostname")]
    fn cidr_validation(value: &str, ok: bool) {
        assert_eq!(check_cidr(value).is_ok(), ok);
    }

    #[test]
    fn members_reject_embedded_separator() {
        assert_eq!(
            check_members("DNS", &["1.1.1.1, 8.8.8.8"]),
            Err(ValidationError::Separator("DNS"))
        );
    }
}
