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

/// Prefix marking an application-only metadata line.
pub const METADATA_PREFIX: &str = "#!";

/// Prefix marking a soft-disabled line. Applied on top of the normal rendering.
pub const DISABLED_PREFIX: &str = "#$";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Opaque `#...` line.
    Comment,
    /// `#!key = value`, invisible to the tunneling subsystem.
    Metadata,
    /// Plain `key = value` consumed by the tunneling subsystem.
    Field,
}

/// One logical line of a configuration section.
///
/// Comments carry no key. A disabled entry keeps its kind, key and value and
/// is only rendered differently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    kind: EntryKind,
    key: Option<String>,
    value: String,
    enabled: bool,
}

impl Entry {
    pub fn field(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Field,
            key: Some(key.into()),
            value: value.into(),
            enabled: true,
        }
    }

    pub fn metadata(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Metadata,
            key: Some(key.into()),
            value: value.into(),
            enabled: true,
        }
    }

    /// `text` is everything after the leading `#`.
    pub fn comment(text: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Comment,
            key: None,
            value: text.into(),
            enabled: true,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_comment(&self) -> bool {
        self.kind == EntryKind::Comment
    }

    /// True for a field or metadata entry with exactly this key (case-sensitive).
    pub fn matches(&self, kind: EntryKind, key: &str) -> bool {
        self.kind == kind && self.key.as_deref() == Some(key)
    }

    pub fn to_line(&self) -> String {
        let line = match (self.kind, self.key.as_deref()) {
            (EntryKind::Comment, _) => format!("#{}", self.value),
            (EntryKind::Metadata, Some(key)) => {
                format!("{METADATA_PREFIX}{key} = {}", self.value)
            }
            (EntryKind::Field, Some(key)) => format!("{key} = {}", self.value),
            // constructors guarantee a key for fields and metadata
            (_, None) => format!("#{}", self.value),
        };

        if self.enabled {
            line
        } else {
            format!("{DISABLED_PREFIX}{line}")
        }
    }
}
