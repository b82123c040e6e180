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

use super::entry::{Entry, EntryKind};

/// An ordered list of entries under a `[Name]` header.
///
/// Keys may repeat; lookups return entries in insertion order. Disabled
/// entries are still returned by lookups so their values stay recoverable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    name: Option<String>,
    entries: Vec<Entry>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            entries: Vec::new(),
        }
    }

    /// Entries appearing before the first header land in an unnamed section.
    pub fn unnamed() -> Self {
        Self::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    // -- Generic keyed access ------------------------------------------------

    pub fn all(&self, kind: EntryKind, key: &str) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(move |e| e.matches(kind, key))
    }

    pub fn all_mut(&mut self, kind: EntryKind, key: &str) -> impl Iterator<Item = &mut Entry> {
        self.entries.iter_mut().filter(move |e| e.matches(kind, key))
    }

    pub fn first(&self, kind: EntryKind, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.matches(kind, key))
    }

    /// Replace every `kind`/`key` entry with one entry per value.
    ///
    /// The replacements take the position of the first removed entry, or are
    /// appended when the key was absent. An empty `values` removes the key.
    pub fn replace<I, V>(&mut self, kind: EntryKind, key: &str, values: I) -> &mut [Entry]
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let at = self
            .entries
            .iter()
            .position(|e| e.matches(kind, key))
            .unwrap_or(self.entries.len());
        // every match sits at or after `at`, so the index survives the retain
        self.entries.retain(|e| !e.matches(kind, key));

        let fresh: Vec<Entry> = values
            .into_iter()
            .map(|v| match kind {
                EntryKind::Field => Entry::field(key, v),
                EntryKind::Metadata => Entry::metadata(key, v),
                EntryKind::Comment => Entry::comment(v),
            })
            .collect();
        let count = fresh.len();
        self.entries.splice(at..at, fresh);
        &mut self.entries[at..at + count]
    }

    pub fn remove(&mut self, kind: EntryKind, key: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.matches(kind, key));
        before - self.entries.len()
    }

    // -- Fields --------------------------------------------------------------

    pub fn field(&self, key: &str) -> Option<&str> {
        self.first(EntryKind::Field, key).map(Entry::value)
    }

    pub fn fields(&self, key: &str) -> Vec<&str> {
        self.all(EntryKind::Field, key).map(Entry::value).collect()
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.first(EntryKind::Field, key).is_some()
    }

    pub fn add_field(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Entry {
        let at = self.entries.len();
        self.entries.push(Entry::field(key, value));
        &mut self.entries[at]
    }

    pub fn set_field(&mut self, key: &str, value: impl Into<String>) {
        self.replace(EntryKind::Field, key, [value.into()]);
    }

    pub fn set_fields<I, V>(&mut self, key: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.replace(EntryKind::Field, key, values);
    }

    pub fn remove_field(&mut self, key: &str) -> usize {
        self.remove(EntryKind::Field, key)
    }

    // -- Metadata ------------------------------------------------------------

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.first(EntryKind::Metadata, key).map(Entry::value)
    }

    pub fn has_metadata(&self, key: &str) -> bool {
        self.first(EntryKind::Metadata, key).is_some()
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Entry::metadata(key, value));
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<String>) {
        self.replace(EntryKind::Metadata, key, [value.into()]);
    }

    pub fn remove_metadata(&mut self, key: &str) -> usize {
        self.remove(EntryKind::Metadata, key)
    }

    // -- Comments ------------------------------------------------------------

    pub fn comments(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| e.is_comment())
            .map(Entry::value)
    }

    pub fn add_comment(&mut self, text: impl Into<String>) {
        self.entries.push(Entry::comment(text));
    }

    /// Header line followed by one line per entry.
    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.entries.len() + 1);
        if let Some(name) = &self.name {
            lines.push(format!("[{name}]"));
        }
        lines.extend(self.entries.iter().map(Entry::to_line));
        lines
    }
}
