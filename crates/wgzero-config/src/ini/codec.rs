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

use thiserror::Error;
use tracing::{debug, trace};

use super::entry::Entry;
use super::section::Section;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to parse configuration line {line}: '{content}' ({reason})")]
pub struct ParseError {
    /// 1-based line number in the source text.
    pub line: usize,
    /// The offending line, trimmed.
    pub content: String,
    pub reason: &'static str,
}

/// Parse configuration text into sections.
///
/// Blank lines are skipped. `[Name]` opens a section; `#!k = v` is metadata;
/// `#$...` is a soft-disabled entry; any other `#...` is an opaque comment;
/// everything else must be `key = value`.
pub fn parse(text: &str) -> Result<Vec<Section>, ParseError> {
    let mut sections = Vec::new();
    let mut current = Section::unnamed();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let finished = std::mem::replace(&mut current, Section::new(name.trim()));
            if !finished.is_empty() {
                sections.push(finished);
            }
            continue;
        }

        let entry = parse_entry(line).map_err(|reason| ParseError {
            line: idx + 1,
            content: line.to_string(),
            reason,
        })?;
        trace!(line = idx + 1, kind = ?entry.kind(), "parsed entry");
        current.push(entry);
    }

    if !current.is_empty() {
        sections.push(current);
    }

    debug!(section_count = sections.len(), "parsed configuration text");
    Ok(sections)
}

fn parse_entry(line: &str) -> Result<Entry, &'static str> {
    let Some(body) = line.strip_prefix('#') else {
        let (key, value) = split_kv(line)?;
        return Ok(Entry::field(key, value));
    };

    if let Some(rest) = body.strip_prefix('$') {
        if rest.contains('=') {
            return parse_disabled(rest).map(Entry::disabled);
        }
    }

    if let Some(rest) = body.strip_prefix('!') {
        if rest.contains('=') {
            let (key, value) = split_kv(rest)?;
            return Ok(Entry::metadata(key, value));
        }
    }

    Ok(Entry::comment(body))
}

/// The remainder after `#$` is parsed as if uncommented. A bare `!` is
/// accepted as shorthand for a disabled metadata entry.
fn parse_disabled(rest: &str) -> Result<Entry, &'static str> {
    let rest = rest.trim_start();
    if let Some(meta) = rest.strip_prefix('!') {
        let (key, value) = split_kv(meta)?;
        return Ok(Entry::metadata(key, value));
    }
    parse_entry(rest)
}

fn split_kv(line: &str) -> Result<(&str, &str), &'static str> {
    let (key, value) = line.split_once('=').ok_or("missing '=' delimiter")?;
    let key = key.trim();
    if key.is_empty() {
        return Err("empty key");
    }
    Ok((key, value.trim()))
}

/// Render sections, each followed by a blank line.
pub fn serialize<'a, I>(sections: I) -> String
where
    I: IntoIterator<Item = &'a Section>,
{
    to_lines(sections).join("\n")
}

/// Lines of the rendered document, including the separating blank lines and
/// the final empty element that terminates the last line.
pub fn to_lines<'a, I>(sections: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Section>,
{
    let mut lines = Vec::new();
    for section in sections {
        lines.extend(section.to_lines());
        lines.push(String::new());
    }
    lines.push(String::new());
    lines
}
