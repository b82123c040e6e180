//! Token model and text codec for the extended wg-quick configuration format.
//!
//! Application data rides inside comments so the tunneling subsystem, which
//! ignores every `#` line, never sees it:
//!
//! - `#!key = value` is a metadata entry.
//! - `#$<line>` is a soft-disabled entry; the rest of the line is parsed as
//!   if uncommented and the resulting entry is flagged disabled.
//!
//! All prefix handling lives in [`codec`]; callers only see [`EntryKind`] and
//! the `enabled` flag.

pub mod codec;
pub mod entry;
pub mod section;

pub use codec::{ParseError, parse, serialize};
pub use entry::{Entry, EntryKind};
pub use section::Section;

/// Split a comma-joined value into trimmed members, dropping empty ones.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join list members with the fixed `,` separator.
pub fn join_list<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| v.as_ref().trim())
        .collect::<Vec<_>>()
        .join(",")
}
