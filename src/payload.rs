//! Payload text: newline-delimited `"<ref> <term>"` entries.
//!
//! Parsing is pure: it neither touches a cache nor grows any grid. Callers
//! that track sheet extents do that themselves after parsing.

use crate::error::ValidationError;
use crate::reference::{Reference, parse_reference};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

lazy_static! {
    static ref ENTRY_REGEX: Regex = Regex::new(r"^(\$[A-Z]+[0-9]+)(?: (.*))?$").unwrap();
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadEntry {
    pub reference: Reference,
    pub term: String,
}

impl PayloadEntry {
    pub fn new(reference: Reference, term: impl Into<String>) -> Self {
        PayloadEntry {
            reference,
            term: term.into(),
        }
    }
}

/// Parses a whole payload, rejecting it if any entry is malformed.
///
/// A terminal newline is tolerated, and blank lines carry no reference and
/// are skipped. An entry with a reference but no term clears the cell.
pub fn parse_payload(payload: &str) -> Result<Vec<PayloadEntry>, ValidationError> {
    let payload = payload.strip_suffix('\n').unwrap_or(payload);
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for (i, line) in payload.split('\n').enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            continue;
        }

        let invalid = || ValidationError {
            line: i + 1,
            entry: line.to_string(),
        };
        let caps = ENTRY_REGEX.captures(line).ok_or_else(invalid)?;
        let reference = parse_reference(&caps[1]).map_err(|_| invalid())?;
        let term = caps.get(2).map_or("", |m| m.as_str());

        entries.push(PayloadEntry::new(reference, term));
    }

    Ok(entries)
}

pub fn validate_payload(payload: &str) -> Result<(), ValidationError> {
    parse_payload(payload).map(|_| ())
}

/// Renders entries as payload text, one terminated line each.
pub fn render_payload<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a Reference, &'a str)>,
{
    let mut payload = String::new();
    for (reference, term) in entries {
        payload.push_str(&reference.to_string());
        payload.push(' ');
        payload.push_str(term);
        payload.push('\n');
    }
    payload
}

/// Builds a payload for `refs` from a term map. References without a term
/// are written with an empty term, which clears them on the receiving side.
pub fn build_payload<'a, I>(refs: I, terms: &BTreeMap<Reference, String>) -> String
where
    I: IntoIterator<Item = &'a Reference>,
{
    render_payload(refs.into_iter().map(|reference| {
        (
            reference,
            terms.get(reference).map_or("", |term| term.as_str()),
        )
    }))
}
