//! Cell references in their canonical `$<COL><ROW>` text form.
//!
//! Columns use bijective base 26 (`A` = 1, `Z` = 26, `AA` = 27); there is no
//! letter for zero. Rows are 1-based. The same codec is used by the formula
//! layer and by the update log, so both sides agree on what `$AB42` means.

use crate::error::FormatError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref REFERENCE_REGEX: Regex = Regex::new(r"^\$?([A-Z]+)([0-9]+)$").unwrap();
}

/// A structured cell coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub column: u32,
    pub row: u32,
}

impl Reference {
    pub fn new(column: u32, row: u32) -> Self {
        Reference { column, row }
    }

    pub fn column_letters(&self) -> String {
        number_to_column_letters(self.column)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}{}", self.column_letters(), self.row)
    }
}

impl FromStr for Reference {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_reference(s)
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_reference(&text).map_err(serde::de::Error::custom)
    }
}

/// `A` -> 1, `Z` -> 26, `AA` -> 27.
pub fn column_letters_to_number(letters: &str) -> Result<u32, FormatError> {
    if letters.is_empty() {
        return Err(FormatError {
            text: letters.to_string(),
        });
    }

    letters.bytes().try_fold(0u32, |acc, b| {
        if !b.is_ascii_uppercase() {
            return Err(FormatError {
                text: letters.to_string(),
            });
        }
        acc.checked_mul(26)
            .and_then(|acc| acc.checked_add((b - b'A') as u32 + 1))
            .ok_or_else(|| FormatError {
                text: letters.to_string(),
            })
    })
}

/// Inverse of [`column_letters_to_number`]. Zero has no letters and maps to
/// the empty string.
pub fn number_to_column_letters(n: u32) -> String {
    let mut n = n;
    let mut result = Vec::new();
    while n > 0 {
        n -= 1;
        result.push((n % 26) as u8 + b'A');
        n /= 26;
    }
    result.reverse();
    String::from_utf8(result).unwrap_or_default()
}

/// Parses `$AB42` (the leading `$` is optional) into a [`Reference`].
pub fn parse_reference(text: &str) -> Result<Reference, FormatError> {
    let malformed = || FormatError {
        text: text.to_string(),
    };

    let caps = REFERENCE_REGEX.captures(text).ok_or_else(malformed)?;
    let column = column_letters_to_number(&caps[1]).map_err(|_| malformed())?;
    let row = caps[2].parse::<u32>().map_err(|_| malformed())?;

    if row == 0 {
        return Err(malformed());
    }
    Ok(Reference { column, row })
}

/// Largest number of cells a single range may span.
pub const MAX_RANGE_CELLS: u64 = 1 << 16;

/// All references of the rectangle spanned by two corners, row by row.
/// `None` when the rectangle holds more than [`MAX_RANGE_CELLS`] cells.
pub fn expand_range(from: Reference, to: Reference) -> Option<Vec<Reference>> {
    let (c1, c2) = (from.column.min(to.column), from.column.max(to.column));
    let (r1, r2) = (from.row.min(to.row), from.row.max(to.row));

    let cells = (u64::from(r2 - r1) + 1).checked_mul(u64::from(c2 - c1) + 1)?;
    if cells > MAX_RANGE_CELLS {
        return None;
    }

    let mut refs = Vec::with_capacity(cells as usize);
    for row in r1..=r2 {
        for column in c1..=c2 {
            refs.push(Reference { column, row });
        }
    }
    Some(refs)
}

/// Tracked grid size of a sheet. It only ever grows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub rows: u32,
    pub cols: u32,
}

impl Extent {
    pub fn new(rows: u32, cols: u32) -> Self {
        Extent { rows, cols }
    }

    pub fn contains(&self, reference: &Reference) -> bool {
        reference.row <= self.rows && reference.column <= self.cols
    }

    /// Enlarges the extent so that `reference` lies inside it. Returns whether
    /// anything changed.
    pub fn grow_to_fit(&mut self, reference: &Reference) -> bool {
        if self.contains(reference) {
            return false;
        }
        self.rows = self.rows.max(reference.row);
        self.cols = self.cols.max(reference.column);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(number_to_column_letters(1), "A");
        assert_eq!(number_to_column_letters(26), "Z");
        assert_eq!(number_to_column_letters(27), "AA");
        assert_eq!(number_to_column_letters(52), "AZ");
        assert_eq!(number_to_column_letters(100), "CV");
        assert_eq!(number_to_column_letters(703), "AAA");
        assert_eq!(number_to_column_letters(1404), "BAZ");
        assert_eq!(number_to_column_letters(0), "");

        assert_eq!(column_letters_to_number("A").unwrap(), 1);
        assert_eq!(column_letters_to_number("AB").unwrap(), 28);
        assert_eq!(column_letters_to_number("AAB").unwrap(), 704);
        assert!(column_letters_to_number("").is_err());
        assert!(column_letters_to_number("a").is_err());
    }

    #[test]
    fn column_round_trip() {
        for n in 1..=20_000 {
            let letters = number_to_column_letters(n);
            assert_eq!(column_letters_to_number(&letters).unwrap(), n, "{letters}");
        }
    }

    #[test]
    fn parse_and_render() {
        for text in ["$A1", "$Z26", "$AB42", "$AZ25", "$XFD1048576"] {
            let reference = parse_reference(text).unwrap();
            assert_eq!(reference.to_string(), text);
        }

        let reference = parse_reference("B7").unwrap();
        assert_eq!(reference, Reference::new(2, 7));
        assert_eq!(reference.to_string(), "$B7");
    }

    #[test]
    fn parse_rejects_malformed() {
        for text in ["", "$", "$A", "$8", "a1", "$a1", "1A", "$A0", "$A1 ", "$A-1", "A$1"] {
            assert!(parse_reference(text).is_err(), "{text:?} should be rejected");
        }
    }

    #[test]
    fn range_is_row_major() {
        let refs = expand_range(Reference::new(2, 2), Reference::new(1, 1)).unwrap();
        let texts: Vec<String> = refs.iter().map(|r| r.to_string()).collect();
        assert_eq!(texts, ["$A1", "$B1", "$A2", "$B2"]);
    }

    #[test]
    fn oversized_range_is_refused() {
        let corner = Reference::new(1, 1);
        assert!(expand_range(corner, Reference::new(u32::MAX, u32::MAX)).is_none());
        assert!(expand_range(corner, Reference::new(16384, 1048576)).is_none());
        assert!(expand_range(corner, Reference::new(257, 256)).is_none());
        assert_eq!(expand_range(corner, Reference::new(256, 256)).map(|r| r.len()), Some(65536));
    }

    #[test]
    fn extent_only_grows() {
        let mut extent = Extent::new(10, 10);
        assert!(!extent.grow_to_fit(&Reference::new(3, 4)));
        assert!(extent.grow_to_fit(&Reference::new(30, 2)));
        assert_eq!(extent, Extent::new(10, 30));
        assert!(extent.grow_to_fit(&Reference::new(1, 99)));
        assert_eq!(extent, Extent::new(99, 30));
    }

    #[test]
    fn serializes_as_text() {
        let json = serde_json::to_string(&Reference::new(28, 42)).unwrap();
        assert_eq!(json, "\"$AB42\"");
        let back: Reference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Reference::new(28, 42));
    }
}
