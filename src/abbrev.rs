//! Abbreviation tables from `.debug_abbrev`.
//!
//! Every compilation unit names a table offset; each DIE then opens with an
//! abbreviation code that selects the tag and the attribute/form list used
//! to decode it. Tables are parsed on first use and cached by offset for the
//! lifetime of the [`crate::Dwarf`] — debug sections are bounded and reuse
//! is frequent, so nothing is ever evicted.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::trace;

use crate::consts::*;
use crate::cursor::{Cursor, Endian};
use crate::error::{bad, Result};

/// `(attribute, form)` pair of an abbreviation declaration. The payload is
/// only present for `DW_FORM_implicit_const`, whose value lives in the
/// abbreviation itself rather than in the DIE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSpec {
    pub id: u64,
    pub form: u64,
    pub implicit_const: Option<i64>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Abbrev {
    pub code: u64,
    pub tag: u64,
    pub has_children: bool,
    pub attrs: Vec<AttrSpec>,
}

/// One table from `.debug_abbrev`. Codes are unique within a table but need
/// not be dense, so lookup is a scan; tables are short in practice.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AbbrevTable {
    abbrevs: Vec<Abbrev>,
}

impl AbbrevTable {
    pub fn get(&self, code: u64) -> Option<&Abbrev> {
        self.abbrevs.iter().find(|a| a.code == code)
    }

    fn parse(data: &[u8], offset: u64, endian: Endian) -> Result<AbbrevTable> {
        let mut cursor = Cursor::new(data, endian);
        cursor.seek_to(offset)?;

        let mut abbrevs = Vec::new();
        loop {
            let code = cursor.read_uleb128()?;
            if code == 0 {
                trace!(offset, count = abbrevs.len(), "parsed abbreviation table");
                return Ok(AbbrevTable { abbrevs });
            }
            let tag = cursor.read_uleb128()?;
            let has_children = match cursor.read_u8()? {
                0 => false,
                1 => true,
                _ => return Err(bad("invalid DW_CHILDREN byte")),
            };

            let mut attrs = Vec::new();
            loop {
                let id = cursor.read_uleb128()?;
                let form = cursor.read_uleb128()?;
                if id == 0 && form == 0 {
                    break;
                }
                let implicit_const = if form == DW_FORM_implicit_const {
                    Some(cursor.read_sleb128()?)
                } else {
                    None
                };
                attrs.push(AttrSpec { id, form, implicit_const });
            }

            abbrevs.push(Abbrev { code, tag, has_children, attrs });
        }
    }
}

/// The per-offset table cache. Parsing happens at most once per offset; the
/// returned borrow is tied to the cache, not to the section bytes.
pub(crate) fn cached<'c>(
    cache: &'c mut HashMap<u64, AbbrevTable>,
    abbrev_bytes: &[u8],
    endian: Endian,
    offset: u64,
) -> Result<&'c AbbrevTable> {
    match cache.entry(offset) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let table = AbbrevTable::parse(abbrev_bytes, offset, endian)?;
            Ok(entry.insert(table))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two declarations: a compile unit with a name and an implicit-const
    // attribute, and a childless subprogram.
    #[rustfmt::skip]
    const TABLE: &[u8] = &[
        0x01,              // code 1
        0x11,              // DW_TAG_compile_unit
        0x01,              // has children
        0x03, 0x08,        // DW_AT_name, DW_FORM_string
        0x55, 0x21, 0x7f,  // DW_AT_ranges, DW_FORM_implicit_const, value -1
        0x00, 0x00,
        0x04,              // code 4 (codes need not be dense)
        0x2e,              // DW_TAG_subprogram
        0x00,              // no children
        0x03, 0x08,
        0x00, 0x00,
        0x00,              // end of table
    ];

    #[test]
    fn parse_and_lookup() {
        let table = AbbrevTable::parse(TABLE, 0, Endian::Little).unwrap();
        let cu = table.get(1).unwrap();
        assert_eq!(cu.tag, DW_TAG_compile_unit);
        assert!(cu.has_children);
        assert_eq!(
            cu.attrs[1],
            AttrSpec { id: DW_AT_ranges, form: DW_FORM_implicit_const, implicit_const: Some(-1) }
        );

        let func = table.get(4).unwrap();
        assert_eq!(func.tag, DW_TAG_subprogram);
        assert!(!func.has_children);

        assert!(table.get(2).is_none());
        assert!(table.get(0).is_none());
    }

    #[test]
    fn cache_parses_once() {
        let mut cache = HashMap::new();
        let first = cached(&mut cache, TABLE, Endian::Little, 0).unwrap() as *const AbbrevTable;
        let second = cached(&mut cache, TABLE, Endian::Little, 0).unwrap() as *const AbbrevTable;
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn bad_children_byte() {
        let data = [0x01, 0x11, 0x02];
        assert!(AbbrevTable::parse(&data, 0, Endian::Little).is_err());
    }

    #[test]
    fn truncated_table() {
        assert!(AbbrevTable::parse(&TABLE[..5], 0, Endian::Little).is_err());
    }
}
