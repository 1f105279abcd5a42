//! FORM-tagged attribute values.
//!
//! A FORM describes how an attribute's bytes are encoded in the DIE stream.
//! Decoding is a closed mapping from form code to one of the variants below;
//! the indexed variants (`strx`, `addrx`, ...) stay unresolved here and are
//! chased through their base-indexed sections by the unit scanner.

use crate::consts::*;
use crate::cursor::{Cursor, Format};
use crate::error::{bad, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormValue<'d> {
    /// A native-word address of the target program.
    Addr(u64),
    /// Index into `.debug_addr`, relative to the unit's `addr_base`.
    AddrX(u64),
    Block(&'d [u8]),
    Udata(u64),
    Sdata(i64),
    Data16(&'d [u8]),
    Exprloc(&'d [u8]),
    Flag(bool),
    SecOffset(u64),
    /// Reference relative to the start of the containing compilation unit.
    Ref(u64),
    /// Reference relative to the start of `.debug_info`.
    RefAddr(u64),
    String(&'d str),
    Strp(u64),
    /// Index into `.debug_str_offsets`, relative to `str_offsets_base`.
    StrX(u64),
    LineStrp(u64),
    LocListX(u64),
    RngListX(u64),
}

/// Decode one attribute value. `implicit_const` carries the abbreviation's
/// payload for `DW_FORM_implicit_const`, which consumes no DIE bytes.
pub(crate) fn parse_form<'d>(
    cursor: &mut Cursor<'d>,
    format: Format,
    form: u64,
    implicit_const: Option<i64>,
) -> Result<FormValue<'d>> {
    let mut form = form;
    // `indirect` stores the real form in the DIE itself. One level is all
    // that occurs in practice; bounded to keep adversarial input finite.
    for _ in 0..3 {
        return Ok(match form {
            DW_FORM_addr => FormValue::Addr(cursor.read_native()?),
            DW_FORM_addrx1 => FormValue::AddrX(cursor.read_uint(1)?),
            DW_FORM_addrx2 => FormValue::AddrX(cursor.read_uint(2)?),
            DW_FORM_addrx3 => FormValue::AddrX(u64::from(cursor.read_u24()?)),
            DW_FORM_addrx4 => FormValue::AddrX(cursor.read_uint(4)?),
            DW_FORM_addrx => FormValue::AddrX(cursor.read_uleb128()?),

            DW_FORM_block1 => {
                let len = cursor.read_u8()? as usize;
                FormValue::Block(cursor.read_bytes(len)?)
            }
            DW_FORM_block2 => {
                let len = cursor.read_u16()? as usize;
                FormValue::Block(cursor.read_bytes(len)?)
            }
            DW_FORM_block4 => {
                let len = cursor.read_u32()? as usize;
                FormValue::Block(cursor.read_bytes(len)?)
            }
            DW_FORM_block => {
                let len = cursor.read_uleb128()?;
                FormValue::Block(cursor.read_bytes(crate::error::cast(len)?)?)
            }

            DW_FORM_data1 => FormValue::Udata(cursor.read_uint(1)?),
            DW_FORM_data2 => FormValue::Udata(cursor.read_uint(2)?),
            DW_FORM_data4 => FormValue::Udata(cursor.read_uint(4)?),
            DW_FORM_data8 => FormValue::Udata(cursor.read_uint(8)?),
            DW_FORM_data16 => FormValue::Data16(cursor.read_bytes(16)?),
            DW_FORM_udata => FormValue::Udata(cursor.read_uleb128()?),
            DW_FORM_sdata => FormValue::Sdata(cursor.read_sleb128()?),

            DW_FORM_exprloc => {
                let len = cursor.read_uleb128()?;
                FormValue::Exprloc(cursor.read_bytes(crate::error::cast(len)?)?)
            }

            DW_FORM_flag => FormValue::Flag(cursor.read_u8()? != 0),
            DW_FORM_flag_present => FormValue::Flag(true),

            DW_FORM_sec_offset => FormValue::SecOffset(cursor.read_address(format)?),

            DW_FORM_ref1 => FormValue::Ref(cursor.read_uint(1)?),
            DW_FORM_ref2 => FormValue::Ref(cursor.read_uint(2)?),
            DW_FORM_ref4 => FormValue::Ref(cursor.read_uint(4)?),
            DW_FORM_ref8 => FormValue::Ref(cursor.read_uint(8)?),
            DW_FORM_ref_udata => FormValue::Ref(cursor.read_uleb128()?),
            DW_FORM_ref_addr => FormValue::RefAddr(cursor.read_address(format)?),
            DW_FORM_ref_sig8 => FormValue::RefAddr(cursor.read_uint(8)?),

            DW_FORM_string => FormValue::String(cursor.read_utf8_cstr()?),
            DW_FORM_strp => FormValue::Strp(cursor.read_address(format)?),
            DW_FORM_line_strp => FormValue::LineStrp(cursor.read_address(format)?),
            DW_FORM_strx1 => FormValue::StrX(cursor.read_uint(1)?),
            DW_FORM_strx2 => FormValue::StrX(cursor.read_uint(2)?),
            DW_FORM_strx3 => FormValue::StrX(u64::from(cursor.read_u24()?)),
            DW_FORM_strx4 => FormValue::StrX(cursor.read_uint(4)?),
            DW_FORM_strx => FormValue::StrX(cursor.read_uleb128()?),

            DW_FORM_indirect => {
                form = cursor.read_uleb128()?;
                continue;
            }
            DW_FORM_implicit_const => {
                FormValue::Sdata(implicit_const.ok_or(bad("implicit_const without payload"))?)
            }

            DW_FORM_loclistx => FormValue::LocListX(cursor.read_uleb128()?),
            DW_FORM_rnglistx => FormValue::RngListX(cursor.read_uleb128()?),

            _ => return Err(bad("unknown attribute form")),
        });
    }
    Err(bad("indirect form chain too long"))
}

impl<'d> FormValue<'d> {
    /// The value as an unsigned constant. Signed payloads must fit.
    pub fn udata(&self) -> Result<u64> {
        match *self {
            FormValue::Udata(v) => Ok(v),
            FormValue::Sdata(v) => u64::try_from(v).map_err(|_| Error::Overflow),
            FormValue::SecOffset(v) => Ok(v),
            _ => Err(bad("expected a constant attribute value")),
        }
    }

    pub fn sec_offset(&self) -> Result<u64> {
        match *self {
            FormValue::SecOffset(v) | FormValue::Udata(v) => Ok(v),
            _ => Err(bad("expected a section offset attribute value")),
        }
    }

    /// CU-relative reference offset.
    pub fn unit_ref(&self) -> Result<u64> {
        match *self {
            FormValue::Ref(v) => Ok(v),
            _ => Err(bad("expected a unit-relative reference")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Endian;

    fn parse(data: &[u8], form: u64) -> Result<FormValue<'_>> {
        let mut cursor = Cursor::new(data, Endian::Little);
        let value = parse_form(&mut cursor, Format::Dwarf32, form, None)?;
        Ok(value)
    }

    #[test]
    fn closed_mapping() {
        assert_eq!(parse(&[0x2a], DW_FORM_data1).unwrap(), FormValue::Udata(0x2a));
        assert_eq!(parse(&[0x7f], DW_FORM_sdata).unwrap(), FormValue::Sdata(-1));
        assert_eq!(
            parse(b"main\0", DW_FORM_string).unwrap(),
            FormValue::String("main")
        );
        assert_eq!(
            parse(&[0x02, 0xaa, 0xbb], DW_FORM_block1).unwrap(),
            FormValue::Block(&[0xaa, 0xbb])
        );
        assert_eq!(parse(&[0], DW_FORM_flag).unwrap(), FormValue::Flag(false));
        assert_eq!(parse(&[], DW_FORM_flag_present).unwrap(), FormValue::Flag(true));
        assert_eq!(
            parse(&[0x10, 0x20, 0x00, 0x00], DW_FORM_sec_offset).unwrap(),
            FormValue::SecOffset(0x2010)
        );
        assert_eq!(parse(&[0x05], DW_FORM_strx1).unwrap(), FormValue::StrX(5));
        assert_eq!(parse(&[0x09], DW_FORM_rnglistx).unwrap(), FormValue::RngListX(9));
        assert!(parse(&[], DW_FORM_addrx1 + 0x40).is_err());
    }

    #[test]
    fn cursor_advances_by_consumed_length() {
        let data = [0x03, 0x01, 0x02, 0x03, 0xff];
        let mut cursor = Cursor::new(&data, Endian::Little);
        parse_form(&mut cursor, Format::Dwarf32, DW_FORM_block, None).unwrap();
        assert_eq!(cursor.pos(), 4);
    }

    #[test]
    fn indirect_resolves_once() {
        // indirect -> data2
        let data = [0x05, 0x34, 0x12];
        let mut cursor = Cursor::new(&data, Endian::Little);
        let value = parse_form(&mut cursor, Format::Dwarf32, DW_FORM_indirect, None).unwrap();
        assert_eq!(value, FormValue::Udata(0x1234));
    }

    #[test]
    fn implicit_const_consumes_nothing() {
        let mut cursor = Cursor::new(&[], Endian::Little);
        let value =
            parse_form(&mut cursor, Format::Dwarf32, DW_FORM_implicit_const, Some(-42)).unwrap();
        assert_eq!(value, FormValue::Sdata(-42));
        assert!(parse_form(&mut cursor, Format::Dwarf32, DW_FORM_implicit_const, None).is_err());
    }
}
