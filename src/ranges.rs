//! Address range lists: `.debug_ranges` for DWARF 4 and below,
//! `.debug_rnglists` for DWARF 5, plus the `.debug_addr` element reader the
//! v5 indexed entry kinds resolve through.

use crate::consts::*;
use crate::cursor::{Cursor, Endian, NATIVE_WORD};
use crate::error::{bad, Error, Result};
use crate::form::FormValue;
use crate::sections::{SectionId, Sections};
use crate::unit::{PcRange, ResolveCtx};

/// The v4 base-address-selection tombstone: all address bits set.
const BASE_SELECTION: u64 = u64::MAX >> (64 - 8 * NATIVE_WORD as u32);

/// Pull-style iterator over one DIE's range list. The unit's version picks
/// the wire format; the base address starts at the unit's `DW_AT_low_pc`
/// (zero if absent) and may be updated by base-address entries.
pub(crate) struct RangeIter<'a, 'd> {
    ctx: ResolveCtx<'a, 'd>,
    cursor: Cursor<'d>,
    base_address: u64,
}

impl<'a, 'd> RangeIter<'a, 'd> {
    pub fn init(value: &FormValue<'d>, ctx: ResolveCtx<'a, 'd>) -> Result<Self> {
        let (section_id, offset) = if ctx.bases.version < 5 {
            (SectionId::DebugRanges, value.sec_offset()?)
        } else {
            let offset = match *value {
                FormValue::SecOffset(offset) | FormValue::Udata(offset) => offset,
                // An index into the offset array that follows the
                // `.debug_rnglists` header; the stored offset is itself
                // relative to rnglists_base.
                FormValue::RngListX(index) => {
                    let bytes = ctx.sections.require(SectionId::DebugRnglists)?;
                    let word = ctx.bases.format.word_size() as u64;
                    let slot = index
                        .checked_mul(word)
                        .and_then(|rel| rel.checked_add(ctx.bases.rnglists_base))
                        .ok_or(Error::PointerOverflow)?;
                    let mut cursor = Cursor::new(bytes, ctx.endian);
                    cursor.seek_to(slot)?;
                    let relative = cursor.read_address(ctx.bases.format)?;
                    relative
                        .checked_add(ctx.bases.rnglists_base)
                        .ok_or(Error::PointerOverflow)?
                }
                _ => return Err(bad("unexpected ranges form")),
            };
            (SectionId::DebugRnglists, offset)
        };

        let bytes = ctx.sections.require(section_id)?;
        let mut cursor = Cursor::new(bytes, ctx.endian);
        cursor.seek_to(offset)?;
        Ok(RangeIter {
            base_address: ctx.bases.base_address,
            ctx,
            cursor,
        })
    }

    pub fn next(&mut self) -> Result<Option<PcRange>> {
        if self.ctx.bases.version < 5 {
            self.next_v4()
        } else {
            self.next_v5()
        }
    }

    fn next_v4(&mut self) -> Result<Option<PcRange>> {
        loop {
            let begin = self.cursor.read_native()?;
            let end = self.cursor.read_native()?;
            if begin == 0 && end == 0 {
                return Ok(None);
            }
            if begin == BASE_SELECTION {
                self.base_address = end;
                continue;
            }
            return Ok(Some(PcRange {
                start: self.base_address.wrapping_add(begin),
                end: self.base_address.wrapping_add(end),
            }));
        }
    }

    fn next_v5(&mut self) -> Result<Option<PcRange>> {
        loop {
            let kind = self.cursor.read_u8()?;
            match kind {
                DW_RLE_end_of_list => return Ok(None),
                DW_RLE_base_addressx => {
                    let index = self.cursor.read_uleb128()?;
                    self.base_address = self.debug_addr(index)?;
                }
                DW_RLE_startx_endx => {
                    let start_index = self.cursor.read_uleb128()?;
                    let end_index = self.cursor.read_uleb128()?;
                    let start = self.debug_addr(start_index)?;
                    let end = self.debug_addr(end_index)?;
                    return Ok(Some(PcRange { start, end }));
                }
                DW_RLE_startx_length => {
                    let start_index = self.cursor.read_uleb128()?;
                    let len = self.cursor.read_uleb128()?;
                    let start = self.debug_addr(start_index)?;
                    return Ok(Some(PcRange { start, end: start.wrapping_add(len) }));
                }
                DW_RLE_offset_pair => {
                    let begin = self.cursor.read_uleb128()?;
                    let end = self.cursor.read_uleb128()?;
                    return Ok(Some(PcRange {
                        start: self.base_address.wrapping_add(begin),
                        end: self.base_address.wrapping_add(end),
                    }));
                }
                DW_RLE_base_address => {
                    self.base_address = self.cursor.read_native()?;
                }
                DW_RLE_start_end => {
                    let start = self.cursor.read_native()?;
                    let end = self.cursor.read_native()?;
                    return Ok(Some(PcRange { start, end }));
                }
                DW_RLE_start_length => {
                    let start = self.cursor.read_native()?;
                    let len = self.cursor.read_uleb128()?;
                    return Ok(Some(PcRange { start, end: start.wrapping_add(len) }));
                }
                _ => return Err(bad("unknown range list entry kind")),
            }
        }
    }

    fn debug_addr(&self, index: u64) -> Result<u64> {
        read_debug_addr(self.ctx.sections, self.ctx.endian, self.ctx.bases.addr_base, index)
    }
}

/// Fetch element `index` of the `.debug_addr` array starting at `addr_base`.
/// The base points just past the v5 section header, so the header fields are
/// read back-to-front relative to it.
pub(crate) fn read_debug_addr(
    sections: &Sections<'_>,
    endian: Endian,
    addr_base: u64,
    index: u64,
) -> Result<u64> {
    let bytes = sections.require(SectionId::DebugAddr)?;
    if addr_base < 8 {
        return Err(bad("addr_base points before the .debug_addr header"));
    }

    let mut cursor = Cursor::new(bytes, endian);
    cursor.seek_to(addr_base - 4)?;
    if cursor.read_u16()? != 5 {
        return Err(bad(".debug_addr header version is not 5"));
    }
    let address_size = cursor.read_u8()?;
    let segment_size = cursor.read_u8()?;
    if !matches!(address_size, 1 | 2 | 4 | 8) {
        return Err(Error::UnsupportedAddrSize(address_size));
    }

    let stride = u64::from(address_size) + u64::from(segment_size);
    let offset = index
        .checked_mul(stride)
        .and_then(|rel| rel.checked_add(addr_base))
        .ok_or(Error::PointerOverflow)?;
    cursor.seek_to(offset)?;
    cursor.read_uint(address_size as usize)
}
