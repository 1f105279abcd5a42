//! Locating the unwind information for a program counter.
//!
//! Two strategies, mirroring what a runtime unwinder does. When the linker
//! emitted an `.eh_frame_hdr`, its sorted binary-search table takes us from
//! pc to FDE pointer per query with no setup cost beyond parsing the header
//! once. Without it we walk `.eh_frame` and `.debug_frame` up front, keep
//! every CIE in a map keyed by its length-field offset, and keep the FDEs in
//! a list sorted by `pc_begin` for binary search.

#[cfg(test)]
mod tests;

pub(crate) mod parse;

use std::collections::HashMap;

use tracing::{debug, instrument, trace};

use crate::consts::*;
use crate::cursor::{Cursor, Endian, MemoryCheck, NATIVE_WORD};
use crate::error::{bad, cast, missing, Result};
use crate::sections::{SectionId, Sections};
use parse::{
    pc_rel_base, read_eh_pointer, read_entry_header, Cie, EhPointerContext, EntryKind, Fde,
    FrameSection,
};

/// The parsed fixed part of `.eh_frame_hdr` plus its binary search table,
/// kept as raw bytes and decoded per probe.
#[derive(Debug)]
pub struct ExceptionFrameHeader<'d> {
    pub eh_frame_ptr: u64,
    pub table_enc: u8,
    pub fde_count: u64,
    entries: &'d [u8],
}

/// Everything [`ExceptionFrameHeader::find_entry`] needs beyond the header
/// itself: where the tables actually live and how to touch memory.
pub(crate) struct HdrLookup<'d> {
    /// `.eh_frame` bytes when the section was registered; otherwise reads go
    /// through raw memory gated by the predicate.
    pub eh_frame: Option<&'d [u8]>,
    /// Runtime address of the `.eh_frame_hdr` section start (`datarel` base).
    pub eh_frame_hdr_ptr: u64,
    pub entries_pc_rel_offset: i64,
    pub eh_frame_pc_rel_offset: i64,
    pub follow_indirect: bool,
    pub endian: Endian,
    pub memory_check: Option<MemoryCheck>,
}

impl<'d> ExceptionFrameHeader<'d> {
    /// Size in bytes of one search table entry. Each entry is two pointers
    /// (initial pc, FDE address) of the same fixed-width encoding, which is
    /// why the per-field sizes are doubled here.
    pub fn entry_size(table_enc: u8) -> Result<usize> {
        match table_enc & DW_EH_PE_type_mask {
            DW_EH_PE_udata2 | DW_EH_PE_sdata2 => Ok(4),
            DW_EH_PE_udata4 | DW_EH_PE_sdata4 => Ok(8),
            DW_EH_PE_udata8 | DW_EH_PE_sdata8 => Ok(16),
            // A binary search table needs same-sized entries.
            _ => Err(bad("variable-size eh_frame_hdr table encoding")),
        }
    }

    #[instrument(skip(bytes, memory_check))]
    pub(crate) fn parse(
        bytes: &'d [u8],
        endian: Endian,
        pc_rel_offset: i64,
        data_rel_base: u64,
        follow_indirect: bool,
        memory_check: Option<MemoryCheck>,
    ) -> Result<Self> {
        let mut cursor = Cursor::new(bytes, endian);

        let version = cursor.read_u8()?;
        if version != 1 {
            return Err(bad(".eh_frame_hdr version is not 1"));
        }
        let eh_frame_ptr_enc = cursor.read_u8()?;
        let fde_count_enc = cursor.read_u8()?;
        let table_enc = cursor.read_u8()?;
        if eh_frame_ptr_enc == DW_EH_PE_omit
            || fde_count_enc == DW_EH_PE_omit
            || table_enc == DW_EH_PE_omit
        {
            return Err(missing("eh_frame_hdr carries no binary search table"));
        }

        let ctx = |cursor: &Cursor<'_>| EhPointerContext {
            pc_rel_base: pc_rel_base(cursor, pc_rel_offset),
            follow_indirect,
            data_rel_base: Some(data_rel_base),
            ..EhPointerContext::default()
        };
        let ptr_ctx = ctx(&cursor);
        let eh_frame_ptr =
            read_eh_pointer(&mut cursor, eh_frame_ptr_enc, NATIVE_WORD, &ptr_ctx, memory_check)?
                .ok_or(bad("eh_frame_hdr without an eh_frame pointer"))?;
        let count_ctx = ctx(&cursor);
        let fde_count =
            read_eh_pointer(&mut cursor, fde_count_enc, NATIVE_WORD, &count_ctx, memory_check)?
                .ok_or(bad("eh_frame_hdr without an FDE count"))?;

        let entry_size = Self::entry_size(table_enc)? as u64;
        let entries_len = fde_count
            .checked_mul(entry_size)
            .ok_or(crate::error::Error::PointerOverflow)?;
        let entries = cursor.read_bytes(cast(entries_len)?)?;

        trace!(eh_frame_ptr, fde_count, table_enc, "parsed .eh_frame_hdr");
        Ok(ExceptionFrameHeader { eh_frame_ptr, table_enc, fde_count, entries })
    }

    /// Binary-search the table for the FDE covering `pc`, then read that FDE
    /// and its CIE out of `.eh_frame`.
    #[instrument(skip(self, lookup))]
    pub(crate) fn find_entry(&self, lookup: &HdrLookup<'d>, pc: u64) -> Result<(Cie<'d>, Fde<'d>)> {
        let entry_size = Self::entry_size(self.table_enc)? as u64;
        if self.fde_count == 0 {
            return Err(missing("eh_frame_hdr table is empty"));
        }

        let mut cursor = match lookup.memory_check {
            Some(check) => Cursor::with_memory_check(self.entries, lookup.endian, check),
            None => Cursor::new(self.entries, lookup.endian),
        };
        let probe_ctx = |cursor: &Cursor<'_>| EhPointerContext {
            pc_rel_base: pc_rel_base(cursor, lookup.entries_pc_rel_offset),
            follow_indirect: lookup.follow_indirect,
            data_rel_base: Some(lookup.eh_frame_hdr_ptr),
            ..EhPointerContext::default()
        };

        // The candidate window is [left, left + len); every probe either
        // halves it or advances its base.
        let mut left: u64 = 0;
        let mut len = self.fde_count;
        while len > 1 {
            let mid = left + len / 2;
            cursor.seek_to(mid * entry_size)?;
            let ctx = probe_ctx(&cursor);
            let pc_begin = read_eh_pointer(
                &mut cursor,
                self.table_enc,
                NATIVE_WORD,
                &ctx,
                lookup.memory_check,
            )?
            .ok_or(bad("eh_frame_hdr entry without an initial pc"))?;
            if pc < pc_begin {
                len /= 2;
            } else {
                left = mid;
                if pc == pc_begin {
                    break;
                }
                len -= len / 2;
            }
        }

        // Second pointer of the converged entry is the FDE's address.
        cursor.seek_to(left * entry_size + entry_size / 2)?;
        let ctx = probe_ctx(&cursor);
        let fde_ptr = read_eh_pointer(
            &mut cursor,
            self.table_enc,
            NATIVE_WORD,
            &ctx,
            lookup.memory_check,
        )?
        .ok_or(bad("eh_frame_hdr entry without an FDE pointer"))?;
        let fde_offset = fde_ptr
            .checked_sub(self.eh_frame_ptr)
            .ok_or(bad("FDE pointer reaches before .eh_frame"))?;
        debug!(fde_ptr, fde_offset, "eh_frame_hdr search converged");

        let eh_frame: &'d [u8] = match lookup.eh_frame {
            Some(bytes) => bytes,
            None => {
                // The section extent is unknown; every byte we touch is
                // checked against the memory predicate before dereference.
                let check_exists = lookup.memory_check.is_some();
                if !check_exists {
                    return Err(missing(".eh_frame"));
                }
                let base = cast::<usize>(self.eh_frame_ptr)?;
                // SAFETY: reads through this slice are bounds-unknowable by
                // construction; the cursor below consults the memory
                // predicate before each access.
                unsafe {
                    core::slice::from_raw_parts(
                        base as *const u8,
                        (isize::MAX as usize).saturating_sub(base),
                    )
                }
            }
        };
        let mut frame_cursor = match (lookup.eh_frame, lookup.memory_check) {
            (None, Some(check)) => Cursor::with_memory_check(eh_frame, lookup.endian, check),
            _ => Cursor::new(eh_frame, lookup.endian),
        };

        frame_cursor.seek_to(fde_offset)?;
        let fde_header = read_entry_header(&mut frame_cursor, FrameSection::EhFrame)?;
        let EntryKind::Fde { cie_length_offset } = fde_header.kind else {
            return Err(bad("eh_frame_hdr table pointed at a non-FDE entry"));
        };

        frame_cursor.seek_to(cie_length_offset)?;
        let cie_header = read_entry_header(&mut frame_cursor, FrameSection::EhFrame)?;
        if cie_header.kind != EntryKind::Cie {
            return Err(bad("FDE references a non-CIE entry"));
        }

        let cie = Cie::parse(
            cie_header.entry_bytes,
            cie_header.length_offset,
            cie_header.format,
            FrameSection::EhFrame,
            lookup.eh_frame_pc_rel_offset,
            lookup.follow_indirect,
            lookup.endian,
            lookup.memory_check,
        )?;
        let fde = Fde::parse(
            fde_header.entry_bytes,
            cie_length_offset,
            &cie,
            lookup.eh_frame_pc_rel_offset,
            lookup.follow_indirect,
            lookup.endian,
            lookup.memory_check,
        )?;
        Ok((cie, fde))
    }
}

/// Walk `.eh_frame` then `.debug_frame`, collecting CIEs into a map keyed by
/// their length-field offset and FDEs into a list sorted by `pc_begin`.
#[instrument(skip(sections, memory_check))]
pub(crate) fn scan_cie_fde_info<'d>(
    sections: &Sections<'d>,
    endian: Endian,
    base_address: u64,
    memory_check: Option<MemoryCheck>,
) -> Result<(HashMap<u64, Cie<'d>>, Vec<Fde<'d>>)> {
    let mut cie_map = HashMap::new();
    let mut fde_list: Vec<Fde<'d>> = Vec::new();

    let frame_sections = [
        (SectionId::EhFrame, FrameSection::EhFrame),
        (SectionId::DebugFrame, FrameSection::DebugFrame),
    ];
    for (section_id, kind) in frame_sections {
        let Some(section) = sections.get(section_id) else {
            continue;
        };
        let pc_rel_offset = section.virtual_offset(base_address);

        let mut cursor = Cursor::new(section.data, endian);
        while !cursor.is_empty() {
            let header = read_entry_header(&mut cursor, kind)?;
            match header.kind {
                EntryKind::Cie => {
                    let cie = Cie::parse(
                        header.entry_bytes,
                        header.length_offset,
                        header.format,
                        kind,
                        pc_rel_offset,
                        true,
                        endian,
                        memory_check,
                    )?;
                    cie_map.insert(header.length_offset, cie);
                }
                EntryKind::Fde { cie_length_offset } => {
                    let cie = cie_map
                        .get(&cie_length_offset)
                        .ok_or(bad("FDE references an unknown CIE"))?;
                    let fde = Fde::parse(
                        header.entry_bytes,
                        cie_length_offset,
                        cie,
                        pc_rel_offset,
                        true,
                        endian,
                        memory_check,
                    )?;
                    fde_list.push(fde);
                }
                EntryKind::Terminator => break,
            }
        }
    }

    // Ties are physically impossible in valid data, so an unstable sort is
    // fine.
    fde_list.sort_unstable_by_key(|fde| fde.pc_begin);
    debug!(cies = cie_map.len(), fdes = fde_list.len(), "scanned unwind info");
    Ok((cie_map, fde_list))
}
