//! A decoder for DWARF debugging information and the `.eh_frame` exception
//! handling tables.
//!
//! Given the raw bytes of a program's debug sections this crate answers the
//! two questions a debugger, crash reporter or unwinder keeps asking about
//! an instruction address: which function and source line produced it
//! ([`Dwarf::get_symbol_name`], [`Dwarf::find_compile_unit`],
//! [`Dwarf::get_line_number_info`]), and which CIE/FDE pair describes how to
//! virtually unwind its frame ([`Dwarf::unwind_info_for_address`]).
//!
//! How the sections are dug out of an ELF/Mach-O/COFF container is the
//! caller's business, as are the DWARF expression evaluator and the
//! call-frame instruction interpreter: this crate frames the instruction
//! byte streams and hands them over. Everything returned borrows from the
//! section bytes, so nothing is copied and the [`Dwarf`] cannot outlive the
//! buffers it was built on.
//!
//! DWARF versions 2 through 5 are supported, for targets whose address size
//! matches our own.

mod abbrev;
pub mod consts;
mod cursor;
mod error;
mod form;
mod frame;
mod line;
mod ranges;
mod sections;
#[cfg(test)]
mod test_util;
mod unit;

use std::collections::HashMap;

use tracing::instrument;

pub use crate::abbrev::{Abbrev, AbbrevTable, AttrSpec};
pub use crate::cursor::{Endian, Format, MemoryCheck, UnitLength};
pub use crate::error::{Error, Result};
pub use crate::form::FormValue;
pub use crate::frame::parse::{Cie, Fde, FrameSection};
pub use crate::frame::ExceptionFrameHeader;
pub use crate::line::SourceLocation;
pub use crate::sections::{Section, SectionId, Sections};
pub use crate::unit::{CompileUnit, Die, Func, PcRange};

use crate::frame::HdrLookup;

/// The decoder. Built from a [`Sections`] registry; [`Dwarf::open`] prepares
/// symbolication queries, [`Dwarf::scan_all_unwind_info`] prepares unwind
/// queries. Initialization takes `&mut self` and the queries take `&self`,
/// so a warmed-up `Dwarf` can serve concurrent readers.
pub struct Dwarf<'d> {
    endian: Endian,
    memory_check: Option<MemoryCheck>,
    sections: Sections<'d>,
    abbrev_tables: HashMap<u64, AbbrevTable>,
    compile_units: Vec<CompileUnit<'d>>,
    funcs: Vec<Func<'d>>,
    cie_map: HashMap<u64, Cie<'d>>,
    fde_list: Vec<Fde<'d>>,
    eh_frame_hdr: Option<ExceptionFrameHeader<'d>>,
    unwind_base_address: u64,
}

impl<'d> Dwarf<'d> {
    pub fn new(sections: Sections<'d>) -> Self {
        Self::with_endian(sections, Endian::NATIVE)
    }

    pub fn with_endian(sections: Sections<'d>, endian: Endian) -> Self {
        Dwarf {
            endian,
            memory_check: None,
            sections,
            abbrev_tables: HashMap::new(),
            compile_units: Vec::new(),
            funcs: Vec::new(),
            cie_map: HashMap::new(),
            fde_list: Vec::new(),
            eh_frame_hdr: None,
            unwind_base_address: 0,
        }
    }

    /// Install a predicate consulted before dereferencing memory that was
    /// not handed in as section bytes. Only relevant when inspecting a live
    /// process.
    pub fn set_memory_check(&mut self, check: MemoryCheck) {
        self.memory_check = Some(check);
    }

    pub fn sections(&self) -> &Sections<'d> {
        &self.sections
    }

    pub fn compile_units(&self) -> &[CompileUnit<'d>] {
        &self.compile_units
    }

    /// Scan `.debug_info`: collect every function-like DIE, then materialize
    /// the compilation units. Requires `.debug_info` and `.debug_abbrev`.
    #[instrument(skip(self))]
    pub fn open(&mut self) -> Result<()> {
        self.sections.require(SectionId::DebugInfo)?;
        self.sections.require(SectionId::DebugAbbrev)?;
        self.funcs =
            unit::scan_all_functions(&self.sections, self.endian, &mut self.abbrev_tables)?;
        self.compile_units =
            unit::scan_all_compile_units(&self.sections, self.endian, &mut self.abbrev_tables)?;
        Ok(())
    }

    /// Prepare unwind lookups. Keeps `.eh_frame_hdr`'s binary search table
    /// when one is present and usable; otherwise builds the sorted FDE list
    /// from `.eh_frame` and `.debug_frame`. `base_address` is where the
    /// module is loaded, used to give sections their runtime addresses.
    #[instrument(skip(self))]
    pub fn scan_all_unwind_info(&mut self, base_address: u64) -> Result<()> {
        self.unwind_base_address = base_address;

        if let Some(section) = self.sections.get(SectionId::EhFrameHdr) {
            let pc_rel_offset = section.virtual_offset(base_address);
            let data_rel_base = section_runtime_addr(&section, base_address);
            match ExceptionFrameHeader::parse(
                section.data,
                self.endian,
                pc_rel_offset,
                data_rel_base,
                true,
                self.memory_check,
            ) {
                Ok(header) => {
                    self.eh_frame_hdr = Some(header);
                    return Ok(());
                }
                Err(err) => {
                    tracing::debug!(?err, "discarding unusable .eh_frame_hdr");
                }
            }
        }

        let (cie_map, fde_list) =
            frame::scan_cie_fde_info(&self.sections, self.endian, base_address, self.memory_check)?;
        self.cie_map = cie_map;
        self.fde_list = fde_list;
        Ok(())
    }

    /// Name of the function whose range covers `address`, if the scan found
    /// one.
    pub fn get_symbol_name(&self, address: u64) -> Option<&'d str> {
        self.funcs
            .iter()
            .find(|func| func.pc_range.is_some_and(|range| range.contains(address)))
            .and_then(|func| func.name)
    }

    /// The compilation unit whose address ranges cover `address`.
    pub fn find_compile_unit(&self, address: u64) -> Result<&CompileUnit<'d>> {
        unit::find_compile_unit(&self.compile_units, &self.sections, self.endian, address)
    }

    /// Run `cu`'s line program until it produces the row covering `address`.
    pub fn get_line_number_info(
        &self,
        cu: &CompileUnit<'d>,
        address: u64,
    ) -> Result<SourceLocation> {
        line::line_number_info(&self.sections, self.endian, cu, address)
    }

    /// The CIE/FDE pair needed to virtually unwind one frame at `pc`,
    /// resolved through whichever index [`Dwarf::scan_all_unwind_info`]
    /// prepared.
    pub fn unwind_info_for_address(&self, pc: u64) -> Result<(Cie<'d>, Fde<'d>)> {
        if let Some(header) = &self.eh_frame_hdr {
            let hdr_section = self
                .sections
                .get(SectionId::EhFrameHdr)
                .ok_or(error::missing(".eh_frame_hdr"))?;
            let lookup = HdrLookup {
                eh_frame: self.sections.data(SectionId::EhFrame),
                eh_frame_hdr_ptr: section_runtime_addr(&hdr_section, self.unwind_base_address),
                entries_pc_rel_offset: hdr_section.virtual_offset(self.unwind_base_address),
                eh_frame_pc_rel_offset: self
                    .sections
                    .virtual_offset(SectionId::EhFrame, self.unwind_base_address),
                follow_indirect: true,
                endian: self.endian,
                memory_check: self.memory_check,
            };
            let (cie, fde) = header.find_entry(&lookup, pc)?;
            if !fde.covers(pc) {
                return Err(error::missing("no FDE covers the address"));
            }
            return Ok((cie, fde));
        }

        let upper = self.fde_list.partition_point(|fde| fde.pc_begin <= pc);
        let fde = upper
            .checked_sub(1)
            .map(|index| &self.fde_list[index])
            .filter(|fde| fde.covers(pc))
            .ok_or(error::missing("no FDE covers the address"))?;
        let cie = self
            .cie_map
            .get(&fde.cie_length_offset)
            .ok_or(error::bad("FDE references an unknown CIE"))?;
        Ok((cie.clone(), fde.clone()))
    }
}

/// Where a section's first byte lives at runtime: the declared virtual
/// address when one was registered, the buffer itself otherwise.
fn section_runtime_addr(section: &Section<'_>, base_address: u64) -> u64 {
    match section.virtual_address {
        Some(va) => base_address.wrapping_add(va),
        None => section.data.as_ptr() as u64,
    }
}
