//! Walking the `.debug_info` section.
//!
//! The section is a sequence of compilation units, each a header followed by
//! a flattened DIE tree encoded against an abbreviation table. We make two
//! passes: one collecting every function-like DIE into a flat list for
//! symbol-name lookup, and one materializing the unit root DIEs so queries
//! can find the unit covering an address and chase its attributes later.


use std::collections::HashMap;

use tracing::trace;

use crate::abbrev::{self, AbbrevTable};
use crate::consts::*;
use crate::cursor::{Cursor, Endian, Format, NATIVE_WORD};
use crate::error::{bad, missing, Error, Result};
use crate::form::{parse_form, FormValue};
use crate::ranges::{self, RangeIter};
use crate::sections::{SectionId, Sections};

/// Half-open address range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcRange {
    pub start: u64,
    pub end: u64,
}

impl PcRange {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }
}

/// A function-like DIE flattened into what symbolication needs. Functions
/// spanning several ranges appear once per range.
#[derive(Debug, Clone, Copy)]
pub struct Func<'d> {
    pub name: Option<&'d str>,
    pub pc_range: Option<PcRange>,
}

/// A decoded Debugging Information Entry.
#[derive(Debug)]
pub struct Die<'d> {
    pub tag: u64,
    pub has_children: bool,
    pub attrs: Vec<(u64, FormValue<'d>)>,
}

impl<'d> Die<'d> {
    pub fn attr(&self, id: u64) -> Option<&FormValue<'d>> {
        self.attrs.iter().find(|(attr, _)| *attr == id).map(|(_, value)| value)
    }
}

#[derive(Debug)]
pub struct CompileUnit<'d> {
    pub version: u16,
    pub format: Format,
    /// The unit's root DIE, retained past the scan.
    pub die: Die<'d>,
    pub pc_range: Option<PcRange>,
    /// Byte offsets into the respective indexed sections; zero means unset.
    pub str_offsets_base: u64,
    pub addr_base: u64,
    pub rnglists_base: u64,
    pub loclists_base: u64,
    /// Handed unevaluated to the expression evaluator.
    pub frame_base: Option<FormValue<'d>>,
    pub(crate) base_address: u64,
}

/// The per-unit context needed to resolve indexed forms.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UnitBases {
    pub version: u16,
    pub format: Format,
    /// The unit's `DW_AT_low_pc`, zero if absent. Seeds range lists.
    pub base_address: u64,
    pub str_offsets_base: u64,
    pub addr_base: u64,
    pub rnglists_base: u64,
    pub loclists_base: u64,
}

/// Everything needed to turn an indexed [`FormValue`] into bytes: the
/// sections and the owning unit's base offsets.
#[derive(Clone, Copy)]
pub(crate) struct ResolveCtx<'a, 'd> {
    pub sections: &'a Sections<'d>,
    pub endian: Endian,
    pub bases: UnitBases,
}

impl<'a, 'd> ResolveCtx<'a, 'd> {
    /// Resolve a string-class value through whichever section it points at.
    pub fn string(&self, value: &FormValue<'d>) -> Result<&'d str> {
        match *value {
            FormValue::String(s) => Ok(s),
            FormValue::Strp(offset) => {
                cstr_at(self.sections.require(SectionId::DebugStr)?, offset, self.endian)
            }
            FormValue::LineStrp(offset) => {
                cstr_at(self.sections.require(SectionId::DebugLineStr)?, offset, self.endian)
            }
            FormValue::StrX(index) => {
                if self.bases.str_offsets_base == 0 {
                    return Err(bad("strx form without a str_offsets_base"));
                }
                let offsets = self.sections.require(SectionId::DebugStrOffsets)?;
                let word = self.bases.format.word_size() as u64;
                let slot = index
                    .checked_mul(word)
                    .and_then(|rel| rel.checked_add(self.bases.str_offsets_base))
                    .ok_or(Error::PointerOverflow)?;
                let mut cursor = Cursor::new(offsets, self.endian);
                cursor.seek_to(slot)?;
                let offset = cursor.read_address(self.bases.format)?;
                cstr_at(self.sections.require(SectionId::DebugStr)?, offset, self.endian)
            }
            _ => Err(bad("expected a string attribute value")),
        }
    }

    /// Resolve an address-class value, indexing `.debug_addr` if needed.
    pub fn addr(&self, value: &FormValue<'d>) -> Result<u64> {
        match *value {
            FormValue::Addr(address) => Ok(address),
            FormValue::AddrX(index) => {
                ranges::read_debug_addr(self.sections, self.endian, self.bases.addr_base, index)
            }
            _ => Err(bad("expected an address attribute value")),
        }
    }
}

fn cstr_at<'d>(bytes: &'d [u8], offset: u64, endian: Endian) -> Result<&'d str> {
    let mut cursor = Cursor::new(bytes, endian);
    cursor.seek_to(offset)?;
    cursor.read_utf8_cstr()
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct UnitHeader {
    pub format: Format,
    pub version: u16,
    pub abbrev_offset: u64,
    /// Offset of the unit's length field; `ref` forms are relative to it.
    pub unit_offset: u64,
    /// One past the unit's last byte.
    pub unit_end: u64,
    pub unit_length: u64,
}

fn read_unit_header(cursor: &mut Cursor<'_>) -> Result<UnitHeader> {
    let unit_offset = cursor.pos() as u64;
    let initial = cursor.read_initial_length()?;
    if initial.unit_length == 0 {
        return Ok(UnitHeader {
            format: initial.format,
            version: 0,
            abbrev_offset: 0,
            unit_offset,
            unit_end: cursor.pos() as u64,
            unit_length: 0,
        });
    }
    let unit_end = unit_offset + initial.header_length as u64 + initial.unit_length;

    let version = cursor.read_u16()?;
    if !(2..=5).contains(&version) {
        return Err(Error::UnsupportedDwarfVersion(version));
    }
    let (abbrev_offset, address_size) = if version >= 5 {
        if cursor.read_u8()? != DW_UT_compile {
            return Err(bad("unsupported unit type"));
        }
        let address_size = cursor.read_u8()?;
        (cursor.read_address(initial.format)?, address_size)
    } else {
        let abbrev_offset = cursor.read_address(initial.format)?;
        (abbrev_offset, cursor.read_u8()?)
    };
    if address_size != NATIVE_WORD {
        return Err(Error::UnsupportedAddrSize(address_size));
    }

    Ok(UnitHeader {
        format: initial.format,
        version,
        abbrev_offset,
        unit_offset,
        unit_end,
        unit_length: initial.unit_length,
    })
}

/// Decode the DIE at the cursor. `None` is a null DIE (abbreviation code 0),
/// which terminates sibling lists and pads function tails.
fn parse_die<'d>(
    cursor: &mut Cursor<'d>,
    table: &AbbrevTable,
    format: Format,
) -> Result<Option<Die<'d>>> {
    let code = cursor.read_uleb128()?;
    if code == 0 {
        return Ok(None);
    }
    let abbrev = table.get(code).ok_or(bad("abbreviation code not in table"))?;

    let mut attrs = Vec::with_capacity(abbrev.attrs.len());
    for spec in &abbrev.attrs {
        let value = parse_form(cursor, format, spec.form, spec.implicit_const)?;
        attrs.push((spec.id, value));
    }
    Ok(Some(Die {
        tag: abbrev.tag,
        has_children: abbrev.has_children,
        attrs,
    }))
}

fn unit_bases_from<'d>(
    die: &Die<'d>,
    unit: &UnitHeader,
    sections: &Sections<'d>,
    endian: Endian,
) -> Result<UnitBases> {
    let mut bases = UnitBases {
        version: unit.version,
        format: unit.format,
        ..UnitBases::default()
    };
    if let Some(value) = die.attr(DW_AT_str_offsets_base) {
        bases.str_offsets_base = value.sec_offset()?;
    }
    if let Some(value) = die.attr(DW_AT_addr_base) {
        bases.addr_base = value.sec_offset()?;
    }
    if let Some(value) = die.attr(DW_AT_rnglists_base) {
        bases.rnglists_base = value.sec_offset()?;
    }
    if let Some(value) = die.attr(DW_AT_loclists_base) {
        bases.loclists_base = value.sec_offset()?;
    }
    if let Some(value) = die.attr(DW_AT_low_pc) {
        let ctx = ResolveCtx { sections, endian, bases };
        match ctx.addr(value) {
            Ok(address) => bases.base_address = address,
            Err(err) if err.is_missing() => {}
            Err(err) => return Err(err),
        }
    }
    Ok(bases)
}

/// Find the function's name, chasing `DW_AT_abstract_origin` /
/// `DW_AT_specification` references for at most three hops. References are
/// unit-relative and bounded by the unit size, so adversarial chains cannot
/// walk out of the unit or loop forever.
fn resolve_function_name<'d>(
    die: &Die<'d>,
    info: &'d [u8],
    table: &AbbrevTable,
    unit: &UnitHeader,
    ctx: &ResolveCtx<'_, 'd>,
) -> Result<Option<&'d str>> {
    let mut chased: Option<Die<'d>> = None;
    for _ in 0..3 {
        let target = {
            let current = chased.as_ref().unwrap_or(die);
            if let Some(value) = current.attr(DW_AT_name) {
                return ctx.string(value).map(Some);
            }
            match current
                .attr(DW_AT_abstract_origin)
                .or_else(|| current.attr(DW_AT_specification))
            {
                Some(reference) => reference.unit_ref()?,
                None => return Ok(None),
            }
        };
        if target >= unit.unit_end - unit.unit_offset {
            return Err(bad("DIE reference outside its unit"));
        }
        let mut cursor = Cursor::new(info, ctx.endian);
        cursor.seek_to(unit.unit_offset + target)?;
        chased = Some(
            parse_die(&mut cursor, table, unit.format)?.ok_or(bad("DIE reference to a null DIE"))?,
        );
    }
    if let Some(last) = chased.as_ref() {
        if let Some(value) = last.attr(DW_AT_name) {
            return ctx.string(value).map(Some);
        }
    }
    Ok(None)
}

/// Derive `[low_pc, high_pc)` from the DIE, or `None` if the attributes are
/// absent or their resolution came up with missing info.
fn function_pc_range<'d>(die: &Die<'d>, ctx: &ResolveCtx<'_, 'd>) -> Result<Option<PcRange>> {
    let low = match die.attr(DW_AT_low_pc) {
        Some(value) => match ctx.addr(value) {
            Ok(address) => address,
            Err(err) if err.is_missing() => return Ok(None),
            Err(err) => return Err(err),
        },
        None => return Ok(None),
    };
    let Some(high) = die.attr(DW_AT_high_pc) else {
        return Ok(None);
    };
    let end = match *high {
        // Either an absolute end address or an offset from low_pc.
        FormValue::Addr(address) => address,
        FormValue::Udata(offset) => low.checked_add(offset).ok_or(Error::PointerOverflow)?,
        FormValue::Sdata(offset) => low.checked_add_signed(offset).ok_or(Error::PointerOverflow)?,
        _ => return Err(bad("unexpected high_pc form")),
    };
    Ok(Some(PcRange { start: low, end }))
}

/// First pass: collect every function-like DIE in every unit.
pub(crate) fn scan_all_functions<'d>(
    sections: &Sections<'d>,
    endian: Endian,
    abbrev_cache: &mut HashMap<u64, AbbrevTable>,
) -> Result<Vec<Func<'d>>> {
    let info = sections.require(SectionId::DebugInfo)?;
    let abbrev_bytes = sections.require(SectionId::DebugAbbrev)?;

    let mut funcs = Vec::new();
    let mut cursor = Cursor::new(info, endian);
    while !cursor.is_empty() {
        let unit = read_unit_header(&mut cursor)?;
        if unit.unit_length == 0 {
            break;
        }
        let table = abbrev::cached(abbrev_cache, abbrev_bytes, endian, unit.abbrev_offset)?;
        let mut bases = UnitBases {
            version: unit.version,
            format: unit.format,
            ..UnitBases::default()
        };

        while (cursor.pos() as u64) < unit.unit_end {
            let Some(die) = parse_die(&mut cursor, table, unit.format)? else {
                continue;
            };
            match die.tag {
                DW_TAG_compile_unit => {
                    bases = unit_bases_from(&die, &unit, sections, endian)?;
                }
                DW_TAG_subprogram | DW_TAG_inlined_subroutine | DW_TAG_subroutine
                | DW_TAG_entry_point => {
                    let ctx = ResolveCtx { sections, endian, bases };
                    let name = resolve_function_name(&die, info, table, &unit, &ctx)?;

                    let mut range_added = false;
                    if let Some(range) = function_pc_range(&die, &ctx)? {
                        funcs.push(Func { name, pc_range: Some(range) });
                        range_added = true;
                    }
                    if !range_added {
                        if let Some(ranges_value) = die.attr(DW_AT_ranges) {
                            match RangeIter::init(ranges_value, ctx) {
                                Ok(mut iter) => {
                                    while let Some(range) = iter.next()? {
                                        funcs.push(Func { name, pc_range: Some(range) });
                                        range_added = true;
                                    }
                                }
                                // No range list for this DIE; keep scanning.
                                Err(err) if err.is_missing() => {}
                                Err(err) => return Err(err),
                            }
                        }
                    }
                    if !range_added && name.is_some() {
                        funcs.push(Func { name, pc_range: None });
                    }
                }
                _ => {}
            }
        }
        cursor.seek_to(unit.unit_end)?;
    }
    trace!(count = funcs.len(), "scanned functions");
    Ok(funcs)
}

/// Second pass: materialize one [`CompileUnit`] per unit from its root DIE.
pub(crate) fn scan_all_compile_units<'d>(
    sections: &Sections<'d>,
    endian: Endian,
    abbrev_cache: &mut HashMap<u64, AbbrevTable>,
) -> Result<Vec<CompileUnit<'d>>> {
    let info = sections.require(SectionId::DebugInfo)?;
    let abbrev_bytes = sections.require(SectionId::DebugAbbrev)?;

    let mut units = Vec::new();
    let mut cursor = Cursor::new(info, endian);
    while !cursor.is_empty() {
        let unit = read_unit_header(&mut cursor)?;
        if unit.unit_length == 0 {
            break;
        }
        let table = abbrev::cached(abbrev_cache, abbrev_bytes, endian, unit.abbrev_offset)?;

        let die = parse_die(&mut cursor, table, unit.format)?
            .ok_or(bad("compilation unit without a root DIE"))?;
        if die.tag != DW_TAG_compile_unit {
            cursor.seek_to(unit.unit_end)?;
            continue;
        }

        let bases = unit_bases_from(&die, &unit, sections, endian)?;
        let ctx = ResolveCtx { sections, endian, bases };
        let pc_range = match function_pc_range(&die, &ctx) {
            Ok(range) => range,
            Err(err) if err.is_missing() => None,
            Err(err) => return Err(err),
        };

        let frame_base = die.attr(DW_AT_frame_base).copied();
        units.push(CompileUnit {
            version: unit.version,
            format: unit.format,
            die,
            pc_range,
            str_offsets_base: bases.str_offsets_base,
            addr_base: bases.addr_base,
            rnglists_base: bases.rnglists_base,
            loclists_base: bases.loclists_base,
            frame_base,
            base_address: bases.base_address,
        });
        cursor.seek_to(unit.unit_end)?;
    }
    trace!(count = units.len(), "scanned compilation units");
    Ok(units)
}

impl<'d> CompileUnit<'d> {
    pub(crate) fn resolve_ctx<'a>(
        &self,
        sections: &'a Sections<'d>,
        endian: Endian,
    ) -> ResolveCtx<'a, 'd> {
        ResolveCtx {
            sections,
            endian,
            bases: UnitBases {
                version: self.version,
                format: self.format,
                base_address: self.base_address,
                str_offsets_base: self.str_offsets_base,
                addr_base: self.addr_base,
                rnglists_base: self.rnglists_base,
                loclists_base: self.loclists_base,
            },
        }
    }
}

/// Linear scan of the unit list: first unit whose `pc_range` or range list
/// covers the address wins.
pub(crate) fn find_compile_unit<'a, 'd>(
    units: &'a [CompileUnit<'d>],
    sections: &Sections<'d>,
    endian: Endian,
    address: u64,
) -> Result<&'a CompileUnit<'d>> {
    for unit in units {
        if unit.pc_range.is_some_and(|range| range.contains(address)) {
            return Ok(unit);
        }
        let Some(ranges_value) = unit.die.attr(DW_AT_ranges) else {
            continue;
        };
        let ctx = unit.resolve_ctx(sections, endian);
        let mut iter = match RangeIter::init(ranges_value, ctx) {
            Ok(iter) => iter,
            Err(err) if err.is_missing() => continue,
            Err(err) => return Err(err),
        };
        while let Some(range) = iter.next()? {
            if range.contains(address) {
                return Ok(unit);
            }
        }
    }
    Err(missing("no compilation unit covers the address"))
}
