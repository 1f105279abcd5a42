//! Parsing of call frame information entries.
//!
//! Source: https://dwarfstd.org/doc/DWARF5.pdf §6.4 Call Frame Information
//! Note that https://refspecs.linuxbase.org/LSB_5.0.0/LSB-Core-generic/LSB-Core-generic/ehframechpt.html
//! contains more details on the `.eh_frame` flavour, which differs from
//! `.debug_frame` in its CIE sentinel, CIE pointer interpretation and
//! augmentation vocabulary.
//!
//! Both sections are a flat sequence of length-prefixed entries. Each CIE
//! carries the parameters shared by the FDEs that reference it, most
//! importantly the pointer encoding its FDEs' addresses are written in; the
//! FDEs then map one program address range each to a call-frame instruction
//! stream. The instruction streams themselves are handed out as raw byte
//! buffers for the call-frame interpreter.
#![allow(non_upper_case_globals)]


use tracing::{instrument, trace};

use crate::consts::*;
use crate::cursor::{Cursor, Endian, Format, MemoryCheck, NATIVE_WORD};
use crate::error::{bad, cast, Error, Result};

/// Which call-frame section an entry was read from. The wire formats are
/// nearly identical but the sentinels and versions differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSection {
    EhFrame,
    DebugFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Cie,
    Fde {
        /// Offset of the referenced CIE's length field in its section.
        cie_length_offset: u64,
    },
    /// A zero length terminates `.eh_frame`.
    Terminator,
}

/// The common head of every call-frame entry: initial length and the id
/// field that distinguishes CIEs from FDEs. After reading one of these the
/// cursor sits at the start of the next entry regardless of what happens to
/// the entry's body.
#[derive(Debug)]
pub(crate) struct EntryHeader<'d> {
    /// Offset of this entry's length field in its section.
    pub length_offset: u64,
    pub format: Format,
    pub kind: EntryKind,
    pub entry_bytes: &'d [u8],
}

pub(crate) fn read_entry_header<'d>(
    cursor: &mut Cursor<'d>,
    section: FrameSection,
) -> Result<EntryHeader<'d>> {
    let length_offset = cursor.pos() as u64;
    let initial = cursor.read_initial_length()?;
    if initial.unit_length == 0 {
        return Ok(EntryHeader {
            length_offset,
            format: initial.format,
            kind: EntryKind::Terminator,
            entry_bytes: &[],
        });
    }

    // Position of the id field; `.eh_frame` CIE pointers are relative to it.
    let start_offset = cursor.pos() as u64;
    let end_offset = start_offset
        .checked_add(initial.unit_length)
        .ok_or(Error::PointerOverflow)?;

    let id = cursor.read_address(initial.format)?;
    let cie_sentinel = match (section, initial.format) {
        (FrameSection::EhFrame, _) => 0,
        (FrameSection::DebugFrame, Format::Dwarf32) => u64::from(u32::MAX),
        (FrameSection::DebugFrame, Format::Dwarf64) => u64::MAX,
    };
    let kind = if id == cie_sentinel {
        EntryKind::Cie
    } else {
        let cie_length_offset = match section {
            FrameSection::EhFrame => start_offset
                .checked_sub(id)
                .ok_or(bad("FDE CIE pointer reaches before its section"))?,
            FrameSection::DebugFrame => id,
        };
        EntryKind::Fde { cie_length_offset }
    };

    let body_len = end_offset
        .checked_sub(cursor.pos() as u64)
        .ok_or(bad("frame entry shorter than its id field"))?;
    let entry_bytes = cursor.read_bytes(cast(body_len)?)?;
    Ok(EntryHeader { length_offset, format: initial.format, kind, entry_bytes })
}

/// Common Information Entry.
///
/// All slices borrow from the section bytes the entry was parsed out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cie<'d> {
    /// Offset of this CIE's length field in its section; FDEs name their CIE
    /// by this offset.
    pub length_offset: u64,
    pub version: u8,
    pub format: Format,
    pub address_size: u8,
    pub segment_selector_size: u8,
    /// A constant that is factored out of all advance location instructions.
    pub code_alignment_factor: u64,
    /// A constant that is factored out of certain offset instructions.
    pub data_alignment_factor: i64,
    /// Which column in the rule table represents the return address of the
    /// function. Note that this column might not correspond to an actual
    /// machine register.
    pub return_address_register: u64,
    /// The full augmentation string, including a leading `z` if present.
    pub aug_str: &'d str,
    pub aug_data: &'d [u8],
    pub lsda_pointer_enc: u8,
    pub personality_enc: Option<u8>,
    pub personality_routine_pointer: Option<u64>,
    /// Encoding of the address fields in this CIE's FDEs.
    pub fde_pointer_enc: u8,
    /// Rules creating the initial setting of each column in the table,
    /// interpreted by the call-frame instruction interpreter.
    pub initial_instructions: &'d [u8],
    is_signal_frame: bool,
    addresses_signed_with_b_key: bool,
    mte_tagged_frame: bool,
}

impl<'d> Cie<'d> {
    /// The `S` augmentation: this frame is a signal handler trampoline.
    pub fn is_signal_frame(&self) -> bool {
        self.is_signal_frame
    }

    /// The `B` augmentation: return addresses are signed with the aarch64
    /// pointer-authentication B key.
    pub fn addresses_signed_with_b_key(&self) -> bool {
        self.addresses_signed_with_b_key
    }

    /// The `G` augmentation: the frame carries MTE tagged memory.
    pub fn mte_tagged_frame(&self) -> bool {
        self.mte_tagged_frame
    }

    #[instrument(skip(entry_bytes, memory_check))]
    pub(crate) fn parse(
        entry_bytes: &'d [u8],
        length_offset: u64,
        format: Format,
        section: FrameSection,
        pc_rel_offset: i64,
        follow_indirect: bool,
        endian: Endian,
        memory_check: Option<MemoryCheck>,
    ) -> Result<Cie<'d>> {
        let mut cursor = Cursor::new(entry_bytes, endian);

        let version = cursor.read_u8()?;
        match section {
            FrameSection::EhFrame => {
                if version != 1 && version != 3 {
                    return Err(Error::UnsupportedDwarfVersion(u16::from(version)));
                }
            }
            FrameSection::DebugFrame => {
                if version != 4 {
                    return Err(Error::UnsupportedDwarfVersion(u16::from(version)));
                }
            }
        }

        let aug_str = cursor.read_utf8_cstr()?;
        let mut has_eh_data = false;
        let mut has_aug_data = false;
        // `z` must come first if present; the legacy "eh" form stands alone;
        // any other character is only meaningful inside augmentation data.
        let aug_rest = if aug_str == "eh" {
            has_eh_data = true;
            ""
        } else if let Some(rest) = aug_str.strip_prefix('z') {
            has_aug_data = true;
            rest
        } else if aug_str.is_empty() {
            ""
        } else {
            return Err(bad("ambiguous augmentation string"));
        };

        let (address_size, segment_selector_size) = if version == 4 {
            (cursor.read_u8()?, cursor.read_u8()?)
        } else {
            (NATIVE_WORD, 0)
        };
        if address_size != NATIVE_WORD {
            return Err(Error::UnsupportedAddrSize(address_size));
        }
        if segment_selector_size != 0 {
            return Err(bad("segmented addressing is not supported"));
        }

        if has_eh_data {
            // The GCC "eh" augmentation stores one pointer here.
            cursor.seek_forward(u64::from(NATIVE_WORD))?;
        }

        let code_alignment_factor = cursor.read_uleb128()?;
        let data_alignment_factor = cursor.read_sleb128()?;
        let return_address_register = if version == 1 {
            u64::from(cursor.read_u8()?)
        } else {
            cursor.read_uleb128()?
        };

        let mut lsda_pointer_enc = DW_EH_PE_omit;
        let mut personality_enc = None;
        let mut personality_routine_pointer = None;
        let mut fde_pointer_enc = DW_EH_PE_absptr;
        let mut is_signal_frame = false;
        let mut addresses_signed_with_b_key = false;
        let mut mte_tagged_frame = false;
        let mut aug_data: &'d [u8] = &[];

        if has_aug_data {
            let aug_data_len = cast::<usize>(cursor.read_uleb128()?)?;
            aug_data = cursor.read_bytes(aug_data_len)?;
            let mut aug = Cursor::new(aug_data, endian);
            for ch in aug_rest.bytes() {
                match ch {
                    b'L' => lsda_pointer_enc = aug.read_u8()?,
                    b'P' => {
                        let enc = aug.read_u8()?;
                        personality_enc = Some(enc);
                        let ctx = EhPointerContext {
                            pc_rel_base: pc_rel_base(&aug, pc_rel_offset),
                            follow_indirect,
                            ..EhPointerContext::default()
                        };
                        personality_routine_pointer =
                            read_eh_pointer(&mut aug, enc, NATIVE_WORD, &ctx, memory_check)?;
                    }
                    b'R' => fde_pointer_enc = aug.read_u8()?,
                    b'S' => is_signal_frame = true,
                    b'B' => addresses_signed_with_b_key = true,
                    b'G' => mte_tagged_frame = true,
                    _ => return Err(bad("unknown augmentation character")),
                }
            }
        }

        let initial_instructions = cursor.rest()?;
        let cie = Cie {
            length_offset,
            version,
            format,
            address_size,
            segment_selector_size,
            code_alignment_factor,
            data_alignment_factor,
            return_address_register,
            aug_str,
            aug_data,
            lsda_pointer_enc,
            personality_enc,
            personality_routine_pointer,
            fde_pointer_enc,
            initial_instructions,
            is_signal_frame,
            addresses_signed_with_b_key,
            mte_tagged_frame,
        };
        trace!("{cie:?}");
        Ok(cie)
    }
}

/// Frame Description Entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fde<'d> {
    /// Offset of the owning CIE's length field in its section.
    pub cie_length_offset: u64,
    /// The address of the first location covered by this entry.
    pub pc_begin: u64,
    /// The number of bytes of program instructions covered by this entry.
    pub pc_range: u64,
    pub lsda_pointer: Option<u64>,
    pub aug_data: &'d [u8],
    /// Table defining instructions, interpreted by the call-frame
    /// instruction interpreter.
    pub instructions: &'d [u8],
}

impl<'d> Fde<'d> {
    #[instrument(skip(entry_bytes, cie, memory_check))]
    pub(crate) fn parse(
        entry_bytes: &'d [u8],
        cie_length_offset: u64,
        cie: &Cie<'d>,
        pc_rel_offset: i64,
        follow_indirect: bool,
        endian: Endian,
        memory_check: Option<MemoryCheck>,
    ) -> Result<Fde<'d>> {
        let mut cursor = Cursor::new(entry_bytes, endian);

        let begin_ctx = EhPointerContext {
            pc_rel_base: pc_rel_base(&cursor, pc_rel_offset),
            follow_indirect,
            ..EhPointerContext::default()
        };
        let pc_begin =
            read_eh_pointer(&mut cursor, cie.fde_pointer_enc, NATIVE_WORD, &begin_ctx, memory_check)?
                .ok_or(bad("FDE without a pc_begin"))?;

        // The range is a plain count of bytes; only the numeric form of the
        // CIE's encoding applies, no base resolution.
        let pc_range = read_eh_pointer(
            &mut cursor,
            cie.fde_pointer_enc & DW_EH_PE_type_mask,
            NATIVE_WORD,
            &EhPointerContext::default(),
            memory_check,
        )?
        .ok_or(bad("FDE without a pc range"))?;

        let mut aug_data: &'d [u8] = &[];
        let mut lsda_pointer = None;
        if cie.aug_str.starts_with('z') {
            let aug_data_len = cast::<usize>(cursor.read_uleb128()?)?;
            aug_data = cursor.read_bytes(aug_data_len)?;
            if cie.lsda_pointer_enc != DW_EH_PE_omit {
                let mut aug = Cursor::new(aug_data, endian);
                let lsda_ctx = EhPointerContext {
                    pc_rel_base: pc_rel_base(&aug, pc_rel_offset),
                    follow_indirect,
                    ..EhPointerContext::default()
                };
                lsda_pointer = read_eh_pointer(
                    &mut aug,
                    cie.lsda_pointer_enc,
                    NATIVE_WORD,
                    &lsda_ctx,
                    memory_check,
                )?;
            }
        }

        let instructions = cursor.rest()?;
        let fde = Fde {
            cie_length_offset,
            pc_begin,
            pc_range,
            lsda_pointer,
            aug_data,
            instructions,
        };
        trace!("{fde:?}");
        Ok(fde)
    }

    pub fn covers(&self, pc: u64) -> bool {
        pc >= self.pc_begin && pc < self.pc_begin.wrapping_add(self.pc_range)
    }
}

/// Bases a DWARF-exception-encoded pointer may be relative to. `pc_rel_base`
/// is always known (the runtime address of the field being read); the others
/// depend on the caller knowing its text/data/function layout.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct EhPointerContext {
    pub pc_rel_base: u64,
    /// Whether the top encoding bit may dereference the computed address.
    /// Only meaningful when the sections live at their runtime addresses.
    pub follow_indirect: bool,
    pub data_rel_base: Option<u64>,
    pub text_rel_base: Option<u64>,
    pub function_rel_base: Option<u64>,
}

/// The runtime address of the cursor's next byte: its current pointer,
/// displaced by the owning section's virtual offset.
pub(crate) fn pc_rel_base(cursor: &Cursor<'_>, pc_rel_offset: i64) -> u64 {
    (cursor.current_ptr() as u64).wrapping_add_signed(pc_rel_offset)
}

enum EhPointer {
    Unsigned(u64),
    Signed(i64),
}

/// Decode one DWARF-exception-encoded pointer. Returns `None` only for the
/// omit encoding.
pub(crate) fn read_eh_pointer(
    cursor: &mut Cursor<'_>,
    encoding: u8,
    addr_size: u8,
    ctx: &EhPointerContext,
    memory_check: Option<MemoryCheck>,
) -> Result<Option<u64>> {
    if encoding == DW_EH_PE_omit {
        return Ok(None);
    }

    let value = match encoding & DW_EH_PE_type_mask {
        DW_EH_PE_absptr => EhPointer::Unsigned(cursor.read_uint(addr_size as usize)?),
        DW_EH_PE_uleb128 => EhPointer::Unsigned(cursor.read_uleb128()?),
        DW_EH_PE_udata2 => EhPointer::Unsigned(cursor.read_uint(2)?),
        DW_EH_PE_udata4 => EhPointer::Unsigned(cursor.read_uint(4)?),
        DW_EH_PE_udata8 => EhPointer::Unsigned(cursor.read_uint(8)?),
        DW_EH_PE_sleb128 => EhPointer::Signed(cursor.read_sleb128()?),
        DW_EH_PE_sdata2 => EhPointer::Signed(i64::from(cursor.read_i16()?)),
        DW_EH_PE_sdata4 => EhPointer::Signed(i64::from(cursor.read_i32()?)),
        DW_EH_PE_sdata8 => EhPointer::Signed(cursor.read_i64()?),
        _ => return Err(bad("invalid pointer encoding value format")),
    };

    let base = match encoding & DW_EH_PE_rel_mask {
        DW_EH_PE_pcrel => Some(ctx.pc_rel_base),
        DW_EH_PE_textrel => Some(ctx.text_rel_base.ok_or(Error::PointerBaseNotSpecified)?),
        DW_EH_PE_datarel => Some(ctx.data_rel_base.ok_or(Error::PointerBaseNotSpecified)?),
        DW_EH_PE_funcrel => Some(ctx.function_rel_base.ok_or(Error::PointerBaseNotSpecified)?),
        _ => None,
    };

    let pointer = match (base, value) {
        (Some(base), EhPointer::Signed(value)) => (base as i64).wrapping_add(value) as u64,
        (Some(base), EhPointer::Unsigned(value)) => base.wrapping_add(value),
        (None, EhPointer::Unsigned(value)) => value,
        (None, EhPointer::Signed(value)) => value as u64,
    };

    if encoding & DW_EH_PE_indirect != 0 && ctx.follow_indirect {
        if addr_size != NATIVE_WORD {
            return Err(Error::NonNativeIndirection);
        }
        let address = cast::<usize>(pointer)?;
        if let Some(check) = memory_check {
            if !check(address, NATIVE_WORD as usize) {
                return Err(Error::InvalidMemory(address));
            }
        }
        // SAFETY: the caller asked for indirection, which only makes sense
        // when the sections are mapped in this process; accessibility is the
        // memory predicate's call when one is installed.
        let deref = unsafe { (address as *const usize).read_unaligned() };
        return Ok(Some(deref as u64));
    }

    Ok(Some(pointer))
}
