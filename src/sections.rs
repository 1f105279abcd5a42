//! The registry of debug sections a [`crate::Dwarf`] is built from. The
//! container format (ELF, Mach-O, COFF) is somebody else's problem; we take
//! named byte ranges and, for sections that are mapped in a running process,
//! the virtual address they are mapped at.

use crate::error::{missing, Result};

/// The sections the decoder knows how to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SectionId {
    DebugInfo,
    DebugAbbrev,
    DebugStr,
    DebugStrOffsets,
    DebugLine,
    DebugLineStr,
    DebugRanges,
    DebugLoclists,
    DebugRnglists,
    DebugAddr,
    DebugNames,
    DebugFrame,
    EhFrame,
    EhFrameHdr,
}

impl SectionId {
    pub const COUNT: usize = 14;

    pub fn name(self) -> &'static str {
        match self {
            SectionId::DebugInfo => ".debug_info",
            SectionId::DebugAbbrev => ".debug_abbrev",
            SectionId::DebugStr => ".debug_str",
            SectionId::DebugStrOffsets => ".debug_str_offsets",
            SectionId::DebugLine => ".debug_line",
            SectionId::DebugLineStr => ".debug_line_str",
            SectionId::DebugRanges => ".debug_ranges",
            SectionId::DebugLoclists => ".debug_loclists",
            SectionId::DebugRnglists => ".debug_rnglists",
            SectionId::DebugAddr => ".debug_addr",
            SectionId::DebugNames => ".debug_names",
            SectionId::DebugFrame => ".debug_frame",
            SectionId::EhFrame => ".eh_frame",
            SectionId::EhFrameHdr => ".eh_frame_hdr",
        }
    }
}

/// One registered section: its bytes wherever they currently live, and the
/// virtual address those bytes are intended to be mapped at (if known).
#[derive(Debug, Clone, Copy)]
pub struct Section<'d> {
    pub data: &'d [u8],
    pub virtual_address: Option<u64>,
}

impl<'d> Section<'d> {
    /// Difference between where byte 0 is *supposed* to be at runtime
    /// (`base + virtual_address`) and where it actually is right now. Added
    /// to raw pointers into `data` to produce runtime-meaningful addresses
    /// for `pcrel` pointer encodings. Zero when the section is being read in
    /// the process it describes.
    pub fn virtual_offset(&self, base: u64) -> i64 {
        match self.virtual_address {
            Some(va) => base
                .wrapping_add(va)
                .wrapping_sub(self.data.as_ptr() as u64) as i64,
            None => 0,
        }
    }
}

/// All sections handed to the decoder, keyed by [`SectionId`]. Missing slots
/// are fine; operations that need an absent section report missing debug
/// info with the section's name.
#[derive(Default)]
pub struct Sections<'d> {
    slots: [Option<Section<'d>>; SectionId::COUNT],
}

impl<'d> Sections<'d> {
    pub fn set(&mut self, id: SectionId, section: Section<'d>) {
        self.slots[id as usize] = Some(section);
    }

    /// Builder-style registration for the common "just bytes" case.
    pub fn with(mut self, id: SectionId, data: &'d [u8]) -> Self {
        self.set(id, Section { data, virtual_address: None });
        self
    }

    pub fn with_mapped(mut self, id: SectionId, data: &'d [u8], virtual_address: u64) -> Self {
        self.set(id, Section { data, virtual_address: Some(virtual_address) });
        self
    }

    pub fn get(&self, id: SectionId) -> Option<Section<'d>> {
        self.slots[id as usize]
    }

    pub fn data(&self, id: SectionId) -> Option<&'d [u8]> {
        self.get(id).map(|s| s.data)
    }

    pub(crate) fn require(&self, id: SectionId) -> Result<&'d [u8]> {
        self.data(id).ok_or(missing(id.name()))
    }

    pub(crate) fn virtual_offset(&self, id: SectionId, base: u64) -> i64 {
        self.get(id).map_or(0, |s| s.virtual_offset(base))
    }
}
