//! The line-number program interpreter.
//!
//! Source: https://dwarfstd.org/doc/DWARF5.pdf §6.2 Line Number Information
//!
//! A line program is a header (directory and file tables plus the knobs the
//! special opcodes are parameterized by) followed by bytecode driving a
//! little state machine. Running the machine emits one matrix row per
//! instruction-to-source mapping; we never build the matrix, we just watch
//! the rows go by until one row's address range brackets the target.

#[cfg(test)]
mod tests;

use std::path::Path;

use tracing::{instrument, trace};

use crate::consts::*;
use crate::cursor::{Cursor, Endian, Format, NATIVE_WORD};
use crate::error::{bad, cast, missing, Error, Result};
use crate::form::{parse_form, FormValue};
use crate::sections::{SectionId, Sections};
use crate::unit::{CompileUnit, ResolveCtx};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file_name: String,
    pub line: u64,
    pub column: u64,
}

#[derive(Debug, Clone, Copy)]
struct FileEntry<'d> {
    path: &'d str,
    dir_index: u64,
    // Carried for completeness; address matching never consults them.
    #[allow(dead_code)]
    mtime: u64,
    #[allow(dead_code)]
    size: u64,
    #[allow(dead_code)]
    md5: [u8; 16],
}

impl<'d> FileEntry<'d> {
    fn new(path: &'d str) -> Self {
        FileEntry { path, dir_index: 0, mtime: 0, size: 0, md5: [0; 16] }
    }
}

/// The state machine registers (DWARF5 §6.2.2), plus a mirror of the last
/// committed row so a match can be made against the *previous* row once the
/// current one has moved past the target.
struct LineMachine {
    address: u64,
    file: u64,
    line: i64,
    column: u64,
    is_stmt: bool,
    // Tracked per DWARF §6.2.2 but not consulted by address matching.
    #[allow(dead_code)]
    basic_block: bool,
    #[allow(dead_code)]
    end_sequence: bool,
    prev_valid: bool,
    prev_address: u64,
    prev_file: u64,
    prev_line: i64,
    prev_column: u64,
}

/// A matched row: file register, line, column.
type Row = (u64, i64, u64);

impl LineMachine {
    fn new(default_is_stmt: bool) -> Self {
        LineMachine {
            address: 0,
            file: 1,
            line: 1,
            column: 0,
            is_stmt: default_is_stmt,
            basic_block: false,
            end_sequence: false,
            prev_valid: false,
            prev_address: 0,
            prev_file: 1,
            prev_line: 1,
            prev_column: 0,
        }
    }

    /// Commit the current registers as a row. Returns the previous row when
    /// it brackets the target: equality to its own address matches, equality
    /// to the new address does not.
    fn commit(&mut self, target: u64) -> Option<Row> {
        let matched = if self.prev_valid && self.prev_address <= target && target < self.address {
            Some((self.prev_file, self.prev_line, self.prev_column))
        } else {
            None
        };
        self.prev_valid = true;
        self.prev_address = self.address;
        self.prev_file = self.file;
        self.prev_line = self.line;
        self.prev_column = self.column;
        matched
    }
}

fn parse_entry_formats(cursor: &mut Cursor<'_>) -> Result<Vec<(u64, u64)>> {
    let count = cursor.read_u8()?;
    if count > 10 {
        return Err(bad("entry format descriptor list too long"));
    }
    let mut formats = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let content_type = cursor.read_uleb128()?;
        let form = cursor.read_uleb128()?;
        formats.push((content_type, form));
    }
    Ok(formats)
}

/// Pre-v5 tables: NUL-terminated path lists, each terminated by an empty
/// entry. Directory 0 is implicit and refers to the unit's compilation
/// directory.
fn parse_tables_v4<'d>(
    cursor: &mut Cursor<'d>,
    comp_dir: &'d str,
) -> Result<(Vec<&'d str>, Vec<FileEntry<'d>>)> {
    let mut dirs = vec![comp_dir];
    loop {
        let path = cursor.read_utf8_cstr()?;
        if path.is_empty() {
            break;
        }
        dirs.push(path);
    }

    let mut files = Vec::new();
    loop {
        let path = cursor.read_utf8_cstr()?;
        if path.is_empty() {
            break;
        }
        let dir_index = cursor.read_uleb128()?;
        let mtime = cursor.read_uleb128()?;
        let size = cursor.read_uleb128()?;
        files.push(FileEntry { path, dir_index, mtime, size, md5: [0; 16] });
    }
    Ok((dirs, files))
}

/// v5 tables: entries are described by a `(content type, form)` descriptor
/// list, so producers can add columns. Directory 0 and file 0 are explicit.
fn parse_tables_v5<'d>(
    cursor: &mut Cursor<'d>,
    format: Format,
    ctx: &ResolveCtx<'_, 'd>,
) -> Result<(Vec<&'d str>, Vec<FileEntry<'d>>)> {
    let dir_formats = parse_entry_formats(cursor)?;
    let dir_count = cursor.read_uleb128()?;
    if dir_formats.is_empty() && dir_count > 0 {
        return Err(bad("directory entries without a format descriptor"));
    }
    let mut dirs = Vec::new();
    for _ in 0..dir_count {
        let mut path = None;
        for &(content_type, form) in &dir_formats {
            let value = parse_form(cursor, format, form, None)?;
            if content_type == DW_LNCT_path {
                path = Some(ctx.string(&value)?);
            }
        }
        dirs.push(path.ok_or(bad("directory entry without a path"))?);
    }

    let file_formats = parse_entry_formats(cursor)?;
    let file_count = cursor.read_uleb128()?;
    if file_formats.is_empty() && file_count > 0 {
        return Err(bad("file entries without a format descriptor"));
    }
    let mut files = Vec::new();
    for _ in 0..file_count {
        let mut entry = FileEntry::new("");
        let mut has_path = false;
        for &(content_type, form) in &file_formats {
            let value = parse_form(cursor, format, form, None)?;
            match content_type {
                DW_LNCT_path => {
                    entry.path = ctx.string(&value)?;
                    has_path = true;
                }
                DW_LNCT_directory_index => entry.dir_index = value.udata()?,
                DW_LNCT_timestamp => entry.mtime = value.udata()?,
                DW_LNCT_size => entry.size = value.udata()?,
                DW_LNCT_MD5 => match value {
                    FormValue::Data16(bytes) => entry.md5.copy_from_slice(bytes),
                    _ => return Err(bad("MD5 content must use the data16 form")),
                },
                // Vendor content types: the value was consumed, nothing to keep.
                _ => {}
            }
        }
        if !has_path {
            return Err(bad("file entry without a path"));
        }
        files.push(entry);
    }
    Ok((dirs, files))
}

fn source_location(
    row: Row,
    dirs: &[&str],
    files: &[FileEntry<'_>],
    version: u16,
) -> Result<SourceLocation> {
    let (file, line, column) = row;
    // The file register is 1-based before v5; index 0 only becomes a real
    // table entry in v5.
    let index = if version >= 5 {
        file
    } else {
        file.checked_sub(1).ok_or(bad("file index zero in a pre-v5 line program"))?
    };
    let entry = files
        .get(cast::<usize>(index)?)
        .ok_or(bad("file index outside the file table"))?;
    let dir = dirs
        .get(cast::<usize>(entry.dir_index)?)
        .ok_or(bad("directory index outside the directory table"))?;
    let file_name = Path::new(dir).join(entry.path).to_string_lossy().into_owned();
    let line = u64::try_from(line).map_err(|_| bad("negative line number"))?;
    Ok(SourceLocation { file_name, line, column })
}

/// Run the unit's line program until a row covering `target` goes by.
#[instrument(skip(sections, cu))]
pub(crate) fn line_number_info<'d>(
    sections: &Sections<'d>,
    endian: Endian,
    cu: &CompileUnit<'d>,
    target: u64,
) -> Result<SourceLocation> {
    let ctx = cu.resolve_ctx(sections, endian);
    let stmt_list = cu
        .die
        .attr(DW_AT_stmt_list)
        .ok_or(missing("DW_AT_stmt_list"))?
        .sec_offset()?;
    let bytes = sections.require(SectionId::DebugLine)?;
    let mut cursor = Cursor::new(bytes, endian);
    cursor.seek_to(stmt_list)?;

    let initial = cursor.read_initial_length()?;
    let format = initial.format;
    let unit_end = stmt_list + initial.header_length as u64 + initial.unit_length;

    let version = cursor.read_u16()?;
    if !(2..=5).contains(&version) {
        return Err(Error::UnsupportedDwarfVersion(version));
    }
    if version >= 5 {
        let address_size = cursor.read_u8()?;
        if address_size != NATIVE_WORD {
            return Err(Error::UnsupportedAddrSize(address_size));
        }
        let _segment_selector_size = cursor.read_u8()?;
    }

    let header_length = cursor.read_address(format)?;
    let program_start = cursor.pos() as u64 + header_length;

    let minimum_instruction_length = cursor.read_u8()?;
    if minimum_instruction_length == 0 {
        return Err(bad("minimum_instruction_length must be nonzero"));
    }
    if version >= 4 {
        let _maximum_operations_per_instruction = cursor.read_u8()?;
    }
    let default_is_stmt = cursor.read_u8()? != 0;
    let line_base = cursor.read_i8()?;
    let line_range = cursor.read_u8()?;
    if line_range == 0 {
        return Err(bad("line_range must be nonzero"));
    }
    let opcode_base = cursor.read_u8()?;
    if opcode_base == 0 {
        return Err(bad("opcode_base must be nonzero"));
    }
    let standard_opcode_lengths = cursor.read_bytes(opcode_base as usize - 1)?;

    let (dirs, mut files) = if version < 5 {
        let comp_dir_value = cu.die.attr(DW_AT_comp_dir).ok_or(missing("DW_AT_comp_dir"))?;
        parse_tables_v4(&mut cursor, ctx.string(comp_dir_value)?)?
    } else {
        parse_tables_v5(&mut cursor, format, &ctx)?
    };
    trace!(version, dirs = dirs.len(), files = files.len(), "line program header");

    cursor.seek_to(program_start)?;
    let mut machine = LineMachine::new(default_is_stmt);
    let const_pc_advance =
        u64::from((255 - opcode_base) / line_range) * u64::from(minimum_instruction_length);

    while (cursor.pos() as u64) < unit_end {
        let opcode = cursor.read_u8()?;
        if opcode == 0 {
            // Extended opcode: length-prefixed, so unknown ones can be skipped.
            let length = cursor.read_uleb128()?;
            if length == 0 {
                return Err(bad("empty extended opcode"));
            }
            let payload_start = cursor.pos() as u64;
            let sub_opcode = cursor.read_u8()?;
            match sub_opcode {
                DW_LNE_end_sequence => {
                    machine.end_sequence = true;
                    if let Some(row) = machine.commit(target) {
                        return source_location(row, &dirs, &files, version);
                    }
                    machine = LineMachine::new(default_is_stmt);
                }
                DW_LNE_set_address => machine.address = cursor.read_native()?,
                DW_LNE_define_file => {
                    let path = cursor.read_utf8_cstr()?;
                    let dir_index = cursor.read_uleb128()?;
                    let mtime = cursor.read_uleb128()?;
                    let size = cursor.read_uleb128()?;
                    files.push(FileEntry { path, dir_index, mtime, size, md5: [0; 16] });
                }
                DW_LNE_set_discriminator => {
                    cursor.read_uleb128()?;
                }
                _ => {}
            }
            cursor.seek_to(payload_start + length)?;
        } else if opcode < opcode_base {
            match opcode {
                DW_LNS_copy => {
                    if let Some(row) = machine.commit(target) {
                        return source_location(row, &dirs, &files, version);
                    }
                    machine.basic_block = false;
                }
                DW_LNS_advance_pc => {
                    let advance = cursor.read_uleb128()?;
                    machine.address = machine
                        .address
                        .wrapping_add(advance.wrapping_mul(u64::from(minimum_instruction_length)));
                }
                DW_LNS_advance_line => {
                    let delta = cursor.read_sleb128()?;
                    machine.line = machine.line.wrapping_add(delta);
                }
                DW_LNS_set_file => machine.file = cursor.read_uleb128()?,
                DW_LNS_set_column => machine.column = cursor.read_uleb128()?,
                DW_LNS_negate_stmt => machine.is_stmt = !machine.is_stmt,
                DW_LNS_set_basic_block => machine.basic_block = true,
                DW_LNS_const_add_pc => {
                    machine.address = machine.address.wrapping_add(const_pc_advance);
                }
                DW_LNS_fixed_advance_pc => {
                    machine.address = machine.address.wrapping_add(u64::from(cursor.read_u16()?));
                }
                DW_LNS_set_prologue_end | DW_LNS_set_epilogue_begin => {}
                DW_LNS_set_isa => {
                    cursor.read_uleb128()?;
                }
                _ => {
                    // Vendor standard opcode; the header told us how many
                    // LEB128 operands it carries.
                    let operands = standard_opcode_lengths[opcode as usize - 1];
                    for _ in 0..operands {
                        cursor.read_uleb128()?;
                    }
                }
            }
        } else {
            let adjusted = opcode - opcode_base;
            machine.address = machine.address.wrapping_add(
                u64::from(adjusted / line_range) * u64::from(minimum_instruction_length),
            );
            machine.line = machine
                .line
                .wrapping_add(i64::from(line_base) + i64::from(adjusted % line_range));
            if let Some(row) = machine.commit(target) {
                return source_location(row, &dirs, &files, version);
            }
            machine.basic_block = false;
        }
    }
    Err(missing("no line table row covers the address"))
}
