use super::*;
use crate::consts::{DW_AT_comp_dir, DW_AT_stmt_list, DW_TAG_compile_unit};
use crate::test_util::SectionBuilder;
use crate::unit::Die;
use crate::Error;

fn compile_unit<'d>(version: u16, attrs: Vec<(u64, FormValue<'d>)>) -> CompileUnit<'d> {
    CompileUnit {
        version,
        format: Format::Dwarf32,
        die: Die { tag: DW_TAG_compile_unit, has_children: true, attrs },
        pc_range: None,
        str_offsets_base: 0,
        addr_base: 0,
        rnglists_base: 0,
        loclists_base: 0,
        frame_base: None,
        base_address: 0,
    }
}

fn lookup(line_bytes: &[u8], cu: &CompileUnit<'_>, target: u64) -> Result<SourceLocation> {
    let sections = Sections::default().with(SectionId::DebugLine, line_bytes);
    line_number_info(&sections, Endian::Little, cu, target)
}

/// A version 4 program: two rows in the first sequence, matching on the
/// previous row once the machine steps past the target.
///
/// Equivalent `llvm-dwarfdump --debug-line` matrix:
///   0x1000  4  0  1  (main.c)
///   0x1040  5  7  2  (util.c)
///   0x1080  <end_sequence>
fn v4_line_section() -> Vec<u8> {
    let mut line = SectionBuilder::new();
    let unit = line.begin_length32();
    line.u16(4); // version
    let header = line.begin_length32();
    line.u8(1); // minimum_instruction_length
    line.u8(1); // maximum_operations_per_instruction
    line.u8(1); // default_is_stmt
    line.u8(0xfb); // line_base: -5
    line.u8(14); // line_range
    line.u8(13); // opcode_base
    line.raw(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
    line.cstr("/inc"); // include_directories[1]; [0] is the comp dir
    line.u8(0);
    line.cstr("main.c");
    line.uleb(0); // dir_index
    line.uleb(0); // mtime
    line.uleb(0); // size
    line.cstr("util.c");
    line.uleb(1);
    line.uleb(0);
    line.uleb(0);
    line.u8(0);
    line.end_length32(header);

    line.u8(0); // extended: set_address 0x1000
    line.uleb(9);
    line.u8(DW_LNE_set_address);
    line.native(0x1000);
    line.u8(DW_LNS_advance_line);
    line.sleb(3); // line 4
    line.u8(DW_LNS_copy);
    line.u8(DW_LNS_advance_pc);
    line.uleb(0x40);
    line.u8(DW_LNS_advance_line);
    line.sleb(1); // line 5
    line.u8(DW_LNS_set_file);
    line.uleb(2);
    line.u8(DW_LNS_set_column);
    line.uleb(7);
    line.u8(DW_LNS_copy);
    line.u8(DW_LNS_advance_pc);
    line.uleb(0x40);
    line.u8(0); // extended: end_sequence
    line.uleb(1);
    line.u8(DW_LNE_end_sequence);
    line.end_length32(unit);
    line.finish()
}

fn v4_compile_unit() -> CompileUnit<'static> {
    compile_unit(
        4,
        vec![
            (DW_AT_comp_dir, FormValue::String("/src")),
            (DW_AT_stmt_list, FormValue::SecOffset(0)),
        ],
    )
}

#[test]
fn v4_rows_bracket_the_target() {
    let line = v4_line_section();
    let cu = v4_compile_unit();

    let first = SourceLocation { file_name: "/src/main.c".into(), line: 4, column: 0 };
    assert_eq!(lookup(&line, &cu, 0x1000).unwrap(), first);
    assert_eq!(lookup(&line, &cu, 0x1017).unwrap(), first);
    assert_eq!(lookup(&line, &cu, 0x103f).unwrap(), first);

    let second = SourceLocation { file_name: "/inc/util.c".into(), line: 5, column: 7 };
    assert_eq!(lookup(&line, &cu, 0x1040).unwrap(), second);
    assert_eq!(lookup(&line, &cu, 0x107f).unwrap(), second);
}

#[test]
fn addresses_outside_every_row_are_missing() {
    let line = v4_line_section();
    let cu = v4_compile_unit();
    // Equality to a row's own start matches; equality to the next row's
    // start does not.
    assert!(lookup(&line, &cu, 0x0fff).unwrap_err().is_missing());
    assert!(lookup(&line, &cu, 0x1080).unwrap_err().is_missing());
    assert!(lookup(&line, &cu, 0x2000).unwrap_err().is_missing());
}

#[test]
fn missing_stmt_list_is_missing_info() {
    let line = v4_line_section();
    let cu = compile_unit(4, vec![(DW_AT_comp_dir, FormValue::String("/src"))]);
    assert!(lookup(&line, &cu, 0x1000).unwrap_err().is_missing());
}

#[test]
fn v4_file_index_zero_is_invalid() {
    let mut line = SectionBuilder::new();
    let unit = line.begin_length32();
    line.u16(4);
    let header = line.begin_length32();
    line.u8(1);
    line.u8(1);
    line.u8(1);
    line.u8(0xfb);
    line.u8(14);
    line.u8(13);
    line.raw(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
    line.u8(0); // no include directories
    line.cstr("main.c");
    line.uleb(0);
    line.uleb(0);
    line.uleb(0);
    line.u8(0);
    line.end_length32(header);
    line.u8(0);
    line.uleb(9);
    line.u8(DW_LNE_set_address);
    line.native(0x1000);
    line.u8(DW_LNS_set_file);
    line.uleb(0); // file 0 has no pre-v5 table entry
    line.u8(DW_LNS_copy);
    line.u8(DW_LNS_advance_pc);
    line.uleb(0x10);
    line.u8(0);
    line.uleb(1);
    line.u8(DW_LNE_end_sequence);
    line.end_length32(unit);
    let line = line.finish();

    let cu = v4_compile_unit();
    let err = lookup(&line, &cu, 0x1008).unwrap_err();
    assert!(!err.is_missing());
}

/// A version 5 header: descriptor-driven tables, string-form paths, an MD5
/// column, and a zero-based file register.
#[test]
fn v5_descriptor_tables() {
    let mut line = SectionBuilder::new();
    let unit = line.begin_length32();
    line.u16(5);
    line.u8(8); // address_size
    line.u8(0); // segment_selector_size
    let header = line.begin_length32();
    line.u8(1);
    line.u8(1);
    line.u8(1);
    line.u8(0xfb);
    line.u8(14);
    line.u8(13);
    line.raw(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
    // Directory table: one column (path), one entry.
    line.u8(1);
    line.uleb(DW_LNCT_path);
    line.uleb(DW_FORM_string);
    line.uleb(1);
    line.cstr("/proj");
    // File table: path, directory index, MD5.
    line.u8(3);
    line.uleb(DW_LNCT_path);
    line.uleb(DW_FORM_string);
    line.uleb(DW_LNCT_directory_index);
    line.uleb(DW_FORM_data1);
    line.uleb(DW_LNCT_MD5);
    line.uleb(DW_FORM_data16);
    line.uleb(1);
    line.cstr("a.c");
    line.u8(0);
    line.raw(&[0xaa; 16]);
    line.end_length32(header);

    line.u8(0);
    line.uleb(9);
    line.u8(DW_LNE_set_address);
    line.native(0x2000);
    line.u8(DW_LNS_set_file);
    line.uleb(0); // v5 file numbering starts at 0
    line.u8(DW_LNS_copy);
    line.u8(DW_LNS_advance_pc);
    line.uleb(0x10);
    line.u8(0);
    line.uleb(1);
    line.u8(DW_LNE_end_sequence);
    line.end_length32(unit);
    let line = line.finish();

    let cu = compile_unit(5, vec![(DW_AT_stmt_list, FormValue::SecOffset(0))]);
    assert_eq!(
        lookup(&line, &cu, 0x2008).unwrap(),
        SourceLocation { file_name: "/proj/a.c".into(), line: 1, column: 0 }
    );
    assert!(lookup(&line, &cu, 0x2010).unwrap_err().is_missing());
}

#[test]
fn zero_line_range_is_rejected() {
    let mut line = SectionBuilder::new();
    let unit = line.begin_length32();
    line.u16(4);
    let header = line.begin_length32();
    line.u8(1);
    line.u8(1);
    line.u8(1);
    line.u8(0xfb);
    line.u8(0); // line_range 0 would divide by zero
    line.u8(13);
    line.raw(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
    line.u8(0);
    line.u8(0);
    line.end_length32(header);
    line.end_length32(unit);
    let line = line.finish();

    let cu = v4_compile_unit();
    assert_eq!(
        lookup(&line, &cu, 0x1000).unwrap_err(),
        Error::InvalidDebugInfo("line_range must be nonzero")
    );
}
