use super::*;
use crate::test_util::SectionBuilder;
use crate::{Dwarf, Format};

/// One CIE ("zR", absolute udata4 addresses) and three FDEs in deliberately
/// unsorted order. Returns the section bytes and each FDE's length-field
/// offset in write order (0x3000, 0x1000, 0x2000).
fn eh_frame_fixture() -> (Vec<u8>, Vec<u64>) {
    let mut buf = SectionBuilder::new();
    let cie = buf.begin_length32();
    buf.u32(0); // CIE id
    buf.u8(1); // version
    buf.cstr("zR");
    buf.uleb(1); // code alignment factor
    buf.sleb(-8); // data alignment factor
    buf.uleb(16); // return address register
    buf.uleb(1); // augmentation data length
    buf.u8(DW_EH_PE_udata4);
    buf.raw(&[0, 0, 0]); // DW_CFA_nop padding
    buf.end_length32(cie);

    let mut fde_offsets = Vec::new();
    for pc_begin in [0x3000u32, 0x1000, 0x2000] {
        fde_offsets.push(buf.len() as u64);
        let fde = buf.begin_length32();
        let id_pos = buf.len() as u32;
        buf.u32(id_pos); // self-relative pointer back to the CIE at offset 0
        buf.u32(pc_begin);
        buf.u32(0x100); // pc_range
        buf.uleb(0); // augmentation data length
        buf.raw(&[0, 0, 0]);
        buf.end_length32(fde);
    }
    buf.u32(0); // terminator
    (buf.finish(), fde_offsets)
}

#[test]
fn scan_collects_and_sorts_fdes() {
    let (eh_frame, _) = eh_frame_fixture();
    let sections = Sections::default().with(SectionId::EhFrame, &eh_frame);
    let (cie_map, fde_list) =
        scan_cie_fde_info(&sections, Endian::Little, 0, None).unwrap();

    assert_eq!(cie_map.len(), 1);
    assert!(cie_map.contains_key(&0));
    let pcs: Vec<u64> = fde_list.iter().map(|fde| fde.pc_begin).collect();
    assert_eq!(pcs, [0x1000, 0x2000, 0x3000]);
    assert!(fde_list.iter().all(|fde| fde.cie_length_offset == 0));
    assert!(fde_list.iter().all(|fde| fde.pc_range == 0x100));
}

#[test]
fn sorted_list_answers_unwind_queries() {
    let (eh_frame, _) = eh_frame_fixture();
    let sections = Sections::default().with(SectionId::EhFrame, &eh_frame);
    let mut dwarf = Dwarf::with_endian(sections, Endian::Little);
    dwarf.scan_all_unwind_info(0).unwrap();

    let (cie, fde) = dwarf.unwind_info_for_address(0x1080).unwrap();
    assert_eq!(cie.version, 1);
    assert_eq!(fde.pc_begin, 0x1000);

    // Equality to pc_begin is inside the half-open range.
    let (_, fde) = dwarf.unwind_info_for_address(0x2000).unwrap();
    assert_eq!(fde.pc_begin, 0x2000);
    let (_, fde) = dwarf.unwind_info_for_address(0x30ff).unwrap();
    assert_eq!(fde.pc_begin, 0x3000);

    assert!(dwarf.unwind_info_for_address(0x0fff).unwrap_err().is_missing());
    assert!(dwarf.unwind_info_for_address(0x3100).unwrap_err().is_missing());
    assert!(dwarf.unwind_info_for_address(0x2100).unwrap_err().is_missing());
}

/// A synthetic `.eh_frame_hdr` over the fixture, absolute encodings all
/// around so the table works on file bytes. The eh_frame pointer pretends
/// the section lives at 0x60000000.
fn eh_frame_hdr_fixture(fde_offsets: &[u64]) -> Vec<u8> {
    const EH_FRAME_ADDR: u32 = 0x6000_0000;
    let mut buf = SectionBuilder::new();
    buf.u8(1); // version
    buf.u8(DW_EH_PE_udata4); // eh_frame_ptr encoding
    buf.u8(DW_EH_PE_udata4); // fde_count encoding
    buf.u8(DW_EH_PE_udata4); // table encoding
    buf.u32(EH_FRAME_ADDR);
    buf.u32(3);
    // Sorted by initial pc; write order in the fixture was 0x3000, 0x1000,
    // 0x2000.
    buf.u32(0x1000);
    buf.u32(EH_FRAME_ADDR + fde_offsets[1] as u32);
    buf.u32(0x2000);
    buf.u32(EH_FRAME_ADDR + fde_offsets[2] as u32);
    buf.u32(0x3000);
    buf.u32(EH_FRAME_ADDR + fde_offsets[0] as u32);
    buf.finish()
}

#[test]
fn header_table_answers_unwind_queries() {
    let (eh_frame, fde_offsets) = eh_frame_fixture();
    let hdr = eh_frame_hdr_fixture(&fde_offsets);
    let sections = Sections::default()
        .with(SectionId::EhFrame, &eh_frame)
        .with(SectionId::EhFrameHdr, &hdr);
    let mut dwarf = Dwarf::with_endian(sections, Endian::Little);
    dwarf.scan_all_unwind_info(0).unwrap();

    let (cie, fde) = dwarf.unwind_info_for_address(0x2010).unwrap();
    assert_eq!(cie.aug_str, "zR");
    assert_eq!(cie.length_offset, 0);
    assert_eq!(fde.pc_begin, 0x2000);
    assert_eq!(fde.pc_range, 0x100);
    assert_eq!(fde.cie_length_offset, 0);

    // Exact matches on every table entry.
    for pc in [0x1000u64, 0x2000, 0x3000] {
        let (_, fde) = dwarf.unwind_info_for_address(pc).unwrap();
        assert_eq!(fde.pc_begin, pc);
    }
    let (_, fde) = dwarf.unwind_info_for_address(0x30ff).unwrap();
    assert_eq!(fde.pc_begin, 0x3000);

    // The search converges on the first entry but its FDE does not cover
    // the address.
    assert!(dwarf.unwind_info_for_address(0x0500).unwrap_err().is_missing());
    assert!(dwarf.unwind_info_for_address(0x3100).unwrap_err().is_missing());
}

#[test]
fn header_parse_validates_the_table() {
    let (_, fde_offsets) = eh_frame_fixture();
    let hdr = eh_frame_hdr_fixture(&fde_offsets);
    let header =
        ExceptionFrameHeader::parse(&hdr, Endian::Little, 0, 0, false, None).unwrap();
    assert_eq!(header.eh_frame_ptr, 0x6000_0000);
    assert_eq!(header.fde_count, 3);
    assert_eq!(
        header.entries.len(),
        header.fde_count as usize * ExceptionFrameHeader::entry_size(header.table_enc).unwrap()
    );
}

#[test]
fn entry_sizes_are_doubled_field_sizes() {
    assert_eq!(ExceptionFrameHeader::entry_size(DW_EH_PE_udata2).unwrap(), 4);
    assert_eq!(ExceptionFrameHeader::entry_size(DW_EH_PE_sdata2 | DW_EH_PE_datarel).unwrap(), 4);
    assert_eq!(ExceptionFrameHeader::entry_size(DW_EH_PE_udata4).unwrap(), 8);
    assert_eq!(ExceptionFrameHeader::entry_size(DW_EH_PE_sdata8).unwrap(), 16);
    assert!(ExceptionFrameHeader::entry_size(DW_EH_PE_absptr).is_err());
    assert!(ExceptionFrameHeader::entry_size(DW_EH_PE_uleb128).is_err());
}

#[test]
fn omitted_table_encoding_falls_back_to_scanning() {
    let (eh_frame, _) = eh_frame_fixture();
    // A header that advertises no binary search table.
    let hdr = [1u8, DW_EH_PE_udata4, DW_EH_PE_udata4, DW_EH_PE_omit];
    let sections = Sections::default()
        .with(SectionId::EhFrame, &eh_frame)
        .with(SectionId::EhFrameHdr, &hdr);
    let mut dwarf = Dwarf::with_endian(sections, Endian::Little);
    dwarf.scan_all_unwind_info(0).unwrap();

    // Queries still work through the sorted FDE list.
    let (_, fde) = dwarf.unwind_info_for_address(0x1010).unwrap();
    assert_eq!(fde.pc_begin, 0x1000);
}

#[test]
fn debug_frame_scan_at_the_dwarf_level() {
    let mut buf = SectionBuilder::new();
    let cie = buf.begin_length64();
    buf.u64(u64::MAX);
    buf.u8(4); // version
    buf.cstr("");
    buf.u8(8);
    buf.u8(0);
    buf.uleb(1);
    buf.sleb(-8);
    buf.uleb(16);
    buf.raw(&[0, 0]);
    buf.end_length64(cie);
    let fde = buf.begin_length64();
    buf.u64(0);
    buf.native(0x5000);
    buf.native(0x100);
    buf.raw(&[0, 0]);
    buf.end_length64(fde);
    let debug_frame = buf.finish();

    let sections = Sections::default().with(SectionId::DebugFrame, &debug_frame);
    let mut dwarf = Dwarf::with_endian(sections, Endian::Little);
    dwarf.scan_all_unwind_info(0).unwrap();

    let (cie, fde) = dwarf.unwind_info_for_address(0x5080).unwrap();
    assert_eq!(cie.version, 4);
    assert_eq!(cie.format, Format::Dwarf64);
    assert_eq!(fde.cie_length_offset, cie.length_offset);
    assert_eq!(fde.pc_begin, 0x5000);
}
