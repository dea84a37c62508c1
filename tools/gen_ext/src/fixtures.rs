//! The canned modules the loader tests and benchmarks load.

use crate::{Asm, ExtObject, SectionKind};
use anyhow::{Result, ensure};
use object::elf::R_ARM_REL32;

/// Entry symbol every generated module exports unless told otherwise.
pub const ENTRY: &str = "app_entry";
/// Host function the answer module calls.
pub const GET_VALUE: &str = "get_value";
/// Host data symbol the streaming module references.
pub const HOST_BUFFER: &str = "host_buffer";
/// Host function the streaming module calls.
pub const HOST_FN: &str = "host_fn";
/// Host function the far-call module calls.
pub const FAR_FN: &str = "far_fn";

/// Word at the start of the resident module's `.got`.
pub const RESIDENT_GOT_WORD: u32 = 0x0BAD_F00D;
/// Offset of `resident_load` in `.text.iflash`; returns GOT word 0.
pub const RESIDENT_LOAD_OFFSET: u32 = 0;
/// Offset of `resident_seven` in `.text.iflash`; returns 7.
pub const RESIDENT_SEVEN_OFFSET: u32 = 8;
/// Value `plain_fn` in `.text` returns.
pub const PLAIN_VALUE: u32 = 3;
/// Words of the resident module's function table.
pub const RESIDENT_TABLE_WORDS: usize = 5;
/// The plain constant in the last table slot.
pub const RESIDENT_TABLE_CONSTANT: u32 = 0x1234_5678;

/// `R_ARM_ABS32` against `host_buffer` in the streaming module.
pub const STREAM_ABS32_OFFSET: usize = 0x1_0008;
/// Addend stored in the field at [`STREAM_ABS32_OFFSET`].
pub const STREAM_ABS32_ADDEND: u32 = 0x10;
/// `R_ARM_THM_CALL` against `host_fn`; straddles every power-of-two chunk
/// boundary at 256 KiB.
pub const STREAM_CALL_OFFSET: usize = 0x4_0000 - 2;
/// Smallest size [`streaming_module`] accepts.
pub const STREAM_MIN_SIZE: usize = 0x4_0004;
/// Size of the streaming module's BSS counter block.
pub const STREAM_BSS_SIZE: u64 = 0x100;

/// Offset of the `bl far_fn` in the far-call module.
pub const FAR_CALL_OFFSET: usize = 2;
/// Offset of the `R_ARM_REL32` word in [`rel32_module`].
pub const REL32_OFFSET: usize = 4;

/// A module whose entry calls the host `get_value()` and returns the
/// address of `{ name: "Test", value }`.
pub fn answer_module() -> Result<Vec<u8>> {
    let mut ext = ExtObject::new();
    let text = ext.section(".text", SectionKind::Text);
    let rodata = ext.section(".rodata", SectionKind::ReadOnly);
    let data = ext.section(".data", SectionKind::Data);
    let bss = ext.section(".bss", SectionKind::Bss);

    let name_at = ext.append(rodata, b"Test\0", 4);
    let name = ext.object("answer_name", rodata, name_at, 5, false);
    let desc_at = ext.append(data, &[0u8; 8], 4);
    let desc = ext.object("answer_desc", data, desc_at, 8, false);
    let scratch_at = ext.append_bss(bss, 16, 4);
    ext.object("answer_scratch", bss, scratch_at, 16, false);
    ext.abs32(data, desc_at, name)?;

    let mut asm = Asm::new();
    asm.push_lr();
    let get_value = asm.ldr_literal(3, 0);
    asm.blx(3);
    let desc_lit = asm.ldr_literal(1, 0);
    asm.str(0, 1, 1).movs_reg(0, 1).pop_pc();
    let size = asm.here() as u64;
    let code = asm.finish();
    let at = ext.append(text, &code.code, 4);
    ext.function(ENTRY, text, at, size, true);
    let host = ext.undefined(GET_VALUE);
    ext.abs32(text, at + code.literals[get_value] as u64, host)?;
    ext.abs32(text, at + code.literals[desc_lit] as u64, desc)?;
    ext.write()
}

/// A module returning a full five-word descriptor
/// `{ name, icon, start, stop, category }`. `start(x)` returns `x + 100`.
pub fn app_module(name: &str, entry: &str, category: u32) -> Result<Vec<u8>> {
    let mut ext = ExtObject::new();
    let text = ext.section(".text", SectionKind::Text);
    let rodata = ext.section(".rodata", SectionKind::ReadOnly);
    let data = ext.section(".data", SectionKind::Data);

    let mut label = name.as_bytes().to_vec();
    label.push(0);
    let name_at = ext.append(rodata, &label, 4);
    let name_sym = ext.object("app_name", rodata, name_at, label.len() as u64, false);

    let mut desc = [0u8; 20];
    desc[16..].copy_from_slice(&category.to_le_bytes());
    let desc_at = ext.append(data, &desc, 4);
    let desc_sym = ext.object("app_desc", data, desc_at, 20, false);

    let mut asm = Asm::new();
    let lit = asm.ldr_literal(0, 0);
    asm.bx_lr();
    let entry_size = asm.here() as u64;
    let start_at = asm.here() as u64;
    asm.adds(0, 100).bx_lr();
    let code = asm.finish();
    let at = ext.append(text, &code.code, 4);
    ext.function(entry, text, at, entry_size, true);
    let start = ext.function("app_start", text, at + start_at, 4, false);

    ext.abs32(text, at + code.literals[lit] as u64, desc_sym)?;
    ext.abs32(data, desc_at, name_sym)?;
    ext.abs32(data, desc_at + 8, start)?;
    ext.write()
}

/// A module whose entry returns zero.
pub fn failing_module() -> Result<Vec<u8>> {
    let mut ext = ExtObject::new();
    let text = ext.section(".text", SectionKind::Text);
    let mut asm = Asm::new();
    asm.movs(0, 0).bx_lr();
    let code = asm.finish();
    let at = ext.append(text, &code.code, 4);
    ext.function(ENTRY, text, at, 4, true);
    ext.write()
}

/// A module with two functions in `.text.iflash` and a table in `.data`
/// pointing at them.
///
/// `.got` holds [`RESIDENT_GOT_WORD`] and becomes the GOT base. The table
/// is `[resident_load, resident_seven, resident_load, plain_fn, constant]`;
/// the entry returns its address.
pub fn resident_module() -> Result<Vec<u8>> {
    let mut ext = ExtObject::new();
    let iflash = ext.section(".text.iflash", SectionKind::Text);
    let text = ext.section(".text", SectionKind::Text);
    let got = ext.section(".got", SectionKind::Data);
    let data = ext.section(".data", SectionKind::Data);

    let mut asm = Asm::new();
    asm.ldr_w(0, 9, 0).bx_lr().nop();
    debug_assert_eq!(asm.here() as u32, RESIDENT_SEVEN_OFFSET);
    asm.movs(0, 7).bx_lr();
    let resident = asm.finish();
    let at = ext.append(iflash, &resident.code, 4);
    let load = ext.function("resident_load", iflash, at + RESIDENT_LOAD_OFFSET as u64, 6, true);
    let seven = ext.function("resident_seven", iflash, at + RESIDENT_SEVEN_OFFSET as u64, 4, true);

    let mut asm = Asm::new();
    asm.movs(0, PLAIN_VALUE as u8).bx_lr();
    let entry_at = asm.here() as u64;
    let lit = asm.ldr_literal(0, 0);
    asm.bx_lr();
    let code = asm.finish();
    let text_at = ext.append(text, &code.code, 4);
    let plain = ext.function("plain_fn", text, text_at, 4, true);
    ext.function(ENTRY, text, text_at + entry_at, 4, true);

    ext.append(got, &RESIDENT_GOT_WORD.to_le_bytes(), 4);
    let mut table = [0u8; RESIDENT_TABLE_WORDS * 4];
    table[16..].copy_from_slice(&RESIDENT_TABLE_CONSTANT.to_le_bytes());
    let table_at = ext.append(data, &table, 4);
    let table_sym = ext.object("fn_table", data, table_at, table.len() as u64, true);
    for (slot, target) in [load, seven, load, plain].into_iter().enumerate() {
        ext.abs32(data, table_at + 4 * slot as u64, target)?;
    }
    ext.abs32(text, text_at + code.literals[lit] as u64, table_sym)?;
    ext.write()
}

/// A module with `size` bytes of `.text`, for streaming tests.
///
/// Besides the fields at [`STREAM_ABS32_OFFSET`] and
/// [`STREAM_CALL_OFFSET`], an `R_ARM_ABS32` against the module's BSS
/// straddles every 4 KiB boundary, with the boundary's index as addend.
/// `.rodata` holds a pointer to the entry point.
pub fn streaming_module(size: usize) -> Result<Vec<u8>> {
    ensure!(size >= STREAM_MIN_SIZE, "streaming module needs at least {STREAM_MIN_SIZE:#x} bytes");
    let mut ext = ExtObject::new();
    let text = ext.section(".text", SectionKind::Text);
    let rodata = ext.section(".rodata", SectionKind::ReadOnly);
    let bss = ext.section(".bss", SectionKind::Bss);

    let mut body = filler(size);
    let mut asm = Asm::new();
    asm.movs(0, 0).bx_lr();
    body[..4].copy_from_slice(&asm.finish().code);
    body[STREAM_ABS32_OFFSET..STREAM_ABS32_OFFSET + 4]
        .copy_from_slice(&STREAM_ABS32_ADDEND.to_le_bytes());
    body[STREAM_CALL_OFFSET..STREAM_CALL_OFFSET + 4].copy_from_slice(&[0xFF, 0xF7, 0xFE, 0xFF]);
    let boundaries: Vec<usize> = (1..)
        .map(|k| k * 0x1000 - 2)
        .take_while(|&offset| offset + 4 <= size)
        .filter(|&offset| offset != STREAM_CALL_OFFSET)
        .collect();
    for (k, &offset) in boundaries.iter().enumerate() {
        body[offset..offset + 4].copy_from_slice(&(k as u32).to_le_bytes());
    }

    let at = ext.append(text, &body, 4);
    let entry = ext.function(ENTRY, text, at, 4, true);
    let counters_at = ext.append_bss(bss, STREAM_BSS_SIZE, 4);
    let counters = ext.object("counters", bss, counters_at, STREAM_BSS_SIZE, false);
    let buffer = ext.undefined(HOST_BUFFER);
    let call = ext.undefined(HOST_FN);
    ext.abs32(text, at + STREAM_ABS32_OFFSET as u64, buffer)?;
    ext.thm_call(text, at + STREAM_CALL_OFFSET as u64, call)?;
    for offset in boundaries {
        ext.abs32(text, at + offset as u64, counters)?;
    }

    let mut table = filler(1000);
    table[..4].fill(0);
    let table_at = ext.append(rodata, &table, 4);
    ext.abs32(rodata, table_at, entry)?;
    ext.write()
}

/// A module whose entry calls `far_fn` through a `BL`.
pub fn far_call_module() -> Result<Vec<u8>> {
    let mut ext = ExtObject::new();
    let text = ext.section(".text", SectionKind::Text);
    let mut asm = Asm::new();
    asm.push_lr();
    let bl = asm.bl();
    debug_assert_eq!(bl, FAR_CALL_OFFSET);
    asm.pop_pc();
    let code = asm.finish();
    let at = ext.append(text, &code.code, 4);
    ext.function(ENTRY, text, at, code.code.len() as u64, true);
    let far = ext.undefined(FAR_FN);
    ext.thm_call(text, at + bl as u64, far)?;
    ext.write()
}

/// A module carrying an `R_ARM_REL32`, which the loader does not handle.
/// Its entry returns 5.
pub fn rel32_module() -> Result<Vec<u8>> {
    let mut ext = ExtObject::new();
    let text = ext.section(".text", SectionKind::Text);
    let mut asm = Asm::new();
    asm.movs(0, 5).bx_lr();
    let mut code = asm.finish().code;
    code.extend_from_slice(&0u32.to_le_bytes());
    let at = ext.append(text, &code, 4);
    ext.function(ENTRY, text, at, 4, true);
    let host = ext.undefined(GET_VALUE);
    ext.reloc(text, at + REL32_OFFSET as u64, host, R_ARM_REL32)?;
    ext.write()
}

/// Deterministic bytes that are never executed.
fn filler(len: usize) -> Vec<u8> {
    let mut state = 0x2545_F491u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_build() {
        for module in [
            answer_module(),
            app_module("Demo", ENTRY, 3),
            failing_module(),
            resident_module(),
            far_call_module(),
            rel32_module(),
        ] {
            let bytes = module.unwrap();
            assert_eq!(&bytes[..4], b"\x7fELF");
            // ELFCLASS32, little endian, ET_REL, EM_ARM
            assert_eq!(bytes[4], 1);
            assert_eq!(bytes[5], 1);
            assert_eq!(u16::from_le_bytes([bytes[16], bytes[17]]), 1);
            assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), 40);
        }
    }

    #[test]
    fn calls_carry_thumb_call_relocations() {
        use object::{Object, ObjectSection, RelocationFlags, elf::R_ARM_THM_PC22};

        let bytes = far_call_module().unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        let text = file.section_by_name(".text").unwrap();
        let relocs: Vec<_> = text.relocations().collect();
        assert_eq!(relocs.len(), 1);
        let (offset, reloc) = &relocs[0];
        assert_eq!(*offset, FAR_CALL_OFFSET as u64);
        // R_ARM_THM_CALL is R_ARM_THM_PC22 in object's naming
        assert_eq!(reloc.flags(), RelocationFlags::Elf { r_type: R_ARM_THM_PC22 });
        assert_eq!(R_ARM_THM_PC22, 10);
    }

    #[test]
    fn streaming_module_has_a_minimum_size() {
        assert!(streaming_module(0x1000).is_err());
        assert!(streaming_module(STREAM_MIN_SIZE).is_ok());
    }
}
