mod common;

use common::*;
use gen_ext::{
    ENTRY, FAR_CALL_OFFSET, HOST_BUFFER, HOST_FN, REL32_OFFSET, STREAM_ABS32_ADDEND,
    STREAM_ABS32_OFFSET, STREAM_CALL_OFFSET, STREAM_MIN_SIZE, answer_module, far_call_module,
    rel32_module, streaming_module,
};
use rstest::rstest;
use xip_loader::{
    Error, HostExports, LoaderConfig, SectionClass, StreamLoader,
    abi::R_ARM_REL32,
    arch::thumb::{branch_in_range, decode_branch},
    input::ElfBinary,
    runtime::ModuleRuntime,
    sim::Fault,
};

const STREAM_SIZE: usize = STREAM_MIN_SIZE + 0x1000 + 0x123;

fn load_streaming(chunk: usize) -> (Ctx, xip_loader::ModuleImage) {
    let host = Host::new();
    let bytes = streaming_module(STREAM_SIZE).unwrap();
    let mut ctx = context();
    let image = loader(chunk)
        .load(&mut ctx, &bytes, &host.exports, ENTRY)
        .unwrap();
    (ctx, image)
}

#[rstest]
#[case(256)]
#[case(512)]
#[case(4096)]
fn chunk_size_does_not_change_output(#[case] chunk: usize) {
    init_log();
    let (reference_ctx, reference) = load_streaming(0x10000);
    let (ctx, image) = load_streaming(chunk);
    assert_eq!(image.sections(), reference.sections());
    for section in image.sections().iter().filter(|s| s.class.is_flash()) {
        assert_eq!(
            xip_bytes(&ctx, section),
            xip_bytes(&reference_ctx, section),
            "{} differs with {chunk} byte chunks",
            section.name
        );
    }
}

#[test]
fn relocations_land_on_resolved_addresses() {
    init_log();
    let host = Host::new();
    let (ctx, image) = load_streaming(512);
    let text = image.section(".text").unwrap();
    let bss = image.section(".bss").unwrap();
    assert_eq!(bss.class, SectionClass::Bss);
    let bytes = xip_bytes(&ctx, text);

    assert_eq!(
        word(&bytes, STREAM_ABS32_OFFSET),
        host.lookup(HOST_BUFFER) + STREAM_ABS32_ADDEND
    );

    let hi = u16::from_le_bytes([bytes[STREAM_CALL_OFFSET], bytes[STREAM_CALL_OFFSET + 1]]);
    let lo = u16::from_le_bytes([bytes[STREAM_CALL_OFFSET + 2], bytes[STREAM_CALL_OFFSET + 3]]);
    let place = text.addr + STREAM_CALL_OFFSET as u32;
    let target = place.wrapping_add(4).wrapping_add(decode_branch(hi, lo) as u32);
    assert_eq!(target, host.lookup(HOST_FN) & !1);

    // one field straddles each 4 KiB boundary, addend = boundary index
    let straddling: Vec<usize> = (1..)
        .map(|k| k * 0x1000 - 2)
        .take_while(|&offset| offset + 4 <= text.size)
        .filter(|&offset| offset != STREAM_CALL_OFFSET)
        .collect();
    for (k, offset) in straddling.into_iter().enumerate() {
        assert_eq!(word(&bytes, offset), bss.addr + k as u32, "field at {offset:#x}");
    }

    let rodata = image.section(".rodata").unwrap();
    assert_eq!(word(&xip_bytes(&ctx, rodata), 0), image.entry());
    assert_eq!(image.entry(), text.addr | 1);
}

#[test]
fn source_reads_stay_bounded() {
    init_log();
    let host = Host::new();
    let bytes = streaming_module(STREAM_SIZE).unwrap();
    let mut reader = CountingReader::new(ElfBinary::new("streaming.o", &bytes));
    let mut ctx = context();
    let mut loader =
        StreamLoader::new(LoaderConfig::new().with_chunk_size(512).with_rel_batch(16)).unwrap();
    loader
        .load(&mut ctx, &mut reader, &host.exports, ENTRY)
        .unwrap();
    assert!(reader.max_read <= 512, "largest read {}", reader.max_read);
    assert!(reader.bytes >= STREAM_SIZE);
    assert!(loader.scratch_bytes() < 1024);
}

#[test]
fn flash_allocations_are_sector_aligned() {
    let host = Host::new();
    let mut ctx = context();
    let mut loader = loader(1024);
    let first = loader
        .load(&mut ctx, &answer_module().unwrap(), &host.exports, ENTRY)
        .unwrap();
    let second = loader
        .load(&mut ctx, &streaming_module(STREAM_SIZE).unwrap(), &host.exports, ENTRY)
        .unwrap();
    let mut spans: Vec<(u32, usize)> = first
        .sections()
        .iter()
        .chain(second.sections())
        .filter(|s| s.class.is_flash())
        .map(|s| (s.addr, s.size))
        .collect();
    spans.sort();
    for (addr, _) in &spans {
        assert_eq!((addr - XIP_BASE) as usize % XIP_SECTOR, 0);
    }
    for pair in spans.windows(2) {
        assert!(pair[0].0 as usize + pair[0].1 <= pair[1].0 as usize);
    }
    assert_eq!(ctx.xip().next_free() % XIP_SECTOR, 0);
    assert!(ctx.xip().next_free() >= first.flash_bytes() + second.flash_bytes());
}

#[test]
fn out_of_range_call_is_rejected_untouched() {
    init_log();
    let host = Host::new();
    let mut ctx = context();
    let err = loader(256)
        .load(&mut ctx, &far_call_module().unwrap(), &host.exports, ENTRY)
        .unwrap_err();
    match err {
        Error::RelocationRange {
            offset,
            displacement,
        } => {
            assert_eq!(offset, FAR_CALL_OFFSET);
            assert!(!branch_in_range(displacement as i64));
        }
        other => panic!("unexpected error {other}"),
    }
    // the chunk holding the call was never programmed
    assert!(ctx.xip().device().contents()[..XIP_SECTOR].iter().all(|&b| b == 0xFF));
}

#[test]
fn in_range_call_is_linked() {
    let mut ctx = context();
    let exports = HostExports::from_table([("far_fn", XIP_BASE + 0x8_0001)]);
    let image = loader(256)
        .load(&mut ctx, &far_call_module().unwrap(), &exports, ENTRY)
        .unwrap();
    let text = image.section(".text").unwrap();
    let bytes = xip_bytes(&ctx, text);
    let at = FAR_CALL_OFFSET;
    let hi = u16::from_le_bytes([bytes[at], bytes[at + 1]]);
    let lo = u16::from_le_bytes([bytes[at + 2], bytes[at + 3]]);
    let place = text.addr + at as u32;
    assert_eq!(
        place.wrapping_add(4).wrapping_add(decode_branch(hi, lo) as u32),
        XIP_BASE + 0x8_0000
    );
}

#[test]
fn unsupported_relocations_follow_policy() {
    init_log();
    let mut host = Host::new();
    let bytes = rel32_module().unwrap();

    let mut ctx = context();
    let image = loader(256)
        .load(&mut ctx, &bytes, &host.exports, ENTRY)
        .unwrap();
    let text = image.section(".text").unwrap();
    assert_eq!(word(&xip_bytes(&ctx, text), REL32_OFFSET), 0);
    assert_eq!(
        host.sim.call(&mut ctx, image.entry(), image.got_base(), &[]).unwrap(),
        5
    );

    let mut ctx = context();
    let mut strict =
        StreamLoader::new(LoaderConfig::new().with_strict_relocations(true)).unwrap();
    let err = strict
        .load(&mut ctx, &bytes, &host.exports, ENTRY)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UnsupportedRelocation { r_type: R_ARM_REL32, offset: REL32_OFFSET }
    ));
}

#[test]
fn unresolved_and_missing_entry() {
    let mut ctx = context();
    let err = loader(256)
        .load(&mut ctx, &answer_module().unwrap(), &HostExports::new(), ENTRY)
        .unwrap_err();
    assert!(matches!(err, Error::UnresolvedSymbol { ref name } if name == "get_value"));

    let host = Host::new();
    let mut ctx = context();
    let err = loader(256)
        .load(&mut ctx, &answer_module().unwrap(), &host.exports, "missing_entry")
        .unwrap_err();
    assert!(matches!(err, Error::EntryNotFound { ref name } if name == "missing_entry"));
}

#[test]
fn rejects_garbage() {
    let host = Host::new();
    let mut ctx = context();
    let mut bytes = answer_module().unwrap();
    bytes[18] = 62; // EM_X86_64
    assert!(matches!(
        loader(256).load(&mut ctx, &bytes, &host.exports, ENTRY),
        Err(Error::Parse { .. })
    ));
    assert!(loader(256)
        .load(&mut ctx, &b"not an object"[..], &host.exports, ENTRY)
        .is_err());
}

#[test]
fn rollback_returns_space_of_failed_load() {
    let host = Host::new();
    let mut ctx = context();
    let mut loader = loader(512);
    let checkpoint = ctx.checkpoint();
    assert!(loader
        .load(&mut ctx, &far_call_module().unwrap(), &host.exports, ENTRY)
        .is_err());
    assert!(ctx.xip().next_free() > 0);
    ctx.rollback(checkpoint);
    assert_eq!(ctx.checkpoint(), checkpoint);
    let image = loader
        .load(&mut ctx, &answer_module().unwrap(), &host.exports, ENTRY)
        .unwrap();
    assert_eq!(image.section(".text").unwrap().addr, XIP_BASE);
}

#[test]
fn out_of_flash_is_reported() {
    let host = Host::new();
    let mut ctx = context();
    let bytes = streaming_module(STREAM_SIZE).unwrap();
    let mut loader = loader(4096);
    loader.load(&mut ctx, &bytes, &host.exports, ENTRY).unwrap();
    loader.load(&mut ctx, &bytes, &host.exports, ENTRY).unwrap();
    loader.load(&mut ctx, &bytes, &host.exports, ENTRY).unwrap();
    assert!(matches!(
        loader.load(&mut ctx, &bytes, &host.exports, ENTRY),
        Err(Error::OutOfFlash { region: "xip", .. })
    ));
}

#[rstest]
#[case(Fault::Erase { after: 0 })]
#[case(Fault::Write { after: 1 })]
fn flash_failure_aborts_and_rolls_back(#[case] fault: Fault) {
    init_log();
    let host = Host::new();
    let mut ctx = context();
    let mut loader = loader(512);
    ctx.xip_mut().device_mut().inject_fault(fault);
    let checkpoint = ctx.checkpoint();
    let err = loader
        .load(&mut ctx, &streaming_module(STREAM_SIZE).unwrap(), &host.exports, ENTRY)
        .unwrap_err();
    assert!(matches!(err, Error::FlashIo { .. }), "{err}");
    assert!(ctx.xip().next_free() > 0);

    ctx.rollback(checkpoint);
    assert_eq!(ctx.xip().next_free(), 0);
    assert_eq!(ctx.pool().used(), 0);
    // the fault was one-shot, the same space loads cleanly now
    let image = loader
        .load(&mut ctx, &answer_module().unwrap(), &host.exports, ENTRY)
        .unwrap();
    assert_eq!(image.section(".text").unwrap().addr, XIP_BASE);
}

#[test]
fn relocation_past_its_section_is_rejected() {
    use object::{Object, ObjectSection};

    let host = Host::new();
    let mut bytes = answer_module().unwrap();
    let (rel_at, _) = object::File::parse(&*bytes)
        .unwrap()
        .section_by_name(".rel.text")
        .and_then(|section| section.file_range())
        .unwrap();
    let rel_at = rel_at as usize;
    for r_offset in [0xFFFF_FFFEu32, 0xFFFF_FFFF, 0x1000] {
        bytes[rel_at..rel_at + 4].copy_from_slice(&r_offset.to_le_bytes());
        let mut ctx = context();
        let err = loader(256)
            .load(&mut ctx, &bytes, &host.exports, ENTRY)
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }), "{r_offset:#x}: {err}");
        // rejected before any flash was claimed
        assert_eq!(ctx.xip().next_free(), 0);
    }
}
