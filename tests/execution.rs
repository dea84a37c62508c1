mod common;

use common::*;
use gen_ext::{
    ENTRY, PLAIN_VALUE, RESIDENT_GOT_WORD, RESIDENT_LOAD_OFFSET, RESIDENT_SEVEN_OFFSET,
    RESIDENT_TABLE_CONSTANT, RESIDENT_TABLE_WORDS, answer_module, resident_module,
};
use xip_loader::{
    GOT_SECTION, ModuleImage, RESIDENT_SECTION, ResidencyPatcher, SectionClass,
    residency::PatchStage,
    runtime::{ModuleRuntime, TargetMemory},
};

fn table(ctx: &mut Ctx, image: &ModuleImage) -> Vec<u32> {
    let addr = image.section(".data").unwrap().addr;
    (0..RESIDENT_TABLE_WORDS)
        .map(|i| ctx.read_u32(addr + 4 * i as u32).unwrap())
        .collect()
}

#[test]
fn entry_returns_host_value() {
    init_log();
    let mut host = Host::new();
    let mut ctx = context();
    let image = loader(256)
        .load(&mut ctx, &answer_module().unwrap(), &host.exports, ENTRY)
        .unwrap();
    assert_eq!(image.entry() & 1, 1);
    // no .got, so the GOT base is the start of the data block
    assert_eq!(image.got_base(), image.data().unwrap().addr);
    let bss = image.bss().unwrap();
    assert!(ctx.pool().bytes(&bss).iter().all(|&b| b == 0));

    let desc = host
        .sim
        .call(&mut ctx, image.entry(), image.got_base(), &[])
        .unwrap();
    assert_eq!(desc, image.section(".data").unwrap().addr);
    let name = ctx.read_u32(desc).unwrap();
    assert_eq!(ctx.read_c_str(name, 16).unwrap(), "Test");
    assert_eq!(ctx.read_u32(desc + 4).unwrap(), 42);
    assert_eq!(host.sim.stats().host_calls, 1);
}

#[test]
fn residency_patches_only_resident_pointers() {
    init_log();
    let mut host = Host::new();
    let mut ctx = context();
    let image = loader(512)
        .load(&mut ctx, &resident_module().unwrap(), &host.exports, ENTRY)
        .unwrap();
    let got = image.section(GOT_SECTION).unwrap();
    assert_eq!(got.class, SectionClass::Data);
    assert_eq!(image.got_base(), got.addr);
    let resident = image.section(RESIDENT_SECTION).unwrap().clone();
    let plain = image.section(".text").unwrap().addr | 1;

    let before = table(&mut ctx, &image);
    assert_eq!(before[0], resident.addr + RESIDENT_LOAD_OFFSET | 1);
    assert_eq!(before[1], resident.addr + RESIDENT_SEVEN_OFFSET | 1);
    assert_eq!(before[3], plain);

    let report = ResidencyPatcher::new(&image)
        .run(&mut ctx, &mut host.sim)
        .unwrap();
    assert_eq!(report.copies.len(), 1);
    assert_eq!(report.bytes_copied, resident.size);
    assert_eq!(report.pointers_patched, 3);
    assert_eq!(report.trampolines, 2);
    assert_eq!(host.sim.stats().data_flushes, 1);
    assert_eq!(host.sim.stats().icache_invalidations, 1);

    let after = table(&mut ctx, &image);
    assert_eq!(after[0], after[2]);
    assert_ne!(after[0], after[1]);
    for &tramp in &after[..3] {
        assert!(ctx.iflash().contains(tramp));
        assert_eq!(tramp & 1, 1);
    }
    assert_eq!(after[3], before[3]);
    assert_eq!(after[4], RESIDENT_TABLE_CONSTANT);
    assert_eq!(ctx.read_u32(got.addr).unwrap(), RESIDENT_GOT_WORD);

    // the copy in internal flash is byte-identical
    let copy = &report.copies[0];
    let mut xip = vec![0u8; copy.size];
    let mut iflash = vec![0u8; copy.size];
    ctx.read(copy.xip, &mut xip).unwrap();
    ctx.read(copy.iflash, &mut iflash).unwrap();
    assert_eq!(xip, iflash);
}

#[test]
fn trampolines_match_direct_calls() {
    init_log();
    let mut host = Host::new();
    let mut ctx = context();
    let image = loader(512)
        .load(&mut ctx, &resident_module().unwrap(), &host.exports, ENTRY)
        .unwrap();
    let report = ResidencyPatcher::new(&image)
        .run(&mut ctx, &mut host.sim)
        .unwrap();
    let resident = image.section(RESIDENT_SECTION).unwrap();
    let load_fn = report
        .resident_address(resident.addr + RESIDENT_LOAD_OFFSET | 1)
        .unwrap();
    let seven_fn = report
        .resident_address(resident.addr + RESIDENT_SEVEN_OFFSET | 1)
        .unwrap();
    assert!(ctx.iflash().contains(load_fn));

    let base = image.got_base();
    let direct = host.sim.call(&mut ctx, load_fn, base, &[]).unwrap();
    assert_eq!(direct, RESIDENT_GOT_WORD);
    let direct_xip = host
        .sim
        .call(&mut ctx, resident.addr + RESIDENT_LOAD_OFFSET | 1, base, &[])
        .unwrap();
    assert_eq!(direct_xip, direct);

    // through the trampoline the caller's r9 does not matter
    let tramps = table(&mut ctx, &image);
    assert_eq!(host.sim.call(&mut ctx, tramps[0], 0, &[]).unwrap(), direct);
    assert_eq!(host.sim.regs()[9], base);
    assert_eq!(host.sim.call(&mut ctx, tramps[1], 0xdead_0000, &[]).unwrap(), 7);
    assert_eq!(
        host.sim.call(&mut ctx, seven_fn, base, &[]).unwrap(),
        7
    );
    // the untouched pointer still runs from XIP flash
    assert_eq!(host.sim.call(&mut ctx, tramps[3], 0, &[]).unwrap(), PLAIN_VALUE);

    // without the trampoline a wrong r9 reads garbage or faults
    assert!(host.sim.call(&mut ctx, load_fn, 0, &[]).is_err());
}

#[test]
fn patcher_steps_through_stages() {
    let mut host = Host::new();
    let mut ctx = context();
    let image = loader(512)
        .load(&mut ctx, &resident_module().unwrap(), &host.exports, ENTRY)
        .unwrap();
    let mut patcher = ResidencyPatcher::new(&image);
    assert_eq!(patcher.stage(), PatchStage::Scanning { next: 0 });
    assert!(patcher.step(&mut ctx, &mut host.sim).unwrap());
    assert!(matches!(patcher.stage(), PatchStage::Copying { .. }));
    assert!(patcher.step(&mut ctx, &mut host.sim).unwrap());
    assert!(matches!(patcher.stage(), PatchStage::Patching { cursor: 0, .. }));
    let mut steps = 2;
    while patcher.step(&mut ctx, &mut host.sim).unwrap() {
        steps += 1;
    }
    assert_eq!(patcher.stage(), PatchStage::Done);
    assert_eq!(patcher.report().pointers_patched, 3);
    // scan, copy, three patches, end of section, final scan
    assert_eq!(steps + 1, 7);
    assert!(!patcher.step(&mut ctx, &mut host.sim).unwrap());
}

#[test]
fn modules_without_resident_code_are_left_alone() {
    let mut host = Host::new();
    let mut ctx = context();
    let image = loader(512)
        .load(&mut ctx, &answer_module().unwrap(), &host.exports, ENTRY)
        .unwrap();
    let free = ctx.iflash().next_free();
    let report = ResidencyPatcher::new(&image)
        .run(&mut ctx, &mut host.sim)
        .unwrap();
    assert!(report.is_empty());
    assert_eq!(ctx.iflash().next_free(), free);
    assert_eq!(host.sim.stats().icache_invalidations, 0);
}
