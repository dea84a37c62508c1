use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use gen_ext::{ENTRY, FAR_FN, GET_VALUE, HOST_BUFFER, HOST_FN, resident_module, streaming_module};
use xip_loader::{
    DataPool, HostExports, LoadContext, LoaderConfig, PartitionConfig, ResidencyPatcher,
    StreamLoader, flash::FlashRegion, runtime::NoCache, sim::MemFlash,
};

const MODULE_SIZE: usize = 0x8_0000;

fn context() -> LoadContext<MemFlash, MemFlash> {
    let xip = FlashRegion::new(
        "xip",
        MemFlash::new(0x10_0000, 0x1000),
        PartitionConfig::new(0, 0x10_0000, 0x1000_0000),
    )
    .unwrap();
    let iflash = FlashRegion::new(
        "iflash",
        MemFlash::new(0x8000, 0x800),
        PartitionConfig::new(0, 0x8000, 0x0008_0000),
    )
    .unwrap();
    LoadContext::new(xip, iflash, DataPool::new(0x2000_0000, 0x4000))
}

fn exports() -> HostExports {
    HostExports::from_table([
        (GET_VALUE, 0x0FF0_0001),
        (HOST_FN, 0x0FF0_0005),
        (HOST_BUFFER, 0x2002_0000),
        (FAR_FN, 0x0FF0_0009),
    ])
}

fn stream_benchmark(c: &mut Criterion) {
    let module = streaming_module(MODULE_SIZE).unwrap();
    let exports = exports();
    let mut group = c.benchmark_group("stream");
    group.throughput(Throughput::Bytes(MODULE_SIZE as u64));
    for chunk in [256usize, 1024, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            let mut loader =
                StreamLoader::new(LoaderConfig::new().with_chunk_size(chunk)).unwrap();
            let mut ctx = context();
            b.iter(|| {
                ctx.reset();
                loader.load(&mut ctx, &module, &exports, ENTRY).unwrap()
            });
        });
    }
    group.finish();
}

fn residency_benchmark(c: &mut Criterion) {
    let module = resident_module().unwrap();
    let exports = exports();
    let mut loader = StreamLoader::new(LoaderConfig::new()).unwrap();
    let mut ctx = context();
    c.bench_function("residency:load+patch", |b| {
        b.iter(|| {
            ctx.reset();
            let image = loader.load(&mut ctx, &module, &exports, ENTRY).unwrap();
            ResidencyPatcher::new(&image).run(&mut ctx, &mut NoCache).unwrap()
        })
    });
}

criterion_group!(benches, stream_benchmark, residency_benchmark);
criterion_main!(benches);
