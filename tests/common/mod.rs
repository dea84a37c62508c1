#![allow(dead_code)]

use gen_ext::{FAR_FN, GET_VALUE, HOST_BUFFER, HOST_FN};
use xip_loader::{
    DataPool, HostExports, LoadContext, LoaderConfig, PartitionConfig, PlacedSection, Result,
    StreamLoader, TargetAddr,
    flash::FlashRegion,
    input::ElfReader,
    sim::{MemFlash, Simulator},
};

pub const XIP_SECTOR: usize = 0x1000;
pub const XIP_BASE: TargetAddr = 0x1000_0000;
pub const XIP_SIZE: usize = 0x10_0000;

pub const IFLASH_SECTOR: usize = 0x800;
pub const IFLASH_BASE: TargetAddr = 0x0008_0000;
pub const IFLASH_SIZE: usize = 0x8000;

pub const POOL_BASE: TargetAddr = 0x2000_0000;
pub const POOL_SIZE: usize = 0x4000;

/// Host data the streaming module points at.
pub const HOST_BUFFER_ADDR: TargetAddr = 0x2002_0000;
/// Far outside `BL` range of anything in XIP flash.
pub const FAR_FN_ADDR: TargetAddr = 0x3000_0001;

pub type Ctx = LoadContext<MemFlash, MemFlash>;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn context() -> Ctx {
    let xip = FlashRegion::new(
        "xip",
        MemFlash::new(XIP_SIZE, XIP_SECTOR),
        PartitionConfig::new(0, XIP_SIZE, XIP_BASE),
    )
    .unwrap();
    let iflash = FlashRegion::new(
        "iflash",
        MemFlash::new(IFLASH_SIZE, IFLASH_SECTOR),
        PartitionConfig::new(0, IFLASH_SIZE, IFLASH_BASE),
    )
    .unwrap();
    LoadContext::new(xip, iflash, DataPool::new(POOL_BASE, POOL_SIZE))
}

pub fn loader(chunk: usize) -> StreamLoader {
    StreamLoader::new(LoaderConfig::new().with_chunk_size(chunk)).unwrap()
}

/// A simulator with the host functions modules link against, and the
/// export table naming them.
pub struct Host {
    pub sim: Simulator,
    pub exports: HostExports,
}

impl Host {
    pub fn new() -> Self {
        let mut sim = Simulator::new();
        let get_value = sim.host_fn(|_| Ok(42));
        let host_fn = sim.host_fn(|call| Ok(call.args[0].wrapping_add(1)));
        let exports = HostExports::from_table([
            (GET_VALUE, get_value),
            (HOST_FN, host_fn),
            (HOST_BUFFER, HOST_BUFFER_ADDR),
            (FAR_FN, FAR_FN_ADDR),
        ]);
        Self { sim, exports }
    }

    pub fn lookup(&self, name: &str) -> TargetAddr {
        xip_loader::SymbolLookup::lookup(&self.exports, name).unwrap()
    }
}

/// Bytes of a placed flash section as programmed in XIP flash.
pub fn xip_bytes(ctx: &Ctx, section: &PlacedSection) -> Vec<u8> {
    let start = (section.addr - XIP_BASE) as usize;
    ctx.xip().device().contents()[start..start + section.size].to_vec()
}

pub fn word(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

/// Records how the loader reads its source.
pub struct CountingReader<R> {
    inner: R,
    pub reads: usize,
    pub bytes: usize,
    pub max_read: usize,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            reads: 0,
            bytes: 0,
            max_read: 0,
        }
    }
}

impl<R: ElfReader> ElfReader for CountingReader<R> {
    fn file_name(&self) -> &str {
        self.inner.file_name()
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        self.reads += 1;
        self.bytes += buf.len();
        self.max_read = self.max_read.max(buf.len());
        self.inner.read(buf, offset)
    }
}
