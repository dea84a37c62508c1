//! The boundary between host code and loaded module code.
//!
//! The loader itself never executes module code. Calling an entry point or
//! a lifecycle callback goes through a [`ModuleRuntime`], which is either
//! the CPU itself (on ARM targets) or the host simulator.

use crate::{Result, TargetAddr, error::execution_error};
use alloc::{string::String, vec::Vec};

/// Byte-addressed view of the target address space.
pub trait TargetMemory {
    fn read(&mut self, addr: TargetAddr, buf: &mut [u8]) -> Result<()>;

    fn write(&mut self, addr: TargetAddr, data: &[u8]) -> Result<()>;

    fn read_u32(&mut self, addr: TargetAddr) -> Result<u32> {
        let mut word = [0u8; 4];
        self.read(addr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    fn write_u32(&mut self, addr: TargetAddr, value: u32) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    /// Reads a NUL-terminated string of at most `max` bytes.
    fn read_c_str(&mut self, addr: TargetAddr, max: usize) -> Result<String> {
        let mut bytes = Vec::new();
        for i in 0..max {
            let mut byte = [0u8];
            self.read(addr.wrapping_add(i as u32), &mut byte)?;
            if byte[0] == 0 {
                return String::from_utf8(bytes)
                    .map_err(|_| execution_error(alloc::format!("string at {addr:#010x} is not UTF-8")));
            }
            bytes.push(byte[0]);
        }
        Err(execution_error(alloc::format!(
            "string at {addr:#010x} is not terminated within {max} bytes"
        )))
    }
}

/// Cache maintenance after code or pointers change underneath the CPU.
pub trait CacheControl {
    /// Writes back data caches covering `[addr, addr + len)`.
    fn flush_data(&mut self, _addr: TargetAddr, _len: usize) {}

    /// Discards any prefetched or cached instructions.
    fn invalidate_instructions(&mut self) {}
}

/// A [`CacheControl`] for parts without caches.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl CacheControl for NoCache {}

/// Executes module code.
pub trait ModuleRuntime: CacheControl {
    /// Calls the Thumb function at `func` with the PIC base register set to
    /// `pic_base` and up to four word arguments, returning `r0`.
    ///
    /// `mem` is the address space the code runs against. Native runtimes
    /// ignore it because the code runs against real memory.
    fn call(
        &mut self,
        mem: &mut dyn TargetMemory,
        func: TargetAddr,
        pic_base: TargetAddr,
        args: &[u32],
    ) -> Result<u32>;
}
