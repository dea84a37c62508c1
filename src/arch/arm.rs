//! Running module code on the real CPU.

use crate::{
    Result, TargetAddr,
    error::execution_error,
    runtime::{CacheControl, ModuleRuntime, TargetMemory},
};
use core::arch::asm;

/// Calls module code directly, with `r9` primed to the module's GOT base.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeRuntime;

impl CacheControl for NativeRuntime {
    fn flush_data(&mut self, _addr: TargetAddr, _len: usize) {
        unsafe { asm!("dsb", options(nostack, preserves_flags)) };
    }

    fn invalidate_instructions(&mut self) {
        unsafe { asm!("dsb", "isb", options(nostack, preserves_flags)) };
    }
}

impl ModuleRuntime for NativeRuntime {
    fn call(
        &mut self,
        _mem: &mut dyn TargetMemory,
        func: TargetAddr,
        pic_base: TargetAddr,
        args: &[u32],
    ) -> Result<u32> {
        if args.len() > 4 {
            return Err(execution_error("at most four register arguments"));
        }
        if func & 1 == 0 {
            return Err(execution_error(alloc::format!(
                "{func:#010x} is not a Thumb address"
            )));
        }
        let mut regs = [0u32; 4];
        regs[..args.len()].copy_from_slice(args);
        let ret: u32;
        // SAFETY: `func` is the linked entry of a loaded module that follows
        // the AAPCS. r9 is saved around the call since the host may use it.
        unsafe {
            asm!(
                "push {{r8, r9}}",
                "mov r9, {base}",
                "blx {func}",
                "pop {{r8, r9}}",
                base = in(reg) pic_base,
                func = in(reg) func,
                inout("r0") regs[0] => ret,
                in("r1") regs[1],
                in("r2") regs[2],
                in("r3") regs[3],
                clobber_abi("C"),
            );
        }
        Ok(ret)
    }
}
