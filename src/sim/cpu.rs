//! A Thumb-2 interpreter for running loaded modules on a development host.
//!
//! Only the instructions the loader's own output and small test modules
//! need are implemented. Flags are not modelled, so conditional branches
//! and `IT` blocks are rejected.

use crate::{
    Result, TargetAddr,
    arch::{
        PIC_BASE_REGISTER,
        thumb::{decode_branch, is_bl},
    },
    error::execution_error,
    runtime::{CacheControl, ModuleRuntime, TargetMemory},
};
use alloc::{boxed::Box, vec, vec::Vec};

/// Link register value that ends a call when branched to.
pub const RETURN_MAGIC: TargetAddr = 0xFFFF_FFFF;
/// Default base of the host function stubs.
pub const DEFAULT_HOST_BASE: TargetAddr = 0x0FF0_0000;
/// Default base of the simulated stack.
pub const DEFAULT_STACK_BASE: TargetAddr = 0x2003_0000;
pub const DEFAULT_STACK_SIZE: usize = 0x1000;
pub const DEFAULT_STEP_LIMIT: usize = 1_000_000;

const SP: usize = 13;
const LR: usize = 14;
const PC: usize = 15;

/// Arguments of a call from module code into a host function.
pub struct HostCall<'a> {
    /// `r0`..`r3` at the time of the call.
    pub args: [u32; 4],
    /// `r9` at the time of the call.
    pub pic_base: TargetAddr,
    /// The module's address space.
    pub mem: &'a mut dyn TargetMemory,
}

type HostFn = Box<dyn FnMut(&mut HostCall<'_>) -> Result<u32>>;

/// Counters of a [`Simulator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    pub calls: usize,
    pub instructions: usize,
    pub host_calls: usize,
    pub data_flushes: usize,
    pub icache_invalidations: usize,
}

/// Thumb interpreter implementing [`ModuleRuntime`].
pub struct Simulator {
    regs: [u32; 16],
    stack: Vec<u8>,
    stack_base: TargetAddr,
    host_base: TargetAddr,
    host_fns: Vec<HostFn>,
    step_limit: usize,
    stats: SimStats,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            regs: [0; 16],
            stack: vec![0u8; DEFAULT_STACK_SIZE],
            stack_base: DEFAULT_STACK_BASE,
            host_base: DEFAULT_HOST_BASE,
            host_fns: Vec::new(),
            step_limit: DEFAULT_STEP_LIMIT,
            stats: SimStats::default(),
        }
    }

    /// Moves the private stack window.
    pub fn with_stack(mut self, base: TargetAddr, size: usize) -> Self {
        self.stack_base = base;
        self.stack = vec![0u8; size & !7];
        self
    }

    /// Moves the host stub window. Must be set before any host function is
    /// registered.
    pub fn with_host_base(mut self, base: TargetAddr) -> Self {
        debug_assert!(self.host_fns.is_empty());
        self.host_base = base & !3;
        self
    }

    /// Maximum instructions per call before it is treated as a hang.
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Registers a host function and returns the Thumb address module code
    /// reaches it at.
    pub fn host_fn<F>(&mut self, f: F) -> TargetAddr
    where
        F: FnMut(&mut HostCall<'_>) -> Result<u32> + 'static,
    {
        let addr = self.host_base + 4 * self.host_fns.len() as u32;
        self.host_fns.push(Box::new(f));
        addr | 1
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Register file as left by the last call.
    pub fn regs(&self) -> &[u32; 16] {
        &self.regs
    }

    fn host_index(&self, pc: TargetAddr) -> Option<usize> {
        let offset = pc.wrapping_sub(self.host_base);
        (pc >= self.host_base && offset % 4 == 0)
            .then_some(offset as usize / 4)
            .filter(|&i| i < self.host_fns.len())
    }

    fn stack_span(&self, addr: TargetAddr, len: usize) -> Option<core::ops::Range<usize>> {
        let start = addr.wrapping_sub(self.stack_base) as usize;
        (addr >= self.stack_base && start + len <= self.stack.len()).then_some(start..start + len)
    }

    fn load(&mut self, mem: &mut dyn TargetMemory, addr: TargetAddr, len: usize) -> Result<u32> {
        let mut buf = [0u8; 4];
        match self.stack_span(addr, len) {
            Some(range) => buf[..len].copy_from_slice(&self.stack[range]),
            None => mem.read(addr, &mut buf[..len])?,
        }
        Ok(u32::from_le_bytes(buf))
    }

    fn store(&mut self, mem: &mut dyn TargetMemory, addr: TargetAddr, value: u32) -> Result<()> {
        match self.stack_span(addr, 4) {
            Some(range) => {
                self.stack[range].copy_from_slice(&value.to_le_bytes());
                Ok(())
            }
            None => mem.write(addr, &value.to_le_bytes()),
        }
    }

    /// Reads a register the way an instruction at `pc` sees it.
    #[inline]
    fn reg(&self, r: usize, pc: TargetAddr) -> u32 {
        if r == PC { pc.wrapping_add(4) } else { self.regs[r] }
    }

    fn run(&mut self, mem: &mut dyn TargetMemory, entry: TargetAddr) -> Result<u32> {
        let mut pc = interwork(entry)?;
        for _ in 0..self.step_limit {
            if pc == RETURN_MAGIC & !1 {
                return Ok(self.regs[0]);
            }
            if let Some(index) = self.host_index(pc) {
                self.stats.host_calls += 1;
                let mut call = HostCall {
                    args: [self.regs[0], self.regs[1], self.regs[2], self.regs[3]],
                    pic_base: self.regs[PIC_BASE_REGISTER],
                    mem: &mut *mem,
                };
                self.regs[0] = (self.host_fns[index])(&mut call)?;
                pc = interwork(self.regs[LR])?;
                continue;
            }
            self.stats.instructions += 1;
            let hw1 = self.load(mem, pc, 2)? as u16;
            pc = if matches!(hw1 >> 11, 0x1D..=0x1F) {
                let hw2 = self.load(mem, pc.wrapping_add(2), 2)? as u16;
                self.exec32(mem, pc, hw1, hw2)?
            } else {
                self.exec16(mem, pc, hw1)?
            };
        }
        Err(execution_error(alloc::format!(
            "no return after {} instructions, pc {pc:#010x}",
            self.step_limit
        )))
    }

    fn exec16(&mut self, mem: &mut dyn TargetMemory, pc: TargetAddr, hw: u16) -> Result<TargetAddr> {
        let next = pc.wrapping_add(2);
        let lo3 = (hw & 7) as usize;
        let mid3 = ((hw >> 3) & 7) as usize;
        let hi3 = ((hw >> 8) & 7) as usize;
        let imm8 = (hw & 0xff) as u32;
        match hw {
            // lsls rd, rm, #imm5 (movs rd, rm when imm5 is zero)
            _ if hw & 0xF800 == 0x0000 => {
                self.regs[lo3] = self.regs[mid3] << ((hw >> 6) & 0x1f);
            }
            _ if hw & 0xFE00 == 0x1800 => {
                self.regs[lo3] = self.regs[mid3].wrapping_add(self.regs[((hw >> 6) & 7) as usize]);
            }
            _ if hw & 0xFE00 == 0x1A00 => {
                self.regs[lo3] = self.regs[mid3].wrapping_sub(self.regs[((hw >> 6) & 7) as usize]);
            }
            _ if hw & 0xFE00 == 0x1C00 => {
                self.regs[lo3] = self.regs[mid3].wrapping_add(((hw >> 6) & 7) as u32);
            }
            _ if hw & 0xFE00 == 0x1E00 => {
                self.regs[lo3] = self.regs[mid3].wrapping_sub(((hw >> 6) & 7) as u32);
            }
            _ if hw & 0xF800 == 0x2000 => self.regs[hi3] = imm8,
            _ if hw & 0xF800 == 0x3000 => self.regs[hi3] = self.regs[hi3].wrapping_add(imm8),
            _ if hw & 0xF800 == 0x3800 => self.regs[hi3] = self.regs[hi3].wrapping_sub(imm8),
            // add/mov with high registers
            _ if hw & 0xFF00 == 0x4400 || hw & 0xFF00 == 0x4600 => {
                let rd = lo3 | ((hw >> 4) & 8) as usize;
                let rm = ((hw >> 3) & 0xF) as usize;
                let value = if hw & 0xFF00 == 0x4400 {
                    self.reg(rd, pc).wrapping_add(self.reg(rm, pc))
                } else {
                    self.reg(rm, pc)
                };
                if rd == PC {
                    return Ok(value & !1);
                }
                self.regs[rd] = value;
            }
            _ if hw & 0xFF87 == 0x4700 => {
                return interwork(self.reg(((hw >> 3) & 0xF) as usize, pc));
            }
            _ if hw & 0xFF87 == 0x4780 => {
                let target = self.reg(((hw >> 3) & 0xF) as usize, pc);
                self.regs[LR] = next | 1;
                return interwork(target);
            }
            // ldr rt, [pc, #imm8 * 4]
            _ if hw & 0xF800 == 0x4800 => {
                let addr = (pc.wrapping_add(4) & !3).wrapping_add(imm8 * 4);
                self.regs[hi3] = self.load(mem, addr, 4)?;
            }
            _ if hw & 0xF000 == 0x6000 => {
                let addr = self.regs[mid3].wrapping_add(((hw >> 6) & 0x1f) as u32 * 4);
                if hw & 0x0800 == 0 {
                    self.store(mem, addr, self.regs[lo3])?;
                } else {
                    self.regs[lo3] = self.load(mem, addr, 4)?;
                }
            }
            _ if hw & 0xF000 == 0x9000 => {
                let addr = self.regs[SP].wrapping_add(imm8 * 4);
                if hw & 0x0800 == 0 {
                    self.store(mem, addr, self.regs[hi3])?;
                } else {
                    self.regs[hi3] = self.load(mem, addr, 4)?;
                }
            }
            // add/sub sp, #imm7 * 4
            _ if hw & 0xFF00 == 0xB000 => {
                let imm = (hw & 0x7f) as u32 * 4;
                self.regs[SP] = if hw & 0x80 == 0 {
                    self.regs[SP].wrapping_add(imm)
                } else {
                    self.regs[SP].wrapping_sub(imm)
                };
            }
            _ if hw & 0xFE00 == 0xB400 => {
                let mut list: Vec<usize> = (0..8).filter(|r| hw & (1 << r) != 0).collect();
                if hw & 0x100 != 0 {
                    list.push(LR);
                }
                let mut addr = self.regs[SP].wrapping_sub(4 * list.len() as u32);
                self.regs[SP] = addr;
                for r in list {
                    self.store(mem, addr, self.regs[r])?;
                    addr = addr.wrapping_add(4);
                }
            }
            _ if hw & 0xFE00 == 0xBC00 => {
                let mut addr = self.regs[SP];
                for r in (0..8).filter(|r| hw & (1 << r) != 0) {
                    self.regs[r] = self.load(mem, addr, 4)?;
                    addr = addr.wrapping_add(4);
                }
                let target = if hw & 0x100 != 0 {
                    let target = self.load(mem, addr, 4)?;
                    addr = addr.wrapping_add(4);
                    Some(target)
                } else {
                    None
                };
                self.regs[SP] = addr;
                if let Some(target) = target {
                    return interwork(target);
                }
            }
            0xBF00 => {}
            _ if hw & 0xF800 == 0xE000 => {
                let offset = (((hw & 0x7ff) as u32) << 21) as i32 >> 20;
                return Ok(pc.wrapping_add(4).wrapping_add(offset as u32));
            }
            _ => return Err(unsupported(pc, hw as u32)),
        }
        Ok(next)
    }

    fn exec32(
        &mut self,
        mem: &mut dyn TargetMemory,
        pc: TargetAddr,
        hw1: u16,
        hw2: u16,
    ) -> Result<TargetAddr> {
        let rt = (hw2 >> 12) as usize;
        let imm12 = (hw2 & 0xfff) as u32;
        if is_bl(hw1, hw2) {
            self.regs[LR] = pc.wrapping_add(4) | 1;
            return Ok(pc.wrapping_add(4).wrapping_add(decode_branch(hw1, hw2) as u32));
        }
        let addr = if hw1 & 0xFF7F == 0xF85F {
            // ldr.w rt, [pc, #+/-imm12]
            let base = pc.wrapping_add(4) & !3;
            if hw1 & 0x0080 != 0 {
                base.wrapping_add(imm12)
            } else {
                base.wrapping_sub(imm12)
            }
        } else if hw1 & 0xFFE0 == 0xF8C0 {
            // ldr.w / str.w rt, [rn, #imm12]
            self.regs[(hw1 & 0xF) as usize].wrapping_add(imm12)
        } else {
            return Err(unsupported(pc, (hw1 as u32) << 16 | hw2 as u32));
        };
        if hw1 & 0xFFF0 == 0xF8C0 {
            self.store(mem, addr, self.reg(rt, pc))?;
            return Ok(pc.wrapping_add(4));
        }
        let value = self.load(mem, addr, 4)?;
        if rt == PC {
            return interwork(value);
        }
        self.regs[rt] = value;
        Ok(pc.wrapping_add(4))
    }
}

fn interwork(target: TargetAddr) -> Result<TargetAddr> {
    if target & 1 == 0 {
        return Err(execution_error(alloc::format!(
            "branch to {target:#010x} would leave Thumb state"
        )));
    }
    Ok(target & !1)
}

#[cold]
fn unsupported(pc: TargetAddr, insn: u32) -> crate::Error {
    execution_error(alloc::format!(
        "unsupported instruction {insn:#06x} at {pc:#010x}"
    ))
}

impl CacheControl for Simulator {
    fn flush_data(&mut self, _addr: TargetAddr, _len: usize) {
        self.stats.data_flushes += 1;
    }

    fn invalidate_instructions(&mut self) {
        self.stats.icache_invalidations += 1;
    }
}

impl ModuleRuntime for Simulator {
    fn call(
        &mut self,
        mem: &mut dyn TargetMemory,
        func: TargetAddr,
        pic_base: TargetAddr,
        args: &[u32],
    ) -> Result<u32> {
        if args.len() > 4 {
            return Err(execution_error("at most four register arguments"));
        }
        self.stats.calls += 1;
        self.regs = [0; 16];
        self.regs[..args.len()].copy_from_slice(args);
        self.regs[PIC_BASE_REGISTER] = pic_base;
        self.regs[SP] = self.stack_base.wrapping_add(self.stack.len() as u32);
        self.regs[LR] = RETURN_MAGIC;
        self.run(mem, func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::thumb::{emit_trampoline, encode_branch};
    use alloc::collections::BTreeMap;

    /// Flat sparse memory for exercising the interpreter alone.
    #[derive(Default)]
    struct Ram(BTreeMap<u32, u8>);

    impl Ram {
        fn put(&mut self, addr: u32, bytes: &[u8]) {
            for (i, &b) in bytes.iter().enumerate() {
                self.0.insert(addr + i as u32, b);
            }
        }

        fn code(&mut self, addr: u32, halfwords: &[u16]) {
            for (i, hw) in halfwords.iter().enumerate() {
                self.put(addr + 2 * i as u32, &hw.to_le_bytes());
            }
        }
    }

    impl TargetMemory for Ram {
        fn read(&mut self, addr: TargetAddr, buf: &mut [u8]) -> Result<()> {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = *self
                    .0
                    .get(&(addr + i as u32))
                    .ok_or_else(|| execution_error(alloc::format!("unmapped {addr:#x}")))?;
            }
            Ok(())
        }

        fn write(&mut self, addr: TargetAddr, data: &[u8]) -> Result<()> {
            self.put(addr, data);
            Ok(())
        }
    }

    #[test]
    fn arithmetic_and_return() {
        let mut ram = Ram::default();
        // movs r1, #5; adds r0, r0, r1; subs r0, #2; lsls r0, r0, #1; bx lr
        ram.code(0x1000, &[0x2105, 0x1840, 0x3802, 0x0040, 0x4770]);
        let mut sim = Simulator::new();
        assert_eq!(sim.call(&mut ram, 0x1001, 0, &[10]).unwrap(), 26);
    }

    #[test]
    fn calls_host_and_preserves_lr_on_stack() {
        let mut ram = Ram::default();
        let mut sim = Simulator::new().with_host_base(0x0010_0000);
        let host = sim.host_fn(|call| Ok(call.args[0] * 3 + call.pic_base));
        // push {r4, lr}; bl host; adds r0, #1; pop {r4, pc}
        let disp = host.wrapping_sub(0x1000 + 2 + 4) as i32;
        let (hi, lo) = encode_branch(0xF000, 0xF800, disp);
        ram.code(0x1000, &[0xB510, hi, lo, 0x3001, 0xBD10]);
        assert_eq!(sim.call(&mut ram, 0x1001, 100, &[7]).unwrap(), 122);
        assert_eq!(sim.stats().host_calls, 1);
    }

    #[test]
    fn trampoline_sets_pic_base() {
        let mut ram = Ram::default();
        // ldr.w r0, [r9, #0]; bx lr
        ram.code(0x3000, &[0xF8D9, 0x0000, 0x4770]);
        ram.put(0x2000_0000, &42u32.to_le_bytes());
        ram.put(0x4000, &emit_trampoline(0x3001, 0x2000_0000));
        let mut sim = Simulator::new();
        assert_eq!(sim.call(&mut ram, 0x4001, 0xdead_0000, &[]).unwrap(), 42);
        assert_eq!(sim.regs()[PIC_BASE_REGISTER], 0x2000_0000);
    }

    #[test]
    fn rejects_arm_state_and_hangs() {
        let mut ram = Ram::default();
        ram.code(0x1000, &[0xE7FE]); // b .
        let mut sim = Simulator::new().with_step_limit(100);
        assert!(sim.call(&mut ram, 0x1000, 0, &[]).is_err());
        assert!(sim.call(&mut ram, 0x1001, 0, &[]).is_err());
    }
}
