//! Host-side stand-ins for the target: NOR flash in memory and a Thumb
//! interpreter, so the whole load path can run in tests and tools.

mod cpu;
mod flash;

pub use cpu::{
    DEFAULT_HOST_BASE, DEFAULT_STACK_BASE, DEFAULT_STACK_SIZE, DEFAULT_STEP_LIMIT, HostCall,
    RETURN_MAGIC, SimStats, Simulator,
};
pub use flash::{Fault, FlashStats, MemFlash};
