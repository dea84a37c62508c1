//! Target architecture support.
//!
//! Modules are always ARMv7-M Thumb code, whatever the host. The encoding
//! helpers in [`thumb`] are pure functions so the loader can link on any
//! host; only actually calling into module code needs the real CPU.

pub mod thumb;

use elf::abi::*;

/// The only machine type accepted for modules.
pub const EM_ARCH: u16 = EM_ARM;

/// Register that holds the module's GOT base while its code runs.
pub const PIC_BASE_REGISTER: usize = 9;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        mod arm;
        pub use arm::NativeRuntime;
    }
}

/// Human readable name of an ARM relocation type.
pub(crate) fn rel_type_to_str(r_type: u32) -> &'static str {
    match r_type {
        R_ARM_NONE => "R_ARM_NONE",
        R_ARM_ABS32 => "R_ARM_ABS32",
        R_ARM_REL32 => "R_ARM_REL32",
        R_ARM_THM_CALL => "R_ARM_THM_CALL",
        R_ARM_THM_JUMP24 => "R_ARM_THM_JUMP24",
        R_ARM_PREL31 => "R_ARM_PREL31",
        R_ARM_V4BX => "R_ARM_V4BX",
        _ => "UNKNOWN",
    }
}
