//! # xip_loader
//! A streaming loader for native extension modules on flash-constrained
//! ARM Cortex-M targets.
//!
//! Modules are ELF32 relocatable objects. The loader streams their code
//! and read-only data straight into execute-in-place (XIP) flash, links
//! them against a fixed host export table with bounded memory, and places
//! mutable data in a RAM pool. Functions tagged `.text.iflash` are then
//! copied to internal flash and reached through trampolines that restore
//! the module's PIC base register, so they keep working while XIP flash
//! is powered down.
//!
//! ## Example
//! ```rust,ignore
//! use xip_loader::{HostExports, LoaderConfig, StreamLoader};
//!
//! let mut loader = StreamLoader::new(LoaderConfig::new().with_chunk_size(512))?;
//! let exports = HostExports::from_table([("printk", 0x0800_1001)]);
//! let image = loader.load(&mut ctx, "/lvgl_lfs/apps/weather/app.llext", &exports, "app_entry")?;
//! let report = ResidencyPatcher::new(&image).run(&mut ctx, &mut runtime)?;
//! ```
#![cfg_attr(not(test), no_std)]
extern crate alloc;
#[cfg(all(feature = "std", not(test)))]
extern crate std;

#[macro_use]
mod macros;

pub mod arch;
mod config;
pub mod context;
pub mod elf;
mod error;
pub mod exports;
pub mod flash;
pub mod image;
pub mod input;
mod loader;
pub mod manager;
pub mod relocation;
pub mod residency;
pub mod runtime;
#[cfg(feature = "sim")]
pub mod sim;

pub use ::elf::abi;
pub use config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ID_LEN, DEFAULT_MAX_SECTIONS, DEFAULT_MAX_SHSTRTAB,
    DEFAULT_MAX_STRTAB, DEFAULT_REL_BATCH, DEFAULT_SYM_CACHE_SLOTS, LoaderConfig, ManagerConfig,
    PartitionConfig,
};
pub use context::{Checkpoint, DataPool, LoadContext};
pub use error::{Error, custom_error, execution_error, flash_error};
pub use exports::{HostExports, SymbolLookup};
pub use image::{ModuleImage, PlacedSection, RamRegion, SectionClass};
pub use loader::{GOT_SECTION, StreamLoader};
pub use residency::{RESIDENT_SECTION, ResidencyPatcher, ResidencyReport};

/// An address in the target's 32-bit address space.
pub type TargetAddr = u32;

/// A type alias for `Result`s returned by `xip_loader` functions.
pub type Result<T> = core::result::Result<T, Error>;
