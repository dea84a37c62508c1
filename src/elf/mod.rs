//! ELF32 definitions used by the streaming loader.
//!
//! Only the record types a relocatable object needs are provided: the file
//! header, section headers, symbols and REL entries.

mod defs;
mod ehdr;

pub use defs::{
    EHDR_SIZE, ElfRel, ElfShdr, ElfSymbol, REL_SIZE, SHDR_SIZE, SYM_SIZE, SectionFlags,
};
pub use ehdr::ElfHeader;
pub use elf::abi::*;
