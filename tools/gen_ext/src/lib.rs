//! `gen_ext` builds small ARM Thumb relocatable objects for exercising the
//! XIP extension loader: a tiny Thumb assembler, a thin builder over
//! `object::write`, and the canned modules the tests load.

mod asm;
mod fixtures;
mod writer;

pub use asm::{Asm, Assembled};
pub use fixtures::*;
pub use writer::{ExtObject, SectionKind};
