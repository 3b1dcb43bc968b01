// mod.rs
//
// Two-pass text assembler (spec §4.1) producing the instruction words the
// `machine` module consumes.

pub mod two_pass;

pub use two_pass::Assembler;
