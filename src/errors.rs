// errors.rs
//
// Error types for the assembler and the machine. Each carries enough
// context (source line, PC, or raw word) for a caller to report a useful
// message without re-deriving it.

use std::fmt;
use std::io;

/// Errors raised while assembling source text into instruction words.
#[derive(Debug)]
pub enum AssembleError {
    IoError(io::Error),
    UnknownMnemonic(String, usize),
    UndefinedLabel(String, usize),
    BadOperandCount(String, usize),
    ImmediateOutOfRange(i64, usize),
    InvalidRegister(String, usize),
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssembleError::IoError(err) => write!(f, "I/O error: {}", err),
            AssembleError::UnknownMnemonic(tok, line) => {
                write!(f, "line {}: unknown mnemonic '{}'", line, tok)
            },
            AssembleError::UndefinedLabel(label, line) => {
                write!(f, "line {}: undefined label '{}'", line, label)
            },
            AssembleError::BadOperandCount(mnemonic, line) => {
                write!(f, "line {}: wrong number of operands for '{}'", line, mnemonic)
            },
            AssembleError::ImmediateOutOfRange(imm, line) => {
                write!(f, "line {}: immediate {} out of range", line, imm)
            },
            AssembleError::InvalidRegister(token, line) => {
                write!(f, "line {}: '{}' is not a valid register", line, token)
            },
        }
    }
}

impl std::error::Error for AssembleError {}

impl From<io::Error> for AssembleError {
    fn from(error: io::Error) -> Self {
        AssembleError::IoError(error)
    }
}

/// Errors raised while loading assembled words into machine memory.
#[derive(Debug)]
pub enum LoadError {
    AddressOutOfRange { pc: u32, mem_size: u32 },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::AddressOutOfRange { pc, mem_size } => {
                write!(f, "address 0x{:x} is out of range for memory of size {}", pc, mem_size)
            },
        }
    }
}

impl std::error::Error for LoadError {}

/// Fatal conditions encountered while the machine is stepping. Mispredictions
/// are not errors; only an illegal opcode reaching decode is.
#[derive(Debug)]
pub enum MachineError {
    IllegalOpcode { pc: u32, word: u32 },
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineError::IllegalOpcode { pc, word } => {
                write!(f, "illegal opcode at pc=0x{:x}: word=0x{:08x}", pc, word)
            },
        }
    }
}

impl std::error::Error for MachineError {}
