//! Error and fault definitions.
//!
//! Three families of errors exist, raised at different times:
//! 1. **Parse errors:** produced eagerly while lexing/parsing assembly text;
//!    fatal to the load and reported with line/column.
//! 2. **Load errors:** produced while laying out sections and resolving
//!    labels; fatal to the load.
//! 3. **Execution faults:** produced by μops during (possibly speculative)
//!    execution, carried in the ROB entry and raised only when the entry
//!    retires. A flushed fault is discarded silently.

use thiserror::Error;

/// Error produced while lexing or parsing an assembly source file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}:{col}: {msg}")]
pub struct ParseError {
    /// 1-based source line.
    pub line: usize,
    /// 1-based source column.
    pub col: usize,
    /// Description of what went wrong.
    pub msg: String,
}

impl ParseError {
    /// Creates a parse error at the given position.
    pub fn new(line: usize, col: usize, msg: impl Into<String>) -> Self {
        Self {
            line,
            col,
            msg: msg.into(),
        }
    }
}

/// Error produced while laying out a parsed program into memory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The same label was defined more than once.
    #[error("duplicate label `{0}`")]
    DuplicateLabel(String),
    /// An instruction or directive referenced an undefined label.
    #[error("unresolved label `{0}`")]
    UnresolvedLabel(String),
    /// A directive appeared in a section where it is not allowed.
    #[error("directive `{directive}` is not valid in section `{section}`")]
    InvalidDirective {
        /// The offending directive, including the leading dot.
        directive: String,
        /// The section that was active.
        section: String,
    },
    /// The program has no instructions.
    #[error("program has no .text content")]
    EmptyText,
    /// A section outgrew the address space reserved for it.
    #[error("section `{0}` overflows its address range")]
    SectionOverflow(String),
}

/// Execution fault produced by a μop.
///
/// Faults are produced during execution but only raised when the owning ROB
/// entry retires; speculative faults are suppressed so that transient
/// execution continues past them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    /// A load touched an address outside the valid memory range.
    #[error("load access fault at {0:#010x}")]
    LoadAccess(u32),
    /// A store touched an address outside the valid memory range.
    #[error("store access fault at {0:#010x}")]
    StoreAccess(u32),
    /// The program counter left the `.text` section.
    #[error("instruction fetch fault at {0:#010x}")]
    FetchAccess(u32),
    /// An `ecall` used a syscall number the emulator does not provide.
    #[error("unknown syscall {0}")]
    BadSyscall(i32),
}

/// Top-level emulator error.
#[derive(Debug, Error)]
pub enum EmuError {
    /// Assembly text could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    /// A parsed program could not be loaded.
    #[error("load error: {0}")]
    Load(#[from] LoadError),
    /// The configuration was rejected.
    #[error("config error: {0}")]
    Config(String),
    /// Reading a source or configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A YAML configuration file could not be deserialized.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// The pipeline stopped retiring instructions. Impossible by
    /// construction; reported instead of hanging if it ever happens.
    #[error("pipeline made no progress for {0} cycles")]
    Stuck(u64),
}
