//! TEEM: an educational out-of-order RISC-V emulator with transient
//! execution and a timing-observable data cache.
//!
//! The crate models a pipelined, speculative RV32IM processor for studying
//! microarchitectural side channels (Spectre, Meltdown):
//! 1. **Front end:** an assembly lexer/parser producing a decoded program,
//!    fetch guided by direction/BTB/RAS predictors.
//! 2. **Engine:** reorder buffer, rename table with branch checkpoints,
//!    load-store queue with forwarding and memory-dependence speculation,
//!    in-order retire with rollback.
//! 3. **Memory:** sparse byte-addressable memory plus a set-associative LRU
//!    data cache whose fills deliberately survive rollback.
//! 4. **Simulation:** `Emulator` (program + engine + console I/O), YAML
//!    configuration, per-cycle snapshots, and statistics.

/// Assembly front end (lexer, parser, program).
pub mod asm;
/// Shared types: registers, errors, faults.
pub mod common;
/// YAML-backed configuration.
pub mod config;
/// Decoded instruction model and disassembly.
pub mod isa;
/// Byte-addressable sparse memory.
pub mod mem;
/// The speculative out-of-order engine.
pub mod pipeline;
/// Emulator façade, loader, and syscalls.
pub mod sim;
/// Simulation statistics.
pub mod stats;
/// Read-only per-cycle snapshots.
pub mod trace;
/// Execution units: ALU, cache, predictors.
pub mod units;

/// Root configuration type; load from YAML or use `Config::default()`.
pub use crate::config::Config;
/// Top-level error type.
pub use crate::common::EmuError;
/// Decoded program produced by the assembler.
pub use crate::asm::Program;
/// Run state reported by the engine.
pub use crate::pipeline::RunState;
/// The emulator façade driven by the CLI.
pub use crate::sim::Emulator;
/// Console I/O handles for the emulator.
pub use crate::sim::EmuIo;
