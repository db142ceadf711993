//! Simulation: program loading, the emulator façade, and syscall I/O.

/// The emulator façade driven by the CLI/REPL.
pub mod emulator;
/// Section layout into guest memory.
pub mod loader;
/// Syscall I/O handles.
pub mod syscall;

pub use emulator::Emulator;
pub use syscall::{EmuIo, OutputCapture};
