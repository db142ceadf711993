//! Shared helpers for the integration suites.

use teem_core::pipeline::RunState;
use teem_core::sim::{EmuIo, OutputCapture};
use teem_core::{Config, Emulator};

/// Generous bound; real programs here finish in thousands of cycles.
pub const MAX_CYCLES: u64 = 2_000_000;

/// Assembles and runs `src` to completion with default config and no input.
pub fn run(src: &str) -> (Emulator, OutputCapture, RunState) {
    run_with(src, &Config::default(), b"")
}

/// Assembles and runs `src` to completion.
pub fn run_with(src: &str, config: &Config, input: &[u8]) -> (Emulator, OutputCapture, RunState) {
    let (io, out) = EmuIo::capture(input);
    let mut emu = Emulator::from_source(src, config, io).expect("program should assemble");
    let state = emu
        .run_to_completion(MAX_CYCLES)
        .expect("run should not error");
    (emu, out, state)
}

/// Unwraps an exit state into the guest's status code.
pub fn exit_code(state: RunState) -> i32 {
    match state {
        RunState::Exited(code) => code,
        other => panic!("expected exit, got {other:?}"),
    }
}
