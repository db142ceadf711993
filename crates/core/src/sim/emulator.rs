//! The emulator façade.
//!
//! [`Emulator`] ties together a loaded program, the engine, and the console
//! I/O handles, and exposes the driver interface the REPL uses: step,
//! continue, breakpoints, snapshots. The engine itself never blocks except
//! inside the guest's `read` syscall; cancellation happens between cycles.

use crate::asm::{Program, assemble};
use crate::common::EmuError;
use crate::config::Config;
use crate::pipeline::{Core, RunState};
use crate::stats::Stats;
use crate::trace::Snapshot;

use super::loader;
use super::syscall::EmuIo;

/// Cycles without a single retirement before a run is declared stuck.
/// Resource deadlock is impossible by construction; this is the diagnostic
/// backstop if that ever breaks.
const PROGRESS_WINDOW: u64 = 100_000;

/// A loaded guest program plus the engine executing it.
pub struct Emulator {
    core: Core,
    io: EmuIo,
}

impl Emulator {
    /// Creates an emulator over an assembled program.
    pub fn new(program: Program, config: &Config, io: EmuIo) -> Result<Self, EmuError> {
        config.validate()?;
        let mem = loader::load(&program, &config.memory)?;
        Ok(Self {
            core: Core::new(program, mem, config),
            io,
        })
    }

    /// Assembles source text and creates an emulator for it.
    pub fn from_source(src: &str, config: &Config, io: EmuIo) -> Result<Self, EmuError> {
        let program = assemble(src, &config.memory)?;
        Self::new(program, config, io)
    }

    /// The engine, for inspection.
    pub fn core(&self) -> &Core {
        &self.core
    }

    /// The loaded program.
    pub fn program(&self) -> &Program {
        &self.core.program
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        self.core.state
    }

    /// Run statistics.
    pub fn stats(&self) -> &Stats {
        &self.core.stats
    }

    /// Read-only engine snapshot for the UI.
    pub fn snapshot(&self) -> Snapshot {
        self.core.snapshot()
    }

    /// Advances exactly one cycle (no-op unless running).
    pub fn step_cycle(&mut self) -> Result<(), EmuError> {
        self.core.step_cycle(&mut self.io)
    }

    /// Advances up to `n` cycles, stopping early on pause or halt.
    pub fn step(&mut self, n: u64) -> Result<RunState, EmuError> {
        for _ in 0..n {
            if self.core.state != RunState::Running {
                break;
            }
            self.step_cycle()?;
        }
        Ok(self.core.state)
    }

    /// Resumes from an `ebreak` or breakpoint pause.
    pub fn resume(&mut self) {
        self.core.resume();
    }

    /// Runs until the engine pauses or halts.
    pub fn run(&mut self) -> Result<RunState, EmuError> {
        let mut last_retired = self.core.stats.instructions_retired;
        let mut last_progress = self.core.cycles;
        while self.core.state == RunState::Running {
            self.step_cycle()?;
            if self.core.stats.instructions_retired != last_retired {
                last_retired = self.core.stats.instructions_retired;
                last_progress = self.core.cycles;
            } else if self.core.cycles - last_progress > PROGRESS_WINDOW {
                return Err(EmuError::Stuck(PROGRESS_WINDOW));
            }
        }
        Ok(self.core.state)
    }

    /// Runs to exit or fault, resuming through pauses (batch mode).
    /// `max_cycles` bounds runaway guests in tests and scripts.
    pub fn run_to_completion(&mut self, max_cycles: u64) -> Result<RunState, EmuError> {
        while self.core.cycles < max_cycles {
            match self.core.state {
                RunState::Running => self.step_cycle()?,
                RunState::Paused(_) => self.resume(),
                RunState::Exited(_) | RunState::Faulted(_) => break,
            }
        }
        Ok(self.core.state)
    }

    /// Sets a breakpoint: the emulator pauses when the instruction at
    /// `addr` is about to retire.
    pub fn add_breakpoint(&mut self, addr: u32) {
        let _ = self.core.breakpoints.insert(addr);
    }

    /// Removes a breakpoint. Returns whether it existed.
    pub fn remove_breakpoint(&mut self, addr: u32) -> bool {
        self.core.breakpoints.remove(&addr)
    }
}

impl std::fmt::Debug for Emulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emulator")
            .field("cycle", &self.core.cycles)
            .field("state", &self.core.state)
            .finish_non_exhaustive()
    }
}
