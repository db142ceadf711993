//! Simulation statistics.
//!
//! Counters for everything the retire and flush paths observe: instruction
//! mix, prediction accuracy, cache behavior, forwarding, and the fate of
//! transient work. `print()` writes the end-of-run report.

use serde::Serialize;

/// Counter block collected over a run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Stats {
    /// Total simulated cycles.
    pub cycles: u64,
    /// μops retired (architecturally executed).
    pub instructions_retired: u64,
    /// μops that entered the ROB, including later-flushed ones.
    pub instructions_dispatched: u64,

    /// ALU μops retired.
    pub inst_alu: u64,
    /// Loads retired.
    pub inst_load: u64,
    /// Stores retired.
    pub inst_store: u64,
    /// Conditional branches retired.
    pub inst_branch: u64,
    /// Jumps (direct and indirect) retired.
    pub inst_jump: u64,
    /// System μops retired (syscalls, fences, cache ops, `rdcycle`).
    pub inst_system: u64,

    /// Predictions checked at retire.
    pub branch_lookups: u64,
    /// Predictions that were wrong.
    pub branch_mispredictions: u64,

    /// Data cache hits (demand accesses, including transient ones).
    pub dcache_hits: u64,
    /// Data cache misses.
    pub dcache_misses: u64,

    /// Loads satisfied by store-to-load forwarding.
    pub loads_forwarded: u64,
    /// Loads that read memory past an unknown older store address.
    pub loads_speculative: u64,

    /// Flushes caused by branch/target mispredictions.
    pub flush_mispredict: u64,
    /// Flushes caused by memory-ordering violations.
    pub flush_ordering: u64,
    /// Flushes caused by faults reaching retire.
    pub flush_fault: u64,
    /// Flushes caused by syscalls.
    pub flush_syscall: u64,

    /// Faulted μops discarded by a flush before they could retire.
    pub faults_suppressed: u64,
    /// Cycles in which retire could not make progress.
    pub retire_stalls: u64,
    /// Cycles in which fetch was stalled (back-pressure, fences, faults).
    pub fetch_stalls: u64,
}

impl Stats {
    /// Instructions per cycle over the whole run.
    pub fn ipc(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.instructions_retired as f64 / self.cycles as f64
        }
    }

    /// Branch prediction accuracy in [0, 1].
    pub fn branch_accuracy(&self) -> f64 {
        if self.branch_lookups == 0 {
            1.0
        } else {
            1.0 - self.branch_mispredictions as f64 / self.branch_lookups as f64
        }
    }

    /// Prints the end-of-run report.
    pub fn print(&self) {
        println!("--- simulation statistics ---");
        println!("cycles:              {}", self.cycles);
        println!(
            "retired:             {} ({:.3} IPC)",
            self.instructions_retired,
            self.ipc()
        );
        println!("dispatched:          {}", self.instructions_dispatched);
        println!(
            "mix:                 alu {} load {} store {} branch {} jump {} system {}",
            self.inst_alu,
            self.inst_load,
            self.inst_store,
            self.inst_branch,
            self.inst_jump,
            self.inst_system
        );
        println!(
            "branches:            {} checked, {} mispredicted ({:.1}% accuracy)",
            self.branch_lookups,
            self.branch_mispredictions,
            100.0 * self.branch_accuracy()
        );
        println!(
            "dcache:              {} hits, {} misses",
            self.dcache_hits, self.dcache_misses
        );
        println!(
            "loads:               {} forwarded, {} speculative",
            self.loads_forwarded, self.loads_speculative
        );
        println!(
            "flushes:             {} mispredict, {} ordering, {} fault, {} syscall",
            self.flush_mispredict, self.flush_ordering, self.flush_fault, self.flush_syscall
        );
        println!("transient faults:    {}", self.faults_suppressed);
        println!(
            "stalls:              {} retire, {} fetch",
            self.retire_stalls, self.fetch_stalls
        );
    }
}
