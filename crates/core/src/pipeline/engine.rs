//! The engine: all microarchitectural state and the cycle loop.
//!
//! [`Core`] owns every structure exclusively; nothing is shared or locked.
//! The REPL drives it through [`Core::step_cycle`], which runs one cycle in
//! the fixed phase order retire → writeback → issue → dispatch/fetch and
//! returns between cycles. The engine never blocks internally except inside
//! the `read` syscall.

use std::collections::HashSet;

use tracing::debug;

use crate::asm::Program;
use crate::common::Fault;
use crate::config::{Config, FaultingLoadValue};
use crate::isa::Op;
use crate::mem::Memory;
use crate::sim::syscall::EmuIo;
use crate::stats::Stats;
use crate::trace::{
    FlushReason, FlushRecord, LsqEntryView, RobEntryView, Snapshot, SyscallRecord,
};
use crate::units::bpred::{Btb, DirectionPredictor, MemDepPredictor, PredictorView, Ras};
use crate::units::cache::DataCache;

use super::lsq::{Lsq, LsqKind};
use super::rename::{Checkpoint, RenameTable};
use super::rob::{Rob, RobTag};
use super::{fetch, issue, retire};

/// Why the emulator is paused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PauseReason {
    /// An `ebreak` retired.
    Ebreak,
    /// The instruction at this address is about to retire.
    Breakpoint(u32),
}

/// Run state of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Executing; `step_cycle` makes progress.
    Running,
    /// Paused for the UI; resume with [`Core::resume`].
    Paused(PauseReason),
    /// The guest called `exit`.
    Exited(i32),
    /// A fault reached retire and halted the emulator.
    Faulted(Fault),
}

/// The speculative out-of-order engine.
pub struct Core {
    /// Loaded program (`.text` is fetched from here).
    pub program: Program,
    /// Guest memory.
    pub mem: Memory,
    /// Data cache (timing side channel).
    pub cache: DataCache,
    /// Architectural register file. `regs[0]` stays zero.
    pub regs: [u32; 32],
    /// Rename table.
    pub rename: RenameTable,
    /// Reorder buffer.
    pub rob: Rob,
    /// Load-store queue.
    pub lsq: Lsq,
    /// Branch direction predictor.
    pub bp: DirectionPredictor,
    /// Branch target buffer.
    pub btb: Btb,
    /// Return-address stack (updated speculatively at fetch).
    pub ras: Ras,
    /// Memory-dependence predictor.
    pub memdep: MemDepPredictor,
    /// Simulated cycle counter (`rdcycle` reads this).
    pub cycles: u64,
    /// Speculative fetch PC.
    pub fetch_pc: u32,
    /// Architectural PC: address of the next unretired instruction.
    pub arch_pc: u32,
    /// Run state.
    pub state: RunState,
    /// Statistics.
    pub stats: Stats,
    /// Retire-time breakpoints.
    pub breakpoints: HashSet<u32>,
    /// Most recent flush, for the UI.
    pub last_flush: Option<FlushRecord>,
    /// Most recent syscall, for the UI.
    pub last_syscall: Option<SyscallRecord>,

    /// In-flight cap: `min(rob_depth, tag_pool)`.
    pub(crate) window: usize,
    /// Retire width.
    pub(crate) retire_width: usize,
    /// Dispatch width.
    pub(crate) dispatch_width: usize,
    /// Faulting-load value policy.
    pub(crate) fault_policy: FaultingLoadValue,
    /// Sentinel for the `sentinel` policy.
    pub(crate) sentinel: u32,

    /// Number of `fence.i` μops in flight; fetch stalls while nonzero.
    pub(crate) fence_inflight: usize,
    /// Fetch ran off `.text`; stalled until a flush redirects it.
    pub(crate) fetch_fault_stall: bool,
    /// Breakpoint PC to step over after a resume.
    pub(crate) breakpoint_resume: Option<u32>,
}

impl Core {
    /// Creates an engine over a loaded program.
    pub fn new(program: Program, mem: Memory, config: &Config) -> Self {
        let entry = program.entry;
        let mut regs = [0u32; 32];
        regs[2] = config.memory.initial_sp;
        Self {
            program,
            mem,
            cache: DataCache::new(&config.cache),
            regs,
            rename: RenameTable::new(),
            rob: Rob::new(config.pipeline.rob_depth),
            lsq: Lsq::new(config.pipeline.lsq_depth),
            bp: DirectionPredictor::new(
                config.predictor.pht_bits,
                config.predictor.history_bits,
            ),
            btb: Btb::new(config.predictor.btb_size),
            ras: Ras::new(config.predictor.ras_depth),
            memdep: MemDepPredictor::new(
                config.predictor.memdep_size,
                config.predictor.memdep_enabled,
            ),
            cycles: 0,
            fetch_pc: entry,
            arch_pc: entry,
            state: RunState::Running,
            stats: Stats::default(),
            breakpoints: HashSet::new(),
            last_flush: None,
            last_syscall: None,
            window: config.pipeline.rob_depth.min(config.pipeline.tag_pool),
            retire_width: config.pipeline.retire_width,
            dispatch_width: config.pipeline.dispatch_width,
            fault_policy: config.speculation.faulting_load_value,
            sentinel: config.speculation.sentinel,
            fence_inflight: 0,
            fetch_fault_stall: false,
            breakpoint_resume: None,
        }
    }

    /// Advances one cycle: retire → writeback → issue → dispatch/fetch.
    /// A no-op unless the engine is running.
    pub fn step_cycle(&mut self, io: &mut EmuIo) -> Result<(), crate::common::EmuError> {
        if self.state != RunState::Running {
            return Ok(());
        }
        self.cycles += 1;
        self.stats.cycles = self.cycles;

        retire::retire_phase(self, io)?;
        if self.state != RunState::Running {
            return Ok(());
        }
        issue::writeback_phase(self);
        issue::issue_phase(self);
        fetch::dispatch_phase(self);
        Ok(())
    }

    /// Resumes from a pause. Exited/faulted engines stay halted.
    pub fn resume(&mut self) {
        if let RunState::Paused(reason) = self.state {
            if let PauseReason::Breakpoint(pc) = reason {
                self.breakpoint_resume = Some(pc);
            }
            self.state = RunState::Running;
        }
    }

    /// Rolls back everything at or after `first_removed`.
    ///
    /// Rename and RAS come from the checkpoint when the rollback point is a
    /// predicted μop; otherwise the rename table is rebuilt from surviving
    /// producers and the RAS is left alone (prediction-only state). Cache
    /// and memory are never touched: stores younger than the cut never got
    /// there, and transient cache fills are not undone.
    pub(crate) fn flush_from(
        &mut self,
        first_removed: RobTag,
        checkpoint: Option<&Checkpoint>,
        new_pc: u32,
        reason: FlushReason,
    ) {
        let suppressed = self
            .rob
            .iter()
            .filter(|e| e.tag >= first_removed && e.fault.is_some())
            .count() as u64;
        self.stats.faults_suppressed += suppressed;

        let discarded = self.rob.flush_from(first_removed);
        self.lsq.flush_from(first_removed);

        match checkpoint {
            Some(cp) => {
                self.rename.restore(cp.rename);
                self.ras = cp.ras.clone();
            }
            None => {
                let producers: Vec<_> = self.rob.producers().collect();
                self.rename.rebuild(producers.into_iter());
            }
        }

        self.fence_inflight = self
            .rob
            .iter()
            .filter(|e| matches!(e.op, Op::FenceI))
            .count();
        self.fetch_fault_stall = false;
        self.fetch_pc = new_pc;

        debug!(
            cycle = self.cycles,
            discarded,
            new_pc,
            ?reason,
            "pipeline flush"
        );
        self.last_flush = Some(FlushRecord {
            cycle: self.cycles,
            reason,
            discarded,
        });
    }

    /// Reads an architectural register (`x0` reads zero).
    #[inline]
    pub fn read_reg(&self, idx: usize) -> u32 {
        if idx == 0 { 0 } else { self.regs[idx] }
    }

    /// Writes an architectural register (`x0` writes are dropped).
    #[inline]
    pub(crate) fn write_reg(&mut self, idx: usize, value: u32) {
        if idx != 0 {
            self.regs[idx] = value;
        }
    }

    /// Takes a read-only snapshot of the whole engine for the UI.
    pub fn snapshot(&self) -> Snapshot {
        let rob = self
            .rob
            .iter()
            .map(|e| RobEntryView {
                tag: e.tag.0,
                pc: e.pc,
                op: e.op.to_string(),
                executed: e.executed,
                speculative: e.speculative(),
                result: e.result,
                fault: e.fault.map(|f| f.to_string()),
            })
            .collect();
        let lsq = self
            .lsq
            .iter()
            .map(|e| LsqEntryView {
                tag: e.tag.0,
                kind: match e.kind {
                    LsqKind::Load => "load",
                    LsqKind::Store => "store",
                },
                addr: e.addr,
                value: e.value,
                performed: e.performed,
                speculative: e.speculative,
            })
            .collect();
        Snapshot {
            cycle: self.cycles,
            fetch_pc: self.fetch_pc,
            arch_pc: self.arch_pc,
            state: format!("{:?}", self.state),
            regs: self.regs.to_vec(),
            rob,
            lsq,
            cache: self.cache.view(),
            predictor: PredictorView {
                ghr: self.bp.history(),
                pht_entries: self.bp.entries(),
                taken_counters: self.bp.taken_counters(),
                btb: self.btb.entries(),
                ras: self.ras.entries(),
            },
            last_flush: self.last_flush.clone(),
            last_syscall: self.last_syscall.clone(),
        }
    }
}
