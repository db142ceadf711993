//! Read-only per-cycle observability.
//!
//! The engine exposes its microarchitectural state as serializable
//! snapshots for the REPL `show` commands and the JSON trace export.
//! Snapshots are views: taking one never mutates engine state.

use serde::Serialize;

use crate::units::bpred::PredictorView;
use crate::units::cache::CacheView;

/// Why the last rollback happened.
#[derive(Clone, Debug, Serialize)]
pub enum FlushReason {
    /// A conditional branch or indirect jump retired with a wrong
    /// prediction.
    Mispredict {
        /// PC of the mispredicted μop.
        pc: u32,
        /// Corrected fetch target.
        target: u32,
    },
    /// A speculative load was caught reading stale data when an older
    /// store's address resolved.
    Ordering {
        /// PC of the offending load.
        load_pc: u32,
        /// PC of the store whose address resolved.
        store_pc: u32,
    },
    /// A faulted μop reached retire.
    Fault {
        /// PC of the faulting μop.
        pc: u32,
        /// Fault description.
        fault: String,
    },
    /// A syscall retired and discarded the speculative tail.
    Syscall {
        /// PC of the `ecall`.
        pc: u32,
    },
}

/// Record of the most recent flush.
#[derive(Clone, Debug, Serialize)]
pub struct FlushRecord {
    /// Cycle the flush happened in.
    pub cycle: u64,
    /// Cause.
    pub reason: FlushReason,
    /// Number of ROB entries discarded.
    pub discarded: usize,
}

/// Record of the most recent syscall.
#[derive(Clone, Debug, Serialize)]
pub struct SyscallRecord {
    /// Cycle the syscall retired in.
    pub cycle: u64,
    /// Syscall name (`exit`, `read`, `write`).
    pub name: &'static str,
    /// Value returned in `a0`.
    pub result: u32,
}

/// One ROB entry as shown to the UI.
#[derive(Clone, Debug, Serialize)]
pub struct RobEntryView {
    /// Tag number.
    pub tag: u64,
    /// Program counter.
    pub pc: u32,
    /// Disassembled operation.
    pub op: String,
    /// Execution finished.
    pub executed: bool,
    /// Control-dependent on an unresolved prediction.
    pub speculative: bool,
    /// Result value, meaningful once executed.
    pub result: u32,
    /// Pending fault, if any.
    pub fault: Option<String>,
}

/// One LSQ entry as shown to the UI.
#[derive(Clone, Debug, Serialize)]
pub struct LsqEntryView {
    /// Tag number.
    pub tag: u64,
    /// `"load"` or `"store"`.
    pub kind: &'static str,
    /// Resolved address, if known.
    pub addr: Option<u32>,
    /// Store data or obtained load value.
    pub value: Option<u32>,
    /// The load has obtained its value.
    pub performed: bool,
    /// The load read memory past an unknown store address.
    pub speculative: bool,
}

/// Full per-cycle snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    /// Current cycle count.
    pub cycle: u64,
    /// Speculative fetch PC.
    pub fetch_pc: u32,
    /// Architectural PC (next unretired instruction).
    pub arch_pc: u32,
    /// Run state description.
    pub state: String,
    /// Architectural register file.
    pub regs: Vec<u32>,
    /// In-flight μops, oldest first.
    pub rob: Vec<RobEntryView>,
    /// In-flight memory μops, oldest first.
    pub lsq: Vec<LsqEntryView>,
    /// Cache contents.
    pub cache: CacheView,
    /// Predictor state.
    pub predictor: PredictorView,
    /// Most recent flush, if any.
    pub last_flush: Option<FlushRecord>,
    /// Most recent syscall, if any.
    pub last_syscall: Option<SyscallRecord>,
}
