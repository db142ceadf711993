//! Fetch/decode/rename/dispatch phase.
//!
//! Runs last in the cycle so newly dispatched μops cannot issue before the
//! next cycle. Up to `dispatch_width` instructions per cycle flow straight
//! from `.text` (already decoded) through rename into the ROB and LSQ.
//! Fetch follows predictions: conditional branches consult the direction
//! predictor, indirect jumps the BTB, returns the RAS, and every
//! prediction records a checkpoint on its ROB entry.
//!
//! Back-pressure is entirely local to this phase: a full window, a full
//! LSQ, an in-flight `fence.i`, or a fetch that ran off `.text` stall
//! further dispatch until retire (or a flush) clears the condition.

use tracing::trace;

use crate::common::{Fault, Reg};
use crate::isa::{AluOp, Op, Src2};

use super::engine::Core;
use super::lsq::LsqKind;
use super::rename::Checkpoint;
use super::rob::{Prediction, RobTag};

/// Placeholder payload for a poisoned fetch-fault entry; the recorded fault
/// retires before the operation is ever interpreted.
const POISON: Op = Op::Alu {
    op: AluOp::Add,
    rd: Reg::ZERO,
    rs1: Reg::ZERO,
    src2: Src2::Imm(0),
};

/// Dispatches up to `dispatch_width` μops.
pub(crate) fn dispatch_phase(core: &mut Core) {
    for _ in 0..core.dispatch_width {
        if core.fence_inflight > 0 || core.fetch_fault_stall {
            core.stats.fetch_stalls += 1;
            break;
        }
        if core.rob.len() >= core.window {
            core.stats.fetch_stalls += 1;
            break;
        }

        let pc = core.fetch_pc;
        let Some(op) = core.program.fetch(pc) else {
            // Wrong-path (or buggy) fetch ran off .text: dispatch a poisoned
            // entry whose fault raises only if it retires, then stall until
            // a flush redirects fetch.
            if let Some(tag) = core.rob.allocate(pc, POISON) {
                let predicates = predicates_for(core, tag);
                if let Some(entry) = core.rob.get_mut(tag) {
                    entry.executed = true;
                    entry.fault = Some(Fault::FetchAccess(pc));
                    entry.predicates = predicates;
                    core.stats.instructions_dispatched += 1;
                }
            }
            core.fetch_fault_stall = true;
            break;
        };

        if (op.is_load() || op.is_store()) && core.lsq.is_full() {
            core.stats.fetch_stalls += 1;
            break;
        }
        let Some(tag) = core.rob.allocate(pc, op) else {
            break;
        };

        // Source operands resolve against the rename table *before* the
        // destination is remapped, so `addi x5, x5, 1` reads the previous
        // producer.
        let (rv1, rs1_tag) = resolve_source(core, op.src1());
        let (rv2, rs2_tag) = resolve_source(core, op.src2());
        let predicates = predicates_for(core, tag);

        if let Some(rd) = op.dest() {
            core.rename.set(rd, tag);
        }
        if op.is_load() {
            let _ = core.lsq.allocate(tag, LsqKind::Load, load_width(op));
        } else if op.is_store() {
            let _ = core.lsq.allocate(tag, LsqKind::Store, store_width(op));
        }
        if matches!(op, Op::FenceI) {
            core.fence_inflight += 1;
        }

        // Predict the next fetch address, applying RAS effects as we go.
        let (next_pc, prediction) = predict_next(core, pc, op);
        let checkpoint = prediction.is_some().then(|| {
            Box::new(Checkpoint {
                rename: core.rename.snapshot(),
                ras: core.ras.clone(),
                lsq_len: core.lsq.len(),
            })
        });

        if let Some(entry) = core.rob.get_mut(tag) {
            entry.rv1 = rv1;
            entry.rs1_tag = rs1_tag;
            entry.rv2 = rv2;
            entry.rs2_tag = rs2_tag;
            entry.predicates = predicates;
            entry.prediction = prediction;
            entry.checkpoint = checkpoint;
        }

        trace!(
            cycle = core.cycles,
            pc,
            %tag,
            op = %op,
            "dispatch"
        );
        core.stats.instructions_dispatched += 1;
        core.fetch_pc = next_pc;
    }
}

/// Resolves one source register: committed value, executed producer's
/// result, or a pending tag. A tag that is no longer in the ROB refers to a
/// retired producer whose value is already architectural.
fn resolve_source(core: &Core, reg: Option<Reg>) -> (u32, Option<RobTag>) {
    let Some(reg) = reg else {
        return (0, None);
    };
    if reg.is_zero() {
        return (0, None);
    }
    match core.rename.get(reg) {
        None => (core.read_reg(reg.index()), None),
        Some(producer) => match core.rob.get(producer) {
            Some(entry) if entry.executed => (entry.result, None),
            Some(_) => (0, Some(producer)),
            None => (core.read_reg(reg.index()), None),
        },
    }
}

/// Tags of all in-flight predicted μops older than `tag`: the predicates
/// this entry's execution is contingent on.
fn predicates_for(core: &Core, tag: RobTag) -> Vec<RobTag> {
    core.rob
        .iter()
        .filter(|e| e.tag < tag && e.prediction.is_some())
        .map(|e| e.tag)
        .collect()
}

/// Computes the predicted next PC and, for predicted μop kinds, the
/// prediction record. Applies call/return effects to the RAS.
fn predict_next(core: &mut Core, pc: u32, op: Op) -> (u32, Option<Prediction>) {
    let fallthrough = pc.wrapping_add(4);
    match op {
        Op::Branch { target, .. } => {
            let taken = core.bp.predict(pc);
            let predicted = if taken { target } else { fallthrough };
            (predicted, Some(Prediction { taken, target: predicted }))
        }
        Op::Jal { target, .. } => {
            if op.is_call() {
                core.ras.push(fallthrough);
            }
            (target, None)
        }
        Op::Jalr { .. } => {
            let predicted = if op.is_ret() {
                core.ras
                    .pop()
                    .or_else(|| core.btb.lookup(pc))
                    .unwrap_or(fallthrough)
            } else {
                core.btb.lookup(pc).unwrap_or(fallthrough)
            };
            if op.is_call() {
                core.ras.push(fallthrough);
            }
            (
                predicted,
                Some(Prediction {
                    taken: true,
                    target: predicted,
                }),
            )
        }
        _ => (fallthrough, None),
    }
}

fn load_width(op: Op) -> crate::isa::MemWidth {
    match op {
        Op::Load { width, .. } => width,
        _ => crate::isa::MemWidth::Word,
    }
}

fn store_width(op: Op) -> crate::isa::MemWidth {
    match op {
        Op::Store { width, .. } => width,
        _ => crate::isa::MemWidth::Word,
    }
}
