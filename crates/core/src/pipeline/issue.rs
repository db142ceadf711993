//! Writeback and issue/execute phase.
//!
//! Writeback finalizes memory accesses whose latency has elapsed and
//! broadcasts their results. Issue then scans the ROB oldest to youngest
//! and executes every μop whose operands are ready; there is no
//! functional-unit contention, so any number may execute per cycle, and a
//! result produced early in the scan can wake a younger consumer in the
//! same cycle.
//!
//! Loads and stores route through the LSQ here: address resolution,
//! store-to-load forwarding, speculative memory reads, and the alias check
//! that catches ordering misspeculation when a store address resolves.

use crate::config::FaultingLoadValue;
use crate::isa::{Op, Src2};
use crate::trace::FlushReason;
use crate::units::alu;

use super::engine::Core;
use super::lsq::LoadPlan;
use super::rob::RobTag;

/// Finalizes completed memory accesses and broadcasts their results.
pub(crate) fn writeback_phase(core: &mut Core) {
    let now = core.cycles;
    let mut completed: Vec<(RobTag, u32)> = Vec::new();

    for entry in core.rob.iter_mut() {
        if !entry.executed
            && let Some(at) = entry.completes_at
            && at <= now
        {
            entry.executed = true;
            entry.completes_at = None;
            completed.push((entry.tag, entry.result));
        }
    }
    for (tag, value) in completed {
        core.rob.broadcast(tag, value);
    }
}

/// Executes every ready μop, oldest first.
pub(crate) fn issue_phase(core: &mut Core) {
    let head = core.rob.head().map(|e| e.tag);
    let tags: Vec<RobTag> = core.rob.iter().map(|e| e.tag).collect();
    // Oldest violation wins if several store addresses resolve this cycle.
    let mut violation: Option<(RobTag, u32, u32)> = None;

    for tag in tags {
        let Some(entry) = core.rob.get(tag) else {
            continue;
        };
        if entry.issued() {
            continue;
        }

        if entry.op.is_store() {
            exec_store(core, tag, &mut violation);
            continue;
        }
        if entry.rs1_tag.is_some() || entry.rs2_tag.is_some() {
            continue;
        }
        if entry.op.is_load() {
            exec_load(core, tag);
            continue;
        }

        let (op, pc, rv1, rv2) = (entry.op, entry.pc, entry.rv1, entry.rv2);
        let mut result = 0u32;
        let mut taken = false;
        let mut target = 0u32;
        let mut broadcast = false;

        match op {
            Op::Alu { op, src2, .. } => {
                let b = match src2 {
                    Src2::Reg(_) => rv2,
                    Src2::Imm(imm) => imm as u32,
                };
                result = alu::execute(op, rv1, b);
                broadcast = true;
            }
            Op::Lui { imm, .. } => {
                result = imm as u32;
                broadcast = true;
            }
            Op::Auipc { imm, .. } => {
                result = pc.wrapping_add(imm as u32);
                broadcast = true;
            }
            Op::RdCycle { .. } => {
                // Serializing: the cycle counter reads only at the ROB head
                // so timing probes order with older memory operations.
                if head != Some(tag) {
                    continue;
                }
                result = core.cycles as u32;
                broadcast = true;
            }
            Op::Jal {
                target: jump_target,
                ..
            } => {
                result = pc.wrapping_add(4);
                taken = true;
                target = jump_target;
                broadcast = true;
            }
            Op::Jalr { offset, .. } => {
                result = pc.wrapping_add(4);
                taken = true;
                target = rv1.wrapping_add(offset as u32) & !1;
                broadcast = true;
            }
            Op::Branch { cond, .. } => {
                taken = branch_taken(cond, rv1, rv2);
                target = if taken {
                    branch_target(op)
                } else {
                    pc.wrapping_add(4)
                };
            }
            Op::CboFlush { offset, .. } => {
                // The line is invalidated at retire; only the effective
                // address is computed here. Nonzero offsets are accepted.
                target = rv1.wrapping_add(offset as u32);
            }
            Op::FenceI | Op::Ecall | Op::Ebreak | Op::FlushAll => {}
            Op::Load { .. } | Op::Store { .. } => unreachable!("handled above"),
        }

        if let Some(entry) = core.rob.get_mut(tag) {
            entry.result = result;
            entry.taken = taken;
            entry.target = target;
            entry.executed = true;
        }
        if broadcast {
            core.rob.broadcast(tag, result);
        }
    }

    if let Some((load_tag, load_pc, store_pc)) = violation {
        core.memdep.train(load_pc);
        core.stats.flush_ordering += 1;
        core.flush_from(
            load_tag,
            None,
            load_pc,
            FlushReason::Ordering { load_pc, store_pc },
        );
    }
}

/// Evaluates a branch condition.
fn branch_taken(cond: crate::isa::BranchCond, a: u32, b: u32) -> bool {
    use crate::isa::BranchCond::{Eq, Ge, Geu, Lt, Ltu, Ne};
    match cond {
        Eq => a == b,
        Ne => a != b,
        Lt => (a as i32) < (b as i32),
        Ge => (a as i32) >= (b as i32),
        Ltu => a < b,
        Geu => a >= b,
    }
}

fn branch_target(op: Op) -> u32 {
    match op {
        Op::Branch { target, .. } => target,
        _ => 0,
    }
}

/// Executes a ready load: resolve the address, plan against older stores,
/// then forward or access memory. The cache line is installed the moment
/// the access starts; only the result is delayed by the access latency.
fn exec_load(core: &mut Core, tag: RobTag) {
    let Some(entry) = core.rob.get(tag) else {
        return;
    };
    let Op::Load {
        offset, width, ext, ..
    } = entry.op
    else {
        return;
    };
    let pc = entry.pc;
    let addr = entry.rv1.wrapping_add(offset as u32);
    let now = core.cycles;

    if let Some(lsq_entry) = core.lsq.get_mut(tag) {
        lsq_entry.addr = Some(addr);
    }

    match core.lsq.plan_load(tag, addr, width, ext) {
        LoadPlan::Wait => {}
        LoadPlan::Forward { value, from } => {
            core.stats.loads_forwarded += 1;
            let latency = core.cache.hit_latency();
            finish_load(core, tag, addr, value, now + latency, Some(from), false);
        }
        plan @ (LoadPlan::Speculate | LoadPlan::Normal) => {
            let speculative = plan == LoadPlan::Speculate;
            if speculative && core.memdep.should_wait(pc) {
                return;
            }
            match core.mem.load(addr, width, ext) {
                Ok(value) => {
                    let access = core.cache.access(addr);
                    if access.hit {
                        core.stats.dcache_hits += 1;
                    } else {
                        core.stats.dcache_misses += 1;
                    }
                    if speculative {
                        core.stats.loads_speculative += 1;
                    }
                    finish_load(core, tag, addr, value, now + access.latency, None, speculative);
                }
                Err(fault) => {
                    // The fault rides the entry to retire; dependents keep
                    // executing on the policy value so transient chains
                    // behind a faulting access stay alive (Meltdown model).
                    // No cache line is installed for the faulting address.
                    let value = match core.fault_policy {
                        FaultingLoadValue::Zero => 0,
                        FaultingLoadValue::Sentinel => core.sentinel,
                        FaultingLoadValue::Forward => core.mem.load_unchecked(addr, width, ext),
                    };
                    let latency = core.cache.hit_latency();
                    if let Some(entry) = core.rob.get_mut(tag) {
                        entry.fault = Some(fault);
                    }
                    finish_load(core, tag, addr, value, now + latency, None, speculative);
                }
            }
        }
    }
}

/// Records a load's obtained value in the LSQ and schedules its writeback.
fn finish_load(
    core: &mut Core,
    tag: RobTag,
    addr: u32,
    value: u32,
    completes_at: u64,
    forwarded_from: Option<RobTag>,
    speculative: bool,
) {
    if let Some(lsq_entry) = core.lsq.get_mut(tag) {
        lsq_entry.addr = Some(addr);
        lsq_entry.value = Some(value);
        lsq_entry.performed = true;
        lsq_entry.forwarded_from = forwarded_from;
        lsq_entry.speculative = speculative;
    }
    if let Some(entry) = core.rob.get_mut(tag) {
        entry.result = value;
        entry.completes_at = Some(completes_at);
    }
}

/// Advances a store: its address and value resolve independently, in either
/// order. Resolving the address runs the alias check against younger
/// speculative loads.
fn exec_store(core: &mut Core, tag: RobTag, violation: &mut Option<(RobTag, u32, u32)>) {
    let Some(entry) = core.rob.get(tag) else {
        return;
    };
    let Op::Store { offset, width, .. } = entry.op else {
        return;
    };
    let pc = entry.pc;
    let addr_ready = entry.rs1_tag.is_none();
    let value_ready = entry.rs2_tag.is_none();
    let (rv1, rv2) = (entry.rv1, entry.rv2);

    let addr_was_unresolved = core.lsq.get(tag).is_some_and(|e| e.addr.is_none());
    if addr_ready && addr_was_unresolved {
        let addr = rv1.wrapping_add(offset as u32);
        if let Err(fault) = core.mem.check(addr, width.bytes(), crate::mem::Access::Store)
            && let Some(entry) = core.rob.get_mut(tag)
        {
            entry.fault = Some(fault);
        }
        if let Some(lsq_entry) = core.lsq.get_mut(tag) {
            lsq_entry.addr = Some(addr);
        }
        // A younger load that already read memory for this address saw
        // stale data: memory-ordering misspeculation.
        if let Some(v) = core.lsq.check_store_aliasing(tag, addr, width) {
            let load_pc = core.rob.get(v.load).map_or(0, |e| e.pc);
            if violation.is_none_or(|(prev, _, _)| v.load < prev) {
                *violation = Some((v.load, load_pc, pc));
            }
        }
    }

    if value_ready && core.lsq.get(tag).is_some_and(|e| e.value.is_none()) {
        if let Some(lsq_entry) = core.lsq.get_mut(tag) {
            lsq_entry.value = Some(rv2);
        }
    }

    if addr_ready
        && value_ready
        && let Some(entry) = core.rob.get_mut(tag)
        && !entry.executed
    {
        entry.executed = true;
    }
}
