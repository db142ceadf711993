//! Retire phase: in-order architectural commit.
//!
//! Only the ROB head may retire, and only once executed; up to
//! `retire_width` entries leave per cycle. Retire is where everything
//! architectural happens: register and memory writes, predictor training,
//! branch resolution against the recorded prediction, syscalls, faults,
//! fences, and cache maintenance ops. A misprediction or syscall ends the
//! cycle's retirement after triggering the rollback.

use tracing::{debug, error, trace};

use crate::common::{EmuError, Fault};
use crate::isa::Op;
use crate::sim::syscall::{EmuIo, numbers};
use crate::trace::{FlushReason, FlushRecord, SyscallRecord};

use super::engine::{Core, PauseReason, RunState};
use super::rename::RenameTable;
use super::rob::{RobEntry, RobTag};

/// Retires up to `retire_width` μops from the ROB head.
pub(crate) fn retire_phase(core: &mut Core, io: &mut EmuIo) -> Result<(), EmuError> {
    for _ in 0..core.retire_width {
        let Some(head) = core.rob.head() else {
            break;
        };
        if !head.executed {
            core.stats.retire_stalls += 1;
            break;
        }
        let pc = head.pc;

        // Breakpoints pause just before the instruction commits; the
        // remembered PC lets `resume` step over it exactly once.
        if core.breakpoints.contains(&pc) && core.breakpoint_resume != Some(pc) {
            core.state = RunState::Paused(PauseReason::Breakpoint(pc));
            return Ok(());
        }
        core.breakpoint_resume = None;

        if let Some(fault) = head.fault {
            raise_fault(core, pc, fault);
            return Ok(());
        }

        let Some(entry) = core.rob.pop_head() else {
            break;
        };
        let keep_retiring = retire_one(core, entry, io)?;
        if !keep_retiring || core.state != RunState::Running {
            break;
        }
    }
    Ok(())
}

/// A fault reached the head: flush everything and halt.
fn raise_fault(core: &mut Core, pc: u32, fault: Fault) {
    error!(
        cycle = core.cycles,
        pc,
        %fault,
        "fault at retire"
    );
    // Younger faults die with the flush; only the head fault is raised.
    let suppressed = core
        .rob
        .iter()
        .skip(1)
        .filter(|e| e.fault.is_some())
        .count() as u64;
    core.stats.faults_suppressed += suppressed;
    core.stats.flush_fault += 1;

    let discarded = core.rob.flush_all();
    core.lsq.flush_from(RobTag(0));
    core.rename = RenameTable::new();
    core.fence_inflight = 0;
    core.fetch_fault_stall = false;
    core.arch_pc = pc;
    core.last_flush = Some(FlushRecord {
        cycle: core.cycles,
        reason: FlushReason::Fault {
            pc,
            fault: fault.to_string(),
        },
        discarded,
    });
    core.state = RunState::Faulted(fault);
}

/// Retires one μop. Returns false when retirement must stop for this cycle
/// (rollback, pause, syscall).
fn retire_one(core: &mut Core, entry: RobEntry, io: &mut EmuIo) -> Result<bool, EmuError> {
    let tag = entry.tag;
    let pc = entry.pc;
    let next_pc = match entry.op {
        Op::Branch { .. } | Op::Jal { .. } | Op::Jalr { .. } => entry.target,
        _ => pc.wrapping_add(4),
    };

    if let Some(rd) = entry.op.dest() {
        core.write_reg(rd.index(), entry.result);
        core.rename.clear_if(rd, tag);
    }
    core.stats.instructions_retired += 1;
    core.arch_pc = next_pc;
    trace!(
        cycle = core.cycles,
        pc,
        %tag,
        op = %entry.op,
        "retire"
    );

    match entry.op {
        Op::Alu { .. } | Op::Lui { .. } | Op::Auipc { .. } => {
            core.stats.inst_alu += 1;
            Ok(true)
        }
        Op::RdCycle { .. } => {
            core.stats.inst_system += 1;
            Ok(true)
        }

        Op::Load { .. } => {
            core.stats.inst_load += 1;
            let popped = core.lsq.pop_head_if(tag);
            debug_assert!(popped.is_some(), "retiring load not at LSQ head");
            Ok(true)
        }

        Op::Store { .. } => {
            core.stats.inst_store += 1;
            let popped = core.lsq.pop_head_if(tag);
            debug_assert!(popped.is_some(), "retiring store not at LSQ head");
            if let Some(slot) = popped
                && let (Some(addr), Some(value)) = (slot.addr, slot.value)
            {
                // Commit: write through to memory and fill the cache. This
                // is the only place stores touch either.
                if let Err(fault) = core.mem.store(addr, slot.width, value) {
                    raise_fault(core, pc, fault);
                    return Ok(false);
                }
                let access = core.cache.access(addr);
                if access.hit {
                    core.stats.dcache_hits += 1;
                } else {
                    core.stats.dcache_misses += 1;
                }
            }
            Ok(true)
        }

        Op::Branch { .. } => {
            core.stats.inst_branch += 1;
            core.stats.branch_lookups += 1;
            core.bp.update(pc, entry.taken);
            Ok(resolve_prediction(core, &entry))
        }

        Op::Jal { .. } => {
            core.stats.inst_jump += 1;
            Ok(true)
        }

        Op::Jalr { .. } => {
            core.stats.inst_jump += 1;
            core.stats.branch_lookups += 1;
            core.btb.update(pc, entry.target);
            Ok(resolve_prediction(core, &entry))
        }

        Op::FenceI => {
            core.stats.inst_system += 1;
            core.fence_inflight = core.fence_inflight.saturating_sub(1);
            Ok(true)
        }

        Op::CboFlush { .. } => {
            core.stats.inst_system += 1;
            core.cache.flush_line(entry.target);
            Ok(true)
        }

        Op::FlushAll => {
            core.stats.inst_system += 1;
            core.cache.flush_all();
            Ok(true)
        }

        Op::Ebreak => {
            core.stats.inst_system += 1;
            debug!(
                cycle = core.cycles,
                pc,
                "ebreak: pausing"
            );
            core.state = RunState::Paused(PauseReason::Ebreak);
            Ok(false)
        }

        Op::Ecall => {
            core.stats.inst_system += 1;
            syscall(core, &entry, io)?;
            Ok(false)
        }
    }
}

/// Compares the retired control transfer against its recorded prediction.
/// Correct predictions release their predicate; wrong ones roll back.
fn resolve_prediction(core: &mut Core, entry: &RobEntry) -> bool {
    let predicted = entry.prediction.map(|p| p.target);
    if predicted == Some(entry.target) {
        core.rob.resolve_predicate(entry.tag);
        return true;
    }
    core.stats.branch_mispredictions += 1;
    core.stats.flush_mispredict += 1;
    core.flush_from(
        RobTag(entry.tag.0 + 1),
        entry.checkpoint.as_deref(),
        entry.target,
        FlushReason::Mispredict {
            pc: entry.pc,
            target: entry.target,
        },
    );
    false
}

/// Performs a syscall at the retire boundary. The speculative tail is
/// discarded first; arguments are read from architectural registers.
fn syscall(core: &mut Core, entry: &RobEntry, io: &mut EmuIo) -> Result<(), EmuError> {
    let pc = entry.pc;
    core.stats.flush_syscall += 1;
    core.flush_from(
        RobTag(entry.tag.0 + 1),
        None,
        pc.wrapping_add(4),
        FlushReason::Syscall { pc },
    );

    let number = core.read_reg(17) as i32;
    let (name, result) = match number {
        numbers::EXIT => {
            let code = core.read_reg(10) as i32;
            debug!(cycle = core.cycles, code, "guest exit");
            core.last_syscall = Some(SyscallRecord {
                cycle: core.cycles,
                name: "exit",
                result: code as u32,
            });
            core.state = RunState::Exited(code);
            return Ok(());
        }
        numbers::WRITE => {
            let buf = core.read_reg(10);
            let size = core.read_reg(11);
            match core.mem.read_bytes(buf, size) {
                Ok(bytes) => {
                    io.syscall_write(&bytes)?;
                    ("write", size)
                }
                Err(fault) => {
                    raise_fault(core, pc, fault);
                    return Ok(());
                }
            }
        }
        numbers::READ => {
            let buf = core.read_reg(10);
            let size = core.read_reg(11);
            let data = io.syscall_read(size as usize)?;
            match core.mem.write_bytes(buf, &data) {
                Ok(()) => ("read", data.len() as u32),
                Err(fault) => {
                    raise_fault(core, pc, fault);
                    return Ok(());
                }
            }
        }
        other => {
            raise_fault(core, pc, Fault::BadSyscall(other));
            return Ok(());
        }
    };

    core.write_reg(10, result);
    debug!(cycle = core.cycles, name, result, "syscall");
    core.last_syscall = Some(SyscallRecord {
        cycle: core.cycles,
        name,
        result,
    });
    Ok(())
}
