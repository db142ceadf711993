//! Reorder buffer (ROB).
//!
//! The ROB tracks every in-flight μop from dispatch to retire:
//! 1. **Allocation:** entries join at the tail in program order and receive
//!    a tag from a monotonic sequence (never reused, so a stale reference
//!    can never collide with a younger entry).
//! 2. **Broadcast:** when an entry's result becomes ready it is pushed to
//!    every waiting consumer's operand slot.
//! 3. **In-order retire:** only the head may leave, and only once executed
//!    or faulted.
//! 4. **Flush:** everything at or after a rollback point is discarded in
//!    one cut; older entries are untouched.

use std::collections::VecDeque;
use std::fmt;

use crate::common::{Fault, Reg};
use crate::isa::Op;

use super::rename::Checkpoint;

/// Tag of an in-flight μop. Monotonically increasing; numeric order is age
/// order (smaller = older).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct RobTag(pub u64);

impl fmt::Display for RobTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Direction/target recorded for a predicted μop at fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Prediction {
    /// Predicted taken (always true for indirect jumps).
    pub taken: bool,
    /// Predicted next PC.
    pub target: u32,
}

/// A single in-flight μop.
#[derive(Clone)]
pub struct RobEntry {
    /// Unique tag.
    pub tag: RobTag,
    /// Program counter.
    pub pc: u32,
    /// Decoded operation.
    pub op: Op,
    /// Pending producer of the first source, if not yet ready.
    pub rs1_tag: Option<RobTag>,
    /// Pending producer of the second source, if not yet ready.
    pub rs2_tag: Option<RobTag>,
    /// First source value (valid once `rs1_tag` is `None`).
    pub rv1: u32,
    /// Second source value (valid once `rs2_tag` is `None`).
    pub rv2: u32,
    /// Result value (link address, ALU output, load data).
    pub result: u32,
    /// Execution finished; result and outcome are final.
    pub executed: bool,
    /// Cycle at which an in-flight memory access completes.
    pub completes_at: Option<u64>,
    /// Fault to raise when this entry retires.
    pub fault: Option<Fault>,
    /// Prediction made at fetch, for branches and indirect jumps.
    pub prediction: Option<Prediction>,
    /// Rollback checkpoint, present iff `prediction` is.
    pub checkpoint: Option<Box<Checkpoint>>,
    /// Tags of the unresolved predicted μops this entry is control-dependent
    /// on; non-empty means the entry is transient.
    pub predicates: Vec<RobTag>,
    /// Actual branch direction, set at execute.
    pub taken: bool,
    /// Actual next PC (branches/jumps) or computed flush address
    /// (`cbo.flush`), set at execute.
    pub target: u32,
}

impl RobEntry {
    fn new(tag: RobTag, pc: u32, op: Op) -> Self {
        Self {
            tag,
            pc,
            op,
            rs1_tag: None,
            rs2_tag: None,
            rv1: 0,
            rv2: 0,
            result: 0,
            executed: false,
            completes_at: None,
            fault: None,
            prediction: None,
            checkpoint: None,
            predicates: Vec::new(),
            taken: false,
            target: 0,
        }
    }

    /// True while any predicate is unresolved (entry younger than an
    /// in-flight prediction).
    pub fn speculative(&self) -> bool {
        !self.predicates.is_empty()
    }

    /// True once the entry has started executing (result pending or final).
    pub fn issued(&self) -> bool {
        self.executed || self.completes_at.is_some()
    }
}

/// Reorder buffer: program-ordered queue of in-flight μops.
pub struct Rob {
    entries: VecDeque<RobEntry>,
    capacity: usize,
    next_tag: u64,
}

impl Rob {
    /// Creates a ROB with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_tag: 1,
        }
    }

    /// Returns the capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of in-flight entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are in flight.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the ROB is full.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// Allocates an entry at the tail. Returns `None` when full.
    pub fn allocate(&mut self, pc: u32, op: Op) -> Option<RobTag> {
        if self.is_full() {
            return None;
        }
        let tag = RobTag(self.next_tag);
        self.next_tag += 1;
        self.entries.push_back(RobEntry::new(tag, pc, op));
        Some(tag)
    }

    /// Finds the entry with `tag`. Linear scan; the window is small.
    pub fn get(&self, tag: RobTag) -> Option<&RobEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    /// Finds the entry with `tag`, mutably.
    pub fn get_mut(&mut self, tag: RobTag) -> Option<&mut RobEntry> {
        self.entries.iter_mut().find(|e| e.tag == tag)
    }

    /// The oldest entry.
    pub fn head(&self) -> Option<&RobEntry> {
        self.entries.front()
    }

    /// Removes and returns the oldest entry. The caller is responsible for
    /// only retiring executed or faulted entries.
    pub fn pop_head(&mut self) -> Option<RobEntry> {
        self.entries.pop_front()
    }

    /// Discards every entry with `tag >= first_removed`. Returns the number
    /// removed. Entries older than the cut are untouched.
    pub fn flush_from(&mut self, first_removed: RobTag) -> usize {
        let keep = self
            .entries
            .iter()
            .take_while(|e| e.tag < first_removed)
            .count();
        let removed = self.entries.len() - keep;
        self.entries.truncate(keep);
        removed
    }

    /// Discards every entry.
    pub fn flush_all(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Broadcasts a completed result to every consumer waiting on `tag`,
    /// and drops `tag` from predicate lists when a predicted μop resolves.
    pub fn broadcast(&mut self, tag: RobTag, value: u32) {
        for entry in &mut self.entries {
            if entry.rs1_tag == Some(tag) {
                entry.rs1_tag = None;
                entry.rv1 = value;
            }
            if entry.rs2_tag == Some(tag) {
                entry.rs2_tag = None;
                entry.rv2 = value;
            }
        }
    }

    /// Removes `tag` from every predicate list. Called when the predicted
    /// μop retires with a correct prediction.
    pub fn resolve_predicate(&mut self, tag: RobTag) {
        for entry in &mut self.entries {
            entry.predicates.retain(|&t| t != tag);
        }
    }

    /// Iterates oldest to youngest.
    pub fn iter(&self) -> impl Iterator<Item = &RobEntry> {
        self.entries.iter()
    }

    /// Iterates oldest to youngest, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RobEntry> {
        self.entries.iter_mut()
    }

    /// In-flight destination mappings oldest to youngest, for rename-table
    /// rebuild after a checkpoint-less rollback.
    pub fn producers(&self) -> impl Iterator<Item = (Reg, RobTag)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.op.dest().map(|rd| (rd, e.tag)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Reg;
    use crate::isa::{AluOp, Src2};

    fn nop() -> Op {
        Op::Alu {
            op: AluOp::Add,
            rd: Reg::ZERO,
            rs1: Reg::ZERO,
            src2: Src2::Imm(0),
        }
    }

    fn alu_rd(rd: u8) -> Op {
        Op::Alu {
            op: AluOp::Add,
            rd: Reg(rd),
            rs1: Reg::ZERO,
            src2: Src2::Imm(0),
        }
    }

    #[test]
    fn test_allocate_until_full() {
        let mut rob = Rob::new(2);
        assert!(rob.allocate(0x1000, nop()).is_some());
        assert!(rob.allocate(0x1004, nop()).is_some());
        assert!(rob.is_full());
        assert!(rob.allocate(0x1008, nop()).is_none());
    }

    #[test]
    fn test_tags_are_monotonic_across_flushes() {
        let mut rob = Rob::new(4);
        let t1 = rob.allocate(0x1000, nop()).unwrap();
        let t2 = rob.allocate(0x1004, nop()).unwrap();
        rob.flush_from(t2);
        let t3 = rob.allocate(0x1008, nop()).unwrap();
        assert!(t3 > t2);
        assert!(t1 < t3);
    }

    #[test]
    fn test_flush_from_keeps_older() {
        let mut rob = Rob::new(8);
        let t1 = rob.allocate(0x1000, nop()).unwrap();
        let t2 = rob.allocate(0x1004, nop()).unwrap();
        let _t3 = rob.allocate(0x1008, nop()).unwrap();
        assert_eq!(rob.flush_from(t2), 2);
        assert_eq!(rob.len(), 1);
        assert!(rob.get(t1).is_some());
        assert!(rob.get(t2).is_none());
    }

    #[test]
    fn test_broadcast_fills_consumers() {
        let mut rob = Rob::new(4);
        let producer = rob.allocate(0x1000, alu_rd(5)).unwrap();
        let consumer = rob.allocate(0x1004, nop()).unwrap();
        rob.get_mut(consumer).unwrap().rs1_tag = Some(producer);

        rob.broadcast(producer, 42);
        let c = rob.get(consumer).unwrap();
        assert_eq!(c.rs1_tag, None);
        assert_eq!(c.rv1, 42);
    }

    #[test]
    fn test_resolve_predicate() {
        let mut rob = Rob::new(4);
        let branch = rob.allocate(0x1000, nop()).unwrap();
        let dep = rob.allocate(0x1004, nop()).unwrap();
        rob.get_mut(dep).unwrap().predicates.push(branch);
        assert!(rob.get(dep).unwrap().speculative());

        rob.resolve_predicate(branch);
        assert!(!rob.get(dep).unwrap().speculative());
    }

    #[test]
    fn test_producers_in_age_order() {
        let mut rob = Rob::new(4);
        let t1 = rob.allocate(0x1000, alu_rd(5)).unwrap();
        let t2 = rob.allocate(0x1004, alu_rd(5)).unwrap();
        let pairs: Vec<_> = rob.producers().collect();
        assert_eq!(pairs, vec![(Reg(5), t1), (Reg(5), t2)]);
    }
}
