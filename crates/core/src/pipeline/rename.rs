//! Rename table and branch checkpoints.
//!
//! The rename table maps each architectural register to the tag of its most
//! recent in-flight producer. A missing mapping means the committed value in
//! the register file is current. `x0` never maps.
//!
//! A checkpoint is a cheap copy of the table plus the RAS and the LSQ
//! length, taken whenever fetch makes a prediction. A stale mapping (a tag
//! whose entry has already retired) can reappear after a restore; readers
//! fall back to the architectural value in that case, which is exactly the
//! retired producer's result.

use crate::common::Reg;
use crate::units::bpred::Ras;

use super::rob::RobTag;

/// Architectural-register → in-flight-producer map.
#[derive(Clone)]
pub struct RenameTable {
    map: [Option<RobTag>; 32],
}

impl RenameTable {
    /// Creates an empty table (all registers committed).
    pub fn new() -> Self {
        Self { map: [None; 32] }
    }

    /// Returns the in-flight producer of `reg`, if any. `x0` never has one.
    #[inline]
    pub fn get(&self, reg: Reg) -> Option<RobTag> {
        if reg.is_zero() {
            None
        } else {
            self.map[reg.index()]
        }
    }

    /// Installs `tag` as the producer of `reg`. Writes to `x0` are dropped.
    #[inline]
    pub fn set(&mut self, reg: Reg, tag: RobTag) {
        if !reg.is_zero() {
            self.map[reg.index()] = Some(tag);
        }
    }

    /// Clears the mapping for `reg` if it still points at `tag`. Called at
    /// retire so younger producers are not disturbed.
    #[inline]
    pub fn clear_if(&mut self, reg: Reg, tag: RobTag) {
        if self.map[reg.index()] == Some(tag) {
            self.map[reg.index()] = None;
        }
    }

    /// Copies the table for a checkpoint.
    pub fn snapshot(&self) -> [Option<RobTag>; 32] {
        self.map
    }

    /// Restores the table from a checkpoint copy.
    pub fn restore(&mut self, snapshot: [Option<RobTag>; 32]) {
        self.map = snapshot;
    }

    /// Rebuilds the table from the surviving in-flight producers, youngest
    /// mapping winning. Used by rollbacks that have no checkpoint (ordering
    /// violations, syscall flushes).
    pub fn rebuild<'a>(&mut self, survivors: impl Iterator<Item = (Reg, RobTag)> + 'a) {
        self.map = [None; 32];
        for (reg, tag) in survivors {
            self.set(reg, tag);
        }
    }
}

impl Default for RenameTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot taken at each prediction, used to restore front-end state on a
/// misprediction. The RAS copy is taken *after* the predicted instruction's
/// own push/pop so a restore undoes only wrong-path updates.
#[derive(Clone)]
pub struct Checkpoint {
    /// Rename table contents.
    pub rename: [Option<RobTag>; 32],
    /// Return-address stack contents.
    pub ras: Ras,
    /// LSQ occupancy at the prediction point.
    pub lsq_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x0_never_maps() {
        let mut t = RenameTable::new();
        t.set(Reg::ZERO, RobTag(1));
        assert_eq!(t.get(Reg::ZERO), None);
    }

    #[test]
    fn test_latest_producer_wins() {
        let mut t = RenameTable::new();
        t.set(Reg(5), RobTag(1));
        t.set(Reg(5), RobTag(2));
        assert_eq!(t.get(Reg(5)), Some(RobTag(2)));
    }

    #[test]
    fn test_clear_if_respects_younger() {
        let mut t = RenameTable::new();
        t.set(Reg(5), RobTag(1));
        t.set(Reg(5), RobTag(2));
        // Retiring the older producer must not clear the younger mapping.
        t.clear_if(Reg(5), RobTag(1));
        assert_eq!(t.get(Reg(5)), Some(RobTag(2)));
        t.clear_if(Reg(5), RobTag(2));
        assert_eq!(t.get(Reg(5)), None);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut t = RenameTable::new();
        t.set(Reg(5), RobTag(1));
        let snap = t.snapshot();
        t.set(Reg(5), RobTag(2));
        t.set(Reg(6), RobTag(3));
        t.restore(snap);
        assert_eq!(t.get(Reg(5)), Some(RobTag(1)));
        assert_eq!(t.get(Reg(6)), None);
    }

    #[test]
    fn test_rebuild() {
        let mut t = RenameTable::new();
        t.set(Reg(5), RobTag(9));
        t.rebuild([(Reg(6), RobTag(1)), (Reg(6), RobTag(2))].into_iter());
        assert_eq!(t.get(Reg(5)), None);
        assert_eq!(t.get(Reg(6)), Some(RobTag(2)));
    }
}
