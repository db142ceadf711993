//! Load-store queue (LSQ).
//!
//! One age-ordered queue holds every in-flight memory μop. Stores resolve
//! their address and value in either order and touch memory only at retire.
//! Loads resolve an address and then plan their access against all older
//! stores:
//! - a fully covering older store with a ready value **forwards**;
//! - an overlapping older store with an unknown value (or partial overlap)
//!   makes the load **wait**;
//! - an older store with an unknown address lets the load **speculate**:
//!   it reads memory anyway and the dependency is checked when the store's
//!   address resolves. A conflict then costs an ordering flush.
//!
//! That speculative read is the Spectre/Meltdown substrate: it can execute
//! under an unresolved branch and its cache fill outlives any flush.

use crate::isa::{Ext, MemWidth};

use super::rob::RobTag;

/// Kind of LSQ entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LsqKind {
    /// Memory load.
    Load,
    /// Memory store.
    Store,
}

/// A single in-flight memory operation.
#[derive(Clone)]
pub struct LsqEntry {
    /// ROB tag; numeric order is program order.
    pub tag: RobTag,
    /// Load or store.
    pub kind: LsqKind,
    /// Access width.
    pub width: MemWidth,
    /// Resolved address, once the base register is ready.
    pub addr: Option<u32>,
    /// Store data, or the load's obtained value.
    pub value: Option<u32>,
    /// The load has obtained its value (from memory or forwarding).
    pub performed: bool,
    /// The load read memory while an older store address was unknown.
    pub speculative: bool,
    /// Store this load's value was forwarded from, if any.
    pub forwarded_from: Option<RobTag>,
}

/// Plan for a load whose address just resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadPlan {
    /// An older store fully covers the load; use this value.
    Forward {
        /// Extracted, extension-applied value.
        value: u32,
        /// The forwarding store.
        from: RobTag,
    },
    /// An overlapping older store cannot forward yet (value unknown or
    /// partial overlap); retry next cycle.
    Wait,
    /// An older store address is unknown; the load may read memory
    /// speculatively.
    Speculate,
    /// No older store interferes; read memory normally.
    Normal,
}

/// An ordering violation found when a store address resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderingViolation {
    /// Oldest load that observed stale data.
    pub load: RobTag,
}

/// Age-ordered load-store queue.
pub struct Lsq {
    entries: std::collections::VecDeque<LsqEntry>,
    capacity: usize,
}

impl Lsq {
    /// Creates an LSQ with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: std::collections::VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns the number of in-flight memory μops.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true when no slot is free.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// Allocates a slot at the tail. Returns false when full.
    pub fn allocate(&mut self, tag: RobTag, kind: LsqKind, width: MemWidth) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push_back(LsqEntry {
            tag,
            kind,
            width,
            addr: None,
            value: None,
            performed: false,
            speculative: false,
            forwarded_from: None,
        });
        true
    }

    /// Finds the entry with `tag`, mutably.
    pub fn get_mut(&mut self, tag: RobTag) -> Option<&mut LsqEntry> {
        self.entries.iter_mut().find(|e| e.tag == tag)
    }

    /// Finds the entry with `tag`.
    pub fn get(&self, tag: RobTag) -> Option<&LsqEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    /// Plans the access for the load `tag` at `addr`, scanning older
    /// entries youngest-first so the nearest store decides.
    pub fn plan_load(&self, tag: RobTag, addr: u32, width: MemWidth, ext: Ext) -> LoadPlan {
        let load_start = addr;
        let load_end = addr.wrapping_add(width.bytes());

        for entry in self.entries.iter().rev() {
            if entry.tag >= tag || entry.kind != LsqKind::Store {
                continue;
            }
            let Some(store_addr) = entry.addr else {
                // May or may not alias; the load proceeds at its own risk.
                return LoadPlan::Speculate;
            };
            let store_start = store_addr;
            let store_end = store_addr.wrapping_add(entry.width.bytes());
            if load_start >= store_end || load_end <= store_start {
                continue;
            }
            if store_start <= load_start && store_end >= load_end {
                return match entry.value {
                    Some(value) => LoadPlan::Forward {
                        value: extract(value, load_start - store_start, width, ext),
                        from: entry.tag,
                    },
                    None => LoadPlan::Wait,
                };
            }
            // Partial overlap: wait for the store to drain to memory.
            return LoadPlan::Wait;
        }

        LoadPlan::Normal
    }

    /// Checks younger performed loads against the just-resolved address of
    /// store `tag`. A load that overlaps and did not take its value from
    /// this store (or a younger one) observed stale data.
    pub fn check_store_aliasing(
        &self,
        tag: RobTag,
        addr: u32,
        width: MemWidth,
    ) -> Option<OrderingViolation> {
        let store_start = addr;
        let store_end = addr.wrapping_add(width.bytes());

        self.entries
            .iter()
            .filter(|e| {
                e.tag > tag && e.kind == LsqKind::Load && e.performed
            })
            .filter(|e| {
                let Some(load_addr) = e.addr else {
                    return false;
                };
                let load_end = load_addr.wrapping_add(e.width.bytes());
                let overlap = load_addr < store_end && load_end > store_start;
                overlap && e.forwarded_from.is_none_or(|from| from < tag)
            })
            .map(|e| OrderingViolation { load: e.tag })
            .min_by_key(|v| v.load)
    }

    /// Pops the head entry if it carries `tag`. Retire uses this; program
    /// order guarantees the retiring μop is at the head.
    pub fn pop_head_if(&mut self, tag: RobTag) -> Option<LsqEntry> {
        if self.entries.front().is_some_and(|e| e.tag == tag) {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Discards every entry with `tag >= first_removed`.
    pub fn flush_from(&mut self, first_removed: RobTag) {
        let keep = self
            .entries
            .iter()
            .take_while(|e| e.tag < first_removed)
            .count();
        self.entries.truncate(keep);
    }

    /// Truncates to a checkpointed occupancy.
    pub fn truncate_to(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Iterates oldest to youngest.
    pub fn iter(&self) -> impl Iterator<Item = &LsqEntry> {
        self.entries.iter()
    }
}

/// Extracts a load's bytes from a covering store value and applies the
/// load's extension.
fn extract(store_value: u32, byte_offset: u32, width: MemWidth, ext: Ext) -> u32 {
    let shifted = store_value >> (8 * byte_offset);
    match (width, ext) {
        (MemWidth::Byte, Ext::Sign) => shifted as u8 as i8 as i32 as u32,
        (MemWidth::Byte, Ext::Zero) => shifted & 0xFF,
        (MemWidth::Half, Ext::Sign) => shifted as u16 as i16 as i32 as u32,
        (MemWidth::Half, Ext::Zero) => shifted & 0xFFFF,
        (MemWidth::Word, _) => shifted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(lsq: &mut Lsq, tag: u64, addr: Option<u32>, value: Option<u32>, width: MemWidth) {
        assert!(lsq.allocate(RobTag(tag), LsqKind::Store, width));
        let e = lsq.get_mut(RobTag(tag)).unwrap();
        e.addr = addr;
        e.value = value;
    }

    fn load(lsq: &mut Lsq, tag: u64, width: MemWidth) {
        assert!(lsq.allocate(RobTag(tag), LsqKind::Load, width));
    }

    #[test]
    fn test_forward_full_cover() {
        let mut lsq = Lsq::new(8);
        store(&mut lsq, 1, Some(0x1000), Some(0x1234_5678), MemWidth::Word);
        load(&mut lsq, 2, MemWidth::Word);

        let plan = lsq.plan_load(RobTag(2), 0x1000, MemWidth::Word, Ext::Zero);
        assert_eq!(
            plan,
            LoadPlan::Forward {
                value: 0x1234_5678,
                from: RobTag(1)
            }
        );
        // A sub-word load inside the store forwards the right byte.
        let plan = lsq.plan_load(RobTag(2), 0x1001, MemWidth::Byte, Ext::Zero);
        assert_eq!(
            plan,
            LoadPlan::Forward {
                value: 0x56,
                from: RobTag(1)
            }
        );
    }

    #[test]
    fn test_wait_on_unready_value() {
        let mut lsq = Lsq::new(8);
        store(&mut lsq, 1, Some(0x1000), None, MemWidth::Word);
        load(&mut lsq, 2, MemWidth::Word);
        assert_eq!(
            lsq.plan_load(RobTag(2), 0x1000, MemWidth::Word, Ext::Zero),
            LoadPlan::Wait
        );
    }

    #[test]
    fn test_wait_on_partial_overlap() {
        let mut lsq = Lsq::new(8);
        store(&mut lsq, 1, Some(0x1002), Some(0xBEEF), MemWidth::Half);
        load(&mut lsq, 2, MemWidth::Word);
        assert_eq!(
            lsq.plan_load(RobTag(2), 0x1000, MemWidth::Word, Ext::Zero),
            LoadPlan::Wait
        );
    }

    #[test]
    fn test_speculate_past_unknown_address() {
        let mut lsq = Lsq::new(8);
        store(&mut lsq, 1, None, Some(7), MemWidth::Word);
        load(&mut lsq, 2, MemWidth::Word);
        assert_eq!(
            lsq.plan_load(RobTag(2), 0x1000, MemWidth::Word, Ext::Zero),
            LoadPlan::Speculate
        );
    }

    #[test]
    fn test_nearest_store_wins() {
        let mut lsq = Lsq::new(8);
        store(&mut lsq, 1, None, None, MemWidth::Word);
        store(&mut lsq, 2, Some(0x1000), Some(0xAAAA_AAAA), MemWidth::Word);
        load(&mut lsq, 3, MemWidth::Word);
        // The covering store at tag 2 hides the unknown address at tag 1.
        assert_eq!(
            lsq.plan_load(RobTag(3), 0x1000, MemWidth::Word, Ext::Zero),
            LoadPlan::Forward {
                value: 0xAAAA_AAAA,
                from: RobTag(2)
            }
        );
        // A non-overlapping address still sees the unknown store.
        assert_eq!(
            lsq.plan_load(RobTag(3), 0x2000, MemWidth::Word, Ext::Zero),
            LoadPlan::Speculate
        );
    }

    #[test]
    fn test_no_interference() {
        let mut lsq = Lsq::new(8);
        store(&mut lsq, 1, Some(0x2000), Some(1), MemWidth::Word);
        load(&mut lsq, 2, MemWidth::Word);
        assert_eq!(
            lsq.plan_load(RobTag(2), 0x1000, MemWidth::Word, Ext::Zero),
            LoadPlan::Normal
        );
    }

    #[test]
    fn test_younger_stores_ignored() {
        let mut lsq = Lsq::new(8);
        load(&mut lsq, 1, MemWidth::Word);
        store(&mut lsq, 2, Some(0x1000), Some(1), MemWidth::Word);
        assert_eq!(
            lsq.plan_load(RobTag(1), 0x1000, MemWidth::Word, Ext::Zero),
            LoadPlan::Normal
        );
    }

    #[test]
    fn test_aliasing_detects_stale_load() {
        let mut lsq = Lsq::new(8);
        store(&mut lsq, 1, None, Some(7), MemWidth::Word);
        load(&mut lsq, 2, MemWidth::Word);
        {
            let e = lsq.get_mut(RobTag(2)).unwrap();
            e.addr = Some(0x1000);
            e.performed = true;
            e.speculative = true;
        }
        // The store's address now resolves to the same line the load read.
        let v = lsq.check_store_aliasing(RobTag(1), 0x1000, MemWidth::Word);
        assert_eq!(v, Some(OrderingViolation { load: RobTag(2) }));
        // A disjoint address is no violation.
        let v = lsq.check_store_aliasing(RobTag(1), 0x2000, MemWidth::Word);
        assert_eq!(v, None);
    }

    #[test]
    fn test_aliasing_spares_forwarded_load() {
        let mut lsq = Lsq::new(8);
        store(&mut lsq, 1, None, None, MemWidth::Word);
        store(&mut lsq, 2, Some(0x1000), Some(9), MemWidth::Word);
        load(&mut lsq, 3, MemWidth::Word);
        {
            let e = lsq.get_mut(RobTag(3)).unwrap();
            e.addr = Some(0x1000);
            e.performed = true;
            e.forwarded_from = Some(RobTag(2));
        }
        // Tag 1 resolving to the same address is fine: the load's value
        // came from the younger store at tag 2.
        assert_eq!(
            lsq.check_store_aliasing(RobTag(1), 0x1000, MemWidth::Word),
            None
        );
    }

    #[test]
    fn test_flush_from() {
        let mut lsq = Lsq::new(8);
        store(&mut lsq, 1, Some(0x1000), Some(1), MemWidth::Word);
        load(&mut lsq, 2, MemWidth::Word);
        load(&mut lsq, 3, MemWidth::Word);
        lsq.flush_from(RobTag(2));
        assert_eq!(lsq.len(), 1);
        assert!(lsq.get(RobTag(1)).is_some());
    }

    #[test]
    fn test_pop_head_in_order() {
        let mut lsq = Lsq::new(8);
        store(&mut lsq, 1, Some(0x1000), Some(1), MemWidth::Word);
        load(&mut lsq, 2, MemWidth::Word);
        assert!(lsq.pop_head_if(RobTag(2)).is_none());
        assert!(lsq.pop_head_if(RobTag(1)).is_some());
        assert!(lsq.pop_head_if(RobTag(2)).is_some());
        assert!(lsq.is_empty());
    }
}
