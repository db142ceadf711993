//! Branch Target Buffer (BTB).
//!
//! Predicts indirect-jump targets at fetch, before the jump's base register
//! resolves. The table is direct-mapped over an XOR-folded slot index and
//! stores 15-bit partial tags instead of full addresses: two jumps may
//! alias, which costs at most one misprediction when they do, and keeps the
//! structure a predictor rather than a small associative memory. Direct
//! branches and jumps never consult it; their targets are encoded in the
//! decoded instruction.

/// Tag value of a never-written slot. Live tags always carry bit 15.
const EMPTY: u16 = 0;

/// Direct-mapped, partially-tagged branch target buffer.
pub struct Btb {
    tags: Vec<u16>,
    targets: Vec<u32>,
    index_bits: u32,
}

impl Btb {
    /// Creates a BTB with `size` slots, rounded up to a power of two
    /// (minimum 2).
    pub fn new(size: usize) -> Self {
        let index_bits = size.max(2).next_power_of_two().trailing_zeros();
        let slots = 1usize << index_bits;
        Self {
            tags: vec![EMPTY; slots],
            targets: vec![0; slots],
            index_bits,
        }
    }

    /// Slot for `pc`: the word address XOR-folded onto itself so that both
    /// nearby and far-apart jump sites spread across the table.
    fn slot(&self, pc: u32) -> usize {
        let word = pc >> 2;
        let folded = word ^ (word >> self.index_bits);
        (folded & ((1u32 << self.index_bits) - 1)) as usize
    }

    /// 15-bit partial tag built from the word-address bits above the index,
    /// with bit 15 forced so no live tag equals the empty marker.
    fn partial_tag(&self, pc: u32) -> u16 {
        let upper = (pc >> 2) >> self.index_bits;
        ((upper ^ (upper >> 15)) as u16 & 0x7FFF) | 0x8000
    }

    /// Looks up the predicted target for the jump at `pc`. A partial-tag
    /// match may rarely be a false hit for an aliasing jump; the resulting
    /// misprediction is corrected at retire like any other.
    pub fn lookup(&self, pc: u32) -> Option<u32> {
        let slot = self.slot(pc);
        (self.tags[slot] == self.partial_tag(pc)).then(|| self.targets[slot])
    }

    /// Records the resolved target of the jump at `pc`, claiming the slot
    /// from any aliasing previous occupant. Called at retire.
    pub fn update(&mut self, pc: u32, target: u32) {
        let slot = self.slot(pc);
        self.tags[slot] = self.partial_tag(pc);
        self.targets[slot] = target;
    }

    /// Occupied slots as `(slot, target)` pairs, for the UI. Partial tags
    /// cannot reproduce the original jump address.
    pub fn entries(&self) -> Vec<(usize, u32)> {
        self.tags
            .iter()
            .zip(&self.targets)
            .enumerate()
            .filter(|&(_, (&tag, _))| tag != EMPTY)
            .map(|(slot, (_, &target))| (slot, target))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_after_update() {
        let mut btb = Btb::new(64);
        assert_eq!(btb.lookup(0x0040_0000), None);
        btb.update(0x0040_0000, 0x0040_1000);
        assert_eq!(btb.lookup(0x0040_0000), Some(0x0040_1000));
        assert_eq!(btb.entries().len(), 1);
    }

    #[test]
    fn test_aliasing_jump_claims_the_slot() {
        let mut btb = Btb::new(4);
        let first = 0x0040_0000;
        btb.update(first, 0x0040_1000);

        // Find a second jump site sharing the slot but not the partial tag.
        let second = (1u32..4096)
            .map(|i| first + 4 * i)
            .find(|&pc| {
                btb.slot(pc) == btb.slot(first) && btb.partial_tag(pc) != btb.partial_tag(first)
            })
            .unwrap();
        btb.update(second, 0x0040_2000);

        // The newer occupant owns the slot; the older one no longer hits.
        assert_eq!(btb.lookup(second), Some(0x0040_2000));
        assert_eq!(btb.lookup(first), None);
    }

    #[test]
    fn test_disjoint_slots_coexist() {
        let mut btb = Btb::new(64);
        let a = 0x0040_0000;
        let b = (1u32..4096)
            .map(|i| a + 4 * i)
            .find(|&pc| btb.slot(pc) != btb.slot(a))
            .unwrap();
        btb.update(a, 0x1000);
        btb.update(b, 0x2000);
        assert_eq!(btb.lookup(a), Some(0x1000));
        assert_eq!(btb.lookup(b), Some(0x2000));
        assert_eq!(btb.entries().len(), 2);
    }
}
