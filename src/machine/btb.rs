// btb.rs
//
// Direct-mapped branch target buffer with a 2-bit saturating counter per
// slot (spec §3, §4.6). Indexed by `branch_pc mod btb_size`; unlike the
// HashMap-backed predictor in the teacher repo, this is a fixed-size array
// so lookups are O(1) without hashing and eviction is implicit.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prediction {
    StronglyTaken,
    WeaklyTaken,
    WeaklyNotTaken,
    StronglyNotTaken,
}

impl Prediction {
    pub fn is_taken(&self) -> bool {
        matches!(self, Prediction::StronglyTaken | Prediction::WeaklyTaken)
    }

    /// Standard 2-bit saturating counter update.
    fn update(self, taken: bool) -> Self {
        use Prediction::*;
        match (self, taken) {
            (StronglyNotTaken, false) => StronglyNotTaken,
            (StronglyNotTaken, true) => WeaklyNotTaken,
            (WeaklyNotTaken, false) => StronglyNotTaken,
            (WeaklyNotTaken, true) => WeaklyTaken,
            (WeaklyTaken, false) => WeaklyNotTaken,
            (WeaklyTaken, true) => StronglyTaken,
            (StronglyTaken, false) => WeaklyTaken,
            (StronglyTaken, true) => StronglyTaken,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BtbEntry {
    pub valid: bool,
    pub branch_pc: u32,
    pub target_pc: u32,
    pub pred: Prediction,
}

impl BtbEntry {
    fn empty() -> Self {
        Self { valid: false, branch_pc: 0, target_pc: 0, pred: Prediction::WeaklyNotTaken }
    }
}

pub struct BranchTargetBuffer {
    slots: Vec<BtbEntry>,
}

impl BranchTargetBuffer {
    pub fn new(size: usize) -> Self {
        assert!(size.is_power_of_two(), "BTB size must be a power of two");
        Self { slots: vec![BtbEntry::empty(); size] }
    }

    fn index(&self, branch_pc: u32) -> usize {
        (branch_pc as usize) & (self.slots.len() - 1)
    }

    /// A hit requires the slot to be valid *and* tagged for this exact pc
    /// (direct-mapped aliasing otherwise looks like a miss).
    pub fn lookup(&self, branch_pc: u32) -> Option<&BtbEntry> {
        let entry = &self.slots[self.index(branch_pc)];
        if entry.valid && entry.branch_pc == branch_pc {
            Some(entry)
        } else {
            None
        }
    }

    /// Allocate a fresh entry on miss (spec: BTB replacement happens
    /// eagerly at issue, per the Open Questions resolution in §9). Evicts
    /// whatever occupied the slot.
    pub fn allocate_on_miss(&mut self, branch_pc: u32) {
        let idx = self.index(branch_pc);
        self.slots[idx] =
            BtbEntry { valid: true, branch_pc, target_pc: 0, pred: Prediction::WeaklyNotTaken };
    }

    /// Update the counter and target at branch commit (spec §4.5-4.6).
    pub fn update_on_commit(&mut self, branch_pc: u32, taken: bool, target_pc: u32) {
        let idx = self.index(branch_pc);
        let entry = &mut self.slots[idx];
        if !(entry.valid && entry.branch_pc == branch_pc) {
            *entry = BtbEntry { valid: true, branch_pc, target_pc, pred: Prediction::WeaklyNotTaken };
        }
        let entry = &mut self.slots[idx];
        entry.pred = entry.pred.update(taken);
        if taken {
            entry.target_pc = target_pc;
        }
    }

    pub fn snapshot(&self) -> Vec<BtbEntry> {
        self.slots.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_allocates_weakly_not_taken() {
        let mut btb = BranchTargetBuffer::new(8);
        assert!(btb.lookup(5).is_none());
        btb.allocate_on_miss(5);
        let entry = btb.lookup(5).unwrap();
        assert_eq!(entry.pred, Prediction::WeaklyNotTaken);
    }

    #[test]
    fn saturates_toward_strongly_taken() {
        let mut btb = BranchTargetBuffer::new(8);
        btb.allocate_on_miss(5);
        btb.update_on_commit(5, true, 100);
        btb.update_on_commit(5, true, 100);
        let entry = btb.lookup(5).unwrap();
        assert_eq!(entry.pred, Prediction::StronglyTaken);
        assert_eq!(entry.target_pc, 100);
    }

    #[test]
    fn aliasing_slot_is_evicted() {
        let mut btb = BranchTargetBuffer::new(8);
        btb.allocate_on_miss(5); // slot 5
        btb.allocate_on_miss(13); // same slot, 13 mod 8 == 5
        assert!(btb.lookup(5).is_none());
        assert!(btb.lookup(13).is_some());
    }
}
