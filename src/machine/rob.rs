// rob.rs
//
// The reorder buffer: a fixed-size ring buffer enforcing in-order commit
// atop out-of-order execution (spec §3, §4.5, §9 "ROB as a ring buffer").
// Head commits, tail issues; "oldest" comparisons are taken modulo the ROB
// size relative to the head so wraparound doesn't need special-casing at
// call sites.

use crate::machine::encoding::Instruction;
use crate::machine::reservation_station::UnitTag;

/// Index into the ROB's backing slice. Distinct from a raw `usize` so it
/// can't be confused with a register number or a cycle count at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RobIdx(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobStatus {
    Issuing,
    Executing,
    WritingResult,
    Committing,
}

#[derive(Debug, Clone, Copy)]
pub struct RobEntry {
    pub busy: bool,
    /// False while the entry is still speculative and unproven; the
    /// invariant holds for every occupied slot created by `issue`.
    pub valid: bool,
    pub pc: u32,
    pub instr: Instruction,
    pub raw_word: u32,
    pub status: RobStatus,
    pub exec_unit: UnitTag,
    pub dest_reg: Option<u32>,
    /// Register-write value, or the mispredict-recovery target for a branch.
    pub result: Option<u32>,
    /// Memory effective address, store data, or (for branches) whether the
    /// branch was actually taken.
    pub address: Option<u32>,
    /// Set at issue time for a branch: was it predicted taken?
    pub predicted_taken: bool,
    pub predicted_target: u32,
}

impl RobEntry {
    fn empty() -> Self {
        Self {
            busy: false,
            valid: true,
            pc: 0,
            instr: Instruction::Noop,
            raw_word: 0,
            status: RobStatus::Issuing,
            exec_unit: UnitTag::Ready,
            dest_reg: None,
            result: None,
            address: None,
            predicted_taken: false,
            predicted_target: 0,
        }
    }
}

pub struct ReorderBuffer {
    entries: Vec<RobEntry>,
    head: usize,
    tail: usize,
    count: usize,
}

impl ReorderBuffer {
    pub fn new(size: usize) -> Self {
        Self { entries: vec![RobEntry::empty(); size], head: 0, tail: 0, count: 0 }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.entries.len()
    }

    pub fn head_idx(&self) -> RobIdx {
        RobIdx(self.head)
    }

    pub fn get(&self, idx: RobIdx) -> &RobEntry {
        &self.entries[idx.0]
    }

    pub fn get_mut(&mut self, idx: RobIdx) -> &mut RobEntry {
        &mut self.entries[idx.0]
    }

    /// Allocate a slot at the tail. Caller must check `is_full()` first.
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        &mut self,
        pc: u32,
        instr: Instruction,
        raw_word: u32,
        exec_unit: UnitTag,
        dest_reg: Option<u32>,
        predicted_taken: bool,
        predicted_target: u32,
    ) -> RobIdx {
        let idx = self.tail;
        self.entries[idx] = RobEntry {
            busy: true,
            valid: false,
            pc,
            instr,
            raw_word,
            status: RobStatus::Issuing,
            exec_unit,
            dest_reg,
            result: None,
            address: None,
            predicted_taken,
            predicted_target,
        };
        self.tail = (self.tail + 1) % self.entries.len();
        self.count += 1;
        RobIdx(idx)
    }

    /// Pop the head entry, making its slot free again. Caller must already
    /// have applied commit side effects.
    pub fn retire_head(&mut self) {
        self.entries[self.head] = RobEntry::empty();
        self.head = (self.head + 1) % self.entries.len();
        self.count -= 1;
    }

    /// True if `a` is at least as old as `b` (i.e. `a` is the same as or
    /// precedes `b` walking forward from the head). Used for CDB arbitration
    /// among simultaneously-completed stations (spec §4.4).
    pub fn is_older_or_same(&self, a: RobIdx, b: RobIdx) -> bool {
        let n = self.entries.len();
        let dist = |idx: usize| (idx + n - self.head) % n;
        dist(a.0) <= dist(b.0)
    }

    /// Invalidate every entry strictly newer than `branch_idx` (i.e. issued
    /// after it), freeing their slots and moving the tail back. Used by
    /// misprediction squash (spec §4.5).
    pub fn squash_after(&mut self, branch_idx: RobIdx) -> Vec<RobIdx> {
        let n = self.entries.len();
        let dist = |idx: usize| (idx + n - self.head) % n;
        let branch_dist = dist(branch_idx.0);
        let original_count = self.count;

        let mut squashed = Vec::new();
        let mut idx = branch_idx.0;
        while dist(idx) + 1 < original_count {
            idx = (idx + 1) % n;
            squashed.push(RobIdx(idx));
            self.entries[idx] = RobEntry::empty();
        }

        self.tail = (branch_idx.0 + 1) % n;
        self.count = branch_dist + 1;
        squashed
    }

    pub fn iter_busy(&self) -> impl Iterator<Item = (RobIdx, &RobEntry)> {
        self.entries.iter().enumerate().filter(|(_, e)| e.busy).map(|(i, e)| (RobIdx(i), e))
    }

    pub fn snapshot(&self) -> Vec<RobEntry> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::encoding::Instruction;

    fn issue_noop(rob: &mut ReorderBuffer) -> RobIdx {
        rob.issue(0, Instruction::Noop, 0, UnitTag::Ready, None, false, 0)
    }

    #[test]
    fn wraps_around_when_head_advances() {
        let mut rob = ReorderBuffer::new(3);
        let a = issue_noop(&mut rob);
        let _b = issue_noop(&mut rob);
        let _c = issue_noop(&mut rob);
        assert!(rob.is_full());
        rob.retire_head(); // frees a's slot (index 0)
        assert_eq!(a, RobIdx(0));
        let d = issue_noop(&mut rob); // wraps to slot 0, reusing it
        assert_eq!(d, RobIdx(0));
        assert!(rob.is_full());
    }

    #[test]
    fn oldest_ordering_respects_wraparound() {
        let mut rob = ReorderBuffer::new(3);
        issue_noop(&mut rob);
        issue_noop(&mut rob);
        rob.retire_head();
        rob.retire_head();
        let c = issue_noop(&mut rob); // slot 2
        let d = issue_noop(&mut rob); // slot 0, wrapped, but younger than c
        assert!(rob.is_older_or_same(c, d));
        assert!(!rob.is_older_or_same(d, c));
    }

    #[test]
    fn squash_after_clears_only_younger_entries() {
        let mut rob = ReorderBuffer::new(4);
        let branch = issue_noop(&mut rob);
        let younger1 = issue_noop(&mut rob);
        let younger2 = issue_noop(&mut rob);
        let squashed = rob.squash_after(branch);
        assert_eq!(squashed, vec![younger1, younger2]);
        assert!(rob.get(branch).busy);
        assert!(!rob.get(younger1).busy);
        assert_eq!(rob.tail, (branch.0 + 1) % 4);
    }
}
