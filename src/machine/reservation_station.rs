// reservation_station.rs
//
// Per-execution-unit operand-waiting slots (spec §3, §4.2-4.3). Each station
// is identified by a `UnitTag`; `UnitTag::Ready` is the sentinel meaning "no
// pending producer" rather than a real unit.

use crate::machine::encoding::Instruction;
use crate::machine::rob::RobIdx;
use std::fmt;

/// Identifies a functional unit, and doubles as the producer id a waiting
/// station watches for on the CDB. `Ready` is never a producer; it marks an
/// operand slot that already holds its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitTag {
    Ready,
    Load(usize),
    Store(usize),
    Int(usize),
}

impl fmt::Display for UnitTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitTag::Ready => write!(f, "READY"),
            UnitTag::Load(i) => write!(f, "LOAD{}", i + 1),
            UnitTag::Store(i) => write!(f, "STORE{}", i + 1),
            UnitTag::Int(i) => write!(f, "INT{}", i + 1),
        }
    }
}

/// An operand that is either already available or still waiting on a
/// producer instruction, identified by its ROB slot.
///
/// The spec (§3) describes `Qj`/`Qk` as holding "producer unit tags", but
/// §4.4 has the CDB broadcast match stations by `rob_idx`. Unit tags get
/// reused the instant a station frees at write-result, so matching on them
/// would let a late-issuing dependent latch onto an unrelated later
/// instruction that happens to reuse the same physical unit. Using the ROB
/// index as the single producer identity (stable until that entry retires)
/// reconciles the two and is what this implementation does throughout;
/// `UnitTag` is kept purely as the station's own display identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub value: u32,
    pub producer: Option<RobIdx>,
}

impl Operand {
    pub fn ready(value: u32) -> Self {
        Self { value, producer: None }
    }

    pub fn waiting_on(producer: RobIdx) -> Self {
        Self { value: 0, producer: Some(producer) }
    }

    pub fn is_ready(&self) -> bool {
        self.producer.is_none()
    }

    /// If this operand is waiting on `winner`, latch `value` and mark it
    /// ready. No-op otherwise.
    pub fn forward(&mut self, winner: RobIdx, value: u32) {
        if self.producer == Some(winner) {
            self.value = value;
            self.producer = None;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReservationStation {
    pub tag: UnitTag,
    pub busy: bool,
    pub instr: Option<Instruction>,
    pub vj: Operand,
    pub vk: Operand,
    /// Immediate / effective-address field (spec §3).
    pub a: u32,
    pub rob_idx: RobIdx,
    pub exec_time_left: usize,
    /// Result computed once `exec_time_left` reaches zero; held until the
    /// station wins the CDB.
    pub result: Option<u32>,
    /// Effective address (loads/stores) held alongside the result.
    pub address: Option<u32>,
}

impl ReservationStation {
    pub fn new(tag: UnitTag) -> Self {
        Self {
            tag,
            busy: false,
            instr: None,
            vj: Operand::ready(0),
            vk: Operand::ready(0),
            a: 0,
            rob_idx: RobIdx(0),
            exec_time_left: 0,
            result: None,
            address: None,
        }
    }

    pub fn issue(
        &mut self,
        instr: Instruction,
        vj: Operand,
        vk: Operand,
        a: u32,
        rob_idx: RobIdx,
        exec_time_left: usize,
    ) {
        self.busy = true;
        self.instr = Some(instr);
        self.vj = vj;
        self.vk = vk;
        self.a = a;
        self.rob_idx = rob_idx;
        self.exec_time_left = exec_time_left;
        self.result = None;
        self.address = None;
    }

    pub fn release(&mut self) {
        self.busy = false;
        self.instr = None;
        self.vj = Operand::ready(0);
        self.vk = Operand::ready(0);
        self.a = 0;
        self.exec_time_left = 0;
        self.result = None;
        self.address = None;
    }

    /// A station is ready to execute once both operands have arrived and it
    /// has not already finished computing its result (spec §4.3).
    pub fn operands_ready(&self) -> bool {
        self.busy && self.vj.is_ready() && self.vk.is_ready()
    }

    pub fn has_completed(&self) -> bool {
        self.busy && self.result.is_some()
    }
}
