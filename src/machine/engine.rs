// machine.rs
//
// The cycle engine: orchestrates commit, write-result, execute and issue in
// that order every `step()` (spec §4.7). Everything else in `machine/` is
// passive state; this is the only place that mutates more than one piece of
// it per call.

use log::{debug, trace};

use crate::errors::{LoadError, MachineError};
use crate::machine::btb::BranchTargetBuffer;
use crate::machine::config::MachineConfig;
use crate::machine::encoding::{self, Instruction, OpClass};
use crate::machine::memory::Memory;
use crate::machine::registers::{RegisterFile, RenameEntry};
use crate::machine::reservation_station::{Operand, ReservationStation, UnitTag};
use crate::machine::rob::{ReorderBuffer, RobIdx, RobStatus};

pub struct Machine {
    pub pc: u32,
    pub cycles: u64,
    pub halted: bool,
    /// Set the cycle `halt` is issued; suppresses further issue even before
    /// it reaches the ROB head (spec §4.5 S5).
    halt_issued: bool,
    pub registers: RegisterFile,
    pub memory: Memory,
    pub rob: ReorderBuffer,
    pub int_units: Vec<ReservationStation>,
    pub load_units: Vec<ReservationStation>,
    pub store_units: Vec<ReservationStation>,
    pub btb: BranchTargetBuffer,
    pub config: MachineConfig,
}

/// Deep-copy, read-only view of the machine for a viewer (spec §6 `snapshot`).
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub pc: u32,
    pub cycles: u64,
    pub halted: bool,
    pub registers: [u32; 32],
    pub rename: [RenameEntry; 32],
    pub memory: Vec<u32>,
    pub rob: Vec<crate::machine::rob::RobEntry>,
    pub int_units: Vec<ReservationStation>,
    pub load_units: Vec<ReservationStation>,
    pub store_units: Vec<ReservationStation>,
    pub btb: Vec<crate::machine::btb::BtbEntry>,
}

impl Machine {
    /// `new_machine()` (spec §6): PC at `base_pc`, everything else zeroed.
    pub fn new(config: MachineConfig) -> Self {
        let int_units =
            (0..config.num_int_units).map(|i| ReservationStation::new(UnitTag::Int(i))).collect();
        let load_units =
            (0..config.num_load_units).map(|i| ReservationStation::new(UnitTag::Load(i))).collect();
        let store_units = (0..config.num_store_units)
            .map(|i| ReservationStation::new(UnitTag::Store(i)))
            .collect();
        Self {
            pc: config.base_pc,
            cycles: 0,
            halted: false,
            halt_issued: false,
            registers: RegisterFile::new(),
            memory: Memory::new(config.base_pc as usize),
            rob: ReorderBuffer::new(config.rob_size),
            int_units,
            load_units,
            store_units,
            btb: BranchTargetBuffer::new(config.btb_size),
            config,
        }
    }

    pub fn set_memory_size(&mut self, n: usize) {
        self.memory.resize(n);
    }

    pub fn load_instruction(&mut self, pc: u32, word: u32) -> Result<(), LoadError> {
        self.memory.load_word(pc, word)
    }

    /// Advance one simulated clock: commit, write-result, execute, issue, in
    /// that order (spec §4.7). Returns `Ok(true)` once `halt` has committed
    /// and the ROB has drained.
    pub fn step(&mut self) -> Result<bool, MachineError> {
        self.commit();
        self.write_result();
        self.execute();
        self.issue()?;
        self.cycles += 1;
        trace!("cycle {} complete: pc={:#x} halted={}", self.cycles, self.pc, self.halted);
        Ok(self.halted)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pc: self.pc,
            cycles: self.cycles,
            halted: self.halted,
            registers: self.registers.snapshot_values(),
            rename: self.registers.snapshot_rename(),
            memory: self.memory.snapshot(),
            rob: self.rob.snapshot(),
            int_units: self.int_units.clone(),
            load_units: self.load_units.clone(),
            store_units: self.store_units.clone(),
            btb: self.btb.snapshot(),
        }
    }

    // ---- commit (spec §4.5) -------------------------------------------

    fn commit(&mut self) {
        if self.rob.is_empty() {
            return;
        }
        let head_idx = self.rob.head_idx();
        let eligible = {
            let head = self.rob.get(head_idx);
            head.busy && head.status == RobStatus::WritingResult
        };
        if !eligible {
            return;
        }

        let (instr, dest_reg, result, address, pc, predicted_taken, predicted_target) = {
            let head = self.rob.get(head_idx);
            (head.instr, head.dest_reg, head.result, head.address, head.pc, head.predicted_taken, head.predicted_target)
        };

        match instr {
            Instruction::Add { .. }
            | Instruction::Sub { .. }
            | Instruction::And { .. }
            | Instruction::Addi { .. }
            | Instruction::Andi { .. }
            | Instruction::Lw { .. } => {
                let reg = dest_reg.expect("register-writing commit without dest_reg");
                let value = result.expect("register-writing commit without result");
                self.registers.write(reg, value);
                self.registers.clear_rename_if(reg, head_idx);
                debug!("commit: r{} <- {:#x} (rob {})", reg, value, head_idx.0);
            },
            Instruction::Sw { .. } => {
                let addr = address.expect("store commit without address");
                let data = result.expect("store commit without data");
                self.memory.write(addr, data);
                debug!("commit: mem[{}] <- {:#x}", addr, data);
            },
            Instruction::Beqz { .. } => {
                let actual_taken = address.unwrap_or(0) != 0;
                let actual_target = result.expect("branch commit without resolved target");
                self.btb.update_on_commit(pc, actual_taken, actual_target);
                if actual_taken != predicted_taken {
                    debug!(
                        "commit: branch misprediction at pc={:#x} predicted={} actual={}",
                        pc, predicted_taken, actual_taken
                    );
                    self.squash(head_idx, actual_target);
                } else {
                    let _ = predicted_target;
                }
            },
            Instruction::J { .. } => {},
            Instruction::Halt => {
                self.halted = true;
                debug!("commit: halt");
            },
            Instruction::Noop => {},
        }

        self.rob.retire_head();
    }

    /// Discard every ROB entry newer than the mispredicted branch, release
    /// their reservation stations, restore their rename entries, and
    /// redirect `pc` (spec §4.5, §9 "Shadow register state via ROB").
    fn squash(&mut self, branch_idx: RobIdx, correct_pc: u32) {
        let squashed = self.rob.squash_after(branch_idx);
        for idx in &squashed {
            let entry = self.rob.get(*idx);
            if let Some(reg) = entry.dest_reg {
                self.registers.force_valid(reg);
            }
        }
        for bank in [&mut self.int_units, &mut self.load_units, &mut self.store_units] {
            for station in bank.iter_mut() {
                if station.busy && squashed.contains(&station.rob_idx) {
                    station.release();
                }
            }
        }
        self.pc = correct_pc;
        debug!("squash: {} entries discarded, pc redirected to {:#x}", squashed.len(), correct_pc);
    }

    // ---- write-result / CDB (spec §4.4) --------------------------------

    fn write_result(&mut self) {
        let winner = self.pick_cdb_winner();
        let Some((bank, idx)) = winner else { return };

        let (rob_idx, value, address) = {
            let station = &self.station(bank, idx);
            (station.rob_idx, station.result.unwrap(), station.address)
        };

        {
            let entry = self.rob.get_mut(rob_idx);
            entry.status = RobStatus::WritingResult;
            entry.result = Some(value);
            if address.is_some() {
                entry.address = address;
            }
        }

        for b in [&mut self.int_units, &mut self.load_units, &mut self.store_units] {
            for station in b.iter_mut() {
                station.vj.forward(rob_idx, value);
                station.vk.forward(rob_idx, value);
            }
        }

        self.station_mut(bank, idx).release();
        trace!("write-result: rob {} <- {:#x}", rob_idx.0, value);
    }

    /// Among completed (non-store) stations, the one whose ROB entry is
    /// oldest wins (spec §4.4). Stores resolve directly in `execute` and
    /// never appear here.
    fn pick_cdb_winner(&self) -> Option<(Bank, usize)> {
        let mut winner: Option<(Bank, usize)> = None;
        for (bank, units) in [(Bank::Int, &self.int_units), (Bank::Load, &self.load_units)] {
            for (i, station) in units.iter().enumerate() {
                if !station.has_completed() {
                    continue;
                }
                winner = match winner {
                    None => Some((bank, i)),
                    Some((wb, wi)) => {
                        let current = self.station(wb, wi).rob_idx;
                        if self.rob.is_older_or_same(station.rob_idx, current) {
                            Some((bank, i))
                        } else {
                            Some((wb, wi))
                        }
                    },
                };
            }
        }
        winner
    }

    // ---- execute (spec §4.3) -------------------------------------------

    fn execute(&mut self) {
        for i in 0..self.int_units.len() {
            self.execute_int(i);
        }
        for i in 0..self.store_units.len() {
            self.execute_store(i);
        }
        for i in 0..self.load_units.len() {
            self.execute_load(i);
        }
    }

    fn execute_int(&mut self, i: usize) {
        let station = &mut self.int_units[i];
        if !station.operands_ready() || station.result.is_some() {
            return;
        }
        if station.exec_time_left > 0 {
            station.exec_time_left -= 1;
        }
        if station.exec_time_left > 0 {
            return;
        }
        let instr = station.instr.expect("ready station without an instruction");
        let (result, address) = match instr {
            Instruction::Add { .. } => (station.vj.value.wrapping_add(station.vk.value), None),
            Instruction::Sub { .. } => (station.vj.value.wrapping_sub(station.vk.value), None),
            Instruction::And { .. } => (station.vj.value & station.vk.value, None),
            Instruction::Addi { .. } => (station.vj.value.wrapping_add(station.a), None),
            Instruction::Andi { .. } => (station.vj.value & station.a, None),
            Instruction::Beqz { .. } => {
                let taken = station.vj.value == 0;
                let rob_idx = station.rob_idx;
                let branch_pc = self.rob.get(rob_idx).pc;
                let imm = station.a as i32;
                let target = if taken {
                    branch_pc.wrapping_add(1).wrapping_add(imm as u32)
                } else {
                    branch_pc.wrapping_add(1)
                };
                (target, Some(taken as u32))
            },
            _ => unreachable!("non-ALU instruction in an integer unit"),
        };
        station.result = Some(result);
        station.address = address;
        trace!("execute: {} completed, result={:#x}", station.tag, result);
    }

    fn effective_address(vj: u32, a: u32) -> u32 {
        vj.wrapping_add(a)
    }

    fn execute_store(&mut self, i: usize) {
        let (rob_idx, vj, vk, a, exec_time_left, operands_ready, has_result) = {
            let station = &self.store_units[i];
            (
                station.rob_idx,
                station.vj.value,
                station.vk.value,
                station.a,
                station.exec_time_left,
                station.operands_ready(),
                station.result.is_some(),
            )
        };
        if !operands_ready || has_result {
            return;
        }
        let exec_time_left = exec_time_left.saturating_sub(1);
        self.store_units[i].exec_time_left = exec_time_left;
        if exec_time_left > 0 {
            return;
        }
        let address = Self::effective_address(vj, a);
        {
            let entry = self.rob.get_mut(rob_idx);
            entry.status = RobStatus::WritingResult;
            entry.result = Some(vk);
            entry.address = Some(address);
        }
        self.store_units[i].release();
        trace!("execute: store resolved address={:#x} data={:#x}", address, vk);
    }

    fn execute_load(&mut self, i: usize) {
        let (rob_idx, vj, a, exec_time_left, operands_ready, has_result) = {
            let station = &self.load_units[i];
            (
                station.rob_idx,
                station.vj.value,
                station.a,
                station.exec_time_left,
                station.operands_ready(),
                station.result.is_some(),
            )
        };
        if !operands_ready || has_result {
            return;
        }
        let address = Self::effective_address(vj, a);
        if self.store_blocks_load(rob_idx, address) {
            trace!("execute: load at rob {} stalled behind an older store", rob_idx.0);
            return;
        }
        let exec_time_left = exec_time_left.saturating_sub(1);
        self.load_units[i].exec_time_left = exec_time_left;
        if exec_time_left > 0 {
            return;
        }
        let value = self.memory.read(address);
        self.load_units[i].result = Some(value);
        self.load_units[i].address = Some(address);
        trace!("execute: load resolved address={:#x} value={:#x}", address, value);
    }

    /// A load may not execute while an older, still in-flight store has an
    /// unresolved address, or a resolved address that matches (spec §4.3).
    fn store_blocks_load(&self, load_idx: RobIdx, load_addr: u32) -> bool {
        for (idx, entry) in self.rob.iter_busy() {
            if idx == load_idx || !self.rob.is_older_or_same(idx, load_idx) {
                continue;
            }
            if !matches!(entry.instr, Instruction::Sw { .. }) {
                continue;
            }
            match entry.address {
                None => return true,
                Some(store_addr) if store_addr == load_addr => return true,
                Some(_) => {},
            }
        }
        false
    }

    // ---- issue (spec §4.2) ----------------------------------------------

    fn issue(&mut self) -> Result<(), MachineError> {
        if self.halt_issued || self.rob.is_full() {
            return Ok(());
        }

        let pc = self.pc;
        let word = self.memory.read(pc);
        let instr = encoding::decode(word, pc)?;
        let op_class = instr.op_class();

        let station = match op_class {
            OpClass::Load => self.find_free(Bank::Load),
            OpClass::Store => self.find_free(Bank::Store),
            OpClass::IntOrBranch => self.find_free(Bank::Int),
            OpClass::ControlOnly => None,
        };
        if op_class != OpClass::ControlOnly && station.is_none() {
            trace!("issue: structural stall, no free station for {:?}", op_class);
            return Ok(());
        }

        let (vj, vk, a) = self.resolve_operands(&instr);
        let dest_reg = instr.dest_reg();

        let (predicted_taken, predicted_target, next_pc) = match instr {
            Instruction::J { imm } => (false, 0, pc.wrapping_add(1).wrapping_add(imm as u32)),
            Instruction::Beqz { .. } => match self.btb.lookup(pc) {
                Some(entry) if entry.pred.is_taken() => (true, entry.target_pc, entry.target_pc),
                Some(_) => (false, 0, pc.wrapping_add(1)),
                None => {
                    self.btb.allocate_on_miss(pc);
                    (false, 0, pc.wrapping_add(1))
                },
            },
            _ => (false, 0, pc.wrapping_add(1)),
        };

        let exec_unit = match station {
            Some((bank, i)) => self.station(bank, i).tag,
            None => UnitTag::Ready,
        };
        let rob_idx =
            self.rob.issue(pc, instr, word, exec_unit, dest_reg, predicted_taken, predicted_target);

        if let Some(reg) = dest_reg {
            self.registers.set_rename(reg, RenameEntry { valid: false, rob_idx });
        }

        match instr {
            Instruction::J { .. } => {
                self.rob.get_mut(rob_idx).status = RobStatus::WritingResult;
            },
            Instruction::Halt => {
                self.halt_issued = true;
                self.rob.get_mut(rob_idx).status = RobStatus::WritingResult;
            },
            Instruction::Noop => {
                self.rob.get_mut(rob_idx).status = RobStatus::WritingResult;
            },
            _ => {
                let (bank, i) = station.expect("non-control instruction must have a station");
                let latency = self.latency_for(op_class, &instr);
                self.station_mut(bank, i).issue(instr, vj, vk, a, rob_idx, latency);
            },
        }

        debug!("issue: pc={:#x} instr={:?} -> rob {}", pc, instr, rob_idx.0);
        self.pc = next_pc;
        Ok(())
    }

    fn latency_for(&self, class: OpClass, instr: &Instruction) -> usize {
        match (class, instr) {
            (OpClass::Load, _) | (OpClass::Store, _) => self.config.load_store_latency,
            (OpClass::IntOrBranch, Instruction::Beqz { .. }) => self.config.branch_latency,
            (OpClass::IntOrBranch, _) => self.config.alu_latency,
            (OpClass::ControlOnly, _) => 0,
        }
    }

    fn resolve_operands(&self, instr: &Instruction) -> (Operand, Operand, u32) {
        let src = |reg: u32, machine: &Self| -> Operand {
            if reg == 0 {
                return Operand::ready(0);
            }
            let rename = machine.registers.rename(reg);
            if rename.valid {
                return Operand::ready(machine.registers.read(reg));
            }
            // The producer may already have broadcast on the CDB this very
            // cycle (or an earlier one) without yet committing — the rename
            // entry only clears at commit, but the ROB entry's `result`
            // becomes available at write-result. Reading it directly here
            // avoids missing a broadcast that happened before this
            // instruction existed to catch it.
            match machine.rob.get(rename.rob_idx).result {
                Some(value) => Operand::ready(value),
                None => Operand::waiting_on(rename.rob_idx),
            }
        };
        match *instr {
            Instruction::Add { rs1, rs2, .. } | Instruction::Sub { rs1, rs2, .. } | Instruction::And { rs1, rs2, .. } => {
                (src(rs1, self), src(rs2, self), 0)
            },
            Instruction::Addi { rs1, imm, .. } => (src(rs1, self), Operand::ready(0), imm as u32),
            Instruction::Andi { rs1, imm, .. } => (src(rs1, self), Operand::ready(0), imm as u32),
            Instruction::Lw { rs1, imm, .. } => (src(rs1, self), Operand::ready(0), imm as u32),
            Instruction::Sw { rs1, rt, imm } => (src(rs1, self), src(rt, self), imm as u32),
            Instruction::Beqz { rs1, imm } => (src(rs1, self), Operand::ready(0), imm as u32),
            Instruction::J { .. } | Instruction::Halt | Instruction::Noop => {
                (Operand::ready(0), Operand::ready(0), 0)
            },
        }
    }

    fn find_free(&self, bank: Bank) -> Option<(Bank, usize)> {
        let units = match bank {
            Bank::Int => &self.int_units,
            Bank::Load => &self.load_units,
            Bank::Store => &self.store_units,
        };
        units.iter().position(|s| !s.busy).map(|i| (bank, i))
    }

    fn station(&self, bank: Bank, i: usize) -> &ReservationStation {
        match bank {
            Bank::Int => &self.int_units[i],
            Bank::Load => &self.load_units[i],
            Bank::Store => &self.store_units[i],
        }
    }

    fn station_mut(&mut self, bank: Bank, i: usize) -> &mut ReservationStation {
        match bank {
            Bank::Int => &mut self.int_units[i],
            Bank::Load => &mut self.load_units[i],
            Bank::Store => &mut self.store_units[i],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bank {
    Int,
    Load,
    Store,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::config::BASE_PC;

    fn load_program(machine: &mut Machine, words: &[u32]) {
        machine.set_memory_size(BASE_PC as usize + words.len());
        for (i, word) in words.iter().enumerate() {
            machine.load_instruction(BASE_PC + i as u32, *word).unwrap();
        }
    }

    fn run_to_halt(machine: &mut Machine) {
        for _ in 0..10_000 {
            if machine.step().unwrap() {
                return;
            }
        }
        panic!("machine did not halt within the cycle budget");
    }

    #[test]
    fn back_to_back_raw_forwarding() {
        let mut m = Machine::new(MachineConfig::new());
        let program = [
            encoding::encode(&Instruction::Addi { rd: 1, rs1: 0, imm: 5 }),
            encoding::encode(&Instruction::Addi { rd: 2, rs1: 1, imm: 7 }),
            encoding::encode(&Instruction::Halt),
        ];
        load_program(&mut m, &program);
        run_to_halt(&mut m);
        assert_eq!(m.registers.read(1), 5);
        assert_eq!(m.registers.read(2), 12);
    }

    #[test]
    fn load_waits_for_older_store_to_same_address() {
        let mut m = Machine::new(MachineConfig::new());
        let program = [
            encoding::encode(&Instruction::Addi { rd: 1, rs1: 0, imm: 3 }),
            encoding::encode(&Instruction::Sw { rt: 0, rs1: 1, imm: 0 }),
            encoding::encode(&Instruction::Addi { rd: 2, rs1: 0, imm: 42 }),
            encoding::encode(&Instruction::Sw { rt: 2, rs1: 1, imm: 0 }),
            encoding::encode(&Instruction::Lw { rd: 3, rs1: 1, imm: 0 }),
            encoding::encode(&Instruction::Halt),
        ];
        load_program(&mut m, &program);
        run_to_halt(&mut m);
        assert_eq!(m.registers.read(3), 42);
    }

    #[test]
    fn mispredicted_branch_squashes_speculative_writes() {
        let mut m = Machine::new(MachineConfig::new());
        let program = [
            encoding::encode(&Instruction::Addi { rd: 1, rs1: 0, imm: 0 }),
            encoding::encode(&Instruction::Beqz { rs1: 1, imm: 1 }),
            encoding::encode(&Instruction::Addi { rd: 2, rs1: 0, imm: 99 }),
            encoding::encode(&Instruction::Addi { rd: 3, rs1: 0, imm: 7 }),
            encoding::encode(&Instruction::Halt),
        ];
        load_program(&mut m, &program);
        run_to_halt(&mut m);
        assert_eq!(m.registers.read(2), 0);
        assert_eq!(m.registers.read(3), 7);
    }

    #[test]
    fn structural_stall_on_exhausted_int_units() {
        let mut m = Machine::new(MachineConfig::new().with_int_units(2));
        let mut program: Vec<u32> = (1..=7)
            .map(|i| encoding::encode(&Instruction::Addi { rd: i, rs1: 0, imm: i as i32 }))
            .collect();
        program.push(encoding::encode(&Instruction::Halt));
        load_program(&mut m, &program);
        run_to_halt(&mut m);
        for i in 1..=7 {
            assert_eq!(m.registers.read(i), i);
        }
    }
}
