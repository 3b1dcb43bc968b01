// assembler.rs
//
// Two-pass assembler: pass 1 walks the text collecting label -> instruction
// index mappings without resolving anything; pass 2 re-walks the same
// parsed lines and emits a 32-bit word per instruction, now that every
// label is known (spec §4.1).

use std::collections::HashMap;

use log::{info, warn};

use crate::errors::AssembleError;
use crate::machine::encoding::{encode, Instruction};

/// A line with its label (if any) already stripped off and its mnemonic
/// separated from its operands, but operands not yet interpreted.
struct ParsedLine {
    mnemonic: String,
    operands: Vec<String>,
    line_no: usize,
    /// Instruction index (0-based) this line will occupy, used to resolve
    /// PC-relative branch/jump immediates.
    index: usize,
}

const MNEMONICS: &[&str] =
    &["halt", "j", "noop", "beqz", "addi", "andi", "lw", "sw", "add", "sub", "and"];

fn is_mnemonic(token: &str) -> bool {
    MNEMONICS.contains(&token.to_ascii_lowercase().as_str())
}

pub struct Assembler {
    labels: HashMap<String, usize>,
    lines: Vec<ParsedLine>,
}

impl Assembler {
    /// Assemble source text into a flat sequence of instruction words.
    pub fn assemble(source: &str) -> Result<Vec<u32>, AssembleError> {
        let mut assembler = Assembler { labels: HashMap::new(), lines: Vec::new() };
        assembler.first_pass(source)?;
        assembler.second_pass()
    }

    /// Split on whitespace, treating commas as equivalent separators (the
    /// source may write `lw rd, rs, imm` or `lw rd rs imm` interchangeably),
    /// strip a trailing `;` comment, and detect a leading label.
    fn first_pass(&mut self, source: &str) -> Result<(), AssembleError> {
        let mut index = 0usize;
        for (line_no, raw_line) in source.lines().enumerate() {
            let line_no = line_no + 1;
            let without_comment = raw_line.split(';').next().unwrap_or("");
            let normalized = without_comment.replace(',', " ");
            let mut tokens = normalized.split_whitespace();

            let Some(first) = tokens.next() else { continue };

            let (mnemonic, rest): (&str, Vec<&str>) = if is_mnemonic(first) {
                (first, tokens.collect())
            } else {
                let label = first.trim_end_matches(':').to_string();
                let Some(mnemonic) = tokens.next() else {
                    return Err(AssembleError::BadOperandCount(label, line_no));
                };
                self.labels.insert(label, index);
                (mnemonic, tokens.collect())
            };

            if !is_mnemonic(mnemonic) {
                return Err(AssembleError::UnknownMnemonic(mnemonic.to_string(), line_no));
            }

            self.lines.push(ParsedLine {
                mnemonic: mnemonic.to_ascii_lowercase(),
                operands: rest.into_iter().map(str::to_string).collect(),
                line_no,
                index,
            });
            index += 1;
        }
        info!("assembler: pass 1 collected {} labels, {} instructions", self.labels.len(), index);
        Ok(())
    }

    fn second_pass(&self) -> Result<Vec<u32>, AssembleError> {
        let mut words = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let instr = self.assemble_line(line)?;
            words.push(encode(&instr));
        }
        Ok(words)
    }

    fn assemble_line(&self, line: &ParsedLine) -> Result<Instruction, AssembleError> {
        let ops = &line.operands;
        match line.mnemonic.as_str() {
            "halt" => expect_operands(ops, 0, &line.mnemonic, line.line_no).map(|_| Instruction::Halt),
            "noop" => expect_operands(ops, 0, &line.mnemonic, line.line_no).map(|_| Instruction::Noop),
            "j" => {
                expect_operands(ops, 1, &line.mnemonic, line.line_no)?;
                let imm = self.branch_offset(&ops[0], line, 26)?;
                Ok(Instruction::J { imm })
            },
            "beqz" => {
                expect_operands(ops, 2, &line.mnemonic, line.line_no)?;
                let rs1 = parse_register(&ops[0], line.line_no)?;
                let imm = self.branch_offset(&ops[1], line, 16)?;
                Ok(Instruction::Beqz { rs1, imm })
            },
            "addi" => {
                expect_operands(ops, 3, &line.mnemonic, line.line_no)?;
                let rd = parse_register(&ops[0], line.line_no)?;
                let rs1 = parse_register(&ops[1], line.line_no)?;
                let imm = parse_immediate(&ops[2], line.line_no, 16)?;
                Ok(Instruction::Addi { rd, rs1, imm })
            },
            "andi" => {
                expect_operands(ops, 3, &line.mnemonic, line.line_no)?;
                let rd = parse_register(&ops[0], line.line_no)?;
                let rs1 = parse_register(&ops[1], line.line_no)?;
                let imm = parse_immediate(&ops[2], line.line_no, 16)?;
                Ok(Instruction::Andi { rd, rs1, imm })
            },
            "lw" => {
                expect_operands(ops, 3, &line.mnemonic, line.line_no)?;
                let rd = parse_register(&ops[0], line.line_no)?;
                let rs1 = parse_register(&ops[1], line.line_no)?;
                let imm = parse_immediate(&ops[2], line.line_no, 16)?;
                Ok(Instruction::Lw { rd, rs1, imm })
            },
            "sw" => {
                expect_operands(ops, 3, &line.mnemonic, line.line_no)?;
                let rt = parse_register(&ops[0], line.line_no)?;
                let rs1 = parse_register(&ops[1], line.line_no)?;
                let imm = parse_immediate(&ops[2], line.line_no, 16)?;
                Ok(Instruction::Sw { rt, rs1, imm })
            },
            "add" => {
                expect_operands(ops, 3, &line.mnemonic, line.line_no)?;
                let rd = parse_register(&ops[0], line.line_no)?;
                let rs1 = parse_register(&ops[1], line.line_no)?;
                let rs2 = parse_register(&ops[2], line.line_no)?;
                Ok(Instruction::Add { rd, rs1, rs2 })
            },
            "sub" => {
                expect_operands(ops, 3, &line.mnemonic, line.line_no)?;
                let rd = parse_register(&ops[0], line.line_no)?;
                let rs1 = parse_register(&ops[1], line.line_no)?;
                let rs2 = parse_register(&ops[2], line.line_no)?;
                Ok(Instruction::Sub { rd, rs1, rs2 })
            },
            "and" => {
                expect_operands(ops, 3, &line.mnemonic, line.line_no)?;
                let rd = parse_register(&ops[0], line.line_no)?;
                let rs1 = parse_register(&ops[1], line.line_no)?;
                let rs2 = parse_register(&ops[2], line.line_no)?;
                Ok(Instruction::And { rd, rs1, rs2 })
            },
            other => Err(AssembleError::UnknownMnemonic(other.to_string(), line.line_no)),
        }
    }

    /// `imm = labels[label] - current_index - 1`, range-checked to `bits`
    /// signed bits — 26 for `j` (J-format) and 16 for `beqz` (I-format),
    /// per spec §4.1/§9.
    fn branch_offset(&self, label: &str, line: &ParsedLine, bits: u32) -> Result<i32, AssembleError> {
        let target = self
            .labels
            .get(label)
            .copied()
            .ok_or_else(|| AssembleError::UndefinedLabel(label.to_string(), line.line_no))?;
        let offset = target as i64 - line.index as i64 - 1;
        let half = 1i64 << (bits - 1);
        if !(-half..half).contains(&offset) {
            return Err(AssembleError::ImmediateOutOfRange(offset, line.line_no));
        }
        Ok(offset as i32)
    }
}

fn expect_operands(
    ops: &[String],
    expected: usize,
    mnemonic: &str,
    line_no: usize,
) -> Result<(), AssembleError> {
    if ops.len() != expected {
        warn!("assembler: {} expected {} operand(s), found {} at line {}", mnemonic, expected, ops.len(), line_no);
        return Err(AssembleError::BadOperandCount(mnemonic.to_string(), line_no));
    }
    Ok(())
}

fn parse_register(token: &str, line_no: usize) -> Result<u32, AssembleError> {
    let digits = token
        .strip_prefix(['r', 'R'])
        .ok_or_else(|| AssembleError::InvalidRegister(token.to_string(), line_no))?;
    let reg: u32 =
        digits.parse().map_err(|_| AssembleError::InvalidRegister(token.to_string(), line_no))?;
    if reg > 31 {
        return Err(AssembleError::InvalidRegister(token.to_string(), line_no));
    }
    Ok(reg)
}

fn parse_immediate(token: &str, line_no: usize, bits: u32) -> Result<i32, AssembleError> {
    let value: i64 = token
        .parse()
        .map_err(|_| AssembleError::BadOperandCount(format!("'{}' is not a number", token), line_no))?;
    let half = 1i64 << (bits - 1);
    if !(-half..half).contains(&value) {
        return Err(AssembleError::ImmediateOutOfRange(value, line_no));
    }
    Ok(value as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_back_to_back_raw_program() {
        let source = "addi r1, r0, 5\naddi r2, r1, 7\nhalt\n";
        let words = Assembler::assemble(source).unwrap();
        assert_eq!(words.len(), 3);
        assert_eq!(crate::machine::encoding::decode(words[0], 0).unwrap(), Instruction::Addi { rd: 1, rs1: 0, imm: 5 });
    }

    #[test]
    fn resolves_forward_and_backward_labels() {
        let source = "addi r1, r0, 0\nL: addi r1, r1, 1\nbeqz r0, L\nhalt\n";
        let words = Assembler::assemble(source).unwrap();
        let beqz = crate::machine::encoding::decode(words[2], 0).unwrap();
        assert_eq!(beqz, Instruction::Beqz { rs1: 0, imm: -2 });
    }

    #[test]
    fn unknown_mnemonic_reports_line_number() {
        let source = "addi r1, r0, 0\nL: bogus r1, r2\n";
        let err = Assembler::assemble(source).unwrap_err();
        match err {
            AssembleError::UnknownMnemonic(tok, line) => {
                assert_eq!(tok, "bogus");
                assert_eq!(line, 2);
            },
            other => panic!("expected UnknownMnemonic, got {:?}", other),
        }
    }

    #[test]
    fn undefined_label_is_reported() {
        let source = "beqz r0, nowhere\nhalt\n";
        let err = Assembler::assemble(source).unwrap_err();
        assert!(matches!(err, AssembleError::UndefinedLabel(label, _) if label == "nowhere"));
    }

    #[test]
    fn beqz_target_farther_than_16_bits_is_out_of_range() {
        let mut source = String::from("L: noop\n");
        for _ in 0..(1 << 15) {
            source.push_str("noop\n");
        }
        source.push_str("beqz r0, L\nhalt\n");
        let err = Assembler::assemble(&source).unwrap_err();
        assert!(matches!(err, AssembleError::ImmediateOutOfRange(_, _)));
    }

    #[test]
    fn register_number_above_31_is_reported_as_invalid_register() {
        let source = "addi r32, r0, 0\nhalt\n";
        let err = Assembler::assemble(source).unwrap_err();
        assert!(matches!(err, AssembleError::InvalidRegister(tok, _) if tok == "r32"));
    }

    #[test]
    fn sw_syntax_is_comma_separated_not_parenthesized() {
        let source = "sw r2, r1, 4\nhalt\n";
        let words = Assembler::assemble(source).unwrap();
        assert_eq!(
            crate::machine::encoding::decode(words[0], 0).unwrap(),
            Instruction::Sw { rt: 2, rs1: 1, imm: 4 }
        );
    }
}
