// cli.rs
//
// Black-box tests of the two binaries via `assert_cmd`, exercising the
// external interfaces described in spec §6.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn assembler_writes_little_endian_words_to_default_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("prog.s");
    std::fs::File::create(&input).unwrap().write_all(b"addi r1, r0, 5\nhalt\n").unwrap();
    let output = dir.path().join("a.out");

    Command::cargo_bin("tomasulo-asm")
        .unwrap()
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    let bytes = std::fs::read(&output).unwrap();
    assert_eq!(bytes.len(), 8);
    let first_word = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    assert_eq!(first_word, tomasulo_rs::machine::encode(&tomasulo_rs::machine::Instruction::Addi { rd: 1, rs1: 0, imm: 5 }));
}

#[test]
fn assembler_reports_unknown_mnemonic_on_stderr_with_nonzero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bad.s");
    std::fs::File::create(&input).unwrap().write_all(b"L: frobnicate r1, r2\n").unwrap();

    Command::cargo_bin("tomasulo-asm")
        .unwrap()
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("frobnicate"));
}

#[test]
fn simulator_run_reports_final_register_state() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("prog.s");
    std::fs::File::create(&input)
        .unwrap()
        .write_all(b"addi r1, r0, 5\naddi r2, r1, 7\nhalt\n")
        .unwrap();

    Command::cargo_bin("tomasulo-sim")
        .unwrap()
        .arg("run")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("r1").and(predicate::str::contains("r2")));
}
