// simulator_benchmarks.rs
//
// Throughput benchmark: assemble a synthetic program once, then measure
// cycles/sec stepping the machine to completion.

use criterion::{criterion_group, criterion_main, Criterion};

use tomasulo_rs::assembler::Assembler;
use tomasulo_rs::machine::config::{MachineConfig, BASE_PC};
use tomasulo_rs::machine::Machine;

fn synthetic_source(n: usize) -> String {
    let mut src = String::new();
    for i in 0..n {
        let reg = (i % 30) + 1;
        src.push_str(&format!("addi r{}, r0, {}\n", reg, i % 1000));
    }
    src.push_str("halt\n");
    src
}

fn run_to_completion(words: &[u32]) {
    let mut machine = Machine::new(MachineConfig::new());
    machine.set_memory_size(BASE_PC as usize + words.len());
    for (i, word) in words.iter().enumerate() {
        machine.load_instruction(BASE_PC + i as u32, *word).unwrap();
    }
    loop {
        if machine.step().unwrap() {
            break;
        }
    }
}

fn bench_addi_stream(c: &mut Criterion) {
    let words = Assembler::assemble(&synthetic_source(500)).unwrap();
    c.bench_function("addi_stream_500", |b| b.iter(|| run_to_completion(&words)));
}

criterion_group!(benches, bench_addi_stream);
criterion_main!(benches);
