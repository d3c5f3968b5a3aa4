//! Codec benchmarks
//!
//! Run with: `cargo bench -p hbc-bytecode`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hbc_bytecode::{FunctionSpec, Module, Opcode, Operand, RawInstruction, instructions, write_module};
use std::hint::black_box;

const SAMPLE: &[u8] = include_bytes!("../tests/fixtures/sample.hbc");

/// A module with `n` small functions and one string per function
fn synthetic_module(n: usize) -> Vec<u8> {
    let mut b = Module::builder();
    for i in 0..n {
        let name = b.add_string(&format!("fn{i}"));
        b.add_function(
            FunctionSpec::new(name).frame_size(2).instructions(vec![
                RawInstruction::new(Opcode::LoadConstInt, [Operand::Int(0), Operand::from(i as i32)]),
                RawInstruction::new(Opcode::LoadConstUInt8, [Operand::Int(1), Operand::Int(3)]),
                RawInstruction::new(Opcode::Add, [Operand::Int(0), Operand::Int(0), Operand::Int(1)]),
                RawInstruction::new(Opcode::Ret, [Operand::Int(0)]),
            ]),
        )
        .unwrap();
    }
    write_module(&b.build()).unwrap()
}

fn parse_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.bench_function("sample", |b| b.iter(|| Module::parse(black_box(SAMPLE)).unwrap()));

    for n in [100usize, 1000, 10_000] {
        let bytes = bytes::Bytes::from(synthetic_module(n));
        group.bench_with_input(BenchmarkId::new("functions", n), &bytes, |b, bytes| {
            b.iter(|| Module::parse(black_box(bytes.clone())).unwrap())
        });
    }
    group.finish();
}

fn write_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");
    for n in [100usize, 1000, 10_000] {
        let module = Module::parse(synthetic_module(n)).unwrap();
        group.bench_with_input(BenchmarkId::new("functions", n), &module, |b, module| {
            b.iter(|| write_module(black_box(module)).unwrap())
        });
    }
    group.finish();
}

fn decode_benchmark(c: &mut Criterion) {
    let module = Module::parse(synthetic_module(1000)).unwrap();
    c.bench_function("decode_instructions", |b| {
        b.iter(|| {
            let mut count = 0;
            for blob in &module.bytecode {
                for insn in instructions(&blob.opcodes) {
                    count += black_box(insn.unwrap()).width();
                }
            }
            count
        })
    });
}

criterion_group!(benches, parse_benchmark, write_benchmark, decode_benchmark);
criterion_main!(benches);
