//! Stage Cost Benchmarks

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use sase_synth::traffic::{udp_frame, udp_packet};
use sase_synth::{
    ByteSpec, Element, MemoryWorkload, Packet, PacketBatch, PayloadMutator, Stage,
    TimestampProbe, WorkloadSpec, BATCH_SIZE,
};
use std::time::Duration;

fn bench_payload_mutator(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_mutator");

    for delay_ns in [0u64, 1_000] {
        let spec = ByteSpec::new(42, b"OpenSASE".to_vec(), Some(vec![0xFF, 0x0F]), false)
            .unwrap();
        let mut stage = PayloadMutator::new(spec, Duration::from_nanos(delay_ns));

        group.bench_function(format!("delay_{}ns", delay_ns), |b| {
            b.iter_batched(
                || udp_packet(64, 0),
                |pkt| black_box(stage.process(pkt)),
                BatchSize::SmallInput,
            )
        });
    }

    // Shared frames force a copy before the write
    let frame = udp_frame(1500, 0).freeze();
    let mut stage = PayloadMutator::new(ByteSpec::replace(42, vec![1, 2, 3, 4]), Duration::ZERO);
    group.bench_function("shared_1500", |b| {
        b.iter(|| black_box(stage.process(Packet::shared(frame.clone()))))
    });

    group.finish();
}

fn bench_timestamp_probe(c: &mut Criterion) {
    let mut stage = TimestampProbe::new(0, 500);

    c.bench_function("timestamp_probe_500ns", |b| {
        b.iter_batched(
            || udp_packet(64, 0),
            |pkt| black_box(stage.process(pkt)),
            BatchSize::SmallInput,
        )
    });
}

fn bench_memory_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_workload");

    for (mb, percent) in [(1usize, 0u32), (64, 0), (1, 100)] {
        let spec = WorkloadSpec {
            array_bytes: mb * 1024 * 1024,
            accesses: 64,
            packet_read_percent: percent,
            use_payload: true,
            work_multiplier: 1,
        };
        let stage = MemoryWorkload::new(spec, Some(42)).unwrap();
        let pkt = udp_packet(1500, 0);

        group.bench_function(format!("{}mb_r{}", mb, percent), |b| {
            b.iter(|| black_box(stage.simulate(black_box(pkt.data()), 0x9E37_79B9)))
        });
    }

    group.finish();
}

fn bench_batch_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_throughput");
    group.throughput(Throughput::Elements(BATCH_SIZE as u64));

    let mut element = Element::new(Box::new(PayloadMutator::new(
        ByteSpec::replace(42, vec![0xAB; 8]),
        Duration::ZERO,
    )));

    group.bench_function(format!("{}_packets", BATCH_SIZE), |b| {
        b.iter_batched(
            || (0..BATCH_SIZE as u64).map(|i| udp_packet(64, i)).collect::<PacketBatch>(),
            |batch| black_box(element.push_batch(batch)),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_payload_mutator,
    bench_timestamp_probe,
    bench_memory_workload,
    bench_batch_throughput,
);

criterion_main!(benches);
