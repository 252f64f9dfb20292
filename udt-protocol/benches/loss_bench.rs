use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use udt_protocol::loss::{LossList, LossRange};
use udt_protocol::ledger::SentPacketLedger;
use udt_protocol::sequence::SeqNumber;

fn bench_loss_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("loss_list");

    group.bench_function("insert_scattered", |b| {
        b.iter(|| {
            let mut list = LossList::new();
            for i in 0..256u32 {
                let start = SeqNumber::new((i * 37) % 4096);
                list.insert_range(LossRange::new(start, start + 3));
            }
            black_box(list);
        });
    });

    group.bench_function("pop_smallest", |b| {
        b.iter(|| {
            let mut list = LossList::new();
            list.insert_range(LossRange::new(SeqNumber::new(0), SeqNumber::new(1023)));
            while let Some(seq) = list.pop_smallest() {
                black_box(seq);
            }
        });
    });

    group.finish();
}

fn bench_ledger(c: &mut Criterion) {
    let wire = Bytes::from(vec![0u8; 1332]);

    c.bench_function("ledger_record_ack", |b| {
        b.iter(|| {
            let mut ledger = SentPacketLedger::new();
            let mut seq = SeqNumber::new(0);
            for _ in 0..1024 {
                ledger.record(seq, wire.clone(), 1316);
                seq.increment();
            }
            black_box(ledger.acknowledge_up_to(SeqNumber::new(1023)));
        });
    });
}

fn bench_seq_number_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence_number");

    group.bench_function("increment", |b| {
        let mut seq = SeqNumber::new(1000);
        b.iter(|| {
            seq.increment();
            black_box(&seq);
        });
    });

    group.bench_function("distance", |b| {
        let a = SeqNumber::new(1000);
        let c = SeqNumber::new(2000);
        b.iter(|| black_box(black_box(a).distance_to(black_box(c))));
    });

    group.finish();
}

criterion_group!(benches, bench_loss_list, bench_ledger, bench_seq_number_ops);
criterion_main!(benches);
