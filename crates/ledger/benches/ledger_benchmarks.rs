//! Micro-benchmarks for the ledger hot path (credit + CAS debit).

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sketchforge_core::OwnerId;
use sketchforge_ledger::InMemoryCreditLedger;

fn bench_credit(c: &mut Criterion) {
    let ledger = InMemoryCreditLedger::new();
    let owner = OwnerId::new();
    ledger.ensure_account_sync(owner).unwrap();

    c.bench_function("ledger_credit", |b| {
        b.iter(|| {
            ledger.credit_sync(black_box(owner), black_box(1)).unwrap();
        })
    });
}

fn bench_cas_debit(c: &mut Criterion) {
    let ledger = InMemoryCreditLedger::new();
    let owner = OwnerId::new();
    ledger.ensure_account_sync(owner).unwrap();
    ledger.credit_sync(owner, i64::MAX / 2).unwrap();

    c.bench_function("ledger_cas_debit", |b| {
        b.iter(|| {
            let balance = ledger.get_account_sync(owner).unwrap().balance;
            ledger
                .debit_sync(black_box(owner), black_box(1), balance)
                .unwrap();
        })
    });
}

criterion_group!(benches, bench_credit, bench_cas_debit);
criterion_main!(benches);
