//! Criterion micro-benchmarks for the update-selection hot path.
//!
//! Benchmarks:
//! - Plain chain walk and selection (newest committed wins)
//! - Tombstone post-processing (selection moves to the previous update)
//! - Eviction walk over a long chain (stability counting)

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use timber_rec::{
    upd_select, InlinePayloadProvider, KeyRef, Page, RecFlags, ReconcileContext, TxnRegistry,
    Update, UpdateStore,
};
use timber_types::{PageKind, Timestamp, TxnId};

fn criterion_config() -> Criterion {
    Criterion::default().configure_from_args()
}

fn ts(raw: u64) -> Timestamp {
    Timestamp::new(raw)
}

fn txn(raw: u64) -> TxnId {
    TxnId::new(raw)
}

fn setup_chain(len: u64) -> (Page, UpdateStore, TxnRegistry) {
    let page = Page::new(PageKind::RowLeaf, 1);
    let store = UpdateStore::new();
    let reg = TxnRegistry::new();
    reg.set_last_running(txn(len + 1));

    let updates: Vec<Update> = (1..=len)
        .rev()
        .map(|i| Update::standard(txn(i), ts(i * 10), ts(i * 10), vec![0; 32]))
        .collect();
    let head = store.build_chain(updates).unwrap();
    page.set_update_chain(0, head);
    (page, store, reg)
}

fn bench_select_head(c: &mut Criterion) {
    let mut group = c.benchmark_group("upd_select/head");
    for len in [2_u64, 8, 32] {
        let (page, store, reg) = setup_chain(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                let mut ctx = ReconcileContext::new(RecFlags::VISIBLE_ALL, &reg);
                let sel = upd_select(
                    &mut ctx,
                    &page,
                    &InlinePayloadProvider,
                    &reg,
                    &store,
                    KeyRef::Slot(0),
                    None,
                )
                .unwrap();
                black_box(sel)
            });
        });
    }
    group.finish();
}

fn bench_select_tombstone(c: &mut Criterion) {
    let page = Page::new(PageKind::RowLeaf, 1);
    let store = UpdateStore::new();
    let reg = TxnRegistry::new();
    reg.commit(txn(7));
    reg.commit(txn(5));
    let head = store
        .build_chain(vec![
            Update::tombstone(txn(7), ts(40), ts(40)),
            Update::standard(txn(5), ts(30), ts(30), vec![0; 32]),
        ])
        .unwrap();
    page.set_update_chain(0, head);

    c.bench_function("upd_select/tombstone", |b| {
        b.iter(|| {
            let mut ctx = ReconcileContext::new(RecFlags::empty(), &reg);
            let sel = upd_select(
                &mut ctx,
                &page,
                &InlinePayloadProvider,
                &reg,
                &store,
                KeyRef::Slot(0),
                None,
            )
            .unwrap();
            black_box(sel)
        });
    });
}

fn bench_select_evict_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("upd_select/evict_walk");
    for len in [8_u64, 64] {
        let (page, store, reg) = setup_chain(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                let mut ctx =
                    ReconcileContext::new(RecFlags::VISIBLE_ALL | RecFlags::EVICT, &reg);
                let sel = upd_select(
                    &mut ctx,
                    &page,
                    &InlinePayloadProvider,
                    &reg,
                    &store,
                    KeyRef::Slot(0),
                    None,
                )
                .unwrap();
                black_box(sel)
            });
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_select_head, bench_select_tombstone, bench_select_evict_walk
}
criterion_main!(benches);
