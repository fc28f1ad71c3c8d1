// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ledger_store::{encode_entry, Store, StoreConfig};

fn commit_batch(store: &Store, sequence: u32, entries: usize) {
    let mut tx = store.begin_write_tx().unwrap();
    for i in 0..entries {
        let key = format!("bench/key-{i}");
        let entry = encode_entry(0x02, key.as_bytes(), b"value");
        tx.upsert(entry).unwrap();
    }
    tx.commit(sequence).unwrap();
}

pub fn commit_ledger(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_ledger");
    for &entries in &[10usize, 100, 1000] {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.db_path = dir.path().join("bench.sqlite3");
        let store = Store::open(config).unwrap();
        let mut sequence = 0u32;

        group.bench_function(BenchmarkId::new("entries", entries), |b| {
            b.iter(|| {
                sequence += 1;
                commit_batch(&store, sequence, entries);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, commit_ledger);
criterion_main!(benches);
