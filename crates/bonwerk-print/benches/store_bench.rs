// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the offline job store: enqueue, priority
// selection and per-chunk cursor persistence.

use chrono::{Duration, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use bonwerk_core::types::{JobState, Payload, PrintJob, Priority, TransferCursor};
use bonwerk_print::OfflineJobStore;
use bonwerk_print::integrity::fingerprint;

fn job(priority: Priority) -> PrintJob {
    let bytes = vec![0x1b; 512];
    PrintJob::new(
        Payload::Raw(bytes.clone()),
        priority,
        bytes.len() as u64,
        fingerprint(&bytes),
        Duration::hours(1),
    )
}

fn bench_insert(c: &mut Criterion) {
    let store = OfflineJobStore::open_in_memory().expect("store");
    c.bench_function("insert_job", |b| {
        b.iter(|| store.insert_job(black_box(&job(Priority::Normal))).expect("insert"))
    });
}

fn bench_next_pending(c: &mut Criterion) {
    let store = OfflineJobStore::open_in_memory().expect("store");
    let priorities = [Priority::Low, Priority::Normal, Priority::High, Priority::Urgent];
    for i in 0..500 {
        store.insert_job(&job(priorities[i % 4])).expect("insert");
    }
    c.bench_function("next_pending_500", |b| {
        b.iter(|| black_box(store.next_pending(Utc::now()).expect("select")))
    });
}

fn bench_advance_cursor(c: &mut Criterion) {
    let store = OfflineJobStore::open_in_memory().expect("store");
    let job = job(Priority::Normal);
    store.insert_job(&job).expect("insert");
    store
        .update_state(&job.id, JobState::InFlight, None)
        .expect("in flight");
    let mut offset = 0u64;
    c.bench_function("advance_cursor", |b| {
        b.iter(|| {
            offset += 1;
            store.advance_cursor(TransferCursor::new(job.id, black_box(offset))).expect("cursor")
        })
    });
}

criterion_group!(benches, bench_insert, bench_next_pending, bench_advance_cursor);
criterion_main!(benches);
