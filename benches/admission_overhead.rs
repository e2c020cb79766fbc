use criterion::{black_box, criterion_group, criterion_main, Criterion};
use eikon::prelude::*;
use std::sync::Arc;

fn request(owner: &str) -> JobRequest {
    JobRequest {
        owner_id: owner.into(),
        photo_key: "ptv/face.png".to_string(),
        script: Some("Hello".to_string()),
        audio_key: None,
        voice_key: None,
        mode: Mode::Standard,
        enhancement: true,
    }
}

// =============================================================================
// Admission Benchmarks
// =============================================================================

fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    let owner = OwnerId::new("bench-owner");

    group.bench_function("try_admit_release", |b| {
        let admission = AdmissionController::new(5);
        b.iter(|| {
            let job = uuid::Uuid::new_v4();
            black_box(admission.try_admit(&owner, job));
            black_box(admission.release(job))
        })
    });

    group.bench_function("try_admit_repeat_same_job", |b| {
        let admission = AdmissionController::new(5);
        let job = uuid::Uuid::new_v4();
        admission.try_admit(&owner, job);
        b.iter(|| black_box(admission.try_admit(&owner, job)))
    });

    group.bench_function("try_admit_many_owners", |b| {
        let admission = AdmissionController::new(1);
        let owners: Vec<OwnerId> = (0..64).map(|i| OwnerId::new(format!("owner-{i}"))).collect();
        b.iter(|| {
            for owner in &owners {
                let job = uuid::Uuid::new_v4();
                admission.try_admit(owner, job);
                admission.release(job);
            }
        })
    });

    group.finish();
}

// =============================================================================
// Ledger and State Machine Benchmarks
// =============================================================================

fn bench_completion_path(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("completion_path");

    group.bench_function("inmemory_transition_debit_complete", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = Arc::new(InMemoryJobStore::new());
                let owner = OwnerId::new("bench-owner");
                store.grant(&owner, 1).await.unwrap();

                let job = request("bench-owner").into_job().unwrap();
                store.insert_job(&job).await.unwrap();
                store
                    .transition(job.id(), JobStatus::Queued, JobStatus::Processing, None)
                    .await
                    .unwrap();

                let debit = store.debit_one(&owner, job.id()).await.unwrap();
                let completed = store.complete_job(job.id(), "ptv/out.mp4").await.unwrap();
                black_box((debit, completed))
            })
        })
    });

    group.bench_function("inmemory_repeat_debit", |b| {
        let store = Arc::new(InMemoryJobStore::new());
        let owner = OwnerId::new("bench-owner");
        let job = uuid::Uuid::new_v4();
        rt.block_on(async {
            store.grant(&owner, 1).await.unwrap();
            store.debit_one(&owner, job).await.unwrap();
        });

        b.iter(|| rt.block_on(async { black_box(store.debit_one(&owner, job).await.unwrap()) }))
    });

    group.bench_function("inmemory_find_by_handle", |b| {
        let store = Arc::new(InMemoryJobStore::new());
        rt.block_on(async {
            for i in 0..1000 {
                let job = request("bench-owner").into_job().unwrap();
                store.insert_job(&job).await.unwrap();
                store
                    .transition(job.id(), JobStatus::Queued, JobStatus::Processing, None)
                    .await
                    .unwrap();
                store
                    .record_external_handle(job.id(), &format!("handle-{i}"))
                    .await
                    .unwrap();
            }
        });

        b.iter(|| {
            rt.block_on(async { black_box(store.find_by_external_handle("handle-500").await.unwrap()) })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_admission, bench_completion_path);
criterion_main!(benches);
