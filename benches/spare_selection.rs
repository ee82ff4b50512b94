//! Benchmarks for spare selection and LUN capacity math
//!
//! Target: ranking a full enclosure set well under a millisecond

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use storage_job_orchestrator::domain::{
    BlockSize, DriveLocation, DriveType, LifecycleState, ObjectId, PathState, PoolId,
};
use storage_job_orchestrator::ops::lun_create::capacity::imported_capacity;
use storage_job_orchestrator::sparing::{find_best_spare, SpareSelectionInfo};

fn drive(id: u32, slot: u32, drive_type: DriveType, capacity: u64) -> SpareSelectionInfo {
    SpareSelectionInfo {
        object_id: ObjectId(id),
        location: DriveLocation::new(slot % 4, slot / 25, slot % 25),
        drive_type,
        block_size: BlockSize::Bytes520,
        capacity,
        exported_offset: 0x10000,
        lifecycle: LifecycleState::Ready,
        path_state: PathState::Enabled,
        pool_id: PoolId::INVALID,
        is_system_drive: false,
        end_of_life: false,
        slf: false,
    }
}

fn candidates(count: u32) -> Vec<SpareSelectionInfo> {
    (0..count)
        .map(|i| {
            let drive_type = match i % 3 {
                0 => DriveType::Sas,
                1 => DriveType::SasNl,
                _ => DriveType::SasFlashMe,
            };
            drive(0x200 + i, i, drive_type, 0x0100_0000 + (i as u64 % 7) * 0x1000)
        })
        .collect()
}

fn bench_find_best_spare(c: &mut Criterion) {
    let mut group = c.benchmark_group("spare_selection");
    let desired = drive(0x100, 1, DriveType::Sas, 0x0100_0000);

    for count in [16u32, 120, 500] {
        let pool = candidates(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("find_best_spare", count), &pool, |b, pool| {
            b.iter(|| find_best_spare(black_box(&desired), black_box(0x0100_0000), pool));
        });
    }

    group.finish();
}

fn bench_imported_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("lun_capacity");
    group.throughput(Throughput::Elements(1));

    group.bench_function("imported_capacity", |b| {
        let mut exported = 0x1000u64;
        b.iter(|| {
            exported = exported.wrapping_mul(3).wrapping_add(0x801) % 0x1_0000_0000 + 1;
            let _ = imported_capacity(black_box(exported), black_box(8));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_find_best_spare, bench_imported_capacity);
criterion_main!(benches);
