use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nrt_batch::{
    collate, BatchPlan, IndexOrdering, ItemRequest, LoaderOptions, ParallelLoader,
    RandomAccessView, WindowPolicy,
};
use nrt_format::{DatasetGenerator, Item, NestedRaggedTensor, OpenOptions, RaggedBuilder};

const NUM_ITEMS: usize = 2_000;
const BATCH_SIZE: usize = 32;

fn items() -> Vec<Item> {
    DatasetGenerator {
        event_groups_per_item: 1..=128,
        measurements_per_event_group: 1..=12,
        ..Default::default()
    }
    .generate(NUM_ITEMS, 7)
    .expect("invalid benchmark generator")
}

fn bench_build_write_read(c: &mut Criterion) {
    let items = items();
    let tensor = RaggedBuilder::build(&items).expect("build failed in benchmark");
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("bench.nrt");
    tensor.save(&target).expect("write failed in benchmark");

    let mut group = c.benchmark_group("storage");
    group.throughput(Throughput::Elements(NUM_ITEMS as u64));
    group.sample_size(20);

    group.bench_function("build", |b| {
        b.iter(|| RaggedBuilder::build(black_box(&items)).expect("build"))
    });

    let mut counter = 0usize;
    group.bench_function("write", |b| {
        b.iter(|| {
            counter += 1;
            tensor
                .save(dir.path().join(format!("write-{counter}.nrt")))
                .expect("write")
        })
    });

    for (name, options) in [("eager", OpenOptions::eager()), ("lazy", OpenOptions::lazy())] {
        group.bench_with_input(BenchmarkId::new("read", name), &options, |b, options| {
            b.iter(|| NestedRaggedTensor::open(&target, *options).expect("read"))
        });
    }
    group.finish();
}

fn bench_getitem_collate(c: &mut Criterion) {
    let tensor = RaggedBuilder::build(items()).expect("build failed in benchmark");
    let view = RandomAccessView::new(&tensor);
    let window = WindowPolicy::last(64);

    let mut group = c.benchmark_group("access");
    group.bench_function("getitem", |b| {
        let mut index = 0usize;
        b.iter(|| {
            index = (index + 7919) % NUM_ITEMS;
            view.get(&ItemRequest::new(index), &window).expect("getitem")
        })
    });

    let requests: Vec<ItemRequest> = (0..BATCH_SIZE).map(|i| ItemRequest::new(i * 61)).collect();
    let slices = view.get_many(&requests, &window).expect("slices");
    group.throughput(Throughput::Elements(BATCH_SIZE as u64));
    group.bench_function("collate", |b| b.iter(|| collate(black_box(&slices))));
    group.finish();
}

fn bench_epoch(c: &mut Criterion) {
    let tensor = RaggedBuilder::build(items()).expect("build failed in benchmark");
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("epoch.nrt");
    tensor.save(&target).expect("write failed in benchmark");

    let plan = BatchPlan::new(BATCH_SIZE)
        .with_ordering(IndexOrdering::Shuffled { seed: 1 })
        .with_window(WindowPolicy::last(64));

    let mut group = c.benchmark_group("epoch");
    group.throughput(Throughput::Elements(NUM_ITEMS as u64));
    group.sample_size(10);

    group.bench_function("sequential", |b| {
        b.iter(|| {
            plan.epoch(&tensor, 0)
                .expect("epoch")
                .map(|batch| batch.expect("batch").batch_size())
                .sum::<usize>()
        })
    });

    for workers in [2usize, 4] {
        let options = LoaderOptions {
            workers,
            queue_capacity: 2 * workers,
            ..Default::default()
        };
        group.bench_with_input(BenchmarkId::new("parallel", workers), &options, |b, options| {
            b.iter(|| {
                ParallelLoader::spawn(&target, &plan, 0, *options)
                    .expect("spawn")
                    .map(|batch| batch.expect("batch").batch.batch_size())
                    .sum::<usize>()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build_write_read, bench_getitem_collate, bench_epoch);
criterion_main!(benches);
