//! Benchmarks for paged buffers, the Merkle buffer and clustered streams

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use plexus_rs::{
    ClusteredStreams, ContainerOptions, HashAlgorithm, MemoryBuffer, MerkleBuffer, PagedList,
    RangeList, VecPageStore,
};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

const TOTAL_BYTES: usize = 64 * 1024;

fn benchmark_sequential_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("paged_append");
    let chunk = vec![0xABu8; 256];

    for page_size in [256, 4096].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(page_size), page_size, |b, &page_size| {
            b.iter(|| {
                let mut list = PagedList::<u8, _>::new(VecPageStore::default(), page_size, 8).unwrap();
                for _ in 0..TOTAL_BYTES / chunk.len() {
                    list.add_range(black_box(&chunk)).unwrap();
                }
                list.flush().unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_random_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("paged_random_update");

    for max_open_pages in [1, 4, 64].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(max_open_pages),
            max_open_pages,
            |b, &max_open_pages| {
                let mut list = PagedList::<u8, _>::new(VecPageStore::default(), 1024, max_open_pages).unwrap();
                list.add_range(&vec![0u8; TOTAL_BYTES]).unwrap();
                let mut rng = StdRng::seed_from_u64(7);
                b.iter(|| {
                    let index = rng.gen_range(0..TOTAL_BYTES - 16);
                    list.update_range(black_box(index), &[1u8; 16]).unwrap();
                });
            },
        );
    }

    group.finish();
}

fn benchmark_insert_front(c: &mut Criterion) {
    c.bench_function("paged_insert_front", |b| {
        let mut list = PagedList::<u8, _>::in_memory(1024).unwrap();
        list.add_range(&vec![0u8; 16 * 1024]).unwrap();
        b.iter(|| {
            list.insert_range(0, black_box(b"prefix")).unwrap();
            list.remove_range(0, 6).unwrap();
        });
    });
}

fn benchmark_merkle_root(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle_root_after_update");

    for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Sha512_256].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", algorithm)),
            algorithm,
            |b, &algorithm| {
                let inner = PagedList::<u8, _>::new(VecPageStore::default(), 512, 16).unwrap();
                let mut buffer = MerkleBuffer::new(inner, algorithm);
                buffer.add_range(&vec![0u8; TOTAL_BYTES]).unwrap();
                let mut rng = StdRng::seed_from_u64(11);
                b.iter(|| {
                    let index = rng.gen_range(0..TOTAL_BYTES);
                    buffer.update_range(index, &[rng.gen()]).unwrap();
                    black_box(buffer.root().unwrap());
                });
            },
        );
    }

    group.finish();
}

fn benchmark_stream_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("clustered_stream_write");
    let payload = vec![0x5Au8; 4096];

    for cluster_size in [64u32, 512, 4096].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(cluster_size),
            cluster_size,
            |b, &cluster_size| {
                b.iter(|| {
                    let options = ContainerOptions {
                        cluster_size,
                        reserved_streams: 0,
                        ..ContainerOptions::default()
                    };
                    let streams = ClusteredStreams::create(MemoryBuffer::new(), &options).unwrap();
                    for _ in 0..16 {
                        let index = streams.add().unwrap();
                        streams.write_all(index, black_box(&payload)).unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_sequential_append,
    benchmark_random_update,
    benchmark_insert_front,
    benchmark_merkle_root,
    benchmark_stream_writes
);
criterion_main!(benches);
