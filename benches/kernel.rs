use criterion::{criterion_group, criterion_main, Criterion};
use rand::{Rng, RngCore};
use std::sync::Arc;
use storage_kernel::{
    blob::{BlobContents, BlobFileBuilder},
    cache::{CacheKey, CacheTier, CompressedSecondaryCache, LruCache, Priority},
    BlobFileConfig, CompressedSecondaryCacheConfig, IdGenerator, LruCacheConfig, MockFileSystem,
};

fn key(n: u64) -> CacheKey {
    CacheKey::from_raw(1, n)
}

fn cache_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache insert");

    for shard_bits in [0, 4] {
        let cache = LruCache::new(
            LruCacheConfig::new(64 * 1_024 * 1_024).num_shard_bits(shard_bits),
        )
        .unwrap();

        let mut n = 0;

        group.bench_function(format!("4 KiB, {} shard(s)", 1 << shard_bits), |b| {
            b.iter(|| {
                n += 1;

                let value = BlobContents::from(vec![0; 4_096]);
                let charge = value.charge();

                cache
                    .insert(
                        key(n),
                        Box::new(value),
                        BlobContents::cache_helper(),
                        charge,
                        Priority::Low,
                    )
                    .unwrap();
            });
        });
    }
}

fn cache_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache lookup");

    let item_count = 10_000;

    let cache = LruCache::new(LruCacheConfig::new(64 * 1_024 * 1_024)).unwrap();
    for n in 0..item_count {
        let value = BlobContents::from(vec![0; 1_024]);
        let charge = value.charge();
        cache
            .insert(
                key(n),
                Box::new(value),
                BlobContents::cache_helper(),
                charge,
                Priority::Low,
            )
            .unwrap();
    }

    let mut rng = rand::thread_rng();

    group.bench_function("hit", |b| {
        b.iter(|| {
            let handle = cache
                .lookup(&key(rng.gen_range(0..item_count)), None, None, Priority::Low)
                .unwrap();
            assert!(handle.downcast::<BlobContents>().is_some());
        });
    });

    group.bench_function("miss", |b| {
        b.iter(|| {
            assert!(cache
                .lookup(&key(item_count + rng.gen_range(0..item_count)), None, None, Priority::Low)
                .is_none());
        });
    });

    let secondary = Arc::new(CompressedSecondaryCache::new(
        CompressedSecondaryCacheConfig::new(64 * 1_024 * 1_024),
    ));
    let cache = LruCache::new(LruCacheConfig::new(1_024).secondary_cache(secondary)).unwrap();

    for n in 0..item_count {
        cache
            .insert_saved(
                key(n),
                &[0; 1_024],
                BlobContents::cache_helper(),
                None,
                Priority::Low,
                CacheTier::NonVolatile,
            )
            .unwrap();
    }

    // Promoted entries are evicted again right away, so not every lookup hits
    group.bench_function("secondary lookup", |b| {
        b.iter(|| {
            cache.lookup(
                &key(rng.gen_range(0..item_count)),
                Some(BlobContents::cache_helper()),
                None,
                Priority::Low,
            )
        });
    });
}

fn blob_builder_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("blob builder add");

    let sizes = [
        128,       // 128 B
        1_024,     // 1 KiB
        16_000,    // 16 KiB
        128_000,   // 128 KiB
        1_024_000, // 1 MiB
    ];

    let mut rng = rand::thread_rng();

    for size in sizes {
        let fs = MockFileSystem::default();

        let mut builder = BlobFileBuilder::new(
            Arc::new(fs),
            "/bench/blobs",
            IdGenerator::default(),
            BlobFileConfig::default().blob_file_size(64 * 1_024 * 1_024),
        )
        .unwrap();

        let mut data = vec![0u8; size];
        rng.fill_bytes(&mut data);

        let mut n = 0_u64;

        group.bench_function(format!("{size} bytes"), |b| {
            b.iter(|| {
                n += 1;
                builder.add(&n.to_be_bytes(), &data).unwrap().unwrap();
            });
        });

        builder.finish().unwrap();
    }
}

criterion_group!(benches, cache_insert, cache_lookup, blob_builder_add);
criterion_main!(benches);
