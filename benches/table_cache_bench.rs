use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lsm_table_cache::db::dbformat::{InternalKey, InternalKeyComparator, ParsedInternalKey, ValueType};
use lsm_table_cache::db::file_name::table_file_name;
use lsm_table_cache::db::table_cache::{new_table_reader_cache, TableCache};
use lsm_table_cache::db::version_edit::FileDescriptor;
use lsm_table_cache::obj::options::{EnvOptions, Options, ReadOptions};
use lsm_table_cache::obj::slice::Slice;
use lsm_table_cache::util::bytewise_comparator_impl::byte_wise_comparator;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;

const K_NUM_KEYS: usize = 10000;
const K_NUM_FILES: u64 = 8;

fn user_key(i: usize) -> String {
    format!("key{:08}", i)
}

fn setup() -> (TableCache, Arc<InternalKeyComparator>, Vec<FileDescriptor>) {
    let options = Arc::new(Options::default());
    let icmp = Arc::new(InternalKeyComparator::new(byte_wise_comparator()));
    let dir = format!(
        "{}/table_cache_bench",
        options.env.get_test_directory().unwrap()
    );
    options.env.create_dir(Path::new(&dir)).unwrap();

    let mut fds = Vec::new();
    for number in 1..=K_NUM_FILES {
        let file_name = table_file_name(&dir, number);
        let file = options.env.new_writable_file(Path::new(&file_name)).unwrap();
        let mut builder = options.table_factory.new_table_builder(&options, &icmp, file);
        for i in 0..K_NUM_KEYS {
            let ikey = InternalKey::new(
                &Slice::new_from_string(user_key(i)),
                number,
                ValueType::KTypeValue,
            );
            builder
                .add(&ikey.encode(), &Slice::new_from_string(format!("value{}", i)))
                .unwrap();
        }
        let file_size = builder.finish().unwrap();
        fds.push(FileDescriptor::new(number, 0, file_size));
    }

    let cache = new_table_reader_cache(&options);
    let table_cache = TableCache::new(&dir, options, EnvOptions::default(), cache);
    (table_cache, icmp, fds)
}

fn bench_find_table(c: &mut Criterion) {
    let (table_cache, icmp, fds) = setup();
    let env_options = EnvOptions::default();
    let mut rng = rand::rng();
    c.bench_function("find_table_hit", |b| {
        b.iter(|| {
            let fd = &fds[rng.random_range(0..fds.len())];
            let handle = table_cache
                .find_table(&env_options, &icmp, black_box(fd), false)
                .unwrap();
            TableCache::release_handle(handle);
        })
    });
}

fn bench_get(c: &mut Criterion) {
    let (table_cache, icmp, fds) = setup();
    let read_options = ReadOptions::new();
    let mut rng = rand::rng();
    c.bench_function("table_cache_get", |b| {
        b.iter(|| {
            let fd = &fds[rng.random_range(0..fds.len())];
            let key = InternalKey::for_lookup(&Slice::new_from_string(user_key(
                rng.random_range(0..K_NUM_KEYS),
            )));
            let mut found = 0;
            let mut handle_result = |_: &ParsedInternalKey, value: &Slice| {
                found += value.len();
                false
            };
            table_cache
                .get(
                    &read_options,
                    &icmp,
                    fd,
                    &key.encode(),
                    &mut handle_result,
                    None,
                )
                .unwrap();
            black_box(found);
        })
    });
}

// 注册测试组
criterion_group!(benches, bench_find_table, bench_get);
criterion_main!(benches);
