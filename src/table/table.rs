use crate::db::dbformat::{extract_user_key, parse_internal_key, InternalKeyComparator};
use crate::obj::options::{EnvOptions, Options, ReadOptions, ReadTier};
use crate::obj::slice::Slice;
use crate::obj::status::Status;
use crate::table::block::Block;
use crate::table::filter_block::FilterBlockReader;
use crate::table::format::{read_block, BlockHandle, Footer, K_ENCODED_LENGTH};
use crate::table::iterator::{new_error_iterator, Iter};
use crate::table::table_properties::{TableProperties, K_PROPERTIES_BLOCK};
use crate::table::table_reader::{HandleResult, MarkKeyMayExist, TableReader};
use crate::table::two_level_iterator::TwoLevelIterator;
use crate::util::bytewise_comparator_impl::byte_wise_comparator;
use crate::util::comparator::Comparator;
use crate::util::filter_policy::FilterPolicy;
use crate::util::random_access_file::{AccessPattern, RandomAccessFile};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/*+---------------------+
| Data Block 1        |
+---------------------+
| ...                 |
+---------------------+
| Data Block N        |
+---------------------+
| Filter Block (可选) |
+---------------------+
| Properties Block    |
+---------------------+
| Meta_index Block    | filter block 和 properties block 的位置
+---------------------+
| Index Block         | 由 Index Block 定位 key 所在的 data block，再由 block 内部的重启点定位具体位置
+---------------------+
| Footer (固定长度)     | 记录 meta_index block 和 index block 的位置
+---------------------+*/
pub struct Table {
    file: Box<dyn RandomAccessFile>,
    comparator: Arc<dyn Comparator>,
    user_comparator: Arc<dyn Comparator>,
    paranoid_checks: bool,
    compaction_access_pattern: AccessPattern,
    filter: Option<FilterBlockReader>,
    meta_index_handle: BlockHandle,
    index_block: Block,
    properties: Arc<TableProperties>,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("file", &self.file)
            .field("has_filter", &self.filter.is_some())
            .field("properties", &self.properties)
            .finish()
    }
}

impl Table {
    /// 读 footer、index block 和 meta 信息。index block 常驻内存，data block 按需读取。
    pub fn open(
        options: &Options,
        env_options: &EnvOptions,
        icmp: &Arc<InternalKeyComparator>,
        file: Box<dyn RandomAccessFile>,
        size: u64,
    ) -> Result<Arc<Table>, Status> {
        if size < K_ENCODED_LENGTH as u64 {
            return Err(Status::corruption(
                "file is too short to be an sstable",
                None,
            ));
        }
        let footer_input = file.read(size - K_ENCODED_LENGTH as u64, K_ENCODED_LENGTH)?;
        let footer = Footer::decode_from(&footer_input)?;

        let mut opt = ReadOptions::new();
        if options.paranoid_checks {
            opt.verify_checksums = true;
        }
        let index_block = Block::new(read_block(file.as_ref(), &opt, footer.index_handle())?);

        let mut table = Table {
            file,
            comparator: icmp.clone(),
            user_comparator: icmp.user_comparator().clone(),
            paranoid_checks: options.paranoid_checks,
            compaction_access_pattern: env_options.compaction_access_pattern,
            filter: None,
            meta_index_handle: *footer.meta_index_handle(),
            index_block,
            properties: Arc::new(TableProperties::default()),
        };
        table.read_meta(&footer, options.filter_policy.as_ref())?;
        Ok(Arc::new(table))
    }

    fn meta_read_options(&self) -> ReadOptions {
        let mut opt = ReadOptions::new();
        opt.verify_checksums = self.paranoid_checks;
        opt
    }

    // meta 信息不影响正确性，读失败时只在 paranoid_checks 下报错
    fn read_meta(
        &mut self,
        footer: &Footer,
        filter_policy: Option<&Arc<dyn FilterPolicy>>,
    ) -> Result<(), Status> {
        let contents = match read_block(
            self.file.as_ref(),
            &self.meta_read_options(),
            footer.meta_index_handle(),
        ) {
            Ok(contents) => contents,
            Err(e) => return self.meta_error(e),
        };
        let meta_block = Block::new(contents);
        let mut iter = meta_block.new_iterator(byte_wise_comparator());

        let key = Slice::new_from_static(K_PROPERTIES_BLOCK);
        iter.seek(&key);
        if iter.valid() && iter.key() == key {
            if let Err(e) = self.read_properties(&mut iter.value()) {
                self.meta_error(e)?;
            }
        }

        if let Some(policy) = filter_policy {
            let key = Slice::new_from_string(format!("filter.{}", policy.name()));
            iter.seek(&key);
            if iter.valid() && iter.key() == key {
                if let Err(e) = self.read_filter(policy.clone(), &mut iter.value()) {
                    self.meta_error(e)?;
                }
            }
        }
        Ok(())
    }

    fn meta_error(&self, e: Status) -> Result<(), Status> {
        if self.paranoid_checks {
            return Err(e);
        }
        warn!("ignore bad table meta block: {}", e);
        Ok(())
    }

    fn read_properties(&mut self, handle_value: &mut Slice) -> Result<(), Status> {
        let handle = BlockHandle::decode_from(handle_value)?;
        let contents = read_block(self.file.as_ref(), &self.meta_read_options(), &handle)?;
        self.properties = Arc::new(TableProperties::decode(contents)?);
        Ok(())
    }

    fn read_filter(
        &mut self,
        policy: Arc<dyn FilterPolicy>,
        handle_value: &mut Slice,
    ) -> Result<(), Status> {
        let handle = BlockHandle::decode_from(handle_value)?;
        let contents = read_block(self.file.as_ref(), &self.meta_read_options(), &handle)?;
        self.filter = Some(FilterBlockReader::new(policy, contents.data));
        Ok(())
    }

    /// 打开 index value 指向的 data block
    fn block_reader(&self, read_options: &ReadOptions, index_value: &Slice) -> Box<dyn Iter> {
        let mut input = index_value.clone();
        let handle = match BlockHandle::decode_from(&mut input) {
            Ok(handle) => handle,
            Err(e) => return Box::new(new_error_iterator(e)),
        };
        if read_options.read_tier == ReadTier::BlockCacheTier {
            // data block 不常驻内存，读取必然要做 I/O
            return Box::new(new_error_iterator(Status::incomplete(
                "no blocking io",
                None,
            )));
        }
        let mut opt = read_options.clone();
        opt.verify_checksums |= self.paranoid_checks;
        match read_block(self.file.as_ref(), &opt, &handle) {
            Ok(contents) => Block::new(contents).new_iterator(self.comparator.clone()),
            Err(e) => Box::new(new_error_iterator(e)),
        }
    }
}

impl TableReader for Table {
    fn new_iterator(self: Arc<Self>, read_options: &ReadOptions) -> Box<dyn Iter> {
        let index_iter = self.index_block.new_iterator(self.comparator.clone());
        let table = self;
        Box::new(TwoLevelIterator::new(
            index_iter,
            Box::new(move |read_options: &ReadOptions, index_value: &Slice| {
                table.block_reader(read_options, index_value)
            }),
            read_options.clone(),
        ))
    }

    fn get(
        &self,
        read_options: &ReadOptions,
        key: &Slice,
        handle_result: HandleResult,
        mark_key_may_exist: MarkKeyMayExist,
    ) -> Result<(), Status> {
        if key.len() < 8 {
            return Err(Status::invalid_argument(
                "lookup key is not an internal key",
                None,
            ));
        }
        let user_key = extract_user_key(key);
        let mut index_iter = self.index_block.new_iterator(self.comparator.clone());
        index_iter.seek(key);

        let mut may_exist = false;
        let mut matched = false;
        let mut done = false;
        // 同一个 user key 的多个版本可能跨越多个 data block
        while !done && index_iter.valid() {
            let index_value = index_iter.value();
            let handle = BlockHandle::decode_from(&mut index_value.clone())?;
            if let Some(filter) = &self.filter {
                if !filter.key_may_match(handle.offset(), user_key.data()) {
                    break;
                }
            }
            may_exist = true;
            if read_options.read_tier == ReadTier::BlockCacheTier {
                break;
            }

            let mut block_iter = self.block_reader(read_options, &index_value);
            block_iter.seek(key);
            while block_iter.valid() {
                let parsed = parse_internal_key(&block_iter.key())?;
                if self.user_comparator.compare(&parsed.user_key, &user_key) != Ordering::Equal {
                    done = true;
                    break;
                }
                matched = true;
                if !handle_result(&parsed, &block_iter.value()) {
                    done = true;
                    break;
                }
                block_iter.next();
            }
            let status = block_iter.status();
            if !status.is_ok() {
                return Err(status);
            }
            index_iter.next();
        }
        let status = index_iter.status();
        if !status.is_ok() {
            return Err(status);
        }

        if may_exist && !matched {
            if let Some(mark) = mark_key_may_exist {
                mark();
            }
        }
        Ok(())
    }

    fn table_properties(&self) -> Arc<TableProperties> {
        self.properties.clone()
    }

    fn approximate_memory_usage(&self) -> usize {
        self.index_block.size() + self.filter.as_ref().map_or(0, |filter| filter.size())
    }

    fn approximate_offset_of(&self, key: &Slice) -> u64 {
        let mut index_iter = self.index_block.new_iterator(self.comparator.clone());
        index_iter.seek(key);
        if index_iter.valid() {
            if let Ok(handle) = BlockHandle::decode_from(&mut index_iter.value()) {
                return handle.offset();
            }
        }
        // key 超过了最后一个 key，或者 index 损坏，返回接近文件尾的位置
        self.meta_index_handle.offset()
    }

    fn setup_for_compaction(&self) {
        self.file.hint(self.compaction_access_pattern);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dbformat::{InternalKey, ParsedInternalKey, ValueType};
    use crate::obj::options::CompressionType;
    use crate::table::table_builder::TableBuilder;
    use crate::util::env::default_env;
    use crate::util::filter_policy::new_bloom_filter_policy;
    use crate::util::test_util::{compressible_string, random_seed, random_string};
    use bytes::BytesMut;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::fs;
    use std::path::Path;

    fn icmp() -> Arc<InternalKeyComparator> {
        Arc::new(InternalKeyComparator::new(byte_wise_comparator()))
    }

    fn test_file(name: &str) -> String {
        let env = default_env();
        format!("{}/table_{}.sst", env.get_test_directory().unwrap(), name)
    }

    fn user_key(i: usize) -> String {
        format!("key{:06}", i)
    }

    fn random_entries(n: usize) -> Vec<(String, Slice)> {
        let mut rnd = StdRng::seed_from_u64(301);
        (0..n)
            .map(|i| {
                let mut value = BytesMut::new();
                let len = rnd.random_range(0..200);
                (user_key(i * 2), random_string(&mut rnd, len, &mut value))
            })
            .collect()
    }

    // 每个 user key 一个版本，序列号为 1
    fn build(options: &Options, file_name: &str, entries: &[(String, Slice)]) -> u64 {
        let file = options.env.new_writable_file(Path::new(file_name)).unwrap();
        let mut builder = TableBuilder::new(options, &icmp(), file);
        for (key, value) in entries {
            let ikey = InternalKey::new(&Slice::new_from_str(key), 1, ValueType::KTypeValue);
            builder.add(&ikey.encode(), value).unwrap();
        }
        assert_eq!(entries.len() as u64, builder.num_entries());
        let size = builder.finish().unwrap();
        assert_eq!(size, builder.file_size());
        assert_eq!(size, fs::metadata(file_name).unwrap().len());
        size
    }

    fn open(options: &Options, file_name: &str, size: u64) -> Result<Arc<Table>, Status> {
        let env_options = EnvOptions::default();
        let file = options
            .env
            .new_random_access_file(Path::new(file_name), &env_options)?;
        Table::open(options, &env_options, &icmp(), file, size)
    }

    fn lookup(table: &Table, read_options: &ReadOptions, key: &str) -> (Vec<Slice>, usize) {
        let mut values = Vec::new();
        let mut marks = 0;
        let mut handle_result = |_parsed: &ParsedInternalKey, value: &Slice| {
            values.push(value.clone());
            true
        };
        let mut mark = || marks += 1;
        table
            .get(
                read_options,
                &InternalKey::for_lookup(&Slice::new_from_str(key)).encode(),
                &mut handle_result,
                Some(&mut mark),
            )
            .unwrap();
        (values, marks)
    }

    fn small_block_options() -> Options {
        let mut options = Options::default();
        options.block_size = 256;
        options.block_restart_interval = 4;
        options
    }

    #[test]
    fn test_iterate_and_seek() {
        let options = small_block_options();
        let file_name = test_file("iterate");
        let entries = random_entries(500);
        let size = build(&options, &file_name, &entries);
        let table = open(&options, &file_name, size).unwrap();

        let properties = table.table_properties();
        assert_eq!(500, properties.num_entries);
        assert!(properties.num_data_blocks > 1);
        assert!(properties.filter_policy_name.is_empty());

        let mut iter = table.clone().new_iterator(&ReadOptions::new());
        iter.seek_to_first();
        for (key, value) in &entries {
            assert!(iter.valid());
            assert_eq!(key.as_bytes(), extract_user_key(&iter.key()).data());
            assert_eq!(*value, iter.value());
            iter.next();
        }
        assert!(!iter.valid());
        assert!(iter.status().is_ok());

        iter.seek_to_last();
        for (key, _) in entries.iter().rev().take(20) {
            assert_eq!(key.as_bytes(), extract_user_key(&iter.key()).data());
            iter.prev();
        }

        // 奇数 key 不存在，seek 落到下一个偶数 key
        iter.seek(&InternalKey::for_lookup(&Slice::new_from_string(user_key(301))).encode());
        assert!(iter.valid());
        assert_eq!(user_key(302).as_bytes(), extract_user_key(&iter.key()).data());
        iter.seek(&InternalKey::for_lookup(&Slice::new_from_string(user_key(999))).encode());
        assert!(!iter.valid());
    }

    #[test]
    fn test_get() {
        let options = small_block_options();
        let file_name = test_file("get");
        let entries = random_entries(200);
        let size = build(&options, &file_name, &entries);
        let table = open(&options, &file_name, size).unwrap();
        let read_options = ReadOptions::new();

        for (key, value) in entries.iter().step_by(7) {
            let (values, marks) = lookup(&table, &read_options, key);
            assert_eq!(vec![value.clone()], values);
            assert_eq!(0, marks);
        }
        let (values, marks) = lookup(&table, &read_options, &user_key(11));
        assert!(values.is_empty());
        assert_eq!(1, marks);
        let (values, marks) = lookup(&table, &read_options, "zzz");
        assert!(values.is_empty());
        assert_eq!(0, marks);
    }

    #[test]
    fn test_get_with_filter() {
        let mut options = small_block_options();
        options.filter_policy = Some(new_bloom_filter_policy(10));
        let file_name = test_file("filter");
        let entries = random_entries(300);
        let size = build(&options, &file_name, &entries);
        let table = open(&options, &file_name, size).unwrap();
        let read_options = ReadOptions::new();
        assert_eq!(
            "leveldb.BuiltinBloomFilter2",
            table.table_properties().filter_policy_name
        );
        assert!(table.approximate_memory_usage() > table.index_block.size());

        for (key, value) in &entries {
            let (values, _) = lookup(&table, &read_options, key);
            assert_eq!(vec![value.clone()], values);
        }
        // filter 能排除绝大部分不存在的 key
        let mut marks = 0;
        for i in 0..300 {
            let (values, m) = lookup(&table, &read_options, &user_key(i * 2 + 1));
            assert!(values.is_empty());
            marks += m;
        }
        assert!(marks < 30, "too many false positives: {}", marks);

        let mut no_io = ReadOptions::new();
        no_io.read_tier = ReadTier::BlockCacheTier;
        let (values, marks) = lookup(&table, &no_io, &entries[10].0);
        assert!(values.is_empty());
        assert_eq!(1, marks);
    }

    #[test]
    fn test_approximate_offset_of() {
        let mut options = small_block_options();
        options.compression = CompressionType::None;
        let file_name = test_file("offset");
        let entries = random_entries(400);
        let size = build(&options, &file_name, &entries);
        let table = open(&options, &file_name, size).unwrap();

        let offset = |i: usize| {
            table.approximate_offset_of(
                &InternalKey::for_lookup(&Slice::new_from_string(user_key(i))).encode(),
            )
        };
        assert_eq!(0, offset(0));
        assert!(offset(200) < offset(600));
        assert!(offset(600) <= table.table_properties().data_size);
        assert!(offset(10_000) < size);
    }

    #[test]
    fn test_truncated_file_is_corruption() {
        let options = Options::default();
        let file_name = test_file("truncated");
        let size = build(&options, &file_name, &random_entries(10));

        assert!(open(&options, &file_name, 10).unwrap_err().is_corruption());
        assert!(open(&options, &file_name, size - 1)
            .unwrap_err()
            .is_corruption());
    }

    #[test]
    fn test_corrupted_data_block() {
        let mut options = small_block_options();
        options.compression = CompressionType::None;
        let file_name = test_file("corrupted");
        let entries = random_entries(100);
        let size = build(&options, &file_name, &entries);

        let mut contents = fs::read(&file_name).unwrap();
        contents[10] ^= 0x80;
        fs::write(&file_name, &contents).unwrap();
        let table = open(&options, &file_name, size).unwrap();

        let mut read_options = ReadOptions::new();
        read_options.verify_checksums = true;
        // 损坏的 block 被跳过，错误保留在 status 里
        let mut iter = table.clone().new_iterator(&read_options);
        iter.seek_to_first();
        let mut count = 0;
        while iter.valid() {
            count += 1;
            iter.next();
        }
        assert!(count < entries.len());
        assert!(iter.status().is_corruption());

        let mut handle_result = |_: &ParsedInternalKey, _: &Slice| true;
        let err = table
            .get(
                &read_options,
                &InternalKey::for_lookup(&Slice::new_from_str(&entries[0].0)).encode(),
                &mut handle_result,
                None,
            )
            .unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_random_seek() {
        let options = small_block_options();
        let file_name = test_file("random_seek");
        let entries = random_entries(300);
        let size = build(&options, &file_name, &entries);
        let table = open(&options, &file_name, size).unwrap();

        let seed = random_seed();
        let mut rnd = StdRng::seed_from_u64(seed);
        let mut iter = table.clone().new_iterator(&ReadOptions::new());
        for _ in 0..200 {
            let i = rnd.random_range(0..700usize);
            iter.seek(&InternalKey::for_lookup(&Slice::new_from_string(user_key(i))).encode());
            match entries.get(i.div_ceil(2)) {
                Some((key, value)) => {
                    assert!(iter.valid(), "seed {}", seed);
                    assert_eq!(key.as_bytes(), extract_user_key(&iter.key()).data());
                    assert_eq!(*value, iter.value());
                }
                None => assert!(!iter.valid(), "seed {}", seed),
            }
        }
    }

    #[test]
    fn test_snappy_compression() {
        let mut rnd = StdRng::seed_from_u64(17);
        let entries: Vec<(String, Slice)> = (0..200)
            .map(|i| {
                let mut value = BytesMut::new();
                (user_key(i), compressible_string(&mut rnd, 0.25, 300, &mut value))
            })
            .collect();

        let mut data_sizes = Vec::new();
        for compression in [CompressionType::None, CompressionType::Snappy] {
            let mut options = Options::default();
            options.compression = compression;
            let file_name = test_file(&format!("compression_{:?}", compression));
            let size = build(&options, &file_name, &entries);
            let table = open(&options, &file_name, size).unwrap();
            let (values, _) = lookup(&table, &ReadOptions::new(), &entries[42].0);
            assert_eq!(vec![entries[42].1.clone()], values);
            data_sizes.push(table.table_properties().data_size);
        }
        assert!(data_sizes[1] < data_sizes[0] / 2);
    }
}
