use crate::db::dbformat::InternalKeyComparator;
use crate::db::file_name::{legacy_table_file_name, table_file_dir, table_file_name};
use crate::db::version_edit::FileDescriptor;
use crate::obj::options::{EnvOptions, Options, ReadOptions, ReadTier};
use crate::obj::slice::Slice;
use crate::obj::status::Status;
use crate::table::iterator::{into_arena_iter, new_error_iterator, Iter, IterWithCleanup};
use crate::table::table_properties::TableProperties;
use crate::table::table_reader::{HandleResult, MarkKeyMayExist, TableReader};
use crate::util::arena::{Arena, ArenaBox};
use crate::util::cache::{CacheHandle, InsertResult, ShardedLRUCache};
use crate::util::coding::encode_fixed64;
use crate::util::random_access_file::{AccessPattern, RandomAccessFile};
use crate::util::statistics::{record_tick, Statistics, Tickers};
use ahash::AHashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// 留给 WAL、MANIFEST 等非表文件的句柄数
pub const K_NUM_NON_TABLE_CACHE_FILES: usize = 10;

/// cache 中的一个已打开的表。
///
/// reader 只被这里和它创建的迭代器引用，而迭代器总是带着同一个 entry 的 pin，
/// 所以 entry 移出 cache 且不再被引用时，reader 和文件随之关闭。
pub struct CachedTable {
    number: u64,
    reader: Arc<dyn TableReader>,
    statistics: Option<Arc<Statistics>>,
}

impl CachedTable {
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn reader(&self) -> &dyn TableReader {
        self.reader.as_ref()
    }
}

impl Drop for CachedTable {
    fn drop(&mut self) {
        record_tick(self.statistics.as_deref(), Tickers::NoFileCloses);
        debug!("close table file #{}", self.number);
    }
}

pub type TableReaderCache = ShardedLRUCache<CachedTable>;

/// 对一个已缓存表的引用，持有期间 reader 不会被淘汰
pub type TableHandle = CacheHandle<CachedTable>;

pub fn new_lru_cache(capacity: usize) -> Arc<TableReaderCache> {
    Arc::new(ShardedLRUCache::new(capacity))
}

/// 按 `Options` 的 max_open_files 和分片数创建 table cache 用的 LRU cache
pub fn new_table_reader_cache(options: &Options) -> Arc<TableReaderCache> {
    let capacity = options
        .max_open_files
        .saturating_sub(K_NUM_NON_TABLE_CACHE_FILES)
        .max(1);
    Arc::new(ShardedLRUCache::with_shard_bits(
        capacity,
        options.table_cache_num_shard_bits,
    ))
}

fn cache_key(file_number: u64) -> Slice {
    let mut buf = [0u8; 8];
    encode_fixed64(&mut buf, file_number);
    Slice::new_from_array(&buf)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 文件号 -> 已打开的 TableReader。
///
/// 每个 entry 的 charge 为 1，容量即同时打开的表文件数。多个 `TableCache` 可以共享同一个
/// `TableReaderCache`；cache 中的 reader 在被淘汰且没有 handle 引用后关闭文件。
pub struct TableCache {
    db_name: String,
    options: Arc<Options>,
    env_options: EnvOptions,
    cache: Arc<TableReaderCache>,
    // 正在打开的文件号 -> 该文件的打开锁，只有打开同一个文件的线程互相等待
    loading: Mutex<AHashMap<u64, Arc<Mutex<()>>>>,
}

impl TableCache {
    pub fn new(
        db_name: &str,
        options: Arc<Options>,
        env_options: EnvOptions,
        cache: Arc<TableReaderCache>,
    ) -> TableCache {
        TableCache {
            db_name: db_name.to_string(),
            options,
            env_options,
            cache,
            loading: Mutex::new(AHashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<TableReaderCache> {
        &self.cache
    }

    fn statistics(&self) -> Option<&Statistics> {
        self.options.statistics.as_deref()
    }

    fn start_loading(&self, file_number: u64) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.loading).entry(file_number).or_default())
    }

    fn finish_loading(&self, file_number: u64, loader: Arc<Mutex<()>>) {
        let mut loading = lock(&self.loading);
        // clone 和 drop 都在 loading 锁内：只剩 map 和这里两份时没有线程在等
        if Arc::strong_count(&loader) == 2 {
            loading.remove(&file_number);
        }
        drop(loader);
    }

    /// 查找或打开 fd 对应的表。命中时不做任何 I/O；未命中且 no_io 时返回 Incomplete。
    /// 打开失败不会进入 cache，下一次调用会重新尝试。
    pub fn find_table(
        &self,
        env_options: &EnvOptions,
        icmp: &Arc<InternalKeyComparator>,
        fd: &FileDescriptor,
        no_io: bool,
    ) -> Result<TableHandle, Status> {
        let number = fd.get_number();
        let key = cache_key(number);
        if let Some(handle) = self.cache.lookup(&key) {
            record_tick(self.statistics(), Tickers::TableCacheHit);
            return Ok(handle);
        }
        record_tick(self.statistics(), Tickers::TableCacheMiss);
        if no_io {
            return Err(Status::incomplete(
                "table not found in table cache, no_io is set",
                None,
            ));
        }

        let loader = self.start_loading(number);
        let res = {
            let _loading = lock(&*loader);
            self.load_table(env_options, icmp, fd, &key)
        };
        self.finish_loading(number, loader);
        res
    }

    fn load_table(
        &self,
        env_options: &EnvOptions,
        icmp: &Arc<InternalKeyComparator>,
        fd: &FileDescriptor,
        key: &Slice,
    ) -> Result<TableHandle, Status> {
        let number = fd.get_number();
        // 等锁期间可能已经被别的线程打开
        if let Some(handle) = self.cache.lookup(key) {
            return Ok(handle);
        }

        let reader = match self.open_table_reader(env_options, icmp, fd) {
            Ok(reader) => reader,
            Err(e) => {
                record_tick(self.statistics(), Tickers::NoFileErrors);
                error!("open table file #{} failed: {}", number, e);
                return Err(e);
            }
        };
        let table = CachedTable {
            number,
            reader,
            statistics: self.options.statistics.clone(),
        };
        match self.cache.insert_if_absent(key, table, 1, None) {
            InsertResult::Inserted(handle) => Ok(handle),
            InsertResult::Existing(handle, _unused) => {
                // 共享 cache 的另一个 TableCache 先插入了，丢弃自己打开的 reader
                warn!("table file #{} opened concurrently, keep the cached one", number);
                Ok(handle)
            }
        }
    }

    fn open_table_file(
        &self,
        env_options: &EnvOptions,
        fd: &FileDescriptor,
    ) -> Result<(Box<dyn RandomAccessFile>, String), Status> {
        let env = &self.options.env;
        let dir = table_file_dir(&self.db_name, &self.options.db_paths, fd.get_path_id());
        let file_name = table_file_name(dir, fd.get_number());
        match env.new_random_access_file(Path::new(&file_name), env_options) {
            Ok(file) => Ok((file, file_name)),
            Err(e) => {
                let legacy_name = legacy_table_file_name(dir, fd.get_number());
                match env.new_random_access_file(Path::new(&legacy_name), env_options) {
                    Ok(file) => {
                        warn!("{} not found, use legacy name {}", file_name, legacy_name);
                        Ok((file, legacy_name))
                    }
                    // 报告新文件名的错误
                    Err(_) => Err(e),
                }
            }
        }
    }

    fn open_table_reader(
        &self,
        env_options: &EnvOptions,
        icmp: &Arc<InternalKeyComparator>,
        fd: &FileDescriptor,
    ) -> Result<Arc<dyn TableReader>, Status> {
        record_tick(self.statistics(), Tickers::NoFileOpens);
        let env = &self.options.env;
        let start_micros = env.now_micros();

        let (file, file_name) = self.open_table_file(env_options, fd)?;
        if self.options.advise_random_on_open {
            file.hint(AccessPattern::Random);
        }
        let file_size = file.size()?;
        if file_size != fd.get_file_size() {
            return Err(Status::corruption(
                &format!(
                    "table file size mismatch: expected {}, actual {}",
                    fd.get_file_size(),
                    file_size
                ),
                Some(file_name.as_str()),
            ));
        }

        let reader = self.options.table_factory.new_table_reader(
            &self.options,
            env_options,
            icmp,
            file,
            file_size,
        )?;
        if let Some(statistics) = self.statistics() {
            statistics.record_table_open(env.now_micros().saturating_sub(start_micros));
        }
        debug!("opened table file {} ({} bytes)", file_name, file_size);
        Ok(reader)
    }

    fn table_iterator(
        &self,
        read_options: &ReadOptions,
        env_options: &EnvOptions,
        icmp: &Arc<InternalKeyComparator>,
        fd: &FileDescriptor,
        for_compaction: bool,
    ) -> Result<(IterWithCleanup<'static>, Option<TableHandle>), Status> {
        // fd 自带 reader 时不经过 cache，此时没有 pin
        let (reader, handle) = match &fd.table_reader {
            Some(reader) => (Arc::clone(reader), None),
            None => {
                let no_io = read_options.read_tier == ReadTier::BlockCacheTier;
                let handle = self.find_table(env_options, icmp, fd, no_io)?;
                (Arc::clone(&handle.reader), Some(handle))
            }
        };
        if for_compaction {
            reader.setup_for_compaction();
        }
        let mut iter = IterWithCleanup::new(reader.new_iterator(read_options));
        let pin = handle.clone();
        if let Some(handle) = handle {
            iter.register_cleanup(move || Self::release_handle(handle));
        }
        Ok((iter, pin))
    }

    /// 遍历 fd 对应的表。返回的迭代器持有一次 pin，析构时释放。
    ///
    /// 第二个返回值是给调用方的另一次 pin，可以用 `get_table_reader_from_handle` 取得迭代器
    /// 所在的 reader，用完后 release；fd 自带 reader 或出错时为 None，出错时迭代器的
    /// status() 是错误原因。
    pub fn new_iterator(
        &self,
        read_options: &ReadOptions,
        env_options: &EnvOptions,
        icmp: &Arc<InternalKeyComparator>,
        fd: &FileDescriptor,
        for_compaction: bool,
    ) -> (Box<dyn Iter>, Option<TableHandle>) {
        match self.table_iterator(read_options, env_options, icmp, fd, for_compaction) {
            Ok((iter, pin)) => (Box::new(iter), pin),
            Err(e) => (Box::new(new_error_iterator(e)), None),
        }
    }

    /// 同 new_iterator，迭代器分配在 arena 中。pin 在 box 丢弃时释放。
    pub fn new_iterator_in<'a>(
        &self,
        arena: &'a Arena,
        read_options: &ReadOptions,
        env_options: &EnvOptions,
        icmp: &Arc<InternalKeyComparator>,
        fd: &FileDescriptor,
        for_compaction: bool,
    ) -> (ArenaBox<'a, dyn Iter + 'a>, Option<TableHandle>) {
        match self.table_iterator(read_options, env_options, icmp, fd, for_compaction) {
            Ok((iter, pin)) => (into_arena_iter(arena.alloc_boxed(iter)), pin),
            Err(e) => (into_arena_iter(arena.alloc_boxed(new_error_iterator(e))), None),
        }
    }

    /// 点查。handle_result 对每个 user key 匹配的 entry 调用一次，返回 false 时停止；
    /// filter 没能排除 key 而又没有匹配时调用 mark_key_may_exist。
    pub fn get(
        &self,
        read_options: &ReadOptions,
        icmp: &Arc<InternalKeyComparator>,
        fd: &FileDescriptor,
        key: &Slice,
        handle_result: HandleResult,
        mark_key_may_exist: MarkKeyMayExist,
    ) -> Result<(), Status> {
        if let Some(reader) = &fd.table_reader {
            return reader.get(read_options, key, handle_result, mark_key_may_exist);
        }
        let no_io = read_options.read_tier == ReadTier::BlockCacheTier;
        let handle = match self.find_table(&self.env_options, icmp, fd, no_io) {
            Ok(handle) => handle,
            Err(e) if e.is_incomplete() && no_io => {
                // 表没有打开，无法判断 key 是否存在
                if let Some(mark) = mark_key_may_exist {
                    mark();
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let res = Self::get_table_reader_from_handle(&handle).get(
            read_options,
            key,
            handle_result,
            mark_key_may_exist,
        );
        Self::release_handle(handle);
        res
    }

    /// 已缓存时直接返回，不做 I/O；未缓存且 no_io 时返回 Incomplete
    pub fn get_table_properties(
        &self,
        env_options: &EnvOptions,
        icmp: &Arc<InternalKeyComparator>,
        fd: &FileDescriptor,
        no_io: bool,
    ) -> Result<Arc<TableProperties>, Status> {
        if let Some(reader) = &fd.table_reader {
            return Ok(reader.table_properties());
        }
        let handle = self.find_table(env_options, icmp, fd, no_io)?;
        let properties = Self::get_table_reader_from_handle(&handle).table_properties();
        Self::release_handle(handle);
        Ok(properties)
    }

    /// 从 cache 中移除文件号对应的 entry。已有的 handle 和迭代器不受影响，
    /// 之后的查找会重新打开文件。
    pub fn evict(cache: &TableReaderCache, file_number: u64) {
        debug!("evict table file #{}", file_number);
        cache.erase(&cache_key(file_number));
    }

    /// reader 只能在 handle 存活期间借用
    pub fn get_table_reader_from_handle(handle: &TableHandle) -> &dyn TableReader {
        handle.reader()
    }

    pub fn release_handle(handle: TableHandle) {
        drop(handle);
    }
}
