use crate::table::table_reader::{BlockBasedTableFactory, TableFactory};
use crate::util::bytewise_comparator_impl::byte_wise_comparator;
use crate::util::comparator::Comparator;
use crate::util::env::{default_env, Env};
use crate::util::filter_policy::FilterPolicy;
use crate::util::random_access_file::AccessPattern;
use crate::util::statistics::Statistics;
use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt;
use std::sync::Arc;

#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    None = 0x0,
    Snappy = 0x1,
}

/// 一个数据目录；`FileDescriptor::path_id` 是它在 `Options::db_paths` 中的下标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbPath {
    pub path: String,
    pub target_size: u64,
}

impl DbPath {
    pub fn new(path: &str, target_size: u64) -> DbPath {
        DbPath {
            path: path.to_string(),
            target_size,
        }
    }
}

/// 引擎级配置，整个实例共享一份 `Arc<Options>`
#[derive(Clone)]
pub struct Options {
    pub comparator: Arc<dyn Comparator>,
    pub env: Arc<dyn Env>,
    pub table_factory: Arc<dyn TableFactory>,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    /// 为空时表文件放在 db_name 目录下
    pub db_paths: Vec<DbPath>,
    /// table cache 容量 = max_open_files - K_NUM_NON_TABLE_CACHE_FILES
    pub max_open_files: usize,
    pub table_cache_num_shard_bits: u32,
    pub block_size: usize,
    pub block_restart_interval: u32,
    pub compression: CompressionType,
    pub paranoid_checks: bool,
    pub advise_random_on_open: bool,
    pub statistics: Option<Arc<Statistics>>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            comparator: byte_wise_comparator(),
            env: default_env(),
            table_factory: Arc::new(BlockBasedTableFactory::default()),
            filter_policy: None,
            db_paths: Vec::new(),
            max_open_files: 1000,
            table_cache_num_shard_bits: 4,
            block_size: 4096,
            block_restart_interval: 16,
            compression: CompressionType::Snappy,
            paranoid_checks: false,
            advise_random_on_open: true,
            statistics: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("comparator", &self.comparator.name())
            .field(
                "filter_policy",
                &self.filter_policy.as_ref().map(|p| p.name()),
            )
            .field("db_paths", &self.db_paths)
            .field("max_open_files", &self.max_open_files)
            .field("block_size", &self.block_size)
            .field("compression", &self.compression)
            .field("paranoid_checks", &self.paranoid_checks)
            .finish()
    }
}

/// 传给 Env 的 I/O 提示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvOptions {
    pub use_mmap_reads: bool,
    /// compaction 读表时对文件设置的访问模式
    pub compaction_access_pattern: AccessPattern,
}

impl Default for EnvOptions {
    fn default() -> Self {
        EnvOptions {
            use_mmap_reads: false,
            compaction_access_pattern: AccessPattern::Sequential,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTier {
    /// 允许读盘
    ReadAll,
    /// 只读已缓存的数据，缺失时返回 Incomplete
    BlockCacheTier,
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub verify_checksums: bool,
    pub read_tier: ReadTier,
}

impl ReadOptions {
    pub fn new() -> ReadOptions {
        ReadOptions {
            verify_checksums: false,
            read_tier: ReadTier::ReadAll,
        }
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions::new()
    }
}
