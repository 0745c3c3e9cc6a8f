use crate::db::dbformat::{InternalKeyComparator, ParsedInternalKey};
use crate::obj::options::{EnvOptions, Options, ReadOptions};
use crate::obj::slice::Slice;
use crate::obj::status::Status;
use crate::table::iterator::Iter;
use crate::table::table::Table;
use crate::table::table_builder::TableBuilder;
use crate::table::table_properties::TableProperties;
use crate::util::random_access_file::RandomAccessFile;
use crate::util::writable_file::WritableFile;
use std::sync::Arc;

/// 点查时每个匹配的 entry 调用一次，返回 false 表示不再需要后面的 entry
pub type HandleResult<'a> = &'a mut dyn FnMut(&ParsedInternalKey, &Slice) -> bool;

/// filter 没能排除 key、但也没找到匹配的 entry 时调用
pub type MarkKeyMayExist<'a> = Option<&'a mut dyn FnMut()>;

/// 一个已经打开、解析完 footer 和 index 的表文件。构造后不再修改，可被多个线程同时读。
pub trait TableReader: Send + Sync {
    /// 遍历整个表。迭代器持有 reader 的引用，reader 至少活到迭代器析构。
    fn new_iterator(self: Arc<Self>, read_options: &ReadOptions) -> Box<dyn Iter>;

    /// 从第一个 >= key 的 entry 开始，对 user key 与 key 相同的 entry 依次调用 handle_result。
    /// key 是 internal key。
    fn get(
        &self,
        read_options: &ReadOptions,
        key: &Slice,
        handle_result: HandleResult,
        mark_key_may_exist: MarkKeyMayExist,
    ) -> Result<(), Status>;

    fn table_properties(&self) -> Arc<TableProperties>;

    /// 常驻内存的大小：index block 和 filter
    fn approximate_memory_usage(&self) -> usize;

    /// key 在文件中的大致偏移
    fn approximate_offset_of(&self, key: &Slice) -> u64;

    /// 接下来的读取来自 compaction，调整文件的访问模式
    fn setup_for_compaction(&self);
}

/// 表格式的读写入口
pub trait TableFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn new_table_reader(
        &self,
        options: &Options,
        env_options: &EnvOptions,
        icmp: &Arc<InternalKeyComparator>,
        file: Box<dyn RandomAccessFile>,
        file_size: u64,
    ) -> Result<Arc<dyn TableReader>, Status>;

    fn new_table_builder(
        &self,
        options: &Options,
        icmp: &Arc<InternalKeyComparator>,
        file: Box<dyn WritableFile>,
    ) -> TableBuilder;
}

#[derive(Debug, Default)]
pub struct BlockBasedTableFactory;

impl TableFactory for BlockBasedTableFactory {
    fn name(&self) -> &'static str {
        "BlockBasedTable"
    }

    fn new_table_reader(
        &self,
        options: &Options,
        env_options: &EnvOptions,
        icmp: &Arc<InternalKeyComparator>,
        file: Box<dyn RandomAccessFile>,
        file_size: u64,
    ) -> Result<Arc<dyn TableReader>, Status> {
        let table = Table::open(options, env_options, icmp, file, file_size)?;
        Ok(table)
    }

    fn new_table_builder(
        &self,
        options: &Options,
        icmp: &Arc<InternalKeyComparator>,
        file: Box<dyn WritableFile>,
    ) -> TableBuilder {
        TableBuilder::new(options, icmp, file)
    }
}
