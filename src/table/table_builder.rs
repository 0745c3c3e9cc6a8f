use crate::db::dbformat::{extract_user_key, InternalKeyComparator};
use crate::obj::options::{CompressionType, Options};
use crate::obj::slice::Slice;
use crate::obj::status::Status;
use crate::table::block_builder::BlockBuilder;
use crate::table::filter_block::FilterBlockBuilder;
use crate::table::format::{BlockHandle, Footer, K_BLOCK_TRAILER_SIZE};
use crate::table::table_properties::{TableProperties, K_PROPERTIES_BLOCK};
use crate::util::bytewise_comparator_impl::byte_wise_comparator;
use crate::util::coding::put_fixed32;
use crate::util::comparator::Comparator;
use crate::util::crc32c;
use crate::util::filter_policy::FilterPolicy;
use crate::util::writable_file::WritableFile;
use bytes::{BufMut, BytesMut};
use std::cmp::Ordering;
use std::sync::Arc;

/// 把有序的 internal key/value 写成一个表文件
///
/// ```text
/// [data block 1] ... [data block N] [filter block] [properties block] [meta_index block] [index block] [footer]
/// ```
/// meta_index 记录 "filter.<policy>" 和 "table.properties" 的位置；
/// index 的每个 key 是相邻两个 data block 之间的分隔 key，value 是 BlockHandle。
pub struct TableBuilder {
    comparator: Arc<dyn Comparator>,
    block_size: usize,
    compression: CompressionType,
    filter_policy: Option<Arc<dyn FilterPolicy>>,
    file: Box<dyn WritableFile>,
    offset: u64,
    status: Result<(), Status>,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: BytesMut,
    closed: bool,
    filter_block: Option<FilterBlockBuilder>,
    // 一个 data block 写出后，要等看到下一个 key 才能算出它的分隔 key
    pending_index_entry: bool,
    pending_handle: BlockHandle,
    props: TableProperties,
    compressed_output: Vec<u8>,
}

impl TableBuilder {
    pub fn new(
        options: &Options,
        icmp: &Arc<InternalKeyComparator>,
        file: Box<dyn WritableFile>,
    ) -> TableBuilder {
        let comparator: Arc<dyn Comparator> = icmp.clone();
        let mut filter_block = options
            .filter_policy
            .as_ref()
            .map(|policy| FilterBlockBuilder::new(policy.clone()));
        if let Some(filter_block) = filter_block.as_mut() {
            filter_block.start_block(0);
        }
        TableBuilder {
            comparator: comparator.clone(),
            block_size: options.block_size,
            compression: options.compression,
            filter_policy: options.filter_policy.clone(),
            file,
            offset: 0,
            status: Ok(()),
            data_block: BlockBuilder::new(comparator.clone(), options.block_restart_interval),
            index_block: BlockBuilder::new(comparator, 1),
            last_key: BytesMut::new(),
            closed: false,
            filter_block,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
            props: TableProperties::default(),
            compressed_output: Vec::new(),
        }
    }

    /// key 必须大于之前加入的所有 key
    pub fn add(&mut self, key: &Slice, value: &Slice) -> Result<(), Status> {
        debug_assert!(!self.closed);
        self.status.clone()?;
        if self.props.num_entries > 0
            && self
                .comparator
                .compare(key, &Slice::new_from_mut(&self.last_key))
                != Ordering::Greater
        {
            return Err(Status::invalid_argument(
                "keys must be added in strictly increasing order",
                None,
            ));
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            self.comparator
                .find_shortest_separator(&mut self.last_key, key);
            let mut handle_encoding = BytesMut::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(
                &Slice::new_from_mut(&self.last_key),
                &Slice::new_bytes_mut(handle_encoding),
            );
            self.pending_index_entry = false;
        }

        if let Some(filter_block) = self.filter_block.as_mut() {
            filter_block.add_key(extract_user_key(key).data());
        }

        self.last_key.clear();
        self.last_key.put_slice(key.data());
        self.props.num_entries += 1;
        self.props.raw_key_size += key.len() as u64;
        self.props.raw_value_size += value.len() as u64;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// 把缓冲的 kv 写成一个 data block
    pub fn flush(&mut self) -> Result<(), Status> {
        debug_assert!(!self.closed);
        self.status.clone()?;
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);
        let contents = self.data_block.finish();
        self.data_block.reset();
        self.pending_handle = self.write_block(&contents, self.compression)?;
        self.pending_index_entry = true;
        self.props.num_data_blocks += 1;
        let res = self.file.flush();
        self.record(res)?;
        if let Some(filter_block) = self.filter_block.as_mut() {
            filter_block.start_block(self.offset);
        }
        Ok(())
    }

    fn write_block(
        &mut self,
        raw: &Slice,
        compression: CompressionType,
    ) -> Result<BlockHandle, Status> {
        let block_type = match compression {
            CompressionType::None => CompressionType::None,
            CompressionType::Snappy => {
                self.compressed_output
                    .resize(snap::raw::max_compress_len(raw.len()), 0);
                match snap::raw::Encoder::new().compress(raw.data(), &mut self.compressed_output) {
                    // 压缩率不足 12.5% 时存原始数据
                    Ok(n) if n < raw.len() - raw.len() / 8 => {
                        self.compressed_output.truncate(n);
                        CompressionType::Snappy
                    }
                    _ => CompressionType::None,
                }
            }
        };
        let contents = match block_type {
            CompressionType::Snappy => Slice::new_from_vec(std::mem::take(&mut self.compressed_output)),
            CompressionType::None => raw.clone(),
        };
        self.write_raw_block(&contents, block_type)
    }

    fn write_raw_block(
        &mut self,
        contents: &Slice,
        block_type: CompressionType,
    ) -> Result<BlockHandle, Status> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        let res = self.file.append(contents.data());
        self.record(res)?;

        let mut trailer = BytesMut::with_capacity(K_BLOCK_TRAILER_SIZE);
        trailer.put_u8(block_type as u8);
        let crc = crc32c::extend(crc32c::value(contents.data()), &[block_type as u8]);
        put_fixed32(&mut trailer, crc32c::mask(crc));
        let res = self.file.append(&trailer);
        self.record(res)?;

        self.offset += (contents.len() + K_BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }

    fn record(&mut self, res: Result<(), Status>) -> Result<(), Status> {
        if let Err(e) = &res {
            if self.status.is_ok() {
                self.status = Err(e.clone());
            }
        }
        res
    }

    /// 写完剩余数据和 meta 信息，返回文件大小。之后不能再 add。
    pub fn finish(&mut self) -> Result<u64, Status> {
        self.flush()?;
        debug_assert!(!self.closed);
        self.closed = true;
        self.props.data_size = self.offset;

        let mut meta_index_block = BlockBuilder::new(byte_wise_comparator(), 1);

        if let Some(mut filter_block) = self.filter_block.take() {
            let contents = filter_block.finish();
            self.props.filter_size = contents.len() as u64;
            let handle = self.write_raw_block(&contents, CompressionType::None)?;
            let mut handle_encoding = BytesMut::new();
            handle.encode_to(&mut handle_encoding);
            let name = match &self.filter_policy {
                Some(policy) => policy.name(),
                None => "",
            };
            self.props.filter_policy_name = name.to_string();
            meta_index_block.add(
                &Slice::new_from_string(format!("filter.{}", name)),
                &Slice::new_bytes_mut(handle_encoding),
            );
        }

        if self.pending_index_entry {
            self.comparator.find_short_successor(&mut self.last_key);
            let mut handle_encoding = BytesMut::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(
                &Slice::new_from_mut(&self.last_key),
                &Slice::new_bytes_mut(handle_encoding),
            );
            self.pending_index_entry = false;
        }
        self.props.index_size =
            (self.index_block.current_size_estimate() + K_BLOCK_TRAILER_SIZE) as u64;

        let properties_contents = self.props.encode();
        let properties_handle = self.write_block(&properties_contents, self.compression)?;
        let mut handle_encoding = BytesMut::new();
        properties_handle.encode_to(&mut handle_encoding);
        meta_index_block.add(
            &Slice::new_from_static(K_PROPERTIES_BLOCK),
            &Slice::new_bytes_mut(handle_encoding),
        );

        let meta_index_contents = meta_index_block.finish();
        let meta_index_handle = self.write_block(&meta_index_contents, self.compression)?;

        let index_contents = self.index_block.finish();
        let index_handle = self.write_block(&index_contents, self.compression)?;

        let mut footer_encoding = BytesMut::new();
        Footer::new(meta_index_handle, index_handle).encode_to(&mut footer_encoding);
        let res = self.file.append(&footer_encoding);
        self.record(res)?;
        self.offset += footer_encoding.len() as u64;
        let res = self.file.sync();
        self.record(res)?;
        Ok(self.offset)
    }

    /// 放弃这个文件，之后不能再 add
    pub fn abandon(&mut self) {
        debug_assert!(!self.closed);
        self.closed = true;
    }

    pub fn num_entries(&self) -> u64 {
        self.props.num_entries
    }

    /// 目前为止写出的字节数；finish 之后是最终的文件大小
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}
