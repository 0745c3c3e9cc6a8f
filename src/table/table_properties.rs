use crate::obj::slice::Slice;
use crate::obj::status::Status;
use crate::table::block::Block;
use crate::table::block_builder::BlockBuilder;
use crate::table::format::BlockContents;
use crate::util::bytewise_comparator_impl::byte_wise_comparator;
use crate::util::coding::{get_varint64, put_varint64};
use bytes::BytesMut;
use std::collections::BTreeMap;

pub const K_PROPERTIES_BLOCK: &str = "table.properties";

const K_DATA_SIZE: &str = "table.data.size";
const K_FILTER_POLICY: &str = "table.filter.policy";
const K_FILTER_SIZE: &str = "table.filter.size";
const K_INDEX_SIZE: &str = "table.index.size";
const K_NUM_DATA_BLOCKS: &str = "table.num.data.blocks";
const K_NUM_ENTRIES: &str = "table.num.entries";
const K_RAW_KEY_SIZE: &str = "table.raw.key.size";
const K_RAW_VALUE_SIZE: &str = "table.raw.value.size";

/// 表级别的统计信息，写在 properties meta block 里
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableProperties {
    pub data_size: u64,
    pub index_size: u64,
    pub filter_size: u64,
    pub raw_key_size: u64,
    pub raw_value_size: u64,
    pub num_data_blocks: u64,
    pub num_entries: u64,
    /// 没有 filter 时为空串
    pub filter_policy_name: String,
}

impl TableProperties {
    /// 编码成一个 block，key 按字节序排列
    pub fn encode(&self) -> Slice {
        let mut props: BTreeMap<&'static str, BytesMut> = BTreeMap::new();
        let mut add = |name: &'static str, value: u64| {
            let mut buf = BytesMut::new();
            put_varint64(&mut buf, value);
            props.insert(name, buf);
        };
        add(K_DATA_SIZE, self.data_size);
        add(K_FILTER_SIZE, self.filter_size);
        add(K_INDEX_SIZE, self.index_size);
        add(K_NUM_DATA_BLOCKS, self.num_data_blocks);
        add(K_NUM_ENTRIES, self.num_entries);
        add(K_RAW_KEY_SIZE, self.raw_key_size);
        add(K_RAW_VALUE_SIZE, self.raw_value_size);
        if !self.filter_policy_name.is_empty() {
            props.insert(
                K_FILTER_POLICY,
                BytesMut::from(self.filter_policy_name.as_bytes()),
            );
        }

        let mut builder = BlockBuilder::new(byte_wise_comparator(), 1);
        for (name, value) in props.iter() {
            builder.add(&Slice::new_from_static(*name), &Slice::new_from_mut(value));
        }
        builder.finish()
    }

    pub fn decode(contents: BlockContents) -> Result<TableProperties, Status> {
        let block = Block::new(contents);
        let mut iter = block.new_iterator(byte_wise_comparator());
        let mut props = TableProperties::default();
        iter.seek_to_first();
        while iter.valid() {
            let key = iter.key();
            let mut value = iter.value();
            if key.data() == K_FILTER_POLICY.as_bytes() {
                props.filter_policy_name = value.to_string();
                iter.next();
                continue;
            }
            let field = match std::str::from_utf8(key.data()).unwrap_or("") {
                K_DATA_SIZE => &mut props.data_size,
                K_FILTER_SIZE => &mut props.filter_size,
                K_INDEX_SIZE => &mut props.index_size,
                K_NUM_DATA_BLOCKS => &mut props.num_data_blocks,
                K_NUM_ENTRIES => &mut props.num_entries,
                K_RAW_KEY_SIZE => &mut props.raw_key_size,
                K_RAW_VALUE_SIZE => &mut props.raw_value_size,
                // 不认识的属性直接跳过
                _ => {
                    iter.next();
                    continue;
                }
            };
            if !get_varint64(&mut value, field) {
                return Err(Status::corruption(
                    "bad table property",
                    Some(key.to_string().as_str()),
                ));
            }
            iter.next();
        }
        let status = iter.status();
        if !status.is_ok() {
            return Err(status);
        }
        Ok(props)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let props = TableProperties {
            data_size: 4096,
            index_size: 120,
            filter_size: 33,
            raw_key_size: 1 << 40,
            raw_value_size: 77,
            num_data_blocks: 2,
            num_entries: 300,
            filter_policy_name: "leveldb.BuiltinBloomFilter2".to_string(),
        };
        let encoded = props.encode();
        let decoded = TableProperties::decode(BlockContents {
            data: encoded.data_bytes,
        })
        .unwrap();
        assert_eq!(props, decoded);
    }

    #[test]
    fn test_bad_property_value() {
        let mut builder = BlockBuilder::new(byte_wise_comparator(), 1);
        builder.add(
            &Slice::new_from_static(K_NUM_ENTRIES),
            &Slice::new_from_array(&[0xff]),
        );
        let err = TableProperties::decode(BlockContents {
            data: builder.finish().data_bytes,
        })
        .unwrap_err();
        assert!(err.is_corruption());
    }
}
