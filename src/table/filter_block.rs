use crate::obj::slice::Slice;
use crate::util::coding::{decode_fixed32, put_fixed32};
use crate::util::filter_policy::FilterPolicy;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;

// 每 2KB 的数据生成一个 filter
const K_FILTER_BASE_LG: u8 = 11;
const K_FILTER_BASE: u64 = 1 << K_FILTER_BASE_LG;

/// filter block 布局：
/// ```text
/// [filter 0] [filter 1] ... [offset of filter 0 .. n-1 (fixed32)] [array offset (fixed32)] [base_lg]
/// ```
/// 第 i 个 filter 覆盖文件偏移在 [i * base, (i + 1) * base) 内开始的 data block。
pub struct FilterBlockBuilder {
    policy_: Arc<dyn FilterPolicy>,
    keys_: BytesMut,
    start_: Vec<usize>,
    result: BytesMut,
    tmp_keys: Vec<Slice>,
    filter_offsets_: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> FilterBlockBuilder {
        FilterBlockBuilder {
            policy_: policy,
            keys_: BytesMut::new(),
            start_: vec![],
            result: BytesMut::new(),
            tmp_keys: vec![],
            filter_offsets_: vec![],
        }
    }

    fn generate_filter(&mut self) {
        let num_keys = self.start_.len();
        if num_keys == 0 {
            // 没有 key 的区间，filter 为空
            self.filter_offsets_.push(self.result.len() as u32);
            return;
        }
        self.start_.push(self.keys_.len());
        let keys = self.keys_.split().freeze();
        self.tmp_keys.clear();
        self.tmp_keys.reserve(num_keys);
        for i in 0..num_keys {
            self.tmp_keys
                .push(Slice::new(keys.slice(self.start_[i]..self.start_[i + 1])));
        }
        self.filter_offsets_.push(self.result.len() as u32);
        self.policy_.create_filter(&self.tmp_keys, &mut self.result);
        self.tmp_keys.clear();
        self.start_.clear();
    }

    /// 开始一个新的 data block，之前加入的 key 属于更早的区间
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset / K_FILTER_BASE;
        debug_assert!(filter_index >= self.filter_offsets_.len() as u64);
        while filter_index > self.filter_offsets_.len() as u64 {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.start_.push(self.keys_.len());
        self.keys_.put_slice(key);
    }

    pub fn finish(&mut self) -> Slice {
        if !self.start_.is_empty() {
            self.generate_filter();
        }
        let array_offset = self.result.len() as u32;
        for offset in self.filter_offsets_.iter() {
            put_fixed32(&mut self.result, *offset);
        }
        put_fixed32(&mut self.result, array_offset);
        self.result.put_u8(K_FILTER_BASE_LG);
        Slice::new_from_mut(&self.result)
    }
}

pub struct FilterBlockReader {
    policy_: Arc<dyn FilterPolicy>,
    data: Bytes,
    offset_: usize, // offset 数组在 data 中的起始位置
    num_: usize,    // 一共多少个 filter
    base_lg_: u8,
}

impl FilterBlockReader {
    pub fn new(policy: Arc<dyn FilterPolicy>, contents: Bytes) -> FilterBlockReader {
        let mut res = FilterBlockReader {
            policy_: policy,
            data: Bytes::new(),
            offset_: 0,
            num_: 0,
            base_lg_: 0,
        };
        let n = contents.len();
        if n < 5 {
            return res;
        }
        res.base_lg_ = contents[n - 1];
        let last_word = decode_fixed32(&contents[n - 5..]) as usize;
        if last_word > n - 5 {
            return res;
        }
        res.offset_ = last_word;
        res.num_ = (n - 5 - last_word) / 4;
        res.data = contents;
        res
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 返回 false 时 key 一定不在 block_offset 开始的 data block 中
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg_) as usize;
        if index < self.num_ {
            let start = decode_fixed32(&self.data[self.offset_ + index * 4..]) as usize;
            let limit = decode_fixed32(&self.data[self.offset_ + index * 4 + 4..]) as usize;
            if start <= limit && limit <= self.offset_ {
                return self.policy_.key_may_match(key, &self.data[start..limit]);
            } else if start == limit {
                // 空 filter 不匹配任何 key
                return false;
            }
        }
        // 出错时当作可能存在
        true
    }
}
