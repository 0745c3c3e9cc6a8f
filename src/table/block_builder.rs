use crate::obj::slice::Slice;
use crate::util::coding::{put_fixed32, put_varint32};
use crate::util::comparator::Comparator;
use bytes::{BufMut, BytesMut};
use std::cmp::{min, Ordering};
use std::mem::size_of;
use std::sync::Arc;

/// 生成带前缀压缩和重启点的 block，格式见 `Block`
pub struct BlockBuilder {
    comparator: Arc<dyn Comparator>,
    block_restart_interval: u32,
    buffer_: BytesMut,
    restarts_: Vec<u32>,
    counter_: u32, //上一个restart index之后，存储了多少个kv
    finished: bool,
    last_key: BytesMut,
}

impl BlockBuilder {
    pub fn new(comparator: Arc<dyn Comparator>, block_restart_interval: u32) -> BlockBuilder {
        assert!(block_restart_interval >= 1);
        BlockBuilder {
            comparator,
            block_restart_interval,
            buffer_: BytesMut::new(),
            restarts_: vec![0],
            counter_: 0,
            finished: false,
            last_key: BytesMut::new(),
        }
    }

    pub fn reset(&mut self) {
        self.buffer_.clear();
        self.restarts_.clear();
        self.restarts_.push(0);
        self.counter_ = 0;
        self.finished = false;
        self.last_key.clear();
    }

    /// key 必须严格大于之前加入的所有 key
    pub fn add(&mut self, key: &Slice, value: &Slice) {
        debug_assert!(!self.finished);
        debug_assert!(self.counter_ <= self.block_restart_interval);
        debug_assert!(
            self.buffer_.is_empty()
                || self
                    .comparator
                    .compare(key, &Slice::new_from_mut(&self.last_key))
                    == Ordering::Greater
        );
        let mut shared = 0;
        if self.counter_ < self.block_restart_interval {
            let min_len = min(key.len(), self.last_key.len());
            while shared < min_len && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            self.restarts_.push(self.buffer_.len() as u32);
            self.counter_ = 0;
        }
        let non_shared = key.len() - shared;
        put_varint32(&mut self.buffer_, shared as u32);
        put_varint32(&mut self.buffer_, non_shared as u32);
        put_varint32(&mut self.buffer_, value.size() as u32);
        self.buffer_.put_slice(&key.data()[shared..]);
        self.buffer_.put_slice(value.data());
        self.last_key.truncate(shared);
        self.last_key.put_slice(&key.data()[shared..]);
        self.counter_ += 1;
    }

    pub fn current_size_estimate(&self) -> usize {
        self.buffer_.len() + self.restarts_.len() * size_of::<u32>() + size_of::<u32>()
    }

    /// 追加重启点数组，返回整个 block 的内容。reset 之前不能再 add。
    pub fn finish(&mut self) -> Slice {
        for restart in self.restarts_.iter() {
            put_fixed32(&mut self.buffer_, *restart);
        }
        put_fixed32(&mut self.buffer_, self.restarts_.len() as u32);
        self.finished = true;
        Slice::new_from_mut(&self.buffer_)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer_.is_empty()
    }
}
