use crate::obj::slice::Slice;
use crate::obj::status::Status;
use crate::table::format::BlockContents;
use crate::table::iterator::{new_empty_iterator, new_error_iterator, Iter};
use crate::util::coding::{decode_fixed32, get_varint32ptr};
use crate::util::comparator::Comparator;
use bytes::{BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use std::mem::size_of;
use std::sync::Arc;

/// [Keys and Values (data part)] [Restart Points] [num_restarts]
///
/// 数据部分每条记录：
/// ```text
/// +--------+------------+--------------+----------------+-------+
/// | shared | non_shared | value_length | non_shared key | value |
/// +--------+------------+--------------+----------------+-------+
/// ```
/// 重启点记录 shared == 0，存完整的 key。
#[derive(Debug, Clone)]
pub struct Block {
    data: Bytes,
    restart_offset: usize,
}

impl Block {
    pub fn new(contents: BlockContents) -> Block {
        let mut data = contents.data;
        let mut restart_offset = 0;
        if data.len() < size_of::<u32>() {
            data.clear();
        } else {
            let num_restarts = decode_fixed32(&data[data.len() - size_of::<u32>()..]) as usize;
            let max_restarts_allowed = (data.len() - size_of::<u32>()) / size_of::<u32>();
            if num_restarts > max_restarts_allowed {
                // 长度对不上，按损坏处理
                data.clear();
            } else {
                restart_offset = data.len() - (1 + num_restarts) * size_of::<u32>();
            }
        }
        Block {
            data,
            restart_offset,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn num_restarts(&self) -> u32 {
        debug_assert!(self.data.len() >= size_of::<u32>());
        decode_fixed32(&self.data[self.data.len() - size_of::<u32>()..])
    }

    pub fn new_iterator(&self, comparator: Arc<dyn Comparator>) -> Box<dyn Iter> {
        if self.data.len() < size_of::<u32>() {
            return Box::new(new_error_iterator(Status::corruption(
                "bad block contents",
                None,
            )));
        }
        let num_restarts = self.num_restarts();
        if num_restarts == 0 {
            return Box::new(new_empty_iterator());
        }
        Box::new(BlockIterator::new(
            comparator,
            self.data.clone(),
            self.restart_offset as u32,
            num_restarts,
        ))
    }
}

#[inline]
fn decode_entry<'a>(
    input: &'a [u8],
    shared: &mut u32,
    non_shared: &mut u32,
    value_length: &mut u32,
) -> Option<&'a [u8]> {
    if input.len() < 3 {
        return None;
    }
    *shared = input[0] as u32;
    *non_shared = input[1] as u32;
    *value_length = input[2] as u32;

    let rest = if (*shared | *non_shared | *value_length) < 128 {
        // 三个值都只占一个字节
        &input[3..]
    } else {
        let p = get_varint32ptr(input, shared)?;
        let p = get_varint32ptr(p, non_shared)?;
        get_varint32ptr(p, value_length)?
    };
    if rest.len() < (*non_shared as usize + *value_length as usize) {
        return None;
    }
    Some(rest)
}

/// current_: 当前记录在 data 中的偏移
///
/// restart_index_: current_ 所在区间的重启点下标
///
/// key_/value_: 当前记录的完整 key 和 value 在 data 中的位置
struct BlockIterator {
    comparator_: Arc<dyn Comparator>,
    data_: Bytes,
    restarts_: u32,
    num_restarts_: u32,
    current_: u32,
    restart_index_: u32,
    key_: BytesMut,
    value_offset_: u32,
    value_len_: u32,
    status: Status,
}

impl BlockIterator {
    fn new(
        comparator: Arc<dyn Comparator>,
        data: Bytes,
        restarts: u32,
        num_restarts: u32,
    ) -> BlockIterator {
        debug_assert!(num_restarts > 0);
        BlockIterator {
            comparator_: comparator,
            data_: data,
            restarts_: restarts,
            num_restarts_: num_restarts,
            current_: restarts,
            restart_index_: num_restarts,
            key_: BytesMut::new(),
            value_offset_: 0,
            value_len_: 0,
            status: Status::ok(),
        }
    }

    fn compare(&self, a: &Slice, b: &Slice) -> Ordering {
        self.comparator_.compare(a, b)
    }

    #[inline]
    fn next_entry_offset(&self) -> u32 {
        self.value_offset_ + self.value_len_
    }

    fn get_restart_point(&self, index: u32) -> u32 {
        debug_assert!(index < self.num_restarts_);
        let pos = self.restarts_ as usize + index as usize * size_of::<u32>();
        decode_fixed32(&self.data_[pos..])
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key_.clear();
        self.restart_index_ = index;
        // parse_next_key 从 value 之后开始解析
        self.value_offset_ = self.get_restart_point(index);
        self.value_len_ = 0;
    }

    fn corruption_error(&mut self) {
        self.current_ = self.restarts_;
        self.restart_index_ = self.num_restarts_;
        self.status = Status::corruption("bad entry in block", None);
        self.key_.clear();
        self.value_len_ = 0;
    }

    fn parse_next_key(&mut self) -> bool {
        self.current_ = self.next_entry_offset();
        let p = self.current_ as usize;
        let limit = self.restarts_ as usize;
        if p >= limit {
            // 没有更多记录，标记为无效
            self.current_ = self.restarts_;
            self.restart_index_ = self.num_restarts_;
            return false;
        }
        let mut shared = 0;
        let mut non_shared = 0;
        let mut value_length = 0;
        let entry = decode_entry(
            &self.data_[p..limit],
            &mut shared,
            &mut non_shared,
            &mut value_length,
        );
        let rest_len = match entry {
            Some(rest) if self.key_.len() >= shared as usize => rest.len(),
            _ => {
                self.corruption_error();
                return false;
            }
        };
        let key_offset = limit - rest_len;
        self.key_.truncate(shared as usize);
        self.key_
            .put_slice(&self.data_[key_offset..key_offset + non_shared as usize]);
        self.value_offset_ = (key_offset + non_shared as usize) as u32;
        self.value_len_ = value_length;
        while self.restart_index_ + 1 < self.num_restarts_
            && self.get_restart_point(self.restart_index_ + 1) < self.current_
        {
            self.restart_index_ += 1;
        }
        true
    }

    fn current_key(&self) -> Slice {
        Slice::new_from_mut(&self.key_)
    }
}

impl Iter for BlockIterator {
    fn valid(&self) -> bool {
        self.current_ < self.restarts_
    }

    fn seek_to_first(&mut self) {
        self.seek_to_restart_point(0);
        self.parse_next_key();
    }

    fn seek_to_last(&mut self) {
        self.seek_to_restart_point(self.num_restarts_ - 1);
        while self.parse_next_key() && self.next_entry_offset() < self.restarts_ {}
    }

    fn seek(&mut self, target: &Slice) {
        // 在重启点上二分，找到最后一个 key < target 的重启点
        let mut left = 0;
        let mut right = self.num_restarts_ - 1;
        let mut current_key_compare = Ordering::Equal;
        if self.valid() {
            // 已经有位置时，用当前 key 缩小二分范围
            current_key_compare = self.compare(&self.current_key(), target);
            match current_key_compare {
                Ordering::Less => left = self.restart_index_,
                Ordering::Greater => right = self.restart_index_,
                Ordering::Equal => return,
            }
        }

        while left < right {
            let mid = (left + right + 1) / 2;
            let region_offset = self.get_restart_point(mid) as usize;
            let limit = self.restarts_ as usize;
            let mut shared = 0u32;
            let mut non_shared = 0u32;
            let mut value_length = 0u32;
            let entry = decode_entry(
                &self.data_[region_offset..limit],
                &mut shared,
                &mut non_shared,
                &mut value_length,
            );
            let key_offset = match entry {
                Some(rest) if shared == 0 => limit - rest.len(),
                _ => {
                    self.corruption_error();
                    return;
                }
            };
            let mid_key =
                Slice::new(self.data_.slice(key_offset..key_offset + non_shared as usize));
            if self.compare(&mid_key, target) == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        // 目标就在当前区间且当前位置在它之前时，不必回到重启点
        let skip_seek = left == self.restart_index_ && current_key_compare == Ordering::Less;
        if !skip_seek {
            self.seek_to_restart_point(left);
        }
        loop {
            if !self.parse_next_key() {
                return;
            }
            if self.compare(&self.current_key(), target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_key();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        // 回退到 current_ 之前的重启点，再向前扫描
        let original = self.current_;
        while self.get_restart_point(self.restart_index_) >= original {
            if self.restart_index_ == 0 {
                self.current_ = self.restarts_;
                self.restart_index_ = self.num_restarts_;
                return;
            }
            self.restart_index_ -= 1;
        }
        self.seek_to_restart_point(self.restart_index_);
        while self.parse_next_key() && self.next_entry_offset() < original {}
    }

    fn key(&self) -> Slice {
        debug_assert!(self.valid());
        self.current_key()
    }

    fn value(&self) -> Slice {
        debug_assert!(self.valid());
        let start = self.value_offset_ as usize;
        Slice::new(self.data_.slice(start..start + self.value_len_ as usize))
    }

    fn status(&self) -> Status {
        self.status.clone()
    }
}
