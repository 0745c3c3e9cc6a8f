use crate::obj::slice::Slice;
use crate::util::hash::hash;
use bytes::{BufMut, BytesMut};
use std::sync::Arc;

/// 近似成员判断。key_may_match 返回 false 时 key 一定不在集合中。
pub trait FilterPolicy: Send + Sync {
    fn name(&self) -> &'static str;
    /// 为 keys 生成 filter，追加到 dst
    fn create_filter(&self, keys: &[Slice], dst: &mut BytesMut);
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

pub struct BloomFilterPolicy {
    bits_per_key: usize,
    k: u8,
}

fn bloom_hash(key: &[u8]) -> u32 {
    hash(key, 0xbc9f1d34)
}

impl BloomFilterPolicy {
    pub fn new(bits_per_key: usize) -> BloomFilterPolicy {
        // k = bits_per_key * ln(2)，限制在 [1, 30]
        let k = ((bits_per_key as f64) * 0.69) as usize;
        BloomFilterPolicy {
            bits_per_key,
            k: k.clamp(1, 30) as u8,
        }
    }
}

pub fn new_bloom_filter_policy(bits_per_key: usize) -> Arc<dyn FilterPolicy> {
    Arc::new(BloomFilterPolicy::new(bits_per_key))
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &'static str {
        "leveldb.BuiltinBloomFilter2"
    }

    fn create_filter(&self, keys: &[Slice], dst: &mut BytesMut) {
        let mut bits = keys.len() * self.bits_per_key;
        // 键太少时误判率会很高，给一个下限
        if bits < 64 {
            bits = 64;
        }
        let bytes = bits.div_ceil(8);
        bits = bytes * 8;
        let init_size = dst.len();
        dst.resize(init_size + bytes, 0);
        dst.put_u8(self.k);
        let array = &mut dst[init_size..init_size + bytes];
        for key in keys {
            let mut h = bloom_hash(key.data());
            let delta = h.rotate_right(17);
            for _ in 0..self.k {
                let bit_pos = h as usize % bits;
                array[bit_pos / 8] |= 1 << (bit_pos % 8);
                h = h.wrapping_add(delta);
            }
        }
    }

    fn key_may_match(&self, key: &[u8], bloom_filter: &[u8]) -> bool {
        let len = bloom_filter.len();
        if len < 2 {
            return false;
        }
        let bits = (len - 1) * 8;
        let k = bloom_filter[len - 1];
        if k > 30 {
            // 留给以后的编码方式，按可能存在处理
            return true;
        }
        let mut h = bloom_hash(key);
        let delta = h.rotate_right(17);
        for _ in 0..k {
            let bit_pos = h as usize % bits;
            if bloom_filter[bit_pos / 8] & (1 << (bit_pos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}
