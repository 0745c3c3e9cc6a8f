use crate::obj::slice::Slice;
use bytes::{BufMut, BytesMut};
use rand::Rng;

/// 每次运行不同的种子，失败时把种子打印出来以便复现
#[inline]
pub fn random_seed() -> u64 {
    rand::rng().random()
}

/// 可打印字符组成的随机串
pub fn random_string<R: Rng>(rnd: &mut R, len: usize, dst: &mut BytesMut) -> Slice {
    dst.reserve(len);
    for _ in 0..len {
        dst.put_u8(rnd.random_range(b' '..=b'~'));
    }
    Slice::new_from_mut(dst)
}

/// 由一小段随机串重复拼成，压缩后约为 len * compression_ratio
pub fn compressible_string<R: Rng>(
    rnd: &mut R,
    compression_ratio: f64,
    len: usize,
    dst: &mut BytesMut,
) -> Slice {
    let raw = ((len as f64 * compression_ratio) as usize).max(1);
    let mut raw_data = BytesMut::with_capacity(raw);
    random_string(rnd, raw, &mut raw_data);
    dst.clear();
    while dst.len() < len {
        dst.put(&raw_data[..]);
    }
    dst.resize(len, 0);
    Slice::new_from_mut(dst)
}
