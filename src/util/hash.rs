/// 与 murmur 类似的 32 位哈希，用于 cache 分片和 bloom filter
pub fn hash(data_bytes: &[u8], seed: u32) -> u32 {
    const M: u32 = 0xc6a4a793;
    const R: u32 = 24;
    let mut h = seed ^ (data_bytes.len() as u32).wrapping_mul(M);
    let mut chunks = data_bytes.chunks_exact(4);
    for w in &mut chunks {
        h = h.wrapping_add(u32::from_le_bytes([w[0], w[1], w[2], w[3]]));
        h = h.wrapping_mul(M);
        h ^= h >> 16;
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let mut tail = [0u8; 4];
        tail[..rest.len()].copy_from_slice(rest);
        h = h.wrapping_add(u32::from_le_bytes(tail));
        h = h.wrapping_mul(M);
        h ^= h >> R;
    }
    h
}
