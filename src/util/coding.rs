use crate::obj::slice::Slice;
use bytes::{BufMut, BytesMut};

pub fn encode_fixed32(dst: &mut [u8], value: u32) {
    dst[..4].copy_from_slice(&value.to_le_bytes());
}

pub fn put_fixed32(dst: &mut BytesMut, value: u32) {
    let mut buf: [u8; size_of::<u32>()] = [0; size_of::<u32>()];
    encode_fixed32(&mut buf, value);
    dst.put(&buf[..]);
}

pub fn encode_fixed64(dst: &mut [u8], value: u64) {
    dst[..8].copy_from_slice(&value.to_le_bytes());
}

pub fn put_fixed64(dst: &mut BytesMut, value: u64) {
    let mut buf: [u8; size_of::<u64>()] = [0; size_of::<u64>()];
    encode_fixed64(&mut buf, value);
    dst.put_slice(&buf);
}

#[inline]
pub fn decode_fixed32(ptr: &[u8]) -> u32 {
    u32::from_le_bytes([ptr[0], ptr[1], ptr[2], ptr[3]])
}

#[inline]
pub fn decode_fixed64(ptr: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&ptr[..8]);
    u64::from_le_bytes(buf)
}

/// 写入 varint，返回写入的字节数
#[inline]
fn encode_varint64(dst: &mut [u8], mut v: u64) -> usize {
    const B: u64 = 128;
    let mut pos: usize = 0;
    while v >= B {
        dst[pos] = (v | B) as u8;
        pos += 1;
        v >>= 7;
    }
    dst[pos] = v as u8;
    pos + 1
}

pub fn put_varint32(dst: &mut BytesMut, v: u32) {
    put_varint64(dst, v as u64)
}

pub fn put_varint64(dst: &mut BytesMut, v: u64) {
    let mut buf: [u8; 10] = [0; 10];
    let n = encode_varint64(&mut buf, v);
    dst.put_slice(&buf[..n]);
}

pub fn put_length_prefixed_slice(dst: &mut BytesMut, value: &[u8]) {
    put_varint32(dst, value.len() as u32);
    dst.put_slice(value);
}

pub fn varint_length(mut v: u64) -> usize {
    let mut len = 1;
    while v >= 128 {
        v >>= 7;
        len += 1;
    }
    len
}

/// 从 ptr 解出一个 varint32，返回剩余部分；数据不完整或溢出时返回 None
#[inline]
pub fn get_varint32ptr<'a>(ptr: &'a [u8], value: &mut u32) -> Option<&'a [u8]> {
    if let Some(&first) = ptr.first() {
        if first & 128 == 0 {
            *value = first as u32;
            return Some(&ptr[1..]);
        }
    }
    let mut result = 0u32;
    let mut shift = 0u32;
    for (pos, &byte) in ptr.iter().enumerate() {
        if shift > 28 {
            break;
        }
        let byte = byte as u32;
        if byte & 128 > 0 {
            result |= (byte & 127) << shift;
        } else {
            result |= byte << shift;
            *value = result;
            return Some(&ptr[pos + 1..]);
        }
        shift += 7;
    }
    None
}

#[inline]
pub fn get_varint64ptr<'a>(ptr: &'a [u8], value: &mut u64) -> Option<&'a [u8]> {
    let mut result = 0u64;
    let mut shift = 0u32;
    for (pos, &byte) in ptr.iter().enumerate() {
        if shift > 63 {
            break;
        }
        let byte = byte as u64;
        if byte & 128 > 0 {
            result |= (byte & 127) << shift;
        } else {
            result |= byte << shift;
            *value = result;
            return Some(&ptr[pos + 1..]);
        }
        shift += 7;
    }
    None
}

pub fn get_varint32(input: &mut Slice, value: &mut u32) -> bool {
    let limit = input.size();
    match get_varint32ptr(input.data(), value).map(|rest| rest.len()) {
        Some(remain) => {
            input.remove_prefix(limit - remain);
            true
        }
        None => false,
    }
}

pub fn get_varint64(input: &mut Slice, value: &mut u64) -> bool {
    let limit = input.size();
    match get_varint64ptr(input.data(), value).map(|rest| rest.len()) {
        Some(remain) => {
            input.remove_prefix(limit - remain);
            true
        }
        None => false,
    }
}

pub fn get_length_prefixed_slice(input: &mut Slice, result: &mut Slice) -> bool {
    let mut len = 0u32;
    if get_varint32(input, &mut len) && input.size() >= len as usize {
        *result = input.slice(len as usize);
        input.remove_prefix(len as usize);
        true
    } else {
        false
    }
}
