use bytes::{Buf, Bytes, BytesMut};
use std::cmp::{min, Ordering};
use std::fmt;
use std::ops::{Index, Range};

/// 不可变字节串，底层由 `Bytes` 共享，clone 只增加引用计数。
#[derive(Clone, Eq, Hash, Default)]
pub struct Slice {
    pub(crate) data_bytes: Bytes,
}

impl Slice {
    pub(crate) fn new_from_slice(p0: &Slice, p1: Range<usize>) -> Slice {
        Slice {
            data_bytes: p0.data_bytes.slice(p1),
        }
    }
    // 构造函数
    pub fn new(data: Bytes) -> Self {
        Slice { data_bytes: data }
    }
    pub fn new_empty() -> Self {
        Slice {
            data_bytes: Bytes::new(),
        }
    }
    pub fn new_from_mut(data: &BytesMut) -> Self {
        Slice {
            data_bytes: Bytes::copy_from_slice(&data[..]),
        }
    }
    pub fn new_bytes_mut(data: BytesMut) -> Self {
        Slice {
            data_bytes: data.freeze(),
        }
    }
    pub fn new_from_vec(data: Vec<u8>) -> Self {
        Slice {
            data_bytes: Bytes::from(data),
        }
    }
    pub fn new_from_array(data: &[u8]) -> Self {
        Slice {
            data_bytes: Bytes::copy_from_slice(data),
        }
    }
    pub fn new_from_string(data: String) -> Self {
        Slice {
            data_bytes: Bytes::from(data.into_bytes()),
        }
    }
    pub fn new_from_static(data: &'static str) -> Self {
        Slice {
            data_bytes: Bytes::from_static(data.as_bytes()),
        }
    }
    pub fn new_from_str(data: &str) -> Self {
        Slice {
            data_bytes: Bytes::copy_from_slice(data.as_bytes()),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data_bytes
    }
    pub fn size(&self) -> usize {
        self.len()
    }
    // 获取引用的长度
    pub fn len(&self) -> usize {
        self.data_bytes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data_bytes.is_empty()
    }
    pub(crate) fn remove_prefix(&mut self, n: usize) {
        if n > self.len() {
            panic!("remove_prefix: n is out of range")
        }
        self.data_bytes.advance(n);
    }
    pub fn to_string(&self) -> String {
        String::from_utf8_lossy(&self.data_bytes).to_string()
    }

    pub fn compare(&self, x: &Slice) -> Ordering {
        self.data_bytes.cmp(&x.data_bytes)
    }

    pub fn starts_with(&self, x: &Slice) -> bool {
        self.data_bytes.len() >= x.data_bytes.len()
            && self.data_bytes[..x.data_bytes.len()] == x.data_bytes[..]
    }
    /// 前 n 个字节（不足 n 时取全部）
    pub fn slice(&self, n: usize) -> Slice {
        let data_bytes = self.data_bytes.slice(..min(n, self.len()));
        Slice { data_bytes }
    }
}

impl Index<usize> for Slice {
    type Output = u8;
    fn index(&self, index: usize) -> &Self::Output {
        &self.data_bytes[index]
    }
}

impl PartialEq for Slice {
    fn eq(&self, other: &Self) -> bool {
        self.data_bytes == other.data_bytes
    }
}

impl PartialOrd for Slice {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Slice {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slice({:?})", self.data_bytes)
    }
}

impl AsRef<[u8]> for Slice {
    fn as_ref(&self) -> &[u8] {
        &self.data_bytes
    }
}

impl From<&'static str> for Slice {
    fn from(s: &'static str) -> Self {
        Slice::new_from_static(s)
    }
}

impl From<&BytesMut> for Slice {
    fn from(s: &BytesMut) -> Self {
        Slice {
            data_bytes: Bytes::copy_from_slice(&s[..]),
        }
    }
}

impl From<Bytes> for Slice {
    fn from(b: Bytes) -> Self {
        Slice { data_bytes: b }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_prefix_ops() {
        let mut s = Slice::new_from_str("hello world");
        assert!(s.starts_with(&Slice::from("hello")));
        assert_eq!(s.slice(5), Slice::from("hello"));
        s.remove_prefix(6);
        assert_eq!(s.to_string(), "world");
        assert_eq!(s.slice(100).len(), 5);
    }

    #[test]
    fn test_slice_ordering() {
        assert_eq!(Slice::from("a").compare(&Slice::from("b")), Ordering::Less);
        assert_eq!(Slice::from("ab").compare(&Slice::from("a")), Ordering::Greater);
        assert!(Slice::new_empty().is_empty());
    }
}
