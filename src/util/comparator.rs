use crate::obj::slice::Slice;
use bytes::BytesMut;
use std::cmp::Ordering;

/// 键的全序。实现必须是线程安全的，同一个比较器会被所有读者共享。
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &Slice, b: &Slice) -> Ordering;
    /// 写进表文件的名字，名字不同的比较器产生的文件互不兼容
    fn name(&self) -> &'static str;
    /// 若 start < limit，把 start 改成 [start, limit) 内更短的串
    fn find_shortest_separator(&self, start: &mut BytesMut, limit: &Slice);
    /// 把 key 改成 >= key 的更短的串
    fn find_short_successor(&self, key: &mut BytesMut);
}
