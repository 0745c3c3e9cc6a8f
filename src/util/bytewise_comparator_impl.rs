use crate::obj::slice::Slice;
use crate::util::comparator::Comparator;
use bytes::BytesMut;
use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};

static BYTEWISE: OnceLock<Arc<dyn Comparator>> = OnceLock::new();

pub struct BytewiseComparatorImpl {}

impl Comparator for BytewiseComparatorImpl {
    fn compare(&self, a: &Slice, b: &Slice) -> Ordering {
        a.compare(b)
    }

    fn name(&self) -> &'static str {
        "leveldb.BytewiseComparator"
    }

    fn find_shortest_separator(&self, start: &mut BytesMut, limit: &Slice) {
        let min_length = std::cmp::min(start.len(), limit.len());
        let mut diff_index = 0usize;
        while diff_index < min_length && start[diff_index] == limit[diff_index] {
            diff_index += 1;
        }
        if diff_index < min_length {
            let diff_byte = start[diff_index];
            if diff_byte < 0xff && diff_byte + 1 < limit[diff_index] {
                start[diff_index] += 1;
                start.truncate(diff_index + 1);
                debug_assert!(
                    self.compare(&Slice::new_from_array(&start[..]), limit) == Ordering::Less
                )
            }
        }
    }

    fn find_short_successor(&self, key: &mut BytesMut) {
        for len in 0..key.len() {
            if key[len] != 0xff {
                key[len] += 1;
                key.truncate(len + 1);
                return;
            }
        }
    }
}

pub fn byte_wise_comparator() -> Arc<dyn Comparator> {
    BYTEWISE
        .get_or_init(|| Arc::new(BytewiseComparatorImpl {}))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_shortest_separator() {
        let cmp = byte_wise_comparator();
        let mut start = BytesMut::from("abcdefghij");
        cmp.find_shortest_separator(&mut start, &Slice::from("abzzz"));
        assert_eq!(&start[..], b"abd");

        let mut start = BytesMut::from("abc");
        cmp.find_shortest_separator(&mut start, &Slice::from("abcd"));
        assert_eq!(&start[..], b"abc");
    }

    #[test]
    fn test_find_short_successor() {
        let cmp = byte_wise_comparator();
        let mut key = BytesMut::from("abc");
        cmp.find_short_successor(&mut key);
        assert_eq!(&key[..], b"b");

        let mut key = BytesMut::from(&[0xffu8, 0xff][..]);
        cmp.find_short_successor(&mut key);
        assert_eq!(&key[..], &[0xffu8, 0xff][..]);
    }
}
