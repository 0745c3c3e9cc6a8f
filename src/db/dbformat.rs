use crate::obj::slice::Slice;
use crate::obj::status::Status;
use crate::util::coding;
use crate::util::coding::decode_fixed64;
use crate::util::comparator::Comparator;
use bytes::{BufMut, BytesMut};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub type SequenceNumber = u64;

#[derive(Debug, PartialEq, PartialOrd, Clone, Copy, Eq)]
#[repr(u8)]
pub enum ValueType {
    KTypeDeletion = 0x0,
    KTypeValue = 0x1,
}

impl TryFrom<u8> for ValueType {
    type Error = Status;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(ValueType::KTypeDeletion),
            0x1 => Ok(ValueType::KTypeValue),
            _ => Err(Status::corruption("invalid value type", None)),
        }
    }
}

/// 序列号只有 56 位，低 8 位留给 ValueType
pub const K_MAX_SEQUENCE_NUMBER: SequenceNumber = (0x1u64 << 56) - 1;
/// 查找时使用的类型：同一个序列号下它排在最前面
pub const K_VALUE_TYPE_FOR_SEEK: ValueType = ValueType::KTypeValue;

/// internal key = user_key + fixed64(sequence << 8 | type)
#[derive(Debug, PartialEq, Clone)]
pub struct ParsedInternalKey {
    pub user_key: Slice,
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl ParsedInternalKey {
    pub fn new(user_key: Slice, sequence: SequenceNumber, value_type: ValueType) -> Self {
        ParsedInternalKey {
            user_key,
            sequence,
            value_type,
        }
    }
}

impl fmt::Display for ParsedInternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' @ {} : {}",
            String::from_utf8_lossy(self.user_key.data()),
            self.sequence,
            self.value_type as u8
        )
    }
}

#[inline]
pub fn extract_user_key(internal_key: &Slice) -> Slice {
    debug_assert!(internal_key.len() >= 8);
    Slice::new_from_slice(internal_key, 0..internal_key.len() - 8)
}

#[inline(always)]
fn pack_sequence_and_type(seq: SequenceNumber, t: ValueType) -> u64 {
    debug_assert!(seq <= K_MAX_SEQUENCE_NUMBER);
    debug_assert!(t <= K_VALUE_TYPE_FOR_SEEK);
    (seq << 8) | (t as u64)
}

#[inline]
pub fn append_internal_key(result: &mut BytesMut, key: &ParsedInternalKey) {
    result.put_slice(key.user_key.data());
    coding::put_fixed64(result, pack_sequence_and_type(key.sequence, key.value_type))
}

pub fn parse_internal_key(internal_key: &Slice) -> Result<ParsedInternalKey, Status> {
    let n = internal_key.len();
    if n < 8 {
        return Err(Status::corruption(
            "internal key too short",
            Some(format!("{:?}", internal_key).as_str()),
        ));
    }
    let num = decode_fixed64(&internal_key.data()[n - 8..]);
    let value_type = ValueType::try_from((num & 0xff) as u8)?;
    Ok(ParsedInternalKey {
        user_key: extract_user_key(internal_key),
        sequence: num >> 8,
        value_type,
    })
}

/// 编码好的 internal key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalKey {
    rep_: BytesMut,
}

impl InternalKey {
    pub fn new(user_key: &Slice, sequence_number: SequenceNumber, t: ValueType) -> InternalKey {
        let mut rep_ = BytesMut::with_capacity(user_key.len() + 8);
        append_internal_key(
            &mut rep_,
            &ParsedInternalKey {
                user_key: user_key.clone(),
                sequence: sequence_number,
                value_type: t,
            },
        );
        InternalKey { rep_ }
    }

    /// 查找 user_key 时用的 key：排在该 user key 所有版本之前
    pub fn for_lookup(user_key: &Slice) -> InternalKey {
        InternalKey::new(user_key, K_MAX_SEQUENCE_NUMBER, K_VALUE_TYPE_FOR_SEEK)
    }

    pub fn decode_from(&mut self, s: &Slice) -> bool {
        self.rep_ = BytesMut::from(s.data());
        !self.rep_.is_empty()
    }

    pub fn encode(&self) -> Slice {
        debug_assert!(!self.rep_.is_empty());
        Slice::new_from_mut(&self.rep_)
    }

    pub fn user_key(&self) -> Slice {
        extract_user_key(&self.encode())
    }

    pub fn set_from(&mut self, p: &ParsedInternalKey) {
        self.rep_.clear();
        append_internal_key(&mut self.rep_, p);
    }

    pub fn clear(&mut self) {
        self.rep_.clear();
    }
}

/// 先按 user key 升序，再按序列号降序
pub struct InternalKeyComparator {
    user_comparator_: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user_comparator: Arc<dyn Comparator>) -> InternalKeyComparator {
        InternalKeyComparator {
            user_comparator_: user_comparator,
        }
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user_comparator_
    }
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, akey: &Slice, bkey: &Slice) -> Ordering {
        let r = self
            .user_comparator_
            .compare(&extract_user_key(akey), &extract_user_key(bkey));
        if r != Ordering::Equal {
            return r;
        }
        let a_num = decode_fixed64(&akey.data()[akey.len() - 8..]);
        let b_num = decode_fixed64(&bkey.data()[bkey.len() - 8..]);
        // 序列号大的排前面
        b_num.cmp(&a_num)
    }

    fn name(&self) -> &'static str {
        "leveldb.InternalKeyComparator"
    }

    fn find_shortest_separator(&self, start: &mut BytesMut, limit: &Slice) {
        let user_start = extract_user_key(&Slice::new_from_mut(start));
        let user_limit = extract_user_key(limit);
        let mut tmp = BytesMut::from(user_start.data());
        self.user_comparator_
            .find_shortest_separator(&mut tmp, &user_limit);
        if tmp.len() < user_start.size()
            && self
                .user_comparator_
                .compare(&user_start, &Slice::new_from_mut(&tmp))
                == Ordering::Less
        {
            // user key 变短了但逻辑上变大了，配上最大的序列号
            coding::put_fixed64(
                &mut tmp,
                pack_sequence_and_type(K_MAX_SEQUENCE_NUMBER, K_VALUE_TYPE_FOR_SEEK),
            );
            debug_assert!(
                self.compare(&Slice::new_from_mut(start), &Slice::new_from_mut(&tmp))
                    == Ordering::Less
            );
            debug_assert!(self.compare(&Slice::new_from_mut(&tmp), limit) == Ordering::Less);
            *start = tmp;
        }
    }

    fn find_short_successor(&self, key: &mut BytesMut) {
        let user_key = extract_user_key(&Slice::new_from_mut(key));
        let mut tmp = BytesMut::from(user_key.data());
        self.user_comparator_.find_short_successor(&mut tmp);
        if tmp.len() < user_key.len()
            && self
                .user_comparator_
                .compare(&user_key, &Slice::new_from_mut(&tmp))
                == Ordering::Less
        {
            coding::put_fixed64(
                &mut tmp,
                pack_sequence_and_type(K_MAX_SEQUENCE_NUMBER, K_VALUE_TYPE_FOR_SEEK),
            );
            debug_assert!(
                self.compare(&Slice::new_from_mut(key), &Slice::new_from_mut(&tmp))
                    == Ordering::Less
            );
            *key = tmp;
        }
    }
}
