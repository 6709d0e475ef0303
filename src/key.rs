// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Slice;
use std::cmp::Reverse;

/// User defined key.
pub type UserKey = Slice;

/// User defined value payload.
#[allow(clippy::module_name_repetitions)]
pub type UserValue = Slice;

/// Sequence number - a monotonically increasing counter.
///
/// Values with the same seqno are part of the same batch. A value with a
/// higher sequence number shadows an item with the same user key and a lower
/// sequence number, which is what makes MVCC reads possible. Stale entries
/// are garbage-collected by compaction, which is outside this core.
pub type SeqNo = u64;

/// The largest sequence number an internal key can carry.
///
/// Packed into the low 56 bits of the trailer alongside the 8-bit type tag.
pub const MAX_SEQUENCE_NUMBER: SeqNo = (1 << 56) - 1;

/// Tag identifying what an internal key represents.
///
/// `RangeDeletion` is a sentinel used exclusively by table readers to mark
/// file-boundary pseudo-keys fed to the merging iterator (see
/// [`crate::merge`]); it never appears in a user-visible value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[allow(clippy::module_name_repetitions)]
pub enum ValueType {
    /// A deletion marker covering exactly one key.
    Delete,
    /// A regular value.
    Put,
    /// An unresolved merge operand.
    Merge,
    /// A deletion marker that only removes the single most recent write for a key.
    SingleDelete,
    /// A `(start, end, seq)` range tombstone record.
    RangeDelete,
    /// File-boundary pseudo-key; never a real write.
    RangeDeletion,
}

impl ValueType {
    /// Returns `true` if the type marks the key as deleted (fully or for this write only).
    #[must_use]
    pub fn is_tombstone(self) -> bool {
        matches!(self, Self::Delete | Self::SingleDelete)
    }

    /// Returns `true` if this is the file-boundary sentinel.
    #[must_use]
    pub fn is_sentinel(self) -> bool {
        self == Self::RangeDeletion
    }
}

impl TryFrom<u8> for ValueType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Delete),
            1 => Ok(Self::Put),
            2 => Ok(Self::Merge),
            3 => Ok(Self::SingleDelete),
            4 => Ok(Self::RangeDelete),
            5 => Ok(Self::RangeDeletion),
            _ => Err(()),
        }
    }
}

impl From<ValueType> for u8 {
    fn from(value: ValueType) -> Self {
        match value {
            ValueType::Delete => 0,
            ValueType::Put => 1,
            ValueType::Merge => 2,
            ValueType::SingleDelete => 3,
            ValueType::RangeDelete => 4,
            ValueType::RangeDeletion => 5,
        }
    }
}

/// Packs a sequence number and value type into the 8-byte internal-key trailer.
///
/// # Panics
/// Panics if `seqno` exceeds [`MAX_SEQUENCE_NUMBER`].
#[must_use]
pub fn pack_seqno_and_type(seqno: SeqNo, value_type: ValueType) -> u64 {
    assert!(seqno <= MAX_SEQUENCE_NUMBER, "sequence number overflow");
    (seqno << 8) | u64::from(u8::from(value_type))
}

/// Unpacks the 8-byte internal-key trailer into its sequence number and type.
#[must_use]
pub fn unpack_seqno_and_type(packed: u64) -> (SeqNo, ValueType) {
    let seqno = packed >> 8;
    #[allow(clippy::cast_possible_truncation)]
    let tag = packed as u8;
    let value_type = ValueType::try_from(tag).unwrap_or(ValueType::RangeDeletion);
    (seqno, value_type)
}

/// The total order used across the whole core: `(user_key asc, sequence desc, type desc)`.
///
/// `user_key` bytes followed by the packed `(sequence:56, type:8)` trailer form
/// the on-the-wire internal key; this struct is the decoded, comparable form
/// of it.
#[derive(Clone, PartialEq, Eq)]
#[allow(clippy::module_name_repetitions)]
pub struct InternalKey {
    pub user_key: UserKey,
    pub seqno: SeqNo,
    pub value_type: ValueType,
}

impl std::fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}:{}:{:?}",
            self.user_key, self.seqno, self.value_type
        )
    }
}

impl InternalKey {
    /// Constructs a new internal key.
    ///
    /// # Panics
    /// Panics if `seqno` exceeds [`MAX_SEQUENCE_NUMBER`].
    pub fn new<K: Into<UserKey>>(user_key: K, seqno: SeqNo, value_type: ValueType) -> Self {
        let user_key = user_key.into();

        assert!(
            seqno <= MAX_SEQUENCE_NUMBER,
            "sequence number exceeds 56-bit range"
        );

        Self {
            user_key,
            seqno,
            value_type,
        }
    }

    /// The file-boundary sentinel key fed to truncated range-del iterators,
    /// per §4.2 / §4.3.
    #[must_use]
    pub fn sentinel<K: Into<UserKey>>(user_key: K, seqno: SeqNo) -> Self {
        Self::new(user_key, seqno, ValueType::RangeDeletion)
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value_type.is_tombstone()
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.value_type.is_sentinel()
    }

    /// Packs `self` into a flat byte string: `user_key || be(seqno:56, type:8)`.
    #[must_use]
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.user_key.len() + 8);
        buf.extend_from_slice(&self.user_key);
        buf.extend_from_slice(&pack_seqno_and_type(self.seqno, self.value_type).to_be_bytes());
        buf
    }

    /// Decodes a flat `user_key || be(seqno:56, type:8)` byte string.
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < 8 {
            return Err(crate::Error::Corruption(
                "internal key shorter than the 8-byte trailer".into(),
            ));
        }

        let (user_key, trailer) = bytes.split_at(bytes.len() - 8);
        let packed = u64::from_be_bytes(trailer.try_into().expect("exactly 8 bytes"));
        let (seqno, value_type) = unpack_seqno_and_type(packed);

        Ok(Self::new(user_key, seqno, value_type))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// user_key ascending, then sequence descending (newer first), then type descending.
// This is one of the most important functions in the crate: get it wrong and
// reads silently return stale values.
impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (
            &self.user_key,
            Reverse(self.seqno),
            Reverse(u8::from(self.value_type)),
        )
            .cmp(&(
                &other.user_key,
                Reverse(other.seqno),
                Reverse(u8::from(other.value_type)),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn orders_by_user_key_then_seqno_desc_then_type_desc() {
        let a = InternalKey::new("a", 5, ValueType::Put);
        let b = InternalKey::new("b", 5, ValueType::Put);
        assert!(a < b);

        let newer = InternalKey::new("k", 10, ValueType::Put);
        let older = InternalKey::new("k", 5, ValueType::Put);
        assert!(newer < older, "higher seqno sorts first");

        let put = InternalKey::new("k", 5, ValueType::Put);
        let merge = InternalKey::new("k", 5, ValueType::Merge);
        assert!(put < merge, "higher type tag sorts first on a seqno tie");
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let packed = pack_seqno_and_type(1234, ValueType::SingleDelete);
        let (seqno, ty) = unpack_seqno_and_type(packed);
        assert_eq!(seqno, 1234);
        assert_eq!(ty, ValueType::SingleDelete);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let key = InternalKey::new("hello", 42, ValueType::RangeDelete);
        let bytes = key.encode_to_vec();
        let decoded = InternalKey::decode(&bytes).expect("decode");
        assert_eq!(key, decoded);
    }

    #[test]
    fn decode_rejects_short_input() {
        assert!(InternalKey::decode(&[1, 2, 3]).is_err());
    }

    #[test]
    #[should_panic(expected = "sequence number exceeds 56-bit range")]
    fn new_panics_on_seqno_overflow() {
        InternalKey::new("k", MAX_SEQUENCE_NUMBER + 1, ValueType::Put);
    }

    #[test]
    fn sentinel_is_recognized() {
        let key = InternalKey::sentinel("boundary", MAX_SEQUENCE_NUMBER);
        assert!(key.is_sentinel());
        assert!(!InternalKey::new("k", 1, ValueType::Put).is_sentinel());
    }
}
