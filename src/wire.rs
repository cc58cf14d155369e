//! Datagram layout carrying one fragment plus its message metadata.
//!
//! Every datagram is laid out as
//! `[DATAGRAM_MAGIC][u16 header_len][bincode header][fragment payload]`.
//! The header repeats the message's expected fragment count and digest on
//! every fragment, so whichever fragment arrives first can create the
//! in-flight message.

use std::num::{NonZeroU32, NonZeroUsize};

use bincode::{
    Decode,
    Encode,
    config,
    decode_from_slice,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};
use bytes::{Buf, Bytes};
use thiserror::Error;

use crate::{
    digest::MessageDigest,
    message::{FragmentIndex, MessageKey},
    processor::FragmentMeta,
};

/// Magic prefix identifying a reassembler datagram.
pub const DATAGRAM_MAGIC: &[u8; 4] = b"URA1";

const LEN_PREFIX: usize = std::mem::size_of::<u16>();

/// Errors raised while encoding or decoding datagrams.
#[derive(Debug, Error)]
pub enum WireError {
    /// The datagram does not start with [`DATAGRAM_MAGIC`].
    #[error("datagram magic missing")]
    MissingMagic,
    /// The datagram ended before the declared header did.
    #[error("datagram truncated: needed {needed} bytes, found {available}")]
    Truncated {
        /// Bytes required to finish the header.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },
    /// The header bytes did not decode.
    #[error("failed to decode datagram header: {0}")]
    Decode(#[from] DecodeError),
    /// The header could not be encoded.
    #[error("failed to encode datagram header: {0}")]
    Encode(#[from] EncodeError),
    /// The encoded header does not fit the `u16` length prefix.
    #[error("datagram header of {len} bytes exceeds u16::MAX")]
    HeaderTooLarge {
        /// Encoded header length.
        len: usize,
    },
    /// The header carried an empty message key.
    #[error("datagram carries an empty message key")]
    EmptyKey,
    /// The header announced zero fragments.
    #[error("datagram for key {key} announces zero fragments")]
    ZeroCount {
        /// Key carried by the datagram.
        key: MessageKey,
    },
    /// The fragment index is not below the announced count.
    #[error("fragment index {index} out of range for count {expected_count}")]
    IndexOutOfRange {
        /// Offending index.
        index: FragmentIndex,
        /// Announced fragment count.
        expected_count: u32,
    },
    /// A message would need more fragments than the header can count.
    #[error("message needs {fragments} fragments, more than u32::MAX")]
    TooManyFragments {
        /// Fragments required.
        fragments: usize,
    },
}

/// Header preceding every fragment payload.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct DatagramHeader {
    key: String,
    expected_count: u32,
    digest: MessageDigest,
    index: FragmentIndex,
}

impl DatagramHeader {
    /// Describe fragment `index` of a message of `expected_count` fragments.
    #[must_use]
    pub fn new(
        key: &MessageKey,
        expected_count: NonZeroU32,
        digest: MessageDigest,
        index: FragmentIndex,
    ) -> Self {
        Self {
            key: key.as_str().to_owned(),
            expected_count: expected_count.get(),
            digest,
            index,
        }
    }
}

/// A decoded datagram ready for the processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatagramFragment {
    key: MessageKey,
    meta: FragmentMeta,
    payload: Bytes,
}

impl DatagramFragment {
    /// Key of the message this fragment belongs to.
    #[must_use]
    pub fn key(&self) -> &MessageKey { &self.key }

    /// Metadata announced by the datagram.
    #[must_use]
    pub const fn meta(&self) -> FragmentMeta { self.meta }

    /// Borrow the fragment payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// Cache key identifying this exact fragment, used to spot retransmits.
    #[must_use]
    pub fn staging_key(&self) -> String {
        match self.meta.index() {
            Some(index) => format!("{}#{index}", self.key),
            None => self.key.to_string(),
        }
    }

    /// Split into the parts consumed by
    /// [`MessageProcessor::process_fragment`](crate::MessageProcessor::process_fragment).
    #[must_use]
    pub fn into_parts(self) -> (MessageKey, Bytes, FragmentMeta) {
        (self.key, self.payload, self.meta)
    }
}

/// Encode one fragment into a datagram.
///
/// # Errors
///
/// Returns [`WireError`] if the header cannot be encoded or exceeds the
/// length prefix.
pub fn encode_datagram(header: &DatagramHeader, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let header_bytes = encode_to_vec(header, config::standard())?;
    let header_len = u16::try_from(header_bytes.len()).map_err(|_| WireError::HeaderTooLarge {
        len: header_bytes.len(),
    })?;

    let mut buf = Vec::with_capacity(
        DATAGRAM_MAGIC.len() + LEN_PREFIX + header_bytes.len() + payload.len(),
    );
    buf.extend_from_slice(DATAGRAM_MAGIC);
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_bytes);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode a datagram, validating the announced metadata.
///
/// The returned payload shares `datagram`'s allocation.
///
/// # Errors
///
/// Returns [`WireError`] when the magic, length prefix, or header is
/// malformed, or when the header announces impossible metadata.
pub fn decode_datagram(datagram: Bytes) -> Result<DatagramFragment, WireError> {
    let mut cursor = &datagram[..];
    let fixed = DATAGRAM_MAGIC.len() + LEN_PREFIX;
    if !cursor.starts_with(DATAGRAM_MAGIC) {
        return Err(WireError::MissingMagic);
    }
    if cursor.remaining() < fixed {
        return Err(WireError::Truncated {
            needed: fixed,
            available: cursor.remaining(),
        });
    }
    cursor.advance(DATAGRAM_MAGIC.len());
    let header_len = usize::from(cursor.get_u16());
    if cursor.remaining() < header_len {
        return Err(WireError::Truncated {
            needed: fixed + header_len,
            available: datagram.len(),
        });
    }

    let (header, consumed): (DatagramHeader, usize) =
        decode_from_slice(&cursor[..header_len], config::standard())?;
    if consumed != header_len {
        return Err(WireError::Decode(DecodeError::OtherString(format!(
            "header length prefix {header_len} disagrees with decoded length {consumed}"
        ))));
    }

    let DatagramHeader {
        key,
        expected_count,
        digest,
        index,
    } = header;
    if key.is_empty() {
        return Err(WireError::EmptyKey);
    }
    let key = MessageKey::new(key);
    let Some(count) = NonZeroU32::new(expected_count) else {
        return Err(WireError::ZeroCount { key });
    };
    if index.get() >= expected_count {
        return Err(WireError::IndexOutOfRange {
            index,
            expected_count,
        });
    }

    Ok(DatagramFragment {
        key,
        meta: FragmentMeta::new(count, digest).with_index(index),
        payload: datagram.slice(fixed + header_len..),
    })
}

/// Split `message` into datagrams carrying at most `max_payload` bytes each.
///
/// An empty message still produces one (empty) fragment.
///
/// # Errors
///
/// Returns [`WireError`] if the message needs more than `u32::MAX`
/// fragments or a header fails to encode.
pub fn split_message(
    key: &MessageKey,
    message: &[u8],
    max_payload: NonZeroUsize,
) -> Result<Vec<Vec<u8>>, WireError> {
    let chunks: Vec<&[u8]> = if message.is_empty() {
        vec![message]
    } else {
        message.chunks(max_payload.get()).collect()
    };
    let count = u32::try_from(chunks.len())
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or(WireError::TooManyFragments {
            fragments: chunks.len(),
        })?;
    let digest = MessageDigest::compute(message);

    chunks
        .into_iter()
        .zip(0..)
        .map(|(chunk, index)| {
            let header = DatagramHeader::new(key, count, digest, FragmentIndex::new(index));
            encode_datagram(&header, chunk)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn header(count: u32, index: u32) -> DatagramHeader {
        DatagramHeader {
            key: "k".to_owned(),
            expected_count: count,
            digest: MessageDigest::compute(b"abc"),
            index: FragmentIndex::new(index),
        }
    }

    #[test]
    fn decodes_encoded_fragment() {
        let datagram = encode_datagram(&header(3, 1), b"payload").expect("encode");

        let fragment = decode_datagram(Bytes::from(datagram)).expect("decode");

        assert_eq!(fragment.key().as_str(), "k");
        assert_eq!(fragment.payload().as_ref(), b"payload");
        assert_eq!(fragment.meta().expected_count().get(), 3);
        assert_eq!(fragment.meta().index(), Some(FragmentIndex::new(1)));
        assert_eq!(fragment.meta().expected_digest(), MessageDigest::compute(b"abc"));
        assert_eq!(fragment.staging_key(), "k#1");
    }

    #[rstest]
    #[case(b"" as &[u8])]
    #[case(b"XXXX\x00\x01")]
    fn rejects_foreign_datagrams(#[case] datagram: &'static [u8]) {
        let err = decode_datagram(Bytes::from_static(datagram)).expect_err("must reject");
        assert!(matches!(err, WireError::MissingMagic));
    }

    #[test]
    fn rejects_truncated_header() {
        let mut datagram = encode_datagram(&header(3, 1), b"").expect("encode");
        datagram.truncate(datagram.len() - 2);

        let err = decode_datagram(Bytes::from(datagram)).expect_err("must reject");

        assert!(matches!(err, WireError::Truncated { .. }));
    }

    #[test]
    fn rejects_zero_count() {
        let datagram = encode_datagram(&header(0, 0), b"x").expect("encode");
        let err = decode_datagram(Bytes::from(datagram)).expect_err("must reject");
        assert!(matches!(err, WireError::ZeroCount { .. }));
    }

    #[test]
    fn rejects_index_beyond_count() {
        let datagram = encode_datagram(&header(2, 2), b"x").expect("encode");
        let err = decode_datagram(Bytes::from(datagram)).expect_err("must reject");
        assert!(matches!(err, WireError::IndexOutOfRange { .. }));
    }

    #[test]
    fn rejects_empty_key() {
        let mut empty = header(1, 0);
        empty.key.clear();
        let datagram = encode_datagram(&empty, b"x").expect("encode");
        let err = decode_datagram(Bytes::from(datagram)).expect_err("must reject");
        assert!(matches!(err, WireError::EmptyKey));
    }

    #[test]
    fn split_message_covers_every_byte() {
        let key = MessageKey::from("msg");
        let message = b"abcdefghij";

        let datagrams =
            split_message(&key, message, NonZeroUsize::new(4).expect("non-zero")).expect("split");

        assert_eq!(datagrams.len(), 3);
        let fragments: Vec<_> = datagrams
            .into_iter()
            .map(|d| decode_datagram(Bytes::from(d)).expect("decode"))
            .collect();
        let joined: Vec<u8> = fragments
            .iter()
            .flat_map(|f| f.payload().iter().copied())
            .collect();
        assert_eq!(joined, message);
        assert!(fragments.iter().all(|f| {
            f.meta().expected_count().get() == 3
                && f.meta().expected_digest() == MessageDigest::compute(message)
        }));
    }

    #[test]
    fn empty_message_splits_into_one_fragment() {
        let datagrams = split_message(
            &MessageKey::from("empty"),
            b"",
            NonZeroUsize::new(8).expect("non-zero"),
        )
        .expect("split");
        assert_eq!(datagrams.len(), 1);
    }
}
