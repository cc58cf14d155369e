//! SHA-256 integrity digests for assembled messages.

use std::{fmt, str::FromStr};

use bincode::{Decode, Encode};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a [`MessageDigest`] in bytes.
pub const DIGEST_LEN: usize = 32;

/// SHA-256 digest of a fully assembled message.
///
/// Displayed and parsed as 64 lowercase hexadecimal characters.
///
/// # Examples
///
/// ```
/// use udp_reassembler::MessageDigest;
///
/// let digest = MessageDigest::compute(b"abcdef");
/// let parsed: MessageDigest = digest.to_string().parse().expect("valid hex digest");
/// assert_eq!(parsed, digest);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct MessageDigest([u8; DIGEST_LEN]);

impl MessageDigest {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self { Self(bytes) }

    /// Borrow the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] { &self.0 }

    /// Hash `data` with SHA-256.
    #[must_use]
    pub fn compute(data: &[u8]) -> Self { Self(Sha256::digest(data).into()) }
}

impl fmt::Display for MessageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&hex::encode(self.0)) }
}

impl fmt::Debug for MessageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageDigest({self})")
    }
}

/// Errors raised while parsing a hexadecimal digest.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum DigestParseError {
    /// The input was not valid hexadecimal.
    #[error("invalid hex digest: {0}")]
    Hex(#[from] hex::FromHexError),
    /// The input decoded to the wrong number of bytes.
    #[error("digest must be {DIGEST_LEN} bytes, found {found}")]
    Length {
        /// Number of bytes actually decoded.
        found: usize,
    },
}

impl FromStr for MessageDigest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())?;
        let bytes: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|rejected: Vec<u8>| DigestParseError::Length {
                found: rejected.len(),
            })?;
        Ok(Self(bytes))
    }
}
