#![doc(html_root_url = "https://docs.rs/udp_reassembler/latest")]
//! Public API for the `udp_reassembler` library.
//!
//! This crate reassembles messages that arrive as independent UDP
//! fragments. A [`MessageProcessor`] tracks in-flight messages, validates
//! each completed message against its SHA-256 digest, and hands it to
//! [`CompletedStorage`]. A [`CleanupSweeper`] evicts messages that stay
//! incomplete beyond their grace period, and a [`FragmentCache`] keeps
//! short-lived fragment blobs for duplicate suppression. The [`server`]
//! module wires these to a tokio UDP socket.

pub mod cache;
pub mod config;
pub mod digest;
pub mod error;
pub mod message;
pub mod metrics;
pub mod processor;
pub mod server;
pub mod storage;
pub mod sweeper;
pub mod wire;

pub use cache::{CachedFragment, FragmentCache};
pub use config::{ConfigBuilder, ConfigError, ReassemblerConfig};
pub use digest::{DigestParseError, MessageDigest};
pub use error::{ReassemblerError, Result};
pub use message::{CompletedMessage, FragmentIndex, MessageKey};
pub use processor::{
    ChannelSink,
    CompletionSink,
    FragmentMeta,
    FragmentOutcome,
    IngestError,
    MessageProcessor,
    MessageStatus,
    NoopSink,
};
pub use storage::CompletedStorage;
pub use sweeper::{CleanupSweeper, Sweep};
pub use wire::{
    DATAGRAM_MAGIC,
    DatagramFragment,
    DatagramHeader,
    WireError,
    decode_datagram,
    encode_datagram,
    split_message,
};
