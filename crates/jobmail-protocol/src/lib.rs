//! relion-jobmail protocol - wire format for job notices
//!
//! This crate provides the notice format exchanged between the notifier on
//! compute nodes and the collector daemon, and reused for the daemon's
//! newline-delimited queue file.

pub mod marker;
pub mod notice;

pub use marker::{is_exit_marker, local_timestamp, notice_for_marker};
pub use notice::{encode_line, parse_notice, ProtocolError, RawJobNotice};

/// Default collector port.
pub const DEFAULT_PORT: u16 = 62457;
