//! relion-jobmail core - shared domain types
//!
//! This crate provides the job event model and the digest renderer shared
//! between the collector daemon (`jobmaild`) and the notifier.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod digest;
pub mod error;
pub mod event;

// Re-exports for convenience
pub use digest::{
    group_by_node, render_line, Digest, DigestBuilder, NodeGroup, DEFAULT_SUBJECT_PREFIX,
};
pub use error::{DomainError, DomainResult};
pub use event::{JobEvent, JobStatus, MARKER_PREFIX};
