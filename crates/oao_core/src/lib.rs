//! OAO Core Types
//!
//! This crate contains pure types and logic with no I/O: identifiers,
//! SHA-256 digests, canonical JSON, timestamps and the cancellation
//! flag. Every persisted type serializes with a stable encoding.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod canonical;
pub mod hash;
pub mod id;
pub mod time;
pub mod version;

// Re-exports
pub use cancel::CancelFlag;
pub use canonical::{canonical_digest, canonical_string};
pub use hash::{Digest, DigestError};
pub use id::{EventId, ExecutionId, JobId, NodeId, WorkerId};
pub use time::Timestamp;
pub use version::RUNTIME_VERSION;
