//! OAO Replay & Resume
//!
//! Three ways to revisit a past execution:
//!
//! - **Rehydration**: fold the log into state without invoking anything.
//!   Idempotent and side-effect-free.
//! - **Resume**: verify hash continuity, then continue from the first
//!   incomplete step with tool calls deduplicated against the log.
//! - **Audit** (forced re-execution): re-run everything against a scratch
//!   log and flag any divergence from the historical event stream.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod error;
pub mod rehydrate;
pub mod resume;

pub use audit::{audit_replay, AuditOptions, AuditReport, Divergence, EventFingerprint};
pub use error::ReplayError;
pub use rehydrate::{rehydrate, timeline};
pub use resume::{prepare_resume, resume, Resumption};
