//! Runtime version identity.
//!
//! The version participates in the execution hash: two runs are only
//! considered equivalent when produced by the same runtime version.

/// The runtime's own version, taken from the workspace manifest
pub const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");
